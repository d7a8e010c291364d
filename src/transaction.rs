//! Transactions scoped to one remote connection.

use crate::connection::Inner;
use crate::driver::ExecResult;
use crate::error::Result;
use crate::protocol::Request;
use crate::rows::Rows;
use crate::statement::Stmt;
use crate::value::Value;
use std::sync::Arc;
use tracing::debug;

/// An open transaction. Statements issued through it run on the same gateway
/// session as the connection that began it.
///
/// A transaction dropped without `commit` or `rollback` is rolled back ahead
/// of the connection's next request.
pub struct Tx {
    inner: Arc<Inner>,
    done: bool,
}

impl Tx {
    pub(crate) fn new(inner: Arc<Inner>) -> Self {
        Self { inner, done: false }
    }

    pub async fn exec(&self, query: &str, args: &[Value]) -> Result<ExecResult> {
        self.inner.exec(None, query, args).await
    }

    pub async fn query(&self, query: &str, args: &[Value]) -> Result<Rows> {
        self.inner.query(None, query, args).await
    }

    pub async fn prepare(&self, query: &str) -> Result<Stmt> {
        self.inner.prepare(query).await
    }

    pub async fn commit(mut self) -> Result<()> {
        self.done = true;
        self.inner.round_trip(Request::commit()).await?;
        Ok(())
    }

    pub async fn rollback(mut self) -> Result<()> {
        self.done = true;
        self.inner.round_trip(Request::rollback()).await?;
        Ok(())
    }
}

impl Drop for Tx {
    fn drop(&mut self) {
        if !self.done {
            debug!("transaction dropped without commit, rolling back");
            self.inner.defer(Request::rollback());
        }
    }
}
