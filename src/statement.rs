//! Prepared statements living on the gateway.

use crate::connection::Inner;
use crate::driver::ExecResult;
use crate::error::{Error, Result};
use crate::protocol::Request;
use crate::rows::Rows;
use crate::value::Value;
use std::sync::Arc;

/// A statement prepared on the gateway. Only its handle lives on the client.
///
/// Dropping an open statement queues its STMT_CLOSE for the next exchange.
pub struct Stmt {
    inner: Arc<Inner>,
    id: u64,
    num_input: Option<usize>,
    closed: bool,
}

impl Stmt {
    pub(crate) fn new(inner: Arc<Inner>, id: u64, num_input: Option<usize>) -> Self {
        Self {
            inner,
            id,
            num_input,
            closed: false,
        }
    }

    /// Number of placeholders, when the driver reports it.
    pub fn num_input(&self) -> Option<usize> {
        self.num_input
    }

    fn check(&self, args: &[Value]) -> Result<()> {
        if self.closed {
            return Err(Error::InvalidParameter("statement is closed".to_string()));
        }
        match self.num_input {
            Some(expected) if expected != args.len() => Err(Error::InvalidParameter(format!(
                "expected {} arguments, got {}",
                expected,
                args.len()
            ))),
            _ => Ok(()),
        }
    }

    pub async fn exec(&self, args: &[Value]) -> Result<ExecResult> {
        self.check(args)?;
        self.inner.exec(Some(self.id), "", args).await
    }

    pub async fn query(&self, args: &[Value]) -> Result<Rows> {
        self.check(args)?;
        self.inner.query(Some(self.id), "", args).await
    }

    /// Release the statement on the gateway. Closing twice, or after the
    /// connection is gone, is not an error.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if !self.inner.is_open() {
            return Ok(());
        }
        self.inner.round_trip(Request::stmt_close(self.id)).await?;
        Ok(())
    }
}

impl Drop for Stmt {
    fn drop(&mut self) {
        if !self.closed {
            self.inner.defer(Request::stmt_close(self.id));
        }
    }
}
