//! Remote connection to a gateway session.
//!
//! Every operation is one request/response exchange on the session's stream.
//! The exchange lock is held for the whole round trip so two callers sharing a
//! connection can never have two requests in flight at once.

use crate::driver::{Column, ExecResult};
use crate::error::{Error, Result};
use crate::proto::sql_client::SqlClient;
use crate::protocol::{ExecResponse, PrepareResponse, QueryResponse, Request, Response};
use crate::rows::Rows;
use crate::statement::Stmt;
use crate::transaction::Tx;
use crate::value::{to_wire_all, Value};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex as AsyncMutex, MutexGuard};
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::Channel;
use tonic::Streaming;
use tracing::{debug, warn};

/// The two halves of a `Conn` stream.
struct Exchange {
    requests: mpsc::Sender<Request>,
    responses: Streaming<Response>,
}

impl Exchange {
    async fn call(&mut self, request: Request) -> Result<Response> {
        let code = request.code;
        self.requests
            .send(request)
            .await
            .map_err(|_| Error::ConnectionBroken("request stream closed".to_string()))?;

        let response = self
            .responses
            .message()
            .await?
            .ok_or_else(|| Error::ConnectionBroken("gateway closed the stream".to_string()))?;

        if response.code != code {
            return Err(Error::Protocol(format!(
                "response code {} does not match request code {}",
                response.code, code
            )));
        }
        Ok(response)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum State {
    Open,
    Closed,
    Broken(String),
}

/// Marks the connection broken unless the exchange completed. Dropping the
/// exchange future mid-flight leaves a response on the wire that can never be
/// matched to a request again.
struct InFlight<'a> {
    inner: &'a Inner,
    guard: MutexGuard<'a, Option<Exchange>>,
    done: bool,
}

impl InFlight<'_> {
    fn tear_down(&mut self, reason: &str) {
        self.inner.mark_broken(reason);
        self.guard.take();
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.tear_down("request interrupted before its response arrived");
        }
    }
}

/// State shared by a connection and the statements, cursors and transactions
/// created from it.
pub(crate) struct Inner {
    target: String,
    exchange: AsyncMutex<Option<Exchange>>,
    state: Mutex<State>,
    deferred: Mutex<Vec<Request>>,
    request_timeout: Option<Duration>,
}

impl Inner {
    fn check(&self) -> Result<()> {
        match &*self.state.lock() {
            State::Open => Ok(()),
            State::Closed => Err(Error::ConnectionClosed),
            State::Broken(reason) => Err(Error::ConnectionBroken(reason.clone())),
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        *self.state.lock() == State::Open
    }

    fn mark_broken(&self, reason: &str) {
        let mut state = self.state.lock();
        if *state == State::Open {
            warn!(gateway = %self.target, reason, "connection marked broken");
            *state = State::Broken(reason.to_string());
        }
    }

    /// Queue a request to be sent ahead of the next exchange. Used from `Drop`
    /// where no round trip can be awaited.
    pub(crate) fn defer(&self, request: Request) {
        if self.is_open() {
            self.deferred.lock().push(request);
        }
    }

    async fn timed<F>(&self, fut: F) -> Result<Response>
    where
        F: Future<Output = Result<Response>>,
    {
        match self.request_timeout {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| Error::Timeout)?,
            None => fut.await,
        }
    }

    async fn drive(&self, exchange: &mut Exchange, request: Request) -> Result<Response> {
        let deferred = std::mem::take(&mut *self.deferred.lock());
        for pending in deferred {
            let code = pending.code;
            let response = self.timed(exchange.call(pending)).await?;
            if !response.ok {
                if response.fatal {
                    return Err(Error::Protocol(response.error));
                }
                debug!(code, error = %response.error, "deferred request failed");
            }
        }
        self.timed(exchange.call(request)).await
    }

    /// Send `request` and wait for its response. Error responses become
    /// `Error::Driver`, or `Error::Protocol` when they poisoned the session.
    pub(crate) async fn round_trip(&self, request: Request) -> Result<Response> {
        self.exchange_with(request, false).await
    }

    async fn exchange_with(&self, request: Request, closing: bool) -> Result<Response> {
        self.check()?;
        let guard = self.exchange.lock().await;
        let mut flight = InFlight {
            inner: self,
            guard,
            done: false,
        };
        if let Err(e) = self.check() {
            flight.done = true;
            return Err(e);
        }

        let result = match flight.guard.as_mut() {
            Some(exchange) => self.drive(exchange, request).await,
            None => Err(Error::ConnectionClosed),
        };
        flight.done = true;

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                flight.tear_down(&e.to_string());
                return Err(e);
            }
        };

        if !response.ok {
            if response.fatal {
                flight.tear_down(&response.error);
                return Err(Error::Protocol(response.error));
            }
            return Err(Error::Driver(response.error));
        }

        if closing {
            *self.state.lock() = State::Closed;
            // Dropping the sender ends the stream on the gateway side.
            flight.guard.take();
        }
        Ok(response)
    }

    pub(crate) async fn prepare(self: &Arc<Self>, query: &str) -> Result<Stmt> {
        let response = self.round_trip(Request::prepare(query)).await?;
        let prepared: PrepareResponse = response.payload()?;
        let num_input = usize::try_from(prepared.num_input).ok();
        Ok(Stmt::new(self.clone(), prepared.stmt_id, num_input))
    }

    pub(crate) async fn exec(
        &self,
        stmt_id: Option<u64>,
        query: &str,
        args: &[Value],
    ) -> Result<ExecResult> {
        let response = self
            .round_trip(Request::exec(stmt_id, query, to_wire_all(args)))
            .await?;
        let result: ExecResponse = response.payload()?;
        Ok(ExecResult {
            last_insert_id: result.last_insert_id,
            rows_affected: result.rows_affected,
        })
    }

    pub(crate) async fn query(
        self: &Arc<Self>,
        stmt_id: Option<u64>,
        query: &str,
        args: &[Value],
    ) -> Result<Rows> {
        let response = self
            .round_trip(Request::query(stmt_id, query, to_wire_all(args)))
            .await?;
        let opened: QueryResponse = response.payload()?;
        let columns = opened
            .columns
            .into_iter()
            .map(|c| Column {
                name: c.name,
                database_type: c.database_type,
            })
            .collect();
        Ok(Rows::new(self.clone(), opened.cursor_id, columns))
    }

    pub(crate) async fn begin(self: &Arc<Self>) -> Result<Tx> {
        self.round_trip(Request::begin()).await?;
        Ok(Tx::new(self.clone()))
    }
}

/// A logical SQL connection served by one gateway session.
pub struct Conn {
    inner: Arc<Inner>,
}

impl Conn {
    /// Start a `Conn` stream on `channel` and send OPEN for `dsn`.
    pub(crate) async fn open(
        channel: Channel,
        target: &str,
        dsn: &str,
        request_timeout: Option<Duration>,
    ) -> Result<Self> {
        let mut client = SqlClient::new(channel);
        let (requests, outbound) = mpsc::channel(1);
        let responses = client
            .conn(ReceiverStream::new(outbound))
            .await?
            .into_inner();

        let inner = Arc::new(Inner {
            target: target.to_string(),
            exchange: AsyncMutex::new(Some(Exchange {
                requests,
                responses,
            })),
            state: Mutex::new(State::Open),
            deferred: Mutex::new(Vec::new()),
            request_timeout,
        });

        match inner.round_trip(Request::open(dsn)).await {
            Ok(_) => {}
            // The gateway poisons a session whose OPEN was refused; to the
            // caller that is a rejection by the driver.
            Err(Error::Protocol(message)) => return Err(Error::Driver(message)),
            Err(e) => return Err(e),
        }
        debug!(gateway = target, "connection open");
        Ok(Self { inner })
    }

    /// Address of the gateway serving this connection.
    pub fn target(&self) -> &str {
        &self.inner.target
    }

    pub fn is_closed(&self) -> bool {
        *self.inner.state.lock() == State::Closed
    }

    /// Whether an earlier failure left the stream unusable.
    pub fn is_broken(&self) -> bool {
        matches!(*self.inner.state.lock(), State::Broken(_))
    }

    /// Prepare `query` on the gateway.
    pub async fn prepare(&self, query: &str) -> Result<Stmt> {
        self.inner.prepare(query).await
    }

    /// Execute `query` without preparing it first.
    pub async fn exec(&self, query: &str, args: &[Value]) -> Result<ExecResult> {
        self.inner.exec(None, query, args).await
    }

    /// Run `query` and open a cursor over its rows.
    pub async fn query(&self, query: &str, args: &[Value]) -> Result<Rows> {
        self.inner.query(None, query, args).await
    }

    /// Start a transaction.
    pub async fn begin(&self) -> Result<Tx> {
        self.inner.begin().await
    }

    /// Close the connection. Closing again, or closing a broken connection,
    /// is a no-op.
    pub async fn close(&self) -> Result<()> {
        if !self.inner.is_open() {
            // Drop the stream of a broken connection so the session ends.
            self.inner.exchange.lock().await.take();
            return Ok(());
        }
        match self.inner.exchange_with(Request::conn_close(), true).await {
            Ok(_) | Err(Error::ConnectionClosed) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl std::fmt::Debug for Conn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conn")
            .field("target", &self.inner.target)
            .field("state", &*self.inner.state.lock())
            .finish()
    }
}
