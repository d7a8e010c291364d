//! Server side of the protocol.
//!
//! Every `Conn` stream gets its own [`Session`], driven by one task that
//! processes requests strictly in arrival order and runs each driver call on
//! the blocking pool. The session owns the native connection together with
//! every statement and cursor it handed out, and releases all of them when it
//! ends. A fatal response ends the stream.

use crate::driver::{Driver, DriverConn, DriverRows, DriverStmt};
use crate::error::{Error, Result};
use crate::proto::sql_server::{Sql, SqlServer};
use crate::protocol::{
    self, Empty, ExecRequest, ExecResponse, OpenRequest, PrepareRequest, PrepareResponse,
    QueryResponse, Request, RequestCode, Response, RowsCloseRequest, RowsNextRequest,
    RowsNextResponse, StmtCloseRequest,
};
use crate::registry::DriverRegistry;
use crate::value::{from_wire_all, to_wire_all};
use dashmap::DashMap;
use prost::Message;
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::wrappers::{ReceiverStream, TcpListenerStream};
use tonic::transport::{Server, ServerTlsConfig};
use tonic::{Status, Streaming};
use tracing::{debug, error, info, warn};

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for OPEN.
    Pending,
    /// Native connection established.
    Open,
    /// Closed by CONN_CLOSE.
    Closed,
    /// A protocol violation happened; every further request fails.
    Poisoned,
}

enum Failure {
    /// Poisons the session.
    Protocol(String),
    /// Reported back, session stays usable unless the connection broke.
    Driver(Error),
}

type Dispatch = std::result::Result<Vec<u8>, Failure>;

fn parse<M: Message + Default>(request: &Request) -> std::result::Result<M, Failure> {
    request
        .payload()
        .map_err(|e| Failure::Protocol(format!("request parse error: {}", e)))
}

fn encode(payload: impl Message) -> Dispatch {
    Ok(payload.encode_to_vec())
}

fn driver_err(e: Error) -> Failure {
    Failure::Driver(e)
}

/// Server-side state of one logical connection.
pub struct Session {
    id: u64,
    driver: Arc<dyn Driver>,
    conn: Option<Box<dyn DriverConn>>,
    stmts: HashMap<u64, Box<dyn DriverStmt>>,
    cursors: HashMap<u64, Box<dyn DriverRows>>,
    next_handle: u64,
    state: SessionState,
    poison: Option<String>,
}

impl Session {
    pub fn new(id: u64, driver: Arc<dyn Driver>) -> Self {
        Self {
            id,
            driver,
            conn: None,
            stmts: HashMap::new(),
            cursors: HashMap::new(),
            next_handle: 0,
            state: SessionState::Pending,
            poison: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Number of statements and cursors currently held.
    pub fn open_handles(&self) -> usize {
        self.stmts.len() + self.cursors.len()
    }

    /// Process one request. Always produces exactly one response.
    pub fn handle(&mut self, request: &Request) -> Response {
        let code = request.code;
        match self.dispatch(request) {
            Ok(data) => Response {
                code,
                ok: true,
                error: String::new(),
                data,
                fatal: false,
            },
            Err(Failure::Protocol(message)) => {
                self.poison(&message);
                Response::failure(code, message, true)
            }
            Err(Failure::Driver(e)) => {
                let message = e.to_string();
                let broken = self.conn.as_ref().is_some_and(|c| c.is_broken());
                if broken {
                    self.poison(&format!("native connection broken: {}", message));
                }
                Response::failure(code, message, broken)
            }
        }
    }

    fn dispatch(&mut self, request: &Request) -> Dispatch {
        match self.state {
            SessionState::Poisoned => {
                return Err(Failure::Protocol(format!(
                    "session is poisoned: {}",
                    self.poison.as_deref().unwrap_or("unknown reason")
                )))
            }
            SessionState::Closed => {
                return Err(Failure::Protocol("connection is closed".to_string()))
            }
            SessionState::Pending | SessionState::Open => {}
        }

        let code = request
            .request_code()
            .map_err(|raw| Failure::Protocol(format!("invalid request code {}", raw)))?;

        if self.state == SessionState::Pending && code != RequestCode::Open {
            return Err(Failure::Protocol(format!(
                "expected OPEN request, got {}",
                code
            )));
        }

        match code {
            RequestCode::Open => self.open(parse(request)?),
            RequestCode::Prepare => self.prepare(parse(request)?),
            RequestCode::Exec => self.exec(parse(request)?),
            RequestCode::Query => self.query(parse(request)?),
            RequestCode::RowsNext => self.rows_next(parse(request)?),
            RequestCode::StmtClose => self.stmt_close(parse(request)?),
            RequestCode::RowsClose => self.rows_close(parse(request)?),
            RequestCode::Begin => {
                parse::<Empty>(request)?;
                self.conn()?.begin().map_err(driver_err)?;
                encode(Empty {})
            }
            RequestCode::Commit => {
                parse::<Empty>(request)?;
                self.conn()?.commit().map_err(driver_err)?;
                encode(Empty {})
            }
            RequestCode::Rollback => {
                parse::<Empty>(request)?;
                self.conn()?.rollback().map_err(driver_err)?;
                encode(Empty {})
            }
            RequestCode::ConnClose => {
                parse::<Empty>(request)?;
                self.state = SessionState::Closed;
                debug!(session = self.id, "connection closed by client");
                self.release().map_err(driver_err)?;
                encode(Empty {})
            }
        }
    }

    fn open(&mut self, request: OpenRequest) -> Dispatch {
        if self.state != SessionState::Pending {
            return Err(Failure::Protocol("connection is already open".to_string()));
        }
        let conn = self.driver.open(&request.dsn).map_err(|e| {
            Failure::Protocol(format!("could not open driver connection: {}", e))
        })?;
        self.conn = Some(conn);
        self.state = SessionState::Open;
        debug!(session = self.id, dsn = %request.dsn, "session open");
        encode(Empty {})
    }

    fn conn(&mut self) -> std::result::Result<&mut Box<dyn DriverConn>, Failure> {
        self.conn
            .as_mut()
            .ok_or_else(|| Failure::Protocol("no open connection".to_string()))
    }

    fn handle_id(&mut self) -> u64 {
        let id = self.next_handle;
        self.next_handle += 1;
        id
    }

    fn prepare(&mut self, request: PrepareRequest) -> Dispatch {
        let stmt = self.conn()?.prepare(&request.query).map_err(driver_err)?;
        let num_input = stmt.num_input().map(|n| n as i64).unwrap_or(-1);
        let stmt_id = self.handle_id();
        self.stmts.insert(stmt_id, stmt);
        encode(PrepareResponse { stmt_id, num_input })
    }

    fn exec(&mut self, request: ExecRequest) -> Dispatch {
        let args = from_wire_all(request.args)
            .map_err(|e| Failure::Protocol(format!("request parse error: {}", e)))?;
        let conn = match self.conn.as_deref_mut() {
            Some(conn) => conn,
            None => return Err(Failure::Protocol("no open connection".to_string())),
        };
        let result = match request.stmt_id {
            Some(id) => {
                let stmt = self.stmts.get_mut(&id).ok_or_else(|| {
                    Failure::Protocol(format!("unknown statement handle {}", id))
                })?;
                stmt.exec(conn, &args)
            }
            None => conn.exec(&request.query, &args),
        }
        .map_err(driver_err)?;

        encode(ExecResponse {
            last_insert_id: result.last_insert_id,
            rows_affected: result.rows_affected,
        })
    }

    fn query(&mut self, request: ExecRequest) -> Dispatch {
        let args = from_wire_all(request.args)
            .map_err(|e| Failure::Protocol(format!("request parse error: {}", e)))?;
        let conn = match self.conn.as_deref_mut() {
            Some(conn) => conn,
            None => return Err(Failure::Protocol("no open connection".to_string())),
        };
        let rows = match request.stmt_id {
            Some(id) => {
                let stmt = self.stmts.get_mut(&id).ok_or_else(|| {
                    Failure::Protocol(format!("unknown statement handle {}", id))
                })?;
                stmt.query(conn, &args)
            }
            None => conn.query(&request.query, &args),
        }
        .map_err(driver_err)?;

        let columns = rows
            .columns()
            .iter()
            .map(|c| protocol::Column {
                name: c.name.clone(),
                database_type: c.database_type.clone(),
            })
            .collect();
        let cursor_id = self.handle_id();
        self.cursors.insert(cursor_id, rows);
        encode(QueryResponse { cursor_id, columns })
    }

    fn rows_next(&mut self, request: RowsNextRequest) -> Dispatch {
        let rows = self.cursors.get_mut(&request.cursor_id).ok_or_else(|| {
            Failure::Protocol(format!("unknown cursor handle {}", request.cursor_id))
        })?;
        match rows.next().map_err(driver_err)? {
            Some(values) => encode(RowsNextResponse {
                eof: false,
                values: to_wire_all(&values),
            }),
            None => encode(RowsNextResponse {
                eof: true,
                values: Vec::new(),
            }),
        }
    }

    fn stmt_close(&mut self, request: StmtCloseRequest) -> Dispatch {
        let stmt = self.stmts.remove(&request.stmt_id).ok_or_else(|| {
            Failure::Protocol(format!("unknown statement handle {}", request.stmt_id))
        })?;
        stmt.close().map_err(driver_err)?;
        encode(Empty {})
    }

    fn rows_close(&mut self, request: RowsCloseRequest) -> Dispatch {
        let rows = self.cursors.remove(&request.cursor_id).ok_or_else(|| {
            Failure::Protocol(format!("unknown cursor handle {}", request.cursor_id))
        })?;
        rows.close().map_err(driver_err)?;
        encode(Empty {})
    }

    fn poison(&mut self, reason: &str) {
        if self.state == SessionState::Closed || self.state == SessionState::Poisoned {
            return;
        }
        warn!(session = self.id, reason, "session poisoned");
        self.state = SessionState::Poisoned;
        self.poison = Some(reason.to_string());
        if let Err(e) = self.release() {
            warn!(session = self.id, error = %e, "failed to release poisoned session");
        }
    }

    /// Close cursors, then statements, then the native connection. Every
    /// resource is released even if an earlier one fails.
    fn release(&mut self) -> Result<()> {
        let mut first = None;

        let mut cursors: Vec<_> = self.cursors.drain().collect();
        cursors.sort_by_key(|(id, _)| *id);
        for (id, rows) in cursors {
            if let Err(e) = rows.close() {
                warn!(session = self.id, cursor = id, error = %e, "failed to close cursor");
                first.get_or_insert(e);
            }
        }

        let mut stmts: Vec<_> = self.stmts.drain().collect();
        stmts.sort_by_key(|(id, _)| *id);
        for (id, stmt) in stmts {
            if let Err(e) = stmt.close() {
                warn!(session = self.id, stmt = id, error = %e, "failed to close statement");
                first.get_or_insert(e);
            }
        }

        if let Some(conn) = self.conn.take() {
            if let Err(e) = conn.close() {
                warn!(session = self.id, error = %e, "failed to close native connection");
                first.get_or_insert(e);
            }
        }

        first.map_or(Ok(()), Err)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!(session = self.id, error = %e, "failed to release session");
        }
    }
}

struct SessionInfo {
    started: Instant,
    remote: Option<SocketAddr>,
}

// Removes the session from the live set once its worker is done.
struct Registration {
    id: u64,
    sessions: Arc<DashMap<u64, SessionInfo>>,
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Some((_, info)) = self.sessions.remove(&self.id) {
            debug!(
                session = self.id,
                remote = ?info.remote,
                elapsed_ms = info.started.elapsed().as_millis() as u64,
                "session ended"
            );
        }
    }
}

/// gRPC service exposing a native driver.
#[derive(Clone)]
pub struct Gateway {
    driver: Arc<dyn Driver>,
    sessions: Arc<DashMap<u64, SessionInfo>>,
    next_session: Arc<AtomicU64>,
}

impl Gateway {
    /// Create a gateway dispatching to `driver`.
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        Self {
            driver,
            sessions: Arc::new(DashMap::new()),
            next_session: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Create a gateway for the driver registered as `name`.
    pub fn from_registry(registry: &DriverRegistry, name: &str) -> Result<Self> {
        Ok(Self::new(registry.get(name)?))
    }

    /// Number of sessions whose worker is still running.
    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Wrap the gateway into a tonic service.
    pub fn into_service(self) -> SqlServer<Gateway> {
        SqlServer::new(self)
    }

    /// Serve on `listener` until `signal` resolves.
    pub async fn serve_with_shutdown<F>(
        self,
        listener: TcpListener,
        tls: Option<ServerTlsConfig>,
        signal: F,
    ) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let addr = listener.local_addr()?;
        let mut builder = Server::builder();
        let secure = tls.is_some();
        if let Some(tls) = tls {
            builder = builder.tls_config(tls)?;
        }

        info!(%addr, tls = secure, "gateway listening");
        builder
            .add_service(self.into_service())
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), signal)
            .await?;
        info!(%addr, "gateway stopped");
        Ok(())
    }

    fn spawn_session(
        &self,
        mut inbound: Streaming<Request>,
        remote: Option<SocketAddr>,
    ) -> ReceiverStream<std::result::Result<Response, Status>> {
        let id = self.next_session.fetch_add(1, Ordering::Relaxed);
        self.sessions.insert(
            id,
            SessionInfo {
                started: Instant::now(),
                remote,
            },
        );
        debug!(session = id, remote = ?remote, "session started");

        let (response_tx, response_rx) = mpsc::channel(1);
        let registration = Registration {
            id,
            sessions: self.sessions.clone(),
        };
        let driver = self.driver.clone();

        // The loop itself is async; only driver calls occupy a blocking
        // thread, so idle sessions hold none.
        tokio::spawn(async move {
            let mut session = Session::new(id, driver);
            loop {
                let request = match inbound.message().await {
                    Ok(Some(request)) => request,
                    Ok(None) => break,
                    Err(status) => {
                        debug!(session = id, %status, "request stream failed");
                        break;
                    }
                };

                let handled = tokio::task::spawn_blocking(move || {
                    let response = session.handle(&request);
                    (session, response)
                })
                .await;
                let response = match handled {
                    Ok((returned, response)) => {
                        session = returned;
                        response
                    }
                    Err(e) => {
                        error!(session = id, error = %e, "session worker failed");
                        return;
                    }
                };

                let fatal = response.fatal;
                if response_tx.send(Ok(response)).await.is_err() {
                    debug!(session = id, "response stream dropped");
                    break;
                }
                if fatal {
                    debug!(session = id, "ending stream after fatal response");
                    break;
                }
            }

            // Native resources are released off the async workers, and the
            // session leaves the live set only once that is done.
            let released = tokio::task::spawn_blocking(move || {
                drop(session);
                drop(registration);
            })
            .await;
            if let Err(e) = released {
                warn!(session = id, error = %e, "failed to release session");
            }
        });

        ReceiverStream::new(response_rx)
    }
}

#[tonic::async_trait]
impl Sql for Gateway {
    type ConnStream = ReceiverStream<std::result::Result<Response, Status>>;

    async fn conn(
        &self,
        request: tonic::Request<Streaming<Request>>,
    ) -> std::result::Result<tonic::Response<Self::ConnStream>, Status> {
        let remote = request.remote_addr();
        let stream = self.spawn_session(request.into_inner(), remote);
        Ok(tonic::Response::new(stream))
    }
}
