#![allow(dead_code)]

use litesql_grpc::proto::sql_client::SqlClient;
use litesql_grpc::protocol::{Request, Response};
use litesql_grpc::{
    Column, Driver, DriverConn, DriverRows, DriverStmt, Error, ExecResult, Gateway, Result,
    SqliteDriver, Value,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::{Certificate, ClientTlsConfig, Identity, ServerTlsConfig};
use tonic::Streaming;

/// A gateway served on a random local port until dropped.
pub struct TestGateway {
    pub gateway: Gateway,
    pub address: String,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<Result<()>>>,
}

impl TestGateway {
    /// Wait until the gateway runs exactly `n` sessions.
    pub async fn wait_for_sessions(&self, n: usize) {
        for _ in 0..200 {
            if self.gateway.active_sessions() == n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!(
            "expected {} sessions, gateway still has {}",
            n,
            self.gateway.active_sessions()
        );
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

pub async fn start_gateway(driver: Arc<dyn Driver>, tls: Option<ServerTlsConfig>) -> TestGateway {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let gateway = Gateway::new(driver);
    let (tx, rx) = oneshot::channel::<()>();

    let server = gateway.clone();
    let handle = tokio::spawn(async move {
        server
            .serve_with_shutdown(listener, tls, async {
                let _ = rx.await;
            })
            .await
    });

    TestGateway {
        gateway,
        address,
        shutdown: Some(tx),
        handle: Some(handle),
    }
}

pub async fn start_sqlite_gateway() -> TestGateway {
    start_gateway(Arc::new(SqliteDriver::new()), None).await
}

/// An address nothing listens on.
pub fn unreachable_address() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let address = listener.local_addr().unwrap().to_string();
    drop(listener);
    address
}

/// A listener that completes TCP handshakes but never answers.
pub async fn silent_listener() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    (listener, address)
}

/// Raw protocol stream to a gateway, bypassing the remote driver.
pub async fn raw_stream(address: &str) -> (mpsc::Sender<Request>, Streaming<Response>) {
    let mut client = SqlClient::connect(format!("http://{}", address))
        .await
        .unwrap();
    let (tx, rx) = mpsc::channel(4);
    let responses = client
        .conn(ReceiverStream::new(rx))
        .await
        .unwrap()
        .into_inner();
    (tx, responses)
}

pub async fn send(
    requests: &mpsc::Sender<Request>,
    responses: &mut Streaming<Response>,
    request: Request,
) -> Response {
    requests.send(request).await.unwrap();
    responses.message().await.unwrap().expect("stream ended")
}

/// Self-signed certificate for `localhost`: server identity and client TLS
/// settings trusting it.
pub fn tls_pair() -> (ServerTlsConfig, ClientTlsConfig) {
    let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let cert_pem = certified.cert.pem();
    let key_pem = certified.key_pair.serialize_pem();

    let server = ServerTlsConfig::new().identity(Identity::from_pem(&cert_pem, &key_pem));
    let client = ClientTlsConfig::new()
        .ca_certificate(Certificate::from_pem(&cert_pem))
        .domain_name("localhost");
    (server, client)
}

/// Driver whose connections sleep before answering EXEC.
pub struct SlowDriver {
    pub delay: Duration,
}

impl Driver for SlowDriver {
    fn open(&self, _dsn: &str) -> Result<Box<dyn DriverConn>> {
        Ok(Box::new(SlowConn { delay: self.delay }))
    }
}

struct SlowConn {
    delay: Duration,
}

impl DriverConn for SlowConn {
    fn prepare(&mut self, _query: &str) -> Result<Box<dyn DriverStmt>> {
        Err(Error::InvalidParameter("not supported".into()))
    }

    fn exec(&mut self, _query: &str, _args: &[Value]) -> Result<ExecResult> {
        std::thread::sleep(self.delay);
        Ok(ExecResult::default())
    }

    fn query(&mut self, _query: &str, _args: &[Value]) -> Result<Box<dyn DriverRows>> {
        Err(Error::InvalidParameter("not supported".into()))
    }

    fn begin(&mut self) -> Result<()> {
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

/// Driver refusing every dsn.
pub struct RefusingDriver;

impl Driver for RefusingDriver {
    fn open(&self, dsn: &str) -> Result<Box<dyn DriverConn>> {
        Err(Error::InvalidParameter(format!("refusing {}", dsn)))
    }
}

pub fn column_names(columns: &[Column]) -> Vec<&str> {
    columns.iter().map(|c| c.name.as_str()).collect()
}
