//! Remote driver: opens connections to gateways with failover.

use crate::connection::Conn;
use crate::error::Result;
use crate::target::{self, Target};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tonic::transport::ClientTlsConfig;
use tracing::debug;

/// Source of the current, ordered candidate list. Evaluated on every open.
pub type TargetsFn = Arc<dyn Fn() -> Result<Vec<String>> + Send + Sync>;

/// Options for RemoteDriver configuration.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Budget for one target attempt: dial, TLS handshake and OPEN
    pub timeout: Duration,
    /// Deadline for each request on an established connection
    pub request_timeout: Option<Duration>,
    /// TCP keepalive interval
    pub tcp_keepalive: Option<Duration>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            request_timeout: None,
            tcp_keepalive: Some(Duration::from_secs(60)),
        }
    }
}

/// Driver whose connections are served by remote gateways.
#[derive(Clone)]
pub struct RemoteDriver {
    targets: TargetsFn,
    tls: Option<ClientTlsConfig>,
    options: ClientOptions,
}

impl RemoteDriver {
    /// Create a driver dialing the addresses returned by `targets`, each
    /// attempt bounded by `timeout`.
    pub fn new<F>(targets: F, tls: Option<ClientTlsConfig>, timeout: Duration) -> Self
    where
        F: Fn() -> Result<Vec<String>> + Send + Sync + 'static,
    {
        Self::with_options(
            targets,
            tls,
            ClientOptions {
                timeout,
                ..Default::default()
            },
        )
    }

    pub fn with_options<F>(targets: F, tls: Option<ClientTlsConfig>, options: ClientOptions) -> Self
    where
        F: Fn() -> Result<Vec<String>> + Send + Sync + 'static,
    {
        Self {
            targets: Arc::new(targets),
            tls,
            options,
        }
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Current candidate targets, in dial order.
    pub fn targets(&self) -> Result<Vec<Target>> {
        let addresses = (self.targets)()?;
        Ok(addresses
            .into_iter()
            .map(|address| Target::new(address, self.tls.clone()))
            .collect())
    }

    /// Open a connection for `dsn` on the first gateway that accepts it.
    pub async fn open(&self, dsn: &str) -> Result<Conn> {
        let targets = self.targets()?;
        debug!(candidates = targets.len(), dsn, "opening remote connection");
        target::connect(&targets, dsn, &self.options).await
    }
}

impl fmt::Debug for RemoteDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteDriver")
            .field("tls", &self.tls.is_some())
            .field("options", &self.options)
            .finish()
    }
}
