//! Candidate gateways and ordered failover between them.

use crate::client::ClientOptions;
use crate::connection::Conn;
use crate::error::{Error, Result, TargetFailure};
use std::time::Instant;
use tonic::transport::{ClientTlsConfig, Endpoint};
use tracing::{debug, info, warn};
use url::Url;

/// One candidate gateway: a `host:port` address and its TLS settings.
#[derive(Debug, Clone)]
pub struct Target {
    address: String,
    tls: Option<ClientTlsConfig>,
}

impl Target {
    pub fn new(address: impl Into<String>, tls: Option<ClientTlsConfig>) -> Self {
        Self {
            address: address.into(),
            tls,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn is_secure(&self) -> bool {
        self.tls.is_some()
    }

    /// Build the tonic endpoint for this target.
    pub fn endpoint(&self, options: &ClientOptions) -> Result<Endpoint> {
        let scheme = if self.tls.is_some() { "https" } else { "http" };
        let url = Url::parse(&format!("{}://{}", scheme, self.address))?;
        if url.host_str().is_none() || url.path() != "/" {
            return Err(Error::InvalidParameter(format!(
                "target {:?} is not a host:port address",
                self.address
            )));
        }

        let mut endpoint = Endpoint::from_shared(url.to_string())?
            .tcp_nodelay(true)
            .tcp_keepalive(options.tcp_keepalive);
        if let Some(ref tls) = self.tls {
            endpoint = endpoint.tls_config(tls.clone())?;
        }
        Ok(endpoint)
    }

    async fn attempt(&self, dsn: &str, options: &ClientOptions) -> Result<Conn> {
        let channel = self.endpoint(options)?.connect().await?;
        Conn::open(channel, &self.address, dsn, options.request_timeout).await
    }
}

/// Try `targets` in order and return a connection to the first one that
/// accepts both the dial and OPEN. Every attempt gets the full
/// `options.timeout`; a slow target only costs its own budget.
pub async fn connect(targets: &[Target], dsn: &str, options: &ClientOptions) -> Result<Conn> {
    if targets.is_empty() {
        return Err(Error::NoTargets);
    }

    let mut failures = Vec::new();
    for target in targets {
        let started = Instant::now();
        let outcome = tokio::time::timeout(options.timeout, target.attempt(dsn, options)).await;
        let error = match outcome {
            Ok(Ok(conn)) => {
                info!(
                    gateway = %target.address,
                    failed_attempts = failures.len(),
                    "connected to gateway"
                );
                return Ok(conn);
            }
            Ok(Err(e)) => e,
            Err(_) => Error::Timeout,
        };

        warn!(
            gateway = %target.address,
            elapsed_ms = started.elapsed().as_millis() as u64,
            error = %error,
            "gateway attempt failed"
        );
        failures.push(TargetFailure {
            address: target.address.clone(),
            error,
        });
    }

    debug!(attempts = failures.len(), "every gateway failed");
    Err(Error::AllTargetsFailed(failures))
}
