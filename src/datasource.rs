//! DataSource bundling a fixed gateway list with connection settings.

use crate::client::{ClientOptions, RemoteDriver};
use crate::connection::Conn;
use crate::error::Result;
use std::time::Duration;
use tonic::transport::ClientTlsConfig;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

fn or_default(secs: u64) -> u64 {
    if secs > 0 {
        secs
    } else {
        DEFAULT_TIMEOUT_SECS
    }
}

/// Options for DataSource configuration.
#[derive(Debug, Clone, Default)]
pub struct DataSourceOptions {
    /// Gateway addresses (`host:port`), in failover order
    pub targets: Vec<String>,
    /// Data source name handed to the native driver
    pub dsn: String,
    /// TLS settings; plaintext when unset
    pub tls: Option<ClientTlsConfig>,
    /// Request timeout in seconds
    pub timeout: u64,
    /// Login timeout in seconds, applied to each gateway attempt
    pub login_timeout: u64,
}

/// Data source for opening remote connections.
pub struct DataSource {
    targets: Vec<String>,
    dsn: String,
    tls: Option<ClientTlsConfig>,
    timeout: u64,
    login_timeout: u64,
}

impl DataSource {
    /// Create a new data source with options.
    pub fn new(options: DataSourceOptions) -> Self {
        Self {
            targets: options.targets,
            dsn: options.dsn,
            tls: options.tls,
            timeout: or_default(options.timeout),
            login_timeout: or_default(options.login_timeout),
        }
    }

    /// Driver configured from this data source.
    pub fn driver(&self) -> RemoteDriver {
        let targets = self.targets.clone();
        RemoteDriver::with_options(
            move || Ok(targets.clone()),
            self.tls.clone(),
            ClientOptions {
                timeout: Duration::from_secs(self.login_timeout),
                request_timeout: Some(Duration::from_secs(self.timeout)),
                ..Default::default()
            },
        )
    }

    /// Get a connection from the data source.
    pub async fn get_connection(&self) -> Result<Conn> {
        self.driver().open(&self.dsn).await
    }

    // Getters and setters

    /// Get the gateway addresses.
    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    /// Replace the gateway addresses.
    pub fn set_targets(&mut self, targets: Vec<String>) -> &mut Self {
        self.targets = targets;
        self
    }

    /// Append a gateway address to the failover list.
    pub fn add_target(&mut self, target: impl Into<String>) -> &mut Self {
        self.targets.push(target.into());
        self
    }

    /// Get the data source name.
    pub fn dsn(&self) -> &str {
        &self.dsn
    }

    /// Set the data source name.
    pub fn set_dsn(&mut self, dsn: impl Into<String>) -> &mut Self {
        self.dsn = dsn.into();
        self
    }

    /// Get SSL enabled status.
    pub fn enable_ssl(&self) -> bool {
        self.tls.is_some()
    }

    /// Set the TLS settings.
    pub fn set_tls(&mut self, tls: ClientTlsConfig) -> &mut Self {
        self.tls = Some(tls);
        self
    }

    /// Get the request timeout.
    pub fn timeout(&self) -> u64 {
        self.timeout
    }

    /// Set the request timeout. Zero restores the default.
    pub fn set_timeout(&mut self, timeout: u64) -> &mut Self {
        self.timeout = or_default(timeout);
        self
    }

    /// Get the login timeout.
    pub fn login_timeout(&self) -> u64 {
        self.login_timeout
    }

    /// Set the login timeout. Zero restores the default.
    pub fn set_login_timeout(&mut self, timeout: u64) -> &mut Self {
        self.login_timeout = or_default(timeout);
        self
    }
}

impl Default for DataSource {
    fn default() -> Self {
        Self::new(DataSourceOptions::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_timeouts_fall_back_to_defaults() {
        let ds = DataSource::default();
        assert_eq!(ds.timeout(), 30);
        assert_eq!(ds.login_timeout(), 30);
        assert!(!ds.enable_ssl());

        let driver = ds.driver();
        assert_eq!(driver.options().timeout, Duration::from_secs(30));
        assert_eq!(
            driver.options().request_timeout,
            Some(Duration::from_secs(30))
        );
    }

    #[test]
    fn test_setters_feed_the_driver() {
        let mut ds = DataSource::default();
        ds.add_target("10.0.0.1:7000")
            .add_target("10.0.0.2:7000")
            .set_dsn("app.db")
            .set_login_timeout(2);

        assert_eq!(ds.dsn(), "app.db");
        let driver = ds.driver();
        assert_eq!(driver.options().timeout, Duration::from_secs(2));

        let targets = driver.targets().unwrap();
        let addresses: Vec<&str> = targets.iter().map(|t| t.address()).collect();
        assert_eq!(addresses, vec!["10.0.0.1:7000", "10.0.0.2:7000"]);
    }

    #[test]
    fn test_zero_timeout_setters_restore_defaults() {
        let mut ds = DataSource::default();
        ds.set_timeout(5).set_login_timeout(2);
        assert_eq!(ds.timeout(), 5);
        assert_eq!(ds.login_timeout(), 2);

        ds.set_timeout(0).set_login_timeout(0);
        assert_eq!(ds.timeout(), 30);
        assert_eq!(ds.login_timeout(), 30);

        let driver = ds.driver();
        assert_eq!(driver.options().timeout, Duration::from_secs(30));
        assert_eq!(
            driver.options().request_timeout,
            Some(Duration::from_secs(30))
        );
    }
}
