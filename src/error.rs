//! Error types for the gateway and the remote driver.

use std::fmt;
use thiserror::Error;

/// Result type for driver and gateway operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for driver and gateway operations.
#[derive(Error, Debug)]
pub enum Error {
    /// gRPC transport error
    #[error("gRPC transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// gRPC status error
    #[error("gRPC error: {0}")]
    Status(#[from] tonic::Status),

    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// URL parse error
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// Payload could not be decoded
    #[error("decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    /// Protocol violation reported by the gateway or detected locally
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Error reported by the native driver behind the gateway
    #[error("driver error: {0}")]
    Driver(String),

    /// Connection closed
    #[error("Connection is closed")]
    ConnectionClosed,

    /// Connection can no longer be used safely
    #[error("Connection is broken: {0}")]
    ConnectionBroken(String),

    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Timeout
    #[error("Operation timed out")]
    Timeout,

    /// Type conversion error
    #[error("Type conversion error: {0}")]
    TypeConversion(String),

    /// No native driver registered under the name
    #[error("unknown driver {0:?}")]
    UnknownDriver(String),

    /// The candidate list was empty
    #[error("no targets available")]
    NoTargets,

    /// Every candidate target failed
    #[error("all targets failed: {}", TargetFailures(.0))]
    AllTargetsFailed(Vec<TargetFailure>),
}

/// Why a single target could not be used.
#[derive(Debug)]
pub struct TargetFailure {
    pub address: String,
    pub error: Error,
}

impl fmt::Display for TargetFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.address, self.error)
    }
}

struct TargetFailures<'a>(&'a [TargetFailure]);

impl fmt::Display for TargetFailures<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}", failure)?;
        }
        Ok(())
    }
}

impl Error {
    /// The operation exceeded its deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout)
    }

    /// The native driver rejected the operation.
    pub fn is_driver(&self) -> bool {
        matches!(self, Error::Driver(_))
    }

    /// The stream's request/response sequencing was violated.
    pub fn is_protocol(&self) -> bool {
        matches!(self, Error::Protocol(_))
    }
}
