//! LiteSQL gRPC - use a local SQL driver from anywhere
//!
//! A [`Gateway`] exposes a native driver (such as [`SqliteDriver`]) as a gRPC
//! service. A [`RemoteDriver`] opens connections to one of several gateways,
//! failing over in order, and hands back a [`Conn`] that behaves like a local
//! connection: prepare, exec, query, iterate rows, transactions.
//!
//! # Example
//!
//! ```no_run
//! use litesql_grpc::{RemoteDriver, Value};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let driver = RemoteDriver::new(
//!         || Ok(vec!["10.0.0.1:7000".to_string(), "10.0.0.2:7000".to_string()]),
//!         None,
//!         Duration::from_secs(2),
//!     );
//!
//!     let conn = driver.open("app.db").await?;
//!     let mut rows = conn.query("SELECT id, name FROM users WHERE id > ?", &[Value::Int64(0)]).await?;
//!
//!     while let Some(row) = rows.next().await? {
//!         let id: i64 = row.get(0)?;
//!         let name: String = row.get(1)?;
//!         println!("{} {}", id, name);
//!     }
//!
//!     conn.close().await?;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod connection;
pub mod datasource;
pub mod driver;
pub mod error;
pub mod gateway;
pub mod protocol;
pub mod registry;
pub mod rows;
pub mod sqlite;
pub mod statement;
pub mod target;
pub mod transaction;
pub mod value;

pub use client::{ClientOptions, RemoteDriver, TargetsFn};
pub use connection::Conn;
pub use datasource::{DataSource, DataSourceOptions};
pub use driver::{Column, Driver, DriverConn, DriverRows, DriverStmt, ExecResult};
pub use error::{Error, Result, TargetFailure};
pub use gateway::{Gateway, Session, SessionState};
pub use registry::DriverRegistry;
pub use rows::{Row, Rows};
pub use sqlite::SqliteDriver;
pub use statement::Stmt;
pub use target::Target;
pub use transaction::Tx;
pub use value::{FromValue, Value};

/// Generated gRPC client and server for the `Conn` stream.
pub mod proto {
    include!(concat!(env!("OUT_DIR"), "/litesql.grpc.v1.Sql.rs"));
}
