//! Native driver capability the gateway dispatches to.
//!
//! A native driver is any local SQL engine that can open a connection from a
//! data-source name. The gateway only depends on these traits, so any backend
//! can be exposed over the network by implementing them.

use crate::error::Result;
use crate::value::Value;

/// Column metadata of a result set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// Column name
    pub name: String,
    /// Declared database type, when the engine knows it
    pub database_type: Option<String>,
}

/// Outcome of a statement that does not return rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecResult {
    /// Row id of the last inserted row
    pub last_insert_id: i64,
    /// Number of rows changed by the statement
    pub rows_affected: i64,
}

/// Factory for native connections. Shared by every session of a gateway.
pub trait Driver: Send + Sync + 'static {
    /// Open a new connection for `dsn`.
    fn open(&self, dsn: &str) -> Result<Box<dyn DriverConn>>;
}

/// A native connection, owned by exactly one session.
pub trait DriverConn: Send {
    fn prepare(&mut self, query: &str) -> Result<Box<dyn DriverStmt>>;

    fn exec(&mut self, query: &str, args: &[Value]) -> Result<ExecResult>;

    fn query(&mut self, query: &str, args: &[Value]) -> Result<Box<dyn DriverRows>>;

    fn begin(&mut self) -> Result<()>;

    fn commit(&mut self) -> Result<()>;

    fn rollback(&mut self) -> Result<()>;

    /// Whether the connection became unusable after an error.
    fn is_broken(&self) -> bool {
        false
    }

    fn close(self: Box<Self>) -> Result<()>;
}

/// A prepared statement. Execution goes through the connection that prepared
/// it, which the gateway passes back in.
pub trait DriverStmt: Send {
    /// Number of placeholders, if known.
    fn num_input(&self) -> Option<usize>;

    fn exec(&mut self, conn: &mut dyn DriverConn, args: &[Value]) -> Result<ExecResult>;

    fn query(&mut self, conn: &mut dyn DriverConn, args: &[Value]) -> Result<Box<dyn DriverRows>>;

    fn close(self: Box<Self>) -> Result<()>;
}

/// An open result set.
pub trait DriverRows: Send {
    fn columns(&self) -> &[Column];

    /// Next row, or `None` once the result set is exhausted.
    fn next(&mut self) -> Result<Option<Vec<Value>>>;

    fn close(self: Box<Self>) -> Result<()>;
}
