//! SQLite native driver backed by rusqlite.

use crate::driver::{Column, Driver, DriverConn, DriverRows, DriverStmt, ExecResult};
use crate::error::{Error, Result};
use crate::value::Value;
use rusqlite::{params_from_iter, Connection, OpenFlags};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::debug;

/// Native driver opening SQLite databases.
///
/// The dsn is handed to SQLite as-is, so `:memory:`, plain paths and `file:`
/// URIs all work.
///
/// A query reads its whole result set into gateway memory before the cursor
/// handle is returned. Use [`SqliteDriver::with_max_buffered_rows`] to fail
/// queries whose result set would grow past a bound.
#[derive(Debug, Clone)]
pub struct SqliteDriver {
    busy_timeout: Duration,
    max_buffered_rows: Option<usize>,
}

impl SqliteDriver {
    pub fn new() -> Self {
        Self {
            busy_timeout: Duration::from_millis(5000),
            max_buffered_rows: None,
        }
    }

    /// Set how long a connection waits on a locked database.
    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Reject queries returning more than `limit` rows.
    pub fn with_max_buffered_rows(mut self, limit: usize) -> Self {
        self.max_buffered_rows = Some(limit);
        self
    }
}

impl Default for SqliteDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl Driver for SqliteDriver {
    fn open(&self, dsn: &str) -> Result<Box<dyn DriverConn>> {
        let conn = Connection::open_with_flags(
            dsn,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(self.busy_timeout)?;

        // SQLite opens files lazily; read the header now so bad paths fail here.
        conn.query_row("PRAGMA schema_version", [], |row| row.get::<_, i64>(0))?;

        debug!(dsn, "opened sqlite connection");
        Ok(Box::new(SqliteConn {
            conn,
            max_buffered_rows: self.max_buffered_rows,
        }))
    }
}

struct SqliteConn {
    conn: Connection,
    max_buffered_rows: Option<usize>,
}

impl DriverConn for SqliteConn {
    fn prepare(&mut self, query: &str) -> Result<Box<dyn DriverStmt>> {
        let stmt = self.conn.prepare_cached(query)?;
        let num_input = stmt.parameter_count();
        Ok(Box::new(SqliteStmt {
            query: query.to_string(),
            num_input,
        }))
    }

    fn exec(&mut self, query: &str, args: &[Value]) -> Result<ExecResult> {
        let mut stmt = self.conn.prepare_cached(query)?;

        let rows_affected = if stmt.column_count() > 0 {
            // Row-returning statement executed for its side effects.
            let readonly = stmt.readonly();
            let mut rows = stmt.query(params_from_iter(args.iter()))?;
            while rows.next()?.is_some() {}
            if readonly {
                0
            } else {
                self.conn.changes() as i64
            }
        } else {
            stmt.execute(params_from_iter(args.iter()))? as i64
        };

        Ok(ExecResult {
            last_insert_id: self.conn.last_insert_rowid(),
            rows_affected,
        })
    }

    fn query(&mut self, query: &str, args: &[Value]) -> Result<Box<dyn DriverRows>> {
        let mut stmt = self.conn.prepare_cached(query)?;
        let columns: Vec<Column> = stmt
            .columns()
            .iter()
            .map(|c| Column {
                name: c.name().to_string(),
                database_type: c.decl_type().map(str::to_string),
            })
            .collect();
        let count = columns.len();

        let mut buffered = VecDeque::new();
        let mut rows = stmt.query(params_from_iter(args.iter()))?;
        while let Some(row) = rows.next()? {
            if let Some(limit) = self.max_buffered_rows {
                if buffered.len() >= limit {
                    return Err(Error::InvalidParameter(format!(
                        "result set exceeds {} buffered rows",
                        limit
                    )));
                }
            }
            let mut values = Vec::with_capacity(count);
            for i in 0..count {
                let value: rusqlite::types::Value = row.get(i)?;
                values.push(Value::from(value));
            }
            buffered.push_back(values);
        }

        Ok(Box::new(SqliteRows {
            columns,
            rows: buffered,
        }))
    }

    fn begin(&mut self) -> Result<()> {
        self.conn.execute_batch("BEGIN")?;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<()> {
        self.conn.close().map_err(|(_, e)| e.into())
    }
}

struct SqliteStmt {
    query: String,
    num_input: usize,
}

impl DriverStmt for SqliteStmt {
    fn num_input(&self) -> Option<usize> {
        Some(self.num_input)
    }

    fn exec(&mut self, conn: &mut dyn DriverConn, args: &[Value]) -> Result<ExecResult> {
        conn.exec(&self.query, args)
    }

    fn query(&mut self, conn: &mut dyn DriverConn, args: &[Value]) -> Result<Box<dyn DriverRows>> {
        conn.query(&self.query, args)
    }

    fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

// rusqlite rows borrow their statement, so results are read out up front and
// the cursor walks the buffer.
struct SqliteRows {
    columns: Vec<Column>,
    rows: VecDeque<Vec<Value>>,
}

impl DriverRows for SqliteRows {
    fn columns(&self) -> &[Column] {
        &self.columns
    }

    fn next(&mut self) -> Result<Option<Vec<Value>>> {
        Ok(self.rows.pop_front())
    }

    fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::FromValue;
    use std::time::SystemTime;

    fn open_memory() -> Box<dyn DriverConn> {
        SqliteDriver::new().open(":memory:").unwrap()
    }

    #[test]
    fn test_exec_reports_insert_id_and_changes() {
        let mut conn = open_memory();
        let result = conn.exec("CREATE TABLE test (n INT)", &[]).unwrap();
        assert_eq!(result.rows_affected, 0);

        let result = conn.exec("INSERT INTO test(n) VALUES (1)", &[]).unwrap();
        assert_eq!(result.last_insert_id, 1);
        assert_eq!(result.rows_affected, 1);
    }

    #[test]
    fn test_query_columns_and_rows() {
        let mut conn = open_memory();
        conn.exec("CREATE TABLE test (n INT, name TEXT)", &[]).unwrap();
        conn.exec(
            "INSERT INTO test(n, name) VALUES (?, ?), (?, ?)",
            &[1i64.into(), "a".into(), 2i64.into(), Value::Null],
        )
        .unwrap();

        let mut rows = conn.query("SELECT n, name FROM test ORDER BY n", &[]).unwrap();
        assert_eq!(
            rows.columns(),
            &[
                Column {
                    name: "n".into(),
                    database_type: Some("INT".into())
                },
                Column {
                    name: "name".into(),
                    database_type: Some("TEXT".into())
                },
            ]
        );
        assert_eq!(
            rows.next().unwrap(),
            Some(vec![Value::Int64(1), Value::String("a".into())])
        );
        assert_eq!(rows.next().unwrap(), Some(vec![Value::Int64(2), Value::Null]));
        assert_eq!(rows.next().unwrap(), None);
        assert_eq!(rows.next().unwrap(), None);
    }

    #[test]
    fn test_exec_of_select_drains_rows() {
        let mut conn = open_memory();
        let result = conn.exec("SELECT 1", &[]).unwrap();
        assert_eq!(result.rows_affected, 0);
    }

    #[test]
    fn test_prepared_statement_runs_through_connection() {
        let mut conn = open_memory();
        conn.exec("CREATE TABLE test (n INT)", &[]).unwrap();

        let mut stmt = conn.prepare("INSERT INTO test(n) VALUES (?)").unwrap();
        assert_eq!(stmt.num_input(), Some(1));
        for n in 1..=3i64 {
            stmt.exec(conn.as_mut(), &[n.into()]).unwrap();
        }
        stmt.close().unwrap();

        let mut rows = conn.query("SELECT count(*) FROM test", &[]).unwrap();
        assert_eq!(rows.next().unwrap(), Some(vec![Value::Int64(3)]));
    }

    #[test]
    fn test_prepare_rejects_bad_sql() {
        let mut conn = open_memory();
        assert!(conn.prepare("SELEKT 1").is_err());
        // the connection is still usable afterwards
        assert!(conn.exec("SELECT 1", &[]).is_ok());
    }

    #[test]
    fn test_open_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let dsn = dir.path().join("missing").join("db.sqlite");
        assert!(SqliteDriver::new().open(dsn.to_str().unwrap()).is_err());
    }

    #[test]
    fn test_transactions() {
        let mut conn = open_memory();
        conn.exec("CREATE TABLE test (n INT)", &[]).unwrap();
        conn.begin().unwrap();
        conn.exec("INSERT INTO test(n) VALUES (1)", &[]).unwrap();
        conn.rollback().unwrap();

        let mut rows = conn.query("SELECT count(*) FROM test", &[]).unwrap();
        assert_eq!(rows.next().unwrap(), Some(vec![Value::Int64(0)]));

        assert!(conn.commit().is_err());
        conn.close().unwrap();
    }

    #[test]
    fn test_timestamps_keep_sign_and_fraction() {
        let mut conn = open_memory();
        conn.exec("CREATE TABLE events (at)", &[]).unwrap();

        let day_before = SystemTime::UNIX_EPOCH - Duration::from_secs(86_400);
        let fractional = SystemTime::UNIX_EPOCH - Duration::from_millis(1_250);
        let recent = SystemTime::UNIX_EPOCH + Duration::new(1_700_000_000, 500_000_000);
        for at in [day_before, fractional, recent] {
            conn.exec("INSERT INTO events(at) VALUES (?)", &[at.into()])
                .unwrap();
        }

        let mut rows = conn.query("SELECT at FROM events ORDER BY rowid", &[]).unwrap();
        let stored: Vec<Value> = std::iter::from_fn(|| rows.next().unwrap())
            .map(|mut row| row.remove(0))
            .collect();
        assert_eq!(
            stored,
            vec![
                Value::Int64(-86_400),
                Value::Double(-1.25),
                Value::Double(1_700_000_000.5),
            ]
        );

        let back: Vec<SystemTime> = stored
            .iter()
            .map(|v| SystemTime::from_value(v).unwrap())
            .collect();
        assert_eq!(back, vec![day_before, fractional, recent]);
    }

    #[test]
    fn test_exec_returning_counts_changes() {
        let mut conn = open_memory();
        conn.exec("CREATE TABLE test (id INTEGER PRIMARY KEY, n INT)", &[])
            .unwrap();
        let result = conn
            .exec("INSERT INTO test(n) VALUES (1), (2) RETURNING id", &[])
            .unwrap();
        assert_eq!(result.rows_affected, 2);
        assert_eq!(result.last_insert_id, 2);

        let result = conn.exec("SELECT n FROM test", &[]).unwrap();
        assert_eq!(result.rows_affected, 0);
    }

    #[test]
    fn test_max_buffered_rows() {
        let mut conn = SqliteDriver::new()
            .with_max_buffered_rows(2)
            .open(":memory:")
            .unwrap();
        conn.exec("CREATE TABLE test (n INT)", &[]).unwrap();
        conn.exec("INSERT INTO test(n) VALUES (1), (2)", &[]).unwrap();
        assert!(conn.query("SELECT n FROM test", &[]).is_ok());

        conn.exec("INSERT INTO test(n) VALUES (3)", &[]).unwrap();
        let err = conn.query("SELECT n FROM test", &[]).err().unwrap();
        assert!(err.to_string().contains("exceeds 2 buffered rows"));
        // the connection survives the rejected query
        assert!(conn.query("SELECT n FROM test LIMIT 2", &[]).is_ok());
    }
}
