//! Cursors over remote result sets.

use crate::connection::Inner;
use crate::driver::Column;
use crate::error::{Error, Result};
use crate::protocol::{Request, RowsNextResponse};
use crate::value::{from_wire_all, FromValue, Value};
use std::sync::Arc;

/// One row of a result set.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[Column]>,
    values: Vec<Value>,
}

impl Row {
    /// Value of column `idx` converted to `T`.
    pub fn get<T: FromValue>(&self, idx: usize) -> Result<T> {
        let value = self.values.get(idx).ok_or_else(|| {
            Error::InvalidParameter(format!(
                "column index {} out of range for {} columns",
                idx,
                self.values.len()
            ))
        })?;
        T::from_value(value)
    }

    /// Value of the column called `name` converted to `T`.
    pub fn get_named<T: FromValue>(&self, name: &str) -> Result<T> {
        let idx = self
            .columns
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| Error::InvalidParameter(format!("no column named {:?}", name)))?;
        self.get(idx)
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A cursor held open on the gateway.
///
/// Rows are fetched one round trip at a time. The cursor is released as soon
/// as it is exhausted; dropping it earlier queues a ROWS_CLOSE.
pub struct Rows {
    inner: Arc<Inner>,
    id: u64,
    columns: Arc<[Column]>,
    closed: bool,
}

impl Rows {
    pub(crate) fn new(inner: Arc<Inner>, id: u64, columns: Vec<Column>) -> Self {
        Self {
            inner,
            id,
            columns: columns.into(),
            closed: false,
        }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Fetch the next row, or `None` once the result set is exhausted.
    pub async fn next(&mut self) -> Result<Option<Row>> {
        if self.closed {
            return Ok(None);
        }
        let response = self.inner.round_trip(Request::rows_next(self.id)).await?;
        let next: RowsNextResponse = response.payload()?;
        if next.eof {
            self.close().await?;
            return Ok(None);
        }
        Ok(Some(Row {
            columns: self.columns.clone(),
            values: from_wire_all(next.values)?,
        }))
    }

    /// Read every remaining row.
    pub async fn collect(&mut self) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.next().await? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Release the cursor on the gateway. Closing twice, or after the
    /// connection is gone, is not an error.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if !self.inner.is_open() {
            return Ok(());
        }
        self.inner.round_trip(Request::rows_close(self.id)).await?;
        Ok(())
    }
}

impl Drop for Rows {
    fn drop(&mut self) {
        if !self.closed {
            self.inner.defer(Request::rows_close(self.id));
        }
    }
}
