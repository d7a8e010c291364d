//! Wire protocol spoken over the `Conn` stream.
//!
//! Every logical SQL connection is one bidirectional gRPC stream. The client
//! sends a [`Request`] and waits for exactly one [`Response`] before sending
//! the next one. The `data` field of both messages holds the protobuf encoding
//! of the payload message that belongs to the request code.

use prost::Message;
use std::fmt;

/// Request codes understood by the gateway.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum RequestCode {
    Open = 0,
    Prepare = 1,
    Exec = 2,
    Query = 3,
    RowsNext = 4,
    StmtClose = 5,
    RowsClose = 6,
    Begin = 7,
    Commit = 8,
    Rollback = 9,
    ConnClose = 10,
}

impl RequestCode {
    /// All defined request codes, in numeric order.
    pub const ALL: [RequestCode; 11] = [
        RequestCode::Open,
        RequestCode::Prepare,
        RequestCode::Exec,
        RequestCode::Query,
        RequestCode::RowsNext,
        RequestCode::StmtClose,
        RequestCode::RowsClose,
        RequestCode::Begin,
        RequestCode::Commit,
        RequestCode::Rollback,
        RequestCode::ConnClose,
    ];

    /// Protocol name of the code, e.g. `ROWS_NEXT`.
    pub fn as_str_name(&self) -> &'static str {
        match self {
            RequestCode::Open => "OPEN",
            RequestCode::Prepare => "PREPARE",
            RequestCode::Exec => "EXEC",
            RequestCode::Query => "QUERY",
            RequestCode::RowsNext => "ROWS_NEXT",
            RequestCode::StmtClose => "STMT_CLOSE",
            RequestCode::RowsClose => "ROWS_CLOSE",
            RequestCode::Begin => "BEGIN",
            RequestCode::Commit => "COMMIT",
            RequestCode::Rollback => "ROLLBACK",
            RequestCode::ConnClose => "CONN_CLOSE",
        }
    }
}

impl fmt::Display for RequestCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str_name())
    }
}

/// A request sent by the client.
#[derive(Clone, PartialEq, Message)]
pub struct Request {
    #[prost(enumeration = "RequestCode", tag = "1")]
    pub code: i32,
    #[prost(bytes = "vec", tag = "2")]
    pub data: Vec<u8>,
}

/// A response sent by the gateway for the request that preceded it.
#[derive(Clone, PartialEq, Message)]
pub struct Response {
    /// Raw code of the request this answers.
    #[prost(int32, tag = "1")]
    pub code: i32,
    #[prost(bool, tag = "2")]
    pub ok: bool,
    #[prost(string, tag = "3")]
    pub error: String,
    #[prost(bytes = "vec", tag = "4")]
    pub data: Vec<u8>,
    /// Set when the error poisoned the session.
    #[prost(bool, tag = "5")]
    pub fatal: bool,
}

#[derive(Clone, PartialEq, Message)]
pub struct Empty {}

#[derive(Clone, PartialEq, Message)]
pub struct OpenRequest {
    #[prost(string, tag = "1")]
    pub dsn: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct PrepareRequest {
    #[prost(string, tag = "1")]
    pub query: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct PrepareResponse {
    #[prost(uint64, tag = "1")]
    pub stmt_id: u64,
    /// Number of placeholders, or -1 when the driver cannot tell.
    #[prost(int64, tag = "2")]
    pub num_input: i64,
}

/// Payload of both EXEC and QUERY. Without a statement handle the query text
/// is executed ad hoc on the connection.
#[derive(Clone, PartialEq, Message)]
pub struct ExecRequest {
    #[prost(uint64, optional, tag = "1")]
    pub stmt_id: Option<u64>,
    #[prost(string, tag = "2")]
    pub query: String,
    #[prost(message, repeated, tag = "3")]
    pub args: Vec<Value>,
}

pub type QueryRequest = ExecRequest;

#[derive(Clone, PartialEq, Message)]
pub struct ExecResponse {
    #[prost(int64, tag = "1")]
    pub last_insert_id: i64,
    #[prost(int64, tag = "2")]
    pub rows_affected: i64,
}

#[derive(Clone, PartialEq, Message)]
pub struct Column {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, optional, tag = "2")]
    pub database_type: Option<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct QueryResponse {
    #[prost(uint64, tag = "1")]
    pub cursor_id: u64,
    #[prost(message, repeated, tag = "2")]
    pub columns: Vec<Column>,
}

#[derive(Clone, PartialEq, Message)]
pub struct RowsNextRequest {
    #[prost(uint64, tag = "1")]
    pub cursor_id: u64,
}

#[derive(Clone, PartialEq, Message)]
pub struct RowsNextResponse {
    #[prost(bool, tag = "1")]
    pub eof: bool,
    #[prost(message, repeated, tag = "2")]
    pub values: Vec<Value>,
}

#[derive(Clone, PartialEq, Message)]
pub struct StmtCloseRequest {
    #[prost(uint64, tag = "1")]
    pub stmt_id: u64,
}

#[derive(Clone, PartialEq, Message)]
pub struct RowsCloseRequest {
    #[prost(uint64, tag = "1")]
    pub cursor_id: u64,
}

/// A single column or argument value. An unset `kind` is SQL NULL.
#[derive(Clone, PartialEq, Message)]
pub struct Value {
    #[prost(oneof = "value::Kind", tags = "1, 2, 3, 4, 5, 6, 7, 8")]
    pub kind: Option<value::Kind>,
}

pub mod value {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Kind {
        #[prost(bool, tag = "1")]
        Bool(bool),
        #[prost(int32, tag = "2")]
        Int32(i32),
        #[prost(int64, tag = "3")]
        Int64(i64),
        #[prost(float, tag = "4")]
        Float(f32),
        #[prost(double, tag = "5")]
        Double(f64),
        #[prost(string, tag = "6")]
        String(String),
        #[prost(bytes = "vec", tag = "7")]
        Bytes(Vec<u8>),
        #[prost(message, tag = "8")]
        Timestamp(prost_types::Timestamp),
    }
}

impl Request {
    fn with_payload(code: RequestCode, payload: &impl Message) -> Self {
        Self {
            code: code.into(),
            data: payload.encode_to_vec(),
        }
    }

    fn bare(code: RequestCode) -> Self {
        Self {
            code: code.into(),
            data: Vec::new(),
        }
    }

    pub fn open(dsn: &str) -> Self {
        Self::with_payload(
            RequestCode::Open,
            &OpenRequest {
                dsn: dsn.to_string(),
            },
        )
    }

    pub fn prepare(query: &str) -> Self {
        Self::with_payload(
            RequestCode::Prepare,
            &PrepareRequest {
                query: query.to_string(),
            },
        )
    }

    pub fn exec(stmt_id: Option<u64>, query: &str, args: Vec<Value>) -> Self {
        Self::with_payload(
            RequestCode::Exec,
            &ExecRequest {
                stmt_id,
                query: query.to_string(),
                args,
            },
        )
    }

    pub fn query(stmt_id: Option<u64>, query: &str, args: Vec<Value>) -> Self {
        Self::with_payload(
            RequestCode::Query,
            &QueryRequest {
                stmt_id,
                query: query.to_string(),
                args,
            },
        )
    }

    pub fn rows_next(cursor_id: u64) -> Self {
        Self::with_payload(RequestCode::RowsNext, &RowsNextRequest { cursor_id })
    }

    pub fn stmt_close(stmt_id: u64) -> Self {
        Self::with_payload(RequestCode::StmtClose, &StmtCloseRequest { stmt_id })
    }

    pub fn rows_close(cursor_id: u64) -> Self {
        Self::with_payload(RequestCode::RowsClose, &RowsCloseRequest { cursor_id })
    }

    pub fn begin() -> Self {
        Self::bare(RequestCode::Begin)
    }

    pub fn commit() -> Self {
        Self::bare(RequestCode::Commit)
    }

    pub fn rollback() -> Self {
        Self::bare(RequestCode::Rollback)
    }

    pub fn conn_close() -> Self {
        Self::bare(RequestCode::ConnClose)
    }

    /// Decoded request code, or the raw value if it is not a known code.
    pub fn request_code(&self) -> std::result::Result<RequestCode, i32> {
        RequestCode::try_from(self.code).map_err(|_| self.code)
    }

    /// Decode the payload as `M`.
    pub fn payload<M: Message + Default>(&self) -> std::result::Result<M, prost::DecodeError> {
        M::decode(self.data.as_slice())
    }
}

impl Response {
    pub fn success(code: RequestCode, payload: &impl Message) -> Self {
        Self {
            code: code.into(),
            ok: true,
            error: String::new(),
            data: payload.encode_to_vec(),
            fatal: false,
        }
    }

    pub fn failure(code: i32, error: impl Into<String>, fatal: bool) -> Self {
        Self {
            code,
            ok: false,
            error: error.into(),
            data: Vec::new(),
            fatal,
        }
    }

    pub fn payload<M: Message + Default>(&self) -> std::result::Result<M, prost::DecodeError> {
        M::decode(self.data.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_code_is_reported_raw() {
        let request = Request {
            code: 666,
            data: vec![],
        };
        assert_eq!(request.request_code(), Err(666));
    }

    #[test]
    fn test_code_names() {
        assert_eq!(RequestCode::Prepare.to_string(), "PREPARE");
        assert_eq!(RequestCode::RowsNext.to_string(), "ROWS_NEXT");
        assert_eq!(RequestCode::ConnClose.to_string(), "CONN_CLOSE");
        for (i, code) in RequestCode::ALL.iter().enumerate() {
            assert_eq!(i32::from(*code), i as i32);
        }
    }

    #[test]
    fn test_garbage_payload_fails_to_decode() {
        let request = Request {
            code: RequestCode::Open.into(),
            data: b"x".to_vec(),
        };
        assert!(request.payload::<OpenRequest>().is_err());
    }

    #[test]
    fn test_exec_request_without_handle() {
        let request = Request::exec(None, "CREATE TABLE test (n INT)", vec![]);
        assert_eq!(request.request_code(), Ok(RequestCode::Exec));

        let payload: ExecRequest = request.payload().unwrap();
        assert_eq!(payload.stmt_id, None);
        assert_eq!(payload.query, "CREATE TABLE test (n INT)");

        let request = Request::exec(Some(0), "", vec![]);
        let payload: ExecRequest = request.payload().unwrap();
        assert_eq!(payload.stmt_id, Some(0));
    }

    #[test]
    fn test_null_value_has_no_kind() {
        let request = Request::query(
            None,
            "SELECT ?",
            vec![Value { kind: None }, Value {
                kind: Some(value::Kind::Int64(7)),
            }],
        );
        let payload: QueryRequest = request.payload().unwrap();
        assert_eq!(payload.args.len(), 2);
        assert_eq!(payload.args[0].kind, None);
        assert_eq!(payload.args[1].kind, Some(value::Kind::Int64(7)));
    }

    #[test]
    fn test_failure_response() {
        let response = Response::failure(666, "invalid request code 666", true);
        assert!(!response.ok);
        assert!(response.fatal);
        assert_eq!(response.code, 666);
    }
}
