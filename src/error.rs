use std::time::Duration;

use bytes::Bytes;
use http::StatusCode;
use thiserror::Error;

use crate::protocol::ErrorInfo;

/// Errors surfaced by the protocol client.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ClientError {
    /// Invalid client or session configuration
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// Request building failed
    #[error("failed to build request: {0}")]
    RequestBuild(#[from] http::Error),

    /// Invalid header name
    #[error("invalid header name: {0}")]
    InvalidHeaderName(#[from] http::header::InvalidHeaderName),

    /// Invalid header value
    #[error("invalid header value: {0}")]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),

    /// Invalid URL (coordinator address, `nextUri` or redirect target)
    #[error("invalid URI '{uri}': {reason}")]
    InvalidUri { uri: String, reason: String },

    /// TLS initialization error
    #[error("TLS error: {0}")]
    Tls(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Network-layer failure, surfaced after retries are exhausted
    #[error("transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Single request attempt timed out
    #[error("request attempt timed out after {0:?}")]
    Timeout(Duration),

    /// HTTP 503, surfaced after retries are exhausted
    #[error("error 503: service unavailable")]
    ServiceUnavailable,

    /// Non-2xx coordinator response with no protocol payload
    #[error("error {status}: {}", String::from_utf8_lossy(.body))]
    Http { status: StatusCode, body: Bytes },

    /// Server-reported coordinator-side failure
    #[error("external error{}: {}", fmt_query_id(.query_id), .info.message)]
    External {
        info: ErrorInfo,
        query_id: Option<String>,
    },

    /// The statement or the query lifecycle was violated by the caller
    #[error("user error{}: {}", fmt_query_id(.query_id), .info.message)]
    User {
        info: ErrorInfo,
        query_id: Option<String>,
    },

    /// Server-reported query failure not otherwise classified
    #[error("query error{}: {}", fmt_query_id(.query_id), .info.message)]
    Query {
        info: ErrorInfo,
        query_id: Option<String>,
    },

    /// Malformed protocol response (headers or payload shape)
    #[error("malformed protocol response: {0}")]
    Protocol(String),

    /// Response body was not the expected JSON
    #[error("failed to decode coordinator response: {0}")]
    Json(#[from] serde_json::Error),

    /// Typed row mapping could not convert a cell
    #[error("cannot convert '{value}' to a native value of type '{raw_type}'")]
    TypeMapping { value: String, raw_type: String },
}

impl ClientError {
    /// Build a client-side user error (lifecycle violations such as
    /// executing a cancelled query).
    pub(crate) fn user(message: impl Into<String>, query_id: Option<String>) -> Self {
        ClientError::User {
            info: ErrorInfo::client_side(message),
            query_id,
        }
    }

    /// The query id associated with a server-reported failure, when known.
    #[must_use]
    pub fn query_id(&self) -> Option<&str> {
        match self {
            ClientError::External { query_id, .. }
            | ClientError::User { query_id, .. }
            | ClientError::Query { query_id, .. } => query_id.as_deref(),
            _ => None,
        }
    }

    /// The server-reported error structure, when this is a server error.
    #[must_use]
    pub fn error_info(&self) -> Option<&ErrorInfo> {
        match self {
            ClientError::External { info, .. }
            | ClientError::User { info, .. }
            | ClientError::Query { info, .. } => Some(info),
            _ => None,
        }
    }
}

impl From<hyper::Error> for ClientError {
    fn from(err: hyper::Error) -> Self {
        ClientError::Transport(Box::new(err))
    }
}

impl From<hyper_util::client::legacy::Error> for ClientError {
    fn from(err: hyper_util::client::legacy::Error) -> Self {
        ClientError::Transport(Box::new(err))
    }
}

fn fmt_query_id(query_id: &Option<String>) -> String {
    match query_id {
        Some(id) => format!(" (query {id})"),
        None => String::new(),
    }
}
