use http::StatusCode;
use http::header::{HeaderMap, HeaderName};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::ClientError;
use crate::session::{
    ClientSession, HEADER_ADDED_PREPARE, HEADER_CLEAR_SESSION, HEADER_SET_SESSION,
};
use crate::transport::RawResponse;

/// One column of the result set, as described by the coordinator once the
/// query plan is known.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    pub name: String,
    /// Display form of the type, e.g. `decimal(10,2)`.
    #[serde(rename = "type")]
    pub type_name: String,
    pub type_signature: TypeSignature,
}

/// Structured description of a column type, with nested `arguments` for
/// parametrized and container types.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeSignature {
    pub raw_type: String,
    #[serde(default)]
    pub arguments: Vec<TypeArgument>,
}

/// One type-signature argument. For container types the `value` holds the
/// element's type signature; for parametrized scalars it holds a literal.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeArgument {
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub value: Value,
}

/// Server-reported error structure embedded in an otherwise successful
/// response body.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ErrorInfo {
    pub message: String,
    pub error_code: Option<i64>,
    pub error_name: Option<String>,
    pub error_type: Option<String>,
    pub failure_info: Option<Value>,
}

impl ErrorInfo {
    /// Error structure for failures detected client-side (lifecycle
    /// violations); carries only a message.
    pub(crate) fn client_side(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }
}

/// Wire shape of a coordinator response body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResults {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    info_uri: Option<String>,
    #[serde(default)]
    next_uri: Option<String>,
    #[serde(default)]
    stats: Map<String, Value>,
    #[serde(default)]
    columns: Option<Vec<Column>>,
    #[serde(default)]
    data: Option<Vec<Vec<Value>>>,
    #[serde(default)]
    warnings: Option<Vec<Value>>,
    #[serde(default)]
    error: Option<ErrorInfo>,
}

/// Snapshot of one processed coordinator response. An absent `next_uri`
/// means the query reached a terminal state.
#[derive(Debug, Clone)]
pub struct QueryStatus {
    pub id: String,
    pub stats: Map<String, Value>,
    pub warnings: Vec<Value>,
    pub info_uri: Option<String>,
    pub next_uri: Option<String>,
    pub rows: Vec<Vec<Value>>,
    pub columns: Option<Vec<Column>>,
}

/// Classify a response's HTTP status into the error it raises.
pub(crate) fn status_error(response: &RawResponse) -> ClientError {
    if response.status == StatusCode::SERVICE_UNAVAILABLE {
        ClientError::ServiceUnavailable
    } else {
        ClientError::Http {
            status: response.status,
            body: response.body.clone(),
        }
    }
}

/// Process one coordinator response: classify failures, apply header-borne
/// session mutations in protocol order, and build a [`QueryStatus`].
pub(crate) fn process_response(
    response: &RawResponse,
    session: &mut ClientSession,
) -> Result<QueryStatus, ClientError> {
    if !response.status.is_success() {
        return Err(status_error(response));
    }

    let results: QueryResults = serde_json::from_slice(&response.body)?;

    if let Some(error) = results.error {
        return Err(classify_server_error(error, results.id));
    }

    apply_session_mutations(&response.headers, session)?;

    let id = results
        .id
        .ok_or_else(|| ClientError::Protocol("response is missing the query id".to_owned()))?;

    Ok(QueryStatus {
        id,
        stats: results.stats,
        warnings: results.warnings.unwrap_or_default(),
        info_uri: results.info_uri,
        next_uri: results.next_uri,
        rows: results.data.unwrap_or_default(),
        columns: results.columns,
    })
}

/// All server-reported errors are raised; a successful status never
/// carries an error payload.
fn classify_server_error(info: ErrorInfo, query_id: Option<String>) -> ClientError {
    match info.error_type.as_deref() {
        Some("EXTERNAL") => ClientError::External { info, query_id },
        Some("USER_ERROR") => ClientError::User { info, query_id },
        _ => ClientError::Query { info, query_id },
    }
}

/// Apply session mutations in the fixed protocol order: clear, set, added
/// prepare. Absent headers are no-ops.
fn apply_session_mutations(
    headers: &HeaderMap,
    session: &mut ClientSession,
) -> Result<(), ClientError> {
    let cleared = header_list(headers, &HEADER_CLEAR_SESSION)?;
    session.apply_clear_session(cleared.iter().map(String::as_str));

    // Split each entry on the first '=' only; encoded values may contain
    // further '=' characters.
    let entries = header_list(headers, &HEADER_SET_SESSION)?;
    let mut pairs = Vec::with_capacity(entries.len());
    for entry in &entries {
        let (name, value) = entry.split_once('=').ok_or_else(|| {
            ClientError::Protocol(format!("malformed session property entry '{entry}'"))
        })?;
        pairs.push((name, value));
    }
    session.apply_set_session(pairs)?;

    let prepared = header_list(headers, &HEADER_ADDED_PREPARE)?;
    if !prepared.is_empty() {
        session.apply_added_prepare(prepared.iter().map(String::as_str));
    }

    Ok(())
}

/// Collect a header's comma-separated values across all its instances,
/// trimmed, with empty entries dropped.
fn header_list(headers: &HeaderMap, name: &HeaderName) -> Result<Vec<String>, ClientError> {
    let mut values = Vec::new();
    for value in headers.get_all(name) {
        let value = value.to_str().map_err(|err| {
            ClientError::Protocol(format!("invalid {name} header: {err}"))
        })?;
        values.extend(
            value
                .split(',')
                .map(str::trim)
                .filter(|entry| !entry.is_empty())
                .map(str::to_owned),
        );
    }
    Ok(values)
}
