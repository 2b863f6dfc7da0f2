use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use http::StatusCode;
use http::header::{CONTENT_TYPE, HeaderValue};
use parking_lot::Mutex;
use serde_json::{Map, Value};

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::protocol::{self, Column, QueryStatus};
use crate::session::ClientSession;
use crate::transport::HttpTransport;
use crate::typed::{self, TypedValue};

/// Execution of one SQL statement.
///
/// The query lifecycle is submit, poll, finish: [`execute`](Query::execute)
/// POSTs the statement and then follows the server-provided continuation
/// URI until the server omits it, accumulating result rows. The server
/// controls pacing by withholding poll responses; an empty page with a
/// continuation URI just means "not ready yet" and polling continues
/// without sleeping.
///
/// A query is driven by a single logical caller; all methods take
/// `&mut self`. Independent queries over independent sessions are fully
/// independent.
pub struct Query {
    transport: HttpTransport,
    session: Arc<Mutex<ClientSession>>,
    config: Arc<ClientConfig>,
    sql: String,
    query_id: Option<String>,
    columns: Option<Vec<Column>>,
    stats: Map<String, Value>,
    warnings: Vec<Value>,
    next_uri: Option<String>,
    finished: bool,
    cancelled: Arc<AtomicBool>,
}

impl Query {
    pub(crate) fn new(
        transport: HttpTransport,
        session: Arc<Mutex<ClientSession>>,
        config: Arc<ClientConfig>,
        sql: String,
    ) -> Self {
        Self {
            transport,
            session,
            config,
            sql,
            query_id: None,
            columns: None,
            stats: Map::new(),
            warnings: Vec::new(),
            next_uri: None,
            finished: false,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The server-assigned query id, available after the first successful
    /// response. Set once and never cleared.
    #[must_use]
    pub fn query_id(&self) -> Option<&str> {
        self.query_id.as_deref()
    }

    /// Column descriptors, once the plan is known. Later responses that
    /// omit them do not clear the latched value.
    #[must_use]
    pub fn columns(&self) -> Option<&[Column]> {
        self.columns.as_deref()
    }

    /// Cumulative execution statistics merged across responses.
    #[must_use]
    pub fn stats(&self) -> &Map<String, Value> {
        &self.stats
    }

    /// Warnings from the latest response.
    #[must_use]
    pub fn warnings(&self) -> &[Value] {
        &self.warnings
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Submit the statement and poll until the query reaches a terminal
    /// state, returning the accumulated rows.
    ///
    /// # Errors
    /// Fails with [`ClientError::User`] when the query was already
    /// cancelled, and otherwise propagates transport, HTTP and
    /// server-reported failures.
    pub async fn execute(&mut self) -> Result<ResultSet, ClientError> {
        if self.is_cancelled() {
            return Err(ClientError::user(
                "Query has been cancelled",
                self.query_id.clone(),
            ));
        }

        let mut rows = self.submit().await?;
        while !self.finished && !self.is_cancelled() {
            rows.extend(self.fetch().await?);
        }

        Ok(ResultSet::new(
            rows,
            self.columns.clone(),
            Arc::clone(&self.cancelled),
        ))
    }

    /// Fetch the next page via the current continuation URI.
    ///
    /// Returns the page's rows, which may be empty while the query is
    /// still queued or running.
    pub async fn fetch(&mut self) -> Result<Vec<Vec<Value>>, ClientError> {
        let Some(next_uri) = self.next_uri.clone() else {
            self.finished = true;
            return Ok(Vec::new());
        };

        let headers = self.session.lock().to_headers()?;
        let response = self.transport.get(&next_uri, headers).await?;
        let status = {
            let mut session = self.session.lock();
            protocol::process_response(&response, &mut session)?
        };
        Ok(self.absorb(status))
    }

    /// Cancel a running query.
    ///
    /// A no-op when the query was never submitted or already finished;
    /// otherwise issues a DELETE for the query and refuses further
    /// iteration of its results.
    pub async fn cancel(&mut self) -> Result<(), ClientError> {
        let Some(query_id) = self.query_id.clone() else {
            return Ok(());
        };
        if self.finished {
            return Ok(());
        }

        self.cancelled.store(true, Ordering::SeqCst);
        let url = self.config.query_url(&query_id);
        tracing::debug!(%query_id, "cancelling query");

        let response = self.transport.delete(&url).await?;
        if response.status == StatusCode::NO_CONTENT {
            tracing::debug!(%query_id, "query cancelled");
            return Ok(());
        }
        Err(protocol::status_error(&response))
    }

    /// POST the statement to the coordinator and absorb the first status.
    async fn submit(&mut self) -> Result<Vec<Vec<Value>>, ClientError> {
        let headers = {
            let session = self.session.lock();
            let mut headers = session.to_headers()?;
            headers.insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; charset=utf-8"),
            );
            headers
        };

        let url = self.config.statement_url();
        tracing::debug!(%url, "submitting statement");
        let response = self
            .transport
            .post(&url, Bytes::from(self.sql.clone()), headers)
            .await?;
        let status = {
            let mut session = self.session.lock();
            protocol::process_response(&response, &mut session)?
        };
        Ok(self.absorb(status))
    }

    /// Fold one status snapshot into the query state and hand back its
    /// rows.
    fn absorb(&mut self, status: QueryStatus) -> Vec<Vec<Value>> {
        if self.query_id.is_none() {
            self.query_id = Some(status.id.clone());
            self.stats
                .insert("queryId".to_owned(), Value::String(status.id));
        }

        // Columns latch: a non-empty update replaces, omission never clears.
        if let Some(columns) = status.columns {
            if !columns.is_empty() {
                self.columns = Some(columns);
            }
        }

        self.stats.extend(status.stats);
        self.warnings = status.warnings;

        self.next_uri = status.next_uri;
        if self.next_uri.is_none() {
            self.finished = true;
            tracing::debug!(query_id = ?self.query_id, "query reached a terminal state");
        }

        status.rows
    }
}

/// Single-pass sequence of result rows.
///
/// Rows are yielded in server order, concatenated across pages. The
/// 1-based [`row_number`](ResultSet::row_number) advances exactly once per
/// yielded row. Iteration stops permanently once the owning query is
/// cancelled.
#[derive(Debug)]
pub struct ResultSet {
    rows: std::vec::IntoIter<Vec<Value>>,
    columns: Option<Vec<Column>>,
    row_number: u64,
    cancelled: Arc<AtomicBool>,
}

impl ResultSet {
    fn new(
        rows: Vec<Vec<Value>>,
        columns: Option<Vec<Column>>,
        cancelled: Arc<AtomicBool>,
    ) -> Self {
        Self {
            rows: rows.into_iter(),
            columns,
            row_number: 0,
            cancelled,
        }
    }

    /// Number of rows yielded so far.
    #[must_use]
    pub fn row_number(&self) -> u64 {
        self.row_number
    }

    /// Column descriptors of the result, when the plan produced any.
    #[must_use]
    pub fn columns(&self) -> Option<&[Column]> {
        self.columns.as_deref()
    }

    /// Convert the remaining rows to native typed values during
    /// iteration. The row counter carries over.
    #[must_use]
    pub fn typed(self) -> TypedResultSet {
        TypedResultSet {
            rows: self.rows,
            columns: self.columns,
            row_number: self.row_number,
            cancelled: self.cancelled,
            failed: false,
        }
    }
}

impl Iterator for ResultSet {
    type Item = Vec<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cancelled.load(Ordering::SeqCst) {
            return None;
        }
        let row = self.rows.next()?;
        self.row_number += 1;
        Some(row)
    }
}

/// [`ResultSet`] adapter that converts each row with the typed mapper.
///
/// A conversion failure is yielded once and fuses the iterator.
pub struct TypedResultSet {
    rows: std::vec::IntoIter<Vec<Value>>,
    columns: Option<Vec<Column>>,
    row_number: u64,
    cancelled: Arc<AtomicBool>,
    failed: bool,
}

impl TypedResultSet {
    /// Number of rows yielded so far, including the raw rows yielded
    /// before the conversion to a typed iterator.
    #[must_use]
    pub fn row_number(&self) -> u64 {
        self.row_number
    }
}

impl Iterator for TypedResultSet {
    type Item = Result<Vec<TypedValue>, ClientError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.cancelled.load(Ordering::SeqCst) {
            return None;
        }
        let row = self.rows.next()?;
        self.row_number += 1;

        let Some(columns) = &self.columns else {
            self.failed = true;
            return Some(Err(ClientError::Protocol(
                "rows received without column metadata".to_owned(),
            )));
        };
        match typed::map_row(&row, columns) {
            Ok(row) => Some(Ok(row)),
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }
}
