use std::collections::BTreeMap;

use http::header::{HeaderMap, HeaderName, HeaderValue};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};

use crate::error::ClientError;

/// Sentinel transaction id meaning "no transaction in progress".
pub const NO_TRANSACTION: &str = "NONE";

/// `X-Presto-User` request header.
pub static HEADER_USER: HeaderName = HeaderName::from_static("x-presto-user");
/// `X-Presto-Source` request header.
pub static HEADER_SOURCE: HeaderName = HeaderName::from_static("x-presto-source");
/// `X-Presto-Catalog` request header.
pub static HEADER_CATALOG: HeaderName = HeaderName::from_static("x-presto-catalog");
/// `X-Presto-Schema` request header.
pub static HEADER_SCHEMA: HeaderName = HeaderName::from_static("x-presto-schema");
/// `X-Presto-Session` request header (comma-joined `name=value` pairs,
/// values percent-encoded).
pub static HEADER_SESSION: HeaderName = HeaderName::from_static("x-presto-session");
/// `X-Presto-Transaction-Id` request header.
pub static HEADER_TRANSACTION: HeaderName = HeaderName::from_static("x-presto-transaction-id");
/// `X-Presto-Prepared-Statement` request header (comma-joined).
pub static HEADER_PREPARED_STATEMENT: HeaderName =
    HeaderName::from_static("x-presto-prepared-statement");

/// `X-Presto-Clear-Session` response header.
pub static HEADER_CLEAR_SESSION: HeaderName = HeaderName::from_static("x-presto-clear-session");
/// `X-Presto-Set-Session` response header.
pub static HEADER_SET_SESSION: HeaderName = HeaderName::from_static("x-presto-set-session");
/// `X-Presto-Added-Prepare` response header.
pub static HEADER_ADDED_PREPARE: HeaderName = HeaderName::from_static("x-presto-added-prepare");

/// Request headers owned by the protocol; user-supplied extra headers must
/// not collide with these.
fn is_reserved(name: &HeaderName) -> bool {
    [
        &HEADER_USER,
        &HEADER_SOURCE,
        &HEADER_CATALOG,
        &HEADER_SCHEMA,
        &HEADER_SESSION,
        &HEADER_TRANSACTION,
        &HEADER_PREPARED_STATEMENT,
    ]
    .iter()
    .any(|reserved| *reserved == name)
}

/// Percent-encoding set for session property values: unreserved characters
/// and `/` stay literal, everything else (including `,` and `=`, which are
/// structural in the joined header) is escaped.
const SESSION_VALUE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'/');

/// Protocol session state carried across the requests of one client.
///
/// The session is created at client construction and afterwards mutated in
/// exactly two ways: explicit setters, and the server's session-mutation
/// response headers applied by the response processor. Serialization to the
/// reserved header set happens per request, so a mutation observed in one
/// response is reflected in the very next request.
#[derive(Debug, Clone)]
pub struct ClientSession {
    user: String,
    catalog: Option<String>,
    schema: Option<String>,
    source: Option<String>,
    transaction_id: String,
    properties: BTreeMap<String, String>,
    prepared_statements: Vec<String>,
    extra_headers: Vec<(HeaderName, HeaderValue)>,
}

impl ClientSession {
    /// Create a session for `user`.
    ///
    /// # Errors
    /// Fails with [`ClientError::Configuration`] if `user` is empty.
    pub fn new(user: impl Into<String>) -> Result<Self, ClientError> {
        let user = user.into();
        if user.is_empty() {
            return Err(ClientError::Configuration(
                "user must not be empty".to_owned(),
            ));
        }
        Ok(Self {
            user,
            catalog: None,
            schema: None,
            source: None,
            transaction_id: NO_TRANSACTION.to_owned(),
            properties: BTreeMap::new(),
            prepared_statements: Vec::new(),
            extra_headers: Vec::new(),
        })
    }

    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }

    #[must_use]
    pub fn catalog(&self) -> Option<&str> {
        self.catalog.as_deref()
    }

    #[must_use]
    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    #[must_use]
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    #[must_use]
    pub fn transaction_id(&self) -> &str {
        &self.transaction_id
    }

    #[must_use]
    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    #[must_use]
    pub fn prepared_statements(&self) -> &[String] {
        &self.prepared_statements
    }

    pub fn set_catalog(&mut self, catalog: impl Into<String>) {
        self.catalog = Some(catalog.into());
    }

    pub fn set_schema(&mut self, schema: impl Into<String>) {
        self.schema = Some(schema.into());
    }

    pub fn set_source(&mut self, source: impl Into<String>) {
        self.source = Some(source.into());
    }

    pub fn set_transaction_id(&mut self, transaction_id: impl Into<String>) {
        self.transaction_id = transaction_id.into();
    }

    /// Set a session property.
    ///
    /// # Errors
    /// Fails with [`ClientError::Configuration`] if `name` contains `=`,
    /// which is structural in the serialized session header.
    pub fn set_property(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), ClientError> {
        let name = name.into();
        if name.contains('=') {
            return Err(ClientError::Configuration(format!(
                "session property name must not contain '=': {name}"
            )));
        }
        self.properties.insert(name, value.into());
        Ok(())
    }

    /// Attach an extra HTTP header to every request.
    ///
    /// # Errors
    /// Fails with [`ClientError::Configuration`] if `name` collides with a
    /// reserved protocol header.
    pub fn add_extra_header(
        &mut self,
        name: HeaderName,
        value: HeaderValue,
    ) -> Result<(), ClientError> {
        if is_reserved(&name) {
            return Err(ClientError::Configuration(format!(
                "cannot override reserved HTTP header {name}"
            )));
        }
        self.extra_headers.push((name, value));
        Ok(())
    }

    /// Serialize the session into the reserved protocol header set.
    ///
    /// Extra headers are merged last; collisions were rejected when the
    /// extra headers were registered.
    pub fn to_headers(&self) -> Result<HeaderMap, ClientError> {
        let mut headers = HeaderMap::new();

        headers.insert(&HEADER_USER, HeaderValue::from_str(&self.user)?);
        if let Some(catalog) = &self.catalog {
            headers.insert(&HEADER_CATALOG, HeaderValue::from_str(catalog)?);
        }
        if let Some(schema) = &self.schema {
            headers.insert(&HEADER_SCHEMA, HeaderValue::from_str(schema)?);
        }
        if let Some(source) = &self.source {
            headers.insert(&HEADER_SOURCE, HeaderValue::from_str(source)?);
        }

        if !self.prepared_statements.is_empty() {
            let joined = self.prepared_statements.join(",");
            headers.insert(&HEADER_PREPARED_STATEMENT, HeaderValue::from_str(&joined)?);
        }

        if !self.properties.is_empty() {
            let joined = self
                .properties
                .iter()
                .map(|(name, value)| {
                    format!("{name}={}", utf8_percent_encode(value, SESSION_VALUE_SET))
                })
                .collect::<Vec<_>>()
                .join(",");
            headers.insert(&HEADER_SESSION, HeaderValue::from_str(&joined)?);
        }

        headers.insert(&HEADER_TRANSACTION, HeaderValue::from_str(&self.transaction_id)?);

        for (name, value) in &self.extra_headers {
            headers.append(name, value.clone());
        }

        Ok(headers)
    }

    /// Remove the named session properties. Absent names are no-ops.
    pub fn apply_clear_session<'a>(&mut self, names: impl IntoIterator<Item = &'a str>) {
        for name in names {
            if self.properties.remove(name.trim()).is_some() {
                tracing::trace!(property = name, "cleared session property");
            }
        }
    }

    /// Insert or overwrite session properties. Values arrive
    /// percent-encoded from the server and are decoded before storage.
    ///
    /// # Errors
    /// Fails with [`ClientError::Protocol`] on invalid percent-encoding.
    pub fn apply_set_session<'a>(
        &mut self,
        pairs: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<(), ClientError> {
        for (name, encoded) in pairs {
            let value = percent_decode_str(encoded.trim())
                .decode_utf8()
                .map_err(|err| {
                    ClientError::Protocol(format!(
                        "invalid percent-encoded session value for '{name}': {err}"
                    ))
                })?;
            tracing::trace!(property = name, "set session property");
            self.properties.insert(name.trim().to_owned(), value.into_owned());
        }
        Ok(())
    }

    /// Record the server-issued prepared statements; the list replaces any
    /// previous one and is echoed verbatim on subsequent requests.
    pub fn apply_added_prepare<'a>(&mut self, statements: impl IntoIterator<Item = &'a str>) {
        self.prepared_statements = statements
            .into_iter()
            .map(|statement| statement.trim().to_owned())
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> ClientSession {
        ClientSession::new("test").unwrap()
    }

    #[test]
    fn empty_user_is_rejected() {
        assert!(matches!(
            ClientSession::new(""),
            Err(ClientError::Configuration(_))
        ));
    }

    #[test]
    fn headers_carry_identity_and_transaction() {
        let mut session = session();
        session.set_catalog("hive");
        session.set_schema("default");
        session.set_source("etl");

        let headers = session.to_headers().unwrap();
        assert_eq!(headers.get(&HEADER_USER).unwrap(), "test");
        assert_eq!(headers.get(&HEADER_CATALOG).unwrap(), "hive");
        assert_eq!(headers.get(&HEADER_SCHEMA).unwrap(), "default");
        assert_eq!(headers.get(&HEADER_SOURCE).unwrap(), "etl");
        assert_eq!(headers.get(&HEADER_TRANSACTION).unwrap(), NO_TRANSACTION);
        // No properties, no prepared statements: headers absent entirely
        assert!(headers.get(&HEADER_SESSION).is_none());
        assert!(headers.get(&HEADER_PREPARED_STATEMENT).is_none());
    }

    #[test]
    fn session_properties_are_percent_encoded() {
        let mut session = session();
        session.set_property("a", "hello,world").unwrap();
        session.set_property("b", "x=y").unwrap();

        let headers = session.to_headers().unwrap();
        assert_eq!(
            headers.get(&HEADER_SESSION).unwrap(),
            "a=hello%2Cworld,b=x%3Dy"
        );
    }

    #[test]
    fn structural_characters_round_trip() {
        let mut sess = session();
        sess.set_property("k", "a,b=c%d").unwrap();

        let headers = sess.to_headers().unwrap();
        let serialized = headers.get(&HEADER_SESSION).unwrap().to_str().unwrap();
        let (name, encoded) = serialized.split_once('=').unwrap();

        let mut other = session();
        other.apply_set_session([(name, encoded)]).unwrap();
        assert_eq!(other.properties().get("k").unwrap(), "a,b=c%d");
    }

    #[test]
    fn property_name_with_equals_is_rejected() {
        let mut session = session();
        assert!(matches!(
            session.set_property("a=b", "v"),
            Err(ClientError::Configuration(_))
        ));
    }

    #[test]
    fn clear_session_is_idempotent() {
        let mut session = session();
        session.set_property("a", "1").unwrap();
        session.apply_clear_session(["a", "missing"]);
        assert!(session.properties().is_empty());
    }

    #[test]
    fn set_session_decodes_values() {
        let mut session = session();
        session.apply_set_session([("a", "hello%2Cworld")]).unwrap();
        assert_eq!(session.properties().get("a").unwrap(), "hello,world");
    }

    #[test]
    fn invalid_percent_encoding_is_a_protocol_error() {
        let mut session = session();
        // %FF is not valid UTF-8 once decoded
        assert!(matches!(
            session.apply_set_session([("a", "%FF")]),
            Err(ClientError::Protocol(_))
        ));
    }

    #[test]
    fn added_prepare_replaces_and_is_echoed() {
        let mut session = session();
        session.apply_added_prepare(["st1=SELECT 1"]);
        session.apply_added_prepare(["st1=SELECT 1", "st2=SELECT 2"]);

        let headers = session.to_headers().unwrap();
        assert_eq!(
            headers.get(&HEADER_PREPARED_STATEMENT).unwrap(),
            "st1=SELECT 1,st2=SELECT 2"
        );
    }

    #[test]
    fn reserved_extra_header_is_rejected() {
        let mut session = session();
        let err = session.add_extra_header(
            HeaderName::from_static("x-presto-user"),
            HeaderValue::from_static("spoofed"),
        );
        assert!(matches!(err, Err(ClientError::Configuration(_))));
    }

    #[test]
    fn extra_headers_are_merged_last() {
        let mut session = session();
        session
            .add_extra_header(
                HeaderName::from_static("x-trace-id"),
                HeaderValue::from_static("abc123"),
            )
            .unwrap();
        let headers = session.to_headers().unwrap();
        assert_eq!(headers.get("x-trace-id").unwrap(), "abc123");
    }
}
