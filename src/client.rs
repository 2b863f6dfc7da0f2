use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use http::Uri;
use http::header::{HeaderName, HeaderValue};
use parking_lot::Mutex;

use crate::auth::{Authenticator, CredentialProvider, RedirectResolver};
use crate::config::{
    ClientConfig, DEFAULT_MAX_ATTEMPTS, DEFAULT_PORT, DEFAULT_REQUEST_TIMEOUT, RetryPolicy, Scheme,
};
use crate::error::ClientError;
use crate::query::{Query, ResultSet};
use crate::session::ClientSession;
use crate::transport::HttpTransport;

/// Coordinator client: shared session, shared connection pool, and a
/// factory for [`Query`] executions.
///
/// The session is shared by all queries of one client; server-driven
/// session mutations observed by one query are carried into the requests
/// of the next. Queries themselves are single-caller (`&mut` driven) —
/// run concurrent statements through separate clients.
///
/// # Example
///
/// ```ignore
/// let client = Client::builder("coordinator.example.com", "etl")
///     .catalog("hive")
///     .schema("default")
///     .build()?;
///
/// let mut query = client.query("SELECT * FROM user_events LIMIT 10");
/// for row in query.execute().await? {
///     println!("{row:?}");
/// }
/// ```
#[derive(Clone)]
pub struct Client {
    config: Arc<ClientConfig>,
    session: Arc<Mutex<ClientSession>>,
    transport: HttpTransport,
}

impl Client {
    /// Start building a client for `host`, issuing queries as `user`.
    #[must_use]
    pub fn builder(host: impl Into<String>, user: impl Into<String>) -> ClientBuilder {
        ClientBuilder::new(host, user)
    }

    /// Create a query for `sql`. Nothing is sent until
    /// [`execute`](Query::execute).
    #[must_use]
    pub fn query(&self, sql: impl Into<String>) -> Query {
        Query::new(
            self.transport.clone(),
            Arc::clone(&self.session),
            Arc::clone(&self.config),
            sql.into(),
        )
    }

    /// Submit `sql` and drive it to completion.
    pub async fn execute(&self, sql: impl Into<String>) -> Result<ResultSet, ClientError> {
        self.query(sql).execute().await
    }

    /// The client configuration.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Snapshot of the current session properties.
    #[must_use]
    pub fn session_properties(&self) -> BTreeMap<String, String> {
        self.session.lock().properties().clone()
    }

    /// Snapshot of the registered prepared statements.
    #[must_use]
    pub fn prepared_statements(&self) -> Vec<String> {
        self.session.lock().prepared_statements().to_vec()
    }

    /// Set a session property by hand, as `SET SESSION` would.
    pub fn set_session_property(
        &self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), ClientError> {
        self.session.lock().set_property(name, value)
    }

    /// Install the transaction id carried on subsequent requests.
    pub fn set_transaction_id(&self, transaction_id: impl Into<String>) {
        self.session.lock().set_transaction_id(transaction_id);
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("scheme", &self.config.scheme)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Client`]. Configuration is validated at
/// [`build`](ClientBuilder::build) and immutable afterwards.
#[must_use = "ClientBuilder does nothing until .build() is called"]
pub struct ClientBuilder {
    host: String,
    port: u16,
    scheme: Scheme,
    user: String,
    catalog: Option<String>,
    schema: Option<String>,
    source: Option<String>,
    transaction_id: Option<String>,
    properties: Vec<(String, String)>,
    extra_headers: Vec<(String, String)>,
    max_attempts: u32,
    request_timeout: Duration,
    retry: RetryPolicy,
    authenticator: Option<Arc<dyn Authenticator>>,
    redirect_resolver: Option<Arc<dyn RedirectResolver>>,
    credentials: Option<Arc<dyn CredentialProvider>>,
}

impl ClientBuilder {
    fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            scheme: Scheme::default(),
            user: user.into(),
            catalog: None,
            schema: None,
            source: None,
            transaction_id: None,
            properties: Vec::new(),
            extra_headers: Vec::new(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            retry: RetryPolicy::default(),
            authenticator: None,
            redirect_resolver: None,
            credentials: None,
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn scheme(mut self, scheme: Scheme) -> Self {
        self.scheme = scheme;
        self
    }

    /// Use TLS. Required for authenticated transports.
    pub fn https(mut self) -> Self {
        self.scheme = Scheme::Https;
        self
    }

    pub fn catalog(mut self, catalog: impl Into<String>) -> Self {
        self.catalog = Some(catalog.into());
        self
    }

    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Source label attached to queries, useful for access control and
    /// scheduling.
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn transaction_id(mut self, transaction_id: impl Into<String>) -> Self {
        self.transaction_id = Some(transaction_id.into());
        self
    }

    /// Initial session property.
    pub fn session_property(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.properties.push((name.into(), value.into()));
        self
    }

    /// Extra header for every request. Must not collide with a reserved
    /// protocol header.
    pub fn extra_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.push((name.into(), value.into()));
        self
    }

    /// Maximum HTTP attempts per request; values below 1 are treated as 1.
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Per-attempt timeout covering connect and read.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Backoff policy between retried attempts.
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Authenticator decorating every request. Requires `https`.
    pub fn authenticator(mut self, authenticator: impl Authenticator + 'static) -> Self {
        self.authenticator = Some(Arc::new(authenticator));
        self
    }

    /// Resolver for coordinator redirects on statement submission.
    pub fn redirect_resolver(mut self, resolver: impl RedirectResolver + 'static) -> Self {
        self.redirect_resolver = Some(Arc::new(resolver));
        self
    }

    /// Refreshable bearer credentials installed on every request.
    /// Requires `https`.
    pub fn credential_provider(mut self, provider: impl CredentialProvider + 'static) -> Self {
        self.credentials = Some(Arc::new(provider));
        self
    }

    /// Validate the configuration and construct the client.
    ///
    /// # Errors
    /// Fails with [`ClientError::Configuration`] on an empty user, an
    /// authenticated transport over plain HTTP, a session property name
    /// containing `=`, or an extra header colliding with a reserved
    /// protocol header; header and URL syntax problems surface as their
    /// own error variants.
    pub fn build(self) -> Result<Client, ClientError> {
        if (self.authenticator.is_some() || self.credentials.is_some())
            && self.scheme == Scheme::Http
        {
            return Err(ClientError::Configuration(
                "cannot use authentication over plain HTTP".to_owned(),
            ));
        }

        let mut session = ClientSession::new(self.user)?;
        if let Some(catalog) = self.catalog {
            session.set_catalog(catalog);
        }
        if let Some(schema) = self.schema {
            session.set_schema(schema);
        }
        if let Some(source) = self.source {
            session.set_source(source);
        }
        if let Some(transaction_id) = self.transaction_id {
            session.set_transaction_id(transaction_id);
        }
        for (name, value) in self.properties {
            session.set_property(name, value)?;
        }
        for (name, value) in self.extra_headers {
            let name = HeaderName::try_from(name)?;
            let value = HeaderValue::try_from(value)?;
            session.add_extra_header(name, value)?;
        }

        let config = Arc::new(ClientConfig {
            host: self.host,
            port: self.port,
            scheme: self.scheme,
            max_attempts: self.max_attempts,
            request_timeout: self.request_timeout,
            retry: self.retry,
            authenticator: self.authenticator,
            redirect_resolver: self.redirect_resolver,
            credentials: self.credentials,
        });

        // Catch malformed coordinator addresses at construction time
        config
            .statement_url()
            .parse::<Uri>()
            .map_err(|err| ClientError::Configuration(format!(
                "invalid coordinator address '{}:{}': {err}",
                config.host, config.port
            )))?;

        let transport = HttpTransport::new(Arc::clone(&config))?;

        Ok(Client {
            config,
            session: Arc::new(Mutex::new(session)),
            transport,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::BasicAuthenticator;

    #[test]
    fn builds_with_defaults() {
        let client = Client::builder("coordinator", "test").build().unwrap();
        assert_eq!(client.config().port, DEFAULT_PORT);
        assert_eq!(client.config().scheme, Scheme::Http);
        assert_eq!(client.config().max_attempts, DEFAULT_MAX_ATTEMPTS);
    }

    #[test]
    fn rejects_empty_user() {
        assert!(matches!(
            Client::builder("coordinator", "").build(),
            Err(ClientError::Configuration(_))
        ));
    }

    #[test]
    fn rejects_authentication_over_plain_http() {
        let result = Client::builder("coordinator", "test")
            .authenticator(BasicAuthenticator::new("alice", "secret"))
            .build();
        match result {
            Err(ClientError::Configuration(reason)) => {
                assert!(reason.contains("plain HTTP"));
            }
            other => panic!("expected configuration error, got {other:?}"),
        }
    }

    #[test]
    fn accepts_authentication_over_https() {
        let client = Client::builder("coordinator", "test")
            .https()
            .authenticator(BasicAuthenticator::new("alice", "secret"))
            .build();
        assert!(client.is_ok());
    }

    #[test]
    fn rejects_reserved_extra_headers() {
        let result = Client::builder("coordinator", "test")
            .extra_header("X-Presto-User", "spoofed")
            .build();
        assert!(matches!(result, Err(ClientError::Configuration(_))));
    }

    #[test]
    fn rejects_property_names_containing_equals() {
        let result = Client::builder("coordinator", "test")
            .session_property("a=b", "v")
            .build();
        assert!(matches!(result, Err(ClientError::Configuration(_))));
    }

    #[test]
    fn rejects_malformed_hosts() {
        let result = Client::builder("bad host", "test").build();
        assert!(matches!(result, Err(ClientError::Configuration(_))));
    }

    #[test]
    fn max_attempts_has_a_floor_of_one() {
        let client = Client::builder("coordinator", "test")
            .max_attempts(0)
            .build()
            .unwrap();
        assert_eq!(client.config().max_attempts, 1);
    }

    #[test]
    fn manual_session_mutation_is_visible() {
        let client = Client::builder("coordinator", "test").build().unwrap();
        client.set_session_property("a", "1").unwrap();
        assert_eq!(client.session_properties().get("a").unwrap(), "1");
    }
}
