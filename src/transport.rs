use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::header::{HeaderMap, HeaderValue, LOCATION, USER_AGENT};
use http::{Method, Request, StatusCode, Uri};
use http_body_util::{BodyExt, Full};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::{TokioExecutor, TokioTimer};

use crate::config::ClientConfig;
use crate::error::ClientError;

/// Default User-Agent sent when the caller supplies none.
pub const DEFAULT_USER_AGENT: &str = concat!("presto-client/", env!("CARGO_PKG_VERSION"));

/// One fully buffered coordinator response.
#[derive(Debug, Clone)]
pub(crate) struct RawResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

type PooledClient = Client<HttpsConnector<HttpConnector>, Full<Bytes>>;

/// HTTP request layer over a pooled hyper client.
///
/// Every verb applies the per-attempt timeout and the retry policy:
/// transport failures, attempt timeouts, failures the authenticator
/// declares transient, and HTTP 503 responses are retried with exponential
/// backoff until `max_attempts` is reached. All other responses are
/// returned to the caller as-is; status classification belongs to the
/// response processor.
#[derive(Clone)]
pub(crate) struct HttpTransport {
    client: PooledClient,
    config: Arc<ClientConfig>,
}

impl HttpTransport {
    pub(crate) fn new(config: Arc<ClientConfig>) -> Result<Self, ClientError> {
        let connector = build_connector()?;

        let mut builder = Client::builder(TokioExecutor::new());
        // pool_timer is required for pool_idle_timeout to take effect
        builder
            .pool_timer(TokioTimer::new())
            .pool_max_idle_per_host(32)
            .pool_idle_timeout(Duration::from_secs(90));
        let client = builder.build::<_, Full<Bytes>>(connector);

        Ok(Self { client, config })
    }

    /// Submit `body` to `url`. With a redirect resolver installed, 3xx
    /// responses are chased by re-POSTing the same body and headers to the
    /// resolved target until a non-redirect response arrives.
    pub(crate) async fn post(
        &self,
        url: &str,
        body: Bytes,
        headers: HeaderMap,
    ) -> Result<RawResponse, ClientError> {
        let uri = parse_uri(url)?;
        let mut response = self
            .execute(&Method::POST, &uri, &headers, body.clone())
            .await?;

        if let Some(resolver) = &self.config.redirect_resolver {
            while response.status.is_redirection() {
                let location = response
                    .headers
                    .get(LOCATION)
                    .and_then(|value| value.to_str().ok())
                    .ok_or_else(|| {
                        ClientError::Protocol(
                            "redirect response without a Location header".to_owned(),
                        )
                    })?;
                let target = resolver.resolve(location)?;
                tracing::debug!(
                    status = %response.status,
                    location,
                    target = %target,
                    "re-submitting statement to resolved coordinator"
                );
                response = self
                    .execute(&Method::POST, &target, &headers, body.clone())
                    .await?;
            }
        }

        Ok(response)
    }

    pub(crate) async fn get(
        &self,
        url: &str,
        headers: HeaderMap,
    ) -> Result<RawResponse, ClientError> {
        let uri = parse_uri(url)?;
        self.execute(&Method::GET, &uri, &headers, Bytes::new()).await
    }

    pub(crate) async fn delete(&self, url: &str) -> Result<RawResponse, ClientError> {
        let uri = parse_uri(url)?;
        self.execute(&Method::DELETE, &uri, &HeaderMap::new(), Bytes::new())
            .await
    }

    async fn execute(
        &self,
        method: &Method,
        uri: &Uri,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<RawResponse, ClientError> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt: u32 = 1;
        loop {
            let result = self.attempt(method, uri, headers, body.clone()).await;

            let transient = match &result {
                Ok(response) => response.status == StatusCode::SERVICE_UNAVAILABLE,
                Err(error) => self.is_transient(error),
            };
            if !transient || attempt >= max_attempts {
                return result;
            }

            let delay = self.config.retry.backoff(attempt - 1);
            match &result {
                Ok(response) => tracing::debug!(
                    attempt,
                    max_attempts,
                    status = %response.status,
                    %method,
                    %uri,
                    delay_ms = delay.as_millis() as u64,
                    "retrying unavailable coordinator"
                ),
                Err(error) => tracing::debug!(
                    attempt,
                    max_attempts,
                    %error,
                    %method,
                    %uri,
                    delay_ms = delay.as_millis() as u64,
                    "retrying transient request failure"
                ),
            }
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// One dispatch: build the request, decorate with auth state, send, and
    /// buffer the response body, all within the per-attempt timeout.
    async fn attempt(
        &self,
        method: &Method,
        uri: &Uri,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<RawResponse, ClientError> {
        let mut request = Request::builder()
            .method(method.clone())
            .uri(uri.clone())
            .body(Full::new(body))?;
        *request.headers_mut() = headers.clone();
        if !request.headers().contains_key(USER_AGENT) {
            request
                .headers_mut()
                .insert(USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT));
        }
        self.decorate(request.headers_mut())?;

        let exchange = async {
            let response = self.client.request(request).await?;
            let (parts, body) = response.into_parts();
            let body = body.collect().await?.to_bytes();
            Ok::<_, ClientError>(RawResponse {
                status: parts.status,
                headers: parts.headers,
                body,
            })
        };

        match tokio::time::timeout(self.config.request_timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Timeout(self.config.request_timeout)),
        }
    }

    /// Install authentication state: the configured authenticator first,
    /// then refreshed bearer credentials.
    fn decorate(&self, headers: &mut HeaderMap) -> Result<(), ClientError> {
        if let Some(authenticator) = &self.config.authenticator {
            authenticator.authenticate(headers)?;
        }
        if let Some(provider) = &self.config.credentials {
            if !provider.is_valid() {
                tracing::debug!("refreshing expired credentials");
                provider.refresh()?;
            }
            let mut value = HeaderValue::from_str(&format!("Bearer {}", provider.token()))?;
            value.set_sensitive(true);
            headers.insert(http::header::AUTHORIZATION, value);
        }
        Ok(())
    }

    fn is_transient(&self, error: &ClientError) -> bool {
        matches!(
            error,
            ClientError::Transport(_) | ClientError::Timeout(_)
        ) || self
            .config
            .authenticator
            .as_ref()
            .is_some_and(|authenticator| authenticator.is_transient(error))
    }
}

fn parse_uri(url: &str) -> Result<Uri, ClientError> {
    url.parse().map_err(|err: http::uri::InvalidUri| {
        ClientError::InvalidUri {
            uri: url.to_owned(),
            reason: err.to_string(),
        }
    })
}

fn build_connector() -> Result<HttpsConnector<HttpConnector>, ClientError> {
    // Follow the reqwest pattern: reuse an installed process-wide provider,
    // otherwise fall back to aws-lc-rs without mutating global state.
    let provider = rustls::crypto::CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()));

    let builder = hyper_rustls::HttpsConnectorBuilder::new()
        .with_provider_and_webpki_roots(provider)
        .map_err(|err| ClientError::Tls(Box::new(err)))?;

    // Coordinators commonly listen on plain HTTP; scheme policy for
    // authenticated transports is enforced at client construction.
    Ok(builder.https_or_http().enable_all_versions().build())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Authenticator, CredentialProvider, PassthroughResolver};
    use crate::config::{RetryPolicy, Scheme};
    use crate::testserver;
    use httpmock::prelude::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn config(port: u16) -> ClientConfig {
        ClientConfig {
            host: "127.0.0.1".to_owned(),
            port,
            scheme: Scheme::Http,
            max_attempts: 3,
            request_timeout: Duration::from_secs(10),
            retry: RetryPolicy::immediate(),
            authenticator: None,
            redirect_resolver: None,
            credentials: None,
        }
    }

    fn transport(config: ClientConfig) -> HttpTransport {
        HttpTransport::new(Arc::new(config)).unwrap()
    }

    #[tokio::test]
    async fn post_sends_body_and_headers() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/v1/statement")
                .header("x-presto-user", "test")
                .body("SELECT 1");
            then.status(200).json_body(json!({"id": "q1", "stats": {}}));
        });

        let transport = transport(config(server.port()));
        let mut headers = HeaderMap::new();
        headers.insert("x-presto-user", HeaderValue::from_static("test"));

        let url = server.url("/v1/statement");
        let response = transport
            .post(&url, Bytes::from_static(b"SELECT 1"), headers)
            .await
            .unwrap();

        mock.assert();
        assert_eq!(response.status, StatusCode::OK);
        assert!(response.body.starts_with(b"{"));
    }

    #[tokio::test]
    async fn service_unavailable_is_retried_until_attempts_are_exhausted() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/v1/statement/q1/1");
            then.status(503);
        });

        let transport = transport(config(server.port()));
        let url = server.url("/v1/statement/q1/1");
        let response = transport.get(&url, HeaderMap::new()).await.unwrap();

        mock.assert_hits(3);
        assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn other_statuses_are_not_retried() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/gone");
            then.status(404);
        });

        let transport = transport(config(server.port()));
        let response = transport
            .get(&server.url("/gone"), HeaderMap::new())
            .await
            .unwrap();

        mock.assert_hits(1);
        assert_eq!(response.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn recovery_after_503_uses_exactly_the_configured_attempts() {
        let body = json!({"id": "q1", "stats": {}}).to_string();
        let (addr, handle) = testserver::scripted(vec![
            testserver::response(503, "Service Unavailable", ""),
            testserver::response(503, "Service Unavailable", ""),
            testserver::response(200, "OK", &body),
        ])
        .await;

        let transport = transport(config(addr.port()));
        let url = format!("http://{addr}/v1/statement");
        let response = transport
            .post(&url, Bytes::from_static(b"SELECT 1"), HeaderMap::new())
            .await
            .unwrap();

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(handle.await.unwrap(), 3);
    }

    #[tokio::test]
    async fn connection_errors_surface_as_transport_after_retries() {
        // Bind and immediately drop to find a port with no listener.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let transport = transport(config(port));
        let url = format!("http://127.0.0.1:{port}/v1/statement");
        let err = transport
            .post(&url, Bytes::from_static(b"SELECT 1"), HeaderMap::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::Transport(_)));
    }

    #[tokio::test]
    async fn redirect_resolver_chases_post_redirects() {
        let server = MockServer::start();
        let moved = server.mock(|when, then| {
            when.method(POST).path("/moved").body("SELECT 1");
            then.status(200).json_body(json!({"id": "q1", "stats": {}}));
        });
        let statement = server.mock(|when, then| {
            when.method(POST).path("/v1/statement");
            then.status(307).header("Location", server.url("/moved"));
        });

        let mut config = config(server.port());
        config.redirect_resolver = Some(Arc::new(PassthroughResolver));
        let transport = transport(config);

        let response = transport
            .post(
                &server.url("/v1/statement"),
                Bytes::from_static(b"SELECT 1"),
                HeaderMap::new(),
            )
            .await
            .unwrap();

        statement.assert();
        moved.assert();
        assert_eq!(response.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn without_resolver_redirects_pass_through() {
        let server = MockServer::start();
        let statement = server.mock(|when, then| {
            when.method(POST).path("/v1/statement");
            then.status(307).header("Location", server.url("/moved"));
        });

        let transport = transport(config(server.port()));
        let response = transport
            .post(
                &server.url("/v1/statement"),
                Bytes::from_static(b"SELECT 1"),
                HeaderMap::new(),
            )
            .await
            .unwrap();

        statement.assert();
        assert_eq!(response.status, StatusCode::TEMPORARY_REDIRECT);
    }

    #[derive(Debug)]
    struct FlakyAuthenticator {
        failures_left: AtomicUsize,
    }

    impl Authenticator for FlakyAuthenticator {
        fn authenticate(&self, headers: &mut HeaderMap) -> Result<(), ClientError> {
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(ClientError::Protocol("ticket expired".to_owned()));
            }
            headers.insert("x-authenticated", HeaderValue::from_static("yes"));
            Ok(())
        }

        fn is_transient(&self, error: &ClientError) -> bool {
            matches!(error, ClientError::Protocol(_))
        }
    }

    #[tokio::test]
    async fn authenticator_failures_participate_in_retry() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/poll").header("x-authenticated", "yes");
            then.status(200).json_body(json!({"id": "q1", "stats": {}}));
        });

        let mut config = config(server.port());
        config.authenticator = Some(Arc::new(FlakyAuthenticator {
            failures_left: AtomicUsize::new(1),
        }));
        let transport = transport(config);

        let response = transport
            .get(&server.url("/poll"), HeaderMap::new())
            .await
            .unwrap();

        mock.assert();
        assert_eq!(response.status, StatusCode::OK);
    }

    #[derive(Debug)]
    struct StaticProvider {
        valid: AtomicBool,
        refreshed: AtomicBool,
    }

    impl CredentialProvider for StaticProvider {
        fn is_valid(&self) -> bool {
            self.valid.load(Ordering::SeqCst)
        }

        fn token(&self) -> String {
            "tok-123".to_owned()
        }

        fn refresh(&self) -> Result<(), ClientError> {
            self.refreshed.store(true, Ordering::SeqCst);
            self.valid.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn expired_credentials_are_refreshed_and_installed() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/poll")
                .header("authorization", "Bearer tok-123");
            then.status(200).json_body(json!({"id": "q1", "stats": {}}));
        });

        let provider = Arc::new(StaticProvider {
            valid: AtomicBool::new(false),
            refreshed: AtomicBool::new(false),
        });
        let mut config = config(server.port());
        config.credentials = Some(provider.clone());
        let transport = transport(config);

        let response = transport
            .get(&server.url("/poll"), HeaderMap::new())
            .await
            .unwrap();

        mock.assert();
        assert_eq!(response.status, StatusCode::OK);
        assert!(provider.refreshed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn invalid_url_is_rejected() {
        let transport = transport(config(8080));
        let err = transport
            .get("http://[", HeaderMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::InvalidUri { .. }));
    }
}
