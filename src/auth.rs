use std::fmt;

use base64::prelude::{BASE64_STANDARD, Engine as _};
use http::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use http::uri::Uri;

use crate::error::ClientError;

/// Installs authentication state on outgoing requests.
///
/// Implementations decorate request headers (bearer tokens, negotiated
/// tickets, basic credentials) and classify which of their failures are
/// transient. Transient failures participate in the transport's retry
/// policy alongside connection and timeout errors.
pub trait Authenticator: fmt::Debug + Send + Sync {
    /// Add authentication headers to an outgoing request.
    ///
    /// Called once per attempt, so refreshed credentials are picked up by
    /// retries.
    fn authenticate(&self, headers: &mut HeaderMap) -> Result<(), ClientError>;

    /// Whether `error` is a transient failure of this authentication
    /// scheme that is worth retrying.
    fn is_transient(&self, error: &ClientError) -> bool {
        let _ = error;
        false
    }
}

/// HTTP Basic authentication. Only usable over TLS; client construction
/// rejects any authenticator on a plaintext scheme.
#[derive(Clone)]
pub struct BasicAuthenticator {
    username: String,
    password: String,
}

impl BasicAuthenticator {
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for BasicAuthenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicAuthenticator")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Authenticator for BasicAuthenticator {
    fn authenticate(&self, headers: &mut HeaderMap) -> Result<(), ClientError> {
        let credentials = BASE64_STANDARD.encode(format!("{}:{}", self.username, self.password));
        let mut value = HeaderValue::from_str(&format!("Basic {credentials}"))?;
        value.set_sensitive(true);
        headers.insert(AUTHORIZATION, value);
        Ok(())
    }
}

/// Maps a redirect `Location` to the URL the statement should be
/// re-submitted to, e.g. when a gateway fronts several coordinators.
pub trait RedirectResolver: fmt::Debug + Send + Sync {
    /// Resolve `location` into the next submission target, or refuse the
    /// redirect with an error.
    fn resolve(&self, location: &str) -> Result<Uri, ClientError>;
}

/// Resolver that follows the `Location` header verbatim.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughResolver;

impl RedirectResolver for PassthroughResolver {
    fn resolve(&self, location: &str) -> Result<Uri, ClientError> {
        location.parse().map_err(|err: http::uri::InvalidUri| {
            ClientError::InvalidUri {
                uri: location.to_owned(),
                reason: err.to_string(),
            }
        })
    }
}

/// Source of refreshable bearer credentials.
///
/// When configured, the transport checks validity before each dispatch,
/// refreshes an expired token, and installs it as the `Authorization`
/// header of the request.
pub trait CredentialProvider: fmt::Debug + Send + Sync {
    /// Whether the current token is still usable.
    fn is_valid(&self) -> bool;

    /// The current bearer token.
    fn token(&self) -> String;

    /// Obtain a fresh token.
    fn refresh(&self) -> Result<(), ClientError>;
}
