use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::config::SessionConfig;
use crate::error::Error;
use crate::fingerprint::generate_fingerprint;
use crate::token::{mask_token, TokenState};

/// Name of the opaque per-device header attached to every request.
pub const FINGERPRINT_HEADER: &str = "Fingerprint";

/// A captured outbound call: method, path, optional JSON body, and the
/// single-use retry flag the refresh interceptor consumes.
///
/// The flag transitions `false → true` at most once; a request that has
/// already been replayed is never replayed again, whatever its outcome.
#[derive(Debug)]
pub struct ApiRequest {
    pub(crate) method: Method,
    pub(crate) path: String,
    pub(crate) body: Option<JsonValue>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) retried: bool,
}

impl ApiRequest {
    /// A GET request for the given API path.
    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            path: path.into(),
            body: None,
            timeout: None,
            retried: false,
        }
    }

    /// A POST request with a JSON body.
    #[must_use]
    pub fn post(path: impl Into<String>, body: JsonValue) -> Self {
        Self {
            method: Method::POST,
            path: path.into(),
            body: Some(body),
            timeout: None,
            retried: false,
        }
    }

    /// Override the per-request timeout (e.g. the shortened ping probe).
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Response token: bytes already read off the wire plus the status.
#[derive(Debug)]
pub struct ApiResponse {
    status: StatusCode,
    body: Vec<u8>,
}

impl ApiResponse {
    /// HTTP status of the (successful) response.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Decode the response body as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the body is not valid JSON for `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, Error> {
        serde_json::from_slice(&self.body).map_err(|e| Error::Protocol(e.to_string()))
    }
}

/// Silent-refresh response payload.
#[derive(Debug, Clone, Deserialize)]
#[non_exhaustive]
pub struct AccessResponse {
    pub access_token: String,
    #[serde(default)]
    pub detail: Option<String>,
}

/// Configured HTTP transport every API call goes through.
///
/// Holds the shared `reqwest::Client` (base timeout, cookie store for the
/// server-held refresh session) and a reference to [`TokenState`]. The
/// `Authorization` and `Fingerprint` headers are derived from token state on
/// every dispatch, so a `set()` affects the very next call.
#[derive(Debug, Clone)]
pub struct Transport {
    http: reqwest::Client,
    config: SessionConfig,
    tokens: Arc<TokenState>,
}

impl Transport {
    /// Build a transport for the given configuration.
    ///
    /// Installs the configured fingerprint (or generates one) into token
    /// state; the value then rides on every request for the process
    /// lifetime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the HTTP client cannot be constructed.
    pub fn new(config: SessionConfig, tokens: Arc<TokenState>) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .cookie_store(true)
            .default_headers({
                let mut headers = reqwest::header::HeaderMap::new();
                headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                headers
            })
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;

        let fingerprint = config
            .fingerprint
            .clone()
            .unwrap_or_else(generate_fingerprint);
        tokens.set_fingerprint(fingerprint);

        Ok(Self {
            http,
            config,
            tokens,
        })
    }

    /// Use a custom HTTP client (for connection pool reuse or testing).
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    /// Shared token state.
    #[must_use]
    pub fn tokens(&self) -> &Arc<TokenState> {
        &self.tokens
    }

    /// Transport configuration.
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Issue a request through the refresh interceptor.
    ///
    /// Any response that is not a 401 passes through unchanged. On a 401,
    /// if the request has not been replayed before and does not target the
    /// refresh or login endpoint, the transport performs one silent refresh
    /// and re-dispatches the request with the new bearer; the outcome of
    /// that replay is returned verbatim, even if it fails with another 401.
    ///
    /// # Errors
    ///
    /// - [`Error::Http`] on network failure.
    /// - [`Error::Status`] for non-success responses, including a failed
    ///   refresh attempt (the caller sees a rejection, never a panic).
    pub async fn execute(&self, mut request: ApiRequest) -> Result<ApiResponse, Error> {
        let response = self.dispatch(&request).await?;

        if response.status() == StatusCode::UNAUTHORIZED
            && !request.retried
            && !self.is_refresh_exempt(&request.path)
        {
            request.retried = true;
            debug!(path = %request.path, "authentication failure, attempting silent refresh");

            match self.refresh_access_token().await {
                Ok(_) => {
                    let replay = self.dispatch(&request).await?;
                    return Self::read_response(replay).await;
                }
                Err(e) => {
                    warn!(path = %request.path, error = %e, "silent refresh failed");
                    return Err(e);
                }
            }
        }

        Self::read_response(response).await
    }

    /// Call the token-renewal endpoint and install the returned token.
    ///
    /// This is a raw dispatch — it never goes back through [`execute`]
    /// (`Self::execute`), so a 401 from the refresh endpoint cannot recurse.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Status`] if the server rejects the refresh, or
    /// [`Error::Http`]/[`Error::Protocol`] on transport or decode failure.
    pub async fn refresh_access_token(&self) -> Result<String, Error> {
        let request = ApiRequest::get(self.config.refresh_path.clone());
        let response = self.dispatch(&request).await?;
        let response = Self::read_response(response).await?;

        let payload: AccessResponse = response.json()?;
        self.tokens.set(Some(payload.access_token.clone()));
        debug!(
            token_preview = %mask_token(&payload.access_token),
            "access token refreshed"
        );
        Ok(payload.access_token)
    }

    /// One network call, no interception, no retries.
    async fn dispatch(&self, request: &ApiRequest) -> Result<reqwest::Response, Error> {
        let url = self
            .config
            .api_url
            .join(&request.path)
            .map_err(|e| Error::Config(format!("invalid request path {}: {e}", request.path)))?;

        let mut builder = self.http.request(request.method.clone(), url);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(bearer) = self.tokens.bearer() {
            builder = builder.header(AUTHORIZATION, bearer);
        }
        if let Some(fingerprint) = self.tokens.fingerprint() {
            builder = builder.header(FINGERPRINT_HEADER, fingerprint);
        }

        Ok(builder.send().await?)
    }

    /// Endpoints the interceptor must never refresh for.
    ///
    /// The allow-list (not the retry flag) is what breaks recursion: a 401
    /// from the refresh or login endpoint itself propagates as-is.
    fn is_refresh_exempt(&self, path: &str) -> bool {
        path.contains(&self.config.refresh_path) || path.contains(&self.config.login_path)
    }

    async fn read_response(response: reqwest::Response) -> Result<ApiResponse, Error> {
        let status = response.status();
        let body = response.bytes().await?.to_vec();

        if status.is_success() {
            return Ok(ApiResponse { status, body });
        }

        let detail = String::from_utf8_lossy(&body).into_owned();
        Err(Error::Status {
            status: status.as_u16(),
            detail,
        })
    }
}
