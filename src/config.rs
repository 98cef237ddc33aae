use std::time::Duration;

use url::Url;

use crate::error::Error;

/// Default timeout for ordinary API calls.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default timeout for the liveness probe.
pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_secs(3);

/// Default delay before the push channel reconnects after a transport error.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Session/auth API configuration.
///
/// Required fields are constructor parameters — no runtime "missing field"
/// errors.
///
/// ```rust,ignore
/// use handoff_auth::SessionConfig;
///
/// let config = SessionConfig::new(
///     "https://api.example.com".parse()?,
///     "https://app.example.com".parse()?,
/// );
/// // Optional overrides via chaining:
/// let config = config.with_timeout(std::time::Duration::from_secs(10));
/// ```
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct SessionConfig {
    pub(crate) api_url: Url,
    pub(crate) front_url: Url,
    pub(crate) timeout: Duration,
    pub(crate) ping_timeout: Duration,
    pub(crate) reconnect_delay: Duration,
    pub(crate) refresh_path: String,
    pub(crate) login_path: String,
    pub(crate) fingerprint: Option<String>,
}

impl SessionConfig {
    /// Create a new configuration.
    ///
    /// `api_url` is the API origin every call is issued against; `front_url`
    /// is the web-app origin embedded in cross-device QR links.
    #[must_use]
    pub fn new(api_url: Url, front_url: Url) -> Self {
        Self {
            api_url,
            front_url,
            timeout: DEFAULT_TIMEOUT,
            ping_timeout: DEFAULT_PING_TIMEOUT,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            refresh_path: "/api/v1/auth/token/get-tokens".into(),
            login_path: "/api/v1/auth/login/webapp".into(),
            fingerprint: None,
        }
    }

    /// Create configuration from environment variables.
    ///
    /// # Required env vars
    /// - `SESSION_API_URL`: API origin (must be a valid URL)
    /// - `SESSION_FRONT_URL`: web-app origin for QR links (must be a valid URL)
    ///
    /// # Optional env vars
    /// - `SESSION_TIMEOUT_MS`: request timeout in milliseconds
    /// - `SESSION_PING_TIMEOUT_MS`: liveness-probe timeout in milliseconds
    /// - `SESSION_RECONNECT_DELAY_MS`: push-channel reconnect delay
    /// - `SESSION_FINGERPRINT`: fixed per-device fingerprint value
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if required env vars are missing or values
    /// are invalid.
    pub fn from_env() -> Result<Self, Error> {
        let api_url: Url = std::env::var("SESSION_API_URL")
            .map_err(|_| Error::Config("SESSION_API_URL is required".into()))?
            .parse()
            .map_err(|e| Error::Config(format!("SESSION_API_URL: {e}")))?;
        let front_url: Url = std::env::var("SESSION_FRONT_URL")
            .map_err(|_| Error::Config("SESSION_FRONT_URL is required".into()))?
            .parse()
            .map_err(|e| Error::Config(format!("SESSION_FRONT_URL: {e}")))?;

        let mut config = Self::new(api_url, front_url);

        if let Ok(ms) = std::env::var("SESSION_TIMEOUT_MS") {
            let ms: u64 = ms
                .parse()
                .map_err(|e| Error::Config(format!("SESSION_TIMEOUT_MS: {e}")))?;
            config = config.with_timeout(Duration::from_millis(ms));
        }
        if let Ok(ms) = std::env::var("SESSION_PING_TIMEOUT_MS") {
            let ms: u64 = ms
                .parse()
                .map_err(|e| Error::Config(format!("SESSION_PING_TIMEOUT_MS: {e}")))?;
            config = config.with_ping_timeout(Duration::from_millis(ms));
        }
        if let Ok(ms) = std::env::var("SESSION_RECONNECT_DELAY_MS") {
            let ms: u64 = ms
                .parse()
                .map_err(|e| Error::Config(format!("SESSION_RECONNECT_DELAY_MS: {e}")))?;
            config = config.with_reconnect_delay(Duration::from_millis(ms));
        }
        if let Ok(fp) = std::env::var("SESSION_FINGERPRINT") {
            config = config.with_fingerprint(fp);
        }

        Ok(config)
    }

    /// Override the request timeout (default 5 seconds).
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Override the liveness-probe timeout (default 3 seconds).
    #[must_use]
    pub fn with_ping_timeout(mut self, timeout: Duration) -> Self {
        self.ping_timeout = timeout;
        self
    }

    /// Override the push-channel reconnect delay (default 1 second).
    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Override the silent-refresh endpoint path.
    ///
    /// Older server revisions expose `/api/v1/auth/token/refresh` or
    /// `/api/v1/auth/token/recreate-tokens` instead of the default.
    #[must_use]
    pub fn with_refresh_path(mut self, path: impl Into<String>) -> Self {
        self.refresh_path = path.into();
        self
    }

    /// Override the interactive-login endpoint path.
    #[must_use]
    pub fn with_login_path(mut self, path: impl Into<String>) -> Self {
        self.login_path = path.into();
        self
    }

    /// Supply a fixed per-device fingerprint instead of a generated one.
    #[must_use]
    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }

    /// API origin.
    #[must_use]
    pub fn api_url(&self) -> &Url {
        &self.api_url
    }

    /// Web-app origin used for QR links.
    #[must_use]
    pub fn front_url(&self) -> &Url {
        &self.front_url
    }

    /// Request timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Push-channel reconnect delay.
    #[must_use]
    pub fn reconnect_delay(&self) -> Duration {
        self.reconnect_delay
    }
}
