#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error ({status}): {detail}")]
    Status { status: u16, detail: String },
    #[error("login denied: {0}")]
    Denied(String),
    #[error("login channel cancelled")]
    Cancelled,
    #[error("malformed push event: {0}")]
    Protocol(String),
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// HTTP status carried by this error, if any.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Whether this is a 401-class authentication failure.
    #[must_use]
    pub fn is_auth_failure(&self) -> bool {
        self.status() == Some(401)
    }
}
