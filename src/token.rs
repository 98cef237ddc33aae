use std::sync::RwLock;

/// In-memory access-token state shared by the transport and the push channel.
///
/// The token is deliberately not persisted: the refresh session lives in an
/// httponly cookie the server manages, so a fresh process recovers by calling
/// the silent-refresh endpoint. `set()` is a single synchronous step; the
/// next request dispatched through [`Transport`](crate::transport::Transport)
/// observes the new value immediately.
#[derive(Debug, Default)]
pub struct TokenState {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    access_token: Option<String>,
    fingerprint: Option<String>,
}

impl TokenState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current access token, if one is installed.
    #[must_use]
    pub fn get(&self) -> Option<String> {
        self.inner.read().expect("token lock poisoned").access_token.clone()
    }

    /// Install or clear the access token.
    ///
    /// When `Some`, every subsequent transport dispatch carries
    /// `Authorization: Bearer <token>`; when `None`, the header is dropped.
    pub fn set(&self, token: Option<String>) {
        self.inner.write().expect("token lock poisoned").access_token = token;
    }

    /// `Authorization` header value for the current token.
    #[must_use]
    pub fn bearer(&self) -> Option<String> {
        self.get().map(|t| format!("Bearer {t}"))
    }

    /// Opaque per-device fingerprint attached to every request.
    #[must_use]
    pub fn fingerprint(&self) -> Option<String> {
        self.inner.read().expect("token lock poisoned").fingerprint.clone()
    }

    pub fn set_fingerprint(&self, fingerprint: impl Into<String>) {
        self.inner.write().expect("token lock poisoned").fingerprint = Some(fingerprint.into());
    }
}

/// Masks a token for safe logging: first four characters, then asterisks.
#[must_use]
pub fn mask_token(token: &str) -> String {
    if token.len() <= 4 {
        "*".repeat(token.len())
    } else {
        format!("{}****", &token[..4])
    }
}
