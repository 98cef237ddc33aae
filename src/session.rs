use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};
use url::Url;

use crate::channel::PushLogin;
use crate::config::SessionConfig;
use crate::error::Error;
use crate::token::TokenState;
use crate::transport::{AccessResponse, ApiRequest, Transport};
use crate::types::{LoginCode, LoginHandle};

const AUTH_BASE: &str = "/api/v1/auth";

/// The authenticated principal returned by the check endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[non_exhaustive]
pub struct AuthenticatedUser {
    pub id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub created_at: Option<time::OffsetDateTime>,
}

#[derive(Debug, Deserialize)]
struct CheckResponse {
    user: AuthenticatedUser,
}

#[derive(Debug, Deserialize)]
struct QrResponse {
    login_id: LoginHandle,
    code: LoginCode,
}

/// One-time recovery code for moving a session to another account store.
#[derive(Debug, Clone, Deserialize)]
#[non_exhaustive]
pub struct RecoveryCode {
    pub code: String,
    #[serde(default)]
    pub detail: Option<String>,
}

/// Everything needed to drive one cross-device login attempt.
#[derive(Debug)]
#[non_exhaustive]
pub struct QrLogin {
    /// Server-created handle for this attempt.
    pub handle: LoginHandle,
    /// Short code the confirming device can enter instead of scanning.
    pub code: LoginCode,
    /// Frontend accept link to render as a QR image.
    pub qr_url: Url,
    /// Live confirmation channel; `wait()` yields the access token.
    pub channel: PushLogin,
}

/// Named session operations composing transport, token state, and the push
/// login channel.
///
/// Every operation returns a boolean or option rather than an error (except
/// [`start_qr_login`](Self::start_qr_login), whose caller needs the handle
/// and code payload); navigation on failure is the caller's concern.
#[derive(Debug, Clone)]
pub struct SessionService {
    transport: Transport,
}

impl SessionService {
    /// Build a session service with a fresh token state.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the transport cannot be constructed.
    pub fn new(config: SessionConfig) -> Result<Self, Error> {
        let transport = Transport::new(config, Arc::new(TokenState::new()))?;
        Ok(Self { transport })
    }

    /// Build a session service around an existing transport (isolated token
    /// state per transport; nothing here is process-global).
    #[must_use]
    pub fn from_transport(transport: Transport) -> Self {
        Self { transport }
    }

    /// Shared token state.
    #[must_use]
    pub fn tokens(&self) -> &Arc<TokenState> {
        self.transport.tokens()
    }

    /// Underlying transport.
    #[must_use]
    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    // ── Interactive login ──────────────────────────────────────────────

    /// POST `/api/v1/auth/login/webapp` — exchange the app-provided
    /// credential for an access token. Stores the token on success.
    pub async fn login_webapp(&self, init_data: &str) -> bool {
        let request = ApiRequest::post(
            format!("{AUTH_BASE}/login/webapp"),
            json!({ "initData": init_data }),
        );
        match self.transport.execute(request).await {
            Ok(response) => match response.json::<AccessResponse>() {
                Ok(payload) => {
                    self.tokens().set(Some(payload.access_token));
                    true
                }
                Err(e) => {
                    warn!(error = %e, "webapp login returned an unreadable payload");
                    false
                }
            },
            Err(e) => {
                warn!(error = %e, "webapp login failed");
                false
            }
        }
    }

    // ── Token lifecycle ────────────────────────────────────────────────

    /// GET the silent-refresh endpoint; stores the new access token.
    pub async fn refresh(&self) -> bool {
        match self.transport.refresh_access_token().await {
            Ok(_) => true,
            Err(e) => {
                debug!(error = %e, "silent refresh failed");
                false
            }
        }
    }

    /// GET `/api/v1/auth/token/revoke` — invalidate the refresh session.
    /// Clears the in-memory token on success.
    pub async fn revoke(&self) -> bool {
        let ok = self
            .simple_get(format!("{AUTH_BASE}/token/revoke"), "revoke")
            .await;
        if ok {
            self.tokens().set(None);
        }
        ok
    }

    /// GET `/api/v1/auth/check` — validate the current token and return the
    /// authenticated principal.
    pub async fn check(&self) -> Option<AuthenticatedUser> {
        let request = ApiRequest::get(format!("{AUTH_BASE}/check"));
        match self.transport.execute(request).await {
            Ok(response) => match response.json::<CheckResponse>() {
                Ok(payload) => Some(payload.user),
                Err(e) => {
                    warn!(error = %e, "check returned an unreadable principal");
                    None
                }
            },
            Err(e) => {
                debug!(error = %e, "session check failed");
                None
            }
        }
    }

    /// GET `/api/v1/ping` — liveness probe with a shortened timeout, used to
    /// tell an unreachable API apart from an unauthenticated session.
    pub async fn ping(&self) -> bool {
        let request =
            ApiRequest::get("/api/v1/ping").with_timeout(self.transport.config().ping_timeout);
        match self.transport.execute(request).await {
            Ok(_) => true,
            Err(e) => {
                debug!(error = %e, "ping failed");
                false
            }
        }
    }

    // ── Cross-device login ─────────────────────────────────────────────

    /// GET `/api/v1/auth/login/getqr` — obtain a login handle and short
    /// code, then open the push confirmation channel for that handle.
    ///
    /// # Errors
    ///
    /// Returns the transport or decode error when the handle cannot be
    /// obtained, or [`Error::Config`] if the channel cannot be opened.
    pub async fn start_qr_login(&self) -> Result<QrLogin, Error> {
        let request = ApiRequest::get(format!("{AUTH_BASE}/login/getqr"));
        let response = self.transport.execute(request).await?;
        let payload: QrResponse = response.json()?;

        let qr_url = qr_accept_url(self.transport.config().front_url(), &payload.login_id)?;
        let channel = PushLogin::open(
            self.transport.config(),
            Arc::clone(self.tokens()),
            payload.login_id.clone(),
        )?;

        Ok(QrLogin {
            handle: payload.login_id,
            code: payload.code,
            qr_url,
            channel,
        })
    }

    /// GET `/api/v1/auth/login/search/{handle}` — whether the attempt is
    /// still pending.
    pub async fn check_login(&self, handle: &LoginHandle) -> bool {
        self.simple_get(
            format!("{AUTH_BASE}/login/search/{}", handle.as_str()),
            "check login",
        )
        .await
    }

    /// GET `/api/v1/auth/login/accept/{handle}` — approve a pending login
    /// from the confirming device.
    pub async fn accept_login(&self, handle: &LoginHandle) -> bool {
        self.simple_get(
            format!("{AUTH_BASE}/login/accept/{}", handle.as_str()),
            "accept login",
        )
        .await
    }

    /// GET `/api/v1/auth/login/by-code/search/{code}` — whether a pending
    /// attempt exists for the short code.
    pub async fn search_by_code(&self, code: &LoginCode) -> bool {
        self.simple_get(
            format!("{AUTH_BASE}/login/by-code/search/{}", code.as_str()),
            "search by code",
        )
        .await
    }

    /// GET `/api/v1/auth/login/by-code/accept/{code}` — approve a pending
    /// login by its short code.
    pub async fn accept_by_code(&self, code: &LoginCode) -> bool {
        self.simple_get(
            format!("{AUTH_BASE}/login/by-code/accept/{}", code.as_str()),
            "accept by code",
        )
        .await
    }

    // ── Recovery ───────────────────────────────────────────────────────

    /// GET `/api/v1/auth/token/recovery` — generate a recovery code.
    pub async fn generate_recovery(&self) -> Option<RecoveryCode> {
        let request = ApiRequest::get(format!("{AUTH_BASE}/token/recovery"));
        match self.transport.execute(request).await {
            Ok(response) => match response.json::<RecoveryCode>() {
                Ok(code) => Some(code),
                Err(e) => {
                    warn!(error = %e, "recovery endpoint returned an unreadable payload");
                    None
                }
            },
            Err(e) => {
                warn!(error = %e, "recovery code generation failed");
                None
            }
        }
    }

    /// POST `/api/v1/auth/token/transfer` — redeem a recovery code.
    pub async fn transfer_user(&self, recovery_code: &str) -> bool {
        let request = ApiRequest::post(
            format!("{AUTH_BASE}/token/transfer"),
            json!({ "recovery_code": recovery_code }),
        );
        self.simple_call(request, "transfer user").await
    }

    // ── Helpers ────────────────────────────────────────────────────────

    async fn simple_get(&self, path: String, operation: &'static str) -> bool {
        self.simple_call(ApiRequest::get(path), operation).await
    }

    async fn simple_call(&self, request: ApiRequest, operation: &'static str) -> bool {
        match self.transport.execute(request).await {
            Ok(_) => true,
            Err(e) => {
                warn!(operation, error = %e, "session operation failed");
                false
            }
        }
    }
}

/// Frontend accept link for a login handle: the handle rides base64-encoded
/// in the `loginid` query parameter, mirroring what the accept page expects.
fn qr_accept_url(front_url: &Url, handle: &LoginHandle) -> Result<Url, Error> {
    let mut url = front_url
        .join("accept")
        .map_err(|e| Error::Config(format!("invalid front URL: {e}")))?;
    let encoded = STANDARD.encode(handle.as_str());
    url.set_query(Some(&format!("loginid={encoded}")));
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qr_accept_url_encodes_handle() {
        let front: Url = "https://app.example.com".parse().unwrap();
        let url = qr_accept_url(&front, &LoginHandle::from("abc")).unwrap();
        assert_eq!(url.as_str(), "https://app.example.com/accept?loginid=YWJj");
    }

    #[test]
    fn qr_accept_url_respects_front_path() {
        let front: Url = "https://example.com/app/".parse().unwrap();
        let url = qr_accept_url(&front, &LoginHandle::from("abc")).unwrap();
        assert_eq!(url.as_str(), "https://example.com/app/accept?loginid=YWJj");
    }

    #[test]
    fn recovery_code_deserializes_optional_detail() {
        let code: RecoveryCode = serde_json::from_str(r#"{"code":"R1"}"#).unwrap();
        assert_eq!(code.code, "R1");
        assert!(code.detail.is_none());
    }

    #[test]
    fn authenticated_user_tolerates_missing_fields() {
        let user: AuthenticatedUser = serde_json::from_str(r#"{"id":"u1"}"#).unwrap();
        assert_eq!(user.id, "u1");
        assert!(user.username.is_none());
        assert!(user.created_at.is_none());
    }

    #[test]
    fn authenticated_user_parses_created_at() {
        let user: AuthenticatedUser =
            serde_json::from_str(r#"{"id":"u1","created_at":"2024-05-01T10:00:00Z"}"#).unwrap();
        assert!(user.created_at.is_some());
    }
}
