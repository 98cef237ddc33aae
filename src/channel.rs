use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::ACCEPT;
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::config::SessionConfig;
use crate::error::Error;
use crate::event::{next_data_payload, LoginEvent, DEFAULT_DENIAL_MESSAGE};
use crate::token::{mask_token, TokenState};
use crate::types::LoginHandle;

/// Push-channel endpoint prefix; the login handle is appended.
const SSE_CHECK_PATH: &str = "/api/v1/auth/sse/check/";

/// Lifecycle of one push login channel.
///
/// `Connecting → Open → {Resolved | Rejected | Reconnecting}`;
/// `Reconnecting → Connecting` after the backoff delay. `Cancelled` is
/// reachable from any non-terminal state and, like the other terminal
/// states, is never left again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ChannelState {
    Connecting,
    Open,
    Reconnecting,
    Resolved,
    Rejected,
    Cancelled,
}

impl ChannelState {
    /// Terminal states admit no further transitions.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Resolved | Self::Rejected | Self::Cancelled)
    }
}

/// The single-use slot holding the result sender. Whoever `take()`s it —
/// the channel task on a terminal event, or [`LoginCancel::cancel`] —
/// owns the only path to resolution.
type ResultSlot = Arc<Mutex<Option<oneshot::Sender<Result<String, Error>>>>>;

/// Clonable cancellation handle for a [`PushLogin`].
#[derive(Debug, Clone)]
pub struct LoginCancel {
    token: CancellationToken,
    slot: ResultSlot,
    state: Arc<watch::Sender<ChannelState>>,
}

impl LoginCancel {
    /// Cancel the login channel.
    ///
    /// Idempotent and safe to call at any time: the result sender is taken
    /// first, so no resolution or rejection can fire afterwards even for an
    /// event already in flight; the channel task then tears down its
    /// connection and any pending reconnect timer.
    pub fn cancel(&self) {
        let taken = self
            .slot
            .lock()
            .expect("result slot poisoned")
            .take()
            .is_some();
        if taken {
            debug!("push login channel cancelled");
        }
        advance(&self.state, ChannelState::Cancelled);
        self.token.cancel();
    }
}

/// A live cross-device login confirmation channel.
///
/// Returned by [`PushLogin::open`]; [`wait`](Self::wait) yields the access
/// token once the login is confirmed on the other device. The underlying
/// connection reconnects transparently after transport errors and is torn
/// down on success, denial, timeout, or cancellation.
#[derive(Debug)]
pub struct PushLogin {
    handle: LoginHandle,
    result_rx: oneshot::Receiver<Result<String, Error>>,
    state_rx: watch::Receiver<ChannelState>,
    cancel: LoginCancel,
}

impl PushLogin {
    /// Open a push channel for the given login handle.
    ///
    /// The connection runs on a background task; by the time [`wait`]
    /// (`Self::wait`) observes success, the token is already stored in
    /// `tokens`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the channel URL or HTTP client cannot
    /// be constructed. Transport failures after this point are handled by
    /// reconnecting, not surfaced here.
    pub fn open(
        config: &SessionConfig,
        tokens: Arc<TokenState>,
        handle: LoginHandle,
    ) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build push channel client: {e}")))?;
        let url = config
            .api_url
            .join(&format!("{SSE_CHECK_PATH}{}", handle.as_str()))
            .map_err(|e| Error::Config(format!("invalid login handle {handle}: {e}")))?;

        let (result_tx, result_rx) = oneshot::channel();
        let (state_tx, state_rx) = watch::channel(ChannelState::Connecting);
        let state = Arc::new(state_tx);
        let slot: ResultSlot = Arc::new(Mutex::new(Some(result_tx)));
        let token = CancellationToken::new();

        let cancel = LoginCancel {
            token: token.clone(),
            slot: slot.clone(),
            state: state.clone(),
        };

        tokio::spawn(run(
            http,
            url,
            tokens,
            config.reconnect_delay,
            slot,
            state,
            token,
            handle.clone(),
        ));

        Ok(Self {
            handle,
            result_rx,
            state_rx,
            cancel,
        })
    }

    /// The login handle this channel observes.
    #[must_use]
    pub fn handle(&self) -> &LoginHandle {
        &self.handle
    }

    /// Current channel state.
    #[must_use]
    pub fn state(&self) -> ChannelState {
        *self.state_rx.borrow()
    }

    /// Watch receiver for state transitions.
    #[must_use]
    pub fn state_watch(&self) -> watch::Receiver<ChannelState> {
        self.state_rx.clone()
    }

    /// Clonable handle for cancelling the channel from elsewhere.
    #[must_use]
    pub fn canceller(&self) -> LoginCancel {
        self.cancel.clone()
    }

    /// Cancel the channel. See [`LoginCancel::cancel`].
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the login to settle.
    ///
    /// # Errors
    ///
    /// - [`Error::Denied`] when the server denies the login or it times out.
    /// - [`Error::Cancelled`] when the channel was cancelled.
    pub async fn wait(self) -> Result<String, Error> {
        match self.result_rx.await {
            Ok(result) => result,
            // Sender taken by cancel() and dropped without sending.
            Err(_) => Err(Error::Cancelled),
        }
    }
}

/// Move the state machine forward; terminal states are never overwritten.
fn advance(state: &watch::Sender<ChannelState>, next: ChannelState) {
    state.send_if_modified(|current| {
        if current.is_terminal() || *current == next {
            false
        } else {
            *current = next;
            true
        }
    });
}

/// Settle the eventual result exactly once.
///
/// Taking the sender before any side effect means a channel that was
/// cancelled in the meantime performs neither the token store nor the
/// resolution.
fn settle(
    slot: &ResultSlot,
    state: &watch::Sender<ChannelState>,
    tokens: &TokenState,
    result: Result<String, Error>,
) {
    let Some(tx) = slot.lock().expect("result slot poisoned").take() else {
        return;
    };
    match &result {
        Ok(token) => {
            // Token state is updated before resolution is observable.
            tokens.set(Some(token.clone()));
            debug!(token_preview = %mask_token(token), "push login resolved");
            advance(state, ChannelState::Resolved);
        }
        Err(e) => {
            debug!(error = %e, "push login rejected");
            advance(state, ChannelState::Rejected);
        }
    }
    let _ = tx.send(result);
}

/// Outcome of one connection attempt.
enum Attempt {
    /// A terminal event arrived; the channel is done.
    Settled(Result<String, Error>),
    /// Transport-level failure; reconnect after the backoff delay.
    Retry(Error),
}

#[allow(clippy::too_many_arguments)]
async fn run(
    http: reqwest::Client,
    url: Url,
    tokens: Arc<TokenState>,
    reconnect_delay: Duration,
    slot: ResultSlot,
    state: Arc<watch::Sender<ChannelState>>,
    token: CancellationToken,
    handle: LoginHandle,
) {
    loop {
        advance(&state, ChannelState::Connecting);

        let outcome = tokio::select! {
            () = token.cancelled() => return,
            outcome = attempt(&http, &url, &state) => outcome,
        };

        match outcome {
            Attempt::Settled(result) => {
                settle(&slot, &state, &tokens, result);
                return;
            }
            Attempt::Retry(e) => {
                warn!(login_handle = %handle, error = %e, "push channel error, reconnecting");
                advance(&state, ChannelState::Reconnecting);
                tokio::select! {
                    () = token.cancelled() => return,
                    () = tokio::time::sleep(reconnect_delay) => {}
                }
            }
        }
    }
}

/// One connection: open the stream and read events until something settles
/// the channel or the transport fails.
async fn attempt(
    http: &reqwest::Client,
    url: &Url,
    state: &watch::Sender<ChannelState>,
) -> Attempt {
    let response = match http
        .get(url.clone())
        .header(ACCEPT, "text/event-stream")
        .send()
        .await
    {
        Ok(response) => response,
        Err(e) => return Attempt::Retry(e.into()),
    };

    if !response.status().is_success() {
        return Attempt::Retry(Error::Status {
            status: response.status().as_u16(),
            detail: "push channel connection rejected".into(),
        });
    }

    advance(state, ChannelState::Open);

    let mut stream = response.bytes_stream();
    let mut bytes: Vec<u8> = Vec::new();
    let mut buffer = String::new();

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => return Attempt::Retry(e.into()),
        };
        bytes.extend_from_slice(&chunk);

        // Feed only the valid UTF-8 prefix; an incomplete multi-byte
        // sequence stays buffered for the next chunk.
        let valid = match std::str::from_utf8(&bytes) {
            Ok(s) => s.len(),
            Err(e) => e.valid_up_to(),
        };
        buffer.push_str(std::str::from_utf8(&bytes[..valid]).expect("validated prefix"));
        bytes.drain(..valid);

        while let Some(payload) = next_data_payload(&mut buffer) {
            match LoginEvent::parse(&payload) {
                Ok(LoginEvent::AuthSuccess { access_token }) => {
                    return Attempt::Settled(Ok(access_token));
                }
                Ok(LoginEvent::AuthDenied { message } | LoginEvent::Timeout { message }) => {
                    let message = message.unwrap_or_else(|| DEFAULT_DENIAL_MESSAGE.to_owned());
                    return Attempt::Settled(Err(Error::Denied(message)));
                }
                // Malformed payloads count as transport failures.
                Err(e) => return Attempt::Retry(e),
            }
        }
    }

    Attempt::Retry(Error::Protocol(
        "push channel closed without a terminal event".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts() -> (ResultSlot, Arc<watch::Sender<ChannelState>>, Arc<TokenState>) {
        let (result_tx, _result_rx) = oneshot::channel();
        let (state_tx, _state_rx) = watch::channel(ChannelState::Connecting);
        (
            Arc::new(Mutex::new(Some(result_tx))),
            Arc::new(state_tx),
            Arc::new(TokenState::new()),
        )
    }

    #[test]
    fn terminal_states() {
        assert!(ChannelState::Resolved.is_terminal());
        assert!(ChannelState::Rejected.is_terminal());
        assert!(ChannelState::Cancelled.is_terminal());
        assert!(!ChannelState::Connecting.is_terminal());
        assert!(!ChannelState::Open.is_terminal());
        assert!(!ChannelState::Reconnecting.is_terminal());
    }

    #[test]
    fn advance_refuses_to_leave_terminal_state() {
        let (state_tx, state_rx) = watch::channel(ChannelState::Connecting);
        advance(&state_tx, ChannelState::Cancelled);
        advance(&state_tx, ChannelState::Reconnecting);
        assert_eq!(*state_rx.borrow(), ChannelState::Cancelled);
    }

    #[test]
    fn settle_success_stores_token_first() {
        let (slot, state, tokens) = parts();
        settle(&slot, &state, &tokens, Ok("T1".into()));
        assert_eq!(tokens.get().as_deref(), Some("T1"));
        assert_eq!(*state.borrow(), ChannelState::Resolved);
    }

    #[test]
    fn settle_after_cancel_is_a_no_op() {
        let (slot, state, tokens) = parts();
        let cancel = LoginCancel {
            token: CancellationToken::new(),
            slot: slot.clone(),
            state: state.clone(),
        };
        cancel.cancel();
        settle(&slot, &state, &tokens, Ok("T1".into()));

        // Neither the token store nor the state transition happened.
        assert!(tokens.get().is_none());
        assert_eq!(*state.borrow(), ChannelState::Cancelled);
    }

    #[test]
    fn cancel_is_idempotent() {
        let (slot, state, _tokens) = parts();
        let cancel = LoginCancel {
            token: CancellationToken::new(),
            slot,
            state: state.clone(),
        };
        cancel.cancel();
        cancel.cancel();
        assert_eq!(*state.borrow(), ChannelState::Cancelled);
        assert!(cancel.token.is_cancelled());
    }

    #[test]
    fn settle_rejection_leaves_token_empty() {
        let (slot, state, tokens) = parts();
        settle(&slot, &state, &tokens, Err(Error::Denied("expired".into())));
        assert!(tokens.get().is_none());
        assert_eq!(*state.borrow(), ChannelState::Rejected);
    }
}
