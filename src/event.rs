use serde::Deserialize;

use crate::error::Error;

/// Fallback message when a denial or timeout event carries none.
pub const DEFAULT_DENIAL_MESSAGE: &str = "Login denied or timed out.";

/// One status-change event emitted on the push login channel.
///
/// The server sends a single JSON object per SSE message:
/// `{"type":"auth_success","access_token":...}`,
/// `{"type":"auth_denied","message":...}` or
/// `{"type":"timeout","message":...}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum LoginEvent {
    AuthSuccess {
        access_token: String,
    },
    AuthDenied {
        #[serde(default)]
        message: Option<String>,
    },
    Timeout {
        #[serde(default)]
        message: Option<String>,
    },
}

impl LoginEvent {
    /// Parse one event payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] for malformed JSON, unrecognized event
    /// types, or a success event missing its token. The channel treats
    /// these like transport failures and reconnects.
    pub fn parse(data: &str) -> Result<Self, Error> {
        serde_json::from_str(data).map_err(|e| Error::Protocol(e.to_string()))
    }
}

/// Extracts the next complete SSE data payload from `buffer`.
///
/// SSE frames are delimited by a blank line; `data:` lines within a frame
/// are concatenated with newlines. Frames without data (comments,
/// keep-alives) are skipped. Returns `None` when no complete frame remains;
/// the caller keeps the partial tail in `buffer` for the next chunk.
pub(crate) fn next_data_payload(buffer: &mut String) -> Option<String> {
    loop {
        let (end, delim) = frame_boundary(buffer)?;
        let frame = buffer[..end].to_string();
        buffer.drain(..end + delim);

        let mut data_lines: Vec<&str> = Vec::new();
        for line in frame.lines() {
            if let Some(rest) = line.strip_prefix("data:") {
                data_lines.push(rest.strip_prefix(' ').unwrap_or(rest));
            }
        }

        if !data_lines.is_empty() {
            return Some(data_lines.join("\n"));
        }
    }
}

/// Position and length of the earliest frame delimiter, if any.
fn frame_boundary(buffer: &str) -> Option<(usize, usize)> {
    let lf = buffer.find("\n\n").map(|i| (i, 2));
    let crlf = buffer.find("\r\n\r\n").map(|i| (i, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 < b.0 { a } else { b }),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_auth_success() {
        let event = LoginEvent::parse(r#"{"type":"auth_success","access_token":"T1"}"#).unwrap();
        assert_eq!(
            event,
            LoginEvent::AuthSuccess {
                access_token: "T1".into()
            }
        );
    }

    #[test]
    fn parse_denial_with_message() {
        let event = LoginEvent::parse(r#"{"type":"auth_denied","message":"nope"}"#).unwrap();
        assert_eq!(
            event,
            LoginEvent::AuthDenied {
                message: Some("nope".into())
            }
        );
    }

    #[test]
    fn parse_timeout_without_message() {
        let event = LoginEvent::parse(r#"{"type":"timeout"}"#).unwrap();
        assert_eq!(event, LoginEvent::Timeout { message: None });
    }

    #[test]
    fn parse_rejects_unknown_type() {
        assert!(matches!(
            LoginEvent::parse(r#"{"type":"hello"}"#),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn parse_rejects_success_without_token() {
        assert!(matches!(
            LoginEvent::parse(r#"{"type":"auth_success"}"#),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn extracts_single_frame() {
        let mut buffer = "data: {\"type\":\"timeout\"}\n\n".to_string();
        assert_eq!(
            next_data_payload(&mut buffer).as_deref(),
            Some("{\"type\":\"timeout\"}")
        );
        assert!(buffer.is_empty());
    }

    #[test]
    fn keeps_partial_frame_in_buffer() {
        let mut buffer = "data: {\"type\":".to_string();
        assert!(next_data_payload(&mut buffer).is_none());
        assert_eq!(buffer, "data: {\"type\":");
    }

    #[test]
    fn skips_comment_frames() {
        let mut buffer = ": keep-alive\n\ndata: x\n\n".to_string();
        assert_eq!(next_data_payload(&mut buffer).as_deref(), Some("x"));
    }

    #[test]
    fn handles_crlf_delimiters() {
        let mut buffer = "data: x\r\n\r\ndata: y\r\n\r\n".to_string();
        assert_eq!(next_data_payload(&mut buffer).as_deref(), Some("x"));
        assert_eq!(next_data_payload(&mut buffer).as_deref(), Some("y"));
    }

    #[test]
    fn joins_multiline_data() {
        let mut buffer = "data: a\ndata: b\n\n".to_string();
        assert_eq!(next_data_payload(&mut buffer).as_deref(), Some("a\nb"));
    }

    #[test]
    fn ignores_event_and_id_fields() {
        let mut buffer = "event: message\nid: 7\ndata: x\n\n".to_string();
        assert_eq!(next_data_payload(&mut buffer).as_deref(), Some("x"));
    }
}
