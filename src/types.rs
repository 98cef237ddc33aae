use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};

/// Opaque identifier for one cross-device login attempt.
///
/// Created by the server when a QR login starts; consumed by the push
/// channel on this device and by the accept endpoint on the confirming
/// device. One handle maps to at most one open channel at a time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Into)]
#[serde(transparent)]
pub struct LoginHandle(pub String);

impl LoginHandle {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for LoginHandle {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Short human-readable code paired with a [`LoginHandle`], entered on the
/// confirming device as an alternative to scanning the QR link.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Into)]
#[serde(transparent)]
pub struct LoginCode(pub String);

impl LoginCode {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for LoginCode {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_handle_serde_transparent() {
        let handle = LoginHandle::from("abc");
        let json = serde_json::to_string(&handle).unwrap();
        assert_eq!(json, "\"abc\"");
        let parsed: LoginHandle = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, handle);
    }

    #[test]
    fn newtypes_prevent_mixing() {
        fn takes_handle(_: &LoginHandle) {}
        fn takes_code(_: &LoginCode) {}

        let handle = LoginHandle::from("id");
        let code = LoginCode::from("id");

        takes_handle(&handle);
        takes_code(&code);
        // takes_handle(&code);  // Compile error!
        // takes_code(&handle);  // Compile error!
    }
}
