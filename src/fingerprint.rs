use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::Rng;

/// Generates an opaque per-device fingerprint value.
///
/// Returns a 22-character URL-safe string (16 random bytes → base64url).
/// The value carries no device traits; it only lets the server correlate
/// requests from the same client session.
#[must_use]
pub fn generate_fingerprint() -> String {
    let random_bytes: [u8; 16] = rand::rng().random();
    URL_SAFE_NO_PAD.encode(random_bytes)
}
