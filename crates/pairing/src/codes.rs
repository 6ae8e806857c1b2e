//! Connect-code and session-token generation.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::rngs::OsRng;
use rand::RngCore;

/// A fresh connect code: 16 random bytes (128 bits, above the 96-bit floor),
/// URL-safe base64 → 22 characters.
pub fn new_connect_code() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// A fresh session token. Purely a correlation handle: it is never accepted
/// on the data plane and derives no key material.
pub fn new_session_token() -> String {
    let mut bytes = [0u8; 24];
    OsRng.fill_bytes(&mut bytes);
    format!("cs_{}", URL_SAFE_NO_PAD.encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn codes_are_long_and_urlsafe() {
        let code = new_connect_code();
        assert!(code.len() >= 16);
        assert!(code
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_'));
    }

    #[test]
    fn codes_do_not_collide_cheaply() {
        let codes: HashSet<String> = (0..1000).map(|_| new_connect_code()).collect();
        assert_eq!(codes.len(), 1000);
    }

    #[test]
    fn session_tokens_are_prefixed() {
        assert!(new_session_token().starts_with("cs_"));
    }
}
