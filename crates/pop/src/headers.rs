//! PoP header extraction.
//!
//! Parsing rejects missing or malformed headers before any signature work,
//! so unauthenticated garbage never reaches the crypto or the nonce store.

use prg_domain::error::{ErrorCode, GatewayError};

use crate::canonical::POP_VERSION;

pub const HEADER_VERSION: &str = "x-pop-v";
pub const HEADER_APP_ID: &str = "x-app-id";
pub const HEADER_TS: &str = "x-ts";
pub const HEADER_NONCE: &str = "x-nonce";
pub const HEADER_SIG: &str = "x-sig";

/// Minimum accepted nonce length (characters).
pub const MIN_NONCE_LEN: usize = 16;

/// The parsed, syntactically valid PoP headers of one request.
#[derive(Debug, Clone)]
pub struct PopHeaders {
    pub app_id: String,
    /// Seconds since the Unix epoch, as signed by the client.
    pub ts: i64,
    pub nonce: String,
    /// Standard-base64 Ed25519 signature, still undecoded.
    pub sig: String,
}

impl PopHeaders {
    /// Parse PoP headers through a lookup closure, so callers can hand in
    /// any header map without this crate depending on an HTTP library.
    pub fn parse<'a, F>(mut get: F) -> Result<PopHeaders, GatewayError>
    where
        F: FnMut(&'static str) -> Option<&'a str>,
    {
        let version = get(HEADER_VERSION)
            .ok_or_else(|| missing(HEADER_VERSION))?
            .trim();
        if version != POP_VERSION {
            return Err(GatewayError::new(
                ErrorCode::ErrUnsupportedPopVersion,
                format!("unsupported PoP version '{version}' (expected {POP_VERSION})"),
            ));
        }

        let app_id = get(HEADER_APP_ID).ok_or_else(|| missing(HEADER_APP_ID))?.trim();
        if app_id.is_empty() {
            return Err(malformed(HEADER_APP_ID, "empty"));
        }

        let ts_raw = get(HEADER_TS).ok_or_else(|| missing(HEADER_TS))?.trim();
        let ts: i64 = ts_raw
            .parse()
            .map_err(|_| malformed(HEADER_TS, "not a decimal Unix timestamp"))?;

        let nonce = get(HEADER_NONCE).ok_or_else(|| missing(HEADER_NONCE))?.trim();
        if nonce.len() < MIN_NONCE_LEN {
            return Err(malformed(HEADER_NONCE, "shorter than 16 characters"));
        }
        if !nonce
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        {
            return Err(malformed(HEADER_NONCE, "not URL-safe"));
        }

        let sig = get(HEADER_SIG).ok_or_else(|| missing(HEADER_SIG))?.trim();
        if sig.is_empty() {
            return Err(malformed(HEADER_SIG, "empty"));
        }

        Ok(PopHeaders {
            app_id: app_id.to_string(),
            ts,
            nonce: nonce.to_string(),
            sig: sig.to_string(),
        })
    }
}

fn missing(header: &str) -> GatewayError {
    GatewayError::new(
        ErrorCode::ErrMissingAuth,
        format!("missing required header '{header}'"),
    )
}

fn malformed(header: &str, why: &str) -> GatewayError {
    GatewayError::new(
        ErrorCode::ErrMissingAuth,
        format!("malformed header '{header}': {why}"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn headers(pairs: &[(&'static str, &str)]) -> HashMap<&'static str, String> {
        pairs.iter().map(|(k, v)| (*k, v.to_string())).collect()
    }

    fn parse(map: &HashMap<&'static str, String>) -> Result<PopHeaders, GatewayError> {
        PopHeaders::parse(|name| map.get(name).map(|s| s.as_str()))
    }

    fn valid() -> HashMap<&'static str, String> {
        headers(&[
            (HEADER_VERSION, "1"),
            (HEADER_APP_ID, "app_123"),
            (HEADER_TS, "1700000000"),
            (HEADER_NONCE, "abcdef0123456789"),
            (HEADER_SIG, "c2ln"),
        ])
    }

    #[test]
    fn parses_valid_headers() {
        let h = parse(&valid()).unwrap();
        assert_eq!(h.app_id, "app_123");
        assert_eq!(h.ts, 1_700_000_000);
        assert_eq!(h.nonce, "abcdef0123456789");
    }

    #[test]
    fn each_missing_header_is_rejected() {
        for name in [HEADER_VERSION, HEADER_APP_ID, HEADER_TS, HEADER_NONCE, HEADER_SIG] {
            let mut map = valid();
            map.remove(name);
            // An absent version header is still "missing auth", not a
            // version mismatch.
            let err = parse(&map).unwrap_err();
            assert_eq!(err.code, ErrorCode::ErrMissingAuth, "header {name}");
        }
    }

    #[test]
    fn version_mismatch_is_distinct() {
        let mut map = valid();
        map.insert(HEADER_VERSION, "2".into());
        let err = parse(&map).unwrap_err();
        assert_eq!(err.code, ErrorCode::ErrUnsupportedPopVersion);
    }

    #[test]
    fn short_nonce_rejected() {
        let mut map = valid();
        map.insert(HEADER_NONCE, "tooshort".into());
        assert_eq!(parse(&map).unwrap_err().code, ErrorCode::ErrMissingAuth);
    }

    #[test]
    fn non_urlsafe_nonce_rejected() {
        let mut map = valid();
        map.insert(HEADER_NONCE, "abcdef01234567+=".into());
        assert!(parse(&map).is_err());
    }

    #[test]
    fn non_numeric_ts_rejected() {
        let mut map = valid();
        map.insert(HEADER_TS, "yesterday".into());
        assert!(parse(&map).is_err());
    }
}
