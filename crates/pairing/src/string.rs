//! The pairing string: `pair::<proxyUrl>::<connectCode>`.

use prg_domain::error::{ErrorCode, GatewayError};
use url::Url;

/// Minimum connect-code length in characters.
pub const MIN_CODE_LEN: usize = 16;

/// A parsed, validated pairing string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingString {
    pub proxy_url: Url,
    pub connect_code: String,
}

pub fn build_pairing_string(proxy_url: &str, connect_code: &str) -> String {
    format!("pair::{proxy_url}::{connect_code}")
}

/// Parse and validate `pair::<proxyUrl>::<connectCode>`.
///
/// The URL may itself contain `::` (IPv6 hosts), so the code is taken from
/// the last `::` separator, not the first.
pub fn parse_pairing_string(raw: &str) -> Result<PairingString, GatewayError> {
    let invalid =
        |why: &str| GatewayError::new(ErrorCode::ErrInvalidPairingString, format!("pairing string: {why}"));

    let rest = raw
        .strip_prefix("pair::")
        .ok_or_else(|| invalid("must start with 'pair::'"))?;

    let (url_part, code) = rest
        .rsplit_once("::")
        .ok_or_else(|| invalid("expected three '::'-separated parts"))?;
    if code.len() < MIN_CODE_LEN {
        return Err(invalid("connect code shorter than 16 characters"));
    }

    let proxy_url = Url::parse(url_part).map_err(|_| invalid("proxy URL is not absolute"))?;
    if !matches!(proxy_url.scheme(), "http" | "https") {
        return Err(invalid("proxy URL must be http(s)"));
    }

    Ok(PairingString {
        proxy_url,
        connect_code: code.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let raw = build_pairing_string("https://gw.example.net", "abcdef0123456789abcdef");
        let parsed = parse_pairing_string(&raw).unwrap();
        assert_eq!(parsed.proxy_url.as_str(), "https://gw.example.net/");
        assert_eq!(parsed.connect_code, "abcdef0123456789abcdef");
    }

    #[test]
    fn rejects_malformed_strings() {
        for raw in [
            "pear::https://x::abcdef0123456789",
            "pair::https://x",
            "pair::not a url::abcdef0123456789",
            "pair::ftp://x::abcdef0123456789",
            "pair::https://x::short",
            "",
        ] {
            let err = parse_pairing_string(raw).unwrap_err();
            assert_eq!(err.code, ErrorCode::ErrInvalidPairingString, "{raw}");
        }
    }

    #[test]
    fn url_with_port_and_path() {
        let parsed =
            parse_pairing_string("pair::http://127.0.0.1:8420::abcdef0123456789").unwrap();
        assert_eq!(parsed.proxy_url.port(), Some(8420));
    }
}
