//! Ed25519 signature and timestamp verification.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use ed25519_dalek::{Signature, VerifyingKey};
use prg_domain::error::{ErrorCode, GatewayError};

/// Decode a stored app public key (standard base64, exactly 32 bytes).
pub fn decode_public_key(public_key_b64: &str) -> Result<VerifyingKey, GatewayError> {
    let bytes = STANDARD.decode(public_key_b64).map_err(|_| {
        GatewayError::new(ErrorCode::ErrInvalidSignature, "public key is not valid base64")
    })?;
    let arr: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
        GatewayError::new(
            ErrorCode::ErrInvalidSignature,
            format!("public key must be 32 bytes, got {}", bytes.len()),
        )
    })?;
    VerifyingKey::from_bytes(&arr).map_err(|_| {
        GatewayError::new(ErrorCode::ErrInvalidSignature, "not a valid Ed25519 point")
    })
}

/// Verify the base64 `x-sig` value against the canonical string bytes.
pub fn verify_signature(
    public_key: &VerifyingKey,
    canonical: &str,
    sig_b64: &str,
) -> Result<(), GatewayError> {
    let sig_bytes = STANDARD.decode(sig_b64).map_err(|_| {
        GatewayError::new(ErrorCode::ErrInvalidSignature, "signature is not valid base64")
    })?;
    let arr: [u8; 64] = sig_bytes.as_slice().try_into().map_err(|_| {
        GatewayError::new(
            ErrorCode::ErrInvalidSignature,
            format!("signature must be 64 bytes, got {}", sig_bytes.len()),
        )
    })?;
    let signature = Signature::from_bytes(&arr);

    public_key
        .verify_strict(canonical.as_bytes(), &signature)
        .map_err(|_| GatewayError::new(ErrorCode::ErrInvalidSignature, "signature verification failed"))
}

/// Enforce the clock-skew window: `|now − ts| ≤ skew`.
pub fn check_timestamp(ts: i64, now: i64, skew_secs: u64) -> Result<(), GatewayError> {
    let skew = (now - ts).unsigned_abs();
    if skew > skew_secs {
        return Err(GatewayError::new(
            ErrorCode::ErrExpiredTimestamp,
            format!("timestamp {ts} outside ±{skew_secs}s window (now {now})"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::{body_hash, build_canonical};
    use ed25519_dalek::{Signer, SigningKey};
    use rand::rngs::OsRng;

    fn keypair() -> (SigningKey, String) {
        let sk = SigningKey::generate(&mut OsRng);
        let pk_b64 = STANDARD.encode(sk.verifying_key().as_bytes());
        (sk, pk_b64)
    }

    fn sign(sk: &SigningKey, canonical: &str) -> String {
        STANDARD.encode(sk.sign(canonical.as_bytes()).to_bytes())
    }

    #[test]
    fn round_trip_verifies() {
        let (sk, pk_b64) = keypair();
        let canonical = build_canonical(
            "POST",
            "/r/llm/groq/v1/chat/completions",
            "app_1",
            1_700_000_000,
            "abcdef0123456789",
            &body_hash(b"{}"),
        );
        let sig = sign(&sk, &canonical);
        let vk = decode_public_key(&pk_b64).unwrap();
        verify_signature(&vk, &canonical, &sig).unwrap();
    }

    #[test]
    fn tampered_canonical_fails() {
        let (sk, pk_b64) = keypair();
        let canonical = build_canonical("POST", "/p", "a", 1, "abcdef0123456789", "h");
        let sig = sign(&sk, &canonical);
        let vk = decode_public_key(&pk_b64).unwrap();
        let other = build_canonical("POST", "/p", "a", 2, "abcdef0123456789", "h");
        let err = verify_signature(&vk, &other, &sig).unwrap_err();
        assert_eq!(err.code, ErrorCode::ErrInvalidSignature);
    }

    #[test]
    fn wrong_key_fails() {
        let (sk, _) = keypair();
        let (_, other_pk) = keypair();
        let canonical = build_canonical("POST", "/p", "a", 1, "abcdef0123456789", "h");
        let sig = sign(&sk, &canonical);
        let vk = decode_public_key(&other_pk).unwrap();
        assert!(verify_signature(&vk, &canonical, &sig).is_err());
    }

    #[test]
    fn bad_key_material_rejected() {
        assert!(decode_public_key("!!!").is_err());
        assert!(decode_public_key(&STANDARD.encode([0u8; 31])).is_err());
    }

    #[test]
    fn skew_window_is_inclusive() {
        assert!(check_timestamp(1000, 1300, 300).is_ok());
        assert!(check_timestamp(1300, 1000, 300).is_ok());
        let err = check_timestamp(1000, 1301, 300).unwrap_err();
        assert_eq!(err.code, ErrorCode::ErrExpiredTimestamp);
        assert!(check_timestamp(1301, 1000, 300).is_err());
    }
}
