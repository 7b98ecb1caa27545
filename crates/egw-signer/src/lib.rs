//! egw-signer: compact-token signing for the gateway.
//!
//! Produces the three signature shapes the backend contract needs:
//! compact web tokens (`header.payload.signature`, base64url without
//! padding), raw 64-byte `r||s` signatures as lowercase hex, and
//! DER-encoded signatures as hex.
//!
//! The P-256 scalar operation itself is NOT implemented here. The device
//! key is provisioned at manufacture and the curve arithmetic lives with
//! the platform crypto engine, reached through [`CurveSigner`]. This crate
//! hashes the message with SHA-256 and hands the digest to the primitive.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Length of a raw P-256 signature (`r` and `s`, 32 bytes each).
pub const RAW_SIGNATURE_LEN: usize = 64;

/// Errors surfaced by signing operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignError {
    #[error("private key is not 64 hex characters")]
    BadKey,
    #[error("curve primitive failed: {0}")]
    Primitive(String),
}

/// The external NIST P-256 primitive.
///
/// Contract: given the 32-byte private scalar and a 32-byte message digest,
/// produce the raw 64-byte `r||s` signature.
pub trait CurveSigner: Send + Sync {
    fn sign(&self, key: &[u8; 32], digest: &[u8; 32]) -> Result<[u8; RAW_SIGNATURE_LEN], SignError>;
}

/// Stateless, thread-safe signer bound to one device key.
#[derive(Clone)]
pub struct Signer {
    key: [u8; 32],
    curve: Arc<dyn CurveSigner>,
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material.
        f.debug_struct("Signer").finish_non_exhaustive()
    }
}

impl Signer {
    /// Create a signer from the provisioned private key (64 hex chars).
    pub fn new(private_key_hex: &str, curve: Arc<dyn CurveSigner>) -> Result<Self, SignError> {
        let bytes = hex::decode(private_key_hex.trim()).map_err(|_| SignError::BadKey)?;
        let key: [u8; 32] = bytes.try_into().map_err(|_| SignError::BadKey)?;
        Ok(Signer { key, curve })
    }

    fn sign_raw(&self, data: &[u8]) -> Result<[u8; RAW_SIGNATURE_LEN], SignError> {
        let digest: [u8; 32] = Sha256::digest(data).into();
        self.curve.sign(&self.key, &digest)
    }

    /// Build a compact token from two JSON fragments:
    /// `b64url(header) . b64url(payload) . b64url(raw_signature)`.
    ///
    /// The signature covers the first two dot-joined segments, and every
    /// segment uses the URL-safe alphabet with no padding.
    pub fn sign_jwt(&self, header_json: &str, payload_json: &str) -> Result<String, SignError> {
        let header = URL_SAFE_NO_PAD.encode(header_json.as_bytes());
        let payload = URL_SAFE_NO_PAD.encode(payload_json.as_bytes());
        let signing_input = format!("{header}.{payload}");

        let sig = self.sign_raw(signing_input.as_bytes())?;
        Ok(format!("{signing_input}.{}", URL_SAFE_NO_PAD.encode(sig)))
    }

    /// Sign `data` and return the raw signature as 128 lowercase hex chars.
    pub fn sign_hex(&self, data: &str) -> Result<String, SignError> {
        Ok(hex::encode(self.sign_raw(data.as_bytes())?))
    }

    /// Sign `data` and return the DER-encoded signature as hex.
    pub fn sign_der_hex(&self, data: &str) -> Result<String, SignError> {
        Ok(hex::encode(der_encode(&self.sign_raw(data.as_bytes())?)))
    }
}

/// Encode a raw `r||s` signature as a DER SEQUENCE of two INTEGERs.
///
/// Leading zero bytes are stripped from each integer as long as the next
/// byte does not have its high bit set (which would flip the sign).
fn der_encode(sig: &[u8; RAW_SIGNATURE_LEN]) -> Vec<u8> {
    let r = trim_integer(&sig[..32]);
    let s = trim_integer(&sig[32..]);

    let mut der = Vec::with_capacity(6 + r.len() + s.len());
    der.push(0x30);
    der.push((2 + r.len() + 2 + s.len()) as u8);
    der.push(0x02);
    der.push(r.len() as u8);
    der.extend_from_slice(r);
    der.push(0x02);
    der.push(s.len() as u8);
    der.extend_from_slice(s);
    der
}

fn trim_integer(mut bytes: &[u8]) -> &[u8] {
    while bytes.len() > 1 && bytes[0] == 0x00 && bytes[1] & 0x80 == 0 {
        bytes = &bytes[1..];
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Deterministic stand-in for the platform primitive: the "signature"
    /// is the digest twice. Enough structure to verify the encodings.
    struct EchoCurve;

    impl CurveSigner for EchoCurve {
        fn sign(
            &self,
            _key: &[u8; 32],
            digest: &[u8; 32],
        ) -> Result<[u8; RAW_SIGNATURE_LEN], SignError> {
            let mut out = [0u8; RAW_SIGNATURE_LEN];
            out[..32].copy_from_slice(digest);
            out[32..].copy_from_slice(digest);
            Ok(out)
        }
    }

    /// Returns a fixed signature so the DER shape is predictable.
    struct FixedCurve([u8; RAW_SIGNATURE_LEN]);

    impl CurveSigner for FixedCurve {
        fn sign(
            &self,
            _key: &[u8; 32],
            _digest: &[u8; 32],
        ) -> Result<[u8; RAW_SIGNATURE_LEN], SignError> {
            Ok(self.0)
        }
    }

    const KEY: &str = "4cc43b88635b9eaf81655ed51e062fab4a46296d72f01fc6fd853b08f0c2383a";

    fn signer() -> Signer {
        Signer::new(KEY, Arc::new(EchoCurve)).unwrap()
    }

    #[test]
    fn jwt_splits_into_three_decodable_segments() {
        let header = r#"{"alg":"ES256","typ":"JWT"}"#;
        let payload = r#"{"a":1}"#;
        let token = signer().sign_jwt(header, payload).unwrap();

        let parts: Vec<&str> = token.split('.').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(URL_SAFE_NO_PAD.decode(parts[0]).unwrap(), header.as_bytes());
        assert_eq!(
            URL_SAFE_NO_PAD.decode(parts[1]).unwrap(),
            payload.as_bytes()
        );
        // 64 raw bytes encode to 86 unpadded base64url characters.
        assert_eq!(parts[2].len(), 86);
        assert!(!token.contains('='));
        assert!(
            parts[2]
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        );
    }

    #[test]
    fn jwt_signature_covers_header_dot_payload() {
        let token = signer().sign_jwt("{}", "{}").unwrap();
        let parts: Vec<&str> = token.split('.').collect();

        let expected: [u8; 32] =
            Sha256::digest(format!("{}.{}", parts[0], parts[1]).as_bytes()).into();
        let sig = URL_SAFE_NO_PAD.decode(parts[2]).unwrap();
        assert_eq!(&sig[..32], expected.as_slice());
        assert_eq!(&sig[32..], expected.as_slice());
    }

    #[test]
    fn hex_signature_is_128_lowercase_chars() {
        let hex_sig = signer().sign_hex("device-id:2025-04-27T13:22:00").unwrap();
        assert_eq!(hex_sig.len(), 128);
        assert!(
            hex_sig
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        );
    }

    #[test]
    fn der_encoding_without_stripping() {
        let mut raw = [0u8; RAW_SIGNATURE_LEN];
        raw[0] = 0x7F; // r starts with a non-zero, high bit clear
        raw[32] = 0x7E;
        let signer = Signer::new(KEY, Arc::new(FixedCurve(raw))).unwrap();

        let der = hex::decode(signer.sign_der_hex("x").unwrap()).unwrap();
        assert_eq!(der[0], 0x30);
        assert_eq!(der[1] as usize, der.len() - 2);
        assert_eq!(der[2], 0x02);
        assert_eq!(der[3], 32); // nothing stripped
    }

    #[test]
    fn der_encoding_strips_leading_zeros() {
        let mut raw = [0u8; RAW_SIGNATURE_LEN];
        // r = 0x0000..01 (31 leading zeros), s = 0x00 80 .. (zero kept
        // because the next byte has the high bit set).
        raw[31] = 0x01;
        raw[33] = 0x80;
        let signer = Signer::new(KEY, Arc::new(FixedCurve(raw))).unwrap();

        let der = hex::decode(signer.sign_der_hex("x").unwrap()).unwrap();
        assert_eq!(der[2], 0x02);
        assert_eq!(der[3], 1); // r shrank to one byte
        assert_eq!(der[4], 0x01);
        assert_eq!(der[5], 0x02);
        assert_eq!(der[6], 32); // s kept its sign-preserving zero
        assert_eq!(der[7], 0x00);
        assert_eq!(der[8], 0x80);
    }

    #[test]
    fn bad_key_material_is_rejected() {
        assert_eq!(
            Signer::new("not-hex", Arc::new(EchoCurve)).unwrap_err(),
            SignError::BadKey
        );
        assert_eq!(
            Signer::new("aabb", Arc::new(EchoCurve)).unwrap_err(),
            SignError::BadKey
        );
    }
}
