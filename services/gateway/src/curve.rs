//! NIST P-256 primitive wiring.
//!
//! The signer crate only defines the [`CurveSigner`] contract; this module
//! binds it to the platform ECDSA implementation.

use egw_signer::{CurveSigner, RAW_SIGNATURE_LEN, SignError};
use p256::ecdsa::signature::hazmat::PrehashSigner;
use p256::ecdsa::{Signature, SigningKey};

/// ECDSA over secp256r1.
pub struct P256Curve;

impl CurveSigner for P256Curve {
    fn sign(&self, key: &[u8; 32], digest: &[u8; 32]) -> Result<[u8; RAW_SIGNATURE_LEN], SignError> {
        let signing_key =
            SigningKey::from_bytes(key.into()).map_err(|e| SignError::Primitive(e.to_string()))?;
        let signature: Signature = signing_key
            .sign_prehash(digest)
            .map_err(|e| SignError::Primitive(e.to_string()))?;
        let mut raw = [0u8; RAW_SIGNATURE_LEN];
        raw.copy_from_slice(&signature.to_bytes());
        Ok(raw)
    }
}

/// Derive the uncompressed public key (128 hex chars, no `04` prefix) from
/// the provisioned private key. Used when the config omits the public key.
pub fn derive_public_key_hex(private_key_hex: &str) -> Option<String> {
    let bytes = hex::decode(private_key_hex.trim()).ok()?;
    let key: [u8; 32] = bytes.try_into().ok()?;
    let signing_key = SigningKey::from_bytes(&key.into()).ok()?;
    let point = signing_key.verifying_key().to_encoded_point(false);
    // Skip the 0x04 uncompressed-point marker.
    Some(hex::encode(&point.as_bytes()[1..]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use egw_signer::Signer;
    use std::sync::Arc;

    const KEY: &str = "4cc43b88635b9eaf81655ed51e062fab4a46296d72f01fc6fd853b08f0c2383a";

    #[test]
    fn signatures_have_the_raw_shape() {
        let signer = Signer::new(KEY, Arc::new(P256Curve)).unwrap();
        let hex_sig = signer.sign_hex("egw-001:1745760120").unwrap();
        assert_eq!(hex_sig.len(), 128);
    }

    #[test]
    fn public_key_derivation_is_stable() {
        let a = derive_public_key_hex(KEY).unwrap();
        let b = derive_public_key_hex(KEY).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 128);
    }

    #[test]
    fn bad_private_key_yields_none() {
        assert!(derive_public_key_hex("zz").is_none());
        assert!(derive_public_key_hex(&"00".repeat(32)).is_none());
    }
}
