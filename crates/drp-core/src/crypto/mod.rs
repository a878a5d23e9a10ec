//! Signing and verification capabilities.
//!
//! Vertices are signed with Ed25519 by their author. Finality votes are BLS
//! signatures over the vertex hash that aggregate into one certificate.
//! Public keys travel as standard base64 inside [`DrpPublicCredential`].

mod bls;
mod keychain;

use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;

pub use bls::{BLS_DST, Bls};
pub use keychain::Keychain;

/// Errors from key handling and signature primitives.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("bls operation failed: {0}")]
    Bls(String),
}

impl CryptoError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidKey(_) | Self::Base64(_) => ErrorCode::InvalidKey,
            Self::Bls(_) => ErrorCode::SignatureVerificationFailed,
        }
    }
}

/// Public half of a peer's keys as carried in the ACL.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrpPublicCredential {
    pub ed25519_public_key: String,
    pub bls_public_key: String,
}

/// Verifier side of an aggregatable signature scheme.
pub trait AggregateSignatureScheme: Send + Sync + fmt::Debug {
    fn verify(&self, public_key: &[u8], message: &[u8], signature: &[u8]) -> bool;

    /// Combine signatures over the same message into one.
    ///
    /// # Errors
    ///
    /// Returns an error if any input is not a valid signature.
    fn aggregate(&self, signatures: &[&[u8]]) -> Result<Vec<u8>, CryptoError>;

    fn verify_aggregate(&self, public_keys: &[&[u8]], message: &[u8], signature: &[u8]) -> bool;
}

/// Decode a standard base64 string.
///
/// # Errors
///
/// Returns an error for malformed input.
pub fn decode_base64(text: &str) -> Result<Vec<u8>, CryptoError> {
    Ok(STANDARD.decode(text)?)
}

#[must_use]
pub fn encode_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Check an Ed25519 signature against a base64 public key.
///
/// # Errors
///
/// Returns an error if the key cannot be decoded. A well-formed key with a
/// bad signature yields `Ok(false)`.
pub fn verify_ed25519(
    public_key: &str,
    message: &[u8],
    signature: &[u8],
) -> Result<bool, CryptoError> {
    let bytes = decode_base64(public_key)?;
    let bytes: [u8; 32] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| CryptoError::InvalidKey("ed25519 public key must be 32 bytes".into()))?;
    let key =
        VerifyingKey::from_bytes(&bytes).map_err(|err| CryptoError::InvalidKey(err.to_string()))?;
    let Ok(signature) = Signature::from_slice(signature) else {
        return Ok(false);
    };
    Ok(key.verify(message, &signature).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ed25519_round_trip_and_tamper() {
        let keys = Keychain::from_seed(b"peer-a").unwrap();
        let credential = keys.public_credential();
        let signature = keys.sign_with_ed25519(b"hash");

        assert!(verify_ed25519(&credential.ed25519_public_key, b"hash", &signature).unwrap());
        assert!(!verify_ed25519(&credential.ed25519_public_key, b"other", &signature).unwrap());
        assert!(!verify_ed25519(&credential.ed25519_public_key, b"hash", &[1, 2, 3]).unwrap());
    }

    #[test]
    fn ed25519_rejects_malformed_keys() {
        assert!(verify_ed25519("not base64!", b"m", &[]).is_err());
        let short = encode_base64(&[0_u8; 8]);
        let err = verify_ed25519(&short, b"m", &[]).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidKey);
    }

    #[test]
    fn credential_serializes_camel_case() {
        let credential = DrpPublicCredential {
            ed25519_public_key: "e".into(),
            bls_public_key: "b".into(),
        };
        let text = serde_json::to_string(&credential).unwrap();
        assert_eq!(text, r#"{"ed25519PublicKey":"e","blsPublicKey":"b"}"#);
    }
}
