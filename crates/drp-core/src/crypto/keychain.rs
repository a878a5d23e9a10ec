use std::fmt;

use blst::min_pk::SecretKey;
use ed25519_dalek::{Signer, SigningKey};
use sha2::{Digest, Sha256};

use super::{BLS_DST, CryptoError, DrpPublicCredential, encode_base64};

/// A peer's private keys: Ed25519 for vertices, BLS for finality votes.
pub struct Keychain {
    ed25519: SigningKey,
    bls: SecretKey,
}

impl fmt::Debug for Keychain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keychain")
            .field("public", &self.public_credential())
            .finish_non_exhaustive()
    }
}

impl Keychain {
    /// Derive both keys from a seed. SHA-256 of the seed is the Ed25519
    /// secret and the BLS key material.
    ///
    /// # Errors
    ///
    /// Returns an error if BLS key generation rejects the material.
    pub fn from_seed(seed: &[u8]) -> Result<Self, CryptoError> {
        let mut material = [0_u8; 32];
        material.copy_from_slice(&Sha256::digest(seed));
        let bls = SecretKey::key_gen(&material, &[])
            .map_err(|err| CryptoError::Bls(format!("{err:?}")))?;
        Ok(Self {
            ed25519: SigningKey::from_bytes(&material),
            bls,
        })
    }

    /// Keys from a random seed.
    ///
    /// # Errors
    ///
    /// See [`Keychain::from_seed`].
    pub fn generate() -> Result<Self, CryptoError> {
        let seed: [u8; 32] = rand::random();
        Self::from_seed(&seed)
    }

    #[must_use]
    pub fn public_credential(&self) -> DrpPublicCredential {
        DrpPublicCredential {
            ed25519_public_key: encode_base64(self.ed25519.verifying_key().as_bytes()),
            bls_public_key: encode_base64(&self.bls.sk_to_pk().to_bytes()),
        }
    }

    #[must_use]
    pub fn sign_with_ed25519(&self, message: &[u8]) -> Vec<u8> {
        self.ed25519.sign(message).to_bytes().to_vec()
    }

    #[must_use]
    pub fn sign_with_bls(&self, message: &[u8]) -> Vec<u8> {
        self.bls.sign(message, BLS_DST, &[]).to_bytes().to_vec()
    }
}
