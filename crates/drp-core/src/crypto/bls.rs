use blst::BLST_ERROR;
use blst::min_pk::{AggregateSignature, PublicKey, Signature};

use super::{AggregateSignatureScheme, CryptoError};

/// Domain separation tag of the proof-of-possession BLS ciphersuite.
pub const BLS_DST: &[u8] = b"BLS_SIG_BLS12381G2_XMD:SHA-256_SSWU_RO_POP_";

/// BLS12-381 with public keys in G1 and signatures in G2.
#[derive(Debug, Clone, Copy, Default)]
pub struct Bls;

impl AggregateSignatureScheme for Bls {
    fn verify(&self, public_key: &[u8], message: &[u8], signature: &[u8]) -> bool {
        let (Ok(public_key), Ok(signature)) =
            (PublicKey::from_bytes(public_key), Signature::from_bytes(signature))
        else {
            return false;
        };
        signature.verify(true, message, BLS_DST, &[], &public_key, true) == BLST_ERROR::BLST_SUCCESS
    }

    fn aggregate(&self, signatures: &[&[u8]]) -> Result<Vec<u8>, CryptoError> {
        let parsed = signatures
            .iter()
            .map(|bytes| Signature::from_bytes(bytes))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| CryptoError::Bls(format!("{err:?}")))?;
        let refs: Vec<&Signature> = parsed.iter().collect();
        let aggregate = AggregateSignature::aggregate(&refs, true)
            .map_err(|err| CryptoError::Bls(format!("{err:?}")))?;
        Ok(aggregate.to_signature().to_bytes().to_vec())
    }

    fn verify_aggregate(&self, public_keys: &[&[u8]], message: &[u8], signature: &[u8]) -> bool {
        let Ok(signature) = Signature::from_bytes(signature) else {
            return false;
        };
        let Ok(keys) = public_keys
            .iter()
            .map(|bytes| PublicKey::from_bytes(bytes))
            .collect::<Result<Vec<_>, _>>()
        else {
            return false;
        };
        if keys.is_empty() {
            return false;
        }
        let refs: Vec<&PublicKey> = keys.iter().collect();
        signature.fast_aggregate_verify(true, message, BLS_DST, &refs) == BLST_ERROR::BLST_SUCCESS
    }
}
