//! Finality: BLS quorum certificates over vertex hashes.
//!
//! Each vertex gets a [`FinalityState`] when it is admitted, with the
//! finality signers of the ACL as of that vertex. Votes only accumulate, so
//! once a state reaches its quorum it stays finalized.

mod attestation;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::FinalityConfig;
use crate::crypto::{AggregateSignatureScheme, Bls, CryptoError, DrpPublicCredential};
use crate::error::ErrorCode;
use crate::hashgraph::Hash;

pub use attestation::{AggregatedAttestation, Attestation, AttestationStore};

#[derive(Debug, thiserror::Error)]
pub enum FinalityError {
    #[error("peer {0} is not in the voter list")]
    UnknownVoter(String),

    #[error("invalid signature from {0}")]
    InvalidSignature(String),

    #[error("aggregate signature does not verify")]
    InvalidAggregate,

    #[error("attestation for {actual} applied to state of {expected}")]
    HashMismatch { expected: Hash, actual: Hash },

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

impl FinalityError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::UnknownVoter(_) => ErrorCode::UnknownVoter,
            Self::InvalidSignature(_) | Self::InvalidAggregate => {
                ErrorCode::SignatureVerificationFailed
            }
            Self::HashMismatch { .. } => ErrorCode::UnknownFinalityState,
            Self::Crypto(err) => err.code(),
        }
    }
}

/// The vote ledger of one vertex hash.
#[derive(Debug, Clone)]
pub struct FinalityState {
    data: Hash,
    store: AttestationStore,
}

impl FinalityState {
    #[must_use]
    pub fn new(hash: Hash, voters: &BTreeMap<String, DrpPublicCredential>) -> Self {
        Self {
            data: hash,
            store: AttestationStore::new(voters),
        }
    }

    #[must_use]
    pub fn data(&self) -> &Hash {
        &self.data
    }

    #[must_use]
    pub const fn store(&self) -> &AttestationStore {
        &self.store
    }

    /// `ceil(voters * threshold)`.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn quorum(&self, threshold: f64) -> usize {
        (self.store.voter_count() as f64 * threshold).ceil() as usize
    }

    #[must_use]
    pub fn is_finalized(&self, threshold: f64) -> bool {
        self.store.number_of_votes() >= self.quorum(threshold)
    }

    /// # Errors
    ///
    /// See [`AttestationStore::add_vote`].
    pub fn add_vote(
        &mut self,
        scheme: &dyn AggregateSignatureScheme,
        peer_id: &str,
        signature: &[u8],
        verify: bool,
    ) -> Result<bool, FinalityError> {
        self.store
            .add_vote(scheme, peer_id, self.data.as_bytes(), signature, verify)
    }

    /// Adopt a remote aggregate if no local signature exists yet.
    ///
    /// # Errors
    ///
    /// Fails on a hash mismatch or an aggregate that does not verify.
    pub fn merge(
        &mut self,
        scheme: &dyn AggregateSignatureScheme,
        attestation: &AggregatedAttestation,
    ) -> Result<bool, FinalityError> {
        if attestation.data != self.data {
            return Err(FinalityError::HashMismatch {
                expected: self.data.clone(),
                actual: attestation.data.clone(),
            });
        }
        self.store.adopt_aggregate(
            scheme,
            self.data.as_bytes(),
            &attestation.aggregation_bits,
            &attestation.signature,
        )
    }

    /// The current aggregate, if anyone has voted.
    #[must_use]
    pub fn attestation(&self) -> Option<AggregatedAttestation> {
        self.store.signature().map(|signature| AggregatedAttestation {
            data: self.data.clone(),
            aggregation_bits: self.store.aggregation_bits().to_bytes(),
            signature: signature.to_vec(),
        })
    }
}

/// Finality states of every known vertex.
#[derive(Clone)]
pub struct FinalityStore {
    states: HashMap<Hash, FinalityState>,
    finality_threshold: f64,
    scheme: Arc<dyn AggregateSignatureScheme>,
}

impl fmt::Debug for FinalityStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FinalityStore")
            .field("states", &self.states.len())
            .field("finality_threshold", &self.finality_threshold)
            .field("scheme", &self.scheme)
            .finish()
    }
}

impl Default for FinalityStore {
    fn default() -> Self {
        Self::new(&FinalityConfig::default())
    }
}

impl FinalityStore {
    #[must_use]
    pub fn new(config: &FinalityConfig) -> Self {
        Self::with_scheme(config, Arc::new(Bls))
    }

    #[must_use]
    pub fn with_scheme(config: &FinalityConfig, scheme: Arc<dyn AggregateSignatureScheme>) -> Self {
        Self {
            states: HashMap::new(),
            finality_threshold: config.finality_threshold,
            scheme,
        }
    }

    #[must_use]
    pub const fn finality_threshold(&self) -> f64 {
        self.finality_threshold
    }

    /// Create the state for `hash` unless it already exists.
    pub fn initialize_state(
        &mut self,
        hash: &Hash,
        voters: &BTreeMap<String, DrpPublicCredential>,
    ) {
        self.states
            .entry(hash.clone())
            .or_insert_with(|| FinalityState::new(hash.clone(), voters));
    }

    #[must_use]
    pub fn state(&self, hash: &str) -> Option<&FinalityState> {
        self.states.get(hash)
    }

    #[must_use]
    pub fn quorum(&self, hash: &str) -> Option<usize> {
        self.states
            .get(hash)
            .map(|state| state.quorum(self.finality_threshold))
    }

    #[must_use]
    pub fn number_of_votes(&self, hash: &str) -> Option<usize> {
        self.states
            .get(hash)
            .map(|state| state.store.number_of_votes())
    }

    #[must_use]
    pub fn is_finalized(&self, hash: &str) -> Option<bool> {
        self.states
            .get(hash)
            .map(|state| state.is_finalized(self.finality_threshold))
    }

    #[must_use]
    pub fn can_vote(&self, peer_id: &str, hash: &str) -> Option<bool> {
        self.states
            .get(hash)
            .map(|state| state.store.is_voter(peer_id))
    }

    /// `None` when the hash is unknown or `peer_id` is not a voter.
    #[must_use]
    pub fn voted(&self, peer_id: &str, hash: &str) -> Option<bool> {
        self.states.get(hash)?.store.voted(peer_id)
    }

    /// Voter ids of `hash`, in index order.
    #[must_use]
    pub fn signers(&self, hash: &str) -> Option<Vec<String>> {
        let state = self.states.get(hash)?;
        let mut signers: Vec<(usize, String)> = state
            .store
            .voter_ids()
            .map(|(peer, index)| (index, peer.to_string()))
            .collect();
        signers.sort_unstable();
        Some(signers.into_iter().map(|(_, peer)| peer).collect())
    }

    /// Count `peer_id`'s votes. Attestations for unknown hashes are skipped
    /// and per-attestation failures are logged. Returns how many new votes
    /// were counted.
    pub fn add_votes(
        &mut self,
        peer_id: &str,
        attestations: &[Attestation],
        verify: bool,
    ) -> usize {
        let mut counted = 0;
        for attestation in attestations {
            let Some(state) = self.states.get_mut(&attestation.data) else {
                debug!(hash = %attestation.data, peer_id, "vote for unknown vertex skipped");
                continue;
            };
            match state.add_vote(self.scheme.as_ref(), peer_id, &attestation.signature, verify) {
                Ok(true) => counted += 1,
                Ok(false) => {}
                Err(err) => warn!(
                    hash = %attestation.data,
                    peer_id,
                    code = err.code().code(),
                    "vote rejected: {err}"
                ),
            }
        }
        counted
    }

    /// Adopt remote aggregates for hashes without a local signature.
    /// Returns how many were adopted.
    pub fn merge_votes(&mut self, attestations: &[AggregatedAttestation]) -> usize {
        let mut adopted = 0;
        for attestation in attestations {
            let Some(state) = self.states.get_mut(&attestation.data) else {
                continue;
            };
            match state.merge(self.scheme.as_ref(), attestation) {
                Ok(true) => adopted += 1,
                Ok(false) => {}
                Err(err) => warn!(
                    hash = %attestation.data,
                    code = err.code().code(),
                    "aggregate rejected: {err}"
                ),
            }
        }
        adopted
    }

    #[must_use]
    pub fn get_attestation(&self, hash: &str) -> Option<AggregatedAttestation> {
        self.states.get(hash)?.attestation()
    }

    pub fn hashes(&self) -> impl Iterator<Item = &Hash> {
        self.states.keys()
    }
}
