//! Vote ledger over a fixed, deterministically indexed voter set.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use super::FinalityError;
use crate::bitset::BitSet;
use crate::crypto::{AggregateSignatureScheme, DrpPublicCredential, decode_base64};
use crate::hashgraph::Hash;

/// One voter's signature over `data`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attestation {
    pub data: Hash,
    pub signature: Vec<u8>,
}

/// A combined signature plus which voters contributed to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedAttestation {
    pub data: Hash,
    pub aggregation_bits: Vec<u8>,
    pub signature: Vec<u8>,
}

/// Sorted voter index, participation bits and the running aggregate.
#[derive(Debug, Clone)]
pub struct AttestationStore {
    voter_credentials: Vec<DrpPublicCredential>,
    voter_indices: HashMap<String, usize>,
    aggregation_bits: BitSet,
    signature: Option<Vec<u8>>,
    number_of_votes: usize,
}

impl AttestationStore {
    /// Voters are indexed in peer id order.
    #[must_use]
    pub fn new(voters: &BTreeMap<String, DrpPublicCredential>) -> Self {
        let voter_indices = voters
            .keys()
            .enumerate()
            .map(|(index, peer)| (peer.clone(), index))
            .collect();
        Self {
            voter_credentials: voters.values().cloned().collect(),
            voter_indices,
            aggregation_bits: BitSet::new(voters.len()),
            signature: None,
            number_of_votes: 0,
        }
    }

    #[must_use]
    pub fn voter_count(&self) -> usize {
        self.voter_credentials.len()
    }

    #[must_use]
    pub fn is_voter(&self, peer_id: &str) -> bool {
        self.voter_indices.contains_key(peer_id)
    }

    /// Voter ids with their bit index.
    pub fn voter_ids(&self) -> impl Iterator<Item = (&str, usize)> {
        self.voter_indices
            .iter()
            .map(|(peer, &index)| (peer.as_str(), index))
    }

    /// `None` when `peer_id` is not a voter.
    #[must_use]
    pub fn voted(&self, peer_id: &str) -> Option<bool> {
        self.voter_indices
            .get(peer_id)
            .map(|&index| self.aggregation_bits.get(index))
    }

    #[must_use]
    pub const fn number_of_votes(&self) -> usize {
        self.number_of_votes
    }

    #[must_use]
    pub fn signature(&self) -> Option<&[u8]> {
        self.signature.as_deref()
    }

    #[must_use]
    pub const fn aggregation_bits(&self) -> &BitSet {
        &self.aggregation_bits
    }

    /// Count one vote. Returns `Ok(false)` for a voter that already voted.
    ///
    /// # Errors
    ///
    /// Fails for unknown voters, undecodable keys, signatures that do not
    /// verify (when `verify` is set) or do not aggregate.
    pub fn add_vote(
        &mut self,
        scheme: &dyn AggregateSignatureScheme,
        peer_id: &str,
        message: &[u8],
        signature: &[u8],
        verify: bool,
    ) -> Result<bool, FinalityError> {
        let index = *self
            .voter_indices
            .get(peer_id)
            .ok_or_else(|| FinalityError::UnknownVoter(peer_id.to_string()))?;
        if self.aggregation_bits.get(index) {
            return Ok(false);
        }
        if verify {
            let public_key = decode_base64(&self.voter_credentials[index].bls_public_key)?;
            if !scheme.verify(&public_key, message, signature) {
                return Err(FinalityError::InvalidSignature(peer_id.to_string()));
            }
        }

        let aggregate = match &self.signature {
            None => signature.to_vec(),
            Some(current) => scheme.aggregate(&[current.as_slice(), signature])?,
        };
        self.signature = Some(aggregate);
        self.aggregation_bits.set(index, true);
        self.number_of_votes += 1;
        Ok(true)
    }

    /// Replace an empty ledger with a remote aggregate after checking it
    /// against the voters its bits select. A ledger that already holds a
    /// signature is left untouched and `Ok(false)` is returned.
    ///
    /// # Errors
    ///
    /// Fails if a selected key does not decode or the aggregate does not
    /// verify.
    pub fn adopt_aggregate(
        &mut self,
        scheme: &dyn AggregateSignatureScheme,
        message: &[u8],
        aggregation_bits: &[u8],
        signature: &[u8],
    ) -> Result<bool, FinalityError> {
        if self.signature.is_some() {
            return Ok(false);
        }
        let remote = BitSet::from_bytes(aggregation_bits);
        let mut bits = BitSet::new(self.voter_count());
        let mut keys = Vec::new();
        for index in remote.ones().filter(|&i| i < self.voter_count()) {
            keys.push(decode_base64(&self.voter_credentials[index].bls_public_key)?);
            bits.set(index, true);
        }
        let key_refs: Vec<&[u8]> = keys.iter().map(Vec::as_slice).collect();
        if !scheme.verify_aggregate(&key_refs, message, signature) {
            return Err(FinalityError::InvalidAggregate);
        }

        self.aggregation_bits = bits;
        self.signature = Some(signature.to_vec());
        self.number_of_votes = keys.len();
        Ok(true)
    }
}
