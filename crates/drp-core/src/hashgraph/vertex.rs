//! Vertex and operation types plus content hashing.
//!
//! A vertex hash is the lowercase hex SHA-256 of the JSON text
//! `{"operation":{..},"deps":[..],"peerId":"..","timestamp":N}` with the
//! fields in exactly that order. The operation serializes as
//! `{"drpType":..,"type":..,"value":..}` and omits `drpType` when absent,
//! which only happens for the root NOP.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 content hash identifying a vertex.
pub type Hash = String;

/// Positional arguments of an operation.
pub type Args = Vec<serde_json::Value>;

/// Reserved operation type of the root vertex.
pub const NOP_OPERATION: &str = "-1";

/// Hash of the root vertex: peer `""`, NOP operation with null value, no
/// dependencies, timestamp `-1`.
pub const ROOT_HASH: &str = "425d2b1f5243dbf23c685078034b06fbfa71dc31dcce30f614e28023f140ff13";

/// Which state machine an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DrpType {
    #[serde(rename = "ACL")]
    Acl,
    #[serde(rename = "DRP")]
    Drp,
}

/// A recorded mutation: method name plus arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    #[serde(rename = "drpType", default, skip_serializing_if = "Option::is_none")]
    pub drp_type: Option<DrpType>,
    #[serde(rename = "type")]
    pub op_type: String,
    pub value: Option<Args>,
}

impl Operation {
    #[must_use]
    pub fn new(drp_type: DrpType, op_type: impl Into<String>, value: Args) -> Self {
        Self {
            drp_type: Some(drp_type),
            op_type: op_type.into(),
            value: Some(value),
        }
    }

    /// The reserved operation carried by the root vertex.
    #[must_use]
    pub fn nop() -> Self {
        Self {
            drp_type: None,
            op_type: NOP_OPERATION.to_string(),
            value: None,
        }
    }

    #[must_use]
    pub fn is_nop(&self) -> bool {
        self.drp_type.is_none() && self.op_type == NOP_OPERATION
    }

    /// Arguments, or an empty slice for a null-valued operation.
    #[must_use]
    pub fn args(&self) -> &[serde_json::Value] {
        self.value.as_deref().unwrap_or(&[])
    }
}

/// One node of the hash graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vertex {
    pub hash: Hash,
    pub peer_id: String,
    pub operation: Operation,
    pub dependencies: Vec<Hash>,
    /// Wall-clock milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// Ed25519 signature over the hash bytes; empty when unsigned.
    #[serde(default)]
    pub signature: Vec<u8>,
}

impl Vertex {
    /// The root vertex every graph starts from.
    #[must_use]
    pub fn root() -> Self {
        Self {
            hash: ROOT_HASH.to_string(),
            peer_id: String::new(),
            operation: Operation::nop(),
            dependencies: Vec::new(),
            timestamp: -1,
            signature: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.hash == ROOT_HASH
    }

    #[must_use]
    pub fn drp_type(&self) -> Option<DrpType> {
        self.operation.drp_type
    }

    /// Recompute the content hash and compare it with the stored one.
    ///
    /// # Errors
    ///
    /// Returns an error if the hash input cannot be serialized.
    pub fn verify_hash(&self) -> Result<bool, serde_json::Error> {
        let expected = compute_hash(
            &self.peer_id,
            &self.operation,
            &self.dependencies,
            self.timestamp,
        )?;
        Ok(expected == self.hash)
    }
}

#[derive(Serialize)]
struct HashInput<'a> {
    operation: &'a Operation,
    deps: &'a [Hash],
    #[serde(rename = "peerId")]
    peer_id: &'a str,
    timestamp: i64,
}

/// Compute the content hash of a vertex from its identifying fields.
///
/// # Errors
///
/// Returns an error if the operation arguments cannot be serialized.
pub fn compute_hash(
    peer_id: &str,
    operation: &Operation,
    deps: &[Hash],
    timestamp: i64,
) -> Result<Hash, serde_json::Error> {
    let input = HashInput {
        operation,
        deps,
        peer_id,
        timestamp,
    };
    let serialized = serde_json::to_vec(&input)?;
    let digest = Sha256::digest(&serialized);
    Ok(hex(&digest))
}

pub(crate) fn hex(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}
