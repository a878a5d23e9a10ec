use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use anyhow::{Context, Result};
use drp_blueprints::SetDrp;
use drp_core::crypto::Keychain;
use drp_core::config::ValidationConfig;
use drp_core::{
    AclOptions, Drp, DrpObject, DrpObjectConfig, DrpObjectOptions, DrpState, Hash, ObjectAcl,
    Operation, Vertex,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::clock::SimulatedClock;
use crate::rng::DeterministicRng;

/// Stable index of a simulated replica.
pub type ReplicaId = usize;

/// Set elements are drawn from `0..VALUE_SPACE`; small enough that adds and
/// deletes collide often.
pub const VALUE_SPACE: u64 = 16;

/// Shared object id so every replica hashes into the same history.
pub const OBJECT_ID: &str = "drp-sim-set";

/// A local operation a replica attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LocalOp {
    Add(u32),
    Delete(u32),
}

impl LocalOp {
    fn random(rng: &mut DeterministicRng) -> Self {
        let value = u32::try_from(rng.next_bounded(VALUE_SPACE)).unwrap_or(0);
        if rng.hit_rate_percent(70) {
            Self::Add(value)
        } else {
            Self::Delete(value)
        }
    }

    const fn name(self) -> &'static str {
        match self {
            Self::Add(_) => "add",
            Self::Delete(_) => "delete",
        }
    }

    const fn value(self) -> u32 {
        match self {
            Self::Add(v) | Self::Delete(v) => v,
        }
    }
}

/// Everything the oracle compares between replicas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicaState {
    pub id: ReplicaId,
    pub vertex_hashes: BTreeSet<Hash>,
    pub frontier: BTreeSet<Hash>,
    pub drp: DrpState,
    pub operations: Vec<Operation>,
}

/// Peer name used in vertices authored by `id`.
#[must_use]
pub fn peer_name(id: ReplicaId) -> String {
    format!("peer-{id}")
}

/// ACL shared by all replicas: replica 0 administers a permissionless
/// object, so every peer may write.
///
/// # Errors
///
/// Fails if the admin keychain cannot be derived.
pub fn shared_acl(seed: u64) -> Result<ObjectAcl> {
    let admin = Keychain::from_seed(&seed.to_be_bytes())
        .context("deriving admin keychain")?
        .public_credential();
    Ok(ObjectAcl::new(AclOptions {
        admins: BTreeMap::from([(peer_name(0), admin)]),
        permissionless: true,
        ..AclOptions::default()
    }))
}

/// One simulated peer holding a replicated set.
#[derive(Debug)]
pub struct Replica {
    id: ReplicaId,
    object: DrpObject<SetDrp<u32>>,
}

impl Replica {
    /// `tolerated_skew_millis` bounds how far ahead of this replica's clock
    /// a received vertex may be stamped.
    ///
    /// # Errors
    ///
    /// Fails if the object rejects its options.
    pub fn new(
        id: ReplicaId,
        acl: ObjectAcl,
        clock: SimulatedClock,
        tolerated_skew_millis: i64,
    ) -> Result<Self> {
        let config = DrpObjectConfig {
            validation: ValidationConfig {
                max_clock_skew_ms: tolerated_skew_millis,
                ..ValidationConfig::default()
            },
            ..DrpObjectConfig::default()
        };
        let object = DrpObject::new(
            DrpObjectOptions::new(peer_name(id), SetDrp::default())
                .with_acl(acl)
                .with_config(config)
                .with_clock(Arc::new(clock))
                .with_id(OBJECT_ID),
        )
        .with_context(|| format!("creating replica {id}"))?;
        Ok(Self { id, object })
    }

    #[must_use]
    pub fn id(&self) -> ReplicaId {
        self.id
    }

    #[must_use]
    pub fn object(&self) -> &DrpObject<SetDrp<u32>> {
        &self.object
    }

    pub fn object_mut(&mut self) -> &mut DrpObject<SetDrp<u32>> {
        &mut self.object
    }

    /// Perform one random operation. Returns the operation and, if it
    /// changed the set, the new vertex to gossip.
    ///
    /// # Errors
    ///
    /// Propagates object call failures.
    pub fn perform(&mut self, rng: &mut DeterministicRng) -> Result<(LocalOp, Option<Vertex>)> {
        let op = LocalOp::random(rng);
        let vertex = self
            .object
            .call_drp(op.name(), vec![json!(op.value())])
            .with_context(|| format!("replica {} calling {}", self.id, op.name()))?;
        Ok((op, vertex))
    }

    /// Every vertex this replica holds, root included.
    #[must_use]
    pub fn history(&self) -> Vec<Vertex> {
        self.object
            .hash_graph()
            .all_vertices()
            .into_iter()
            .cloned()
            .collect()
    }

    /// Merge gossiped vertices; returns the hashes that could not be
    /// admitted yet.
    ///
    /// # Errors
    ///
    /// Fails only if the object's projections become inconsistent.
    pub fn receive(&mut self, vertices: &[Vertex]) -> Result<Vec<Hash>> {
        let (_, missing) = self
            .object
            .merge(vertices)
            .with_context(|| format!("replica {} merging", self.id))?;
        Ok(missing)
    }

    #[must_use]
    pub fn vertex_count(&self) -> usize {
        self.object.hash_graph().vertex_count()
    }

    /// # Errors
    ///
    /// Fails if the set cannot be snapshotted or the graph cannot be
    /// linearized.
    pub fn state(&mut self) -> Result<ReplicaState> {
        let graph = self.object.hash_graph();
        let vertex_hashes = graph.all_vertices().iter().map(|v| v.hash.clone()).collect();
        let frontier = graph.frontier().iter().cloned().collect();
        let drp = self.object.drp().snapshot()?;
        let operations = self
            .object
            .hash_graph_mut()
            .linearize_operations(None, None)?;
        Ok(ReplicaState {
            id: self.id,
            vertex_hashes,
            frontier,
            drp,
            operations,
        })
    }
}
