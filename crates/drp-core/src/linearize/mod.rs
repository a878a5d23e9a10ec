//! Linearization: turning a causal sub-DAG into one deterministic sequence
//! of operations.
//!
//! Both strategies topologically sort the sub-DAG (rebuilding the
//! reachability index for it) and then consult the graph's registered
//! resolvers for every causally unrelated pair ([`pair`]) or group
//! ([`multiple`]). The origin vertex itself and null-valued operations are
//! never emitted.

pub mod multiple;
pub mod pair;

use crate::collections::ObjectSet;
use crate::hashgraph::{Hash, HashGraph, HashGraphError, Operation, SemanticsType};

pub use multiple::linearize_multiple_semantics;
pub use pair::linearize_pair_semantics;

impl HashGraph {
    /// Hashes of the surviving vertices between `origin` (default: root)
    /// and the rest of `subgraph` (default: whole graph), in replay order.
    ///
    /// # Errors
    ///
    /// Propagates topological sort failures.
    pub fn linearize_vertices(
        &mut self,
        origin: Option<&Hash>,
        subgraph: Option<&ObjectSet<Hash>>,
    ) -> Result<Vec<Hash>, HashGraphError> {
        match self.semantics_type() {
            SemanticsType::Pair => linearize_pair_semantics(self, origin, subgraph),
            SemanticsType::Multiple => linearize_multiple_semantics(self, origin, subgraph),
        }
    }

    /// Operations of [`Self::linearize_vertices`], in replay order.
    ///
    /// # Errors
    ///
    /// Propagates topological sort failures.
    pub fn linearize_operations(
        &mut self,
        origin: Option<&Hash>,
        subgraph: Option<&ObjectSet<Hash>>,
    ) -> Result<Vec<Operation>, HashGraphError> {
        let hashes = self.linearize_vertices(origin, subgraph)?;
        Ok(hashes
            .iter()
            .filter_map(|hash| self.vertex(hash))
            .map(|vertex| vertex.operation.clone())
            .collect())
    }
}

/// Drop the origin and null-valued operations from a sorted order.
fn emit_plain(graph: &HashGraph, order: &[Hash]) -> Vec<Hash> {
    order
        .iter()
        .skip(1)
        .filter(|hash| has_value(graph, hash))
        .cloned()
        .collect()
}

fn has_value(graph: &HashGraph, hash: &str) -> bool {
    graph
        .vertex(hash)
        .is_some_and(|v| v.operation.value.is_some())
}
