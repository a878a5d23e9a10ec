//! The hash graph: an append-only DAG of operations rooted at a single NOP
//! vertex.
//!
//! # Structure
//!
//! Every vertex names the hashes of the vertices it causally follows. The
//! graph keeps a forward-edge index (dependency to dependents), the current
//! frontier (vertices nothing depends on yet), and a distance table giving
//! each vertex's shortest hop count from the root together with the
//! dependency on that shortest path. The distance table drives LCA search.
//!
//! # Reachability index
//!
//! [`HashGraph::topological_sort`] can rebuild a per-vertex [`BitSet`] of
//! reachable predecessors, keyed by topological position. The index is a
//! dirty-flagged memo: every insertion marks it stale and the next
//! whole-graph causality query rebuilds it.
//!
//! [`BitSet`]: crate::bitset::BitSet

mod lca;
mod render;
mod resolve;
mod topo;
mod vertex;

use std::collections::HashMap;
use std::fmt;

use tracing::trace;

use crate::bitset::BitSet;
use crate::error::ErrorCode;

pub use resolve::{ActionType, ResolveConflictsType, ResolveFn, SemanticsType};
pub use vertex::{
    Args, DrpType, Hash, NOP_OPERATION, Operation, ROOT_HASH, Vertex, compute_hash,
};

pub(crate) use vertex::hex;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised by hash graph operations.
#[derive(Debug, thiserror::Error)]
pub enum HashGraphError {
    /// Topological sort found a back edge.
    #[error("cycle detected at vertex {0}")]
    CycleDetected(Hash),

    /// The distance walk could not find a common ancestor.
    #[error("no common ancestor found for {left} and {right}")]
    LcaNotFound { left: Hash, right: Hash },

    /// LCA was requested for an empty set of hashes.
    #[error("lowest common ancestor of an empty set")]
    EmptyLcaInput,

    #[error("vertex {0} not found")]
    UnknownVertex(Hash),

    #[error("vertex {vertex} depends on unknown vertex {dependency}")]
    UnknownDependency { vertex: Hash, dependency: Hash },

    #[error("vertex {0} has no dependencies")]
    NoDependencies(Hash),

    #[error("failed to serialize hash input: {0}")]
    HashInput(#[from] serde_json::Error),
}

impl HashGraphError {
    /// Machine-readable code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::CycleDetected(_) => ErrorCode::CycleDetected,
            Self::LcaNotFound { .. } | Self::EmptyLcaInput => ErrorCode::LcaNotFound,
            Self::UnknownVertex(_) => ErrorCode::UnknownVertex,
            Self::UnknownDependency { .. } => ErrorCode::UnknownDependency,
            Self::NoDependencies(_) => ErrorCode::NoDependencies,
            Self::HashInput(_) => ErrorCode::MalformedOperation,
        }
    }
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Shortest hop count from the root and the dependency that achieves it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexDistance {
    pub distance: usize,
    pub closest_dependency: Option<Hash>,
}

/// What the current reachability bitsets were computed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BitsetScope {
    Stale,
    /// Whole graph from the root.
    Full,
    /// A subgraph sort; positions only cover that subgraph.
    Partial,
}

/// The DAG of vertices plus the derived indices used for causality and
/// linearization.
#[derive(Clone)]
pub struct HashGraph {
    peer_id: String,
    resolve_conflicts_acl: Option<ResolveFn>,
    resolve_conflicts_drp: Option<ResolveFn>,
    semantics_type_drp: Option<SemanticsType>,

    vertices: HashMap<Hash, Vertex>,
    frontier: Vec<Hash>,
    forward_edges: HashMap<Hash, Vec<Hash>>,
    vertex_distances: HashMap<Hash, VertexDistance>,

    bitset_scope: BitsetScope,
    reachable_predecessors: HashMap<Hash, BitSet>,
    topo_sorted_index: HashMap<Hash, usize>,
    current_bitset_size: usize,
}

impl fmt::Debug for HashGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashGraph")
            .field("peer_id", &self.peer_id)
            .field("vertices", &self.vertices.len())
            .field("frontier", &self.frontier)
            .field("semantics_type_drp", &self.semantics_type_drp)
            .field("has_acl_resolver", &self.resolve_conflicts_acl.is_some())
            .field("has_drp_resolver", &self.resolve_conflicts_drp.is_some())
            .finish_non_exhaustive()
    }
}

impl HashGraph {
    /// Create a graph containing only the root vertex.
    #[must_use]
    pub fn new(
        peer_id: impl Into<String>,
        resolve_conflicts_acl: Option<ResolveFn>,
        resolve_conflicts_drp: Option<ResolveFn>,
        semantics_type_drp: Option<SemanticsType>,
    ) -> Self {
        let root = Vertex::root();
        let root_hash = root.hash.clone();

        let mut vertices = HashMap::new();
        vertices.insert(root_hash.clone(), root);
        let mut forward_edges = HashMap::new();
        forward_edges.insert(root_hash.clone(), Vec::new());
        let mut vertex_distances = HashMap::new();
        vertex_distances.insert(
            root_hash.clone(),
            VertexDistance {
                distance: 0,
                closest_dependency: None,
            },
        );

        Self {
            peer_id: peer_id.into(),
            resolve_conflicts_acl,
            resolve_conflicts_drp,
            semantics_type_drp,
            vertices,
            frontier: vec![root_hash],
            forward_edges,
            vertex_distances,
            bitset_scope: BitsetScope::Stale,
            reachable_predecessors: HashMap::new(),
            topo_sorted_index: HashMap::new(),
            current_bitset_size: 1,
        }
    }

    #[must_use]
    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// Build an unsigned vertex authored by this graph's peer.
    ///
    /// # Errors
    ///
    /// Returns an error if the operation cannot be serialized for hashing.
    pub fn create_vertex(
        &self,
        operation: Operation,
        dependencies: Vec<Hash>,
        timestamp: i64,
    ) -> Result<Vertex, HashGraphError> {
        let hash = compute_hash(&self.peer_id, &operation, &dependencies, timestamp)?;
        Ok(Vertex {
            hash,
            peer_id: self.peer_id.clone(),
            operation,
            dependencies,
            timestamp,
            signature: Vec::new(),
        })
    }

    /// Insert a locally created vertex and make it the sole frontier tip.
    ///
    /// # Errors
    ///
    /// Returns an error if a dependency is unknown.
    pub fn add_to_frontier(&mut self, vertex: Vertex) -> Result<Hash, HashGraphError> {
        self.check_dependencies(&vertex)?;
        let hash = vertex.hash.clone();
        self.insert(vertex);
        self.frontier = vec![hash.clone()];
        Ok(hash)
    }

    /// Insert a vertex received from a peer, keeping the frontier equal to
    /// the set of current tips. Re-adding a known vertex is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the vertex has no dependencies or a dependency is
    /// unknown.
    pub fn add_vertex(&mut self, vertex: Vertex) -> Result<Hash, HashGraphError> {
        if self.vertices.contains_key(&vertex.hash) {
            return Ok(vertex.hash);
        }
        if vertex.dependencies.is_empty() {
            return Err(HashGraphError::NoDependencies(vertex.hash));
        }
        self.check_dependencies(&vertex)?;

        let hash = vertex.hash.clone();
        let deps = vertex.dependencies.clone();
        self.insert(vertex);
        self.frontier.push(hash.clone());
        self.frontier.retain(|tip| !deps.contains(tip));
        Ok(hash)
    }

    fn check_dependencies(&self, vertex: &Vertex) -> Result<(), HashGraphError> {
        match vertex
            .dependencies
            .iter()
            .find(|dep| !self.vertices.contains_key(*dep))
        {
            Some(dep) => Err(HashGraphError::UnknownDependency {
                vertex: vertex.hash.clone(),
                dependency: dep.clone(),
            }),
            None => Ok(()),
        }
    }

    fn insert(&mut self, vertex: Vertex) {
        let hash = vertex.hash.clone();
        let distance = self.distance_through(&vertex.dependencies);
        for dep in &vertex.dependencies {
            self.forward_edges
                .entry(dep.clone())
                .or_default()
                .push(hash.clone());
        }
        self.forward_edges.entry(hash.clone()).or_default();
        trace!(hash = %hash, distance = distance.distance, "vertex inserted");
        self.vertex_distances.insert(hash.clone(), distance);
        self.vertices.insert(hash, vertex);
        self.bitset_scope = BitsetScope::Stale;
    }

    /// Shortest distance via any of `deps`; the first dependency wins ties.
    fn distance_through(&self, deps: &[Hash]) -> VertexDistance {
        let mut best: Option<(usize, &Hash)> = None;
        for dep in deps {
            if let Some(d) = self.vertex_distances.get(dep)
                && best.is_none_or(|(shortest, _)| d.distance < shortest)
            {
                best = Some((d.distance, dep));
            }
        }
        match best {
            Some((distance, dep)) => VertexDistance {
                distance: distance + 1,
                closest_dependency: Some(dep.clone()),
            },
            None => VertexDistance {
                distance: 0,
                closest_dependency: None,
            },
        }
    }

    // -----------------------------------------------------------------------
    // Conflict resolution
    // -----------------------------------------------------------------------

    /// Run the registered resolver for a set of concurrent vertices.
    ///
    /// The first vertex picks the resolver: ACL when it is an ACL vertex,
    /// DRP otherwise. Missing resolvers yield `Nop`.
    #[must_use]
    pub fn resolve_conflicts(&self, vertices: &[&Vertex]) -> ResolveConflictsType {
        match vertices.first() {
            Some(first) => self.dispatch(first.drp_type() == Some(DrpType::Acl), vertices),
            None => ResolveConflictsType::nop(),
        }
    }

    /// Pairwise variant used by pair semantics: the ACL resolver decides
    /// whenever either side is an ACL vertex.
    pub(crate) fn resolve_pair(&self, left: &Vertex, right: &Vertex) -> ResolveConflictsType {
        let involves_acl = [left, right]
            .iter()
            .any(|v| v.drp_type() == Some(DrpType::Acl));
        self.dispatch(involves_acl, &[left, right])
    }

    fn dispatch(&self, acl: bool, vertices: &[&Vertex]) -> ResolveConflictsType {
        let resolver = if acl {
            self.resolve_conflicts_acl.as_ref()
        } else {
            self.resolve_conflicts_drp.as_ref()
        };
        resolver.map_or_else(ResolveConflictsType::nop, |resolve| resolve(vertices))
    }

    /// True when at least one resolver is registered.
    #[must_use]
    pub fn has_resolvers(&self) -> bool {
        self.resolve_conflicts_acl.is_some() || self.resolve_conflicts_drp.is_some()
    }

    #[must_use]
    pub fn semantics_type(&self) -> SemanticsType {
        self.semantics_type_drp.unwrap_or_default()
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    #[must_use]
    pub fn frontier(&self) -> &[Hash] {
        &self.frontier
    }

    #[must_use]
    pub fn vertex(&self, hash: &str) -> Option<&Vertex> {
        self.vertices.get(hash)
    }

    #[must_use]
    pub fn contains(&self, hash: &str) -> bool {
        self.vertices.contains_key(hash)
    }

    /// Dependencies of `hash`, empty for unknown vertices and the root.
    #[must_use]
    pub fn dependencies(&self, hash: &str) -> &[Hash] {
        self.vertices
            .get(hash)
            .map(|v| v.dependencies.as_slice())
            .unwrap_or_default()
    }

    /// Vertices that directly depend on `hash`.
    #[must_use]
    pub fn dependents(&self, hash: &str) -> &[Hash] {
        self.forward_edges
            .get(hash)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// All vertices, sorted by hash.
    #[must_use]
    pub fn all_vertices(&self) -> Vec<&Vertex> {
        let mut all: Vec<&Vertex> = self.vertices.values().collect();
        all.sort_by(|a, b| a.hash.cmp(&b.hash));
        all
    }

    #[must_use]
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    #[must_use]
    pub fn vertex_distance(&self, hash: &str) -> Option<&VertexDistance> {
        self.vertex_distances.get(hash)
    }

    /// The reachability bitset computed by the most recent sort, if any.
    #[must_use]
    pub fn reachable_predecessors(&self, hash: &str) -> Option<&BitSet> {
        self.reachable_predecessors.get(hash)
    }

    #[must_use]
    pub const fn current_bitset_size(&self) -> usize {
        self.current_bitset_size
    }

    /// Whether the reachability index covers the whole current graph.
    #[must_use]
    pub fn are_predecessors_fresh(&self) -> bool {
        self.bitset_scope == BitsetScope::Full
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    /// Insert a DRP vertex by `peer` depending on `deps` with op `op(n)`.
    pub(crate) fn add(
        graph: &mut HashGraph,
        peer: &str,
        deps: &[&Hash],
        op: &str,
        n: i64,
        ts: i64,
    ) -> Hash {
        let operation = Operation::new(DrpType::Drp, op, vec![json!(n)]);
        let deps: Vec<Hash> = deps.iter().map(|h| (*h).clone()).collect();
        let hash = compute_hash(peer, &operation, &deps, ts).unwrap();
        let vertex = Vertex {
            hash,
            peer_id: peer.into(),
            operation,
            dependencies: deps,
            timestamp: ts,
            signature: Vec::new(),
        };
        graph.add_vertex(vertex).unwrap()
    }

    pub(crate) fn root() -> Hash {
        ROOT_HASH.to_string()
    }

    #[test]
    fn new_graph_has_only_root() {
        let graph = HashGraph::new("peer1", None, None, None);
        assert_eq!(graph.vertex_count(), 1);
        assert_eq!(graph.frontier(), &[root()]);
        assert_eq!(graph.vertex_distance(ROOT_HASH).unwrap().distance, 0);
        assert!(graph.dependencies(ROOT_HASH).is_empty());
    }

    #[test]
    fn add_to_frontier_replaces_tips() {
        let mut graph = HashGraph::new("peer1", None, None, None);
        let op = Operation::new(DrpType::Drp, "add", vec![json!(1)]);
        let v1 = graph.create_vertex(op, vec![root()], 1).unwrap();
        let h1 = graph.add_to_frontier(v1).unwrap();
        assert_eq!(graph.frontier(), &[h1.clone()]);

        let op = Operation::new(DrpType::Drp, "add", vec![json!(2)]);
        let v2 = graph.create_vertex(op, vec![h1.clone()], 2).unwrap();
        let h2 = graph.add_to_frontier(v2).unwrap();
        assert_eq!(graph.frontier(), &[h2.clone()]);
        assert_eq!(graph.dependents(&h1), &[h2]);
    }

    #[test]
    fn add_vertex_keeps_concurrent_tips() {
        //   root
        //   /  \
        //  a    b
        //   \  /
        //    c
        let mut graph = HashGraph::new("peer1", None, None, None);
        let r = root();
        let a = add(&mut graph, "p1", &[&r], "add", 1, 1);
        let b = add(&mut graph, "p2", &[&r], "add", 2, 1);
        let mut tips = graph.frontier().to_vec();
        tips.sort();
        let mut expected = vec![a.clone(), b.clone()];
        expected.sort();
        assert_eq!(tips, expected);

        let c = add(&mut graph, "p1", &[&a, &b], "add", 3, 2);
        assert_eq!(graph.frontier(), &[c.clone()]);
        assert_eq!(graph.vertex_distance(&c).unwrap().distance, 2);
        assert_eq!(
            graph.vertex_distance(&c).unwrap().closest_dependency.as_ref(),
            Some(&a),
            "first dependency wins distance ties"
        );
    }

    #[test]
    fn add_vertex_is_idempotent() {
        let mut graph = HashGraph::new("peer1", None, None, None);
        let r = root();
        let a = add(&mut graph, "p1", &[&r], "add", 1, 1);
        let again = graph.vertex(&a).unwrap().clone();
        assert_eq!(graph.add_vertex(again).unwrap(), a);
        assert_eq!(graph.vertex_count(), 2);
        assert_eq!(graph.frontier(), &[a]);
    }

    #[test]
    fn add_vertex_rejects_missing_or_unknown_dependencies() {
        let mut graph = HashGraph::new("peer1", None, None, None);
        let op = Operation::new(DrpType::Drp, "add", vec![json!(1)]);

        let orphan = graph.create_vertex(op.clone(), vec![], 1).unwrap();
        let err = graph.add_vertex(orphan).unwrap_err();
        assert_eq!(err.code(), ErrorCode::NoDependencies);

        let dangling = graph
            .create_vertex(op, vec!["f".repeat(64)], 1)
            .unwrap();
        let err = graph.add_vertex(dangling).unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnknownDependency);
        assert_eq!(graph.vertex_count(), 1);
    }

    #[test]
    fn resolve_conflicts_dispatches_on_first_vertex() {
        let acl: ResolveFn = Arc::new(|_| ResolveConflictsType::action(ActionType::DropLeft));
        let drp: ResolveFn = Arc::new(|_| ResolveConflictsType::action(ActionType::Swap));
        let graph = HashGraph::new("peer1", Some(acl), Some(drp), None);

        let d = Vertex {
            operation: Operation::new(DrpType::Drp, "add", vec![]),
            ..Vertex::root()
        };
        let a = Vertex {
            operation: Operation::new(DrpType::Acl, "grant", vec![]),
            ..Vertex::root()
        };
        assert_eq!(graph.resolve_conflicts(&[&d, &d]).action, ActionType::Swap);
        assert_eq!(graph.resolve_conflicts(&[&a, &d]).action, ActionType::DropLeft);
        assert_eq!(graph.resolve_conflicts(&[&d, &d, &a]).action, ActionType::Swap);
        assert_eq!(graph.resolve_conflicts(&[]).action, ActionType::Nop);
    }

    #[test]
    fn resolve_pair_prefers_acl_on_either_side() {
        let acl: ResolveFn = Arc::new(|_| ResolveConflictsType::action(ActionType::DropLeft));
        let drp: ResolveFn = Arc::new(|_| ResolveConflictsType::action(ActionType::Swap));
        let graph = HashGraph::new("peer1", Some(acl), Some(drp), None);

        let d = Vertex {
            operation: Operation::new(DrpType::Drp, "add", vec![]),
            ..Vertex::root()
        };
        let a = Vertex {
            operation: Operation::new(DrpType::Acl, "grant", vec![]),
            ..Vertex::root()
        };
        assert_eq!(graph.resolve_pair(&d, &d).action, ActionType::Swap);
        assert_eq!(graph.resolve_pair(&d, &a).action, ActionType::DropLeft);
        assert_eq!(graph.resolve_pair(&a, &d).action, ActionType::DropLeft);
    }

    #[test]
    fn resolve_conflicts_without_resolvers_is_nop() {
        let graph = HashGraph::new("peer1", None, None, None);
        let d = Vertex {
            operation: Operation::new(DrpType::Drp, "add", vec![]),
            ..Vertex::root()
        };
        assert_eq!(graph.resolve_conflicts(&[&d, &d]), ResolveConflictsType::nop());
        assert!(!graph.has_resolvers());
    }
}
