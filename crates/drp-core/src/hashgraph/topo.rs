//! Topological ordering, the reachability index, and structural checks.

use std::collections::{HashMap, HashSet, VecDeque};

use tracing::{trace, warn};

use super::{BitsetScope, Hash, HashGraph, HashGraphError, ROOT_HASH};
use crate::bitset::BitSet;
use crate::collections::{MinHeap, ObjectSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    OnStack,
    Done,
}

struct Frame {
    hash: Hash,
    children: Vec<Hash>,
    next: usize,
}

impl HashGraph {
    /// Topologically order the sub-DAG reachable from `origin` (default:
    /// root) through vertices in `subgraph` (default: every vertex).
    ///
    /// With `update_bitsets`, also rebuilds the reachability index over the
    /// returned order.
    ///
    /// # Errors
    ///
    /// Returns [`HashGraphError::UnknownVertex`] if `origin` is not in the
    /// graph and [`HashGraphError::CycleDetected`] on a back edge.
    pub fn topological_sort(
        &mut self,
        update_bitsets: bool,
        origin: Option<&Hash>,
        subgraph: Option<&ObjectSet<Hash>>,
    ) -> Result<Vec<Hash>, HashGraphError> {
        let root = ROOT_HASH.to_string();
        let origin = origin.unwrap_or(&root);
        let order = self.dfs_topological_sort_iterative(origin, subgraph)?;

        if update_bitsets {
            let scope = if origin == &root && subgraph.is_none() {
                BitsetScope::Full
            } else {
                BitsetScope::Partial
            };
            self.rebuild_reachability(&order, scope);
        }
        Ok(order)
    }

    fn children_in(&self, hash: &Hash, subgraph: Option<&ObjectSet<Hash>>) -> Vec<Hash> {
        let mut children: Vec<Hash> = self
            .dependents(hash)
            .iter()
            .filter(|child| subgraph.is_none_or(|s| s.contains(*child)))
            .cloned()
            .collect();
        children.sort();
        children
    }

    /// Post-order DFS with explicit frames, reversed.
    fn dfs_topological_sort_iterative(
        &self,
        origin: &Hash,
        subgraph: Option<&ObjectSet<Hash>>,
    ) -> Result<Vec<Hash>, HashGraphError> {
        if !self.vertices.contains_key(origin) {
            return Err(HashGraphError::UnknownVertex(origin.clone()));
        }

        let mut marks: HashMap<Hash, Mark> = HashMap::new();
        let mut post_order = Vec::new();
        let mut stack = vec![Frame {
            hash: origin.clone(),
            children: self.children_in(origin, subgraph),
            next: 0,
        }];
        marks.insert(origin.clone(), Mark::OnStack);

        while let Some(frame) = stack.last_mut() {
            let child = frame.children.get(frame.next).cloned();
            frame.next += 1;

            match child {
                Some(child) => match marks.get(&child) {
                    Some(Mark::OnStack) => return Err(HashGraphError::CycleDetected(child)),
                    Some(Mark::Done) => {}
                    None => {
                        marks.insert(child.clone(), Mark::OnStack);
                        let children = self.children_in(&child, subgraph);
                        stack.push(Frame {
                            hash: child,
                            children,
                            next: 0,
                        });
                    }
                },
                None => {
                    if let Some(done) = stack.pop() {
                        marks.insert(done.hash.clone(), Mark::Done);
                        post_order.push(done.hash);
                    }
                }
            }
        }

        post_order.reverse();
        Ok(post_order)
    }

    /// For each vertex in `order`, OR together the bitsets of its indexed
    /// dependencies plus each dependency's own position.
    fn rebuild_reachability(&mut self, order: &[Hash], scope: BitsetScope) {
        self.reachable_predecessors.clear();
        self.topo_sorted_index.clear();
        while self.current_bitset_size < order.len() {
            self.current_bitset_size *= 2;
        }

        for (position, hash) in order.iter().enumerate() {
            self.topo_sorted_index.insert(hash.clone(), position);
            let mut reachable = BitSet::new(self.current_bitset_size);
            for dep in self.dependencies(hash) {
                if let (Some(dep_bits), Some(&dep_position)) = (
                    self.reachable_predecessors.get(dep),
                    self.topo_sorted_index.get(dep),
                ) {
                    reachable = reachable.or(dep_bits);
                    reachable.set(dep_position, true);
                }
            }
            self.reachable_predecessors.insert(hash.clone(), reachable);
        }

        self.bitset_scope = scope;
        trace!(vertices = order.len(), ?scope, "reachability index rebuilt");
    }

    /// Causality test over the whole graph using the reachability index,
    /// rebuilding it first if it is stale or only covers a subgraph.
    ///
    /// # Errors
    ///
    /// Returns [`HashGraphError::UnknownVertex`] for unknown hashes, or a
    /// sort error if the rebuild fails.
    pub fn are_causally_related_using_bitsets(
        &mut self,
        a: &str,
        b: &str,
    ) -> Result<bool, HashGraphError> {
        for hash in [a, b] {
            if !self.contains(hash) {
                return Err(HashGraphError::UnknownVertex(hash.to_string()));
            }
        }
        if self.bitset_scope != BitsetScope::Full {
            self.topological_sort(true, None, None)?;
        }
        Ok(self.causally_related_in_index(a, b))
    }

    /// Causality test against whatever the last sort indexed.
    ///
    /// Linearizers call this right after their own subgraph sort; unindexed
    /// hashes compare as unrelated.
    pub(crate) fn causally_related_in_index(&self, a: &str, b: &str) -> bool {
        let (Some(&pos_a), Some(&pos_b)) =
            (self.topo_sorted_index.get(a), self.topo_sorted_index.get(b))
        else {
            return false;
        };
        let reaches = |hash: &str, position: usize| {
            self.reachable_predecessors
                .get(hash)
                .is_some_and(|bits| bits.get(position))
        };
        reaches(a, pos_b) || reaches(b, pos_a)
    }

    /// Directional test against the last sort's index: `ancestor` is a
    /// strict predecessor of `descendant`.
    pub(crate) fn precedes_in_index(&self, ancestor: &str, descendant: &str) -> bool {
        self.topo_sorted_index.get(ancestor).is_some_and(|&position| {
            self.reachable_predecessors
                .get(descendant)
                .is_some_and(|bits| bits.get(position))
        })
    }

    /// Exact causality test by breadth-first search over dependency edges.
    #[must_use]
    pub fn are_causally_related_using_bfs(&self, a: &str, b: &str) -> bool {
        self.is_ancestor(a, b) || self.is_ancestor(b, a)
    }

    /// True when `ancestor` is a strict causal predecessor of `descendant`.
    #[must_use]
    pub fn is_ancestor(&self, ancestor: &str, descendant: &str) -> bool {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = self
            .dependencies(descendant)
            .iter()
            .map(String::as_str)
            .collect();

        while let Some(current) = queue.pop_front() {
            if current == ancestor {
                return true;
            }
            if visited.insert(current) {
                queue.extend(self.dependencies(current).iter().map(String::as_str));
            }
        }
        false
    }

    /// Exchange the index positions of two vertices after they trade
    /// places in a working order.
    ///
    /// Bits are keyed by position, so every bitset has the two positions
    /// exchanged as well; causality answers are unchanged. No-op when either
    /// vertex is outside the last sort.
    pub fn swap_reachable_predecessors(&mut self, a: &str, b: &str) {
        let (Some(&pos_a), Some(&pos_b)) =
            (self.topo_sorted_index.get(a), self.topo_sorted_index.get(b))
        else {
            return;
        };
        if pos_a == pos_b {
            return;
        }
        self.topo_sorted_index.insert(a.to_string(), pos_b);
        self.topo_sorted_index.insert(b.to_string(), pos_a);
        for bits in self.reachable_predecessors.values_mut() {
            let (at_a, at_b) = (bits.get(pos_a), bits.get(pos_b));
            bits.set(pos_a, at_b);
            bits.set(pos_b, at_a);
        }
    }

    /// Position of `hash` in the reachability index.
    #[must_use]
    pub fn indexed_position(&self, hash: &str) -> Option<usize> {
        self.topo_sorted_index.get(hash).copied()
    }

    /// Kahn's algorithm over the sub-DAG reachable from `origin`, popping
    /// ready vertices in ascending hash order.
    ///
    /// # Errors
    ///
    /// Returns [`HashGraphError::UnknownVertex`] for an unknown origin and
    /// [`HashGraphError::CycleDetected`] if some vertex never becomes ready.
    pub fn kahns_algorithm(
        &self,
        origin: &Hash,
        subgraph: Option<&ObjectSet<Hash>>,
    ) -> Result<Vec<Hash>, HashGraphError> {
        if !self.vertices.contains_key(origin) {
            return Err(HashGraphError::UnknownVertex(origin.clone()));
        }

        let mut scope: HashSet<Hash> = HashSet::new();
        let mut frontier = vec![origin.clone()];
        while let Some(hash) = frontier.pop() {
            if scope.insert(hash.clone()) {
                frontier.extend(self.children_in(&hash, subgraph));
            }
        }

        let mut in_degree: HashMap<&Hash, usize> = scope
            .iter()
            .map(|hash| {
                let count = if hash == origin {
                    0
                } else {
                    self.dependencies(hash)
                        .iter()
                        .filter(|dep| scope.contains(*dep))
                        .count()
                };
                (hash, count)
            })
            .collect();

        let mut ready: MinHeap<Hash> = MinHeap::new();
        ready.push(origin.clone());
        let mut order = Vec::with_capacity(scope.len());
        while let Some(hash) = ready.pop() {
            for child in self.children_in(&hash, subgraph) {
                if let Some(degree) = in_degree.get_mut(&child) {
                    *degree = degree.saturating_sub(1);
                    if *degree == 0 {
                        ready.push(child);
                    }
                }
            }
            order.push(hash);
        }

        if order.len() < scope.len() {
            let stuck = scope
                .iter()
                .find(|h| !order.contains(*h))
                .cloned()
                .unwrap_or_default();
            return Err(HashGraphError::CycleDetected(stuck));
        }
        Ok(order)
    }

    /// Verify the structural invariants of the graph.
    ///
    /// Checks that every non-root vertex has known dependencies, that the
    /// distance table and forward edges cover every vertex, that everything
    /// is reachable from the root, and that the frontier is exactly the set
    /// of vertices without dependents.
    #[must_use]
    pub fn self_check_constraints(&self) -> bool {
        for (hash, vertex) in &self.vertices {
            if hash.as_str() != ROOT_HASH && vertex.dependencies.is_empty() {
                warn!(hash = %hash, "non-root vertex without dependencies");
                return false;
            }
            if let Some(dep) = vertex
                .dependencies
                .iter()
                .find(|d| !self.vertices.contains_key(*d))
            {
                warn!(hash = %hash, dependency = %dep, "dangling dependency");
                return false;
            }
            if !self.vertex_distances.contains_key(hash) || !self.forward_edges.contains_key(hash) {
                warn!(hash = %hash, "vertex missing from derived indices");
                return false;
            }
        }

        match self.kahns_algorithm(&ROOT_HASH.to_string(), None) {
            Ok(order) if order.len() == self.vertices.len() => {}
            Ok(order) => {
                warn!(reachable = order.len(), total = self.vertices.len(), "unreachable vertices");
                return false;
            }
            Err(err) => {
                warn!(error = %err, "graph is not a DAG");
                return false;
            }
        }

        let tips: HashSet<&Hash> = self
            .vertices
            .keys()
            .filter(|h| self.dependents(h).is_empty())
            .collect();
        let frontier: HashSet<&Hash> = self.frontier.iter().collect();
        if tips != frontier || frontier.len() != self.frontier.len() {
            warn!(?frontier, ?tips, "frontier does not match tips");
            return false;
        }
        true
    }
}
