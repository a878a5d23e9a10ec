//! Lowest common ancestor search driven by the vertex distance table.
//!
//! Each pairwise walk steps the deeper of the two hashes to its closest
//! dependency. Every other dependency seen along the way is queued as an
//! extra target, so the accumulated visited set ends up covering every
//! vertex between the ancestor and the inputs. Callers reuse that set as the
//! subgraph for linearization.

use super::{Hash, HashGraph, HashGraphError};
use crate::collections::ObjectSet;

impl HashGraph {
    /// LCA of an arbitrary set of hashes.
    ///
    /// `visited` receives every vertex touched by the search.
    ///
    /// # Errors
    ///
    /// Returns [`HashGraphError::EmptyLcaInput`] for an empty slice,
    /// [`HashGraphError::UnknownVertex`] for hashes missing from the graph,
    /// and [`HashGraphError::LcaNotFound`] if a walk runs off the root.
    pub fn lowest_common_ancestor_multiple_vertices(
        &self,
        hashes: &[Hash],
        visited: &mut ObjectSet<Hash>,
    ) -> Result<Hash, HashGraphError> {
        let Some(first) = hashes.first() else {
            return Err(HashGraphError::EmptyLcaInput);
        };
        if let Some(unknown) = hashes.iter().find(|h| !self.contains(h)) {
            return Err(HashGraphError::UnknownVertex(unknown.clone()));
        }

        visited.add(first.clone());
        let mut lca = first.clone();
        let mut targets: Vec<Hash> = hashes.to_vec();
        let mut i = 1;
        while i < targets.len() {
            if !visited.contains(&targets[i]) {
                let target = targets[i].clone();
                lca = self.lowest_common_ancestor_pair_vertices(
                    &lca,
                    &target,
                    visited,
                    &mut targets,
                )?;
            }
            i += 1;
        }
        Ok(lca)
    }

    /// Pairwise step of [`Self::lowest_common_ancestor_multiple_vertices`].
    ///
    /// Distance ties advance `hash1`. Secondary dependencies of each stepped
    /// vertex are appended to `targets`.
    ///
    /// # Errors
    ///
    /// Returns [`HashGraphError::LcaNotFound`] if either walk reaches a
    /// vertex without a closest dependency before the walks meet.
    pub fn lowest_common_ancestor_pair_vertices(
        &self,
        hash1: &Hash,
        hash2: &Hash,
        visited: &mut ObjectSet<Hash>,
        targets: &mut Vec<Hash>,
    ) -> Result<Hash, HashGraphError> {
        let mut current1 = hash1.clone();
        let mut current2 = hash2.clone();
        visited.add(current1.clone());
        visited.add(current2.clone());

        while current1 != current2 {
            let not_found = || HashGraphError::LcaNotFound {
                left: hash1.clone(),
                right: hash2.clone(),
            };
            let distance1 = self.vertex_distances.get(&current1).ok_or_else(not_found)?;
            let distance2 = self.vertex_distances.get(&current2).ok_or_else(not_found)?;

            let advance_first = distance1.distance >= distance2.distance;
            let (walker, step) = if advance_first {
                (&mut current1, distance1)
            } else {
                (&mut current2, distance2)
            };
            let closest = step.closest_dependency.clone().ok_or_else(not_found)?;

            for dep in self.dependencies(walker) {
                if *dep != closest && !visited.contains(dep) {
                    targets.push(dep.clone());
                }
            }
            *walker = closest;

            if visited.contains(walker) {
                return Ok(if advance_first { current2 } else { current1 });
            }
            visited.add(walker.clone());
        }
        Ok(current1)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{add, root};
    use super::*;

    fn lca(graph: &HashGraph, hashes: &[&Hash]) -> (Hash, ObjectSet<Hash>) {
        let hashes: Vec<Hash> = hashes.iter().map(|h| (*h).clone()).collect();
        let mut visited = ObjectSet::new();
        let found = graph
            .lowest_common_ancestor_multiple_vertices(&hashes, &mut visited)
            .unwrap();
        (found, visited)
    }

    #[test]
    fn single_hash_is_its_own_lca() {
        let mut graph = HashGraph::new("p", None, None, None);
        let a = add(&mut graph, "p1", &[&root()], "add", 1, 1);
        let (found, visited) = lca(&graph, &[&a]);
        assert_eq!(found, a);
        assert_eq!(visited.len(), 1);
    }

    #[test]
    fn siblings_meet_at_root() {
        let mut graph = HashGraph::new("p", None, None, None);
        let r = root();
        let a = add(&mut graph, "p1", &[&r], "add", 1, 1);
        let b = add(&mut graph, "p2", &[&r], "add", 2, 1);
        let (found, visited) = lca(&graph, &[&a, &b]);
        assert_eq!(found, r);
        assert!(visited.contains(&a) && visited.contains(&b) && visited.contains(&r));
    }

    #[test]
    fn ancestor_in_input_is_the_lca() {
        let mut graph = HashGraph::new("p", None, None, None);
        let a = add(&mut graph, "p1", &[&root()], "add", 1, 1);
        let b = add(&mut graph, "p1", &[&a], "add", 2, 2);
        assert_eq!(lca(&graph, &[&a, &b]).0, a);
        assert_eq!(lca(&graph, &[&b, &a]).0, a);
    }

    #[test]
    fn uneven_branches_collect_intermediate_vertices() {
        //      root
        //       |
        //       a
        //      / \
        //     b   d
        //     |
        //     c
        let mut graph = HashGraph::new("p", None, None, None);
        let a = add(&mut graph, "p1", &[&root()], "add", 1, 1);
        let b = add(&mut graph, "p1", &[&a], "add", 2, 2);
        let c = add(&mut graph, "p1", &[&b], "add", 3, 3);
        let d = add(&mut graph, "p2", &[&a], "add", 4, 2);

        let (found, visited) = lca(&graph, &[&c, &d]);
        assert_eq!(found, a);
        for hash in [&a, &b, &c, &d] {
            assert!(visited.contains(hash));
        }
        assert!(!visited.contains(&root()));
    }

    #[test]
    fn merge_vertices_fold_in_secondary_branches() {
        //        root
        //       /    \
        //      a      b
        //      | \  / |
        //      |  m   |
        //      c      e
        // m depends on a and b; lca(m, c, e) is root.
        let mut graph = HashGraph::new("p", None, None, None);
        let r = root();
        let a = add(&mut graph, "p1", &[&r], "add", 1, 1);
        let b = add(&mut graph, "p2", &[&r], "add", 2, 1);
        let m = add(&mut graph, "p3", &[&a, &b], "add", 3, 2);
        let c = add(&mut graph, "p1", &[&a], "add", 4, 2);
        let e = add(&mut graph, "p2", &[&b], "add", 5, 2);

        let (found, visited) = lca(&graph, &[&m, &c, &e]);
        assert_eq!(found, r);
        for hash in [&a, &b, &m, &c, &e] {
            assert!(visited.contains(hash), "missing {hash}");
        }
        for hash in [&m, &c, &e] {
            assert!(graph.is_ancestor(&found, hash));
        }
    }

    #[test]
    fn empty_and_unknown_inputs_fail() {
        let graph = HashGraph::new("p", None, None, None);
        let mut visited = ObjectSet::new();
        assert!(matches!(
            graph.lowest_common_ancestor_multiple_vertices(&[], &mut visited),
            Err(HashGraphError::EmptyLcaInput)
        ));
        assert!(matches!(
            graph.lowest_common_ancestor_multiple_vertices(&["x".repeat(64)], &mut visited),
            Err(HashGraphError::UnknownVertex(_))
        ));
    }
}
