//! Group linearization.
//!
//! For each surviving anchor, greedily gathers every later surviving vertex
//! that is concurrent with all current group members, then asks the
//! resolver about the whole group at once. `Drop` removes the listed
//! vertices. Pair verdicts are mapped onto the group: `DropLeft` drops the
//! anchor and `DropRight` drops the second member.

use tracing::trace;

use super::{emit_plain, has_value};
use crate::collections::ObjectSet;
use crate::hashgraph::{ActionType, Hash, HashGraph, HashGraphError, Vertex};

/// Linearize with multiple semantics.
///
/// # Errors
///
/// Propagates topological sort failures.
pub fn linearize_multiple_semantics(
    graph: &mut HashGraph,
    origin: Option<&Hash>,
    subgraph: Option<&ObjectSet<Hash>>,
) -> Result<Vec<Hash>, HashGraphError> {
    let order = graph.topological_sort(true, origin, subgraph)?;
    if !graph.has_resolvers() {
        return Ok(emit_plain(graph, &order));
    }

    let mut dropped = vec![false; order.len()];
    let mut result = Vec::with_capacity(order.len());

    let mut i = 1;
    while i < order.len() {
        if dropped[i] {
            i += 1;
            continue;
        }

        let mut j = i + 1;
        while j < order.len() {
            if dropped[j] || graph.causally_related_in_index(&order[i], &order[j]) {
                j += 1;
                continue;
            }

            let mut group = vec![i, j];
            for k in j + 1..order.len() {
                if !dropped[k]
                    && group
                        .iter()
                        .all(|&g| !graph.causally_related_in_index(&order[g], &order[k]))
                {
                    group.push(k);
                }
            }

            let members: Vec<&Vertex> = group
                .iter()
                .filter_map(|&g| graph.vertex(&order[g]))
                .collect();
            let resolved = graph.resolve_conflicts(&members);

            let losers: Vec<usize> = match resolved.action {
                ActionType::Drop => group
                    .iter()
                    .copied()
                    .filter(|&g| resolved.vertices.contains(&order[g]))
                    .collect(),
                ActionType::DropLeft => vec![i],
                ActionType::DropRight => vec![j],
                ActionType::Nop | ActionType::Swap => Vec::new(),
            };

            let mut progressed = false;
            for g in losers {
                if !dropped[g] {
                    trace!(dropped = %order[g], group = group.len(), "drop from group");
                    dropped[g] = true;
                    progressed = true;
                }
            }

            if dropped[i] {
                break;
            }
            // After a drop, regroup around the same `j` without the losers.
            if !progressed {
                j += 1;
            }
        }

        if !dropped[i] && has_value(graph, &order[i]) {
            result.push(order[i].clone());
        }
        i += 1;
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::Value;

    use super::super::tests::{graph_with, ops, sorted, vertex};
    use crate::hashgraph::{
        ActionType, DrpType, Hash, HashGraph, Operation, ROOT_HASH, ResolveConflictsType,
        ResolveFn, SemanticsType, Vertex, compute_hash,
    };

    /// Keep only the `set` vertices carrying the most common value.
    fn majority() -> ResolveFn {
        Arc::new(|vs: &[&Vertex]| {
            let value = |v: &Vertex| v.operation.args().first().cloned().unwrap_or(Value::Null);
            let sets: Vec<&Vertex> =
                vs.iter().copied().filter(|v| v.operation.op_type == "set").collect();
            let count = |target: &Value| sets.iter().filter(|v| value(v) == *target).count();
            let Some(winner) = sets.iter().map(|v| value(v)).max_by_key(|val| {
                (count(val), std::cmp::Reverse(val.to_string()))
            }) else {
                return ResolveConflictsType::nop();
            };
            let losers: Vec<Hash> = sets
                .iter()
                .filter(|v| value(v) != winner)
                .map(|v| v.hash.clone())
                .collect();
            if losers.is_empty() {
                ResolveConflictsType::nop()
            } else {
                ResolveConflictsType::drop(losers)
            }
        })
    }

    #[test]
    fn majority_of_three_concurrent_writers_wins() {
        let mut graph = graph_with(majority(), SemanticsType::Multiple);
        let root = ROOT_HASH.to_string();
        graph.add_vertex(vertex("p1", &[&root], "set", 1, 1)).unwrap();
        graph.add_vertex(vertex("p2", &[&root], "set", 2, 1)).unwrap();
        graph.add_vertex(vertex("p3", &[&root], "set", 2, 2)).unwrap();

        let linear = ops(&mut graph);
        assert_eq!(linear, vec![("set".into(), 2), ("set".into(), 2)]);
    }

    #[test]
    fn group_excludes_vertices_related_to_any_member() {
        //    root
        //   /  |  \
        //  a   b   c
        //      |
        //      d      d is concurrent with a and c, but not with b
        let seen_groups = Arc::new(std::sync::Mutex::new(Vec::<usize>::new()));
        let recorder = Arc::clone(&seen_groups);
        let resolver: ResolveFn = Arc::new(move |vs| {
            recorder.lock().unwrap().push(vs.len());
            ResolveConflictsType::nop()
        });
        let mut graph = graph_with(resolver, SemanticsType::Multiple);
        let root = ROOT_HASH.to_string();
        let b = vertex("p2", &[&root], "set", 2, 1);
        let d = vertex("p2", &[&b.hash], "set", 4, 2);
        graph.add_vertex(vertex("p1", &[&root], "set", 1, 1)).unwrap();
        graph.add_vertex(b).unwrap();
        graph.add_vertex(vertex("p3", &[&root], "set", 3, 1)).unwrap();
        graph.add_vertex(d).unwrap();

        assert_eq!(ops(&mut graph).len(), 4);
        let groups = seen_groups.lock().unwrap();
        assert!(groups.iter().all(|&len| len <= 3), "no group mixes b and d: {groups:?}");
    }

    #[test]
    fn pair_verdicts_map_onto_group_members() {
        let resolver: ResolveFn =
            Arc::new(|_| ResolveConflictsType::action(ActionType::DropRight));
        let mut graph = graph_with(resolver, SemanticsType::Multiple);
        let root = ROOT_HASH.to_string();
        graph.add_vertex(vertex("p1", &[&root], "set", 1, 1)).unwrap();
        graph.add_vertex(vertex("p2", &[&root], "set", 2, 1)).unwrap();
        graph.add_vertex(vertex("p3", &[&root], "set", 3, 1)).unwrap();
        assert_eq!(ops(&mut graph).len(), 1, "anchor survives, the others drop in turn");
    }

    #[test]
    fn empty_drop_list_does_not_spin() {
        let resolver: ResolveFn = Arc::new(|_| ResolveConflictsType::drop(Vec::new()));
        let mut graph = graph_with(resolver, SemanticsType::Multiple);
        let root = ROOT_HASH.to_string();
        graph.add_vertex(vertex("p1", &[&root], "set", 1, 1)).unwrap();
        graph.add_vertex(vertex("p2", &[&root], "set", 2, 1)).unwrap();
        assert_eq!(ops(&mut graph).len(), 2);
    }

    fn grant(deps: &[&Hash], ts: i64) -> Vertex {
        let operation = Operation::new(DrpType::Acl, "grant", vec![serde_json::json!(0)]);
        let deps: Vec<Hash> = deps.iter().map(|h| (*h).clone()).collect();
        Vertex {
            hash: compute_hash("admin", &operation, &deps, ts).unwrap(),
            peer_id: "admin".into(),
            operation,
            dependencies: deps,
            timestamp: ts,
            signature: Vec::new(),
        }
    }

    #[test]
    fn concurrent_acl_vertex_does_not_hijack_majority() {
        let root = ROOT_HASH.to_string();
        let writes = vec![
            vertex("p1", &[&root], "set", 1, 1),
            vertex("p2", &[&root], "set", 2, 1),
            vertex("p3", &[&root], "set", 2, 2),
        ];
        // Pick a timestamp that sorts the grant after every write, so it
        // only ever joins groups anchored on a DRP vertex.
        let acl_vertex = (1..64)
            .map(|ts| grant(&[&root], ts))
            .find(|g| {
                let mut all = writes.clone();
                all.push(g.clone());
                sorted(&all).last() == Some(&g.hash)
            })
            .expect("some timestamp sorts the grant last");

        let drops_right: ResolveFn =
            Arc::new(|_| ResolveConflictsType::action(ActionType::DropRight));
        let mut graph = HashGraph::new(
            "local",
            Some(drops_right),
            Some(majority()),
            Some(SemanticsType::Multiple),
        );
        for v in writes {
            graph.add_vertex(v).unwrap();
        }
        graph.add_vertex(acl_vertex).unwrap();

        assert_eq!(
            ops(&mut graph),
            vec![("set".into(), 2), ("set".into(), 2), ("grant".into(), 0)]
        );
    }
}
