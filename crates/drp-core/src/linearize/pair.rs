//! Pairwise linearization.
//!
//! Scans the topological order left to right. Each surviving vertex `i` is
//! compared with every later surviving vertex `j` that it is concurrent
//! with, and the 2-ary resolver decides:
//!
//! - `DropLeft`: `i` is dropped and the scan moves on to `i + 1`.
//! - `DropRight`: `j` is dropped and the inner scan continues.
//! - `Swap`: positions `i` and `j` are exchanged, together with their
//!   reachability index positions, and the inner scan restarts right after
//!   `i`. When a live vertex strictly between the two is an ancestor of
//!   `j` or a descendant of `i`, a plain exchange would put an operation
//!   before its dependency; instead `j` moves in front of `i` carrying its
//!   in-between ancestors, and the rest keep their relative order.
//! - anything else: continue with `j + 1`.
//!
//! A resolver that keeps answering `Swap` for a cycle of vertices can make
//! this loop forever; swap decisions must be transitive.

use tracing::trace;

use super::{emit_plain, has_value};
use crate::collections::ObjectSet;
use crate::hashgraph::{ActionType, Hash, HashGraph, HashGraphError};

/// Linearize with pair semantics.
///
/// # Errors
///
/// Propagates topological sort failures.
pub fn linearize_pair_semantics(
    graph: &mut HashGraph,
    origin: Option<&Hash>,
    subgraph: Option<&ObjectSet<Hash>>,
) -> Result<Vec<Hash>, HashGraphError> {
    let mut order = graph.topological_sort(true, origin, subgraph)?;
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

            let action = match (graph.vertex(&order[i]), graph.vertex(&order[j])) {
                (Some(left), Some(right)) => graph.resolve_pair(left, right).action,
                _ => ActionType::Nop,
            };

            match action {
                ActionType::DropLeft => {
                    trace!(dropped = %order[i], against = %order[j], "drop left");
                    dropped[i] = true;
                    break;
                }
                ActionType::DropRight => {
                    trace!(dropped = %order[j], against = %order[i], "drop right");
                    dropped[j] = true;
                    j += 1;
                }
                ActionType::Swap => {
                    trace!(left = %order[i], right = %order[j], "swap");
                    if straddles_relative(graph, &order, &dropped, i, j) {
                        hoist(graph, &mut order, &mut dropped, i, j);
                    } else {
                        exchange(graph, &mut order, &mut dropped, i, j);
                    }
                    if dropped[i] {
                        break;
                    }
                    j = i + 1;
                }
                ActionType::Nop | ActionType::Drop => j += 1,
            }
        }

        if !dropped[i] && has_value(graph, &order[i]) {
            result.push(order[i].clone());
        }
        i += 1;
    }

    Ok(result)
}

/// True when a live vertex strictly between `i` and `j` is causally tied
/// to the pair in a way a plain exchange would break.
fn straddles_relative(
    graph: &HashGraph,
    order: &[Hash],
    dropped: &[bool],
    i: usize,
    j: usize,
) -> bool {
    (i + 1..j).any(|k| {
        !dropped[k]
            && (graph.precedes_in_index(&order[k], &order[j])
                || graph.precedes_in_index(&order[i], &order[k]))
    })
}

fn exchange(
    graph: &mut HashGraph,
    order: &mut [Hash],
    dropped: &mut [bool],
    a: usize,
    b: usize,
) {
    order.swap(a, b);
    dropped.swap(a, b);
    graph.swap_reachable_predecessors(&order[a], &order[b]);
}

/// Move `order[j]`, together with its ancestors strictly between `i` and
/// `j`, in front of `order[i]`, keeping relative order within both parts.
/// Done as adjacent exchanges so the index positions follow the order.
fn hoist(
    graph: &mut HashGraph,
    order: &mut [Hash],
    dropped: &mut [bool],
    i: usize,
    j: usize,
) {
    let target = order[j].clone();
    let mut slot = i;
    for k in i..=j {
        // Entries right of `k` are untouched so far.
        if k == j || (k > i && graph.precedes_in_index(&order[k], &target)) {
            for p in (slot..k).rev() {
                exchange(graph, order, dropped, p, p + 1);
            }
            slot += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::super::tests::{graph_with, ops, sorted, vertex};
    use crate::hashgraph::{
        ActionType, ROOT_HASH, ResolveConflictsType, ResolveFn, SemanticsType,
    };

    fn by_op_type(rule: fn(&str, &str) -> ActionType) -> ResolveFn {
        Arc::new(move |vs| {
            ResolveConflictsType::action(rule(&vs[0].operation.op_type, &vs[1].operation.op_type))
        })
    }

    #[test]
    fn drop_right_removes_later_concurrent_op() {
        let mut graph = graph_with(
            by_op_type(|_, _| ActionType::DropRight),
            SemanticsType::Pair,
        );
        let root = ROOT_HASH.to_string();
        graph.add_vertex(vertex("p1", &[&root], "add", 1, 1)).unwrap();
        graph.add_vertex(vertex("p2", &[&root], "add", 2, 1)).unwrap();
        assert_eq!(ops(&mut graph).len(), 1);
    }

    #[test]
    fn drop_left_removes_anchor() {
        let mut graph = graph_with(
            by_op_type(|left, _| {
                if left == "rm" {
                    ActionType::DropLeft
                } else {
                    ActionType::DropRight
                }
            }),
            SemanticsType::Pair,
        );
        let root = ROOT_HASH.to_string();
        graph.add_vertex(vertex("p1", &[&root], "rm", 1, 1)).unwrap();
        graph.add_vertex(vertex("p2", &[&root], "add", 2, 1)).unwrap();
        assert_eq!(ops(&mut graph), vec![("add".to_string(), 2)]);
    }

    #[test]
    fn causally_related_ops_are_never_compared() {
        let mut graph = graph_with(
            by_op_type(|_, _| ActionType::DropLeft),
            SemanticsType::Pair,
        );
        let root = ROOT_HASH.to_string();
        let a = vertex("p1", &[&root], "add", 1, 1);
        let b = vertex("p1", &[&a.hash], "add", 2, 2);
        graph.add_vertex(a).unwrap();
        graph.add_vertex(b).unwrap();
        assert_eq!(ops(&mut graph).len(), 2);
    }

    #[test]
    fn swap_puts_mul_before_concurrent_add() {
        let mut graph = graph_with(
            by_op_type(|left, right| {
                if left == "add" && right == "mul" {
                    ActionType::Swap
                } else {
                    ActionType::Nop
                }
            }),
            SemanticsType::Pair,
        );
        let root = ROOT_HASH.to_string();
        let add = vertex("p1", &[&root], "add", 3, 1);
        let mul = vertex("p2", &[&root], "mul", 2, 1);
        graph.add_vertex(add).unwrap();
        graph.add_vertex(mul).unwrap();

        let linear = ops(&mut graph);
        assert_eq!(linear, vec![("mul".to_string(), 2), ("add".to_string(), 3)]);
    }

    #[test]
    fn swap_keeps_descendants_after_their_dependency() {
        //   root
        //   /   \
        // add   mul
        //  |
        // add2
        let mut graph = graph_with(
            by_op_type(|left, right| {
                if left == "add" && right == "mul" {
                    ActionType::Swap
                } else {
                    ActionType::Nop
                }
            }),
            SemanticsType::Pair,
        );
        let root = ROOT_HASH.to_string();
        let add = vertex("p1", &[&root], "add", 3, 1);
        let add2 = vertex("p1", &[&add.hash], "add", 4, 2);
        let mul = vertex("p2", &[&root], "mul", 2, 1);
        graph.add_vertex(add).unwrap();
        graph.add_vertex(add2).unwrap();
        graph.add_vertex(mul).unwrap();

        let linear = ops(&mut graph);
        let position = |op: (&str, i64)| {
            linear
                .iter()
                .position(|(t, n)| t == op.0 && *n == op.1)
                .unwrap()
        };
        assert_eq!(linear.len(), 3);
        assert!(position(("mul", 2)) < position(("add", 3)));
        assert!(position(("add", 3)) < position(("add", 4)));
    }

    #[test]
    fn swap_carries_intermediate_ancestors_along() {
        //    root
        //   /    \
        // add     x
        //         |
        //        mul
        let mut graph = graph_with(
            by_op_type(|left, right| {
                if left == "add" && right == "mul" {
                    ActionType::Swap
                } else {
                    ActionType::Nop
                }
            }),
            SemanticsType::Pair,
        );
        let root = ROOT_HASH.to_string();
        let add = vertex("p1", &[&root], "add", 3, 1);
        let x = vertex("p2", &[&root], "set", 7, 1);
        let mul = vertex("p2", &[&x.hash], "mul", 2, 2);
        graph.add_vertex(add).unwrap();
        graph.add_vertex(x).unwrap();
        graph.add_vertex(mul).unwrap();

        let linear = ops(&mut graph);
        let position = |name: &str| linear.iter().position(|(t, _)| t == name).unwrap();
        assert_eq!(linear.len(), 3);
        assert!(position("set") < position("mul"), "dependency stays first");
        assert!(position("mul") < position("add"));
    }

    #[test]
    fn swap_exchanges_only_the_two_positions() {
        let root = ROOT_HASH.to_string();
        let siblings = vec![
            vertex("p1", &[&root], "add", 1, 1),
            vertex("p2", &[&root], "set", 2, 1),
            vertex("p3", &[&root], "mul", 3, 1),
        ];
        let order = sorted(&siblings);
        let (first, middle, last) = (order[1].clone(), order[2].clone(), order[3].clone());

        let (left, right) = (first.clone(), last.clone());
        let resolver: ResolveFn = Arc::new(move |vs| {
            if vs[0].hash == left && vs[1].hash == right {
                ResolveConflictsType::action(ActionType::Swap)
            } else {
                ResolveConflictsType::nop()
            }
        });
        let mut graph = graph_with(resolver, SemanticsType::Pair);
        for v in siblings {
            graph.add_vertex(v).unwrap();
        }

        let linear = graph.linearize_vertices(None, None).unwrap();
        assert_eq!(linear, vec![last, middle, first]);
    }

    #[test]
    fn swap_leaves_index_consistent_with_graph() {
        let root = ROOT_HASH.to_string();
        let a = vertex("p1", &[&root], "add", 1, 1);
        let b = vertex("p2", &[&root], "add", 2, 1);
        let c = vertex("p3", &[&a.hash], "add", 3, 2);
        let d = vertex("p4", &[&root], "mul", 4, 1);
        let mut graph = graph_with(
            by_op_type(|left, right| {
                if left == "add" && right == "mul" {
                    ActionType::Swap
                } else {
                    ActionType::Nop
                }
            }),
            SemanticsType::Pair,
        );
        let hashes = [root, a.hash.clone(), b.hash.clone(), c.hash.clone(), d.hash.clone()];
        for v in [a, b, c, d] {
            graph.add_vertex(v).unwrap();
        }

        assert_eq!(ops(&mut graph).len(), 4);
        for x in &hashes {
            for y in &hashes {
                assert_eq!(
                    graph.causally_related_in_index(x, y),
                    graph.are_causally_related_using_bfs(x, y),
                    "({x}, {y})"
                );
            }
        }
    }

    #[test]
    fn acl_vertex_on_the_right_goes_to_acl_resolver() {
        use crate::hashgraph::{DrpType, HashGraph, Operation, Vertex, compute_hash};

        let root = ROOT_HASH.to_string();
        let grant = {
            let operation = Operation::new(DrpType::Acl, "grant", vec![serde_json::json!(0)]);
            let deps = vec![root.clone()];
            Vertex {
                hash: compute_hash("admin", &operation, &deps, 1).unwrap(),
                peer_id: "admin".into(),
                operation,
                dependencies: deps,
                timestamp: 1,
                signature: Vec::new(),
            }
        };
        let set = vertex("p1", &[&root], "set", 5, 1);

        let acl: ResolveFn = Arc::new(|vs| {
            if vs[0].operation.op_type == "grant" {
                ResolveConflictsType::action(ActionType::DropRight)
            } else {
                ResolveConflictsType::action(ActionType::DropLeft)
            }
        });
        let drp: ResolveFn = Arc::new(|_| ResolveConflictsType::nop());
        let mut graph = HashGraph::new("local", Some(acl), Some(drp), Some(SemanticsType::Pair));
        graph.add_vertex(grant).unwrap();
        graph.add_vertex(set).unwrap();

        assert_eq!(ops(&mut graph), vec![("grant".to_string(), 0)]);
    }
}
