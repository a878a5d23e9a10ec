use drp_core::collections::ObjectSet;
use proptest::prelude::*;

use generators::*;

proptest! {
    #![proptest_config(proptest::test_runner::Config::with_cases(256))]

    #[test]
    fn bitsets_agree_with_bfs(shape in arb_dag_shape(24)) {
        let (mut graph, hashes) = build_graph(&shape, None);
        for a in &hashes {
            for b in &hashes {
                let by_bitset = graph.are_causally_related_using_bitsets(a, b).unwrap();
                let by_bfs = graph.are_causally_related_using_bfs(a, b);
                prop_assert_eq!(by_bitset, by_bfs, "{} vs {}", a, b);
            }
        }
    }

    #[test]
    fn lca_is_ancestor_of_every_input(
        shape in arb_dag_shape(24),
        picks in prop::collection::vec(any::<prop::sample::Index>(), 1..4),
    ) {
        let (graph, hashes) = build_graph(&shape, None);
        let mut inputs: Vec<_> = picks
            .iter()
            .map(|p| hashes[p.index(hashes.len())].clone())
            .collect();
        inputs.sort();
        inputs.dedup();

        let mut visited = ObjectSet::new();
        let lca = graph.lowest_common_ancestor_multiple_vertices(&inputs, &mut visited).unwrap();
        prop_assert!(visited.contains(&lca));
        for input in &inputs {
            prop_assert!(lca == *input || graph.is_ancestor(&lca, input), "{} !< {}", lca, input);
            prop_assert!(visited.contains(input));
        }
    }

    #[test]
    fn both_sorts_respect_dependencies(shape in arb_dag_shape(24)) {
        let (mut graph, hashes) = build_graph(&shape, None);
        prop_assert!(graph.self_check_constraints());
        let dfs = graph.topological_sort(true, None, None).unwrap();
        let kahn = graph.kahns_algorithm(&hashes[0], None).unwrap();
        prop_assert_eq!(dfs.len(), hashes.len());
        prop_assert_eq!(kahn.len(), hashes.len());

        for order in [&dfs, &kahn] {
            let position = |h: &String| order.iter().position(|x| x == h).unwrap();
            for hash in &hashes {
                for dep in graph.dependencies(hash) {
                    prop_assert!(position(dep) < position(hash));
                }
            }
        }
    }

    #[test]
    fn frontier_is_exactly_the_tips(shape in arb_dag_shape(24)) {
        let (graph, hashes) = build_graph(&shape, None);
        let mut tips: Vec<_> = hashes
            .iter()
            .filter(|h| graph.dependents(h).is_empty())
            .cloned()
            .collect();
        let mut frontier = graph.frontier().to_vec();
        tips.sort();
        frontier.sort();
        prop_assert_eq!(tips, frontier);
    }
}
