//! End-to-end runs of the simulator under arbitrary seeds and fault mixes.

use drp_sim::campaign::{CampaignConfig, run_campaign, run_seed};
use drp_sim::network::FaultConfig;
use drp_sim::{SimulationConfig, Simulator, TraceEventKind};
use proptest::prelude::*;

fn arb_fault() -> impl Strategy<Value = FaultConfig> {
    (0_u8..=4, 0_u8..=40, 0_u8..=20, 0_u8..=40, 0_u8..=25).prop_map(
        |(delay, drop, duplicate, reorder, partition)| FaultConfig {
            max_delay_rounds: delay,
            drop_rate_percent: drop,
            duplicate_rate_percent: duplicate,
            reorder_rate_percent: reorder,
            partition_rate_percent: partition,
        },
    )
}

proptest! {
    #![proptest_config(proptest::test_runner::Config::with_cases(16))]

    #[test]
    fn any_seed_and_fault_mix_converges(
        seed in any::<u64>(),
        replicas in 2_usize..5,
        fault in arb_fault(),
    ) {
        let config = CampaignConfig {
            seed_range: seed..seed.saturating_add(1),
            replica_count: replicas,
            rounds: 12,
            fault,
            causality_samples: 8,
            ..CampaignConfig::default()
        };
        let run = run_seed(seed, &config).expect("simulation");
        prop_assert!(run.oracle.passed, "{:?}", run.oracle.violations);
    }
}

#[test]
fn same_seed_same_history() {
    let config = SimulationConfig {
        seed: 99,
        ..SimulationConfig::default()
    };
    let first = Simulator::new(config).expect("sim").run().expect("run");
    let second = Simulator::new(config).expect("sim").run().expect("run");
    assert_eq!(first.trace, second.trace);
    assert_eq!(first.states, second.states);
}

#[test]
fn different_seeds_take_different_paths() {
    let run = |seed| {
        Simulator::new(SimulationConfig {
            seed,
            ..SimulationConfig::default()
        })
        .expect("sim")
        .run()
        .expect("run")
    };
    assert_ne!(run(1).trace, run(2).trace);
}

#[test]
fn total_partition_still_converges_after_healing() {
    let config = SimulationConfig {
        seed: 3,
        rounds: 16,
        fault: FaultConfig {
            partition_rate_percent: 100,
            ..FaultConfig::reliable()
        },
        ..SimulationConfig::default()
    };
    let mut sim = Simulator::new(config).expect("sim");
    let result = sim.run().expect("run");
    assert!(
        result
            .trace
            .iter()
            .any(|e| matches!(e.kind, TraceEventKind::Partition { isolated: true, .. }))
    );
    let first = &result.states[0];
    for other in &result.states[1..] {
        assert_eq!(first.drp, other.drp);
        assert_eq!(first.frontier, other.frontier);
    }
}

#[test]
fn campaign_over_fifty_seeds_passes() {
    let report = run_campaign(&CampaignConfig {
        seed_range: 0..50,
        replica_count: 3,
        rounds: 12,
        causality_samples: 4,
        ..CampaignConfig::default()
    })
    .expect("campaign");
    assert_eq!(report.seeds_run, 50);
    assert!(report.all_passed(), "{:?}", report.failures);
}
