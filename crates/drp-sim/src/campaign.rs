//! Campaign runner: many seeds, one report.
//!
//! Each seed runs a full simulation followed by the oracle suite. The report
//! names the first failing seed so it can be replayed with
//! [`replay_seed`].

use std::ops::Range;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::clock::ClockConfig;
use crate::network::FaultConfig;
use crate::oracle::{ConvergenceOracle, OracleResult};
use crate::rng::DeterministicRng;
use crate::{SimulationConfig, SimulationResult, Simulator};

/// Stream id for the oracle's sampling RNG, kept apart from the run's.
const ORACLE_STREAM: u64 = 0xDEAD;

/// Settings shared by every seed of a campaign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignConfig {
    pub seed_range: Range<u64>,
    pub replica_count: usize,
    pub rounds: u64,
    pub fanout: usize,
    pub op_rate_percent: u8,
    pub fault: FaultConfig,
    pub clock: ClockConfig,
    /// Vertex pairs per replica checked for causality agreement.
    pub causality_samples: usize,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            seed_range: 0..100,
            replica_count: 4,
            rounds: 24,
            fanout: 2,
            op_rate_percent: 60,
            fault: FaultConfig {
                max_delay_rounds: 3,
                drop_rate_percent: 10,
                duplicate_rate_percent: 5,
                reorder_rate_percent: 10,
                partition_rate_percent: 5,
            },
            clock: ClockConfig::default(),
            causality_samples: 16,
        }
    }
}

impl CampaignConfig {
    #[must_use]
    pub fn sim_config_for_seed(&self, seed: u64) -> SimulationConfig {
        SimulationConfig {
            seed,
            replica_count: self.replica_count,
            rounds: self.rounds,
            fanout: self.fanout,
            op_rate_percent: self.op_rate_percent,
            fault: self.fault,
            clock: self.clock,
        }
    }

    /// # Errors
    ///
    /// Returns an error if the seed range is empty or the per-seed
    /// simulation config is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.seed_range.is_empty() {
            bail!("seed_range must not be empty");
        }
        self.sim_config_for_seed(self.seed_range.start).validate()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedFailure {
    pub seed: u64,
    pub violations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignReport {
    pub seeds_run: usize,
    pub seeds_passed: usize,
    /// Lowest failing seed, for replay.
    pub first_failure: Option<u64>,
    pub failures: Vec<SeedFailure>,
    /// Seeds whose run hit at least one drop, partition or early delivery.
    pub interesting_states_reached: usize,
}

impl CampaignReport {
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.failures.is_empty()
    }
}

/// One seed, simulated and checked.
#[derive(Debug, Clone)]
pub struct SeedRun {
    pub result: SimulationResult,
    pub oracle: OracleResult,
}

/// # Errors
///
/// Returns an error if the config is invalid or a simulation fails
/// internally. Invariant violations are reported, not returned as errors.
pub fn run_campaign(config: &CampaignConfig) -> Result<CampaignReport> {
    config.validate()?;

    let mut report = CampaignReport {
        seeds_run: 0,
        seeds_passed: 0,
        first_failure: None,
        failures: Vec::new(),
        interesting_states_reached: 0,
    };
    for seed in config.seed_range.clone() {
        let run = run_seed(seed, config)?;
        report.seeds_run += 1;
        if run.result.interesting_state_reached {
            report.interesting_states_reached += 1;
        }
        if run.oracle.passed {
            report.seeds_passed += 1;
        } else {
            warn!(seed, violations = run.oracle.violations.len(), "seed failed");
            report.first_failure.get_or_insert(seed);
            report.failures.push(SeedFailure {
                seed,
                violations: run.oracle.violations.iter().map(ToString::to_string).collect(),
            });
        }
    }
    info!(
        seeds_run = report.seeds_run,
        seeds_passed = report.seeds_passed,
        first_failure = ?report.first_failure,
        "campaign finished"
    );
    Ok(report)
}

/// Simulate `seed` and run the oracle suite on the resulting replicas.
///
/// # Errors
///
/// Returns an error if the simulation or an oracle check fails internally.
pub fn run_seed(seed: u64, config: &CampaignConfig) -> Result<SeedRun> {
    let mut simulator = Simulator::new(config.sim_config_for_seed(seed))?;
    let result = simulator.run()?;
    let mut oracle_rng = DeterministicRng::new(seed).fork(ORACLE_STREAM);
    let oracle = ConvergenceOracle::check_all(
        simulator.replicas_mut(),
        &mut oracle_rng,
        config.causality_samples,
    )?;
    Ok(SeedRun { result, oracle })
}

/// Re-run a single seed, typically the report's `first_failure`.
///
/// # Errors
///
/// Returns an error if the config is invalid or the run fails internally.
pub fn replay_seed(seed: u64, config: &CampaignConfig) -> Result<SeedRun> {
    config.validate()?;
    run_seed(seed, config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small(seeds: Range<u64>) -> CampaignConfig {
        CampaignConfig {
            seed_range: seeds,
            replica_count: 3,
            rounds: 10,
            causality_samples: 8,
            ..CampaignConfig::default()
        }
    }

    #[test]
    fn default_config_is_valid() {
        assert!(CampaignConfig::default().validate().is_ok());
    }

    #[test]
    fn empty_seed_range_rejected() {
        assert!(small(5..5).validate().is_err());
    }

    #[test]
    fn zero_replicas_rejected() {
        let config = CampaignConfig {
            replica_count: 0,
            ..CampaignConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn sim_config_carries_seed_and_shape() {
        let config = CampaignConfig::default();
        let sim = config.sim_config_for_seed(42);
        assert_eq!(sim.seed, 42);
        assert_eq!(sim.replica_count, config.replica_count);
        assert_eq!(sim.fault, config.fault);
    }

    #[test]
    fn faulty_seeds_all_pass_after_anti_entropy() {
        let report = run_campaign(&small(0..12)).expect("campaign");
        assert_eq!(report.seeds_run, 12);
        assert!(report.all_passed(), "{:?}", report.failures);
        assert!(report.first_failure.is_none());
    }

    #[test]
    fn heavy_faults_reach_interesting_states() {
        let config = CampaignConfig {
            fault: FaultConfig {
                max_delay_rounds: 3,
                drop_rate_percent: 30,
                duplicate_rate_percent: 15,
                reorder_rate_percent: 30,
                partition_rate_percent: 20,
            },
            ..small(0..8)
        };
        let report = run_campaign(&config).expect("campaign");
        assert!(report.interesting_states_reached > 0);
        assert!(report.all_passed(), "{:?}", report.failures);
    }

    #[test]
    fn replay_is_deterministic() {
        let config = small(0..1);
        let first = replay_seed(7, &config).expect("replay");
        let second = replay_seed(7, &config).expect("replay");
        assert_eq!(first.result.trace, second.result.trace);
        assert_eq!(first.oracle, second.oracle);
    }

    #[test]
    fn report_serializes_to_json() {
        let report = CampaignReport {
            seeds_run: 10,
            seeds_passed: 9,
            first_failure: Some(7),
            failures: vec![SeedFailure {
                seed: 7,
                violations: vec!["Convergence: replicas 0 and 1 disagree on frontier".into()],
            }],
            interesting_states_reached: 5,
        };
        let json = serde_json::to_string(&report).expect("serialize");
        assert!(json.contains("\"seeds_run\":10"));
        assert!(json.contains("\"first_failure\":7"));
    }
}
