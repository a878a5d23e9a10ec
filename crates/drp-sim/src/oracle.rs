use std::fmt;

use anyhow::Result;
use drp_core::{Hash, Vertex};

use crate::replica::{Replica, ReplicaId, ReplicaState};
use crate::rng::DeterministicRng;

/// Outcome of one or more invariant checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleResult {
    /// `true` iff no violations were found.
    pub passed: bool,
    pub violations: Vec<InvariantViolation>,
}

impl OracleResult {
    fn pass() -> Self {
        Self {
            passed: true,
            violations: Vec::new(),
        }
    }

    fn from_violations(violations: Vec<InvariantViolation>) -> Self {
        Self {
            passed: violations.is_empty(),
            violations,
        }
    }

    #[must_use]
    fn merge(mut self, other: Self) -> Self {
        self.passed &= other.passed;
        self.violations.extend(other.violations);
        self
    }
}

/// Which projection two replicas disagree on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Projection {
    Frontier,
    DrpState,
    Operations,
}

impl fmt::Display for Projection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Frontier => "frontier",
            Self::DrpState => "drp state",
            Self::Operations => "linearized operations",
        })
    }
}

/// A single failed invariant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    /// Two replicas hold different vertex sets after anti-entropy.
    MissingVertices {
        replica_a: ReplicaId,
        replica_b: ReplicaId,
        only_in_a: Vec<Hash>,
        only_in_b: Vec<Hash>,
    },

    /// Same vertices, different derived state.
    Divergence {
        replica_a: ReplicaId,
        replica_b: ReplicaId,
        projection: Projection,
    },

    /// Re-merging known history changed state or left vertices unadmitted.
    Idempotence {
        replica: ReplicaId,
        missing: Vec<Hash>,
        state_changed: bool,
    },

    /// The reachability index and a graph walk disagree on a pair.
    Causality {
        replica: ReplicaId,
        a: Hash,
        b: Hash,
        by_bitsets: bool,
        by_bfs: bool,
    },
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingVertices {
                replica_a,
                replica_b,
                only_in_a,
                only_in_b,
            } => write!(
                f,
                "Convergence: replicas {replica_a} and {replica_b} hold different vertices \
                 (only_in_a={}, only_in_b={})",
                only_in_a.len(),
                only_in_b.len()
            ),
            Self::Divergence {
                replica_a,
                replica_b,
                projection,
            } => write!(
                f,
                "Convergence: replicas {replica_a} and {replica_b} disagree on {projection}"
            ),
            Self::Idempotence {
                replica,
                missing,
                state_changed,
            } => write!(
                f,
                "Idempotence: re-merge on replica {replica} left {} missing, \
                 state_changed={state_changed}",
                missing.len()
            ),
            Self::Causality {
                replica,
                a,
                b,
                by_bitsets,
                by_bfs,
            } => write!(
                f,
                "Causality: replica {replica} pair ({a}, {b}) bitsets={by_bitsets} bfs={by_bfs}"
            ),
        }
    }
}

/// Invariant checks run over replicas after the anti-entropy phase.
pub struct ConvergenceOracle;

impl ConvergenceOracle {
    /// Every replica matches the first one on vertices, frontier, DRP
    /// state and linearized operations.
    #[must_use]
    pub fn check_convergence(states: &[ReplicaState]) -> OracleResult {
        let Some((reference, rest)) = states.split_first() else {
            return OracleResult::pass();
        };
        let mut violations = Vec::new();
        for other in rest {
            if reference.vertex_hashes != other.vertex_hashes {
                violations.push(InvariantViolation::MissingVertices {
                    replica_a: reference.id,
                    replica_b: other.id,
                    only_in_a: reference
                        .vertex_hashes
                        .difference(&other.vertex_hashes)
                        .cloned()
                        .collect(),
                    only_in_b: other
                        .vertex_hashes
                        .difference(&reference.vertex_hashes)
                        .cloned()
                        .collect(),
                });
                continue;
            }
            let checks = [
                (Projection::Frontier, reference.frontier == other.frontier),
                (Projection::DrpState, reference.drp == other.drp),
                (Projection::Operations, reference.operations == other.operations),
            ];
            violations.extend(checks.into_iter().filter(|(_, same)| !same).map(
                |(projection, _)| InvariantViolation::Divergence {
                    replica_a: reference.id,
                    replica_b: other.id,
                    projection,
                },
            ));
        }
        OracleResult::from_violations(violations)
    }

    /// Re-merging the union of every replica's history admits nothing new
    /// and changes nothing.
    ///
    /// # Errors
    ///
    /// Fails if a replica's state cannot be computed.
    pub fn check_idempotence(replicas: &mut [Replica]) -> Result<OracleResult> {
        let everything: Vec<Vertex> = replicas.iter().flat_map(Replica::history).collect();
        let mut violations = Vec::new();
        for replica in replicas.iter_mut() {
            let before = replica.state()?;
            let missing = replica.receive(&everything)?;
            let after = replica.state()?;
            let state_changed = before != after;
            if state_changed || !missing.is_empty() {
                violations.push(InvariantViolation::Idempotence {
                    replica: replica.id(),
                    missing,
                    state_changed,
                });
            }
        }
        Ok(OracleResult::from_violations(violations))
    }

    /// On `samples` random vertex pairs per replica, the bitset index and a
    /// breadth-first walk agree on causal relatedness.
    ///
    /// # Errors
    ///
    /// Fails if the reachability index cannot be rebuilt.
    pub fn check_causality(
        replicas: &mut [Replica],
        rng: &mut DeterministicRng,
        samples: usize,
    ) -> Result<OracleResult> {
        let mut violations = Vec::new();
        for replica in replicas.iter_mut() {
            let hashes: Vec<Hash> = replica
                .history()
                .into_iter()
                .map(|v| v.hash)
                .collect();
            for _ in 0..samples {
                let (Some(a), Some(b)) = (rng.pick(&hashes), rng.pick(&hashes)) else {
                    break;
                };
                let graph = replica.object_mut().hash_graph_mut();
                let by_bitsets = graph.are_causally_related_using_bitsets(a, b)?;
                let by_bfs = graph.are_causally_related_using_bfs(a, b);
                if by_bitsets != by_bfs {
                    violations.push(InvariantViolation::Causality {
                        replica: replica.id(),
                        a: a.clone(),
                        b: b.clone(),
                        by_bitsets,
                        by_bfs,
                    });
                }
            }
        }
        Ok(OracleResult::from_violations(violations))
    }

    /// Convergence, then causality, then idempotence (which mutates).
    ///
    /// # Errors
    ///
    /// Fails if replica state cannot be computed.
    pub fn check_all(
        replicas: &mut [Replica],
        rng: &mut DeterministicRng,
        causality_samples: usize,
    ) -> Result<OracleResult> {
        let states = replicas
            .iter_mut()
            .map(Replica::state)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::check_convergence(&states)
            .merge(Self::check_causality(replicas, rng, causality_samples)?)
            .merge(Self::check_idempotence(replicas)?))
    }
}
