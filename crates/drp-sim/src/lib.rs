//! drp-sim library.
//!
//! Deterministic simulation of replicas of one DRP object gossiping over a
//! lossy network. A seed fixes every random choice: which replica does what,
//! which messages are dropped, delayed, duplicated or reordered, and which
//! replicas are partitioned. After the faulty rounds an anti-entropy phase
//! exchanges full histories, then [`oracle::ConvergenceOracle`] checks that
//! all replicas agree.
//!
//! # Conventions
//!
//! - **Errors**: Use `anyhow::Result` for return types.
//! - **Logging**: Use `tracing` macros (`info!`, `warn!`, `error!`, `debug!`, `trace!`).

pub mod campaign;
pub mod clock;
pub mod network;
pub mod oracle;
pub mod replica;
pub mod rng;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clock::{ClockConfig, SimulatedClock, SimulatedTime};
use crate::network::{FaultConfig, GossipMessage, SimulatedNetwork};
use crate::replica::{LocalOp, Replica, ReplicaId, ReplicaState, shared_acl};
use crate::rng::DeterministicRng;

/// Anti-entropy gives up after this many full exchanges.
const MAX_ANTI_ENTROPY_PASSES: usize = 8;

/// Parameters of one simulation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub seed: u64,
    pub replica_count: usize,
    pub rounds: u64,
    /// Peers each new vertex is gossiped to.
    pub fanout: usize,
    /// Chance per round that a given replica performs an operation.
    pub op_rate_percent: u8,
    pub fault: FaultConfig,
    pub clock: ClockConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            replica_count: 4,
            rounds: 24,
            fanout: 2,
            op_rate_percent: 60,
            fault: FaultConfig::default(),
            clock: ClockConfig::default(),
        }
    }
}

impl SimulationConfig {
    /// # Errors
    ///
    /// Returns an error for a run that cannot be simulated.
    pub fn validate(&self) -> Result<()> {
        if self.replica_count == 0 {
            bail!("replica_count must be > 0");
        }
        if self.rounds == 0 {
            bail!("rounds must be > 0");
        }
        if self.fault.drop_rate_percent > 100
            || self.fault.duplicate_rate_percent > 100
            || self.fault.reorder_rate_percent > 100
            || self.fault.partition_rate_percent > 100
        {
            bail!("fault percentages must be <= 100");
        }
        if self.clock.tick_millis <= 0 || self.clock.max_abs_skew_millis < 0 {
            bail!("clock tick must be positive and skew non-negative");
        }
        Ok(())
    }
}

/// What happened, in order. Carries no hashes or timestamps, so two runs
/// with the same seed produce equal traces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TraceEventKind {
    Operation {
        replica: ReplicaId,
        op: LocalOp,
        changed: bool,
    },
    Send {
        from: ReplicaId,
        to: ReplicaId,
        dropped: bool,
        duplicated: bool,
        delay_rounds: u8,
    },
    Deliver {
        from: ReplicaId,
        to: ReplicaId,
        vertices: usize,
        missing: usize,
    },
    Reorder {
        messages: usize,
    },
    Partition {
        replica: ReplicaId,
        isolated: bool,
    },
    AntiEntropy {
        pass: usize,
        missing: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub round: u64,
    #[serde(flatten)]
    pub kind: TraceEventKind,
}

/// Outcome of [`Simulator::run`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationResult {
    pub seed: u64,
    pub trace: Vec<TraceEvent>,
    /// Replica states after anti-entropy.
    pub states: Vec<ReplicaState>,
    pub anti_entropy_passes: usize,
    /// A drop, partition, or out-of-order delivery that left vertices
    /// unadmitted happened at least once.
    pub interesting_state_reached: bool,
}

/// Seeded driver for one run.
#[derive(Debug)]
pub struct Simulator {
    config: SimulationConfig,
    rng: DeterministicRng,
    network: SimulatedNetwork,
    time: SimulatedTime,
    replicas: Vec<Replica>,
    trace: Vec<TraceEvent>,
    round: u64,
    interesting: bool,
}

impl Simulator {
    /// # Errors
    ///
    /// Returns an error if the config is invalid or a replica cannot be
    /// created.
    pub fn new(config: SimulationConfig) -> Result<Self> {
        config.validate()?;
        let acl = shared_acl(config.seed)?;
        let mut rng = DeterministicRng::new(config.seed);
        let mut clock_rng = rng.fork(config.seed);
        let time = SimulatedTime::default();
        let replicas = (0..config.replica_count)
            .map(|id| {
                let clock = SimulatedClock::assign(&config.clock, &time, &mut clock_rng);
                Replica::new(id, acl.clone(), clock, config.clock.tolerated_skew_millis())
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            config,
            rng,
            network: SimulatedNetwork::new(config.fault),
            time,
            replicas,
            trace: Vec::new(),
            round: 0,
            interesting: false,
        })
    }

    #[must_use]
    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    #[must_use]
    pub fn replicas(&self) -> &[Replica] {
        &self.replicas
    }

    /// Replicas, for oracle checks after [`Self::run`].
    pub fn replicas_mut(&mut self) -> &mut [Replica] {
        &mut self.replicas
    }

    fn set_round(&mut self, round: u64) {
        self.round = round;
        self.time.advance_to(round);
    }

    fn record(&mut self, kind: TraceEventKind) {
        self.trace.push(TraceEvent {
            round: self.round,
            kind,
        });
    }

    /// Run every faulty round, then anti-entropy.
    ///
    /// # Errors
    ///
    /// Propagates replica failures; a run that cannot reach quiescence is
    /// reported through the oracle, not here.
    pub fn run(&mut self) -> Result<SimulationResult> {
        info!(
            seed = self.config.seed,
            replicas = self.config.replica_count,
            rounds = self.config.rounds,
            "simulation started"
        );
        for round in 0..self.config.rounds {
            self.set_round(round);
            self.step()?;
        }
        self.set_round(self.config.rounds);
        let passes = self.anti_entropy()?;

        let states = self
            .replicas
            .iter_mut()
            .map(Replica::state)
            .collect::<Result<Vec<_>>>()?;
        info!(
            seed = self.config.seed,
            events = self.trace.len(),
            anti_entropy_passes = passes,
            "simulation finished"
        );
        Ok(SimulationResult {
            seed: self.config.seed,
            trace: self.trace.clone(),
            states,
            anti_entropy_passes: passes,
            interesting_state_reached: self.interesting,
        })
    }

    fn step(&mut self) -> Result<()> {
        self.toggle_partition();

        for id in 0..self.replicas.len() {
            if !self.rng.hit_rate_percent(self.config.op_rate_percent) {
                continue;
            }
            let (op, vertex) = self.replicas[id].perform(&mut self.rng)?;
            self.record(TraceEventKind::Operation {
                replica: id,
                op,
                changed: vertex.is_some(),
            });
            if let Some(vertex) = vertex {
                self.gossip(id, &[vertex]);
            }
        }

        let outcome = self.network.deliver_ready(self.round, &mut self.rng);
        if outcome.reordered {
            self.record(TraceEventKind::Reorder {
                messages: outcome.delivered.len(),
            });
        }
        for message in outcome.delivered {
            self.deliver(&message)?;
        }
        Ok(())
    }

    fn toggle_partition(&mut self) {
        if !self.rng.hit_rate_percent(self.config.fault.partition_rate_percent) {
            return;
        }
        let replica = self.rng.next_index(self.replicas.len());
        let isolated = !self.network.is_isolated(replica);
        self.network.set_isolated(replica, isolated);
        self.interesting = true;
        debug!(round = self.round, replica, isolated, "partition toggled");
        self.record(TraceEventKind::Partition { replica, isolated });
    }

    fn gossip(&mut self, from: ReplicaId, vertices: &[drp_core::Vertex]) {
        let fanout = self.config.fanout.min(self.replicas.len().saturating_sub(1));
        for to in self.rng.sample_indices(self.replicas.len(), fanout, from) {
            let message = GossipMessage {
                from,
                to,
                vertices: vertices.to_vec(),
            };
            let outcome = self.network.send(message, self.round, &mut self.rng);
            self.interesting |= outcome.dropped;
            self.record(TraceEventKind::Send {
                from,
                to,
                dropped: outcome.dropped,
                duplicated: outcome.duplicated,
                delay_rounds: outcome.delay_rounds,
            });
        }
    }

    fn deliver(&mut self, message: &GossipMessage) -> Result<()> {
        let missing = self.replicas[message.to].receive(&message.vertices)?;
        if !missing.is_empty() {
            self.interesting = true;
            debug!(
                round = self.round,
                from = message.from,
                to = message.to,
                missing = missing.len(),
                "gossip arrived before its dependencies"
            );
        }
        self.record(TraceEventKind::Deliver {
            from: message.from,
            to: message.to,
            vertices: message.vertices.len(),
            missing: missing.len(),
        });
        Ok(())
    }

    /// Heal the network, flush in-flight gossip, then exchange full
    /// histories pairwise until nobody reports a missing vertex.
    fn anti_entropy(&mut self) -> Result<usize> {
        for replica in self.network.heal() {
            self.record(TraceEventKind::Partition {
                replica,
                isolated: false,
            });
        }
        for message in self.network.drain_all() {
            self.deliver(&message)?;
        }

        for pass in 1..=MAX_ANTI_ENTROPY_PASSES {
            let mut missing = 0;
            for from in 0..self.replicas.len() {
                let history = self.replicas[from].history();
                for to in (0..self.replicas.len()).filter(|&to| to != from) {
                    missing += self.replicas[to].receive(&history)?.len();
                }
            }
            self.record(TraceEventKind::AntiEntropy { pass, missing });
            if missing == 0 {
                return Ok(pass);
            }
        }
        warn!(
            seed = self.config.seed,
            passes = MAX_ANTI_ENTROPY_PASSES,
            "anti-entropy did not quiesce"
        );
        Ok(MAX_ANTI_ENTROPY_PASSES)
    }
}
