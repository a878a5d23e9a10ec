use std::collections::BTreeSet;

use drp_core::Vertex;
use serde::{Deserialize, Serialize};

use crate::replica::ReplicaId;
use crate::rng::DeterministicRng;

/// Fault injection applied to gossip during the faulty rounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultConfig {
    /// Maximum delivery delay in rounds.
    pub max_delay_rounds: u8,
    pub drop_rate_percent: u8,
    pub duplicate_rate_percent: u8,
    /// Chance of shuffling the batch of messages ready in a round.
    pub reorder_rate_percent: u8,
    /// Chance per round to isolate or reconnect a random replica.
    pub partition_rate_percent: u8,
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self {
            max_delay_rounds: 2,
            drop_rate_percent: 5,
            duplicate_rate_percent: 3,
            reorder_rate_percent: 5,
            partition_rate_percent: 2,
        }
    }
}

impl FaultConfig {
    /// No loss, no delay, no partitions.
    #[must_use]
    pub const fn reliable() -> Self {
        Self {
            max_delay_rounds: 0,
            drop_rate_percent: 0,
            duplicate_rate_percent: 0,
            reorder_rate_percent: 0,
            partition_rate_percent: 0,
        }
    }
}

/// A batch of vertices gossiped from one replica to another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GossipMessage {
    pub from: ReplicaId,
    pub to: ReplicaId,
    pub vertices: Vec<Vertex>,
}

#[derive(Debug, Clone)]
struct InFlight {
    deliver_at_round: u64,
    message: GossipMessage,
}

/// Result of a send attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendOutcome {
    pub dropped: bool,
    pub duplicated: bool,
    pub delay_rounds: u8,
}

impl SendOutcome {
    const DROPPED: Self = Self {
        dropped: true,
        duplicated: false,
        delay_rounds: 0,
    };
}

/// Messages due in a round, in delivery order.
#[derive(Debug, Clone)]
pub struct DeliverOutcome {
    pub delivered: Vec<GossipMessage>,
    pub reordered: bool,
}

/// Deterministic lossy network between replicas.
#[derive(Debug, Clone)]
pub struct SimulatedNetwork {
    in_flight: Vec<InFlight>,
    isolated: BTreeSet<ReplicaId>,
    fault: FaultConfig,
}

impl SimulatedNetwork {
    #[must_use]
    pub fn new(fault: FaultConfig) -> Self {
        Self {
            in_flight: Vec::new(),
            isolated: BTreeSet::new(),
            fault,
        }
    }

    #[must_use]
    pub fn fault_config(&self) -> FaultConfig {
        self.fault
    }

    /// Isolate or reconnect a replica. Traffic to or from an isolated
    /// replica is dropped at send time.
    pub fn set_isolated(&mut self, replica: ReplicaId, isolated: bool) {
        if isolated {
            self.isolated.insert(replica);
        } else {
            self.isolated.remove(&replica);
        }
    }

    #[must_use]
    pub fn is_isolated(&self, replica: ReplicaId) -> bool {
        self.isolated.contains(&replica)
    }

    /// Reconnect everyone, returning who was isolated.
    pub fn heal(&mut self) -> Vec<ReplicaId> {
        std::mem::take(&mut self.isolated).into_iter().collect()
    }

    #[must_use]
    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    /// Queue a message, subject to partition, drop, delay and duplication.
    pub fn send(
        &mut self,
        message: GossipMessage,
        round: u64,
        rng: &mut DeterministicRng,
    ) -> SendOutcome {
        if self.is_isolated(message.from) || self.is_isolated(message.to) {
            return SendOutcome::DROPPED;
        }
        if rng.hit_rate_percent(self.fault.drop_rate_percent) {
            return SendOutcome::DROPPED;
        }

        let bound = u64::from(self.fault.max_delay_rounds) + 1;
        let delay = u8::try_from(rng.next_bounded(bound)).unwrap_or(self.fault.max_delay_rounds);
        let deliver_at_round = round + u64::from(delay);

        let duplicated = rng.hit_rate_percent(self.fault.duplicate_rate_percent);
        if duplicated {
            self.in_flight.push(InFlight {
                deliver_at_round,
                message: message.clone(),
            });
        }
        self.in_flight.push(InFlight {
            deliver_at_round,
            message,
        });

        SendOutcome {
            dropped: false,
            duplicated,
            delay_rounds: delay,
        }
    }

    /// Take every message due by `round`. Order is send order unless the
    /// reorder fault fires, in which case the batch is shuffled.
    pub fn deliver_ready(&mut self, round: u64, rng: &mut DeterministicRng) -> DeliverOutcome {
        let (ready, future): (Vec<_>, Vec<_>) = self
            .in_flight
            .drain(..)
            .partition(|pending| pending.deliver_at_round <= round);
        self.in_flight = future;

        let mut delivered: Vec<GossipMessage> = ready.into_iter().map(|p| p.message).collect();
        let reordered =
            delivered.len() > 1 && rng.hit_rate_percent(self.fault.reorder_rate_percent);
        if reordered {
            rng.shuffle(&mut delivered);
        }
        DeliverOutcome {
            delivered,
            reordered,
        }
    }

    /// Take everything still queued regardless of its delivery round.
    pub fn drain_all(&mut self) -> Vec<GossipMessage> {
        self.in_flight.drain(..).map(|p| p.message).collect()
    }
}
