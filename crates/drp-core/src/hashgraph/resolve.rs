use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::vertex::{Hash, Vertex};

/// Outcome of conflict resolution between concurrent vertices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ActionType {
    /// Keep both, in topological order.
    #[default]
    Nop,
    /// Drop the first vertex of a pair.
    DropLeft,
    /// Drop the second vertex of a pair.
    DropRight,
    /// Exchange the pair's positions.
    Swap,
    /// Drop the explicitly listed vertices of a group.
    Drop,
}

/// How a data type wants its concurrent operations presented for resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SemanticsType {
    /// Resolver is called on two vertices at a time.
    #[default]
    Pair,
    /// Resolver is called once on each maximal group of concurrent vertices.
    Multiple,
}

/// A resolver's verdict.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResolveConflictsType {
    pub action: ActionType,
    /// Hashes to drop; only meaningful with [`ActionType::Drop`].
    #[serde(default)]
    pub vertices: Vec<Hash>,
}

impl ResolveConflictsType {
    #[must_use]
    pub const fn nop() -> Self {
        Self::action(ActionType::Nop)
    }

    #[must_use]
    pub const fn action(action: ActionType) -> Self {
        Self {
            action,
            vertices: Vec::new(),
        }
    }

    #[must_use]
    pub fn drop(vertices: Vec<Hash>) -> Self {
        Self {
            action: ActionType::Drop,
            vertices,
        }
    }
}

/// A registered conflict resolver. Must be a pure function of its input.
pub type ResolveFn = Arc<dyn Fn(&[&Vertex]) -> ResolveConflictsType + Send + Sync>;
