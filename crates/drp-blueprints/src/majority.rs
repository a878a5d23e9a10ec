//! Register resolved by majority among concurrent writers.
//!
//! Uses multiple semantics: the resolver sees every mutually concurrent
//! `set` at once, keeps the value most of them chose and drops the rest.
//! Ties go to the value with the smallest JSON encoding.

use std::collections::BTreeMap;

use drp_core::drp::arg;
use drp_core::{CallContext, Drp, DrpError, ResolveConflictsType, SemanticsType, Vertex};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::trace;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MajorityRegisterDrp {
    value: Option<Value>,
}

impl MajorityRegisterDrp {
    #[must_use]
    pub const fn query_value(&self) -> Option<&Value> {
        self.value.as_ref()
    }
}

impl Drp for MajorityRegisterDrp {
    fn semantics_type(&self) -> SemanticsType {
        SemanticsType::Multiple
    }

    fn apply(
        &mut self,
        _ctx: &CallContext<'_>,
        op_type: &str,
        args: &[Value],
    ) -> Result<(), DrpError> {
        match op_type {
            "set" => {
                self.value = Some(arg(op_type, args, 0)?);
                Ok(())
            }
            other => Err(DrpError::UnknownOperation(other.to_string())),
        }
    }

    fn resolve_conflicts(&self, vertices: &[&Vertex]) -> ResolveConflictsType {
        let encoded: Vec<Option<String>> = vertices
            .iter()
            .map(|v| {
                (v.operation.op_type == "set")
                    .then(|| v.operation.args().first().map(Value::to_string))
                    .flatten()
            })
            .collect();

        let mut tally: BTreeMap<&str, usize> = BTreeMap::new();
        for value in encoded.iter().flatten() {
            *tally.entry(value.as_str()).or_default() += 1;
        }
        if tally.len() < 2 {
            return ResolveConflictsType::nop();
        }
        // max_by_key returns the last maximum; scanning in reverse makes
        // that the smallest encoding.
        let Some((winner, votes)) = tally.iter().rev().max_by_key(|(_, count)| **count) else {
            return ResolveConflictsType::nop();
        };
        trace!(winner, votes, "majority");

        let losers = vertices
            .iter()
            .zip(&encoded)
            .filter(|(_, value)| value.as_deref().is_some_and(|v| v != *winner))
            .map(|(vertex, _)| vertex.hash.clone())
            .collect();
        ResolveConflictsType::drop(losers)
    }
}

#[cfg(test)]
mod tests {
    use drp_core::ActionType;
    use drp_core::hashgraph::{DrpType, Operation, ROOT_HASH, compute_hash};
    use serde_json::json;

    use super::*;

    fn set(peer: &str, value: Value) -> Vertex {
        let operation = Operation::new(DrpType::Drp, "set", vec![value]);
        let deps = vec![ROOT_HASH.to_string()];
        Vertex {
            hash: compute_hash(peer, &operation, &deps, 1).unwrap(),
            peer_id: peer.into(),
            operation,
            dependencies: deps,
            timestamp: 1,
            signature: Vec::new(),
        }
    }

    #[test]
    fn minority_values_are_dropped() {
        let drp = MajorityRegisterDrp::default();
        let a = set("a", json!("red"));
        let b = set("b", json!("blue"));
        let c = set("c", json!("red"));
        let verdict = drp.resolve_conflicts(&[&a, &b, &c]);
        assert_eq!(verdict.action, ActionType::Drop);
        assert_eq!(verdict.vertices, vec![b.hash]);
    }

    #[test]
    fn ties_keep_smallest_encoding() {
        let drp = MajorityRegisterDrp::default();
        let a = set("a", json!(2));
        let b = set("b", json!(1));
        let verdict = drp.resolve_conflicts(&[&a, &b]);
        assert_eq!(verdict.vertices, vec![a.hash]);
    }

    #[test]
    fn agreement_needs_no_drop() {
        let drp = MajorityRegisterDrp::default();
        let a = set("a", json!(1));
        let b = set("b", json!(1));
        assert_eq!(drp.resolve_conflicts(&[&a, &b]).action, ActionType::Nop);
    }
}
