//! String-keyed map with configurable set/delete conflict policy.

use std::collections::BTreeMap;

use drp_core::drp::arg;
use drp_core::{ActionType, CallContext, Drp, DrpError, ResolveConflictsType, Vertex};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

pub const SET: &str = "set";
pub const DELETE: &str = "delete";

/// Which side wins a concurrent `set` and `delete` of the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MapConflictResolution {
    #[default]
    UpdateWins,
    RemoveWins,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapDrp {
    conflict_resolution: MapConflictResolution,
    map: BTreeMap<String, Value>,
}

impl MapDrp {
    #[must_use]
    pub fn new(conflict_resolution: MapConflictResolution) -> Self {
        Self {
            conflict_resolution,
            map: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn query_get(&self, key: &str) -> Option<&Value> {
        self.map.get(key)
    }

    #[must_use]
    pub fn query_has(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    pub fn query_entries(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.map.iter()
    }
}

fn key_of(vertex: &Vertex) -> Option<&str> {
    vertex.operation.args().first()?.as_str()
}

fn value_digest(vertex: &Vertex) -> Vec<u8> {
    let encoded = vertex
        .operation
        .args()
        .get(1)
        .map(Value::to_string)
        .unwrap_or_default();
    Sha256::digest(encoded.as_bytes()).to_vec()
}

impl Drp for MapDrp {
    fn apply(
        &mut self,
        _ctx: &CallContext<'_>,
        op_type: &str,
        args: &[Value],
    ) -> Result<(), DrpError> {
        let key: String = arg(op_type, args, 0)?;
        match op_type {
            SET => {
                let value: Value = arg(op_type, args, 1)?;
                self.map.insert(key, value);
            }
            DELETE => {
                self.map.remove(&key);
            }
            other => return Err(DrpError::UnknownOperation(other.to_string())),
        }
        Ok(())
    }

    fn resolve_conflicts(&self, vertices: &[&Vertex]) -> ResolveConflictsType {
        let [left, right] = vertices else {
            return ResolveConflictsType::nop();
        };
        if key_of(left).is_none() || key_of(left) != key_of(right) {
            return ResolveConflictsType::nop();
        }
        let drop_left = ResolveConflictsType::action(ActionType::DropLeft);
        let drop_right = ResolveConflictsType::action(ActionType::DropRight);

        match (left.operation.op_type.as_str(), right.operation.op_type.as_str()) {
            (SET, SET) => match value_digest(left).cmp(&value_digest(right)) {
                std::cmp::Ordering::Greater => drop_right,
                std::cmp::Ordering::Less => drop_left,
                std::cmp::Ordering::Equal => ResolveConflictsType::nop(),
            },
            (SET, DELETE) => match self.conflict_resolution {
                MapConflictResolution::UpdateWins => drop_right,
                MapConflictResolution::RemoveWins => drop_left,
            },
            (DELETE, SET) => match self.conflict_resolution {
                MapConflictResolution::UpdateWins => drop_left,
                MapConflictResolution::RemoveWins => drop_right,
            },
            _ => ResolveConflictsType::nop(),
        }
    }
}

#[cfg(test)]
mod tests {
    use drp_core::hashgraph::{DrpType, Operation, ROOT_HASH, compute_hash};
    use serde_json::json;

    use super::*;

    fn vertex(peer: &str, op: &str, args: Vec<Value>) -> Vertex {
        let operation = Operation::new(DrpType::Drp, op, args);
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
    fn set_and_delete() {
        let ctx = CallContext { caller: "p" };
        let mut map = MapDrp::default();
        map.apply(&ctx, SET, &[json!("k"), json!({"n": 1})]).unwrap();
        assert_eq!(map.query_get("k"), Some(&json!({"n": 1})));
        map.apply(&ctx, DELETE, &[json!("k")]).unwrap();
        assert!(!map.query_has("k"));
        assert!(map.apply(&ctx, SET, &[json!("k")]).is_err());
    }

    #[test]
    fn update_wins_drops_concurrent_delete() {
        let map = MapDrp::new(MapConflictResolution::UpdateWins);
        let set = vertex("a", SET, vec![json!("k"), json!(1)]);
        let delete = vertex("b", DELETE, vec![json!("k")]);
        assert_eq!(map.resolve_conflicts(&[&set, &delete]).action, ActionType::DropRight);
        assert_eq!(map.resolve_conflicts(&[&delete, &set]).action, ActionType::DropLeft);
    }

    #[test]
    fn remove_wins_drops_concurrent_set() {
        let map = MapDrp::new(MapConflictResolution::RemoveWins);
        let set = vertex("a", SET, vec![json!("k"), json!(1)]);
        let delete = vertex("b", DELETE, vec![json!("k")]);
        assert_eq!(map.resolve_conflicts(&[&set, &delete]).action, ActionType::DropLeft);
    }

    #[test]
    fn concurrent_sets_keep_same_winner_in_both_orders() {
        let map = MapDrp::default();
        let one = vertex("a", SET, vec![json!("k"), json!(1)]);
        let two = vertex("b", SET, vec![json!("k"), json!(2)]);
        let forward = map.resolve_conflicts(&[&one, &two]).action;
        let backward = map.resolve_conflicts(&[&two, &one]).action;
        let winner_forward = if forward == ActionType::DropLeft { &two } else { &one };
        let winner_backward = if backward == ActionType::DropLeft { &one } else { &two };
        assert_eq!(winner_forward.hash, winner_backward.hash);
    }

    #[test]
    fn different_keys_do_not_conflict() {
        let map = MapDrp::default();
        let a = vertex("a", SET, vec![json!("x"), json!(1)]);
        let b = vertex("b", DELETE, vec![json!("y")]);
        assert_eq!(map.resolve_conflicts(&[&a, &b]).action, ActionType::Nop);
    }
}
