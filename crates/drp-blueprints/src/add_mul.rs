//! Integer register with `add` and `mul`.
//!
//! Concurrent operations are ordered so that `mul` always runs before a
//! concurrent `add`. Two concurrent operations of the same kind are ordered
//! by author peer id, then by hash, which makes every swap decision part of
//! one total order.

use drp_core::drp::arg;
use drp_core::{ActionType, CallContext, Drp, DrpError, ResolveConflictsType, Vertex};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const ADD: &str = "add";
pub const MUL: &str = "mul";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddMulDrp {
    value: i64,
}

impl AddMulDrp {
    #[must_use]
    pub const fn new(value: i64) -> Self {
        Self { value }
    }

    #[must_use]
    pub const fn query_value(&self) -> i64 {
        self.value
    }
}

impl Drp for AddMulDrp {
    fn apply(
        &mut self,
        _ctx: &CallContext<'_>,
        op_type: &str,
        args: &[Value],
    ) -> Result<(), DrpError> {
        let operand: i64 = arg(op_type, args, 0)?;
        let next = match op_type {
            ADD => self.value.checked_add(operand),
            MUL => self.value.checked_mul(operand),
            other => return Err(DrpError::UnknownOperation(other.to_string())),
        };
        self.value = next.ok_or_else(|| DrpError::Rejected {
            op: op_type.to_string(),
            reason: "integer overflow".into(),
        })?;
        Ok(())
    }

    fn resolve_conflicts(&self, vertices: &[&Vertex]) -> ResolveConflictsType {
        let [left, right] = vertices else {
            return ResolveConflictsType::nop();
        };
        if left.hash == right.hash {
            return ResolveConflictsType::nop();
        }
        let (left_op, right_op) = (
            left.operation.op_type.as_str(),
            right.operation.op_type.as_str(),
        );

        let swap = if left_op == right_op {
            (&left.peer_id, &left.hash) > (&right.peer_id, &right.hash)
        } else {
            left_op == ADD && right_op == MUL
        };
        if swap {
            ResolveConflictsType::action(ActionType::Swap)
        } else {
            ResolveConflictsType::nop()
        }
    }
}
