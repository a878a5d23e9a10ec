use drp_core::drp::arg;
use drp_core::{CallContext, Drp, DrpError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Register multiplied by repeated addition. Multiplication commutes, so no
/// conflict resolution is needed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecMulDrp {
    value: i64,
}

impl Default for RecMulDrp {
    fn default() -> Self {
        Self { value: 1 }
    }
}

impl RecMulDrp {
    #[must_use]
    pub const fn new(value: i64) -> Self {
        Self { value }
    }

    #[must_use]
    pub const fn query_value(&self) -> i64 {
        self.value
    }
}

fn multiply(times: i64, base: i64) -> Option<i64> {
    if times == 1 {
        return Some(base);
    }
    base.checked_add(multiply(times - 1, base)?)
}

impl Drp for RecMulDrp {
    fn apply(
        &mut self,
        _ctx: &CallContext<'_>,
        op_type: &str,
        args: &[Value],
    ) -> Result<(), DrpError> {
        if op_type != "recursive_mul" {
            return Err(DrpError::UnknownOperation(op_type.to_string()));
        }
        let times: i64 = arg(op_type, args, 0)?;
        if !(1..=1_000).contains(&times) {
            return Err(DrpError::Rejected {
                op: op_type.to_string(),
                reason: format!("multiplier {times} outside 1..=1000"),
            });
        }
        self.value = multiply(times, self.value).ok_or_else(|| DrpError::Rejected {
            op: op_type.to_string(),
            reason: "integer overflow".into(),
        })?;
        Ok(())
    }
}
