use std::collections::BTreeSet;

use drp_core::drp::arg;
use drp_core::{CallContext, Drp, DrpError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Set without conflict resolution; concurrent operations replay in
/// topological order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound(serialize = "T: Serialize", deserialize = "T: DeserializeOwned + Ord"))]
pub struct SetDrp<T> {
    set: BTreeSet<T>,
}

impl<T> Default for SetDrp<T> {
    fn default() -> Self {
        Self {
            set: BTreeSet::new(),
        }
    }
}

impl<T: Ord> SetDrp<T> {
    #[must_use]
    pub fn query_has(&self, value: &T) -> bool {
        self.set.contains(value)
    }

    pub fn query_values(&self) -> impl Iterator<Item = &T> {
        self.set.iter()
    }

    #[must_use]
    pub fn query_len(&self) -> usize {
        self.set.len()
    }
}

impl<T> Drp for SetDrp<T>
where
    T: Serialize + DeserializeOwned + Ord + Clone + Send + Sync + 'static,
{
    fn apply(
        &mut self,
        _ctx: &CallContext<'_>,
        op_type: &str,
        args: &[Value],
    ) -> Result<(), DrpError> {
        let value: T = arg(op_type, args, 0)?;
        match op_type {
            "add" => {
                self.set.insert(value);
            }
            "delete" => {
                self.set.remove(&value);
            }
            other => return Err(DrpError::UnknownOperation(other.to_string())),
        }
        Ok(())
    }
}
