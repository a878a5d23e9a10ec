//! The replicated data type contract.
//!
//! A DRP is plain serde data plus an `apply` function that interprets
//! commands by name. Snapshots are the serialized field map, so change
//! detection and state caching need no reflection.

use std::collections::BTreeMap;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::acl::AclError;
use crate::error::ErrorCode;
use crate::hashgraph::{Args, ResolveConflictsType, SemanticsType, Vertex};

/// Field name to value, ordered by field name.
pub type DrpState = BTreeMap<String, Value>;

/// Operation names starting with this prefix are pure reads.
pub const QUERY_PREFIX: &str = "query_";

/// Who is applying an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallContext<'a> {
    /// Peer id of the vertex author (or the local peer for a local call).
    pub caller: &'a str,
}

/// A mutating call expressed as data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub op_type: String,
    pub args: Args,
}

impl Command {
    #[must_use]
    pub fn new(op_type: impl Into<String>, args: Args) -> Self {
        Self {
            op_type: op_type.into(),
            args,
        }
    }

    #[must_use]
    pub fn is_query(&self) -> bool {
        self.op_type.starts_with(QUERY_PREFIX)
    }
}

/// Errors returned by [`Drp::apply`].
#[derive(Debug, thiserror::Error)]
pub enum DrpError {
    #[error("unknown operation `{0}`")]
    UnknownOperation(String),

    #[error("invalid arguments for `{op}`: {reason}")]
    InvalidArguments { op: String, reason: String },

    #[error("operation `{op}` rejected: {reason}")]
    Rejected { op: String, reason: String },

    #[error(transparent)]
    Acl(#[from] AclError),
}

impl DrpError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::UnknownOperation(_) | Self::InvalidArguments { .. } => {
                ErrorCode::MalformedOperation
            }
            Self::Rejected { .. } => ErrorCode::OperationRejected,
            Self::Acl(err) => err.code(),
        }
    }
}

/// Errors converting between a DRP and its [`DrpState`].
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("state serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("data type does not serialize to a field map")]
    NotAnObject,
}

impl StateError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        ErrorCode::StateSerialization
    }
}

/// A replicated data type driven by a hash graph.
pub trait Drp: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// How concurrent operations are grouped for [`Drp::resolve_conflicts`].
    fn semantics_type(&self) -> SemanticsType {
        SemanticsType::Pair
    }

    /// Execute one named operation.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown operations, undecodable arguments, or
    /// operations the data type refuses.
    fn apply(&mut self, ctx: &CallContext<'_>, op_type: &str, args: &[Value])
    -> Result<(), DrpError>;

    /// Decide how to order or drop concurrent vertices. Must not mutate
    /// anything; defaults to keeping everything.
    fn resolve_conflicts(&self, _vertices: &[&Vertex]) -> ResolveConflictsType {
        ResolveConflictsType::nop()
    }

    /// Snapshot of every serialized field.
    ///
    /// # Errors
    ///
    /// Returns an error if the type does not serialize to a JSON object.
    fn snapshot(&self) -> Result<DrpState, StateError> {
        snapshot_fields(self)
    }

    /// Rebuild an instance from a snapshot, starting from `template` for any
    /// field the snapshot does not carry.
    ///
    /// # Errors
    ///
    /// Returns an error if the merged fields do not deserialize.
    fn restore(template: &Self, state: &DrpState) -> Result<Self, StateError> {
        restore_fields(template, state)
    }
}

/// Serialize `value` and return its top-level fields.
///
/// # Errors
///
/// Fails if `value` serializes to anything but a JSON object.
pub fn snapshot_fields<T: Serialize>(value: &T) -> Result<DrpState, StateError> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map.into_iter().collect()),
        _ => Err(StateError::NotAnObject),
    }
}

/// Overlay `state` onto the fields of `template` and deserialize.
///
/// # Errors
///
/// Fails if `template` is not an object or the result does not deserialize.
pub fn restore_fields<T: Serialize + DeserializeOwned>(
    template: &T,
    state: &DrpState,
) -> Result<T, StateError> {
    let mut fields = snapshot_fields(template)?;
    fields.extend(state.iter().map(|(k, v)| (k.clone(), v.clone())));
    let object: serde_json::Map<String, Value> = fields.into_iter().collect();
    Ok(serde_json::from_value(Value::Object(object))?)
}

/// Decode argument `index` of `op` as `T`.
///
/// # Errors
///
/// Returns [`DrpError::InvalidArguments`] if the argument is missing or has
/// the wrong shape.
pub fn arg<T: DeserializeOwned>(op: &str, args: &[Value], index: usize) -> Result<T, DrpError> {
    let raw = args.get(index).ok_or_else(|| DrpError::InvalidArguments {
        op: op.to_string(),
        reason: format!("missing argument {index}"),
    })?;
    serde_json::from_value(raw.clone()).map_err(|err| DrpError::InvalidArguments {
        op: op.to_string(),
        reason: format!("argument {index}: {err}"),
    })
}
