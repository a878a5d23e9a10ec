//! drp-core library.
//!
//! Causal history for replicated data types: a hash-linked operation graph,
//! deterministic linearization of concurrent operations, an access control
//! list versioned through the same graph, and BLS finality votes.
//!
//! # Conventions
//!
//! - **Errors**: each module defines a `thiserror` enum with a `code()`
//!   returning an [`ErrorCode`]. Config loading uses `anyhow::Result`.
//! - **Logging**: `tracing` macros with structured fields. Every
//!   [`DrpObject`] logs inside its own span carrying `object_id` and
//!   `peer_id`.

pub mod acl;
pub mod bitset;
pub mod clock;
pub mod collections;
pub mod config;
pub mod crypto;
pub mod drp;
pub mod error;
pub mod finality;
pub mod hashgraph;
pub mod linearize;
pub mod object;

pub use acl::{AclConflictResolution, AclGroup, AclOptions, ObjectAcl};
pub use clock::{Clock, SystemClock};
pub use config::DrpObjectConfig;
pub use drp::{CallContext, Command, Drp, DrpError, DrpState};
pub use error::ErrorCode;
pub use hashgraph::{
    ActionType, DrpType, Hash, HashGraph, Operation, ResolveConflictsType, SemanticsType, Vertex,
};
pub use object::{DrpObject, DrpObjectOptions, ObjectError};
