//! drp-blueprints library.
//!
//! Reference replicated data types for [`drp_core::DrpObject`]. Each type is
//! plain serde data with an `apply` dispatching on the operation name, plus
//! `query_` accessors that never create history.

pub mod add_mul;
pub mod majority;
pub mod map;
pub mod rec_mul;
pub mod set;

pub use add_mul::AddMulDrp;
pub use majority::MajorityRegisterDrp;
pub use map::{MapConflictResolution, MapDrp};
pub use rec_mul::RecMulDrp;
pub use set::SetDrp;
