//! Common structures shared between the fuelvm runtime and its embedders.
//! This crate only carries plain data: fuel units and cost tables, the
//! operation kinds, the entities handed to the collaborators and the
//! application error taxonomy.

pub mod entity;
pub mod error;
pub mod fuel;
pub mod operation;

pub use error::{AppError, ErrorCode};
pub use fuel::Fuel;
pub use operation::{VmOperation, VmState};
