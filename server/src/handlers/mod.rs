//! Request handlers for sync and inventory endpoints.

mod batch;
mod inventory;
mod status;

pub use batch::*;
pub use inventory::*;
pub use status::*;
