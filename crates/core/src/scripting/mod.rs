//! Script execution domain logic.
//!
//! Everything here is pure process and filesystem management with no
//! database access: the runner, the per-language command builders, package
//! preparation, variable resolution and the execution status machine.

pub mod executor;
pub mod packages;
pub mod python;
pub mod shell;
pub mod status;
pub mod subprocess;
pub mod variables;
