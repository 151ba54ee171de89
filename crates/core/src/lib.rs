pub mod error;
pub mod hashing;
pub mod schedule;
pub mod script_types;
pub mod scripting;
pub mod types;
