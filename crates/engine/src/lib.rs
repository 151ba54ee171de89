//! Script scheduling and execution engine.
//!
//! [`ScriptEngine`] admits runs through the [`ExecutionRegistry`], launches
//! them and streams their output; [`ScheduleManager`] triggers enabled
//! scripts from their cron expressions.

pub mod config;
pub mod engine;
mod monitor;
pub mod registry;
pub mod scheduler;

pub use config::EngineConfig;
pub use engine::ScriptEngine;
pub use registry::{Admission, ExecutionHandle, ExecutionRegistry};
pub use scheduler::{ScheduleManager, TickReport};
