pub mod execution_log;
pub mod script;
