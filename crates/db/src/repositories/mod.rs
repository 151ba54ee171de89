pub mod execution_log_repo;
pub mod script_repo;

pub use execution_log_repo::ExecutionLogRepo;
pub use script_repo::ScriptRepo;
