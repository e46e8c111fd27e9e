//! Cost estimation, approval and the cache-aware query executor.

pub mod approval;
pub mod estimator;
pub mod executor;

pub use approval::{parse_answer, ConsoleApproval, ScriptedApproval, PROMPT};
pub use estimator::{CostEstimator, Estimate, DEFAULT_ESTIMATE_ATTEMPTS};
pub use executor::{ExecutorState, QueryExecutor};
