//! Scripted in-memory warehouse for testing
//!
//! Stands in for BigQuery behind both [`WarehouseEstimator`] and
//! [`WarehouseRunner`] so the executor can be exercised without network
//! access or credentials.
//!
//! # Features
//!
//! - **Deterministic Failures**: dry-run outcomes consumed in order
//! - **Call History**: every dry run and execution is recorded
//! - **Counters**: quick assertions on how often the remote side was hit
//!
//! # Examples
//!
//! ```rust
//! use costgate_core::{WarehouseEstimator, WarehouseRunner};
//! use costgate_warehouse::mock::{MockEstimate, MockWarehouse};
//!
//! # async fn example() {
//! let mock = MockWarehouse::default().with_estimates(vec![
//!     MockEstimate::BadRequest("Unrecognized name: colum"),
//!     MockEstimate::Bytes(1024),
//! ]);
//!
//! assert!(mock.dry_run("SELECT colum FROM t").await.is_err());
//! assert_eq!(mock.dry_run("SELECT column FROM t").await.unwrap(), 1024);
//! assert_eq!(mock.dry_run_calls(), 2);
//! assert_eq!(mock.execute_calls(), 0);
//! # }
//! ```

use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use costgate_core::{WarehouseError, WarehouseEstimator, WarehouseRunner};
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::Arc;

/// Scripted outcome of one dry run.
#[derive(Debug, Clone)]
pub enum MockEstimate {
    /// Estimate succeeds with this many bytes.
    Bytes(u64),

    /// Query rejected (retryable).
    BadRequest(&'static str),

    /// Non-retryable failure, e.g. expired credentials.
    Unauthorized(&'static str),
}

impl MockEstimate {
    fn outcome(&self) -> Result<u64, WarehouseError> {
        match self {
            Self::Bytes(bytes) => Ok(*bytes),
            Self::BadRequest(msg) => Err(WarehouseError::BadRequest((*msg).to_string())),
            Self::Unauthorized(msg) => Err(WarehouseError::Unauthorized((*msg).to_string())),
        }
    }
}

/// Mock call history entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallHistoryEntry {
    /// Operation type: "dry_run" or "execute".
    pub operation: &'static str,

    /// Query text as received.
    pub sql: String,

    /// Whether the operation succeeded.
    pub success: bool,
}

/// In-memory warehouse with scripted answers.
#[derive(Clone)]
pub struct MockWarehouse {
    /// Outcomes consumed by successive dry runs.
    estimates: Arc<RwLock<VecDeque<MockEstimate>>>,

    /// Outcome once the script is exhausted.
    fallback_estimate: MockEstimate,

    /// Answer to every execution.
    result: Arc<RwLock<Result<RecordBatch, WarehouseError>>>,

    history: Arc<RwLock<Vec<CallHistoryEntry>>>,
}

impl Default for MockWarehouse {
    fn default() -> Self {
        Self::new(RecordBatch::new_empty(Arc::new(arrow::datatypes::Schema::empty())))
    }
}

impl MockWarehouse {
    /// A warehouse estimating zero bytes and returning `table` on execution.
    #[must_use]
    pub fn new(table: RecordBatch) -> Self {
        Self {
            estimates: Arc::new(RwLock::new(VecDeque::new())),
            fallback_estimate: MockEstimate::Bytes(0),
            result: Arc::new(RwLock::new(Ok(table))),
            history: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Dry-run outcomes to hand out in order.
    #[must_use]
    pub fn with_estimates(self, estimates: Vec<MockEstimate>) -> Self {
        *self.estimates.write() = estimates.into();
        self
    }

    /// Outcome once the scripted estimates run out.
    #[must_use]
    pub fn with_fallback_estimate(mut self, estimate: MockEstimate) -> Self {
        self.fallback_estimate = estimate;
        self
    }

    /// Make every execution fail with `error`.
    #[must_use]
    pub fn with_failing_execution(self, error: WarehouseError) -> Self {
        *self.result.write() = Err(error);
        self
    }

    #[must_use]
    pub fn history(&self) -> Vec<CallHistoryEntry> {
        self.history.read().clone()
    }

    #[must_use]
    pub fn dry_run_calls(&self) -> usize {
        self.count("dry_run")
    }

    #[must_use]
    pub fn execute_calls(&self) -> usize {
        self.count("execute")
    }

    /// Dry runs plus executions.
    #[must_use]
    pub fn remote_calls(&self) -> usize {
        self.history.read().len()
    }

    fn count(&self, operation: &str) -> usize {
        self.history
            .read()
            .iter()
            .filter(|entry| entry.operation == operation)
            .count()
    }

    fn record(&self, operation: &'static str, sql: &str, success: bool) {
        self.history.write().push(CallHistoryEntry {
            operation,
            sql: sql.to_string(),
            success,
        });
    }
}

#[async_trait]
impl WarehouseEstimator for MockWarehouse {
    async fn dry_run(&self, sql: &str) -> Result<u64, WarehouseError> {
        let scripted = self.estimates.write().pop_front();
        let outcome = scripted.unwrap_or_else(|| self.fallback_estimate.clone()).outcome();
        self.record("dry_run", sql, outcome.is_ok());
        outcome
    }
}

#[async_trait]
impl WarehouseRunner for MockWarehouse {
    async fn execute(&self, sql: &str) -> Result<RecordBatch, WarehouseError> {
        let outcome = self.result.read().clone();
        self.record("execute", sql, outcome.is_ok());
        outcome
    }
}
