use arrow::record_batch::RecordBatch;
use async_trait::async_trait;

use crate::error::{CoreResult, WarehouseError};
use crate::pricing::CostSummary;

/// Dry-run side of the remote warehouse.
#[async_trait]
pub trait WarehouseEstimator: Send + Sync {
    /// Returns the bytes the query would process without running it.
    ///
    /// Must bypass the service's own result cache so the figure reflects a
    /// real scan.
    async fn dry_run(&self, sql: &str) -> Result<u64, WarehouseError>;
}

/// Billable execution side of the remote warehouse.
#[async_trait]
pub trait WarehouseRunner: Send + Sync {
    /// Runs the query to completion and returns every row.
    async fn execute(&self, sql: &str) -> Result<RecordBatch, WarehouseError>;
}

/// Operator decision on a cost estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approved,
    Rejected,
}

/// Gate consulted before any billable execution.
///
/// Implementations may suspend for as long as it takes the operator to
/// answer; there is no timeout.
#[async_trait]
pub trait ApprovalGate: Send + Sync {
    async fn confirm(&self, summary: &CostSummary) -> CoreResult<ApprovalDecision>;
}
