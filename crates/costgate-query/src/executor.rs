//! Cost-gated query execution with a local result cache.
//!
//! A `run` walks a fixed state machine:
//!
//! ```text
//! Idle -> CacheLookup -> Hit: Return
//!                     -> Miss: Estimating -> EstimateFailed: Abort
//!                                         -> Estimated: AwaitingApproval -> Rejected: Abort
//!                                                                        -> Approved: Executing -> Persisting -> Return
//! ```
//!
//! Nothing billable happens unless the approval gate says so, and a result
//! is only written to the cache after a successful execution. A failed
//! cache write is logged and the table is still returned.

use crate::estimator::{CostEstimator, Estimate};
use arrow::record_batch::RecordBatch;
use costgate_core::{
    ApprovalDecision, ApprovalGate, Clock, CoreError, CoreResult, CostSummary, CostgateConfig,
    LocalClock, PricingSettings, QueryText, WarehouseEstimator, WarehouseRunner,
};
use costgate_storage::{CacheKey, CacheStore};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Where a `run` currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorState {
    Idle,
    CacheLookup,
    Estimating,
    AwaitingApproval,
    Executing,
    Persisting,
    Returned,
    Aborted,
}

impl ExecutorState {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::CacheLookup => "cache_lookup",
            Self::Estimating => "estimating",
            Self::AwaitingApproval => "awaiting_approval",
            Self::Executing => "executing",
            Self::Persisting => "persisting",
            Self::Returned => "returned",
            Self::Aborted => "aborted",
        }
    }
}

impl fmt::Display for ExecutorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn transition(from: ExecutorState, to: ExecutorState) -> ExecutorState {
    debug!(from = %from, to = %to, "executor state transition");
    to
}

/// Runs queries through cache, estimate, approval and execution.
pub struct QueryExecutor {
    cache: Option<CacheStore>,
    estimator: CostEstimator,
    runner: Arc<dyn WarehouseRunner>,
    approval: Arc<dyn ApprovalGate>,
    clock: Arc<dyn Clock>,
    pricing: PricingSettings,
}

impl QueryExecutor {
    /// Build an executor from an immutable configuration.
    ///
    /// When caching is enabled the cache directory is created here if the
    /// configuration allows it.
    pub async fn new(
        config: &CostgateConfig,
        estimator: Arc<dyn WarehouseEstimator>,
        runner: Arc<dyn WarehouseRunner>,
        approval: Arc<dyn ApprovalGate>,
    ) -> CoreResult<Self> {
        let cache = if config.cache.enabled {
            let store = CacheStore::open(&config.cache).await?;
            info!(
                dir = %store.dir().display(),
                expiry = %store.expiry(),
                "query cache enabled"
            );
            Some(store)
        } else {
            info!("query cache disabled");
            None
        };

        Ok(Self {
            cache,
            estimator: CostEstimator::new(estimator)
                .with_max_attempts(config.warehouse.estimate_attempts),
            runner,
            approval,
            clock: Arc::new(LocalClock),
            pricing: config.pricing.clone(),
        })
    }

    /// Replace the clock used to pick date buckets.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn cache_enabled(&self) -> bool {
        self.cache.is_some()
    }

    /// Run `query`, serving it from the cache when possible.
    pub async fn run(&self, query: &str) -> CoreResult<RecordBatch> {
        let query = QueryText::new(query)?;
        self.run_query(&query).await
    }

    /// Same as [`QueryExecutor::run`] with the query read from `path`.
    pub async fn run_file(&self, path: impl AsRef<Path>) -> CoreResult<RecordBatch> {
        let query = QueryText::from_file(path).await?;
        self.run_query(&query).await
    }

    /// Dry-run only: report what `query` would cost without asking or
    /// executing anything.
    pub async fn estimate(&self, query: &str) -> CoreResult<CostSummary> {
        let query = QueryText::new(query)?;
        self.estimate_query(&query).await
    }

    pub async fn estimate_file(&self, path: impl AsRef<Path>) -> CoreResult<CostSummary> {
        let query = QueryText::from_file(path).await?;
        self.estimate_query(&query).await
    }

    /// Path today's cache entry for `query` would have, or `None` when
    /// caching is disabled.
    pub fn cache_location(&self, query: &str) -> CoreResult<Option<PathBuf>> {
        let query = QueryText::new(query)?;
        Ok(self.cache.as_ref().map(|cache| {
            cache.location(&CacheKey::derive(query.as_str()), self.clock.today())
        }))
    }

    async fn estimate_query(&self, query: &QueryText) -> CoreResult<CostSummary> {
        match self.estimator.estimate(query).await? {
            Estimate::Bytes(bytes) => Ok(CostSummary::new(bytes, &self.pricing)),
            Estimate::Exhausted {
                attempts,
                last_message,
            } => Err(CoreError::EstimationFailed {
                attempts,
                last_message,
            }),
        }
    }

    async fn run_query(&self, query: &QueryText) -> CoreResult<RecordBatch> {
        let mut state = ExecutorState::Idle;

        let key = CacheKey::derive(query.as_str());
        let today = self.clock.today();

        if let Some(cache) = &self.cache {
            state = transition(state, ExecutorState::CacheLookup);
            if let Some(entry) = cache.lookup(&key, today).await? {
                info!(
                    path = %entry.path.display(),
                    rows = entry.table.num_rows(),
                    "cache hit"
                );
                transition(state, ExecutorState::Returned);
                return Ok(entry.table);
            }
            info!(path = %cache.location(&key, today).display(), "cache miss");
        }

        state = transition(state, ExecutorState::Estimating);
        let summary = match self.estimate_query(query).await {
            Ok(summary) => summary,
            Err(err) => {
                transition(state, ExecutorState::Aborted);
                return Err(err);
            }
        };

        state = transition(state, ExecutorState::AwaitingApproval);
        match self.approval.confirm(&summary).await {
            Ok(ApprovalDecision::Approved) => {}
            Ok(ApprovalDecision::Rejected) => {
                info!("execution declined by operator");
                transition(state, ExecutorState::Aborted);
                return Err(CoreError::UserAborted);
            }
            Err(err) => {
                transition(state, ExecutorState::Aborted);
                return Err(err);
            }
        }

        state = transition(state, ExecutorState::Executing);
        info!(bytes = summary.bytes, "executing query");
        let table = match self.runner.execute(query.as_str()).await {
            Ok(table) => table,
            Err(err) => {
                transition(state, ExecutorState::Aborted);
                return Err(err.into());
            }
        };
        info!(rows = table.num_rows(), "query executed");

        if let Some(cache) = &self.cache {
            if table.num_rows() > 0 {
                state = transition(state, ExecutorState::Persisting);
                let path = cache.location(&key, today);
                match cache.write(&path, &table).await {
                    Ok(()) => info!(path = %path.display(), "result cached"),
                    // Write failures never discard an executed result.
                    Err(err) => warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to cache query result"
                    ),
                }
            } else {
                debug!("empty result not cached");
            }
        }

        transition(state, ExecutorState::Returned);
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_names() {
        assert_eq!(ExecutorState::CacheLookup.to_string(), "cache_lookup");
        assert_eq!(ExecutorState::AwaitingApproval.as_str(), "awaiting_approval");
    }
}
