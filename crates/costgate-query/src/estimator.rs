//! Cost estimation with bounded retry.

use costgate_core::{CoreResult, QueryText, WarehouseEstimator};
use std::sync::Arc;
use tracing::{debug, warn};

/// Dry-run attempts before giving up.
pub const DEFAULT_ESTIMATE_ATTEMPTS: u32 = 3;

/// Outcome of cost estimation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Estimate {
    /// Bytes the query would process.
    Bytes(u64),

    /// Every attempt was rejected by the warehouse.
    Exhausted {
        attempts: u32,
        last_message: String,
    },
}

/// Wraps the dry-run side of the warehouse with retry on rejected queries.
///
/// Only [`WarehouseError::is_retryable`](costgate_core::WarehouseError::is_retryable)
/// failures are retried; anything else (credentials, transport) is returned
/// to the caller straight away.
pub struct CostEstimator {
    warehouse: Arc<dyn WarehouseEstimator>,
    max_attempts: u32,
}

impl CostEstimator {
    pub fn new(warehouse: Arc<dyn WarehouseEstimator>) -> Self {
        Self {
            warehouse,
            max_attempts: DEFAULT_ESTIMATE_ATTEMPTS,
        }
    }

    /// Override the attempt budget (at least one attempt is always made).
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub async fn estimate(&self, query: &QueryText) -> CoreResult<Estimate> {
        let mut attempt = 0;

        loop {
            attempt += 1;

            match self.warehouse.dry_run(query.as_str()).await {
                Ok(bytes) => {
                    debug!(bytes, attempt, "estimate succeeded");
                    return Ok(Estimate::Bytes(bytes));
                }
                Err(e) if e.is_retryable() => {
                    warn!("Attempt #{}: {}", attempt, e);

                    if attempt >= self.max_attempts {
                        return Ok(Estimate::Exhausted {
                            attempts: attempt,
                            last_message: e.to_string(),
                        });
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
