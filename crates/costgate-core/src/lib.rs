//! Core types, configuration and collaborator traits for costgate.

pub mod clock;
pub mod config;
pub mod error;
pub mod pricing;
pub mod query;
pub mod traits;

pub use clock::{Clock, FixedClock, LocalClock};
pub use config::{
    AuthMode, CacheSettings, CostgateConfig, CostgateConfigBuilder, ExpiryPolicy,
    PricingSettings, WarehouseSettings,
};
pub use error::{CoreError, CoreResult, WarehouseError};
pub use pricing::{human_bytes, CostSummary};
pub use query::QueryText;
pub use traits::{ApprovalDecision, ApprovalGate, WarehouseEstimator, WarehouseRunner};
