//! BigQuery access for costgate: REST client, credentials and a scripted mock.

pub mod api;
pub mod auth;
pub mod client;
pub mod mock;
pub mod rows;

pub use auth::{
    credentials_from_file, token_provider, AuthorizedUserToken, GcloudCliToken,
    ServiceAccountToken, StaticToken, TokenProvider,
};
pub use client::{BigQueryClient, LazyBigQueryClient, DEFAULT_BASE_URL};
pub use mock::{MockEstimate, MockWarehouse};
pub use rows::rows_to_batch;
