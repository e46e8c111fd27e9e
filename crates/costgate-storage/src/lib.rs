pub mod cache_store;
pub mod key;
pub mod parquet_codec;

pub use cache_store::{CacheStore, CachedEntry, CACHE_FILE_EXTENSION};
pub use key::{CacheKey, DateBucket};
pub use parquet_codec::{ParquetCodec, ParquetConfig};
