//! On-disk result cache keyed by query fingerprint and calendar day.
//!
//! # File Format
//!
//! One gzip-compressed Parquet file per entry:
//! `{cache_dir}/{YYYYMMDD}_{sha256_hex}.parquet.gzip`
//!
//! # Self-healing
//!
//! A zero-length file, a file that decodes to zero rows, or a file that does
//! not decode at all is deleted on read and reported as a miss. These are the
//! leftovers of interrupted writes; the next successful run rewrites them.
//! Every deletion is logged at `warn`.

use crate::key::{CacheKey, DateBucket};
use crate::parquet_codec::ParquetCodec;
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use chrono::NaiveDate;
use costgate_core::{CacheSettings, CoreError, CoreResult, ExpiryPolicy};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Suffix of every cache file: storage format, then compression.
pub const CACHE_FILE_EXTENSION: &str = "parquet.gzip";

/// A table found in the cache together with where it came from.
#[derive(Debug, Clone)]
pub struct CachedEntry {
    pub path: PathBuf,
    pub bucket: DateBucket,
    pub table: RecordBatch,
}

/// Local directory of cached query results.
///
/// Assumes a single process owns the directory; there is no locking.
#[derive(Debug, Clone)]
pub struct CacheStore {
    dir: PathBuf,
    expiry: ExpiryPolicy,
    codec: ParquetCodec,
}

impl CacheStore {
    /// Open the store described by `settings`, creating the directory when
    /// the settings allow it.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Io` if directory creation fails
    pub async fn open(settings: &CacheSettings) -> CoreResult<Self> {
        Self::ensure_initialized(settings).await?;
        Ok(Self {
            dir: settings.path.clone(),
            expiry: settings.expiry,
            codec: ParquetCodec::default(),
        })
    }

    /// Create the cache directory if caching is enabled, the directory is
    /// absent and `create_if_missing` is set. Otherwise the directory is
    /// assumed to exist and the first write fails if it does not.
    pub async fn ensure_initialized(settings: &CacheSettings) -> CoreResult<()> {
        if !settings.enabled || !settings.create_if_missing {
            return Ok(());
        }

        if tokio::fs::metadata(&settings.path).await.is_err() {
            tokio::fs::create_dir_all(&settings.path).await?;
            info!(path = %settings.path.display(), "created cache directory");
        }

        Ok(())
    }

    /// Directory the store writes into.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn expiry(&self) -> ExpiryPolicy {
        self.expiry
    }

    /// Deterministic location of the entry for `key` in `bucket`.
    #[must_use]
    pub fn path_for(&self, key: &CacheKey, bucket: DateBucket) -> PathBuf {
        self.dir
            .join(format!("{}_{}.{}", bucket, key, CACHE_FILE_EXTENSION))
    }

    /// Where an entry produced today is written.
    #[must_use]
    pub fn location(&self, key: &CacheKey, today: NaiveDate) -> PathBuf {
        self.path_for(key, DateBucket::new(today))
    }

    /// Read the entry at `path`.
    ///
    /// Returns `None` when the file is missing, and also (after deleting the
    /// file) when it is empty, holds no rows, or cannot be decoded.
    pub async fn try_read(&self, path: &Path) -> CoreResult<Option<RecordBatch>> {
        let data = match tokio::fs::read(path).await {
            Ok(data) => data,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        if data.is_empty() {
            self.purge(path, "zero-length file").await;
            return Ok(None);
        }

        match self.codec.decode(Bytes::from(data)) {
            Ok(table) if table.num_rows() == 0 => {
                self.purge(path, "empty table").await;
                Ok(None)
            }
            Ok(table) => Ok(Some(table)),
            Err(CoreError::Deserialization(reason)) => {
                self.purge(path, &reason).await;
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Write `table` to `path`, replacing whatever was there.
    ///
    /// Encoding happens before the file is touched; if the write itself
    /// fails the partial file is removed.
    pub async fn write(&self, path: &Path, table: &RecordBatch) -> CoreResult<()> {
        let bytes = self.codec.encode(table)?;

        if let Err(err) = tokio::fs::write(path, &bytes).await {
            let _ = tokio::fs::remove_file(path).await;
            return Err(err.into());
        }

        debug!(
            path = %path.display(),
            rows = table.num_rows(),
            bytes = bytes.len(),
            "cache entry written"
        );
        Ok(())
    }

    /// Find a usable entry for `key`, newest bucket first.
    ///
    /// Today's bucket is always consulted; earlier buckets only when the
    /// expiry policy spans more than one day.
    pub async fn lookup(&self, key: &CacheKey, today: NaiveDate) -> CoreResult<Option<CachedEntry>> {
        let today = DateBucket::new(today);

        for age in 0..self.expiry.window_days() {
            let Some(bucket) = today.days_before(age) else {
                break;
            };
            let path = self.path_for(key, bucket);
            if let Some(table) = self.try_read(&path).await? {
                return Ok(Some(CachedEntry {
                    path,
                    bucket,
                    table,
                }));
            }
        }

        Ok(None)
    }

    async fn purge(&self, path: &Path, reason: &str) {
        match tokio::fs::remove_file(path).await {
            Ok(()) => warn!(path = %path.display(), reason, "discarded unusable cache entry"),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => warn!(
                path = %path.display(),
                reason,
                error = %err,
                "failed to discard unusable cache entry"
            ),
        }
    }
}
