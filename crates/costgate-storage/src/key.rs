//! Cache keys and date buckets.

use chrono::NaiveDate;
use sha2::{Digest, Sha256};
use std::fmt;

/// SHA-256 fingerprint of the exact query bytes, as 64 lowercase hex chars.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key for a query.
    ///
    /// Literal-text semantics: any byte difference, whitespace included,
    /// yields a different key. Callers reject empty text beforehand.
    #[must_use]
    pub fn derive(query: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(query.as_bytes());
        Self(format!("{:x}", hasher.finalize()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Calendar day an entry belongs to, rendered `YYYYMMDD`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DateBucket(NaiveDate);

impl DateBucket {
    #[must_use]
    pub fn new(date: NaiveDate) -> Self {
        Self(date)
    }

    #[must_use]
    pub fn date(&self) -> NaiveDate {
        self.0
    }

    /// The bucket `days` before this one; `None` before the calendar start.
    #[must_use]
    pub fn days_before(&self, days: u32) -> Option<Self> {
        self.0
            .checked_sub_days(chrono::Days::new(u64::from(days)))
            .map(Self)
    }
}

impl fmt::Display for DateBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y%m%d"))
    }
}
