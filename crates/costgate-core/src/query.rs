//! Query text as accepted by the executor.

use crate::error::{CoreError, CoreResult};
use std::fmt;
use std::path::Path;

/// Non-empty SQL text, kept byte-for-byte as supplied.
///
/// The text is never trimmed or normalised: the cache is keyed on the exact
/// bytes, so two queries differing only in whitespace are distinct.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryText(String);

impl QueryText {
    /// Rejects empty and whitespace-only text.
    pub fn new(text: impl Into<String>) -> CoreResult<Self> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(CoreError::validation("the query passed as input is empty"));
        }
        Ok(Self(text))
    }

    /// Same as [`QueryText::new`], treating an absent value as empty.
    pub fn from_option(text: Option<&str>) -> CoreResult<Self> {
        match text {
            Some(text) => Self::new(text),
            None => Err(CoreError::validation("no query was supplied")),
        }
    }

    /// Reads the whole file as UTF-8.
    ///
    /// A missing path or a zero-length file is rejected before anything else
    /// happens.
    pub async fn from_file(path: impl AsRef<Path>) -> CoreResult<Self> {
        let path = path.as_ref();
        let metadata = match tokio::fs::metadata(path).await {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(CoreError::validation(format!(
                    "query file {} does not exist",
                    path.display()
                )));
            }
            Err(err) => return Err(err.into()),
        };

        if metadata.len() == 0 {
            return Err(CoreError::validation(format!(
                "query file {} is empty",
                path.display()
            )));
        }

        let text = tokio::fs::read_to_string(path).await?;
        Self::new(text)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl AsRef<str> for QueryText {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueryText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_and_blank() {
        assert!(QueryText::new("").is_err());
        assert!(QueryText::new("  \n\t").is_err());
        assert!(QueryText::from_option(None).is_err());
    }

    #[test]
    fn keeps_text_verbatim() {
        let query = QueryText::new(" SELECT 1 \n").unwrap();
        assert_eq!(query.as_str(), " SELECT 1 \n");
    }

    #[tokio::test]
    async fn from_file_reads_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("q.sql");
        std::fs::write(&path, "SELECT 42").unwrap();

        let query = QueryText::from_file(&path).await.unwrap();
        assert_eq!(query.as_str(), "SELECT 42");
    }

    #[tokio::test]
    async fn from_file_rejects_missing_and_empty() {
        let dir = tempfile::tempdir().unwrap();

        let missing = QueryText::from_file(dir.path().join("missing.sql")).await;
        assert!(matches!(missing, Err(CoreError::Validation(_))));

        let empty_path = dir.path().join("empty.sql");
        std::fs::write(&empty_path, "").unwrap();
        let empty = QueryText::from_file(&empty_path).await;
        assert!(matches!(empty, Err(CoreError::Validation(_))));
    }
}
