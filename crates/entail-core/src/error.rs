use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while preparing data for, building, or running the model.
#[derive(Debug, Error)]
pub enum EntailError {
    /// A configuration value is missing or out of range.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// An input file is malformed (bad vector, missing field, unknown label).
    #[error("{}:{line}: {message}", path.display())]
    Format {
        /// The file being read.
        path: PathBuf,
        /// 1-based line number of the offending record.
        line: usize,
        /// What was wrong with it.
        message: String,
    },

    /// A path could not be read or written.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        /// The path involved.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Tensor dimensions do not match what the model was built for.
    #[error("shape mismatch for {what}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        /// Which input was checked.
        what: &'static str,
        /// The shape the model expects.
        expected: Vec<usize>,
        /// The shape that was supplied.
        actual: Vec<usize>,
    },

    /// A regex pattern failed to compile (should not happen with static patterns).
    #[error("regex compilation error: {0}")]
    Regex(#[from] regex::Error),

    /// Candle tensor framework error.
    #[error("tensor error: {0}")]
    Candle(#[from] candle_core::Error),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EntailError {
    /// Build a [`EntailError::Format`] for a line of `path`.
    pub fn format(path: impl Into<PathBuf>, line: usize, message: impl Into<String>) -> Self {
        Self::Format {
            path: path.into(),
            line,
            message: message.into(),
        }
    }

    /// Wrap an I/O error with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type alias for entail operations.
pub type Result<T> = std::result::Result<T, EntailError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let err = EntailError::Config("batch size must be at least 1".into());
        assert_eq!(
            err.to_string(),
            "invalid configuration: batch size must be at least 1"
        );

        let err = EntailError::format("train.jsonl", 7, "unknown label \"maybe\"");
        assert_eq!(err.to_string(), "train.jsonl:7: unknown label \"maybe\"");

        let err = EntailError::ShapeMismatch {
            what: "sentence1",
            expected: vec![4, 3],
            actual: vec![4, 5],
        };
        assert!(err.to_string().contains("sentence1"));
        assert!(err.to_string().contains("[4, 5]"));
    }

    #[test]
    fn io_error_keeps_source() {
        let err = EntailError::io(
            "missing.txt",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(err.to_string().contains("missing.txt"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<EntailError>();
    }
}
