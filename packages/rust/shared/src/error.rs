//! Error types for the research pipeline.
//!
//! Library crates use [`ResearchError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all pipeline operations.
#[derive(Debug, thiserror::Error)]
pub enum ResearchError {
    /// Settings loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error while talking to a source or API.
    #[error("network error: {0}")]
    Network(String),

    /// Feed, mail, HTML, or model-response parsing error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// LLM API error (request, status, or response shape).
    #[error("llm error: {0}")]
    Llm(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (bad source config, bad state transition, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Export rendering or writing error.
    #[error("export error: {0}")]
    Export(String),

    /// Failure raised by a source plugin, tagged with the offending source.
    #[error("{plugin_type} plugin '{source_id}': {message}")]
    Plugin {
        source_id: String,
        plugin_type: String,
        message: String,
    },

    /// The run was stopped through its cancellation flag.
    #[error("processing cancelled")]
    Cancelled,
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ResearchError>;

impl ResearchError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a tagged plugin error.
    pub fn plugin(
        source_id: impl Into<String>,
        plugin_type: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Plugin {
            source_id: source_id.into(),
            plugin_type: plugin_type.into(),
            message: msg.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = ResearchError::config("missing API key");
        assert_eq!(err.to_string(), "config error: missing API key");

        let err = ResearchError::validation("unknown plugin type: ftp");
        assert!(err.to_string().contains("unknown plugin type"));
    }

    #[test]
    fn plugin_error_carries_source_and_type() {
        let err = ResearchError::plugin("rss_tech", "rss", "feed unreachable");
        assert_eq!(err.to_string(), "rss plugin 'rss_tech': feed unreachable");
        match err {
            ResearchError::Plugin {
                source_id,
                plugin_type,
                ..
            } => {
                assert_eq!(source_id, "rss_tech");
                assert_eq!(plugin_type, "rss");
            }
            other => panic!("expected Plugin, got {other:?}"),
        }
    }
}
