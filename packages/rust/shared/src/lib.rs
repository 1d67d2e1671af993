//! Shared types, error model, and configuration for the research pipeline.
//!
//! This crate is the foundation depended on by all other research crates.
//! It provides:
//! - [`ResearchError`]: the unified error type
//! - Domain types ([`ContentItem`], [`Summary`], [`Insight`], [`Link`], [`SourceConfig`])
//! - Configuration ([`AppConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CONFIG_PATH_ENV, EmailConfig, ExportConfig, LlmConfig, PathsConfig,
    ProcessingConfig, WeeklyConfig, config_dir, config_file_path, expand_tilde, init_config,
    load_config, load_config_from, validate_api_key,
};
pub use error::{ResearchError, Result};
pub use types::{
    ContentItem, Insight, Link, PluginType, RunId, SUMMARY_FAILED_TEXT, SourceConfig, Summary,
    TestResult, ValidationResult, WEEKLY_SUMMARY_SOURCE_TYPE,
};
