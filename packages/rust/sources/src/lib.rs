//! Content sources: the plugin contract, the built-in email/RSS/web plugins,
//! and the manager that owns configured sources.
//!
//! This crate provides:
//! - [`SourcePlugin`]: the capability set every source variant implements
//! - [`EmailPlugin`], [`RssPlugin`], [`WebPlugin`]: the built-in variants
//! - [`SourceManager`]: registry, `sources.json` persistence, fan-out fetch/test
//! - [`LegacyFetcher`]: direct email + RSS clients used as a fallback

pub mod email;
pub mod legacy;
pub mod manager;
pub mod plugin;
pub mod resolve;
pub mod rss;
pub mod web;

pub use email::{EmailClient, EmailPlugin, EmailSourceConfig};
pub use legacy::LegacyFetcher;
pub use manager::{ManagerStatus, SourceInfo, SourceManager, SourceUpdate};
pub use plugin::{PluginFactory, SourcePlugin, plugin_factory};
pub use resolve::resolve_config;
pub use rss::{FeedConfig, RssClient, RssPlugin};
pub use web::{ScrapingMode, WebPlugin, WebSourceConfig};
