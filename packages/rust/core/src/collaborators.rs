//! Seams between the engine and the services it drives.
//!
//! Each trait has one production implementation backed by the workspace
//! crates. Tests substitute in-memory fakes.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::NaiveDate;
use research_export::ExportManager;
use research_processing::{LinkEnricher, LinkExtractor};
use research_shared::{ContentItem, Insight, Link, ResearchError, Result, Summary, TestResult};
use research_sources::{LegacyFetcher, ManagerStatus, SourceManager};
use research_storage::{RunStats, Storage};

use crate::insights::LlmInsightExtractor;
use crate::summarizer::LlmSummarizer;

// ---------------------------------------------------------------------------
// Content
// ---------------------------------------------------------------------------

/// Primary content path.
#[async_trait]
pub trait ContentProvider: Send + Sync {
    /// Fetch from every enabled source. An error means the provider itself
    /// failed, not one of its sources.
    async fn fetch_all_content(&self) -> Result<Vec<ContentItem>>;

    async fn test_sources(&self) -> Vec<(String, TestResult)>;

    async fn status(&self) -> ManagerStatus;
}

#[async_trait]
impl ContentProvider for SourceManager {
    async fn fetch_all_content(&self) -> Result<Vec<ContentItem>> {
        self.fetch_from_all_sources().await
    }

    async fn test_sources(&self) -> Vec<(String, TestResult)> {
        self.test_all_sources().await
    }

    async fn status(&self) -> ManagerStatus {
        SourceManager::status(self).await
    }
}

/// Stands in for a source manager that could not be loaded, so a run still
/// reaches the fallback path.
#[derive(Debug, Clone)]
pub struct UnavailableSources {
    reason: String,
}

impl UnavailableSources {
    pub fn new(reason: impl std::fmt::Display) -> Self {
        Self {
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl ContentProvider for UnavailableSources {
    async fn fetch_all_content(&self) -> Result<Vec<ContentItem>> {
        Err(ResearchError::config(format!(
            "source manager unavailable: {}",
            self.reason
        )))
    }

    async fn test_sources(&self) -> Vec<(String, TestResult)> {
        Vec::new()
    }

    async fn status(&self) -> ManagerStatus {
        ManagerStatus {
            total_sources: 0,
            enabled_sources: 0,
            sources_by_type: Default::default(),
            available_plugin_types: Vec::new(),
        }
    }
}

/// Content path used when the primary provider fails.
#[async_trait]
pub trait FallbackProvider: Send + Sync {
    async fn fetch_all(&self) -> Result<Vec<ContentItem>>;
}

#[async_trait]
impl FallbackProvider for LegacyFetcher {
    async fn fetch_all(&self) -> Result<Vec<ContentItem>> {
        LegacyFetcher::fetch_all(self).await
    }
}

// ---------------------------------------------------------------------------
// Model-backed services
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Summary-shaped record for one item. Empty content must not error.
    async fn summarize_content(&self, item: &ContentItem) -> Result<Summary>;

    async fn test_api(&self) -> bool;
}

#[async_trait]
impl Summarizer for LlmSummarizer {
    async fn summarize_content(&self, item: &ContentItem) -> Result<Summary> {
        Ok(self.summarize(item).await)
    }

    async fn test_api(&self) -> bool {
        LlmSummarizer::test_api(self).await
    }
}

#[async_trait]
pub trait InsightExtractor: Send + Sync {
    /// Checked once per run before any extraction. An error switches the
    /// whole stage to bullet-derived insights.
    fn ensure_ready(&self) -> Result<()> {
        Ok(())
    }

    async fn extract_strategic_insights(&self, summary: &Summary) -> Result<Vec<String>>;
}

#[async_trait]
impl InsightExtractor for LlmInsightExtractor {
    fn ensure_ready(&self) -> Result<()> {
        LlmInsightExtractor::ensure_ready(self)
    }

    async fn extract_strategic_insights(&self, summary: &Summary) -> Result<Vec<String>> {
        Ok(self.extract(summary).await)
    }
}

// ---------------------------------------------------------------------------
// Links
// ---------------------------------------------------------------------------

#[async_trait]
pub trait LinkProcessor: Send + Sync {
    fn extract_links(&self, text: &str) -> Result<Vec<Link>>;

    async fn enrich_links(&self, links: Vec<Link>, max_links: usize) -> Result<Vec<Link>>;

    async fn test_api(&self) -> bool;
}

/// Extractor plus LinkPreview enricher.
pub struct LinkService {
    extractor: LinkExtractor,
    enricher: LinkEnricher,
}

impl LinkService {
    pub fn new(api_key: Option<String>, cache_dir: &Path) -> Result<Self> {
        Ok(Self {
            extractor: LinkExtractor::new(),
            enricher: LinkEnricher::new(api_key, cache_dir)?,
        })
    }
}

#[async_trait]
impl LinkProcessor for LinkService {
    fn extract_links(&self, text: &str) -> Result<Vec<Link>> {
        Ok(self.extractor.extract_links(text))
    }

    async fn enrich_links(&self, links: Vec<Link>, max_links: usize) -> Result<Vec<Link>> {
        Ok(self.enricher.enrich_links(links, max_links).await)
    }

    async fn test_api(&self) -> bool {
        self.enricher.test_api().await
    }
}

// ---------------------------------------------------------------------------
// Persistence and exports
// ---------------------------------------------------------------------------

/// Persistence used by a run. Every call commits before returning.
#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn initialize(&self) -> Result<()>;
    async fn test_connection(&self) -> bool;
    async fn store_summaries(&self, summaries: &[Summary]) -> Result<Vec<i64>>;
    async fn store_insights(&self, insights: &[Insight]) -> Result<usize>;
    async fn store_links(&self, links: &[Link]) -> Result<usize>;
    async fn store_summary(&self, summary: &Summary) -> Result<i64>;
    async fn update_last_run_timestamp(&self) -> Result<()>;
    async fn get_latest_weekly_summary(&self) -> Result<Option<Summary>>;
    /// Non-weekly summaries dated on or after `since`.
    async fn get_summaries_since(&self, since: NaiveDate) -> Result<Vec<Summary>>;
    /// Non-weekly summaries dated strictly after `day`.
    async fn get_summaries_after(&self, day: NaiveDate) -> Result<Vec<Summary>>;
    async fn start_processing_run(&self) -> Result<i64>;
    async fn complete_processing_run(
        &self,
        run_id: i64,
        stats: &RunStats,
        error: Option<&str>,
    ) -> Result<()>;
}

#[async_trait]
impl ResultStore for Storage {
    async fn initialize(&self) -> Result<()> {
        Storage::initialize(self).await
    }

    async fn test_connection(&self) -> bool {
        Storage::test_connection(self).await
    }

    async fn store_summaries(&self, summaries: &[Summary]) -> Result<Vec<i64>> {
        Storage::store_summaries(self, summaries).await
    }

    async fn store_insights(&self, insights: &[Insight]) -> Result<usize> {
        Storage::store_insights(self, insights).await
    }

    async fn store_links(&self, links: &[Link]) -> Result<usize> {
        Storage::store_links(self, links).await
    }

    async fn store_summary(&self, summary: &Summary) -> Result<i64> {
        Storage::store_summary(self, summary).await
    }

    async fn update_last_run_timestamp(&self) -> Result<()> {
        Storage::update_last_run_timestamp(self).await
    }

    async fn get_latest_weekly_summary(&self) -> Result<Option<Summary>> {
        Storage::get_latest_weekly_summary(self).await
    }

    async fn get_summaries_since(&self, since: NaiveDate) -> Result<Vec<Summary>> {
        Storage::get_summaries_since(self, since).await
    }

    async fn get_summaries_after(&self, day: NaiveDate) -> Result<Vec<Summary>> {
        Storage::get_summaries_after(self, day).await
    }

    async fn start_processing_run(&self) -> Result<i64> {
        Storage::start_processing_run(self).await
    }

    async fn complete_processing_run(
        &self,
        run_id: i64,
        stats: &RunStats,
        error: Option<&str>,
    ) -> Result<()> {
        Storage::complete_processing_run(self, run_id, stats, error).await
    }
}

/// Export writers. Rendering failures come back as `None`.
#[async_trait]
pub trait Exporter: Send + Sync {
    async fn generate_obsidian_summary(&self, summaries: &[Summary]) -> Option<PathBuf>;
    async fn generate_json_export(&self, summaries: &[Summary]) -> Option<PathBuf>;
    async fn cleanup_temp_files(&self);
}

#[async_trait]
impl Exporter for ExportManager {
    async fn generate_obsidian_summary(&self, summaries: &[Summary]) -> Option<PathBuf> {
        ExportManager::generate_obsidian_summary(self, summaries).await
    }

    async fn generate_json_export(&self, summaries: &[Summary]) -> Option<PathBuf> {
        ExportManager::generate_json_export(self, summaries).await
    }

    async fn cleanup_temp_files(&self) {
        ExportManager::cleanup_temp_files(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unavailable_sources_always_fail_fetch() {
        let sources = UnavailableSources::new("sources.json: expected value at line 1");
        let err = sources.fetch_all_content().await.unwrap_err();
        assert!(err.to_string().contains("expected value"));
        assert!(sources.test_sources().await.is_empty());
        assert_eq!(sources.status().await.total_sources, 0);
    }
}
