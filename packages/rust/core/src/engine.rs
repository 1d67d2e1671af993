//! The nine-step processing workflow.
//!
//! 1. Initialize storage
//! 2. Fetch content (source manager, then the legacy fallback)
//! 3. Extract and enrich links
//! 4. Summarize each item
//! 5. Extract strategic insights
//! 6. Store summaries, insights and links
//! 7. Write exports
//! 8. Generate a weekly roll-up when due
//! 9. Finalize
//!
//! Per-item failures degrade that item. Storage failures end the run in
//! `error` and propagate to the caller.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime};
use research_export::{ExportManager, render_obsidian_content};
use research_shared::{
    AppConfig, ContentItem, Insight, Link, ResearchError, Result, Summary,
    WEEKLY_SUMMARY_SOURCE_TYPE,
};
use research_sources::{LegacyFetcher, ManagerStatus};
use research_storage::{RunStats, Storage};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

use crate::collaborators::{
    ContentProvider, Exporter, FallbackProvider, InsightExtractor, LinkProcessor, LinkService,
    ResultStore, Summarizer,
};
use crate::insights::{LlmInsightExtractor, fallback_insights};
use crate::llm::LlmClient;
use crate::state::{
    EVENT_CHANNEL_CAPACITY, LogLevel, ProcessingState, RunStatus, StateEvent, StateSnapshot,
};
use crate::summarizer::LlmSummarizer;

pub const TOTAL_STEPS: u32 = 9;

/// Look-back window for weekly roll-ups and the first-weekly bootstrap.
pub const WEEKLY_WINDOW_DAYS: i64 = 7;

/// `source` of generated weekly roll-ups.
pub const WEEKLY_SUMMARY_SOURCE: &str = "Research Automation";

/// Step outputs keyed by name (`content_fetched`, `summaries_generated`, ...).
pub type RunResults = Map<String, Value>;

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Cooperative stop flag, checked between steps and between items.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    /// `Err(Cancelled)` once [`cancel`](Self::cancel) has been called.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(ResearchError::Cancelled)
        } else {
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Options and collaborators
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Pause between consecutive summarization calls.
    pub summary_delay: Duration,
    pub enable_link_enrichment: bool,
    pub max_links_to_enrich: usize,
    pub weekly_auto_generate: bool,
    pub weekly_min_days: i64,
}

impl EngineOptions {
    pub fn from_settings(settings: &AppConfig) -> Self {
        Self {
            summary_delay: Duration::from_millis(settings.processing.summary_delay_ms),
            enable_link_enrichment: settings.processing.enable_link_enrichment,
            max_links_to_enrich: settings.processing.max_links_to_enrich,
            weekly_auto_generate: settings.weekly.auto_generate,
            weekly_min_days: settings.weekly.min_days,
        }
    }
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self::from_settings(&AppConfig::default())
    }
}

/// Everything a run talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub sources: Arc<dyn ContentProvider>,
    pub fallback: Option<Arc<dyn FallbackProvider>>,
    pub summarizer: Arc<dyn Summarizer>,
    pub insights: Arc<dyn InsightExtractor>,
    pub links: Arc<dyn LinkProcessor>,
    pub store: Arc<dyn ResultStore>,
    pub exporter: Arc<dyn Exporter>,
}

impl Collaborators {
    /// Production collaborators built from settings around an already
    /// loaded content provider.
    pub async fn from_settings(
        settings: &AppConfig,
        sources: Arc<dyn ContentProvider>,
    ) -> Result<Self> {
        let fallback: Option<Arc<dyn FallbackProvider>> = match LegacyFetcher::from_settings(settings)
        {
            Ok(fetcher) => Some(Arc::new(fetcher)),
            Err(e) => {
                warn!(error = %e, "legacy fallback unavailable");
                None
            }
        };

        let llm = Arc::new(LlmClient::from_settings(settings)?);
        let summarizer = LlmSummarizer::new(llm.clone())
            .with_chunk_pause(Duration::from_millis(settings.processing.summary_delay_ms));

        let store = Storage::open(&settings.paths.database_path()).await?;

        let links = LinkService::new(settings.linkpreview_api_key(), &settings.paths.cache_dir())?;

        Ok(Self {
            sources,
            fallback,
            summarizer: Arc::new(summarizer),
            insights: Arc::new(LlmInsightExtractor::new(llm)),
            links: Arc::new(links),
            store: Arc::new(store),
            exporter: Arc::new(ExportManager::new(settings)),
        })
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Whether the weekly roll-up step would fire, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WeeklyDecision {
    pub due: bool,
    pub reason: String,
}

impl WeeklyDecision {
    fn due(reason: impl Into<String>) -> Self {
        Self {
            due: true,
            reason: reason.into(),
        }
    }

    fn skip(reason: impl Into<String>) -> Self {
        Self {
            due: false,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceCheck {
    pub source_id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of [`ProcessingEngine::test_configuration`].
#[derive(Debug, Clone, Serialize)]
pub struct ConfigurationReport {
    pub configured_sources: usize,
    pub source_tests: Vec<SourceCheck>,
    /// All source tests passed (false when there are none).
    pub sources_ok: bool,
    pub llm_api: bool,
    pub link_enricher: bool,
    pub database: bool,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Orchestrates one run at a time over injected collaborators.
pub struct ProcessingEngine {
    collab: Collaborators,
    options: EngineOptions,
    state: Mutex<ProcessingState>,
    events: broadcast::Sender<StateEvent>,
    cancel: CancellationFlag,
}

impl ProcessingEngine {
    pub fn new(collaborators: Collaborators, options: EngineOptions) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            collab: collaborators,
            options,
            state: Mutex::new(ProcessingState::new()),
            events,
            cancel: CancellationFlag::new(),
        }
    }

    /// Receive a snapshot after every state change of every later run.
    pub fn subscribe(&self) -> broadcast::Receiver<StateEvent> {
        self.events.subscribe()
    }

    pub fn current_state(&self) -> StateSnapshot {
        self.lock_state().snapshot()
    }

    /// Handle that stops the run in progress, or the next one if none is
    /// running, at its next check. Cleared when a run finishes.
    pub fn cancellation_flag(&self) -> CancellationFlag {
        self.cancel.clone()
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    // -----------------------------------------------------------------------
    // State helpers
    // -----------------------------------------------------------------------

    fn lock_state(&self) -> std::sync::MutexGuard<'_, ProcessingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut ProcessingState) -> Result<R>) -> Option<R> {
        match f(&mut self.lock_state()) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!(error = %e, "state update rejected");
                None
            }
        }
    }

    fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.with_state(|s| s.add_log(level, message, Map::new()));
    }

    fn progress(&self, step: &str, progress: u32) {
        self.with_state(|s| s.update_progress(step, progress));
    }

    fn set_result(&self, key: &str, value: impl Into<Value>) {
        self.with_state(|s| s.set_result(key, value));
    }

    /// Swap in a fresh running state unless a run is already in progress.
    fn begin_run(&self) -> Result<()> {
        let mut state = self.lock_state();
        if state.status() == RunStatus::Running {
            return Err(ResearchError::validation(
                "a processing run is already in progress",
            ));
        }
        let mut fresh = ProcessingState::with_events(self.events.clone());
        fresh.start(TOTAL_STEPS)?;
        *state = fresh;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Workflow
    // -----------------------------------------------------------------------

    /// Run all nine steps and return the step results.
    ///
    /// Empty content completes the run early with zero counts. Any error
    /// not absorbed by a step marks the run `error` and is returned.
    #[instrument(skip_all)]
    pub async fn run_full_processing(&self) -> Result<RunResults> {
        self.begin_run()?;
        let started = Instant::now();
        self.log(LogLevel::Info, "Starting processing workflow");

        let mut run_id = None;
        let outcome = self.run_steps(&mut run_id).await;
        self.cancel.reset();
        let results = self
            .with_state(|s| Ok(s.results().clone()))
            .unwrap_or_default();
        let stats = run_stats(&results);

        match outcome {
            Ok(()) => {
                self.record_run(run_id, &stats, None).await;
                self.with_state(|s| s.complete());
                info!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "processing completed"
                );
                Ok(results)
            }
            Err(e) => {
                let message = e.to_string();
                self.log(LogLevel::Error, format!("Processing failed: {message}"));
                self.record_run(run_id, &stats, Some(&message)).await;
                self.with_state(|s| s.fail(message));
                Err(e)
            }
        }
    }

    async fn run_steps(&self, run_id: &mut Option<i64>) -> Result<()> {
        self.progress("Initializing database", 1);
        self.collab.store.initialize().await?;
        match self.collab.store.start_processing_run().await {
            Ok(id) => *run_id = Some(id),
            Err(e) => self.log(LogLevel::Warning, format!("Could not record run start: {e}")),
        }

        self.cancel.check()?;
        self.progress("Fetching content from sources", 2);
        let mut items = self.fetch_all_content().await;
        self.set_result("content_fetched", items.len());
        if items.is_empty() {
            self.log(LogLevel::Warning, "No new content found to process");
            return Ok(());
        }

        self.cancel.check()?;
        self.progress("Processing links", 3);
        let links = self.process_links(&mut items).await?;
        self.set_result("links_processed", links);

        self.cancel.check()?;
        self.progress("Generating AI summaries", 4);
        let summaries = self.generate_summaries(&items).await?;
        self.set_result("summaries_generated", summaries.len());

        self.cancel.check()?;
        self.progress("Extracting insights", 5);
        let insights = self.extract_insights(&summaries).await?;
        self.set_result("insights_extracted", insights.len());

        self.cancel.check()?;
        self.progress("Storing data", 6);
        if let Err(e) = self.store_results(&items, &summaries, &insights).await {
            self.log(LogLevel::Error, format!("Error storing data: {e}"));
            return Err(e);
        }

        self.cancel.check()?;
        self.progress("Generating exports", 7);
        let exports = self.generate_exports(&summaries).await;
        self.set_result("exports_generated", exports.len());
        self.set_result(
            "export_files",
            exports
                .iter()
                .map(|p| Value::from(p.display().to_string()))
                .collect::<Vec<_>>(),
        );

        self.cancel.check()?;
        self.progress("Checking for weekly summary generation", 8);
        let weekly_generated = if self.should_generate_weekly_summary().await {
            self.progress("Generating weekly summary", 8);
            let generated = self.generate_weekly_summary().await.is_some();
            if generated {
                self.log(LogLevel::Info, "Weekly summary auto-generated");
            } else {
                self.log(LogLevel::Warning, "Weekly summary auto-generation failed");
            }
            generated
        } else {
            self.log(
                LogLevel::Info,
                "Weekly summary auto-generation skipped (conditions not met)",
            );
            false
        };
        self.set_result("weekly_summary_generated", weekly_generated);

        self.progress("Finalizing", 9);
        self.finalize().await;

        let mut message = format!(
            "Processing completed successfully. Created {} summaries, extracted {} insights, generated {} exports",
            summaries.len(),
            insights.len(),
            exports.len()
        );
        if weekly_generated {
            message.push_str(", and auto-generated weekly summary");
        }
        self.log(LogLevel::Info, message);
        Ok(())
    }

    async fn record_run(&self, run_id: Option<i64>, stats: &RunStats, error: Option<&str>) {
        let Some(run_id) = run_id else {
            return;
        };
        if let Err(e) = self
            .collab
            .store
            .complete_processing_run(run_id, stats, error)
            .await
        {
            warn!(run_id, error = %e, "failed to record run completion");
        }
    }

    /// Source manager first; the legacy clients only when the manager call
    /// itself fails. Both failing yields no content.
    async fn fetch_all_content(&self) -> Vec<ContentItem> {
        let error = match self.collab.sources.fetch_all_content().await {
            Ok(items) => {
                self.log(
                    LogLevel::Info,
                    format!("Received {} content items from sources", items.len()),
                );
                return items;
            }
            Err(e) => e,
        };

        self.log(LogLevel::Error, format!("Source manager fetch failed: {error}"));
        let Some(fallback) = &self.collab.fallback else {
            return Vec::new();
        };

        self.log(LogLevel::Info, "Attempting fallback to legacy clients");
        match fallback.fetch_all().await {
            Ok(items) => {
                self.log(
                    LogLevel::Info,
                    format!("Legacy client fallback completed: {} total items", items.len()),
                );
                items
            }
            Err(e) => {
                self.log(LogLevel::Error, format!("Legacy client fallback failed: {e}"));
                Vec::new()
            }
        }
    }

    async fn process_links(&self, items: &mut [ContentItem]) -> Result<usize> {
        let mut total = 0;
        for item in items.iter_mut() {
            self.cancel.check()?;
            let links = match self.links_for(item).await {
                Ok(links) => links,
                Err(e) => {
                    self.log(
                        LogLevel::Warning,
                        format!("Error processing links for {}: {e}", or_unknown(&item.title)),
                    );
                    Vec::new()
                }
            };
            total += links.len();
            item.links = links;
        }
        Ok(total)
    }

    async fn links_for(&self, item: &ContentItem) -> Result<Vec<Link>> {
        let links = self.collab.links.extract_links(&item.content)?;
        if self.options.enable_link_enrichment
            && self.options.max_links_to_enrich > 0
            && !links.is_empty()
        {
            self.collab
                .links
                .enrich_links(links, self.options.max_links_to_enrich)
                .await
        } else {
            Ok(links)
        }
    }

    /// One record per item, in order. A failed call leaves a placeholder.
    async fn generate_summaries(&self, items: &[ContentItem]) -> Result<Vec<Summary>> {
        let mut summaries = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            self.cancel.check()?;
            if i > 0 && !self.options.summary_delay.is_zero() {
                tokio::time::sleep(self.options.summary_delay).await;
            }

            let title = or_unknown(&item.title);
            self.log(LogLevel::Info, format!("Summarizing: {title}"));
            match self.collab.summarizer.summarize_content(item).await {
                Ok(mut summary) => {
                    if summary.links.is_empty() {
                        summary.links = item.links.clone();
                    }
                    summaries.push(summary);
                }
                Err(e) => {
                    self.log(LogLevel::Error, format!("Error summarizing {title}: {e}"));
                    summaries.push(Summary::failed(item, e.to_string()));
                }
            }
        }
        Ok(summaries)
    }

    async fn extract_insights(&self, summaries: &[Summary]) -> Result<Vec<Insight>> {
        if let Err(e) = self.collab.insights.ensure_ready() {
            self.log(
                LogLevel::Error,
                format!("Strategic insights extraction failed: {e}"),
            );
            let insights = fallback_insights(summaries);
            self.log(
                LogLevel::Info,
                format!("Used fallback extraction for {} insights", insights.len()),
            );
            return Ok(insights);
        }

        self.log(
            LogLevel::Info,
            format!("Extracting strategic insights from {} summaries", summaries.len()),
        );
        let mut insights = Vec::new();
        for summary in summaries {
            self.cancel.check()?;
            match self
                .collab
                .insights
                .extract_strategic_insights(summary)
                .await
            {
                Ok(texts) => {
                    self.log(
                        LogLevel::Debug,
                        format!("Extracted {} insights from {}", texts.len(), summary.source),
                    );
                    insights.extend(
                        texts
                            .into_iter()
                            .map(|text| Insight::from_summary(summary, text)),
                    );
                }
                Err(e) => self.log(
                    LogLevel::Warning,
                    format!("Failed to extract insights from {}: {e}", summary.source),
                ),
            }
        }
        self.log(
            LogLevel::Info,
            format!("Successfully extracted {} strategic insights total", insights.len()),
        );
        Ok(insights)
    }

    async fn store_results(
        &self,
        items: &[ContentItem],
        summaries: &[Summary],
        insights: &[Insight],
    ) -> Result<()> {
        let ids = self.collab.store.store_summaries(summaries).await?;
        self.collab.store.store_insights(insights).await?;

        let today = Local::now().format("%Y-%m-%d").to_string();
        let links: Vec<Link> = items
            .iter()
            .flat_map(|item| {
                let source = or_unknown(&item.source).to_string();
                let date = if item.date.is_empty() {
                    today.clone()
                } else {
                    item.date.clone()
                };
                item.links.iter().map(move |link| Link {
                    source: Some(source.clone()),
                    date: Some(date.clone()),
                    ..link.clone()
                })
            })
            .collect();
        let new_links = self.collab.store.store_links(&links).await?;

        self.set_result("summaries_stored", ids.len());
        self.set_result("links_stored", new_links);
        self.log(LogLevel::Info, "Data stored successfully in database");
        Ok(())
    }

    async fn generate_exports(&self, summaries: &[Summary]) -> Vec<PathBuf> {
        let mut exports = Vec::new();
        if let Some(path) = self.collab.exporter.generate_obsidian_summary(summaries).await {
            exports.push(path);
        }
        if let Some(path) = self.collab.exporter.generate_json_export(summaries).await {
            exports.push(path);
        }
        self.log(
            LogLevel::Info,
            format!("Generated {} export files", exports.len()),
        );
        exports
    }

    async fn finalize(&self) {
        if let Err(e) = self.collab.store.update_last_run_timestamp().await {
            self.log(LogLevel::Warning, format!("Error during finalization: {e}"));
        }
        self.collab.exporter.cleanup_temp_files().await;
        self.log(LogLevel::Info, "Processing finalized successfully");
    }

    // -----------------------------------------------------------------------
    // Weekly roll-up
    // -----------------------------------------------------------------------

    /// Evaluate the weekly trigger without touching run state.
    ///
    /// Due when auto-generation is on and either no weekly summary exists and
    /// something was summarized in the last seven days, or the last weekly
    /// summary is at least `weekly_min_days` old and newer summaries exist.
    pub async fn evaluate_weekly_summary(&self) -> WeeklyDecision {
        if !self.options.weekly_auto_generate {
            return WeeklyDecision::skip("Auto-generation of weekly summaries is disabled");
        }
        match self.weekly_decision().await {
            Ok(decision) => decision,
            Err(e) => WeeklyDecision::skip(format!("Error checking weekly summary conditions: {e}")),
        }
    }

    async fn weekly_decision(&self) -> Result<WeeklyDecision> {
        let today = Local::now().date_naive();
        let store = &self.collab.store;

        let Some(latest) = store.get_latest_weekly_summary().await? else {
            let since = today - chrono::Duration::days(WEEKLY_WINDOW_DAYS);
            let recent = store.get_summaries_since(since).await?;
            return Ok(if recent.is_empty() {
                WeeklyDecision::skip("No weekly summary yet and nothing summarized in the last 7 days")
            } else {
                WeeklyDecision::due(format!(
                    "No weekly summary yet; {} summaries in the last 7 days",
                    recent.len()
                ))
            });
        };

        let last = parse_summary_date(&latest.date)?;
        let days_since = (today - last).num_days();
        let min_days = self.options.weekly_min_days;
        if days_since < min_days {
            return Ok(WeeklyDecision::skip(format!(
                "Last weekly summary was {days_since} days ago, minimum is {min_days} days"
            )));
        }

        let new_summaries = store
            .get_summaries_after(last)
            .await?
            .into_iter()
            .filter(|s| !s.is_weekly())
            .count();
        if new_summaries == 0 {
            return Ok(WeeklyDecision::skip(
                "No new summaries since last weekly summary",
            ));
        }

        Ok(WeeklyDecision::due(format!(
            "Found {new_summaries} new summaries since last weekly summary ({days_since} days ago)"
        )))
    }

    /// Step 8 decision, logged into the run narrative.
    pub async fn should_generate_weekly_summary(&self) -> bool {
        let decision = self.evaluate_weekly_summary().await;
        self.log(LogLevel::Info, decision.reason.clone());
        decision.due
    }

    /// Roll the last seven days of summaries into one stored weekly record
    /// and export it. `None` when there is nothing to roll up or it fails.
    pub async fn generate_weekly_summary(&self) -> Option<Summary> {
        match self.build_weekly_summary().await {
            Ok(summary) => summary,
            Err(e) => {
                self.log(LogLevel::Error, format!("Error generating weekly summary: {e}"));
                None
            }
        }
    }

    async fn build_weekly_summary(&self) -> Result<Option<Summary>> {
        let since = Local::now().date_naive() - chrono::Duration::days(WEEKLY_WINDOW_DAYS);
        let summaries: Vec<Summary> = self
            .collab
            .store
            .get_summaries_since(since)
            .await?
            .into_iter()
            .filter(|s| !s.is_weekly())
            .collect();
        if summaries.is_empty() {
            self.log(
                LogLevel::Info,
                "No summaries found for weekly summary generation",
            );
            return Ok(None);
        }

        let markdown = render_obsidian_content(&summaries);
        if markdown.trim().is_empty() {
            self.log(LogLevel::Error, "Failed to generate weekly summary content");
            return Ok(None);
        }

        let today = Local::now().format("%Y-%m-%d").to_string();
        let mut weekly = Summary {
            title: format!("Weekly Summary - {today}"),
            source: WEEKLY_SUMMARY_SOURCE.to_string(),
            source_type: WEEKLY_SUMMARY_SOURCE_TYPE.to_string(),
            date: today,
            content_length: markdown.len(),
            summary: markdown,
            tags: vec!["weekly".to_string(), "meta-summary".to_string()],
            chunks_processed: summaries.len(),
            ..Default::default()
        };

        let id = self.collab.store.store_summary(&weekly).await?;
        weekly.id = Some(id);
        self.log(LogLevel::Info, format!("Stored weekly summary with ID: {id}"));

        match self
            .collab
            .exporter
            .generate_obsidian_summary(std::slice::from_ref(&weekly))
            .await
        {
            Some(path) => self.log(
                LogLevel::Info,
                format!("Exported weekly summary to Obsidian: {}", path.display()),
            ),
            None => debug!("weekly summary not exported"),
        }

        Ok(Some(weekly))
    }

    // -----------------------------------------------------------------------
    // Diagnostics
    // -----------------------------------------------------------------------

    /// Probe every source, the LLM API, the link enricher and the database.
    pub async fn test_configuration(&self) -> ConfigurationReport {
        let source_tests: Vec<SourceCheck> = self
            .collab
            .sources
            .test_sources()
            .await
            .into_iter()
            .map(|(source_id, result)| SourceCheck {
                source_id,
                success: result.success,
                error: result.error,
            })
            .collect();

        let database = match self.collab.store.initialize().await {
            Ok(()) => self.collab.store.test_connection().await,
            Err(e) => {
                warn!(error = %e, "database check failed");
                false
            }
        };

        ConfigurationReport {
            configured_sources: source_tests.len(),
            sources_ok: !source_tests.is_empty() && source_tests.iter().all(|t| t.success),
            source_tests,
            llm_api: self.collab.summarizer.test_api().await,
            link_enricher: self.collab.links.test_api().await,
            database,
        }
    }

    pub async fn source_manager_status(&self) -> ManagerStatus {
        self.collab.sources.status().await
    }
}

fn run_stats(results: &RunResults) -> RunStats {
    let count = |key: &str| {
        results
            .get(key)
            .and_then(Value::as_u64)
            .unwrap_or(0) as usize
    };
    RunStats {
        summaries_created: count("summaries_stored"),
        links_extracted: count("links_processed"),
        insights_generated: count("insights_extracted"),
    }
}

fn or_unknown(value: &str) -> &str {
    if value.is_empty() { "Unknown" } else { value }
}

/// Local calendar day of a summary date. Accepts RFC 3339, naive ISO
/// timestamps (taken as local) and plain `YYYY-MM-DD` dates.
fn parse_summary_date(value: &str) -> Result<NaiveDate> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Local).date_naive());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(naive.date());
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| ResearchError::parse(format!("invalid summary date: {value}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use research_shared::{SUMMARY_FAILED_TEXT, TestResult};

    use crate::state::EventKind;

    // -----------------------------------------------------------------------
    // Fakes
    // -----------------------------------------------------------------------

    fn item(id: &str, content: &str) -> ContentItem {
        ContentItem {
            id: id.into(),
            title: format!("Item {id}"),
            content: content.into(),
            source: "Fake Source".into(),
            source_type: "email".into(),
            date: "2025-10-01".into(),
            ..Default::default()
        }
    }

    #[derive(Default)]
    struct FakeSources {
        items: Vec<ContentItem>,
        fail: bool,
    }

    #[async_trait]
    impl ContentProvider for FakeSources {
        async fn fetch_all_content(&self) -> Result<Vec<ContentItem>> {
            if self.fail {
                return Err(ResearchError::parse("sources.json is corrupt"));
            }
            Ok(self.items.clone())
        }

        async fn test_sources(&self) -> Vec<(String, TestResult)> {
            vec![
                ("rss_tech".into(), TestResult::ok("ok", Value::Null)),
                ("default_email".into(), TestResult::failed("auth failed")),
            ]
        }

        async fn status(&self) -> ManagerStatus {
            ManagerStatus {
                total_sources: 2,
                enabled_sources: 1,
                sources_by_type: BTreeMap::new(),
                available_plugin_types: vec!["email".into(), "rss".into(), "web".into()],
            }
        }
    }

    struct FakeFallback {
        items: Vec<ContentItem>,
        fail: bool,
    }

    #[async_trait]
    impl FallbackProvider for FakeFallback {
        async fn fetch_all(&self) -> Result<Vec<ContentItem>> {
            if self.fail {
                return Err(ResearchError::Network("imap down".into()));
            }
            Ok(self.items.clone())
        }
    }

    #[derive(Default)]
    struct FakeSummarizer {
        fail_ids: Vec<String>,
        calls: AtomicUsize,
        cancel_on_first: Option<CancellationFlag>,
        gate: Option<Arc<tokio::sync::Notify>>,
    }

    #[async_trait]
    impl Summarizer for FakeSummarizer {
        async fn summarize_content(&self, item: &ContentItem) -> Result<Summary> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(flag) = &self.cancel_on_first {
                flag.cancel();
            }
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.fail_ids.contains(&item.id) {
                return Err(ResearchError::Llm("rate limited".into()));
            }
            Ok(Summary {
                title: item.title.clone(),
                source: item.source.clone(),
                source_type: item.source_type.clone(),
                date: item.date.clone(),
                summary: format!("* {} grew 12% this quarter across all regions", item.title),
                insights: vec![format!("{} grew 12% this quarter", item.title)],
                tags: vec!["ai".into(), "markets".into()],
                content_length: item.content.len(),
                chunks_processed: 1,
                ..Default::default()
            })
        }

        async fn test_api(&self) -> bool {
            true
        }
    }

    #[derive(Default)]
    struct FakeInsights {
        not_ready: bool,
    }

    #[async_trait]
    impl InsightExtractor for FakeInsights {
        fn ensure_ready(&self) -> Result<()> {
            if self.not_ready {
                Err(ResearchError::Llm("no key".into()))
            } else {
                Ok(())
            }
        }

        async fn extract_strategic_insights(&self, summary: &Summary) -> Result<Vec<String>> {
            if summary.error.is_some() {
                return Err(ResearchError::Llm("nothing to extract".into()));
            }
            Ok(vec![format!("{} revenue rose 12% to $3B", summary.title)])
        }
    }

    struct FakeLinks;

    #[async_trait]
    impl LinkProcessor for FakeLinks {
        fn extract_links(&self, text: &str) -> Result<Vec<Link>> {
            if text.contains("BROKEN") {
                return Err(ResearchError::parse("bad markup"));
            }
            Ok(text
                .split_whitespace()
                .filter(|w| w.starts_with("https://"))
                .map(|w| Link {
                    url: w.to_string(),
                    title: "Link".into(),
                    ..Default::default()
                })
                .collect())
        }

        async fn enrich_links(&self, links: Vec<Link>, max_links: usize) -> Result<Vec<Link>> {
            Ok(links
                .into_iter()
                .take(max_links)
                .map(|l| Link {
                    description: Some("enriched".into()),
                    ..l
                })
                .collect())
        }

        async fn test_api(&self) -> bool {
            false
        }
    }

    #[derive(Default)]
    struct Db {
        summaries: Vec<Summary>,
        insights: Vec<Insight>,
        links: Vec<Link>,
        stored_single: Vec<Summary>,
        latest_weekly: Option<Summary>,
        recent: Vec<Summary>,
        runs: Vec<(i64, Option<String>)>,
        last_run_updated: bool,
    }

    #[derive(Default)]
    struct FakeStore {
        db: Mutex<Db>,
        fail_store_summaries: bool,
    }

    impl FakeStore {
        fn db(&self) -> std::sync::MutexGuard<'_, Db> {
            self.db.lock().unwrap()
        }

        fn recent_where(&self, keep: impl Fn(&str) -> bool) -> Vec<Summary> {
            self.db()
                .recent
                .iter()
                .filter(|s| keep(&s.date))
                .cloned()
                .collect()
        }
    }

    #[async_trait]
    impl ResultStore for FakeStore {
        async fn initialize(&self) -> Result<()> {
            Ok(())
        }

        async fn test_connection(&self) -> bool {
            true
        }

        async fn store_summaries(&self, summaries: &[Summary]) -> Result<Vec<i64>> {
            if self.fail_store_summaries {
                return Err(ResearchError::Storage("disk full".into()));
            }
            let mut db = self.db();
            db.summaries.extend_from_slice(summaries);
            Ok((1..=summaries.len() as i64).collect())
        }

        async fn store_insights(&self, insights: &[Insight]) -> Result<usize> {
            self.db().insights.extend_from_slice(insights);
            Ok(insights.len())
        }

        async fn store_links(&self, links: &[Link]) -> Result<usize> {
            self.db().links.extend_from_slice(links);
            Ok(links.len())
        }

        async fn store_summary(&self, summary: &Summary) -> Result<i64> {
            self.db().stored_single.push(summary.clone());
            Ok(100)
        }

        async fn update_last_run_timestamp(&self) -> Result<()> {
            self.db().last_run_updated = true;
            Ok(())
        }

        async fn get_latest_weekly_summary(&self) -> Result<Option<Summary>> {
            Ok(self.db().latest_weekly.clone())
        }

        async fn get_summaries_since(&self, since: NaiveDate) -> Result<Vec<Summary>> {
            let since = since.format("%Y-%m-%d").to_string();
            Ok(self.recent_where(|date| date >= since.as_str()))
        }

        async fn get_summaries_after(&self, day: NaiveDate) -> Result<Vec<Summary>> {
            let day = day.format("%Y-%m-%d").to_string();
            Ok(self.recent_where(|date| date > day.as_str()))
        }

        async fn start_processing_run(&self) -> Result<i64> {
            let mut db = self.db();
            let id = db.runs.len() as i64 + 1;
            db.runs.push((id, None));
            Ok(id)
        }

        async fn complete_processing_run(
            &self,
            run_id: i64,
            _stats: &RunStats,
            error: Option<&str>,
        ) -> Result<()> {
            let mut db = self.db();
            if let Some(run) = db.runs.iter_mut().find(|(id, _)| *id == run_id) {
                run.1 = Some(error.unwrap_or("completed").to_string());
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeExporter {
        obsidian_calls: AtomicUsize,
        cleaned: AtomicBool,
    }

    #[async_trait]
    impl Exporter for FakeExporter {
        async fn generate_obsidian_summary(&self, summaries: &[Summary]) -> Option<PathBuf> {
            self.obsidian_calls.fetch_add(1, Ordering::SeqCst);
            (!summaries.is_empty()).then(|| PathBuf::from("/vault/Weekly Summary.md"))
        }

        async fn generate_json_export(&self, summaries: &[Summary]) -> Option<PathBuf> {
            (!summaries.is_empty()).then(|| PathBuf::from("/exports/summaries.json"))
        }

        async fn cleanup_temp_files(&self) {
            self.cleaned.store(true, Ordering::SeqCst);
        }
    }

    struct Harness {
        sources: FakeSources,
        fallback: Option<FakeFallback>,
        summarizer: Arc<FakeSummarizer>,
        insights: FakeInsights,
        store: Arc<FakeStore>,
        exporter: Arc<FakeExporter>,
        options: EngineOptions,
    }

    impl Harness {
        fn new(items: Vec<ContentItem>) -> Self {
            Self {
                sources: FakeSources {
                    items,
                    fail: false,
                },
                fallback: None,
                summarizer: Arc::new(FakeSummarizer::default()),
                insights: FakeInsights::default(),
                store: Arc::new(FakeStore::default()),
                exporter: Arc::new(FakeExporter::default()),
                options: EngineOptions {
                    summary_delay: Duration::ZERO,
                    enable_link_enrichment: true,
                    max_links_to_enrich: 1,
                    weekly_auto_generate: true,
                    weekly_min_days: 3,
                },
            }
        }

        fn build(self) -> ProcessingEngine {
            let fallback: Option<Arc<dyn FallbackProvider>> = match self.fallback {
                Some(f) => Some(Arc::new(f)),
                None => None,
            };
            ProcessingEngine::new(
                Collaborators {
                    sources: Arc::new(self.sources),
                    fallback,
                    summarizer: self.summarizer,
                    insights: Arc::new(self.insights),
                    links: Arc::new(FakeLinks),
                    store: self.store,
                    exporter: self.exporter,
                },
                self.options,
            )
        }
    }

    fn three_items() -> Vec<ContentItem> {
        vec![
            item("1", "First issue https://a.example/one https://a.example/two"),
            item("2", "Second issue"),
            item("3", "Third issue https://c.example/three"),
        ]
    }

    // -----------------------------------------------------------------------
    // Workflow
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn failing_item_keeps_placeholder_in_order() {
        let mut harness = Harness::new(three_items());
        harness.summarizer = Arc::new(FakeSummarizer {
            fail_ids: vec!["2".into()],
            ..Default::default()
        });
        let store = harness.store.clone();
        let engine = harness.build();

        let results = engine.run_full_processing().await.unwrap();
        assert_eq!(results["content_fetched"], 3);
        assert_eq!(results["summaries_generated"], 3);

        let db = store.db();
        assert_eq!(db.summaries.len(), 3);
        assert_eq!(db.summaries[0].title, "Item 1");
        assert_eq!(db.summaries[1].summary, SUMMARY_FAILED_TEXT);
        assert!(!db.summaries[1].error.as_deref().unwrap_or("").is_empty());
        assert_eq!(db.summaries[2].title, "Item 3");
        assert!(db.summaries[2].error.is_none());
        assert!(db.last_run_updated);
        assert_eq!(db.runs, vec![(1, Some("completed".into()))]);

        let state = engine.current_state();
        assert_eq!(state.status, RunStatus::Completed);
        assert_eq!(state.progress, TOTAL_STEPS);
        assert!(state.end_time.is_some());
    }

    #[tokio::test]
    async fn storage_failure_is_fatal_and_propagates() {
        let mut harness = Harness::new(three_items());
        harness.store = Arc::new(FakeStore {
            fail_store_summaries: true,
            ..Default::default()
        });
        let store = harness.store.clone();
        let exporter = harness.exporter.clone();
        let engine = harness.build();

        let err = engine.run_full_processing().await.unwrap_err();
        assert!(matches!(err, ResearchError::Storage(_)));

        let state = engine.current_state();
        assert_eq!(state.status, RunStatus::Error);
        assert!(state.error_message.as_deref().unwrap_or("").contains("disk full"));
        assert_eq!(exporter.obsidian_calls.load(Ordering::SeqCst), 0);

        let db = store.db();
        assert_eq!(db.runs.len(), 1);
        assert!(db.runs[0].1.as_deref().unwrap_or("").contains("disk full"));
    }

    #[tokio::test]
    async fn empty_content_completes_without_summaries() {
        let harness = Harness::new(Vec::new());
        let summarizer = harness.summarizer.clone();
        let engine = harness.build();

        let results = engine.run_full_processing().await.unwrap();
        assert_eq!(results["content_fetched"], 0);
        assert!(!results.contains_key("summaries_generated"));
        assert_eq!(summarizer.calls.load(Ordering::SeqCst), 0);

        let state = engine.current_state();
        assert_eq!(state.status, RunStatus::Completed);
        assert!(state.end_time.is_some());
    }

    #[tokio::test]
    async fn legacy_fallback_runs_when_manager_fails() {
        let mut harness = Harness::new(Vec::new());
        harness.sources.fail = true;
        harness.fallback = Some(FakeFallback {
            items: vec![item("legacy", "From the inbox")],
            fail: false,
        });
        let store = harness.store.clone();
        let engine = harness.build();

        let results = engine.run_full_processing().await.unwrap();
        assert_eq!(results["content_fetched"], 1);
        assert_eq!(store.db().summaries.len(), 1);
    }

    #[tokio::test]
    async fn both_fetch_paths_failing_is_empty_not_error() {
        let mut harness = Harness::new(Vec::new());
        harness.sources.fail = true;
        harness.fallback = Some(FakeFallback {
            items: Vec::new(),
            fail: true,
        });
        let engine = harness.build();

        let results = engine.run_full_processing().await.unwrap();
        assert_eq!(results["content_fetched"], 0);
        assert_eq!(engine.current_state().status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn link_failures_degrade_one_item() {
        let items = vec![
            item("1", "See https://a.example/one and https://a.example/two"),
            item("2", "BROKEN https://b.example/x"),
        ];
        let harness = Harness::new(items);
        let store = harness.store.clone();
        let engine = harness.build();

        let results = engine.run_full_processing().await.unwrap();
        // Enrichment caps the first item at one link; the second degrades to none.
        assert_eq!(results["links_processed"], 1);

        let db = store.db();
        assert_eq!(db.links.len(), 1);
        assert_eq!(db.links[0].description.as_deref(), Some("enriched"));
        assert_eq!(db.links[0].source.as_deref(), Some("Fake Source"));
        assert_eq!(db.links[0].date.as_deref(), Some("2025-10-01"));
    }

    #[tokio::test]
    async fn insight_failures_are_skipped_per_summary() {
        let mut harness = Harness::new(three_items());
        harness.summarizer = Arc::new(FakeSummarizer {
            fail_ids: vec!["2".into()],
            ..Default::default()
        });
        let store = harness.store.clone();
        let engine = harness.build();

        let results = engine.run_full_processing().await.unwrap();
        assert_eq!(results["insights_extracted"], 2);
        let db = store.db();
        assert!(db.insights.iter().all(|i| i.summary_id.is_none()));
        assert_eq!(db.insights[0].topic, "ai, markets");
    }

    #[tokio::test]
    async fn unready_extractor_uses_bullet_fallback() {
        let mut harness = Harness::new(three_items());
        harness.insights = FakeInsights { not_ready: true };
        let store = harness.store.clone();
        let engine = harness.build();

        engine.run_full_processing().await.unwrap();
        let db = store.db();
        assert_eq!(db.insights.len(), 3);
        assert_eq!(db.insights[0].insight, "Item 1 grew 12% this quarter");
    }

    #[tokio::test]
    async fn cancellation_ends_run_in_error() {
        let mut harness = Harness::new(three_items());
        let engine_flag = CancellationFlag::new();
        harness.summarizer = Arc::new(FakeSummarizer {
            cancel_on_first: Some(engine_flag.clone()),
            ..Default::default()
        });
        let summarizer = harness.summarizer.clone();
        let store = harness.store.clone();

        // Share the engine's own flag with the fake.
        let mut engine = harness.build();
        engine.cancel = engine_flag;

        let err = engine.run_full_processing().await.unwrap_err();
        assert!(matches!(err, ResearchError::Cancelled));
        assert_eq!(summarizer.calls.load(Ordering::SeqCst), 1);

        let state = engine.current_state();
        assert_eq!(state.status, RunStatus::Error);
        assert_eq!(state.error_message.as_deref(), Some("processing cancelled"));
        assert!(store.db().summaries.is_empty());
    }

    #[tokio::test]
    async fn cancel_before_run_is_honoured_then_cleared() {
        let harness = Harness::new(three_items());
        let summarizer = harness.summarizer.clone();
        let engine = harness.build();

        engine.cancellation_flag().cancel();
        let err = engine.run_full_processing().await.unwrap_err();
        assert!(matches!(err, ResearchError::Cancelled));
        assert_eq!(summarizer.calls.load(Ordering::SeqCst), 0);
        assert!(!engine.cancellation_flag().is_cancelled());

        engine.run_full_processing().await.unwrap();
        assert_eq!(engine.current_state().status, RunStatus::Completed);
        assert_eq!(summarizer.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn second_run_is_rejected_while_first_is_running() {
        let gate = Arc::new(tokio::sync::Notify::new());
        let mut harness = Harness::new(vec![item("1", "Only item")]);
        harness.summarizer = Arc::new(FakeSummarizer {
            gate: Some(gate.clone()),
            ..Default::default()
        });
        let engine = Arc::new(harness.build());

        let first = tokio::spawn({
            let engine = engine.clone();
            async move { engine.run_full_processing().await }
        });

        for _ in 0..200 {
            if engine.current_state().progress >= 4 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(engine.current_state().status, RunStatus::Running);

        let err = engine.run_full_processing().await.unwrap_err();
        assert!(matches!(err, ResearchError::Validation { .. }));

        gate.notify_one();
        first.await.unwrap().unwrap();
        assert_eq!(engine.current_state().status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn subscribers_see_every_step() {
        let engine = Harness::new(three_items()).build();
        let mut rx = engine.subscribe();

        engine.run_full_processing().await.unwrap();

        let events: Vec<StateEvent> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert_eq!(events.first().map(|e| e.kind), Some(EventKind::Started));
        assert_eq!(events.last().map(|e| e.kind), Some(EventKind::Finished));

        let steps: Vec<u32> = events
            .iter()
            .filter(|e| e.kind == EventKind::Progress)
            .map(|e| e.snapshot.progress)
            .collect();
        for step in 1..=TOTAL_STEPS {
            assert!(steps.contains(&step), "missing progress {step}");
        }
    }

    // -----------------------------------------------------------------------
    // Weekly roll-up
    // -----------------------------------------------------------------------

    fn local_day(days_ago: i64) -> String {
        (Local::now().date_naive() - chrono::Duration::days(days_ago))
            .format("%Y-%m-%d")
            .to_string()
    }

    fn weekly_dated(days_ago: i64) -> Summary {
        Summary {
            title: "Weekly Summary".into(),
            source: WEEKLY_SUMMARY_SOURCE.into(),
            source_type: WEEKLY_SUMMARY_SOURCE_TYPE.into(),
            date: local_day(days_ago),
            ..Default::default()
        }
    }

    fn recent_summary() -> Summary {
        Summary {
            title: "Recent".into(),
            source: "Digest".into(),
            source_type: "email".into(),
            date: local_day(0),
            summary: "* A point with 3 numbers".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn weekly_disabled_never_fires() {
        let mut harness = Harness::new(Vec::new());
        harness.options.weekly_auto_generate = false;
        harness.store.db().recent = vec![recent_summary()];
        let engine = harness.build();
        assert!(!engine.evaluate_weekly_summary().await.due);
    }

    #[tokio::test]
    async fn weekly_bootstrap_needs_recent_summaries() {
        let harness = Harness::new(Vec::new());
        let store = harness.store.clone();
        let engine = harness.build();
        assert!(!engine.evaluate_weekly_summary().await.due);

        store.db().recent = vec![recent_summary()];
        assert!(engine.evaluate_weekly_summary().await.due);
    }

    #[tokio::test]
    async fn weekly_respects_minimum_days() {
        let harness = Harness::new(Vec::new());
        {
            let mut db = harness.store.db();
            db.latest_weekly = Some(weekly_dated(1));
            db.recent = vec![recent_summary(), recent_summary()];
        }
        let engine = harness.build();
        let decision = engine.evaluate_weekly_summary().await;
        assert!(!decision.due);
        assert!(decision.reason.contains("minimum is 3 days"));
    }

    #[tokio::test]
    async fn weekly_fires_after_minimum_with_new_summaries() {
        let harness = Harness::new(Vec::new());
        let store = harness.store.clone();
        store.db().latest_weekly = Some(weekly_dated(5));
        let engine = harness.build();
        assert!(!engine.evaluate_weekly_summary().await.due);

        store.db().recent = vec![recent_summary(), weekly_dated(5)];
        let decision = engine.evaluate_weekly_summary().await;
        assert!(decision.due);
        assert!(decision.reason.contains("Found 1 new summaries"));
    }

    #[tokio::test]
    async fn weekly_counts_whole_local_days() {
        let harness = Harness::new(Vec::new());
        let store = harness.store.clone();
        store.db().recent = vec![recent_summary()];
        let engine = harness.build();

        store.db().latest_weekly = Some(weekly_dated(2));
        let decision = engine.evaluate_weekly_summary().await;
        assert!(!decision.due);
        assert!(decision.reason.contains("was 2 days ago"), "{}", decision.reason);

        store.db().latest_weekly = Some(weekly_dated(3));
        let decision = engine.evaluate_weekly_summary().await;
        assert!(decision.due, "{}", decision.reason);
        assert!(decision.reason.contains("(3 days ago)"));
    }

    #[tokio::test]
    async fn weekly_ignores_summaries_from_the_rollup_day() {
        let harness = Harness::new(Vec::new());
        {
            let mut db = harness.store.db();
            db.latest_weekly = Some(weekly_dated(4));
            db.recent = vec![Summary {
                date: local_day(4),
                ..recent_summary()
            }];
        }
        let engine = harness.build();
        let decision = engine.evaluate_weekly_summary().await;
        assert!(!decision.due);
        assert_eq!(decision.reason, "No new summaries since last weekly summary");
    }

    #[tokio::test]
    async fn run_generates_and_stores_weekly_rollup() {
        let harness = Harness::new(three_items());
        let store = harness.store.clone();
        let exporter = harness.exporter.clone();
        store.db().recent = vec![recent_summary()];
        let engine = harness.build();

        let results = engine.run_full_processing().await.unwrap();
        assert_eq!(results["weekly_summary_generated"], true);
        assert_eq!(results["exports_generated"], 2);

        let db = store.db();
        assert_eq!(db.stored_single.len(), 1);
        let weekly = &db.stored_single[0];
        assert!(weekly.is_weekly());
        assert!(weekly.title.starts_with("Weekly Summary - "));
        assert_eq!(weekly.chunks_processed, 1);
        assert_eq!(weekly.tags, vec!["weekly", "meta-summary"]);
        assert_eq!(exporter.obsidian_calls.load(Ordering::SeqCst), 2);
        assert!(exporter.cleaned.load(Ordering::SeqCst));
    }

    // -----------------------------------------------------------------------
    // Diagnostics
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn configuration_report_collects_checks() {
        let engine = Harness::new(Vec::new()).build();
        let report = engine.test_configuration().await;
        assert_eq!(report.configured_sources, 2);
        assert!(!report.sources_ok);
        assert_eq!(report.source_tests[1].error.as_deref(), Some("auth failed"));
        assert!(report.llm_api);
        assert!(!report.link_enricher);
        assert!(report.database);

        let status = engine.source_manager_status().await;
        assert_eq!(status.available_plugin_types.len(), 3);
    }

    #[test]
    fn summary_dates_parse_in_several_shapes() {
        assert!(parse_summary_date("2025-10-01").is_ok());
        assert!(parse_summary_date("2025-10-01T08:30:00").is_ok());
        assert!(parse_summary_date("2025-10-01T08:30:00+02:00").is_ok());
        assert!(parse_summary_date("last tuesday").is_err());

        let day = NaiveDate::from_ymd_opt(2025, 10, 1).unwrap();
        assert_eq!(parse_summary_date("2025-10-01").unwrap(), day);
        assert_eq!(parse_summary_date("2025-10-01T23:59:00").unwrap(), day);
        let stamped = Local::now().to_rfc3339();
        assert_eq!(
            parse_summary_date(&stamped).unwrap(),
            Local::now().date_naive()
        );
    }
}
