//! RSS / podcast source.
//!
//! Feeds are downloaded with `reqwest` and parsed with `feed-rs`. Only the
//! newest `episodes_to_fetch` entries that were published inside the
//! look-back window are turned into content items.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use feed_rs::model::{Entry, Feed};
use reqwest::Client;
use research_processing::{clean_email_content, html_to_text, looks_like_html};
use research_shared::{ContentItem, ResearchError, Result, TestResult, ValidationResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{debug, info, instrument, warn};

use crate::plugin::{
    SourcePlugin, as_integer, is_http_url, is_truthy, non_empty_str, number_or_string,
};

const PLUGIN_TYPE: &str = "rss";

/// User agent for feed and transcript downloads.
const USER_AGENT: &str = concat!("ResearchPipeline/", env!("CARGO_PKG_VERSION"));

/// Only entries newer than this are considered new.
const DEFAULT_LOOKBACK_DAYS: i64 = 7;

/// Feeds file read by `use_rss_feeds_config` sources and the legacy fallback.
pub const DEFAULT_FEEDS_FILE: &str = "rss_feeds.json";

const FEED_TIMEOUT: Duration = Duration::from_secs(30);
const TRANSCRIPT_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Feed config
// ---------------------------------------------------------------------------

/// One feed, as stored in `rss_feeds.json` or inside an RSS source config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedConfig {
    #[serde(default)]
    pub name: String,
    pub rss_url: String,
    #[serde(
        default = "default_episodes",
        deserialize_with = "number_or_string"
    )]
    pub episodes_to_fetch: usize,
}

fn default_episodes() -> usize {
    1
}

impl FeedConfig {
    fn display_name<'a>(&'a self, feed_id: &'a str) -> &'a str {
        if self.name.is_empty() {
            feed_id
        } else {
            &self.name
        }
    }
}

/// Read `feed_id -> FeedConfig` pairs from a JSON file. A missing file is empty.
pub fn load_feeds_file(path: &Path) -> Result<Vec<(String, FeedConfig)>> {
    if !path.exists() {
        debug!(path = %path.display(), "no RSS feeds file");
        return Ok(Vec::new());
    }

    let raw = std::fs::read_to_string(path).map_err(|e| ResearchError::io(path, e))?;
    let feeds: Map<String, Value> = serde_json::from_str(&raw)
        .map_err(|e| ResearchError::parse(format!("{}: {e}", path.display())))?;

    let mut parsed = Vec::with_capacity(feeds.len());
    for (feed_id, value) in feeds {
        match serde_json::from_value::<FeedConfig>(value) {
            Ok(feed) => parsed.push((feed_id, feed)),
            Err(e) => warn!(feed_id = %feed_id, error = %e, "skipping malformed feed entry"),
        }
    }
    Ok(parsed)
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Summary of a feed probe.
#[derive(Debug, Clone, Serialize)]
pub struct FeedProbe {
    pub title: String,
    pub description: String,
    pub episodes_count: usize,
    pub latest_episode: Option<String>,
}

/// Downloads feeds and turns new entries into content items.
#[derive(Debug, Clone)]
pub struct RssClient {
    http: Client,
    feeds: Vec<(String, FeedConfig)>,
    lookback: chrono::Duration,
}

impl RssClient {
    pub fn new(feeds: Vec<(String, FeedConfig)>) -> Result<Self> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(FEED_TIMEOUT)
            .build()
            .map_err(|e| ResearchError::Network(format!("HTTP client build: {e}")))?;

        Ok(Self {
            http,
            feeds,
            lookback: chrono::Duration::days(DEFAULT_LOOKBACK_DAYS),
        })
    }

    /// Client over the feeds listed in an `rss_feeds.json` file.
    pub fn from_feeds_file(path: &Path) -> Result<Self> {
        Self::new(load_feeds_file(path)?)
    }

    pub fn with_lookback(mut self, lookback: chrono::Duration) -> Self {
        self.lookback = lookback;
        self
    }

    pub fn feeds(&self) -> &[(String, FeedConfig)] {
        &self.feeds
    }

    /// New episodes from every feed. A failing feed is logged and skipped.
    #[instrument(skip_all, fields(feeds = self.feeds.len()))]
    pub async fn fetch_new_episodes(&self) -> Vec<ContentItem> {
        let cutoff = Utc::now() - self.lookback;
        let mut episodes = Vec::new();

        for (feed_id, feed) in &self.feeds {
            match self.process_feed(feed_id, feed, cutoff).await {
                Ok(items) => {
                    info!(feed = %feed.display_name(feed_id), count = items.len(), "processed feed");
                    episodes.extend(items);
                }
                Err(e) => warn!(feed_id = %feed_id, error = %e, "feed failed, skipping"),
            }
        }

        info!(total = episodes.len(), "RSS episodes fetched");
        episodes
    }

    /// Download and parse a feed, reporting its title and entry count.
    pub async fn test_feed(&self, url: &str) -> Result<FeedProbe> {
        let feed = self.download(url).await?;
        let latest_episode = feed
            .entries
            .first()
            .map(|e| entry_title(e).unwrap_or_else(|| "Unknown".into()));

        Ok(FeedProbe {
            title: feed
                .title
                .map(|t| t.content)
                .unwrap_or_else(|| "Unknown".into()),
            description: feed.description.map(|d| d.content).unwrap_or_default(),
            episodes_count: feed.entries.len(),
            latest_episode,
        })
    }

    async fn download(&self, url: &str) -> Result<Feed> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| ResearchError::Network(format!("GET {url}: {e}")))?
            .error_for_status()
            .map_err(|e| ResearchError::Network(format!("GET {url}: {e}")))?;

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ResearchError::Network(format!("reading {url}: {e}")))?;

        feed_rs::parser::parse(bytes.as_ref())
            .map_err(|e| ResearchError::parse(format!("feed {url}: {e}")))
    }

    async fn process_feed(
        &self,
        feed_id: &str,
        feed: &FeedConfig,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<ContentItem>> {
        let parsed = self.download(&feed.rss_url).await?;
        let name = feed.display_name(feed_id);

        let recent = parsed
            .entries
            .into_iter()
            .take(feed.episodes_to_fetch)
            .filter(|e| e.published.is_some_and(|p| p > cutoff))
            .collect::<Vec<_>>();

        if recent.is_empty() {
            info!(feed = %name, "no new episodes since last run");
            return Ok(Vec::new());
        }

        let mut items = Vec::with_capacity(recent.len());
        for (index, entry) in recent.iter().enumerate() {
            let content = self.episode_content(entry).await;
            if content.is_empty() {
                warn!(feed = %name, episode = ?entry_title(entry), "episode has no content");
                continue;
            }
            items.push(episode_item(feed, name, index, entry, content));
        }
        Ok(items)
    }

    /// Entry text, replaced by a linked transcript when one is available.
    async fn episode_content(&self, entry: &Entry) -> String {
        let mut content = entry
            .content
            .as_ref()
            .and_then(|c| c.body.clone())
            .filter(|b| !b.trim().is_empty())
            .or_else(|| entry.summary.as_ref().map(|s| s.content.clone()))
            .unwrap_or_default();

        if let Some(transcript) = self.fetch_transcript(entry).await {
            content = transcript;
        }

        if looks_like_html(&content) {
            content = html_to_text(&content);
        }
        clean_email_content(&content)
    }

    async fn fetch_transcript(&self, entry: &Entry) -> Option<String> {
        let link = entry.links.iter().find(|l| {
            l.href.to_lowercase().contains("transcript")
                || l.media_type
                    .as_deref()
                    .is_some_and(|t| t.to_lowercase().contains("transcript"))
        })?;

        debug!(url = %link.href, "fetching transcript");
        let result = async {
            self.http
                .get(&link.href)
                .timeout(TRANSCRIPT_TIMEOUT)
                .send()
                .await?
                .error_for_status()?
                .text()
                .await
        }
        .await;

        match result {
            Ok(text) => {
                info!(chars = text.len(), "fetched transcript");
                Some(text)
            }
            Err(e) => {
                warn!(url = %link.href, error = %e, "transcript fetch failed");
                None
            }
        }
    }
}

fn entry_title(entry: &Entry) -> Option<String> {
    entry.title.as_ref().map(|t| t.content.clone())
}

fn episode_item(
    feed: &FeedConfig,
    name: &str,
    index: usize,
    entry: &Entry,
    content: String,
) -> ContentItem {
    let date = entry
        .published
        .unwrap_or_else(Utc::now)
        .format("%Y-%m-%d")
        .to_string();
    let episode_url = entry
        .links
        .first()
        .map(|l| l.href.clone())
        .unwrap_or_default();
    let author = entry
        .authors
        .first()
        .map(|p| p.name.clone())
        .unwrap_or_default();

    let mut metadata = Map::new();
    metadata.insert("rss_url".into(), json!(feed.rss_url));
    metadata.insert("episode_url".into(), json!(episode_url));
    metadata.insert("author".into(), json!(author));

    ContentItem {
        id: format!(
            "{}_episode_{}",
            name.to_lowercase().replace(' ', "_"),
            index + 1
        ),
        title: entry_title(entry).unwrap_or_else(|| "Unknown Episode".into()),
        content,
        url: episode_url,
        date,
        source: format!("{name} Podcast"),
        source_type: "podcast".into(),
        metadata,
        ..Default::default()
    }
}

// ---------------------------------------------------------------------------
// Plugin
// ---------------------------------------------------------------------------

/// How an RSS source names its feeds.
#[derive(Debug, Clone, PartialEq)]
enum RssMode {
    /// All feeds of the shared `rss_feeds.json` file.
    FeedsFile,
    Single(FeedConfig),
    Multiple(Vec<(String, FeedConfig)>),
    Unconfigured,
}

/// Source plugin over [`RssClient`].
pub struct RssPlugin {
    source_id: String,
    config: Map<String, Value>,
    feeds_dir: Option<PathBuf>,
}

impl RssPlugin {
    pub fn new(source_id: &str, config: &Map<String, Value>) -> Result<Self> {
        Ok(Self {
            source_id: source_id.to_string(),
            config: config.clone(),
            feeds_dir: None,
        })
    }

    /// Directory holding the feeds file of `use_rss_feeds_config` sources.
    pub fn with_feeds_dir(mut self, dir: PathBuf) -> Self {
        self.feeds_dir = Some(dir);
        self
    }

    fn display_name(&self) -> String {
        non_empty_str(&self.config, "name")
            .unwrap_or(&self.source_id)
            .to_string()
    }

    fn mode(&self) -> Result<RssMode> {
        let invalid = |e: serde_json::Error| {
            ResearchError::plugin(&self.source_id, PLUGIN_TYPE, format!("invalid config: {e}"))
        };

        if is_truthy(self.config.get("use_rss_feeds_config")) {
            return Ok(RssMode::FeedsFile);
        }
        if self.config.contains_key("rss_url") {
            let mut feed: FeedConfig =
                serde_json::from_value(Value::Object(self.config.clone())).map_err(invalid)?;
            if feed.name.is_empty() {
                feed.name = self.display_name();
            }
            return Ok(RssMode::Single(feed));
        }
        if let Some(Value::Object(feeds)) = self.config.get("feeds") {
            let mut parsed = Vec::with_capacity(feeds.len());
            for (feed_id, value) in feeds {
                let feed: FeedConfig = serde_json::from_value(value.clone()).map_err(invalid)?;
                parsed.push((feed_id.clone(), feed));
            }
            return Ok(RssMode::Multiple(parsed));
        }
        Ok(RssMode::Unconfigured)
    }

    fn feeds_file_path(&self) -> Result<PathBuf> {
        let dir = self.feeds_dir.as_deref().ok_or_else(|| {
            ResearchError::plugin(&self.source_id, PLUGIN_TYPE, "no feeds file directory")
        })?;
        let file = non_empty_str(&self.config, "config_file").unwrap_or(DEFAULT_FEEDS_FILE);
        Ok(dir.join(file))
    }

    fn client(&self) -> Result<RssClient> {
        let feeds = match self.mode()? {
            RssMode::FeedsFile => load_feeds_file(&self.feeds_file_path()?)?,
            RssMode::Single(feed) => vec![(self.source_id.clone(), feed)],
            RssMode::Multiple(feeds) => feeds,
            RssMode::Unconfigured => Vec::new(),
        };
        RssClient::new(feeds)
    }

    async fn run_test(&self) -> Result<TestResult> {
        let client = self.client()?;
        let result = match self.mode()? {
            RssMode::FeedsFile => {
                let Some((_, sample)) = client.feeds().first() else {
                    return Ok(TestResult::failed("No RSS feeds configured")
                        .with_details(json!({ "source_id": self.source_id })));
                };
                let probe = client.test_feed(&sample.rss_url).await;
                TestResult {
                    success: probe.is_ok(),
                    message: Some(format!("RSS feeds test for {}", self.source_id)),
                    error: probe.as_ref().err().map(ToString::to_string),
                    details: Some(json!({
                        "feeds_count": client.feeds().len(),
                        "sample_feed": sample.name,
                        "source_id": self.source_id,
                    })),
                }
            }
            RssMode::Single(feed) => match client.test_feed(&feed.rss_url).await {
                Ok(probe) => TestResult::ok(
                    format!("RSS feed test for {}", self.source_id),
                    json!({
                        "feed_url": feed.rss_url,
                        "feed_title": probe.title,
                        "episodes_count": probe.episodes_count,
                        "latest_episode": probe.latest_episode,
                        "source_id": self.source_id,
                    }),
                ),
                Err(e) => TestResult::failed(e.to_string()).with_details(json!({
                    "feed_url": feed.rss_url,
                    "source_id": self.source_id,
                })),
            },
            RssMode::Multiple(feeds) => {
                let mut results = Map::new();
                let mut all_ok = true;
                for (feed_id, feed) in &feeds {
                    let entry = match client.test_feed(&feed.rss_url).await {
                        Ok(probe) => json!({ "success": true, "feed_title": probe.title,
                                             "episodes_count": probe.episodes_count }),
                        Err(e) => {
                            all_ok = false;
                            json!({ "success": false, "error": e.to_string() })
                        }
                    };
                    results.insert(feed_id.clone(), entry);
                }
                TestResult {
                    success: all_ok,
                    message: Some(format!("Multiple RSS feeds test for {}", self.source_id)),
                    error: (!all_ok).then(|| "one or more feeds failed".to_string()),
                    details: Some(json!({
                        "feeds_tested": results.len(),
                        "test_results": results,
                        "source_id": self.source_id,
                    })),
                }
            }
            RssMode::Unconfigured => TestResult::failed("No RSS configuration found")
                .with_details(json!({ "source_id": self.source_id })),
        };
        Ok(result)
    }
}

#[async_trait]
impl SourcePlugin for RssPlugin {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn plugin_type(&self) -> &str {
        PLUGIN_TYPE
    }

    fn config(&self) -> &Map<String, Value> {
        &self.config
    }

    #[instrument(skip_all, fields(source_id = %self.source_id))]
    async fn fetch_content(&self) -> Result<Vec<ContentItem>> {
        let client = self.client()?;
        let episodes_to_fetch = self
            .config
            .get("episodes_to_fetch")
            .and_then(as_integer)
            .unwrap_or(1);

        let mut items = client.fetch_new_episodes().await;
        for item in &mut items {
            if item.source.is_empty() {
                item.source = self.display_name();
            }
            item.metadata
                .insert("plugin_source_id".into(), json!(self.source_id));
            item.metadata.entry("feed_info").or_insert_with(|| {
                json!({ "episodes_to_fetch": episodes_to_fetch, "config_type": "plugin" })
            });
        }

        info!(source_id = %self.source_id, count = items.len(), "fetched RSS content");
        Ok(items)
    }

    async fn test_connection(&self) -> TestResult {
        match self.run_test().await {
            Ok(result) => result,
            Err(e) => {
                warn!(source_id = %self.source_id, error = %e, "RSS connection test failed");
                TestResult::failed(format!(
                    "RSS connection test failed for {}: {e}",
                    self.source_id
                ))
                .with_details(json!({ "source_id": self.source_id }))
            }
        }
    }

    fn validate_config(&self, config: &Map<String, Value>) -> ValidationResult {
        validate_rss_config(config)
    }

    fn source_info(&self) -> Map<String, Value> {
        let mut info = Map::new();
        info.insert("source_id".into(), json!(self.source_id));
        info.insert("plugin_type".into(), json!(PLUGIN_TYPE));
        info.insert(
            "config_keys".into(),
            json!(self.config.keys().collect::<Vec<_>>()),
        );
        match self.mode() {
            Ok(RssMode::FeedsFile) => {
                let count = self
                    .feeds_file_path()
                    .and_then(|path| load_feeds_file(&path))
                    .map(|f| f.len())
                    .unwrap_or(0);
                info.insert("configuration_type".into(), json!("legacy_rss_feeds_json"));
                info.insert("feeds_count".into(), json!(count));
            }
            Ok(RssMode::Single(feed)) => {
                info.insert("configuration_type".into(), json!("single_feed"));
                info.insert("feed_url".into(), json!(feed.rss_url));
                info.insert("episodes_to_fetch".into(), json!(feed.episodes_to_fetch));
            }
            Ok(RssMode::Multiple(feeds)) => {
                info.insert("configuration_type".into(), json!("multiple_feeds"));
                info.insert("feeds_count".into(), json!(feeds.len()));
                info.insert(
                    "feed_names".into(),
                    json!(feeds.iter().map(|(id, _)| id).collect::<Vec<_>>()),
                );
            }
            Ok(RssMode::Unconfigured) | Err(_) => {}
        }
        info
    }

    fn config_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "rss_url": {
                    "type": "string",
                    "title": "RSS Feed URL",
                    "format": "uri",
                    "examples": ["https://example.com/feed.xml"],
                },
                "episodes_to_fetch": {
                    "type": "integer",
                    "title": "Episodes to Fetch",
                    "default": 1,
                    "minimum": 1,
                    "maximum": 10,
                },
            },
            "required": ["rss_url"],
        })
    }
}

pub(crate) fn validate_rss_config(config: &Map<String, Value>) -> ValidationResult {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if is_truthy(config.get("use_rss_feeds_config")) {
        if !config.contains_key("config_file") {
            warnings.push("Using RSS feeds config but no config file specified".into());
        }
    } else if let Some(url) = config.get("rss_url") {
        match url.as_str() {
            None | Some("") => errors.push("RSS URL cannot be empty".into()),
            Some(url) if !is_http_url(url) => {
                errors.push("RSS URL must start with http:// or https://".into())
            }
            Some(_) => {}
        }

        match config.get("episodes_to_fetch").map(as_integer) {
            None => {}
            Some(Some(n)) if n > 10 => {
                warnings.push("episodes_to_fetch > 10 may slow down processing".into())
            }
            Some(Some(n)) if n >= 1 => {}
            Some(_) => errors.push("episodes_to_fetch must be a positive integer".into()),
        }
    } else if let Some(feeds) = config.get("feeds") {
        match feeds.as_object() {
            None => errors.push("feeds must be a dictionary".into()),
            Some(feeds) if feeds.is_empty() => {
                errors.push("feeds dictionary cannot be empty".into())
            }
            Some(feeds) => {
                for (feed_id, feed) in feeds {
                    let Some(feed) = feed.as_object() else {
                        errors.push(format!("Feed {feed_id} configuration must be a dictionary"));
                        continue;
                    };
                    match feed.get("rss_url").and_then(Value::as_str) {
                        None => errors.push(format!("Feed {feed_id} missing rss_url")),
                        Some(url) if !is_http_url(url) => errors.push(format!(
                            "Feed {feed_id} RSS URL must start with http:// or https://"
                        )),
                        Some(_) => {}
                    }
                    if !feed.contains_key("name") {
                        warnings.push(format!("Feed {feed_id} missing name, will use feed_id"));
                    }
                }
            }
        }
    } else {
        errors.push("Must specify either 'use_rss_feeds_config', 'rss_url', or 'feeds'".into());
    }

    ValidationResult::from_parts(errors, warnings)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
