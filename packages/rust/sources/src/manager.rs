//! The source manager: plugin registry, persisted source configs, and
//! fan-out fetch/test dispatch.
//!
//! `sources.json` is the source of truth. It is re-read before every fetch
//! cycle and rewritten on every mutation while the config mutex is held.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use research_shared::{
    AppConfig, ContentItem, PluginType, ResearchError, Result, SourceConfig, TestResult,
    ValidationResult,
};
use serde::Serialize;
use serde_json::{Map, Value, json};
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use crate::email::EmailPlugin;
use crate::plugin::{PluginFactory, SourcePlugin, plugin_factory};
use crate::resolve::resolve_config;
use crate::rss::{RssPlugin, load_feeds_file};
use crate::web::WebPlugin;

/// Id of the aggregate RSS source written by older versions.
pub const LEGACY_RSS_SOURCE_ID: &str = "default_rss";

/// Id of the email source created on first start.
pub const DEFAULT_EMAIL_SOURCE_ID: &str = "default_email";

// ---------------------------------------------------------------------------
// Public shapes
// ---------------------------------------------------------------------------

/// Partial update for [`SourceManager::update_source`].
#[derive(Debug, Clone, Default)]
pub struct SourceUpdate {
    pub name: Option<String>,
    pub enabled: Option<bool>,
    pub config: Option<Map<String, Value>>,
}

/// Listing entry for one configured source.
#[derive(Debug, Clone, Serialize)]
pub struct SourceInfo {
    pub source_id: String,
    #[serde(rename = "type")]
    pub plugin_type: String,
    pub name: String,
    pub enabled: bool,
    pub config_keys: Vec<String>,
    pub plugin_available: bool,
    /// Plugin-specific details, empty when the plugin type is unknown.
    pub details: Map<String, Value>,
}

/// Aggregate counts for status displays.
#[derive(Debug, Clone, Serialize)]
pub struct ManagerStatus {
    pub total_sources: usize,
    pub enabled_sources: usize,
    pub sources_by_type: BTreeMap<String, usize>,
    pub available_plugin_types: Vec<String>,
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

/// Registry of plugin types plus the durable set of configured sources.
pub struct SourceManager {
    settings: Arc<AppConfig>,
    sources_path: PathBuf,
    rss_feeds_path: PathBuf,
    registry: RwLock<BTreeMap<String, PluginFactory>>,
    sources: Mutex<Vec<SourceConfig>>,
}

impl SourceManager {
    /// Load `sources.json` (writing defaults on first start), register the
    /// built-in plugins and migrate a legacy RSS meta-source if present.
    pub async fn load(settings: Arc<AppConfig>) -> Result<Self> {
        let sources_path = settings.paths.sources_file();
        let rss_feeds_path = settings.paths.rss_feeds_file();
        let registry = builtin_plugins(&settings);

        let manager = Self {
            settings,
            sources_path,
            rss_feeds_path,
            registry: RwLock::new(registry),
            sources: Mutex::new(Vec::new()),
        };

        match read_sources_file(&manager.sources_path).await? {
            Some(sources) => {
                info!(count = sources.len(), "loaded source configurations");
                *manager.sources.lock().await = sources;
            }
            None => {
                let defaults = default_sources();
                write_sources_file(&manager.sources_path, &defaults).await?;
                *manager.sources.lock().await = defaults;
                info!(path = %manager.sources_path.display(), "created default source configuration");
            }
        }

        manager.migrate_rss_meta_source().await?;
        Ok(manager)
    }

    pub fn sources_path(&self) -> &Path {
        &self.sources_path
    }

    // -- registry ----------------------------------------------------------

    /// Register (or replace) a plugin type. Empty identifiers are rejected.
    pub fn register_plugin(&self, plugin_type: &str, factory: PluginFactory) -> bool {
        let plugin_type = plugin_type.trim();
        if plugin_type.is_empty() {
            warn!("refusing to register a plugin with an empty type");
            return false;
        }
        self.registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(plugin_type.to_string(), factory);
        info!(plugin_type, "registered plugin type");
        true
    }

    pub fn available_plugin_types(&self) -> Vec<String> {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    fn factory(&self, plugin_type: &str) -> Option<PluginFactory> {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(plugin_type)
            .cloned()
    }

    /// Build a fresh plugin for `source` over its resolved config.
    fn instantiate(&self, source: &SourceConfig) -> Result<Box<dyn SourcePlugin>> {
        let factory = self.factory(&source.plugin_type).ok_or_else(|| {
            ResearchError::plugin(
                &source.source_id,
                &source.plugin_type,
                format!("Unknown plugin type: {}", source.plugin_type),
            )
        })?;
        let config = resolve_config(&source.config, &self.settings);
        factory(&source.source_id, &config)
    }

    /// Validate a config with a throwaway plugin of `plugin_type`.
    pub fn validate_source_config(
        &self,
        plugin_type: &str,
        config: &Map<String, Value>,
    ) -> ValidationResult {
        let candidate = SourceConfig {
            source_id: "validation".into(),
            plugin_type: plugin_type.into(),
            name: String::new(),
            enabled: true,
            config: config.clone(),
        };
        self.validate_candidate(&candidate)
    }

    fn validate_candidate(&self, candidate: &SourceConfig) -> ValidationResult {
        if self.factory(&candidate.plugin_type).is_none() {
            return ValidationResult::from_parts(
                vec![format!("Unknown plugin type: {}", candidate.plugin_type)],
                Vec::new(),
            );
        }
        match self.instantiate(candidate) {
            Ok(plugin) => {
                let resolved = resolve_config(&candidate.config, &self.settings);
                plugin.validate_config(&resolved)
            }
            Err(e) => ValidationResult::from_parts(vec![e.to_string()], Vec::new()),
        }
    }

    // -- configured sources ------------------------------------------------

    /// Every configured source with `${VAR}` placeholders resolved now.
    pub async fn get_configured_sources(&self) -> Vec<SourceConfig> {
        let sources = self.sources.lock().await;
        sources
            .iter()
            .map(|source| SourceConfig {
                config: resolve_config(&source.config, &self.settings),
                ..source.clone()
            })
            .collect()
    }

    /// The stored (unresolved) config of one source.
    pub async fn get_source(&self, source_id: &str) -> Option<SourceConfig> {
        let sources = self.sources.lock().await;
        sources.iter().find(|s| s.source_id == source_id).cloned()
    }

    /// Validate and persist a new source. Returns `Ok(false)` when the type
    /// is unknown or the config fails validation; nothing changes then.
    pub async fn add_source(
        &self,
        source_id: &str,
        plugin_type: &str,
        config: Map<String, Value>,
        name: Option<&str>,
        enabled: bool,
    ) -> Result<bool> {
        let candidate = SourceConfig {
            source_id: source_id.to_string(),
            plugin_type: plugin_type.to_string(),
            name: name
                .filter(|n| !n.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| default_source_name(plugin_type)),
            enabled,
            config,
        };

        let validation = self.validate_candidate(&candidate);
        if !validation.valid {
            warn!(source_id, errors = ?validation.errors, "rejected source configuration");
            return Ok(false);
        }

        let mut sources = self.sources.lock().await;
        match sources.iter_mut().find(|s| s.source_id == source_id) {
            Some(existing) => *existing = candidate,
            None => sources.push(candidate),
        }
        write_sources_file(&self.sources_path, &sources).await?;
        info!(source_id, plugin_type, "added source");
        Ok(true)
    }

    /// Remove a source. `Ok(false)` when it does not exist.
    pub async fn remove_source(&self, source_id: &str) -> Result<bool> {
        let mut sources = self.sources.lock().await;
        let before = sources.len();
        sources.retain(|s| s.source_id != source_id);
        if sources.len() == before {
            warn!(source_id, "source not found");
            return Ok(false);
        }
        write_sources_file(&self.sources_path, &sources).await?;
        info!(source_id, "removed source");
        Ok(true)
    }

    /// Apply a partial update. A new config is validated first.
    pub async fn update_source(&self, source_id: &str, update: SourceUpdate) -> Result<bool> {
        let Some(mut updated) = self.get_source(source_id).await else {
            warn!(source_id, "source not found");
            return Ok(false);
        };

        if let Some(name) = update.name {
            updated.name = name;
        }
        if let Some(enabled) = update.enabled {
            updated.enabled = enabled;
        }
        if let Some(config) = update.config {
            updated.config = config;
            let validation = self.validate_candidate(&updated);
            if !validation.valid {
                warn!(source_id, errors = ?validation.errors, "rejected source update");
                return Ok(false);
            }
        }

        let mut sources = self.sources.lock().await;
        let Some(slot) = sources.iter_mut().find(|s| s.source_id == source_id) else {
            return Ok(false);
        };
        *slot = updated;
        write_sources_file(&self.sources_path, &sources).await?;
        info!(source_id, "updated source");
        Ok(true)
    }

    pub async fn set_enabled(&self, source_id: &str, enabled: bool) -> Result<bool> {
        self.update_source(
            source_id,
            SourceUpdate {
                enabled: Some(enabled),
                ..Default::default()
            },
        )
        .await
    }

    /// Re-read `sources.json`. A missing file is recreated from memory.
    pub async fn reload(&self) -> Result<()> {
        let mut sources = self.sources.lock().await;
        match read_sources_file(&self.sources_path).await? {
            Some(loaded) => *sources = loaded,
            None => write_sources_file(&self.sources_path, &sources).await?,
        }
        Ok(())
    }

    // -- dispatch ----------------------------------------------------------

    /// Fetch from every enabled source in configuration order.
    ///
    /// A failing source is logged and skipped. Each item is stamped with
    /// its `source_id` and `source_type`, and gets the source name when it
    /// carries no display name of its own.
    #[instrument(skip_all)]
    pub async fn fetch_from_all_sources(&self) -> Result<Vec<ContentItem>> {
        self.reload().await?;
        let sources = self.sources.lock().await.clone();
        info!(count = sources.len(), "fetching from configured sources");

        let mut all_content = Vec::new();
        for source in &sources {
            if !source.enabled {
                info!(source_id = %source.source_id, "skipping disabled source");
                continue;
            }

            let fetched = match self.instantiate(source) {
                Ok(plugin) => plugin.fetch_content().await,
                Err(e) => Err(e),
            };
            let mut items = match fetched {
                Ok(items) => items,
                Err(e) => {
                    error!(source_id = %source.source_id, error = %e, "source fetch failed, skipping");
                    continue;
                }
            };

            for item in &mut items {
                item.source_id = Some(source.source_id.clone());
                item.source_type = source.plugin_type.clone();
                if item.source.is_empty() {
                    item.source = display_name(source);
                }
            }
            info!(source_id = %source.source_id, count = items.len(), "fetched source");
            all_content.extend(items);
        }

        info!(total = all_content.len(), "content items fetched");
        Ok(all_content)
    }

    /// Test one source with a freshly built plugin. Never fails.
    pub async fn test_source(&self, source_id: &str) -> TestResult {
        let Some(source) = self.get_source(source_id).await else {
            return TestResult::failed(format!("Source {source_id} not found"));
        };
        if self.factory(&source.plugin_type).is_none() {
            return TestResult::failed(format!(
                "Plugin type {} not registered",
                source.plugin_type
            ));
        }

        match self.instantiate(&source) {
            Ok(plugin) => {
                let result = plugin.test_connection().await;
                info!(source_id, success = result.success, "source test finished");
                result
            }
            Err(e) => {
                error!(source_id, error = %e, "could not build plugin for test");
                TestResult::failed(e.to_string())
            }
        }
    }

    /// Test every configured source, in configuration order.
    pub async fn test_all_sources(&self) -> Vec<(String, TestResult)> {
        let ids: Vec<String> = self
            .sources
            .lock()
            .await
            .iter()
            .map(|s| s.source_id.clone())
            .collect();

        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            let result = self.test_source(&id).await;
            results.push((id, result));
        }
        results
    }

    pub async fn get_source_info(&self, source_id: &str) -> Option<SourceInfo> {
        let source = self.get_source(source_id).await?;
        let plugin_available = self.factory(&source.plugin_type).is_some();
        let details = match self.instantiate(&source) {
            Ok(plugin) => plugin.source_info(),
            Err(e) => {
                debug!(source_id, error = %e, "no plugin details");
                Map::new()
            }
        };

        Some(SourceInfo {
            source_id: source.source_id.clone(),
            plugin_type: source.plugin_type.clone(),
            name: display_name(&source),
            enabled: source.enabled,
            config_keys: source.config.keys().cloned().collect(),
            plugin_available,
            details,
        })
    }

    pub async fn status(&self) -> ManagerStatus {
        let sources = self.sources.lock().await;
        let mut sources_by_type = BTreeMap::new();
        for source in sources.iter() {
            *sources_by_type
                .entry(source.plugin_type.clone())
                .or_insert(0) += 1;
        }

        ManagerStatus {
            total_sources: sources.len(),
            enabled_sources: sources.iter().filter(|s| s.enabled).count(),
            sources_by_type,
            available_plugin_types: self.available_plugin_types(),
        }
    }

    // -- migration ---------------------------------------------------------

    /// Split the legacy `default_rss` meta-source into one source per feed
    /// of `rss_feeds.json`, then drop it. A no-op once it is gone.
    async fn migrate_rss_meta_source(&self) -> Result<usize> {
        let mut sources = self.sources.lock().await;
        if !sources.iter().any(|s| s.source_id == LEGACY_RSS_SOURCE_ID) {
            return Ok(0);
        }
        info!("migrating RSS meta-source to individual RSS sources");

        let feeds = match load_feeds_file(&self.rss_feeds_path) {
            Ok(feeds) => feeds,
            Err(e) => {
                warn!(error = %e, "could not load RSS feeds for migration");
                Vec::new()
            }
        };

        let mut migrated = 0;
        for (feed_id, feed) in feeds {
            let source_id = format!("rss_{feed_id}");
            if sources.iter().any(|s| s.source_id == source_id) {
                debug!(source_id = %source_id, "RSS source already exists, skipping");
                continue;
            }

            let mut config = Map::new();
            config.insert("rss_url".into(), json!(feed.rss_url));
            config.insert("episodes_to_fetch".into(), json!(feed.episodes_to_fetch));
            let candidate = SourceConfig {
                name: if feed.name.is_empty() {
                    format!("RSS Feed {feed_id}")
                } else {
                    feed.name.clone()
                },
                source_id,
                plugin_type: PluginType::Rss.to_string(),
                enabled: true,
                config,
            };

            let validation = self.validate_candidate(&candidate);
            if validation.valid {
                info!(source_id = %candidate.source_id, "migrated RSS feed");
                sources.push(candidate);
                migrated += 1;
            } else {
                warn!(feed_id = %feed_id, errors = ?validation.errors, "skipping invalid RSS feed");
            }
        }

        sources.retain(|s| s.source_id != LEGACY_RSS_SOURCE_ID);
        write_sources_file(&self.sources_path, &sources).await?;
        info!(migrated, "RSS meta-source migration completed");
        Ok(migrated)
    }
}

// ---------------------------------------------------------------------------
// Defaults and persistence
// ---------------------------------------------------------------------------

fn builtin_plugins(settings: &AppConfig) -> BTreeMap<String, PluginFactory> {
    let feeds_dir = settings.paths.config_dir();

    let mut registry = BTreeMap::new();
    registry.insert(
        PluginType::Email.to_string(),
        plugin_factory(EmailPlugin::new),
    );
    registry.insert(
        PluginType::Rss.to_string(),
        plugin_factory(move |source_id: &str, config: &Map<String, Value>| {
            RssPlugin::new(source_id, config).map(|p| p.with_feeds_dir(feeds_dir.clone()))
        }),
    );
    registry.insert(PluginType::Web.to_string(), plugin_factory(WebPlugin::new));
    registry
}

/// First-start configuration: the settings-backed mailbox plus the legacy
/// RSS meta-source, which is migrated right away.
fn default_sources() -> Vec<SourceConfig> {
    let email_config = json!({
        "server": "${EMAIL_SERVER}",
        "username": "${EMAIL_USERNAME}",
        "password": "${EMAIL_PASSWORD}",
        "folder": "${EMAIL_FOLDER}",
        "smtp_server": "${SMTP_SERVER}",
        "smtp_port": "${SMTP_PORT}",
        "notification_email": "${NOTIFICATION_EMAIL}",
    });
    let rss_config = json!({
        "use_rss_feeds_config": true,
        "config_file": crate::rss::DEFAULT_FEEDS_FILE,
    });

    vec![
        SourceConfig {
            source_id: DEFAULT_EMAIL_SOURCE_ID.into(),
            plugin_type: PluginType::Email.to_string(),
            name: "Default Email Source".into(),
            enabled: true,
            config: object(email_config),
        },
        SourceConfig {
            source_id: LEGACY_RSS_SOURCE_ID.into(),
            plugin_type: PluginType::Rss.to_string(),
            name: "Default RSS Sources".into(),
            enabled: true,
            config: object(rss_config),
        },
    ]
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn default_source_name(plugin_type: &str) -> String {
    let mut chars = plugin_type.chars();
    match chars.next() {
        Some(first) => format!("{}{} Source", first.to_uppercase(), chars.as_str()),
        None => "Source".into(),
    }
}

fn display_name(source: &SourceConfig) -> String {
    if source.name.is_empty() {
        source.source_id.clone()
    } else {
        source.name.clone()
    }
}

/// `Ok(None)` when the file does not exist yet.
async fn read_sources_file(path: &Path) -> Result<Option<Vec<SourceConfig>>> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(ResearchError::io(path, e)),
    };

    let entries: Map<String, Value> = serde_json::from_str(&raw)
        .map_err(|e| ResearchError::parse(format!("{}: {e}", path.display())))?;

    let mut sources = Vec::with_capacity(entries.len());
    for (source_id, value) in entries {
        let mut source: SourceConfig = serde_json::from_value(value).map_err(|e| {
            ResearchError::parse(format!("{}: source {source_id}: {e}", path.display()))
        })?;
        source.source_id = source_id;
        sources.push(source);
    }
    Ok(Some(sources))
}

async fn write_sources_file(path: &Path, sources: &[SourceConfig]) -> Result<()> {
    let mut entries = Map::new();
    for source in sources {
        let value = serde_json::to_value(source)
            .map_err(|e| ResearchError::parse(format!("serializing {}: {e}", source.source_id)))?;
        entries.insert(source.source_id.clone(), value);
    }
    let body = serde_json::to_string_pretty(&entries)
        .map_err(|e| ResearchError::parse(format!("serializing sources: {e}")))?;

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| ResearchError::io(parent, e))?;
    }
    tokio::fs::write(path, body)
        .await
        .map_err(|e| ResearchError::io(path, e))?;
    debug!(count = sources.len(), path = %path.display(), "saved source configurations");
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;

    use super::*;
    use crate::plugin::is_truthy;

    /// Records which sources were fetched; config drives its behavior.
    struct FakePlugin {
        source_id: String,
        plugin_type: String,
        config: Map<String, Value>,
        fetched: Arc<StdMutex<Vec<String>>>,
    }

    #[async_trait]
    impl SourcePlugin for FakePlugin {
        fn source_id(&self) -> &str {
            &self.source_id
        }

        fn plugin_type(&self) -> &str {
            &self.plugin_type
        }

        fn config(&self) -> &Map<String, Value> {
            &self.config
        }

        async fn fetch_content(&self) -> Result<Vec<ContentItem>> {
            self.fetched.lock().unwrap().push(self.source_id.clone());
            if is_truthy(self.config.get("fail")) {
                return Err(ResearchError::plugin(
                    &self.source_id,
                    &self.plugin_type,
                    "auth failed",
                ));
            }
            let count = self.config.get("items").and_then(Value::as_u64).unwrap_or(0);
            Ok((0..count)
                .map(|i| ContentItem {
                    id: format!("{}_{i}", self.source_id),
                    title: format!("Item {i}"),
                    content: "body".into(),
                    ..Default::default()
                })
                .collect())
        }

        async fn test_connection(&self) -> TestResult {
            TestResult::ok("fake ok", json!({ "source_id": self.source_id }))
        }

        fn validate_config(&self, config: &Map<String, Value>) -> ValidationResult {
            if is_truthy(config.get("reject")) {
                ValidationResult::from_parts(vec!["rejected".into()], Vec::new())
            } else {
                ValidationResult::from_parts(Vec::new(), Vec::new())
            }
        }
    }

    fn fake_factory(plugin_type: &'static str, fetched: Arc<StdMutex<Vec<String>>>) -> PluginFactory {
        Arc::new(
            move |source_id: &str, config: &Map<String, Value>| -> Result<Box<dyn SourcePlugin>> {
                Ok(Box::new(FakePlugin {
                    source_id: source_id.to_string(),
                    plugin_type: plugin_type.to_string(),
                    config: config.clone(),
                    fetched: fetched.clone(),
                }))
            },
        )
    }

    fn temp_settings() -> (Arc<AppConfig>, PathBuf) {
        let dir = std::env::temp_dir().join(format!("sources-test-{}", uuid::Uuid::now_v7()));
        let mut settings = AppConfig::default();
        settings.paths.data_dir = dir.display().to_string();
        (Arc::new(settings), dir)
    }

    /// Manager over an empty `sources.json` with fake email/rss/web plugins.
    async fn fake_manager() -> (SourceManager, Arc<StdMutex<Vec<String>>>, PathBuf) {
        let (settings, dir) = temp_settings();
        let path = settings.paths.sources_file();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{}").unwrap();

        let manager = SourceManager::load(settings).await.unwrap();
        let fetched = Arc::new(StdMutex::new(Vec::new()));
        for plugin_type in ["email", "rss", "web"] {
            assert!(manager.register_plugin(plugin_type, fake_factory(plugin_type, fetched.clone())));
        }
        (manager, fetched, dir)
    }

    fn config(value: Value) -> Map<String, Value> {
        object(value)
    }

    #[tokio::test]
    async fn first_start_writes_defaults_and_drops_empty_meta_source() {
        let (settings, dir) = temp_settings();
        let manager = SourceManager::load(settings).await.unwrap();

        let sources = manager.get_configured_sources().await;
        let ids: Vec<_> = sources.iter().map(|s| s.source_id.as_str()).collect();
        assert_eq!(ids, vec![DEFAULT_EMAIL_SOURCE_ID]);
        assert!(manager.sources_path().exists());

        // The default mailbox resolves its server from settings.
        assert_eq!(sources[0].config["server"], json!("imap.gmail.com"));
        assert_eq!(sources[0].config["smtp_port"], json!(587));

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn legacy_meta_source_is_split_once() {
        let (settings, dir) = temp_settings();
        let config_dir = settings.paths.config_dir();
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::write(
            config_dir.join("rss_feeds.json"),
            r#"{"deep_dive": {"name": "Deep Dive", "rss_url": "https://pod.example/feed", "episodes_to_fetch": 2},
                "markets": {"name": "Markets", "rss_url": "https://markets.example/rss"}}"#,
        )
        .unwrap();
        std::fs::write(
            settings.paths.sources_file(),
            r#"{"default_rss": {"type": "rss", "name": "Default RSS Sources", "enabled": true,
                "config": {"use_rss_feeds_config": true, "config_file": "rss_feeds.json"}}}"#,
        )
        .unwrap();

        let manager = SourceManager::load(settings.clone()).await.unwrap();
        let ids: Vec<_> = manager
            .get_configured_sources()
            .await
            .into_iter()
            .map(|s| s.source_id)
            .collect();
        assert_eq!(ids, vec!["rss_deep_dive", "rss_markets"]);

        let deep_dive = manager.get_source("rss_deep_dive").await.unwrap();
        assert_eq!(deep_dive.name, "Deep Dive");
        assert_eq!(deep_dive.config["episodes_to_fetch"], json!(2));

        // A second start finds nothing to migrate.
        let again = SourceManager::load(settings).await.unwrap();
        assert_eq!(again.status().await.total_sources, 2);

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn disabled_sources_are_never_fetched() {
        let (manager, fetched, dir) = fake_manager().await;
        assert!(manager
            .add_source("mail", "email", config(json!({ "items": 2 })), Some("Inbox"), true)
            .await
            .unwrap());
        assert!(manager
            .add_source("pod", "rss", config(json!({ "items": 1 })), None, true)
            .await
            .unwrap());
        assert!(manager
            .add_source("site", "web", config(json!({ "items": 4 })), None, false)
            .await
            .unwrap());

        let items = manager.fetch_from_all_sources().await.unwrap();

        assert_eq!(items.len(), 3);
        assert_eq!(*fetched.lock().unwrap(), vec!["mail", "pod"]);
        assert!(items[..2].iter().all(|i| i.source_id.as_deref() == Some("mail")));
        assert!(items[..2].iter().all(|i| i.source_type == "email"));
        assert_eq!(items[2].source_id.as_deref(), Some("pod"));
        assert_eq!(items[2].source_type, "rss");
        assert_eq!(items[0].source, "Inbox");
        assert_eq!(items[2].source, "Rss Source");

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn failing_source_does_not_abort_batch() {
        let (manager, fetched, dir) = fake_manager().await;
        for (id, cfg) in [
            ("first", json!({ "items": 1 })),
            ("broken", json!({ "fail": true })),
            ("last", json!({ "items": 2 })),
        ] {
            assert!(manager.add_source(id, "web", config(cfg), None, true).await.unwrap());
        }

        let items = manager.fetch_from_all_sources().await.unwrap();

        assert_eq!(fetched.lock().unwrap().len(), 3);
        let ids: Vec<_> = items.iter().map(|i| i.source_id.clone().unwrap()).collect();
        assert_eq!(ids, vec!["first", "last", "last"]);

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_without_mutation() {
        let (manager, _, dir) = fake_manager().await;
        manager
            .add_source("keep", "web", config(json!({})), None, true)
            .await
            .unwrap();
        let before = std::fs::read_to_string(manager.sources_path()).unwrap();

        let added = manager
            .add_source("bad", "web", config(json!({ "reject": true })), None, true)
            .await
            .unwrap();
        assert!(!added);

        let unknown = manager
            .add_source("odd", "carrier_pigeon", config(json!({})), None, true)
            .await
            .unwrap();
        assert!(!unknown);

        assert_eq!(manager.status().await.total_sources, 1);
        assert_eq!(std::fs::read_to_string(manager.sources_path()).unwrap(), before);

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    #[serial_test::serial]
    async fn saved_source_round_trips_with_fresh_resolution() {
        let (manager, _, dir) = fake_manager().await;
        unsafe { std::env::set_var("RESEARCH_TEST_FEED_TOKEN", "alpha") };

        manager
            .add_source(
                "tokened",
                "rss",
                config(json!({ "token": "${RESEARCH_TEST_FEED_TOKEN}" })),
                Some("Tokened Feed"),
                false,
            )
            .await
            .unwrap();

        let raw = std::fs::read_to_string(manager.sources_path()).unwrap();
        assert!(raw.contains("${RESEARCH_TEST_FEED_TOKEN}"));

        let first = manager.get_configured_sources().await;
        assert_eq!(first[0].plugin_type, "rss");
        assert_eq!(first[0].name, "Tokened Feed");
        assert!(!first[0].enabled);
        assert_eq!(first[0].config["token"], json!("alpha"));

        unsafe { std::env::set_var("RESEARCH_TEST_FEED_TOKEN", "beta") };
        manager.reload().await.unwrap();
        let second = manager.get_configured_sources().await;
        assert_eq!(second[0].config["token"], json!("beta"));

        unsafe { std::env::remove_var("RESEARCH_TEST_FEED_TOKEN") };
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn mutations_and_lookups() {
        let (manager, _, dir) = fake_manager().await;
        manager
            .add_source("a", "web", config(json!({ "items": 1 })), None, true)
            .await
            .unwrap();

        assert!(!manager.remove_source("missing").await.unwrap());
        assert!(manager.set_enabled("a", false).await.unwrap());
        assert!(!manager.get_source("a").await.unwrap().enabled);

        let rejected = manager
            .update_source(
                "a",
                SourceUpdate {
                    config: Some(config(json!({ "reject": true }))),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(!rejected);
        assert_eq!(manager.get_source("a").await.unwrap().config["items"], json!(1));

        let info = manager.get_source_info("a").await.unwrap();
        assert!(info.plugin_available);
        assert_eq!(info.config_keys, vec!["items"]);

        let status = manager.status().await;
        assert_eq!(status.total_sources, 1);
        assert_eq!(status.enabled_sources, 0);
        assert_eq!(status.sources_by_type["web"], 1);
        assert_eq!(status.available_plugin_types, vec!["email", "rss", "web"]);

        assert!(manager.remove_source("a").await.unwrap());
        assert!(manager.get_source_info("a").await.is_none());

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_source_reports_missing_and_unregistered() {
        let (manager, _, dir) = fake_manager().await;
        let missing = manager.test_source("nope").await;
        assert!(!missing.success);
        assert_eq!(missing.error.as_deref(), Some("Source nope not found"));

        manager
            .add_source("ok", "email", config(json!({})), None, true)
            .await
            .unwrap();
        assert!(manager.test_source("ok").await.success);

        let results = manager.test_all_sources().await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, "ok");

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn empty_plugin_type_is_rejected() {
        let (manager, fetched, dir) = fake_manager().await;
        assert!(!manager.register_plugin("  ", fake_factory("x", fetched)));
        assert!(!manager.available_plugin_types().contains(&String::new()));

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn corrupt_sources_file_is_an_error() {
        let (settings, dir) = temp_settings();
        let path = settings.paths.sources_file();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{ not json").unwrap();

        assert!(SourceManager::load(settings).await.is_err());

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn default_names_are_title_cased() {
        assert_eq!(default_source_name("web"), "Web Source");
        assert_eq!(default_source_name(""), "Source");
    }
}
