//! Application configuration for the research pipeline.
//!
//! User config lives at `~/.research-pipeline/research.toml`.
//! CLI flags override config file values, which override defaults.
//! Empty `[email]` fields fall back to the process environment.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ResearchError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "research.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".research-pipeline";

/// Env var that overrides the config file location.
pub const CONFIG_PATH_ENV: &str = "RESEARCH_CONFIG";

// ---------------------------------------------------------------------------
// Config structs (matching research.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Filesystem layout.
    #[serde(default)]
    pub paths: PathsConfig,

    /// LLM provider settings.
    #[serde(default)]
    pub llm: LlmConfig,

    /// Mailbox settings for the default email source.
    #[serde(default)]
    pub email: EmailConfig,

    /// Processing knobs.
    #[serde(default)]
    pub processing: ProcessingConfig,

    /// Weekly roll-up policy.
    #[serde(default)]
    pub weekly: WeeklyConfig,

    /// Export destinations.
    #[serde(default)]
    pub export: ExportConfig,
}

/// `[paths]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Root of all runtime data. `~` is expanded.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl PathsConfig {
    /// Expanded data directory.
    pub fn data_dir(&self) -> PathBuf {
        expand_tilde(&self.data_dir)
    }

    /// Directory holding `sources.json` and `rss_feeds.json`.
    pub fn config_dir(&self) -> PathBuf {
        self.data_dir().join("config")
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir().join("database").join("insights.db")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.data_dir().join("cache")
    }

    pub fn exports_dir(&self) -> PathBuf {
        self.data_dir().join("exports")
    }

    pub fn sources_file(&self) -> PathBuf {
        self.config_dir().join("sources.json")
    }

    pub fn rss_feeds_file(&self) -> PathBuf {
        self.config_dir().join("rss_feeds.json")
    }
}

fn default_data_dir() -> String {
    "~/.research-pipeline/data".into()
}

/// `[llm]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_llm_model")]
    pub model: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Messages API base URL.
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            model: default_llm_model(),
            max_tokens: default_max_tokens(),
            base_url: default_llm_base_url(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_api_key_env() -> String {
    "ANTHROPIC_API_KEY".into()
}
fn default_llm_model() -> String {
    "claude-3-5-haiku-latest".into()
}
fn default_max_tokens() -> u32 {
    2000
}
fn default_llm_base_url() -> String {
    "https://api.anthropic.com".into()
}
fn default_request_timeout() -> u64 {
    120
}

/// `[email]` section. Empty fields are read from the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    #[serde(default = "default_email_server")]
    pub server: String,

    #[serde(default = "default_email_port")]
    pub port: u16,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    #[serde(default = "default_email_folder")]
    pub folder: String,

    #[serde(default)]
    pub smtp_server: String,

    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,

    #[serde(default)]
    pub notification_email: String,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            server: default_email_server(),
            port: default_email_port(),
            username: String::new(),
            password: String::new(),
            folder: default_email_folder(),
            smtp_server: String::new(),
            smtp_port: default_smtp_port(),
            notification_email: String::new(),
        }
    }
}

fn default_email_server() -> String {
    "imap.gmail.com".into()
}
fn default_email_port() -> u16 {
    993
}
fn default_email_folder() -> String {
    "INBOX".into()
}
fn default_smtp_port() -> u16 {
    587
}

/// `[processing]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    #[serde(default = "default_true")]
    pub enable_link_enrichment: bool,

    #[serde(default = "default_max_links")]
    pub max_links_to_enrich: usize,

    /// Name of the env var holding the LinkPreview key.
    #[serde(default = "default_linkpreview_env")]
    pub linkpreview_api_key_env: String,

    /// Pause between consecutive LLM chunk calls.
    #[serde(default = "default_summary_delay")]
    pub summary_delay_ms: u64,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            enable_link_enrichment: true,
            max_links_to_enrich: default_max_links(),
            linkpreview_api_key_env: default_linkpreview_env(),
            summary_delay_ms: default_summary_delay(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_max_links() -> usize {
    10
}
fn default_linkpreview_env() -> String {
    "LINKPREVIEW_API_KEY".into()
}
fn default_summary_delay() -> u64 {
    1000
}

/// `[weekly]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeeklyConfig {
    #[serde(default = "default_true")]
    pub auto_generate: bool,

    /// Minimum whole days between two weekly roll-ups.
    #[serde(default = "default_min_days")]
    pub min_days: i64,
}

impl Default for WeeklyConfig {
    fn default() -> Self {
        Self {
            auto_generate: true,
            min_days: default_min_days(),
        }
    }
}

fn default_min_days() -> i64 {
    3
}

/// `[export]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Obsidian vault root. Empty disables the Obsidian export.
    #[serde(default)]
    pub obsidian_vault_path: String,

    #[serde(default = "default_summaries_folder")]
    pub obsidian_summaries_folder: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            obsidian_vault_path: String::new(),
            obsidian_summaries_folder: default_summaries_folder(),
        }
    }
}

fn default_summaries_folder() -> String {
    "Newsletter Summaries".into()
}

// ---------------------------------------------------------------------------
// Lookups
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Resolve a flat, lower-cased settings name for `${VAR}` placeholders.
    ///
    /// Returns `None` for unknown names and for empty string settings, so
    /// the caller can fall through to the environment.
    pub fn lookup(&self, name: &str) -> Option<Value> {
        let value = match name {
            "email_server" => Value::from(self.email.server.clone()),
            "email_username" => Value::from(self.email.username.clone()),
            "email_password" => Value::from(self.email.password.clone()),
            "email_folder" => Value::from(self.email.folder.clone()),
            "smtp_server" => Value::from(self.email.smtp_server.clone()),
            "smtp_port" => Value::from(self.email.smtp_port),
            "notification_email" => Value::from(self.email.notification_email.clone()),
            "llm_model" => Value::from(self.llm.model.clone()),
            "max_tokens" => Value::from(self.llm.max_tokens),
            "data_dir" => Value::from(self.paths.data_dir().display().to_string()),
            "max_links_to_enrich" => Value::from(self.processing.max_links_to_enrich),
            "enable_link_enrichment" => Value::from(self.processing.enable_link_enrichment),
            "weekly_summary_min_days" => Value::from(self.weekly.min_days),
            "auto_generate_weekly_summary" => Value::from(self.weekly.auto_generate),
            _ => return None,
        };
        match &value {
            Value::String(s) if s.is_empty() => None,
            _ => Some(value),
        }
    }

    /// Fill empty `[email]` fields from `EMAIL_*` / `SMTP_*` env vars.
    pub fn apply_env_fallbacks(&mut self) {
        fill_from_env(&mut self.email.username, "EMAIL_USERNAME");
        fill_from_env(&mut self.email.password, "EMAIL_PASSWORD");
        fill_from_env(&mut self.email.smtp_server, "SMTP_SERVER");
        fill_from_env(&mut self.email.notification_email, "NOTIFICATION_EMAIL");
        if self.email.server == default_email_server() {
            fill_from_env_nonempty(&mut self.email.server, "EMAIL_SERVER");
        }
        if self.email.folder == default_email_folder() {
            fill_from_env_nonempty(&mut self.email.folder, "EMAIL_FOLDER");
        }
    }

    /// API key for the LLM, read from the configured env var.
    pub fn llm_api_key(&self) -> Option<String> {
        std::env::var(&self.llm.api_key_env)
            .ok()
            .filter(|k| !k.is_empty())
    }

    /// LinkPreview key, if configured.
    pub fn linkpreview_api_key(&self) -> Option<String> {
        std::env::var(&self.processing.linkpreview_api_key_env)
            .ok()
            .filter(|k| !k.is_empty())
    }
}

fn fill_from_env(field: &mut String, var: &str) {
    if field.is_empty() {
        fill_from_env_nonempty(field, var);
    }
}

fn fill_from_env_nonempty(field: &mut String, var: &str) {
    match std::env::var(var) {
        Ok(val) if !val.is_empty() => *field = val,
        _ => {}
    }
}

/// Expand a leading `~` against the home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~"), dirs::home_dir()) {
        (Some(""), Some(home)) => home,
        (Some(rest), Some(home)) if rest.starts_with('/') => home.join(&rest[1..]),
        _ => PathBuf::from(path),
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.research-pipeline/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| ResearchError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the config file path, honouring `RESEARCH_CONFIG`.
pub fn config_file_path() -> Result<PathBuf> {
    match std::env::var(CONFIG_PATH_ENV) {
        Ok(path) if !path.is_empty() => return Ok(PathBuf::from(path)),
        _ => {}
    }
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    let mut config = if path.exists() {
        load_config_from(&path)?
    } else {
        tracing::debug!(?path, "config file not found, using defaults");
        AppConfig::default()
    };
    config.apply_env_fallbacks();
    Ok(config)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| ResearchError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| ResearchError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Write a default config file at `path` (or the default location).
/// Returns the path to the created file.
pub fn init_config(path: Option<&Path>) -> Result<PathBuf> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => config_file_path()?,
    };
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| ResearchError::io(dir, e))?;
    }

    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| ResearchError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| ResearchError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Check that the LLM API key env var is set and non-empty.
pub fn validate_api_key(config: &AppConfig) -> Result<()> {
    match config.llm_api_key() {
        Some(_) => Ok(()),
        None => Err(ResearchError::config(format!(
            "LLM API key not found. Set the {} environment variable.",
            config.llm.api_key_env
        ))),
    }
}
