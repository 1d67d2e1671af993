//! Core domain types for the research pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// `source_type` given to roll-up records produced by the weekly summary step.
pub const WEEKLY_SUMMARY_SOURCE_TYPE: &str = "weekly_summary";

/// Placeholder summary text for an item whose summarization call failed.
pub const SUMMARY_FAILED_TEXT: &str = "Summary generation failed";

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for processing run identifiers (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a new time-sortable run identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// PluginType
// ---------------------------------------------------------------------------

/// Built-in source plugin variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginType {
    Email,
    Rss,
    Web,
}

impl PluginType {
    /// All built-in variants, in registration order.
    pub const ALL: [PluginType; 3] = [PluginType::Email, PluginType::Rss, PluginType::Web];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Rss => "rss",
            Self::Web => "web",
        }
    }
}

impl std::fmt::Display for PluginType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PluginType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "email" => Ok(Self::Email),
            "rss" => Ok(Self::Rss),
            "web" => Ok(Self::Web),
            other => Err(format!("unknown plugin type: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// ContentItem
// ---------------------------------------------------------------------------

/// One fetched unit of raw material (an email, a podcast episode, an article).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    /// Source-derived unique identifier.
    pub id: String,
    pub title: String,
    /// Raw text. May be empty.
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub url: String,
    /// ISO date string (`YYYY-MM-DD` or a full timestamp).
    #[serde(default)]
    pub date: String,
    /// Display name of the producing source.
    #[serde(default)]
    pub source: String,
    /// Kind of content, overwritten with the plugin type by the source manager.
    #[serde(default)]
    pub source_type: String,
    /// Configured source that produced the item (stamped by the source manager).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    /// Open metadata bag.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
    /// Populated by the link-processing stage.
    #[serde(default)]
    pub links: Vec<Link>,
}

// ---------------------------------------------------------------------------
// Link
// ---------------------------------------------------------------------------

/// A link extracted from content, optionally enriched with preview metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    /// Parent item's source, stamped before storage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Parent item's date, stamped before storage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

// ---------------------------------------------------------------------------
// Summary
// ---------------------------------------------------------------------------

/// A summary-shaped record derived from one content item (or a weekly roll-up).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    /// Database id, present once persisted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub title: String,
    pub source: String,
    #[serde(default)]
    pub source_type: String,
    #[serde(default)]
    pub date: String,
    /// Summary body (bullets for item summaries, markdown for weekly roll-ups).
    pub summary: String,
    #[serde(default)]
    pub questions: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Bullet insights lifted from the summary body.
    #[serde(default)]
    pub insights: Vec<String>,
    #[serde(default)]
    pub links: Vec<Link>,
    #[serde(default)]
    pub content_length: usize,
    #[serde(default)]
    pub chunks_processed: usize,
    /// Set when the record is a degraded placeholder.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub starred: bool,
}

impl Summary {
    /// Placeholder kept in the batch when summarizing `item` raised.
    pub fn failed(item: &ContentItem, error: impl Into<String>) -> Self {
        Self {
            title: non_empty_or(&item.title, "Unknown"),
            source: non_empty_or(&item.source, "Unknown"),
            source_type: item.source_type.clone(),
            date: item.date.clone(),
            summary: SUMMARY_FAILED_TEXT.to_string(),
            links: item.links.clone(),
            content_length: item.content.len(),
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// Whether this record is a weekly roll-up rather than an item summary.
    pub fn is_weekly(&self) -> bool {
        self.source_type == WEEKLY_SUMMARY_SOURCE_TYPE
    }

    /// First three tags joined with `", "`, used as an insight topic.
    pub fn topic(&self) -> String {
        self.tags
            .iter()
            .take(3)
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn non_empty_or(value: &str, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_string()
    } else {
        value.to_string()
    }
}

// ---------------------------------------------------------------------------
// Insight
// ---------------------------------------------------------------------------

/// A single memorable fact extracted from a summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    /// Owning summary, `None` for standalone insights.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary_id: Option<i64>,
    pub source: String,
    #[serde(default)]
    pub topic: String,
    pub insight: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Insight {
    /// Build a standalone insight carrying the summary's source, tags and date.
    pub fn from_summary(summary: &Summary, text: impl Into<String>) -> Self {
        Self {
            summary_id: None,
            source: summary.source.clone(),
            topic: summary.topic(),
            insight: text.into(),
            tags: summary.tags.clone(),
            date: summary.date.clone(),
            created_at: Some(Utc::now()),
        }
    }
}

// ---------------------------------------------------------------------------
// SourceConfig
// ---------------------------------------------------------------------------

/// A named, typed, enable-flagged configuration bundle for one source instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Unique key. Not serialized inside the entry; it is the map key on disk.
    #[serde(skip)]
    pub source_id: String,
    /// Plugin type identifier (`email`, `rss`, `web`, or a custom registration).
    #[serde(rename = "type")]
    pub plugin_type: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Plugin-specific settings. String values may be `${VAR}` placeholders.
    #[serde(default)]
    pub config: Map<String, Value>,
}

fn default_enabled() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Plugin results
// ---------------------------------------------------------------------------

/// Outcome of a connection test. Never an error; failures live in the fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl TestResult {
    pub fn ok(message: impl Into<String>, details: Value) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            error: None,
            details: Some(details),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: None,
            error: Some(error.into()),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Outcome of validating a source configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    /// Valid exactly when `errors` is empty.
    pub fn from_parts(errors: Vec<String>, warnings: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_roundtrip() {
        let id = RunId::new();
        let s = id.to_string();
        let parsed: RunId = s.parse().expect("parse RunId");
        assert_eq!(id, parsed);
    }

    #[test]
    fn plugin_type_parses_builtins() {
        for kind in PluginType::ALL {
            let parsed: PluginType = kind.as_str().parse().unwrap();
            assert_eq!(parsed, kind);
        }
        assert!("ftp".parse::<PluginType>().is_err());
    }

    #[test]
    fn source_config_uses_type_key() {
        let json = r#"{"type":"rss","name":"Tech","config":{"rss_url":"https://example.com/feed"}}"#;
        let cfg: SourceConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.plugin_type, "rss");
        assert!(cfg.enabled, "enabled defaults to true");

        let out = serde_json::to_string(&cfg).unwrap();
        assert!(out.contains(r#""type":"rss""#));
        assert!(!out.contains("source_id"));
    }

    #[test]
    fn failed_summary_keeps_item_identity() {
        let item = ContentItem {
            id: "a".into(),
            title: "Issue 42".into(),
            source: "Morning Brief".into(),
            content: "hello".into(),
            ..Default::default()
        };
        let s = Summary::failed(&item, "rate limited");
        assert_eq!(s.summary, SUMMARY_FAILED_TEXT);
        assert_eq!(s.title, "Issue 42");
        assert_eq!(s.error.as_deref(), Some("rate limited"));
        assert_eq!(s.content_length, 5);
    }

    #[test]
    fn insight_topic_uses_first_three_tags() {
        let summary = Summary {
            source: "Digest".into(),
            tags: vec!["ai".into(), "chips".into(), "markets".into(), "china".into()],
            ..Default::default()
        };
        let insight = Insight::from_summary(&summary, "Revenue grew 40% year over year");
        assert_eq!(insight.topic, "ai, chips, markets");
        assert_eq!(insight.tags.len(), 4);
        assert!(insight.summary_id.is_none());
    }

    #[test]
    fn validation_result_validity_tracks_errors() {
        assert!(ValidationResult::from_parts(vec![], vec!["w".into()]).valid);
        assert!(!ValidationResult::from_parts(vec!["e".into()], vec![]).valid);
    }
}
