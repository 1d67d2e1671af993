//! The source plugin contract.
//!
//! A plugin is built from `(source_id, resolved config)` every time it is
//! used, so config changes are always picked up and no plugin instance is
//! cached between calls.

use std::fmt::Display;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use research_shared::{ContentItem, Result, TestResult, ValidationResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value, json};

/// Capability set shared by every source variant.
#[async_trait]
pub trait SourcePlugin: Send + Sync {
    /// Configured source this instance serves.
    fn source_id(&self) -> &str;

    /// Registered type identifier (`email`, `rss`, `web`, ...).
    fn plugin_type(&self) -> &str;

    /// Fetch new content. "Nothing new" is an empty vector, never an error.
    ///
    /// Unrecoverable conditions (auth failure, bad config) are reported as
    /// [`research_shared::ResearchError::Plugin`].
    async fn fetch_content(&self) -> Result<Vec<ContentItem>>;

    /// Probe the source. Every failure is captured in the result.
    async fn test_connection(&self) -> TestResult;

    /// Pure validation of a raw config map.
    fn validate_config(&self, config: &Map<String, Value>) -> ValidationResult;

    /// Raw config this instance was built from.
    fn config(&self) -> &Map<String, Value>;

    /// Descriptive information for listings.
    fn source_info(&self) -> Map<String, Value> {
        let mut info = Map::new();
        info.insert("source_id".into(), json!(self.source_id()));
        info.insert("plugin_type".into(), json!(self.plugin_type()));
        info.insert(
            "config_keys".into(),
            json!(self.config().keys().collect::<Vec<_>>()),
        );
        info
    }

    /// JSON-schema-like description of the accepted config.
    fn config_schema(&self) -> Value {
        json!({ "type": "object", "properties": {}, "required": [] })
    }
}

/// Builds a plugin instance for one source.
pub type PluginFactory =
    Arc<dyn Fn(&str, &Map<String, Value>) -> Result<Box<dyn SourcePlugin>> + Send + Sync>;

/// Wrap a plugin constructor into a [`PluginFactory`].
pub fn plugin_factory<F, P>(build: F) -> PluginFactory
where
    F: Fn(&str, &Map<String, Value>) -> Result<P> + Send + Sync + 'static,
    P: SourcePlugin + 'static,
{
    Arc::new(
        move |source_id: &str, config: &Map<String, Value>| -> Result<Box<dyn SourcePlugin>> {
            Ok(Box::new(build(source_id, config)?))
        },
    )
}

/// Parse a raw config map into a typed per-variant config.
///
/// Failures become a tagged plugin error for `source_id`.
pub(crate) fn typed_config<T: DeserializeOwned>(
    source_id: &str,
    plugin_type: &str,
    config: &Map<String, Value>,
) -> Result<T> {
    serde_json::from_value(Value::Object(config.clone())).map_err(|e| {
        research_shared::ResearchError::plugin(
            source_id,
            plugin_type,
            format!("invalid config: {e}"),
        )
    })
}

// ---------------------------------------------------------------------------
// Validation helpers
// ---------------------------------------------------------------------------

pub(crate) fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

/// Non-empty string value at `key`.
pub(crate) fn non_empty_str<'a>(config: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    config
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

/// Integer value, accepting numeric strings left behind by placeholder resolution.
pub(crate) fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Like [`as_integer`] for floating-point settings.
pub(crate) fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString<T> {
    Number(T),
    String(String),
}

/// Serde adapter for numeric fields that may arrive as strings.
pub(crate) fn number_or_string<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + FromStr,
    T::Err: Display,
{
    match NumberOrString::<T>::deserialize(deserializer)? {
        NumberOrString::Number(n) => Ok(n),
        NumberOrString::String(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// Truthiness in the loose sense a hand-edited JSON file expects.
pub(crate) fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(a)) => !a.is_empty(),
        Some(Value::Object(o)) => !o.is_empty(),
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
    }
}
