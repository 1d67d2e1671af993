//! `${VAR}` placeholder resolution for source configs.
//!
//! A string value that is exactly `${NAME}` is looked up as the lower-cased
//! settings name, then as the environment variable `NAME`. When neither
//! exists the placeholder is left in place. Resolution is never cached.

use research_shared::AppConfig;
use serde_json::{Map, Value};

/// Name inside an exact `${NAME}` placeholder.
pub fn placeholder_name(value: &str) -> Option<&str> {
    value
        .strip_prefix("${")
        .and_then(|rest| rest.strip_suffix('}'))
        .filter(|name| !name.is_empty())
}

/// Look up one placeholder. `None` means "leave it unresolved".
pub fn resolve_placeholder(name: &str, settings: &AppConfig) -> Option<Value> {
    if let Some(value) = settings.lookup(&name.to_lowercase()) {
        return Some(value);
    }
    std::env::var(name).ok().map(Value::String)
}

/// Resolve every placeholder in `config`, recursing into nested objects.
pub fn resolve_config(config: &Map<String, Value>, settings: &AppConfig) -> Map<String, Value> {
    config
        .iter()
        .map(|(key, value)| (key.clone(), resolve_value(value, settings)))
        .collect()
}

fn resolve_value(value: &Value, settings: &AppConfig) -> Value {
    match value {
        Value::String(s) => match placeholder_name(s) {
            Some(name) => resolve_placeholder(name, settings).unwrap_or_else(|| value.clone()),
            None => value.clone(),
        },
        Value::Object(map) => Value::Object(resolve_config(map, settings)),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn placeholder_name_requires_exact_form() {
        assert_eq!(placeholder_name("${EMAIL_SERVER}"), Some("EMAIL_SERVER"));
        assert_eq!(placeholder_name("prefix ${X}"), None);
        assert_eq!(placeholder_name("${}"), None);
        assert_eq!(placeholder_name("plain"), None);
    }

    #[test]
    fn settings_take_precedence_over_environment() {
        let mut settings = AppConfig::default();
        settings.email.server = "imap.example.org".into();

        let config = json!({ "server": "${EMAIL_SERVER}" });
        let resolved = resolve_config(config.as_object().unwrap(), &settings);
        assert_eq!(resolved["server"], json!("imap.example.org"));
    }

    #[test]
    fn numeric_settings_keep_their_type() {
        let settings = AppConfig::default();
        let config = json!({ "smtp_port": "${SMTP_PORT}" });
        let resolved = resolve_config(config.as_object().unwrap(), &settings);
        assert_eq!(resolved["smtp_port"], json!(587));
    }

    #[test]
    #[serial_test::serial]
    fn environment_is_read_on_every_call() {
        let settings = AppConfig::default();
        let config = json!({ "feed": { "rss_url": "${RESEARCH_TEST_RESOLVE_URL}" } });
        let config = config.as_object().unwrap();

        unsafe { std::env::set_var("RESEARCH_TEST_RESOLVE_URL", "https://one.example/feed") };
        let first = resolve_config(config, &settings);
        assert_eq!(first["feed"]["rss_url"], json!("https://one.example/feed"));

        unsafe { std::env::set_var("RESEARCH_TEST_RESOLVE_URL", "https://two.example/feed") };
        let second = resolve_config(config, &settings);
        assert_eq!(second["feed"]["rss_url"], json!("https://two.example/feed"));

        unsafe { std::env::remove_var("RESEARCH_TEST_RESOLVE_URL") };
    }

    #[test]
    #[serial_test::serial]
    fn missing_variable_keeps_placeholder() {
        unsafe { std::env::remove_var("RESEARCH_TEST_NOT_SET") };
        let settings = AppConfig::default();
        let config = json!({ "token": "${RESEARCH_TEST_NOT_SET}", "count": 3 });
        let resolved = resolve_config(config.as_object().unwrap(), &settings);
        assert_eq!(resolved["token"], json!("${RESEARCH_TEST_NOT_SET}"));
        assert_eq!(resolved["count"], json!(3));
    }
}
