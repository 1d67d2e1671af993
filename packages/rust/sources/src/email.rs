//! Email source: unread newsletters from an IMAP mailbox.
//!
//! The `imap` crate is blocking, so every session runs inside
//! `tokio::task::spawn_blocking`. Message parsing happens back on the async
//! side and is independent of the network.

use std::net::TcpStream;
use std::sync::LazyLock;

use async_trait::async_trait;
use mail_parser::{MessageParser, PartType};
use native_tls::TlsStream;
use regex::Regex;
use research_processing::{clean_email_content, html_to_text};
use research_shared::{
    ContentItem, EmailConfig, ResearchError, Result, TestResult, ValidationResult,
};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::{debug, info, instrument, warn};

use crate::plugin::{SourcePlugin, is_truthy, non_empty_str, number_or_string, typed_config};

const PLUGIN_TYPE: &str = "email";

type ImapSession = imap::Session<TlsStream<TcpStream>>;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Typed view of an email source's config map.
#[derive(Debug, Clone, Deserialize)]
pub struct EmailSourceConfig {
    pub server: String,
    #[serde(default = "default_port", deserialize_with = "number_or_string")]
    pub port: u16,
    pub username: String,
    pub password: String,
    #[serde(default = "default_folder")]
    pub folder: String,
    /// Display name used when a message has no sender.
    #[serde(default)]
    pub name: Option<String>,
}

fn default_port() -> u16 {
    993
}

fn default_folder() -> String {
    "INBOX".into()
}

impl From<&EmailConfig> for EmailSourceConfig {
    fn from(settings: &EmailConfig) -> Self {
        Self {
            server: settings.server.clone(),
            port: settings.port,
            username: settings.username.clone(),
            password: settings.password.clone(),
            folder: settings.folder.clone(),
            name: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Direct IMAP client, shared by the email plugin and the legacy fallback.
#[derive(Debug, Clone)]
pub struct EmailClient {
    config: EmailSourceConfig,
}

impl EmailClient {
    pub fn new(config: EmailSourceConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EmailSourceConfig {
        &self.config
    }

    /// Fetch every unseen message in the folder and mark it `\Seen`.
    #[instrument(skip_all, fields(server = %self.config.server, folder = %self.config.folder))]
    pub async fn fetch_unread(&self) -> Result<Vec<ContentItem>> {
        let config = self.config.clone();
        let raw_messages = tokio::task::spawn_blocking(move || fetch_unseen_blocking(&config))
            .await
            .map_err(|e| ResearchError::Network(format!("IMAP task failed: {e}")))??;

        let mut items = Vec::with_capacity(raw_messages.len());
        for (seq, raw) in raw_messages {
            match parse_message(seq, &raw) {
                Some(item) => {
                    debug!(seq, title = %item.title, "parsed email");
                    items.push(item);
                }
                None => warn!(seq, "could not parse email, skipping"),
            }
        }

        info!(count = items.len(), "fetched unread emails");
        Ok(items)
    }

    /// Log in, select the folder and report its message count.
    pub async fn check_connection(&self) -> Result<u32> {
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || {
            let mut session = open_session(&config)?;
            let mailbox = session.select(&config.folder).map_err(|e| {
                ResearchError::Network(format!("cannot select folder {}: {e}", config.folder))
            })?;
            if let Err(e) = session.logout() {
                debug!(error = %e, "IMAP logout failed");
            }
            Ok(mailbox.exists)
        })
        .await
        .map_err(|e| ResearchError::Network(format!("IMAP task failed: {e}")))?
    }
}

fn open_session(config: &EmailSourceConfig) -> Result<ImapSession> {
    let tls = native_tls::TlsConnector::builder()
        .build()
        .map_err(|e| ResearchError::Network(format!("TLS setup failed: {e}")))?;

    let client = imap::connect(
        (config.server.as_str(), config.port),
        config.server.as_str(),
        &tls,
    )
    .map_err(|e| ResearchError::Network(format!("cannot connect to {}: {e}", config.server)))?;

    client
        .login(&config.username, &config.password)
        .map_err(|(e, _)| ResearchError::Network(format!("IMAP login failed: {e}")))
}

fn fetch_unseen_blocking(config: &EmailSourceConfig) -> Result<Vec<(u32, Vec<u8>)>> {
    let mut session = open_session(config)?;
    session
        .select(&config.folder)
        .map_err(|e| ResearchError::Network(format!("cannot select folder {}: {e}", config.folder)))?;

    let mut unseen: Vec<u32> = session
        .search("UNSEEN")
        .map_err(|e| ResearchError::Network(format!("IMAP search failed: {e}")))?
        .into_iter()
        .collect();
    unseen.sort_unstable();
    info!(count = unseen.len(), "unseen messages");

    let mut raw_messages = Vec::with_capacity(unseen.len());
    for seq in unseen {
        let fetched = match session.fetch(seq.to_string(), "RFC822") {
            Ok(fetched) => fetched,
            Err(e) => {
                warn!(seq, error = %e, "IMAP fetch failed, skipping message");
                continue;
            }
        };
        let Some(body) = fetched.iter().next().and_then(|m| m.body()) else {
            continue;
        };
        raw_messages.push((seq, body.to_vec()));

        if let Err(e) = session.store(seq.to_string(), "+FLAGS (\\Seen)") {
            warn!(seq, error = %e, "could not mark message as read");
        }
    }

    if let Err(e) = session.logout() {
        debug!(error = %e, "IMAP logout failed");
    }
    Ok(raw_messages)
}

// ---------------------------------------------------------------------------
// Message parsing
// ---------------------------------------------------------------------------

/// Turn one RFC 822 message into a content item.
pub(crate) fn parse_message(seq: u32, raw: &[u8]) -> Option<ContentItem> {
    let message = MessageParser::default().parse(raw)?;

    let raw_subject = message.subject().unwrap_or_default().trim().to_string();
    let from = message.from().and_then(|addrs| addrs.first());
    let from_address = from
        .and_then(|a| a.address.as_deref())
        .unwrap_or_default()
        .to_string();
    let sender = from
        .and_then(|a| a.name.as_deref())
        .map(|n| n.trim().trim_matches('"').to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| from_address.clone());

    // `body_html` would render plain-text parts as HTML, so look for a real one.
    let body = message
        .html_body
        .iter()
        .filter_map(|&id| message.parts.get(id as usize))
        .find_map(|part| match &part.body {
            PartType::Html(html) => Some(html_to_text(html)),
            _ => None,
        })
        .filter(|text| !text.trim().is_empty())
        .or_else(|| message.body_text(0).map(|t| t.into_owned()))
        .unwrap_or_default();

    let (subject, sender) = unwrap_forwarded(&raw_subject, &sender, &body);
    let content = clean_email_content(&body);

    let date = message
        .date()
        .map(|d| format!("{:04}-{:02}-{:02}", d.year, d.month, d.day))
        .unwrap_or_else(|| chrono::Local::now().format("%Y-%m-%d").to_string());

    let sender = if sender.is_empty() {
        "Unknown Sender".to_string()
    } else {
        sender
    };

    let mut metadata = Map::new();
    metadata.insert("from".into(), json!(from_address));
    metadata.insert("subject".into(), json!(raw_subject));

    Some(ContentItem {
        id: format!("{}_{seq}", sanitize_id(&sender)),
        title: if subject.is_empty() {
            "No Subject".to_string()
        } else {
            subject
        },
        content,
        date,
        source: sender,
        source_type: PLUGIN_TYPE.to_string(),
        metadata,
        ..Default::default()
    })
}

/// Recover the original subject and sender of a forwarded newsletter.
///
/// The last quoted `From:` line names the original sender; the last quoted
/// `Subject:` that is not itself a reply or forward is the original subject.
fn unwrap_forwarded(subject: &str, sender: &str, body: &str) -> (String, String) {
    static FROM_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?im)^[\s>*]*from:\**\s*(.+)$").expect("valid regex"));
    static SUBJECT_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?im)^[\s>*]*subject:\**\s*(.+)$").expect("valid regex"));

    let mut subject = strip_forward_prefix(subject).to_string();
    let mut sender = sender.to_string();

    if let Some(caps) = FROM_RE.captures_iter(body).last() {
        let name = caps[1]
            .split('<')
            .next()
            .unwrap_or_default()
            .trim()
            .trim_matches('"')
            .trim();
        if !name.is_empty() {
            sender = name.to_string();
        }
    }

    let original_subject = SUBJECT_RE
        .captures_iter(body)
        .map(|caps| caps[1].trim().to_string())
        .filter(|s| {
            let lower = s.to_lowercase();
            !["fwd:", "fw:", "re:"].iter().any(|p| lower.starts_with(p))
        })
        .last();
    if let Some(original) = original_subject {
        if !original.is_empty() {
            subject = original;
        }
    }

    (subject, sender)
}

fn strip_forward_prefix(subject: &str) -> &str {
    let lower = subject.to_lowercase();
    for prefix in ["fwd:", "fw:"] {
        if lower.starts_with(prefix) {
            return subject[prefix.len()..].trim();
        }
    }
    subject
}

/// Lower-case, with every non-alphanumeric character replaced by `_`.
fn sanitize_id(value: &str) -> String {
    value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Plugin
// ---------------------------------------------------------------------------

/// Source plugin over [`EmailClient`].
pub struct EmailPlugin {
    source_id: String,
    config: Map<String, Value>,
}

impl EmailPlugin {
    pub fn new(source_id: &str, config: &Map<String, Value>) -> Result<Self> {
        Ok(Self {
            source_id: source_id.to_string(),
            config: config.clone(),
        })
    }

    fn client(&self) -> Result<EmailClient> {
        typed_config(&self.source_id, PLUGIN_TYPE, &self.config).map(EmailClient::new)
    }
}

#[async_trait]
impl SourcePlugin for EmailPlugin {
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
        let folder = client.config().folder.clone();
        let fallback_source = client
            .config()
            .name
            .clone()
            .unwrap_or_else(|| self.source_id.clone());

        let mut items = client.fetch_unread().await.map_err(|e| {
            ResearchError::plugin(&self.source_id, PLUGIN_TYPE, format!("fetch failed: {e}"))
        })?;

        for item in &mut items {
            if item.source.is_empty() {
                item.source = fallback_source.clone();
            }
            item.metadata
                .insert("plugin_source_id".into(), json!(self.source_id));
            item.metadata.insert("email_folder".into(), json!(folder));
        }

        info!(source_id = %self.source_id, count = items.len(), "fetched email content");
        Ok(items)
    }

    async fn test_connection(&self) -> TestResult {
        let client = match self.client() {
            Ok(client) => client,
            Err(e) => {
                return TestResult::failed(e.to_string())
                    .with_details(json!({ "source_id": self.source_id }));
            }
        };

        match client.check_connection().await {
            Ok(message_count) => TestResult::ok(
                format!("Email connection successful for {}", self.source_id),
                json!({
                    "server": client.config().server,
                    "username": client.config().username,
                    "folder": client.config().folder,
                    "message_count": message_count,
                    "source_id": self.source_id,
                }),
            ),
            Err(e) => {
                warn!(source_id = %self.source_id, error = %e, "email connection test failed");
                TestResult::failed(format!(
                    "Email connection test failed for {}: {e}",
                    self.source_id
                ))
                .with_details(json!({ "source_id": self.source_id }))
            }
        }
    }

    fn validate_config(&self, config: &Map<String, Value>) -> ValidationResult {
        validate_email_config(config)
    }

    fn source_info(&self) -> Map<String, Value> {
        let mut info = Map::new();
        info.insert("source_id".into(), json!(self.source_id));
        info.insert("plugin_type".into(), json!(PLUGIN_TYPE));
        info.insert(
            "config_keys".into(),
            json!(self.config.keys().collect::<Vec<_>>()),
        );
        info.insert(
            "server".into(),
            json!(non_empty_str(&self.config, "server").unwrap_or("Not configured")),
        );
        info.insert(
            "username".into(),
            json!(non_empty_str(&self.config, "username").unwrap_or("Not configured")),
        );
        info.insert(
            "folder".into(),
            json!(non_empty_str(&self.config, "folder").unwrap_or("INBOX")),
        );
        info.insert(
            "has_smtp".into(),
            json!(is_truthy(self.config.get("smtp_server"))),
        );
        info.insert(
            "has_notifications".into(),
            json!(is_truthy(self.config.get("notification_email"))),
        );
        info
    }

    fn config_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "server": {
                    "type": "string",
                    "title": "IMAP Server",
                    "default": "imap.gmail.com",
                },
                "port": { "type": "integer", "title": "IMAP Port", "default": 993 },
                "username": { "type": "string", "title": "Email Address", "format": "email" },
                "password": { "type": "string", "title": "Password", "format": "password" },
                "folder": { "type": "string", "title": "Folder", "default": "INBOX" },
            },
            "required": ["server", "username", "password"],
        })
    }
}

pub(crate) fn validate_email_config(config: &Map<String, Value>) -> ValidationResult {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    for field in ["server", "username", "password"] {
        if !is_truthy(config.get(field)) {
            errors.push(format!("Missing required field: {field}"));
        }
    }

    if let Some(server) = non_empty_str(config, "server") {
        if !(server.contains('.') && server.len() > 3) {
            errors.push("Server should be a valid hostname (e.g., imap.gmail.com)".into());
        }
    }

    if let Some(username) = non_empty_str(config, "username") {
        if !username.contains('@') {
            warnings.push("Username should typically be an email address".into());
        }
    }

    if !config.contains_key("folder") {
        warnings.push("No folder specified, will default to INBOX".into());
    }

    if config.contains_key("smtp_server") && !is_truthy(config.get("smtp_port")) {
        warnings.push("SMTP server specified but no SMTP port provided".into());
    }

    if let Some(notify) = non_empty_str(config, "notification_email") {
        if !notify.contains('@') {
            errors.push("Notification email must be a valid email address".into());
        }
    }

    ValidationResult::from_parts(errors, warnings)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
