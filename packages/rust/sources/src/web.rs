//! Web source: scrape articles from list pages or fixed URLs.
//!
//! HTML is parsed with `scraper` inside synchronous helpers only; parsed
//! documents never live across an `.await`.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use research_processing::clean_email_content;
use research_shared::{ContentItem, ResearchError, Result, TestResult, ValidationResult};
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::plugin::{
    SourcePlugin, as_integer, as_number, is_http_url, is_truthy, non_empty_str,
    number_or_string, typed_config,
};

const PLUGIN_TYPE: &str = "web";

/// Browser-like user agent; some sites refuse bare clients.
const USER_AGENT: &str = "Mozilla/5.0 (compatible; ResearchBot/1.0)";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Titles this short are usually site chrome, not headlines.
const MIN_TITLE_LEN: usize = 6;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrapingMode {
    #[default]
    ArticleList,
    DirectContent,
}

impl ScrapingMode {
    fn as_str(self) -> &'static str {
        match self {
            Self::ArticleList => "article_list",
            Self::DirectContent => "direct_content",
        }
    }
}

/// A CSS selector field that accepts either one string or a list.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "OneOrMany")]
pub struct SelectorList(pub Vec<String>);

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl From<OneOrMany> for SelectorList {
    fn from(value: OneOrMany) -> Self {
        match value {
            OneOrMany::One(s) => Self(vec![s]),
            OneOrMany::Many(v) => Self(v),
        }
    }
}

impl SelectorList {
    fn of(selectors: &[&str]) -> Self {
        Self(selectors.iter().map(|s| s.to_string()).collect())
    }

    /// Parsed selectors; invalid ones are logged and skipped.
    fn parsed(&self) -> Vec<Selector> {
        self.0
            .iter()
            .filter_map(|s| match Selector::parse(s) {
                Ok(sel) => Some(sel),
                Err(e) => {
                    warn!(selector = %s, error = %e, "invalid CSS selector");
                    None
                }
            })
            .collect()
    }
}

/// Typed view of a web source's config map.
#[derive(Debug, Clone, Deserialize)]
pub struct WebSourceConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub scraping_mode: ScrapingMode,
    #[serde(default)]
    pub list_page: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_list_selector")]
    pub list_selector: String,
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default = "default_max_articles", deserialize_with = "number_or_string")]
    pub max_articles: usize,
    /// Seconds between article requests.
    #[serde(default = "default_rate_limit", deserialize_with = "number_or_string")]
    pub rate_limit_delay: f64,
    #[serde(default = "default_title_selectors")]
    pub title_selector: SelectorList,
    #[serde(default = "default_content_selectors")]
    pub content_selector: SelectorList,
    #[serde(default = "default_exclude_selectors")]
    pub exclude_selectors: SelectorList,
    #[serde(default = "default_author_selectors")]
    pub author_selector: SelectorList,
    #[serde(default = "default_date_selectors")]
    pub date_selector: SelectorList,
    #[serde(default = "default_min_content_length")]
    pub min_content_length: usize,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub required_keywords: Vec<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

fn default_list_selector() -> String {
    "a".into()
}
fn default_max_articles() -> usize {
    5
}
fn default_rate_limit() -> f64 {
    2.0
}

/// Upper bound on `rate_limit_delay`, in seconds.
const MAX_RATE_LIMIT_DELAY: f64 = 300.0;
fn default_title_selectors() -> SelectorList {
    SelectorList::of(&["h1", "title", ".article-title"])
}
fn default_content_selectors() -> SelectorList {
    SelectorList::of(&[".article-content", ".post-content", "article", ".content"])
}
fn default_exclude_selectors() -> SelectorList {
    SelectorList::of(&[".advertisement", ".ads", ".sidebar", ".comments"])
}
fn default_author_selectors() -> SelectorList {
    SelectorList::of(&[".author", ".byline", "[rel=\"author\"]"])
}
fn default_date_selectors() -> SelectorList {
    SelectorList::of(&["time[datetime]", ".publish-date", ".date"])
}
fn default_min_content_length() -> usize {
    100
}

impl WebSourceConfig {
    fn list_url(&self) -> Option<&str> {
        self.list_page
            .as_deref()
            .or(self.base_url.as_deref())
            .filter(|u| !u.is_empty())
    }

    /// First URL a connection test should hit.
    fn probe_url(&self) -> Option<&str> {
        self.list_url()
            .or_else(|| self.urls.first().map(String::as_str))
    }

    /// Delay clamped to `0..=MAX_RATE_LIMIT_DELAY`; NaN falls back to the default.
    fn rate_limit(&self) -> Duration {
        Duration::try_from_secs_f64(self.rate_limit_delay.clamp(0.0, MAX_RATE_LIMIT_DELAY))
            .unwrap_or_else(|_| Duration::from_secs_f64(default_rate_limit()))
    }

    /// Keep articles that are long enough and match the topic filters.
    fn accepts(&self, title: &str, content: &str) -> bool {
        if content.len() < self.min_content_length {
            return false;
        }
        let haystack = format!("{title} {content}").to_lowercase();
        let matches_any = |terms: &[String]| {
            terms.is_empty() || terms.iter().any(|t| haystack.contains(&t.to_lowercase()))
        };
        matches_any(&self.categories) && matches_any(&self.required_keywords)
    }
}

// ---------------------------------------------------------------------------
// HTML extraction
// ---------------------------------------------------------------------------

/// Fields scraped from one article page.
#[derive(Debug, Clone, PartialEq)]
struct ScrapedArticle {
    title: String,
    content: String,
    author: Option<String>,
    date: Option<String>,
}

/// Absolute article URLs from a list page.
fn article_links(html: &str, list_selector: &str, base: &Url, max: usize) -> Vec<String> {
    let Ok(selector) = Selector::parse(list_selector) else {
        warn!(selector = %list_selector, "invalid list selector");
        return Vec::new();
    };
    let doc = Html::parse_document(html);

    let mut links: Vec<String> = Vec::new();
    for element in doc.select(&selector).take(max) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        match base.join(href) {
            Ok(url) if matches!(url.scheme(), "http" | "https") && url.host().is_some() => {
                links.push(url.to_string());
            }
            _ => debug!(href, "skipping unusable article link"),
        }
    }
    links
}

fn scrape_article(html: &str, url: &Url, config: &WebSourceConfig) -> ScrapedArticle {
    let doc = Html::parse_document(html);

    let excluded: Vec<ElementRef<'_>> = config
        .exclude_selectors
        .parsed()
        .iter()
        .flat_map(|sel| doc.select(sel).collect::<Vec<_>>())
        .collect();

    let title = config
        .title_selector
        .parsed()
        .iter()
        .filter_map(|sel| doc.select(sel).next())
        .map(|el| el.text().collect::<String>().trim().to_string())
        .find(|t| t.len() >= MIN_TITLE_LEN)
        .unwrap_or_else(|| format!("Article from {}", url.host_str().unwrap_or("unknown")));

    let mut content = config
        .content_selector
        .parsed()
        .iter()
        .map(|sel| join_texts(doc.select(sel), &excluded))
        .find(|text| !text.is_empty())
        .unwrap_or_default();
    if content.is_empty() {
        if let Ok(p) = Selector::parse("p") {
            content = join_texts(doc.select(&p), &excluded);
        }
    }

    let author = config
        .author_selector
        .parsed()
        .iter()
        .filter_map(|sel| doc.select(sel).next())
        .map(|el| el.text().collect::<String>().trim().to_string())
        .find(|a| !a.is_empty());

    let date = config
        .date_selector
        .parsed()
        .iter()
        .filter_map(|sel| doc.select(sel).next())
        .find_map(|el| {
            el.value()
                .attr("datetime")
                .map(str::to_string)
                .or_else(|| Some(el.text().collect::<String>().trim().to_string()))
                .filter(|d| !d.is_empty())
        });

    ScrapedArticle {
        title,
        content,
        author,
        date,
    }
}

/// Non-empty element texts joined by blank lines, skipping excluded subtrees.
fn join_texts<'a>(
    elements: impl Iterator<Item = ElementRef<'a>>,
    excluded: &[ElementRef<'a>],
) -> String {
    elements
        .filter(|el| !excluded.iter().any(|ex| ex.id() == el.id()))
        .map(|el| visible_text(el, excluded))
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn visible_text(element: ElementRef<'_>, excluded: &[ElementRef<'_>]) -> String {
    let mut out = String::new();
    for node in element.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        if node
            .ancestors()
            .any(|a| excluded.iter().any(|ex| ex.id() == a.id()))
        {
            continue;
        }
        out.push_str(text);
    }
    out.trim().to_string()
}

/// How many elements `selector` matches in `html`.
fn count_matches(html: &str, selector: &str) -> usize {
    match Selector::parse(selector) {
        Ok(sel) => Html::parse_document(html).select(&sel).count(),
        Err(_) => 0,
    }
}

// ---------------------------------------------------------------------------
// Plugin
// ---------------------------------------------------------------------------

/// Source plugin that scrapes web pages.
pub struct WebPlugin {
    source_id: String,
    config: Map<String, Value>,
}

impl WebPlugin {
    pub fn new(source_id: &str, config: &Map<String, Value>) -> Result<Self> {
        Ok(Self {
            source_id: source_id.to_string(),
            config: config.clone(),
        })
    }

    fn settings(&self) -> Result<WebSourceConfig> {
        typed_config(&self.source_id, PLUGIN_TYPE, &self.config)
    }

    fn plugin_error(&self, message: impl Into<String>) -> ResearchError {
        ResearchError::plugin(&self.source_id, PLUGIN_TYPE, message)
    }

    fn http_client(&self, settings: &WebSourceConfig) -> Result<Client> {
        let mut headers = HeaderMap::new();
        for (name, value) in &settings.headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => warn!(source_id = %self.source_id, header = %name, "skipping invalid header"),
            }
        }

        Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ResearchError::Network(format!("HTTP client build: {e}")))
    }

    async fn get_text(&self, client: &Client, url: &str) -> Result<String> {
        client
            .get(url)
            .send()
            .await
            .map_err(|e| ResearchError::Network(format!("GET {url}: {e}")))?
            .error_for_status()
            .map_err(|e| ResearchError::Network(format!("GET {url}: {e}")))?
            .text()
            .await
            .map_err(|e| ResearchError::Network(format!("reading {url}: {e}")))
    }

    async fn fetch_article(
        &self,
        client: &Client,
        settings: &WebSourceConfig,
        url: &str,
        index: usize,
    ) -> Result<Option<ContentItem>> {
        debug!(url, "fetching article");
        let html = self.get_text(client, url).await?;
        let parsed_url =
            Url::parse(url).map_err(|e| ResearchError::parse(format!("bad URL {url}: {e}")))?;
        let article = scrape_article(&html, &parsed_url, settings);

        if !settings.accepts(&article.title, &article.content) {
            debug!(url, "article filtered out");
            return Ok(None);
        }

        let content = clean_email_content(&article.content);
        let now = chrono::Local::now();

        let mut metadata = Map::new();
        metadata.insert("plugin_source_id".into(), json!(self.source_id));
        metadata.insert("author".into(), json!(article.author));
        metadata.insert("scraped_at".into(), json!(now.to_rfc3339()));
        metadata.insert("content_length".into(), json!(content.len()));
        metadata.insert(
            "scraping_mode".into(),
            json!(settings.scraping_mode.as_str()),
        );

        Ok(Some(ContentItem {
            id: format!("{}_{}", self.source_id, index + 1),
            title: article.title,
            content,
            url: url.to_string(),
            date: article.date.unwrap_or_else(|| now.to_rfc3339()),
            source: settings
                .name
                .clone()
                .unwrap_or_else(|| self.source_id.clone()),
            source_type: PLUGIN_TYPE.into(),
            metadata,
            ..Default::default()
        }))
    }

    async fn article_urls(&self, client: &Client, settings: &WebSourceConfig) -> Result<Vec<String>> {
        match settings.scraping_mode {
            ScrapingMode::DirectContent => {
                if settings.urls.is_empty() {
                    return Err(
                        self.plugin_error("No URLs specified for direct content fetching")
                    );
                }
                Ok(settings.urls.clone())
            }
            ScrapingMode::ArticleList => {
                let list_url = settings
                    .list_url()
                    .ok_or_else(|| self.plugin_error("No list_page or base_url specified"))?;
                let base = Url::parse(list_url)
                    .map_err(|e| self.plugin_error(format!("bad list URL {list_url}: {e}")))?;

                debug!(url = %list_url, "fetching article list");
                let html = self.get_text(client, list_url).await?;
                let links = article_links(
                    &html,
                    &settings.list_selector,
                    &base,
                    settings.max_articles,
                );
                debug!(count = links.len(), "article links found");
                Ok(links)
            }
        }
    }

    async fn run_test(&self) -> Result<TestResult> {
        let settings = self.settings()?;
        let Some(test_url) = settings.probe_url().map(str::to_string) else {
            return Ok(TestResult::failed("No URL configured for testing")
                .with_details(json!({ "source_id": self.source_id })));
        };

        let client = self.http_client(&settings)?;
        let response = client
            .get(&test_url)
            .send()
            .await
            .map_err(|e| ResearchError::Network(format!("GET {test_url}: {e}")))?
            .error_for_status()
            .map_err(|e| ResearchError::Network(format!("GET {test_url}: {e}")))?;
        let status = response.status().as_u16();
        let html = response
            .text()
            .await
            .map_err(|e| ResearchError::Network(format!("reading {test_url}: {e}")))?;

        let mut selector_tests = Map::new();
        for key in ["list_selector", "title_selector", "content_selector"] {
            if let Some(selector) = non_empty_str(&self.config, key) {
                selector_tests.insert(key.into(), json!(count_matches(&html, selector)));
            }
        }

        Ok(TestResult::ok(
            format!("Web scraping connection successful for {}", self.source_id),
            json!({
                "test_url": test_url,
                "response_size": html.len(),
                "status_code": status,
                "selector_tests": selector_tests,
                "source_id": self.source_id,
            }),
        ))
    }
}

#[async_trait]
impl SourcePlugin for WebPlugin {
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
        let settings = self.settings()?;
        let client = self.http_client(&settings)?;
        let urls = self
            .article_urls(&client, &settings)
            .await
            .map_err(|e| match e {
                ResearchError::Plugin { .. } => e,
                other => self.plugin_error(format!("fetch failed: {other}")),
            })?;

        let mut articles = Vec::new();
        for (index, url) in urls.iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(settings.rate_limit()).await;
            }
            match self.fetch_article(&client, &settings, url, index).await {
                Ok(Some(item)) => articles.push(item),
                Ok(None) => {}
                Err(e) => warn!(source_id = %self.source_id, url = %url, error = %e, "article failed"),
            }
        }

        info!(source_id = %self.source_id, count = articles.len(), "fetched web articles");
        Ok(articles)
    }

    async fn test_connection(&self) -> TestResult {
        match self.run_test().await {
            Ok(result) => result,
            Err(e) => {
                warn!(source_id = %self.source_id, error = %e, "web connection test failed");
                TestResult::failed(format!(
                    "Web scraping connection test failed for {}: {e}",
                    self.source_id
                ))
                .with_details(json!({ "source_id": self.source_id }))
            }
        }
    }

    fn validate_config(&self, config: &Map<String, Value>) -> ValidationResult {
        validate_web_config(config)
    }

    fn source_info(&self) -> Map<String, Value> {
        let text = |key: &str| non_empty_str(&self.config, key).unwrap_or("Not configured");
        let mut info = Map::new();
        info.insert("source_id".into(), json!(self.source_id));
        info.insert("plugin_type".into(), json!(PLUGIN_TYPE));
        info.insert(
            "config_keys".into(),
            json!(self.config.keys().collect::<Vec<_>>()),
        );
        info.insert(
            "scraping_mode".into(),
            json!(non_empty_str(&self.config, "scraping_mode").unwrap_or("article_list")),
        );
        info.insert("base_url".into(), json!(text("base_url")));
        info.insert("list_page".into(), json!(text("list_page")));
        info.insert(
            "max_articles".into(),
            json!(self.config.get("max_articles").and_then(as_integer).unwrap_or(5)),
        );
        info.insert(
            "rate_limit_delay".into(),
            json!(self.config.get("rate_limit_delay").and_then(as_number).unwrap_or(2.0)),
        );
        info.insert(
            "has_content_filtering".into(),
            json!(
                is_truthy(self.config.get("categories"))
                    || is_truthy(self.config.get("required_keywords"))
            ),
        );
        info
    }

    fn config_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "base_url": { "type": "string", "title": "Website URL", "format": "uri" },
                "scraping_mode": {
                    "type": "string",
                    "enum": ["article_list", "direct_content"],
                    "default": "article_list",
                },
                "list_selector": { "type": "string", "default": "a" },
                "title_selector": { "type": "string", "default": "h1" },
                "content_selector": { "type": "string", "default": ".content" },
                "urls": { "type": "array", "items": { "type": "string", "format": "uri" } },
                "max_articles": { "type": "integer", "default": 5, "minimum": 1 },
                "rate_limit_delay": {
                    "type": "number",
                    "default": 2.0,
                    "minimum": 0,
                    "maximum": MAX_RATE_LIMIT_DELAY,
                },
            },
            "required": [],
        })
    }
}

pub(crate) fn validate_web_config(config: &Map<String, Value>) -> ValidationResult {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    let mode = config
        .get("scraping_mode")
        .and_then(Value::as_str)
        .unwrap_or("article_list");

    match mode {
        "article_list" => {
            if !is_truthy(config.get("list_page")) && !is_truthy(config.get("base_url")) {
                errors.push(
                    "Must specify either 'list_page' or 'base_url' for article_list mode".into(),
                );
            }
            if !is_truthy(config.get("list_selector")) {
                errors.push("Must specify 'list_selector' for article_list mode".into());
            }
        }
        "direct_content" => match config.get("urls") {
            None => errors.push("Must specify 'urls' list for direct_content mode".into()),
            Some(Value::Array(urls)) if urls.is_empty() => {
                errors.push("'urls' list cannot be empty".into())
            }
            Some(Value::Array(_)) => {}
            Some(_) => errors.push("'urls' must be a list".into()),
        },
        other => errors.push(format!("Unknown scraping_mode: {other}")),
    }

    let mut urls_to_check: Vec<&Value> = Vec::new();
    for key in ["list_page", "base_url"] {
        if let Some(value) = config.get(key).filter(|v| is_truthy(Some(v))) {
            urls_to_check.push(value);
        }
    }
    if let Some(Value::Array(urls)) = config.get("urls") {
        urls_to_check.extend(urls.iter());
    }
    for url in urls_to_check {
        match url.as_str() {
            None => errors.push(format!("URL must be a string: {url}")),
            Some(u) if !is_http_url(u) => {
                errors.push(format!("URL must start with http:// or https://: {u}"))
            }
            Some(_) => {}
        }
    }

    match config.get("max_articles").map(as_integer) {
        None => {}
        Some(Some(n)) if n > 20 => {
            warnings.push("max_articles > 20 may slow down processing significantly".into())
        }
        Some(Some(n)) if n >= 1 => {}
        Some(_) => errors.push("max_articles must be a positive integer".into()),
    }

    match config.get("rate_limit_delay").map(as_number) {
        None => {}
        Some(Some(d)) if !d.is_finite() || d < 0.0 => {
            errors.push("rate_limit_delay must be a non-negative number".into())
        }
        Some(Some(d)) if d > MAX_RATE_LIMIT_DELAY => errors.push(format!(
            "rate_limit_delay must be at most {MAX_RATE_LIMIT_DELAY} seconds"
        )),
        Some(Some(d)) if d < 1.0 => {
            warnings.push("rate_limit_delay < 1.0 may trigger anti-bot measures".into())
        }
        Some(Some(_)) => {}
        Some(None) => errors.push("rate_limit_delay must be a non-negative number".into()),
    }

    for field in [
        "list_selector",
        "title_selector",
        "content_selector",
        "author_selector",
    ] {
        match config.get(field) {
            None | Some(Value::String(_)) | Some(Value::Array(_)) => {}
            Some(_) => errors.push(format!("{field} must be a string or list of strings")),
        }
    }

    ValidationResult::from_parts(errors, warnings)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn config(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    const ARTICLE: &str = r#"<html><head><title>Site</title></head><body>
        <h1>Chip export rules tighten again</h1>
        <span class="byline">Dana Reyes</span>
        <time datetime="2025-03-02T09:00:00Z">March 2</time>
        <article>
          <p>Regulators widened the list of restricted accelerators on Monday, covering several mid-range parts.</p>
          <div class="ads"><p>Buy our newsletter bundle today!</p></div>
          <p>Vendors expect revenue impact in the second half of the year.</p>
        </article>
    </body></html>"#;

    #[test]
    fn scrape_article_extracts_fields_and_skips_excluded() {
        let settings: WebSourceConfig = serde_json::from_value(json!({})).unwrap();
        let url = Url::parse("https://news.example/chips").unwrap();
        let article = scrape_article(ARTICLE, &url, &settings);

        assert_eq!(article.title, "Chip export rules tighten again");
        assert_eq!(article.author.as_deref(), Some("Dana Reyes"));
        assert_eq!(article.date.as_deref(), Some("2025-03-02T09:00:00Z"));
        assert!(article.content.contains("restricted accelerators"));
        assert!(!article.content.contains("newsletter bundle"));
    }

    #[test]
    fn short_titles_fall_back_to_host() {
        let settings: WebSourceConfig =
            serde_json::from_value(json!({ "title_selector": "h2" })).unwrap();
        let url = Url::parse("https://blog.example/post").unwrap();
        let article = scrape_article("<html><body><h2>Hi</h2></body></html>", &url, &settings);
        assert_eq!(article.title, "Article from blog.example");
    }

    #[test]
    fn article_links_are_absolute_and_capped() {
        let html = r#"<ul>
            <li><a class="post" href="/a">A</a></li>
            <li><a class="post" href="https://other.example/b">B</a></li>
            <li><a class="post" href="mailto:x@example.com">C</a></li>
            <li><a class="post" href="/d">D</a></li>
        </ul>"#;
        let base = Url::parse("https://site.example/blog/").unwrap();
        let links = article_links(html, "a.post", &base, 3);
        assert_eq!(
            links,
            vec![
                "https://site.example/a".to_string(),
                "https://other.example/b".to_string(),
            ]
        );
    }

    #[test]
    fn filters_apply_length_and_keywords() {
        let settings: WebSourceConfig = serde_json::from_value(json!({
            "min_content_length": 10,
            "required_keywords": ["GPU"],
        }))
        .unwrap();
        assert!(settings.accepts("GPU prices", "Prices fell sharply this week."));
        assert!(!settings.accepts("Weather", "Rain is expected this week."));
        assert!(!settings.accepts("GPU", "short"));
    }

    #[tokio::test]
    async fn article_list_mode_fetches_linked_articles() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/news"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_string(
                r#"<html><body><a class="story" href="/news/chips">Chips</a></body></html>"#,
            ))
            .mount(&server)
            .await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/news/chips"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_string(ARTICLE))
            .mount(&server)
            .await;

        let plugin = WebPlugin::new(
            "tech_news",
            &config(json!({
                "name": "Tech News",
                "list_page": format!("{}/news", server.uri()),
                "list_selector": "a.story",
                "rate_limit_delay": 0,
            })),
        )
        .unwrap();
        let items = plugin.fetch_content().await.unwrap();

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].source, "Tech News");
        assert_eq!(items[0].source_type, "web");
        assert_eq!(items[0].id, "tech_news_1");
        assert_eq!(items[0].url, format!("{}/news/chips", server.uri()));
        assert_eq!(items[0].metadata["author"], json!("Dana Reyes"));
    }

    #[tokio::test]
    async fn direct_mode_without_urls_is_a_plugin_error() {
        let plugin = WebPlugin::new("w", &config(json!({ "scraping_mode": "direct_content" })))
            .unwrap();
        let err = plugin.fetch_content().await.unwrap_err();
        assert!(matches!(err, ResearchError::Plugin { .. }));
    }

    #[tokio::test]
    async fn test_connection_counts_selector_matches() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_string(
                r#"<html><body><a class="s" href="/1">1</a><a class="s" href="/2">2</a></body></html>"#,
            ))
            .mount(&server)
            .await;

        let plugin = WebPlugin::new(
            "w",
            &config(json!({ "base_url": server.uri(), "list_selector": "a.s" })),
        )
        .unwrap();
        let result = plugin.test_connection().await;

        assert!(result.success);
        assert_eq!(result.details.unwrap()["selector_tests"]["list_selector"], json!(2));
    }

    #[test]
    fn validation_rules() {
        let ok = validate_web_config(&config(json!({
            "list_page": "https://site.example/news",
            "list_selector": "a.story",
        })));
        assert!(ok.valid);

        let missing = validate_web_config(&config(json!({ "scraping_mode": "article_list" })));
        assert_eq!(missing.errors.len(), 2);

        let direct = validate_web_config(&config(json!({
            "scraping_mode": "direct_content",
            "urls": ["ftp://files.example/x"],
            "max_articles": 25,
            "rate_limit_delay": 0.5,
        })));
        assert_eq!(direct.errors.len(), 1);
        assert_eq!(direct.warnings.len(), 2);

        let unknown = validate_web_config(&config(json!({ "scraping_mode": "crawl" })));
        assert!(unknown.errors[0].contains("Unknown scraping_mode"));
    }

    #[test]
    fn oversized_or_non_finite_delays_are_rejected() {
        for delay in [json!(1e30), json!(301), json!("inf"), json!("NaN")] {
            let result = validate_web_config(&config(json!({
                "scraping_mode": "direct_content",
                "urls": ["https://a.example/1", "https://a.example/2"],
                "rate_limit_delay": delay,
            })));
            assert!(!result.valid, "accepted rate_limit_delay {delay}");
        }

        let capped = validate_web_config(&config(json!({
            "scraping_mode": "direct_content",
            "urls": ["https://a.example/1"],
            "rate_limit_delay": 300,
        })));
        assert!(capped.valid);
    }

    #[test]
    fn rate_limit_delay_is_clamped_when_building_the_pause() {
        let delay_for = |value: Value| {
            let settings: WebSourceConfig =
                serde_json::from_value(json!({ "rate_limit_delay": value })).unwrap();
            settings.rate_limit()
        };
        assert_eq!(delay_for(json!(1e30)), Duration::from_secs(300));
        assert_eq!(delay_for(json!("inf")), Duration::from_secs(300));
        assert_eq!(delay_for(json!("NaN")), Duration::from_secs(2));
        assert_eq!(delay_for(json!(-4)), Duration::ZERO);
        assert_eq!(delay_for(json!(1.5)), Duration::from_millis(1500));
    }
}
