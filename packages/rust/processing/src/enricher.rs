//! Link enrichment through the LinkPreview API with a local JSON cache.
//!
//! Cached previews are reused for 30 days. API calls are budgeted per clock
//! hour; links beyond the budget, or whose lookup fails, are returned as-is.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use chrono::{DateTime, Timelike, Utc};
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use url::Url;

use research_shared::{Link, ResearchError, Result};

/// Default LinkPreview endpoint.
pub const LINKPREVIEW_API_URL: &str = "https://api.linkpreview.net";

/// Free-tier request budget per hour.
const HOURLY_LIMIT: u32 = 60;

/// Cached previews older than this are refetched.
const CACHE_TTL_DAYS: i64 = 30;

/// User-Agent string for enrichment requests.
const USER_AGENT: &str = concat!("ResearchPipeline/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

/// One cached preview, keyed by URL in `link_cache.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CachedPreview {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub image: String,
    pub date_fetched: DateTime<Utc>,
}

impl CachedPreview {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        (now - self.date_fetched).num_days() < CACHE_TTL_DAYS
    }

    fn apply(&self, link: &mut Link) {
        if !self.title.is_empty() {
            link.title = self.title.clone();
        }
        if !self.description.is_empty() {
            link.description = Some(self.description.clone());
        }
        if !self.image.is_empty() {
            link.image_url = Some(self.image.clone());
        }
    }
}

/// Response body of the LinkPreview API.
#[derive(Debug, Deserialize)]
struct PreviewResponse {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    image: Option<String>,
}

#[derive(Debug)]
struct EnricherState {
    cache: BTreeMap<String, CachedPreview>,
    /// Start of the clock hour the counter belongs to.
    hour: DateTime<Utc>,
    requests_this_hour: u32,
}

// ---------------------------------------------------------------------------
// LinkEnricher
// ---------------------------------------------------------------------------

/// Adds titles, descriptions, and preview images to extracted links.
pub struct LinkEnricher {
    client: Client,
    api_key: Option<String>,
    api_url: String,
    cache_path: PathBuf,
    request_delay: Duration,
    state: Mutex<EnricherState>,
}

impl LinkEnricher {
    /// Create an enricher caching into `cache_dir/link_cache.json`.
    ///
    /// A missing or unreadable cache file starts an empty cache.
    pub fn new(api_key: Option<String>, cache_dir: &Path) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ResearchError::Network(format!("failed to build HTTP client: {e}")))?;

        let cache_path = cache_dir.join("link_cache.json");
        let cache = load_cache(&cache_path);

        Ok(Self {
            client,
            api_key: api_key.filter(|k| !k.is_empty()),
            api_url: LINKPREVIEW_API_URL.to_string(),
            cache_path,
            request_delay: Duration::from_secs(1),
            state: Mutex::new(EnricherState {
                cache,
                hour: current_hour(Utc::now()),
                requests_this_hour: 0,
            }),
        })
    }

    /// Point the enricher at a different API endpoint.
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    /// Pause between consecutive API calls.
    pub fn with_request_delay(mut self, delay: Duration) -> Self {
        self.request_delay = delay;
        self
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Number of cached previews.
    pub async fn cache_len(&self) -> usize {
        self.state.lock().await.cache.len()
    }

    /// Enrich up to `max_links` links. Never fails; the returned list holds at
    /// most `max_links` entries, enriched where possible.
    #[instrument(skip_all, fields(links = links.len(), max_links = max_links))]
    pub async fn enrich_links(&self, links: Vec<Link>, max_links: usize) -> Vec<Link> {
        let mut links: Vec<Link> = links.into_iter().take(max_links).collect();

        let Some(api_key) = self.api_key.as_deref() else {
            debug!("no LinkPreview API key, skipping enrichment");
            return links;
        };

        let mut state = self.state.lock().await;
        let now = Utc::now();
        let hour = current_hour(now);
        if hour != state.hour {
            state.hour = hour;
            state.requests_this_hour = 0;
        }
        if state.requests_this_hour >= HOURLY_LIMIT {
            warn!("LinkPreview hourly limit reached, skipping enrichment");
            return links;
        }

        let mut api_calls = 0u32;
        for link in links.iter_mut() {
            if let Some(cached) = state.cache.get(&link.url).filter(|c| c.is_fresh(now)) {
                cached.apply(link);
                continue;
            }

            if state.requests_this_hour + api_calls >= HOURLY_LIMIT {
                continue;
            }

            match self.fetch_preview(api_key, &link.url).await {
                Ok(preview) => {
                    preview.apply(link);
                    state.cache.insert(link.url.clone(), preview);
                    api_calls += 1;
                    if !self.request_delay.is_zero() {
                        tokio::time::sleep(self.request_delay).await;
                    }
                }
                Err(e) => {
                    warn!(url = %link.url, error = %e, "link enrichment failed");
                }
            }
        }

        state.requests_this_hour += api_calls;
        if api_calls > 0 {
            if let Err(e) = save_cache(&self.cache_path, &state.cache) {
                warn!(path = %self.cache_path.display(), error = %e, "failed to save link cache");
            }
            info!(
                api_calls,
                used_this_hour = state.requests_this_hour,
                "links enriched"
            );
        }

        links
    }

    /// Probe the API with a known URL.
    pub async fn test_api(&self) -> bool {
        let Some(api_key) = self.api_key.as_deref() else {
            return false;
        };
        match self.fetch_preview(api_key, "https://example.com").await {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "LinkPreview API test failed");
                false
            }
        }
    }

    async fn fetch_preview(&self, api_key: &str, url: &str) -> Result<CachedPreview> {
        debug!(%url, "requesting link preview");

        let response = self
            .client
            .get(&self.api_url)
            .query(&[("key", api_key), ("q", url)])
            .send()
            .await
            .map_err(|e| ResearchError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ResearchError::Network(format!(
                "LinkPreview HTTP {status} for {url}"
            )));
        }

        let body: PreviewResponse = response
            .json()
            .await
            .map_err(|e| ResearchError::parse(format!("LinkPreview response for {url}: {e}")))?;

        Ok(CachedPreview {
            title: body.title.unwrap_or_default().trim().to_string(),
            description: body.description.unwrap_or_default().trim().to_string(),
            image: body.image.unwrap_or_default(),
            date_fetched: Utc::now(),
        })
    }
}

fn current_hour(now: DateTime<Utc>) -> DateTime<Utc> {
    now.with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(now)
}

fn load_cache(path: &Path) -> BTreeMap<String, CachedPreview> {
    let Ok(content) = std::fs::read_to_string(path) else {
        return BTreeMap::new();
    };
    serde_json::from_str(&content).unwrap_or_else(|e| {
        warn!(path = %path.display(), error = %e, "ignoring unreadable link cache");
        BTreeMap::new()
    })
}

fn save_cache(path: &Path, cache: &BTreeMap<String, CachedPreview>) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| ResearchError::io(dir, e))?;
    }
    let json = serde_json::to_string_pretty(cache)
        .map_err(|e| ResearchError::parse(format!("link cache: {e}")))?;
    std::fs::write(path, json).map_err(|e| ResearchError::io(path, e))
}

// ---------------------------------------------------------------------------
// Prioritization
// ---------------------------------------------------------------------------

/// Order links by likely substance (articles/research first) and drop
/// account, subscription, image, and newsletter-infrastructure links.
pub fn prioritize_links(links: Vec<Link>) -> Vec<Link> {
    static UTILITY_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"/(?:unsubscribe|login|signup|account|profile|subscribe|email-preferences)(?:$|/)")
            .expect("valid regex")
    });
    static IMAGE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\.(?:gif|jpe?g|png|svg)(?:$|\?)").expect("valid regex"));
    static ARTICLE_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"/(?:article|post|blog|news|story|report|research)/").expect("valid regex")
    });

    let mut high = Vec::new();
    let mut medium = Vec::new();
    let mut low = Vec::new();

    for link in links {
        let Ok(parsed) = Url::parse(&link.url) else {
            continue;
        };
        let host = parsed.host_str().unwrap_or("").to_lowercase();
        let path = parsed.path().to_lowercase();

        if UTILITY_RE.is_match(&path)
            || IMAGE_RE.is_match(&path)
            || path.contains("/track/")
            || path.contains("/pixel/")
            || ["passport.online", "mailchimp.com", "list-manage.com"]
                .iter()
                .any(|d| host.contains(d))
        {
            continue;
        }

        if ARTICLE_RE.is_match(&path)
            || ["arxiv.org", "github.com", ".gov", ".edu"]
                .iter()
                .any(|d| host.contains(d))
        {
            high.push(link);
        } else if path.split('/').count() >= 3
            || ["wsj.com", "nytimes.com", "bloomberg.com", "reuters.com"]
                .iter()
                .any(|d| host.contains(d))
        {
            medium.push(link);
        } else {
            low.push(link);
        }
    }

    high.extend(medium);
    high.extend(low);
    high
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn link(url: &str) -> Link {
        Link {
            url: url.to_string(),
            title: "Original".to_string(),
            ..Default::default()
        }
    }

    fn temp_cache_dir() -> PathBuf {
        std::env::temp_dir().join(format!("research-enrich-{}", Uuid::now_v7()))
    }

    #[tokio::test]
    async fn without_key_links_pass_through_capped() {
        let dir = temp_cache_dir();
        let enricher = LinkEnricher::new(None, &dir).unwrap();
        let links = vec![link("https://a.example.com/x"), link("https://b.example.com/y")];

        let out = enricher.enrich_links(links, 1).await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].title, "Original");
        assert!(!enricher.test_api().await);
    }

    #[tokio::test]
    async fn enriches_and_caches_previews() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::query_param("key", "test-key"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_json(
                serde_json::json!({
                    "title": "  Real Title  ",
                    "description": "A description",
                    "image": "https://img.example.com/1.png",
                    "url": "https://news.example.com/story"
                }),
            ))
            .expect(1)
            .mount(&server)
            .await;

        let dir = temp_cache_dir();
        let enricher = LinkEnricher::new(Some("test-key".into()), &dir)
            .unwrap()
            .with_api_url(server.uri())
            .with_request_delay(Duration::ZERO);

        let out = enricher
            .enrich_links(vec![link("https://news.example.com/story")], 10)
            .await;
        assert_eq!(out[0].title, "Real Title");
        assert_eq!(out[0].description.as_deref(), Some("A description"));
        assert_eq!(out[0].image_url.as_deref(), Some("https://img.example.com/1.png"));
        assert!(dir.join("link_cache.json").exists());

        // Second pass is served from the cache (mock expects exactly one call).
        let again = enricher
            .enrich_links(vec![link("https://news.example.com/story")], 10)
            .await;
        assert_eq!(again[0].title, "Real Title");
        assert_eq!(enricher.cache_len().await, 1);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn api_failure_keeps_original_link() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(wiremock::ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let dir = temp_cache_dir();
        let enricher = LinkEnricher::new(Some("k".into()), &dir)
            .unwrap()
            .with_api_url(server.uri())
            .with_request_delay(Duration::ZERO);

        let out = enricher
            .enrich_links(vec![link("https://news.example.com/story")], 5)
            .await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].title, "Original");
        assert!(out[0].description.is_none());
    }

    #[test]
    fn prioritize_orders_by_substance() {
        let links = vec![
            link("https://example.com/"),
            link("https://www.reuters.com/markets"),
            link("https://example.com/login"),
            link("https://arxiv.org/abs/2401.00001"),
            link("https://cdn.example.com/logo.png"),
        ];

        let ordered = prioritize_links(links);
        let urls: Vec<&str> = ordered.iter().map(|l| l.url.as_str()).collect();
        assert_eq!(
            urls,
            [
                "https://arxiv.org/abs/2401.00001",
                "https://www.reuters.com/markets",
                "https://example.com/",
            ]
        );
    }
}
