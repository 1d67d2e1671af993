//! Link extraction from newsletter and podcast text.
//!
//! Finds http(s) URLs, strips tracking parameters, drops ad/tracking/utility
//! links, derives a title from the surrounding text, and de-duplicates.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use research_shared::Link;

/// Domain fragments that mark ad servers and trackers.
const AD_DOMAINS: &[&str] = &[
    "doubleclick.net",
    "googleadservices.com",
    "google-analytics.com",
    "facebook.com/tr",
    "linkedin.com/pixel",
    "ads.twitter.com",
    "amazon-adsystem.com",
    "adservice.google",
    "fastclick.net",
    "clicktrack",
    "tracking",
    "track.",
    "pixel.",
    "beacon.",
    "analytics.",
    "telemetry.",
    "mailchimp.com/track",
    "list-manage.com/track",
    "ads.",
];

/// Query parameter prefixes removed from every URL.
const TRACKING_PARAMS: &[&str] = &[
    "utm_", "ref_", "mc_", "fb_", "fbclid", "yclid", "gclid", "_hsenc", "_hsmi", "cmpid", "cid",
    "sid",
];

/// Longest URL kept; longer ones are almost always tracking redirects.
const MAX_URL_LEN: usize = 500;

// ---------------------------------------------------------------------------
// LinkExtractor
// ---------------------------------------------------------------------------

/// Stateless link extractor.
#[derive(Debug, Clone, Default)]
pub struct LinkExtractor;

impl LinkExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Extract meaningful links from `text`, in order of first appearance.
    pub fn extract_links(&self, text: &str) -> Vec<Link> {
        static URL_RE: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(r#"https?://[^\s)\]}>"']+"#).expect("valid regex")
        });

        let content = prepare_content(text);
        let mut seen = HashSet::new();
        let mut links = Vec::new();

        for m in URL_RE.find_iter(&content) {
            // Only URLs that start a token or follow an opening parenthesis.
            let preceded_ok = content[..m.start()]
                .chars()
                .next_back()
                .is_none_or(|c| c.is_whitespace() || c == '(');
            if !preceded_ok {
                continue;
            }

            let raw = m.as_str().trim_end_matches(['.', ',', ';', ':', '!', '?']);
            let Some(clean) = strip_tracking_params(raw) else {
                continue;
            };
            if should_skip(&clean) {
                continue;
            }

            let key = normalize_url(&clean);
            if !seen.insert(key) {
                continue;
            }

            let context_start = floor_char_boundary(&content, m.start().saturating_sub(200));
            let context_end = ceil_char_boundary(&content, (m.end() + 50).min(content.len()));
            let context = &content[context_start..context_end];

            let title = title_from_context(context, raw)
                .filter(|t| t.len() > 3 && t.len() < 200)
                .unwrap_or_else(|| title_from_url(&clean));

            links.push(Link {
                url: clean,
                title,
                ..Default::default()
            });
        }

        links
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Drop unsubscribe footers, collapse whitespace, and decode common entities.
fn prepare_content(text: &str) -> String {
    static FOOTER_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?is)unsubscribe.*$").expect("valid regex"));

    let text = FOOTER_RE.replace(text, "");
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
}

fn is_tracking_param(name: &str) -> bool {
    TRACKING_PARAMS.iter().any(|p| name.starts_with(p))
}

/// Remove tracking query parameters. `None` when the URL does not parse.
pub fn strip_tracking_params(raw: &str) -> Option<String> {
    let mut url = Url::parse(raw).ok()?;

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }

    Some(url.to_string())
}

/// Whether a (cleaned) URL points at ads, trackers, images, or list management.
fn should_skip(url: &str) -> bool {
    static SKIP_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(
            r"\.(?:png|jpe?g|gif|svg)(?:\?|$)|/pixel|/tracking|/track/|/click/|unsubscribe|manage-preferences|email-preferences",
        )
        .expect("valid regex")
    });

    if url.len() > MAX_URL_LEN {
        return true;
    }
    let Ok(parsed) = Url::parse(url) else {
        return true;
    };

    let host = parsed.host_str().unwrap_or("").to_lowercase();
    let host_and_path = format!("{host}{}", parsed.path().to_lowercase());
    if AD_DOMAINS
        .iter()
        .any(|d| host.contains(d) || (d.contains('/') && host_and_path.contains(d)))
    {
        return true;
    }

    let path_query = format!(
        "{}?{}",
        parsed.path().to_lowercase(),
        parsed.query().unwrap_or("").to_lowercase()
    );
    if SKIP_RE.is_match(&path_query) {
        return true;
    }

    if url.len() < 20 && url.contains("/r/") {
        return true;
    }

    ["opt-out", "opt_out", "preference"]
        .iter()
        .any(|t| path_query.contains(t))
}

/// Look for a human title around the URL in `context`.
fn title_from_context(context: &str, url: &str) -> Option<String> {
    let escaped = regex::escape(url);

    // [Title](url)
    if let Some(c) = Regex::new(&format!(r"\[([^\]]*)\]\s*\({escaped}"))
        .ok()
        .and_then(|re| re.captures(context))
    {
        return Some(c[1].trim().to_string());
    }

    // <a href="url">Title</a>
    if let Some(c) = Regex::new(&format!(r#"<a[^>]*href\s*=\s*["']{escaped}["'][^>]*>(.*?)</a>"#))
        .ok()
        .and_then(|re| re.captures(context))
    {
        static TAG_RE: LazyLock<Regex> =
            LazyLock::new(|| Regex::new(r"<[^>]*>").expect("valid regex"));
        return Some(TAG_RE.replace_all(&c[1], "").trim().to_string());
    }

    // "Title": url
    if let Some(c) = Regex::new(&format!(
        r#"["']([^"']*)["']\s*(?::|link|at|->|→|,)?\s*{escaped}"#
    ))
    .ok()
    .and_then(|re| re.captures(context))
    {
        return Some(c[1].trim().to_string());
    }

    // Sentence before "Read more" / "Click here"
    static READ_MORE_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(
            r"(?i)(read more|read the article|read the full article|read full article|click here|more info|learn more|continue reading)",
        )
        .expect("valid regex")
    });
    if let Some(m) = READ_MORE_RE.find(context) {
        let before = &context[..m.start()];
        if let Some(last) = before.rsplit(['.', '!', '?']).next() {
            let last = last.trim();
            if last.len() > 10 {
                return Some(last.to_string());
            }
        }
    }

    // Title: url
    if let Some(c) = Regex::new(&format!(r"([^.!?:]{{5,150}}):\s*{escaped}"))
        .ok()
        .and_then(|re| re.captures(context))
    {
        return Some(c[1].trim().to_string());
    }

    None
}

/// Derive a title from the URL path, falling back to "Article from {domain}".
pub fn title_from_url(url: &str) -> String {
    static EXT_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\.\w{2,4}$").expect("valid regex"));

    let Ok(parsed) = Url::parse(url) else {
        return "Article".to_string();
    };
    let host = parsed.host_str().unwrap_or("");
    let domain = host.strip_prefix("www.").unwrap_or(host);
    let fallback = format!("Article from {domain}");

    let path = parsed.path();
    if path.len() < 5 {
        return fallback;
    }

    let path = percent_decode(path);
    let path = EXT_RE.replace(&path, "");

    for segment in path.trim_end_matches('/').rsplit('/') {
        if segment.is_empty() || segment.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        let candidate = segment
            .replace(['-', '_'], " ")
            .split_whitespace()
            .map(capitalize)
            .collect::<Vec<_>>()
            .join(" ");
        if candidate.len() > 3 && candidate.len() < 100 {
            return candidate;
        }
    }

    fallback
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

fn percent_decode(path: &str) -> String {
    url::form_urlencoded::parse(path.replace('+', "%2B").as_bytes())
        .map(|(k, v)| if v.is_empty() { k.into_owned() } else { format!("{k}={v}") })
        .collect::<Vec<_>>()
        .join("&")
}

/// Normalized form used for de-duplication: lower-case host without `www.`,
/// no trailing slash, no fragment, no tracking parameters.
pub fn normalize_url(url: &str) -> String {
    let Ok(mut parsed) = Url::parse(url) else {
        return url.to_string();
    };
    parsed.set_fragment(None);

    let host = parsed.host_str().unwrap_or("").to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host).to_string();
    let path = parsed.path().trim_end_matches('/').to_string();
    let query: Vec<String> = parsed
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k))
        .map(|(k, v)| format!("{k}={v}"))
        .collect();

    let mut normalized = format!("{}://{host}{path}", parsed.scheme());
    if !query.is_empty() {
        normalized.push('?');
        normalized.push_str(&query.join("&"));
    }
    normalized
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn ceil_char_boundary(s: &str, mut idx: usize) -> usize {
    while idx < s.len() && !s.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_markdown_link_titles() {
        let text = "Top story: [Chip exports tighten](https://news.example.com/world/chip-exports) today.";
        let links = LinkExtractor::new().extract_links(text);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].url, "https://news.example.com/world/chip-exports");
        assert_eq!(links[0].title, "Chip exports tighten");
    }

    #[test]
    fn strips_tracking_parameters() {
        let cleaned =
            strip_tracking_params("https://example.com/post?id=7&utm_source=mail&utm_medium=x")
                .unwrap();
        assert_eq!(cleaned, "https://example.com/post?id=7");

        let cleaned = strip_tracking_params("https://example.com/post?utm_source=mail").unwrap();
        assert_eq!(cleaned, "https://example.com/post");
    }

    #[test]
    fn skips_ads_images_and_unsubscribe() {
        let text = "x https://ad.doubleclick.net/abc/def y \
                    https://cdn.example.com/images/banner.png z \
                    https://example.com/email-preferences/update";
        let links = LinkExtractor::new().extract_links(text);
        assert!(links.is_empty(), "got {links:?}");
    }

    #[test]
    fn deduplicates_by_normalized_url() {
        let text = "A https://www.example.com/research/report/ and again https://example.com/research/report?utm_source=x";
        let links = LinkExtractor::new().extract_links(text);
        assert_eq!(links.len(), 1);
    }

    #[test]
    fn drops_everything_after_unsubscribe() {
        let text = "Story https://example.com/articles/one-story Unsubscribe https://example.com/articles/two";
        let links = LinkExtractor::new().extract_links(text);
        assert_eq!(links.len(), 1);
        assert!(links[0].url.ends_with("one-story"));
    }

    #[test]
    fn title_from_url_uses_slug() {
        assert_eq!(
            title_from_url("https://www.example.com/blog/2024/ai-chip-race.html"),
            "Ai Chip Race"
        );
        assert_eq!(title_from_url("https://www.example.com/"), "Article from example.com");
        assert_eq!(title_from_url("https://example.com/a/12345"), "Article from example.com");
    }

    #[test]
    fn colon_prefixed_title() {
        let text = "Worth reading this week: https://example.com/p/long-read-on-energy";
        let links = LinkExtractor::new().extract_links(text);
        assert_eq!(links[0].title, "Worth reading this week");
    }

    #[test]
    fn url_inside_word_is_ignored() {
        let text = "href=https://example.com/articles/x";
        assert!(LinkExtractor::new().extract_links(text).is_empty());
    }

    #[test]
    fn normalize_url_variants_match() {
        assert_eq!(
            normalize_url("https://WWW.Example.com/a/#frag"),
            normalize_url("https://example.com/a")
        );
    }
}
