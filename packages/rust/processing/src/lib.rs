//! Content cleaning, link extraction, and link enrichment.
//!
//! This crate provides:
//! - [`html_to_text`] and the text cleaners used by source plugins and the summarizer
//! - [`LinkExtractor`]: finds meaningful links in newsletter text
//! - [`LinkEnricher`]: adds LinkPreview metadata with an on-disk cache

mod cleanup;
pub mod enricher;
pub mod links;

use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};
use tracing::{debug, warn};

pub use enricher::{LinkEnricher, prioritize_links};
pub use links::LinkExtractor;

// ---------------------------------------------------------------------------
// HTML conversion
// ---------------------------------------------------------------------------

/// Convert an HTML document or fragment to readable, markdown-flavoured text.
///
/// Links survive as `[title](url)` so the link extractor can pick up titles.
/// If the converter fails, tags are stripped instead.
pub fn html_to_text(html: &str) -> String {
    let body = extract_body_html(html);

    let converter = htmd::HtmlToMarkdown::builder()
        .skip_tags(vec![
            "head", "script", "style", "nav", "iframe", "noscript", "svg", "img",
        ])
        .build();

    let text = match converter.convert(&body) {
        Ok(md) => md,
        Err(e) => {
            warn!(error = %e, "htmd conversion failed, stripping tags");
            cleanup::strip_html_tags(&body)
        }
    };

    let text = cleanup::normalize_whitespace(&text);
    debug!(html_len = html.len(), text_len = text.len(), "html converted");
    text.trim().to_string()
}

/// Whether a string looks like HTML rather than plain text.
pub fn looks_like_html(text: &str) -> bool {
    static HTML_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?i)<(?:html|body|div|p|br|table|span|a\s)[^>]*>").expect("valid regex")
    });

    HTML_RE.is_match(text)
}

/// Pick `<body>` (or the whole input for fragments) without the document head.
fn extract_body_html(html: &str) -> String {
    let doc = Html::parse_document(html);

    if let Ok(body_sel) = Selector::parse("body") {
        if let Some(body) = doc.select(&body_sel).next() {
            return body.inner_html();
        }
    }

    html.to_string()
}

// ---------------------------------------------------------------------------
// Text cleaners
// ---------------------------------------------------------------------------

/// Clean email/newsletter text: strip tags, decode entities, drop footers,
/// normalize whitespace, and re-join lines broken mid-sentence.
pub fn clean_email_content(content: &str) -> String {
    if content.is_empty() {
        return String::new();
    }
    cleanup::run_pipeline(content)
}

/// Clean text before it is sent to the LLM.
///
/// URLs, email addresses, and phone numbers are masked so the model does not
/// summarize them; runs of punctuation are collapsed.
pub fn clean_for_ai_processing(content: &str) -> String {
    static URL_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"https?://\S+").expect("valid regex"));
    static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").expect("valid regex")
    });
    static PHONE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\b\d{3}[-.]?\d{3}[-.]?\d{4}\b").expect("valid regex"));
    static DOTS_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\.{3,}").expect("valid regex"));
    static BANGS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"!{2,}").expect("valid regex"));
    static QUESTIONS_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\?{2,}").expect("valid regex"));

    let text = clean_email_content(content);
    let text = URL_RE.replace_all(&text, "[LINK]");
    let text = EMAIL_RE.replace_all(&text, "[EMAIL]");
    let text = PHONE_RE.replace_all(&text, "[PHONE]");
    let text = DOTS_RE.replace_all(&text, "...");
    let text = BANGS_RE.replace_all(&text, "!");
    let text = QUESTIONS_RE.replace_all(&text, "?");

    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Truncate to at most `max_len` bytes on a char boundary, preferring a
/// sentence end (kept when at least 80% survives) and then a word boundary
/// (kept when at least 90% survives). Appends `...` when cut.
pub fn truncate_content(content: &str, max_len: usize) -> String {
    if content.len() <= max_len {
        return content.to_string();
    }

    let mut cut = max_len;
    while !content.is_char_boundary(cut) {
        cut -= 1;
    }
    let truncated = &content[..cut];

    if let Some(pos) = truncated.rfind(['.', '!', '?']) {
        if pos * 10 > max_len * 8 {
            return format!("{}...", &truncated[..=pos]);
        }
    }
    if let Some(pos) = truncated.rfind(' ') {
        if pos * 10 > max_len * 9 {
            return format!("{}...", &truncated[..pos]);
        }
    }
    format!("{truncated}...")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_to_text_keeps_links_as_markdown() {
        let html = r#"<html><head><title>x</title><style>p{}</style></head><body>
            <h1>Weekly Brief</h1>
            <p>Read <a href="https://example.com/story">the full story</a> now.</p>
            <script>track()</script>
        </body></html>"#;

        let text = html_to_text(html);
        assert!(text.contains("Weekly Brief"));
        assert!(text.contains("[the full story](https://example.com/story)"));
        assert!(!text.contains("track()"));
        assert!(!text.contains("<p>"));
    }

    #[test]
    fn html_to_text_handles_fragments() {
        let text = html_to_text("<p>Just a <strong>fragment</strong></p>");
        assert!(text.contains("fragment"));
    }

    #[test]
    fn looks_like_html_detection() {
        assert!(looks_like_html("<p>hello</p>"));
        assert!(looks_like_html("<DIV class=\"x\">hi</DIV>"));
        assert!(!looks_like_html("plain text with a < sign"));
    }

    #[test]
    fn clean_email_content_empty() {
        assert_eq!(clean_email_content(""), "");
    }

    #[test]
    fn clean_for_ai_masks_contacts() {
        let input = "Visit https://example.com/a?b=1 or mail news@example.com or call 555-123-4567!!!";
        let result = clean_for_ai_processing(input);
        assert!(result.contains("[LINK]"));
        assert!(result.contains("[EMAIL]"));
        assert!(result.contains("[PHONE]"));
        assert!(result.ends_with('!'));
        assert!(!result.contains("!!"));
    }

    #[test]
    fn truncate_prefers_sentence_boundary() {
        let text = "First sentence is here. Second sentence goes on and on";
        let result = truncate_content(text, 26);
        assert_eq!(result, "First sentence is here....");
    }

    #[test]
    fn truncate_short_text_untouched() {
        assert_eq!(truncate_content("short", 100), "short");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let text = "ééééééééééé";
        let result = truncate_content(text, 5);
        assert!(result.ends_with("..."));
    }
}
