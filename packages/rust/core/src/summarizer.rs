//! LLM summarization of content items.
//!
//! Content is cleaned, split into fixed-size chunks, and summarized with a
//! podcast or newsletter prompt. Multi-chunk content gets one partial summary
//! per chunk followed by a merge call. The model reply is parsed into
//! `SUMMARY:`, `QUESTIONS FOR EXPERTS:` and `TAGS:` sections.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use research_processing::clean_for_ai_processing;
use research_shared::{ContentItem, Result, Summary};
use tracing::{error, info, instrument, warn};

use crate::llm::LlmClient;

/// Characters per chunk sent to the model.
pub const CHUNK_SIZE: usize = 10_000;

/// Characters of a single chunk included in a final prompt.
const PROMPT_CONTENT_LIMIT: usize = 15_000;

const PARTIAL_MAX_TOKENS: u32 = 1500;
const TEST_MAX_TOKENS: u32 = 50;

pub const EMPTY_SUMMARY_TEXT: &str = "No content available for summarization.";
pub const NO_CONTENT_ERROR: &str = "No content provided";
const NO_SUMMARY_TEXT: &str = "No summary available.";

/// Tags preferred over free-form ones when the model offers them.
pub const PRIORITY_TAGS: &[&str] = &[
    "ai",
    "blockchain",
    "crypto",
    "finance",
    "markets",
    "business",
    "strategy",
    "longevity",
    "health",
    "policy",
    "gaming",
    "china",
    "geopolitics",
    "technology",
    "programming",
];

static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^[\s*#]*(summary|questions(?:\s+for\s+experts)?|tags?)\s*\**\s*[:.\-]")
        .expect("valid regex")
});
static HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*#+\s*").expect("valid regex"));
static ENUMERATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*[-•*]?\s*(\d+\.|\(\d+\))?\s*").expect("valid regex"));
static NUMBERED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+\.").expect("valid regex"));
static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"#?[A-Za-z0-9][A-Za-z0-9_\-]+").expect("valid regex"));

// ---------------------------------------------------------------------------
// Parsed reply
// ---------------------------------------------------------------------------

/// Sections of one model reply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedResponse {
    pub summary: String,
    pub questions: Vec<String>,
    pub tags: Vec<String>,
    pub insights: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Summary,
    Questions,
    Tags,
}

/// Split a reply into its sections. Missing sections come back empty, and a
/// missing summary reads "No summary available.".
pub fn parse_response(text: &str) -> ParsedResponse {
    let headers: Vec<(Section, usize, usize)> = SECTION_RE
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let name = caps.get(1)?.as_str().to_ascii_lowercase();
            let section = if name.starts_with("summary") {
                Section::Summary
            } else if name.starts_with("question") {
                Section::Questions
            } else {
                Section::Tags
            };
            Some((section, whole.start(), whole.end()))
        })
        .collect();

    let body_of = |wanted: Section| -> Option<&str> {
        let idx = headers.iter().position(|(s, _, _)| *s == wanted)?;
        let (_, _, body_start) = headers[idx];
        let body_end = headers
            .get(idx + 1)
            .map(|(_, start, _)| *start)
            .unwrap_or(text.len());
        let body = text[body_start..body_end].trim();
        Some(body.strip_prefix("**").unwrap_or(body).trim())
    };

    let summary = match body_of(Section::Summary) {
        Some(body) => HEADING_RE.replace_all(body, "").trim().to_string(),
        None => NO_SUMMARY_TEXT.to_string(),
    };

    let questions = body_of(Section::Questions)
        .map(|body| {
            body.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(|line| ENUMERATION_RE.replace(line, "").trim().to_string())
                .filter(|q| !q.is_empty())
                .collect()
        })
        .unwrap_or_default();

    let tags = body_of(Section::Tags)
        .map(|body| {
            let cleaned = HEADING_RE.replace_all(body, "");
            let raw: Vec<String> = TAG_RE
                .find_iter(&cleaned)
                .map(|m| m.as_str().trim_start_matches('#').to_string())
                .collect();
            process_tags(raw)
        })
        .unwrap_or_default();

    let insights = insights_from_summary(&summary);

    ParsedResponse {
        summary,
        questions,
        tags,
        insights,
    }
}

/// Lower-case, de-duplicate, put priority tags first, fill to three from
/// the rest, cap at five.
pub fn process_tags(raw: Vec<String>) -> Vec<String> {
    let mut unique: Vec<String> = Vec::new();
    for tag in raw {
        let tag = tag.to_lowercase();
        if tag.chars().count() > 1 && !unique.contains(&tag) {
            unique.push(tag);
        }
    }

    let (mut tags, others): (Vec<String>, Vec<String>) = unique
        .into_iter()
        .partition(|t| PRIORITY_TAGS.contains(&t.as_str()));

    let mut others = others.into_iter();
    while tags.len() < 3 {
        match others.next() {
            Some(tag) => tags.push(tag),
            None => break,
        }
    }
    tags.truncate(5);
    tags
}

/// Bullet and numbered lines of a summary, without their markers.
pub fn insights_from_summary(summary: &str) -> Vec<String> {
    summary
        .lines()
        .map(str::trim)
        .filter(|line| {
            (line.starts_with(['*', '-', '•']) || NUMBERED_RE.is_match(line))
                && line.chars().count() > 3
        })
        .map(|line| ENUMERATION_RE.replace(line, "").trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Split on character boundaries into pieces of at most `size` characters.
pub fn chunk_content(content: &str, size: usize) -> Vec<String> {
    let chars: Vec<char> = content.chars().collect();
    if chars.len() <= size {
        return vec![content.to_string()];
    }
    chars.chunks(size).map(|c| c.iter().collect()).collect()
}

fn is_podcast(item: &ContentItem) -> bool {
    item.source_type.to_lowercase().contains("podcast")
        || item.source.to_lowercase().contains("podcast")
}

fn or_unknown(value: &str) -> &str {
    if value.is_empty() { "Unknown" } else { value }
}

// ---------------------------------------------------------------------------
// Prompts
// ---------------------------------------------------------------------------

const FORMAT_FOOTER: &str =
    "Do not include standalone \"#\" symbols, markdown headers, or other formatting elements.";

fn newsletter_prompt(content: &str, source: &str, title: &str, tags: &str) -> String {
    format!(
        r#"You are an expert analyst extracting actionable intelligence from content across all domains.

Analyze this article from {source}: "{title}"

Focus on SPECIFIC INSIGHTS with concrete data points, not general descriptions.
Good: "Nvidia's data center revenue grew 427% year-over-year to $47.5B"
Bad: "Article discusses technology developments and market trends"

Your response MUST follow these exact formatting guidelines:

1. Begin with "SUMMARY:" followed by 4-6 bullet points (use asterisks * for bullets)
   - Each bullet should contain specific findings with numbers, percentages, or concrete details
   - Include organization names, key figures, technologies, and measurable outcomes

2. Then include "QUESTIONS FOR EXPERTS:" followed by 2-3 numbered questions (use simple 1. 2. 3. format)
   - Probe deeper implications of specific findings

3. End with "TAGS:" followed by 3-5 relevant tags
   - Priority categories: {tags}

{FORMAT_FOOTER}

Here's the content to analyze:

{content}
"#
    )
}

fn podcast_prompt(content: &str, source: &str, title: &str, tags: &str) -> String {
    format!(
        r#"You are an expert analyst extracting actionable intelligence from podcast content.

Extract specific insights from this podcast: {source}: "{title}"

Focus on SPECIFIC CLAIMS, PREDICTIONS, and DATA POINTS, not general discussion topics.
Good: "Inflation expected to decline to 2.3% by Q3 2025 according to Federal Reserve projections"
Bad: "Hosts discussed inflation trends and economic outlook"

Your response MUST follow these exact formatting guidelines:

1. Begin with "SUMMARY:" followed by 4-6 bullet points (use asterisks * for bullets)
   - Each bullet should contain specific claims, predictions, or quantified insights
   - Include exact numbers, percentages, organization names, and timeframes

2. Then include "QUESTIONS FOR EXPERTS:" followed by 2-3 numbered questions (use simple 1. 2. 3. format)
   - Probe deeper into implications of specific claims or predictions

3. End with "TAGS:" followed by 3-5 relevant tags
   - Priority categories: {tags}

{FORMAT_FOOTER}

Here's the content to analyze:

{content}
"#
    )
}

fn chunk_prompt(
    content: &str,
    source: &str,
    title: &str,
    tags: &str,
    podcast: bool,
    (idx, total): (usize, usize),
) -> String {
    let focus = if podcast {
        "Extract specific claims and data points"
    } else {
        "Extract specific insights with concrete data points"
    };
    format!(
        r#"You are an expert analyst creating strategic summaries across all domains.

{focus} from chunk #{idx} of {total} from {source}: "{title}".

Your response MUST follow these exact formatting guidelines:

1. Begin with "SUMMARY:" followed by 2-4 bullet points (use asterisks * for bullets)
2. Then include "QUESTIONS FOR EXPERTS:" followed by 1-2 numbered questions (use simple 1. 2. format)
3. End with "TAGS:" followed by 2-3 relevant tags.

For tags, consider these priority categories: {tags}

{FORMAT_FOOTER}

Chunk #{idx} of {total}:
{content}
"#
    )
}

fn merge_prompt(combined: &str, source: &str, title: &str, tags: &str, podcast: bool) -> String {
    let kind = if podcast { "podcast episode" } else { "article" };
    format!(
        r#"You are an expert analyst synthesizing strategic insights from multiple content chunks.

Combine these partial analyses of the {kind} from {source}: "{title}" into one analysis.
Merge related points, drop redundancy, and keep every concrete number and name.

Your response MUST follow these exact formatting guidelines:

1. Begin with "SUMMARY:" followed by 5-6 bullet points (use asterisks * for bullets)
2. Then include "QUESTIONS FOR EXPERTS:" followed by 2-3 numbered questions (use simple 1. 2. 3. format)
3. End with "TAGS:" followed by 3-5 relevant tags
   - Priority categories: {tags}

{FORMAT_FOOTER}

Here are the partial summaries to synthesize:
{combined}
"#
    )
}

// ---------------------------------------------------------------------------
// Summarizer
// ---------------------------------------------------------------------------

/// Summarizer backed by the Messages API.
#[derive(Debug, Clone)]
pub struct LlmSummarizer {
    client: Arc<LlmClient>,
    chunk_pause: Duration,
}

impl LlmSummarizer {
    pub fn new(client: Arc<LlmClient>) -> Self {
        Self {
            client,
            chunk_pause: Duration::from_secs(1),
        }
    }

    /// Pause between partial-summary calls (default 1 s).
    pub fn with_chunk_pause(mut self, pause: Duration) -> Self {
        self.chunk_pause = pause;
        self
    }

    pub fn client(&self) -> &Arc<LlmClient> {
        &self.client
    }

    /// Summarize one item. Empty content and API failures come back as
    /// marked records rather than errors.
    #[instrument(skip_all, fields(source = %item.source, title = %item.title))]
    pub async fn summarize(&self, item: &ContentItem) -> Summary {
        if item.content.trim().is_empty() {
            warn!("no content to summarize");
            return empty_summary(item);
        }

        let cleaned = clean_for_ai_processing(&item.content);
        let chunks = chunk_content(&cleaned, CHUNK_SIZE);
        let podcast = is_podcast(item);

        let parsed = if chunks.len() == 1 {
            self.summarize_single(&chunks[0], item, podcast).await
        } else {
            self.summarize_chunks(&chunks, item, podcast).await
        };

        match parsed {
            Ok(parsed) => {
                info!(chunks = chunks.len(), "content summarized");
                Summary {
                    title: or_unknown(&item.title).to_string(),
                    source: or_unknown(&item.source).to_string(),
                    source_type: if item.source_type.is_empty() {
                        "newsletter".to_string()
                    } else {
                        item.source_type.clone()
                    },
                    date: item.date.clone(),
                    summary: parsed.summary,
                    questions: parsed.questions,
                    tags: parsed.tags,
                    insights: parsed.insights,
                    links: item.links.clone(),
                    content_length: item.content.len(),
                    chunks_processed: chunks.len(),
                    ..Default::default()
                }
            }
            Err(e) => {
                error!(error = %e, "summarization failed");
                error_summary(item, &e.to_string())
            }
        }
    }

    async fn summarize_single(
        &self,
        content: &str,
        item: &ContentItem,
        podcast: bool,
    ) -> Result<ParsedResponse> {
        let content: String = content.chars().take(PROMPT_CONTENT_LIMIT).collect();
        let source = or_unknown(&item.source);
        let title = or_unknown(&item.title);
        let tags = PRIORITY_TAGS.join(", ");
        let prompt = if podcast {
            podcast_prompt(&content, source, title, &tags)
        } else {
            newsletter_prompt(&content, source, title, &tags)
        };

        let reply = self.client.complete(&prompt, self.client.max_tokens()).await?;
        Ok(parse_response(&reply))
    }

    async fn summarize_chunks(
        &self,
        chunks: &[String],
        item: &ContentItem,
        podcast: bool,
    ) -> Result<ParsedResponse> {
        let source = or_unknown(&item.source);
        let title = or_unknown(&item.title);
        let tags = PRIORITY_TAGS.join(", ");

        let mut partials = Vec::with_capacity(chunks.len());
        for (i, chunk) in chunks.iter().enumerate() {
            let prompt = chunk_prompt(chunk, source, title, &tags, podcast, (i + 1, chunks.len()));
            partials.push(self.client.complete(&prompt, PARTIAL_MAX_TOKENS).await?);

            if !self.chunk_pause.is_zero() {
                tokio::time::sleep(self.chunk_pause).await;
            }
        }

        let combined = partials.join("\n\n---CHUNK BREAK---\n\n");
        let prompt = merge_prompt(&combined, source, title, &tags, podcast);
        let reply = self.client.complete(&prompt, self.client.max_tokens()).await?;
        Ok(parse_response(&reply))
    }

    /// Probe the API with a short prompt.
    pub async fn test_api(&self) -> bool {
        match self
            .client
            .complete(
                "Hello, please respond with 'API test successful'",
                TEST_MAX_TOKENS,
            )
            .await
        {
            Ok(reply) if reply.contains("API test successful") => {
                info!("LLM API test successful");
                true
            }
            Ok(reply) => {
                warn!(reply = %reply.trim(), "LLM API test returned unexpected response");
                false
            }
            Err(e) => {
                error!(error = %e, "LLM API test failed");
                false
            }
        }
    }
}

fn empty_summary(item: &ContentItem) -> Summary {
    Summary {
        title: or_unknown(&item.title).to_string(),
        source: or_unknown(&item.source).to_string(),
        source_type: or_unknown_type(&item.source_type),
        date: item.date.clone(),
        summary: EMPTY_SUMMARY_TEXT.to_string(),
        content_length: 0,
        chunks_processed: 0,
        error: Some(NO_CONTENT_ERROR.to_string()),
        ..Default::default()
    }
}

fn error_summary(item: &ContentItem, message: &str) -> Summary {
    Summary {
        title: or_unknown(&item.title).to_string(),
        source: or_unknown(&item.source).to_string(),
        source_type: or_unknown_type(&item.source_type),
        date: item.date.clone(),
        summary: format!("Summarization failed: {message}"),
        tags: vec!["error".to_string()],
        links: item.links.clone(),
        content_length: item.content.len(),
        chunks_processed: 0,
        error: Some(message.to_string()),
        ..Default::default()
    }
}

fn or_unknown_type(source_type: &str) -> String {
    if source_type.is_empty() {
        "unknown".to_string()
    } else {
        source_type.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use research_shared::LlmConfig;

    const REPLY: &str = "SUMMARY:\n\
        * Revenue grew 40% to $2.1B in Q2\n\
        * Headcount fell by 1,200 roles\n\
        \n\
        QUESTIONS FOR EXPERTS:\n\
        1. Is the margin expansion durable?\n\
        2. How exposed is the supply chain?\n\
        \n\
        TAGS: #Finance, semiconductors, AI, markets, x, Supply-Chain, earnings";

    fn summarizer_for(server: &wiremock::MockServer) -> LlmSummarizer {
        let llm = LlmConfig {
            base_url: server.uri(),
            ..Default::default()
        };
        let client = LlmClient::new(Some("k".into()), &llm).unwrap();
        LlmSummarizer::new(Arc::new(client)).with_chunk_pause(Duration::ZERO)
    }

    fn reply_body(text: &str) -> serde_json::Value {
        serde_json::json!({ "content": [{ "type": "text", "text": text }] })
    }

    fn item(content: &str) -> ContentItem {
        ContentItem {
            id: "1".into(),
            title: "Weekly Markets".into(),
            source: "Money Stuff".into(),
            source_type: "newsletter".into(),
            date: "2025-03-01".into(),
            content: content.into(),
            ..Default::default()
        }
    }

    #[test]
    fn parses_sections() {
        let parsed = parse_response(REPLY);
        assert!(parsed.summary.starts_with("* Revenue grew"));
        assert_eq!(
            parsed.questions,
            vec![
                "Is the margin expansion durable?",
                "How exposed is the supply chain?"
            ]
        );
        assert_eq!(parsed.tags, vec!["finance", "ai", "markets"]);
        assert_eq!(parsed.insights.len(), 2);
        assert_eq!(parsed.insights[1], "Headcount fell by 1,200 roles");
    }

    #[test]
    fn missing_summary_section_has_placeholder() {
        let parsed = parse_response("nothing structured here");
        assert_eq!(parsed.summary, "No summary available.");
        assert!(parsed.questions.is_empty());
        assert!(parsed.tags.is_empty());
    }

    #[test]
    fn bold_headers_are_recognised() {
        let parsed = parse_response("**SUMMARY:**\n* One point with 5 numbers\n**TAGS:** crypto");
        assert_eq!(parsed.summary, "* One point with 5 numbers");
        assert_eq!(parsed.tags, vec!["crypto"]);
    }

    #[test]
    fn tags_fill_to_three_and_cap_at_five() {
        let tags = process_tags(vec!["Rust".into(), "wasm".into(), "ai".into()]);
        assert_eq!(tags, vec!["ai", "rust", "wasm"]);

        let many: Vec<String> = ["ai", "crypto", "finance", "markets", "health", "policy", "x1"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(process_tags(many).len(), 5);

        let dupes = process_tags(vec!["AI".into(), "ai".into(), "z".into()]);
        assert_eq!(dupes, vec!["ai"]);
    }

    #[test]
    fn chunking_respects_char_boundaries() {
        let text = "é".repeat(25);
        let chunks = chunk_content(&text, 10);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].chars().count(), 5);
        assert_eq!(chunk_content("short", 10), vec!["short"]);
    }

    #[tokio::test]
    async fn empty_content_yields_marked_record() {
        let server = wiremock::MockServer::start().await;
        let summary = summarizer_for(&server).summarize(&item("   ")).await;
        assert_eq!(summary.summary, EMPTY_SUMMARY_TEXT);
        assert_eq!(summary.content_length, 0);
        assert_eq!(summary.error.as_deref(), Some(NO_CONTENT_ERROR));
        assert!(server.received_requests().await.unwrap_or_default().is_empty());
    }

    #[tokio::test]
    async fn single_chunk_summary() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_json(reply_body(REPLY)))
            .expect(1)
            .mount(&server)
            .await;

        let summary = summarizer_for(&server)
            .summarize(&item("Quarterly numbers are in."))
            .await;
        assert!(summary.error.is_none());
        assert_eq!(summary.chunks_processed, 1);
        assert_eq!(summary.title, "Weekly Markets");
        assert_eq!(summary.questions.len(), 2);
    }

    #[tokio::test]
    async fn long_content_is_chunked_then_merged() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_json(reply_body(REPLY)))
            .expect(3)
            .mount(&server)
            .await;

        let long = "Market update sentence. ".repeat(600);
        let summary = summarizer_for(&server).summarize(&item(&long)).await;
        assert_eq!(summary.chunks_processed, 2);
        assert!(summary.error.is_none());
    }

    #[tokio::test]
    async fn api_failure_yields_error_record() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .respond_with(wiremock::ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let summary = summarizer_for(&server).summarize(&item("some text")).await;
        assert!(summary.summary.starts_with("Summarization failed:"));
        assert_eq!(summary.tags, vec!["error"]);
        assert!(summary.error.is_some());
    }

    #[tokio::test]
    async fn test_api_checks_reply_text() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .respond_with(
                wiremock::ResponseTemplate::new(200)
                    .set_body_json(reply_body("API test successful")),
            )
            .mount(&server)
            .await;
        assert!(summarizer_for(&server).test_api().await);
    }
}
