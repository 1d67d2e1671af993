//! Strategic insight extraction.
//!
//! Asks the model for two or three memorable, specific facts per summary
//! and filters out topic descriptions. Falls back to digit-bearing bullets
//! when the model cannot be reached.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use research_shared::{Insight, ResearchError, Result, Summary};
use tracing::{info, warn};

use crate::llm::LlmClient;

const EXTRACTION_MAX_TOKENS: u32 = 600;
const MAX_INSIGHTS: usize = 3;

/// Phrases that mark a topic description rather than a fact.
const GENERIC_PHRASES: &[&str] = &[
    "discussion focused on",
    "analysis of",
    "coverage of",
    "exploration of",
    "conversation covered",
    "hosts discussed",
];

static NUMBERED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+\.\s*").expect("valid regex"));
static BULLET_PREFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[-*\d.]+\s*").expect("valid regex"));

fn extraction_prompt(summary: &str, source: &str, title: &str) -> String {
    format!(
        r#"You are an expert at identifying memorable insights and key facts across all domains.

From this analysis of {source}: "{title}", extract 2-3 specific insights that are worth remembering long-term.

A memorable insight is a specific finding with numbers, a strategic revelation about an
organization or policy, an unexpected discovery, or a data point useful for future decisions.

Good: "NAD+ levels decline 50% by age 50, with supplementation showing 20-30% cellular energy improvement"
Bad: "Discussion focused on cryptocurrency developments"
Bad: "Analysis of political trends and voter behavior"

Extract SPECIFIC FACTS and SUBSTANTIAL FINDINGS, not topic descriptions.

Format your response as:

INSIGHTS:
1. [Specific strategic insight with numbers/organizations/concrete details]
2. [Another memorable fact or strategic revelation]
3. [Third strategic insight if applicable]

Here's the summary to extract insights from:

{summary}
"#
    )
}

/// Parse a numbered reply, joining wrapped lines, dropping generic and
/// short entries. At most three survive.
pub fn parse_strategic_insights(text: &str) -> Vec<String> {
    let mut raw: Vec<String> = Vec::new();
    let mut current = String::new();

    for line in text.lines().map(str::trim) {
        if NUMBERED_RE.is_match(line) {
            if current.trim().chars().count() > 20 {
                raw.push(current.trim().to_string());
            }
            current = NUMBERED_RE.replace(line, "").to_string();
        } else if !line.is_empty() && !current.is_empty() && !line.starts_with("INSIGHTS:") {
            current.push(' ');
            current.push_str(line);
        }
    }
    if current.trim().chars().count() > 20 {
        raw.push(current.trim().to_string());
    }

    raw.into_iter()
        .filter(|insight| {
            let lower = insight.to_lowercase();
            !GENERIC_PHRASES.iter().any(|p| lower.contains(p)) && insight.chars().count() > 30
        })
        .take(MAX_INSIGHTS)
        .collect()
}

/// Bullet or numbered lines of a summary that carry a number.
pub fn bullet_fallback(summary: &str) -> Vec<String> {
    summary
        .lines()
        .map(str::trim)
        .filter(|line| {
            (line.starts_with(['*', '-']) || NUMBERED_RE.is_match(line))
                && line.chars().count() > 20
        })
        .map(|line| BULLET_PREFIX_RE.replace(line, "").trim().to_string())
        .filter(|cleaned| {
            cleaned.chars().count() > 30 && cleaned.chars().any(|c| c.is_ascii_digit())
        })
        .take(MAX_INSIGHTS)
        .collect()
}

/// Whole-stage fallback: one standalone insight per summary bullet.
pub fn fallback_insights(summaries: &[Summary]) -> Vec<Insight> {
    summaries
        .iter()
        .flat_map(|summary| {
            summary
                .insights
                .iter()
                .map(move |text| Insight::from_summary(summary, text.clone()))
        })
        .collect()
}

/// Model-backed strategic insight extractor.
#[derive(Debug, Clone)]
pub struct LlmInsightExtractor {
    client: Arc<LlmClient>,
}

impl LlmInsightExtractor {
    pub fn new(client: Arc<LlmClient>) -> Self {
        Self { client }
    }

    /// Fails when no API key is configured, so a whole run can switch to
    /// the bullet fallback up front.
    pub fn ensure_ready(&self) -> Result<()> {
        if self.client.has_api_key() {
            Ok(())
        } else {
            Err(ResearchError::Llm("no API key configured for insight extraction".into()))
        }
    }

    /// Two or three specific insights from one summary. Never fails.
    pub async fn extract(&self, summary: &Summary) -> Vec<String> {
        if summary.summary.trim().is_empty() {
            warn!(source = %summary.source, title = %summary.title, "no summary text for insights");
            return Vec::new();
        }

        let prompt = extraction_prompt(&summary.summary, &summary.source, &summary.title);
        match self.client.complete(&prompt, EXTRACTION_MAX_TOKENS).await {
            Ok(reply) => {
                let insights = parse_strategic_insights(&reply);
                info!(source = %summary.source, count = insights.len(), "extracted strategic insights");
                insights
            }
            Err(e) => {
                warn!(source = %summary.source, error = %e, "insight extraction failed, using bullets");
                let insights = bullet_fallback(&summary.summary);
                info!(count = insights.len(), "fallback extraction finished");
                insights
            }
        }
    }
}
