//! Text cleanup passes for fetched content.
//!
//! Each pass is a function `&str -> String` applied in sequence.

use std::sync::LazyLock;

use regex::Regex;

/// Run the email/newsletter cleanup pipeline on raw text.
pub(crate) fn run_pipeline(text: &str) -> String {
    let mut result = strip_html_tags(text);
    result = decode_entities(&result);
    result = remove_footers(&result);
    result = normalize_whitespace(&result);
    result = join_broken_lines(&result);
    result.trim().to_string()
}

// ---------------------------------------------------------------------------
// Pass 1: Strip HTML tags
// ---------------------------------------------------------------------------

pub(crate) fn strip_html_tags(text: &str) -> String {
    static TAG_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"<[^>]+>").expect("valid regex"));

    TAG_RE.replace_all(text, " ").to_string()
}

// ---------------------------------------------------------------------------
// Pass 2: Decode HTML entities
// ---------------------------------------------------------------------------

const NAMED_ENTITIES: &[(&str, &str)] = &[
    ("&nbsp;", " "),
    ("&lt;", "<"),
    ("&gt;", ">"),
    ("&quot;", "\""),
    ("&apos;", "'"),
    ("&#39;", "'"),
    ("&mdash;", "\u{2014}"),
    ("&ndash;", "\u{2013}"),
    ("&hellip;", "..."),
    ("&rsquo;", "'"),
    ("&lsquo;", "'"),
    ("&rdquo;", "\""),
    ("&ldquo;", "\""),
    // Last, so `&amp;lt;` decodes to `&lt;` and not `<`.
    ("&amp;", "&"),
];

pub(crate) fn decode_entities(text: &str) -> String {
    static NUMERIC_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"&#(\d+);").expect("valid regex"));

    let mut result = text.to_string();
    for (entity, replacement) in NAMED_ENTITIES {
        result = result.replace(entity, replacement);
    }

    NUMERIC_RE
        .replace_all(&result, |caps: &regex::Captures| {
            caps[1]
                .parse::<u32>()
                .ok()
                .and_then(char::from_u32)
                .map(String::from)
                .unwrap_or_else(|| caps[0].to_string())
        })
        .to_string()
}

// ---------------------------------------------------------------------------
// Pass 3: Remove unsubscribe footers and signatures
// ---------------------------------------------------------------------------

/// Cut everything from the first footer marker to the end of the text.
pub(crate) fn remove_footers(text: &str) -> String {
    static FOOTER_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
        [
            r"(?is)(unsubscribe|manage preferences|email preferences).*$",
            r"(?ms)^--+\s*$.*",
            r"(?is)sent from my \w+.*$",
            r"(?is)this email was sent.*$",
            r"(?is)you received this.*$",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("valid regex"))
        .collect()
    });

    let mut result = text.to_string();
    for re in FOOTER_RES.iter() {
        result = re.replace(&result, "").to_string();
    }
    result
}

// ---------------------------------------------------------------------------
// Pass 4: Normalize whitespace
// ---------------------------------------------------------------------------

/// Collapse horizontal whitespace runs and 3+ line breaks, keeping paragraphs.
pub(crate) fn normalize_whitespace(text: &str) -> String {
    static SPACES_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"[ \t\u{a0}]+").expect("valid regex"));
    static BREAKS_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\n\s*\n(\s*\n)+").expect("valid regex"));

    let result = text.replace("\r\n", "\n");
    let result = SPACES_RE.replace_all(&result, " ");
    BREAKS_RE.replace_all(&result, "\n\n").to_string()
}

// ---------------------------------------------------------------------------
// Pass 5: Join lines broken mid-sentence
// ---------------------------------------------------------------------------

pub(crate) fn join_broken_lines(text: &str) -> String {
    let mut lines: Vec<String> = Vec::new();

    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() {
            if lines.last().is_some_and(|l| !l.is_empty()) {
                lines.push(String::new());
            }
            continue;
        }

        let continues_previous = match lines.last() {
            Some(prev) if !prev.is_empty() => {
                !prev.ends_with(['.', '!', '?', ':', ';'])
                    && !starts_block(line)
                    && !line.chars().next().is_some_and(char::is_uppercase)
            }
            _ => false,
        };

        match lines.last_mut() {
            Some(prev) if continues_previous => {
                prev.push(' ');
                prev.push_str(line);
            }
            _ => lines.push(line.to_string()),
        }
    }

    lines.join("\n")
}

/// Lines that open a list item, heading, or quote are never joined.
fn starts_block(line: &str) -> bool {
    static BLOCK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^(?:[-*+•#>]|\d+[.)])").expect("valid regex"));

    BLOCK_RE.is_match(line)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
