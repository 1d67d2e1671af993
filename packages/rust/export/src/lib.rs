//! Markdown and JSON exports of summaries.
//!
//! Every file is written to a hidden temp file first and renamed into place.
//! Exports never fail the caller: problems are logged and reported as `None`.

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::Local;
use research_shared::{AppConfig, ResearchError, Result, Summary};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};

/// Version string written into JSON exports.
pub const EXPORT_FORMAT_VERSION: &str = "2.0.0";

#[derive(Serialize)]
struct JsonExport<'a> {
    exported_at: String,
    format: &'static str,
    version: &'static str,
    total_summaries: usize,
    summaries: &'a [Summary],
}

/// Writes exports under the configured exports directory and Obsidian vault.
#[derive(Debug)]
pub struct ExportManager {
    exports_dir: PathBuf,
    /// `{vault}/{summaries folder}`, `None` when no vault is configured.
    obsidian_dir: Option<PathBuf>,
    temp_files: Mutex<Vec<PathBuf>>,
}

impl ExportManager {
    pub fn new(settings: &AppConfig) -> Self {
        let vault = settings.export.obsidian_vault_path.trim();
        let obsidian_dir = if vault.is_empty() {
            None
        } else {
            Some(
                research_shared::expand_tilde(vault)
                    .join(&settings.export.obsidian_summaries_folder),
            )
        };
        Self::with_dirs(settings.paths.exports_dir(), obsidian_dir)
    }

    pub fn with_dirs(exports_dir: PathBuf, obsidian_dir: Option<PathBuf>) -> Self {
        Self {
            exports_dir,
            obsidian_dir,
            temp_files: Mutex::new(Vec::new()),
        }
    }

    /// Write `Weekly Summary YYYY-MM-DD.md` into the Obsidian vault.
    #[instrument(skip_all, fields(count = summaries.len()))]
    pub async fn generate_obsidian_summary(&self, summaries: &[Summary]) -> Option<PathBuf> {
        if summaries.is_empty() {
            warn!("no summaries provided for Obsidian export");
            return None;
        }
        let Some(dir) = &self.obsidian_dir else {
            warn!("no Obsidian vault configured, skipping markdown export");
            return None;
        };

        let content = render_obsidian_content(summaries);
        let path = dir.join(format!("Weekly Summary {}.md", today()));
        match self.write_atomic(&path, &content).await {
            Ok(()) => {
                info!(path = %path.display(), "generated Obsidian summary");
                Some(path)
            }
            Err(e) => {
                warn!(error = %e, "Obsidian export failed");
                None
            }
        }
    }

    /// Write `newsletter_summaries_YYYY-MM-DD.json` into the exports directory.
    #[instrument(skip_all, fields(count = summaries.len()))]
    pub async fn generate_json_export(&self, summaries: &[Summary]) -> Option<PathBuf> {
        if summaries.is_empty() {
            warn!("no summaries provided for JSON export");
            return None;
        }

        let export = JsonExport {
            exported_at: Local::now().to_rfc3339(),
            format: "json",
            version: EXPORT_FORMAT_VERSION,
            total_summaries: summaries.len(),
            summaries,
        };
        let path = self
            .exports_dir
            .join(format!("newsletter_summaries_{}.json", today()));

        let result = match serde_json::to_string_pretty(&export) {
            Ok(json) => self.write_atomic(&path, &json).await,
            Err(e) => Err(ResearchError::Export(format!("JSON serialization failed: {e}"))),
        };
        match result {
            Ok(()) => {
                info!(path = %path.display(), "generated JSON export");
                Some(path)
            }
            Err(e) => {
                warn!(error = %e, "JSON export failed");
                None
            }
        }
    }

    /// Delete temp files left behind by interrupted writes.
    pub async fn cleanup_temp_files(&self) {
        let pending = std::mem::take(
            &mut *self
                .temp_files
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for temp in &pending {
            match tokio::fs::remove_file(temp).await {
                Ok(()) => debug!(path = %temp.display(), "removed temp file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %temp.display(), error = %e, "could not remove temp file"),
            }
        }
        info!(count = pending.len(), "cleaned up temporary export files");
    }

    pub fn pending_temp_files(&self) -> usize {
        self.temp_files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    async fn write_atomic(&self, target: &Path, content: &str) -> Result<()> {
        let dir = target
            .parent()
            .ok_or_else(|| ResearchError::Export(format!("no parent for {}", target.display())))?;
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| ResearchError::io(dir, e))?;

        let file_name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp = dir.join(format!(".{file_name}.tmp"));
        self.track(temp.clone());

        tokio::fs::write(&temp, content)
            .await
            .map_err(|e| ResearchError::io(&temp, e))?;
        tokio::fs::rename(&temp, target)
            .await
            .map_err(|e| ResearchError::io(target, e))?;
        self.untrack(&temp);

        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        debug!(
            file = %file_name,
            size = content.len(),
            sha256 = %format!("{:x}", hasher.finalize()),
            "wrote export"
        );
        Ok(())
    }

    fn track(&self, temp: PathBuf) {
        self.temp_files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(temp);
    }

    fn untrack(&self, temp: &Path) {
        self.temp_files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|t| t != temp);
    }
}

fn today() -> String {
    Local::now().format("%Y-%m-%d").to_string()
}

// ---------------------------------------------------------------------------
// Markdown rendering
// ---------------------------------------------------------------------------

/// Render the Obsidian note for `summaries`.
///
/// A lone pre-rendered weekly roll-up is returned verbatim.
pub fn render_obsidian_content(summaries: &[Summary]) -> String {
    if let [only] = summaries {
        if only.is_weekly() {
            return only.summary.clone();
        }
    }

    let mut md = String::new();
    let _ = write!(
        md,
        "# Weekly Content Summary\n\nGenerated on: {}\n\n",
        today()
    );
    md.push_str("## Reading Progress\n\n- [ ] I've read this complete summary\n\n");

    let sources: BTreeSet<String> = summaries
        .iter()
        .map(|s| format!("\"{}\": {}", or(&s.source, "Unknown"), or(&s.title, "Untitled")))
        .collect();
    md.push_str("## Sources\n\n");
    for line in &sources {
        let _ = writeln!(md, "- {line}");
    }
    md.push('\n');

    let (mut podcasts, mut newsletters): (Vec<&Summary>, Vec<&Summary>) =
        summaries.iter().partition(|s| is_podcast(s));
    newsletters.sort_by_key(|s| s.source.to_lowercase());
    podcasts.sort_by_key(|s| s.source.to_lowercase());

    for (heading, group) in [("Newsletters", &newsletters), ("Podcasts", &podcasts)] {
        if group.is_empty() {
            continue;
        }
        let _ = write!(md, "## {heading}\n\n");
        for summary in group.iter() {
            render_section(&mut md, summary);
        }
    }
    md
}

fn is_podcast(summary: &Summary) -> bool {
    summary.source_type.eq_ignore_ascii_case("podcast")
        || summary.source.to_lowercase().contains("podcast")
}

fn render_section(md: &mut String, summary: &Summary) {
    let _ = write!(
        md,
        "### \"{}\": {}\n\nDate: {}\n\n",
        or(&summary.source, "Unknown"),
        or(&summary.title, "Untitled"),
        or(&summary.date, "Unknown"),
    );

    if !summary.summary.is_empty() {
        let _ = write!(md, "#### Summary\n\n{}\n\n", summary.summary);
    }

    if !summary.questions.is_empty() {
        md.push_str("#### Questions for Experts\n\n");
        for (i, question) in summary.questions.iter().enumerate() {
            let question = question.trim();
            let mark = if question.ends_with('?') { "" } else { "?" };
            let _ = writeln!(md, "{}. {question}{mark}", i + 1);
        }
        md.push('\n');
    }

    let links: Vec<_> = summary.links.iter().filter(|l| !l.url.is_empty()).collect();
    if !links.is_empty() {
        md.push_str("#### Links\n\n");
        for link in links {
            let _ = writeln!(md, "- [{}]({})", or(&link.title, "Linked Article"), link.url);
        }
        md.push('\n');
    }
}

fn or<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.is_empty() { fallback } else { value }
}

#[cfg(test)]
mod tests {
    use super::*;
    use research_shared::{Link, WEEKLY_SUMMARY_SOURCE_TYPE};

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("research-export-{}", uuid::Uuid::now_v7()))
    }

    fn newsletter() -> Summary {
        Summary {
            title: "Issue 12".into(),
            source: "Morning Brief".into(),
            source_type: "email".into(),
            date: "2024-03-04".into(),
            summary: "- Rates held at 5.25%".into(),
            questions: vec!["1. Will cuts come in June".into()],
            links: vec![
                Link {
                    url: "https://example.com/fed".into(),
                    title: "Fed statement".into(),
                    ..Default::default()
                },
                Link::default(),
            ],
            ..Default::default()
        }
    }

    fn episode() -> Summary {
        Summary {
            title: "Ep 7".into(),
            source: "Deep Dive Podcast".into(),
            source_type: "rss".into(),
            summary: "- Guest discussed GPU supply".into(),
            ..Default::default()
        }
    }

    #[test]
    fn markdown_groups_newsletters_and_podcasts() {
        let md = render_obsidian_content(&[episode(), newsletter()]);

        assert!(md.starts_with("# Weekly Content Summary"));
        assert!(md.contains("- [ ] I've read this complete summary"));
        assert!(md.contains("- \"Deep Dive Podcast\": Ep 7\n- \"Morning Brief\": Issue 12"));

        let newsletters = md.find("## Newsletters").unwrap();
        let podcasts = md.find("## Podcasts").unwrap();
        let brief = md.find("### \"Morning Brief\": Issue 12").unwrap();
        let dive = md.find("### \"Deep Dive Podcast\": Ep 7").unwrap();
        assert!(newsletters < brief && brief < podcasts && podcasts < dive);

        assert!(md.contains("1. 1. Will cuts come in June?"));
        assert!(md.contains("- [Fed statement](https://example.com/fed)"));
        assert_eq!(md.matches("](").count(), 1);
    }

    #[test]
    fn weekly_rollup_is_written_verbatim() {
        let weekly = Summary {
            source_type: WEEKLY_SUMMARY_SOURCE_TYPE.into(),
            summary: "# Weekly Summary\n\nalready rendered".into(),
            ..Default::default()
        };
        assert_eq!(
            render_obsidian_content(std::slice::from_ref(&weekly)),
            weekly.summary
        );
    }

    #[tokio::test]
    async fn json_export_writes_envelope() {
        let dir = temp_dir();
        let exporter = ExportManager::with_dirs(dir.clone(), None);

        let path = exporter
            .generate_json_export(&[newsletter(), episode()])
            .await
            .expect("json export");
        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();

        assert_eq!(value["format"], "json");
        assert_eq!(value["version"], EXPORT_FORMAT_VERSION);
        assert_eq!(value["total_summaries"], 2);
        assert_eq!(value["summaries"][0]["title"], "Issue 12");
        assert_eq!(exporter.pending_temp_files(), 0);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn obsidian_export_lands_in_summaries_folder() {
        let dir = temp_dir();
        let exporter = ExportManager::with_dirs(dir.join("exports"), Some(dir.join("vault/Notes")));

        let path = exporter
            .generate_obsidian_summary(&[newsletter()])
            .await
            .expect("markdown export");
        assert!(path.starts_with(dir.join("vault/Notes")));
        assert!(path.file_name().unwrap().to_string_lossy().starts_with("Weekly Summary "));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn empty_input_or_missing_vault_yields_none() {
        let dir = temp_dir();
        let exporter = ExportManager::with_dirs(dir.clone(), None);

        assert!(exporter.generate_json_export(&[]).await.is_none());
        assert!(exporter.generate_obsidian_summary(&[newsletter()]).await.is_none());
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn cleanup_removes_leftover_temp_files() {
        let dir = temp_dir();
        std::fs::create_dir_all(&dir).unwrap();
        let exporter = ExportManager::with_dirs(dir.clone(), None);

        let leftover = dir.join(".partial.json.tmp");
        std::fs::write(&leftover, "{").unwrap();
        exporter.track(leftover.clone());
        exporter.track(dir.join(".already-gone.tmp"));

        exporter.cleanup_temp_files().await;
        assert!(!leftover.exists());
        assert_eq!(exporter.pending_temp_files(), 0);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
