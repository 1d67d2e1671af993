//! libSQL storage layer for summaries, insights, questions and links.
//!
//! The [`Storage`] struct wraps a local libSQL database. Every public write
//! commits before returning; a failing write returns an error and leaves
//! nothing half-written.

mod migrations;

use std::path::Path;

use chrono::{Duration, NaiveDate, Utc};
use libsql::{Connection, Database, Row, params};
use research_shared::{Insight, Link, ResearchError, Result, Summary, WEEKLY_SUMMARY_SOURCE_TYPE};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

const SUMMARY_COLUMNS: &str = "id, title, source, source_type, date, summary, questions, tags, \
     links, content_length, chunks_processed, created_at, read, starred";

/// Counters recorded when a processing run completes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub summaries_created: usize,
    pub links_extracted: usize,
    pub insights_generated: usize,
}

/// Aggregate counts for status displays.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Statistics {
    pub summaries_count: i64,
    pub insights_count: i64,
    pub questions_count: i64,
    pub links_count: i64,
    pub processing_runs_count: i64,
    pub summaries_last_week: i64,
    pub top_sources: Vec<(String, i64)>,
    pub top_tags: Vec<(String, i64)>,
    pub last_run: Option<String>,
}

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
}

impl Storage {
    /// Open or create a database at `path` and apply pending migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ResearchError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;
        let conn = db.connect().map_err(db_err)?;

        let storage = Self { db, conn };
        storage.initialize().await?;
        Ok(storage)
    }

    /// Enable foreign keys and run pending schema migrations. Idempotent.
    pub async fn initialize(&self) -> Result<()> {
        self.conn
            .execute("PRAGMA foreign_keys = ON", params![])
            .await
            .map_err(db_err)?;

        let current_version = self.get_schema_version().await;
        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        ResearchError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => match rows.next().await {
                Ok(Some(row)) => row.get::<u32>(0).unwrap_or(0),
                _ => 0,
            },
            Err(_) => 0,
        }
    }

    /// Round-trip a trivial query.
    pub async fn test_connection(&self) -> bool {
        match self.conn.query("SELECT 1", params![]).await {
            Ok(mut rows) => matches!(rows.next().await, Ok(Some(_))),
            Err(e) => {
                debug!(error = %e, "storage connection test failed");
                false
            }
        }
    }

    // -----------------------------------------------------------------------
    // Summaries
    // -----------------------------------------------------------------------

    /// Insert summaries with their questions and embedded insights in one
    /// transaction. Returns the new ids in input order.
    pub async fn store_summaries(&self, summaries: &[Summary]) -> Result<Vec<i64>> {
        let tx = self.conn.transaction().await.map_err(db_err)?;
        let now = Utc::now().to_rfc3339();
        let mut ids = Vec::with_capacity(summaries.len());

        for summary in summaries {
            tx.execute(
                "INSERT INTO summaries (title, source, source_type, date, summary, questions, tags,
                                        links, content_length, chunks_processed, created_at, read, starred)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                summary_params(summary, &now)?,
            )
            .await
            .map_err(db_err)?;
            let summary_id = tx.last_insert_rowid();
            let topic = summary.topic();

            for question in &summary.questions {
                tx.execute(
                    "INSERT INTO questions (summary_id, source, question, topic, date, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        summary_id,
                        summary.source.as_str(),
                        question.as_str(),
                        topic.as_str(),
                        summary.date.as_str(),
                        now.as_str(),
                    ],
                )
                .await
                .map_err(db_err)?;
            }

            let tags_json = to_json(&summary.tags)?;
            for insight in &summary.insights {
                tx.execute(
                    "INSERT INTO insights (summary_id, source, topic, insight, tags, date, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        summary_id,
                        summary.source.as_str(),
                        topic.as_str(),
                        insight.as_str(),
                        tags_json.as_str(),
                        summary.date.as_str(),
                        now.as_str(),
                    ],
                )
                .await
                .map_err(db_err)?;
            }

            for tag in summary.tags.iter().filter(|t| !t.is_empty()) {
                tx.execute(
                    "INSERT INTO tags (name, usage_count, last_used) VALUES (?1, 1, ?2)
                     ON CONFLICT(name) DO UPDATE SET
                       usage_count = usage_count + 1,
                       last_used = excluded.last_used",
                    params![tag.as_str(), now.as_str()],
                )
                .await
                .map_err(db_err)?;
            }

            ids.push(summary_id);
        }

        tx.commit().await.map_err(db_err)?;
        info!(count = ids.len(), "stored summaries");
        Ok(ids)
    }

    /// Insert one summary record (used for weekly roll-ups). Returns its id.
    pub async fn store_summary(&self, summary: &Summary) -> Result<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO summaries (title, source, source_type, date, summary, questions, tags,
                                        links, content_length, chunks_processed, created_at, read, starred)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                summary_params(summary, &now)?,
            )
            .await
            .map_err(db_err)?;
        let id = self.conn.last_insert_rowid();
        info!(id, source_type = %summary.source_type, "stored summary");
        Ok(id)
    }

    pub async fn get_summary(&self, id: i64) -> Result<Option<Summary>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {SUMMARY_COLUMNS} FROM summaries WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(row_to_summary(&row)?)),
            None => Ok(None),
        }
    }

    /// Non-weekly summaries dated on or after `since`, newest first.
    ///
    /// Summary dates are local calendar days (`YYYY-MM-DD`), so the cut-off
    /// is a day, not an instant.
    pub async fn get_summaries_since(&self, since: NaiveDate) -> Result<Vec<Summary>> {
        self.summaries_by_day(">=", since).await
    }

    /// Non-weekly summaries dated strictly after `day`, newest first.
    ///
    /// Rows dated on `day` itself are excluded: they were already rolled up
    /// by a weekly summary stamped with that day.
    pub async fn get_summaries_after(&self, day: NaiveDate) -> Result<Vec<Summary>> {
        self.summaries_by_day(">", day).await
    }

    async fn summaries_by_day(&self, op: &str, day: NaiveDate) -> Result<Vec<Summary>> {
        let day = day.format("%Y-%m-%d").to_string();
        self.query_summaries(
            &format!(
                "SELECT {SUMMARY_COLUMNS} FROM summaries
                 WHERE date {op} ?1 AND source_type != ?2
                 ORDER BY date DESC, created_at DESC"
            ),
            params![day.as_str(), WEEKLY_SUMMARY_SOURCE_TYPE],
        )
        .await
    }

    /// Most recent weekly roll-up, by date then creation time.
    pub async fn get_latest_weekly_summary(&self) -> Result<Option<Summary>> {
        let mut summaries = self
            .query_summaries(
                &format!(
                    "SELECT {SUMMARY_COLUMNS} FROM summaries
                     WHERE source_type = ?1
                     ORDER BY date DESC, created_at DESC
                     LIMIT 1"
                ),
                params![WEEKLY_SUMMARY_SOURCE_TYPE],
            )
            .await?;
        Ok(summaries.pop())
    }

    pub async fn get_recent_summaries(&self, limit: u32) -> Result<Vec<Summary>> {
        self.query_summaries(
            &format!(
                "SELECT {SUMMARY_COLUMNS} FROM summaries
                 ORDER BY date DESC, created_at DESC
                 LIMIT ?1"
            ),
            params![limit],
        )
        .await
    }

    async fn query_summaries(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<Summary>> {
        let mut rows = self.conn.query(sql, params).await.map_err(db_err)?;
        let mut summaries = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            summaries.push(row_to_summary(&row)?);
        }
        Ok(summaries)
    }

    // -----------------------------------------------------------------------
    // Insights and links
    // -----------------------------------------------------------------------

    /// Insert insights as given; `summary_id` may be `None`.
    pub async fn store_insights(&self, insights: &[Insight]) -> Result<usize> {
        if insights.is_empty() {
            return Ok(0);
        }

        let tx = self.conn.transaction().await.map_err(db_err)?;
        for insight in insights {
            let created_at = insight.created_at.unwrap_or_else(Utc::now).to_rfc3339();
            tx.execute(
                "INSERT INTO insights (summary_id, source, topic, insight, tags, date, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    insight.summary_id,
                    insight.source.as_str(),
                    insight.topic.as_str(),
                    insight.insight.as_str(),
                    to_json(&insight.tags)?,
                    insight.date.as_str(),
                    created_at,
                ],
            )
            .await
            .map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)?;

        info!(count = insights.len(), "stored insights");
        Ok(insights.len())
    }

    /// Insert links, skipping URLs already stored. Returns the number added.
    pub async fn store_links(&self, links: &[Link]) -> Result<usize> {
        if links.is_empty() {
            return Ok(0);
        }

        let tx = self.conn.transaction().await.map_err(db_err)?;
        let now = Utc::now().to_rfc3339();
        let mut added = 0;
        for link in links {
            let inserted = tx
                .execute(
                    "INSERT INTO links (url, title, description, image_url, source, date, tags, enriched, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                     ON CONFLICT(url) DO NOTHING",
                    params![
                        link.url.as_str(),
                        link.title.as_str(),
                        link.description.as_deref(),
                        link.image_url.as_deref(),
                        link.source.as_deref().unwrap_or_default(),
                        link.date.as_deref().unwrap_or_default(),
                        to_json(&link.tags)?,
                        i64::from(link.description.is_some()),
                        now.as_str(),
                    ],
                )
                .await
                .map_err(db_err)?;
            added += inserted as usize;
        }
        tx.commit().await.map_err(db_err)?;

        info!(added, skipped = links.len() - added, "stored links");
        Ok(added)
    }

    // -----------------------------------------------------------------------
    // Configuration and run history
    // -----------------------------------------------------------------------

    pub async fn update_last_run_timestamp(&self) -> Result<()> {
        self.set_config_value("last_run", &Utc::now().to_rfc3339())
            .await
    }

    pub async fn get_last_run(&self) -> Result<Option<String>> {
        self.get_config_value("last_run").await
    }

    pub async fn set_config_value(&self, key: &str, value: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO configuration (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET
                   value = excluded.value,
                   updated_at = excluded.updated_at",
                params![key, value, now.as_str()],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    pub async fn get_config_value(&self, key: &str) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT value FROM configuration WHERE key = ?1",
                params![key],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(row.get::<String>(0).ok()),
            None => Ok(None),
        }
    }

    /// Record the start of a processing run. Returns the run id.
    pub async fn start_processing_run(&self) -> Result<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO processing_runs (start_time, status) VALUES (?1, 'running')",
                params![now.as_str()],
            )
            .await
            .map_err(db_err)?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Close a processing run as `completed`, or `error` when `error` is set.
    pub async fn complete_processing_run(
        &self,
        run_id: i64,
        stats: &RunStats,
        error: Option<&str>,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let status = if error.is_some() { "error" } else { "completed" };
        self.conn
            .execute(
                "UPDATE processing_runs
                 SET end_time = ?1, status = ?2, summaries_created = ?3,
                     links_extracted = ?4, insights_generated = ?5, error_message = ?6
                 WHERE id = ?7",
                params![
                    now.as_str(),
                    status,
                    stats.summaries_created as i64,
                    stats.links_extracted as i64,
                    stats.insights_generated as i64,
                    error,
                    run_id,
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Status of a recorded run (`running`, `completed`, `error`).
    pub async fn get_processing_run_status(&self, run_id: i64) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT status FROM processing_runs WHERE id = ?1",
                params![run_id],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(row.get::<String>(0).map_err(db_err)?)),
            None => Ok(None),
        }
    }

    // -----------------------------------------------------------------------
    // Statistics
    // -----------------------------------------------------------------------

    pub async fn get_statistics(&self) -> Result<Statistics> {
        let week_ago = (Utc::now() - Duration::days(7))
            .format("%Y-%m-%d")
            .to_string();

        Ok(Statistics {
            summaries_count: self.count("SELECT COUNT(*) FROM summaries").await?,
            insights_count: self.count("SELECT COUNT(*) FROM insights").await?,
            questions_count: self.count("SELECT COUNT(*) FROM questions").await?,
            links_count: self.count("SELECT COUNT(*) FROM links").await?,
            processing_runs_count: self.count("SELECT COUNT(*) FROM processing_runs").await?,
            summaries_last_week: {
                let mut rows = self
                    .conn
                    .query(
                        "SELECT COUNT(*) FROM summaries WHERE date >= ?1",
                        params![week_ago.as_str()],
                    )
                    .await
                    .map_err(db_err)?;
                match rows.next().await.map_err(db_err)? {
                    Some(row) => row.get::<i64>(0).map_err(db_err)?,
                    None => 0,
                }
            },
            top_sources: self
                .ranking(
                    "SELECT source, COUNT(*) AS n FROM summaries
                     GROUP BY source ORDER BY n DESC LIMIT 10",
                )
                .await?,
            top_tags: self
                .ranking("SELECT name, usage_count FROM tags ORDER BY usage_count DESC LIMIT 10")
                .await?,
            last_run: self.get_last_run().await?,
        })
    }

    async fn count(&self, sql: &str) -> Result<i64> {
        let mut rows = self.conn.query(sql, params![]).await.map_err(db_err)?;
        match rows.next().await.map_err(db_err)? {
            Some(row) => row.get::<i64>(0).map_err(db_err),
            None => Ok(0),
        }
    }

    async fn ranking(&self, sql: &str) -> Result<Vec<(String, i64)>> {
        let mut rows = self.conn.query(sql, params![]).await.map_err(db_err)?;
        let mut ranked = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            ranked.push((
                row.get::<String>(0).map_err(db_err)?,
                row.get::<i64>(1).map_err(db_err)?,
            ));
        }
        Ok(ranked)
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn db_err(e: libsql::Error) -> ResearchError {
    ResearchError::Storage(e.to_string())
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| ResearchError::Storage(format!("encoding: {e}")))
}

fn from_json<T: DeserializeOwned + Default>(raw: Option<String>) -> T {
    raw.and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default()
}

fn summary_params(summary: &Summary, now: &str) -> Result<Vec<libsql::Value>> {
    let created_at = summary.created_at.clone().unwrap_or_else(|| now.to_string());
    Ok(vec![
        summary.title.clone().into(),
        summary.source.clone().into(),
        summary.source_type.clone().into(),
        summary.date.clone().into(),
        summary.summary.clone().into(),
        to_json(&summary.questions)?.into(),
        to_json(&summary.tags)?.into(),
        to_json(&summary.links)?.into(),
        (summary.content_length as i64).into(),
        (summary.chunks_processed as i64).into(),
        created_at.into(),
        i64::from(summary.read).into(),
        i64::from(summary.starred).into(),
    ])
}

fn row_to_summary(row: &Row) -> Result<Summary> {
    Ok(Summary {
        id: Some(row.get::<i64>(0).map_err(db_err)?),
        title: row.get::<String>(1).map_err(db_err)?,
        source: row.get::<String>(2).map_err(db_err)?,
        source_type: row.get::<String>(3).unwrap_or_default(),
        date: row.get::<String>(4).map_err(db_err)?,
        summary: row.get::<String>(5).unwrap_or_default(),
        questions: from_json(row.get::<String>(6).ok()),
        tags: from_json(row.get::<String>(7).ok()),
        links: from_json(row.get::<String>(8).ok()),
        content_length: row.get::<i64>(9).unwrap_or(0).max(0) as usize,
        chunks_processed: row.get::<i64>(10).unwrap_or(0).max(0) as usize,
        created_at: row.get::<String>(11).ok(),
        read: row.get::<i64>(12).unwrap_or(0) != 0,
        starred: row.get::<i64>(13).unwrap_or(0) != 0,
        ..Default::default()
    })
}
