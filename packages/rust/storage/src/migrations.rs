//! SQL migration definitions for the research database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: summaries, insights, questions, links, tags, configuration, processing_runs",
        sql: r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS summaries (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    title            TEXT NOT NULL,
    source           TEXT NOT NULL,
    source_type      TEXT NOT NULL DEFAULT 'newsletter',
    date             TEXT NOT NULL,
    summary          TEXT,
    questions        TEXT NOT NULL DEFAULT '[]',
    tags             TEXT NOT NULL DEFAULT '[]',
    links            TEXT NOT NULL DEFAULT '[]',
    content_length   INTEGER NOT NULL DEFAULT 0,
    chunks_processed INTEGER NOT NULL DEFAULT 1,
    created_at       TEXT NOT NULL,
    read             INTEGER NOT NULL DEFAULT 0,
    starred          INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_summaries_date ON summaries(date);
CREATE INDEX IF NOT EXISTS idx_summaries_source ON summaries(source);
CREATE INDEX IF NOT EXISTS idx_summaries_source_type ON summaries(source_type);

-- summary_id is NULL for standalone insights
CREATE TABLE IF NOT EXISTS insights (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    summary_id INTEGER REFERENCES summaries(id) ON DELETE CASCADE,
    source     TEXT NOT NULL,
    topic      TEXT,
    insight    TEXT NOT NULL,
    tags       TEXT NOT NULL DEFAULT '[]',
    date       TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_insights_summary ON insights(summary_id);
CREATE INDEX IF NOT EXISTS idx_insights_date ON insights(date);

CREATE TABLE IF NOT EXISTS questions (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    summary_id INTEGER REFERENCES summaries(id) ON DELETE CASCADE,
    source     TEXT NOT NULL,
    question   TEXT NOT NULL,
    topic      TEXT,
    date       TEXT NOT NULL,
    answered   INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_questions_summary ON questions(summary_id);

CREATE TABLE IF NOT EXISTS links (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    summary_id  INTEGER REFERENCES summaries(id) ON DELETE CASCADE,
    url         TEXT NOT NULL UNIQUE,
    title       TEXT,
    description TEXT,
    image_url   TEXT,
    source      TEXT NOT NULL,
    date        TEXT NOT NULL,
    tags        TEXT NOT NULL DEFAULT '[]',
    enriched    INTEGER NOT NULL DEFAULT 0,
    visited     INTEGER NOT NULL DEFAULT 0,
    created_at  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_links_source ON links(source);
CREATE INDEX IF NOT EXISTS idx_links_date ON links(date);

CREATE TABLE IF NOT EXISTS tags (
    name        TEXT PRIMARY KEY,
    usage_count INTEGER NOT NULL DEFAULT 0,
    last_used   TEXT
);

CREATE TABLE IF NOT EXISTS configuration (
    key        TEXT PRIMARY KEY,
    value      TEXT,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS processing_runs (
    id                 INTEGER PRIMARY KEY AUTOINCREMENT,
    start_time         TEXT NOT NULL,
    end_time           TEXT,
    status             TEXT NOT NULL DEFAULT 'running',
    summaries_created  INTEGER NOT NULL DEFAULT 0,
    links_extracted    INTEGER NOT NULL DEFAULT 0,
    insights_generated INTEGER NOT NULL DEFAULT 0,
    error_message      TEXT
);

CREATE INDEX IF NOT EXISTS idx_processing_runs_start ON processing_runs(start_time);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
