//! SQL migration definitions for the corpus ledger.
//!
//! Migrations are applied in order on open. Each one records its version in
//! `schema_migrations` as its final statement.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Initial schema: sessions ledger",
            sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per session: the latest known outcome
CREATE TABLE IF NOT EXISTS sessions (
    session_id     INTEGER PRIMARY KEY,
    title          TEXT NOT NULL,
    meeting_date   TEXT,
    committee_id   INTEGER NOT NULL,
    inquiry_id     INTEGER,
    witnesses_json TEXT NOT NULL DEFAULT '[]',
    outcome        TEXT NOT NULL CHECK (outcome IN ('fetched', 'no_document', 'failed')),
    failure_reason TEXT,
    byte_length    INTEGER,
    char_length    INTEGER,
    text_path      TEXT,
    content_sha256 TEXT,
    attempts       INTEGER NOT NULL DEFAULT 1,
    fetched_at     TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_sessions_outcome ON sessions(outcome);
CREATE INDEX IF NOT EXISTS idx_sessions_date ON sessions(meeting_date);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
        Migration {
            version: 2,
            description: "Harvest run history",
            sql: r#"
CREATE TABLE IF NOT EXISTS harvest_runs (
    id           TEXT PRIMARY KEY,
    committee_id INTEGER NOT NULL,
    started_at   TEXT NOT NULL,
    finished_at  TEXT,
    stats_json   TEXT
);

INSERT INTO schema_migrations (version) VALUES (2);
"#,
        },
    ]
}
