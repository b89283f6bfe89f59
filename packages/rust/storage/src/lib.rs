//! Corpus store: transcript artifacts on disk plus a libSQL ledger.
//!
//! Layout under the corpus root:
//!
//! ```text
//! <root>/
//!   ledger.db              one row per session (see `migrations`)
//!   transcripts/{id}.txt   decoded transcript text
//! ```
//!
//! **Write ordering:** an artifact is fully written and renamed into place
//! before its ledger row is upserted. A crash between the two leaves an
//! artifact without a `fetched` row, which [`CorpusStore::has`] treats as
//! absent and [`CorpusStore::verify`] reports as an orphan.
//!
//! **Access rules:**
//! - harvest runs: read-write (sole writer) via [`CorpusStore::open`]
//! - status, export, topics: read-only via [`CorpusStore::open_readonly`]

mod artifacts;
mod corpus;
mod migrations;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use libsql::{Connection, Database, params};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use hearings_shared::{
    FetchOutcome, HarvestError, LedgerEntry, OutcomeKind, Result, SessionDescriptor, SessionId,
};

pub use corpus::{Corpus, LedgerCounts, RunRecord, RunStats, VerifyReport};

/// Ledger database file name under the corpus root.
pub const LEDGER_FILE: &str = "ledger.db";

/// Artifact directory name under the corpus root.
pub const TRANSCRIPTS_DIR: &str = "transcripts";

const ENTRY_COLUMNS: &str = "session_id, title, meeting_date, committee_id, inquiry_id, \
     witnesses_json, outcome, failure_reason, byte_length, char_length, text_path, \
     content_sha256, attempts, fetched_at";

/// Handle over one corpus directory.
pub struct CorpusStore {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    root: PathBuf,
    readonly: bool,
}

impl CorpusStore {
    /// Open or create the corpus at `root` in read-write mode.
    ///
    /// Creates the directory layout, removes temp files left by an
    /// interrupted write and applies pending migrations.
    #[instrument(skip_all, fields(root = %root.display()))]
    pub async fn open(root: &Path) -> Result<Self> {
        let transcripts = root.join(TRANSCRIPTS_DIR);
        std::fs::create_dir_all(&transcripts).map_err(|e| HarvestError::io(&transcripts, e))?;

        let swept = artifacts::sweep_temp_files(&transcripts)?;
        if swept > 0 {
            info!(swept, "cleaned up interrupted artifact writes");
        }

        let (db, conn) = connect(&root.join(LEDGER_FILE)).await?;
        let store = Self {
            db,
            conn,
            root: root.to_path_buf(),
            readonly: false,
        };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Open an existing corpus at `root` in read-only mode.
    pub async fn open_readonly(root: &Path) -> Result<Self> {
        let ledger = root.join(LEDGER_FILE);
        if !ledger.is_file() {
            return Err(HarvestError::Storage(format!(
                "no corpus ledger at {}",
                ledger.display()
            )));
        }

        let (db, conn) = connect(&ledger).await?;
        Ok(Self {
            db,
            conn,
            root: root.to_path_buf(),
            readonly: true,
        })
    }

    /// Corpus root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path of a session's artifact.
    pub fn artifact_path(&self, id: SessionId) -> PathBuf {
        self.root.join(TRANSCRIPTS_DIR).join(id.artifact_name())
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
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
                        HarvestError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(HarvestError::Storage(
                "corpus is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Session queries
    // -----------------------------------------------------------------------

    /// The ledger row for `id`, if any.
    pub async fn get(&self, id: SessionId) -> Result<Option<LedgerEntry>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {ENTRY_COLUMNS} FROM sessions WHERE session_id = ?1"),
                params![id.0],
            )
            .await
            .map_err(|e| HarvestError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_entry(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(HarvestError::Storage(e.to_string())),
        }
    }

    /// True iff the ledger says `fetched` and the artifact exists and is
    /// non-empty. A missing artifact makes the session eligible again.
    pub async fn has(&self, id: SessionId) -> Result<bool> {
        let Some(entry) = self.get(id).await? else {
            return Ok(false);
        };
        self.artifact_present(&entry)
    }

    /// True if the session needs no further work: fetched (per [`has`]) or
    /// recorded as having no document.
    ///
    /// [`has`]: CorpusStore::has
    pub async fn is_settled(&self, id: SessionId) -> Result<bool> {
        let Some(entry) = self.get(id).await? else {
            return Ok(false);
        };
        match entry.outcome {
            FetchOutcome::NoDocument => Ok(true),
            FetchOutcome::Fetched { .. } => self.artifact_present(&entry),
            FetchOutcome::Failed { .. } => Ok(false),
        }
    }

    fn artifact_present(&self, entry: &LedgerEntry) -> Result<bool> {
        if !entry.is_fetched() {
            return Ok(false);
        }
        let path = self.artifact_path(entry.session_id);
        match artifacts::artifact_len(&path)? {
            Some(len) if len > 0 => Ok(true),
            _ => {
                warn!(session = %entry.session_id, path = %path.display(), "ledger row has no usable artifact");
                Ok(false)
            }
        }
    }

    /// All ledger rows ordered by meeting date (undated last), then id.
    pub async fn entries(&self) -> Result<Vec<LedgerEntry>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {ENTRY_COLUMNS} FROM sessions
                     ORDER BY meeting_date IS NULL, meeting_date, session_id"
                ),
                params![],
            )
            .await
            .map_err(|e| HarvestError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| HarvestError::Storage(e.to_string()))?
        {
            results.push(row_to_entry(&row)?);
        }
        Ok(results)
    }

    /// Read-only view of the whole ledger.
    pub async fn snapshot(&self) -> Result<Corpus> {
        Ok(Corpus::new(self.root.clone(), self.entries().await?))
    }

    /// Totals by outcome.
    pub async fn counts(&self) -> Result<LedgerCounts> {
        let mut rows = self
            .conn
            .query(
                "SELECT outcome, COUNT(*), COALESCE(SUM(char_length), 0)
                 FROM sessions GROUP BY outcome",
                params![],
            )
            .await
            .map_err(|e| HarvestError::Storage(e.to_string()))?;

        let mut counts = LedgerCounts::default();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| HarvestError::Storage(e.to_string()))?
        {
            let outcome: String = row
                .get(0)
                .map_err(|e| HarvestError::Storage(e.to_string()))?;
            let count = row
                .get::<i64>(1)
                .map_err(|e| HarvestError::Storage(e.to_string()))? as usize;
            let chars = row
                .get::<i64>(2)
                .map_err(|e| HarvestError::Storage(e.to_string()))?;

            match outcome.parse::<OutcomeKind>() {
                Ok(OutcomeKind::Fetched) => {
                    counts.fetched = count;
                    counts.total_chars = chars.max(0) as u64;
                }
                Ok(OutcomeKind::NoDocument) => counts.no_document = count,
                Ok(OutcomeKind::Failed) => counts.failed = count,
                Err(e) => return Err(HarvestError::Storage(e)),
            }
        }
        Ok(counts)
    }

    // -----------------------------------------------------------------------
    // Session writes
    // -----------------------------------------------------------------------

    /// Persist a decoded transcript and mark the session `fetched`.
    ///
    /// The artifact is written atomically first; the ledger row is upserted
    /// last.
    #[instrument(skip_all, fields(session = %descriptor.id, chars = tracing::field::Empty))]
    pub async fn put(&self, descriptor: &SessionDescriptor, text: &str) -> Result<LedgerEntry> {
        self.check_writable()?;
        if text.is_empty() {
            return Err(HarvestError::validation(format!(
                "refusing to store empty transcript for session {}",
                descriptor.id
            )));
        }

        let name = descriptor.id.artifact_name();
        let dir = self.root.join(TRANSCRIPTS_DIR);
        let sha = artifacts::write_atomic(&dir, &name, text.as_bytes())?;
        let rel = format!("{TRANSCRIPTS_DIR}/{name}");

        let outcome = FetchOutcome::fetched(text);
        tracing::Span::current().record("chars", outcome_chars(&outcome));

        self.upsert(descriptor, &outcome, Some(&rel), Some(&sha)).await
    }

    /// Record a `no_document` or `failed` outcome without an artifact.
    #[instrument(skip_all, fields(session = %descriptor.id, outcome = %outcome.kind()))]
    pub async fn put_non_fetched(
        &self,
        descriptor: &SessionDescriptor,
        outcome: FetchOutcome,
    ) -> Result<LedgerEntry> {
        self.check_writable()?;
        if matches!(outcome, FetchOutcome::Fetched { .. }) {
            return Err(HarvestError::validation(
                "fetched outcomes must be stored with put()",
            ));
        }
        self.upsert(descriptor, &outcome, None, None).await
    }

    async fn upsert(
        &self,
        descriptor: &SessionDescriptor,
        outcome: &FetchOutcome,
        text_path: Option<&str>,
        content_sha256: Option<&str>,
    ) -> Result<LedgerEntry> {
        let witnesses = serde_json::to_string(&descriptor.witnesses)
            .map_err(|e| HarvestError::Storage(format!("witness list: {e}")))?;
        let (reason, byte_length, char_length) = match outcome {
            FetchOutcome::Fetched {
                byte_length,
                char_length,
            } => (None, Some(*byte_length as i64), Some(*char_length as i64)),
            FetchOutcome::NoDocument => (None, None, None),
            FetchOutcome::Failed { reason } => (Some(reason.as_str()), None, None),
        };
        let date = descriptor.date.map(|d| d.format("%Y-%m-%d").to_string());
        let now = Utc::now().to_rfc3339();

        self.conn
            .execute(
                "INSERT INTO sessions (session_id, title, meeting_date, committee_id, inquiry_id,
                   witnesses_json, outcome, failure_reason, byte_length, char_length, text_path,
                   content_sha256, attempts, fetched_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, 1, ?13)
                 ON CONFLICT(session_id) DO UPDATE SET
                   title = excluded.title,
                   meeting_date = excluded.meeting_date,
                   committee_id = excluded.committee_id,
                   inquiry_id = excluded.inquiry_id,
                   witnesses_json = excluded.witnesses_json,
                   outcome = excluded.outcome,
                   failure_reason = excluded.failure_reason,
                   byte_length = excluded.byte_length,
                   char_length = excluded.char_length,
                   text_path = excluded.text_path,
                   content_sha256 = excluded.content_sha256,
                   attempts = sessions.attempts + 1,
                   fetched_at = excluded.fetched_at",
                params![
                    descriptor.id.0,
                    descriptor.title.as_str(),
                    date,
                    descriptor.committee_id,
                    descriptor.inquiry_id,
                    witnesses,
                    outcome.kind().as_str(),
                    reason,
                    byte_length,
                    char_length,
                    text_path,
                    content_sha256,
                    now,
                ],
            )
            .await
            .map_err(|e| HarvestError::Storage(e.to_string()))?;

        debug!(session = %descriptor.id, outcome = %outcome.kind(), "ledger row upserted");

        self.get(descriptor.id).await?.ok_or_else(|| {
            HarvestError::Storage(format!("session {} vanished after upsert", descriptor.id))
        })
    }

    // -----------------------------------------------------------------------
    // Verification
    // -----------------------------------------------------------------------

    /// Audit fetched rows against the files in `transcripts/`.
    #[instrument(skip_all, fields(root = %self.root.display()))]
    pub async fn verify(&self) -> Result<VerifyReport> {
        let entries = self.entries().await?;
        let mut report = VerifyReport::default();
        let mut claimed = HashSet::new();

        for entry in entries.iter().filter(|e| e.is_fetched()) {
            report.checked += 1;
            let path = self.artifact_path(entry.session_id);
            claimed.insert(path.clone());

            match artifacts::artifact_len(&path)? {
                None => report.missing.push(entry.session_id),
                Some(0) => report.empty.push(entry.session_id),
                Some(_) => {
                    let bytes = std::fs::read(&path).map_err(|e| HarvestError::io(&path, e))?;
                    let actual = artifacts::sha256_hex(&bytes);
                    if entry.content_sha256.as_deref() != Some(actual.as_str()) {
                        report.corrupt.push(entry.session_id);
                    }
                }
            }
        }

        for path in artifacts::list_artifacts(&self.root.join(TRANSCRIPTS_DIR))? {
            if !claimed.contains(&path) {
                report.orphans.push(path);
            }
        }

        info!(
            checked = report.checked,
            missing = report.missing.len(),
            empty = report.empty.len(),
            corrupt = report.corrupt.len(),
            orphans = report.orphans.len(),
            "corpus verified"
        );
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Run history
    // -----------------------------------------------------------------------

    /// Record the start of a harvest run. Returns the generated run id.
    pub async fn begin_run(&self, committee_id: i64) -> Result<String> {
        self.check_writable()?;
        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO harvest_runs (id, committee_id, started_at) VALUES (?1, ?2, ?3)",
                params![id.as_str(), committee_id, now.as_str()],
            )
            .await
            .map_err(|e| HarvestError::Storage(e.to_string()))?;
        Ok(id)
    }

    /// Close a harvest run with its counters.
    pub async fn finish_run(&self, run_id: &str, stats: &RunStats) -> Result<()> {
        self.check_writable()?;
        let stats_json = serde_json::to_string(stats)
            .map_err(|e| HarvestError::Storage(format!("run stats: {e}")))?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "UPDATE harvest_runs SET finished_at = ?1, stats_json = ?2 WHERE id = ?3",
                params![now.as_str(), stats_json, run_id],
            )
            .await
            .map_err(|e| HarvestError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Most recent runs first.
    pub async fn recent_runs(&self, limit: usize) -> Result<Vec<RunRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, committee_id, started_at, finished_at, stats_json
                 FROM harvest_runs ORDER BY started_at DESC, id DESC LIMIT ?1",
                params![limit as i64],
            )
            .await
            .map_err(|e| HarvestError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| HarvestError::Storage(e.to_string()))?
        {
            let started_at: String = row
                .get(2)
                .map_err(|e| HarvestError::Storage(e.to_string()))?;
            let finished_at = row.get::<String>(3).ok();
            let stats = match row.get::<String>(4).ok() {
                Some(json) => Some(
                    serde_json::from_str(&json)
                        .map_err(|e| HarvestError::Storage(format!("invalid run stats: {e}")))?,
                ),
                None => None,
            };

            results.push(RunRecord {
                id: row
                    .get::<String>(0)
                    .map_err(|e| HarvestError::Storage(e.to_string()))?,
                committee_id: row
                    .get::<i64>(1)
                    .map_err(|e| HarvestError::Storage(e.to_string()))?,
                started_at: parse_timestamp(&started_at)?,
                finished_at: finished_at.as_deref().map(parse_timestamp).transpose()?,
                stats,
            });
        }
        Ok(results)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn connect(path: &Path) -> Result<(Database, Connection)> {
    let db = libsql::Builder::new_local(path)
        .build()
        .await
        .map_err(|e| HarvestError::Storage(e.to_string()))?;

    let conn = db
        .connect()
        .map_err(|e| HarvestError::Storage(e.to_string()))?;

    Ok((db, conn))
}

fn outcome_chars(outcome: &FetchOutcome) -> u64 {
    match outcome {
        FetchOutcome::Fetched { char_length, .. } => *char_length as u64,
        _ => 0,
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| HarvestError::Storage(format!("invalid timestamp '{s}': {e}")))
}

/// Convert a `sessions` row (selected with [`ENTRY_COLUMNS`]) to a [`LedgerEntry`].
fn row_to_entry(row: &libsql::Row) -> Result<LedgerEntry> {
    let session_id = SessionId(
        row.get::<i64>(0)
            .map_err(|e| HarvestError::Storage(e.to_string()))?,
    );

    let outcome_kind: String = row
        .get(6)
        .map_err(|e| HarvestError::Storage(e.to_string()))?;
    let outcome = match outcome_kind
        .parse::<OutcomeKind>()
        .map_err(HarvestError::Storage)?
    {
        OutcomeKind::Fetched => FetchOutcome::Fetched {
            byte_length: row.get::<i64>(8).unwrap_or(0).max(0) as usize,
            char_length: row.get::<i64>(9).unwrap_or(0).max(0) as usize,
        },
        OutcomeKind::NoDocument => FetchOutcome::NoDocument,
        OutcomeKind::Failed => FetchOutcome::Failed {
            reason: row.get::<String>(7).unwrap_or_default(),
        },
    };

    let date = match row.get::<String>(2).ok() {
        Some(s) => Some(
            NaiveDate::parse_from_str(&s, "%Y-%m-%d")
                .map_err(|e| HarvestError::Storage(format!("invalid meeting date '{s}': {e}")))?,
        ),
        None => None,
    };

    let witnesses_json: String = row
        .get(5)
        .map_err(|e| HarvestError::Storage(e.to_string()))?;
    let witnesses: Vec<String> = serde_json::from_str(&witnesses_json)
        .map_err(|e| HarvestError::Storage(format!("invalid witness list: {e}")))?;

    let fetched_at: String = row
        .get(13)
        .map_err(|e| HarvestError::Storage(e.to_string()))?;

    Ok(LedgerEntry {
        session_id,
        title: row
            .get::<String>(1)
            .map_err(|e| HarvestError::Storage(e.to_string()))?,
        date,
        committee_id: row
            .get::<i64>(3)
            .map_err(|e| HarvestError::Storage(e.to_string()))?,
        inquiry_id: row.get::<i64>(4).ok(),
        witnesses,
        outcome,
        text_path: row.get::<String>(10).ok(),
        content_sha256: row.get::<String>(11).ok(),
        attempts: row
            .get::<i64>(12)
            .map_err(|e| HarvestError::Storage(e.to_string()))?
            .max(0) as u32,
        fetched_at: parse_timestamp(&fetched_at)?,
    })
}
