//! Read-side views over the corpus: snapshots, audits, run history.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use hearings_shared::{HarvestError, LedgerEntry, Result, SessionId};

// ---------------------------------------------------------------------------
// Corpus
// ---------------------------------------------------------------------------

/// A point-in-time copy of the ledger, plus the root needed to read artifacts.
#[derive(Debug, Clone)]
pub struct Corpus {
    root: PathBuf,
    entries: Vec<LedgerEntry>,
}

impl Corpus {
    pub(crate) fn new(root: PathBuf, entries: Vec<LedgerEntry>) -> Self {
        Self { root, entries }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// All ledger rows, ordered by meeting date then session id.
    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries with a persisted transcript.
    pub fn fetched(&self) -> impl Iterator<Item = &LedgerEntry> {
        self.entries.iter().filter(|e| e.is_fetched())
    }

    /// Read the transcript text of a fetched entry.
    pub fn read_text(&self, entry: &LedgerEntry) -> Result<String> {
        let rel = entry.text_path.as_deref().ok_or_else(|| {
            HarvestError::validation(format!("session {} has no artifact", entry.session_id))
        })?;
        let path = self.root.join(rel);
        std::fs::read_to_string(&path).map_err(|e| HarvestError::io(&path, e))
    }
}

// ---------------------------------------------------------------------------
// Verification
// ---------------------------------------------------------------------------

/// Result of auditing the ledger against the artifact directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerifyReport {
    /// Fetched rows checked.
    pub checked: usize,
    /// Fetched rows whose artifact does not exist.
    pub missing: Vec<SessionId>,
    /// Fetched rows whose artifact is empty.
    pub empty: Vec<SessionId>,
    /// Fetched rows whose artifact no longer matches the recorded hash.
    pub corrupt: Vec<SessionId>,
    /// Artifacts on disk with no fetched row.
    pub orphans: Vec<PathBuf>,
}

impl VerifyReport {
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty()
            && self.empty.is_empty()
            && self.corrupt.is_empty()
            && self.orphans.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Counts and run history
// ---------------------------------------------------------------------------

/// Ledger totals by outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LedgerCounts {
    pub fetched: usize,
    pub no_document: usize,
    pub failed: usize,
    /// Sum of `char_length` over fetched rows.
    pub total_chars: u64,
}

impl LedgerCounts {
    pub fn total(&self) -> usize {
        self.fetched + self.no_document + self.failed
    }
}

/// Counters stored with a finished harvest run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    pub fetched: usize,
    pub skipped: usize,
    pub no_document: usize,
    pub failed: usize,
    pub pages: u32,
    /// Page index and reason, when the catalog walk ended early.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub truncated: Option<(u32, String)>,
    #[serde(default)]
    pub interrupted: bool,
}

/// One row of `harvest_runs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunRecord {
    pub id: String,
    pub committee_id: i64,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub stats: Option<RunStats>,
}
