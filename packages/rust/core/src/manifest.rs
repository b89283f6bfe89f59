//! `manifest.json` export: the ledger as a single JSON document.
//!
//! The manifest is what downstream consumers read instead of opening the
//! ledger database. Rows are sorted by meeting date (undated last).

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use hearings_shared::{CURRENT_SCHEMA_VERSION, HarvestError, LedgerEntry, OutcomeKind, Result};
use hearings_storage::{Corpus, LedgerCounts};

/// Manifest file name under the corpus root.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Top-level `manifest.json` document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub schema_version: u32,
    pub tool_version: String,
    pub generated_at: DateTime<Utc>,
    pub totals: ManifestTotals,
    pub sessions: Vec<LedgerEntry>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestTotals {
    pub sessions: usize,
    pub fetched: usize,
    pub no_document: usize,
    pub failed: usize,
    pub total_chars: u64,
}

impl From<LedgerCounts> for ManifestTotals {
    fn from(counts: LedgerCounts) -> Self {
        Self {
            sessions: counts.total(),
            fetched: counts.fetched,
            no_document: counts.no_document,
            failed: counts.failed,
            total_chars: counts.total_chars,
        }
    }
}

impl Manifest {
    /// Build a manifest from a ledger snapshot.
    pub fn from_corpus(corpus: &Corpus) -> Self {
        let mut totals = ManifestTotals {
            sessions: corpus.len(),
            ..ManifestTotals::default()
        };
        for entry in corpus.entries() {
            match entry.outcome.kind() {
                OutcomeKind::Fetched => {
                    totals.fetched += 1;
                    totals.total_chars += entry.char_length() as u64;
                }
                OutcomeKind::NoDocument => totals.no_document += 1,
                OutcomeKind::Failed => totals.failed += 1,
            }
        }

        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            generated_at: Utc::now(),
            totals,
            sessions: corpus.entries().to_vec(),
        }
    }
}

/// Write `manifest.json` into the corpus root. Returns the written path.
#[instrument(skip_all, fields(root = %corpus.root().display(), sessions = corpus.len()))]
pub fn export_manifest(corpus: &Corpus) -> Result<PathBuf> {
    let manifest = Manifest::from_corpus(corpus);
    let path = corpus.root().join(MANIFEST_FILE);
    write_json_atomic(&path, &manifest)?;

    info!(
        path = %path.display(),
        fetched = manifest.totals.fetched,
        no_document = manifest.totals.no_document,
        failed = manifest.totals.failed,
        "manifest exported"
    );
    Ok(path)
}

/// Read a previously exported manifest.
pub fn load_manifest(root: &Path) -> Result<Manifest> {
    let path = root.join(MANIFEST_FILE);
    let content = std::fs::read_to_string(&path).map_err(|e| HarvestError::io(&path, e))?;
    let manifest: Manifest = serde_json::from_str(&content)
        .map_err(|e| HarvestError::validation(format!("invalid {MANIFEST_FILE}: {e}")))?;

    if manifest.schema_version > CURRENT_SCHEMA_VERSION {
        return Err(HarvestError::validation(format!(
            "{MANIFEST_FILE} schema v{} is newer than supported v{CURRENT_SCHEMA_VERSION}",
            manifest.schema_version
        )));
    }
    Ok(manifest)
}

/// Write a pretty-printed JSON file via a hidden temp file and rename.
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, data: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| HarvestError::validation(format!("JSON serialization failed: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| HarvestError::validation(format!("{} has no parent", path.display())))?;
    std::fs::create_dir_all(dir).map_err(|e| HarvestError::io(dir, e))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = dir.join(format!(".{file_name}.tmp"));

    std::fs::write(&temp, json).map_err(|e| HarvestError::io(&temp, e))?;
    std::fs::rename(&temp, path).map_err(|e| HarvestError::io(path, e))?;

    debug!(path = %path.display(), "wrote JSON file");
    Ok(())
}
