//! Core domain types for the transcript corpus.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Current schema version for the exported `manifest.json` format.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// SessionId
// ---------------------------------------------------------------------------

/// Remote identifier of one oral-evidence session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub i64);

impl SessionId {
    /// File name of the session's text artifact (`{id}.txt`).
    pub fn artifact_name(&self) -> String {
        format!("{}.txt", self.0)
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for SessionId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(s.trim().parse()?))
    }
}

impl From<i64> for SessionId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

// ---------------------------------------------------------------------------
// SessionDescriptor
// ---------------------------------------------------------------------------

/// A session as listed by the remote catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescriptor {
    /// Remote session identifier.
    pub id: SessionId,
    /// Title of the first committee business (inquiry) the session belongs to.
    pub title: String,
    /// Meeting date, if the catalog supplied a parseable one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    /// The collection (committee) the session was listed under.
    pub committee_id: i64,
    /// Identifier of the first committee business, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inquiry_id: Option<i64>,
    /// Witness names in listing order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub witnesses: Vec<String>,
}

// ---------------------------------------------------------------------------
// FetchOutcome
// ---------------------------------------------------------------------------

/// Terminal outcome of one harvest attempt for a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FetchOutcome {
    /// Transcript decoded and persisted.
    Fetched {
        /// UTF-8 length of the stored text.
        byte_length: usize,
        /// Character count of the stored text.
        char_length: usize,
    },
    /// The session legitimately has no transcript.
    NoDocument,
    /// The attempt failed; later runs retry it.
    Failed { reason: String },
}

impl FetchOutcome {
    /// The outcome's discriminant.
    pub fn kind(&self) -> OutcomeKind {
        match self {
            Self::Fetched { .. } => OutcomeKind::Fetched,
            Self::NoDocument => OutcomeKind::NoDocument,
            Self::Failed { .. } => OutcomeKind::Failed,
        }
    }

    /// Build the `Fetched` outcome for a decoded text.
    pub fn fetched(text: &str) -> Self {
        Self::Fetched {
            byte_length: text.len(),
            char_length: text.chars().count(),
        }
    }
}

/// Outcome discriminant, as stored in the ledger's `outcome` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Fetched,
    NoDocument,
    Failed,
}

impl OutcomeKind {
    /// Ledger column value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fetched => "fetched",
            Self::NoDocument => "no_document",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OutcomeKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "fetched" => Ok(Self::Fetched),
            "no_document" => Ok(Self::NoDocument),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown outcome '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// LedgerEntry
// ---------------------------------------------------------------------------

/// One ledger row: the latest known state of a session in the corpus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Unique key.
    pub session_id: SessionId,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    pub committee_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inquiry_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub witnesses: Vec<String>,
    #[serde(flatten)]
    pub outcome: FetchOutcome,
    /// Artifact path relative to the corpus root. Present iff `Fetched`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_path: Option<String>,
    /// SHA-256 of the artifact content. Present iff `Fetched`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_sha256: Option<String>,
    /// Number of harvest attempts made for this session across runs.
    pub attempts: u32,
    /// When the latest attempt was recorded.
    pub fetched_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Whether the entry claims a persisted transcript.
    pub fn is_fetched(&self) -> bool {
        matches!(self.outcome, FetchOutcome::Fetched { .. })
    }

    /// Character count of the stored text, or 0 when not fetched.
    pub fn char_length(&self) -> usize {
        match self.outcome {
            FetchOutcome::Fetched { char_length, .. } => char_length,
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_roundtrip() {
        let id: SessionId = " 14213 ".parse().expect("parse SessionId");
        assert_eq!(id, SessionId(14213));
        assert_eq!(id.to_string(), "14213");
        assert_eq!(id.artifact_name(), "14213.txt");
    }

    #[test]
    fn fetched_outcome_counts_chars_not_bytes() {
        let outcome = FetchOutcome::fetched("Chancellor — évidence");
        match outcome {
            FetchOutcome::Fetched {
                byte_length,
                char_length,
            } => {
                assert_eq!(char_length, 21);
                assert!(byte_length > char_length);
            }
            other => panic!("expected Fetched, got {other:?}"),
        }
    }

    #[test]
    fn outcome_kind_parses_ledger_values() {
        for kind in [OutcomeKind::Fetched, OutcomeKind::NoDocument, OutcomeKind::Failed] {
            let parsed: OutcomeKind = kind.as_str().parse().unwrap();
            assert_eq!(parsed, kind);
        }
        assert!("pending".parse::<OutcomeKind>().is_err());
    }

    #[test]
    fn ledger_entry_serializes_flat_outcome() {
        let entry = LedgerEntry {
            session_id: SessionId(7),
            title: "Bank of England Monetary Policy Reports".into(),
            date: NaiveDate::from_ymd_opt(2024, 2, 27),
            committee_id: 158,
            inquiry_id: Some(1866),
            witnesses: vec!["Andrew Bailey".into()],
            outcome: FetchOutcome::Fetched {
                byte_length: 120,
                char_length: 118,
            },
            text_path: Some("transcripts/7.txt".into()),
            content_sha256: Some("ab".repeat(32)),
            attempts: 1,
            fetched_at: Utc::now(),
        };

        let json = serde_json::to_value(&entry).expect("serialize");
        assert_eq!(json["outcome"], "fetched");
        assert_eq!(json["char_length"], 118);
        assert_eq!(json["date"], "2024-02-27");

        let parsed: LedgerEntry = serde_json::from_value(json).expect("deserialize");
        assert_eq!(parsed, entry);
        assert!(parsed.is_fetched());
    }

    #[test]
    fn non_fetched_entry_has_zero_chars() {
        let entry = LedgerEntry {
            session_id: SessionId(8),
            title: String::new(),
            date: None,
            committee_id: 158,
            inquiry_id: None,
            witnesses: vec![],
            outcome: FetchOutcome::Failed {
                reason: "HTTP 403".into(),
            },
            text_path: None,
            content_sha256: None,
            attempts: 2,
            fetched_at: Utc::now(),
        };
        assert_eq!(entry.char_length(), 0);
        assert!(!entry.is_fetched());
    }
}
