//! Topic modelling over the fetched corpus.
//!
//! The modelling itself happens outside this workspace. [`BridgeModeller`]
//! spawns the configured bridge process and exchanges JSON lines with it:
//!
//! ```text
//! bridge → {"type":"ready"}
//! core   → {"type":"fit","documents":[{"session_id":1,"date":"2024-02-27","text":"..."}]}
//! bridge → {"type":"result","assignments":[...],"topics":[...]}   or {"type":"error","error":"..."}
//! core   → {"type":"shutdown"}
//! ```
//!
//! This module selects the documents, persists whatever the modeller answers
//! and tallies per-year prevalence. It does not interpret topics further.

use std::collections::{BTreeMap, HashMap};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use hearings_shared::{HarvestError, Result, SessionId, TopicsConfig};
use hearings_storage::Corpus;

use crate::manifest::write_json_atomic;

/// Topic id the modeller uses for documents it could not place.
pub const OUTLIER_TOPIC: i64 = -1;

/// Column that absorbs every topic outside the top N.
pub const OTHER_LABEL: &str = "Other";

/// Output directory under the corpus root.
pub const TOPICS_DIR: &str = "topics";

/// Keywords kept per topic in `topic_labels.json`.
const LABEL_KEYWORDS: usize = 10;

// ---------------------------------------------------------------------------
// Modeller interface
// ---------------------------------------------------------------------------

/// One transcript handed to the modeller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopicDocument {
    pub session_id: SessionId,
    pub date: NaiveDate,
    /// Inquiry title, kept for the per-session output; not sent to the bridge.
    #[serde(skip)]
    pub title: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicAssignment {
    pub session_id: SessionId,
    pub topic_id: i64,
}

/// A discovered topic as described by the modeller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicInfo {
    pub topic_id: i64,
    pub label: String,
    pub count: usize,
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// Everything the modeller returns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicModel {
    pub assignments: Vec<TopicAssignment>,
    pub topics: Vec<TopicInfo>,
}

/// Something that can assign topics to documents.
pub trait TopicModeller {
    fn fit(&mut self, documents: &[TopicDocument]) -> Result<TopicModel>;
}

// ---------------------------------------------------------------------------
// Bridge protocol
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RequestMessage<'a> {
    Fit { documents: &'a [TopicDocument] },
    Shutdown,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseMessage {
    Ready,
    Result {
        assignments: Vec<TopicAssignment>,
        topics: Vec<TopicInfo>,
    },
    Error {
        error: String,
    },
}

/// Runs the external bridge process for each fit.
#[derive(Debug, Clone)]
pub struct BridgeModeller {
    cmd: String,
    args: Vec<String>,
}

impl BridgeModeller {
    pub fn new(cmd: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            cmd: cmd.into(),
            args,
        }
    }

    pub fn from_config(config: &TopicsConfig) -> Self {
        Self::new(config.bridge_cmd.clone(), config.bridge_args.clone())
    }
}

impl TopicModeller for BridgeModeller {
    #[instrument(skip_all, fields(cmd = %self.cmd, documents = documents.len()))]
    fn fit(&mut self, documents: &[TopicDocument]) -> Result<TopicModel> {
        let mut bridge = BridgeHandle::spawn(self)?;
        let result = bridge.fit(documents);
        bridge.shutdown();
        result
    }
}

/// Handle to the spawned bridge subprocess.
struct BridgeHandle {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
}

impl BridgeHandle {
    fn spawn(modeller: &BridgeModeller) -> Result<Self> {
        info!(cmd = %modeller.cmd, args = ?modeller.args, "spawning topic bridge");

        let mut command = Command::new(&modeller.cmd);
        command
            .args(&modeller.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());

        let mut child = command.spawn().map_err(|e| {
            HarvestError::Topics(format!(
                "failed to spawn bridge: {e}. Is `{}` installed?",
                modeller.cmd
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| HarvestError::Topics("failed to capture bridge stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| HarvestError::Topics("failed to capture bridge stdout".into()))?;

        let mut handle = Self {
            child,
            stdin,
            reader: BufReader::new(stdout),
        };

        match handle.read_message()? {
            ResponseMessage::Ready => {
                info!("bridge is ready");
                Ok(handle)
            }
            other => {
                handle.shutdown();
                Err(HarvestError::Topics(format!(
                    "expected ready message, got {other:?}"
                )))
            }
        }
    }

    fn fit(&mut self, documents: &[TopicDocument]) -> Result<TopicModel> {
        self.send(&RequestMessage::Fit { documents })?;

        match self.read_message()? {
            ResponseMessage::Result {
                assignments,
                topics,
            } => Ok(TopicModel {
                assignments,
                topics,
            }),
            ResponseMessage::Error { error } => Err(HarvestError::Topics(error)),
            ResponseMessage::Ready => Err(HarvestError::Topics(
                "unexpected ready message during fit".into(),
            )),
        }
    }

    fn send(&mut self, message: &RequestMessage<'_>) -> Result<()> {
        let json = serde_json::to_string(message)
            .map_err(|e| HarvestError::Topics(format!("failed to serialize request: {e}")))?;
        writeln!(self.stdin, "{json}")
            .and_then(|()| self.stdin.flush())
            .map_err(|e| HarvestError::Topics(format!("failed to write to bridge stdin: {e}")))
    }

    fn read_message(&mut self) -> Result<ResponseMessage> {
        let mut line = String::new();
        self.reader
            .read_line(&mut line)
            .map_err(|e| HarvestError::Topics(format!("bridge read error: {e}")))?;

        if line.is_empty() {
            return Err(HarvestError::Topics(
                "bridge closed stdout unexpectedly".into(),
            ));
        }

        serde_json::from_str(line.trim()).map_err(|e| {
            let preview: String = line.chars().take(200).collect();
            HarvestError::Topics(format!("invalid bridge message: {e} (got: {preview})"))
        })
    }

    /// Ask the bridge to exit and reap it.
    fn shutdown(mut self) {
        if let Err(e) = self.send(&RequestMessage::Shutdown) {
            warn!(error = %e, "could not send shutdown to bridge");
        }
        drop(self.stdin);

        match self.child.wait() {
            Ok(status) => info!(?status, "bridge exited"),
            Err(e) => warn!("bridge wait error: {e}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Outputs
// ---------------------------------------------------------------------------

/// One row of `topics_by_session.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTopic {
    pub session_id: SessionId,
    pub date: NaiveDate,
    pub title: String,
    pub topic_id: i64,
    pub topic_label: String,
}

/// `prevalence_by_year.json`: session counts per year, one column per label.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prevalence {
    /// Column labels: top topics by total descending, then [`OTHER_LABEL`].
    pub columns: Vec<String>,
    pub years: Vec<YearPrevalence>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearPrevalence {
    pub year: i32,
    /// Aligned with [`Prevalence::columns`].
    pub counts: Vec<usize>,
}

/// Summary of a topics run.
#[derive(Debug, Clone)]
pub struct TopicsReport {
    pub documents: usize,
    pub topics: usize,
    pub outliers: usize,
    pub output_dir: PathBuf,
}

/// Fetched transcripts with a known date and at least `min_chars` characters,
/// in date order.
pub fn select_documents(corpus: &Corpus, min_chars: usize) -> Result<Vec<TopicDocument>> {
    let mut documents = Vec::new();

    for entry in corpus.fetched() {
        let Some(date) = entry.date else {
            continue;
        };
        if entry.char_length() < min_chars {
            continue;
        }
        let text = corpus.read_text(entry)?;
        if text.chars().count() < min_chars {
            continue;
        }
        documents.push(TopicDocument {
            session_id: entry.session_id,
            date,
            title: entry.title.clone(),
            text,
        });
    }

    documents.sort_by_key(|d| (d.date, d.session_id));
    Ok(documents)
}

/// Select documents, fit `modeller` and write the three output files under
/// `<root>/topics/`.
#[instrument(skip_all, fields(root = %corpus.root().display(), min_chars = config.min_chars))]
pub fn run_topics(
    corpus: &Corpus,
    config: &TopicsConfig,
    modeller: &mut dyn TopicModeller,
) -> Result<TopicsReport> {
    let documents = select_documents(corpus, config.min_chars)?;
    if documents.is_empty() {
        return Err(HarvestError::Topics(format!(
            "no dated transcripts of at least {} characters to model",
            config.min_chars
        )));
    }
    info!(documents = documents.len(), "fitting topic model");

    let model = modeller.fit(&documents)?;
    let sessions = join_assignments(&documents, &model);
    let prevalence = prevalence_by_year(&sessions, &model.topics, config.top_n);

    let labels: Vec<TopicInfo> = model
        .topics
        .iter()
        .filter(|t| t.topic_id != OUTLIER_TOPIC)
        .map(|t| TopicInfo {
            keywords: t.keywords.iter().take(LABEL_KEYWORDS).cloned().collect(),
            ..t.clone()
        })
        .collect();

    let output_dir = corpus.root().join(TOPICS_DIR);
    write_json_atomic(&output_dir.join("topics_by_session.json"), &sessions)?;
    write_json_atomic(&output_dir.join("topic_labels.json"), &labels)?;
    write_json_atomic(&output_dir.join("prevalence_by_year.json"), &prevalence)?;

    let outliers = sessions
        .iter()
        .filter(|s| s.topic_id == OUTLIER_TOPIC)
        .count();
    info!(
        documents = sessions.len(),
        topics = labels.len(),
        outliers,
        "topic outputs written"
    );

    Ok(TopicsReport {
        documents: sessions.len(),
        topics: labels.len(),
        outliers,
        output_dir,
    })
}

/// Pair every document with its assigned topic. Documents the modeller left
/// out count as outliers.
fn join_assignments(documents: &[TopicDocument], model: &TopicModel) -> Vec<SessionTopic> {
    let assigned: HashMap<SessionId, i64> = model
        .assignments
        .iter()
        .map(|a| (a.session_id, a.topic_id))
        .collect();
    let labels: HashMap<i64, &str> = model
        .topics
        .iter()
        .map(|t| (t.topic_id, t.label.as_str()))
        .collect();

    let unknown = model
        .assignments
        .iter()
        .filter(|a| !documents.iter().any(|d| d.session_id == a.session_id))
        .count();
    if unknown > 0 {
        warn!(unknown, "modeller returned assignments for unknown sessions");
    }

    documents
        .iter()
        .map(|doc| {
            let topic_id = assigned.get(&doc.session_id).copied().unwrap_or_else(|| {
                warn!(session = %doc.session_id, "no topic assigned, counting as outlier");
                OUTLIER_TOPIC
            });
            SessionTopic {
                session_id: doc.session_id,
                date: doc.date,
                title: doc.title.clone(),
                topic_id,
                topic_label: labels.get(&topic_id).copied().unwrap_or_default().to_string(),
            }
        })
        .collect()
}

/// Count sessions per year for the `top_n` largest topics (outliers never
/// qualify); everything else lands in [`OTHER_LABEL`].
pub fn prevalence_by_year(
    sessions: &[SessionTopic],
    topics: &[TopicInfo],
    top_n: usize,
) -> Prevalence {
    let mut ranked: Vec<&TopicInfo> = topics
        .iter()
        .filter(|t| t.topic_id != OUTLIER_TOPIC)
        .collect();
    ranked.sort_by(|a, b| b.count.cmp(&a.count).then(a.topic_id.cmp(&b.topic_id)));
    ranked.truncate(top_n);

    let top: HashMap<i64, (usize, &str)> = ranked
        .iter()
        .enumerate()
        .map(|(rank, t)| (t.topic_id, (rank, t.label.as_str())))
        .collect();

    // year -> column label -> count
    let mut grid: BTreeMap<i32, HashMap<&str, usize>> = BTreeMap::new();
    // column label -> (total, best rank)
    let mut totals: HashMap<&str, (usize, usize)> = HashMap::new();

    for session in sessions {
        let (column, rank) = match top.get(&session.topic_id) {
            Some(&(rank, label)) => (label, rank),
            None => (OTHER_LABEL, usize::MAX),
        };
        *grid
            .entry(session.date.year())
            .or_default()
            .entry(column)
            .or_default() += 1;
        let total = totals.entry(column).or_insert((0, rank));
        total.0 += 1;
        total.1 = total.1.min(rank);
    }

    let mut columns: Vec<(&str, usize, usize)> = totals
        .iter()
        .filter(|(label, _)| **label != OTHER_LABEL)
        .map(|(label, (total, rank))| (*label, *total, *rank))
        .collect();
    columns.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));

    let mut labels: Vec<&str> = columns.into_iter().map(|(label, _, _)| label).collect();
    if totals.contains_key(OTHER_LABEL) {
        labels.push(OTHER_LABEL);
    }

    let years = grid
        .into_iter()
        .map(|(year, counts)| YearPrevalence {
            year,
            counts: labels
                .iter()
                .map(|label| counts.get(label).copied().unwrap_or(0))
                .collect(),
        })
        .collect();

    Prevalence {
        columns: labels.into_iter().map(String::from).collect(),
        years,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
