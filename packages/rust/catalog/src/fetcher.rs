//! Per-session transcript retrieval.
//!
//! `GET {base}/OralEvidence/{id}/Document/Html` returns a JSON envelope whose
//! `data` field holds the base64-encoded HTML transcript.

use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, instrument};

use hearings_shared::{HarvestError, SessionId};

use crate::client::ApiClient;

/// Result of fetching one session's document.
#[derive(Debug)]
pub enum Fetch {
    /// Raw base64 payload, not yet decoded.
    Document(Vec<u8>),
    /// The remote confirms there is no transcript for this session.
    NoDocument,
    /// Retries were exhausted or the failure is permanent.
    Failed { error: HarvestError, attempts: u32 },
}

#[derive(Debug, Deserialize)]
struct DocumentEnvelope {
    #[serde(default)]
    data: Option<String>,
}

/// Fetches transcript payloads through a shared [`ApiClient`].
#[derive(Debug, Clone)]
pub struct DocumentFetcher {
    api: ApiClient,
}

impl DocumentFetcher {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    /// Fetch the encoded transcript for `id`.
    ///
    /// Never returns an error: failures are carried in [`Fetch::Failed`] so
    /// the caller can record them and move on.
    #[instrument(skip_all, fields(session = %id))]
    pub async fn fetch(&self, id: SessionId) -> Fetch {
        let url = self.api.url(&format!("/OralEvidence/{id}/Document/Html"));

        let reply = match self.api.get(&url, &[]).await {
            Ok(reply) => reply,
            Err(failure) => {
                return Fetch::Failed {
                    error: failure.error,
                    attempts: failure.attempts,
                };
            }
        };

        if reply.status == StatusCode::NOT_FOUND || reply.body.trim().is_empty() {
            debug!(status = %reply.status, "no document for session");
            return Fetch::NoDocument;
        }

        match serde_json::from_str::<DocumentEnvelope>(&reply.body) {
            Ok(DocumentEnvelope { data: Some(data) }) if !data.trim().is_empty() => {
                debug!(payload_len = data.len(), attempts = reply.attempts, "document fetched");
                Fetch::Document(data.into_bytes())
            }
            Ok(_) => {
                debug!("document envelope has no data");
                Fetch::NoDocument
            }
            Err(e) => Fetch::Failed {
                error: HarvestError::PermanentFetch(format!(
                    "unreadable document envelope for session {id}: {e}"
                )),
                attempts: reply.attempts,
            },
        }
    }
}
