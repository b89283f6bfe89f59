//! Harvest orchestrator: catalog → fetch → decode → store.
//!
//! A run walks the catalog page by page. Sessions already settled in the
//! ledger are skipped without a network call; the rest are fetched behind a
//! semaphore (`concurrency` permits) and decoded off the async workers. Each
//! page's results are awaited in catalog order and written by this task
//! alone, so the store only ever has one writer.
//!
//! Per-session failures become ledger rows. Only an unreadable first catalog
//! page and local storage failures end a run with an error.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Semaphore, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use hearings_catalog::{ApiClient, CatalogPage, CatalogWalker, DocumentFetcher, Fetch};
use hearings_shared::{
    FetchOutcome, HarvestConfig, HarvestError, Result, SessionDescriptor, SessionId,
};
use hearings_storage::{CorpusStore, RunStats};

// ---------------------------------------------------------------------------
// Report and progress
// ---------------------------------------------------------------------------

/// Summary of one harvest run.
#[derive(Debug, Clone, Default)]
pub struct HarvestReport {
    /// Identifier recorded in the store's run history.
    pub run_id: String,
    pub fetched: usize,
    pub skipped: usize,
    pub no_document: usize,
    pub failed: usize,
    /// Non-empty catalog pages processed.
    pub pages: u32,
    /// Page index and reason, when a later catalog page could not be read.
    pub truncated: Option<(u32, String)>,
    /// The configured session limit stopped the run.
    pub limit_reached: bool,
    /// A shutdown request stopped the run.
    pub interrupted: bool,
    pub elapsed: Duration,
}

impl HarvestReport {
    /// Distinct sessions seen this run.
    pub fn sessions(&self) -> usize {
        self.fetched + self.skipped + self.no_document + self.failed
    }

    /// Sessions that needed a fetch this run.
    pub fn attempted(&self) -> usize {
        self.fetched + self.no_document + self.failed
    }

    /// Counters as stored in the run history.
    pub fn stats(&self) -> RunStats {
        RunStats {
            fetched: self.fetched,
            skipped: self.skipped,
            no_document: self.no_document,
            failed: self.failed,
            pages: self.pages,
            truncated: self.truncated.clone(),
            interrupted: self.interrupted,
        }
    }
}

/// What happened to one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStep {
    Skipped,
    Fetched,
    NoDocument,
    Failed,
}

/// Progress callback for reporting harvest status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called when a catalog page has been listed.
    fn page_listed(&self, page: u32, sessions: usize);
    /// Called once per distinct session, in catalog order for fetched ones.
    fn session_finished(&self, id: SessionId, step: SessionStep, processed: usize);
    /// Called when the run completes.
    fn done(&self, report: &HarvestReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn page_listed(&self, _page: u32, _sessions: usize) {}
    fn session_finished(&self, _id: SessionId, _step: SessionStep, _processed: usize) {}
    fn done(&self, _report: &HarvestReport) {}
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Run one harvest against `store`.
///
/// Setting `shutdown` to `true` stops the run after the session being
/// written; in-flight fetches are abandoned. A receiver whose sender has been
/// dropped never triggers.
#[instrument(skip_all, fields(committee = config.committee_id, root = %store.root().display()))]
pub async fn harvest(
    config: &HarvestConfig,
    store: &CorpusStore,
    progress: &dyn ProgressReporter,
    shutdown: watch::Receiver<bool>,
) -> Result<HarvestReport> {
    config.validate()?;
    let start = Instant::now();

    let api = ApiClient::new(config)?;
    let mut walker = CatalogWalker::new(api.clone(), config);
    let run_id = store.begin_run(config.committee_id).await?;

    info!(
        %run_id,
        concurrency = config.concurrency,
        page_size = config.page_size,
        retry_no_document = config.retry_no_document,
        limit = ?config.limit,
        "starting harvest"
    );

    let mut run = Run {
        config,
        store,
        progress,
        fetcher: DocumentFetcher::new(api),
        semaphore: Arc::new(Semaphore::new(config.concurrency.max(1) as usize)),
        shutdown,
        seen: HashSet::new(),
        report: HarvestReport {
            run_id: run_id.clone(),
            ..HarvestReport::default()
        },
    };

    progress.phase("Harvesting transcripts");
    let walked = run.walk(&mut walker).await;

    let mut report = run.report;
    report.elapsed = start.elapsed();
    let finished = store.finish_run(&run_id, &report.stats()).await;

    walked?;
    finished?;

    info!(
        fetched = report.fetched,
        skipped = report.skipped,
        no_document = report.no_document,
        failed = report.failed,
        pages = report.pages,
        truncated = report.truncated.is_some(),
        interrupted = report.interrupted,
        elapsed_ms = report.elapsed.as_millis() as u64,
        "harvest complete"
    );
    progress.done(&report);

    Ok(report)
}

// ---------------------------------------------------------------------------
// Run state
// ---------------------------------------------------------------------------

/// Result of fetching and decoding one session, produced by a worker task.
enum Retrieved {
    Text(String),
    NoDocument,
    Failed(HarvestError),
}

struct Run<'a> {
    config: &'a HarvestConfig,
    store: &'a CorpusStore,
    progress: &'a dyn ProgressReporter,
    fetcher: DocumentFetcher,
    semaphore: Arc<Semaphore>,
    shutdown: watch::Receiver<bool>,
    seen: HashSet<SessionId>,
    report: HarvestReport,
}

impl Run<'_> {
    async fn walk(&mut self, walker: &mut CatalogWalker) -> Result<()> {
        loop {
            if *self.shutdown.borrow() {
                self.report.interrupted = true;
                break;
            }

            let page = tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut self.shutdown) => {
                    self.report.interrupted = true;
                    break;
                }
                page = walker.next_page() => page?,
            };

            match page {
                CatalogPage::Sessions { page, sessions } => {
                    self.report.pages += 1;
                    self.progress.page_listed(page, sessions.len());
                    if !self.process_page(sessions).await? {
                        break;
                    }
                }
                CatalogPage::Exhausted => break,
                CatalogPage::Truncated { page, reason } => {
                    warn!(page, %reason, "catalog truncated, keeping progress so far");
                    self.report.truncated = Some((page, reason));
                    break;
                }
            }
        }

        if self.report.interrupted {
            warn!("harvest interrupted");
        }
        Ok(())
    }

    /// Process one catalog page. Returns `false` when the run should stop.
    async fn process_page(&mut self, sessions: Vec<SessionDescriptor>) -> Result<bool> {
        let mut pending: Vec<(SessionDescriptor, JoinHandle<Retrieved>)> = Vec::new();

        for descriptor in sessions {
            if !self.seen.insert(descriptor.id) {
                debug!(session = %descriptor.id, "duplicate listing, already handled this run");
                continue;
            }

            if self.already_done(descriptor.id).await? {
                self.report.skipped += 1;
                self.progress.session_finished(
                    descriptor.id,
                    SessionStep::Skipped,
                    self.report.sessions(),
                );
                continue;
            }

            if let Some(limit) = self.config.limit {
                if self.report.attempted() + pending.len() >= limit {
                    info!(limit, "session limit reached");
                    self.report.limit_reached = true;
                    break;
                }
            }

            let handle = self.spawn_retrieval(descriptor.id);
            pending.push((descriptor, handle));
        }

        let mut pending = pending.into_iter();
        while let Some((descriptor, mut handle)) = pending.next() {
            let retrieved = tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut self.shutdown) => {
                    handle.abort();
                    for (_, rest) in pending.by_ref() {
                        rest.abort();
                    }
                    self.report.interrupted = true;
                    return Ok(false);
                }
                joined = &mut handle => joined.unwrap_or_else(|e| {
                    Retrieved::Failed(HarvestError::Network(format!("fetch task failed: {e}")))
                }),
            };

            if let Err(e) = self.apply(&descriptor, retrieved).await {
                for (_, rest) in pending.by_ref() {
                    rest.abort();
                }
                return Err(e);
            }
        }

        Ok(!self.report.limit_reached)
    }

    /// Whether the ledger already settles this session for this run.
    async fn already_done(&self, id: SessionId) -> Result<bool> {
        if self.store.has(id).await? {
            return Ok(true);
        }
        if self.config.retry_no_document {
            return Ok(false);
        }
        self.store.is_settled(id).await
    }

    fn spawn_retrieval(&self, id: SessionId) -> JoinHandle<Retrieved> {
        let fetcher = self.fetcher.clone();
        let semaphore = Arc::clone(&self.semaphore);
        let delay = self.config.request_delay;

        tokio::spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return Retrieved::Failed(HarvestError::Network("fetch slots closed".into()));
            };

            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            retrieve(&fetcher, id).await
        })
    }

    /// Record a worker's result. The only place the store is written.
    ///
    /// Fatal errors end the run; anything else becomes a `failed` row.
    async fn apply(&mut self, descriptor: &SessionDescriptor, retrieved: Retrieved) -> Result<()> {
        let step = match retrieved {
            Retrieved::Text(text) => {
                self.store.put(descriptor, &text).await?;
                self.report.fetched += 1;
                SessionStep::Fetched
            }
            Retrieved::NoDocument => {
                self.store
                    .put_non_fetched(descriptor, FetchOutcome::NoDocument)
                    .await?;
                self.report.no_document += 1;
                SessionStep::NoDocument
            }
            Retrieved::Failed(error) if error.is_fatal() => return Err(error),
            Retrieved::Failed(error) => {
                let reason = error.to_string();
                self.store
                    .put_non_fetched(descriptor, FetchOutcome::Failed { reason })
                    .await?;
                self.report.failed += 1;
                SessionStep::Failed
            }
        };

        debug!(session = %descriptor.id, ?step, "session recorded");
        self.progress
            .session_finished(descriptor.id, step, self.report.sessions());
        Ok(())
    }
}

/// Fetch and decode one session.
async fn retrieve(fetcher: &DocumentFetcher, id: SessionId) -> Retrieved {
    let raw = match fetcher.fetch(id).await {
        Fetch::Document(raw) => raw,
        Fetch::NoDocument => return Retrieved::NoDocument,
        Fetch::Failed { error, attempts } => {
            warn!(
                session = %id,
                attempts,
                transient = error.is_transient(),
                error = %error,
                "fetch failed"
            );
            return Retrieved::Failed(error);
        }
    };

    match tokio::task::spawn_blocking(move || hearings_decoder::decode(&raw)).await {
        Ok(Ok(text)) if text.is_empty() => {
            warn!(session = %id, "transcript decoded to empty text");
            Retrieved::Failed(HarvestError::MalformedEncoding(
                "transcript decoded to empty text".into(),
            ))
        }
        Ok(Ok(text)) => Retrieved::Text(text),
        Ok(Err(e)) => {
            warn!(session = %id, error = %e, "transcript could not be decoded");
            Retrieved::Failed(e)
        }
        Err(e) => Retrieved::Failed(HarvestError::MalformedEncoding(format!(
            "decode task failed: {e}"
        ))),
    }
}

/// Resolve once shutdown has been requested; never if the sender is gone.
async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Mutex;

    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use hearings_shared::{AppConfig, RetryPolicy};
    use serde_json::{Value, json};
    use uuid::Uuid;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn temp_root() -> PathBuf {
        std::env::temp_dir().join(format!("hearings-harvest-test-{}", Uuid::now_v7()))
    }

    fn config_for(server: &MockServer, root: &std::path::Path) -> HarvestConfig {
        let mut config = HarvestConfig::from(&AppConfig::default());
        config.base_url = server.uri();
        config.output_dir = root.to_path_buf();
        config.timeout = Duration::from_secs(5);
        config.request_delay = Duration::ZERO;
        config.page_delay = Duration::ZERO;
        config.retry = RetryPolicy::immediate(3);
        config
    }

    fn no_shutdown() -> watch::Receiver<bool> {
        watch::channel(false).1
    }

    fn session(id: i64, date: &str) -> Value {
        json!({
            "id": id,
            "meetingDate": format!("{date}T14:30:00"),
            "committeeBusinesses": [{ "id": 77, "title": "Work of the Bank of England" }],
            "witnesses": [{ "name": "Andrew Bailey" }]
        })
    }

    fn transcript(id: i64) -> String {
        format!("<html><body><p>Q{id} Chair: Welcome to session {id}.</p></body></html>")
    }

    /// Mount `pages` at consecutive `Skip` offsets, followed by an empty page.
    async fn mount_catalog(server: &MockServer, page_size: usize, pages: Vec<Vec<Value>>) {
        let count = pages.len();
        for (i, items) in pages.into_iter().enumerate() {
            Mock::given(method("GET"))
                .and(path("/OralEvidence"))
                .and(query_param("Skip", (i * page_size).to_string()))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "items": items })))
                .mount(server)
                .await;
        }
        Mock::given(method("GET"))
            .and(path("/OralEvidence"))
            .and(query_param("Skip", (count * page_size).to_string()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "items": [] })))
            .mount(server)
            .await;
    }

    async fn mount_document(server: &MockServer, id: i64, expected_calls: u64) {
        Mock::given(method("GET"))
            .and(path(format!("/OralEvidence/{id}/Document/Html")))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "data": STANDARD.encode(transcript(id)) })),
            )
            .expect(expected_calls)
            .mount(server)
            .await;
    }

    async fn mount_status(server: &MockServer, id: i64, status: u16, expected_calls: u64) {
        Mock::given(method("GET"))
            .and(path(format!("/OralEvidence/{id}/Document/Html")))
            .respond_with(ResponseTemplate::new(status))
            .expect(expected_calls)
            .mount(server)
            .await;
    }

    #[derive(Default)]
    struct Recorder {
        steps: Mutex<Vec<(SessionId, SessionStep)>>,
    }

    impl ProgressReporter for Recorder {
        fn phase(&self, _name: &str) {}
        fn page_listed(&self, _page: u32, _sessions: usize) {}
        fn session_finished(&self, id: SessionId, step: SessionStep, _processed: usize) {
            self.steps.lock().unwrap().push((id, step));
        }
        fn done(&self, _report: &HarvestReport) {}
    }

    #[tokio::test]
    async fn fetched_and_missing_sessions_are_both_recorded() {
        let server = MockServer::start().await;
        mount_catalog(&server, 50, vec![vec![session(1, "2024-02-27"), session(2, "2024-03-05")]])
            .await;
        mount_document(&server, 1, 1).await;
        mount_status(&server, 2, 404, 1).await;

        let root = temp_root();
        let store = CorpusStore::open(&root).await.unwrap();
        let config = config_for(&server, &root);

        let report = harvest(&config, &store, &SilentProgress, no_shutdown())
            .await
            .unwrap();

        assert_eq!(report.fetched, 1);
        assert_eq!(report.no_document, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(report.skipped, 0);
        assert_eq!(report.pages, 1);
        assert!(report.truncated.is_none());

        let entries = store.entries().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].is_fetched());
        assert_eq!(entries[0].title, "Work of the Bank of England");
        assert_eq!(entries[1].outcome, FetchOutcome::NoDocument);

        let text = std::fs::read_to_string(store.artifact_path(SessionId(1))).unwrap();
        assert_eq!(text, "Q1 Chair: Welcome to session 1.");

        let runs = store.recent_runs(1).await.unwrap();
        assert_eq!(runs[0].id, report.run_id);
        assert_eq!(runs[0].stats.as_ref().map(|s| s.fetched), Some(1));
    }

    #[tokio::test]
    async fn second_run_makes_no_document_requests() {
        let server = MockServer::start().await;
        mount_catalog(&server, 50, vec![vec![session(1, "2024-02-27"), session(2, "2024-03-05")]])
            .await;
        mount_document(&server, 1, 1).await;
        mount_status(&server, 2, 404, 1).await;

        let root = temp_root();
        let store = CorpusStore::open(&root).await.unwrap();
        let config = config_for(&server, &root);

        harvest(&config, &store, &SilentProgress, no_shutdown())
            .await
            .unwrap();
        let before = store.entries().await.unwrap();

        let report = harvest(&config, &store, &SilentProgress, no_shutdown())
            .await
            .unwrap();

        assert_eq!(report.skipped, 2);
        assert_eq!(report.attempted(), 0);
        assert_eq!(store.entries().await.unwrap(), before);
    }

    #[tokio::test]
    async fn orphan_artifact_without_ledger_row_is_fetched_again() {
        let server = MockServer::start().await;
        mount_catalog(&server, 50, vec![vec![session(11, "2024-04-16")]]).await;
        mount_document(&server, 11, 1).await;

        let root = temp_root();
        let store = CorpusStore::open(&root).await.unwrap();
        // Crash after the artifact rename, before the ledger upsert.
        std::fs::write(store.artifact_path(SessionId(11)), "half-written leftovers").unwrap();
        assert!(!store.verify().await.unwrap().is_clean());

        let report = harvest(&config_for(&server, &root), &store, &SilentProgress, no_shutdown())
            .await
            .unwrap();

        assert_eq!(report.fetched, 1);
        assert_eq!(report.skipped, 0);
        let text = std::fs::read_to_string(store.artifact_path(SessionId(11))).unwrap();
        assert_eq!(text, "Q11 Chair: Welcome to session 11.");
        assert!(store.verify().await.unwrap().is_clean());
    }

    #[tokio::test]
    async fn empty_transcript_is_failed_and_retried_next_run() {
        let server = MockServer::start().await;
        mount_catalog(&server, 50, vec![vec![session(12, "2024-05-21")]]).await;
        let blank = "<html><head><title>x</title></head><body></body></html>";
        Mock::given(method("GET"))
            .and(path("/OralEvidence/12/Document/Html"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "data": STANDARD.encode(blank) })),
            )
            .expect(2)
            .mount(&server)
            .await;

        let root = temp_root();
        let store = CorpusStore::open(&root).await.unwrap();
        let config = config_for(&server, &root);

        let first = harvest(&config, &store, &SilentProgress, no_shutdown())
            .await
            .unwrap();
        assert_eq!(first.failed, 1);
        assert_eq!(first.no_document, 0);
        assert!(!store.artifact_path(SessionId(12)).exists());

        let second = harvest(&config, &store, &SilentProgress, no_shutdown())
            .await
            .unwrap();
        assert_eq!(second.skipped, 0);
        assert_eq!(second.attempted(), 1);

        let entry = store.get(SessionId(12)).await.unwrap().unwrap();
        assert_eq!(entry.attempts, 2);
        assert!(
            matches!(entry.outcome, FetchOutcome::Failed { ref reason } if reason.contains("empty text"))
        );
    }

    #[tokio::test]
    async fn permanent_failure_is_retried_on_next_run() {
        let server = MockServer::start().await;
        mount_catalog(&server, 50, vec![vec![session(5, "2023-11-14")]]).await;
        Mock::given(method("GET"))
            .and(path("/OralEvidence/5/Document/Html"))
            .respond_with(ResponseTemplate::new(403))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        mount_document(&server, 5, 1).await;

        let root = temp_root();
        let store = CorpusStore::open(&root).await.unwrap();
        let config = config_for(&server, &root);

        let first = harvest(&config, &store, &SilentProgress, no_shutdown())
            .await
            .unwrap();
        assert_eq!(first.failed, 1);
        assert!(!store.has(SessionId(5)).await.unwrap());

        let second = harvest(&config, &store, &SilentProgress, no_shutdown())
            .await
            .unwrap();
        assert_eq!(second.fetched, 1);
        assert_eq!(second.skipped, 0);

        let entry = store.get(SessionId(5)).await.unwrap().unwrap();
        assert!(entry.is_fetched());
        assert_eq!(entry.attempts, 2);
    }

    #[tokio::test]
    async fn timing_out_session_fails_after_max_attempts_and_run_continues() {
        let server = MockServer::start().await;
        mount_catalog(&server, 50, vec![vec![session(7, "2022-01-11"), session(8, "2022-01-12")]])
            .await;
        Mock::given(method("GET"))
            .and(path("/OralEvidence/7/Document/Html"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "data": STANDARD.encode(transcript(7)) }))
                    .set_delay(Duration::from_millis(800)),
            )
            .mount(&server)
            .await;
        mount_document(&server, 8, 1).await;

        let root = temp_root();
        let store = CorpusStore::open(&root).await.unwrap();
        let mut config = config_for(&server, &root);
        config.timeout = Duration::from_millis(200);

        let report = harvest(&config, &store, &SilentProgress, no_shutdown())
            .await
            .unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(report.fetched, 1);

        let requests = server.received_requests().await.unwrap();
        let attempts = requests
            .iter()
            .filter(|r| r.url.path() == "/OralEvidence/7/Document/Html")
            .count();
        assert_eq!(attempts, 3);

        match store.get(SessionId(7)).await.unwrap().unwrap().outcome {
            FetchOutcome::Failed { reason } => assert!(reason.contains("timed out"), "{reason}"),
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn undecodable_payload_is_recorded_as_failed() {
        let server = MockServer::start().await;
        mount_catalog(&server, 50, vec![vec![session(9, "2021-06-01")]]).await;
        Mock::given(method("GET"))
            .and(path("/OralEvidence/9/Document/Html"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": "%%not base64%%" })))
            .mount(&server)
            .await;

        let root = temp_root();
        let store = CorpusStore::open(&root).await.unwrap();
        let report = harvest(&config_for(&server, &root), &store, &SilentProgress, no_shutdown())
            .await
            .unwrap();

        assert_eq!(report.failed, 1);
        assert!(!store.artifact_path(SessionId(9)).exists());
        let entry = store.get(SessionId(9)).await.unwrap().unwrap();
        assert!(matches!(entry.outcome, FetchOutcome::Failed { ref reason } if reason.contains("base64")));
    }

    #[tokio::test]
    async fn later_page_failure_keeps_earlier_progress() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/OralEvidence"))
            .and(query_param("Skip", "0"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "items": [session(1, "2024-01-01"), session(2, "2024-01-02")] })),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/OralEvidence"))
            .and(query_param("Skip", "2"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        mount_document(&server, 1, 1).await;
        mount_document(&server, 2, 1).await;

        let root = temp_root();
        let store = CorpusStore::open(&root).await.unwrap();
        let mut config = config_for(&server, &root);
        config.page_size = 2;

        let report = harvest(&config, &store, &SilentProgress, no_shutdown())
            .await
            .unwrap();

        assert_eq!(report.fetched, 2);
        assert_eq!(report.pages, 1);
        let (page, _) = report.truncated.expect("truncated");
        assert_eq!(page, 1);
        assert_eq!(store.counts().await.unwrap().fetched, 2);
    }

    #[tokio::test]
    async fn unreachable_catalog_fails_the_run() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/OralEvidence"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let root = temp_root();
        let store = CorpusStore::open(&root).await.unwrap();
        let err = harvest(&config_for(&server, &root), &store, &SilentProgress, no_shutdown())
            .await
            .unwrap_err();

        assert!(matches!(err, HarvestError::CatalogUnavailable(_)));
        assert!(store.entries().await.unwrap().is_empty());
        assert!(store.recent_runs(1).await.unwrap()[0].finished_at.is_some());
    }

    #[tokio::test]
    async fn duplicate_listings_are_processed_once() {
        let server = MockServer::start().await;
        mount_catalog(
            &server,
            2,
            vec![
                vec![session(3, "2020-02-02"), session(3, "2020-02-02")],
                vec![session(4, "2020-02-03"), session(3, "2020-02-02")],
            ],
        )
        .await;
        mount_document(&server, 3, 1).await;
        mount_document(&server, 4, 1).await;

        let root = temp_root();
        let store = CorpusStore::open(&root).await.unwrap();
        let mut config = config_for(&server, &root);
        config.page_size = 2;

        let report = harvest(&config, &store, &SilentProgress, no_shutdown())
            .await
            .unwrap();

        assert_eq!(report.fetched, 2);
        assert_eq!(report.sessions(), 2);
        assert_eq!(report.pages, 2);
        assert_eq!(store.entries().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn parallel_fetches_are_recorded_in_catalog_order() {
        let server = MockServer::start().await;
        let ids: Vec<i64> = (100..108).collect();
        mount_catalog(
            &server,
            50,
            vec![ids.iter().map(|&id| session(id, "2019-09-09")).collect()],
        )
        .await;
        for &id in &ids {
            // Earlier sessions answer slower, so completion order is reversed.
            let delay = Duration::from_millis(((108 - id) * 15) as u64);
            Mock::given(method("GET"))
                .and(path(format!("/OralEvidence/{id}/Document/Html")))
                .respond_with(
                    ResponseTemplate::new(200)
                        .set_body_json(json!({ "data": STANDARD.encode(transcript(id)) }))
                        .set_delay(delay),
                )
                .expect(1)
                .mount(&server)
                .await;
        }

        let root = temp_root();
        let store = CorpusStore::open(&root).await.unwrap();
        let mut config = config_for(&server, &root);
        config.concurrency = 4;

        let recorder = Recorder::default();
        let report = harvest(&config, &store, &recorder, no_shutdown())
            .await
            .unwrap();

        assert_eq!(report.fetched, 8);
        let order: Vec<i64> = recorder.steps.lock().unwrap().iter().map(|(id, _)| id.0).collect();
        assert_eq!(order, ids);
    }

    #[tokio::test]
    async fn limit_caps_fetches() {
        let server = MockServer::start().await;
        mount_catalog(
            &server,
            50,
            vec![vec![session(1, "2024-01-01"), session(2, "2024-01-02"), session(3, "2024-01-03")]],
        )
        .await;
        mount_document(&server, 1, 1).await;
        mount_document(&server, 2, 0).await;
        mount_document(&server, 3, 0).await;

        let root = temp_root();
        let store = CorpusStore::open(&root).await.unwrap();
        let mut config = config_for(&server, &root);
        config.limit = Some(1);

        let report = harvest(&config, &store, &SilentProgress, no_shutdown())
            .await
            .unwrap();

        assert_eq!(report.fetched, 1);
        assert!(report.limit_reached);
        assert_eq!(store.entries().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn retry_missing_revisits_no_document_sessions() {
        let server = MockServer::start().await;
        mount_catalog(&server, 50, vec![vec![session(6, "2018-05-05")]]).await;
        mount_status(&server, 6, 404, 2).await;

        let root = temp_root();
        let store = CorpusStore::open(&root).await.unwrap();
        let mut config = config_for(&server, &root);

        let first = harvest(&config, &store, &SilentProgress, no_shutdown())
            .await
            .unwrap();
        assert_eq!(first.no_document, 1);

        let plain = harvest(&config, &store, &SilentProgress, no_shutdown())
            .await
            .unwrap();
        assert_eq!(plain.skipped, 1);

        config.retry_no_document = true;
        let revisit = harvest(&config, &store, &SilentProgress, no_shutdown())
            .await
            .unwrap();
        assert_eq!(revisit.no_document, 1);
        assert_eq!(store.get(SessionId(6)).await.unwrap().unwrap().attempts, 2);
    }

    #[tokio::test]
    async fn shutdown_before_start_does_no_work() {
        let server = MockServer::start().await;
        mount_catalog(&server, 50, vec![vec![session(1, "2024-01-01")]]).await;
        mount_document(&server, 1, 0).await;

        let root = temp_root();
        let store = CorpusStore::open(&root).await.unwrap();
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        let report = harvest(&config_for(&server, &root), &store, &SilentProgress, rx)
            .await
            .unwrap();

        assert!(report.interrupted);
        assert_eq!(report.sessions(), 0);
        assert!(store.entries().await.unwrap().is_empty());
    }
}
