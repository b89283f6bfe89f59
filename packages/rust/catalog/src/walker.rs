//! Catalog walker: pages through the committee's oral-evidence listing.
//!
//! Pagination is by page index `n`, sent as `Skip = n * page_size` and
//! `Take = page_size`. The walk always restarts at page 0 and ends on the
//! first page with no items.

use std::time::Duration;

use chrono::NaiveDate;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use hearings_shared::{HarvestConfig, HarvestError, Result, SessionDescriptor, SessionId};

use crate::client::ApiClient;

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

/// Listing body: the live API wraps items, older mirrors return a bare array.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ListingBody {
    Bare(Vec<SessionSummary>),
    Wrapped {
        items: Vec<SessionSummary>,
        #[serde(default, rename = "totalResults")]
        total_results: Option<u64>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionSummary {
    id: i64,
    #[serde(default)]
    meeting_date: Option<String>,
    #[serde(default)]
    committee_businesses: Vec<CommitteeBusiness>,
    #[serde(default)]
    witnesses: Vec<Witness>,
}

#[derive(Debug, Deserialize)]
struct CommitteeBusiness {
    #[serde(default)]
    id: Option<i64>,
    #[serde(default)]
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Witness {
    #[serde(default)]
    name: Option<String>,
}

impl SessionSummary {
    fn into_descriptor(self, committee_id: i64) -> SessionDescriptor {
        let date = self
            .meeting_date
            .as_deref()
            .and_then(|raw| raw.get(..10))
            .and_then(|day| NaiveDate::parse_from_str(day, "%Y-%m-%d").ok());

        let first_business = self.committee_businesses.into_iter().next();
        let inquiry_id = first_business.as_ref().and_then(|b| b.id);
        let title = first_business.and_then(|b| b.title).unwrap_or_default();

        let witnesses = self
            .witnesses
            .into_iter()
            .filter_map(|w| w.name)
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect();

        SessionDescriptor {
            id: SessionId(self.id),
            title,
            date,
            committee_id,
            inquiry_id,
            witnesses,
        }
    }
}

// ---------------------------------------------------------------------------
// Walker
// ---------------------------------------------------------------------------

/// One step of the catalog walk.
#[derive(Debug)]
pub enum CatalogPage {
    /// A non-empty page of sessions.
    Sessions {
        page: u32,
        sessions: Vec<SessionDescriptor>,
    },
    /// The listing has no more items.
    Exhausted,
    /// A page after the first could not be read; earlier pages stand.
    Truncated { page: u32, reason: String },
}

/// Walks the listing for one committee, one page per call.
#[derive(Debug)]
pub struct CatalogWalker {
    api: ApiClient,
    committee_id: i64,
    page_size: u32,
    page_delay: Duration,
    next_page: u32,
    finished: bool,
}

impl CatalogWalker {
    pub fn new(api: ApiClient, config: &HarvestConfig) -> Self {
        Self {
            api,
            committee_id: config.committee_id,
            page_size: config.page_size.max(1),
            page_delay: config.page_delay,
            next_page: 0,
            finished: false,
        }
    }

    /// Fetch the next page.
    ///
    /// Returns `Err(CatalogUnavailable)` only when page 0 fails. Once
    /// `Exhausted` or `Truncated` has been returned, every further call
    /// returns `Exhausted` without touching the network.
    #[instrument(skip_all, fields(committee = self.committee_id, page = self.next_page))]
    pub async fn next_page(&mut self) -> Result<CatalogPage> {
        if self.finished {
            return Ok(CatalogPage::Exhausted);
        }

        let page = self.next_page;
        if page > 0 && !self.page_delay.is_zero() {
            tokio::time::sleep(self.page_delay).await;
        }

        match self.fetch_page(page).await {
            Ok(sessions) if sessions.is_empty() => {
                info!(page, "catalog exhausted");
                self.finished = true;
                Ok(CatalogPage::Exhausted)
            }
            Ok(sessions) => {
                debug!(page, count = sessions.len(), "catalog page read");
                self.next_page += 1;
                Ok(CatalogPage::Sessions { page, sessions })
            }
            Err(reason) if page == 0 => {
                self.finished = true;
                Err(HarvestError::CatalogUnavailable(reason))
            }
            Err(reason) => {
                warn!(page, %reason, "catalog walk truncated");
                self.finished = true;
                Ok(CatalogPage::Truncated { page, reason })
            }
        }
    }

    /// Walk every page and return all descriptors plus the truncation, if any.
    pub async fn collect_all(
        &mut self,
    ) -> Result<(Vec<SessionDescriptor>, Option<(u32, String)>)> {
        let mut all = Vec::new();
        loop {
            match self.next_page().await? {
                CatalogPage::Sessions { sessions, .. } => all.extend(sessions),
                CatalogPage::Exhausted => return Ok((all, None)),
                CatalogPage::Truncated { page, reason } => return Ok((all, Some((page, reason)))),
            }
        }
    }

    async fn fetch_page(&self, page: u32) -> std::result::Result<Vec<SessionDescriptor>, String> {
        let url = self.api.url("/OralEvidence");
        let skip = u64::from(page) * u64::from(self.page_size);
        let query = [
            ("CommitteeId", self.committee_id.to_string()),
            ("Skip", skip.to_string()),
            ("Take", self.page_size.to_string()),
        ];

        let reply = self
            .api
            .get(&url, &query)
            .await
            .map_err(|failure| failure.error.to_string())?;

        if reply.status == StatusCode::NOT_FOUND {
            return Err(format!("{url}: HTTP 404"));
        }

        let body: ListingBody = serde_json::from_str(&reply.body)
            .map_err(|e| format!("unreadable catalog page {page}: {e}"))?;

        let items = match body {
            ListingBody::Wrapped {
                items,
                total_results,
            } => {
                debug!(page, ?total_results, "listing envelope");
                items
            }
            ListingBody::Bare(items) => items,
        };

        Ok(items
            .into_iter()
            .map(|item| item.into_descriptor(self.committee_id))
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::client::test_support::config_for;

    fn item(id: i64, date: &str, title: &str) -> serde_json::Value {
        json!({
            "id": id,
            "meetingDate": date,
            "committeeBusinesses": [{ "id": 900 + id, "title": title }],
            "witnesses": [{ "name": "Andrew Bailey" }, { "name": " Sarah Breeden " }],
            "document": null
        })
    }

    async fn mount_page(server: &MockServer, skip: u32, body: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path("/OralEvidence"))
            .and(query_param("CommitteeId", "158"))
            .and(query_param("Skip", skip.to_string()))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    fn walker_for(server: &MockServer, page_size: u32) -> CatalogWalker {
        let mut config = config_for(&server.uri());
        config.page_size = page_size;
        CatalogWalker::new(ApiClient::new(&config).unwrap(), &config)
    }

    #[test]
    fn summary_maps_to_descriptor() {
        let summary: SessionSummary =
            serde_json::from_value(item(5, "2024-02-27T10:00:00", "Monetary Policy")).unwrap();
        let descriptor = summary.into_descriptor(158);

        assert_eq!(descriptor.id, SessionId(5));
        assert_eq!(descriptor.title, "Monetary Policy");
        assert_eq!(descriptor.date, NaiveDate::from_ymd_opt(2024, 2, 27));
        assert_eq!(descriptor.inquiry_id, Some(905));
        assert_eq!(descriptor.witnesses, vec!["Andrew Bailey", "Sarah Breeden"]);
    }

    #[test]
    fn missing_fields_degrade_gracefully() {
        let summary: SessionSummary =
            serde_json::from_value(json!({ "id": 6, "meetingDate": "soon" })).unwrap();
        let descriptor = summary.into_descriptor(158);

        assert_eq!(descriptor.title, "");
        assert_eq!(descriptor.date, None);
        assert_eq!(descriptor.inquiry_id, None);
        assert!(descriptor.witnesses.is_empty());
    }

    #[tokio::test]
    async fn walks_until_empty_page() {
        let server = MockServer::start().await;
        mount_page(
            &server,
            0,
            json!({ "items": [item(1, "2024-01-10", "A"), item(2, "2024-01-11", "B")], "totalResults": 3 }),
        )
        .await;
        mount_page(&server, 2, json!({ "items": [item(3, "2024-01-12", "C")], "totalResults": 3 })).await;
        mount_page(&server, 4, json!({ "items": [], "totalResults": 3 })).await;

        let mut walker = walker_for(&server, 2);
        let (sessions, truncated) = walker.collect_all().await.unwrap();

        let ids: Vec<i64> = sessions.iter().map(|s| s.id.0).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert!(truncated.is_none());
        assert!(matches!(walker.next_page().await.unwrap(), CatalogPage::Exhausted));
    }

    #[tokio::test]
    async fn bare_array_listing_is_accepted() {
        let server = MockServer::start().await;
        mount_page(&server, 0, json!([item(10, "2023-05-01", "Bare")])).await;
        mount_page(&server, 50, json!([])).await;

        let (sessions, truncated) = walker_for(&server, 50).collect_all().await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].title, "Bare");
        assert!(truncated.is_none());
    }

    #[tokio::test]
    async fn first_page_failure_is_catalog_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/OralEvidence"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = walker_for(&server, 50).next_page().await.unwrap_err();
        assert!(matches!(err, HarvestError::CatalogUnavailable(_)));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn object_without_items_is_not_an_empty_page() {
        let server = MockServer::start().await;
        mount_page(&server, 0, json!({ "error": "maintenance" })).await;

        let err = walker_for(&server, 50).next_page().await.unwrap_err();
        match err {
            HarvestError::CatalogUnavailable(reason) => {
                assert!(reason.contains("unreadable catalog page 0"), "{reason}")
            }
            other => panic!("expected CatalogUnavailable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn later_page_failure_truncates() {
        let server = MockServer::start().await;
        mount_page(&server, 0, json!({ "items": [item(1, "2024-01-10", "A")] })).await;
        Mock::given(method("GET"))
            .and(path("/OralEvidence"))
            .and(query_param("Skip", "1"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let mut walker = walker_for(&server, 1);
        let (sessions, truncated) = walker.collect_all().await.unwrap();

        assert_eq!(sessions.len(), 1);
        let (page, reason) = truncated.expect("walk should be truncated");
        assert_eq!(page, 1);
        assert!(reason.contains("502"));
    }
}
