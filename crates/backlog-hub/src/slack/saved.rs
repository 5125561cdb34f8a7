use super::SlackClient;
use crate::tracker::SnapshotSource;
use backlog_core::{normalize_external_id, Snapshot, SnapshotEntry};
use chrono::{TimeZone, Utc};
use reqwest::header::COOKIE;
use reqwest::multipart::Form;
use serde::Deserialize;
use std::future::Future;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

const SAVED_LIST_METHOD: &str = "saved.list";
const PAGE_LIMIT: &str = "100";
pub const MAX_PAGES: usize = 20;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("saved.list request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid saved.list url: {0}")]
    Url(#[from] url::ParseError),
    #[error("saved.list returned ok=false: {0}")]
    NotOk(String),
    #[error("saved.list pagination exceeded {0} pages")]
    TooManyPages(usize),
}

#[derive(Debug, Deserialize)]
pub struct SavedListResponse {
    #[serde(default)]
    pub ok: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub counts: Option<SavedCounts>,
    #[serde(default)]
    pub saved_items: Vec<SavedRecord>,
    #[serde(default)]
    pub response_metadata: Option<ResponseMetadata>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SavedCounts {
    #[serde(default)]
    pub uncompleted_count: u64,
    #[serde(default)]
    pub uncompleted_overdue_count: u64,
}

#[derive(Debug, Deserialize)]
pub struct SavedRecord {
    #[serde(default)]
    pub item_id: Option<String>,
    #[serde(default)]
    pub ts: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub date_created: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ResponseMetadata {
    #[serde(default)]
    pub next_cursor: Option<String>,
}

impl SavedListResponse {
    pub fn reported_open_count(&self) -> Option<u64> {
        self.counts
            .as_ref()
            .map(|counts| {
                counts
                    .uncompleted_count
                    .saturating_add(counts.uncompleted_overdue_count)
            })
    }

    /// Turns an `ok=false` page into `FetchError::NotOk`.
    pub fn into_result(self) -> Result<Self, FetchError> {
        if self.ok {
            Ok(self)
        } else {
            Err(FetchError::NotOk(
                self.error.unwrap_or_else(|| "unknown_error".to_string()),
            ))
        }
    }

    pub fn next_cursor(&self) -> Option<&str> {
        self.response_metadata
            .as_ref()
            .and_then(|meta| meta.next_cursor.as_deref())
            .filter(|cursor| !cursor.trim().is_empty())
    }
}

impl SavedRecord {
    /// Saved messages are keyed by their message timestamp, the same value
    /// star events carry, so `ts` is preferred over `item_id`.
    pub fn external_id(&self) -> Option<String> {
        self.ts
            .as_deref()
            .and_then(normalize_external_id)
            .or_else(|| self.item_id.as_deref().and_then(normalize_external_id))
    }

    pub fn is_open(&self) -> bool {
        match self.state.as_deref() {
            None => true,
            Some(state) => state == "in_progress",
        }
    }

    /// Records without a usable `date_created` become undated entries.
    pub fn to_entry(&self) -> Option<SnapshotEntry> {
        let external_id = self.external_id()?;
        let created_at = self
            .date_created
            .filter(|secs| *secs > 0)
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single());
        Some(match created_at {
            Some(created_at) => SnapshotEntry::new(external_id, created_at),
            None => SnapshotEntry::undated(external_id),
        })
    }
}

/// Folds fetched pages into one snapshot. The reported count comes from the
/// first page, which carries the totals.
pub fn snapshot_from_pages(pages: &[SavedListResponse]) -> Snapshot {
    let mut entries = Vec::new();
    for record in pages.iter().flat_map(|page| page.saved_items.iter()) {
        if !record.is_open() {
            continue;
        }
        match record.to_entry() {
            Some(entry) => entries.push(entry),
            None => warn!(event = "saved_record_without_id", item_id = ?record.item_id),
        }
    }

    let snapshot = Snapshot::new(entries);
    match pages.first().and_then(SavedListResponse::reported_open_count) {
        Some(count) => snapshot.with_reported_open_count(count),
        None => snapshot,
    }
}

/// Fetches the complete saved-items list with the browser session token and
/// cookie pair the `saved.list` endpoint requires.
#[derive(Clone)]
pub struct SavedListSource {
    client: SlackClient,
    base: Url,
    token: String,
    cookie: String,
}

impl SavedListSource {
    pub fn new(client: SlackClient, base: Url, token: String, cookie: String) -> Self {
        Self {
            client,
            base,
            token,
            cookie,
        }
    }

    async fn fetch_page(&self, cursor: Option<&str>) -> Result<SavedListResponse, FetchError> {
        let mut form = Form::new()
            .text("token", self.token.clone())
            .text("_x_app_name", "client")
            .text("_x_reason", "saved-api/savedList")
            .text("_x_mode", "online")
            .text("_x_sonic", "true")
            .text("limit", PAGE_LIMIT);
        if let Some(cursor) = cursor {
            form = form.text("cursor", cursor.to_string());
        }

        let url = self.base.join(SAVED_LIST_METHOD)?;
        let page: SavedListResponse = self
            .client
            .http()
            .post(url)
            .header(COOKIE, self.cookie.as_str())
            .multipart(form)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        page.into_result()
    }

    pub async fn fetch_all(&self) -> Result<Snapshot, FetchError> {
        let mut pages = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            if pages.len() >= MAX_PAGES {
                return Err(FetchError::TooManyPages(MAX_PAGES));
            }
            let page = self.fetch_page(cursor.as_deref()).await?;
            cursor = page.next_cursor().map(str::to_string);
            debug!(
                event = "saved_page_fetched",
                page = pages.len() + 1,
                items = page.saved_items.len(),
                has_more = cursor.is_some()
            );
            pages.push(page);
            if cursor.is_none() {
                break;
            }
        }
        Ok(snapshot_from_pages(&pages))
    }
}

impl SnapshotSource for SavedListSource {
    type Error = FetchError;

    fn fetch_snapshot(&self) -> impl Future<Output = Result<Snapshot, FetchError>> + Send {
        self.fetch_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(body: serde_json::Value) -> SavedListResponse {
        serde_json::from_value(body).expect("page parse")
    }

    #[test]
    fn entries_use_message_ts_and_creation_time() {
        let pages = vec![page(serde_json::json!({
            "ok": true,
            "counts": {"uncompleted_count": 2, "uncompleted_overdue_count": 1},
            "saved_items": [
                {"item_id": "C01", "item_type": "message", "ts": "1712708450.151", "state": "in_progress", "date_created": 1712708460},
                {"item_id": "C01", "item_type": "message", "ts": "1712708999.000", "state": "completed", "date_created": 1712709000},
                {"item_id": "F99", "item_type": "file", "date_created": 0}
            ]
        }))];

        let snapshot = snapshot_from_pages(&pages);

        assert_eq!(snapshot.reported_open_count, Some(3));
        assert_eq!(snapshot.entries.len(), 2);
        assert_eq!(snapshot.entries[0].external_id, "1712708450.151");
        assert_eq!(
            snapshot.entries[0].remote_created_at,
            Utc.timestamp_opt(1712708460, 0).single()
        );
        assert_eq!(snapshot.entries[1], SnapshotEntry::undated("F99"));
    }

    #[test]
    fn records_without_identifier_are_skipped() {
        let pages = vec![page(serde_json::json!({
            "ok": true,
            "saved_items": [{"ts": "  ", "date_created": 1712708460}, {"item_id": "C02"}]
        }))];

        let snapshot = snapshot_from_pages(&pages);

        assert_eq!(snapshot.reported_open_count, None);
        assert_eq!(snapshot.entries.len(), 1);
        assert_eq!(snapshot.entries[0].external_id, "C02");
    }

    #[test]
    fn pages_are_concatenated_and_cursor_detected() {
        let first = page(serde_json::json!({
            "ok": true,
            "counts": {"uncompleted_count": 2},
            "saved_items": [{"ts": "1.1"}],
            "response_metadata": {"next_cursor": "abc"}
        }));
        let second = page(serde_json::json!({
            "ok": true,
            "saved_items": [{"ts": "2.2"}],
            "response_metadata": {"next_cursor": ""}
        }));
        assert_eq!(first.next_cursor(), Some("abc"));
        assert_eq!(second.next_cursor(), None);

        let snapshot = snapshot_from_pages(&[first, second]);
        let ids: Vec<_> = snapshot.entries.iter().map(|e| e.external_id.as_str()).collect();
        assert_eq!(ids, vec!["1.1", "2.2"]);
        assert_eq!(snapshot.reported_open_count, Some(2));
    }

    #[test]
    fn not_ok_page_becomes_fetch_error() {
        let response = page(serde_json::json!({"ok": false, "error": "not_authed"}));
        assert!(matches!(
            response.into_result(),
            Err(FetchError::NotOk(error)) if error == "not_authed"
        ));

        let bare = page(serde_json::json!({"ok": false}));
        assert!(matches!(
            bare.into_result(),
            Err(FetchError::NotOk(error)) if error == "unknown_error"
        ));

        let fine = page(serde_json::json!({"ok": true, "saved_items": [{"ts": "1.1"}]}));
        assert_eq!(fine.into_result().expect("ok page").saved_items.len(), 1);
    }

    #[test]
    fn huge_reported_counts_saturate() {
        let response = page(serde_json::json!({
            "ok": true,
            "counts": {"uncompleted_count": u64::MAX, "uncompleted_overdue_count": 5}
        }));
        assert_eq!(response.reported_open_count(), Some(u64::MAX));
    }

    #[test]
    fn undated_record_is_stable_across_fetches() {
        let body = serde_json::json!({"ok": true, "saved_items": [{"ts": "1.1", "state": "in_progress"}]});
        let first = snapshot_from_pages(&[page(body.clone())]);
        let second = snapshot_from_pages(&[page(body)]);
        assert_eq!(first, second);
        assert_eq!(first.entries[0].remote_created_at, None);
    }
}
