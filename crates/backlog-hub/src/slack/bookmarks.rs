use super::{SlackClient, SlackError};
use crate::tracker::MetricsPublisher;
use backlog_core::format::format_average;
use backlog_core::Metrics;
use serde::Deserialize;
use std::future::Future;
use tracing::{debug, warn};
use url::Url;

pub const COUNT_MARKER: &str = ":bookmark:";
pub const AVERAGE_MARKER: &str = ":alarm_clock:";

#[derive(Debug, Clone, Deserialize)]
pub struct Bookmark {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub emoji: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BookmarkList {
    #[serde(default)]
    bookmarks: Vec<Bookmark>,
}

#[derive(Debug, Deserialize)]
struct EditResponse {}

pub fn count_title(metrics: &Metrics) -> String {
    format!("{} items to complete!", metrics.open_count)
}

pub fn average_title(metrics: &Metrics) -> String {
    format!("Avg time per task: {}", format_average(&metrics.average))
}

pub fn find_marked<'a>(bookmarks: &'a [Bookmark], marker: &str) -> Option<&'a Bookmark> {
    bookmarks
        .iter()
        .find(|bookmark| bookmark.emoji.as_deref() == Some(marker))
}

/// Writes the metrics into the two marked channel bookmarks.
#[derive(Clone)]
pub struct BookmarkPublisher {
    client: SlackClient,
    base: Url,
    token: String,
    channel_id: String,
}

impl BookmarkPublisher {
    pub fn new(client: SlackClient, base: Url, token: String, channel_id: String) -> Self {
        Self {
            client,
            base,
            token,
            channel_id,
        }
    }

    async fn list(&self) -> Result<Vec<Bookmark>, SlackError> {
        let list: BookmarkList = self
            .client
            .post_form(
                &self.base,
                "bookmarks.list",
                &self.token,
                &[("channel_id", self.channel_id.as_str())],
            )
            .await?;
        Ok(list.bookmarks)
    }

    async fn set_title(
        &self,
        bookmarks: &[Bookmark],
        marker: &'static str,
        title: String,
    ) -> Result<(), SlackError> {
        let Some(bookmark) = find_marked(bookmarks, marker) else {
            warn!(event = "bookmark_missing", marker = marker, channel_id = %self.channel_id);
            return Ok(());
        };
        if bookmark.title == title {
            debug!(event = "bookmark_unchanged", marker = marker);
            return Ok(());
        }
        let _: EditResponse = self
            .client
            .post_form(
                &self.base,
                "bookmarks.edit",
                &self.token,
                &[
                    ("bookmark_id", bookmark.id.as_str()),
                    ("channel_id", self.channel_id.as_str()),
                    ("title", title.as_str()),
                ],
            )
            .await?;
        debug!(event = "bookmark_updated", marker = marker, title = %title);
        Ok(())
    }

    pub async fn publish_metrics(&self, metrics: &Metrics) -> Result<(), SlackError> {
        let bookmarks = self.list().await?;
        let (count, average) = tokio::join!(
            self.set_title(&bookmarks, COUNT_MARKER, count_title(metrics)),
            self.set_title(&bookmarks, AVERAGE_MARKER, average_title(metrics)),
        );
        if let Err(err) = &count {
            warn!(event = "bookmark_edit_failed", marker = COUNT_MARKER, error = %err);
        }
        if let Err(err) = &average {
            warn!(event = "bookmark_edit_failed", marker = AVERAGE_MARKER, error = %err);
        }
        count.and(average)
    }
}

impl MetricsPublisher for BookmarkPublisher {
    type Error = SlackError;

    fn publish(&self, metrics: &Metrics) -> impl Future<Output = Result<(), SlackError>> + Send {
        let metrics = *metrics;
        async move { self.publish_metrics(&metrics).await }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backlog_core::CompletionAverage;
    use std::time::Duration;

    #[test]
    fn titles_match_display_format() {
        let metrics = Metrics {
            open_count: 12,
            average: CompletionAverage::Mean {
                mean: Duration::from_secs(3_725),
                samples: 4,
            },
        };
        assert_eq!(count_title(&metrics), "12 items to complete!");
        assert_eq!(average_title(&metrics), "Avg time per task: 1h 2m 5s");

        let empty = Metrics {
            open_count: 0,
            average: CompletionAverage::NoData,
        };
        assert_eq!(average_title(&empty), "Avg time per task: N/A");
    }

    #[test]
    fn markers_pick_the_right_bookmark() {
        let list: BookmarkList = serde_json::from_value(serde_json::json!({
            "ok": true,
            "bookmarks": [
                {"id": "Bk1", "title": "Docs", "emoji": ":books:"},
                {"id": "Bk2", "title": "3 items to complete!", "emoji": ":bookmark:"},
                {"id": "Bk3", "title": "Avg time per task: N/A", "emoji": ":alarm_clock:"},
                {"id": "Bk4", "title": "No emoji"}
            ]
        }))
        .expect("parse list");

        assert_eq!(
            find_marked(&list.bookmarks, COUNT_MARKER).map(|b| b.id.as_str()),
            Some("Bk2")
        );
        assert_eq!(
            find_marked(&list.bookmarks, AVERAGE_MARKER).map(|b| b.id.as_str()),
            Some("Bk3")
        );
        assert!(find_marked(&list.bookmarks, ":rocket:").is_none());
    }
}
