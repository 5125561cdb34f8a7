use super::{SlackClient, SlackError};
use crate::tracker::{MetricsPublisher, SnapshotSource, Tracker};
use backlog_core::{normalize_external_id, LiveEvent};
use chrono::{DateTime, TimeZone, Utc};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

/// One frame received over the Socket Mode connection.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketFrame {
    Hello,
    Disconnect { reason: String },
    Event {
        envelope_id: Option<String>,
        event: Option<LiveEvent>,
    },
    Other {
        envelope_id: Option<String>,
        kind: String,
    },
}

impl SocketFrame {
    pub fn envelope_id(&self) -> Option<&str> {
        match self {
            SocketFrame::Event { envelope_id, .. } | SocketFrame::Other { envelope_id, .. } => {
                envelope_id.as_deref()
            }
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    envelope_id: Option<String>,
    #[serde(default)]
    payload: Option<Value>,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ConnectionsOpen {
    url: String,
}

pub fn parse_frame(text: &str, received_at: DateTime<Utc>) -> Result<SocketFrame, serde_json::Error> {
    let envelope: Envelope = serde_json::from_str(text)?;
    Ok(match envelope.kind.as_str() {
        "hello" => SocketFrame::Hello,
        "disconnect" => SocketFrame::Disconnect {
            reason: envelope.reason.unwrap_or_default(),
        },
        "events_api" => SocketFrame::Event {
            event: envelope
                .payload
                .as_ref()
                .and_then(|payload| live_event_from_payload(payload, received_at)),
            envelope_id: envelope.envelope_id,
        },
        _ => SocketFrame::Other {
            envelope_id: envelope.envelope_id,
            kind: envelope.kind,
        },
    })
}

/// Maps an Events API callback to a saved/unsaved notification. Events of
/// other types, and events without an item reference, map to `None`.
pub fn live_event_from_payload(payload: &Value, received_at: DateTime<Utc>) -> Option<LiveEvent> {
    let event = payload.get("event")?;
    let kind = event.get("type").and_then(Value::as_str)?;
    let item = event.get("item")?;
    let external_id = item
        .pointer("/message/ts")
        .and_then(Value::as_str)
        .and_then(normalize_external_id)
        .or_else(|| item.get("ts").and_then(Value::as_str).and_then(normalize_external_id))
        .or_else(|| {
            item.get("item_id")
                .and_then(Value::as_str)
                .and_then(normalize_external_id)
        })?;
    let observed_at = event
        .get("event_ts")
        .and_then(Value::as_str)
        .and_then(parse_slack_ts)
        .unwrap_or(received_at);

    match kind {
        "star_added" | "saved_item_added" => Some(LiveEvent::Saved {
            external_id,
            observed_at,
        }),
        "star_removed" | "saved_item_removed" => Some(LiveEvent::Unsaved {
            external_id,
            observed_at,
        }),
        _ => None,
    }
}

/// Parses Slack's `"<seconds>.<fraction>"` timestamps.
pub fn parse_slack_ts(value: &str) -> Option<DateTime<Utc>> {
    let (secs, frac) = match value.trim().split_once('.') {
        Some((secs, frac)) => (secs, frac),
        None => (value.trim(), ""),
    };
    let secs: i64 = secs.parse().ok()?;
    let digits: String = frac.chars().take(9).collect();
    let nanos = if digits.is_empty() {
        0
    } else {
        let parsed: u32 = digits.parse().ok()?;
        parsed * 10u32.pow(9 - digits.len() as u32)
    };
    Utc.timestamp_opt(secs, nanos).single()
}

pub fn ack_message(envelope_id: &str) -> String {
    serde_json::json!({ "envelope_id": envelope_id }).to_string()
}

async fn open_connection(
    client: &SlackClient,
    base: &Url,
    app_token: &str,
) -> Result<Url, SlackError> {
    let open: ConnectionsOpen = client
        .post_form(base, "apps.connections.open", app_token, &[])
        .await?;
    Ok(Url::parse(&open.url)?)
}

/// Keeps a Socket Mode connection open and feeds saved/unsaved events to the
/// tracker in arrival order. Reconnects with backoff; never returns.
pub async fn run_listener<S, P>(
    client: SlackClient,
    base: Url,
    app_token: String,
    tracker: Arc<Tracker<S, P>>,
) where
    S: SnapshotSource,
    P: MetricsPublisher,
{
    let mut backoff = Duration::from_secs(1);
    loop {
        let socket_url = match open_connection(&client, &base, &app_token).await {
            Ok(url) => url,
            Err(err) => {
                warn!(event = "socket_open_error", error = %err);
                tokio::time::sleep(backoff).await;
                backoff = next_backoff(backoff);
                continue;
            }
        };
        let (mut ws, _) = match connect_async(socket_url.as_str()).await {
            Ok(value) => value,
            Err(err) => {
                warn!(event = "socket_connect_error", error = %err);
                tokio::time::sleep(backoff).await;
                backoff = next_backoff(backoff);
                continue;
            }
        };
        backoff = Duration::from_secs(1);
        info!(event = "socket_connected");

        while let Some(msg) = ws.next().await {
            let text = match msg {
                Ok(Message::Text(text)) => text,
                Ok(Message::Ping(data)) => {
                    let _ = ws.send(Message::Pong(data)).await;
                    continue;
                }
                Ok(Message::Close(_)) => {
                    info!(event = "socket_closed");
                    break;
                }
                Ok(_) => continue,
                Err(err) => {
                    warn!(event = "socket_read_error", error = %err);
                    break;
                }
            };

            let frame = match parse_frame(&text, Utc::now()) {
                Ok(frame) => frame,
                Err(err) => {
                    warn!(event = "socket_frame_invalid", error = %err);
                    continue;
                }
            };
            if let Some(envelope_id) = frame.envelope_id() {
                if ws.send(Message::Text(ack_message(envelope_id))).await.is_err() {
                    warn!(event = "socket_ack_error", envelope_id = envelope_id);
                    break;
                }
            }

            match frame {
                SocketFrame::Hello => debug!(event = "socket_hello"),
                SocketFrame::Disconnect { reason } => {
                    info!(event = "socket_disconnect_requested", reason = %reason);
                    break;
                }
                SocketFrame::Event {
                    event: Some(event), ..
                } => {
                    debug!(event = "live_event", kind = event.kind(), external_id = %event.external_id());
                    tracker.handle_event(event).await;
                }
                SocketFrame::Event { event: None, .. } => debug!(event = "socket_event_ignored"),
                SocketFrame::Other { kind, .. } => debug!(event = "socket_frame_ignored", kind = %kind),
            }
        }
        let _ = ws.close(None).await;
    }
}

fn next_backoff(current: Duration) -> Duration {
    let next = current + current;
    if next > Duration::from_secs(10) {
        Duration::from_secs(10)
    } else {
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn received_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 4, 10, 9, 0, 0)
            .single()
            .expect("valid timestamp")
    }

    #[test]
    fn star_added_maps_to_saved_with_event_time() {
        let text = serde_json::json!({
            "type": "events_api",
            "envelope_id": "env-1",
            "payload": {
                "event": {
                    "type": "star_added",
                    "user": "U1",
                    "item": {"type": "message", "channel": "C1", "message": {"ts": "1712708450.151"}},
                    "event_ts": "1712708451.500000"
                }
            }
        })
        .to_string();

        let frame = parse_frame(&text, received_at()).expect("frame");

        assert_eq!(frame.envelope_id(), Some("env-1"));
        let SocketFrame::Event {
            event: Some(LiveEvent::Saved {
                external_id,
                observed_at,
            }),
            ..
        } = frame
        else {
            panic!("expected saved event")
        };
        assert_eq!(external_id, "1712708450.151");
        assert_eq!(observed_at.timestamp(), 1_712_708_451);
        assert_eq!(observed_at.timestamp_subsec_millis(), 500);
    }

    #[test]
    fn star_removed_without_event_ts_uses_receive_time() {
        let payload = serde_json::json!({
            "event": {"type": "star_removed", "item": {"type": "message", "message": {"ts": "1.2"}}}
        });
        assert_eq!(
            live_event_from_payload(&payload, received_at()),
            Some(LiveEvent::Unsaved {
                external_id: "1.2".to_string(),
                observed_at: received_at(),
            })
        );
    }

    #[test]
    fn unrelated_or_unidentified_events_are_ignored() {
        let other = serde_json::json!({
            "event": {"type": "reaction_added", "item": {"ts": "1.2"}}
        });
        assert_eq!(live_event_from_payload(&other, received_at()), None);

        let no_id = serde_json::json!({
            "event": {"type": "star_added", "item": {"type": "channel", "channel": "C1"}}
        });
        assert_eq!(live_event_from_payload(&no_id, received_at()), None);
    }

    #[test]
    fn control_frames_parse() {
        assert_eq!(
            parse_frame(r#"{"type":"hello","num_connections":1}"#, received_at()).expect("hello"),
            SocketFrame::Hello
        );
        assert_eq!(
            parse_frame(r#"{"type":"disconnect","reason":"refresh_requested"}"#, received_at())
                .expect("disconnect"),
            SocketFrame::Disconnect {
                reason: "refresh_requested".to_string()
            }
        );
        let other = parse_frame(r#"{"type":"slash_commands","envelope_id":"e2"}"#, received_at())
            .expect("other");
        assert_eq!(other.envelope_id(), Some("e2"));
        assert!(parse_frame("not json", received_at()).is_err());
    }

    #[test]
    fn slack_ts_parsing() {
        let parsed = parse_slack_ts("1712708450.151").expect("ts");
        assert_eq!(parsed.timestamp(), 1_712_708_450);
        assert_eq!(parsed.timestamp_subsec_millis(), 151);
        assert_eq!(parse_slack_ts("1712708450").map(|t| t.timestamp()), Some(1_712_708_450));
        assert!(parse_slack_ts("soon").is_none());
    }

    #[test]
    fn ack_echoes_envelope_id() {
        let ack: Value = serde_json::from_str(&ack_message("env-9")).expect("json");
        assert_eq!(ack, serde_json::json!({"envelope_id": "env-9"}));
    }

    #[test]
    fn backoff_doubles_up_to_cap() {
        assert_eq!(next_backoff(Duration::from_secs(1)), Duration::from_secs(2));
        assert_eq!(next_backoff(Duration::from_secs(8)), Duration::from_secs(10));
    }
}
