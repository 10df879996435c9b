//! Websocket change feed speaking the Phoenix channel protocol used by the
//! backend's realtime server (`postgres_changes`).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use super::{BackendError, ChangeEvent, ChangeFeed, ChangeStream, ChangeSubscription, IdentityService};
use crate::config::BackendConfig;
use crate::types::Operation;

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const PROTOCOL_VERSION: &str = "1.0.0";

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct RealtimeFeed {
    base_url: String,
    anon_key: String,
    identity: Arc<dyn IdentityService>,
    heartbeat: Duration,
}

/// Decoded server frame, only the parts the feed acts on
#[derive(Debug, PartialEq)]
enum Frame {
    Change(ChangeEvent),
    JoinRejected(String),
    Other,
}

/// `http(s)://host/..` → `ws(s)://host/realtime/v1/websocket?apikey=..&vsn=..`
pub fn websocket_url(base_url: &str, anon_key: &str) -> Result<Url, BackendError> {
    let mut url = Url::parse(base_url)?;
    let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
    url.set_scheme(scheme)
        .map_err(|_| BackendError::Network(format!("Cannot derive websocket URL from {}", base_url)))?;
    url.set_path("/realtime/v1/websocket");
    url.query_pairs_mut()
        .clear()
        .append_pair("apikey", anon_key)
        .append_pair("vsn", PROTOCOL_VERSION);
    Ok(url)
}

fn frame(topic: &str, event: &str, payload: Value, msg_ref: u64) -> String {
    json!({
        "topic": topic,
        "event": event,
        "payload": payload,
        "ref": msg_ref.to_string(),
        "join_ref": "1",
    })
    .to_string()
}

fn join_payload(subscription: &ChangeSubscription, access_token: Option<&str>) -> Value {
    let event = subscription.event.map_or("*", |op| op.as_str());
    let mut payload = json!({
        "config": {
            "broadcast": { "self": false },
            "presence": { "key": "" },
            "postgres_changes": [{
                "event": event,
                "schema": subscription.schema,
                "table": subscription.table,
            }],
        }
    });
    if let Some(token) = access_token {
        payload["access_token"] = json!(token);
    }
    payload
}

fn parse_frame(text: &str) -> Frame {
    let Ok(message) = serde_json::from_str::<Value>(text) else {
        return Frame::Other;
    };
    match message.get("event").and_then(Value::as_str) {
        Some("postgres_changes") => {
            let data = &message["payload"]["data"];
            let kind = data.get("type").and_then(Value::as_str).and_then(Operation::parse);
            match (kind, data.get("table").and_then(Value::as_str)) {
                (Some(kind), Some(table)) => Frame::Change(ChangeEvent {
                    schema: data.get("schema").and_then(Value::as_str).unwrap_or("public").to_string(),
                    table: table.to_string(),
                    kind,
                    record: data.get("record").cloned().unwrap_or(Value::Null),
                    old_record: data.get("old_record").cloned().unwrap_or(Value::Null),
                }),
                _ => Frame::Other,
            }
        }
        Some("phx_reply") if message["payload"]["status"] == "error" => {
            Frame::JoinRejected(message["payload"]["response"].to_string())
        }
        Some("phx_error") => Frame::JoinRejected("channel error".to_string()),
        _ => Frame::Other,
    }
}

impl RealtimeFeed {
    pub fn new(config: &BackendConfig, identity: Arc<dyn IdentityService>) -> Self {
        Self {
            base_url: config.url.clone(),
            anon_key: config.anon_key.clone(),
            identity,
            heartbeat: HEARTBEAT_INTERVAL,
        }
    }
}

async fn pump(
    mut socket: Socket,
    topic: String,
    sender: mpsc::UnboundedSender<ChangeEvent>,
    mut shutdown: oneshot::Receiver<()>,
    heartbeat: Duration,
) {
    let mut ticker = tokio::time::interval(heartbeat);
    ticker.tick().await;
    let mut next_ref: u64 = 2;

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                let _ = socket.send(Message::Text(frame(&topic, "phx_leave", json!({}), next_ref))).await;
                let _ = socket.close(None).await;
                tracing::debug!("Left realtime channel {}", topic);
                break;
            }
            _ = ticker.tick() => {
                let beat = frame("phoenix", "heartbeat", json!({}), next_ref);
                next_ref += 1;
                if let Err(e) = socket.send(Message::Text(beat)).await {
                    tracing::warn!("Realtime heartbeat failed on {}: {}", topic, e);
                    break;
                }
            }
            message = socket.next() => match message {
                Some(Ok(Message::Text(text))) => match parse_frame(&text) {
                    Frame::Change(event) => {
                        if sender.send(event).is_err() {
                            break;
                        }
                    }
                    Frame::JoinRejected(reason) => {
                        tracing::error!("Realtime channel {} rejected: {}", topic, reason);
                        break;
                    }
                    Frame::Other => {}
                },
                Some(Ok(Message::Ping(data))) => {
                    let _ = socket.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(_))) | None => {
                    tracing::info!("Realtime connection for {} closed by server", topic);
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!("Realtime connection for {} failed: {}", topic, e);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl ChangeFeed for RealtimeFeed {
    async fn subscribe(&self, subscription: ChangeSubscription) -> Result<ChangeStream, BackendError> {
        let url = websocket_url(&self.base_url, &self.anon_key)?;
        let (mut socket, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| BackendError::Network(e.to_string()))?;

        let access_token = self.identity.get_session().await.ok().flatten().map(|s| s.access_token);
        let topic = format!("realtime:{}", subscription.channel);
        let join = frame(&topic, "phx_join", join_payload(&subscription, access_token.as_deref()), 1);
        socket
            .send(Message::Text(join))
            .await
            .map_err(|e| BackendError::Network(e.to_string()))?;
        tracing::info!("Subscribed to {} changes on {}", subscription.table, topic);

        let (sender, receiver) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        tokio::spawn(pump(socket, topic, sender, shutdown_rx, self.heartbeat));

        Ok(ChangeStream::new(receiver, move || {
            let _ = shutdown_tx.send(());
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_websocket_url() {
        let url = websocket_url("https://abc.example.co", "anon").unwrap();
        assert_eq!(url.as_str(), "wss://abc.example.co/realtime/v1/websocket?apikey=anon&vsn=1.0.0");
        let local = websocket_url("http://localhost:54321", "k").unwrap();
        assert_eq!(local.scheme(), "ws");
        assert_eq!(local.port(), Some(54321));
    }

    #[test]
    fn join_payload_lists_table_filter() {
        let sub = ChangeSubscription::all_events("trainings-changes", "trainings");
        let payload = join_payload(&sub, Some("jwt"));
        let change = &payload["config"]["postgres_changes"][0];
        assert_eq!(change["event"], "*");
        assert_eq!(change["schema"], "public");
        assert_eq!(change["table"], "trainings");
        assert_eq!(payload["access_token"], "jwt");
    }

    #[test]
    fn parses_change_frames() {
        let text = json!({
            "topic": "realtime:trainings-changes",
            "event": "postgres_changes",
            "payload": {"data": {
                "schema": "public",
                "table": "trainings",
                "type": "DELETE",
                "old_record": {"id": 4}
            }},
            "ref": null
        })
        .to_string();
        match parse_frame(&text) {
            Frame::Change(event) => {
                assert_eq!(event.kind, Operation::Delete);
                assert_eq!(event.old_record["id"], 4);
                assert_eq!(event.record, Value::Null);
            }
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[test]
    fn surfaces_join_errors() {
        let text = r#"{"event":"phx_reply","topic":"realtime:x","payload":{"status":"error","response":{"reason":"bad"}}}"#;
        assert!(matches!(parse_frame(text), Frame::JoinRejected(_)));
        assert_eq!(parse_frame(r#"{"event":"presence_state"}"#), Frame::Other);
        assert_eq!(parse_frame("not json"), Frame::Other);
    }
}
