//! Phoenix-protocol realtime channels
//!
//! Each subscription owns one websocket: it joins a single topic, keeps the
//! socket alive with heartbeats and forwards decoded frames until the socket
//! closes or the subscription is dropped.

use super::{bounded, Subscription};
use crate::error::{GatewayError, GatewayResult};
use crate::models::{BroadcastMessage, ChannelEvent, Message};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::mpsc::unbounded_channel;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, warn};
use uuid::Uuid;

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

const JOIN_REF: &str = "1";
const PHOENIX_TOPIC: &str = "phoenix";

/// Decoded Phoenix frame
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Reply {
        reference: Option<String>,
        ok: bool,
        response: Value,
    },
    /// Row inserted into a watched table
    Insert(Value),
    Broadcast {
        event: String,
        payload: Value,
    },
    ChannelError(String),
    Closed,
    Other(String),
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    topic: String,
    event: String,
    #[serde(default)]
    payload: Value,
    #[serde(rename = "ref", default)]
    reference: Option<Value>,
}

/// Parses a text frame into its topic and [`Frame`]
pub fn decode_frame(text: &str) -> GatewayResult<(String, Frame)> {
    let raw: RawFrame = serde_json::from_str(text)?;
    let reference = raw.reference.and_then(|r| match r {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    });

    let frame = match raw.event.as_str() {
        "phx_reply" => Frame::Reply {
            reference,
            ok: raw.payload.get("status").and_then(Value::as_str) == Some("ok"),
            response: raw.payload.get("response").cloned().unwrap_or(Value::Null),
        },
        "postgres_changes" => {
            let data = raw.payload.get("data").unwrap_or(&Value::Null);
            match (data.get("type").and_then(Value::as_str), data.get("record")) {
                (Some("INSERT"), Some(record)) => Frame::Insert(record.clone()),
                _ => Frame::Other(raw.event.clone()),
            }
        }
        "broadcast" => Frame::Broadcast {
            event: raw
                .payload
                .get("event")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            payload: raw.payload.get("payload").cloned().unwrap_or(Value::Null),
        },
        "phx_error" => Frame::ChannelError(raw.payload.to_string()),
        "phx_close" => Frame::Closed,
        "system" if raw.payload.get("status").and_then(Value::as_str) == Some("error") => {
            Frame::ChannelError(
                raw.payload
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("system error")
                    .to_string(),
            )
        }
        other => Frame::Other(other.to_string()),
    };

    Ok((raw.topic, frame))
}

/// Realtime topic name as seen on the socket
pub fn channel_topic(name: &str) -> String {
    format!("realtime:{name}")
}

fn envelope(topic: &str, event: &str, payload: Value, reference: &str) -> String {
    json!({
        "topic": topic,
        "event": event,
        "payload": payload,
        "ref": reference,
        "join_ref": JOIN_REF,
    })
    .to_string()
}

/// Join payload watching inserts on `messages` for one conversation
pub fn inserts_join_payload(conversation_id: Uuid, access_token: Option<&str>) -> Value {
    json!({
        "config": {
            "broadcast": { "self": false, "ack": false },
            "presence": { "key": "" },
            "postgres_changes": [{
                "event": "INSERT",
                "schema": "public",
                "table": "messages",
                "filter": format!("conversation_id=eq.{conversation_id}"),
            }],
        },
        "access_token": access_token,
    })
}

/// Join payload for a pure broadcast channel
pub fn broadcast_join_payload(access_token: Option<&str>) -> Value {
    json!({
        "config": {
            "broadcast": { "self": false, "ack": false },
            "presence": { "key": "" },
            "postgres_changes": [],
        },
        "access_token": access_token,
    })
}

pub fn decode_insert(frame: Frame) -> Option<Message> {
    match frame {
        Frame::Insert(record) => match serde_json::from_value(record) {
            Ok(message) => Some(message),
            Err(e) => {
                warn!(error = %e, "dropping malformed insert notification");
                None
            }
        },
        _ => None,
    }
}

pub fn decode_broadcast(topic: String) -> impl Fn(Frame) -> Option<BroadcastMessage> + Send + 'static {
    move |frame| match frame {
        Frame::Broadcast { event, payload } => Some(BroadcastMessage {
            topic: topic.clone(),
            event,
            payload,
        }),
        _ => None,
    }
}

/// Opens a socket, joins `topic` and streams decoded frames
pub async fn join_channel<T, F>(
    socket_url: &str,
    topic: String,
    join_payload: Value,
    join_timeout: Duration,
    decode: F,
) -> GatewayResult<Subscription<T>>
where
    T: Send + 'static,
    F: Fn(Frame) -> Option<T> + Send + 'static,
{
    let ws = bounded(join_timeout, async {
        let (mut ws, _) = connect_async(socket_url).await?;
        ws.send(WsMessage::text(envelope(&topic, "phx_join", join_payload, JOIN_REF)))
            .await?;

        loop {
            let Some(msg) = ws.next().await else {
                return Err(GatewayError::Unavailable("socket closed during join".into()));
            };
            let msg = msg?;
            if !msg.is_text() {
                continue;
            }
            match decode_frame(msg.to_text()?)? {
                (_, Frame::Reply { reference, ok, response }) if reference.as_deref() == Some(JOIN_REF) => {
                    if ok {
                        break;
                    }
                    return Err(GatewayError::Rejected {
                        status: 400,
                        body: response.to_string(),
                    });
                }
                (_, Frame::ChannelError(reason)) => {
                    return Err(GatewayError::Unavailable(reason));
                }
                _ => {}
            }
        }
        Ok::<_, GatewayError>(ws)
    })
    .await?;

    debug!(%topic, "joined realtime channel");

    let (tx, rx) = unbounded_channel();
    let (mut sink, mut stream) = ws.split();

    let handle = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut next_ref: u64 = 1;

        let reason = loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    next_ref += 1;
                    let frame = envelope(PHOENIX_TOPIC, "heartbeat", json!({}), &next_ref.to_string());
                    if let Err(e) = sink.send(WsMessage::text(frame)).await {
                        break format!("heartbeat failed: {e}");
                    }
                }
                incoming = stream.next() => match incoming {
                    Some(Ok(msg)) if msg.is_text() => {
                        let decoded = msg.to_text().map_err(GatewayError::from).and_then(decode_frame);
                        match decoded {
                            Ok((_, Frame::ChannelError(reason))) => break reason,
                            Ok((_, Frame::Closed)) => break "channel closed by server".to_string(),
                            Ok((_, frame)) => {
                                if let Some(item) = decode(frame) {
                                    if tx.send(ChannelEvent::Payload(item)).is_err() {
                                        return;
                                    }
                                }
                            }
                            Err(e) => warn!(error = %e, "ignoring undecodable realtime frame"),
                        }
                    }
                    Some(Ok(msg)) if msg.is_close() => break "socket closed".to_string(),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break e.to_string(),
                    None => break "socket closed".to_string(),
                },
            }
        };

        warn!(%topic, %reason, "realtime channel lost");
        let _ = tx.send(ChannelEvent::Lost(reason));
    });

    Ok(Subscription::new(rx, move || handle.abort()))
}
