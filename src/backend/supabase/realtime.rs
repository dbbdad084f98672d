use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;

use super::client::SupabaseClient;
use super::models::{ChangesPayload, PhoenixMessage, ReplyPayload};
use super::rest::MESSAGES_TABLE;
use crate::backend::subscription::Subscription;
use crate::backend::traits::RealtimeFeed;
use crate::backend::types::{BackendError, FeedEvent, MessageRow};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);
const JOIN_TIMEOUT: Duration = Duration::from_secs(10);
const EVENT_BUFFER: usize = 256;
const JOIN_REF: &str = "1";
const PHOENIX_TOPIC: &str = "phoenix";

/// A decoded realtime frame, as far as the message feed cares.
#[derive(Debug, PartialEq)]
pub enum Frame {
    Insert(MessageRow),
    Reply {
        msg_ref: Option<String>,
        ok: bool,
        detail: String,
    },
    Closed(String),
    Ignored,
}

pub fn join_message(topic: &str, access_token: &str) -> PhoenixMessage {
    PhoenixMessage {
        topic: topic.to_string(),
        event: "phx_join".to_string(),
        payload: json!({
            "config": {
                "broadcast": { "ack": false, "self": false },
                "presence": { "key": "" },
                "postgres_changes": [
                    { "event": "INSERT", "schema": "public", "table": MESSAGES_TABLE }
                ],
                "private": false
            },
            "access_token": access_token
        }),
        msg_ref: Some(JOIN_REF.to_string()),
        join_ref: Some(JOIN_REF.to_string()),
    }
}

fn heartbeat_message(msg_ref: &str) -> PhoenixMessage {
    PhoenixMessage {
        topic: PHOENIX_TOPIC.to_string(),
        event: "heartbeat".to_string(),
        payload: json!({}),
        msg_ref: Some(msg_ref.to_string()),
        join_ref: None,
    }
}

fn leave_message(topic: &str, msg_ref: &str) -> PhoenixMessage {
    PhoenixMessage {
        topic: topic.to_string(),
        event: "phx_leave".to_string(),
        payload: json!({}),
        msg_ref: Some(msg_ref.to_string()),
        join_ref: Some(JOIN_REF.to_string()),
    }
}

fn encode(message: &PhoenixMessage) -> Result<WsMessage, BackendError> {
    serde_json::to_string(message)
        .map(WsMessage::Text)
        .map_err(|e| BackendError::Realtime(e.to_string()))
}

pub fn parse_frame(topic: &str, text: &str) -> Frame {
    let message: PhoenixMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!("Failed to parse realtime frame: {}", e);
            return Frame::Ignored;
        }
    };

    if message.topic != topic && message.topic != PHOENIX_TOPIC {
        return Frame::Ignored;
    }

    match message.event.as_str() {
        "postgres_changes" => {
            let changes: ChangesPayload = match serde_json::from_value(message.payload) {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!("Malformed postgres_changes payload: {}", e);
                    return Frame::Ignored;
                }
            };
            let data = changes.data;
            if data.change_type != "INSERT"
                || data.table.as_deref().is_some_and(|t| t != MESSAGES_TABLE)
            {
                return Frame::Ignored;
            }
            match data.record.map(serde_json::from_value::<MessageRow>) {
                Some(Ok(row)) => Frame::Insert(row),
                Some(Err(e)) => {
                    tracing::warn!("Malformed message record: {}", e);
                    Frame::Ignored
                }
                None => Frame::Ignored,
            }
        }
        "phx_reply" => match serde_json::from_value::<ReplyPayload>(message.payload) {
            Ok(reply) => Frame::Reply {
                msg_ref: message.msg_ref,
                ok: reply.status == "ok",
                detail: reply.response.to_string(),
            },
            Err(_) => Frame::Ignored,
        },
        "phx_error" => Frame::Closed("Channel error".to_string()),
        "phx_close" => Frame::Closed("Channel closed by server".to_string()),
        "system" => {
            let status = message.payload.get("status").and_then(|s| s.as_str());
            if status == Some("error") {
                let detail = message
                    .payload
                    .get("message")
                    .and_then(|m| m.as_str())
                    .unwrap_or("Realtime system error");
                Frame::Closed(detail.to_string())
            } else {
                Frame::Ignored
            }
        }
        _ => Frame::Ignored,
    }
}

#[async_trait]
impl RealtimeFeed for SupabaseClient {
    async fn subscribe(&self, channel: &str) -> Result<Subscription, BackendError> {
        let url = self.realtime_url()?;
        let topic = format!("realtime:{}", channel);

        let (socket, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| BackendError::Realtime(format!("Connect failed: {}", e)))?;
        let (mut sink, mut stream) = socket.split();

        sink.send(encode(&join_message(&topic, &self.bearer()))?)
            .await
            .map_err(|e| BackendError::Realtime(e.to_string()))?;

        let joined = tokio::time::timeout(JOIN_TIMEOUT, async {
            while let Some(frame) = stream.next().await {
                let text = match frame {
                    Ok(WsMessage::Text(text)) => text,
                    Ok(_) => continue,
                    Err(e) => return Err(BackendError::Realtime(e.to_string())),
                };
                match parse_frame(&topic, &text) {
                    Frame::Reply { msg_ref, ok, detail } if msg_ref.as_deref() == Some(JOIN_REF) => {
                        return if ok {
                            Ok(())
                        } else {
                            Err(BackendError::Realtime(format!("Join rejected: {}", detail)))
                        };
                    }
                    Frame::Closed(reason) => return Err(BackendError::Realtime(reason)),
                    _ => {}
                }
            }
            Err(BackendError::Realtime("Socket closed during join".to_string()))
        })
        .await
        .map_err(|_| BackendError::Realtime("Timed out joining channel".to_string()))?;
        joined?;

        tracing::debug!("Joined realtime topic {}", topic);

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();

        let task = tokio::spawn(async move {
            let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
            heartbeat.tick().await;
            let mut next_ref: u64 = 2;
            let mut pending_heartbeat: Option<String> = None;

            let reason = loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => {
                        if let Ok(leave) = encode(&leave_message(&topic, &next_ref.to_string())) {
                            let _ = sink.send(leave).await;
                        }
                        let _ = sink.send(WsMessage::Close(None)).await;
                        tracing::debug!("Left realtime topic {}", topic);
                        return;
                    }
                    _ = heartbeat.tick() => {
                        if pending_heartbeat.is_some() {
                            break "Heartbeat timed out".to_string();
                        }
                        let msg_ref = next_ref.to_string();
                        next_ref += 1;
                        let frame = match encode(&heartbeat_message(&msg_ref)) {
                            Ok(f) => f,
                            Err(e) => break e.to_string(),
                        };
                        if let Err(e) = sink.send(frame).await {
                            break format!("Heartbeat failed: {}", e);
                        }
                        pending_heartbeat = Some(msg_ref);
                    }
                    frame = stream.next() => match frame {
                        Some(Ok(WsMessage::Text(text))) => match parse_frame(&topic, &text) {
                            Frame::Insert(row) => {
                                if tx.send(FeedEvent::Insert(row)).await.is_err() {
                                    return; // subscriber dropped
                                }
                            }
                            Frame::Reply { msg_ref, .. } => {
                                if msg_ref.is_some() && msg_ref == pending_heartbeat {
                                    pending_heartbeat = None;
                                }
                            }
                            Frame::Closed(reason) => break reason,
                            Frame::Ignored => {}
                        },
                        Some(Ok(WsMessage::Close(frame))) => {
                            break format!("Socket closed: {:?}", frame.map(|f| f.reason));
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => break format!("Socket error: {}", e),
                        None => break "Socket closed".to_string(),
                    }
                }
            };

            tracing::warn!("Realtime feed for {} disconnected: {}", topic, reason);
            let _ = tx.send(FeedEvent::Disconnected(reason)).await;
        });

        Ok(Subscription::new(rx, cancel, Some(task)))
    }
}
