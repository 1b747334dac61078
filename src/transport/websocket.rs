//! Pusher-совместимый транспорт поверх WebSocket.
//!
//! Протокол (версия 7):
//! - сервер открывает сессию событием `pusher:connection_established`
//!   с `socket_id` внутри строкового поля `data`;
//! - подписка и отписка: `pusher:subscribe` / `pusher:unsubscribe`;
//! - heartbeat сервиса: `pusher:ping` → `pusher:pong`;
//! - события клиента публикуются как `client-<TYPE>`, поле `data` содержит
//!   JSON всего сообщения шины.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use edubus_error::{BusError, BusResult};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::{net::TcpStream, sync::mpsc};
use tokio_tungstenite::{
    connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, trace, warn};
use url::Url;

use super::{ChannelSink, Frame, Link, Transport, TransportEvent};
use crate::protocol::{ChannelId, Message, MessageType};

const PROTOCOL_VERSION: u8 = 7;
const CLIENT_EVENT_PREFIX: &str = "client-";
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Параметры подключения к Pusher-совместимому сервису.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WebSocketConfig {
    /// Полный адрес сокета; если задан, `app_key` и `cluster` не нужны
    pub url: Option<String>,
    pub app_key: Option<String>,
    pub cluster: Option<String>,
}

/// Конверт события Pusher.
///
/// Поле `data` у системных событий сервиса — строка с JSON внутри,
/// у событий клиента допускается и вложенный объект.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PusherEvent {
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

/// Транспорт шины через WebSocket.
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    url: Url,
}

/// Что делать с разобранным входящим событием.
#[derive(Debug, PartialEq)]
enum Inbound {
    Deliver(Message),
    Pong,
    Ignore,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl WebSocketConfig {
    /// Адрес сокета: явный `url` или адрес кластера по ключу приложения.
    pub fn endpoint(&self) -> BusResult<Url> {
        let raw = match (&self.url, &self.app_key, &self.cluster) {
            (Some(url), _, _) => url.clone(),
            (None, Some(key), Some(cluster)) => format!(
                "wss://ws-{cluster}.pusher.com/app/{key}?protocol={PROTOCOL_VERSION}&client=edubus&version={}",
                env!("CARGO_PKG_VERSION")
            ),
            _ => {
                return Err(BusError::connection(
                    "websocket transport needs either url or app_key with cluster",
                ))
            }
        };
        Url::parse(&raw).map_err(|e| BusError::connection(format!("invalid url {raw}: {e}")))
    }
}

impl PusherEvent {
    pub fn new(
        event: impl Into<String>,
        channel: Option<String>,
        data: Value,
    ) -> Self {
        Self {
            event: event.into(),
            channel,
            data,
        }
    }

    /// Кодирует исходящий кадр клиента. `Close` в событие не превращается.
    pub fn from_frame(frame: &Frame) -> BusResult<Option<Self>> {
        let event = match frame {
            Frame::Subscribe(ch) => {
                Self::new("pusher:subscribe", None, json!({ "channel": ch.as_str() }))
            }
            Frame::Unsubscribe(ch) => {
                Self::new("pusher:unsubscribe", None, json!({ "channel": ch.as_str() }))
            }
            Frame::Publish(msg) => {
                let channel = msg
                    .channel()
                    .ok_or_else(|| BusError::send_failed("message has no channel"))?;
                let data = serde_json::to_value(msg).map_err(|e| BusError::codec(e.to_string()))?;
                Self::new(
                    format!("{CLIENT_EVENT_PREFIX}{}", msg.kind()),
                    Some(channel.to_string()),
                    data,
                )
            }
            Frame::Close => return Ok(None),
        };
        Ok(Some(event))
    }

    /// Поле `data` как JSON: строка с JSON разворачивается.
    fn data_value(&self) -> BusResult<Value> {
        match &self.data {
            Value::String(raw) => {
                serde_json::from_str(raw).map_err(|e| BusError::codec(e.to_string()))
            }
            other => Ok(other.clone()),
        }
    }

    /// `socket_id` из события `pusher:connection_established`.
    fn socket_id(&self) -> BusResult<String> {
        self.data_value()?
            .get("socket_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| BusError::codec("connection_established without socket_id"))
    }

    fn to_text(&self) -> BusResult<String> {
        serde_json::to_string(self).map_err(|e| BusError::codec(e.to_string()))
    }

    /// Разбирает входящее событие.
    fn classify(&self) -> Inbound {
        match self.event.as_str() {
            "pusher:ping" => return Inbound::Pong,
            "pusher:error" => {
                warn!(data = %self.data, "pusher reported an error");
                return Inbound::Ignore;
            }
            "pusher_internal:subscription_succeeded" => {
                debug!(channel = ?self.channel, "channel subscription confirmed");
                return Inbound::Ignore;
            }
            _ => {}
        }

        let name = self
            .event
            .strip_prefix(CLIENT_EVENT_PREFIX)
            .unwrap_or(&self.event);
        let Ok(kind) = name.parse::<MessageType>() else {
            trace!(event = %self.event, "ignoring unknown pusher event");
            return Inbound::Ignore;
        };

        match self.decode_message(kind) {
            Ok(msg) => Inbound::Deliver(msg),
            Err(err) => {
                warn!(event = %self.event, error = %err, "failed to decode bus message");
                Inbound::Ignore
            }
        }
    }

    /// Собирает сообщение шины: `data` — либо полный конверт, либо только
    /// нагрузка для события с именем типа.
    fn decode_message(
        &self,
        kind: MessageType,
    ) -> BusResult<Message> {
        let mut data = self.data_value()?;
        if data.get("type").is_none() {
            data = json!({ "type": kind.as_str(), "payload": data });
        }
        let mut msg: Message =
            serde_json::from_value(data).map_err(|e| BusError::codec(e.to_string()))?;
        if msg.kind() != kind {
            return Err(BusError::codec(format!(
                "event {} carries {} message",
                self.event,
                msg.kind()
            )));
        }
        if msg.channel.is_none() {
            msg.channel = self.channel.as_deref().map(ChannelId::from_wire);
        }
        Ok(msg)
    }
}

impl WebSocketTransport {
    pub fn new(config: &WebSocketConfig) -> BusResult<Self> {
        Ok(Self {
            url: config.endpoint()?,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self) -> BusResult<Link> {
        debug!(url = %self.url, "connecting websocket transport");
        let (mut ws, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| BusError::connection(format!("websocket connect failed: {e}")))?;

        let socket_id = tokio::time::timeout(HANDSHAKE_TIMEOUT, await_established(&mut ws))
            .await
            .map_err(|_| BusError::connection("pusher handshake timed out"))??;
        debug!(socket_id = %socket_id, "pusher connection established");

        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_socket(ws, frames_rx, events_tx));

        Ok(Link {
            socket_id: Some(socket_id),
            sink: Arc::new(ChannelSink(frames_tx)),
            events: events_rx,
        })
    }

    fn name(&self) -> &'static str {
        "websocket"
    }
}

////////////////////////////////////////////////////////////////////////////////
// Внутренние функции
////////////////////////////////////////////////////////////////////////////////

/// Ждёт `pusher:connection_established` и возвращает `socket_id`.
async fn await_established(ws: &mut WsStream) -> BusResult<String> {
    while let Some(frame) = ws.next().await {
        let frame = frame.map_err(|e| BusError::connection(e.to_string()))?;
        let WsMessage::Text(text) = frame else {
            continue;
        };
        let event: PusherEvent =
            serde_json::from_str(text.as_str()).map_err(|e| BusError::codec(e.to_string()))?;
        match event.event.as_str() {
            "pusher:connection_established" => return event.socket_id(),
            "pusher:error" => {
                return Err(BusError::connection(format!(
                    "pusher refused the connection: {}",
                    event.data
                )))
            }
            _ => trace!(event = %event.event, "skipping event before handshake"),
        }
    }
    Err(BusError::connection("socket closed during handshake"))
}

/// Задача сокета: пишет кадры клиента и читает события сервиса.
async fn run_socket(
    ws: WsStream,
    mut frames: mpsc::UnboundedReceiver<Frame>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    let (mut write, mut read) = ws.split();

    let reason = loop {
        tokio::select! {
            frame = frames.recv() => {
                let Some(frame) = frame else {
                    let _ = write.close().await;
                    return;
                };
                if frame == Frame::Close {
                    let _ = write.close().await;
                    return;
                }
                let text = match PusherEvent::from_frame(&frame).and_then(|e| match e {
                    Some(event) => event.to_text().map(Some),
                    None => Ok(None),
                }) {
                    Ok(Some(text)) => text,
                    Ok(None) => continue,
                    Err(err) => {
                        warn!(error = %err, "dropping outbound frame");
                        continue;
                    }
                };
                if let Err(e) = write.send(WsMessage::Text(text.into())).await {
                    break format!("websocket write failed: {e}");
                }
            }
            incoming = read.next() => {
                match incoming {
                    Some(Ok(WsMessage::Text(text))) => {
                        let event: PusherEvent = match serde_json::from_str(text.as_str()) {
                            Ok(event) => event,
                            Err(e) => {
                                warn!(error = %e, "malformed pusher event");
                                continue;
                            }
                        };
                        match event.classify() {
                            Inbound::Deliver(msg) => {
                                if events.send(TransportEvent::Message(msg)).is_err() {
                                    let _ = write.close().await;
                                    return;
                                }
                            }
                            Inbound::Pong => {
                                let pong = PusherEvent::new("pusher:pong", None, json!({}));
                                let sent = match pong.to_text() {
                                    Ok(text) => write.send(WsMessage::Text(text.into())).await,
                                    Err(_) => Ok(()),
                                };
                                if let Err(e) = sent {
                                    break format!("websocket write failed: {e}");
                                }
                            }
                            Inbound::Ignore => {}
                        }
                    }
                    Some(Ok(WsMessage::Close(frame))) => {
                        break frame
                            .map(|f| format!("closed by server: {}", f.reason.as_str()))
                            .unwrap_or_else(|| "closed by server".to_string());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break format!("websocket read failed: {e}"),
                    None => break "websocket stream ended".to_string(),
                }
            }
        }
    };

    debug!(reason = %reason, "websocket link lost");
    let _ = events.send(TransportEvent::Closed { reason });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Payload, XpGained};

    /// Тест проверяет построение адреса по ключу приложения и кластеру.
    #[test]
    fn test_endpoint_from_cluster() {
        let cfg = WebSocketConfig {
            url: None,
            app_key: Some("abc123".into()),
            cluster: Some("eu".into()),
        };
        let url = cfg.endpoint().unwrap();
        assert_eq!(url.host_str(), Some("ws-eu.pusher.com"));
        assert_eq!(url.path(), "/app/abc123");
        assert!(url.query().unwrap().contains("protocol=7"));

        assert!(WebSocketConfig::default().endpoint().is_err());
    }

    /// Тест проверяет кодирование кадров в события Pusher.
    #[test]
    fn test_frames_to_events() {
        let sub = PusherEvent::from_frame(&Frame::Subscribe("public".into()))
            .unwrap()
            .unwrap();
        assert_eq!(sub.event, "pusher:subscribe");
        assert_eq!(sub.data, json!({"channel": "public"}));

        let msg = Message::new(XpGained {
            user_id: "u".into(),
            amount: 1,
            total_xp: 2,
            source: None,
        })
        .on_channel("public");
        let publish = PusherEvent::from_frame(&Frame::Publish(msg.clone()))
            .unwrap()
            .unwrap();
        assert_eq!(publish.event, "client-XP_GAINED");
        assert_eq!(publish.channel.as_deref(), Some("public"));
        assert_eq!(publish.data["type"], "XP_GAINED");

        assert!(PusherEvent::from_frame(&Frame::Close).unwrap().is_none());
    }

    /// Тест проверяет разбор серверного события со строковым `data`,
    /// содержащим только нагрузку.
    #[test]
    fn test_classify_server_event_with_string_data() {
        let event: PusherEvent = serde_json::from_value(json!({
            "event": "LEADERBOARD_UPDATE",
            "channel": "public",
            "data": "{\"entries\":[]}"
        }))
        .unwrap();

        match event.classify() {
            Inbound::Deliver(msg) => {
                assert_eq!(msg.kind(), MessageType::LeaderboardUpdate);
                assert_eq!(msg.channel, Some(ChannelId::new("public")));
                assert!(matches!(msg.payload, Payload::LeaderboardUpdate(_)));
            }
            other => panic!("unexpected classification: {other:?}"),
        }
    }

    /// Тест проверяет служебные и неизвестные события.
    #[test]
    fn test_classify_control_events() {
        let ping = PusherEvent::new("pusher:ping", None, json!({}));
        assert_eq!(ping.classify(), Inbound::Pong);

        let unknown = PusherEvent::new("lesson-created", Some("public".into()), json!({}));
        assert_eq!(unknown.classify(), Inbound::Ignore);

        let mismatched = PusherEvent::new(
            "client-XP_GAINED",
            Some("public".into()),
            json!({"type": "PING", "payload": {"sentAt": 1}}),
        );
        assert_eq!(mismatched.classify(), Inbound::Ignore);
    }

    /// Тест проверяет извлечение `socket_id` из рукопожатия.
    #[test]
    fn test_socket_id_from_established() {
        let event = PusherEvent::new(
            "pusher:connection_established",
            None,
            Value::String("{\"socket_id\":\"123.456\",\"activity_timeout\":120}".into()),
        );
        assert_eq!(event.socket_id().unwrap(), "123.456");
    }
}
