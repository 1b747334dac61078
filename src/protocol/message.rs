use std::{fmt, str::FromStr};

use edubus_error::{BusError, BusResult};
use serde::{Deserialize, Serialize};

use super::{ChannelId, Payload};

/// Закрытый набор типов сообщений шины.
///
/// Строковое представление совпадает с тем, что лежит в поле `type` на
/// проводе (`SCREAMING_SNAKE_CASE`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    Connect,
    Disconnect,
    Ping,
    Pong,
    SystemNotification,
    UserMessage,
    LeaderboardUpdate,
    XpGained,
    BadgeEarned,
    ContentProgress,
    RequestLeaderboard,
}

/// Сообщение шины: типизированная нагрузка плюс метаданные доставки.
///
/// Формат на проводе:
/// ```json
/// {"type":"XP_GAINED","payload":{...},"channel":"public",
///  "correlationId":"...","timestamp":1700000000000}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(flatten)]
    pub payload: Payload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<ChannelId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Unix-время в миллисекундах
    #[serde(default = "now_millis")]
    pub timestamp: i64,
}

/// Текущее время в миллисекундах с начала эпохи.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl MessageType {
    pub const ALL: [MessageType; 11] = [
        MessageType::Connect,
        MessageType::Disconnect,
        MessageType::Ping,
        MessageType::Pong,
        MessageType::SystemNotification,
        MessageType::UserMessage,
        MessageType::LeaderboardUpdate,
        MessageType::XpGained,
        MessageType::BadgeEarned,
        MessageType::ContentProgress,
        MessageType::RequestLeaderboard,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Disconnect => "DISCONNECT",
            Self::Ping => "PING",
            Self::Pong => "PONG",
            Self::SystemNotification => "SYSTEM_NOTIFICATION",
            Self::UserMessage => "USER_MESSAGE",
            Self::LeaderboardUpdate => "LEADERBOARD_UPDATE",
            Self::XpGained => "XP_GAINED",
            Self::BadgeEarned => "BADGE_EARNED",
            Self::ContentProgress => "CONTENT_PROGRESS",
            Self::RequestLeaderboard => "REQUEST_LEADERBOARD",
        }
    }

    /// Служебные типы, которые клиент порождает сам (события жизненного
    /// цикла и heartbeat).
    pub const fn is_control(self) -> bool {
        matches!(
            self,
            Self::Connect | Self::Disconnect | Self::Ping | Self::Pong
        )
    }
}

impl Message {
    /// Создаёт сообщение без канала с текущей меткой времени.
    pub fn new(payload: impl Into<Payload>) -> Self {
        Self {
            payload: payload.into(),
            channel: None,
            correlation_id: None,
            timestamp: now_millis(),
        }
    }

    pub fn on_channel(
        mut self,
        channel: impl Into<ChannelId>,
    ) -> Self {
        self.channel = Some(channel.into());
        self
    }

    pub fn with_correlation_id(
        mut self,
        correlation_id: impl Into<String>,
    ) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn kind(&self) -> MessageType {
        self.payload.kind()
    }

    pub fn channel(&self) -> Option<&ChannelId> {
        self.channel.as_ref()
    }

    /// Ответ на это сообщение: тот же канал и correlation id.
    pub fn reply(
        &self,
        payload: impl Into<Payload>,
    ) -> Message {
        Message {
            payload: payload.into(),
            channel: self.channel.clone(),
            correlation_id: self.correlation_id.clone(),
            timestamp: now_millis(),
        }
    }

    /// Сериализует сообщение в JSON-строку.
    pub fn to_json(&self) -> BusResult<String> {
        serde_json::to_string(self).map_err(|e| BusError::codec(e.to_string()))
    }

    /// Разбирает сообщение из JSON-строки.
    pub fn from_json(raw: &str) -> BusResult<Self> {
        serde_json::from_str(raw).map_err(|e| BusError::codec(e.to_string()))
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

impl fmt::Display for MessageType {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = BusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| BusError::codec(format!("unknown message type: {s}")))
    }
}

impl From<Payload> for Message {
    fn from(payload: Payload) -> Self {
        Message::new(payload)
    }
}
