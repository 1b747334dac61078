//! Полезная нагрузка сообщений: по одной структуре на каждый тип.
//!
//! Поля сериализуются в camelCase, как их ожидают клиенты дашборда.

use serde::{Deserialize, Serialize};

use super::MessageType;

/// Нагрузка сообщения — закрытое объединение по типу сообщения.
///
/// На проводе тип и нагрузка лежат рядом:
/// `{"type": "XP_GAINED", "payload": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Payload {
    Connect(ConnectInfo),
    Disconnect(DisconnectInfo),
    Ping(Heartbeat),
    Pong(Heartbeat),
    SystemNotification(SystemNotification),
    UserMessage(UserMessage),
    LeaderboardUpdate(LeaderboardUpdate),
    XpGained(XpGained),
    BadgeEarned(BadgeEarned),
    ContentProgress(ContentProgress),
    RequestLeaderboard(RequestLeaderboard),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Нагрузка PING/PONG. `sent_at` — метка исходного PING в миллисекундах.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Heartbeat {
    pub sent_at: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    #[default]
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemNotification {
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub level: NotificationLevel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserMessage {
    pub from_user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_user_id: Option<String>,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub user_id: String,
    pub display_name: String,
    pub xp: u64,
    pub rank: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardUpdate {
    pub entries: Vec<LeaderboardEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct XpGained {
    pub user_id: String,
    pub amount: u64,
    pub total_xp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BadgeEarned {
    pub user_id: String,
    pub badge_id: String,
    pub badge_name: String,
}

/// Прогресс генерации контента (канал `content-generation`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentProgress {
    pub content_id: String,
    pub stage: String,
    /// Проценты, 0..=100
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestLeaderboard {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl Payload {
    /// Тип сообщения, которому соответствует нагрузка.
    pub fn kind(&self) -> MessageType {
        match self {
            Self::Connect(_) => MessageType::Connect,
            Self::Disconnect(_) => MessageType::Disconnect,
            Self::Ping(_) => MessageType::Ping,
            Self::Pong(_) => MessageType::Pong,
            Self::SystemNotification(_) => MessageType::SystemNotification,
            Self::UserMessage(_) => MessageType::UserMessage,
            Self::LeaderboardUpdate(_) => MessageType::LeaderboardUpdate,
            Self::XpGained(_) => MessageType::XpGained,
            Self::BadgeEarned(_) => MessageType::BadgeEarned,
            Self::ContentProgress(_) => MessageType::ContentProgress,
            Self::RequestLeaderboard(_) => MessageType::RequestLeaderboard,
        }
    }
}

impl ContentProgress {
    /// Генерация завершена.
    pub fn is_complete(&self) -> bool {
        self.progress >= 100
    }
}

impl LeaderboardUpdate {
    /// Запись пользователя, если он есть в таблице.
    pub fn entry_for(
        &self,
        user_id: &str,
    ) -> Option<&LeaderboardEntry> {
        self.entries.iter().find(|e| e.user_id == user_id)
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

macro_rules! impl_from_payload {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Payload {
                fn from(value: $ty) -> Self {
                    Payload::$variant(value)
                }
            }
        )*
    };
}

impl_from_payload! {
    SystemNotification => SystemNotification,
    UserMessage => UserMessage,
    LeaderboardUpdate => LeaderboardUpdate,
    XpGained => XpGained,
    BadgeEarned => BadgeEarned,
    ContentProgress => ContentProgress,
    RequestLeaderboard => RequestLeaderboard,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    /// Тест проверяет формат нагрузки на проводе: тип рядом с payload,
    /// поля в camelCase.
    #[test]
    fn test_payload_wire_shape() {
        let p = Payload::XpGained(XpGained {
            user_id: "u-1".into(),
            amount: 25,
            total_xp: 1200,
            source: None,
        });
        let v = serde_json::to_value(&p).unwrap();
        assert_eq!(
            v,
            json!({
                "type": "XP_GAINED",
                "payload": {"userId": "u-1", "amount": 25, "totalXp": 1200}
            })
        );
    }

    /// Тест проверяет разбор уведомления без поля level (по умолчанию info).
    #[test]
    fn test_notification_level_defaults_to_info() {
        let p: Payload = serde_json::from_value(json!({
            "type": "SYSTEM_NOTIFICATION",
            "payload": {"title": "Maintenance", "message": "Back at 10:00"}
        }))
        .unwrap();

        match p {
            Payload::SystemNotification(n) => assert_eq!(n.level, NotificationLevel::Info),
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    /// Тест проверяет, что неизвестный тип отвергается.
    #[test]
    fn test_unknown_type_is_rejected() {
        let res: Result<Payload, _> =
            serde_json::from_value(json!({"type": "LESSON_CREATED", "payload": {}}));
        assert!(res.is_err());
    }

    /// Тест проверяет вспомогательные методы нагрузок.
    #[test]
    fn test_payload_helpers() {
        let board = LeaderboardUpdate {
            entries: vec![LeaderboardEntry {
                user_id: "u-7".into(),
                display_name: "Ada".into(),
                xp: 900,
                rank: 1,
            }],
        };
        assert_eq!(board.entry_for("u-7").map(|e| e.rank), Some(1));
        assert!(board.entry_for("u-8").is_none());
        assert_eq!(Payload::from(board).kind(), MessageType::LeaderboardUpdate);

        let progress = ContentProgress {
            content_id: "lesson-3".into(),
            stage: "rendering".into(),
            progress: 100,
            message: None,
        };
        assert!(progress.is_complete());
    }
}
