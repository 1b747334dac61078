use std::fmt;

use serde::Serialize;

/// Состояние соединения клиента шины.
///
/// В каждый момент времени действует ровно одно значение; переходы
/// выполняются под общей блокировкой жизненного цикла.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    /// Связи нет и переподключение не запланировано
    #[default]
    Disconnected,
    /// Идёт рукопожатие с сервисом
    Connecting,
    /// Связь установлена
    Connected,
    /// Ожидание следующей попытки переподключения
    Reconnecting,
    /// Последняя попытка не удалась (см. `last_error`)
    Error,
}

impl ConnectionState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "DISCONNECTED",
            Self::Connecting => "CONNECTING",
            Self::Connected => "CONNECTED",
            Self::Reconnecting => "RECONNECTING",
            Self::Error => "ERROR",
        }
    }

    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Клиент сейчас занят установкой связи (сам или в фоне).
    pub const fn is_transitioning(self) -> bool {
        matches!(self, Self::Connecting | Self::Reconnecting)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display_and_serialize() {
        assert_eq!(ConnectionState::Reconnecting.to_string(), "RECONNECTING");
        assert_eq!(
            serde_json::to_string(&ConnectionState::Connected).unwrap(),
            "\"CONNECTED\""
        );
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_state_predicates() {
        assert!(ConnectionState::Connected.is_connected());
        assert!(!ConnectionState::Error.is_connected());
        assert!(ConnectionState::Connecting.is_transitioning());
        assert!(ConnectionState::Reconnecting.is_transitioning());
        assert!(!ConnectionState::Disconnected.is_transitioning());
    }
}
