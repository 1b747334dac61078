use std::fmt;

use num_enum::TryFromPrimitive;
#[cfg(feature = "serde")]
use serde_repr::{Deserialize_repr, Serialize_repr};

/// Числовой код ошибки.
///
/// Тысячи задают категорию: 1xxx общие, 2xxx данные, 3xxx подписки,
/// 4xxx очередь и отмена, 6xxx соединение, 7xxx настройки, 8xxx протокол.
/// С feature `serde` код сериализуется числом.
#[cfg_attr(feature = "serde", derive(Serialize_repr, Deserialize_repr))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive)]
#[repr(u32)]
#[non_exhaustive]
pub enum StatusCode {
    Unknown = 1000,
    Unexpected = 1002,
    Internal = 1003,
    InvalidArgs = 1004,

    AlreadyExists = 2001,
    InvalidData = 2002,

    HandlerFailed = 3000,

    QueueFull = 4000,
    Cancelled = 4001,

    Io = 6000,
    ConnectionClosed = 6001,
    ConnectionFailed = 6004,
    NotConnected = 6005,
    ConnectionLost = 6006,
    SendFailed = 6007,
    ReconnectExhausted = 6008,
    AckTimeout = 6009,

    ConfigInvalid = 7000,
    ConfigMissing = 7001,

    DecodingError = 8002,
    UnexpectedAck = 8003,
}

impl StatusCode {
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Код по числу; `None` для неизвестных значений.
    pub fn from_u32(v: u32) -> Option<Self> {
        Self::try_from(v).ok()
    }

    /// Имеет ли смысл повторить операцию (переподключиться, переслать).
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::AckTimeout
                | Self::ConnectionClosed
                | Self::ConnectionFailed
                | Self::ConnectionLost
                | Self::NotConnected
                | Self::SendFailed
        )
    }

    /// Категория кода для тегов метрик.
    pub fn category(self) -> &'static str {
        match self.code() / 1000 {
            2 => "data",
            3 => "subscription",
            4 => "flow",
            6 => "connection",
            7 => "config",
            8 => "protocol",
            _ => "general",
        }
    }
}

impl From<StatusCode> for u32 {
    fn from(c: StatusCode) -> Self {
        c.code()
    }
}

impl fmt::Display for StatusCode {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{self:?} ({})", self.code())
    }
}
