use std::any::Any;

use thiserror::Error;

use crate::{ErrorExt, StatusCode};

/// Ошибки клиента шины событий.
///
/// Тип клонируемый: одна и та же ошибка рассылается всем ожидающим
/// запросам при разрыве соединения.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    /// Не удалось установить соединение (рукопожатие или транспорт)
    #[error("connection failed: {reason}")]
    Connection { reason: String },

    /// Подтверждение не пришло до дедлайна
    #[error("acknowledgment for {correlation_id} timed out after {after_ms}ms")]
    Timeout {
        correlation_id: String,
        after_ms: u64,
    },

    /// Отправка без соединения и без политики офлайн-очереди
    #[error("not connected")]
    NotConnected,

    /// Клиент был отключён явно, ожидающий запрос отклонён
    #[error("disconnected: {reason}")]
    Disconnected { reason: String },

    /// Транспорт оборвал уже установленное соединение
    #[error("connection lost: {reason}")]
    ConnectionLost { reason: String },

    /// Транспорт отказался принять кадр
    #[error("send failed: {reason}")]
    SendFailed { reason: String },

    /// Ожидание подтверждения отменено вызывающим кодом
    #[error("request cancelled")]
    Cancelled,

    /// Офлайн-очередь заполнена
    #[error("offline queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },

    /// Повторный correlation id среди ожидающих запросов
    #[error("duplicate correlation id: {correlation_id}")]
    DuplicateCorrelation { correlation_id: String },

    /// Исчерпан лимит попыток переподключения
    #[error("reconnect gave up after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    /// Подтверждение пришло, но с неожиданным типом сообщения
    #[error("unexpected acknowledgment: expected {expected}, got {actual}")]
    UnexpectedAck { expected: String, actual: String },

    /// Обработчик подписки завершился ошибкой или паникой
    #[error("handler of subscription {subscription} failed: {reason}")]
    Handler { subscription: u64, reason: String },

    /// Ошибка кодирования/декодирования кадра
    #[error("codec error: {reason}")]
    Codec { reason: String },
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl BusError {
    pub fn connection(reason: impl Into<String>) -> Self {
        Self::Connection {
            reason: reason.into(),
        }
    }

    pub fn disconnected(reason: impl Into<String>) -> Self {
        Self::Disconnected {
            reason: reason.into(),
        }
    }

    pub fn connection_lost(reason: impl Into<String>) -> Self {
        Self::ConnectionLost {
            reason: reason.into(),
        }
    }

    pub fn send_failed(reason: impl Into<String>) -> Self {
        Self::SendFailed {
            reason: reason.into(),
        }
    }

    pub fn codec(reason: impl Into<String>) -> Self {
        Self::Codec {
            reason: reason.into(),
        }
    }

    /// Ошибка связана с таймаутом подтверждения.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Ошибка вызвана отключением (явным или обрывом связи).
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            Self::Disconnected { .. } | Self::ConnectionLost { .. }
        )
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов для BusError
////////////////////////////////////////////////////////////////////////////////

impl ErrorExt for BusError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Connection { .. } => StatusCode::ConnectionFailed,
            Self::Timeout { .. } => StatusCode::AckTimeout,
            Self::NotConnected => StatusCode::NotConnected,
            Self::Disconnected { .. } => StatusCode::ConnectionClosed,
            Self::ConnectionLost { .. } => StatusCode::ConnectionLost,
            Self::SendFailed { .. } => StatusCode::SendFailed,
            Self::Cancelled => StatusCode::Cancelled,
            Self::QueueFull { .. } => StatusCode::QueueFull,
            Self::DuplicateCorrelation { .. } => StatusCode::AlreadyExists,
            Self::ReconnectExhausted { .. } => StatusCode::ReconnectExhausted,
            Self::UnexpectedAck { .. } => StatusCode::UnexpectedAck,
            Self::Handler { .. } => StatusCode::HandlerFailed,
            Self::Codec { .. } => StatusCode::DecodingError,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn client_message(&self) -> String {
        match self {
            Self::Connection { .. } | Self::ReconnectExhausted { .. } => {
                "Live updates are unavailable".to_string()
            }
            Self::Timeout { .. } => "The server did not respond in time".to_string(),
            Self::NotConnected | Self::Disconnected { .. } | Self::ConnectionLost { .. } => {
                "Not connected to live updates".to_string()
            }
            Self::SendFailed { .. } => "Failed to send message".to_string(),
            Self::Cancelled => "Request cancelled".to_string(),
            Self::QueueFull { .. } => "Too many pending messages".to_string(),
            Self::DuplicateCorrelation { .. }
            | Self::UnexpectedAck { .. }
            | Self::Handler { .. }
            | Self::Codec { .. } => "Internal error".to_string(),
        }
    }

    fn metrics_tags(&self) -> Vec<(&'static str, String)> {
        let mut tags = vec![
            ("error_type", "bus".to_string()),
            ("status_code", self.status_code().to_string()),
        ];

        match self {
            Self::Timeout { after_ms, .. } => {
                tags.push(("after_ms", after_ms.to_string()));
            }
            Self::ReconnectExhausted { attempts } => {
                tags.push(("attempts", attempts.to_string()));
            }
            Self::Handler { subscription, .. } => {
                tags.push(("subscription", subscription.to_string()));
            }
            _ => {}
        }

        tags
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
