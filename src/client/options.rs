use std::time::Duration;

use crate::{
    client::BackoffPolicy,
    protocol::{ChannelId, Message},
};

/// Канал по умолчанию для отправок без явного канала.
pub const DEFAULT_CHANNEL: &str = "public";

/// Конфигурация клиента шины.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Канал для `send` без явного канала; клиент слушает его всегда
    pub default_channel: ChannelId,
    /// Таймаут подтверждения по умолчанию
    pub ack_timeout: Duration,
    /// Таймаут рукопожатия транспорта
    pub connect_timeout: Duration,
    /// Что делать с отправкой без соединения
    pub offline: OfflinePolicy,
    /// Отвечать на входящий PING с correlation id
    pub auto_pong: bool,
    pub backoff: BackoffPolicy,
    /// Размер окна замеров задержки
    pub latency_window: usize,
}

/// Политика отправки без соединения.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OfflinePolicy {
    /// Сразу отклонять с `NotConnected`
    #[default]
    Reject,
    /// Копить в очереди до `max` сообщений и отправить при подключении
    Queue { max: usize },
}

/// Параметры одной отправки.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendOptions {
    pub channel: Option<ChannelId>,
    pub await_ack: bool,
    /// Переопределяет `ClientConfig::ack_timeout`
    pub timeout: Option<Duration>,
}

/// Результат отправки.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Сообщение передано транспорту (или поставлено в очередь)
    Sent,
    /// Пришло подтверждение с тем же correlation id
    Acknowledged(Message),
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl ClientConfig {
    pub fn with_default_channel(
        mut self,
        channel: impl Into<ChannelId>,
    ) -> Self {
        self.default_channel = channel.into();
        self
    }

    pub fn with_ack_timeout(
        mut self,
        timeout: Duration,
    ) -> Self {
        self.ack_timeout = timeout;
        self
    }

    pub fn with_offline(
        mut self,
        policy: OfflinePolicy,
    ) -> Self {
        self.offline = policy;
        self
    }

    pub fn with_backoff(
        mut self,
        backoff: BackoffPolicy,
    ) -> Self {
        self.backoff = backoff;
        self
    }
}

impl SendOptions {
    /// Отправка на конкретный канал без ожидания подтверждения.
    pub fn to(channel: impl Into<ChannelId>) -> Self {
        Self {
            channel: Some(channel.into()),
            ..Self::default()
        }
    }

    /// Отправка с ожиданием подтверждения и таймаутом из конфигурации.
    pub fn acknowledged() -> Self {
        Self {
            await_ack: true,
            ..Self::default()
        }
    }

    pub fn on(
        mut self,
        channel: impl Into<ChannelId>,
    ) -> Self {
        self.channel = Some(channel.into());
        self
    }

    pub fn await_ack(mut self) -> Self {
        self.await_ack = true;
        self
    }

    pub fn with_timeout(
        mut self,
        timeout: Duration,
    ) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl Delivery {
    pub fn is_acknowledged(&self) -> bool {
        matches!(self, Self::Acknowledged(_))
    }

    pub fn into_ack(self) -> Option<Message> {
        match self {
            Self::Acknowledged(msg) => Some(msg),
            Self::Sent => None,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            default_channel: ChannelId::new(DEFAULT_CHANNEL),
            ack_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
            offline: OfflinePolicy::Reject,
            auto_pong: true,
            backoff: BackoffPolicy::default(),
            latency_window: 32,
        }
    }
}
