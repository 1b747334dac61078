//! Граница с внешним pub/sub-сервисом.
//!
//! Клиент шины не знает, как устроен сервис: он получает от [`Transport`]
//! установленную связь [`Link`], отправляет в неё кадры [`Frame`] и читает
//! события [`TransportEvent`].
//!
//! - `memory`: внутрипроцессный хаб для тестов, демо и встраивания.
//! - `websocket`: Pusher-совместимый протокол поверх WebSocket.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use edubus_error::{BusError, BusResult};
use tokio::sync::mpsc;

use crate::protocol::{ChannelId, Message};

pub mod memory;
pub mod websocket;

pub use memory::{MemoryHub, MemoryTransport};
pub use websocket::{PusherEvent, WebSocketConfig, WebSocketTransport};

/// Исходящий кадр клиента.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Subscribe(ChannelId),
    Unsubscribe(ChannelId),
    Publish(Message),
    /// Клиент закрывает связь по своей инициативе
    Close,
}

/// Входящее событие связи.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Message(Message),
    /// Связь оборвана со стороны сервиса или сети
    Closed { reason: String },
}

/// Приёмник исходящих кадров.
///
/// Отправка синхронная и не ждёт сети: реализация либо обрабатывает кадр
/// сразу, либо ставит его в очередь своей задачи записи.
pub trait FrameSink: Send + Sync {
    fn send(
        &self,
        frame: Frame,
    ) -> BusResult<()>;
}

/// Установленная связь с сервисом.
pub struct Link {
    /// Идентификатор сокета, выданный сервисом при рукопожатии
    pub socket_id: Option<String>,
    pub sink: Arc<dyn FrameSink>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Способ установить связь с pub/sub-сервисом.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Выполняет рукопожатие и возвращает готовую связь.
    ///
    /// Ошибка рукопожатия возвращается как [`BusError::Connection`].
    async fn connect(&self) -> BusResult<Link>;

    /// Короткое имя транспорта для логов.
    fn name(&self) -> &'static str;
}

/// Приёмник кадров поверх канала задачи записи.
pub(crate) struct ChannelSink(pub(crate) mpsc::UnboundedSender<Frame>);

impl FrameSink for ChannelSink {
    fn send(
        &self,
        frame: Frame,
    ) -> BusResult<()> {
        self.0
            .send(frame)
            .map_err(|_| BusError::send_failed("link writer is gone"))
    }
}

impl fmt::Debug for Link {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Link")
            .field("socket_id", &self.socket_id)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn connect(&self) -> BusResult<Link> {
        (**self).connect().await
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Тест проверяет, что приёмник поверх канала сообщает об ошибке
    /// отправки, когда задача записи завершилась.
    #[test]
    fn test_channel_sink_reports_closed_writer() {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = ChannelSink(tx);

        assert!(sink.send(Frame::Subscribe("public".into())).is_ok());
        drop(rx);
        match sink.send(Frame::Close) {
            Err(BusError::SendFailed { .. }) => {}
            other => panic!("expected SendFailed, got {other:?}"),
        }
    }
}
