use std::sync::{Arc, Weak};

use edubus_error::BusResult;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, trace};

use super::core::Inner;
use crate::transport::{Frame, FrameSink, TransportEvent};

/// Активная связь клиента: приёмник кадров и задача чтения событий.
///
/// Поколение отличает текущую связь от уже заменённой: сигнал обрыва от
/// старой задачи чтения игнорируется.
pub(crate) struct ActiveLink {
    sink: Arc<dyn FrameSink>,
    generation: u64,
    pump: JoinHandle<()>,
}

impl ActiveLink {
    pub(crate) fn new(
        sink: Arc<dyn FrameSink>,
        generation: u64,
        pump: JoinHandle<()>,
    ) -> Self {
        Self {
            sink,
            generation,
            pump,
        }
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn send(
        &self,
        frame: Frame,
    ) -> BusResult<()> {
        self.sink.send(frame)
    }

    /// Закрывает связь по инициативе клиента.
    pub(crate) fn close(self) {
        let _ = self.sink.send(Frame::Close);
        self.pump.abort();
        debug!(generation = self.generation, "link closed by client");
    }
}

/// Задача чтения: доставляет входящие сообщения в клиент по одному, в
/// порядке транспорта, и сообщает об обрыве связи.
pub(crate) async fn pump(
    inner: Weak<Inner>,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    generation: u64,
) {
    let reason = loop {
        match events.recv().await {
            Some(TransportEvent::Message(msg)) => match inner.upgrade() {
                Some(inner) => inner.handle_inbound(msg),
                None => return,
            },
            Some(TransportEvent::Closed { reason }) => break reason,
            None => break "transport event stream ended".to_string(),
        }
    };

    trace!(generation, reason = %reason, "pump stopped");
    if let Some(inner) = inner.upgrade() {
        inner.on_link_lost(generation, reason).await;
    }
}
