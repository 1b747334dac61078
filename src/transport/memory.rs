use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
        Arc, Weak,
    },
};

use async_trait::async_trait;
use dashmap::DashMap;
use edubus_error::{BusError, BusResult};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::{Frame, FrameSink, Link, Transport, TransportEvent};
use crate::protocol::{ChannelId, Message};

/// Внутрипроцессный pub/sub-сервис.
///
/// Хаб хранит подключённые связи и их каналы. Публикация клиента
/// доставляется всем подписчикам канала, кроме отправителя; серверная
/// публикация [`MemoryHub::publish`] доставляется всем подписчикам.
///
/// Поддерживает внедрение сбоев для тестов: отказ ближайших подключений,
/// обрыв всех связей и режим «сервис недоступен».
#[derive(Clone, Default)]
pub struct MemoryHub {
    inner: Arc<HubInner>,
}

/// Коннектор к [`MemoryHub`].
#[derive(Clone)]
pub struct MemoryTransport {
    hub: MemoryHub,
}

#[derive(Default)]
struct HubInner {
    links: DashMap<u64, HubLink>,
    next_link: AtomicU64,
    fail_next: AtomicU32,
    offline: AtomicBool,
    /// Общее количество успешных подключений
    connects: AtomicU64,
    /// Общее количество публикаций (клиентских и серверных)
    published: AtomicU64,
}

struct HubLink {
    events: mpsc::UnboundedSender<TransportEvent>,
    channels: HashSet<ChannelId>,
}

/// Приёмник кадров одной связи хаба.
struct HubSink {
    hub: Weak<HubInner>,
    link_id: u64,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Создаёт коннектор для клиента шины.
    pub fn transport(&self) -> MemoryTransport {
        MemoryTransport { hub: self.clone() }
    }

    /// Серверная публикация: доставляет сообщение всем подписчикам канала.
    ///
    /// Возвращает количество связей, получивших сообщение.
    pub fn publish(
        &self,
        channel: impl Into<ChannelId>,
        message: Message,
    ) -> usize {
        let channel = channel.into();
        self.inner.deliver(&channel, message.on_channel(channel.clone()), None)
    }

    /// Следующие `n` попыток подключения завершатся ошибкой.
    pub fn fail_next_connects(
        &self,
        n: u32,
    ) {
        self.inner.fail_next.store(n, Ordering::SeqCst);
    }

    /// Обрывает все связи: клиенты получат `Closed`.
    pub fn drop_all_links(&self) {
        let ids: Vec<u64> = self.inner.links.iter().map(|e| *e.key()).collect();
        for id in ids {
            if let Some((_, link)) = self.inner.links.remove(&id) {
                let _ = link.events.send(TransportEvent::Closed {
                    reason: "dropped by hub".to_string(),
                });
            }
        }
        debug!("memory hub dropped all links");
    }

    /// Переводит хаб в режим недоступности: новые подключения отклоняются.
    pub fn set_offline(
        &self,
        offline: bool,
    ) {
        self.inner.offline.store(offline, Ordering::SeqCst);
    }

    /// Количество связей, подписанных на канал.
    pub fn subscriber_count(
        &self,
        channel: &str,
    ) -> usize {
        self.inner
            .links
            .iter()
            .filter(|l| l.channels.iter().any(|c| c.as_str() == channel))
            .count()
    }

    pub fn link_count(&self) -> usize {
        self.inner.links.len()
    }

    pub fn connect_count(&self) -> u64 {
        self.inner.connects.load(Ordering::Relaxed)
    }

    pub fn publish_count(&self) -> u64 {
        self.inner.published.load(Ordering::Relaxed)
    }
}

impl HubInner {
    fn open_link(self: &Arc<Self>) -> BusResult<Link> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(BusError::connection("memory hub is offline"));
        }
        let refused = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(BusError::connection("memory hub refused the connection"));
        }

        let link_id = self.next_link.fetch_add(1, Ordering::Relaxed) + 1;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        self.links.insert(
            link_id,
            HubLink {
                events: events_tx,
                channels: HashSet::new(),
            },
        );
        self.connects.fetch_add(1, Ordering::Relaxed);
        debug!(link_id, "memory hub accepted link");

        Ok(Link {
            socket_id: Some(format!("memory.{link_id}")),
            sink: Arc::new(HubSink {
                hub: Arc::downgrade(self),
                link_id,
            }),
            events: events_rx,
        })
    }

    /// Доставляет сообщение подписчикам канала, кроме `origin`.
    fn deliver(
        &self,
        channel: &ChannelId,
        message: Message,
        origin: Option<u64>,
    ) -> usize {
        self.published.fetch_add(1, Ordering::Relaxed);

        let mut delivered = 0;
        for link in self.links.iter() {
            if Some(*link.key()) == origin || !link.channels.contains(channel) {
                continue;
            }
            if link
                .events
                .send(TransportEvent::Message(message.clone()))
                .is_ok()
            {
                delivered += 1;
            }
        }
        trace!(channel = %channel, delivered, "memory hub delivered message");
        delivered
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self) -> BusResult<Link> {
        self.hub.inner.open_link()
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

impl FrameSink for HubSink {
    fn send(
        &self,
        frame: Frame,
    ) -> BusResult<()> {
        let hub = self
            .hub
            .upgrade()
            .ok_or_else(|| BusError::send_failed("memory hub is gone"))?;

        match frame {
            Frame::Subscribe(channel) => {
                let mut link = hub
                    .links
                    .get_mut(&self.link_id)
                    .ok_or_else(|| BusError::send_failed("link is closed"))?;
                link.channels.insert(channel);
            }
            Frame::Unsubscribe(channel) => {
                if let Some(mut link) = hub.links.get_mut(&self.link_id) {
                    link.channels.remove(&channel);
                }
            }
            Frame::Publish(message) => {
                if !hub.links.contains_key(&self.link_id) {
                    return Err(BusError::send_failed("link is closed"));
                }
                let Some(channel) = message.channel.clone() else {
                    return Err(BusError::send_failed("message has no channel"));
                };
                hub.deliver(&channel, message, Some(self.link_id));
            }
            Frame::Close => {
                hub.links.remove(&self.link_id);
                debug!(link_id = self.link_id, "memory hub link closed by client");
            }
        }
        Ok(())
    }
}
