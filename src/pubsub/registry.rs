use std::{
    collections::BTreeMap,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
};

use parking_lot::RwLock;
use tracing::{trace, warn};

use super::{Entry, Handler, Predicate, Scope, SubscriptionId};
use crate::protocol::{ChannelId, Message};

/// Реестр подписок: рассылает входящие сообщения независимым слушателям.
///
/// Подписки хранятся в порядке регистрации (по возрастанию id). Блокировка
/// не удерживается во время вызова обработчиков, поэтому обработчик может
/// подписываться и отписываться изнутри рассылки.
pub struct Registry {
    entries: RwLock<BTreeMap<SubscriptionId, Arc<Entry>>>,
    next_id: AtomicU64,
}

/// Результат регистрации подписки.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    pub id: SubscriptionId,
    /// Первая подписка на этот канал: транспорту нужно подписаться
    pub first_on_channel: bool,
}

/// Результат снятия подписки.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Removal {
    pub channel: Option<ChannelId>,
    /// На канале не осталось подписок: транспорту нужно отписаться
    pub last_on_channel: bool,
}

/// Итог рассылки одного сообщения.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Вызвано обработчиков (успешно или нет)
    pub delivered: usize,
    /// Отсеяно предикатами
    pub filtered: usize,
    /// Обработчик вернул ошибку или запаниковал
    pub failed: usize,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Регистрирует подписку и возвращает её id.
    pub fn subscribe(
        &self,
        scope: Scope,
        handler: Handler,
        predicate: Option<Predicate>,
    ) -> Registration {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut entries = self.entries.write();

        let first_on_channel = match &scope {
            Scope::Channel(ch) => !Self::has_channel(&entries, ch),
            Scope::AllChannels => false,
        };

        entries.insert(
            id,
            Arc::new(Entry {
                id,
                scope,
                predicate,
                handler,
                active: AtomicBool::new(true),
            }),
        );
        trace!(subscription = %id, "subscription registered");

        Registration {
            id,
            first_on_channel,
        }
    }

    /// Снимает подписку. Повторный вызов и неизвестный id дают `None`.
    pub fn unsubscribe(
        &self,
        id: SubscriptionId,
    ) -> Option<Removal> {
        let mut entries = self.entries.write();
        let entry = entries.remove(&id)?;
        entry.deactivate();

        let channel = entry.scope.channel().cloned();
        let last_on_channel = channel
            .as_ref()
            .is_some_and(|ch| !Self::has_channel(&entries, ch));
        trace!(subscription = %id, "subscription removed");

        Some(Removal {
            channel,
            last_on_channel,
        })
    }

    /// Рассылает сообщение всем подходящим подпискам.
    ///
    /// Снимок подписок берётся под блокировкой, обработчики вызываются без
    /// неё. Подписка, снятая во время рассылки, больше не вызывается.
    pub fn dispatch(
        &self,
        msg: &Message,
    ) -> DispatchReport {
        let snapshot: Vec<Arc<Entry>> = self
            .entries
            .read()
            .values()
            .filter(|e| e.scope.matches(msg))
            .cloned()
            .collect();

        let mut report = DispatchReport::default();
        for entry in snapshot {
            if !entry.is_active() {
                continue;
            }

            // Предикат тоже пользовательский код: паника в нём изолируется
            // так же, как в обработчике.
            let mut invoked = false;
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                if !entry.accepts(msg) {
                    return Ok(());
                }
                invoked = true;
                (entry.handler)(msg)
            }));
            if invoked {
                report.delivered += 1;
            }
            let failure = match outcome {
                Ok(Ok(())) if !invoked => {
                    report.filtered += 1;
                    continue;
                }
                Ok(Ok(())) => None,
                Ok(Err(err)) => Some(format!("{err:#}")),
                Err(panic) => Some(panic_message(panic.as_ref())),
            };
            if let Some(reason) = failure {
                report.failed += 1;
                warn!(
                    subscription = %entry.id,
                    message_type = %msg.kind(),
                    reason = %reason,
                    "subscription handler failed"
                );
            }
        }
        report
    }

    /// Каналы, на которые есть хотя бы одна подписка.
    pub fn channels(&self) -> Vec<ChannelId> {
        let entries = self.entries.read();
        let mut channels: Vec<ChannelId> = entries
            .values()
            .filter_map(|e| e.scope.channel().cloned())
            .collect();
        channels.sort();
        channels.dedup();
        channels
    }

    pub fn contains(
        &self,
        id: SubscriptionId,
    ) -> bool {
        self.entries.read().contains_key(&id)
    }

    /// Число подписок на канал.
    pub fn count_on(
        &self,
        channel: &ChannelId,
    ) -> usize {
        self.entries
            .read()
            .values()
            .filter(|e| e.scope.channel() == Some(channel))
            .count()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Снимает все подписки и возвращает каналы, которые были заняты.
    pub fn clear(&self) -> Vec<ChannelId> {
        let channels = self.channels();
        let drained = std::mem::take(&mut *self.entries.write());
        for entry in drained.values() {
            entry.deactivate();
        }
        channels
    }

    fn has_channel(
        entries: &BTreeMap<SubscriptionId, Arc<Entry>>,
        channel: &ChannelId,
    ) -> bool {
        entries.values().any(|e| e.scope.channel() == Some(channel))
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}
