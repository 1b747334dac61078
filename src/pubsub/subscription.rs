use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use serde::Serialize;

use crate::protocol::{ChannelId, Message, MessageType};

/// Обработчик сообщений подписки.
///
/// Ошибка или паника обработчика изолируются реестром: они логируются и
/// не мешают доставке остальным подписчикам.
pub type Handler = Arc<dyn Fn(&Message) -> anyhow::Result<()> + Send + Sync>;

/// Фильтр подписки. Обработчик вызывается только если предикат вернул `true`.
pub type Predicate = Arc<dyn Fn(&Message) -> bool + Send + Sync>;

/// Уникальный идентификатор подписки.
///
/// Выдаётся монотонно и никогда не переиспользуется в пределах реестра.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SubscriptionId(pub(crate) u64);

/// Область действия подписки.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// Сообщения одного канала
    Channel(ChannelId),
    /// Все сообщения, включая локальные события без канала
    AllChannels,
}

/// Зарегистрированная подписка.
pub(crate) struct Entry {
    pub(crate) id: SubscriptionId,
    pub(crate) scope: Scope,
    pub(crate) predicate: Option<Predicate>,
    pub(crate) handler: Handler,
    /// Сбрасывается при отписке, в том числе посреди текущей рассылки
    pub(crate) active: AtomicBool,
}

/// RAII-хэндл подписки: отписывает при `Drop`.
///
/// ```ignore
/// let _guard = client.subscribe_guard("public", handler, None);
/// // подписка жива, пока жив `_guard`
/// ```
#[must_use = "подписка снимается сразу, если хэндл не сохранён"]
pub struct SubscriptionGuard {
    id: SubscriptionId,
    release: Option<Box<dyn FnOnce(SubscriptionId) + Send + Sync>>,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl SubscriptionId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Scope {
    /// Попадает ли сообщение в область подписки.
    pub fn matches(
        &self,
        msg: &Message,
    ) -> bool {
        match self {
            Self::Channel(ch) => msg.channel.as_ref() == Some(ch),
            Self::AllChannels => true,
        }
    }

    pub fn channel(&self) -> Option<&ChannelId> {
        match self {
            Self::Channel(ch) => Some(ch),
            Self::AllChannels => None,
        }
    }
}

impl Entry {
    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }

    pub(crate) fn accepts(
        &self,
        msg: &Message,
    ) -> bool {
        self.predicate.as_ref().map_or(true, |p| p(msg))
    }
}

impl SubscriptionGuard {
    pub(crate) fn new(
        id: SubscriptionId,
        release: impl FnOnce(SubscriptionId) + Send + Sync + 'static,
    ) -> Self {
        Self {
            id,
            release: Some(Box::new(release)),
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Явно снимает подписку. Аналогично `drop(guard)`.
    pub fn unsubscribe(self) {}

    /// Отвязывает подписку от хэндла: она останется активной до явного
    /// `unsubscribe(id)`.
    pub fn detach(mut self) -> SubscriptionId {
        self.release = None;
        self.id
    }
}

/// Предикат «тип сообщения входит в набор».
pub fn of_types(types: impl IntoIterator<Item = MessageType>) -> Predicate {
    let types: Vec<MessageType> = types.into_iter().collect();
    Arc::new(move |msg: &Message| types.contains(&msg.kind()))
}

/// Оборачивает замыкание в [`Handler`].
pub fn handler<F>(f: F) -> Handler
where
    F: Fn(&Message) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

impl fmt::Display for SubscriptionId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "sub#{}", self.0)
    }
}

impl fmt::Debug for Entry {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Entry")
            .field("id", &self.id)
            .field("scope", &self.scope)
            .field("filtered", &self.predicate.is_some())
            .field("active", &self.is_active())
            .finish()
    }
}

impl fmt::Debug for SubscriptionGuard {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("SubscriptionGuard")
            .field("id", &self.id)
            .field("attached", &self.release.is_some())
            .finish()
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::protocol::{LeaderboardUpdate, Payload, XpGained};

    fn xp() -> Message {
        Message::new(XpGained {
            user_id: "u".into(),
            amount: 1,
            total_xp: 1,
            source: None,
        })
        .on_channel("public")
    }

    /// Тест проверяет сопоставление областей подписки.
    #[test]
    fn test_scope_matches() {
        let msg = xp();
        assert!(Scope::Channel("public".into()).matches(&msg));
        assert!(!Scope::Channel("other".into()).matches(&msg));
        assert!(Scope::AllChannels.matches(&msg));
        assert!(Scope::AllChannels.matches(&Message::new(Payload::Connect(Default::default()))));
    }

    /// Тест проверяет предикат по набору типов.
    #[test]
    fn test_of_types_predicate() {
        let p = of_types([MessageType::XpGained, MessageType::BadgeEarned]);
        assert!(p(&xp()));
        assert!(!p(&Message::new(LeaderboardUpdate::default())));
    }

    /// Тест проверяет, что хэндл отписывает при drop ровно один раз,
    /// а `detach` отключает отписку.
    #[test]
    fn test_guard_release_on_drop() {
        let released = Arc::new(Mutex::new(Vec::new()));

        let r = released.clone();
        let guard = SubscriptionGuard::new(SubscriptionId(7), move |id| r.lock().unwrap().push(id));
        assert_eq!(guard.id().as_u64(), 7);
        drop(guard);
        assert_eq!(*released.lock().unwrap(), vec![SubscriptionId(7)]);

        let r = released.clone();
        let guard = SubscriptionGuard::new(SubscriptionId(8), move |id| r.lock().unwrap().push(id));
        assert_eq!(guard.detach(), SubscriptionId(8));
        assert_eq!(released.lock().unwrap().len(), 1);
    }
}
