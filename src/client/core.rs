use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicU32, AtomicU64, Ordering},
        Arc, Weak,
    },
    time::Duration,
};

use edubus_error::{BusError, BusResult};
use parking_lot::Mutex;
use tokio::{
    sync::{watch, Mutex as AsyncMutex},
    task::JoinHandle,
    time::Instant,
};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use super::{
    connection::{pump, ActiveLink},
    AckMatch, ClientConfig, ClientStats, ConnectionState, Delivery, OfflinePolicy,
    PendingRequests, SendOptions, StatsSnapshot,
};
use crate::{
    protocol::{
        now_millis, ChannelId, ConnectInfo, DisconnectInfo, Heartbeat, LeaderboardUpdate, Message,
        MessageType, Payload, RequestLeaderboard,
    },
    pubsub::{Predicate, Registry, Scope, SubscriptionGuard, SubscriptionId},
    transport::{Frame, Link, Transport},
};

/// Клиент шины событий реального времени.
///
/// Хэндл дешёво клонируется: все клоны работают с одним соединением,
/// одним реестром подписок и одной картой ожидающих подтверждений.
/// Фоновые задачи держат слабые ссылки и завершаются вместе с последним
/// хэндлом.
#[derive(Clone)]
pub struct BusClient {
    inner: Arc<Inner>,
}

pub(crate) struct Inner {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    state: watch::Sender<ConnectionState>,
    last_error: Mutex<Option<BusError>>,
    registry: Registry,
    pending: Arc<PendingRequests>,
    stats: ClientStats,
    link: Mutex<Option<ActiveLink>>,
    queue: Mutex<VecDeque<Message>>,
    /// Сериализует переходы жизненного цикла
    lifecycle: AsyncMutex<()>,
    reconnect_task: Mutex<Option<JoinHandle<()>>>,
    /// Номер текущей фоновой попытки переподключения
    attempts: AtomicU32,
    generation: AtomicU64,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl BusClient {
    /// Создаёт клиент. Соединение не устанавливается до `connect()`.
    pub fn new(
        config: ClientConfig,
        transport: impl Transport,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let stats = ClientStats::new(config.latency_window);
        Self {
            inner: Arc::new(Inner {
                config,
                transport: Arc::new(transport),
                state,
                last_error: Mutex::new(None),
                registry: Registry::new(),
                pending: Arc::new(PendingRequests::new()),
                stats,
                link: Mutex::new(None),
                queue: Mutex::new(VecDeque::new()),
                lifecycle: AsyncMutex::new(()),
                reconnect_task: Mutex::new(None),
                attempts: AtomicU32::new(0),
                generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Последняя ошибка соединения.
    pub fn last_error(&self) -> Option<BusError> {
        self.inner.last_error.lock().clone()
    }

    /// Поток изменений состояния соединения.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Количество запросов, ожидающих подтверждения.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    /// Количество сообщений в офлайн-очереди.
    pub fn queued_count(&self) -> usize {
        self.inner.queue.lock().len()
    }

    pub fn subscription_count(&self) -> usize {
        self.inner.registry.len()
    }

    ////////////////////////////////////////////////////////////////////////////
    // Жизненный цикл
    ////////////////////////////////////////////////////////////////////////////

    /// Устанавливает соединение.
    ///
    /// Ничего не делает, если клиент уже подключён или подключается. Во
    /// втором случае `Ok(())` не подтверждает соединение: исход текущей
    /// попытки нужно ждать через [`state_changes`](Self::state_changes).
    /// При ожидании фонового переподключения отменяет ожидание и пробует сразу.
    /// При неудаче переводит клиент в `Error`, возвращает ошибку и
    /// планирует фоновые попытки по политике backoff.
    pub async fn connect(&self) -> BusResult<()> {
        if matches!(
            self.state(),
            ConnectionState::Connected | ConnectionState::Connecting
        ) {
            return Ok(());
        }
        self.inner.abort_reconnect();

        let _lifecycle = self.inner.lifecycle.lock().await;
        if self.state().is_connected() {
            return Ok(());
        }
        self.inner.attempts.store(0, Ordering::SeqCst);

        match self.inner.establish().await {
            Ok(()) => Ok(()),
            Err(err) => {
                self.inner.record_failure(&err);
                self.inner.schedule_reconnect();
                Err(err)
            }
        }
    }

    /// Разрывает соединение.
    ///
    /// Отменяет фоновое переподключение, отклоняет все ожидающие запросы
    /// с `Disconnected`, сбрасывает офлайн-очередь. Подписки остаются
    /// зарегистрированными до следующего подключения.
    pub async fn disconnect(
        &self,
        reason: impl Into<String>,
    ) {
        let reason = reason.into();
        self.inner.abort_reconnect();

        let _lifecycle = self.inner.lifecycle.lock().await;
        let previous = self.state();
        self.inner.teardown(&BusError::disconnected(reason.clone()));
        self.inner.attempts.store(0, Ordering::SeqCst);
        self.inner.set_state(ConnectionState::Disconnected);

        if previous != ConnectionState::Disconnected {
            info!(reason = %reason, "bus client disconnected");
            self.inner
                .dispatch_local(Message::new(Payload::Disconnect(DisconnectInfo {
                    reason: Some(reason),
                })));
        }
    }

    /// Переподключается одной операцией.
    ///
    /// Слушатели состояния видят `Reconnecting` → `Connecting` → …, но
    /// никогда промежуточный `Disconnected`.
    pub async fn reconnect(&self) -> BusResult<()> {
        self.inner.abort_reconnect();

        let _lifecycle = self.inner.lifecycle.lock().await;
        self.inner.set_state(ConnectionState::Reconnecting);
        self.inner.teardown(&BusError::disconnected("reconnect"));
        self.inner.attempts.store(0, Ordering::SeqCst);

        match self.inner.establish().await {
            Ok(()) => Ok(()),
            Err(err) => {
                self.inner.record_failure(&err);
                self.inner.schedule_reconnect();
                Err(err)
            }
        }
    }

    /// Завершает работу клиента: отключается и снимает все подписки.
    pub async fn shutdown(&self) {
        self.disconnect("client shutdown").await;
        let channels = self.inner.registry.clear();
        debug!(channels = channels.len(), "subscriptions cleared on shutdown");
    }

    ////////////////////////////////////////////////////////////////////////////
    // Подписки
    ////////////////////////////////////////////////////////////////////////////

    /// Подписывает обработчик на канал.
    ///
    /// Без предиката обработчик получает все сообщения канала.
    pub fn subscribe<F>(
        &self,
        channel: impl Into<ChannelId>,
        handler: F,
        predicate: Option<Predicate>,
    ) -> SubscriptionId
    where
        F: Fn(&Message) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let channel = channel.into();
        let registration = self.inner.registry.subscribe(
            Scope::Channel(channel.clone()),
            Arc::new(handler),
            predicate,
        );
        if registration.first_on_channel {
            self.inner.join_channel(&channel);
        }
        debug!(subscription = %registration.id, channel = %channel, "subscribed");
        registration.id
    }

    /// Как [`subscribe`](Self::subscribe), но возвращает RAII-хэндл.
    pub fn subscribe_guard<F>(
        &self,
        channel: impl Into<ChannelId>,
        handler: F,
        predicate: Option<Predicate>,
    ) -> SubscriptionGuard
    where
        F: Fn(&Message) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = self.subscribe(channel, handler, predicate);
        self.guard(id)
    }

    /// Снимает подписку. Повторный вызов и неизвестный id дают `false`.
    pub fn unsubscribe(
        &self,
        id: SubscriptionId,
    ) -> bool {
        self.inner.unsubscribe(id)
    }

    /// Слушает сообщения одного типа на всех каналах, включая локальные
    /// события `CONNECT` и `DISCONNECT`.
    pub fn on<F>(
        &self,
        kind: MessageType,
        handler: F,
    ) -> SubscriptionGuard
    where
        F: Fn(&Message) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let predicate: Predicate = Arc::new(move |msg: &Message| msg.kind() == kind);
        let registration =
            self.inner
                .registry
                .subscribe(Scope::AllChannels, Arc::new(handler), Some(predicate));
        debug!(subscription = %registration.id, kind = %kind, "listening for message type");
        self.guard(registration.id)
    }

    /// Вводит сообщение так, будто оно пришло из транспорта.
    pub fn publish_local(
        &self,
        msg: Message,
    ) {
        self.inner.handle_inbound(msg);
    }

    ////////////////////////////////////////////////////////////////////////////
    // Отправка
    ////////////////////////////////////////////////////////////////////////////

    /// Отправляет сообщение.
    ///
    /// Без `await_ack` завершается сразу после передачи транспорту. С
    /// `await_ack` ждёт входящее сообщение с тем же correlation id до
    /// дедлайна. Отмена future снимает ожидание.
    pub async fn send(
        &self,
        payload: impl Into<Payload>,
        options: SendOptions,
    ) -> BusResult<Delivery> {
        let channel = options
            .channel
            .unwrap_or_else(|| self.inner.config.default_channel.clone());
        let mut msg = Message::new(payload).on_channel(channel);

        if !options.await_ack {
            self.inner.transmit(msg)?;
            return Ok(Delivery::Sent);
        }

        let correlation_id = Uuid::new_v4().to_string();
        let timeout = options.timeout.unwrap_or(self.inner.config.ack_timeout);
        let pending = self
            .inner
            .pending
            .register(correlation_id.clone(), Instant::now() + timeout)?;
        msg.correlation_id = Some(correlation_id);
        let kind = msg.kind();

        self.inner.transmit(msg)?;
        trace!(correlation_id = pending.correlation_id(), kind = %kind, "awaiting acknowledgment");

        match pending.wait().await {
            Ok(ack) => {
                ClientStats::incr(&self.inner.stats.acks_received);
                Ok(Delivery::Acknowledged(ack))
            }
            Err(err) => {
                if err.is_timeout() {
                    ClientStats::incr(&self.inner.stats.ack_timeouts);
                    debug!(error = %err, "acknowledgment timed out");
                }
                Err(err)
            }
        }
    }

    /// Отменяет ожидание подтверждения: запрос отклоняется с `Cancelled`.
    pub fn cancel(
        &self,
        correlation_id: &str,
    ) -> bool {
        self.inner.pending.reject(correlation_id, BusError::Cancelled)
    }

    /// Измеряет задержку до сервиса: PING с ожиданием PONG.
    pub async fn ping(&self) -> BusResult<Duration> {
        let started = Instant::now();
        let payload = Payload::Ping(Heartbeat {
            sent_at: now_millis(),
        });
        let ack = self
            .send(payload, SendOptions::acknowledged())
            .await?
            .into_ack()
            .ok_or_else(|| BusError::codec("ping resolved without acknowledgment"))?;

        if ack.kind() != MessageType::Pong {
            return Err(BusError::UnexpectedAck {
                expected: MessageType::Pong.to_string(),
                actual: ack.kind().to_string(),
            });
        }
        let rtt = started.elapsed();
        self.inner.stats.record_latency(rtt);
        debug!(rtt_ms = rtt.as_millis() as u64, "ping acknowledged");
        Ok(rtt)
    }

    /// Запрашивает таблицу лидеров и ждёт ответный `LEADERBOARD_UPDATE`.
    pub async fn request_leaderboard(
        &self,
        channel: impl Into<ChannelId>,
        limit: Option<u32>,
    ) -> BusResult<LeaderboardUpdate> {
        let request = RequestLeaderboard { limit, scope: None };
        let ack = self
            .send(request, SendOptions::to(channel).await_ack())
            .await?
            .into_ack()
            .ok_or_else(|| BusError::codec("leaderboard request resolved without acknowledgment"))?;

        match ack.payload {
            Payload::LeaderboardUpdate(update) => Ok(update),
            other => Err(BusError::UnexpectedAck {
                expected: MessageType::LeaderboardUpdate.to_string(),
                actual: other.kind().to_string(),
            }),
        }
    }

    fn guard(
        &self,
        id: SubscriptionId,
    ) -> SubscriptionGuard {
        let weak = Arc::downgrade(&self.inner);
        SubscriptionGuard::new(id, move |id| {
            if let Some(inner) = weak.upgrade() {
                inner.unsubscribe(id);
            }
        })
    }
}

impl Inner {
    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn set_state(
        &self,
        next: ConnectionState,
    ) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(from = %previous, to = %next, "connection state changed");
        }
    }

    /// Рукопожатие и установка связи. Вызывается под блокировкой
    /// жизненного цикла.
    async fn establish(self: &Arc<Self>) -> BusResult<()> {
        self.set_state(ConnectionState::Connecting);

        let connect = tokio::time::timeout(self.config.connect_timeout, self.transport.connect());
        let Link {
            socket_id,
            sink,
            events,
        } = match connect.await {
            Ok(Ok(link)) => link,
            Ok(Err(err @ BusError::Connection { .. })) => return Err(err),
            Ok(Err(err)) => return Err(BusError::connection(err.to_string())),
            Err(_) => {
                return Err(BusError::connection(format!(
                    "handshake timed out after {}ms",
                    self.config.connect_timeout.as_millis()
                )))
            }
        };
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        {
            let mut slot = self.link.lock();
            let mut channels = self.registry.channels();
            if !channels.contains(&self.config.default_channel) {
                channels.push(self.config.default_channel.clone());
            }
            for channel in channels {
                if let Err(err) = sink.send(Frame::Subscribe(channel.clone())) {
                    let _ = sink.send(Frame::Close);
                    return Err(BusError::connection(format!(
                        "failed to join channel {channel}: {err}"
                    )));
                }
            }

            let task = tokio::spawn(pump(Arc::downgrade(self), events, generation));
            let active = ActiveLink::new(sink, generation, task);
            self.flush_queue(&active);
            *slot = Some(active);
        }

        self.attempts.store(0, Ordering::SeqCst);
        *self.last_error.lock() = None;
        self.set_state(ConnectionState::Connected);
        ClientStats::incr(&self.stats.connects);
        info!(
            transport = self.transport.name(),
            socket_id = socket_id.as_deref().unwrap_or("-"),
            "bus client connected"
        );

        self.dispatch_local(Message::new(Payload::Connect(ConnectInfo { socket_id })));
        Ok(())
    }

    /// Закрывает связь, отклоняет ожидающих и сбрасывает очередь.
    fn teardown(
        &self,
        reason: &BusError,
    ) {
        let link = self.link.lock().take();
        if let Some(link) = link {
            link.close();
        }
        self.pending.reject_all(reason);

        let dropped = {
            let mut queue = self.queue.lock();
            let n = queue.len();
            queue.clear();
            n
        };
        if dropped > 0 {
            debug!(dropped, "offline queue dropped");
        }
    }

    fn record_failure(
        &self,
        err: &BusError,
    ) {
        ClientStats::incr(&self.stats.connect_failures);
        warn!(error = %err, "bus connection attempt failed");
        *self.last_error.lock() = Some(err.clone());
        self.set_state(ConnectionState::Error);
    }

    fn schedule_reconnect(self: &Arc<Self>) {
        if self.config.backoff.exhausted(1) {
            debug!("background reconnect is disabled");
            return;
        }
        let task = tokio::spawn(reconnect_loop(Arc::downgrade(self)));
        if let Some(previous) = self.reconnect_task.lock().replace(task) {
            previous.abort();
        }
    }

    fn abort_reconnect(&self) {
        if let Some(task) = self.reconnect_task.lock().take() {
            task.abort();
        }
    }

    /// Обрыв связи со стороны транспорта.
    pub(crate) async fn on_link_lost(
        self: &Arc<Self>,
        generation: u64,
        reason: String,
    ) {
        let _lifecycle = self.lifecycle.lock().await;
        {
            let mut slot = self.link.lock();
            if slot.as_ref().map(ActiveLink::generation) != Some(generation) {
                trace!(generation, "stale link loss ignored");
                return;
            }
            slot.take();
        }

        warn!(reason = %reason, "bus connection lost");
        let err = BusError::connection_lost(reason);
        self.pending.reject_all(&err);
        *self.last_error.lock() = Some(err);
        self.attempts.store(0, Ordering::SeqCst);
        if self.config.backoff.exhausted(1) {
            self.set_state(ConnectionState::Error);
            return;
        }
        self.set_state(ConnectionState::Reconnecting);
        self.schedule_reconnect();
    }

    /// Передаёт сообщение транспорту или ставит в офлайн-очередь.
    fn transmit(
        &self,
        msg: Message,
    ) -> BusResult<()> {
        let slot = self.link.lock();
        if let Some(link) = slot.as_ref() {
            link.send(Frame::Publish(msg)).map_err(|err| match err {
                BusError::SendFailed { .. } => err,
                other => BusError::send_failed(other.to_string()),
            })?;
            ClientStats::incr(&self.stats.messages_sent);
            return Ok(());
        }

        match self.config.offline {
            OfflinePolicy::Reject => Err(BusError::NotConnected),
            OfflinePolicy::Queue { max } => {
                let mut queue = self.queue.lock();
                if queue.len() >= max {
                    return Err(BusError::QueueFull { capacity: max });
                }
                queue.push_back(msg);
                ClientStats::incr(&self.stats.messages_queued);
                Ok(())
            }
        }
    }

    /// Отправляет накопленные без соединения сообщения.
    fn flush_queue(
        &self,
        link: &ActiveLink,
    ) {
        let queued: Vec<Message> = self.queue.lock().drain(..).collect();
        if queued.is_empty() {
            return;
        }
        debug!(count = queued.len(), "flushing offline queue");

        for msg in queued {
            let correlation_id = msg.correlation_id.clone();
            match link.send(Frame::Publish(msg)) {
                Ok(()) => ClientStats::incr(&self.stats.messages_sent),
                Err(err) => {
                    warn!(error = %err, "failed to flush queued message");
                    if let Some(id) = correlation_id {
                        self.pending.reject(&id, BusError::send_failed(err.to_string()));
                    }
                }
            }
        }
    }

    /// Обработка входящего сообщения: heartbeat, подтверждения, рассылка.
    pub(crate) fn handle_inbound(
        &self,
        msg: Message,
    ) {
        ClientStats::incr(&self.stats.messages_received);

        if self.config.auto_pong {
            if let (Payload::Ping(heartbeat), Some(_)) = (&msg.payload, &msg.correlation_id) {
                let pong = msg.reply(Payload::Pong(*heartbeat));
                if let Some(link) = self.link.lock().as_ref() {
                    match link.send(Frame::Publish(pong)) {
                        Ok(()) => ClientStats::incr(&self.stats.messages_sent),
                        Err(err) => debug!(error = %err, "failed to answer ping"),
                    }
                }
            }
        }

        if let Some(correlation_id) = msg.correlation_id.as_deref() {
            match self.pending.resolve(correlation_id, msg.clone()) {
                AckMatch::Resolved => trace!(correlation_id, "acknowledgment matched"),
                AckMatch::Late => {
                    ClientStats::incr(&self.stats.late_acks);
                    debug!(correlation_id, "late acknowledgment ignored");
                }
                AckMatch::Unmatched => {}
            }
        }

        self.dispatch_local(msg);
    }

    fn dispatch_local(
        &self,
        msg: Message,
    ) {
        let report = self.registry.dispatch(&msg);
        self.stats.record_dispatch(&report);
    }

    fn unsubscribe(
        &self,
        id: SubscriptionId,
    ) -> bool {
        let Some(removal) = self.registry.unsubscribe(id) else {
            return false;
        };
        if let (Some(channel), true) = (&removal.channel, removal.last_on_channel) {
            self.leave_channel(channel);
        }
        debug!(subscription = %id, "unsubscribed");
        true
    }

    fn join_channel(
        &self,
        channel: &ChannelId,
    ) {
        if *channel == self.config.default_channel {
            return;
        }
        if let Some(link) = self.link.lock().as_ref() {
            if let Err(err) = link.send(Frame::Subscribe(channel.clone())) {
                warn!(channel = %channel, error = %err, "failed to join channel");
            }
        }
    }

    fn leave_channel(
        &self,
        channel: &ChannelId,
    ) {
        if *channel == self.config.default_channel {
            return;
        }
        if let Some(link) = self.link.lock().as_ref() {
            if let Err(err) = link.send(Frame::Unsubscribe(channel.clone())) {
                debug!(channel = %channel, error = %err, "failed to leave channel");
            }
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(task) = self.reconnect_task.get_mut().take() {
            task.abort();
        }
        if let Some(link) = self.link.get_mut().take() {
            link.close();
        }
    }
}

/// Фоновое переподключение по политике backoff.
///
/// Каждая итерация: под блокировкой жизненного цикла увеличивает номер
/// попытки и переводит клиент в `Reconnecting`, ждёт задержку, затем снова
/// под блокировкой пробует подключиться. Исчерпав лимит, оставляет клиент
/// в `Error` с `ReconnectExhausted`.
async fn reconnect_loop(inner: Weak<Inner>) {
    loop {
        let delay = {
            let Some(client) = inner.upgrade() else {
                return;
            };
            let _lifecycle = client.lifecycle.lock().await;
            if !matches!(
                client.state(),
                ConnectionState::Error | ConnectionState::Reconnecting
            ) {
                return;
            }

            let attempt = client.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if client.config.backoff.exhausted(attempt) {
                let attempts = attempt - 1;
                warn!(attempts, "bus reconnect attempts exhausted");
                *client.last_error.lock() = Some(BusError::ReconnectExhausted { attempts });
                client.set_state(ConnectionState::Error);
                return;
            }

            ClientStats::incr(&client.stats.reconnect_attempts);
            client.set_state(ConnectionState::Reconnecting);
            let delay = client.config.backoff.delay(attempt);
            debug!(attempt, delay_ms = delay.as_millis() as u64, "reconnect scheduled");
            delay
        };

        tokio::time::sleep(delay).await;

        let Some(client) = inner.upgrade() else {
            return;
        };
        let _lifecycle = client.lifecycle.lock().await;
        if client.state() != ConnectionState::Reconnecting {
            return;
        }
        match client.establish().await {
            Ok(()) => return,
            Err(err) => client.record_failure(&err),
        }
    }
}
