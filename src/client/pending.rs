use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};

use edubus_error::{BusError, BusResult};
use parking_lot::Mutex;
use tokio::{sync::oneshot, time::Instant};
use tracing::debug;

use crate::protocol::Message;

type Resolution = BusResult<Message>;

/// Сколько снятых correlation id помнить для распознавания поздних
/// подтверждений.
const RETIRED_CAPACITY: usize = 256;

/// Ожидающие подтверждения запросы, по одному на correlation id.
///
/// Разрешение и отклонение выполняются под блокировкой карты: запись
/// удаляется и результат отправляется атомарно, поэтому у каждого запроса
/// срабатывает ровно один путь.
#[derive(Default)]
pub struct PendingRequests {
    state: Mutex<PendingState>,
}

#[derive(Default)]
struct PendingState {
    entries: HashMap<String, PendingEntry>,
    /// Недавно снятые без подтверждения (таймаут, отмена, отключение)
    retired: VecDeque<String>,
}

/// Итог сопоставления входящего сообщения с ожидающими запросами.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMatch {
    /// Запрос разрешён этим сообщением
    Resolved,
    /// Запрос уже снят таймаутом, отменой или отключением
    Late,
    /// Correlation id не принадлежит этому клиенту
    Unmatched,
}

struct PendingEntry {
    tx: oneshot::Sender<Resolution>,
    deadline: Instant,
}

/// Ожидание подтверждения одного запроса.
///
/// Drop до завершения снимает запись из карты ожидающих.
pub struct PendingAck {
    correlation_id: String,
    deadline: Instant,
    started: Instant,
    rx: oneshot::Receiver<Resolution>,
    requests: Arc<PendingRequests>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Регистрирует ожидание подтверждения с дедлайном.
    pub fn register(
        self: &Arc<Self>,
        correlation_id: impl Into<String>,
        deadline: Instant,
    ) -> BusResult<PendingAck> {
        let correlation_id = correlation_id.into();
        let (tx, rx) = oneshot::channel();

        let mut state = self.state.lock();
        if state.entries.contains_key(&correlation_id) {
            return Err(BusError::DuplicateCorrelation { correlation_id });
        }
        state
            .entries
            .insert(correlation_id.clone(), PendingEntry { tx, deadline });
        drop(state);

        Ok(PendingAck {
            correlation_id,
            deadline,
            started: Instant::now(),
            rx,
            requests: self.clone(),
        })
    }

    /// Разрешает запрос подтверждением.
    pub fn resolve(
        &self,
        correlation_id: &str,
        ack: Message,
    ) -> AckMatch {
        let mut state = self.state.lock();
        match state.entries.remove(correlation_id) {
            Some(entry) => {
                let _ = entry.tx.send(Ok(ack));
                AckMatch::Resolved
            }
            None if state.retired.iter().any(|id| id == correlation_id) => AckMatch::Late,
            None => AckMatch::Unmatched,
        }
    }

    /// Отклоняет запрос ошибкой. `false`, если запроса уже нет.
    pub fn reject(
        &self,
        correlation_id: &str,
        err: BusError,
    ) -> bool {
        self.settle(correlation_id, Err(err))
    }

    /// Отклоняет все ожидающие запросы. Возвращает их количество.
    pub fn reject_all(
        &self,
        err: &BusError,
    ) -> usize {
        let mut state = self.state.lock();
        let drained: Vec<(String, PendingEntry)> = state.entries.drain().collect();
        let count = drained.len();
        for (id, entry) in drained {
            let _ = entry.tx.send(Err(err.clone()));
            state.retire(id);
        }
        if count > 0 {
            debug!(count, error = %err, "rejected pending requests");
        }
        count
    }

    pub fn contains(
        &self,
        correlation_id: &str,
    ) -> bool {
        self.state.lock().entries.contains_key(correlation_id)
    }

    /// Дедлайн ожидающего запроса.
    pub fn deadline_of(
        &self,
        correlation_id: &str,
    ) -> Option<Instant> {
        self.state
            .lock()
            .entries
            .get(correlation_id)
            .map(|e| e.deadline)
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    fn settle(
        &self,
        correlation_id: &str,
        outcome: Resolution,
    ) -> bool {
        let mut state = self.state.lock();
        match state.entries.remove(correlation_id) {
            Some(entry) => {
                let _ = entry.tx.send(outcome);
                state.retire(correlation_id.to_string());
                true
            }
            None => false,
        }
    }

    /// Снимает запись без результата (таймаут или drop ожидания).
    fn remove(
        &self,
        correlation_id: &str,
    ) -> bool {
        let mut state = self.state.lock();
        let removed = state.entries.remove(correlation_id).is_some();
        if removed {
            state.retire(correlation_id.to_string());
        }
        removed
    }
}

impl PendingState {
    fn retire(
        &mut self,
        correlation_id: String,
    ) {
        if self.retired.len() == RETIRED_CAPACITY {
            self.retired.pop_front();
        }
        self.retired.push_back(correlation_id);
    }
}

impl PendingAck {
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Время с момента регистрации.
    pub fn elapsed(&self) -> std::time::Duration {
        self.started.elapsed()
    }

    /// Ждёт подтверждения до дедлайна.
    ///
    /// Если дедлайн и подтверждение сошлись одновременно, побеждает тот,
    /// кто первым снял запись из карты.
    pub async fn wait(mut self) -> BusResult<Message> {
        match tokio::time::timeout_at(self.deadline, &mut self.rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(BusError::Cancelled),
            Err(_) => {
                if self.requests.remove(&self.correlation_id) {
                    return Err(self.timeout_error());
                }
                // Запись уже снята разрешающей стороной: результат в канале.
                match self.rx.try_recv() {
                    Ok(outcome) => outcome,
                    Err(_) => Err(self.timeout_error()),
                }
            }
        }
    }

    fn timeout_error(&self) -> BusError {
        BusError::Timeout {
            correlation_id: self.correlation_id.clone(),
            after_ms: self
                .deadline
                .saturating_duration_since(self.started)
                .as_millis() as u64,
        }
    }
}

impl Drop for PendingAck {
    fn drop(&mut self) {
        self.requests.remove(&self.correlation_id);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::protocol::{Heartbeat, Payload};

    fn pong() -> Message {
        Message::new(Payload::Pong(Heartbeat { sent_at: 1 })).with_correlation_id("c-1")
    }

    /// Тест проверяет разрешение подтверждением до дедлайна.
    #[tokio::test(start_paused = true)]
    async fn test_resolve_before_deadline() {
        let requests = Arc::new(PendingRequests::new());
        let ack = requests
            .register("c-1", Instant::now() + Duration::from_millis(50))
            .unwrap();
        assert!(requests.contains("c-1"));

        assert_eq!(requests.resolve("c-1", pong()), AckMatch::Resolved);
        assert_eq!(
            requests.resolve("c-1", pong()),
            AckMatch::Unmatched,
            "повторное подтверждение игнорируется"
        );
        assert_eq!(ack.wait().await.unwrap(), pong());
        assert!(requests.is_empty());
    }

    /// Тест проверяет таймаут и снятие записи.
    #[tokio::test(start_paused = true)]
    async fn test_timeout_removes_entry() {
        let requests = Arc::new(PendingRequests::new());
        let start = Instant::now();
        let ack = requests
            .register("c-2", start + Duration::from_millis(50))
            .unwrap();

        match ack.wait().await {
            Err(BusError::Timeout { correlation_id, after_ms }) => {
                assert_eq!(correlation_id, "c-2");
                assert_eq!(after_ms, 50);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert!(!requests.contains("c-2"));
        assert_eq!(
            requests.resolve("c-2", pong()),
            AckMatch::Late,
            "позднее подтверждение — no-op"
        );
        assert_eq!(requests.resolve("other", pong()), AckMatch::Unmatched);
    }

    /// Тест проверяет, что запрос, разрешённый ровно на дедлайне, всё равно
    /// получает подтверждение.
    #[tokio::test(start_paused = true)]
    async fn test_ack_wins_when_settled_before_timer_check() {
        let requests = Arc::new(PendingRequests::new());
        let deadline = Instant::now() + Duration::from_millis(10);
        let ack = requests.register("c-1", deadline).unwrap();

        requests.resolve("c-1", pong());
        tokio::time::advance(Duration::from_millis(20)).await;
        assert!(ack.wait().await.is_ok());
    }

    /// Тест проверяет дубликаты, отмену и массовое отклонение.
    #[tokio::test(start_paused = true)]
    async fn test_duplicate_cancel_and_reject_all() {
        let requests = Arc::new(PendingRequests::new());
        let deadline = Instant::now() + Duration::from_secs(5);

        let first = requests.register("dup", deadline).unwrap();
        assert!(matches!(
            requests.register("dup", deadline),
            Err(BusError::DuplicateCorrelation { .. })
        ));
        assert!(requests.reject("dup", BusError::Cancelled));
        assert_eq!(first.wait().await, Err(BusError::Cancelled));

        let a = requests.register("a", deadline).unwrap();
        let b = requests.register("b", deadline).unwrap();
        assert_eq!(requests.reject_all(&BusError::disconnected("logout")), 2);
        assert_eq!(a.wait().await, Err(BusError::disconnected("logout")));
        assert_eq!(b.wait().await, Err(BusError::disconnected("logout")));
        assert!(requests.is_empty());
    }

    /// Тест проверяет, что drop ожидания снимает запись.
    #[tokio::test]
    async fn test_drop_removes_entry() {
        let requests = Arc::new(PendingRequests::new());
        let ack = requests
            .register("gone", Instant::now() + Duration::from_secs(1))
            .unwrap();
        assert_eq!(requests.len(), 1);
        drop(ack);
        assert!(requests.is_empty());
    }
}
