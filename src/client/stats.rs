use std::{
    collections::VecDeque,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use parking_lot::Mutex;
use serde::Serialize;

use crate::pubsub::DispatchReport;

/// Потокобезопасная статистика клиента шины.
///
/// Чисто наблюдательная: на управление соединением не влияет.
#[derive(Debug)]
pub struct ClientStats {
    /// Сообщений отправлено в транспорт
    pub messages_sent: AtomicU64,
    /// Сообщений получено из транспорта или введено локально
    pub messages_received: AtomicU64,
    /// Сообщений поставлено в офлайн-очередь
    pub messages_queued: AtomicU64,
    /// Вызовов обработчиков
    pub handler_invocations: AtomicU64,
    /// Сообщений, отсеянных предикатами
    pub filtered: AtomicU64,
    /// Ошибок и паник обработчиков
    pub handler_failures: AtomicU64,
    /// Успешных подключений
    pub connects: AtomicU64,
    /// Неудачных попыток подключения
    pub connect_failures: AtomicU64,
    /// Фоновых попыток переподключения
    pub reconnect_attempts: AtomicU64,
    /// Подтверждений, дошедших до ожидающего
    pub acks_received: AtomicU64,
    pub ack_timeouts: AtomicU64,
    /// Подтверждений, пришедших после таймаута или отмены
    pub late_acks: AtomicU64,
    latency: Mutex<LatencyWindow>,
}

/// Скользящее окно последних замеров задержки.
#[derive(Debug)]
struct LatencyWindow {
    samples: VecDeque<Duration>,
    capacity: usize,
}

/// Снимок статистики для логов и диагностики.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub messages_queued: u64,
    pub handler_invocations: u64,
    pub filtered: u64,
    pub handler_failures: u64,
    pub connects: u64,
    pub connect_failures: u64,
    pub reconnect_attempts: u64,
    pub acks_received: u64,
    pub ack_timeouts: u64,
    pub late_acks: u64,
    pub latency_samples: usize,
    pub last_latency_ms: Option<f64>,
    pub avg_latency_ms: Option<f64>,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl ClientStats {
    pub fn new(latency_window: usize) -> Self {
        Self {
            messages_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            messages_queued: AtomicU64::new(0),
            handler_invocations: AtomicU64::new(0),
            filtered: AtomicU64::new(0),
            handler_failures: AtomicU64::new(0),
            connects: AtomicU64::new(0),
            connect_failures: AtomicU64::new(0),
            reconnect_attempts: AtomicU64::new(0),
            acks_received: AtomicU64::new(0),
            ack_timeouts: AtomicU64::new(0),
            late_acks: AtomicU64::new(0),
            latency: Mutex::new(LatencyWindow {
                samples: VecDeque::with_capacity(latency_window),
                capacity: latency_window.max(1),
            }),
        }
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Учитывает итог рассылки одного сообщения.
    pub fn record_dispatch(
        &self,
        report: &DispatchReport,
    ) {
        self.handler_invocations
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.filtered
            .fetch_add(report.filtered as u64, Ordering::Relaxed);
        self.handler_failures
            .fetch_add(report.failed as u64, Ordering::Relaxed);
    }

    /// Добавляет замер задержки, вытесняя самый старый при переполнении.
    pub fn record_latency(
        &self,
        sample: Duration,
    ) {
        let mut window = self.latency.lock();
        if window.samples.len() == window.capacity {
            window.samples.pop_front();
        }
        window.samples.push_back(sample);
    }

    pub fn last_latency(&self) -> Option<Duration> {
        self.latency.lock().samples.back().copied()
    }

    pub fn average_latency(&self) -> Option<Duration> {
        let window = self.latency.lock();
        let n = window.samples.len() as u32;
        if n == 0 {
            return None;
        }
        Some(window.samples.iter().sum::<Duration>() / n)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        let latency_samples = self.latency.lock().samples.len();
        StatsSnapshot {
            messages_sent: load(&self.messages_sent),
            messages_received: load(&self.messages_received),
            messages_queued: load(&self.messages_queued),
            handler_invocations: load(&self.handler_invocations),
            filtered: load(&self.filtered),
            handler_failures: load(&self.handler_failures),
            connects: load(&self.connects),
            connect_failures: load(&self.connect_failures),
            reconnect_attempts: load(&self.reconnect_attempts),
            acks_received: load(&self.acks_received),
            ack_timeouts: load(&self.ack_timeouts),
            late_acks: load(&self.late_acks),
            latency_samples,
            last_latency_ms: self.last_latency().map(as_millis_f64),
            avg_latency_ms: self.average_latency().map(as_millis_f64),
        }
    }
}

impl Default for ClientStats {
    fn default() -> Self {
        Self::new(32)
    }
}

fn as_millis_f64(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}
