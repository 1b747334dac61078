use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use tracing_appender::non_blocking::WorkerGuard;

/// Хэндл жизненного цикла логирования, возвращается из `init_logging`.
///
/// Владеет `WorkerGuard` файлового слоя. Буфер файла гарантированно
/// сбрасывается только при `shutdown()`; drop без shutdown предупреждает в
/// stderr.
pub struct LoggingHandle {
    file_guard: Option<WorkerGuard>,
    flushes: Arc<AtomicU64>,
    closing: Arc<AtomicBool>,
    flush_timeout: Duration,
}

/// Снимок состояния логирования.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoggingStats {
    pub flush_count: u64,
    pub shutdown_in_progress: bool,
    pub file_enabled: bool,
}

impl LoggingHandle {
    pub fn new(file_guard: Option<WorkerGuard>) -> Self {
        Self {
            file_guard,
            flushes: Arc::new(AtomicU64::new(0)),
            closing: Arc::new(AtomicBool::new(false)),
            flush_timeout: Duration::from_secs(5),
        }
    }

    /// Порог, после которого медленный shutdown отмечается в stderr.
    pub fn with_flush_timeout(
        mut self,
        timeout: Duration,
    ) -> Self {
        self.flush_timeout = timeout;
        self
    }

    pub fn has_file_sink(&self) -> bool {
        self.file_guard.is_some()
    }

    /// Отмечает запрос flush. Неблокирующий writer пишет в фоне сам.
    pub fn flush(&self) {
        let n = self.flushes.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(flush_count = n, "log flush requested");
    }

    /// Останавливает файловый writer, дожидаясь записи буфера.
    pub fn shutdown(mut self) {
        self.closing.store(true, Ordering::Release);
        tracing::info!(file_enabled = self.has_file_sink(), "logging shutdown");

        let started = Instant::now();
        drop(self.file_guard.take());
        if started.elapsed() > self.flush_timeout {
            eprintln!(
                "edubus: log flush took {}ms (limit {}ms)",
                started.elapsed().as_millis(),
                self.flush_timeout.as_millis()
            );
        }
    }

    /// То же, что [`shutdown`](Self::shutdown), но не блокирует рантайм и
    /// ограничено по времени.
    pub async fn shutdown_async(
        mut self,
        timeout: Duration,
    ) {
        self.closing.store(true, Ordering::Release);
        let guard = self.file_guard.take();
        let flush = tokio::task::spawn_blocking(move || drop(guard));

        match tokio::time::timeout(timeout, flush).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => eprintln!("edubus: log flush task failed: {e}"),
            Err(_) => eprintln!("edubus: log flush exceeded {}ms", timeout.as_millis()),
        }
    }

    pub fn stats(&self) -> LoggingStats {
        LoggingStats {
            flush_count: self.flushes.load(Ordering::Relaxed),
            shutdown_in_progress: self.closing.load(Ordering::Acquire),
            file_enabled: self.has_file_sink(),
        }
    }
}

impl Drop for LoggingHandle {
    fn drop(&mut self) {
        if self.file_guard.is_some() && !self.closing.load(Ordering::Acquire) {
            eprintln!("edubus: LoggingHandle dropped without shutdown(), file logs may be truncated");
        }
    }
}
