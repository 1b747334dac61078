use tracing_appender::{
    non_blocking,
    non_blocking::WorkerGuard,
    rolling::{RollingFileAppender, Rotation},
};
use tracing_subscriber::{layer::Layer as LayerTrait, registry::LookupSpan};

use crate::logging::{
    config::{ConsoleConfig, LogFormat, LoggingConfig, RotationPeriod},
    formatter,
};

/// Файловый слой с ротацией и неблокирующей записью.
///
/// В файл всегда пишется json без ANSI. `WorkerGuard` нужно держать до
/// завершения работы: при его drop буфер сбрасывается на диск.
pub fn layer_with_config<S>(
    config: &LoggingConfig
) -> (Box<dyn LayerTrait<S> + Send + Sync>, WorkerGuard)
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a> + 'static,
{
    let appender = RollingFileAppender::new(
        rotation(config.file.rotation),
        &config.file.dir,
        &config.file.prefix,
    );
    let (writer, guard) = non_blocking(appender);

    let file_fmt = ConsoleConfig {
        enabled: true,
        format: LogFormat::Json,
        with_ansi: false,
        with_target: true,
        with_thread_ids: config.console.with_thread_ids,
        with_line_numbers: config.console.with_line_numbers,
    };
    (formatter::build_with_writer(&file_fmt, writer), guard)
}

fn rotation(period: RotationPeriod) -> Rotation {
    match period {
        RotationPeriod::Minutely => Rotation::MINUTELY,
        RotationPeriod::Hourly => Rotation::HOURLY,
        RotationPeriod::Daily => Rotation::DAILY,
        RotationPeriod::Never => Rotation::NEVER,
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tracing_subscriber::{prelude::*, registry::Registry};

    use super::*;

    /// Тест проверяет, что записи попадают в файл после drop guard-а.
    #[test]
    fn test_file_layer_writes_json() {
        let tmp = tempfile::tempdir().unwrap();
        let mut cfg = LoggingConfig::default();
        cfg.file.enabled = true;
        cfg.file.dir = tmp.path().to_path_buf();
        cfg.file.rotation = RotationPeriod::Never;

        let (layer, guard) = layer_with_config::<Registry>(&cfg);
        let subscriber = Registry::default().with(layer);
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(attempt = 3, "reconnect scheduled");
        });
        drop(guard);

        let contents = fs::read_to_string(tmp.path().join("edubus.log")).unwrap();
        assert!(contents.contains("reconnect scheduled"));
        assert!(contents.contains("\"attempt\":3"));
    }
}
