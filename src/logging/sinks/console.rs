//! Возвращаем boxed trait-объект, согласованно с build_formatter_from_config.
use tracing_subscriber::layer::Layer as LayerTrait;
use tracing_subscriber::registry::LookupSpan;

use crate::logging::{config::LoggingConfig, formatter};

/// Консольный слой по конфигурации.
pub fn layer_with_config<S>(config: &LoggingConfig) -> Box<dyn LayerTrait<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a> + 'static,
{
    formatter::build_formatter_from_config(&config.console)
}

#[cfg(test)]
mod tests {
    use tracing::info;
    use tracing_subscriber::{prelude::*, registry::Registry};

    use super::*;
    use crate::logging::config::{ConsoleConfig, LogFormat};

    /// Тест проверяет, что слой можно зарегистрировать и логирование не
    /// приводит к панике при разных комбинациях формата и ANSI.
    #[test]
    fn test_layer_with_config_various_flags() {
        for format in [LogFormat::Json, LogFormat::Pretty, LogFormat::Compact] {
            for with_ansi in [true, false] {
                let cfg = LoggingConfig {
                    console: ConsoleConfig {
                        format,
                        with_ansi,
                        ..Default::default()
                    },
                    ..Default::default()
                };
                let subscriber = Registry::default().with(layer_with_config::<Registry>(&cfg));
                tracing::subscriber::with_default(subscriber, || {
                    info!(%format, with_ansi, "console layer smoke test");
                });
            }
        }
    }
}
