use std::io::{self, Stdout};

use tracing_subscriber::{
    fmt::{self, format::FmtSpan, MakeWriter},
    layer::Layer as LayerTrait,
    registry::LookupSpan,
};

use crate::logging::config::{ConsoleConfig, LogFormat};

/// Консольный слой по конфигурации.
///
/// Возвращаем boxed trait-объект, чтобы стереть конкретный тип формата
/// (json/pretty/compact).
pub fn build_formatter_from_config<S>(
    console: &ConsoleConfig
) -> Box<dyn LayerTrait<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a> + 'static,
{
    let writer: fn() -> Stdout = io::stdout;
    build_with_writer(console, writer)
}

/// То же, но с произвольным writer (используется файловым слоем и тестами).
pub fn build_with_writer<S, W>(
    console: &ConsoleConfig,
    writer: W,
) -> Box<dyn LayerTrait<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a> + 'static,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(console.with_ansi)
        .with_target(console.with_target)
        .with_thread_ids(console.with_thread_ids)
        .with_line_number(console.with_line_numbers);

    match console.format {
        LogFormat::Json => Box::new(layer.json().with_current_span(true)),
        LogFormat::Pretty => Box::new(layer.pretty().with_span_events(FmtSpan::CLOSE)),
        LogFormat::Compact => Box::new(layer.compact()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use tracing_subscriber::{prelude::*, registry::Registry};

    use super::*;

    #[derive(Clone)]
    struct Buf(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Buf {
        fn write(
            &mut self,
            buf: &[u8],
        ) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Тест проверяет, что json-формат выдаёт по объекту на строку.
    #[test]
    fn test_json_format_emits_objects() {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let sink = Buf(buffer.clone());
        let console = ConsoleConfig {
            format: LogFormat::Json,
            with_ansi: false,
            ..Default::default()
        };
        let layer = build_with_writer::<Registry, _>(&console, move || sink.clone());
        let subscriber = Registry::default().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(channel = "public", "subscribed");
        });

        let out = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
        let line = out.lines().next().unwrap();
        let value: serde_json::Value = serde_json::from_str(line).unwrap();
        assert_eq!(value["fields"]["message"], "subscribed");
        assert_eq!(value["fields"]["channel"], "public");
    }

    /// Тест проверяет, что все форматы строятся без паники.
    #[test]
    fn test_all_formats_build() {
        for format in [LogFormat::Json, LogFormat::Pretty, LogFormat::Compact] {
            let console = ConsoleConfig {
                format,
                ..Default::default()
            };
            let layer = build_formatter_from_config::<Registry>(&console);
            let subscriber = Registry::default().with(layer);
            tracing::subscriber::with_default(subscriber, || {
                tracing::debug!(%format, "formatter smoke test");
            });
        }
    }
}
