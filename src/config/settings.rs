use std::{path::Path, time::Duration};

use ::config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    client::{BackoffPolicy, ClientConfig, OfflinePolicy, DEFAULT_CHANNEL},
    logging::LoggingConfig,
    transport::WebSocketConfig,
};

/// Префикс переменных окружения: `EDUBUS__CLIENT__ACK_TIMEOUT_MS=250`.
pub const ENV_PREFIX: &str = "EDUBUS";
/// Разделитель вложенных ключей в переменных окружения.
pub const ENV_SEPARATOR: &str = "__";

/// Ошибки загрузки и проверки настроек.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to load settings: {0}")]
    Load(#[from] ::config::ConfigError),
    #[error("invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Что делать с отправкой без соединения.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OfflineMode {
    #[default]
    Reject,
    Queue,
}

/// Какой транспорт использовать.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Внутрипроцессный хаб (демо и тесты)
    #[default]
    Memory,
    /// Pusher-совместимый сервис по WebSocket
    Websocket,
}

/// Секция `[client]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSection {
    pub default_channel: String,
    pub ack_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub offline: OfflineMode,
    /// Ёмкость офлайн-очереди при `offline = "queue"`
    pub queue_capacity: usize,
    pub auto_pong: bool,
    pub latency_window: usize,
}

/// Секция `[backoff]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffSection {
    pub initial_ms: u64,
    pub max_ms: u64,
    pub multiplier: f64,
    pub jitter: f64,
    /// Отсутствие ключа: переподключаться бесконечно; 0: не переподключаться
    pub max_attempts: Option<u32>,
}

/// Секция `[transport]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSection {
    pub kind: TransportKind,
    pub url: Option<String>,
    pub app_key: Option<String>,
    pub cluster: Option<String>,
}

/// Настройки приложения.
///
/// Слои в порядке приоритета: значения по умолчанию, TOML-файл (если
/// задан), переменные окружения `EDUBUS__*`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub client: ClientSection,
    pub backoff: BackoffSection,
    pub transport: TransportSection,
    pub logging: LoggingConfig,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl Settings {
    /// Загружает настройки без файла: умолчания и окружение.
    pub fn load() -> Result<Self, SettingsError> {
        Self::load_from(None::<&Path>)
    }

    /// Загружает настройки с необязательным TOML-файлом.
    pub fn load_from(path: Option<impl AsRef<Path>>) -> Result<Self, SettingsError> {
        let mut builder = Config::builder().add_source(Config::try_from(&Settings::default())?);

        if let Some(path) = path {
            builder = builder.add_source(File::from(path.as_ref()).format(FileFormat::Toml));
        }

        let cfg = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator(ENV_SEPARATOR)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = cfg.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        let invalid = |key, reason: &str| {
            Err(SettingsError::Invalid {
                key,
                reason: reason.to_string(),
            })
        };

        if self.client.default_channel.trim().is_empty() {
            return invalid("client.default_channel", "must not be empty");
        }
        if self.client.ack_timeout_ms == 0 {
            return invalid("client.ack_timeout_ms", "must be positive");
        }
        if self.client.connect_timeout_ms == 0 {
            return invalid("client.connect_timeout_ms", "must be positive");
        }
        if self.client.offline == OfflineMode::Queue && self.client.queue_capacity == 0 {
            return invalid("client.queue_capacity", "must be positive for the queue mode");
        }
        if self.backoff.multiplier < 1.0 || !self.backoff.multiplier.is_finite() {
            return invalid("backoff.multiplier", "must be a finite number >= 1.0");
        }
        if !(0.0..=1.0).contains(&self.backoff.jitter) {
            return invalid("backoff.jitter", "must be within 0.0..=1.0");
        }
        if self.backoff.initial_ms > self.backoff.max_ms {
            return invalid("backoff.initial_ms", "must not exceed backoff.max_ms");
        }
        if self.transport.kind == TransportKind::Websocket {
            self.websocket_config()
                .endpoint()
                .map_err(|e| SettingsError::Invalid {
                    key: "transport",
                    reason: e.to_string(),
                })?;
        }
        Ok(())
    }

    /// Конфигурация клиента шины.
    pub fn client_config(&self) -> ClientConfig {
        let offline = match self.client.offline {
            OfflineMode::Reject => OfflinePolicy::Reject,
            OfflineMode::Queue => OfflinePolicy::Queue {
                max: self.client.queue_capacity,
            },
        };
        ClientConfig {
            default_channel: self.client.default_channel.as_str().into(),
            ack_timeout: Duration::from_millis(self.client.ack_timeout_ms),
            connect_timeout: Duration::from_millis(self.client.connect_timeout_ms),
            offline,
            auto_pong: self.client.auto_pong,
            backoff: self.backoff_policy(),
            latency_window: self.client.latency_window,
        }
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            initial: Duration::from_millis(self.backoff.initial_ms),
            max: Duration::from_millis(self.backoff.max_ms),
            multiplier: self.backoff.multiplier,
            jitter: self.backoff.jitter,
            max_attempts: self.backoff.max_attempts,
        }
    }

    pub fn websocket_config(&self) -> WebSocketConfig {
        WebSocketConfig {
            url: self.transport.url.clone(),
            app_key: self.transport.app_key.clone(),
            cluster: self.transport.cluster.clone(),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

impl Default for ClientSection {
    fn default() -> Self {
        let defaults = ClientConfig::default();
        Self {
            default_channel: DEFAULT_CHANNEL.to_string(),
            ack_timeout_ms: defaults.ack_timeout.as_millis() as u64,
            connect_timeout_ms: defaults.connect_timeout.as_millis() as u64,
            offline: OfflineMode::Reject,
            queue_capacity: 256,
            auto_pong: defaults.auto_pong,
            latency_window: defaults.latency_window,
        }
    }
}

impl Default for BackoffSection {
    fn default() -> Self {
        let policy = BackoffPolicy::default();
        Self {
            initial_ms: policy.initial.as_millis() as u64,
            max_ms: policy.max.as_millis() as u64,
            multiplier: policy.multiplier,
            jitter: policy.jitter,
            max_attempts: policy.max_attempts,
        }
    }
}
