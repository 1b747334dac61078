use std::{env, fmt, fs, path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};

use super::LoggingError;

/// Формат консольного вывода.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
    #[default]
    Compact,
}

/// Период ротации файла логов.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RotationPeriod {
    Minutely,
    Hourly,
    #[default]
    Daily,
    Never,
}

/// Настройки консольного слоя.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    pub enabled: bool,
    pub format: LogFormat,
    pub with_ansi: bool,
    pub with_target: bool,
    pub with_thread_ids: bool,
    pub with_line_numbers: bool,
}

/// Настройки файлового слоя.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub enabled: bool,
    pub dir: PathBuf,
    /// Префикс имени файла: `edubus.log.2026-10-18`
    pub prefix: String,
    pub rotation: RotationPeriod,
}

/// Конфигурация логирования.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Базовый уровень: trace, debug, info, warn, error
    pub level: String,
    /// Дополнительные директивы EnvFilter, например `tokio_tungstenite=warn`
    pub directives: Vec<String>,
    pub console: ConsoleConfig,
    pub file: FileConfig,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl LoggingConfig {
    /// Накладывает переменные окружения `EDUBUS_LOG_*`.
    ///
    /// Нераспознанные значения игнорируются, итог проверяет `validate()`.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = env::var("EDUBUS_LOG_LEVEL") {
            self.level = level.trim().to_ascii_lowercase();
        }
        if let Some(format) = env::var("EDUBUS_LOG_FORMAT")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.console.format = format;
        }
        if let Ok(dir) = env::var("EDUBUS_LOG_DIR") {
            self.file.dir = PathBuf::from(dir);
        }
        if let Some(enabled) = env::var("EDUBUS_LOG_FILE").ok().and_then(parse_flag) {
            self.file.enabled = enabled;
        }
        if let Some(ansi) = env::var("EDUBUS_LOG_ANSI").ok().and_then(parse_flag) {
            self.console.with_ansi = ansi;
        }
    }

    pub fn validate(&self) -> Result<(), LoggingError> {
        const LEVELS: [&str; 6] = ["trace", "debug", "info", "warn", "error", "off"];
        if !LEVELS.contains(&self.level.as_str()) {
            return Err(LoggingError::InvalidLevel(self.level.clone()));
        }
        if self.file.enabled && self.file.prefix.trim().is_empty() {
            return Err(LoggingError::InvalidConfig(
                "file.prefix must not be empty".into(),
            ));
        }
        if !self.console.enabled && !self.file.enabled {
            return Err(LoggingError::InvalidConfig(
                "at least one of console or file output must be enabled".into(),
            ));
        }
        Ok(())
    }

    /// Создаёт каталог логов, если включён файловый вывод.
    pub fn ensure_log_dir(&self) -> Result<(), LoggingError> {
        if self.file.enabled {
            fs::create_dir_all(&self.file.dir)?;
        }
        Ok(())
    }

    /// Директива для EnvFilter: базовый уровень и уточнения по целям.
    pub fn build_filter_directive(&self) -> String {
        let mut parts = Vec::with_capacity(self.directives.len() + 1);
        parts.push(self.level.clone());
        parts.extend(
            self.directives
                .iter()
                .map(|d| d.trim())
                .filter(|d| !d.is_empty())
                .map(str::to_string),
        );
        parts.join(",")
    }
}

fn parse_flag(value: String) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" => Some(false),
        _ => None,
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            format: LogFormat::Compact,
            with_ansi: true,
            with_target: true,
            with_thread_ids: false,
            with_line_numbers: false,
        }
    }
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: PathBuf::from("logs"),
            prefix: "edubus.log".into(),
            rotation: RotationPeriod::Daily,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            directives: vec!["tokio_tungstenite=warn".into(), "tungstenite=warn".into()],
            console: ConsoleConfig::default(),
            file: FileConfig::default(),
        }
    }
}

impl FromStr for LogFormat {
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            other => Err(LoggingError::InvalidConfig(format!(
                "unknown log format: {other}"
            ))),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let s = match self {
            Self::Json => "json",
            Self::Pretty => "pretty",
            Self::Compact => "compact",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;

    fn clear_env() {
        for key in [
            "EDUBUS_LOG_LEVEL",
            "EDUBUS_LOG_FORMAT",
            "EDUBUS_LOG_DIR",
            "EDUBUS_LOG_FILE",
            "EDUBUS_LOG_ANSI",
        ] {
            env::remove_var(key);
        }
    }

    /// Тест проверяет директиву фильтра по умолчанию.
    #[test]
    fn test_filter_directive() {
        let mut cfg = LoggingConfig::default();
        cfg.directives.push("  ".into());
        cfg.directives.push("edubus::transport=debug".into());
        assert_eq!(
            cfg.build_filter_directive(),
            "info,tokio_tungstenite=warn,tungstenite=warn,edubus::transport=debug"
        );
    }

    /// Тест проверяет переопределение через переменные окружения.
    #[test]
    #[serial]
    fn test_env_overrides() {
        clear_env();
        env::set_var("EDUBUS_LOG_LEVEL", "DEBUG");
        env::set_var("EDUBUS_LOG_FORMAT", "json");
        env::set_var("EDUBUS_LOG_FILE", "on");
        env::set_var("EDUBUS_LOG_ANSI", "nonsense");

        let mut cfg = LoggingConfig::default();
        cfg.apply_env_overrides();
        clear_env();

        assert_eq!(cfg.level, "debug");
        assert_eq!(cfg.console.format, LogFormat::Json);
        assert!(cfg.file.enabled);
        assert!(cfg.console.with_ansi, "нераспознанный флаг игнорируется");
    }

    /// Тест проверяет валидацию уровня и выходов.
    #[test]
    fn test_validate() {
        assert!(LoggingConfig::default().validate().is_ok());

        let cfg = LoggingConfig {
            level: "loud".into(),
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(LoggingError::InvalidLevel(_))));

        let mut cfg = LoggingConfig::default();
        cfg.console.enabled = false;
        assert!(matches!(
            cfg.validate(),
            Err(LoggingError::InvalidConfig(_))
        ));
    }

    /// Тест проверяет создание каталога логов.
    #[test]
    fn test_ensure_log_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let mut cfg = LoggingConfig::default();
        cfg.file.enabled = true;
        cfg.file.dir = tmp.path().join("nested/logs");

        cfg.ensure_log_dir().unwrap();
        assert!(cfg.file.dir.is_dir());
    }

    #[test]
    fn test_log_format_parse() {
        assert_eq!("Pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert!("xml".parse::<LogFormat>().is_err());
        assert_eq!(LogFormat::Json.to_string(), "json");
    }
}
