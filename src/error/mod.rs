//! Ошибки крейта.
//!
//! Типизированная `BusError` и инфраструктура `StackError` живут в
//! `edubus-error`; здесь к ним подключаются ошибки настроек и логирования.

use std::any::Any;

pub use edubus_error::*;

use crate::{config::SettingsError, logging::LoggingError};

impl ErrorExt for SettingsError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Load(::config::ConfigError::NotFound(_)) => StatusCode::ConfigMissing,
            Self::Load(_) | Self::Invalid { .. } => StatusCode::ConfigInvalid,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn client_message(&self) -> String {
        self.to_string()
    }
}

impl ErrorExt for LoggingError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidLevel(_) | Self::InvalidConfig(_) => StatusCode::ConfigInvalid,
            Self::Io(_) => StatusCode::Io,
            Self::AlreadyInitialized(_) => StatusCode::Unexpected,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Тест проверяет статус-коды ошибок настроек и логирования.
    #[test]
    fn test_status_codes() {
        let err = SettingsError::Invalid {
            key: "backoff.jitter",
            reason: "must be within 0.0..=1.0".into(),
        };
        assert_eq!(err.status_code(), StatusCode::ConfigInvalid);
        assert!(err.client_message().contains("backoff.jitter"));

        let err = LoggingError::InvalidLevel("loud".into());
        assert_eq!(err.status_code(), StatusCode::ConfigInvalid);
    }

    /// Тест проверяет подъём в `StackError` с контекстом.
    #[test]
    fn test_into_stack_error() {
        fn load() -> EdubusResult<()> {
            let failed: Result<(), SettingsError> = Err(SettingsError::Invalid {
                key: "client.ack_timeout_ms",
                reason: "must be positive".into(),
            });
            failed.context("loading edubus.toml")
        }

        let err = load().unwrap_err();
        assert_eq!(err.status_code(), StatusCode::ConfigInvalid);
        assert_eq!(err.contexts().len(), 1);
        assert!(err.downcast_ref::<SettingsError>().is_some());
    }
}
