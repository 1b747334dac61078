use std::{fmt, panic::Location, sync::Arc};

#[cfg(feature = "serde")]
use serde::Serialize;

use crate::{ErrorExt, StatusCode};

/// Ошибка прикладного уровня: исходная ошибка плюс цепочка контекстов.
///
/// Контексты добавляются по мере подъёма по стеку вызовов, каждый с местом
/// вызова. Клонирование дешёвое.
#[derive(Clone)]
pub struct StackError {
    source: Arc<dyn ErrorExt>,
    contexts: Vec<ErrorContext>,
}

/// Один уровень контекста.
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub message: String,
    pub location: Option<&'static Location<'static>>,
}

/// Отчёт об ошибке для машинного вывода CLI.
#[cfg(feature = "serde")]
#[derive(Debug, Serialize)]
pub struct ErrorReport {
    pub code: StatusCode,
    pub message: String,
    pub contexts: Vec<String>,
}

impl StackError {
    pub fn new<E: ErrorExt>(err: E) -> Self {
        Self {
            source: Arc::new(err),
            contexts: Vec::new(),
        }
    }

    /// Добавляет контекст с местом вызова.
    #[track_caller]
    pub fn context(
        mut self,
        msg: impl Into<String>,
    ) -> Self {
        self.contexts.push(ErrorContext {
            message: msg.into(),
            location: Some(Location::caller()),
        });
        self
    }

    pub fn status_code(&self) -> StatusCode {
        self.source.status_code()
    }

    pub fn client_message(&self) -> String {
        self.source.client_message()
    }

    pub fn metrics_tags(&self) -> Vec<(&'static str, String)> {
        self.source.metrics_tags()
    }

    /// Исходная ошибка.
    pub fn root(&self) -> &dyn ErrorExt {
        self.source.as_ref()
    }

    /// Контексты в порядке добавления (от места ошибки наружу).
    pub fn contexts(&self) -> &[ErrorContext] {
        &self.contexts
    }

    pub fn downcast_ref<T: ErrorExt>(&self) -> Option<&T> {
        self.source.as_any().downcast_ref::<T>()
    }

    #[cfg(feature = "serde")]
    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            code: self.status_code(),
            message: self.client_message(),
            contexts: self.contexts.iter().map(ToString::to_string).collect(),
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self.location {
            Some(loc) => write!(f, "{} at {}:{}", self.message, loc.file(), loc.line()),
            None => f.write_str(&self.message),
        }
    }
}

impl fmt::Debug for StackError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("StackError")
            .field("status_code", &self.status_code())
            .field("source", &self.source.to_string())
            .field("contexts", &self.contexts)
            .finish()
    }
}

/// Внешний контекст идёт первым: `outer: inner: source`.
impl fmt::Display for StackError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        for ctx in self.contexts.iter().rev() {
            write!(f, "{}: ", ctx.message)?;
        }
        write!(f, "{}", self.source)
    }
}

impl std::error::Error for StackError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

impl<E: ErrorExt> From<E> for StackError {
    fn from(e: E) -> Self {
        StackError::new(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BusError;

    /// Тест проверяет порядок контекстов и место вызова.
    #[test]
    fn test_context_chain() {
        let err = StackError::new(BusError::connection("handshake rejected"))
            .context("connecting to ws-eu.pusher.com")
            .context("starting leaderboard feed");

        assert_eq!(err.contexts().len(), 2);
        assert_eq!(err.contexts()[0].message, "connecting to ws-eu.pusher.com");
        assert!(err.contexts()[0].location.is_some());
        assert_eq!(
            err.to_string(),
            "starting leaderboard feed: connecting to ws-eu.pusher.com: connection failed: \
             handshake rejected"
        );
    }

    /// Тест проверяет downcast и проброс кода статуса.
    #[test]
    fn test_downcast_and_status() {
        let err = StackError::new(BusError::QueueFull { capacity: 8 });
        assert_eq!(err.status_code(), StatusCode::QueueFull);
        assert_eq!(
            err.downcast_ref::<BusError>(),
            Some(&BusError::QueueFull { capacity: 8 })
        );
        assert!(err.downcast_ref::<crate::GenericError>().is_none());
    }

    /// Тест проверяет машинный отчёт: код числом, внутренние детали скрыты.
    #[cfg(feature = "serde")]
    #[test]
    fn test_report_serialization() {
        let err = StackError::new(BusError::codec("bad frame")).context("decoding XP_GAINED");
        let json = serde_json::to_value(err.report()).unwrap();

        assert_eq!(json["code"], 8002);
        assert_eq!(json["message"], "Internal error");
        assert!(json["contexts"][0]
            .as_str()
            .unwrap()
            .starts_with("decoding XP_GAINED at "));
    }
}
