use std::{any::Any, error::Error};

use crate::StatusCode;

/// Общий интерфейс ошибок edubus.
///
/// Трейт object-safe: [`StackError`](crate::StackError) хранит ошибку как
/// `dyn ErrorExt` и достаёт исходный тип через [`as_any`](Self::as_any).
pub trait ErrorExt: Error + Send + Sync + 'static {
    fn status_code(&self) -> StatusCode {
        StatusCode::Internal
    }

    fn as_any(&self) -> &dyn Any;

    /// Текст, который можно показать пользователю дашборда.
    ///
    /// Внутренние ошибки не раскрываются.
    fn client_message(&self) -> String {
        match self.status_code() {
            StatusCode::Unknown | StatusCode::Unexpected | StatusCode::Internal => {
                "Internal error".to_string()
            }
            _ => self.to_string(),
        }
    }

    /// Теги для метрик: категория и код.
    fn metrics_tags(&self) -> Vec<(&'static str, String)> {
        let code = self.status_code();
        vec![
            ("category", code.category().to_string()),
            ("status_code", code.code().to_string()),
        ]
    }
}
