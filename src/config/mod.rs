pub mod settings;

// Публичный экспорт настроек, чтобы упростить доступ к ним из внешнего кода.
pub use settings::*;
