pub mod backoff;
pub(crate) mod connection;
pub mod core;
pub mod options;
pub mod pending;
pub mod state;
pub mod stats;

// Публичный экспорт типов клиента из вложенных модулей, чтобы
// упростить доступ к ним из внешнего кода.
pub use backoff::BackoffPolicy;
pub use self::core::BusClient;
pub use options::*;
pub use pending::{AckMatch, PendingAck, PendingRequests};
pub use state::ConnectionState;
pub use stats::{ClientStats, StatsSnapshot};
