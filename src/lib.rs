/// Client handle: connection lifecycle, send/ack, subscriptions.
pub mod client;
/// Application settings (defaults, TOML file, `EDUBUS__*` environment).
pub mod config;
/// Error types: `BusError`, `StackError`, status codes.
pub mod error;
/// Structured logging (filters, console/file sinks, lifecycle handle).
pub mod logging;
/// Wire protocol: channels, message types, typed payloads.
pub mod protocol;
/// Subscription registry and dispatch.
pub mod pubsub;
/// Transport boundary: in-memory hub and Pusher-style WebSocket.
pub mod transport;

// -----------------------------------------------------------------------------
//  Frequently used public types
// -----------------------------------------------------------------------------

/// Client and its options.
pub use client::{
    BackoffPolicy, BusClient, ClientConfig, ConnectionState, Delivery, OfflinePolicy,
    SendOptions, StatsSnapshot, DEFAULT_CHANNEL,
};
/// Settings.
pub use crate::config::{Settings, SettingsError, TransportKind};
/// Operation errors and result types.
pub use error::{BusError, BusResult, EdubusResult, ErrorExt, StackError, StatusCode};
/// Logging setup.
pub use logging::{init_logging, LoggingConfig, LoggingHandle};
/// Messages and payloads.
pub use protocol::{ChannelId, Message, MessageType, Payload};
/// Subscriptions.
pub use pubsub::{of_types, Predicate, SubscriptionGuard, SubscriptionId};
/// Transports.
pub use transport::{MemoryHub, MemoryTransport, Transport, WebSocketConfig, WebSocketTransport};
