//! Протокол шины событий: каналы, типы сообщений и их нагрузки.
//!
//! - `channel`: интернированный идентификатор канала [`ChannelId`].
//! - `message`: конверт [`Message`] и закрытый набор [`MessageType`].
//! - `payload`: по одной структуре нагрузки на каждый тип.

pub mod channel;
pub mod message;
pub mod payload;

pub use channel::ChannelId;
pub use message::*;
pub use payload::*;
