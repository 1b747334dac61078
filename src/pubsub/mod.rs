//! Подсистема подписок клиента шины.
//!
//! - `registry`: реестр подписок и алгоритм рассылки с изоляцией сбоев
//!   обработчиков.
//! - `subscription`: идентификаторы, области, обработчики, предикаты и
//!   RAII-хэндл [`SubscriptionGuard`].

pub mod registry;
pub mod subscription;

pub use registry::*;
pub(crate) use subscription::Entry;
pub use subscription::{handler, of_types, Handler, Predicate, Scope, SubscriptionGuard, SubscriptionId};
