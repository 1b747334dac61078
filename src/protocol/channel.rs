use std::{fmt, ops::Deref, sync::Arc};

use dashmap::DashMap;
use once_cell::sync::Lazy;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Пул для повторного использования Arc<str> по одинаковым именам каналов.
static CHANNEL_INTERN: Lazy<DashMap<String, Arc<str>>> = Lazy::new(DashMap::new);

/// Возвращает interned Arc<str> для данного канала.
/// При первом вызове для нового имени создаёт Arc<str> и сохраняет его в пуле.
#[inline(always)]
pub(crate) fn intern_channel<S: AsRef<str>>(chan: S) -> Arc<str> {
    let key = chan.as_ref();
    if let Some(existing) = CHANNEL_INTERN.get(key) {
        existing.clone()
    } else {
        CHANNEL_INTERN
            .entry(key.to_string())
            .or_insert_with(|| Arc::from(key))
            .clone()
    }
}

/// Возвращает interned Arc<str>, если имя уже в пуле, иначе отдельную
/// строку. Пул не пополняется.
fn lookup_channel(chan: &str) -> Arc<str> {
    match CHANNEL_INTERN.get(chan) {
        Some(existing) => existing.clone(),
        None => Arc::from(chan),
    }
}

/// Идентификатор логического канала (`"public"`, `"content-generation"`).
///
/// Имя, заданное локально (`new`, `From`), интернируется: клоны и повторные
/// `ChannelId::new` указывают на одну и ту же строку. Имена из входящих
/// кадров ([`ChannelId::from_wire`], `Deserialize`) пул не пополняют.
/// Сравнение и хэш идут по содержимому строки.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(Arc<str>);

impl ChannelId {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(intern_channel(name))
    }

    /// Имя канала из входящего кадра: переиспользует известное имя, но
    /// не заносит новое в пул.
    pub fn from_wire(name: &str) -> Self {
        Self(lookup_channel(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Deref for ChannelId {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ChannelId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ChannelId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "ChannelId({:?})", &*self.0)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChannelId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ChannelId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&ChannelId> for ChannelId {
    fn from(value: &ChannelId) -> Self {
        value.clone()
    }
}

impl PartialEq<str> for ChannelId {
    fn eq(
        &self,
        other: &str,
    ) -> bool {
        &*self.0 == other
    }
}

impl PartialEq<&str> for ChannelId {
    fn eq(
        &self,
        other: &&str,
    ) -> bool {
        &*self.0 == *other
    }
}

impl Serialize for ChannelId {
    fn serialize<S: Serializer>(
        &self,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ChannelId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(Self::from_wire(&name))
    }
}
