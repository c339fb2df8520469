//! Typed identities for bots and user copies.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Prefix reserved for user copy ids in external string form.
pub const COPY_ID_PREFIX: &str = "copy_";

/// Identity of a simulated bot (master or standalone).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BotId(String);

impl BotId {
    /// Wrap an id read back from storage.
    pub(crate) fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn generate() -> Self {
        Self(format!("bot_{}", uuid::Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

/// Identity of a user copy. Always carries the reserved prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CopyId(String);

impl CopyId {
    pub(crate) fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn generate() -> Self {
        Self(format!("{}{}", COPY_ID_PREFIX, uuid::Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CopyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

/// Either kind of entity, resolved from an external string id.
///
/// Copies and bots share one external id space; the prefix decides which
/// side of the union a raw id lands on, and nothing past this boundary
/// looks at prefixes again.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityRef {
    Bot(BotId),
    Copy(CopyId),
}

impl EntityRef {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.starts_with(COPY_ID_PREFIX) {
            EntityRef::Copy(CopyId(raw.to_string()))
        } else {
            EntityRef::Bot(BotId(raw.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_routes_on_prefix() {
        assert!(matches!(EntityRef::parse("copy_abc"), EntityRef::Copy(_)));
        assert!(matches!(EntityRef::parse("  copy_abc "), EntityRef::Copy(_)));
        assert!(matches!(EntityRef::parse("btc-scalper"), EntityRef::Bot(_)));
        assert!(matches!(EntityRef::parse("my_copy_bot"), EntityRef::Bot(_)));
    }

    #[test]
    fn test_generated_ids_land_on_their_side() {
        assert!(matches!(
            EntityRef::parse(BotId::generate().as_str()),
            EntityRef::Bot(_)
        ));
        assert!(matches!(
            EntityRef::parse(CopyId::generate().as_str()),
            EntityRef::Copy(_)
        ));
    }
}
