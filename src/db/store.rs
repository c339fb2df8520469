//! Storage seams for bot configurations and user copies.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::models::{BotConfig, BotId, CopyId, UserCopy};

/// Persisted bot: its id and current configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct BotRecord {
    pub id: BotId,
    pub config: BotConfig,
}

/// Durable store of bot configurations.
///
/// Only configuration is kept; positions and trades live in memory.
#[async_trait]
pub trait BotConfigStore: Send + Sync {
    async fn load_all(&self) -> Result<Vec<BotRecord>>;

    /// Replace the stored set with `records`.
    async fn save_all(&self, records: &[BotRecord]) -> Result<()>;

    async fn delete(&self, id: &BotId) -> Result<()>;
}

/// Durable store of user copies.
#[async_trait]
pub trait UserCopyStore: Send + Sync {
    async fn get(&self, id: &CopyId) -> Result<Option<UserCopy>>;

    async fn upsert(&self, copy: &UserCopy) -> Result<()>;

    /// Returns whether a record was removed.
    async fn delete(&self, id: &CopyId) -> Result<bool>;

    async fn list_for_bot(&self, bot_id: &BotId) -> Result<Vec<UserCopy>>;

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<UserCopy>>;

    async fn list_all(&self) -> Result<Vec<UserCopy>>;
}

/// In-memory store, used by the offline simulation and tests.
#[derive(Default)]
pub struct MemoryStore {
    bots: RwLock<Vec<BotRecord>>,
    copies: RwLock<HashMap<CopyId, UserCopy>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn sorted(mut copies: Vec<UserCopy>) -> Vec<UserCopy> {
    copies.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    copies
}

#[async_trait]
impl BotConfigStore for MemoryStore {
    async fn load_all(&self) -> Result<Vec<BotRecord>> {
        Ok(self.bots.read().await.clone())
    }

    async fn save_all(&self, records: &[BotRecord]) -> Result<()> {
        *self.bots.write().await = records.to_vec();
        Ok(())
    }

    async fn delete(&self, id: &BotId) -> Result<()> {
        self.bots.write().await.retain(|r| &r.id != id);
        Ok(())
    }
}

#[async_trait]
impl UserCopyStore for MemoryStore {
    async fn get(&self, id: &CopyId) -> Result<Option<UserCopy>> {
        Ok(self.copies.read().await.get(id).cloned())
    }

    async fn upsert(&self, copy: &UserCopy) -> Result<()> {
        self.copies.write().await.insert(copy.id.clone(), copy.clone());
        Ok(())
    }

    async fn delete(&self, id: &CopyId) -> Result<bool> {
        Ok(self.copies.write().await.remove(id).is_some())
    }

    async fn list_for_bot(&self, bot_id: &BotId) -> Result<Vec<UserCopy>> {
        let copies = self.copies.read().await;
        Ok(sorted(copies.values().filter(|c| &c.bot_id == bot_id).cloned().collect()))
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<UserCopy>> {
        let copies = self.copies.read().await;
        Ok(sorted(copies.values().filter(|c| c.user_id == user_id).cloned().collect()))
    }

    async fn list_all(&self) -> Result<Vec<UserCopy>> {
        Ok(sorted(self.copies.read().await.values().cloned().collect()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_memory_bot_store_replaces_set() {
        let store = MemoryStore::new();
        let a = BotRecord { id: BotId::from_raw("a"), config: BotConfig::default() };
        let b = BotRecord { id: BotId::from_raw("b"), config: BotConfig::default() };

        store.save_all(&[a.clone(), b.clone()]).await.unwrap();
        store.save_all(&[b.clone()]).await.unwrap();
        assert_eq!(store.load_all().await.unwrap(), vec![b.clone()]);

        BotConfigStore::delete(&store, &b.id).await.unwrap();
        assert!(store.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_memory_copy_store_filters() {
        let store = MemoryStore::new();
        let bot = BotId::from_raw("master");
        let c1 = UserCopy::new("alice".into(), bot.clone(), dec!(100), Utc::now());
        let c2 = UserCopy::new("bob".into(), bot.clone(), dec!(200), Utc::now());
        let c3 = UserCopy::new("alice".into(), BotId::from_raw("other"), dec!(300), Utc::now());
        for c in [&c1, &c2, &c3] {
            store.upsert(c).await.unwrap();
        }

        assert_eq!(store.list_for_bot(&bot).await.unwrap().len(), 2);
        assert_eq!(store.list_for_user("alice").await.unwrap().len(), 2);
        assert_eq!(store.list_all().await.unwrap().len(), 3);
        assert_eq!(store.get(&c2.id).await.unwrap(), Some(c2.clone()));

        assert!(UserCopyStore::delete(&store, &c2.id).await.unwrap());
        assert!(!UserCopyStore::delete(&store, &c2.id).await.unwrap());
    }
}
