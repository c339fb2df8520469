//! Copy book: lifecycle of user copies (ACTIVE -> CLOSING -> CLOSED).

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use super::registry::BotRegistry;
use crate::db::UserCopyStore;
use crate::error::SimError;
use crate::metrics::project;
use crate::models::{BotId, BotStats, CopyId, CopySnapshot, CopyStatus, EntityRef, UserCopy};

/// Owns user copy records. Never touches bot state.
pub struct CopyBook {
    store: Arc<dyn UserCopyStore>,
}

fn to_money(value: f64) -> Decimal {
    Decimal::from_f64(value).unwrap_or_default().round_dp(2)
}

impl CopyBook {
    pub fn new(store: Arc<dyn UserCopyStore>) -> Self {
        Self { store }
    }

    /// Start copying `bot_id` with `invested_amount`.
    pub async fn create(
        &self,
        registry: &BotRegistry,
        user_id: &str,
        bot_id: &BotId,
        invested_amount: Decimal,
        now: DateTime<Utc>,
    ) -> Result<UserCopy> {
        if invested_amount <= Decimal::ZERO {
            return Err(SimError::InvalidAmount(invested_amount.to_string()).into());
        }
        if !registry.contains(bot_id) {
            return Err(SimError::BotNotFound(bot_id.to_string()).into());
        }

        let copy = UserCopy::new(user_id.to_string(), bot_id.clone(), invested_amount, now);
        self.store.upsert(&copy).await.context("Failed to store copy")?;

        info!(copy = %copy.id, user = %user_id, bot = %bot_id, amount = %invested_amount, "Copy created");
        Ok(copy)
    }

    pub async fn get(&self, id: &CopyId) -> Result<UserCopy> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| SimError::CopyNotFound(id.to_string()).into())
    }

    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<UserCopy>> {
        self.store.list_for_user(user_id).await
    }

    pub async fn list_for_bot(&self, bot_id: &BotId) -> Result<Vec<UserCopy>> {
        self.store.list_for_bot(bot_id).await
    }

    pub async fn list_all(&self) -> Result<Vec<UserCopy>> {
        self.store.list_all().await
    }

    /// Move an ACTIVE copy to CLOSING. It stops picking up new positions and
    /// settles once the ones it holds have closed.
    pub async fn request_close(&self, id: &CopyId, now: DateTime<Utc>) -> Result<UserCopy> {
        let mut copy = self.get(id).await?;
        if !copy.is_active() {
            return Err(SimError::InvalidCopyTransition {
                id: id.to_string(),
                from: copy.status,
                to: CopyStatus::Closing,
            }
            .into());
        }

        copy.status = CopyStatus::Closing;
        copy.close_requested_at = Some(now);
        self.store.upsert(&copy).await?;

        info!(copy = %id, "Copy close requested");
        Ok(copy)
    }

    /// Finalize every CLOSING copy whose projected positions have drained.
    /// Returns the copies that moved to CLOSED.
    pub async fn settle(&self, registry: &BotRegistry, now: DateTime<Utc>) -> Result<Vec<UserCopy>> {
        let mut settled = Vec::new();

        for copy in self.store.list_all().await? {
            if copy.status != CopyStatus::Closing {
                continue;
            }

            let drained = match registry.get(&copy.bot_id) {
                Some(master) => project(&copy, master).open_positions.is_empty(),
                None => true,
            };
            if !drained {
                debug!(copy = %copy.id, "Copy still holds open positions");
                continue;
            }

            settled.push(self.finalize(copy, registry, now).await?);
        }

        Ok(settled)
    }

    /// Close immediately, marking open positions at their live P&L.
    pub async fn close_now(
        &self,
        id: &CopyId,
        registry: &BotRegistry,
        now: DateTime<Utc>,
    ) -> Result<UserCopy> {
        let mut copy = self.get(id).await?;
        if copy.is_closed() {
            return Err(SimError::InvalidCopyTransition {
                id: id.to_string(),
                from: copy.status,
                to: CopyStatus::Closed,
            }
            .into());
        }
        copy.close_requested_at.get_or_insert(now);
        self.finalize(copy, registry, now).await
    }

    async fn finalize(
        &self,
        mut copy: UserCopy,
        registry: &BotRegistry,
        now: DateTime<Utc>,
    ) -> Result<UserCopy> {
        // Live P&L is measured before the copy is marked closed, since a
        // closed copy no longer sees open positions.
        let final_pnl = match registry.get(&copy.bot_id) {
            Some(master) => {
                let stats = project(&copy, master);
                to_money(stats.total_pnl + stats.unrealized_pnl)
            }
            None => {
                warn!(copy = %copy.id, bot = %copy.bot_id, "Master bot is gone, closing flat");
                Decimal::ZERO
            }
        };

        copy.status = CopyStatus::Closed;
        copy.closed_at = Some(now);
        copy.snapshot = Some(CopySnapshot {
            final_pnl,
            final_value: copy.invested_amount + final_pnl,
        });
        self.store.upsert(&copy).await?;

        info!(copy = %copy.id, final_pnl = %final_pnl, "Copy closed");
        Ok(copy)
    }

    /// Delete a copy. Only CLOSED copies may be deleted.
    pub async fn delete(&self, id: &CopyId) -> Result<()> {
        let copy = self.get(id).await?;
        if !copy.is_closed() {
            return Err(SimError::CopyNotClosed {
                id: id.to_string(),
                status: copy.status,
            }
            .into());
        }
        self.store.delete(id).await?;
        info!(copy = %id, "Copy deleted");
        Ok(())
    }

    /// Projected stats of a copy, computed from its master right now.
    pub async fn project(&self, id: &CopyId, registry: &BotRegistry) -> Result<BotStats> {
        let copy = self.get(id).await?;
        let master = registry
            .get(&copy.bot_id)
            .ok_or_else(|| SimError::BotNotFound(copy.bot_id.to_string()))?;
        Ok(project(&copy, master))
    }

    /// Stats for any external id: bots directly, copies by projection.
    pub async fn stats_for(&self, raw_id: &str, registry: &BotRegistry) -> Result<BotStats> {
        match EntityRef::parse(raw_id) {
            EntityRef::Bot(id) => registry
                .stats(&id)
                .ok_or_else(|| SimError::BotNotFound(id.to_string()).into()),
            EntityRef::Copy(id) => self.project(&id, registry).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::feed::PriceMap;
    use crate::models::BotConfig;
    use crate::trading::SimulatorConfig;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn setup() -> (BotRegistry, CopyBook, BotId) {
        let store = Arc::new(MemoryStore::new());
        let mut registry = BotRegistry::new(store.clone(), SimulatorConfig::default());
        let bot = registry
            .create_bot(
                BotConfig {
                    seed: Some(5),
                    open_frequency: 1.0,
                    trades_per_day: 500.0,
                    min_duration_secs: 60,
                    max_duration_secs: 120,
                    ..Default::default()
                },
                Some("master"),
            )
            .unwrap();
        (registry, CopyBook::new(store), bot)
    }

    fn prices() -> PriceMap {
        PriceMap::from([("BTCUSDT".to_string(), 50_000.0)])
    }

    fn sim_err(e: anyhow::Error) -> SimError {
        e.downcast::<SimError>().unwrap()
    }

    #[tokio::test]
    async fn test_create_validates() {
        let (registry, book, bot) = setup();
        let now = Utc::now();

        let err = book.create(&registry, "u", &bot, dec!(0), now).await.unwrap_err();
        assert!(matches!(sim_err(err), SimError::InvalidAmount(_)));

        let missing = BotId::from_raw("ghost");
        let err = book.create(&registry, "u", &missing, dec!(10), now).await.unwrap_err();
        assert!(matches!(sim_err(err), SimError::BotNotFound(_)));

        let copy = book.create(&registry, "u", &bot, dec!(10), now).await.unwrap();
        assert!(copy.is_active());
        assert!(copy.id.as_str().starts_with("copy_"));
    }

    #[tokio::test]
    async fn test_delete_requires_closed() {
        let (registry, book, bot) = setup();
        let now = Utc::now();
        let copy = book.create(&registry, "u", &bot, dec!(1000), now).await.unwrap();

        let err = book.delete(&copy.id).await.unwrap_err();
        assert!(matches!(sim_err(err), SimError::CopyNotClosed { .. }));

        book.request_close(&copy.id, now).await.unwrap();
        let err = book.delete(&copy.id).await.unwrap_err();
        assert!(matches!(
            sim_err(err),
            SimError::CopyNotClosed { status: CopyStatus::Closing, .. }
        ));

        book.close_now(&copy.id, &registry, now).await.unwrap();
        book.delete(&copy.id).await.unwrap();
        assert!(book.get(&copy.id).await.is_err());
    }

    #[tokio::test]
    async fn test_transitions_only_move_forward() {
        let (registry, book, bot) = setup();
        let now = Utc::now();
        let copy = book.create(&registry, "u", &bot, dec!(1000), now).await.unwrap();

        book.request_close(&copy.id, now).await.unwrap();
        let err = book.request_close(&copy.id, now).await.unwrap_err();
        assert!(matches!(sim_err(err), SimError::InvalidCopyTransition { .. }));

        book.close_now(&copy.id, &registry, now).await.unwrap();
        let err = book.close_now(&copy.id, &registry, now).await.unwrap_err();
        assert!(matches!(sim_err(err), SimError::InvalidCopyTransition { .. }));
    }

    #[tokio::test]
    async fn test_settle_waits_for_positions_to_drain() {
        let (mut registry, book, bot) = setup();
        let t0 = Utc::now();
        let copy = book.create(&registry, "u", &bot, dec!(2500), t0).await.unwrap();

        // Opens a position right away
        registry.tick(&prices(), t0);
        assert_eq!(book.project(&copy.id, &registry).await.unwrap().open_positions.len(), 1);

        let requested = t0 + Duration::seconds(1);
        book.request_close(&copy.id, requested).await.unwrap();
        assert!(book.settle(&registry, requested).await.unwrap().is_empty());

        // Everything opened before the request is due by now
        let later = t0 + Duration::seconds(121);
        registry.tick(&prices(), later);
        let settled = book.settle(&registry, later).await.unwrap();
        assert_eq!(settled.len(), 1);

        let closed = &settled[0];
        assert!(closed.is_closed());
        let snapshot = closed.snapshot.unwrap();
        assert_eq!(snapshot.final_value, closed.invested_amount + snapshot.final_pnl);

        let stats = book.project(&closed.id, &registry).await.unwrap();
        assert_eq!(stats.total_trades, 1);
        assert!(stats.open_positions.is_empty());
    }

    #[tokio::test]
    async fn test_stats_for_routes_on_id() {
        let (registry, book, bot) = setup();
        let copy = book.create(&registry, "u", &bot, dec!(100), Utc::now()).await.unwrap();

        assert_eq!(book.stats_for("master", &registry).await.unwrap().id, "master");
        assert_eq!(
            book.stats_for(copy.id.as_str(), &registry).await.unwrap().id,
            copy.id.as_str()
        );
        assert!(book.stats_for("copy_missing", &registry).await.is_err());
    }
}
