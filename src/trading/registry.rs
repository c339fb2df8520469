//! Bot registry: owns every simulated bot and fans price ticks out to them.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use super::config::SimulatorConfig;
use super::pnl_range::validate_configuration;
use crate::bot::{Bot, TickReport};
use crate::db::{BotConfigStore, BotRecord};
use crate::error::SimError;
use crate::feed::PriceMap;
use crate::metrics::MetricsCalculator;
use crate::models::{AggregatedStats, BotConfig, BotConfigPatch, BotId, BotStats, EntityRef};

/// Single owner of the bot collection.
///
/// Bots have no cross-bot interaction, so a tick may run them in parallel.
/// Only `{id, config}` is persisted; positions and ledgers are rebuilt by
/// running.
pub struct BotRegistry {
    bots: HashMap<BotId, Bot>,
    store: Arc<dyn BotConfigStore>,
    sim: SimulatorConfig,
}

impl BotRegistry {
    pub fn new(store: Arc<dyn BotConfigStore>, sim: SimulatorConfig) -> Self {
        Self {
            bots: HashMap::new(),
            store,
            sim,
        }
    }

    /// Create a registry and load the persisted bots.
    pub async fn init(store: Arc<dyn BotConfigStore>, sim: SimulatorConfig) -> Result<Self> {
        let mut registry = Self::new(store, sim);
        let loaded = registry.load().await?;
        info!(bots = loaded, "Bot registry initialized");
        Ok(registry)
    }

    /// Register a new bot. `id` is generated when absent.
    ///
    /// Ids in the copy namespace are rejected: copies never get a state
    /// machine of their own.
    pub fn create_bot(&mut self, config: BotConfig, id: Option<&str>) -> Result<BotId, SimError> {
        let id = match id {
            Some(raw) => match EntityRef::parse(raw) {
                EntityRef::Copy(copy) => {
                    return Err(SimError::ReservedCopyId(copy.to_string()));
                }
                EntityRef::Bot(id) if id.as_str().is_empty() => {
                    return Err(SimError::InvalidConfig("bot id must not be empty".into()));
                }
                EntityRef::Bot(id) => id,
            },
            None => BotId::generate(),
        };

        if self.bots.contains_key(&id) {
            return Err(SimError::DuplicateBot(id.to_string()));
        }

        let validation = validate_configuration(&config, &self.sim.calculator)?;
        for warning in &validation.warnings {
            warn!(bot = %id, warning = %warning, "Bot configuration warning");
        }

        info!(
            bot = %id,
            name = %config.name,
            pair = %config.pair,
            expected_daily = validation.expected.expected_daily_pct,
            "Bot created"
        );
        self.bots.insert(id.clone(), Bot::new(id.clone(), config));
        Ok(id)
    }

    /// Apply a partial config update. The patched config is re-validated;
    /// on failure the bot keeps its old config.
    pub fn update_config(&mut self, id: &BotId, patch: &BotConfigPatch) -> Result<BotConfig, SimError> {
        let calculator = &self.sim.calculator;
        let bot = self
            .bots
            .get_mut(id)
            .ok_or_else(|| SimError::BotNotFound(id.to_string()))?;

        let config = patch.apply(bot.config());
        validate_configuration(&config, calculator)?;
        bot.replace_config(config.clone());

        info!(bot = %id, "Bot configuration updated");
        Ok(config)
    }

    /// Remove a bot and its persisted record.
    pub async fn delete_bot(&mut self, id: &BotId) -> Result<()> {
        if self.bots.remove(id).is_none() {
            return Err(SimError::BotNotFound(id.to_string()).into());
        }
        self.store
            .delete(id)
            .await
            .with_context(|| format!("Failed to delete stored bot {}", id))?;

        info!(bot = %id, "Bot deleted");
        Ok(())
    }

    /// Advance every bot to `now`.
    pub fn tick(&mut self, prices: &PriceMap, now: DateTime<Utc>) -> TickReport {
        let sim = &self.sim;
        let report = self
            .bots
            .par_iter_mut()
            .map(|(_, bot)| bot.tick(prices, now, sim))
            .reduce(TickReport::default, |a, b| a + b);

        if report != TickReport::default() {
            debug!(closed = report.closed, opened = report.opened, "Registry tick");
        }
        report
    }

    pub fn get(&self, id: &BotId) -> Option<&Bot> {
        self.bots.get(id)
    }

    pub fn contains(&self, id: &BotId) -> bool {
        self.bots.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.bots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bots.is_empty()
    }

    /// Registered ids, sorted.
    pub fn ids(&self) -> Vec<BotId> {
        let mut ids: Vec<BotId> = self.bots.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Distinct trading pairs across all bots.
    pub fn pairs(&self) -> Vec<String> {
        let mut pairs: Vec<String> = self.bots.values().map(|b| b.config().pair.clone()).collect();
        pairs.sort();
        pairs.dedup();
        pairs
    }

    pub fn stats(&self, id: &BotId) -> Option<BotStats> {
        self.bots.get(id).map(Bot::stats)
    }

    /// Stats of every bot, ordered by id.
    pub fn all_stats(&self) -> Vec<BotStats> {
        self.ids()
            .iter()
            .filter_map(|id| self.stats(id))
            .collect()
    }

    pub fn aggregated_stats(&self) -> AggregatedStats {
        MetricsCalculator::aggregate(&self.all_stats())
    }

    /// Persist `{id, config}` for every bot.
    pub async fn save(&self) -> Result<()> {
        let records: Vec<BotRecord> = self
            .ids()
            .into_iter()
            .filter_map(|id| {
                let config = self.bots.get(&id)?.config().clone();
                Some(BotRecord { id, config })
            })
            .collect();

        self.store
            .save_all(&records)
            .await
            .context("Failed to save bot configurations")?;
        debug!(bots = records.len(), "Bot configurations saved");
        Ok(())
    }

    /// Load stored bots. Known ids get the stored config; unknown ids get a
    /// fresh bot. Records that fail validation are skipped.
    pub async fn load(&mut self) -> Result<usize> {
        let records = self
            .store
            .load_all()
            .await
            .context("Failed to load bot configurations")?;

        let mut loaded = 0;
        for BotRecord { id, config } in records {
            if let EntityRef::Copy(_) = EntityRef::parse(id.as_str()) {
                warn!(id = %id, "Skipping stored bot with a copy id");
                continue;
            }
            if let Err(e) = validate_configuration(&config, &self.sim.calculator) {
                warn!(bot = %id, error = %e, "Skipping stored bot with invalid config");
                continue;
            }

            match self.bots.get_mut(&id) {
                Some(bot) => bot.replace_config(config),
                None => {
                    self.bots.insert(id.clone(), Bot::new(id, config));
                }
            }
            loaded += 1;
        }

        Ok(loaded)
    }

    /// Persist and release.
    pub async fn shutdown(&self) -> Result<()> {
        self.save().await?;
        info!(bots = self.bots.len(), "Bot registry shut down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use chrono::Duration;

    fn registry() -> (BotRegistry, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let registry = BotRegistry::new(store.clone(), SimulatorConfig::default());
        (registry, store)
    }

    fn config(seed: u64) -> BotConfig {
        BotConfig {
            seed: Some(seed),
            open_frequency: 0.5,
            ..Default::default()
        }
    }

    #[test]
    fn test_copy_ids_rejected() {
        let (mut registry, _) = registry();
        let err = registry.create_bot(config(1), Some("copy_123")).unwrap_err();
        assert!(matches!(err, SimError::ReservedCopyId(_)));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_duplicate_and_invalid_rejected() {
        let (mut registry, _) = registry();
        let id = registry.create_bot(config(1), Some("btc-scalper")).unwrap();
        assert_eq!(id.as_str(), "btc-scalper");

        let err = registry.create_bot(config(2), Some("btc-scalper")).unwrap_err();
        assert!(matches!(err, SimError::DuplicateBot(_)));

        let bad = BotConfig {
            win_rate: 1.0,
            ..config(3)
        };
        assert!(matches!(
            registry.create_bot(bad, None),
            Err(SimError::InvalidConfig(_))
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_update_config_validates() {
        let (mut registry, _) = registry();
        let id = registry.create_bot(config(1), None).unwrap();

        let patch = BotConfigPatch {
            daily_target_percent: Some(3.0),
            ..Default::default()
        };
        let updated = registry.update_config(&id, &patch).unwrap();
        assert_eq!(updated.daily_target_percent, 3.0);

        let bad = BotConfigPatch {
            min_position_size: Some(1_000.0),
            ..Default::default()
        };
        assert!(registry.update_config(&id, &bad).is_err());
        assert_eq!(registry.get(&id).unwrap().config().daily_target_percent, 3.0);

        let missing = BotId::from_raw("nope");
        assert!(matches!(
            registry.update_config(&missing, &patch),
            Err(SimError::BotNotFound(_))
        ));
    }

    #[test]
    fn test_tick_fans_out_and_aggregates() {
        let (mut registry, _) = registry();
        let a = registry.create_bot(config(1), Some("a")).unwrap();
        registry
            .create_bot(
                BotConfig {
                    pair: "ETH/USDT".into(),
                    ..config(2)
                },
                Some("b"),
            )
            .unwrap();

        let prices = PriceMap::from([("BTCUSDT".to_string(), 60_000.0), ("ETHUSDT".to_string(), 3_000.0)]);
        let start = Utc::now();
        let mut opened = 0;
        for i in 0..2_000 {
            opened += registry.tick(&prices, start + Duration::seconds(i * 5)).opened;
        }

        let agg = registry.aggregated_stats();
        assert_eq!(agg.total_bots, 2);
        assert!(opened > 0);
        assert!(agg.total_trades > 0);
        assert!(agg.total_pnl.is_finite());
        assert_eq!(registry.all_stats()[0].id, a.as_str());
        assert_eq!(registry.pairs(), vec!["BTC/USDT", "ETH/USDT"]);
    }

    #[tokio::test]
    async fn test_save_load_persists_configs_only() {
        let (mut registry, store) = registry();
        registry.create_bot(config(1), Some("a")).unwrap();
        registry.create_bot(config(2), Some("b")).unwrap();
        registry.save().await.unwrap();

        let mut restored = BotRegistry::new(store.clone(), SimulatorConfig::default());
        assert_eq!(restored.load().await.unwrap(), 2);
        assert_eq!(restored.ids(), registry.ids());
        assert!(restored.all_stats().iter().all(|s| s.total_trades == 0));
    }

    #[test]
    fn test_pair_update_keeps_old_positions_on_their_pair() {
        let (mut registry, _) = registry();
        let id = registry
            .create_bot(
                BotConfig {
                    open_frequency: 1.0,
                    max_concurrent_positions: 1,
                    ..config(4)
                },
                Some("switcher"),
            )
            .unwrap();

        let prices = PriceMap::from([("BTCUSDT".to_string(), 60_000.0), ("ETHUSDT".to_string(), 3_000.0)]);
        let t0 = Utc::now();
        registry.tick(&prices, t0);
        assert_eq!(registry.get(&id).unwrap().positions().len(), 1);

        let patch = BotConfigPatch {
            pair: Some("ETH/USDT".into()),
            ..Default::default()
        };
        registry.update_config(&id, &patch).unwrap();
        registry.tick(&prices, t0 + Duration::seconds(1));

        let bot = registry.get(&id).unwrap();
        let position = &bot.positions()[0];
        assert_eq!(bot.config().pair, "ETH/USDT");
        assert_eq!(position.pair, "BTC/USDT");
        assert_eq!(position.current_price, 60_000.0);
        assert!(position.unrealized_pnl_pct.abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_load_skips_copy_ids_and_invalid_configs() {
        let (mut registry, store) = registry();
        store
            .save_all(&[
                BotRecord {
                    id: BotId::from_raw("good"),
                    config: config(1),
                },
                BotRecord {
                    id: BotId::from_raw("copy_abc"),
                    config: config(2),
                },
                BotRecord {
                    id: BotId::from_raw("broken"),
                    config: BotConfig {
                        win_rate: 1.5,
                        ..config(3)
                    },
                },
            ])
            .await
            .unwrap();

        assert_eq!(registry.load().await.unwrap(), 1);
        assert_eq!(registry.ids(), vec![BotId::from_raw("good")]);
    }

    #[tokio::test]
    async fn test_load_replaces_config_of_known_bot() {
        let (mut registry, store) = registry();
        let id = registry
            .create_bot(
                BotConfig {
                    open_frequency: 1.0,
                    ..config(5)
                },
                Some("known"),
            )
            .unwrap();
        let prices = PriceMap::from([("BTCUSDT".to_string(), 60_000.0)]);
        registry.tick(&prices, Utc::now());
        let open = registry.get(&id).unwrap().positions().len();
        assert!(open > 0);

        store
            .save_all(&[BotRecord {
                id: id.clone(),
                config: BotConfig {
                    name: "Reloaded".into(),
                    daily_target_percent: 2.0,
                    ..config(5)
                },
            }])
            .await
            .unwrap();

        assert_eq!(registry.load().await.unwrap(), 1);
        let bot = registry.get(&id).unwrap();
        assert_eq!(bot.config().name, "Reloaded");
        assert_eq!(bot.config().daily_target_percent, 2.0);
        assert_eq!(bot.positions().len(), open);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_removes_stored_record() {
        let (mut registry, store) = registry();
        let id = registry.create_bot(config(1), Some("a")).unwrap();
        registry.save().await.unwrap();

        registry.delete_bot(&id).await.unwrap();
        assert!(!registry.contains(&id));
        assert!(store.load_all().await.unwrap().is_empty());
        assert!(registry.delete_bot(&id).await.is_err());
    }
}
