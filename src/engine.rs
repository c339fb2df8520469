//! Engine: wires the price feed, bot registry and copy book into one loop.
//!
//! Handles:
//! - Receiving price maps from the feed (never blocking a tick on the network)
//! - Ticking every bot on a fixed interval
//! - Settling closing copies
//! - Periodically persisting bot configurations

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::db::Database;
use crate::feed::{FeedConfig, PriceFeed, PriceMap};
use crate::trading::{BotRegistry, CopyBook, SimulatorConfig};

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Database URL
    pub database_url: String,

    pub feed: FeedConfig,

    pub sim: SimulatorConfig,

    /// How often bots are ticked
    pub tick_interval: Duration,

    /// How often configurations are persisted
    pub save_interval: Duration,

    /// How often a status line is printed
    pub status_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite:copysim.db?mode=rwc".to_string(),
            feed: FeedConfig::default(),
            sim: SimulatorConfig::default(),
            tick_interval: Duration::from_secs(1),
            save_interval: Duration::from_secs(60),
            status_interval: Duration::from_secs(30),
        }
    }
}

/// Running simulator. Owns the registry by value, so ticks, reads and
/// saves never overlap.
pub struct Engine {
    config: EngineConfig,
    registry: BotRegistry,
    copies: CopyBook,
    shutdown: Arc<AtomicBool>,
}

impl Engine {
    /// Open storage and load persisted bots.
    pub async fn init(config: EngineConfig) -> Result<Self> {
        info!("Initializing engine...");
        let db = Arc::new(Database::new(&config.database_url).await?);
        let registry = BotRegistry::init(db.clone(), config.sim.clone()).await?;
        let copies = CopyBook::new(db);

        Ok(Self {
            config,
            registry,
            copies,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn registry(&self) -> &BotRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut BotRegistry {
        &mut self.registry
    }

    pub fn copies(&self) -> &CopyBook {
        &self.copies
    }

    /// Run until ctrl-c or the shutdown signal is raised.
    pub async fn run(&mut self) -> Result<()> {
        if self.registry.is_empty() {
            bail!("No bots registered. Create one with `create-bot` first.");
        }

        let feed = PriceFeed::new(&self.registry.pairs(), self.config.feed.clone())?;
        let (tx, mut rx) = mpsc::unbounded_channel::<PriceMap>();
        let subscription = feed.subscribe(move |prices| {
            let _ = tx.send(prices.clone());
        });
        feed.connect()?;

        info!(
            bots = self.registry.len(),
            symbols = ?feed.symbols(),
            tick_ms = self.config.tick_interval.as_millis() as u64,
            "Starting engine run loop"
        );

        // Register shutdown handler
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutdown signal received");
            shutdown.store(true, Ordering::SeqCst);
        });

        let mut tick_timer = interval(self.config.tick_interval);
        tick_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut save_timer = interval(self.config.save_interval);
        save_timer.tick().await;
        let mut status_timer = interval(self.config.status_interval);
        status_timer.tick().await;

        let mut latest = PriceMap::new();

        while !self.shutdown.load(Ordering::SeqCst) {
            tokio::select! {
                Some(prices) = rx.recv() => {
                    latest = prices;
                    // Coalesce bursts; only the newest map matters
                    while let Ok(newer) = rx.try_recv() {
                        latest = newer;
                    }
                }
                _ = tick_timer.tick() => {
                    if let Err(e) = self.tick(&latest).await {
                        error!(error = %e, "Error in engine tick");
                    }
                }
                _ = save_timer.tick() => {
                    if let Err(e) = self.registry.save().await {
                        warn!(error = %e, "Failed to persist bots");
                    }
                }
                _ = status_timer.tick() => {
                    self.print_status(feed.is_connected());
                }
            }
        }

        subscription.unsubscribe();
        feed.shutdown().await;
        self.shutdown().await
    }

    /// Single iteration of the main loop.
    async fn tick(&mut self, prices: &PriceMap) -> Result<()> {
        let now = Utc::now();
        let report = self.registry.tick(prices, now);
        if report.closed > 0 || report.opened > 0 {
            debug!(closed = report.closed, opened = report.opened, "Engine tick");
        }

        for copy in self.copies.settle(&self.registry, now).await? {
            info!(copy = %copy.id, "Copy settled");
        }
        Ok(())
    }

    fn print_status(&self, connected: bool) {
        let agg = self.registry.aggregated_stats();
        info!(
            connected = connected,
            bots = agg.total_bots,
            pnl = agg.total_pnl,
            positions = agg.total_positions,
            trades = agg.total_trades,
            "Status"
        );
        println!("[{}] {}", Utc::now().format("%H:%M:%S"), agg);
    }

    /// Persist state and stop.
    pub async fn shutdown(&mut self) -> Result<()> {
        info!("Shutting down engine...");
        self.registry.shutdown().await?;

        println!("\n{}", "=".repeat(50));
        println!("Final: {}", self.registry.aggregated_stats());
        println!("{}", "=".repeat(50));
        Ok(())
    }
}
