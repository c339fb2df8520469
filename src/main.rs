//! Copy-Trading Bot Simulator
//!
//! Runs simulated trading bots whose realized P&L converges to a daily
//! target, and projects user copies proportionally onto their master bot.

mod bot;
mod db;
mod engine;
mod error;
mod feed;
mod guard;
mod metrics;
mod models;
mod simulate;
mod trading;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use rust_decimal::Decimal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::engine::{Engine, EngineConfig};
use crate::feed::FeedConfig;
use crate::models::{BotConfig, BotConfigPatch, BotId, CopyId, CopyStatus, EntityRef, Side};
use crate::simulate::{Simulation, SimulationConfig};
use crate::trading::{validate_configuration, SimulatorConfig};

/// Copy-trading bot simulator CLI.
#[derive(Parser)]
#[command(name = "copysim")]
#[command(about = "Simulated trading bots with proportional user copies", long_about = None)]
struct Cli {
    /// Database URL
    #[arg(short, long, env = "COPYSIM_DATABASE", default_value = "sqlite:./copysim.db?mode=rwc")]
    database: String,

    /// Log level used when RUST_LOG is not set (trace, debug, info, warn, error)
    #[arg(short, long, env = "COPYSIM_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// JSON file with calculator and friction tuning
    #[arg(long, env = "COPYSIM_SIM_CONFIG")]
    sim_config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Bot configuration fields settable from the command line.
#[derive(Args, Debug, Clone, Default)]
struct BotFields {
    /// JSON file with a (partial) bot configuration; flags override it
    #[arg(short, long)]
    file: Option<PathBuf>,

    #[arg(long)]
    name: Option<String>,

    /// Trading pair, e.g. BTC/USDT
    #[arg(long)]
    pair: Option<String>,

    #[arg(long)]
    leverage: Option<f64>,

    /// Target win rate (0-1)
    #[arg(long)]
    win_rate: Option<f64>,

    /// Daily target, percent of capital
    #[arg(long)]
    daily_target: Option<f64>,

    #[arg(long)]
    trades_per_day: Option<f64>,

    /// Invested capital in USD
    #[arg(long)]
    capital: Option<f64>,

    #[arg(long)]
    min_size: Option<f64>,

    #[arg(long)]
    max_size: Option<f64>,

    #[arg(long)]
    max_positions: Option<usize>,

    /// Per-tick probability of opening a position
    #[arg(long)]
    open_frequency: Option<f64>,

    /// Allowed sides (LONG, SHORT); repeat for both
    #[arg(long, value_parser = parse_side)]
    side: Vec<Side>,

    #[arg(long)]
    seed: Option<u64>,
}

fn parse_side(raw: &str) -> Result<Side, String> {
    match raw.to_uppercase().as_str() {
        "LONG" => Ok(Side::Long),
        "SHORT" => Ok(Side::Short),
        other => Err(format!("unknown side '{}'", other)),
    }
}

impl BotFields {
    fn patch(&self) -> Result<BotConfigPatch> {
        let mut patch: BotConfigPatch = match &self.file {
            Some(path) => read_json(path)?,
            None => BotConfigPatch::default(),
        };

        macro_rules! set {
            ($($flag:ident => $field:ident),* $(,)?) => {
                $(if let Some(v) = self.$flag.clone() { patch.$field = Some(v); })*
            };
        }
        set!(
            name => name,
            pair => pair,
            leverage => leverage,
            win_rate => win_rate,
            daily_target => daily_target_percent,
            trades_per_day => trades_per_day,
            capital => invested_capital,
            min_size => min_position_size,
            max_size => max_position_size,
            max_positions => max_concurrent_positions,
            open_frequency => open_frequency,
            seed => seed,
        );
        if !self.side.is_empty() {
            patch.allowed_sides = Some(self.side.clone());
        }
        Ok(patch)
    }

    fn config(&self) -> Result<BotConfig> {
        Ok(self.patch()?.apply(&BotConfig::default()))
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Register a new bot
    CreateBot {
        /// Bot id; generated when omitted
        #[arg(long)]
        id: Option<String>,

        #[command(flatten)]
        fields: BotFields,
    },

    /// Update a bot's configuration
    UpdateBot {
        id: String,

        #[command(flatten)]
        fields: BotFields,
    },

    /// Delete a bot
    DeleteBot { id: String },

    /// List registered bots
    ListBots,

    /// Show stats for a bot or a copy
    Stats { id: String },

    /// Check a configuration's expected daily P&L without registering it
    Validate {
        #[command(flatten)]
        fields: BotFields,
    },

    /// Manage user copies
    Copy {
        #[command(subcommand)]
        command: CopyCommands,
    },

    /// Run the live simulator against the price feed
    Run {
        /// Tick interval in milliseconds
        #[arg(long, default_value = "1000")]
        tick_ms: u64,

        /// Persist interval in seconds
        #[arg(long, default_value = "60")]
        save_secs: u64,

        /// Status line interval in seconds
        #[arg(long, default_value = "30")]
        status_secs: u64,

        /// WebSocket base URL of the price stream
        #[arg(long, env = "COPYSIM_WS_URL")]
        ws_url: Option<String>,

        /// REST ticker URL used to seed prices
        #[arg(long, env = "COPYSIM_REST_URL")]
        rest_url: Option<String>,
    },

    /// Replay bots over a synthetic price path
    Simulate {
        /// Number of days
        #[arg(long, default_value = "7")]
        days: u32,

        /// Simulated seconds per tick
        #[arg(long, default_value = "10")]
        tick_secs: i64,

        /// Price path seed
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Bot ids to simulate; all registered bots when omitted
        #[arg(long = "bot")]
        bots: Vec<String>,
    },

    /// Print the effective simulator tuning as JSON
    Config,
}

#[derive(Subcommand)]
enum CopyCommands {
    /// Start copying a bot
    Create {
        #[arg(long)]
        user: String,

        #[arg(long)]
        bot: String,

        /// Invested amount in USD
        #[arg(long)]
        amount: Decimal,
    },

    /// Request a close; with --now, close immediately
    Close {
        id: String,

        #[arg(long)]
        now: bool,
    },

    /// Delete a closed copy
    Delete { id: String },

    /// List copies
    List {
        #[arg(long)]
        user: Option<String>,

        #[arg(long)]
        bot: Option<String>,
    },
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))
}

fn copy_id(raw: &str) -> Result<CopyId> {
    match EntityRef::parse(raw) {
        EntityRef::Copy(id) => Ok(id),
        EntityRef::Bot(_) => anyhow::bail!("'{}' is not a copy id", raw),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        format!("{}...", s.chars().take(max.saturating_sub(3)).collect::<String>())
    } else {
        s.to_string()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let sim: SimulatorConfig = match &cli.sim_config {
        Some(path) => read_json(path)?,
        None => SimulatorConfig::default(),
    };

    match cli.command {
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&sim)?);
        }

        Commands::Validate { fields } => {
            let config = fields.config()?;
            let validation = validate_configuration(&config, &sim.calculator)?;
            let e = validation.expected;

            println!("\n=== {} ({}) ===", config.name, config.pair);
            println!("Target:            {:.4}% / day", e.target_pct);
            println!("Expected:          {:.4}% / day", e.expected_daily_pct);
            println!("Deviation:         {:.2}%", e.deviation * 100.0);
            println!("Daily Std Dev:     {:.4}%", e.daily_std_dev);
            println!("Convergence Score: {:.3}", e.convergence_score);
            for warning in &validation.warnings {
                println!("Warning: {}", warning);
            }
        }

        Commands::Simulate {
            days,
            tick_secs,
            seed,
            bots,
        } => {
            let engine = Engine::init(engine_config(&cli.database, sim.clone())).await?;
            let registry = engine.registry();

            let mut selected = Vec::new();
            for id in registry.ids() {
                if bots.is_empty() || bots.iter().any(|b| b == id.as_str()) {
                    if let Some(bot) = registry.get(&id) {
                        selected.push((Some(id.to_string()), bot.config().clone()));
                    }
                }
            }
            if selected.is_empty() {
                info!("No registered bots selected, simulating the default configuration");
                selected.push((None, BotConfig::default()));
            }

            let config = SimulationConfig {
                days,
                tick_secs,
                seed,
                sim,
                ..Default::default()
            };
            let report = Simulation::run(selected, &config)?;
            println!("{}", report);
        }

        Commands::Run {
            tick_ms,
            save_secs,
            status_secs,
            ws_url,
            rest_url,
        } => {
            let mut config = engine_config(&cli.database, sim);
            config.tick_interval = Duration::from_millis(tick_ms.max(10));
            config.save_interval = Duration::from_secs(save_secs.max(1));
            config.status_interval = Duration::from_secs(status_secs.max(1));
            config.feed = FeedConfig {
                ws_url: ws_url.unwrap_or(config.feed.ws_url),
                rest_url: rest_url.unwrap_or(config.feed.rest_url),
                ..config.feed
            };

            info!(database = %cli.database, "Starting simulator");
            let mut engine = Engine::init(config).await?;
            engine.run().await?;
        }

        command => {
            let mut engine = Engine::init(engine_config(&cli.database, sim)).await?;
            manage(&mut engine, command).await?;
        }
    }

    Ok(())
}

fn engine_config(database_url: &str, sim: SimulatorConfig) -> EngineConfig {
    EngineConfig {
        database_url: database_url.to_string(),
        sim,
        ..Default::default()
    }
}

/// One-shot management commands against the persisted state.
async fn manage(engine: &mut Engine, command: Commands) -> Result<()> {
    let now = Utc::now();

    match command {
        Commands::CreateBot { id, fields } => {
            let config = fields.config()?;
            let id = engine.registry_mut().create_bot(config, id.as_deref())?;
            engine.registry().save().await?;
            println!("Created bot: {}", id);
        }

        Commands::UpdateBot { id, fields } => {
            let id = BotId::from_raw(id);
            let config = engine.registry_mut().update_config(&id, &fields.patch()?)?;
            engine.registry().save().await?;
            println!("Updated bot: {}", id);
            println!("{}", serde_json::to_string_pretty(&config)?);
        }

        Commands::DeleteBot { id } => {
            let id = BotId::from_raw(id);
            engine.registry_mut().delete_bot(&id).await?;
            println!("Deleted bot: {}", id);
        }

        Commands::ListBots => {
            let registry = engine.registry();
            if registry.is_empty() {
                println!("No bots registered. Use 'copysim create-bot' to add one.");
                return Ok(());
            }

            println!(
                "\n{:<38} {:<20} {:<10} {:>6} {:>8} {:>8} {:>12}",
                "ID", "NAME", "PAIR", "LEV", "WIN%", "TARGET", "CAPITAL"
            );
            println!("{}", "-".repeat(108));
            for id in registry.ids() {
                if let Some(bot) = registry.get(&id) {
                    let c = bot.config();
                    println!(
                        "{:<38} {:<20} {:<10} {:>5.0}x {:>7.1}% {:>7.2}% {:>12.2}",
                        truncate(id.as_str(), 36),
                        truncate(&c.name, 18),
                        c.pair,
                        c.leverage,
                        c.win_rate * 100.0,
                        c.daily_target_percent,
                        c.invested_capital
                    );
                }
            }
        }

        Commands::Stats { id } => {
            let stats = engine.copies().stats_for(&id, engine.registry()).await?;
            println!("\n{}", stats);
        }

        Commands::Copy { command } => manage_copies(engine, command, now).await?,

        Commands::Config
        | Commands::Validate { .. }
        | Commands::Run { .. }
        | Commands::Simulate { .. } => anyhow::bail!("not a management command"),
    }

    Ok(())
}

async fn manage_copies(
    engine: &mut Engine,
    command: CopyCommands,
    now: chrono::DateTime<Utc>,
) -> Result<()> {
    let registry = engine.registry();
    let copies = engine.copies();

    match command {
        CopyCommands::Create { user, bot, amount } => {
            let bot = match EntityRef::parse(&bot) {
                EntityRef::Bot(id) => id,
                EntityRef::Copy(_) => anyhow::bail!("cannot copy a copy: '{}'", bot),
            };
            let copy = copies.create(registry, &user, &bot, amount, now).await?;
            println!("Created copy: {}", copy.id);
        }

        CopyCommands::Close { id, now: immediate } => {
            let id = copy_id(&id)?;
            let copy = if immediate {
                copies.close_now(&id, registry, now).await?
            } else {
                copies.request_close(&id, now).await?
            };
            println!("Copy {} is {}", copy.id, copy.status);
            if let Some(snapshot) = copy.snapshot {
                println!("Final P&L:   ${:.2}", snapshot.final_pnl);
                println!("Final Value: ${:.2}", snapshot.final_value);
            }
        }

        CopyCommands::Delete { id } => {
            let id = copy_id(&id)?;
            copies.delete(&id).await?;
            println!("Deleted copy: {}", id);
        }

        CopyCommands::List { user, bot } => {
            let list = match (user, bot) {
                (Some(user), _) => copies.list_for_user(&user).await?,
                (None, Some(bot)) => copies.list_for_bot(&BotId::from_raw(bot)).await?,
                (None, None) => copies.list_all().await?,
            };

            println!(
                "\n{:<40} {:<16} {:<24} {:>12} {:<8}",
                "ID", "USER", "BOT", "INVESTED", "STATUS"
            );
            println!("{}", "-".repeat(104));
            for copy in list {
                println!(
                    "{:<40} {:<16} {:<24} {:>12.2} {:<8}",
                    copy.id,
                    truncate(&copy.user_id, 14),
                    truncate(copy.bot_id.as_str(), 22),
                    copy.invested_amount,
                    copy.status
                );
                if copy.status == CopyStatus::Closed {
                    if let Some(s) = copy.snapshot {
                        println!("    final P&L ${:.2}, final value ${:.2}", s.final_pnl, s.final_value);
                    }
                }
            }
        }
    }

    Ok(())
}
