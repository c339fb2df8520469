//! Streaming price feed with fixed-delay reconnect.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use backoff::backoff::Constant;
use futures::StreamExt;
use reqwest::Client;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use super::types::{parse_stream_message, TickerPrice};
use super::PriceMap;
use crate::models::normalize_symbol;

const BINANCE_WS_BASE: &str = "wss://stream.binance.com:9443";
const BINANCE_REST_TICKER: &str = "https://api.binance.com/api/v3/ticker/price";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Feed endpoints and reconnect policy.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub ws_url: String,
    pub rest_url: String,
    /// Fixed wait between reconnect attempts; retries never stop
    pub reconnect_delay: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            ws_url: BINANCE_WS_BASE.to_string(),
            rest_url: BINANCE_REST_TICKER.to_string(),
            reconnect_delay: Duration::from_secs(5),
        }
    }
}

type Listener = Arc<dyn Fn(&PriceMap) + Send + Sync>;

/// State shared between the feed handle, its task and subscriptions.
#[derive(Default)]
struct Shared {
    prices: RwLock<PriceMap>,
    listeners: Mutex<HashMap<u64, Listener>>,
    next_listener: AtomicU64,
    connected: AtomicBool,
}

impl Shared {
    fn listeners(&self) -> MutexGuard<'_, HashMap<u64, Listener>> {
        self.listeners.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn snapshot(&self) -> PriceMap {
        self.prices
            .read()
            .map(|p| p.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }

    /// Store prices and notify every listener with the full map.
    fn record(&self, updates: impl IntoIterator<Item = (String, f64)>) {
        {
            let mut prices = self.prices.write().unwrap_or_else(|e| e.into_inner());
            let mut changed = false;
            for (symbol, price) in updates {
                prices.insert(symbol, price);
                changed = true;
            }
            if !changed {
                return;
            }
        }

        let snapshot = self.snapshot();
        let listeners: Vec<Listener> = self.listeners().values().cloned().collect();
        for listener in listeners {
            listener(&snapshot);
        }
    }
}

/// Handle returned by [`PriceFeed::subscribe`].
pub struct Subscription {
    id: u64,
    shared: Weak<Shared>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.listeners().remove(&self.id);
        }
    }
}

/// Latest-price feed for a fixed symbol set.
pub struct PriceFeed {
    symbols: Vec<String>,
    config: FeedConfig,
    client: Client,
    shared: Arc<Shared>,
    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PriceFeed {
    /// Create a feed for `symbols` (pairs like "BTC/USDT" are normalized).
    pub fn new(symbols: &[String], config: FeedConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        let mut seen = HashSet::new();
        let symbols = symbols
            .iter()
            .map(|s| normalize_symbol(s))
            .filter(|s| !s.is_empty() && seen.insert(s.clone()))
            .collect();

        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            symbols,
            config,
            client,
            shared: Arc::new(Shared::default()),
            shutdown_tx,
            task: Mutex::new(None),
        })
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    /// Start the background stream. Calling it again while running is a no-op.
    pub fn connect(&self) -> Result<()> {
        if self.symbols.is_empty() {
            return Err(anyhow!("price feed has no symbols to track"));
        }

        let mut task = self.task.lock().unwrap_or_else(|e| e.into_inner());
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return Ok(());
        }

        let session = Session {
            symbols: self.symbols.clone(),
            config: self.config.clone(),
            client: self.client.clone(),
            shared: Arc::clone(&self.shared),
        };
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let delay = self.config.reconnect_delay;

        info!(symbols = ?self.symbols, "Starting price feed");
        *task = Some(tokio::spawn(async move {
            let policy = Constant::new(delay);
            let streaming = backoff::future::retry_notify(
                policy,
                || {
                    let session = session.clone();
                    async move { session.run().await.map_err(backoff::Error::transient) }
                },
                |e: anyhow::Error, wait: Duration| {
                    warn!(error = %e, retry_in = ?wait, "Price feed disconnected");
                },
            );

            tokio::select! {
                result = streaming => {
                    if let Err(e) = result {
                        warn!(error = %e, "Price feed stopped");
                    }
                }
                _ = shutdown_rx.changed() => {
                    debug!("Price feed shutdown requested");
                }
            }
        }));

        Ok(())
    }

    /// Register a callback invoked with the full price map on every update.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&PriceMap) + Send + Sync + 'static,
    {
        let id = self.shared.next_listener.fetch_add(1, Ordering::Relaxed);
        self.shared.listeners().insert(id, Arc::new(listener));
        Subscription {
            id,
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Latest known prices.
    pub fn prices(&self) -> PriceMap {
        self.shared.snapshot()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Relaxed)
    }

    /// Stop the stream task and wait for it to finish.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let handle = self.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Price feed task ended abnormally");
            }
        }
        self.shared.connected.store(false, Ordering::Relaxed);
        info!("Price feed stopped");
    }
}

/// One connect attempt: seed from REST, then stream until the link drops.
#[derive(Clone)]
struct Session {
    symbols: Vec<String>,
    config: FeedConfig,
    client: Client,
    shared: Arc<Shared>,
}

impl Session {
    async fn run(&self) -> Result<()> {
        if let Err(e) = self.seed().await {
            warn!(error = %e, "Failed to seed prices from REST");
        }

        let streams: Vec<String> = self
            .symbols
            .iter()
            .map(|s| format!("{}@miniTicker", s.to_lowercase()))
            .collect();
        let url = format!("{}/stream?streams={}", self.config.ws_url, streams.join("/"));

        let (ws, _) = connect_async(url.as_str())
            .await
            .with_context(|| format!("Failed to connect to {}", url))?;
        self.shared.connected.store(true, Ordering::Relaxed);
        info!(streams = streams.len(), "Price feed connected");

        let result = self.stream(ws).await;
        self.shared.connected.store(false, Ordering::Relaxed);
        result
    }

    async fn stream<S>(&self, mut ws: S) -> Result<()>
    where
        S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        let tracked: HashSet<&str> = self.symbols.iter().map(String::as_str).collect();

        while let Some(msg) = ws.next().await {
            match msg.context("WebSocket error")? {
                Message::Text(text) => {
                    if let Some((symbol, price)) = parse_stream_message(&text) {
                        if tracked.contains(symbol.as_str()) {
                            self.shared.record([(symbol, price)]);
                        }
                    }
                }
                Message::Close(frame) => {
                    return Err(anyhow!("closed by server: {:?}", frame));
                }
                _ => {}
            }
        }

        Err(anyhow!("stream ended"))
    }

    async fn seed(&self) -> Result<()> {
        let symbols = serde_json::to_string(&self.symbols)?;
        let tickers: Vec<TickerPrice> = self
            .client
            .get(&self.config.rest_url)
            .query(&[("symbols", symbols)])
            .send()
            .await
            .context("Failed to fetch ticker prices")?
            .error_for_status()
            .context("Ticker endpoint returned an error")?
            .json()
            .await
            .context("Failed to parse ticker prices")?;

        let prices: Vec<(String, f64)> = tickers.iter().filter_map(TickerPrice::parsed).collect();
        debug!(count = prices.len(), "Seeded prices from REST");
        self.shared.record(prices);
        Ok(())
    }
}
