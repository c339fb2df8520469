//! Live price feed: latest price per symbol, pushed to subscribers.

mod price_feed;
mod types;

use std::collections::HashMap;

pub use price_feed::{FeedConfig, PriceFeed, Subscription};
pub use types::{parse_stream_message, MiniTicker, StreamEnvelope, TickerPrice};

/// Latest price per normalized symbol (e.g. "BTCUSDT").
pub type PriceMap = HashMap<String, f64>;
