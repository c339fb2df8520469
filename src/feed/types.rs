//! Wire types for the Binance market-data endpoints.

use serde::Deserialize;
use tracing::warn;

/// Combined-stream wrapper: `{"stream": "...", "data": {...}}`.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamEnvelope {
    pub stream: String,
    pub data: MiniTicker,
}

/// 24h mini ticker. Prices arrive as decimal strings.
#[derive(Debug, Clone, Deserialize)]
pub struct MiniTicker {
    /// Symbol, e.g. "BTCUSDT"
    #[serde(rename = "s")]
    pub symbol: String,

    /// Last (close) price
    #[serde(rename = "c")]
    pub close: String,
}

/// REST `/api/v3/ticker/price` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct TickerPrice {
    pub symbol: String,
    pub price: String,
}

impl TickerPrice {
    pub fn parsed(&self) -> Option<(String, f64)> {
        parse_price(&self.symbol, &self.price)
    }
}

/// Parse one stream message into `(symbol, price)`.
///
/// Anything that is not a well-formed ticker with a positive finite price
/// is dropped with a warning.
pub fn parse_stream_message(text: &str) -> Option<(String, f64)> {
    let envelope: StreamEnvelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(error = %e, "Dropping malformed feed message");
            return None;
        }
    };
    let parsed = parse_price(&envelope.data.symbol, &envelope.data.close);
    if parsed.is_none() {
        warn!(stream = %envelope.stream, price = %envelope.data.close, "Dropping unusable price");
    }
    parsed
}

fn parse_price(symbol: &str, raw: &str) -> Option<(String, f64)> {
    let price: f64 = raw.trim().parse().ok()?;
    if !(price.is_finite() && price > 0.0) || symbol.is_empty() {
        return None;
    }
    Some((symbol.to_uppercase(), price))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mini_ticker() {
        let msg = r#"{"stream":"btcusdt@miniTicker","data":{"e":"24hrMiniTicker","E":1,"s":"BTCUSDT","c":"64250.10","o":"1","h":"2","l":"0.5","v":"10","q":"20"}}"#;
        let (symbol, price) = parse_stream_message(msg).unwrap();
        assert_eq!(symbol, "BTCUSDT");
        assert!((price - 64250.10).abs() < 1e-9);
    }

    #[test]
    fn test_malformed_dropped() {
        assert!(parse_stream_message("not json").is_none());
        assert!(parse_stream_message(r#"{"result":null,"id":1}"#).is_none());
        assert!(parse_stream_message(r#"{"stream":"x","data":{"s":"BTCUSDT","c":"abc"}}"#).is_none());
        assert!(parse_stream_message(r#"{"stream":"x","data":{"s":"BTCUSDT","c":"-1"}}"#).is_none());
        assert!(parse_stream_message(r#"{"stream":"x","data":{"s":"BTCUSDT","c":"NaN"}}"#).is_none());
    }

    #[test]
    fn test_rest_ticker() {
        let tickers: Vec<TickerPrice> =
            serde_json::from_str(r#"[{"symbol":"ETHUSDT","price":"3120.50000000"}]"#).unwrap();
        assert_eq!(tickers[0].parsed(), Some(("ETHUSDT".to_string(), 3120.5)));
    }
}
