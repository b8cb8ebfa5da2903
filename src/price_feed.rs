// Price Feed Integration
//
// The engine does not know where quotes come from. Anything that can answer
// "what is SYMBOL trading at right now" implements `PriceSource`. A missing quote
// is a normal condition: callers skip the symbol and ask again later.

use crate::types::Price;
use async_trait::async_trait;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Current quote for one instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticker {
    pub price: Price,
    /// Percent change over the last 24h, signed.
    pub change_24h: Decimal,
}

impl Ticker {
    pub fn new(price: Price, change_24h: Decimal) -> Self {
        Self { price, change_24h }
    }
}

#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn ticker(&self, symbol: &str) -> Result<Ticker, PriceFeedError>;
}

/// Instruments the simulation trades, with the reference price used to seed a feed.
pub const SUPPORTED_SYMBOLS: [(&str, Decimal); 10] = [
    ("BTC/USD", dec!(65000)),
    ("ETH/USD", dec!(3500)),
    ("SOL/USD", dec!(150)),
    ("BNB/USD", dec!(600)),
    ("XRP/USD", dec!(0.5)),
    ("ADA/USD", dec!(0.4)),
    ("DOGE/USD", dec!(0.15)),
    ("DOT/USD", dec!(7)),
    ("AVAX/USD", dec!(35)),
    ("MATIC/USD", dec!(0.8)),
];

pub fn is_supported(symbol: &str) -> bool {
    SUPPORTED_SYMBOLS.iter().any(|(s, _)| *s == symbol)
}

/// Settable feed. tests and the simulator move prices by hand.
#[derive(Debug, Default)]
pub struct InMemoryPriceSource {
    tickers: RwLock<HashMap<String, Ticker>>,
    unavailable: RwLock<HashSet<String>>,
}

impl InMemoryPriceSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed seeded with every supported symbol at its reference price, flat on the day.
    pub fn with_reference_prices() -> Self {
        let feed = Self::new();
        for (symbol, price) in SUPPORTED_SYMBOLS {
            feed.set_ticker(symbol, Ticker::new(Price::new_unchecked(price), Decimal::ZERO));
        }
        feed
    }

    pub fn set_price(&self, symbol: &str, price: Price) {
        let mut tickers = self.tickers.write();
        let change_24h = tickers
            .get(symbol)
            .map(|t| t.change_24h)
            .unwrap_or(Decimal::ZERO);
        tickers.insert(symbol.to_string(), Ticker::new(price, change_24h));
    }

    pub fn set_ticker(&self, symbol: &str, ticker: Ticker) {
        self.tickers.write().insert(symbol.to_string(), ticker);
    }

    /// Makes the symbol fail until `set_available` is called.
    pub fn set_unavailable(&self, symbol: &str) {
        self.unavailable.write().insert(symbol.to_string());
    }

    pub fn set_available(&self, symbol: &str) {
        self.unavailable.write().remove(symbol);
    }
}

#[async_trait]
impl PriceSource for InMemoryPriceSource {
    async fn ticker(&self, symbol: &str) -> Result<Ticker, PriceFeedError> {
        if self.unavailable.read().contains(symbol) {
            return Err(PriceFeedError::Unavailable(symbol.to_string()));
        }
        self.tickers
            .read()
            .get(symbol)
            .copied()
            .ok_or_else(|| PriceFeedError::Unavailable(symbol.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PriceFeedError {
    #[error("No quote available for {0}")]
    Unavailable(String),

    #[error("Quote for {symbol} timed out after {timeout_ms}ms")]
    Timeout { symbol: String, timeout_ms: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reference_feed_covers_catalog() {
        let feed = InMemoryPriceSource::with_reference_prices();
        let btc = feed.ticker("BTC/USD").await.unwrap();
        assert_eq!(btc.price.value(), dec!(65000));
        assert_eq!(btc.change_24h, Decimal::ZERO);
        assert!(is_supported("DOGE/USD"));
        assert!(!is_supported("LUNA/USD"));
    }

    #[tokio::test]
    async fn set_price_keeps_daily_change() {
        let feed = InMemoryPriceSource::new();
        feed.set_ticker("SOL/USD", Ticker::new(Price::new_unchecked(dec!(150)), dec!(-3.5)));
        feed.set_price("SOL/USD", Price::new_unchecked(dec!(140)));

        let t = feed.ticker("SOL/USD").await.unwrap();
        assert_eq!(t.price.value(), dec!(140));
        assert_eq!(t.change_24h, dec!(-3.5));
    }

    #[tokio::test]
    async fn unavailable_symbol_is_recoverable() {
        let feed = InMemoryPriceSource::with_reference_prices();
        feed.set_unavailable("ETH/USD");
        assert_eq!(
            feed.ticker("ETH/USD").await,
            Err(PriceFeedError::Unavailable("ETH/USD".into()))
        );

        feed.set_available("ETH/USD");
        assert!(feed.ticker("ETH/USD").await.is_ok());
        assert!(feed.ticker("UNKNOWN").await.is_err());
    }
}
