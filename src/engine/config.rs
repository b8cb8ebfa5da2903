//! Engine configuration options.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Highest leverage a position may open with.
    pub max_leverage: u32,
    /// Buffer that pulls the liquidation price toward entry.
    pub security_margin: Decimal,
    /// Positions closer than this (percent of price) to liquidation are flagged high risk.
    pub high_risk_distance_pct: Decimal,
    /// Maximum number of events to retain in memory.
    pub max_events: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_leverage: 20,
            security_margin: dec!(0.005),
            high_risk_distance_pct: dec!(5),
            max_events: 100_000,
        }
    }
}
