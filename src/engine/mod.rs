// 5.0: position engine. opens positions against the ledger, closes them through the
// store's compare-and-swap, and owes credits that could not be applied yet.

mod config;
mod core;
mod liquidations;
mod positions;
mod results;

pub use config::EngineConfig;
pub use core::{PendingCredit, PositionEngine};
pub use results::{EngineError, RecoveryResult, TradeSummary};
