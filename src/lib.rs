// leverage-core: leveraged long/short position engine.
// liquidation-first accounting: margin leaves the balance at open and comes back
// at most once, never on a liquidation.
//
// file map (search X.0 for structs, X.1+ for logic):
//   1.x  types.rs: primitives: UserId, PositionId, Side, Price, Quote, Leverage
//   2.x  ledger.rs: per-user cash balance, atomic adjustments
//   3.x  store.rs: position persistence, OPEN→CLOSED compare-and-swap
//   4.x  position.rs: position struct, PnL, settlement rules, marks
//   4.5  liquidation.rs: liquidation price, breach predicate, risk distance
//   5.x  engine/: open, close, liquidate, deferred credits, read models
//   6.x  events.rs: state transition events for audit
//   7.x  config.rs: engine/sweeper/logging settings from TOML
//   8.x  sweeper.rs: periodic liquidation task
//   9.x  price_feed.rs: quote source trait + in-memory feed

// core accounting modules
pub mod engine;
pub mod events;
pub mod ledger;
pub mod liquidation;
pub mod position;
pub mod store;
pub mod types;

// runtime and integration modules
pub mod config;
pub mod price_feed;
pub mod sweeper;

// re exports for convenience
pub use config::{AppConfig, ConfigError, LoggingConfig};
pub use engine::*;
pub use events::*;
pub use ledger::*;
pub use liquidation::*;
pub use position::*;
pub use price_feed::{InMemoryPriceSource, PriceFeedError, PriceSource, Ticker, SUPPORTED_SYMBOLS};
pub use store::*;
pub use sweeper::{LiquidationSweeper, SweepReport, SweeperConfig, SweeperHandle};
pub use types::*;
