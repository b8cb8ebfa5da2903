//! Liquidation sweeper.
//!
//! Re-evaluates every open position against a fresh quote for its symbol and
//! force-closes the ones past their liquidation price. One cycle can be driven by
//! hand with [`LiquidationSweeper::run_cycle`]; [`LiquidationSweeper::spawn`] runs
//! it on an interval until the returned handle is stopped.
//!
//! A cycle never fails as a whole. A symbol without a quote is skipped until the
//! next cycle, and every forced close is attempted on its own.

use crate::engine::{EngineError, PositionEngine};
use crate::position::Position;
use crate::price_feed::{PriceFeedError, PriceSource, Ticker};
use crate::types::PositionId;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweeperConfig {
    /// Seconds between cycles.
    pub interval_secs: u64,
    /// Upper bound on a single quote fetch.
    pub quote_timeout_ms: u64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval_secs: 10,
            quote_timeout_ms: 2_000,
        }
    }
}

/// What one cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Open positions checked against a quote.
    pub evaluated: usize,
    pub liquidated: Vec<PositionId>,
    /// Breached positions somebody else closed first.
    pub lost_races: Vec<PositionId>,
    pub failed: Vec<(PositionId, EngineError)>,
    pub skipped_symbols: Vec<String>,
    pub recovered_credits: usize,
}

impl SweepReport {
    pub fn is_quiet(&self) -> bool {
        self.liquidated.is_empty()
            && self.lost_races.is_empty()
            && self.failed.is_empty()
            && self.skipped_symbols.is_empty()
            && self.recovered_credits == 0
    }
}

pub struct LiquidationSweeper {
    engine: Arc<PositionEngine>,
    prices: Arc<dyn PriceSource>,
    config: SweeperConfig,
}

impl LiquidationSweeper {
    pub fn new(engine: Arc<PositionEngine>, prices: Arc<dyn PriceSource>, config: SweeperConfig) -> Self {
        Self {
            engine,
            prices,
            config,
        }
    }

    pub fn config(&self) -> &SweeperConfig {
        &self.config
    }

    /// One full pass: retry owed credits, then liquidate whatever is breached.
    pub async fn run_cycle(&self) -> SweepReport {
        let mut report = SweepReport::default();

        let recovery = self.engine.retry_pending_credits().await;
        report.recovered_credits = recovery.recovered.len();

        let open = match self.engine.store().list_all_open().await {
            Ok(open) => open,
            Err(e) => {
                warn!(error = %e, "Could not list open positions, skipping cycle");
                return report;
            }
        };

        let mut by_symbol: BTreeMap<String, Vec<Position>> = BTreeMap::new();
        for position in open {
            by_symbol.entry(position.symbol.clone()).or_default().push(position);
        }
        if by_symbol.is_empty() {
            return report;
        }

        let quotes = join_all(by_symbol.keys().map(|symbol| self.quote(symbol))).await;

        for ((symbol, positions), quote) in by_symbol.into_iter().zip(quotes) {
            let ticker = match quote {
                Ok(ticker) => ticker,
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "Quote unavailable, skipping symbol");
                    report.skipped_symbols.push(symbol);
                    continue;
                }
            };

            for position in positions {
                report.evaluated += 1;
                if !position.is_liquidatable(ticker.price) {
                    continue;
                }

                match self.engine.liquidate(position.id, ticker.price).await {
                    Ok(_) => report.liquidated.push(position.id),
                    Err(e) if e.is_benign() => {
                        debug!(position_id = %position.id, "Already closed before liquidation");
                        report.lost_races.push(position.id);
                    }
                    Err(e) => {
                        warn!(position_id = %position.id, error = %e, "Liquidation failed");
                        report.failed.push((position.id, e));
                    }
                }
            }
        }

        report
    }

    async fn quote(&self, symbol: &str) -> Result<Ticker, PriceFeedError> {
        let timeout_ms = self.config.quote_timeout_ms;
        match tokio::time::timeout(Duration::from_millis(timeout_ms), self.prices.ticker(symbol)).await {
            Ok(result) => result,
            Err(_) => Err(PriceFeedError::Timeout {
                symbol: symbol.to_string(),
                timeout_ms,
            }),
        }
    }

    /// Runs cycles every `interval_secs` on the current runtime. the first cycle starts immediately.
    pub fn spawn(self) -> SweeperHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let period = Duration::from_secs(self.config.interval_secs.max(1));

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!(interval_secs = period.as_secs(), "Liquidation sweeper started");

            loop {
                tokio::select! {
                    result = shutdown_rx.changed() => {
                        if result.is_err() || *shutdown_rx.borrow() {
                            info!("Liquidation sweeper stopping");
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        let report = self.run_cycle().await;
                        if !report.is_quiet() {
                            info!(
                                evaluated = report.evaluated,
                                liquidated = report.liquidated.len(),
                                lost_races = report.lost_races.len(),
                                failed = report.failed.len(),
                                skipped = report.skipped_symbols.len(),
                                recovered = report.recovered_credits,
                                "Sweep finished"
                            );
                        }
                    }
                }
            }
        });

        SweeperHandle {
            shutdown: shutdown_tx,
            task,
        }
    }
}

/// Running sweeper. dropping the handle also stops the task, without waiting for it.
pub struct SweeperHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Signals the task and waits for the in-flight cycle to finish.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Sweeper task ended abnormally");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
