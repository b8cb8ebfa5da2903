// 5.0.2: result types and errors for engine operations.

use crate::ledger::LedgerError;
use crate::position::Position;
use crate::store::StoreError;
use crate::types::{PositionId, Quote, UserId};
use rust_decimal::Decimal;
use serde::Serialize;

/// Outcome of replaying deferred settlement credits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryResult {
    pub recovered: Vec<PositionId>,
    pub still_pending: usize,
}

/// Realized performance over a user's closed positions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TradeSummary {
    pub closed_trades: usize,
    /// Closes with a strictly positive profit.
    pub winning_trades: usize,
    pub total_realized_pnl: Quote,
    /// Winning share in percent, zero when nothing was closed yet.
    pub success_rate_pct: Decimal,
}

impl TradeSummary {
    pub fn from_closed(positions: &[Position]) -> Self {
        let closed: Vec<&Position> = positions.iter().filter(|p| !p.is_open()).collect();
        let profits = closed.iter().map(|p| p.profit.unwrap_or_else(Quote::zero));

        let winning_trades = profits.clone().filter(Quote::is_positive).count();
        let total_realized_pnl = profits.sum();
        let success_rate_pct = if closed.is_empty() {
            Decimal::ZERO
        } else {
            Decimal::from(winning_trades) * Decimal::ONE_HUNDRED / Decimal::from(closed.len())
        };

        Self {
            closed_trades: closed.len(),
            winning_trades,
            total_realized_pnl,
            success_rate_pct,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Insufficient funds: requested {requested}, available {available}")]
    InsufficientFunds { requested: Quote, available: Quote },

    #[error("User {requested_by} may not close position {position_id}")]
    Unauthorized {
        position_id: PositionId,
        requested_by: UserId,
    },

    #[error("No open position {0}")]
    NotFound(PositionId),

    /// The position is closed but its settlement is queued for retry.
    #[error("Position {position_id} closed, settlement of {amount} pending")]
    SettlementPending { position_id: PositionId, amount: Quote },

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl EngineError {
    /// Expected outcome of losing a close race. callers should not treat it as an anomaly.
    pub fn is_benign(&self) -> bool {
        matches!(self, EngineError::NotFound(_))
    }
}
