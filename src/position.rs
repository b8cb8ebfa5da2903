// 4.0: one leveraged bet. pnl = amount * leverage * price move / entry.
// 4.1 has the settlement rules for manual and forced closes at the bottom.

use crate::liquidation::{
    evaluate_liquidation, is_breached, liquidation_distance_pct, LiquidationStatus,
};
use crate::types::{Leverage, PositionId, Price, Quote, Side, Timestamp, UserId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionStatus {
    Open,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub id: PositionId,
    pub owner_id: UserId,
    pub symbol: String,
    pub side: Side,
    pub entry_price: Price,
    /// Margin removed from the owner's balance at open.
    pub amount: Quote,
    pub leverage: Leverage,
    pub liquidation_price: Price,
    pub status: PositionStatus,
    pub exit_price: Option<Price>,
    pub profit: Option<Quote>,
    pub closed_at: Option<Timestamp>,
    pub created_at: Timestamp,
}

impl Position {
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        id: PositionId,
        owner_id: UserId,
        symbol: impl Into<String>,
        side: Side,
        entry_price: Price,
        amount: Quote,
        leverage: Leverage,
        liquidation_price: Price,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id,
            owner_id,
            symbol: symbol.into(),
            side,
            entry_price,
            amount,
            leverage,
            liquidation_price,
            status: PositionStatus::Open,
            exit_price: None,
            profit: None,
            closed_at: None,
            created_at,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    // exposure the margin controls, a.k.a. trade volume
    pub fn notional(&self) -> Quote {
        self.amount.mul(self.leverage.value())
    }

    // 4.2: paper gains/losses at the current quote. None on decimal overflow
    pub fn unrealized_pnl(&self, mark_price: Price) -> Option<Quote> {
        calculate_pnl(
            self.side,
            self.amount,
            self.leverage,
            self.entry_price,
            mark_price,
        )
    }

    // margin plus paper pnl. what a manual close would hand back right now
    pub fn equity(&self, mark_price: Price) -> Option<Quote> {
        self.amount.checked_add(self.unrealized_pnl(mark_price)?)
    }

    pub fn is_liquidatable(&self, mark_price: Price) -> bool {
        self.is_open() && is_breached(self.side, self.liquidation_price, mark_price)
    }

    /// Copy of this position in its terminal state.
    pub fn into_closed(mut self, exit_price: Price, profit: Quote, closed_at: Timestamp) -> Self {
        self.status = PositionStatus::Closed;
        self.exit_price = Some(exit_price);
        self.profit = Some(profit);
        self.closed_at = Some(closed_at);
        self
    }
}

// 4.3: the pnl formula. amount * leverage * (exit - entry) / entry, sign flipped for shorts.
// None when the decimal result overflows.
pub fn calculate_pnl(
    side: Side,
    amount: Quote,
    leverage: Leverage,
    entry_price: Price,
    exit_price: Price,
) -> Option<Quote> {
    let price_move = (exit_price.value() - entry_price.value()) * side.sign();
    // multiply before dividing so round prices give exact results
    amount
        .value()
        .checked_mul(leverage.value())?
        .checked_mul(price_move)?
        .checked_div(entry_price.value())
        .map(Quote::new)
}

/// Why a position left the OPEN state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseReason {
    UserClosed { requested_by: UserId },
    Liquidation,
}

impl CloseReason {
    pub fn is_forced(&self) -> bool {
        matches!(self, CloseReason::Liquidation)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settlement {
    pub profit: Quote,
    /// Signed change to the owner's balance. zero on liquidation, negative when a
    /// manual close lost more than the margin.
    pub credit: Quote,
}

// 4.4: liquidation forfeits the whole margin. a manual close returns margin + pnl,
// whatever the sign. None when the pnl overflows.
pub fn settle(position: &Position, exit_price: Price, reason: CloseReason) -> Option<Settlement> {
    if reason.is_forced() {
        return Some(Settlement {
            profit: position.amount.negate(),
            credit: Quote::zero(),
        });
    }

    let profit = position.unrealized_pnl(exit_price)?;
    Some(Settlement {
        profit,
        credit: position.amount.checked_add(profit)?,
    })
}

/// Live view of an open position against a quote.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionMark {
    pub position: Position,
    pub mark_price: Option<Price>,
    pub change_24h: Option<Decimal>,
    pub unrealized_pnl: Option<Quote>,
    pub notional: Quote,
    pub liquidation_distance_pct: Option<Decimal>,
    pub high_risk: bool,
}

impl PositionMark {
    pub fn unpriced(position: Position) -> Self {
        let notional = position.notional();
        Self {
            position,
            mark_price: None,
            change_24h: None,
            unrealized_pnl: None,
            notional,
            liquidation_distance_pct: None,
            high_risk: false,
        }
    }

    pub fn priced(
        position: Position,
        mark_price: Price,
        change_24h: Decimal,
        high_risk_distance_pct: Decimal,
    ) -> Self {
        let distance =
            liquidation_distance_pct(position.side, position.liquidation_price, mark_price);
        let status = evaluate_liquidation(
            position.side,
            position.liquidation_price,
            mark_price,
            high_risk_distance_pct,
        );
        Self {
            mark_price: Some(mark_price),
            change_24h: Some(change_24h),
            unrealized_pnl: position.unrealized_pnl(mark_price),
            notional: position.notional(),
            liquidation_distance_pct: Some(distance),
            // breached positions waiting for the next sweep count as high risk too
            high_risk: !matches!(status, LiquidationStatus::Safe { .. }),
            position,
        }
    }
}
