//! Opening and closing positions, plus the per-user read models.
//!
//! Open debits the ledger before the position becomes visible and undoes the
//! debit if the store refuses it. Close commits through the store's
//! compare-and-swap first; whoever wins that transition is the only caller that
//! settles, so a manual close racing the sweeper can never pay out twice.

use super::core::{PendingCredit, PositionEngine};
use super::results::{EngineError, TradeSummary};
use crate::events::{
    EventPayload, LiquidationEvent, PositionClosedEvent, PositionOpenedEvent, SettlementEvent,
};
use crate::ledger::LedgerError;
use crate::liquidation::calculate_liquidation_price;
use crate::position::{settle, CloseReason, Position, PositionMark};
use crate::price_feed::PriceSource;
use crate::store::Transition;
use crate::types::{Leverage, PositionId, Price, Quote, Side, UserId};
use futures_util::future::join_all;
use rust_decimal::Decimal;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, error, info, warn};

impl PositionEngine {
    /// Opens a leveraged position and takes `amount` out of the owner's balance.
    pub async fn open(
        &self,
        owner: UserId,
        symbol: &str,
        side: Side,
        amount: Decimal,
        leverage: u32,
        entry_price: Decimal,
    ) -> Result<Position, EngineError> {
        let symbol = symbol.trim();
        if symbol.is_empty() {
            return Err(EngineError::InvalidParameters("symbol must not be empty".into()));
        }
        if amount <= Decimal::ZERO {
            return Err(EngineError::InvalidParameters(format!(
                "amount must be positive, got {amount}"
            )));
        }
        let leverage = Leverage::new(leverage)
            .filter(|l| l.get() <= self.config.max_leverage)
            .ok_or_else(|| {
                EngineError::InvalidParameters(format!(
                    "leverage must be between 1 and {}, got {leverage}",
                    self.config.max_leverage
                ))
            })?;
        let entry_price = Price::new(entry_price).ok_or_else(|| {
            EngineError::InvalidParameters(format!("entry price must be positive, got {entry_price}"))
        })?;

        let amount = Quote::new(amount);
        if amount.checked_mul(leverage.value()).is_none() {
            return Err(EngineError::InvalidParameters(format!(
                "notional of {amount} at {leverage} is out of range"
            )));
        }
        let liquidation_price =
            calculate_liquidation_price(entry_price, leverage, side, self.config.security_margin)
                .ok_or_else(|| {
                    EngineError::InvalidParameters(format!(
                        "no valid liquidation price for {side} at {entry_price} with {leverage}"
                    ))
                })?;

        let available = self.ledger.balance(owner).await?;
        if amount > available {
            return Err(EngineError::InsufficientFunds {
                requested: amount,
                available,
            });
        }

        let position = Position::open(
            PositionId::new(),
            owner,
            symbol,
            side,
            entry_price,
            amount,
            leverage,
            liquidation_price,
            self.now(),
        );

        // the ledger refuses overdrafts itself, so a concurrent open that drained
        // the balance since the check above lands here
        match self.ledger.adjust_balance(owner, amount.negate()).await {
            Ok(_) => {}
            Err(LedgerError::InsufficientBalance { requested, available }) => {
                return Err(EngineError::InsufficientFunds { requested, available });
            }
            Err(e) => return Err(e.into()),
        }

        if let Err(e) = self.store.create(position.clone()).await {
            self.refund_open(&position).await;
            return Err(e.into());
        }

        info!(
            position_id = %position.id,
            owner = %owner,
            symbol = %position.symbol,
            side = %side,
            amount = %amount,
            leverage = %leverage,
            entry_price = %entry_price,
            liquidation_price = %liquidation_price,
            "Position opened"
        );

        self.emit_event(EventPayload::PositionOpened(PositionOpenedEvent {
            position_id: position.id,
            owner_id: owner,
            symbol: position.symbol.clone(),
            side,
            entry_price,
            amount,
            leverage,
            liquidation_price,
        }));

        Ok(position)
    }

    // store rejected the position after its margin was taken. hand the margin back,
    // or owe it if the ledger is down too
    async fn refund_open(&self, position: &Position) {
        if let Err(e) = self.ledger.adjust_balance(position.owner_id, position.amount).await {
            error!(
                position_id = %position.id,
                owner = %position.owner_id,
                amount = %position.amount,
                error = %e,
                "Refund after failed open did not apply, deferring"
            );
            self.defer_credit(position.id, position.owner_id, position.amount, e);
        }
    }

    /// Closes an OPEN position at `exit_price`.
    ///
    /// A manual close must come from the owner and settles `amount + profit`,
    /// which is a charge when the loss exceeds the margin. A liquidation forfeits
    /// the margin and settles nothing. `NotFound` means the position is unknown or
    /// someone else already closed it.
    pub async fn close(
        &self,
        position_id: PositionId,
        exit_price: Decimal,
        reason: CloseReason,
    ) -> Result<Position, EngineError> {
        let exit_price = Price::new(exit_price).ok_or_else(|| {
            EngineError::InvalidParameters(format!("exit price must be positive, got {exit_price}"))
        })?;

        let position = self
            .store
            .find_open_by_id(position_id)
            .await?
            .ok_or(EngineError::NotFound(position_id))?;

        if let CloseReason::UserClosed { requested_by } = reason {
            if requested_by != position.owner_id {
                return Err(EngineError::Unauthorized {
                    position_id,
                    requested_by,
                });
            }
        }

        let settlement = settle(&position, exit_price, reason).ok_or_else(|| {
            EngineError::InvalidParameters(format!(
                "profit of position {position_id} at {exit_price} is out of range"
            ))
        })?;
        let closed_at = self.now();

        let closed = match self
            .store
            .transition_to_closed(position_id, exit_price, settlement.profit, closed_at)
            .await?
        {
            Transition::Closed(closed) => closed,
            Transition::AlreadyClosed | Transition::Missing => {
                debug!(position_id = %position_id, ?reason, "Close lost race");
                return Err(EngineError::NotFound(position_id));
            }
        };

        if reason.is_forced() {
            info!(
                position_id = %position_id,
                owner = %closed.owner_id,
                symbol = %closed.symbol,
                trigger_price = %exit_price,
                liquidation_price = %closed.liquidation_price,
                forfeited = %closed.amount,
                "Position liquidated"
            );
            self.emit_event(EventPayload::Liquidation(LiquidationEvent {
                position_id,
                owner_id: closed.owner_id,
                symbol: closed.symbol.clone(),
                liquidation_price: closed.liquidation_price,
                trigger_price: exit_price,
                forfeited: closed.amount,
            }));
        } else {
            info!(
                position_id = %position_id,
                owner = %closed.owner_id,
                exit_price = %exit_price,
                profit = %settlement.profit,
                "Position closed"
            );
        }

        self.emit_event(EventPayload::PositionClosed(PositionClosedEvent {
            position_id,
            owner_id: closed.owner_id,
            exit_price,
            profit: settlement.profit,
            credited: settlement.credit,
            reason,
        }));

        if !settlement.credit.is_zero() {
            if let Err(e) = self.ledger.settle_balance(closed.owner_id, settlement.credit).await {
                error!(
                    position_id = %position_id,
                    owner = %closed.owner_id,
                    amount = %settlement.credit,
                    error = %e,
                    "Settlement failed, deferring"
                );
                self.defer_credit(position_id, closed.owner_id, settlement.credit, e);
                return Err(EngineError::SettlementPending {
                    position_id,
                    amount: settlement.credit,
                });
            }
        }

        Ok(closed)
    }

    /// Manual close on behalf of `requested_by`.
    pub async fn close_position(
        &self,
        requested_by: UserId,
        position_id: PositionId,
        exit_price: Decimal,
    ) -> Result<Position, EngineError> {
        self.close(position_id, exit_price, CloseReason::UserClosed { requested_by })
            .await
    }

    pub(super) fn defer_credit(
        &self,
        position_id: PositionId,
        owner_id: UserId,
        amount: Quote,
        cause: LedgerError,
    ) {
        self.queue_credit(PendingCredit {
            position_id,
            owner_id,
            amount,
            queued_at: self.now(),
            last_error: cause,
        });
        self.emit_event(EventPayload::SettlementDeferred(SettlementEvent {
            position_id,
            owner_id,
            amount,
        }));
    }

    /// Open positions of `owner`, newest first.
    pub async fn open_positions(&self, owner: UserId) -> Result<Vec<Position>, EngineError> {
        Ok(self.store.list_open(owner).await?)
    }

    /// Closed positions of `owner`, most recently closed first.
    pub async fn closed_positions(&self, owner: UserId) -> Result<Vec<Position>, EngineError> {
        Ok(self.store.list_closed(owner).await?)
    }

    /// Realized totals over the closed positions of `owner`.
    pub async fn trade_summary(&self, owner: UserId) -> Result<TradeSummary, EngineError> {
        let closed = self.store.list_closed(owner).await?;
        Ok(TradeSummary::from_closed(&closed))
    }

    pub fn unrealized_pnl(&self, position: &Position, price: Price) -> Result<Quote, EngineError> {
        position.unrealized_pnl(price).ok_or_else(|| {
            EngineError::InvalidParameters(format!(
                "profit of position {} at {price} is out of range",
                position.id
            ))
        })
    }

    /// Open positions of `owner` marked against live quotes. one fetch per symbol;
    /// a symbol without a quote leaves its positions unpriced.
    pub async fn position_marks(
        &self,
        owner: UserId,
        prices: &dyn PriceSource,
    ) -> Result<Vec<PositionMark>, EngineError> {
        let positions = self.store.list_open(owner).await?;

        let symbols: BTreeSet<&str> = positions.iter().map(|p| p.symbol.as_str()).collect();
        let quotes = join_all(symbols.into_iter().map(|symbol| async move {
            (symbol.to_string(), prices.ticker(symbol).await)
        }))
        .await;

        let mut tickers = HashMap::new();
        for (symbol, quote) in quotes {
            match quote {
                Ok(ticker) => {
                    tickers.insert(symbol, ticker);
                }
                Err(e) => warn!(symbol = %symbol, error = %e, "No quote for marks"),
            }
        }

        let threshold = self.config.high_risk_distance_pct;
        Ok(positions
            .into_iter()
            .map(|position| match tickers.get(&position.symbol) {
                Some(t) => PositionMark::priced(position, t.price, t.change_24h, threshold),
                None => PositionMark::unpriced(position),
            })
            .collect())
    }
}
