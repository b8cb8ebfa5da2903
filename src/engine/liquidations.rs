//! Forced closes and recovery of deferred settlement credits.

use super::core::{PendingCredit, PositionEngine};
use super::results::{EngineError, RecoveryResult};
use crate::events::{EventPayload, SettlementEvent};
use crate::position::{CloseReason, Position};
use crate::types::{PositionId, Price};
use tracing::{info, warn};

impl PositionEngine {
    /// Force-closes a breached position. the whole margin is forfeited.
    pub async fn liquidate(
        &self,
        position_id: PositionId,
        current_price: Price,
    ) -> Result<Position, EngineError> {
        self.close(position_id, current_price.value(), CloseReason::Liquidation)
            .await
    }

    /// Tries every queued credit once. Credits are taken off the queue before the
    /// ledger call so two concurrent retries never apply the same one.
    pub async fn retry_pending_credits(&self) -> RecoveryResult {
        let queued: Vec<PendingCredit> = std::mem::take(&mut *self.pending_credits.lock());
        if queued.is_empty() {
            return RecoveryResult::default();
        }

        let mut result = RecoveryResult::default();
        let mut failed = Vec::new();

        for mut credit in queued {
            // owed unconditionally, so it goes through the settlement path
            match self.ledger.settle_balance(credit.owner_id, credit.amount).await {
                Ok(balance) => {
                    info!(
                        position_id = %credit.position_id,
                        owner = %credit.owner_id,
                        amount = %credit.amount,
                        balance = %balance,
                        "Deferred settlement applied"
                    );
                    self.emit_event(EventPayload::SettlementRecovered(SettlementEvent {
                        position_id: credit.position_id,
                        owner_id: credit.owner_id,
                        amount: credit.amount,
                    }));
                    result.recovered.push(credit.position_id);
                }
                Err(e) => {
                    warn!(
                        position_id = %credit.position_id,
                        amount = %credit.amount,
                        error = %e,
                        "Deferred settlement still failing"
                    );
                    credit.last_error = e;
                    failed.push(credit);
                }
            }
        }

        result.still_pending = failed.len();
        if !failed.is_empty() {
            self.pending_credits.lock().extend(failed);
        }
        result
    }
}
