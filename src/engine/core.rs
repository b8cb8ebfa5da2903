// 5.0 engine/core.rs: the position engine. holds the injected ledger and store,
// the audit log and the queue of settlement credits still owed to users.

use super::config::EngineConfig;
use crate::events::{Event, EventLog, EventPayload};
use crate::ledger::{Ledger, LedgerError};
use crate::store::PositionStore;
use crate::types::{PositionId, Quote, Timestamp, UserId};
use parking_lot::Mutex;
use std::sync::Arc;

/// A settlement that was owed at close time but could not be applied yet.
/// `amount` is signed: negative when a manual close lost more than its margin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCredit {
    pub position_id: PositionId,
    pub owner_id: UserId,
    pub amount: Quote,
    pub queued_at: Timestamp,
    pub last_error: LedgerError,
}

/** 5.1: main engine struct. collaborators are injected once and shared */
pub struct PositionEngine {
    pub(super) config: EngineConfig,
    pub(super) ledger: Arc<dyn Ledger>,
    pub(super) store: Arc<dyn PositionStore>,
    pub(super) events: EventLog,
    pub(super) pending_credits: Mutex<Vec<PendingCredit>>,
}

impl std::fmt::Debug for PositionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PositionEngine")
            .field("config", &self.config)
            .field("events", &self.events.len())
            .field("pending_credits", &self.pending_credits.lock().len())
            .finish_non_exhaustive()
    }
}

impl PositionEngine {
    pub fn new(config: EngineConfig, ledger: Arc<dyn Ledger>, store: Arc<dyn PositionStore>) -> Self {
        let events = EventLog::new(config.max_events);
        Self {
            config,
            ledger,
            store,
            events,
            pending_credits: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Arc<dyn Ledger> {
        &self.ledger
    }

    pub fn store(&self) -> &Arc<dyn PositionStore> {
        &self.store
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.events()
    }

    pub fn recent_events(&self, count: usize) -> Vec<Event> {
        self.events.recent(count)
    }

    pub fn pending_credits(&self) -> Vec<PendingCredit> {
        self.pending_credits.lock().clone()
    }

    pub fn has_pending_credits(&self) -> bool {
        !self.pending_credits.lock().is_empty()
    }

    pub(super) fn now(&self) -> Timestamp {
        Timestamp::now()
    }

    pub(super) fn emit_event(&self, payload: EventPayload) {
        self.events.emit(self.now(), payload);
    }

    pub(super) fn queue_credit(&self, credit: PendingCredit) {
        self.pending_credits.lock().push(credit);
    }
}
