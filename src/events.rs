// 6.0: every state change produces an event. used for audit trails and for checking
// the ledger against position history. the EventPayload enum lists all event types.

use crate::position::CloseReason;
use crate::types::{Leverage, PositionId, Price, Quote, Side, Timestamp, UserId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub u64);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub timestamp: Timestamp,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(id: EventId, timestamp: Timestamp, payload: EventPayload) -> Self {
        Self {
            id,
            timestamp,
            payload,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    PositionOpened(PositionOpenedEvent),
    PositionClosed(PositionClosedEvent),
    Liquidation(LiquidationEvent),

    // settlement that could not be applied at close time
    SettlementDeferred(SettlementEvent),
    SettlementRecovered(SettlementEvent),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionOpenedEvent {
    pub position_id: PositionId,
    pub owner_id: UserId,
    pub symbol: String,
    pub side: Side,
    pub entry_price: Price,
    pub amount: Quote,
    pub leverage: Leverage,
    pub liquidation_price: Price,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionClosedEvent {
    pub position_id: PositionId,
    pub owner_id: UserId,
    pub exit_price: Price,
    pub profit: Quote,
    /// Signed balance change. negative when a manual close lost more than the margin.
    pub credited: Quote,
    pub reason: CloseReason,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidationEvent {
    pub position_id: PositionId,
    pub owner_id: UserId,
    pub symbol: String,
    pub liquidation_price: Price,
    pub trigger_price: Price,
    pub forfeited: Quote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementEvent {
    pub position_id: PositionId,
    pub owner_id: UserId,
    pub amount: Quote,
}

/// Bounded, shareable audit log. oldest events fall off past `max_events`.
#[derive(Debug)]
pub struct EventLog {
    inner: Mutex<EventLogInner>,
    max_events: usize,
}

#[derive(Debug)]
struct EventLogInner {
    events: VecDeque<Event>,
    next_id: u64,
}

impl EventLog {
    pub fn new(max_events: usize) -> Self {
        Self {
            inner: Mutex::new(EventLogInner {
                events: VecDeque::new(),
                next_id: 1,
            }),
            max_events,
        }
    }

    pub fn emit(&self, timestamp: Timestamp, payload: EventPayload) -> EventId {
        let mut inner = self.inner.lock();
        let id = EventId(inner.next_id);
        inner.next_id += 1;

        tracing::trace!(event_id = id.0, ?payload, "event");
        inner.events.push_back(Event::new(id, timestamp, payload));

        while inner.events.len() > self.max_events {
            inner.events.pop_front();
        }
        id
    }

    pub fn events(&self) -> Vec<Event> {
        self.inner.lock().events.iter().cloned().collect()
    }

    pub fn recent(&self, count: usize) -> Vec<Event> {
        let inner = self.inner.lock();
        let start = inner.events.len().saturating_sub(count);
        inner.events.iter().skip(start).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
