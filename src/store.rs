//! Position persistence: create, status queries, and the OPEN→CLOSED compare-and-swap.

use crate::position::Position;
use crate::types::{PositionId, Price, Quote, Timestamp, UserId};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::Path;

/// Outcome of `transition_to_closed`. only `Closed` means this caller won.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Closed(Position),
    AlreadyClosed,
    Missing,
}

#[async_trait]
pub trait PositionStore: Send + Sync {
    async fn create(&self, position: Position) -> Result<(), StoreError>;

    async fn find_open_by_id(&self, id: PositionId) -> Result<Option<Position>, StoreError>;

    /// Open positions of one user, newest first.
    async fn list_open(&self, user: UserId) -> Result<Vec<Position>, StoreError>;

    /// Closed positions of one user, most recently closed first.
    async fn list_closed(&self, user: UserId) -> Result<Vec<Position>, StoreError>;

    /// Every open position across users. drives the liquidation sweep.
    async fn list_all_open(&self) -> Result<Vec<Position>, StoreError>;

    /// Marks the position CLOSED only if it is still OPEN, in one atomic step.
    async fn transition_to_closed(
        &self,
        id: PositionId,
        exit_price: Price,
        profit: Quote,
        closed_at: Timestamp,
    ) -> Result<Transition, StoreError>;
}

#[derive(Debug, Default)]
pub struct InMemoryPositionStore {
    positions: RwLock<HashMap<PositionId, Position>>,
}

impl InMemoryPositionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.positions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.read().is_empty()
    }

    pub fn get(&self, id: PositionId) -> Option<Position> {
        self.positions.read().get(&id).cloned()
    }

    pub fn all(&self) -> Vec<Position> {
        let mut all: Vec<Position> = self.positions.read().values().cloned().collect();
        all.sort_by_key(|p| (p.created_at, p.id));
        all
    }

    /// Writes every position as JSON, via a temp file so a crash never leaves half a snapshot.
    pub fn save_snapshot(&self, path: impl AsRef<Path>) -> Result<(), StoreError> {
        let path = path.as_ref();
        let json = serde_json::to_vec_pretty(&self.all())
            .map_err(|e| StoreError::Snapshot(e.to_string()))?;

        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, json).map_err(|e| StoreError::Snapshot(e.to_string()))?;
        std::fs::rename(&tmp, path).map_err(|e| StoreError::Snapshot(e.to_string()))?;
        Ok(())
    }

    pub fn load_snapshot(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let bytes = std::fs::read(path).map_err(|e| StoreError::Snapshot(e.to_string()))?;
        let positions: Vec<Position> =
            serde_json::from_slice(&bytes).map_err(|e| StoreError::Snapshot(e.to_string()))?;

        let store = Self::new();
        {
            let mut map = store.positions.write();
            for position in positions {
                map.insert(position.id, position);
            }
        }
        Ok(store)
    }

    fn collect_for(&self, user: UserId, open: bool) -> Vec<Position> {
        self.positions
            .read()
            .values()
            .filter(|p| p.owner_id == user && p.is_open() == open)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl PositionStore for InMemoryPositionStore {
    async fn create(&self, position: Position) -> Result<(), StoreError> {
        let mut positions = self.positions.write();
        if positions.contains_key(&position.id) {
            return Err(StoreError::Duplicate(position.id));
        }
        positions.insert(position.id, position);
        Ok(())
    }

    async fn find_open_by_id(&self, id: PositionId) -> Result<Option<Position>, StoreError> {
        Ok(self
            .positions
            .read()
            .get(&id)
            .filter(|p| p.is_open())
            .cloned())
    }

    async fn list_open(&self, user: UserId) -> Result<Vec<Position>, StoreError> {
        let mut open = self.collect_for(user, true);
        open.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(open)
    }

    async fn list_closed(&self, user: UserId) -> Result<Vec<Position>, StoreError> {
        let mut closed = self.collect_for(user, false);
        closed.sort_by(|a, b| b.closed_at.cmp(&a.closed_at).then(a.id.cmp(&b.id)));
        Ok(closed)
    }

    async fn list_all_open(&self) -> Result<Vec<Position>, StoreError> {
        let mut open: Vec<Position> = self
            .positions
            .read()
            .values()
            .filter(|p| p.is_open())
            .cloned()
            .collect();
        open.sort_by_key(|p| (p.created_at, p.id));
        Ok(open)
    }

    async fn transition_to_closed(
        &self,
        id: PositionId,
        exit_price: Price,
        profit: Quote,
        closed_at: Timestamp,
    ) -> Result<Transition, StoreError> {
        let mut positions = self.positions.write();
        let Some(current) = positions.get_mut(&id) else {
            return Ok(Transition::Missing);
        };

        if !current.is_open() {
            return Ok(Transition::AlreadyClosed);
        }

        let closed = current.clone().into_closed(exit_price, profit, closed_at);
        *current = closed.clone();
        Ok(Transition::Closed(closed))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("Position {0} already exists")]
    Duplicate(PositionId),

    #[error("Snapshot failed: {0}")]
    Snapshot(String),

    #[error("Store backend unavailable: {0}")]
    Backend(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Leverage, Side};
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn open_position(owner: UserId, created_ms: i64) -> Position {
        Position::open(
            PositionId::new(),
            owner,
            "ETH/USD",
            Side::Long,
            Price::new_unchecked(dec!(3500)),
            Quote::new(dec!(200)),
            Leverage::new(5).unwrap(),
            Price::new_unchecked(dec!(2817.5)),
            Timestamp::from_millis(created_ms),
        )
    }

    #[tokio::test]
    async fn create_and_find() {
        let store = InMemoryPositionStore::new();
        let pos = open_position(UserId::new(), 1);
        store.create(pos.clone()).await.unwrap();

        assert_eq!(store.find_open_by_id(pos.id).await.unwrap(), Some(pos.clone()));
        assert_eq!(store.create(pos.clone()).await, Err(StoreError::Duplicate(pos.id)));
    }

    #[tokio::test]
    async fn transition_is_compare_and_swap() {
        let store = InMemoryPositionStore::new();
        let pos = open_position(UserId::new(), 1);
        store.create(pos.clone()).await.unwrap();

        let exit = Price::new_unchecked(dec!(3600));
        let first = store
            .transition_to_closed(pos.id, exit, Quote::new(dec!(28.57)), Timestamp::from_millis(2))
            .await
            .unwrap();
        assert!(matches!(first, Transition::Closed(ref p) if !p.is_open()));

        let second = store
            .transition_to_closed(pos.id, exit, Quote::new(dec!(-200)), Timestamp::from_millis(3))
            .await
            .unwrap();
        assert_eq!(second, Transition::AlreadyClosed);

        // the loser must not overwrite the winner's fields
        let stored = store.get(pos.id).unwrap();
        assert_eq!(stored.profit, Some(Quote::new(dec!(28.57))));
        assert_eq!(stored.closed_at, Some(Timestamp::from_millis(2)));
        assert!(store.find_open_by_id(pos.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn transition_unknown_id() {
        let store = InMemoryPositionStore::new();
        let outcome = store
            .transition_to_closed(
                PositionId::new(),
                Price::new_unchecked(dec!(1)),
                Quote::zero(),
                Timestamp::from_millis(0),
            )
            .await
            .unwrap();
        assert_eq!(outcome, Transition::Missing);
    }

    #[tokio::test]
    async fn listings_split_by_status_and_owner() {
        let store = InMemoryPositionStore::new();
        let alice = UserId::new();
        let bob = UserId::new();

        let older = open_position(alice, 10);
        let newer = open_position(alice, 20);
        let bobs = open_position(bob, 15);
        for p in [&older, &newer, &bobs] {
            store.create(p.clone()).await.unwrap();
        }

        store
            .transition_to_closed(older.id, Price::new_unchecked(dec!(3400)), Quote::new(dec!(-28.57)), Timestamp::from_millis(30))
            .await
            .unwrap();

        let open = store.list_open(alice).await.unwrap();
        assert_eq!(open.iter().map(|p| p.id).collect::<Vec<_>>(), vec![newer.id]);

        let closed = store.list_closed(alice).await.unwrap();
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].id, older.id);

        let all_open = store.list_all_open().await.unwrap();
        assert_eq!(all_open.iter().map(|p| p.id).collect::<Vec<_>>(), vec![bobs.id, newer.id]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_transitions_have_one_winner() {
        let store = Arc::new(InMemoryPositionStore::new());
        let pos = open_position(UserId::new(), 1);
        store.create(pos.clone()).await.unwrap();

        let id = pos.id;
        let mut handles = Vec::new();
        for i in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .transition_to_closed(
                        id,
                        Price::new_unchecked(dec!(3500)),
                        Quote::new(rust_decimal::Decimal::from(i)),
                        Timestamp::from_millis(100 + i),
                    )
                    .await
                    .unwrap()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), Transition::Closed(_)) {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn snapshot_roundtrip_keeps_status() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("positions.json");

        let store = InMemoryPositionStore::new();
        let open = open_position(UserId::new(), 1);
        let closing = open_position(UserId::new(), 2);
        store.create(open.clone()).await.unwrap();
        store.create(closing.clone()).await.unwrap();
        store
            .transition_to_closed(closing.id, Price::new_unchecked(dec!(3000)), Quote::new(dec!(-142.86)), Timestamp::from_millis(5))
            .await
            .unwrap();

        store.save_snapshot(&path).unwrap();
        let restored = InMemoryPositionStore::load_snapshot(&path).unwrap();

        assert_eq!(restored.all(), store.all());
        assert!(restored.find_open_by_id(open.id).await.unwrap().is_some());
        assert!(restored.find_open_by_id(closing.id).await.unwrap().is_none());
    }
}
