//! Cash balances per user.
//!
//! The ledger is the only owner of a user's balance. Every mutation is a single
//! atomic read-modify-write for that user, and a debit that would take the balance
//! below zero is refused inside the same critical section, so two opens racing for
//! the same funds cannot both succeed.
//!
//! Settlements of closed positions go through [`Ledger::settle_balance`] instead.
//! The loss is already realized by then, so a manual close that lost more than its
//! margin is charged in full even if that leaves the balance negative.

use crate::types::{Quote, Timestamp, UserId};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[async_trait]
pub trait Ledger: Send + Sync {
    async fn balance(&self, user: UserId) -> Result<Quote, LedgerError>;

    /// Applies `delta` atomically and returns the new balance. refuses overdrafts.
    async fn adjust_balance(&self, user: UserId, delta: Quote) -> Result<Quote, LedgerError>;

    /// Applies the signed result of a close atomically. never refused for lack of funds.
    async fn settle_balance(&self, user: UserId, delta: Quote) -> Result<Quote, LedgerError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: UserId,
    pub balance: Quote,
    pub total_credited: Quote,
    pub total_debited: Quote,
    pub created_at: Timestamp,
}

impl Account {
    pub fn new(id: UserId, timestamp: Timestamp) -> Self {
        Self {
            id,
            balance: Quote::zero(),
            total_credited: Quote::zero(),
            total_debited: Quote::zero(),
            created_at: timestamp,
        }
    }

    pub fn apply(&mut self, delta: Quote) -> Result<Quote, LedgerError> {
        if delta.is_negative() && delta.negate() > self.balance {
            return Err(LedgerError::InsufficientBalance {
                requested: delta.negate(),
                available: self.balance,
            });
        }
        Ok(self.apply_settlement(delta))
    }

    /// Like `apply` but may leave the balance negative.
    pub fn apply_settlement(&mut self, delta: Quote) -> Quote {
        if delta.is_negative() {
            self.total_debited = self.total_debited.add(delta.negate());
        } else {
            self.total_credited = self.total_credited.add(delta);
        }
        self.balance = self.balance.add(delta);
        self.balance
    }

    /// Net flow through the account since it was funded.
    pub fn net_flow(&self) -> Quote {
        self.total_credited.sub(self.total_debited)
    }
}

/// Process-local ledger. one lock for the whole map, held only for the read-modify-write.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    accounts: Mutex<HashMap<UserId, Account>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the account if missing and returns its balance. funding stays outside
    /// the position engine, so `initial_balance` is not counted as a credit.
    pub fn open_account(&self, user: UserId, initial_balance: Quote) -> Quote {
        let mut accounts = self.accounts.lock();
        let account = accounts.entry(user).or_insert_with(|| {
            let mut account = Account::new(user, Timestamp::now());
            account.balance = initial_balance;
            account
        });
        account.balance
    }

    pub fn account(&self, user: UserId) -> Option<Account> {
        self.accounts.lock().get(&user).cloned()
    }

    pub fn total_balance(&self) -> Quote {
        self.accounts.lock().values().map(|a| a.balance).sum()
    }
}

#[async_trait]
impl Ledger for InMemoryLedger {
    async fn balance(&self, user: UserId) -> Result<Quote, LedgerError> {
        self.accounts
            .lock()
            .get(&user)
            .map(|a| a.balance)
            .ok_or(LedgerError::AccountNotFound(user))
    }

    async fn adjust_balance(&self, user: UserId, delta: Quote) -> Result<Quote, LedgerError> {
        let mut accounts = self.accounts.lock();
        let account = accounts
            .get_mut(&user)
            .ok_or(LedgerError::AccountNotFound(user))?;
        account.apply(delta)
    }

    async fn settle_balance(&self, user: UserId, delta: Quote) -> Result<Quote, LedgerError> {
        let mut accounts = self.accounts.lock();
        let account = accounts
            .get_mut(&user)
            .ok_or(LedgerError::AccountNotFound(user))?;
        Ok(account.apply_settlement(delta))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("Account {0} not found")]
    AccountNotFound(UserId),

    #[error("Insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance { requested: Quote, available: Quote },

    #[error("Ledger backend unavailable: {0}")]
    Backend(String),
}
