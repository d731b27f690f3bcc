//! Persistence seam for the ledger engine.
//!
//! The engine never talks to a database directly: it reads through
//! [`LedgerReads`] and mutates through a [`UnitOfWork`] acquired from a
//! [`LedgerStore`]. A unit of work is one atomic transaction — everything
//! written through it becomes visible on `commit` and is discarded when the
//! value is dropped without committing.

pub mod memory;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::core::{Account, CreditCard, CreditCardInvoice, ReferenceMonth, Transaction};

pub use memory::{MemoryState, MemoryStore};

/// Errors surfaced by a store backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The account id does not resolve.
    AccountNotFound,
    /// The credit card id does not resolve.
    CardNotFound,
    /// The transaction id does not resolve.
    TransactionNotFound,
    /// The invoice id does not resolve.
    InvoiceNotFound,
    /// The backend itself failed.
    Backend(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::AccountNotFound => write!(f, "account not found"),
            StoreError::CardNotFound => write!(f, "credit card not found"),
            StoreError::TransactionNotFound => write!(f, "transaction not found"),
            StoreError::InvoiceNotFound => write!(f, "invoice not found"),
            StoreError::Backend(msg) => write!(f, "store backend error: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Read-side persistence contract. Every query is scoped to the calling user,
/// so ids belonging to other users simply do not resolve.
pub trait LedgerReads {
    fn account(&self, user_id: Uuid, id: Uuid) -> Result<Option<Account>, StoreError>;
    fn accounts_by_user(&self, user_id: Uuid) -> Result<Vec<Account>, StoreError>;

    fn card(&self, user_id: Uuid, id: Uuid) -> Result<Option<CreditCard>, StoreError>;
    fn cards_by_user(&self, user_id: Uuid) -> Result<Vec<CreditCard>, StoreError>;

    fn transaction(&self, user_id: Uuid, id: Uuid) -> Result<Option<Transaction>, StoreError>;
    fn transactions_by_user(&self, user_id: Uuid) -> Result<Vec<Transaction>, StoreError>;
    fn transactions_by_group(
        &self,
        user_id: Uuid,
        group_id: Uuid,
    ) -> Result<Vec<Transaction>, StoreError>;
    /// Active recurring definitions due on or before `date`, across all users.
    fn due_recurring(&self, date: NaiveDate) -> Result<Vec<Transaction>, StoreError>;

    fn invoice(&self, user_id: Uuid, id: Uuid) -> Result<Option<CreditCardInvoice>, StoreError>;
    fn invoices_by_card(
        &self,
        user_id: Uuid,
        card_id: Uuid,
    ) -> Result<Vec<CreditCardInvoice>, StoreError>;
    /// Sum of `total` over the card's unpaid invoices.
    fn unpaid_invoice_total(&self, card_id: Uuid) -> Result<Decimal, StoreError>;
}

/// One atomic transaction against the store. Dropping the value without
/// calling [`UnitOfWork::commit`] rolls every write back.
pub trait UnitOfWork: LedgerReads {
    fn insert_account(&mut self, account: &Account) -> Result<(), StoreError>;
    fn update_account(&mut self, account: &Account) -> Result<(), StoreError>;
    fn remove_account(&mut self, user_id: Uuid, id: Uuid) -> Result<(), StoreError>;
    /// Adds `delta` to the account's balance as a single read-modify-write.
    /// The only way a balance ever changes.
    fn apply_balance_delta(&mut self, account_id: Uuid, delta: Decimal) -> Result<(), StoreError>;

    fn insert_card(&mut self, card: &CreditCard) -> Result<(), StoreError>;
    fn update_card(&mut self, card: &CreditCard) -> Result<(), StoreError>;
    /// Removes the card and its invoice buckets.
    fn remove_card(&mut self, user_id: Uuid, id: Uuid) -> Result<(), StoreError>;

    fn insert_transaction(&mut self, tx: &Transaction) -> Result<(), StoreError>;
    fn update_transaction(&mut self, tx: &Transaction) -> Result<(), StoreError>;
    fn remove_transaction(&mut self, user_id: Uuid, id: Uuid) -> Result<Transaction, StoreError>;
    fn remove_transactions_by_group(
        &mut self,
        user_id: Uuid,
        group_id: Uuid,
    ) -> Result<Vec<Transaction>, StoreError>;

    /// Adds `amount` into the card's bucket for `month`, creating the bucket
    /// (unpaid) if it does not exist yet.
    fn accrue_invoice(
        &mut self,
        card_id: Uuid,
        user_id: Uuid,
        month: ReferenceMonth,
        amount: Decimal,
    ) -> Result<(), StoreError>;
    /// Subtracts `amount` from the bucket, clamping its total at zero. A
    /// missing bucket is a no-op.
    fn subtract_invoice(
        &mut self,
        card_id: Uuid,
        month: ReferenceMonth,
        amount: Decimal,
    ) -> Result<(), StoreError>;
    fn mark_invoice_paid(
        &mut self,
        user_id: Uuid,
        invoice_id: Uuid,
        account_id: Uuid,
        paid_at: DateTime<Utc>,
    ) -> Result<CreditCardInvoice, StoreError>;

    /// Makes every write of this unit of work visible at once.
    fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

/// A store that can open units of work.
pub trait LedgerStore: LedgerReads {
    fn begin(&self) -> Result<Box<dyn UnitOfWork + '_>, StoreError>;
}
