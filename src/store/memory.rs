//! In-memory reference store.
//!
//! Serves the CLI and the test suite: a unit of work clones the current state,
//! applies writes to the clone, and swaps it back on commit. The lock is held
//! for the lifetime of the unit of work, so concurrent operations serialize
//! exactly as they would on a single-row-locking database.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::{Account, CreditCard, CreditCardInvoice, ReferenceMonth, Transaction};

use super::{LedgerReads, LedgerStore, StoreError, UnitOfWork};

/// Serializable snapshot of everything the store holds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryState {
    accounts: HashMap<Uuid, Account>,
    cards: HashMap<Uuid, CreditCard>,
    invoices: HashMap<Uuid, CreditCardInvoice>,
    transactions: HashMap<Uuid, Transaction>,
}

impl MemoryState {
    fn account(&self, user_id: Uuid, id: Uuid) -> Option<Account> {
        self.accounts
            .get(&id)
            .filter(|a| a.user_id == user_id)
            .cloned()
    }

    fn accounts_by_user(&self, user_id: Uuid) -> Vec<Account> {
        let mut accounts: Vec<_> = self
            .accounts
            .values()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect();
        accounts.sort_by_key(|a| a.created_at);
        accounts
    }

    fn card(&self, user_id: Uuid, id: Uuid) -> Option<CreditCard> {
        self.cards
            .get(&id)
            .filter(|c| c.user_id == user_id)
            .cloned()
    }

    fn cards_by_user(&self, user_id: Uuid) -> Vec<CreditCard> {
        let mut cards: Vec<_> = self
            .cards
            .values()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect();
        cards.sort_by(|a, b| a.name.cmp(&b.name));
        cards
    }

    fn transaction(&self, user_id: Uuid, id: Uuid) -> Option<Transaction> {
        self.transactions
            .get(&id)
            .filter(|t| t.user_id == user_id)
            .cloned()
    }

    fn transactions_by_user(&self, user_id: Uuid) -> Vec<Transaction> {
        let mut txs: Vec<_> = self
            .transactions
            .values()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect();
        txs.sort_by(|a, b| b.date.cmp(&a.date).then(b.created_at.cmp(&a.created_at)));
        txs
    }

    fn transactions_by_group(&self, user_id: Uuid, group_id: Uuid) -> Vec<Transaction> {
        let mut txs: Vec<_> = self
            .transactions
            .values()
            .filter(|t| t.user_id == user_id && t.recurrence_group_id == Some(group_id))
            .cloned()
            .collect();
        txs.sort_by_key(|t| t.date);
        txs
    }

    fn due_recurring(&self, date: NaiveDate) -> Vec<Transaction> {
        let mut due: Vec<_> = self
            .transactions
            .values()
            .filter(|t| {
                t.recurring
                    && !t.recurrence_paused
                    && t.next_due_date.is_some_and(|d| d <= date)
            })
            .cloned()
            .collect();
        due.sort_by_key(|t| t.next_due_date);
        due
    }

    fn invoice(&self, user_id: Uuid, id: Uuid) -> Option<CreditCardInvoice> {
        self.invoices
            .get(&id)
            .filter(|i| i.user_id == user_id)
            .cloned()
    }

    fn invoices_by_card(&self, user_id: Uuid, card_id: Uuid) -> Vec<CreditCardInvoice> {
        let mut invoices: Vec<_> = self
            .invoices
            .values()
            .filter(|i| i.user_id == user_id && i.credit_card_id == card_id)
            .cloned()
            .collect();
        invoices.sort_by(|a, b| b.reference_month.cmp(&a.reference_month));
        invoices
    }

    fn unpaid_invoice_total(&self, card_id: Uuid) -> Decimal {
        self.invoices
            .values()
            .filter(|i| i.credit_card_id == card_id && !i.paid)
            .map(|i| i.total)
            .sum()
    }
}

/// In-memory [`LedgerStore`].
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restores a store from a previously captured snapshot.
    pub fn from_state(state: MemoryState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }

    /// Captures the committed state, e.g. to persist it to disk.
    pub fn snapshot(&self) -> MemoryState {
        self.state.lock().expect("state mutex poisoned").clone()
    }

    fn read(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().expect("state mutex poisoned")
    }
}

impl LedgerReads for MemoryStore {
    fn account(&self, user_id: Uuid, id: Uuid) -> Result<Option<Account>, StoreError> {
        Ok(self.read().account(user_id, id))
    }

    fn accounts_by_user(&self, user_id: Uuid) -> Result<Vec<Account>, StoreError> {
        Ok(self.read().accounts_by_user(user_id))
    }

    fn card(&self, user_id: Uuid, id: Uuid) -> Result<Option<CreditCard>, StoreError> {
        Ok(self.read().card(user_id, id))
    }

    fn cards_by_user(&self, user_id: Uuid) -> Result<Vec<CreditCard>, StoreError> {
        Ok(self.read().cards_by_user(user_id))
    }

    fn transaction(&self, user_id: Uuid, id: Uuid) -> Result<Option<Transaction>, StoreError> {
        Ok(self.read().transaction(user_id, id))
    }

    fn transactions_by_user(&self, user_id: Uuid) -> Result<Vec<Transaction>, StoreError> {
        Ok(self.read().transactions_by_user(user_id))
    }

    fn transactions_by_group(
        &self,
        user_id: Uuid,
        group_id: Uuid,
    ) -> Result<Vec<Transaction>, StoreError> {
        Ok(self.read().transactions_by_group(user_id, group_id))
    }

    fn due_recurring(&self, date: NaiveDate) -> Result<Vec<Transaction>, StoreError> {
        Ok(self.read().due_recurring(date))
    }

    fn invoice(&self, user_id: Uuid, id: Uuid) -> Result<Option<CreditCardInvoice>, StoreError> {
        Ok(self.read().invoice(user_id, id))
    }

    fn invoices_by_card(
        &self,
        user_id: Uuid,
        card_id: Uuid,
    ) -> Result<Vec<CreditCardInvoice>, StoreError> {
        Ok(self.read().invoices_by_card(user_id, card_id))
    }

    fn unpaid_invoice_total(&self, card_id: Uuid) -> Result<Decimal, StoreError> {
        Ok(self.read().unpaid_invoice_total(card_id))
    }
}

impl LedgerStore for MemoryStore {
    fn begin(&self) -> Result<Box<dyn UnitOfWork + '_>, StoreError> {
        let guard = self.state.lock().expect("state mutex poisoned");
        let work = guard.clone();
        Ok(Box::new(MemoryUnitOfWork { guard, work }))
    }
}

/// Snapshot-based unit of work over [`MemoryStore`].
pub struct MemoryUnitOfWork<'a> {
    guard: MutexGuard<'a, MemoryState>,
    work: MemoryState,
}

impl LedgerReads for MemoryUnitOfWork<'_> {
    fn account(&self, user_id: Uuid, id: Uuid) -> Result<Option<Account>, StoreError> {
        Ok(self.work.account(user_id, id))
    }

    fn accounts_by_user(&self, user_id: Uuid) -> Result<Vec<Account>, StoreError> {
        Ok(self.work.accounts_by_user(user_id))
    }

    fn card(&self, user_id: Uuid, id: Uuid) -> Result<Option<CreditCard>, StoreError> {
        Ok(self.work.card(user_id, id))
    }

    fn cards_by_user(&self, user_id: Uuid) -> Result<Vec<CreditCard>, StoreError> {
        Ok(self.work.cards_by_user(user_id))
    }

    fn transaction(&self, user_id: Uuid, id: Uuid) -> Result<Option<Transaction>, StoreError> {
        Ok(self.work.transaction(user_id, id))
    }

    fn transactions_by_user(&self, user_id: Uuid) -> Result<Vec<Transaction>, StoreError> {
        Ok(self.work.transactions_by_user(user_id))
    }

    fn transactions_by_group(
        &self,
        user_id: Uuid,
        group_id: Uuid,
    ) -> Result<Vec<Transaction>, StoreError> {
        Ok(self.work.transactions_by_group(user_id, group_id))
    }

    fn due_recurring(&self, date: NaiveDate) -> Result<Vec<Transaction>, StoreError> {
        Ok(self.work.due_recurring(date))
    }

    fn invoice(&self, user_id: Uuid, id: Uuid) -> Result<Option<CreditCardInvoice>, StoreError> {
        Ok(self.work.invoice(user_id, id))
    }

    fn invoices_by_card(
        &self,
        user_id: Uuid,
        card_id: Uuid,
    ) -> Result<Vec<CreditCardInvoice>, StoreError> {
        Ok(self.work.invoices_by_card(user_id, card_id))
    }

    fn unpaid_invoice_total(&self, card_id: Uuid) -> Result<Decimal, StoreError> {
        Ok(self.work.unpaid_invoice_total(card_id))
    }
}

impl UnitOfWork for MemoryUnitOfWork<'_> {
    fn insert_account(&mut self, account: &Account) -> Result<(), StoreError> {
        self.work.accounts.insert(account.id, account.clone());
        Ok(())
    }

    fn update_account(&mut self, account: &Account) -> Result<(), StoreError> {
        match self.work.accounts.get_mut(&account.id) {
            Some(existing) if existing.user_id == account.user_id => {
                *existing = account.clone();
                Ok(())
            }
            _ => Err(StoreError::AccountNotFound),
        }
    }

    fn remove_account(&mut self, user_id: Uuid, id: Uuid) -> Result<(), StoreError> {
        match self.work.accounts.get(&id) {
            Some(a) if a.user_id == user_id => {
                self.work.accounts.remove(&id);
                Ok(())
            }
            _ => Err(StoreError::AccountNotFound),
        }
    }

    fn apply_balance_delta(&mut self, account_id: Uuid, delta: Decimal) -> Result<(), StoreError> {
        let account = self
            .work
            .accounts
            .get_mut(&account_id)
            .ok_or(StoreError::AccountNotFound)?;
        account.balance += delta;
        Ok(())
    }

    fn insert_card(&mut self, card: &CreditCard) -> Result<(), StoreError> {
        self.work.cards.insert(card.id, card.clone());
        Ok(())
    }

    fn update_card(&mut self, card: &CreditCard) -> Result<(), StoreError> {
        match self.work.cards.get_mut(&card.id) {
            Some(existing) if existing.user_id == card.user_id => {
                *existing = card.clone();
                Ok(())
            }
            _ => Err(StoreError::CardNotFound),
        }
    }

    fn remove_card(&mut self, user_id: Uuid, id: Uuid) -> Result<(), StoreError> {
        match self.work.cards.get(&id) {
            Some(c) if c.user_id == user_id => {
                self.work.cards.remove(&id);
                self.work.invoices.retain(|_, i| i.credit_card_id != id);
                Ok(())
            }
            _ => Err(StoreError::CardNotFound),
        }
    }

    fn insert_transaction(&mut self, tx: &Transaction) -> Result<(), StoreError> {
        self.work.transactions.insert(tx.id, tx.clone());
        Ok(())
    }

    fn update_transaction(&mut self, tx: &Transaction) -> Result<(), StoreError> {
        match self.work.transactions.get_mut(&tx.id) {
            Some(existing) if existing.user_id == tx.user_id => {
                *existing = tx.clone();
                Ok(())
            }
            _ => Err(StoreError::TransactionNotFound),
        }
    }

    fn remove_transaction(&mut self, user_id: Uuid, id: Uuid) -> Result<Transaction, StoreError> {
        let owned = self
            .work
            .transactions
            .get(&id)
            .is_some_and(|t| t.user_id == user_id);
        if !owned {
            return Err(StoreError::TransactionNotFound);
        }
        self.work
            .transactions
            .remove(&id)
            .ok_or(StoreError::TransactionNotFound)
    }

    fn remove_transactions_by_group(
        &mut self,
        user_id: Uuid,
        group_id: Uuid,
    ) -> Result<Vec<Transaction>, StoreError> {
        let removed = self.work.transactions_by_group(user_id, group_id);
        for tx in &removed {
            self.work.transactions.remove(&tx.id);
        }
        Ok(removed)
    }

    fn accrue_invoice(
        &mut self,
        card_id: Uuid,
        user_id: Uuid,
        month: ReferenceMonth,
        amount: Decimal,
    ) -> Result<(), StoreError> {
        let bucket = self
            .work
            .invoices
            .values_mut()
            .find(|i| i.credit_card_id == card_id && i.reference_month == month);
        match bucket {
            Some(invoice) => invoice.total += amount,
            None => {
                let invoice = CreditCardInvoice {
                    id: Uuid::new_v4(),
                    credit_card_id: card_id,
                    user_id,
                    reference_month: month,
                    total: amount,
                    paid: false,
                    paid_at: None,
                    paid_with_account_id: None,
                };
                self.work.invoices.insert(invoice.id, invoice);
            }
        }
        Ok(())
    }

    fn subtract_invoice(
        &mut self,
        card_id: Uuid,
        month: ReferenceMonth,
        amount: Decimal,
    ) -> Result<(), StoreError> {
        let bucket = self
            .work
            .invoices
            .values_mut()
            .find(|i| i.credit_card_id == card_id && i.reference_month == month);
        if let Some(invoice) = bucket {
            invoice.total = (invoice.total - amount).max(Decimal::ZERO);
        }
        Ok(())
    }

    fn mark_invoice_paid(
        &mut self,
        user_id: Uuid,
        invoice_id: Uuid,
        account_id: Uuid,
        paid_at: DateTime<Utc>,
    ) -> Result<CreditCardInvoice, StoreError> {
        match self.work.invoices.get_mut(&invoice_id) {
            Some(invoice) if invoice.user_id == user_id => {
                invoice.paid = true;
                invoice.paid_at = Some(paid_at);
                invoice.paid_with_account_id = Some(account_id);
                Ok(invoice.clone())
            }
            _ => Err(StoreError::InvoiceNotFound),
        }
    }

    fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        *self.guard = std::mem::take(&mut self.work);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::AccountKind;

    fn account(user_id: Uuid) -> Account {
        Account::new(
            user_id,
            "wallet".into(),
            AccountKind::Wallet,
            Decimal::from(100u32),
            None,
        )
    }

    #[test]
    fn commit_makes_writes_visible() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        let acc = account(user);
        let mut uow = store.begin().unwrap();
        uow.insert_account(&acc).unwrap();
        uow.commit().unwrap();

        assert_eq!(store.account(user, acc.id).unwrap(), Some(acc));
    }

    #[test]
    fn dropping_a_unit_of_work_rolls_back() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        let acc = account(user);
        {
            let mut uow = store.begin().unwrap();
            uow.insert_account(&acc).unwrap();
        }
        assert_eq!(store.account(user, acc.id).unwrap(), None);
    }

    #[test]
    fn balance_delta_requires_the_account() {
        let store = MemoryStore::new();
        let mut uow = store.begin().unwrap();
        let err = uow
            .apply_balance_delta(Uuid::new_v4(), Decimal::ONE)
            .unwrap_err();
        assert_eq!(err, StoreError::AccountNotFound);
    }

    #[test]
    fn queries_are_scoped_per_user() {
        let store = MemoryStore::new();
        let owner = Uuid::new_v4();
        let stranger = Uuid::new_v4();
        let acc = account(owner);
        let mut uow = store.begin().unwrap();
        uow.insert_account(&acc).unwrap();
        uow.commit().unwrap();

        assert!(store.account(stranger, acc.id).unwrap().is_none());
        assert!(store.accounts_by_user(stranger).unwrap().is_empty());
    }

    #[test]
    fn subtract_clamps_at_zero_and_ignores_missing_buckets() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        let card = Uuid::new_v4();
        let month = ReferenceMonth::new(2024, 5).unwrap();

        let mut uow = store.begin().unwrap();
        uow.accrue_invoice(card, user, month, Decimal::from(30u32))
            .unwrap();
        uow.subtract_invoice(card, month, Decimal::from(50u32))
            .unwrap();
        // a bucket that was never accrued
        uow.subtract_invoice(card, ReferenceMonth::new(2024, 6).unwrap(), Decimal::ONE)
            .unwrap();
        uow.commit().unwrap();

        let invoices = store.invoices_by_card(user, card).unwrap();
        assert_eq!(invoices.len(), 1);
        assert_eq!(invoices[0].total, Decimal::ZERO);
    }

    #[test]
    fn accrue_upserts_into_the_same_bucket() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        let card = Uuid::new_v4();
        let month = ReferenceMonth::new(2024, 5).unwrap();

        let mut uow = store.begin().unwrap();
        uow.accrue_invoice(card, user, month, Decimal::from(30u32))
            .unwrap();
        uow.accrue_invoice(card, user, month, Decimal::from(12u32))
            .unwrap();
        uow.commit().unwrap();

        let invoices = store.invoices_by_card(user, card).unwrap();
        assert_eq!(invoices.len(), 1);
        assert_eq!(invoices[0].total, Decimal::from(42u32));
        assert!(!invoices[0].paid);
    }
}
