//! The ledger orchestrator: every mutation of financial state passes through
//! here, inside exactly one unit of work.

use chrono::{Months, NaiveDate, Utc};
use rust_decimal::Decimal;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::notify::PushNotifier;
use crate::store::{LedgerReads, LedgerStore, StoreError, UnitOfWork};

use super::entities::{Account, AccountKind, Transaction, TransactionKind};
use super::invoice::ReferenceMonth;
use super::money::{installment_share, signed_effect};
use super::recurrence::{Recurrence, RecurrenceStatus};

/// Errors surfaced by the ledger and card services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    AccountNotFound,
    CardNotFound,
    TransactionNotFound,
    InvoiceNotFound,
    /// The invoice has already been settled.
    InvoiceAlreadyPaid,
    /// The amount provided is not positive.
    NonPositiveAmount,
    /// A card limit cannot be negative.
    NegativeLimit,
    /// The installment count must be at least one.
    InvalidInstallments,
    /// Closing and due days must fall within a month.
    InvalidDay,
    /// The transaction names neither an account nor a credit card.
    MissingAttribution,
    /// The transaction names both an account and a credit card.
    ConflictingAttribution,
    /// Only expenses can be billed to a credit card.
    CardRequiresExpense,
    /// A recurring transaction needs a cadence.
    MissingCadence,
    /// The transaction is not a recurring definition.
    NotRecurring,
    /// Transfer source and destination accounts are identical.
    SameAccount,
    /// Date arithmetic left the supported calendar range.
    DateOutOfRange,
    /// The store backend failed.
    Store(StoreError),
}

impl std::fmt::Display for LedgerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LedgerError::AccountNotFound => write!(f, "account not found"),
            LedgerError::CardNotFound => write!(f, "credit card not found"),
            LedgerError::TransactionNotFound => write!(f, "transaction not found"),
            LedgerError::InvoiceNotFound => write!(f, "invoice not found"),
            LedgerError::InvoiceAlreadyPaid => write!(f, "invoice is already paid"),
            LedgerError::NonPositiveAmount => write!(f, "amount must be positive"),
            LedgerError::NegativeLimit => write!(f, "card limit must not be negative"),
            LedgerError::InvalidInstallments => {
                write!(f, "installment count must be at least one")
            }
            LedgerError::InvalidDay => write!(f, "day of month must be between 1 and 31"),
            LedgerError::MissingAttribution => {
                write!(f, "transaction needs an account or a credit card")
            }
            LedgerError::ConflictingAttribution => {
                write!(f, "transaction cannot name both an account and a credit card")
            }
            LedgerError::CardRequiresExpense => {
                write!(f, "only expenses can be billed to a credit card")
            }
            LedgerError::MissingCadence => write!(f, "recurring transaction needs a cadence"),
            LedgerError::NotRecurring => write!(f, "transaction is not a recurring definition"),
            LedgerError::SameAccount => write!(f, "transfer accounts must differ"),
            LedgerError::DateOutOfRange => write!(f, "date arithmetic out of range"),
            LedgerError::Store(e) => write!(f, "store error: {e}"),
        }
    }
}

impl std::error::Error for LedgerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LedgerError::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for LedgerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::AccountNotFound => LedgerError::AccountNotFound,
            StoreError::CardNotFound => LedgerError::CardNotFound,
            StoreError::TransactionNotFound => LedgerError::TransactionNotFound,
            StoreError::InvoiceNotFound => LedgerError::InvoiceNotFound,
            StoreError::Backend(_) => LedgerError::Store(e),
        }
    }
}

/// Input for [`LedgerService::create`].
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub description: String,
    pub amount: Decimal,
    pub kind: TransactionKind,
    pub date: NaiveDate,
    pub category_id: Option<Uuid>,
    pub account_id: Option<Uuid>,
    pub credit_card_id: Option<Uuid>,
    pub installments: Option<u32>,
    pub recurring: bool,
    pub recurrence: Option<Recurrence>,
    pub recurrence_count: Option<u32>,
}

/// Field-wise patch for [`LedgerService::update`]. `Some(None)` on a nullable
/// field clears it.
#[derive(Debug, Clone, Default)]
pub struct TransactionPatch {
    pub description: Option<String>,
    pub amount: Option<Decimal>,
    pub kind: Option<TransactionKind>,
    pub category_id: Option<Option<Uuid>>,
    pub account_id: Option<Option<Uuid>>,
    pub credit_card_id: Option<Option<Uuid>>,
    pub date: Option<NaiveDate>,
    pub installments: Option<Option<u32>>,
    pub recurring: Option<bool>,
    pub recurrence: Option<Option<Recurrence>>,
    pub next_due_date: Option<Option<NaiveDate>>,
    pub recurrence_paused: Option<bool>,
}

/// Input for [`LedgerService::transfer`].
#[derive(Debug, Clone)]
pub struct TransferInput {
    pub from_account_id: Uuid,
    pub to_account_id: Uuid,
    pub amount: Decimal,
    pub description: Option<String>,
    pub date: NaiveDate,
}

/// Input for [`LedgerService::create_account`].
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub name: String,
    pub kind: AccountKind,
    pub balance: Decimal,
    pub color: Option<String>,
}

/// Field-wise patch for [`LedgerService::update_account`]. The balance is
/// deliberately absent: it only moves through transaction effects.
#[derive(Debug, Clone, Default)]
pub struct AccountPatch {
    pub name: Option<String>,
    pub kind: Option<AccountKind>,
    pub color: Option<Option<String>>,
}

/// Outcome of one batch recurrence sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub processed: usize,
    pub failed: usize,
}

/// Orchestrates transactions, transfers and the recurrence sweep over a store
/// and a push-notification channel.
pub struct LedgerService<'a, S, N> {
    store: &'a S,
    notifier: N,
}

impl<'a, S: LedgerStore, N: PushNotifier> LedgerService<'a, S, N> {
    pub fn new(store: &'a S, notifier: N) -> Self {
        Self { store, notifier }
    }

    /// Creates a transaction and applies its financial effect, all in one unit
    /// of work.
    pub fn create(&self, user_id: Uuid, input: NewTransaction) -> Result<Transaction, LedgerError> {
        if input.amount <= Decimal::ZERO {
            return Err(LedgerError::NonPositiveAmount);
        }
        if input.installments.is_some_and(|n| n == 0) {
            return Err(LedgerError::InvalidInstallments);
        }
        match input.kind {
            TransactionKind::Income => {
                if input.credit_card_id.is_some() {
                    return Err(LedgerError::CardRequiresExpense);
                }
                if input.account_id.is_none() {
                    return Err(LedgerError::MissingAttribution);
                }
            }
            TransactionKind::Expense => match (input.account_id, input.credit_card_id) {
                (None, None) => return Err(LedgerError::MissingAttribution),
                (Some(_), Some(_)) => return Err(LedgerError::ConflictingAttribution),
                _ => {}
            },
        }

        let use_card = input.credit_card_id.is_some();
        let (recurrence, next_due_date) = if input.recurring {
            let cadence = input.recurrence.ok_or(LedgerError::MissingCadence)?;
            let next = cadence
                .advance(input.date)
                .ok_or(LedgerError::DateOutOfRange)?;
            (Some(cadence), Some(next))
        } else {
            (None, None)
        };
        let installments = if use_card { input.installments } else { None };

        let tx = Transaction {
            id: Uuid::new_v4(),
            user_id,
            description: input.description,
            amount: input.amount,
            kind: input.kind,
            category_id: input.category_id,
            account_id: input.account_id,
            credit_card_id: input.credit_card_id,
            date: input.date,
            recurring: input.recurring,
            recurrence,
            next_due_date,
            recurrence_count: if input.recurring {
                input.recurrence_count
            } else {
                None
            },
            recurrence_current: if input.recurring { 1 } else { 0 },
            recurrence_group_id: None,
            recurrence_paused: false,
            installments,
            installment_current: installments.map(|_| 1),
            created_at: Utc::now(),
        };

        let mut uow = self.store.begin()?;
        apply_effect(uow.as_mut(), &tx)?;
        uow.insert_transaction(&tx)?;
        uow.commit()?;
        info!(id = %tx.id, kind = %tx.kind, "transaction created");
        Ok(tx)
    }

    /// Applies a patch by reversing the stored row's financial effect and
    /// re-applying the merged row's, never by patching money fields in place.
    pub fn update(
        &self,
        user_id: Uuid,
        id: Uuid,
        patch: TransactionPatch,
    ) -> Result<Transaction, LedgerError> {
        let mut uow = self.store.begin()?;
        let current = uow
            .transaction(user_id, id)?
            .ok_or(LedgerError::TransactionNotFound)?;
        let merged = merge_patch(&current, patch)?;
        unapply_effect(uow.as_mut(), &current)?;
        apply_effect(uow.as_mut(), &merged)?;
        uow.update_transaction(&merged)?;
        uow.commit()?;
        Ok(merged)
    }

    /// Removes a transaction, reversing its financial effect first.
    pub fn delete(&self, user_id: Uuid, id: Uuid) -> Result<(), LedgerError> {
        let mut uow = self.store.begin()?;
        let removed = uow.remove_transaction(user_id, id)?;
        unapply_effect(uow.as_mut(), &removed)?;
        uow.commit()?;
        info!(%id, "transaction deleted");
        Ok(())
    }

    /// Moves money between two accounts and records the two audit legs.
    pub fn transfer(&self, user_id: Uuid, input: TransferInput) -> Result<(), LedgerError> {
        if input.amount <= Decimal::ZERO {
            return Err(LedgerError::NonPositiveAmount);
        }
        if input.from_account_id == input.to_account_id {
            return Err(LedgerError::SameAccount);
        }

        let mut uow = self.store.begin()?;
        uow.apply_balance_delta(input.from_account_id, -input.amount)?;
        uow.apply_balance_delta(input.to_account_id, input.amount)?;
        let sent = transfer_leg(
            user_id,
            input.from_account_id,
            TransactionKind::Expense,
            input.amount,
            input
                .description
                .clone()
                .unwrap_or_else(|| "Transfer sent".into()),
            input.date,
        );
        let received = transfer_leg(
            user_id,
            input.to_account_id,
            TransactionKind::Income,
            input.amount,
            input.description.unwrap_or_else(|| "Transfer received".into()),
            input.date,
        );
        uow.insert_transaction(&sent)?;
        uow.insert_transaction(&received)?;
        uow.commit()?;
        info!(from = %input.from_account_id, to = %input.to_account_id, "transfer executed");
        Ok(())
    }

    /// Materializes every active recurring definition due on or before
    /// `today`, one unit of work per definition. A failing definition is
    /// logged and skipped so the rest of the sweep makes progress.
    pub fn sweep(&self, today: NaiveDate) -> Result<SweepReport, LedgerError> {
        let due = self.store.due_recurring(today)?;
        let mut report = SweepReport::default();
        for def in due {
            match self.materialize_one(&def, today) {
                Ok(Some((definition, occurrence))) => {
                    report.processed += 1;
                    self.notify_occurrence(&definition, &occurrence);
                }
                Ok(None) => {}
                Err(e) => {
                    report.failed += 1;
                    error!(definition = %def.id, error = %e, "skipping recurring definition");
                }
            }
        }
        info!(
            processed = report.processed,
            failed = report.failed,
            "recurrence sweep finished"
        );
        Ok(report)
    }

    fn materialize_one(
        &self,
        def: &Transaction,
        today: NaiveDate,
    ) -> Result<Option<(Transaction, Transaction)>, LedgerError> {
        let mut uow = self.store.begin()?;
        // Re-read inside the unit of work; the schedule may have moved since
        // the due list was fetched.
        let Some(mut definition) = uow.transaction(def.user_id, def.id)? else {
            return Ok(None);
        };
        if definition.recurrence_status() != RecurrenceStatus::Active {
            return Ok(None);
        }
        let Some(due) = definition.next_due_date else {
            return Ok(None);
        };
        if due > today {
            return Ok(None);
        }

        let occurrence = definition
            .materialize_occurrence()
            .ok_or(LedgerError::DateOutOfRange)?;
        uow.insert_transaction(&occurrence)?;
        if let Some(account_id) = occurrence.account_id {
            uow.apply_balance_delta(account_id, signed_effect(occurrence.kind, occurrence.amount))?;
        }
        definition
            .advance_recurrence()
            .ok_or(LedgerError::DateOutOfRange)?;
        uow.update_transaction(&definition)?;
        uow.commit()?;
        Ok(Some((definition, occurrence)))
    }

    fn notify_occurrence(&self, definition: &Transaction, occurrence: &Transaction) {
        let title = match occurrence.kind {
            TransactionKind::Income => "Recurring income posted",
            TransactionKind::Expense => "Recurring expense posted",
        };
        let body = match definition.recurrence_count {
            Some(cap) => format!(
                "{}: {} ({}/{})",
                occurrence.description, occurrence.amount, definition.recurrence_current, cap
            ),
            None => format!("{}: {}", occurrence.description, occurrence.amount),
        };
        if let Err(reason) = self
            .notifier
            .send_push(occurrence.user_id, title, &body)
        {
            warn!(user = %occurrence.user_id, reason = %reason, "push notification failed");
        }
    }

    /// Flips only the pause flag of a recurring definition.
    pub fn toggle_pause(
        &self,
        user_id: Uuid,
        id: Uuid,
        paused: bool,
    ) -> Result<Transaction, LedgerError> {
        let mut uow = self.store.begin()?;
        let mut definition = uow
            .transaction(user_id, id)?
            .ok_or(LedgerError::TransactionNotFound)?;
        if !definition.recurring {
            return Err(LedgerError::NotRecurring);
        }
        definition.recurrence_paused = paused;
        uow.update_transaction(&definition)?;
        uow.commit()?;
        Ok(definition)
    }

    /// Deletes a recurring definition together with every occurrence it ever
    /// produced, reversing each row's financial effect. All-or-nothing.
    pub fn delete_with_history(
        &self,
        user_id: Uuid,
        definition_id: Uuid,
    ) -> Result<(), LedgerError> {
        let mut uow = self.store.begin()?;
        let occurrences = uow.remove_transactions_by_group(user_id, definition_id)?;
        for occurrence in &occurrences {
            unapply_effect(uow.as_mut(), occurrence)?;
        }
        match uow.remove_transaction(user_id, definition_id) {
            Ok(definition) => unapply_effect(uow.as_mut(), &definition)?,
            // the definition may already be gone; orphaned occurrences still
            // clean up
            Err(StoreError::TransactionNotFound) if !occurrences.is_empty() => {}
            Err(e) => return Err(e.into()),
        }
        uow.commit()?;
        info!(definition = %definition_id, occurrences = occurrences.len(), "recurrence deleted with history");
        Ok(())
    }

    pub fn transaction(&self, user_id: Uuid, id: Uuid) -> Result<Transaction, LedgerError> {
        self.store
            .transaction(user_id, id)?
            .ok_or(LedgerError::TransactionNotFound)
    }

    pub fn transactions(&self, user_id: Uuid) -> Result<Vec<Transaction>, LedgerError> {
        Ok(self.store.transactions_by_user(user_id)?)
    }

    /// Occurrences materialized from a recurring definition, oldest first.
    pub fn occurrences(
        &self,
        user_id: Uuid,
        group_id: Uuid,
    ) -> Result<Vec<Transaction>, LedgerError> {
        Ok(self.store.transactions_by_group(user_id, group_id)?)
    }

    pub fn create_account(&self, user_id: Uuid, input: NewAccount) -> Result<Account, LedgerError> {
        let account = Account::new(user_id, input.name, input.kind, input.balance, input.color);
        let mut uow = self.store.begin()?;
        uow.insert_account(&account)?;
        uow.commit()?;
        Ok(account)
    }

    pub fn update_account(
        &self,
        user_id: Uuid,
        id: Uuid,
        patch: AccountPatch,
    ) -> Result<Account, LedgerError> {
        let mut uow = self.store.begin()?;
        let mut account = uow
            .account(user_id, id)?
            .ok_or(LedgerError::AccountNotFound)?;
        if let Some(name) = patch.name {
            account.name = name;
        }
        if let Some(kind) = patch.kind {
            account.kind = kind;
        }
        if let Some(color) = patch.color {
            account.color = color;
        }
        uow.update_account(&account)?;
        uow.commit()?;
        Ok(account)
    }

    pub fn delete_account(&self, user_id: Uuid, id: Uuid) -> Result<(), LedgerError> {
        let mut uow = self.store.begin()?;
        uow.remove_account(user_id, id)?;
        uow.commit()?;
        Ok(())
    }

    pub fn accounts(&self, user_id: Uuid) -> Result<Vec<Account>, LedgerError> {
        Ok(self.store.accounts_by_user(user_id)?)
    }
}

fn transfer_leg(
    user_id: Uuid,
    account_id: Uuid,
    kind: TransactionKind,
    amount: Decimal,
    description: String,
    date: NaiveDate,
) -> Transaction {
    Transaction {
        id: Uuid::new_v4(),
        user_id,
        description,
        amount,
        kind,
        category_id: None,
        account_id: Some(account_id),
        credit_card_id: None,
        date,
        recurring: false,
        recurrence: None,
        next_due_date: None,
        recurrence_count: None,
        recurrence_current: 0,
        recurrence_group_id: None,
        recurrence_paused: false,
        installments: None,
        installment_current: None,
        created_at: Utc::now(),
    }
}

fn merge_patch(current: &Transaction, patch: TransactionPatch) -> Result<Transaction, LedgerError> {
    let mut merged = current.clone();
    if let Some(description) = patch.description {
        merged.description = description;
    }
    if let Some(amount) = patch.amount {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::NonPositiveAmount);
        }
        merged.amount = amount;
    }
    if let Some(kind) = patch.kind {
        merged.kind = kind;
    }
    if let Some(category_id) = patch.category_id {
        merged.category_id = category_id;
    }
    if let Some(account_id) = patch.account_id {
        merged.account_id = account_id;
    }
    if let Some(credit_card_id) = patch.credit_card_id {
        merged.credit_card_id = credit_card_id;
    }
    if let Some(date) = patch.date {
        merged.date = date;
    }
    if let Some(installments) = patch.installments {
        if installments == Some(0) {
            return Err(LedgerError::InvalidInstallments);
        }
        merged.installments = installments;
    }
    if let Some(recurring) = patch.recurring {
        merged.recurring = recurring;
    }
    if let Some(recurrence) = patch.recurrence {
        merged.recurrence = recurrence;
    }
    if let Some(next_due_date) = patch.next_due_date {
        merged.next_due_date = next_due_date;
    }
    if let Some(paused) = patch.recurrence_paused {
        merged.recurrence_paused = paused;
    }
    // moving onto a card clears the account reference; cards only bill expenses
    if merged.credit_card_id.is_some() {
        if merged.kind == TransactionKind::Income {
            return Err(LedgerError::CardRequiresExpense);
        }
        merged.account_id = None;
    }
    Ok(merged)
}

/// Every invoice bucket a card transaction touches, with the per-installment
/// share accrued into each. Derivable from the row's own stored fields alone,
/// so a reversal can always be recomputed.
fn invoice_buckets(
    tx: &Transaction,
    closing_day: u32,
) -> Result<Vec<(ReferenceMonth, Decimal)>, LedgerError> {
    let count = tx.installments.unwrap_or(1).max(1);
    let share = installment_share(tx.amount, count);
    let mut buckets = Vec::with_capacity(count as usize);
    for i in 0..count {
        let date = tx
            .date
            .checked_add_months(Months::new(i))
            .ok_or(LedgerError::DateOutOfRange)?;
        buckets.push((ReferenceMonth::bucket_for(date, closing_day), share));
    }
    Ok(buckets)
}

/// Applies the forward financial effect of a transaction: balance delta for
/// account rows, invoice accrual for card rows, nothing for bare history rows.
fn apply_effect(uow: &mut (dyn UnitOfWork + '_), tx: &Transaction) -> Result<(), LedgerError> {
    if let Some(card_id) = tx.credit_card_id {
        let card = uow
            .card(tx.user_id, card_id)?
            .ok_or(LedgerError::CardNotFound)?;
        for (month, share) in invoice_buckets(tx, card.closing_day)? {
            uow.accrue_invoice(card_id, tx.user_id, month, share)?;
        }
    } else if let Some(account_id) = tx.account_id {
        uow.apply_balance_delta(account_id, signed_effect(tx.kind, tx.amount))?;
    }
    Ok(())
}

/// Reverses exactly what [`apply_effect`] applied, recomputed from the row's
/// stored fields. Buckets clamp at zero; a vanished card makes the card-side
/// reversal a no-op.
fn unapply_effect(uow: &mut (dyn UnitOfWork + '_), tx: &Transaction) -> Result<(), LedgerError> {
    if let Some(card_id) = tx.credit_card_id {
        let Some(card) = uow.card(tx.user_id, card_id)? else {
            return Ok(());
        };
        for (month, share) in invoice_buckets(tx, card.closing_day)? {
            uow.subtract_invoice(card_id, month, share)?;
        }
    } else if let Some(account_id) = tx.account_id {
        uow.apply_balance_delta(account_id, -signed_effect(tx.kind, tx.amount))?;
    }
    Ok(())
}
