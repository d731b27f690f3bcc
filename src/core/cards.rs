//! Credit-card management and invoice settlement.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::store::{LedgerReads, LedgerStore};

use super::entities::{CreditCard, CreditCardInvoice};
use super::ledger::LedgerError;

/// A card together with its derived usage figures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardView {
    pub card: CreditCard,
    /// Sum of the card's unpaid invoice totals.
    pub used_amount: Decimal,
    pub available_limit: Decimal,
}

/// Input for [`CardService::create`].
#[derive(Debug, Clone)]
pub struct NewCard {
    pub name: String,
    pub limit: Decimal,
    pub closing_day: u32,
    pub due_day: u32,
    pub color: Option<String>,
}

/// Field-wise patch for [`CardService::update`].
#[derive(Debug, Clone, Default)]
pub struct CardPatch {
    pub name: Option<String>,
    pub limit: Option<Decimal>,
    pub closing_day: Option<u32>,
    pub due_day: Option<u32>,
    pub color: Option<Option<String>>,
}

/// Card CRUD plus the one path by which card spending reaches an account
/// balance: paying an invoice.
pub struct CardService<'a, S> {
    store: &'a S,
}

impl<'a, S: LedgerStore> CardService<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    pub fn create(&self, user_id: Uuid, input: NewCard) -> Result<CardView, LedgerError> {
        validate_day(input.closing_day)?;
        validate_day(input.due_day)?;
        if input.limit < Decimal::ZERO {
            return Err(LedgerError::NegativeLimit);
        }
        let card = CreditCard::new(
            user_id,
            input.name,
            input.limit,
            input.closing_day,
            input.due_day,
            input.color,
        );
        let mut uow = self.store.begin()?;
        uow.insert_card(&card)?;
        uow.commit()?;
        Ok(CardView {
            available_limit: card.limit,
            used_amount: Decimal::ZERO,
            card,
        })
    }

    pub fn update(
        &self,
        user_id: Uuid,
        id: Uuid,
        patch: CardPatch,
    ) -> Result<CardView, LedgerError> {
        let mut uow = self.store.begin()?;
        let mut card = uow.card(user_id, id)?.ok_or(LedgerError::CardNotFound)?;
        if let Some(name) = patch.name {
            card.name = name;
        }
        if let Some(limit) = patch.limit {
            if limit < Decimal::ZERO {
                return Err(LedgerError::NegativeLimit);
            }
            card.limit = limit;
        }
        if let Some(closing_day) = patch.closing_day {
            validate_day(closing_day)?;
            card.closing_day = closing_day;
        }
        if let Some(due_day) = patch.due_day {
            validate_day(due_day)?;
            card.due_day = due_day;
        }
        if let Some(color) = patch.color {
            card.color = color;
        }
        let used_amount = uow.unpaid_invoice_total(card.id)?;
        uow.update_card(&card)?;
        uow.commit()?;
        Ok(CardView {
            available_limit: card.limit - used_amount,
            used_amount,
            card,
        })
    }

    /// Removes a card and its invoice buckets. Transactions that referenced
    /// the card survive as history; their later reversal is a no-op.
    pub fn delete(&self, user_id: Uuid, id: Uuid) -> Result<(), LedgerError> {
        let mut uow = self.store.begin()?;
        uow.remove_card(user_id, id)?;
        uow.commit()?;
        Ok(())
    }

    pub fn card(&self, user_id: Uuid, id: Uuid) -> Result<CardView, LedgerError> {
        let card = self
            .store
            .card(user_id, id)?
            .ok_or(LedgerError::CardNotFound)?;
        let used_amount = self.store.unpaid_invoice_total(card.id)?;
        Ok(CardView {
            available_limit: card.limit - used_amount,
            used_amount,
            card,
        })
    }

    pub fn cards(&self, user_id: Uuid) -> Result<Vec<CardView>, LedgerError> {
        let mut views = Vec::new();
        for card in self.store.cards_by_user(user_id)? {
            let used_amount = self.store.unpaid_invoice_total(card.id)?;
            views.push(CardView {
                available_limit: card.limit - used_amount,
                used_amount,
                card,
            });
        }
        Ok(views)
    }

    /// A card's invoice buckets, newest month first.
    pub fn invoices(
        &self,
        user_id: Uuid,
        card_id: Uuid,
    ) -> Result<Vec<CreditCardInvoice>, LedgerError> {
        Ok(self.store.invoices_by_card(user_id, card_id)?)
    }

    /// Settles an invoice: debits the paying account by the invoice total and
    /// marks the invoice paid, atomically.
    pub fn pay_invoice(
        &self,
        user_id: Uuid,
        invoice_id: Uuid,
        account_id: Uuid,
    ) -> Result<CreditCardInvoice, LedgerError> {
        let mut uow = self.store.begin()?;
        let invoice = uow
            .invoice(user_id, invoice_id)?
            .ok_or(LedgerError::InvoiceNotFound)?;
        if invoice.paid {
            return Err(LedgerError::InvoiceAlreadyPaid);
        }
        uow.apply_balance_delta(account_id, -invoice.total)?;
        let paid = uow.mark_invoice_paid(user_id, invoice_id, account_id, Utc::now())?;
        uow.commit()?;
        info!(invoice = %invoice_id, account = %account_id, total = %paid.total, "invoice paid");
        Ok(paid)
    }
}

fn validate_day(day: u32) -> Result<(), LedgerError> {
    if (1..=31).contains(&day) {
        Ok(())
    } else {
        Err(LedgerError::InvalidDay)
    }
}
