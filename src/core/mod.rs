//! Core logic of the ledger consistency engine.

mod cards;
mod entities;
mod invoice;
mod ledger;
mod money;
mod recurrence;

pub use cards::{CardPatch, CardService, CardView, NewCard};
pub use entities::{
    Account, AccountKind, CreditCard, CreditCardInvoice, Transaction, TransactionKind,
};
pub use invoice::{InvalidReferenceMonth, ReferenceMonth};
pub use ledger::{
    AccountPatch, LedgerError, LedgerService, NewAccount, NewTransaction, SweepReport,
    TransactionPatch, TransferInput,
};
pub use money::{installment_share, signed_effect};
pub use recurrence::{InvalidRecurrence, Recurrence, RecurrenceStatus};
