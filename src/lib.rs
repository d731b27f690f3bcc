//! Nexo Ledger
//!
//! The consistency engine behind a personal-finance service: it keeps account
//! balances, recurring-transaction schedules and credit-card invoices mutually
//! consistent across create, update, delete and transfer operations, including
//! the periodic batch materialization of recurring entries.

pub mod core;
pub mod notify;
pub mod store;
