//! Decimal helpers for balance deltas and installment splitting.

use rust_decimal::{Decimal, RoundingStrategy};

use super::entities::TransactionKind;

/// Signed effect of a transaction on an account balance: income adds, expense
/// subtracts.
pub fn signed_effect(kind: TransactionKind, amount: Decimal) -> Decimal {
    match kind {
        TransactionKind::Income => amount,
        TransactionKind::Expense => -amount,
    }
}

/// Per-installment share of a purchase, rounded to the currency's minor unit.
///
/// An uneven split can drift a cent against the original total across all
/// installments; there is no remainder reconciliation.
pub fn installment_share(total: Decimal, count: u32) -> Decimal {
    if count <= 1 {
        return total;
    }
    (total / Decimal::from(count)).round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}
