use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::invoice::ReferenceMonth;
use super::recurrence::Recurrence;

/// Direction of a transaction's financial effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Income,
    Expense,
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionKind::Income => write!(f, "income"),
            TransactionKind::Expense => write!(f, "expense"),
        }
    }
}

impl FromStr for TransactionKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "income" => Ok(TransactionKind::Income),
            "expense" => Ok(TransactionKind::Expense),
            other => Err(format!("unknown transaction kind: {other}")),
        }
    }
}

/// Kind of account holding a balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountKind {
    Wallet,
    Checking,
    Digital,
    Investment,
}

impl fmt::Display for AccountKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountKind::Wallet => write!(f, "wallet"),
            AccountKind::Checking => write!(f, "checking"),
            AccountKind::Digital => write!(f, "digital"),
            AccountKind::Investment => write!(f, "investment"),
        }
    }
}

impl FromStr for AccountKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "wallet" => Ok(AccountKind::Wallet),
            "checking" => Ok(AccountKind::Checking),
            "digital" => Ok(AccountKind::Digital),
            "investment" => Ok(AccountKind::Investment),
            other => Err(format!("unknown account kind: {other}")),
        }
    }
}

/// A balance-holding account.
///
/// The balance is only ever moved through the store's delta primitive; it always
/// equals the signed sum of the account's surviving transactions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub kind: AccountKind,
    pub balance: Decimal,
    pub color: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn new(
        user_id: Uuid,
        name: String,
        kind: AccountKind,
        balance: Decimal,
        color: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            name,
            kind,
            balance,
            color,
            created_at: Utc::now(),
        }
    }
}

/// A ledger row: either a direct account debit/credit or a card-billed expense.
///
/// Recurring definitions carry the cadence fields; occurrences they spawn point
/// back at the definition through `recurrence_group_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub description: String,
    pub amount: Decimal,
    pub kind: TransactionKind,
    pub category_id: Option<Uuid>,
    pub account_id: Option<Uuid>,
    pub credit_card_id: Option<Uuid>,
    pub date: NaiveDate,
    pub recurring: bool,
    pub recurrence: Option<Recurrence>,
    pub next_due_date: Option<NaiveDate>,
    pub recurrence_count: Option<u32>,
    pub recurrence_current: u32,
    pub recurrence_group_id: Option<Uuid>,
    pub recurrence_paused: bool,
    pub installments: Option<u32>,
    pub installment_current: Option<u32>,
    pub created_at: DateTime<Utc>,
}

/// A credit card with a monthly statement cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditCard {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub limit: Decimal,
    /// Day of month after which purchases roll into the next statement.
    pub closing_day: u32,
    pub due_day: u32,
    pub color: Option<String>,
}

impl CreditCard {
    pub fn new(
        user_id: Uuid,
        name: String,
        limit: Decimal,
        closing_day: u32,
        due_day: u32,
        color: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            name,
            limit,
            closing_day,
            due_day,
            color,
        }
    }
}

/// One monthly invoice bucket of a credit card.
///
/// Buckets are created on first accrual and never deleted, only zeroed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditCardInvoice {
    pub id: Uuid,
    pub credit_card_id: Uuid,
    pub user_id: Uuid,
    pub reference_month: ReferenceMonth,
    pub total: Decimal,
    pub paid: bool,
    pub paid_at: Option<DateTime<Utc>>,
    pub paid_with_account_id: Option<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_through_str() {
        for kind in ["income", "expense"] {
            let parsed: TransactionKind = kind.parse().unwrap();
            assert_eq!(parsed.to_string(), kind);
        }
        assert!("transferal".parse::<TransactionKind>().is_err());
    }

    #[test]
    fn account_kind_round_trips_through_str() {
        for kind in ["wallet", "checking", "digital", "investment"] {
            let parsed: AccountKind = kind.parse().unwrap();
            assert_eq!(parsed.to_string(), kind);
        }
    }
}
