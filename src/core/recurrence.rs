//! Cadence arithmetic and the per-definition recurrence state machine.

use chrono::{Days, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::entities::Transaction;

/// Error returned when a cadence string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidRecurrence;

impl fmt::Display for InvalidRecurrence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "recurrence must be daily, weekly, monthly or yearly")
    }
}

impl std::error::Error for InvalidRecurrence {}

/// How often a recurring definition fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Recurrence {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl Recurrence {
    /// The next due date after `from`. Month and year steps clamp to the end of
    /// shorter months (Jan 31 + 1 month = Feb 28/29).
    pub fn advance(&self, from: NaiveDate) -> Option<NaiveDate> {
        match self {
            Recurrence::Daily => from.checked_add_days(Days::new(1)),
            Recurrence::Weekly => from.checked_add_days(Days::new(7)),
            Recurrence::Monthly => from.checked_add_months(Months::new(1)),
            Recurrence::Yearly => from.checked_add_months(Months::new(12)),
        }
    }
}

impl fmt::Display for Recurrence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recurrence::Daily => write!(f, "daily"),
            Recurrence::Weekly => write!(f, "weekly"),
            Recurrence::Monthly => write!(f, "monthly"),
            Recurrence::Yearly => write!(f, "yearly"),
        }
    }
}

impl FromStr for Recurrence {
    type Err = InvalidRecurrence;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "daily" => Ok(Recurrence::Daily),
            "weekly" => Ok(Recurrence::Weekly),
            "monthly" => Ok(Recurrence::Monthly),
            "yearly" => Ok(Recurrence::Yearly),
            _ => Err(InvalidRecurrence),
        }
    }
}

/// Lifecycle of a recurring definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecurrenceStatus {
    /// Fires on its `next_due_date`.
    Active,
    /// Retains its schedule but is excluded from the sweep.
    Paused,
    /// Terminal; the cap was reached and `next_due_date` is cleared.
    Finished,
}

impl Transaction {
    pub fn recurrence_status(&self) -> RecurrenceStatus {
        if !self.recurring {
            RecurrenceStatus::Finished
        } else if self.recurrence_paused {
            RecurrenceStatus::Paused
        } else {
            RecurrenceStatus::Active
        }
    }

    /// Builds the concrete occurrence for this definition's current due date.
    ///
    /// The occurrence copies description, amount, kind, category and account —
    /// card attribution is not carried over — and is itself non-recurring.
    /// Returns `None` when the definition has no due date.
    pub fn materialize_occurrence(&self) -> Option<Transaction> {
        let due = self.next_due_date?;
        Some(Transaction {
            id: Uuid::new_v4(),
            user_id: self.user_id,
            description: self.description.clone(),
            amount: self.amount,
            kind: self.kind,
            category_id: self.category_id,
            account_id: self.account_id,
            credit_card_id: None,
            date: due,
            recurring: false,
            recurrence: None,
            next_due_date: None,
            recurrence_count: None,
            recurrence_current: 0,
            recurrence_group_id: Some(self.id),
            recurrence_paused: false,
            installments: None,
            installment_current: None,
            created_at: Utc::now(),
        })
    }

    /// Advances the definition past one fired occurrence: bumps the counter and
    /// either finishes (cap reached) or schedules the next due date.
    ///
    /// Returns `None` when the definition has no cadence or due date, or when
    /// the next date would overflow the calendar.
    pub fn advance_recurrence(&mut self) -> Option<()> {
        let due = self.next_due_date?;
        let cadence = self.recurrence?;
        self.recurrence_current += 1;
        match self.recurrence_count {
            Some(cap) if self.recurrence_current >= cap => {
                self.recurring = false;
                self.next_due_date = None;
            }
            _ => {
                self.next_due_date = Some(cadence.advance(due)?);
            }
        }
        Some(())
    }
}
