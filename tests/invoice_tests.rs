use chrono::NaiveDate;
use rust_decimal::Decimal;
use uuid::Uuid;

use nexo_ledger::core::{
    AccountKind, CardPatch, CardService, LedgerError, LedgerService, NewAccount, NewCard,
    NewTransaction, ReferenceMonth, TransactionKind, TransactionPatch,
};
use nexo_ledger::notify::LogNotifier;
use nexo_ledger::store::{LedgerStore, MemoryStore, UnitOfWork};

fn dec(s: &str) -> Decimal {
    s.parse().unwrap()
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn month(y: i32, m: u32) -> ReferenceMonth {
    ReferenceMonth::new(y, m).unwrap()
}

fn card_expense(card_id: Uuid, amount: &str, on: NaiveDate) -> NewTransaction {
    NewTransaction {
        description: "electronics".into(),
        amount: dec(amount),
        kind: TransactionKind::Expense,
        date: on,
        category_id: None,
        account_id: None,
        credit_card_id: Some(card_id),
        installments: None,
        recurring: false,
        recurrence: None,
        recurrence_count: None,
    }
}

struct Fixture {
    store: MemoryStore,
    user: Uuid,
}

impl Fixture {
    fn new() -> Self {
        Self {
            store: MemoryStore::new(),
            user: Uuid::new_v4(),
        }
    }

    fn ledger(&self) -> LedgerService<'_, MemoryStore, LogNotifier> {
        LedgerService::new(&self.store, LogNotifier::new())
    }

    fn cards(&self) -> CardService<'_, MemoryStore> {
        CardService::new(&self.store)
    }

    fn card_closing_on(&self, closing_day: u32) -> Uuid {
        self.cards()
            .create(
                self.user,
                NewCard {
                    name: "visa".into(),
                    limit: dec("1000.00"),
                    closing_day,
                    due_day: 5,
                    color: None,
                },
            )
            .unwrap()
            .card
            .id
    }

    fn account_with(&self, balance: &str) -> Uuid {
        self.ledger()
            .create_account(
                self.user,
                NewAccount {
                    name: "checking".into(),
                    kind: AccountKind::Checking,
                    balance: dec(balance),
                    color: None,
                },
            )
            .unwrap()
            .id
    }

    fn bucket_totals(&self, card_id: Uuid) -> Vec<(ReferenceMonth, Decimal)> {
        let mut invoices: Vec<_> = self
            .cards()
            .invoices(self.user, card_id)
            .unwrap()
            .into_iter()
            .map(|i| (i.reference_month, i.total))
            .collect();
        invoices.sort_by_key(|(m, _)| *m);
        invoices
    }
}

#[test]
fn purchases_bucket_by_closing_day() {
    let fx = Fixture::new();
    let card = fx.card_closing_on(25);
    let ledger = fx.ledger();

    ledger
        .create(fx.user, card_expense(card, "10.00", date(2024, 3, 25)))
        .unwrap();
    ledger
        .create(fx.user, card_expense(card, "20.00", date(2024, 3, 26)))
        .unwrap();

    assert_eq!(
        fx.bucket_totals(card),
        vec![
            (month(2024, 3), dec("10.00")),
            (month(2024, 4), dec("20.00")),
        ]
    );
}

#[test]
fn december_purchases_after_close_land_in_january() {
    let fx = Fixture::new();
    let card = fx.card_closing_on(25);

    fx.ledger()
        .create(fx.user, card_expense(card, "99.90", date(2024, 12, 26)))
        .unwrap();

    assert_eq!(fx.bucket_totals(card), vec![(month(2025, 1), dec("99.90"))]);
}

#[test]
fn card_expenses_never_touch_account_balances() {
    let fx = Fixture::new();
    let card = fx.card_closing_on(25);
    let account = fx.account_with("100.00");
    let ledger = fx.ledger();

    ledger
        .create(fx.user, card_expense(card, "50.00", date(2024, 3, 10)))
        .unwrap();

    let balance = ledger
        .accounts(fx.user)
        .unwrap()
        .into_iter()
        .find(|a| a.id == account)
        .unwrap()
        .balance;
    assert_eq!(balance, dec("100.00"));
}

#[test]
fn installments_spread_across_consecutive_months() {
    let fx = Fixture::new();
    let card = fx.card_closing_on(25);
    let mut input = card_expense(card, "90.00", date(2024, 1, 10));
    input.installments = Some(3);

    let tx = fx.ledger().create(fx.user, input).unwrap();
    assert_eq!(tx.installments, Some(3));
    assert_eq!(tx.installment_current, Some(1));

    assert_eq!(
        fx.bucket_totals(card),
        vec![
            (month(2024, 1), dec("30.00")),
            (month(2024, 2), dec("30.00")),
            (month(2024, 3), dec("30.00")),
        ]
    );
}

// Splitting 10.00 in three accrues 3.33 per bucket and quietly loses a cent
// against the purchase total.
#[test]
fn uneven_installment_split_drifts_by_a_cent() {
    let fx = Fixture::new();
    let card = fx.card_closing_on(25);
    let mut input = card_expense(card, "10.00", date(2024, 1, 10));
    input.installments = Some(3);

    fx.ledger().create(fx.user, input).unwrap();

    let accrued: Decimal = fx.bucket_totals(card).iter().map(|(_, t)| *t).sum();
    assert_eq!(accrued, dec("9.99"));
}

#[test]
fn installments_after_the_close_shift_every_bucket() {
    let fx = Fixture::new();
    let card = fx.card_closing_on(25);
    let mut input = card_expense(card, "60.00", date(2024, 1, 28));
    input.installments = Some(2);

    fx.ledger().create(fx.user, input).unwrap();

    assert_eq!(
        fx.bucket_totals(card),
        vec![
            (month(2024, 2), dec("30.00")),
            (month(2024, 3), dec("30.00")),
        ]
    );
}

#[test]
fn deleting_an_installment_purchase_reverses_every_bucket() {
    let fx = Fixture::new();
    let card = fx.card_closing_on(25);
    let mut input = card_expense(card, "90.00", date(2024, 1, 10));
    input.installments = Some(3);

    let tx = fx.ledger().create(fx.user, input).unwrap();
    fx.ledger().delete(fx.user, tx.id).unwrap();

    // buckets survive, zeroed
    assert_eq!(
        fx.bucket_totals(card),
        vec![
            (month(2024, 1), Decimal::ZERO),
            (month(2024, 2), Decimal::ZERO),
            (month(2024, 3), Decimal::ZERO),
        ]
    );
}

#[test]
fn reversal_clamps_buckets_at_zero() {
    let fx = Fixture::new();
    let card = fx.card_closing_on(25);
    let tx = fx
        .ledger()
        .create(fx.user, card_expense(card, "30.00", date(2024, 3, 10)))
        .unwrap();

    // someone already drained part of the bucket out from under the row
    let mut uow = fx.store.begin().unwrap();
    uow.subtract_invoice(card, month(2024, 3), dec("20.00")).unwrap();
    uow.commit().unwrap();

    fx.ledger().delete(fx.user, tx.id).unwrap();

    assert_eq!(fx.bucket_totals(card), vec![(month(2024, 3), Decimal::ZERO)]);
}

#[test]
fn moving_an_expense_from_account_to_card_reattributes_it() {
    let fx = Fixture::new();
    let card = fx.card_closing_on(25);
    let account = fx.account_with("100.00");
    let ledger = fx.ledger();

    let mut input = card_expense(card, "40.00", date(2024, 3, 10));
    input.credit_card_id = None;
    input.account_id = Some(account);
    let tx = ledger.create(fx.user, input).unwrap();

    let moved = ledger
        .update(
            fx.user,
            tx.id,
            TransactionPatch {
                credit_card_id: Some(Some(card)),
                ..Default::default()
            },
        )
        .unwrap();

    assert_eq!(moved.credit_card_id, Some(card));
    assert_eq!(moved.account_id, None);
    let balance = ledger
        .accounts(fx.user)
        .unwrap()
        .into_iter()
        .find(|a| a.id == account)
        .unwrap()
        .balance;
    assert_eq!(balance, dec("100.00"));
    assert_eq!(fx.bucket_totals(card), vec![(month(2024, 3), dec("40.00"))]);
}

#[test]
fn paying_an_invoice_debits_the_account_once() {
    let fx = Fixture::new();
    let card = fx.card_closing_on(25);
    let account = fx.account_with("500.00");
    let ledger = fx.ledger();
    let cards = fx.cards();

    ledger
        .create(fx.user, card_expense(card, "120.00", date(2024, 3, 10)))
        .unwrap();
    let invoice = cards.invoices(fx.user, card).unwrap().remove(0);

    let paid = cards.pay_invoice(fx.user, invoice.id, account).unwrap();
    assert!(paid.paid);
    assert!(paid.paid_at.is_some());
    assert_eq!(paid.paid_with_account_id, Some(account));

    let balance = ledger
        .accounts(fx.user)
        .unwrap()
        .into_iter()
        .find(|a| a.id == account)
        .unwrap()
        .balance;
    assert_eq!(balance, dec("380.00"));

    assert_eq!(
        cards.pay_invoice(fx.user, invoice.id, account).unwrap_err(),
        LedgerError::InvoiceAlreadyPaid
    );
    assert_eq!(
        cards.pay_invoice(fx.user, Uuid::new_v4(), account).unwrap_err(),
        LedgerError::InvoiceNotFound
    );
}

#[test]
fn failed_payment_leaves_the_invoice_open() {
    let fx = Fixture::new();
    let card = fx.card_closing_on(25);
    let ledger = fx.ledger();
    let cards = fx.cards();

    ledger
        .create(fx.user, card_expense(card, "120.00", date(2024, 3, 10)))
        .unwrap();
    let invoice = cards.invoices(fx.user, card).unwrap().remove(0);

    let err = cards
        .pay_invoice(fx.user, invoice.id, Uuid::new_v4())
        .unwrap_err();
    assert_eq!(err, LedgerError::AccountNotFound);

    let invoice = cards.invoices(fx.user, card).unwrap().remove(0);
    assert!(!invoice.paid);
    assert_eq!(invoice.total, dec("120.00"));
}

#[test]
fn used_amount_counts_only_unpaid_invoices() {
    let fx = Fixture::new();
    let card = fx.card_closing_on(25);
    let account = fx.account_with("1000.00");
    let ledger = fx.ledger();
    let cards = fx.cards();

    ledger
        .create(fx.user, card_expense(card, "100.00", date(2024, 3, 10)))
        .unwrap();
    ledger
        .create(fx.user, card_expense(card, "250.00", date(2024, 4, 10)))
        .unwrap();

    let view = cards.card(fx.user, card).unwrap();
    assert_eq!(view.used_amount, dec("350.00"));
    assert_eq!(view.available_limit, dec("650.00"));

    let march = cards
        .invoices(fx.user, card)
        .unwrap()
        .into_iter()
        .find(|i| i.reference_month == month(2024, 3))
        .unwrap();
    cards.pay_invoice(fx.user, march.id, account).unwrap();

    let view = cards.card(fx.user, card).unwrap();
    assert_eq!(view.used_amount, dec("250.00"));
    assert_eq!(view.available_limit, dec("750.00"));
}

#[test]
fn card_days_are_validated() {
    let fx = Fixture::new();
    let cards = fx.cards();

    let err = cards
        .create(
            fx.user,
            NewCard {
                name: "visa".into(),
                limit: dec("1000.00"),
                closing_day: 0,
                due_day: 5,
                color: None,
            },
        )
        .unwrap_err();
    assert_eq!(err, LedgerError::InvalidDay);

    let card = fx.card_closing_on(25);
    assert_eq!(
        cards
            .update(
                fx.user,
                card,
                CardPatch {
                    due_day: Some(32),
                    ..Default::default()
                },
            )
            .unwrap_err(),
        LedgerError::InvalidDay
    );
    assert_eq!(
        cards
            .update(
                fx.user,
                card,
                CardPatch {
                    limit: Some(dec("-1.00")),
                    ..Default::default()
                },
            )
            .unwrap_err(),
        LedgerError::NegativeLimit
    );
}

#[test]
fn deleting_a_card_orphans_its_history_rows() {
    let fx = Fixture::new();
    let card = fx.card_closing_on(25);
    let ledger = fx.ledger();
    let cards = fx.cards();

    let tx = ledger
        .create(fx.user, card_expense(card, "30.00", date(2024, 3, 10)))
        .unwrap();
    cards.delete(fx.user, card).unwrap();

    // invoices are gone with the card; the row's reversal silently no-ops
    assert!(cards.invoices(fx.user, card).unwrap().is_empty());
    ledger.delete(fx.user, tx.id).unwrap();
    assert!(ledger.transactions(fx.user).unwrap().is_empty());
}

#[test]
fn missing_card_fails_the_creating_operation() {
    let fx = Fixture::new();
    let ledger = fx.ledger();

    let err = ledger
        .create(
            fx.user,
            card_expense(Uuid::new_v4(), "30.00", date(2024, 3, 10)),
        )
        .unwrap_err();
    assert_eq!(err, LedgerError::CardNotFound);
    assert!(ledger.transactions(fx.user).unwrap().is_empty());
}
