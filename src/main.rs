use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use cron::Schedule;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use nexo_ledger::core::{
    AccountKind, CardService, LedgerService, NewAccount, NewCard, NewTransaction, Recurrence,
    Transaction, TransactionKind, TransferInput,
};
use nexo_ledger::notify::LogNotifier;
use nexo_ledger::store::{MemoryState, MemoryStore};

#[derive(Serialize, Deserialize, Default)]
struct LedgerConfig {
    state_file: Option<String>,
}

#[derive(Serialize, Deserialize, Default)]
struct Config {
    ledger: LedgerConfig,
}

#[derive(Parser)]
#[command(name = "nexo-ledger", about = "Operate the ledger engine from the command line")]
struct Cli {
    /// JSON state file holding accounts, cards and transactions
    #[arg(long, default_value = "ledger.json")]
    file: PathBuf,
    /// Optional config.toml overriding defaults
    #[arg(long)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an account
    AddAccount {
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "checking")]
        kind: String,
        #[arg(long, default_value = "0")]
        balance: String,
        #[arg(long)]
        color: Option<String>,
    },
    /// List accounts with balances
    Accounts,
    /// Create a credit card
    AddCard {
        #[arg(long)]
        name: String,
        #[arg(long)]
        limit: String,
        #[arg(long)]
        closing_day: u32,
        #[arg(long)]
        due_day: u32,
        #[arg(long)]
        color: Option<String>,
    },
    /// List credit cards with used and available limits
    Cards,
    /// List the invoices of a credit card
    Invoices {
        #[arg(long)]
        card: String,
    },
    /// Record a transaction
    Add {
        #[arg(long)]
        description: String,
        #[arg(long)]
        amount: String,
        #[arg(long, default_value = "expense")]
        kind: String,
        /// Transaction date, YYYY-MM-DD; defaults to today
        #[arg(long)]
        date: Option<String>,
        #[arg(long)]
        account: Option<String>,
        #[arg(long)]
        card: Option<String>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        installments: Option<u32>,
        #[arg(long)]
        recurring: bool,
        /// daily, weekly, monthly or yearly
        #[arg(long)]
        recurrence: Option<String>,
        /// Number of occurrences before the recurrence finishes
        #[arg(long)]
        count: Option<u32>,
    },
    /// Move money between two accounts
    Transfer {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(long)]
        amount: String,
        #[arg(long)]
        description: Option<String>,
    },
    /// Pay a credit-card invoice from an account
    Pay {
        #[arg(long)]
        invoice: String,
        #[arg(long)]
        account: String,
    },
    /// Pause or resume a recurring definition
    Toggle {
        #[arg(long)]
        id: String,
        #[arg(long, action = clap::ArgAction::Set)]
        paused: bool,
    },
    /// Delete a transaction, reversing its financial effect
    Delete {
        #[arg(long)]
        id: String,
    },
    /// Delete a recurring definition and every occurrence it produced
    DeleteHistory {
        #[arg(long)]
        id: String,
    },
    /// Materialize recurring transactions that are due
    Sweep {
        /// Keep running, sweeping on this cron schedule
        #[arg(long)]
        cron: Option<String>,
    },
    /// List transactions
    List,
    /// Export transactions as CSV
    Export {
        #[arg(long)]
        output: PathBuf,
    },
}

#[derive(Debug)]
enum CliError {
    InvalidConfig(String),
    InvalidState(String),
    InvalidArgument(String),
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliError::InvalidConfig(msg) => write!(f, "invalid configuration: {msg}"),
            CliError::InvalidState(msg) => write!(f, "invalid state file: {msg}"),
            CliError::InvalidArgument(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for CliError {}

/// On-disk snapshot: one default user plus the whole store state.
#[derive(Serialize, Deserialize)]
struct StateFile {
    user_id: Uuid,
    state: MemoryState,
}

fn load_config(path: Option<&Path>) -> Result<Config, CliError> {
    match path {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .map_err(|e| CliError::InvalidConfig(format!("{}: {e}", path.display())))?;
            toml::from_str(&raw).map_err(|e| CliError::InvalidConfig(e.to_string()))
        }
        None => Ok(Config::default()),
    }
}

fn load_state(path: &Path) -> Result<StateFile, CliError> {
    if path.exists() {
        let raw = fs::read_to_string(path)
            .map_err(|e| CliError::InvalidState(format!("{}: {e}", path.display())))?;
        serde_json::from_str(&raw).map_err(|e| CliError::InvalidState(e.to_string()))
    } else {
        Ok(StateFile {
            user_id: Uuid::new_v4(),
            state: MemoryState::default(),
        })
    }
}

fn save_state(path: &Path, user_id: Uuid, store: &MemoryStore) -> Result<(), Box<dyn std::error::Error>> {
    let file = StateFile {
        user_id,
        state: store.snapshot(),
    };
    fs::write(path, serde_json::to_string_pretty(&file)?)?;
    Ok(())
}

fn parse_decimal(s: &str) -> Result<Decimal, CliError> {
    s.parse()
        .map_err(|_| CliError::InvalidArgument(format!("invalid amount: {s}")))
}

fn parse_uuid(s: &str) -> Result<Uuid, CliError> {
    Uuid::parse_str(s).map_err(|_| CliError::InvalidArgument(format!("invalid id: {s}")))
}

fn parse_date(s: Option<&str>) -> Result<NaiveDate, CliError> {
    match s {
        Some(s) => s
            .parse()
            .map_err(|_| CliError::InvalidArgument(format!("invalid date: {s}"))),
        None => Ok(Utc::now().date_naive()),
    }
}

fn opt_id(id: Option<Uuid>) -> String {
    id.map(|id| id.to_string()).unwrap_or_default()
}

fn export_csv(path: &Path, transactions: &[Transaction]) -> Result<(), Box<dyn std::error::Error>> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record([
        "id",
        "date",
        "description",
        "kind",
        "amount",
        "account_id",
        "credit_card_id",
        "category_id",
    ])?;
    for tx in transactions {
        writer.write_record([
            tx.id.to_string(),
            tx.date.to_string(),
            tx.description.clone(),
            tx.kind.to_string(),
            tx.amount.to_string(),
            opt_id(tx.account_id),
            opt_id(tx.credit_card_id),
            opt_id(tx.category_id),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    let path = config
        .ledger
        .state_file
        .map(PathBuf::from)
        .unwrap_or(cli.file);
    let loaded = load_state(&path)?;
    let user_id = loaded.user_id;
    let store = MemoryStore::from_state(loaded.state);
    let ledger = LedgerService::new(&store, LogNotifier::new());
    let cards = CardService::new(&store);

    match cli.command {
        Commands::AddAccount {
            name,
            kind,
            balance,
            color,
        } => {
            let kind: AccountKind = kind.parse().map_err(CliError::InvalidArgument)?;
            let account = ledger.create_account(
                user_id,
                NewAccount {
                    name,
                    kind,
                    balance: parse_decimal(&balance)?,
                    color,
                },
            )?;
            save_state(&path, user_id, &store)?;
            println!("{}  {}  {}", account.id, account.name, account.balance);
        }
        Commands::Accounts => {
            for account in ledger.accounts(user_id)? {
                println!(
                    "{}  {}  {}  {}",
                    account.id, account.name, account.kind, account.balance
                );
            }
        }
        Commands::AddCard {
            name,
            limit,
            closing_day,
            due_day,
            color,
        } => {
            let view = cards.create(
                user_id,
                NewCard {
                    name,
                    limit: parse_decimal(&limit)?,
                    closing_day,
                    due_day,
                    color,
                },
            )?;
            save_state(&path, user_id, &store)?;
            println!("{}  {}  limit {}", view.card.id, view.card.name, view.card.limit);
        }
        Commands::Cards => {
            for view in cards.cards(user_id)? {
                println!(
                    "{}  {}  used {}  available {}",
                    view.card.id, view.card.name, view.used_amount, view.available_limit
                );
            }
        }
        Commands::Invoices { card } => {
            for invoice in cards.invoices(user_id, parse_uuid(&card)?)? {
                let status = if invoice.paid { "paid" } else { "open" };
                println!(
                    "{}  {}  {}  {}",
                    invoice.id, invoice.reference_month, invoice.total, status
                );
            }
        }
        Commands::Add {
            description,
            amount,
            kind,
            date,
            account,
            card,
            category,
            installments,
            recurring,
            recurrence,
            count,
        } => {
            let kind: TransactionKind = kind.parse().map_err(CliError::InvalidArgument)?;
            let recurrence = match recurrence {
                Some(s) => Some(
                    Recurrence::from_str(&s)
                        .map_err(|e| CliError::InvalidArgument(e.to_string()))?,
                ),
                None => None,
            };
            let tx = ledger.create(
                user_id,
                NewTransaction {
                    description,
                    amount: parse_decimal(&amount)?,
                    kind,
                    date: parse_date(date.as_deref())?,
                    category_id: category.as_deref().map(parse_uuid).transpose()?,
                    account_id: account.as_deref().map(parse_uuid).transpose()?,
                    credit_card_id: card.as_deref().map(parse_uuid).transpose()?,
                    installments,
                    recurring,
                    recurrence,
                    recurrence_count: count,
                },
            )?;
            save_state(&path, user_id, &store)?;
            println!("{}  {}  {}  {}", tx.id, tx.date, tx.description, tx.amount);
        }
        Commands::Transfer {
            from,
            to,
            amount,
            description,
        } => {
            ledger.transfer(
                user_id,
                TransferInput {
                    from_account_id: parse_uuid(&from)?,
                    to_account_id: parse_uuid(&to)?,
                    amount: parse_decimal(&amount)?,
                    description,
                    date: Utc::now().date_naive(),
                },
            )?;
            save_state(&path, user_id, &store)?;
            println!("transfer recorded");
        }
        Commands::Pay { invoice, account } => {
            let paid = cards.pay_invoice(user_id, parse_uuid(&invoice)?, parse_uuid(&account)?)?;
            save_state(&path, user_id, &store)?;
            println!("invoice {} paid: {}", paid.reference_month, paid.total);
        }
        Commands::Toggle { id, paused } => {
            let definition = ledger.toggle_pause(user_id, parse_uuid(&id)?, paused)?;
            save_state(&path, user_id, &store)?;
            println!(
                "{} {}",
                definition.id,
                if definition.recurrence_paused {
                    "paused"
                } else {
                    "active"
                }
            );
        }
        Commands::Delete { id } => {
            ledger.delete(user_id, parse_uuid(&id)?)?;
            save_state(&path, user_id, &store)?;
            println!("deleted");
        }
        Commands::DeleteHistory { id } => {
            ledger.delete_with_history(user_id, parse_uuid(&id)?)?;
            save_state(&path, user_id, &store)?;
            println!("deleted with history");
        }
        Commands::Sweep { cron } => match cron {
            None => {
                let report = ledger.sweep(Utc::now().date_naive())?;
                save_state(&path, user_id, &store)?;
                println!("processed {}, failed {}", report.processed, report.failed);
            }
            Some(expr) => {
                let schedule = Schedule::from_str(&expr).map_err(|e| {
                    CliError::InvalidArgument(format!("invalid cron expression: {e}"))
                })?;
                info!(schedule = %expr, "sweeping on schedule");
                for next in schedule.upcoming(Utc) {
                    let wait = (next - Utc::now()).to_std().unwrap_or_default();
                    std::thread::sleep(wait);
                    let report = ledger.sweep(Utc::now().date_naive())?;
                    save_state(&path, user_id, &store)?;
                    info!(
                        processed = report.processed,
                        failed = report.failed,
                        "scheduled sweep finished"
                    );
                }
            }
        },
        Commands::List => {
            for tx in ledger.transactions(user_id)? {
                println!(
                    "{}  {}  {}  {}  {}",
                    tx.id, tx.date, tx.kind, tx.amount, tx.description
                );
            }
        }
        Commands::Export { output } => {
            let transactions = ledger.transactions(user_id)?;
            export_csv(&output, &transactions)?;
            println!("exported {} transactions", transactions.len());
        }
    }

    Ok(())
}
