//! Command-line front end. Parses arguments and prints results; every rule
//! lives in the library services.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, anyhow, bail};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;

use tallyclock::billing::export::{render_invoice_text, write_invoice_text};
use tallyclock::billing::{InvoiceDefaults, InvoiceService, TimerService};
use tallyclock::config::Config;
use tallyclock::db::{CreateClientParams, Database, EntryFilter, InvoiceFilter};
use tallyclock::model::{Client, Invoice, InvoiceStatus, TimeEntry};
use tallyclock::settings::Settings;

#[derive(Parser)]
#[command(name = "tallyclock")]
#[command(about = "Track billable time and turn it into invoices", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Settings file (defaults to the per-user config directory).
    #[arg(long, global = true, env = "TALLYCLOCK_SETTINGS")]
    pub settings: Option<PathBuf>,

    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Write a settings file with the default values
    Init {
        /// Overwrite an existing settings file
        #[arg(long)]
        force: bool,
    },
    /// Manage clients
    Client {
        #[command(subcommand)]
        action: ClientCommand,
    },
    /// Start, pause, resume and stop the timer
    Timer {
        #[command(subcommand)]
        action: TimerCommand,
    },
    /// Manual time entries
    Entry {
        #[command(subcommand)]
        action: EntryCommand,
    },
    /// Draft, finalize and track invoices
    Invoice {
        #[command(subcommand)]
        action: InvoiceCommand,
    },
}

#[derive(Subcommand)]
pub enum ClientCommand {
    Add {
        name: String,
        #[arg(long)]
        rate: Decimal,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        notes: Option<String>,
    },
    List {
        /// Include archived clients
        #[arg(long)]
        all: bool,
    },
    Archive {
        client: String,
    },
    Unarchive {
        client: String,
    },
}

#[derive(Subcommand)]
pub enum TimerCommand {
    Start {
        client: String,
        #[arg(default_value = "")]
        description: String,
    },
    Pause,
    Resume,
    Stop,
    Discard,
    Status,
}

#[derive(Subcommand)]
pub enum EntryCommand {
    Add {
        client: String,
        #[arg(long)]
        start: DateTime<Utc>,
        #[arg(long)]
        end: DateTime<Utc>,
        #[arg(long, default_value = "")]
        description: String,
        /// Defaults to the client's current rate
        #[arg(long)]
        rate: Option<Decimal>,
        #[arg(long)]
        non_billable: bool,
    },
    List {
        #[arg(long)]
        client: Option<String>,
        #[arg(long)]
        from: Option<NaiveDate>,
        #[arg(long)]
        to: Option<NaiveDate>,
        /// Include entries already locked to an invoice
        #[arg(long)]
        include_locked: bool,
    },
    Edit {
        id: i64,
        #[arg(long)]
        reason: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        start: Option<DateTime<Utc>>,
        #[arg(long)]
        end: Option<DateTime<Utc>>,
        #[arg(long)]
        rate: Option<Decimal>,
        #[arg(long)]
        billable: Option<bool>,
    },
    Delete {
        id: i64,
        #[arg(long)]
        reason: String,
    },
    History {
        id: i64,
    },
    Unbilled {
        client: String,
        #[arg(long)]
        from: NaiveDate,
        #[arg(long)]
        to: NaiveDate,
    },
}

#[derive(Subcommand)]
pub enum InvoiceCommand {
    Create {
        client: String,
        #[arg(long)]
        from: NaiveDate,
        #[arg(long)]
        to: NaiveDate,
        #[arg(long)]
        prefix: Option<String>,
    },
    Add {
        invoice: i64,
        #[arg(required = true)]
        entries: Vec<i64>,
        /// Tax rate for the recomputed totals (defaults to the configured rate)
        #[arg(long)]
        tax_rate: Option<Decimal>,
    },
    Remove {
        invoice: i64,
        entry: i64,
    },
    Totals {
        invoice: i64,
        #[arg(long)]
        tax_rate: Option<Decimal>,
    },
    Finalize {
        invoice: i64,
    },
    Sent {
        invoice: i64,
    },
    Paid {
        invoice: i64,
        /// Defaults to today
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    Due {
        invoice: i64,
        date: NaiveDate,
    },
    Overdue,
    Show {
        invoice: String,
    },
    List {
        #[arg(long)]
        client: Option<String>,
        #[arg(long)]
        status: Option<String>,
    },
    Export {
        invoice: String,
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    Generate {
        client: String,
        #[arg(long)]
        from: NaiveDate,
        #[arg(long)]
        to: NaiveDate,
        /// Skip writing the text invoice
        #[arg(long)]
        no_export: bool,
    },
    Delete {
        invoice: i64,
    },
}

/// Everything a command handler needs, wired once in `main`.
pub struct App {
    pub db: Arc<dyn Database>,
    pub timers: TimerService,
    pub invoices: InvoiceService,
    pub config: Config,
}

impl App {
    /// Looks a client up by numeric id, then by exact name.
    async fn resolve_client(&self, reference: &str) -> anyhow::Result<Client> {
        if let Ok(id) = reference.trim().parse::<i64>()
            && let Some(client) = self.db.get_client(id).await?
        {
            return Ok(client);
        }
        self.db
            .get_client_by_name(reference)
            .await?
            .ok_or_else(|| anyhow!("no client matches '{reference}'"))
    }

    async fn resolve_invoice(&self, reference: &str) -> anyhow::Result<Invoice> {
        if let Ok(id) = reference.trim().parse::<i64>() {
            return Ok(self.invoices.get_invoice(id).await?);
        }
        Ok(self.invoices.get_invoice_by_number(reference).await?)
    }

    async fn export(&self, invoice: &Invoice, dir: Option<PathBuf>) -> anyhow::Result<PathBuf> {
        let client = self
            .db
            .get_client(invoice.client_id)
            .await?
            .ok_or_else(|| anyhow!("client {} not found", invoice.client_id))?;
        let items = self.invoices.line_items(invoice.id).await?;
        let text = render_invoice_text(
            invoice,
            &client,
            &items,
            &self.config.issuer,
            Utc::now().date_naive(),
        )?;
        let dir = dir.unwrap_or_else(|| self.config.billing.output_dir.clone());
        Ok(write_invoice_text(&dir, &invoice.invoice_number, &text)?)
    }
}

fn day_start(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

fn day_end(date: NaiveDate) -> DateTime<Utc> {
    day_start(date) + chrono::Duration::days(1) - chrono::Duration::microseconds(1)
}

fn format_duration(seconds: i64) -> String {
    format!("{}:{:02}:{:02}", seconds / 3600, (seconds % 3600) / 60, seconds % 60)
}

fn print_entry(entry: &TimeEntry) {
    let lock = entry
        .invoice_id
        .map(|id| format!(" [invoice {id}]"))
        .unwrap_or_default();
    let billable = if entry.is_billable { "" } else { " (non-billable)" };
    println!(
        "#{:<5} {}  {:>8}  {:>9.2}  {}{}{}",
        entry.id,
        entry.start_time.format("%Y-%m-%d %H:%M"),
        format_duration(entry.duration().num_seconds()),
        entry.amount(),
        entry.description,
        billable,
        lock
    );
}

fn print_invoice(invoice: &Invoice) {
    println!(
        "#{:<4} {}  {:<9}  {} to {}  total {:.2}{}",
        invoice.id,
        invoice.invoice_number,
        invoice.status.as_str(),
        invoice.period_start,
        invoice.period_end,
        invoice.total,
        invoice
            .due_date
            .map(|d| format!("  due {d}"))
            .unwrap_or_default()
    );
}

/// Writes default settings to `path`. Refuses to clobber an existing file
/// unless `force` is set.
pub fn init_settings(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    Settings::default()
        .save_to(path)
        .with_context(|| format!("writing {}", path.display()))?;
    println!("Wrote {}", path.display());
    Ok(())
}

pub async fn dispatch(app: &App, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Init { .. } => bail!("init runs before the database is opened"),
        Command::Client { action } => run_client(app, action).await,
        Command::Timer { action } => run_timer(app, action).await,
        Command::Entry { action } => run_entry(app, action).await,
        Command::Invoice { action } => run_invoice(app, action).await,
    }
}

async fn run_client(app: &App, action: ClientCommand) -> anyhow::Result<()> {
    match action {
        ClientCommand::Add {
            name,
            rate,
            email,
            notes,
        } => {
            let client = app
                .db
                .create_client(&CreateClientParams {
                    name,
                    email,
                    hourly_rate: rate,
                    notes,
                })
                .await?;
            println!("Added client #{} {} at {:.2}/h", client.id, client.name, client.hourly_rate);
        }
        ClientCommand::List { all } => {
            for client in app.db.list_clients(all).await? {
                let archived = if client.is_archived { " (archived)" } else { "" };
                println!(
                    "#{:<4} {:<30} {:>8.2}/h{}",
                    client.id, client.name, client.hourly_rate, archived
                );
            }
        }
        ClientCommand::Archive { client } => {
            let client = app.resolve_client(&client).await?;
            app.db.set_client_archived(client.id, true).await?;
            println!("Archived {}", client.name);
        }
        ClientCommand::Unarchive { client } => {
            let client = app.resolve_client(&client).await?;
            app.db.set_client_archived(client.id, false).await?;
            println!("Unarchived {}", client.name);
        }
    }
    Ok(())
}

async fn run_timer(app: &App, action: TimerCommand) -> anyhow::Result<()> {
    match action {
        TimerCommand::Start {
            client,
            description,
        } => {
            let client = app.resolve_client(&client).await?;
            app.timers.start(client.id, &description).await?;
            println!("Timer started for {}", client.name);
        }
        TimerCommand::Pause => {
            let timer = app.timers.pause().await?;
            println!("Paused at {}", format_duration(timer.elapsed().num_seconds()));
        }
        TimerCommand::Resume => {
            app.timers.resume().await?;
            println!("Resumed");
        }
        TimerCommand::Stop => {
            let entry = app.timers.stop().await?;
            print_entry(&entry);
        }
        TimerCommand::Discard => {
            app.timers.discard().await?;
            println!("Timer discarded");
        }
        TimerCommand::Status => match app.timers.active_timer().await? {
            None => println!("idle"),
            Some(timer) => {
                let now = Utc::now();
                let value = app.timers.accrued_value_at(now).await?;
                println!(
                    "{} for client #{}  {}  {:.2}  {}",
                    timer.state().as_str(),
                    timer.client_id,
                    format_duration(timer.elapsed_at(now).num_seconds()),
                    value,
                    timer.description
                );
            }
        },
    }
    Ok(())
}

async fn run_entry(app: &App, action: EntryCommand) -> anyhow::Result<()> {
    match action {
        EntryCommand::Add {
            client,
            start,
            end,
            description,
            rate,
            non_billable,
        } => {
            let client = app.resolve_client(&client).await?;
            let mut entry = TimeEntry::closed(
                client.id,
                description,
                start,
                end,
                rate.unwrap_or(client.hourly_rate),
            );
            entry.is_billable = !non_billable;
            let entry = app.db.create_entry(&entry).await?;
            print_entry(&entry);
        }
        EntryCommand::List {
            client,
            from,
            to,
            include_locked,
        } => {
            let client_id = match client {
                Some(reference) => Some(app.resolve_client(&reference).await?.id),
                None => None,
            };
            let entries = app
                .db
                .list_entries(&EntryFilter {
                    client_id,
                    start: from.map(day_start),
                    end: to.map(day_end),
                    include_locked,
                })
                .await?;
            for entry in &entries {
                print_entry(entry);
            }
        }
        EntryCommand::Edit {
            id,
            reason,
            description,
            start,
            end,
            rate,
            billable,
        } => {
            let mut entry = app
                .db
                .get_entry(id)
                .await?
                .ok_or_else(|| anyhow!("time entry {id} not found"))?;
            if let Some(description) = description {
                entry.description = description;
            }
            if start.is_some() || end.is_some() {
                let start = start.unwrap_or(entry.start_time);
                let end = end.or(entry.end_time);
                entry.reschedule(start, end);
            }
            if let Some(rate) = rate {
                entry.hourly_rate = rate;
            }
            if let Some(billable) = billable {
                entry.is_billable = billable;
            }
            let entry = app.db.update_entry(&entry, &reason).await?;
            print_entry(&entry);
        }
        EntryCommand::Delete { id, reason } => {
            app.db.soft_delete_entry(id, &reason).await?;
            println!("Deleted entry #{id}");
        }
        EntryCommand::History { id } => {
            for row in app.db.entry_history(id).await? {
                println!(
                    "{}  {:<16} {:?} -> {:?}  ({})",
                    row.changed_at.format("%Y-%m-%d %H:%M:%S"),
                    row.field_name,
                    row.old_value,
                    row.new_value,
                    row.change_reason
                );
            }
        }
        EntryCommand::Unbilled { client, from, to } => {
            let client = app.resolve_client(&client).await?;
            let entries = app
                .db
                .list_unbilled_entries(client.id, day_start(from), day_end(to))
                .await?;
            for entry in &entries {
                print_entry(entry);
            }
        }
    }
    Ok(())
}

async fn run_invoice(app: &App, action: InvoiceCommand) -> anyhow::Result<()> {
    let billing = &app.config.billing;
    match action {
        InvoiceCommand::Create {
            client,
            from,
            to,
            prefix,
        } => {
            let client = app.resolve_client(&client).await?;
            let prefix = prefix.unwrap_or_else(|| billing.number_prefix.clone());
            let invoice = app
                .invoices
                .create_draft(client.id, from, to, &prefix)
                .await?;
            print_invoice(&invoice);
        }
        InvoiceCommand::Add {
            invoice,
            entries,
            tax_rate,
        } => {
            let added = app.invoices.add_entries(invoice, &entries).await?;
            let invoice = app
                .invoices
                .calculate_totals(invoice, tax_rate.unwrap_or(billing.default_tax_rate))
                .await?;
            println!("Attached {} entries", added.len());
            print_invoice(&invoice);
        }
        InvoiceCommand::Remove { invoice, entry } => {
            let invoice = app.invoices.remove_entry(invoice, entry).await?;
            print_invoice(&invoice);
        }
        InvoiceCommand::Totals { invoice, tax_rate } => {
            let invoice = app
                .invoices
                .calculate_totals(invoice, tax_rate.unwrap_or(billing.default_tax_rate))
                .await?;
            print_invoice(&invoice);
        }
        InvoiceCommand::Finalize { invoice } => {
            let invoice = app.invoices.finalize(invoice).await?;
            print_invoice(&invoice);
        }
        InvoiceCommand::Sent { invoice } => {
            let invoice = app.invoices.mark_sent(invoice).await?;
            print_invoice(&invoice);
        }
        InvoiceCommand::Paid { invoice, date } => {
            let paid = date.unwrap_or_else(|| Utc::now().date_naive());
            let invoice = app.invoices.mark_paid(invoice, paid).await?;
            print_invoice(&invoice);
        }
        InvoiceCommand::Due { invoice, date } => {
            let invoice = app.invoices.set_due_date(invoice, date).await?;
            print_invoice(&invoice);
        }
        InvoiceCommand::Overdue => {
            let flipped = app.invoices.check_overdue().await?;
            if flipped.is_empty() {
                println!("No invoices became overdue");
            }
            for invoice in &flipped {
                print_invoice(invoice);
            }
        }
        InvoiceCommand::Show { invoice } => {
            let invoice = app.resolve_invoice(&invoice).await?;
            print_invoice(&invoice);
            for item in app.invoices.line_items(invoice.id).await? {
                println!(
                    "  entry #{:<5} {}  {:>6.2}h x {:>7.2} = {:>9.2}  {}",
                    item.entry_id, item.date, item.hours, item.rate, item.amount, item.description
                );
            }
            println!(
                "  subtotal {:.2}  tax {:.2}  total {:.2}",
                invoice.subtotal, invoice.tax_amount, invoice.total
            );
        }
        InvoiceCommand::List { client, status } => {
            let client_id = match client {
                Some(reference) => Some(app.resolve_client(&reference).await?.id),
                None => None,
            };
            let status = match status {
                Some(raw) => Some(
                    InvoiceStatus::from_db_value(&raw.to_ascii_lowercase())
                        .ok_or_else(|| anyhow!("unknown invoice status '{raw}'"))?,
                ),
                None => None,
            };
            for invoice in app
                .invoices
                .list_invoices(&InvoiceFilter { client_id, status })
                .await?
            {
                print_invoice(&invoice);
            }
        }
        InvoiceCommand::Export { invoice, dir } => {
            let invoice = app.resolve_invoice(&invoice).await?;
            if invoice.status == InvoiceStatus::Draft {
                bail!("finalize {} before exporting it", invoice.invoice_number);
            }
            let path = app.export(&invoice, dir).await?;
            println!("Wrote {}", path.display());
        }
        InvoiceCommand::Generate {
            client,
            from,
            to,
            no_export,
        } => {
            let client = app.resolve_client(&client).await?;
            let invoice = app
                .invoices
                .generate(client.id, from, to, &InvoiceDefaults::from(billing))
                .await
                .with_context(|| format!("generating invoice for {}", client.name))?;
            print_invoice(&invoice);
            if !no_export {
                let path = app.export(&invoice, None).await?;
                println!("Wrote {}", path.display());
            }
        }
        InvoiceCommand::Delete { invoice } => {
            app.invoices.delete_invoice(invoice).await?;
            println!("Deleted invoice #{invoice}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::init_settings;
    use tallyclock::settings::Settings;

    #[test]
    fn init_writes_defaults_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("tallyclock").join("settings.toml");

        init_settings(&path, false).expect("first init");
        let written = Settings::load_from(&path).expect("load");
        assert_eq!(written.invoice.number_prefix, "INV");

        assert!(init_settings(&path, false).is_err());
        init_settings(&path, true).expect("forced init");
    }
}
