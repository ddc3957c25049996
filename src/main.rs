// src/main.rs

use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, NaiveTime};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::io::Write;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod attendance_report;
mod attendance_session;
mod hrms_client;
mod roster_engine;
mod session_context;

#[cfg(test)]
mod test_support;
#[cfg(test)]
mod hrms_client_tests;

use attendance_session::{format_hms, AttendanceState, SelfAttendance, SystemClock};
use hrms_client::{AttendanceApi, HrmsClient, DEFAULT_BASE_URL};
use roster_engine::{RosterEngine, SelectMode};
use session_context::{resolve_context, SessionContext};

// --- Configuration ---

#[derive(Debug, Deserialize)]
struct AppConfig {
    #[serde(default = "default_base_url")]
    hrms_base_url: String,
    #[serde(default)]
    hrms_session_file: Option<PathBuf>,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

impl AppConfig {
    fn from_env() -> Result<Self, envy::Error> {
        // Load .env file if it exists
        dotenv::dotenv().ok();
        envy::from_env::<AppConfig>()
    }

    fn session_file(&self) -> PathBuf {
        self.hrms_session_file
            .clone()
            .unwrap_or_else(|| PathBuf::from(".attendly_session.json"))
    }
}

// --- CLI ---

#[derive(Parser)]
#[command(
    name = "attendly",
    version,
    about = "Attendance check-in/check-out client for the Attendly HRMS backend"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show today's own attendance status
    Status,
    /// Check yourself in, optionally at a manual HH:MM time
    CheckIn {
        #[arg(long, value_parser = parse_hhmm)]
        at: Option<NaiveTime>,
    },
    /// Check yourself out, optionally at a manual HH:MM time
    CheckOut {
        #[arg(long, value_parser = parse_hhmm)]
        at: Option<NaiveTime>,
    },
    /// Live elapsed-time display while checked in
    Watch,
    /// Show the reportee roster
    Roster {
        #[arg(long, value_parser = parse_date)]
        date: Option<NaiveDate>,
        #[arg(long)]
        include_all: bool,
    },
    /// Check in several reportees with one shared time
    BulkCheckIn {
        /// Subjects to select, comma separated; omit with --all
        #[arg(long, value_delimiter = ',')]
        ids: Vec<String>,
        /// Select every subject that has not checked in yet
        #[arg(long)]
        all: bool,
        #[arg(long, value_parser = parse_hhmm)]
        at: Option<NaiveTime>,
    },
    /// Check out several reportees with one shared time
    BulkCheckOut {
        #[arg(long, value_delimiter = ',')]
        ids: Vec<String>,
        /// Select every subject currently checked in
        #[arg(long)]
        all: bool,
        #[arg(long, value_parser = parse_hhmm)]
        at: Option<NaiveTime>,
    },
    /// Own attendance history for a date range
    History {
        #[arg(long, value_parser = parse_date)]
        start: NaiveDate,
        #[arg(long, value_parser = parse_date)]
        end: NaiveDate,
        #[arg(long)]
        csv: Option<PathBuf>,
    },
    /// Organization-wide attendance reports
    Report {
        #[command(subcommand)]
        kind: ReportKind,
    },
}

#[derive(Subcommand)]
enum ReportKind {
    /// All records for one day
    Daily {
        #[arg(long, value_parser = parse_date)]
        date: Option<NaiveDate>,
        #[arg(long)]
        csv: Option<PathBuf>,
    },
    /// Every record the backend has
    All {
        #[arg(long)]
        csv: Option<PathBuf>,
    },
}

fn parse_hhmm(raw: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(raw, "%H:%M")
        .map_err(|e| format!("invalid HH:MM time '{}': {}", raw, e))
}

fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|e| format!("invalid YYYY-MM-DD date '{}': {}", raw, e))
}

// --- Main Application Logic ---

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::from_env().context("loading configuration from environment")?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();

    // Without a complete signed-in context no request may leave this
    // process; a missing login shows up as a notice, not an error.
    let Some(context) = resolve_context(&config.session_file())
        .context("reading the session context")?
    else {
        println!("Not signed in: session context is incomplete. Run the login flow first.");
        return Ok(());
    };
    info!(
        "Resolved session context for employee {} in org {}",
        context.employee_id, context.org_id
    );

    let client = HrmsClient::new(&config.hrms_base_url, &context)
        .context("constructing the HRMS client")?;

    match cli.command {
        Command::Status => status(client, &context).await,
        Command::CheckIn { at } => self_transition(client, &context, at, true).await,
        Command::CheckOut { at } => self_transition(client, &context, at, false).await,
        Command::Watch => watch(client, &context).await,
        Command::Roster { date, include_all } => roster(client, date, include_all).await,
        Command::BulkCheckIn { ids, all, at } => {
            bulk(client, ids, all, at, SelectMode::CheckIn).await
        }
        Command::BulkCheckOut { ids, all, at } => {
            bulk(client, ids, all, at, SelectMode::CheckOut).await
        }
        Command::History { start, end, csv } => {
            let records = client
                .self_history(start, end)
                .await
                .context("fetching attendance history")?;
            emit_records(&records, csv)
        }
        Command::Report { kind } => report(client, kind).await,
    }
}

// --- Command Handlers ---

async fn status(client: HrmsClient, context: &SessionContext) -> Result<()> {
    let mut me = SelfAttendance::new(client, SystemClock, context.employee_id.clone());
    me.load_status().await.context("loading own status")?;
    match me.state() {
        AttendanceState::NotCheckedIn => println!("Not checked in today."),
        AttendanceState::CheckedIn { since } => println!(
            "Checked in since {} ({} elapsed).",
            since.format("%H:%M:%S"),
            format_hms(me.elapsed_seconds())
        ),
        AttendanceState::CheckedOut {
            checked_in,
            checked_out,
        } => println!(
            "Day closed: checked in {}, checked out {}.",
            checked_in
                .as_ref()
                .map(|t| t.format("%H:%M:%S").to_string())
                .unwrap_or_else(|| "-".to_string()),
            checked_out.format("%H:%M:%S")
        ),
    }
    Ok(())
}

async fn self_transition(
    client: HrmsClient,
    context: &SessionContext,
    at: Option<NaiveTime>,
    check_in: bool,
) -> Result<()> {
    let (events, mut event_rx) = mpsc::unbounded_channel();
    let mut me = SelfAttendance::new(client.clone(), SystemClock, context.employee_id.clone())
        .with_events(events);
    me.load_status().await.context("loading own status")?;

    if check_in {
        me.set_login_time(at);
        let since = me.check_in().await.context("checking in")?;
        println!("Checked in at {}.", since.format("%H:%M:%S"));
    } else {
        me.set_logout_time(at);
        let checked_out = me.check_out().await.context("checking out")?;
        println!("Checked out at {}.", checked_out.format("%H:%M:%S"));
    }

    // The roster view depends on the self session only through these
    // events; managers get a refreshed summary after a transition.
    if context.role.can_manage() {
        if let Ok(event) = event_rx.try_recv() {
            info!("Session event: {:?}", event);
            let mut engine = RosterEngine::new(client.clone(), SystemClock);
            engine.refresh(None, false).await.context("refreshing roster")?;
            let checked_in = engine
                .roster()
                .iter()
                .filter(|m| m.state.is_checked_in())
                .count();
            println!(
                "Roster: {} of {} reportees currently checked in.",
                checked_in,
                engine.roster().len()
            );
        }
    }
    Ok(())
}

async fn watch(client: HrmsClient, context: &SessionContext) -> Result<()> {
    let mut me = SelfAttendance::new(client, SystemClock, context.employee_id.clone());
    me.load_status().await.context("loading own status")?;
    if !me.state().is_checked_in() {
        println!("Not checked in; nothing to watch.");
        return Ok(());
    }
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(1));
    loop {
        ticker.tick().await;
        print!("\rElapsed: {} ", format_hms(me.elapsed_seconds()));
        std::io::stdout().flush().ok();
    }
}

async fn roster(client: HrmsClient, date: Option<NaiveDate>, include_all: bool) -> Result<()> {
    let mut engine = RosterEngine::new(client, SystemClock);
    engine
        .refresh(date, include_all)
        .await
        .context("fetching the roster")?;
    if engine.roster().is_empty() {
        println!("No reportees on the roster.");
        return Ok(());
    }
    for member in engine.roster() {
        let times = match &member.state {
            AttendanceState::NotCheckedIn => String::new(),
            AttendanceState::CheckedIn { since } => {
                format!(" since {}", since.format("%H:%M:%S"))
            }
            AttendanceState::CheckedOut {
                checked_in,
                checked_out,
            } => format!(
                " {} - {}",
                checked_in
                    .as_ref()
                    .map(|t| t.format("%H:%M:%S").to_string())
                    .unwrap_or_else(|| "-".to_string()),
                checked_out.format("%H:%M:%S")
            ),
        };
        println!(
            "{:<16} {:<24} {}{}",
            member.employee_id,
            member.employee_name,
            member.state.label(),
            times
        );
    }
    Ok(())
}

async fn bulk(
    client: HrmsClient,
    ids: Vec<String>,
    all: bool,
    at: Option<NaiveTime>,
    mode: SelectMode,
) -> Result<()> {
    if ids.is_empty() && !all {
        bail!("nothing selected: pass --ids or --all");
    }
    let mut engine = RosterEngine::new(client, SystemClock);
    engine.refresh(None, false).await.context("fetching the roster")?;

    if all {
        engine.select_all(mode);
    }
    for id in &ids {
        if engine.is_selected(id) {
            continue;
        }
        if !engine.toggle_select(id) {
            println!("Skipping {}: unknown or already closed for the day.", id);
        }
    }

    let count = match mode {
        SelectMode::CheckOut => {
            engine.set_bulk_check_out_time(at);
            engine.bulk_check_out().await.context("bulk check-out")?
        }
        _ => {
            engine.set_bulk_check_in_time(at);
            engine.bulk_check_in().await.context("bulk check-in")?
        }
    };
    println!("Applied to {} subjects; roster refreshed.", count);
    Ok(())
}

async fn report(client: HrmsClient, kind: ReportKind) -> Result<()> {
    match kind {
        ReportKind::Daily { date, csv } => {
            let date = date.unwrap_or_else(|| chrono::Local::now().date_naive());
            let records = client
                .admin_daily(date)
                .await
                .context("fetching daily records")?;
            emit_records(&records, csv)
        }
        ReportKind::All { csv } => {
            let records = client.admin_all().await.context("fetching all records")?;
            emit_records(&records, csv)
        }
    }
}

fn emit_records(
    records: &[hrms_client::AttendanceRecord],
    csv_path: Option<PathBuf>,
) -> Result<()> {
    match csv_path {
        Some(path) => {
            let file = std::fs::File::create(&path)
                .with_context(|| format!("creating {}", path.display()))?;
            attendance_report::write_csv(records, file).context("writing CSV report")?;
            println!("Wrote {} records to {}.", records.len(), path.display());
        }
        None => {
            for record in records {
                println!("{}", attendance_report::format_record(record));
            }
        }
    }
    Ok(())
}
