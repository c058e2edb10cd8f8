#![allow(missing_docs)]

//! unsend-mailer CLI.
//!
//! Sends mail through the configured route, tests provider credentials and
//! manages the email log.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};

use unsend_mailer::config::MailerConfig;
use unsend_mailer::dispatch::{MailEvent, Mailer};
use unsend_mailer::logging;
use unsend_mailer::mail::{
    AttachmentSpec, EnvelopeBuilder, MailRequest, RawHeaders, SenderDefaults,
};
use unsend_mailer::native::SendmailTransport;
use unsend_mailer::providers::unsend::UnsendClient;
use unsend_mailer::providers::SendResult;
use unsend_mailer::store::{EmailLogStore, LogFilter, LogStatus, SortOrder};

#[derive(Parser)]
#[command(name = "unsend-mailer", version, about = "Send site mail through the Unsend API")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Send one message through the configured route.
    Send(SendArgs),
    /// Send the diagnostic message to the admin address.
    TestConnection {
        /// Try this key instead of the configured one.
        #[arg(long)]
        api_key: Option<String>,
        /// Try this endpoint instead of the configured one.
        #[arg(long)]
        endpoint: Option<String>,
    },
    /// Send a test message through the provider, bypassing routing.
    TestEmail {
        /// Recipient.
        #[arg(long)]
        to: String,
    },
    /// Validate the loaded configuration.
    CheckConfig,
    /// Inspect or manage the email log.
    #[command(subcommand)]
    Logs(LogsCommand),
}

#[derive(Args)]
struct SendArgs {
    /// Recipients, comma-separated or repeated.
    #[arg(long, required = true)]
    to: Vec<String>,
    /// Subject line.
    #[arg(long, default_value = "")]
    subject: String,
    /// Message body.
    #[arg(long, conflicts_with = "message_file")]
    message: Option<String>,
    /// Read the message body from a file.
    #[arg(long)]
    message_file: Option<PathBuf>,
    /// Carbon-copy recipients.
    #[arg(long)]
    cc: Vec<String>,
    /// Blind carbon-copy recipients.
    #[arg(long)]
    bcc: Vec<String>,
    /// Raw `Name: value` header, repeatable.
    #[arg(long = "header")]
    headers: Vec<String>,
    /// File to attach, repeatable.
    #[arg(long = "attach")]
    attachments: Vec<PathBuf>,
}

#[derive(Subcommand)]
enum LogsCommand {
    /// List log rows.
    List(FilterArgs),
    /// Export log rows as CSV.
    Export {
        #[command(flatten)]
        filter: FilterArgs,
        /// Output file; stdout when omitted.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Delete every log row.
    Clear {
        /// Confirm deletion.
        #[arg(long)]
        yes: bool,
    },
    /// Delete rows older than the retention period.
    Purge {
        /// Age in days; `[logging].retention_days` when omitted.
        #[arg(long)]
        days: Option<u32>,
    },
    /// Show counts by status.
    Stats {
        /// Only count rows from the last N days.
        #[arg(long)]
        days: Option<u32>,
    },
}

#[derive(Args)]
struct FilterArgs {
    /// pending, sent or failed.
    #[arg(long)]
    status: Option<String>,
    /// Substring of sender or recipient.
    #[arg(long)]
    email: Option<String>,
    /// Earliest creation date (YYYY-MM-DD or RFC 3339).
    #[arg(long)]
    since: Option<String>,
    /// Latest creation date (YYYY-MM-DD or RFC 3339).
    #[arg(long)]
    until: Option<String>,
    /// Maximum rows.
    #[arg(long)]
    limit: Option<u32>,
    /// Rows to skip.
    #[arg(long, default_value_t = 0)]
    offset: u32,
    /// Oldest first.
    #[arg(long)]
    asc: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Precedence: env vars (.env included) > config file > defaults.
    let _ = dotenvy::dotenv();
    let config = MailerConfig::load().context("failed to load configuration")?;

    let _guard = logging::init(&config.logging)?;

    match cli.command {
        Command::Send(args) => cmd_send(&config, args).await,
        Command::TestConnection { api_key, endpoint } => {
            cmd_test_connection(&config, api_key, endpoint).await
        }
        Command::TestEmail { to } => cmd_test_email(&config, &to).await,
        Command::CheckConfig => Ok(cmd_check_config(&config)),
        Command::Logs(cmd) => cmd_logs(&config, cmd).await,
    }
}

// ── Wiring ──────────────────────────────────────────────────────

async fn open_log_store(config: &MailerConfig) -> Result<EmailLogStore> {
    if !config.logging.enabled {
        return Ok(EmailLogStore::disabled());
    }
    let path = config.log_database_path()?;
    EmailLogStore::open(&path, true)
        .await
        .with_context(|| format!("failed to open email log at {}", path.display()))
}

async fn build_client(config: &MailerConfig) -> Result<UnsendClient> {
    let logs = open_log_store(config).await?;
    UnsendClient::new(&config.api, &config.sender, logs).context("failed to build HTTP client")
}

async fn build_mailer(config: &MailerConfig) -> Result<Mailer> {
    let client = build_client(config).await?;
    let builder = EnvelopeBuilder::new(SenderDefaults::from_config(&config.sender));
    let native = SendmailTransport::new(&config.native, &config.sender);
    let mut mailer = Mailer::new(config.delivery, builder, Arc::new(client), Arc::new(native));
    mailer.on_event(|event: &MailEvent| {
        if let MailEvent::Failed { to, message, .. } = event {
            eprintln!("failed to send to {}: {message}", to.join(", "));
        }
    });
    Ok(mailer)
}

// ── Commands ────────────────────────────────────────────────────

async fn cmd_send(config: &MailerConfig, args: SendArgs) -> Result<ExitCode> {
    let message = match (&args.message, &args.message_file) {
        (Some(message), _) => message.clone(),
        (None, Some(path)) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?,
        (None, None) => String::new(),
    };

    let mut request = MailRequest::new(args.to, args.subject, message);
    request.cc = args.cc.into();
    request.bcc = args.bcc.into();
    if !args.headers.is_empty() {
        request.headers = RawHeaders::Lines(args.headers);
    }
    request.attachments = args.attachments.into_iter().map(AttachmentSpec::Path).collect();

    let mailer = build_mailer(config).await?;
    info!(route = ?mailer.route(), "sending message");
    if mailer.send_mail(request).await {
        println!("sent");
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

async fn cmd_test_connection(
    config: &MailerConfig,
    api_key: Option<String>,
    endpoint: Option<String>,
) -> Result<ExitCode> {
    let mut client = build_client(config).await?;
    if let Some(key) = api_key.as_deref() {
        client = client.with_credentials(key, endpoint.as_deref());
    } else if let Some(endpoint) = endpoint.as_deref() {
        let key = config.api.key().unwrap_or_default();
        client = client.with_credentials(key, Some(endpoint));
    }
    Ok(report("Test email sent successfully!", client.test_connection().await))
}

async fn cmd_test_email(config: &MailerConfig, to: &str) -> Result<ExitCode> {
    let mailer = build_mailer(config).await?;
    Ok(report(
        &format!("Test email sent to {to}."),
        mailer.send_test_email(to).await,
    ))
}

fn report(success: &str, result: SendResult) -> ExitCode {
    match result {
        Ok(receipt) => {
            if receipt.provider_id.is_empty() {
                println!("{success}");
            } else {
                println!("{success} Email ID: {}", receipt.provider_id);
            }
            ExitCode::SUCCESS
        }
        Err(failure) => {
            eprintln!("error: {failure}");
            ExitCode::FAILURE
        }
    }
}

fn cmd_check_config(config: &MailerConfig) -> ExitCode {
    println!("endpoint:         {}", config.api.endpoint);
    println!(
        "api key:          {}",
        if config.has_api_key() { "set" } else { "missing" }
    );
    println!("override enabled: {}", config.delivery.override_enabled);
    println!("test mode:        {}", config.delivery.test_mode);
    println!("logging enabled:  {}", config.logging.enabled);

    let errors = config.validation_errors();
    if errors.is_empty() {
        println!("configuration OK");
        return ExitCode::SUCCESS;
    }
    for error in errors {
        eprintln!("error: {error}");
    }
    ExitCode::FAILURE
}

async fn cmd_logs(config: &MailerConfig, cmd: LogsCommand) -> Result<ExitCode> {
    let store = open_log_store(config).await?;
    if !store.is_enabled() {
        warn!("email logging is disabled");
    }

    match cmd {
        LogsCommand::List(args) => {
            let filter = args.into_filter()?;
            let rows = store.query(&filter).await?;
            for log in &rows {
                println!(
                    "{:>6}  {:<7}  {}  {} -> {}  {}",
                    log.id,
                    log.status.as_str(),
                    log.created_at,
                    log.from_email,
                    log.to_email,
                    log.subject
                );
            }
            let total = store
                .count(&LogFilter {
                    limit: None,
                    offset: 0,
                    ..filter
                })
                .await?;
            println!("{} of {total} rows", rows.len());
        }
        LogsCommand::Export { filter, out } => {
            let csv = store.export_csv(&filter.into_filter()?).await?;
            match out {
                Some(path) => {
                    tokio::fs::write(&path, csv)
                        .await
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    println!("exported to {}", path.display());
                }
                None => print!("{csv}"),
            }
        }
        LogsCommand::Clear { yes } => {
            if !yes {
                eprintln!("refusing to clear logs without --yes");
                return Ok(ExitCode::FAILURE);
            }
            if store.clear_all().await? {
                println!("email logs cleared");
            }
        }
        LogsCommand::Purge { days } => {
            let days = days.unwrap_or(config.logging.retention_days);
            let deleted = store.purge_older_than(TimeDelta::days(i64::from(days))).await?;
            println!("deleted {deleted} rows older than {days} days");
        }
        LogsCommand::Stats { days } => {
            let since =
                days.and_then(|d| Utc::now().checked_sub_signed(TimeDelta::days(i64::from(d))));
            let stats = store.statistics(since).await?;
            println!("total:        {}", stats.total);
            println!("sent:         {}", stats.sent);
            println!("failed:       {}", stats.failed);
            println!("pending:      {}", stats.pending);
            println!("success rate: {:.2}%", stats.success_rate());
        }
    }
    Ok(ExitCode::SUCCESS)
}

impl FilterArgs {
    fn into_filter(self) -> Result<LogFilter> {
        let status = self
            .status
            .as_deref()
            .map(LogStatus::parse)
            .transpose()
            .context("invalid --status")?;
        Ok(LogFilter {
            status,
            email: self.email,
            date_from: self.since.as_deref().map(|s| parse_date(s, false)).transpose()?,
            date_to: self.until.as_deref().map(|s| parse_date(s, true)).transpose()?,
            order: if self.asc { SortOrder::Asc } else { SortOrder::Desc },
            limit: self.limit,
            offset: self.offset,
        })
    }
}

/// Accept RFC 3339 or a bare date; a bare `--until` date covers the whole day.
fn parse_date(raw: &str, end_of_day: bool) -> Result<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Ok(at.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .with_context(|| format!("invalid date '{raw}'"))?;
    let time = if end_of_day {
        date.and_hms_micro_opt(23, 59, 59, 999_999)
    } else {
        date.and_hms_opt(0, 0, 0)
    };
    time.map(|t| t.and_utc())
        .with_context(|| format!("invalid date '{raw}'"))
}
