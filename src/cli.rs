//! Command-line entry points.

use crate::config::{AbortPolicy, Config, TransportKind};
use crate::credentials::Field;
use crate::error::Error;
use crate::form::{CredentialForm, TerminalPrompter};
use crate::operator::{CodeSource, TerminalOperator};
use crate::protocol::Outcome;
use crate::session::{CloseReason, SessionEvent};
use crate::submit::{SubmitReport, submitter_for};
use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::io::{self, BufRead};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Hand job-application runs to the automation backend
#[derive(Parser, Debug)]
#[command(name = "autoapply", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Submit a run (prompts for anything not given as a flag)
    Submit(SubmitArgs),
    /// View or modify configuration
    Config(ConfigArgs),
}

#[derive(Parser, Debug, Default)]
pub struct SubmitArgs {
    /// Account email
    #[arg(short, long)]
    pub email: Option<String>,

    /// Job title to search for
    #[arg(long)]
    pub what: Option<String>,

    /// Job location to search in
    #[arg(long = "where", value_name = "LOCATION")]
    pub where_: Option<String>,

    /// Read the account password from the first line of stdin
    #[arg(long)]
    pub password_stdin: bool,

    /// Protocol binding (overrides config)
    #[arg(short, long, value_enum)]
    pub transport: Option<TransportArg>,

    /// Backend host (overrides config)
    #[arg(long)]
    pub host: Option<String>,

    /// Backend port (overrides config)
    #[arg(long)]
    pub port: Option<u16>,

    /// Seconds to wait for a one-time code before giving up
    #[arg(long, value_name = "SECS")]
    pub code_timeout: Option<u64>,

    /// What to do when code entry is cancelled
    #[arg(long, value_enum)]
    pub on_code_abort: Option<AbortArg>,

    /// Output format
    #[arg(short = 'o', long, default_value = "text", value_enum)]
    pub output_format: OutputFormat,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl SubmitArgs {
    /// Apply flag overrides on top of the loaded config.
    pub fn apply(&self, config: &mut Config) {
        if let Some(transport) = self.transport {
            config.transport = transport.into();
        }
        if let Some(host) = &self.host {
            config.host.clone_from(host);
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(secs) = self.code_timeout {
            config.code_timeout_secs = Some(secs);
        }
        if let Some(policy) = self.on_code_abort {
            config.on_code_abort = policy.into();
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum TransportArg {
    /// WebSocket session with code relay
    Interactive,
    /// Single POST, no code relay
    Rest,
}

impl From<TransportArg> for TransportKind {
    fn from(t: TransportArg) -> Self {
        match t {
            TransportArg::Interactive => Self::Interactive,
            TransportArg::Rest => Self::Rest,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum AbortArg {
    /// Close the session
    Close,
    /// Keep waiting for the backend to ask again
    Wait,
}

impl From<AbortArg> for AbortPolicy {
    fn from(a: AbortArg) -> Self {
        match a {
            AbortArg::Close => Self::Close,
            AbortArg::Wait => Self::Wait,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    StreamJson,
}

#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Get a configuration value
    Get {
        /// Key to get (host, port, transport, ...)
        key: String,
    },
    /// Set a configuration value
    Set {
        /// Key to set
        key: String,
        /// Value to set
        value: String,
    },
    /// Show config file path
    Path,
}

const CONFIG_KEYS: [&str; 9] = [
    "host",
    "port",
    "secure",
    "transport",
    "connect_timeout_secs",
    "request_timeout_secs",
    "code_timeout_secs",
    "on_code_abort",
    "code_prompt",
];

/// JSON output structure for json/stream-json modes
#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum JsonEvent<'a> {
    Connected { session_id: &'a str },
    Submitted,
    CodeRequested { attempt: usize },
    CodeSent { attempt: usize },
    CodeEntryAborted { attempt: usize },
    Ignored { event: Option<&'a str> },
    Finished { outcome: &'a Outcome },
    Closed { reason: &'a CloseReason },
    Done { report: &'a SubmitReport },
    Error { kind: &'static str, message: String },
}

impl<'a> From<&'a SessionEvent> for JsonEvent<'a> {
    fn from(event: &'a SessionEvent) -> Self {
        match event {
            SessionEvent::Connected { session_id } => Self::Connected { session_id },
            SessionEvent::Submitted => Self::Submitted,
            SessionEvent::CodeRequested { attempt } => Self::CodeRequested { attempt: *attempt },
            SessionEvent::CodeSent { attempt } => Self::CodeSent { attempt: *attempt },
            SessionEvent::CodeEntryAborted { attempt } => {
                Self::CodeEntryAborted { attempt: *attempt }
            }
            SessionEvent::Ignored { event } => Self::Ignored {
                event: event.as_deref(),
            },
            SessionEvent::Finished(outcome) => Self::Finished { outcome },
            SessionEvent::Closed(reason) => Self::Closed { reason },
        }
    }
}

fn error_kind(error: &Error) -> &'static str {
    match error {
        Error::InvalidInput(_) => "invalid_input",
        Error::Connection(_) | Error::ConnectTimeout(_) | Error::Http(_) => "connection",
        Error::CodeEntryAborted => "code_entry_aborted",
        Error::Cancelled => "cancelled",
        Error::Protocol(_) => "protocol",
        Error::Rejected(_) => "rejected",
        Error::Config(_) | Error::Io(_) | Error::Json(_) => "internal",
    }
}

/// Exit code for a failed submission.
#[must_use]
pub fn exit_code_for(error: &Error) -> ExitCode {
    match error {
        Error::CodeEntryAborted | Error::Cancelled => ExitCode::from(2),
        Error::Rejected(_) => ExitCode::from(3),
        _ => ExitCode::from(1),
    }
}

fn init_tracing(verbose: bool) {
    let filter = match EnvFilter::try_from_env("AUTOAPPLY_LOG") {
        Ok(filter) => filter,
        Err(_) if verbose => EnvFilter::new("autoapply=debug"),
        Err(_) => return,
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn describe_close(reason: &CloseReason) -> String {
    match reason {
        CloseReason::Client => "Session closed.".to_string(),
        CloseReason::Completed => "Session complete.".to_string(),
        CloseReason::Backend { code, reason } => {
            let mut text = "Backend closed the session".to_string();
            if let Some(code) = code {
                text.push_str(&format!(" (code {code})"));
            }
            if let Some(reason) = reason {
                text.push_str(&format!(": {reason}"));
            }
            text.push('.');
            text
        }
    }
}

fn print_event(event: &SessionEvent, format: OutputFormat, verbose: bool) -> Result<()> {
    match format {
        OutputFormat::Text => match event {
            SessionEvent::Connected { session_id } if verbose => {
                eprintln!("Connected (session {session_id})");
            }
            SessionEvent::Submitted => eprintln!("Run submitted."),
            SessionEvent::CodeSent { .. } => eprintln!("Code sent."),
            SessionEvent::CodeEntryAborted { .. } => eprintln!("Code entry cancelled."),
            SessionEvent::Ignored { event } if verbose => {
                eprintln!("Ignored event {}", event.as_deref().unwrap_or("(untagged)"));
            }
            SessionEvent::Finished(outcome) => {
                let status = if outcome.success { "succeeded" } else { "failed" };
                match &outcome.message {
                    Some(message) => eprintln!("Run {status}: {message}"),
                    None => eprintln!("Run {status}."),
                }
            }
            SessionEvent::Closed(reason) if verbose => eprintln!("{}", describe_close(reason)),
            // The operator prompt itself announces code requests.
            _ => {}
        },
        OutputFormat::StreamJson => {
            println!("{}", serde_json::to_string(&JsonEvent::from(event))?);
        }
        OutputFormat::Json => {}
    }
    Ok(())
}

fn output_result(result: crate::Result<SubmitReport>, format: OutputFormat) -> Result<ExitCode> {
    match result {
        Ok(report) => {
            match format {
                OutputFormat::Text => match &report {
                    SubmitReport::Interactive(report) if report.outcome.is_none() => {
                        println!(
                            "Backend is running the job search ({} code(s) sent). It does not report an outcome here.",
                            report.codes_sent
                        );
                    }
                    SubmitReport::Interactive(_) => println!("Done."),
                    SubmitReport::Rest { response } => println!("{response}"),
                },
                OutputFormat::Json => {
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&JsonEvent::Done { report: &report })?
                    );
                }
                OutputFormat::StreamJson => {
                    println!(
                        "{}",
                        serde_json::to_string(&JsonEvent::Done { report: &report })?
                    );
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            match format {
                OutputFormat::Text => eprintln!("Error: {e}"),
                OutputFormat::Json | OutputFormat::StreamJson => {
                    let json = serde_json::to_string(&JsonEvent::Error {
                        kind: error_kind(&e),
                        message: e.to_string(),
                    })?;
                    println!("{json}");
                }
            }
            Ok(exit_code_for(&e))
        }
    }
}

fn read_password_stdin() -> io::Result<String> {
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

/// Run the submit command
pub async fn submit(args: SubmitArgs) -> ExitCode {
    match submit_inner(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(1)
        }
    }
}

async fn submit_inner(args: SubmitArgs) -> Result<ExitCode> {
    init_tracing(args.verbose);

    let mut config = Config::load()?;
    args.apply(&mut config);

    let mut form = CredentialForm::new();
    form.set(Field::Email, args.email.clone());
    form.set(Field::What, args.what.clone());
    form.set(Field::Where, args.where_.clone());
    if args.password_stdin {
        form.set(Field::Password, Some(read_password_stdin()?));
    }

    let Some(params) = form.fill_missing(&TerminalPrompter).await? else {
        eprintln!("Cancelled.");
        return Ok(ExitCode::from(2));
    };

    let cancel = CancellationToken::new();
    let operator: Arc<dyn CodeSource> = Arc::new(TerminalOperator::new(config.code_prompt.clone()));
    let submitter = submitter_for(&config, operator, cancel.clone())?;
    tracing::debug!(transport = config.transport.id(), host = %config.host, "Submitting");

    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let (tx, mut rx) = mpsc::channel::<SessionEvent>(100);
    let handle = tokio::spawn(async move { submitter.submit(&params, tx).await });

    let output_format = args.output_format;
    while let Some(event) = rx.recv().await {
        if event == SessionEvent::Submitted {
            form.reset();
        }
        print_event(&event, output_format, args.verbose)?;
    }

    let result = handle.await?;
    output_result(result, output_format)
}

/// Run the config command
#[must_use]
pub fn config(args: ConfigArgs) -> ExitCode {
    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading config: {e}");
            return ExitCode::from(1);
        }
    };

    match args.action {
        None => {
            for key in CONFIG_KEYS {
                println!("{key}: {}", config.get(key).unwrap_or_default());
            }
            ExitCode::from(0)
        }
        Some(ConfigAction::Path) => {
            println!("{}", Config::config_path().display());
            ExitCode::from(0)
        }
        Some(ConfigAction::Get { key }) => match config.get(&key) {
            Some(value) => {
                println!("{value}");
                ExitCode::from(0)
            }
            None => {
                eprintln!("Unknown key: {key}. Valid keys: {}", CONFIG_KEYS.join(", "));
                ExitCode::from(1)
            }
        },
        Some(ConfigAction::Set { key, value }) => {
            let mut config = config;
            if let Err(e) = config.set(&key, &value) {
                eprintln!("{e}");
                return ExitCode::from(1);
            }
            if let Err(e) = config.save() {
                eprintln!("Failed to save config: {e}");
                return ExitCode::from(1);
            }
            println!("Updated {key}");
            ExitCode::from(0)
        }
    }
}
