//! Daily Check-in Agent Binary

use checkin_agent::agent::AgentHandle;
use checkin_agent::notify::{BroadcastNotifier, LogNotifier, Notifier};
use checkin_agent::store::{JsonFileStore, MemoryStore, StateStore};
use checkin_agent::{AgentError, CheckinAgent, Message, Request, Response, Result, Settings};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "checkin_agent", version, about = "Automated daily check-in agent")]
struct Cli {
    /// Keep state in memory instead of the state file
    #[arg(long, global = true)]
    ephemeral: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the agent until interrupted (default). Requests are read from
    /// stdin and notifications written to stdout, one JSON object per line.
    Run,
    /// Check the session once and run a pass if logged in
    Once,
    /// Send a single JSON request, e.g. '{"type":"GET_STATE"}'
    Request { json: String },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    initialize_tracing();

    let cli = Cli::parse();

    info!("Starting check-in agent v{}", env!("CARGO_PKG_VERSION"));

    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = settings.validate() {
        error!("Configuration validation failed: {}", e);
        std::process::exit(1);
    }

    info!(
        "Agent configuration - Cookie: {}, Session URL: {}, Targets: {}, State: {}",
        settings.session_cookie_name,
        settings.session_check_url,
        settings.targets.len(),
        settings.state_path.display()
    );

    let store: Arc<dyn StateStore> = if cli.ephemeral {
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(JsonFileStore::new(&settings.state_path))
    };

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            let notifier = BroadcastNotifier::default();
            let events = notifier.subscribe();
            let notifier: Arc<dyn Notifier> = Arc::new(notifier);
            let agent = Arc::new(CheckinAgent::from_settings(settings, store, notifier)?);

            let (handle, requests) = AgentHandle::channel(16);
            tokio::spawn(forward_notifications(events));
            tokio::spawn(serve_stdin(handle));

            agent.start(requests).await?;
        }
        Command::Once => {
            let agent = CheckinAgent::from_settings(settings, store, Arc::new(LogNotifier))?;
            let outcome = agent.check_and_run().await;
            print_json(&outcome)?;
        }
        Command::Request { json } => {
            let request: Request = serde_json::from_str(&json)?;
            let agent = CheckinAgent::from_settings(settings, store, Arc::new(LogNotifier))?;
            let response = agent.handle(request).await;
            print_json(&response)?;
        }
        Command::Config => print_json(&settings)?,
    }

    Ok(())
}

/// Write every notification to stdout as one JSON line
async fn forward_notifications(mut events: broadcast::Receiver<Message>) {
    loop {
        match events.recv().await {
            Ok(message) => {
                if let Err(e) = print_line(&message) {
                    warn!("Failed to write {} notification: {}", message.kind(), e);
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Observer output lagged, {} notifications dropped", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Read one JSON request per stdin line and answer on stdout
async fn serve_stdin(handle: AgentHandle) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!("Failed to read request from stdin: {}", e);
                break;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => match handle.request(request).await {
                Ok(response) => response,
                Err(e) => Response::failure(e.to_string()),
            },
            Err(e) => Response::failure(format!("invalid request: {}", e)),
        };

        if let Err(e) = print_line(&response) {
            warn!("Failed to write response: {}", e);
        }
    }

    info!("Stdin closed, no further requests will be read");
}

fn print_line<T: serde::Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string(value).map_err(AgentError::Json)?;
    println!("{}", rendered);
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).map_err(AgentError::Json)?;
    println!("{}", rendered);
    Ok(())
}

/// Initialize structured logging
fn initialize_tracing() {
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .json();

    let filter_layer = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&log_level))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
}
