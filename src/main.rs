//! CLI Entry Point for scope_link
//!
//! ```bash
//! # next to the instrument
//! scope_link server --address 0.0.0.0 --port 5025
//!
//! # operator console
//! scope_link client --address 192.168.1.20 --port 5025
//! ```
//!
//! The server drives the built-in simulated oscilloscope.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use scope_link::actors::ScopeActor;
use scope_link::config::{ScopeLinkConfig, DEFAULT_CONFIG_PATH};
use scope_link::data::RunLog;
use scope_link::hardware::MockScope;
use scope_link::network::{ClientSession, DispatchServer, SessionEvent};
use scope_link::tracing_init;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info};

const PROMPT: &str = "MESSAGE > ";

#[derive(Parser)]
#[command(name = "scope_link")]
#[command(about = "Remote oscilloscope session over compressed TCP frames", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve one client session against the instrument
    Server(Endpoint),
    /// Interactive operator console
    Client(Endpoint),
}

#[derive(clap::Args)]
struct Endpoint {
    /// Overrides network.address
    #[arg(long)]
    address: Option<String>,

    /// Overrides network.port
    #[arg(long)]
    port: Option<u16>,
}

impl Endpoint {
    fn apply(&self, config: &mut ScopeLinkConfig) {
        if let Some(address) = &self.address {
            config.network.address = address.clone();
        }
        if let Some(port) = self.port {
            config.network.port = port;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = ScopeLinkConfig::load_from(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    match &cli.command {
        Commands::Server(endpoint) | Commands::Client(endpoint) => endpoint.apply(&mut config),
    }
    config.validate()?;
    tracing_init::init_from_config(&config)?;

    match cli.command {
        Commands::Server(_) => run_server(config).await,
        Commands::Client(_) => run_client(config).await,
    }
}

async fn run_server(config: ScopeLinkConfig) -> Result<()> {
    let (scope, actor) = ScopeActor::spawn(
        MockScope::new(),
        config.acquisition_settings(),
        config.acquisition.actor_queue_capacity,
    );
    let server =
        DispatchServer::bind(config.socket_addr(), scope, config.network.max_frame_bytes).await?;

    tokio::select! {
        result = server.serve() => {
            let summary = result?;
            info!(
                peer = %summary.peer,
                commands = summary.commands,
                errors = summary.errors,
                "Session finished"
            );
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
        }
    }

    actor.abort();
    Ok(())
}

async fn run_client(config: ScopeLinkConfig) -> Result<()> {
    let run_log = RunLog::create(&config.storage.output_dir)
        .await
        .with_context(|| format!("Cannot create run files in {}", config.storage.output_dir.display()))?;
    let (session, events) =
        ClientSession::connect(config.socket_addr(), run_log.clone(), config.network.max_frame_bytes)
            .await
            .with_context(|| format!("Cannot connect to {}", config.socket_addr()))?;
    println!("Connected to {}", session.peer());

    let printer = tokio::spawn(print_events(events));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    loop {
        stdout.write_all(PROMPT.as_bytes()).await?;
        stdout.flush().await?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = session.closed() => break,
        };
        let Some(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }
        if let Err(e) = session.send_command(&line).await {
            error!(error = %e, "Failed to send command");
            break;
        }
    }

    session.shutdown().await.ok();
    session.closed().await;
    printer.await.ok();
    run_log.sync().await;
    Ok(())
}

async fn print_events(mut events: mpsc::UnboundedReceiver<SessionEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::Info(text) => println!("{}", text),
            SessionEvent::Error(message) => println!("[ERROR]: {}", message),
            SessionEvent::Data(capture) => {
                println!("[C-{}]: {} samples", capture.channel.number(), capture.samples.len())
            }
            SessionEvent::InvalidMessage(text) => println!("Invalid return message: {}", text),
            SessionEvent::Closed(None) => println!("Server closed the connection"),
            SessionEvent::Closed(Some(reason)) => println!("Connection lost: {}", reason),
        }
    }
}
