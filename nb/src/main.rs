//! NotifyBridge - desktop notification bridge
//!
//! CLI entry point for running the bridge and querying a running one.

use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result};
use futures::StreamExt;
use tracing::{debug, error, info, warn};

use notifybridge::cli::{Cli, Command, OutputFormat};
use notifybridge::collector::{Collector, ReadResult, spawn_refresh_worker};
use notifybridge::config::Config;
use notifybridge::domain::Record;
use notifybridge::ipc::{BridgeClient, IpcServer, PushFrame, SubscriberHub, WatchEvent};
use notifybridge::source::SpoolSource;

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>, log_file: Option<&Path>) -> Result<()> {
    // Determine log level with priority: CLI --log-level > config file > default (INFO)
    let level_str = cli_log_level.or(config_log_level);
    let level = if let Some(s) = level_str {
        match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        }
    } else {
        tracing::Level::INFO
    };

    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into());

    match log_file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent).context("Failed to create log directory")?;
            }
            let file = fs::File::create(path).context("Failed to create log file")?;
            tracing_subscriber::fmt()
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .with_env_filter(filter)
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_writer(std::io::stderr)
                .with_env_filter(filter)
                .init();
        }
    }

    debug!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_ref())
        .context("Failed to load configuration")?
        .with_overrides(cli.host.clone(), cli.port);

    setup_logging(
        cli.log_level.as_deref(),
        config.log.level.as_deref(),
        config.log.file.as_deref(),
    )
    .context("Failed to setup logging")?;

    config.validate().context("Invalid configuration")?;

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        None | Some(Command::Serve) => cmd_serve(&config).await,
        Some(Command::Ping) => cmd_ping(&config).await,
        Some(Command::Read { format }) => cmd_read(&config, format).await,
        Some(Command::Watch { format }) => cmd_watch(&config, format).await,
    }
}

/// Run the bridge until SIGINT/SIGTERM
async fn cmd_serve(config: &Config) -> Result<()> {
    let spool = config.source.spool.clone();
    info!(spool = %spool.display(), capacity = config.cache.capacity, "Starting NotifyBridge");

    let collector = Arc::new(Collector::new(Arc::new(SpoolSource::new(spool)), config.cache.capacity));
    let hub = SubscriberHub::new();

    // Bind before touching the source so an address conflict fails fast
    let server = IpcServer::bind(
        config.server.addr(),
        collector.clone(),
        hub.clone(),
        config.server.max_line_bytes,
    )
    .await?;
    let addr = server.local_addr()?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);
    let server_handle = tokio::spawn(server.run(shutdown_rx));

    let (trigger, worker_handle) = spawn_refresh_worker(collector.clone());
    collector.set_snapshot_hook(Arc::new(hub));
    collector.start(trigger).await;

    info!(%addr, availability = %collector.availability(), "Bridge running. Press Ctrl+C to stop.");

    wait_for_shutdown().await?;
    info!("Bridge shutting down...");
    let _ = shutdown_tx.send(()).await;

    match server_handle.await {
        Ok(Ok(())) => debug!("cmd_serve: server finished"),
        Ok(Err(e)) => error!(error = %e, "IPC server error"),
        Err(e) => error!(error = %e, "IPC server task failed"),
    }
    worker_handle.abort();

    info!("Bridge stopped");
    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
        let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

        tokio::select! {
            _ = sigint.recv() => warn!("SIGINT received"),
            _ = sigterm.recv() => warn!("SIGTERM received"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.context("Failed to wait for Ctrl+C")?;
        warn!("Ctrl+C received");
    }

    Ok(())
}

async fn cmd_ping(config: &Config) -> Result<()> {
    let client = BridgeClient::new(config.server.addr());
    client.ping().await?;
    println!("{} from {}", "pong".green(), client.addr());
    Ok(())
}

async fn cmd_read(config: &Config, format: OutputFormat) -> Result<()> {
    let client = BridgeClient::new(config.server.addr());
    let result = client.read_notifications().await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        OutputFormat::Text => print_read_result(&result),
    }

    if !result.ok {
        return Err(eyre::eyre!(
            "Read failed: {}",
            result.message.unwrap_or_else(|| "unknown error".to_string())
        ));
    }
    Ok(())
}

/// Stream push frames, reconnecting with backoff until Ctrl-C
async fn cmd_watch(config: &Config, format: OutputFormat) -> Result<()> {
    let client = BridgeClient::new(config.server.addr());
    let events = client.watch();
    futures::pin_mut!(events);
    let interrupted = tokio::signal::ctrl_c();
    futures::pin_mut!(interrupted);

    loop {
        let event = tokio::select! {
            event = events.next() => event,
            _ = &mut interrupted => break,
        };
        let Some(event) = event else { break };

        match event {
            WatchEvent::Connected => eprintln!("{} {}", "Connected to".green(), client.addr()),
            WatchEvent::ConnectFailed {
                failures,
                retry_in,
                error,
            } => eprintln!(
                "{} (attempt {}): {}; retrying in {:?}",
                "Connect failed".yellow(),
                failures,
                error,
                retry_in
            ),
            WatchEvent::Disconnected { reason } => match reason {
                Some(reason) => eprintln!("{}: {}", "Disconnected".yellow(), reason),
                None => eprintln!("{}", "Bridge closed the connection".yellow()),
            },
            WatchEvent::Frame(frame) => match format {
                OutputFormat::Json => println!("{}", serde_json::to_string(&frame)?),
                OutputFormat::Text => print_push_frame(&frame),
            },
        }
    }

    debug!("cmd_watch: interrupted");
    Ok(())
}

fn print_read_result(result: &ReadResult) {
    if !result.ok {
        let code = result.error_code.map(|c| c.to_string()).unwrap_or_else(|| "ERROR".to_string());
        eprintln!("{} {}", code.red().bold(), result.message.as_deref().unwrap_or(""));
        return;
    }

    if result.notifications.is_empty() {
        println!("{}", "No notifications".dimmed());
        return;
    }
    for record in &result.notifications {
        print_record(record);
    }
}

fn print_push_frame(frame: &PushFrame) {
    println!("{}", format!("--- {} notification(s) ---", frame.notifications.len()).cyan());
    for record in &frame.notifications {
        print_record(record);
    }
}

fn print_record(record: &Record) {
    let timestamp = record.timestamp.as_deref().unwrap_or("-");
    let app = record.app.as_deref().unwrap_or("unknown app");
    let title = record.title.as_deref().unwrap_or("");
    match record.body.as_deref() {
        Some(body) => println!("{} {} {} {}", timestamp.dimmed(), app.blue(), title.bold(), body),
        None => println!("{} {} {}", timestamp.dimmed(), app.blue(), title.bold()),
    }
}
