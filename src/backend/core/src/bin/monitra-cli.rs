//! Monitra CLI - operator access to endpoints and heartbeats
//!
//! Talks to the same PostgreSQL store and Redis queues as the server. Schedule
//! changes made here reach a running server through the shared queue and its
//! periodic reconcile.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use serde::Serialize;
use tabled::{
    settings::{object::Columns, Alignment, Modify, Style},
    Table, Tabled,
};
use uuid::Uuid;

use monitra_core::{
    clock::{SharedClock, SystemClock},
    config::Config,
    jobs::{CheckScheduler, JobQueue, CHECK_QUEUE},
    model::{CheckKind, Endpoint, EndpointId, Heartbeat, NewEndpoint, UserId},
    probe::ProbeExecutor,
    service::{Backends, MonitorService},
};

// ═══════════════════════════════════════════════════════════════════════════════
// CLI Structure
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Parser)]
#[command(
    name = "monitra",
    version,
    about = "Monitra - endpoint uptime monitoring",
    propagate_version = true
)]
struct Cli {
    /// Output format
    #[arg(short, long, global = true, default_value = "table")]
    format: OutputFormat,

    /// Configuration file path
    #[arg(short, long, global = true, env = "MONITRA_CONFIG")]
    config: Option<String>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum, Default)]
enum OutputFormat {
    Text,
    Json,
    #[default]
    Table,
}

#[derive(Subcommand)]
enum Commands {
    /// Register an endpoint; its first check is queued immediately
    Register {
        /// Owning user id
        #[arg(long)]
        owner: Uuid,
        /// Alert recipient
        #[arg(long)]
        email: String,
        #[arg(long)]
        name: String,
        /// URL, host:port or host depending on the kind
        #[arg(long)]
        target: String,
        #[arg(long, value_enum, default_value = "http")]
        kind: KindArg,
        /// Seconds between checks
        #[arg(long)]
        interval: Option<u64>,
    },

    /// List a user's endpoints
    List {
        #[arg(long)]
        owner: Uuid,
    },

    /// Show recent heartbeats, newest first
    Heartbeats {
        id: Uuid,
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Stop checking an endpoint
    Pause { id: Uuid },

    /// Resume checking an endpoint
    Resume { id: Uuid },

    /// Delete an endpoint and its heartbeats
    Delete { id: Uuid },

    /// Show the timers a reconcile would build from the store
    Schedule,

    /// Run one probe without recording it
    Check {
        #[arg(long, value_enum, default_value = "http")]
        kind: KindArg,
        target: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Http,
    Port,
    Ping,
}

impl From<KindArg> for CheckKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Http => CheckKind::Http,
            KindArg::Port => CheckKind::Port,
            KindArg::Ping => CheckKind::Ping,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Data Types for Output
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Serialize, Tabled)]
struct EndpointSummary {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Target")]
    target: String,
    #[tabled(rename = "Every (s)")]
    interval_secs: u64,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Last Checked")]
    last_checked: String,
}

impl From<&Endpoint> for EndpointSummary {
    fn from(e: &Endpoint) -> Self {
        Self {
            id: e.id.to_string(),
            name: e.name.clone(),
            kind: e.kind.to_string(),
            target: e.target.clone(),
            interval_secs: e.interval_secs,
            status: e.status.to_string(),
            last_checked: e
                .last_checked
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "never".into()),
        }
    }
}

#[derive(Debug, Serialize, Tabled)]
struct HeartbeatRow {
    #[tabled(rename = "Checked At")]
    checked_at: String,
    #[tabled(rename = "Outcome")]
    outcome: String,
    #[tabled(rename = "Latency (ms)")]
    latency_ms: u64,
    #[tabled(rename = "Message")]
    message: String,
}

impl From<&Heartbeat> for HeartbeatRow {
    fn from(h: &Heartbeat) -> Self {
        Self {
            checked_at: h.checked_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            outcome: h.outcome.to_string(),
            latency_ms: h.latency_ms,
            message: h.message.clone().unwrap_or_default(),
        }
    }
}

#[derive(Debug, Serialize, Tabled)]
struct TimerRow {
    #[tabled(rename = "Endpoint")]
    endpoint_id: String,
    #[tabled(rename = "Every (s)")]
    interval_secs: u64,
    #[tabled(rename = "Next Fire")]
    next_fire: String,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Output Helpers
// ═══════════════════════════════════════════════════════════════════════════════

struct OutputHelper {
    format: OutputFormat,
}

impl OutputHelper {
    fn new(format: OutputFormat, no_color: bool) -> Self {
        if no_color {
            colored::control::set_override(false);
        }
        Self { format }
    }

    fn print_success(&self, message: &str) {
        match self.format {
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"status": "success", "message": message}));
            }
            _ => {
                println!("{} {}", "[OK]".green().bold(), message);
            }
        }
    }

    fn print_error(&self, message: &str) {
        match self.format {
            OutputFormat::Json => {
                eprintln!("{}", serde_json::json!({"status": "error", "message": message}));
            }
            _ => {
                eprintln!("{} {}", "[ERROR]".red().bold(), message);
            }
        }
    }

    fn print_rows<T: Tabled + Serialize>(&self, items: &[T]) -> Result<()> {
        match self.format {
            OutputFormat::Json => self.print_json(&items),
            OutputFormat::Text => {
                for item in items {
                    let fields = item.fields();
                    let headers = T::headers();
                    let line: Vec<String> = headers
                        .iter()
                        .zip(fields.iter())
                        .map(|(h, v)| format!("{}={}", (&**h).cyan(), v))
                        .collect();
                    println!("{}", line.join("  "));
                }
                Ok(())
            }
            OutputFormat::Table => {
                if items.is_empty() {
                    println!("{}", "No results found.".dimmed());
                    return Ok(());
                }
                let table = Table::new(items)
                    .with(Style::rounded())
                    .with(Modify::new(Columns::first()).with(Alignment::left()))
                    .to_string();
                println!("{}", table);
                Ok(())
            }
        }
    }

    fn print_json<T: Serialize>(&self, data: &T) -> Result<()> {
        let json = serde_json::to_string_pretty(data)?;
        println!("{}", json);
        Ok(())
    }

    fn print_endpoint(&self, endpoint: &Endpoint, verb: &str) -> Result<()> {
        match self.format {
            OutputFormat::Json => self.print_json(endpoint),
            _ => {
                self.print_success(&format!("{} {} ({})", verb, endpoint.name, endpoint.id));
                self.print_rows(&[EndpointSummary::from(endpoint)])
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Command Handlers
// ═══════════════════════════════════════════════════════════════════════════════

struct App {
    config: Config,
    clock: SharedClock,
}

impl App {
    async fn service(&self) -> Result<(MonitorService, Arc<CheckScheduler>)> {
        let backends = Backends::connect(&self.config, self.clock.clone())
            .await
            .context("failed to connect to the store and queue")?;
        let scheduler = Arc::new(CheckScheduler::new(
            backends.queue(CHECK_QUEUE),
            self.clock.clone(),
        ));
        let service = MonitorService::new(
            backends.store.clone(),
            scheduler.clone(),
            self.config.checks.clone(),
            self.clock.clone(),
        );
        Ok((service, scheduler))
    }
}

async fn run(cli: Cli, output: &OutputHelper) -> Result<()> {
    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::load()?,
    };
    let ctx = App {
        config,
        clock: Arc::new(SystemClock),
    };

    match cli.command {
        Commands::Register {
            owner,
            email,
            name,
            target,
            kind,
            interval,
        } => {
            let (service, scheduler) = ctx.service().await?;
            let endpoint = service
                .register(NewEndpoint {
                    owner_id: UserId(owner),
                    notify_email: email,
                    name,
                    target,
                    kind: kind.into(),
                    interval_secs: interval,
                })
                .await?;
            // Queue the first check now instead of waiting for the server's reconcile.
            scheduler.tick(ctx.clock.now()).await;
            output.print_endpoint(&endpoint, "Registered")
        }
        Commands::List { owner } => {
            let (service, _) = ctx.service().await?;
            let endpoints = service.list_for_user(UserId(owner)).await?;
            let rows: Vec<EndpointSummary> = endpoints.iter().map(EndpointSummary::from).collect();
            output.print_rows(&rows)
        }
        Commands::Heartbeats { id, limit } => {
            let (service, _) = ctx.service().await?;
            let heartbeats = service.recent_heartbeats(EndpointId(id), limit).await?;
            let rows: Vec<HeartbeatRow> = heartbeats.iter().map(HeartbeatRow::from).collect();
            output.print_rows(&rows)
        }
        Commands::Pause { id } => {
            let (service, _) = ctx.service().await?;
            let endpoint = service.pause(EndpointId(id)).await?;
            output.print_endpoint(&endpoint, "Paused")
        }
        Commands::Resume { id } => {
            let (service, scheduler) = ctx.service().await?;
            let endpoint = service.resume(EndpointId(id)).await?;
            scheduler.tick(ctx.clock.now()).await;
            output.print_endpoint(&endpoint, "Resumed")
        }
        Commands::Delete { id } => {
            let (service, _) = ctx.service().await?;
            service.delete(EndpointId(id)).await?;
            output.print_success(&format!("Deleted {}", id));
            Ok(())
        }
        Commands::Schedule => {
            let backends = Backends::connect(&ctx.config, ctx.clock.clone()).await?;
            // A private queue: building the preview must not enqueue real tasks.
            let preview = CheckScheduler::new(Arc::new(JobQueue::in_memory(CHECK_QUEUE)), ctx.clock.clone());
            preview
                .reconcile(&backends.store.list_active_endpoints().await?)
                .await?;
            let rows: Vec<TimerRow> = preview
                .scheduled()
                .into_iter()
                .map(|t| TimerRow {
                    endpoint_id: t.endpoint_id.to_string(),
                    interval_secs: t.interval_secs,
                    next_fire: t.next_fire.format("%Y-%m-%d %H:%M:%S").to_string(),
                })
                .collect();
            output.print_rows(&rows)
        }
        Commands::Check { kind, target } => {
            let probes = ProbeExecutor::new(&ctx.config.probe)?;
            let result = probes.run(kind.into(), &target).await;
            match output.format {
                OutputFormat::Json => output.print_json(&result),
                _ => {
                    let outcome = if result.is_up() {
                        "UP".green().bold()
                    } else {
                        "DOWN".red().bold()
                    };
                    println!(
                        "{} {} in {}ms: {}",
                        outcome,
                        target,
                        result.latency_ms,
                        result.message.unwrap_or_default()
                    );
                    Ok(())
                }
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Entry Point
// ═══════════════════════════════════════════════════════════════════════════════

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let output = OutputHelper::new(cli.format, cli.no_color);

    if let Err(e) = run(cli, &output).await {
        output.print_error(&format!("{:#}", e));
        std::process::exit(1);
    }

    Ok(())
}
