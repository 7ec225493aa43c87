//! # RemindClaw — weekly session reminders over WhatsApp
//!
//! Usage:
//!   remindclaw                        # Serve the control API (default)
//!   remindclaw serve --port 8080      # Custom port
//!   remindclaw run-once               # One lifecycle, exit after the first dispatch cycle
//!   remindclaw check-roster           # Fetch and partition the roster, print the result

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use remindclaw_core::RemindClawConfig;
use remindclaw_roster::{AllowedStatuses, HttpRoster, RosterPartitioner};
use remindclaw_scheduler::BotControl;

#[derive(Parser)]
#[command(
    name = "remindclaw",
    version,
    about = "📅 RemindClaw — weekly session reminders over WhatsApp"
)]
struct Cli {
    /// Config file (default: ~/.remindclaw/config.toml)
    #[arg(short, long, env = "REMINDCLAW_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the HTTP control surface and observer WebSocket
    Serve {
        /// Override the configured port
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Start the bot, wait for one dispatch cycle, then stop
    RunOnce,
    /// Fetch and partition the roster without sending anything
    CheckRoster,
}

fn load_config(path: Option<&PathBuf>) -> Result<RemindClawConfig> {
    let mut config = match path {
        Some(path) => RemindClawConfig::load_from(path)?,
        None => RemindClawConfig::load()?,
    };
    config.apply_env_overrides();
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "remindclaw=debug,remindclaw_core=debug,remindclaw_roster=debug,remindclaw_channels=debug,remindclaw_scheduler=debug,remindclaw_gateway=debug,tower_http=debug"
    } else {
        "remindclaw=info,remindclaw_core=info,remindclaw_roster=info,remindclaw_channels=info,remindclaw_scheduler=info,remindclaw_gateway=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let config = load_config(cli.config.as_ref())?;

    match cli.command.unwrap_or(Command::Serve { port: None }) {
        Command::Serve { port } => {
            let mut gateway = config.gateway.clone();
            if let Some(port) = port {
                gateway.port = port;
            }
            let control = BotControl::from_config(&config)?;
            remindclaw_gateway::start(control, &gateway).await
        }
        Command::RunOnce => run_once(&config).await,
        Command::CheckRoster => check_roster(&config).await,
    }
}

async fn run_once(config: &RemindClawConfig) -> Result<()> {
    let control = BotControl::from_config(config)?;
    let mut cycles = control.session().subscribe_cycles();
    control.start_cycle().await;

    let mut poll = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            changed = cycles.changed() => {
                if changed.is_err() || *cycles.borrow() > 0 {
                    break;
                }
            }
            _ = poll.tick() => {
                if !control.status().running {
                    tracing::warn!("⚠️ Bot stopped before a dispatch cycle completed");
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("🛑 Interrupted");
                break;
            }
        }
    }

    control.stop_cycle().await;
    let stats = control.stats().await?;
    println!("📊 Total sent: {}", stats.total_sent);
    for (day, total) in &stats.per_day {
        println!("   {day}: {total}");
    }
    Ok(())
}

async fn check_roster(config: &RemindClawConfig) -> Result<()> {
    let source = Arc::new(HttpRoster::new(&config.roster)?);
    println!("📋 Roster: {}", source.url());
    let partitioner = RosterPartitioner::new(
        source,
        AllowedStatuses::from_names(&config.roster.allowed_statuses),
    );
    let partition = partitioner.load().await?;

    println!("\n📅 Contacts by day ({} total):", partition.contact_count());
    for (day, contacts) in &partition.buckets {
        println!("   {day}: {}", contacts.len());
        for contact in contacts {
            println!(
                "      {} {} ({}) - {}",
                contact.registration_code,
                contact.first_name,
                contact.phone_display,
                contact.scheduled_day_label
            );
        }
    }
    println!("\n⏭️  Skipped by status: {}", partition.skipped);
    println!("\n⚠️  Invalid records: {}", partition.invalid.len());
    for record in &partition.invalid {
        println!(
            "   {} {} (agent {}): {}",
            record.registration_code, record.student, record.agent, record.reason
        );
    }
    Ok(())
}
