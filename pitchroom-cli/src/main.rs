//! Pitchroom CLI Application

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use directories::ProjectDirs;
use pitchroom_core::prelude::*;
use pitchroom_core::MeetingRecord;
use rand::Rng;
use std::path::PathBuf;
use std::sync::Arc;
use terminal_ui::TerminalUI;

mod terminal_ui;

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Session configuration file (JSON)
    #[arg(short, long, env = "PITCHROOM_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the meeting id for an investor and an entrepreneur
    MeetingId {
        /// Investor id
        #[arg(long)]
        investor: String,

        /// Entrepreneur id
        #[arg(long)]
        entrepreneur: String,
    },

    /// Request a meeting and print the stored record
    Schedule {
        /// Investor id
        #[arg(long)]
        investor: String,

        /// Investor display name
        #[arg(long, default_value = "Investor")]
        investor_name: String,

        /// Entrepreneur id
        #[arg(long)]
        entrepreneur: String,

        /// Requested time (RFC 3339), defaults to now
        #[arg(long)]
        date: Option<DateTime<Utc>>,
    },

    /// Request a meeting, answer it and print the stored record
    Respond {
        /// Investor id
        #[arg(long)]
        investor: String,

        /// Entrepreneur id
        #[arg(long)]
        entrepreneur: String,

        /// Reject instead of accepting
        #[arg(long)]
        reject: bool,
    },

    /// Run both peers of a meeting call on this machine
    Demo {
        /// Investor id, random when omitted
        #[arg(long)]
        investor: Option<String>,

        /// Entrepreneur id, random when omitted
        #[arg(long)]
        entrepreneur: Option<String>,

        /// Print status lines instead of the call screen
        #[arg(long)]
        no_ui: bool,

        /// Capture audio only
        #[arg(long)]
        audio_only: bool,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("pitchroom=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::MeetingId {
            investor,
            entrepreneur,
        } => {
            println!("{}", meeting_id_for(&investor, &entrepreneur)?);
        }
        Commands::Schedule {
            investor,
            investor_name,
            entrepreneur,
            date,
        } => {
            handle_schedule(&investor, &investor_name, &entrepreneur, date).await?;
        }
        Commands::Respond {
            investor,
            entrepreneur,
            reject,
        } => {
            let decision = if reject {
                Decision::Reject
            } else {
                Decision::Accept
            };
            handle_respond(&investor, &entrepreneur, decision).await?;
        }
        Commands::Demo {
            investor,
            entrepreneur,
            no_ui,
            audio_only,
        } => {
            let mut config = config;
            if audio_only {
                config.constraints = MediaConstraints::audio_only();
            }
            let investor = investor.unwrap_or_else(|| generate_random_id("inv"));
            let entrepreneur = entrepreneur.unwrap_or_else(|| generate_random_id("ent"));
            handle_demo(config, &investor, &entrepreneur, no_ui).await?;
        }
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

/// Explicit path, then the per-user config file, then defaults
fn load_config(explicit: Option<&PathBuf>) -> Result<SessionConfig> {
    if let Some(path) = explicit {
        return SessionConfig::from_json_file(path)
            .with_context(|| format!("loading {}", path.display()));
    }
    if let Some(path) = default_config_path().filter(|p| p.exists()) {
        return SessionConfig::from_json_file(&path)
            .with_context(|| format!("loading {}", path.display()));
    }
    Ok(SessionConfig::default())
}

fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("io", "pitchroom", "pitchroom")
        .map(|dirs| dirs.config_dir().join("config.json"))
}

fn parse_participant_id(raw: &str) -> Result<ParticipantId> {
    ParticipantId::from_string_repr(raw).with_context(|| format!("invalid participant id '{raw}'"))
}

fn meeting_id_for(investor: &str, entrepreneur: &str) -> Result<MeetingId> {
    Ok(MeetingId::for_participants(
        &parse_participant_id(investor)?,
        &parse_participant_id(entrepreneur)?,
    ))
}

fn participants(
    investor: &str,
    investor_name: &str,
    entrepreneur: &str,
) -> Result<(Participant, Participant)> {
    Ok((
        Participant::investor(parse_participant_id(investor)?, investor_name),
        Participant::entrepreneur(parse_participant_id(entrepreneur)?, entrepreneur),
    ))
}

fn print_record(record: &MeetingRecord) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(record)?);
    Ok(())
}

async fn handle_schedule(
    investor: &str,
    investor_name: &str,
    entrepreneur: &str,
    date: Option<DateTime<Utc>>,
) -> Result<()> {
    let store = Arc::new(InMemoryMeetingStore::new());
    let scheduler = MeetingScheduler::new(store);
    let (investor, entrepreneur) = participants(investor, investor_name, entrepreneur)?;

    let id = scheduler
        .schedule(&investor, &entrepreneur, date.unwrap_or_else(Utc::now))
        .await?;
    println!("📅 Meeting requested: {id}");
    if let Some(record) = scheduler.meeting(&id).await? {
        print_record(&record)?;
    }
    Ok(())
}

async fn handle_respond(investor: &str, entrepreneur: &str, decision: Decision) -> Result<()> {
    let store = Arc::new(InMemoryMeetingStore::new());
    let scheduler = MeetingScheduler::new(store);
    let (investor, entrepreneur) = participants(investor, "Investor", entrepreneur)?;

    scheduler
        .schedule(&investor, &entrepreneur, Utc::now())
        .await?;
    let record = scheduler
        .respond(&entrepreneur, &investor.id, decision)
        .await?;
    match decision {
        Decision::Accept => println!("✅ Meeting accepted"),
        Decision::Reject => println!("❌ Meeting rejected"),
    }
    print_record(&record)
}

async fn handle_demo(
    config: SessionConfig,
    investor: &str,
    entrepreneur: &str,
    no_ui: bool,
) -> Result<()> {
    let store = Arc::new(InMemoryMeetingStore::new());
    let scheduler = MeetingScheduler::new(store.clone());
    let (investor, entrepreneur) = participants(investor, "Investor", entrepreneur)?;

    let meeting_id = scheduler
        .schedule(&investor, &entrepreneur, Utc::now())
        .await?;
    let record = scheduler
        .respond(&entrepreneur, &investor.id, Decision::Accept)
        .await?;
    println!(
        "📅 Meeting {meeting_id} accepted, link {}",
        record.meeting_link.as_deref().unwrap_or("-")
    );

    let transports = Arc::new(RtcTransportFactory::new());
    let media = Arc::new(SyntheticMediaSource::new());
    let investor_call = CallSession::new(
        meeting_id.as_str(),
        config.clone(),
        store.clone(),
        transports.clone(),
        media.clone(),
    );
    let entrepreneur_call = CallSession::new(
        meeting_id.as_str(),
        config,
        store,
        transports,
        media,
    );

    let mut events = investor_call.subscribe_events();
    let role = investor_call.start().await?;
    println!("📞 {} joined as {role}", investor.display_name);
    let role = entrepreneur_call.start().await?;
    println!("📞 {} joined as {role}", entrepreneur.display_name);

    if no_ui {
        println!("   Press Ctrl-C to end the call");
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                event = events.recv() => match event {
                    Ok(SessionEvent::StatusChanged { to, .. }) => println!("🔗 {to}"),
                    Ok(SessionEvent::RemoteTrackReceived { kind, .. }) => {
                        println!("🎥 Remote {kind} track received");
                    }
                    Ok(SessionEvent::Failed { reason }) => {
                        println!("❌ {reason}");
                        break;
                    }
                    Ok(other) => tracing::debug!("Session event: {:?}", other),
                    Err(e) => {
                        tracing::error!("Event stream error: {}", e);
                        break;
                    }
                },
            }
        }
    } else {
        let mut ui = TerminalUI::new()?;
        ui.run(&investor_call).await?;
    }

    investor_call.end_call().await;
    entrepreneur_call.end_call().await;
    println!("📞 {}", investor_call.status_line());
    Ok(())
}

fn generate_random_id(prefix: &str) -> String {
    let n: u32 = rand::thread_rng().gen_range(1000..10000);
    format!("{prefix}{n}")
}
