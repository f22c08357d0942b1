//! Vitals Triage Agent CLI
//!
//! Periodic heart-rate, HRV and step triage with best-effort remote analysis.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use vitals_triage_agent::{
    analysis::AnalysisClient,
    collector::{FileSource, SampleSource},
    config::Config,
    core::Lookback,
    messages::{create_shared_log, FileStore, Message, Origin, SharedMessageLog},
    pipeline::TriagePipeline,
    scheduler::{trigger_channel, LocalTaskPlatform, Scheduler, SchedulerSettings, Trigger},
    DISCLAIMER, VERSION,
};

#[cfg(feature = "server")]
use vitals_triage_agent::server::{self, ServerConfig, ServerState};

/// How often the running agent re-reads the config file and sample file.
const POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Parser)]
#[command(name = "vitals-triage")]
#[command(version = VERSION)]
#[command(about = "Periodic vitals triage with best-effort remote analysis", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the agent: timers, background refresh and source watching
    Start {
        /// JSON sample file to read (defaults to the configured source_path)
        #[arg(long)]
        source: Option<PathBuf>,

        /// Serve the message log over HTTP on this port (requires server feature)
        #[arg(long)]
        serve_port: Option<u16>,
    },

    /// Run one triage cycle now
    Refresh {
        /// Look back this many hours instead of the configured triage window
        #[arg(long)]
        hours: Option<u64>,

        /// Look back to local midnight instead of the configured triage window
        #[arg(long, conflicts_with = "hours")]
        today: bool,
    },

    /// Send a chat message to the analysis service
    Chat {
        /// Message text
        #[arg(required = true)]
        text: Vec<String>,
    },

    /// Show recent messages
    History {
        /// Number of messages to show
        #[arg(long, short, default_value = "20")]
        limit: usize,
    },

    /// Delete all messages
    Clear,

    /// Show current agent status
    Status,

    /// Enable background refresh
    EnableBackground,

    /// Disable background refresh
    DisableBackground,

    /// Show configuration
    Config,

    /// Display health disclaimer
    Disclaimer,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // The long-running agent logs its activity; one-shot commands only warn.
    init_tracing(if matches!(cli.command, Commands::Start { .. }) {
        "info"
    } else {
        "warn"
    });

    match cli.command {
        Commands::Start { source, serve_port } => {
            cmd_start(source, serve_port).await;
        }
        Commands::Refresh { hours, today } => {
            cmd_refresh(hours, today).await;
        }
        Commands::Chat { text } => {
            cmd_chat(&text.join(" ")).await;
        }
        Commands::History { limit } => {
            cmd_history(limit);
        }
        Commands::Clear => {
            cmd_clear();
        }
        Commands::Status => {
            cmd_status();
        }
        Commands::EnableBackground => {
            cmd_set_background(true);
        }
        Commands::DisableBackground => {
            cmd_set_background(false);
        }
        Commands::Config => {
            cmd_config();
        }
        Commands::Disclaimer => {
            cmd_disclaimer();
        }
    }
}

/// Install the tracing subscriber; `RUST_LOG` overrides `default`.
fn init_tracing(default: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn cmd_start(source: Option<PathBuf>, serve_port: Option<u16>) {
    println!("Vitals Triage Agent v{VERSION}");
    println!();

    let config = load_config();
    if let Err(e) = config.ensure_directories() {
        eprintln!("Warning: Could not create directories: {e}");
    }

    let source_path = source.unwrap_or_else(|| config.source_path.clone());
    let pipeline = match build_pipeline(&config, Arc::new(FileSource::new(&source_path))) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    println!("Starting agent...");
    println!("  Sample source: {source_path:?}");
    println!(
        "  Auto refresh: {}",
        if config.auto_refresh {
            format!("every {}s", config.refresh_interval.as_secs())
        } else {
            "disabled".to_string()
        }
    );
    println!(
        "  Background updates: {}",
        if config.background_updates {
            "enabled"
        } else {
            "disabled"
        }
    );
    println!(
        "  Analysis endpoint: {} ({})",
        pipeline.client().config().endpoint,
        config.endpoint_origin()
    );
    println!("  Device ID: {}", pipeline.client().device_id());
    println!("  Messages on record: {}", pipeline.log().len());

    let (trigger_tx, trigger_rx) = trigger_channel();
    let (settings_tx, settings_rx) = watch::channel(SchedulerSettings::from(&config));
    let platform = Arc::new(LocalTaskPlatform::new(
        trigger_tx.clone(),
        config.background_budget,
    ));
    let scheduler = Scheduler::new(Arc::clone(&pipeline), platform, settings_rx, trigger_rx);
    let stats = scheduler.stats();

    let shutdown = CancellationToken::new();
    ctrlc_handler(shutdown.clone());

    #[cfg(feature = "server")]
    let server_shutdown = match serve_port {
        Some(port) => {
            let state = ServerState::new(Arc::clone(&pipeline), trigger_tx.clone())
                .with_stats(Arc::clone(&stats));
            match server::run(ServerConfig::new(port), state).await {
                Ok((addr, tx)) => {
                    println!("  HTTP server: http://{addr}");
                    Some(tx)
                }
                Err(e) => {
                    eprintln!("Warning: Could not start HTTP server: {e}");
                    None
                }
            }
        }
        None => None,
    };

    #[cfg(not(feature = "server"))]
    if serve_port.is_some() {
        eprintln!("Warning: --serve-port ignored (server feature not enabled at compile time)");
    }

    println!();
    println!("Press Ctrl+C to stop");
    println!();

    tokio::spawn(print_new_messages(pipeline.log().subscribe()));
    tokio::spawn(watch_config(settings_tx, shutdown.clone()));
    tokio::spawn(watch_source(
        FileSource::new(&source_path),
        trigger_tx.clone(),
        shutdown.clone(),
    ));

    // Triage once on launch, then let the timers take over.
    if trigger_tx.send(Trigger::Manual).await.is_err() {
        eprintln!("Warning: Could not queue initial triage");
    }

    scheduler.run(shutdown).await;

    #[cfg(feature = "server")]
    if let Some(tx) = server_shutdown {
        let _ = tx.send(());
    }

    println!();
    println!("Stopping agent...");
    let snapshot = stats.snapshot();
    println!(
        "Cycles: {} started, {} completed, {} expired, {} failed, {} triggers dropped",
        snapshot.cycles_started,
        snapshot.cycles_completed,
        snapshot.cycles_expired,
        snapshot.cycles_failed,
        snapshot.triggers_dropped
    );
    println!();
    println!("{}", pipeline.log().summary());
}

async fn cmd_refresh(hours: Option<u64>, today: bool) {
    let config = load_config();
    let lookback = match (hours, today) {
        (_, true) => Lookback::Today,
        (Some(hours), false) => Lookback::hours(hours),
        (None, false) => config.lookback.triage,
    };

    let pipeline = match build_pipeline(&config, Arc::new(FileSource::new(&config.source_path))) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    println!("Running triage over {lookback}...");
    match pipeline.run_cycle(lookback, &CancellationToken::new()).await {
        Ok(report) => {
            println!();
            println!("{}", report.reply);
            println!();
            println!(
                "Samples: {} | Verdict: {:?} | Source: {:?}",
                report.sample_count, report.class, report.source
            );
        }
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}

async fn cmd_chat(text: &str) {
    let config = load_config();
    let pipeline = match build_pipeline(&config, Arc::new(FileSource::new(&config.source_path))) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    match pipeline.send_chat(text).await {
        Ok(reply) => println!("{}", reply.text),
        Err(e) => {
            eprintln!("Error recording chat: {e}");
            std::process::exit(1);
        }
    }
}

fn cmd_history(limit: usize) {
    let config = load_config();
    let log = open_log(&config);

    if log.is_empty() {
        println!("No messages yet.");
        println!("Run 'vitals-triage refresh' to record a triage.");
        return;
    }

    for message in log.tail(limit) {
        print_message(&message);
    }
}

fn cmd_clear() {
    let config = load_config();
    let log = open_log(&config);
    let count = log.len();

    if let Err(e) = log.clear() {
        eprintln!("Error clearing messages: {e}");
        std::process::exit(1);
    }
    println!("Deleted {count} message(s).");
}

fn cmd_status() {
    let config = load_config();

    println!("Vitals Triage Agent Status");
    println!("==========================");
    println!();

    let source = FileSource::new(&config.source_path);
    println!(
        "Sample source: {:?} ({})",
        source.path(),
        if source.modified().is_some() {
            "present"
        } else {
            "missing"
        }
    );
    println!();

    println!("Configuration:");
    println!(
        "  Auto refresh: {}",
        if config.auto_refresh {
            "enabled"
        } else {
            "disabled"
        }
    );
    println!("  Refresh interval: {}s", config.refresh_interval.as_secs());
    println!(
        "  Background updates: {}",
        if config.background_updates {
            "enabled"
        } else {
            "disabled"
        }
    );
    println!("  Background delay: {}s", config.background_delay.as_secs());
    println!(
        "  Lookbacks: foreground {}, background {}, triage {}",
        config.lookback.foreground, config.lookback.background, config.lookback.triage
    );
    println!(
        "  Analysis endpoint: {} ({})",
        config.analysis_config().endpoint,
        config.endpoint_origin()
    );
    println!();

    let log = open_log(&config);
    println!("{}", log.summary());
    if let Some(last) = log.last() {
        println!();
        println!("Last message:");
        print_message(&last);
    }
}

fn cmd_set_background(enabled: bool) {
    let mut config = load_config();
    config.background_updates = enabled;
    if let Err(e) = config.save() {
        eprintln!("Error saving config: {e}");
        std::process::exit(1);
    }
    if enabled {
        println!("Background updates enabled.");
    } else {
        println!("Background updates disabled. Use 'vitals-triage enable-background' to resume.");
    }
}

fn cmd_config() {
    let config = load_config();

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(&config).unwrap_or_else(|_| "Error".to_string())
    );
}

fn cmd_disclaimer() {
    println!("{DISCLAIMER}");
}

/// Load the config file, falling back to defaults with a warning.
fn load_config() -> Config {
    Config::load().unwrap_or_else(|e| {
        eprintln!("Warning: Could not load config, using defaults: {e}");
        Config::default()
    })
}

fn open_log(config: &Config) -> SharedMessageLog {
    create_shared_log(Arc::new(FileStore::new(&config.data_path)))
}

fn build_pipeline(
    config: &Config,
    source: Arc<dyn SampleSource>,
) -> Result<Arc<TriagePipeline>, String> {
    let timezone = config.tz().map_err(|e| e.to_string())?;
    let client = AnalysisClient::new(config.analysis_config()).map_err(|e| e.to_string())?;
    Ok(Arc::new(TriagePipeline::new(
        source,
        Arc::new(client),
        open_log(config),
        timezone,
    )))
}

fn print_message(message: &Message) {
    let who = match message.origin {
        Origin::User => "You",
        Origin::Ai => "Analysis",
        Origin::System => "Device",
    };
    let attachment = match &message.health_data {
        Some(store) => format!(" [{} samples]", store.sample_count()),
        None => String::new(),
    };
    println!(
        "[{}] {who}{attachment}:",
        message.timestamp.format("%Y-%m-%d %H:%M:%S")
    );
    println!("{}", message.content.trim_end());
    println!();
}

async fn print_new_messages(mut updates: broadcast::Receiver<Message>) {
    loop {
        match updates.recv().await {
            Ok(message) => print_message(&message),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                eprintln!("({skipped} message(s) not shown, see 'vitals-triage history')");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Re-read the config file so `enable-background` / `disable-background`
/// can control a running agent.
async fn watch_config(settings: watch::Sender<SchedulerSettings>, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let config = match Config::load() {
                    Ok(config) => config,
                    Err(e) => {
                        tracing::debug!("Ignoring unreadable config: {e}");
                        continue;
                    }
                };
                let next = SchedulerSettings::from(&config);
                settings.send_if_modified(|current| {
                    if *current == next {
                        false
                    } else {
                        *current = next;
                        true
                    }
                });
            }
        }
    }
}

/// Issue a `SourceUpdated` trigger whenever the sample file changes.
async fn watch_source(
    source: FileSource,
    triggers: mpsc::Sender<Trigger>,
    shutdown: CancellationToken,
) {
    let mut last_seen: Option<SystemTime> = source.modified();
    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let modified = source.modified();
                if modified.is_some() && modified != last_seen {
                    last_seen = modified;
                    tracing::debug!(path = ?source.path(), "Sample file changed");
                    if triggers.send(Trigger::SourceUpdated).await.is_err() {
                        break;
                    }
                }
            }
        }
    }
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(shutdown: CancellationToken) {
    if let Err(e) = ctrlc::set_handler(move || shutdown.cancel()) {
        eprintln!("Warning: Could not set Ctrl+C handler: {e}");
    }
}
