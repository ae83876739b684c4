use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hamconf::{HamConfig, NotifyConfig};
use hamstore::{FallbackLog, RetryPolicy, ScratchDb, SessionDb};
use hamtrack::{
    telemetry, ChannelEdgeSource, Clock, DispatchConfig, Dispatcher, HttpNotifier, LogNotifier,
    NotificationPort, RunLoop, RunLoopConfig, SysfsEdgeSource,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How long queued notifications and saves may take to finish on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Hamtrack - wheel revolution tracker
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Config file, replacing ./hamtrack.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Watch the wheel sensor until interrupted (default)
    Run,

    /// Feed synthetic revolutions through the tracker, no hardware needed
    Simulate {
        /// Number of pulses to send
        #[arg(short, long, default_value = "20")]
        revolutions: u32,

        /// Milliseconds between pulses
        #[arg(short, long, default_value = "500")]
        interval_ms: u64,

        /// Session timeout in seconds, instead of the configured one
        #[arg(long)]
        timeout_s: Option<u64>,

        /// Store and notify for real instead of a scratch database and the log
        #[arg(long)]
        live: bool,
    },

    /// List recorded sessions, newest first
    Sessions {
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Import sessions from the fallback log into the database
    ImportFallback,

    /// Print the effective configuration and where it came from
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, sources) = HamConfig::load_with_sources_from(cli.config.as_deref())
        .context("Failed to load configuration")?;

    let command = cli.command.unwrap_or(Commands::Run);
    if let Commands::Config = command {
        for file in &sources.files {
            println!("# loaded: {}", file.display());
        }
        for var in &sources.env_overrides {
            println!("# env: {}", var);
        }
        print!("{}", config.to_toml());
        return Ok(());
    }

    config.validate().context("Invalid configuration")?;
    telemetry::init(&config.telemetry).context("Failed to initialize logging")?;

    let result = match command {
        Commands::Run => run(&config).await,
        Commands::Simulate {
            revolutions,
            interval_ms,
            timeout_s,
            live,
        } => simulate(&config, revolutions, interval_ms, timeout_s, live).await,
        Commands::Sessions { limit } => list_sessions(&config, limit),
        Commands::ImportFallback => import_fallback(&config),
        Commands::Config => Ok(()),
    };

    telemetry::shutdown();
    result
}

fn dispatch_config(config: &HamConfig) -> DispatchConfig {
    DispatchConfig {
        notify_queue: config.notify.queue_depth,
        persist_queue: config.storage.queue_depth,
        retry: RetryPolicy::new(config.storage.max_attempts, config.storage.retry_delay()),
    }
}

fn build_notifier(config: &NotifyConfig) -> Result<Arc<dyn NotificationPort>> {
    match &config.endpoint {
        Some(endpoint) => {
            let notifier = HttpNotifier::new(
                endpoint.clone(),
                config.topic.clone(),
                config.api_key.clone(),
                config.timeout(),
            )
            .context("Failed to create HTTP notifier")?;
            info!("Pushing notifications to {} (topic {})", endpoint, config.topic);
            Ok(Arc::new(notifier))
        }
        None => {
            info!("No notify endpoint configured, notifications go to the log");
            Ok(Arc::new(LogNotifier))
        }
    }
}

fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT, shutting down...");
            }
            _ = async {
                #[cfg(unix)]
                {
                    use tokio::signal::unix::{signal, SignalKind};
                    match signal(SignalKind::terminate()) {
                        Ok(mut sigterm) => {
                            sigterm.recv().await;
                        }
                        Err(e) => {
                            warn!("Cannot listen for SIGTERM: {}", e);
                            std::future::pending::<()>().await;
                        }
                    }
                }
                #[cfg(not(unix))]
                {
                    std::future::pending::<()>().await;
                }
            } => {
                info!("Received SIGTERM, shutting down...");
            }
        }
        cancel.cancel();
    });
}

async fn run(config: &HamConfig) -> Result<()> {
    info!("Hamtrack starting");
    info!("   GPIO pin: {}", config.sensor.gpio_pin);
    info!("   Circumference: {} cm", config.wheel.circumference_cm);
    info!("   Database: {}", config.storage.db_path.display());

    let store = SessionDb::open(&config.storage.db_path).with_context(|| {
        format!("Failed to open session database {}", config.storage.db_path.display())
    })?;
    let fallback = FallbackLog::new(&config.storage.fallback_path);
    let notifier = build_notifier(&config.notify)?;

    let (dispatcher, workers) =
        Dispatcher::spawn(notifier, Arc::new(store), fallback, dispatch_config(config));

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let sensor = config.sensor.clone();
    let run_config = RunLoopConfig::from_config(config);
    let loop_cancel = cancel.clone();
    let result = tokio::task::spawn_blocking(move || {
        let clock = Clock::new();
        let source = SysfsEdgeSource::open(&sensor.sysfs_root, sensor.gpio_pin, clock)?;
        RunLoop::new(source, dispatcher, clock, run_config).run(&loop_cancel)
    })
    .await
    .context("Run loop thread panicked")?;

    if !workers.shutdown(SHUTDOWN_GRACE).await {
        warn!(
            "Unsaved sessions were written to the fallback log {}",
            config.storage.fallback_path.display()
        );
    }

    let summary = result.context("Wheel sensor failed")?;
    info!(
        "Shutdown complete: {} sessions finished, {} revolutions",
        summary.sessions_finished, summary.revolutions
    );
    Ok(())
}

async fn simulate(
    config: &HamConfig,
    revolutions: u32,
    interval_ms: u64,
    timeout_s: Option<u64>,
    live: bool,
) -> Result<()> {
    let mut run_config = RunLoopConfig::from_config(config);
    if let Some(secs) = timeout_s {
        run_config.session_timeout = Duration::from_secs(secs.max(1));
    }
    let interval = Duration::from_millis(interval_ms);

    // Removed on drop, along with the simulated fallback log.
    let scratch = if live {
        None
    } else {
        Some(ScratchDb::new().context("Failed to create scratch database")?)
    };
    let (dispatcher, workers) = if let Some(scratch) = &scratch {
        Dispatcher::spawn(
            Arc::new(LogNotifier),
            Arc::new(scratch.db().clone()),
            FallbackLog::new(scratch.dir().join("fallback.log")),
            dispatch_config(config),
        )
    } else {
        let store = SessionDb::open(&config.storage.db_path).with_context(|| {
            format!("Failed to open session database {}", config.storage.db_path.display())
        })?;
        Dispatcher::spawn(
            build_notifier(&config.notify)?,
            Arc::new(store),
            FallbackLog::new(&config.storage.fallback_path),
            dispatch_config(config),
        )
    };

    info!(
        "Simulating {} revolutions every {:?}, session timeout {:?}",
        revolutions, interval, run_config.session_timeout
    );

    let (tx, rx) = std::sync::mpsc::channel();
    // Held until the loop returns so it never sees a disconnected source.
    let keepalive = tx.clone();
    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let producer_cancel = cancel.clone();
    let settle = run_config.session_timeout + run_config.poll_slice * 2;
    let producer = std::thread::spawn(move || {
        for _ in 0..revolutions {
            if producer_cancel.is_cancelled() || tx.send(()).is_err() {
                return;
            }
            std::thread::sleep(interval);
        }
        std::thread::sleep(settle);
        producer_cancel.cancel();
    });

    let loop_cancel = cancel.clone();
    let result = tokio::task::spawn_blocking(move || {
        let clock = Clock::new();
        RunLoop::new(ChannelEdgeSource::new(rx, clock), dispatcher, clock, run_config)
            .run(&loop_cancel)
    })
    .await
    .context("Run loop thread panicked")?;

    cancel.cancel();
    drop(keepalive);
    let _ = producer.join();
    workers.shutdown(SHUTDOWN_GRACE).await;

    let summary = result.context("Simulated sensor failed")?;
    println!(
        "{} revolutions ({} bounced), {} started, {} finished, {} aborted",
        summary.revolutions,
        summary.bounces,
        summary.sessions_started,
        summary.sessions_finished,
        summary.sessions_aborted
    );
    drop(scratch);
    Ok(())
}

fn list_sessions(config: &HamConfig, limit: usize) -> Result<()> {
    let db = SessionDb::open(&config.storage.db_path).with_context(|| {
        format!("Failed to open session database {}", config.storage.db_path.display())
    })?;
    let sessions = db.list_recent(limit).context("Failed to list sessions")?;

    if sessions.is_empty() {
        println!("No sessions recorded");
        return Ok(());
    }

    println!("{:<26} {:>10} {:>12}", "START", "MINUTES", "METRES");
    for stored in sessions {
        let record = &stored.record;
        println!(
            "{:<26} {:>10.1} {:>12.1}",
            record.start_key(),
            record.duration / 60.0,
            record.distance / 100.0
        );
    }
    println!("({} total)", db.count().context("Failed to count sessions")?);
    Ok(())
}

fn import_fallback(config: &HamConfig) -> Result<()> {
    let db = SessionDb::open(&config.storage.db_path).with_context(|| {
        format!("Failed to open session database {}", config.storage.db_path.display())
    })?;
    let log = FallbackLog::new(&config.storage.fallback_path);

    let report = log.replay_into(&db).with_context(|| {
        format!("Failed to import fallback log {}", log.path().display())
    })?;
    println!(
        "Imported {} sessions, {} already stored",
        report.imported, report.duplicates
    );

    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    if let Some(archived) = log
        .archive(&format!("imported-{stamp}"))
        .context("Failed to archive fallback log")?
    {
        println!("Fallback log moved to {}", archived.display());
    }
    Ok(())
}
