//! Chainchat ingest - main entry point
//!
//! Polls the ledger for chat events, stores them and fans new messages out.
//! Exit status: 0 after a clean shutdown, 2 for configuration problems, 1 for
//! any other startup failure.

use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use chainchat_core::{
    config::{Config, ConfigLoadError},
    cursor,
    db::Database,
    fanout::{PgChangeFeed, RealtimeFanout},
    generator::SyntheticLoadGenerator,
    poller::EventPoller,
    shutdown,
    sink::{MessageSink, NotifyingSink, PgMessageSink},
    source::JsonRpcEventSource,
    telemetry,
};

const SERVICE_NAME: &str = "chainchat-ingest";

#[derive(Parser)]
#[command(name = "chainchat-ingest", version, about = "Ledger chat ingestion service")]
struct Args {
    /// Configuration file (any format the config crate understands)
    #[arg(short, long, env = "CHAINCHAT_CONFIG")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load environment variables
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let config = match Config::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(ConfigLoadError::Invalid(issues)) => {
            eprintln!("Invalid configuration:");
            for issue in &issues {
                eprintln!("  {}", issue);
            }
            return ExitCode::from(2);
        }
        Err(ConfigLoadError::Load(e)) => {
            eprintln!("Failed to load configuration: {}", e);
            return ExitCode::from(2);
        }
    };

    if let Err(e) = telemetry::init(SERVICE_NAME, &config.observability) {
        eprintln!("Failed to initialize telemetry: {}", e);
        return ExitCode::from(1);
    }

    let code = match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Startup failed");
            ExitCode::from(1)
        }
    };

    telemetry::shutdown();
    code
}

async fn run(config: Config) -> anyhow::Result<()> {
    if let Some(addr) = &config.observability.metrics_addr {
        telemetry::install_metrics_exporter(addr)?;
    }

    info!(version = env!("CARGO_PKG_VERSION"), "Starting chainchat ingest");

    // Storage
    let db = Database::connect(&config.database).await?;
    db.migrate().await?;
    info!("Connected to database, migrations applied");

    let cursor_store = cursor::open_store(&config, db.pool()).await?;
    info!(backend = cursor_store.name(), "Cursor store ready");

    // Fanout: change stream when available, otherwise straight from inserts
    let shutdown = CancellationToken::new();
    let fanout = Arc::new(RealtimeFanout::new());
    let store_sink: Arc<dyn MessageSink> = Arc::new(PgMessageSink::new(db.pool().clone()));

    let mut feed_task = None;
    let sink: Arc<dyn MessageSink> = if config.fanout.change_feed {
        match PgChangeFeed::connect(db.pool(), config.fanout.channel.clone(), fanout.clone()).await {
            Ok(feed) => {
                feed_task = Some(tokio::spawn(feed.run(shutdown.clone())));
                store_sink
            }
            Err(e) => {
                e.log();
                warn!("Change feed unavailable, notifying subscribers from inserts");
                Arc::new(NotifyingSink::new(store_sink, fanout.clone()))
            }
        }
    } else {
        Arc::new(NotifyingSink::new(store_sink, fanout.clone()))
    };

    let log_subscription = fanout.subscribe(|message| {
        info!(
            key = %message.key(),
            sender = %message.sender_address,
            "New chat message"
        );
    });

    // Producers
    let source = Arc::new(JsonRpcEventSource::new(config.source.clone())?);
    let mut poller = EventPoller::new(source, sink.clone(), cursor_store, config.poller.clone());
    poller.load_cursor().await?;

    let generator = if config.generator.enabled {
        Some(SyntheticLoadGenerator::new(sink.clone(), &config.generator)?)
    } else {
        None
    };

    let signal_task = shutdown::cancel_on_signal(shutdown.clone());
    let poller_stats = poller.stats();
    let poller_task = tokio::spawn(poller.run(shutdown.clone()));
    let generator_task = generator.map(|generator| tokio::spawn(generator.run(shutdown.clone())));

    // Both loops return only after the token is cancelled and their
    // in-flight tick has finished.
    if let Err(e) = poller_task.await? {
        e.log();
    }
    if let Some(task) = generator_task {
        task.await?;
    }

    fanout.unsubscribe(log_subscription);
    shutdown.cancel();
    if let Some(task) = feed_task {
        task.await?;
    }
    signal_task.await?;

    info!(
        ticks = poller_stats.ticks(),
        inserted = poller_stats.inserted(),
        insert_failures = poller_stats.insert_failures(),
        fanout = ?fanout.stats(),
        "Shutdown complete"
    );
    Ok(())
}
