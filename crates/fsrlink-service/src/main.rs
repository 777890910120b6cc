//! fsrlink - keep an FSR sensor connected and relay its readings.
//!
//! Run with: `cargo run -p fsrlink-service -- run --device <ID>`

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use fsrlink_core::{BleRadio, EventReceiver, LinkEvent};
use fsrlink_service::{
    Config, ConfigHandle, DeliveryQueue, HttpUplink, SessionCommand, SessionController,
};
use fsrlink_store::PendingStore;
use fsrlink_types::DeviceId;

const DEFAULT_LOG_FILTER: &str =
    "fsrlink=info,fsrlink_core=info,fsrlink_service=info,fsrlink_store=info";

/// fsrlink - stream FSR sensor readings to a collection endpoint.
#[derive(Parser, Debug)]
#[command(name = "fsrlink")]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Pending store path (overrides config).
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect and stream until Ctrl-C (default behavior).
    Run {
        /// Device to use; saved for later runs.
        #[arg(long)]
        device: Option<String>,
    },

    /// Manage the saved device.
    Device {
        #[command(subcommand)]
        action: DeviceAction,
    },

    /// Inspect or deliver undelivered readings.
    Pending {
        #[command(subcommand)]
        action: PendingAction,
    },
}

#[derive(Subcommand, Debug)]
enum DeviceAction {
    /// Save a device identifier (MAC address, CoreBluetooth UUID or name).
    Set { id: String },
    /// Show the saved device and subscription target.
    Show,
}

#[derive(Subcommand, Debug)]
enum PendingAction {
    /// Count undelivered readings per sensor.
    List,
    /// Try to deliver every pending reading now.
    Flush,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let config = Arc::new(match &args.config {
        Some(path) => ConfigHandle::open(path)?,
        None => ConfigHandle::open_default()?,
    });

    match args.command.unwrap_or(Command::Run { device: None }) {
        Command::Run { device } => run(config, args.database, device).await,
        Command::Device { action } => handle_device_action(&config, action),
        Command::Pending { action } => handle_pending_action(config, args.database, action).await,
    }
}

fn open_store(config: &Config, database: Option<PathBuf>) -> anyhow::Result<Arc<PendingStore>> {
    let path = database.unwrap_or_else(|| config.storage.path.clone());
    Ok(Arc::new(PendingStore::open(path)?))
}

fn delivery_queue(
    config: &Arc<ConfigHandle>,
    database: Option<PathBuf>,
) -> anyhow::Result<DeliveryQueue> {
    let snapshot = config.snapshot();
    let store = open_store(&snapshot, database)?;
    let uplink = Arc::new(HttpUplink::from_config(&snapshot.uplink)?);
    Ok(DeliveryQueue::new(uplink, store, Arc::clone(config)))
}

async fn run(
    config: Arc<ConfigHandle>,
    database: Option<PathBuf>,
    device: Option<String>,
) -> anyhow::Result<()> {
    let snapshot = config.snapshot();
    snapshot.validate()?;
    let device = device.map(DeviceId::new).transpose()?;

    let queue = delivery_queue(&config, database)?;
    if snapshot.uplink.credential().is_none() {
        warn!("No uplink token configured; readings will be kept in the pending store");
    }

    let radio = Arc::new(BleRadio::new(snapshot.link.scan_timeout()));
    let session = SessionController::new(Arc::clone(&config), radio, Arc::new(queue.clone()));

    let cancel = CancellationToken::new();
    let replay = snapshot
        .delivery
        .replay_interval()
        .map(|every| queue.spawn_replay_loop(every, cancel.clone()));
    let events = tokio::spawn(log_events(session.subscribe(), cancel.clone()));

    let command = match device {
        Some(device) => SessionCommand::Start {
            device: Some(device),
        },
        None => SessionCommand::TakeOver,
    };
    if let Err(e) = session.handle(command).await {
        cancel.cancel();
        return Err(e.into());
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    session.stop().await;
    cancel.cancel();
    if let Some(replay) = replay {
        replay.await?;
    }
    events.await?;

    debug!(in_flight = queue.in_flight(), "Waiting for deliveries");
    queue.settle().await;

    let pending = queue.store().total()?;
    if pending > 0 {
        info!(pending, "Undelivered readings kept for the next run");
    }

    Ok(())
}

async fn log_events(mut events: EventReceiver, cancel: CancellationToken) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => event,
        };

        match event {
            Ok(LinkEvent::ReadingParsed { reading }) => {
                info!(sensor = %reading.sensor_name, value = reading.value, "Reading");
            }
            Ok(LinkEvent::ReconnectScheduled {
                device,
                attempt,
                delay_ms,
            }) => {
                info!(%device, attempt, delay_ms, "Reconnect scheduled");
            }
            Ok(event) => debug!(?event, "Link event"),
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event log fell behind"),
            Err(RecvError::Closed) => break,
        }
    }
}

fn handle_device_action(config: &ConfigHandle, action: DeviceAction) -> anyhow::Result<()> {
    match action {
        DeviceAction::Set { id } => {
            let device = DeviceId::new(id)?;
            config.update(|c| c.link.device = Some(device.as_str().to_string()))?;
            println!("Saved device {} to {}", device, config.path().display());
        }
        DeviceAction::Show => {
            let link = config.read(|c| c.link.clone());
            match link.device() {
                Ok(Some(device)) => println!("Device: {}", device),
                Ok(None) => println!("Device: (not set)"),
                Err(e) => println!("Device: invalid ({})", e),
            }
            match link.target() {
                Ok(target) => println!("Target: {}", target),
                Err(e) => println!("Target: invalid ({})", e),
            }
        }
    }
    Ok(())
}

async fn handle_pending_action(
    config: Arc<ConfigHandle>,
    database: Option<PathBuf>,
    action: PendingAction,
) -> anyhow::Result<()> {
    match action {
        PendingAction::List => {
            let store = open_store(&config.snapshot(), database)?;
            let counts = store.pending_counts()?;
            if counts.is_empty() {
                println!("No pending readings");
                return Ok(());
            }
            for (sensor, count) in &counts {
                println!("{:<8} {:>6}", sensor, count);
            }
            println!("{:<8} {:>6}", "total", counts.iter().map(|(_, c)| c).sum::<usize>());
        }
        PendingAction::Flush => {
            let queue = delivery_queue(&config, database)?;
            if config.read(|c| c.uplink.credential().is_none()) {
                println!("No uplink token configured; nothing sent");
                return Ok(());
            }
            let report = queue.replay_pending().await?;
            println!("Replay: {}", report);
        }
    }
    Ok(())
}
