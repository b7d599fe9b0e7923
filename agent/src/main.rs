use agent::auth::{PendingAuthQueue, Roster};
use agent::config::Config;
use agent::handlers::EventHandlers;
use agent::registry::MatchMode;
use clap::Parser;
use log::{info, warn};
use rcon::{CommandTransport, RconTransport, StatusCache};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::{mpsc, Mutex};

/// How often the log file is polled for new lines.
const LOG_POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Parser, Debug)]
#[command(name = "gamewarden", version, about = "Game server management agent")]
struct Args {
    /// Game server host
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Game server port
    #[arg(long, default_value_t = 28960)]
    port: u16,

    /// Remote console password
    #[arg(long)]
    password: String,

    /// Game log file to follow
    #[arg(long)]
    log_file: PathBuf,

    /// Identify clients by network address instead of guid
    #[arg(long)]
    match_by_address: bool,

    /// Total attempt budget for retryable commands
    #[arg(long, default_value_t = 3)]
    max_retries: u32,

    /// Per-attempt reply timeout in milliseconds
    #[arg(long, default_value_t = 500)]
    command_timeout_ms: u64,

    /// Status cache TTL in milliseconds
    #[arg(long, default_value_t = 2000)]
    status_ttl_ms: u64,

    /// Periodic reconciliation interval in seconds
    #[arg(long, default_value_t = 60)]
    sync_interval_secs: u64,
}

impl From<Args> for Config {
    fn from(args: Args) -> Self {
        Config {
            host: args.host,
            port: args.port,
            password: args.password,
            command_timeout: Duration::from_millis(args.command_timeout_ms),
            max_retries: args.max_retries,
            status_ttl: Duration::from_millis(args.status_ttl_ms),
            match_mode: if args.match_by_address {
                MatchMode::Address
            } else {
                MatchMode::Guid
            },
            log_path: args.log_file,
            sync_interval: Duration::from_secs(args.sync_interval_secs),
            ..Config::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let config: Config = Args::parse().into();

    let transport = RconTransport::connect(&config.address(), &config.password).await?;
    let transport: Arc<dyn CommandTransport> = Arc::new(transport);
    let status = Arc::new(StatusCache::new(
        transport,
        "status",
        config.status_ttl,
        config.max_retries,
        config.command_timeout,
    ));
    info!("remote console ready at {}", config.address());

    let roster = Arc::new(Mutex::new(Roster::new(config.match_mode)));
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let auth = PendingAuthQueue::new(
        Arc::clone(&roster),
        Arc::clone(&status),
        events_tx.clone(),
        config.auth.clone(),
    );
    let handlers = EventHandlers::new(roster, auth, status, events_tx);

    // Pick up whoever is already connected before the log starts moving.
    handlers.sync_clients().await;

    tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => println!("{}", json),
                Err(e) => warn!("dropping unserializable event: {}", e),
            }
        }
    });

    {
        let handlers = handlers.clone();
        let interval = config.sync_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                handlers.sync_clients().await;
            }
        });
    }

    info!("following {}", config.log_path.display());
    tokio::select! {
        result = follow_log(&config.log_path, &handlers) => result?,
        _ = tokio::signal::ctrl_c() => info!("interrupted, shutting down"),
    }
    Ok(())
}

/// Tails the game log from its current end, dispatching every complete line.
///
/// Survives rotation and truncation by rewinding to the start whenever the
/// file shrinks below the last read position.
async fn follow_log(path: &Path, handlers: &EventHandlers) -> std::io::Result<()> {
    let mut file = File::open(path).await?;
    let mut position = file.seek(SeekFrom::End(0)).await?;
    let mut carry = String::new();
    let mut chunk = vec![0u8; 16 * 1024];

    loop {
        tokio::time::sleep(LOG_POLL_INTERVAL).await;

        let len = file.metadata().await?.len();
        if len < position {
            info!("log file shrank, assuming rotation");
            position = file.seek(SeekFrom::Start(0)).await?;
            carry.clear();
        }
        if len == position {
            continue;
        }

        let read = file.read(&mut chunk).await?;
        if read == 0 {
            continue;
        }
        position += read as u64;
        carry.push_str(&String::from_utf8_lossy(&chunk[..read]));

        // Only dispatch complete lines; a partial tail stays in the carry
        // buffer until the rest of it is written.
        while let Some(newline) = carry.find('\n') {
            let line: String = carry.drain(..=newline).collect();
            handlers.dispatch_line(line.trim_end()).await;
        }
    }
}
