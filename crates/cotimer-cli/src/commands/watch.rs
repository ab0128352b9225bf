use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::Args;
use cotimer_core::{BroadcastPublisher, Config, TimerSessionEngine, TimerUpdate};
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{debug, info, warn};

use super::{engine_error, open_engine, CliResult};

#[derive(Args)]
pub struct WatchArgs {
    /// Seconds between refresh sweeps
    #[arg(long, default_value = "1")]
    interval_secs: u64,
    /// Stop after this many sweeps
    #[arg(long)]
    ticks: Option<u64>,
}

pub fn run(args: WatchArgs) -> CliResult {
    let config = Config::load()?;
    let publisher = Arc::new(BroadcastPublisher::default());
    let engine = Arc::new(open_engine(&config)?.with_publisher(publisher.clone()));

    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    runtime.block_on(watch(engine, &publisher, args))
}

async fn watch(engine: Arc<TimerSessionEngine>, publisher: &BroadcastPublisher, args: WatchArgs) -> CliResult {
    let mut updates = publisher.subscribe();
    let mut interval = tokio::time::interval(Duration::from_secs(args.interval_secs.max(1)));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(interval_secs = args.interval_secs, "watching timers");
    let mut sweeps = 0u64;
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let sweeper = Arc::clone(&engine);
                let changed = tokio::task::spawn_blocking(move || sweeper.refresh_all(Utc::now()))
                    .await?
                    .map_err(engine_error)?;
                debug!(changed = changed.len(), "sweep finished");
                drain(&mut updates)?;

                sweeps += 1;
                if args.ticks.is_some_and(|limit| sweeps >= limit) {
                    break;
                }
            }
            _ = &mut shutdown => {
                info!("interrupted");
                break;
            }
        }
    }
    Ok(())
}

/// Print every update published so far as one JSON line each.
fn drain(updates: &mut broadcast::Receiver<TimerUpdate>) -> CliResult {
    loop {
        match updates.try_recv() {
            Ok(update) => println!("{}", serde_json::to_string(&update)?),
            Err(TryRecvError::Empty | TryRecvError::Closed) => return Ok(()),
            Err(TryRecvError::Lagged(skipped)) => warn!(skipped, "watcher fell behind"),
        }
    }
}
