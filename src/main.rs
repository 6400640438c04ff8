//! cinderkv server entry point
//!
//! Bootstrap order matters: configuration, logging, AOF open + replay,
//! periodic timers, and only then the TCP listener, so a client can never
//! observe a partially replayed keyspace.

use cinderkv::aof::{Aof, FsyncPolicy};
use cinderkv::commands::Dispatcher;
use cinderkv::config::Config;
use cinderkv::connection::{handle_connection, ConnectionStats};
use cinderkv::timer::{TimerDriver, TimerQueue};

use anyhow::Context;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::FmtSubscriber;

/// Interval of the expired-key sampling sweep.
const SWEEP_INTERVAL: Duration = Duration::from_millis(100);

/// Interval of the AOF fsync timer under the `everysec` policy.
const AOF_FLUSH_INTERVAL: Duration = Duration::from_millis(1000);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Config file path is the first positional argument; absent means
    // defaults.
    let config = match std::env::args().nth(1) {
        Some(path) => {
            Config::load(&path).with_context(|| format!("loading config file '{}'", path))?
        }
        None => Config::default(),
    };

    FmtSubscriber::builder()
        .with_max_level(config.loglevel)
        .with_target(false)
        .init();

    info!(version = cinderkv::VERSION, "cinderkv starting");

    let aof = if config.aof_enabled {
        let aof = Aof::open(&config.aof_file, config.appendfsync)
            .with_context(|| format!("opening AOF file '{}'", config.aof_file))?;
        info!(path = %config.aof_file, policy = ?config.appendfsync, "AOF enabled");
        Some(aof)
    } else {
        None
    };

    let dispatcher = Arc::new(Dispatcher::new(aof));

    // Rebuild the keyspace before any client can connect
    if config.aof_enabled {
        let applied = dispatcher
            .replay_aof()
            .with_context(|| format!("replaying AOF file '{}'", config.aof_file))?;
        info!(applied, "AOF replay finished");
    }

    // All periodic work rides the shared timer queue
    let timers = Arc::new(Mutex::new(TimerQueue::new()));
    {
        let mut queue = timers.lock().unwrap();

        let sweep_target = Arc::clone(&dispatcher);
        queue.add_timer(
            SWEEP_INTERVAL,
            move || {
                sweep_target.sweep_expired();
            },
            Some(SWEEP_INTERVAL),
        );

        if dispatcher.aof_policy() == Some(FsyncPolicy::Everysec) {
            let flush_target = Arc::clone(&dispatcher);
            queue.add_timer(
                AOF_FLUSH_INTERVAL,
                move || flush_target.flush_aof(),
                Some(AOF_FLUSH_INTERVAL),
            );
        }
    }
    let _timer_driver = TimerDriver::start(Arc::clone(&timers));

    let stats = Arc::new(ConnectionStats::new());
    let addr = config.listen_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding listener on {}", addr))?;
    info!(%addr, "listening for connections");

    tokio::select! {
        _ = accept_loop(listener, Arc::clone(&dispatcher), stats) => {}
        _ = signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    // Push out any everysec-dirty AOF writes before exiting cleanly
    dispatcher.flush_aof();
    info!("server shutdown complete");
    Ok(())
}

/// Accepts connections forever, spawning one handler task per client.
async fn accept_loop(
    listener: TcpListener,
    dispatcher: Arc<Dispatcher>,
    stats: Arc<ConnectionStats>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                tokio::spawn(handle_connection(
                    stream,
                    addr,
                    Arc::clone(&dispatcher),
                    Arc::clone(&stats),
                ));
            }
            Err(e) => {
                error!(error = %e, "failed to accept connection");
            }
        }
    }
}
