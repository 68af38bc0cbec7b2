mod cli;
mod config;
mod tcp_transport;

use std::io::BufRead;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use bridge_events::{BridgeEvent, BridgeEventType, EventSink, EventSource};
use socket_bridge::{AuthRequest, ProxyBridge, ProxyResult};

use crate::cli::Cli;
use crate::tcp_transport::TcpTransport;

/// How long shutdown waits for live sessions to release their resources.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Parse CLI args.
    let cli = Cli::parse();

    // 2. Load config, then merge CLI overrides.
    let mut cfg = config::load(&cli.config)?;

    cfg.targets.extend(cli.targets.iter().cloned());
    if let Some(ref events) = cli.events {
        cfg.logging.events_path = events.clone();
    }
    if let Some(secs) = cli.listen_timeout_secs {
        cfg.bridge.listen_timeout = (secs > 0).then(|| Duration::from_secs(secs));
    }

    // 3. Init tracing-subscriber with JSON format. Stdout carries proxy
    //    results, so logs go to stderr.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.logging.level));

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .init();

    if cfg.targets.is_empty() {
        anyhow::bail!("no targets configured; pass --target or list them in the config file");
    }

    info!(
        config_file = %cli.config.display(),
        events = %cfg.logging.events_path.display(),
        targets = cfg.targets.len(),
        listen_timeout = ?cfg.bridge.listen_timeout,
        "loopback-bridge starting"
    );

    // 4. Start the event log.
    let (events, events_handle) = EventSink::start(&cfg.logging.events_path)
        .await
        .context("failed to start event log")?;

    events
        .emit(BridgeEvent::new(
            BridgeEventType::ProcessStarted,
            EventSource::new("loopback-bridge"),
            serde_json::json!({
                "version": env!("CARGO_PKG_VERSION"),
                "config_file": cli.config.display().to_string(),
            }),
        ))
        .await;

    // 5. Build the bridge on top of the plain TCP transport.
    let transport = Arc::new(TcpTransport::new(Duration::from_secs(
        cfg.upstream.connect_timeout_secs,
    )));
    let bridge = ProxyBridge::new(cfg.bridge, transport, events.clone())
        .context("invalid bridge configuration")?;

    // 6. Open every target; each result is one JSON line on stdout.
    for target in cfg.targets {
        let bridge = bridge.clone();
        tokio::spawn(async move {
            let outcome = bridge.open(&target).await;
            if let Err(ref err) = outcome {
                warn!(%target, %err, "proxy could not be opened");
            }
            match serde_json::to_string(&ProxyResult::from(&outcome)) {
                Ok(line) => println!("{line}"),
                Err(err) => error!(%target, %err, "failed to serialize proxy result"),
            }
        });
    }

    // 7. Authentication responses arrive as JSON lines on stdin.
    let auth_reader = tokio::spawn(read_auth_requests(bridge.clone()));

    // 8. Run until ctrl-c or SIGTERM.
    wait_for_shutdown_signal().await;

    // 9. Tear everything down.
    bridge.shutdown();
    auth_reader.abort();

    let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
        while bridge.active_sessions() > 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    if drained.is_err() {
        warn!(
            remaining = bridge.active_sessions(),
            "sessions still registered after drain timeout"
        );
    }

    info!("loopback-bridge shutting down");

    events
        .emit(BridgeEvent::new(
            BridgeEventType::ProcessStopped,
            EventSource::new("loopback-bridge"),
            serde_json::json!({}),
        ))
        .await;

    // The writer task exits, after a final flush, once every sink clone is
    // gone.
    drop(bridge);
    drop(events);
    if tokio::time::timeout(DRAIN_TIMEOUT, events_handle).await.is_err() {
        warn!("event log writer did not finish in time");
    }

    Ok(())
}

/// Route `AuthRequest` JSON lines from stdin to their sessions until stdin
/// closes.
///
/// Stdin is read on a detached OS thread so a pending read never holds up
/// runtime shutdown.
async fn read_auth_requests(bridge: ProxyBridge) {
    let (tx, mut lines) = mpsc::channel::<String>(16);

    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if tx.blocking_send(line).is_err() {
                        return;
                    }
                }
                Err(err) => {
                    warn!(%err, "failed to read authentication responses from stdin");
                    return;
                }
            }
        }
    });

    while let Some(line) = lines.recv().await {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<AuthRequest>(&line) {
            Ok(request) => {
                let routed = bridge.authenticate_request(&request);
                debug!(url = %request.url, routed, "authentication response received");
            }
            Err(err) => warn!(%err, "ignoring malformed authentication request"),
        }
    }

    debug!("stdin closed; no more authentication responses");
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("received SIGINT (ctrl-c)"),
                    _ = sigterm.recv() => info!("received SIGTERM"),
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler; waiting for ctrl-c only");
                ctrl_c.await.ok();
                info!("received SIGINT (ctrl-c)");
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("received SIGINT (ctrl-c)");
    }
}
