//! Call Recorder Application
//!
//! Connects to the call-control host, records calls according to the
//! configured policy and prints notifications as JSON lines on stdout.
//! Commands such as `record 12` or `deny 12` are read from stdin.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use call_recorder::{
    calls::CallRegistry,
    codec::BuiltinEncoders,
    config::RecorderConfig,
    network::{TcpAudioPorts, TcpControlLink},
    service::{self, Event, Notifier, UserCommand},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout carries only notifications
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!("Starting Call Recorder");

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = RecorderConfig::load(config_path.as_deref()).context("loading configuration")?;
    config.validate().context("validating configuration")?;

    tracing::info!(
        "Recording to {} as {} ({}), default policy {:?}",
        config.output.directory.display(),
        config.output.format.extension(),
        if config.output.stereo { "stereo" } else { "mono" },
        config.policy.default
    );

    let (events_tx, events_rx) = crossbeam_channel::unbounded();

    let control = TcpControlLink::connect(&config.control, events_tx.clone())
        .await
        .context("connecting to the call-control host")?;
    let ports = TcpAudioPorts::new(tokio::runtime::Handle::current(), events_tx.clone());

    let (notifier, notifications) = Notifier::channel();
    let registry = CallRegistry::new(
        Arc::new(config),
        Box::new(control),
        Box::new(ports),
        Box::new(BuiltinEncoders),
        notifier,
    );

    // Single owner of all call state
    let (done_tx, mut done_rx) = oneshot::channel();
    let event_thread = std::thread::Builder::new()
        .name("call-events".into())
        .spawn(move || {
            service::run(registry, events_rx);
            let _ = done_tx.send(());
        })
        .context("spawning event thread")?;

    let printer = std::thread::Builder::new()
        .name("notifications".into())
        .spawn(move || {
            for notification in notifications.iter() {
                match serde_json::to_string(&notification) {
                    Ok(line) => println!("{}", line),
                    Err(e) => tracing::error!("Cannot serialise notification: {}", e),
                }
            }
        })
        .context("spawning notification printer")?;

    // Blocking stdin reader outside the runtime; never joined
    let commands = events_tx.clone();
    std::thread::Builder::new()
        .name("user-commands".into())
        .spawn(move || service::read_commands(std::io::stdin().lock(), &commands))
        .context("spawning command reader")?;

    tracing::info!("Waiting for calls - press Ctrl+C to stop");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down...");
            let _ = events_tx.send(Event::Shutdown);
            let _ = (&mut done_rx).await;
        }
        _ = &mut done_rx => {
            tracing::info!("Event loop finished");
        }
    }

    if event_thread.join().is_err() {
        tracing::error!("Event thread panicked");
    }
    if printer.join().is_err() {
        tracing::error!("Notification printer panicked");
    }

    tracing::info!("Call Recorder stopped");
    Ok(())
}
