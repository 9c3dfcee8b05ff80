use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod store;

use dbus_interface::{ScanService, BUS_NAME, OBJECT_PATH};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("skinscand starting");

    let config = config::Config::load().context("failed to load config")?;
    let store = store::SessionStore::open(&config.session_dir)
        .context("failed to open session store")?;
    tracing::info!(dir = %store.dir().display(), "session store ready");

    let (results_tx, mut results_rx) = mpsc::unbounded_channel();
    let (engine, engine_thread) = engine::spawn_engine(&config, store.clone(), results_tx)?;

    let service = ScanService::new(engine.clone(), store);
    let connection = zbus::connection::Builder::session()?
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .context("failed to register on the session bus")?;

    let iface = connection
        .object_server()
        .interface::<_, ScanService>(OBJECT_PATH)
        .await?;
    tokio::spawn(async move {
        while let Some(record) = results_rx.recv().await {
            if let Err(e) = ScanService::result_ready(iface.signal_emitter(), record.score).await {
                tracing::warn!(error = %e, "failed to emit ResultReady");
            }
        }
    });

    tracing::info!(bus = BUS_NAME, "skinscand ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("skinscand shutting down");

    engine.shutdown();
    let joined = tokio::task::spawn_blocking(move || engine_thread.join()).await?;
    if joined.is_err() {
        tracing::warn!("engine thread panicked");
    }

    Ok(())
}
