use anyhow::{Context, Result};
use deadswitch::prelude::*;
use deadswitch::remote::{HttpSwitchApi, LocalOnlyApi, SwitchApi};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    // 2. Load the configuration. An explicit path must exist; the default one may not.
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = SwitchConfig::load(config_path.as_deref())?;
    info!("{} v{}", deadswitch::ENGINE_NAME, deadswitch::VERSION);

    // 3. Open the store and resolve the device identity.
    let data_dir = config.storage.data_dir.clone();
    let mut store = StateStore::new(
        FileStore::open(&data_dir)
            .with_context(|| format!("cannot open data directory {}", data_dir.display()))?,
    );
    let udid = store.device_udid();
    info!("Device identity {}.", udid);

    // 4. Pick the remote: the switch service if configured, else local-only.
    let api: Arc<dyn SwitchApi> = match &config.cloud.base_url {
        Some(base_url) => {
            info!("Mirroring the deadline to {}.", base_url);
            Arc::new(
                HttpSwitchApi::new(base_url.clone(), udid, config.request_timeout())
                    .context("cannot build the switch service client")?,
            )
        }
        None => {
            warn!("No cloud.base_url configured; running local-only.");
            Arc::new(LocalOnlyApi)
        }
    };

    // 5. Create the engine.
    let engine = SwitchEngine::builder(config, store).api(api).build();

    // 6. Log what happens.
    spawn_event_listeners(&engine);

    // 7. Run the engine.
    engine.run().await?;

    Ok(())
}

/// Spawns tasks that write the engine's event streams to the log.
fn spawn_event_listeners(engine: &SwitchEngine) {
    let mut system_rx = engine.subscribe_system_events();
    tokio::spawn(async move {
        while let Ok(event) = system_rx.recv().await {
            info!("[SYSTEM] => {:?}", event);
        }
    });

    let mut switch_rx = engine.subscribe_switch_events();
    tokio::spawn(async move {
        while let Ok(event) = switch_rx.recv().await {
            match event {
                SwitchEvent::PhaseChanged { from, to, .. } => {
                    info!("[PHASE] => {} -> {}", from, to)
                }
                SwitchEvent::CheckedIn { source, at } => {
                    info!("[CHECK-IN] => {} at {}", source, at)
                }
                SwitchEvent::EscalationRequested { stage } => {
                    warn!("[ESCALATION] => {} stage handed to the switch service", stage)
                }
                other => info!("[SWITCH] => {:?}", other),
            }
        }
    });
}
