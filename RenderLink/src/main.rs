use std::thread;
use std::time::Duration;

use rdlcontrol::{BridgeEvent, DiscoveryManager, RendererBridge};
use rdlupnp::description::HttpDescriptionProvider;
use rdlupnp::ssdp::{SsdpListener, local_interface_for};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ========== PHASE 1 : the façade ==========

    let (bridge, actor) = RendererBridge::spawn().await;

    // Found/lost notifications; a bus binding would relay these to its
    // clients, the standalone daemon logs them.
    let events = bridge.events();
    thread::spawn(move || {
        while let Ok(event) = events.recv() {
            match event {
                BridgeEvent::RendererFound { path } => {
                    info!("📡 renderer published at {}", path)
                }
                BridgeEvent::RendererLost { path } => info!("renderer at {} lost", path),
            }
        }
    });

    // ========== PHASE 2 : discovery ==========

    let discovery_bridge = bridge.clone();
    thread::spawn(move || {
        let listener = match SsdpListener::open() {
            Ok(listener) => listener,
            Err(e) => {
                warn!("SSDP listener could not start: {}", e);
                return;
            }
        };

        // Ask renderers already on the network to answer right away.
        for _ in 0..3 {
            if let Err(e) = listener.search(rdlupnp::MEDIA_RENDERER_URN, 3) {
                warn!("failed to send M-SEARCH: {}", e);
            }
            thread::sleep(Duration::from_millis(200));
        }

        let provider = HttpDescriptionProvider::new(5);
        let mut discovery = DiscoveryManager::new(provider);

        loop {
            let Some(event) = listener.recv_event() else {
                continue;
            };
            let Some(iface_ip) = local_interface_for(event.origin.ip()) else {
                continue;
            };

            for update in discovery.handle_ssdp_event(event, &iface_ip.to_string()) {
                discovery_bridge.notify_discovery(update);
            }
        }
    });

    // ========== PHASE 3 : run ==========

    info!("✅ Renderlink is ready");
    info!("Press Ctrl+C to stop...");

    tokio::signal::ctrl_c().await?;

    bridge.shutdown();
    let _ = tokio::time::timeout(Duration::from_secs(2), actor).await;

    info!("✅ Renderlink stopped");
    Ok(())
}
