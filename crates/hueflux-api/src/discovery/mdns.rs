//! mDNS/Bonjour discovery of bridges advertising `_hue._tcp`.

use std::time::{Duration, Instant};

use mdns_sd::{ServiceDaemon, ServiceEvent};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::models::{DiscoveredBridge, normalize_bridge_id};

/// mDNS service type advertised by bridges.
const SERVICE_TYPE: &str = "_hue._tcp.local.";

/// How often the browse loop wakes up to check for cancellation.
const RECV_SLICE: Duration = Duration::from_millis(100);

/// Browse the local network until `timeout` elapses or `cancel` fires.
///
/// The mDNS receiver is synchronous, so the browse loop runs on the
/// blocking pool and wakes every [`RECV_SLICE`] to observe cancellation.
pub async fn discover(
    timeout: Duration,
    cancel: CancellationToken,
) -> Result<Vec<DiscoveredBridge>, Error> {
    tokio::task::spawn_blocking(move || browse(timeout, &cancel))
        .await
        .map_err(|e| Error::Mdns(format!("browse task failed: {e}")))?
}

fn browse(timeout: Duration, cancel: &CancellationToken) -> Result<Vec<DiscoveredBridge>, Error> {
    let mdns = ServiceDaemon::new().map_err(|e| Error::Mdns(e.to_string()))?;
    let receiver = mdns
        .browse(SERVICE_TYPE)
        .map_err(|e| Error::Mdns(e.to_string()))?;

    info!("Starting mDNS discovery for {}", SERVICE_TYPE);
    let deadline = Instant::now() + timeout;
    let mut found: Vec<DiscoveredBridge> = Vec::new();

    while !cancel.is_cancelled() {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        let slice = RECV_SLICE.min(deadline - now);
        match receiver.recv_timeout(slice) {
            Ok(ServiceEvent::ServiceResolved(info)) => {
                debug!("mDNS resolved: {}", info.get_fullname());
                let id = info
                    .get_properties()
                    .get("bridgeid")
                    .and_then(|p| p.val())
                    .map(|val| normalize_bridge_id(&String::from_utf8_lossy(val)));
                let port = info.get_port();
                for addr in info.get_addresses() {
                    let bridge = DiscoveredBridge {
                        id: id.clone(),
                        address: addr.to_string(),
                        port: Some(port),
                    };
                    if !found.contains(&bridge) {
                        found.push(bridge);
                    }
                }
            }
            Ok(ServiceEvent::SearchStopped(_)) => break,
            Ok(_) => {}
            // Idle slice.
            Err(_) if !receiver.is_disconnected() => {}
            Err(e) => {
                warn!("mDNS receive error: {e:?}");
                break;
            }
        }
    }

    if let Err(e) = mdns.shutdown() {
        debug!("mDNS shutdown failed: {e}");
    }
    Ok(found)
}
