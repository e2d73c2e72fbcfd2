// Bridge discovery backends.
//
// mDNS finds bridges on the local segment; N-UPnP asks the vendor portal.
// Results are merged and de-duplicated by address.

pub mod mdns;
pub mod nupnp;

use std::net::IpAddr;

use crate::models::DiscoveredBridge;

pub use nupnp::{DEFAULT_ENDPOINT as NUPNP_ENDPOINT, NupnpDiscovery};

/// Merge backend results: drop unparsable addresses, keep the first entry
/// per address, and fill in a missing bridge id from later duplicates.
pub fn merge_results(batches: Vec<Vec<DiscoveredBridge>>) -> Vec<DiscoveredBridge> {
    let mut merged: Vec<DiscoveredBridge> = Vec::new();
    for bridge in batches.into_iter().flatten() {
        if bridge.address.parse::<IpAddr>().is_err() {
            continue;
        }
        match merged.iter_mut().find(|b| b.address == bridge.address) {
            Some(existing) => {
                if existing.id.is_none() {
                    existing.id = bridge.id;
                }
            }
            None => merged.push(bridge),
        }
    }
    merged
}
