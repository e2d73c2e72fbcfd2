// ── Discovery service ──
//
// Finds candidate bridges (mDNS + N-UPnP) or resolves a manually entered
// address, publishing progress on the feedback bus. A cancelled search
// publishes nothing after StartSearching.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use hueflux_api::discovery::{self, NUPNP_ENDPOINT, NupnpDiscovery};
use hueflux_api::{DiscoveredBridge, TransportConfig, normalize_bridge_id};

use crate::bridge::BridgeApi;
use crate::error::CoreError;
use crate::feedback::{FeedbackBus, FeedbackId, RequestType};

/// Source of candidate bridges on the local network.
#[async_trait]
pub trait BridgeDiscovery: Send + Sync {
    async fn discover(
        &self,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<Vec<DiscoveredBridge>, CoreError>;
}

// ── Network backends ─────────────────────────────────────────────────

/// mDNS and N-UPnP queried concurrently, results merged.
pub struct NetworkDiscovery {
    nupnp: NupnpDiscovery,
}

impl NetworkDiscovery {
    pub fn new(transport: &TransportConfig) -> Result<Self, CoreError> {
        let endpoint = Url::parse(NUPNP_ENDPOINT).map_err(|e| CoreError::Config {
            message: format!("invalid discovery endpoint: {e}"),
        })?;
        Ok(Self {
            nupnp: NupnpDiscovery::new(endpoint, transport)?,
        })
    }
}

#[async_trait]
impl BridgeDiscovery for NetworkDiscovery {
    async fn discover(
        &self,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<Vec<DiscoveredBridge>, CoreError> {
        let mdns = discovery::mdns::discover(timeout, cancel.clone());
        let nupnp = async {
            match tokio::time::timeout(timeout, self.nupnp.discover()).await {
                Ok(result) => result,
                Err(_) => Err(hueflux_api::Error::Timeout {
                    timeout_secs: timeout.as_secs(),
                }),
            }
        };
        let (mdns, nupnp) = tokio::join!(mdns, nupnp);

        let mut batches = Vec::new();
        let mut failures = Vec::new();
        for (backend, result) in [("mdns", mdns), ("nupnp", nupnp)] {
            match result {
                Ok(found) => {
                    debug!(backend, count = found.len(), "discovery backend finished");
                    batches.push(found);
                }
                Err(e) => {
                    warn!(backend, error = %e, "discovery backend failed");
                    failures.push(format!("{backend}: {e}"));
                }
            }
        }
        if batches.is_empty() {
            return Err(CoreError::NetworkUnreachable {
                address: String::new(),
                reason: failures.join("; "),
            });
        }
        Ok(discovery::merge_results(batches))
    }
}

// ── Service ──────────────────────────────────────────────────────────

/// Discovery plus manual resolution, with feedback events.
#[derive(Clone)]
pub struct DiscoveryService {
    backend: Arc<dyn BridgeDiscovery>,
    api: Arc<dyn BridgeApi>,
    bus: FeedbackBus,
}

impl DiscoveryService {
    pub fn new(
        backend: Arc<dyn BridgeDiscovery>,
        api: Arc<dyn BridgeApi>,
        bus: FeedbackBus,
    ) -> Self {
        Self { backend, api, bus }
    }

    /// Search the network. An empty result is `Ok` (after NoBridgeFound);
    /// cancellation returns [`CoreError::Cancelled`] without a terminal event.
    pub async fn discover(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
        request: RequestType,
    ) -> Result<Vec<DiscoveredBridge>, CoreError> {
        self.bus
            .emit(FeedbackId::StartSearching, request, "network discovery started");

        let search = self.backend.discover(timeout, cancel.child_token());
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(CoreError::Cancelled),
            result = search => result,
        };
        if cancel.is_cancelled() {
            return Err(CoreError::Cancelled);
        }

        match result {
            Ok(found) if found.is_empty() => {
                info!("no bridges found");
                self.bus
                    .emit(FeedbackId::NoBridgeFound, request, "discovery returned no bridges");
                Ok(found)
            }
            Ok(found) => {
                info!(count = found.len(), "bridges found");
                let addresses: Vec<&str> = found.iter().map(|b| b.address.as_str()).collect();
                self.bus.emit(
                    FeedbackId::FinishSearchBridgesFound,
                    request,
                    format!("found {}", addresses.join(", ")),
                );
                Ok(found)
            }
            Err(e) => {
                self.bus
                    .emit(FeedbackId::NoBridgeFound, request, format!("discovery failed: {e}"));
                Err(e)
            }
        }
    }

    /// Resolve a user-supplied address to a candidate by asking the bridge
    /// for its identity.
    pub async fn resolve(
        &self,
        address: &str,
        cancel: &CancellationToken,
        request: RequestType,
    ) -> Result<DiscoveredBridge, CoreError> {
        let address = address.trim();
        self.bus.emit(
            FeedbackId::StartSearching,
            request,
            format!("resolving {address}"),
        );
        if address.is_empty() {
            self.bus
                .emit(FeedbackId::BridgeNotFound, request, "empty address");
            return Err(CoreError::BridgeNotFound {
                address: String::new(),
            });
        }

        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(CoreError::Cancelled),
            result = self.api.identify(address) => result,
        };
        match result {
            Ok(identity) => {
                let config = identity.config;
                let candidate = DiscoveredBridge {
                    id: Some(normalize_bridge_id(&config.bridge_id)),
                    address: address.to_owned(),
                    port: None,
                };
                self.bus.emit(
                    FeedbackId::FinishSearchBridgesFound,
                    request,
                    format!("{address} is bridge {}", config.bridge_id),
                );
                Ok(candidate)
            }
            Err(e) => {
                warn!(address, error = %e, "manual address did not answer as a bridge");
                self.bus.emit(
                    FeedbackId::BridgeNotFound,
                    request,
                    format!("{address}: {e}"),
                );
                Err(CoreError::BridgeNotFound {
                    address: address.to_owned(),
                })
            }
        }
    }
}
