// ── Bridge API seam ──
//
// The state machine talks to bridges through `BridgeApi` so flows can be
// driven against in-memory fakes. `HttpBridgeApi` is the production
// implementation over `hueflux_api::BridgeClient`.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use hueflux_api::{BridgeClient, BridgeConfig, EntertainmentGroup, Registration, TransportConfig};

/// Unauthenticated answer of a bridge plus the certificate it presented.
/// Checked against the pin before any credential leaves the process.
#[derive(Debug, Clone)]
pub struct BridgeIdentity {
    pub config: BridgeConfig,
    /// SHA-256 fingerprint (hex) of the TLS certificate.
    pub certificate: Option<String>,
}

/// Group list plus the certificate the bridge presented while serving it.
#[derive(Debug, Clone, Default)]
pub struct BridgeDetails {
    pub groups: Vec<EntertainmentGroup>,
    /// SHA-256 fingerprint (hex) of the TLS certificate.
    pub certificate: Option<String>,
}

/// Operations the connection flow needs from a bridge. `address` is a
/// `host[:port]` authority.
#[async_trait]
pub trait BridgeApi: Send + Sync {
    /// Unauthenticated identity and firmware info.
    async fn identify(&self, address: &str) -> Result<BridgeIdentity, hueflux_api::Error>;

    /// One push-link attempt.
    async fn register(
        &self,
        address: &str,
        device_type: &str,
    ) -> Result<Registration, hueflux_api::Error>;

    /// Entertainment groups visible to `user`.
    async fn details(&self, address: &str, user: &str)
    -> Result<BridgeDetails, hueflux_api::Error>;

    async fn set_streaming(
        &self,
        address: &str,
        user: &str,
        group_id: &str,
        active: bool,
    ) -> Result<(), hueflux_api::Error>;
}

// ── HTTP implementation ──────────────────────────────────────────────

/// `BridgeApi` over HTTPS, one pooled client per bridge authority.
pub struct HttpBridgeApi {
    transport: TransportConfig,
    clients: DashMap<String, Arc<BridgeClient>>,
}

impl HttpBridgeApi {
    pub fn new(transport: TransportConfig) -> Self {
        Self {
            transport,
            clients: DashMap::new(),
        }
    }

    fn client(&self, address: &str) -> Result<Arc<BridgeClient>, hueflux_api::Error> {
        if let Some(client) = self.clients.get(address) {
            return Ok(Arc::clone(client.value()));
        }
        let url = BridgeClient::base_url_for(address, true)?;
        let client = Arc::new(BridgeClient::new(url, &self.transport)?);
        debug!(address, "created bridge client");
        self.clients
            .insert(address.to_owned(), Arc::clone(&client));
        Ok(client)
    }
}

#[async_trait]
impl BridgeApi for HttpBridgeApi {
    async fn identify(&self, address: &str) -> Result<BridgeIdentity, hueflux_api::Error> {
        let client = self.client(address)?;
        let config = client.small_config().await?;
        Ok(BridgeIdentity {
            config,
            certificate: client.certificate_fingerprint(),
        })
    }

    async fn register(
        &self,
        address: &str,
        device_type: &str,
    ) -> Result<Registration, hueflux_api::Error> {
        self.client(address)?.register(device_type).await
    }

    async fn details(
        &self,
        address: &str,
        user: &str,
    ) -> Result<BridgeDetails, hueflux_api::Error> {
        let client = self.client(address)?;
        let groups = client.groups(user).await?;
        Ok(BridgeDetails {
            groups,
            certificate: client.certificate_fingerprint(),
        })
    }

    async fn set_streaming(
        &self,
        address: &str,
        user: &str,
        group_id: &str,
        active: bool,
    ) -> Result<(), hueflux_api::Error> {
        self.client(address)?
            .set_streaming(user, group_id, active)
            .await
    }
}
