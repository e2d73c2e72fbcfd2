//! N-UPnP discovery: ask the vendor portal which bridges share our public IP.

use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::models::{DiscoveredBridge, NupnpEntry, normalize_bridge_id};
use crate::transport::{TlsMode, TransportConfig};

pub const DEFAULT_ENDPOINT: &str = "https://discovery.meethue.com/";

/// Client for the remote N-UPnP discovery endpoint.
pub struct NupnpDiscovery {
    http: reqwest::Client,
    endpoint: Url,
}

impl NupnpDiscovery {
    pub fn new(endpoint: Url, transport: &TransportConfig) -> Result<Self, Error> {
        // The portal has a real certificate; never relax verification for it.
        let transport = TransportConfig {
            tls: TlsMode::System,
            ..transport.clone()
        };
        Ok(Self::with_client(transport.build_client()?, endpoint))
    }

    pub fn with_client(http: reqwest::Client, endpoint: Url) -> Self {
        Self { http, endpoint }
    }

    pub async fn discover(&self) -> Result<Vec<DiscoveredBridge>, Error> {
        debug!("GET {}", self.endpoint);
        let resp = self.http.get(self.endpoint.clone()).send().await?;
        if !resp.status().is_success() {
            return Err(Error::Discovery(format!(
                "discovery endpoint returned HTTP {}",
                resp.status()
            )));
        }
        let entries: Vec<NupnpEntry> = resp.json().await?;
        Ok(entries
            .into_iter()
            .map(|e| DiscoveredBridge {
                id: e.id.as_deref().map(normalize_bridge_id),
                address: e.internal_ip_address,
                port: e.port,
            })
            .collect())
    }
}
