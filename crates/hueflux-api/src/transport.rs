// Shared transport configuration for building reqwest::Client instances.
//
// The bridge client and the N-UPnP discovery backend share TLS and timeout
// settings through this module. Peer certificate capture is always enabled
// so callers can pin the bridge certificate after the handshake.

use std::time::Duration;

use crate::error::Error;

const USER_AGENT: &str = concat!("hueflux/", env!("CARGO_PKG_VERSION"));

/// TLS verification mode.
#[derive(Debug, Clone)]
pub enum TlsMode {
    /// Use the system certificate store.
    System,
    /// Accept any certificate. Bridges present self-signed certificates,
    /// so trust comes from the pinned fingerprint instead.
    DangerAcceptInvalid,
}

/// Shared transport configuration for building HTTP clients.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub tls: TlsMode,
    pub timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            tls: TlsMode::DangerAcceptInvalid,
            timeout: Duration::from_secs(10),
        }
    }
}

impl TransportConfig {
    /// Build a `reqwest::Client` from this config.
    pub fn build_client(&self) -> Result<reqwest::Client, Error> {
        reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(USER_AGENT)
            .tls_info(true)
            .danger_accept_invalid_certs(matches!(self.tls, TlsMode::DangerAcceptInvalid))
            .build()
            .map_err(|e| Error::Tls(format!("failed to build HTTP client: {e}")))
    }

    /// Same settings with a different request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}
