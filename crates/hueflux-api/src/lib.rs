// hueflux-api: Async Rust client for the local REST surface of Hue-compatible bridges

pub mod client;
pub mod discovery;
pub mod error;
pub mod models;
pub mod transport;

pub use client::BridgeClient;
pub use error::Error;
pub use models::{
    BridgeConfig, Credentials, DiscoveredBridge, EntertainmentGroup, GroupLightState,
    LightLocation, Registration, normalize_bridge_id,
};
pub use transport::{TlsMode, TransportConfig};
