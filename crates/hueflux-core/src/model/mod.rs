// ── Domain model ──
//
// Canonical types shared by the store, the connection state machine and
// the effect mixer.

pub mod bridge;
pub mod group;

pub use bridge::{
    BridgeRecord, BridgeRequirements, BridgeStatus, CLIENT_KEY_LEN, DEFAULT_SSL_PORT,
    DEFAULT_STREAMING_PORT, DEFAULT_TCP_PORT,
};
pub use group::{Group, Light, LightPosition, Location};
