//! Control core for Hue entertainment streaming, sitting between
//! `hueflux-api` and consumers (CLI, services).
//!
//! - **[`Controller`]**: connection state machine. The `connect*`
//!   procedures run in the background (discovery, push-link, retrieval,
//!   certificate pinning, group selection) and report progress through
//!   [`ConnectionResult`] and the [`FeedbackBus`]. One procedure runs at a
//!   time; [`abort()`](Controller::abort) cancels it. A [`BridgeMonitor`]
//!   re-reads the connected bridge and reports what changed.
//!
//! - **[`CredentialStore`]**: AES-GCM encrypted file of known bridges with
//!   per-bridge certificate pins. A wrong key reads as an empty store.
//!
//! - **[`Mixer`]**: layered effects composed into per-light frames. Writers
//!   batch changes under a [`MixerGuard`]; `tick()` renders lock-free from
//!   the last committed set.
//!
//! - **[`StreamingLoop`]**: fixed-cadence ticker pushing frames into a
//!   [`FrameSink`] (HueStream over UDP in production).
//!
//! - **[`Context`]**: explicit application context, validated once at
//!   construction and handed to every component.

pub mod auth;
pub mod bridge;
pub mod context;
pub mod controller;
pub mod discovery;
pub mod effect;
pub mod error;
pub mod feedback;
pub mod model;
pub mod store;
pub mod stream;

// ── Primary re-exports ──────────────────────────────────────────────
pub use auth::{Authorization, Authorizer};
pub use bridge::{BridgeApi, BridgeDetails, BridgeIdentity, HttpBridgeApi};
pub use context::{Context, ContextConfig, FlowTiming, StreamSettings};
pub use controller::{BridgeMonitor, ConnectionResult, Controller, Operation};
pub use discovery::{BridgeDiscovery, DiscoveryService, NetworkDiscovery};
pub use effect::{Area, Color, Effect, EffectId, EffectKind, Frame, Mixer, MixerGuard, Phase};
pub use error::{AuthError, CoreError};
pub use feedback::{
    FeedbackBus, FeedbackEvent, FeedbackId, FeedbackObserver, RequestType, SubscriptionHandle,
};
pub use store::CredentialStore;
pub use stream::{
    FrameSink, SinkFactory, StreamExit, StreamStats, StreamStatsSnapshot, StreamingLoop,
    TransportError,
};

pub use model::{
    BridgeRecord, BridgeRequirements, BridgeStatus, Group, Light, LightPosition, Location,
};
