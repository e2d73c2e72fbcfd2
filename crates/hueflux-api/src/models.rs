// Wire types for the bridge's local REST surface.
//
// Field names mirror the bridge JSON; normalization into domain types
// happens in hueflux-core.

use std::collections::HashMap;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// Unauthenticated subset of `GET /api/config`.
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    #[serde(rename = "bridgeid")]
    pub bridge_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "modelid", default)]
    pub model_id: String,
    #[serde(rename = "apiversion", default)]
    pub api_version: String,
    #[serde(rename = "swversion", default)]
    pub sw_version: String,
    #[serde(default)]
    pub mac: Option<String>,
}

/// Push-link registration body.
#[derive(Debug, Serialize)]
pub(crate) struct RegisterRequest<'a> {
    pub devicetype: &'a str,
    pub generateclientkey: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RegisterSuccess {
    pub username: String,
    #[serde(default)]
    pub clientkey: Option<String>,
}

/// One element of the `[{"success":...}|{"error":...}]` response array.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum ApiItem<T> {
    Success { success: T },
    Error { error: ApiErrorBody },
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiErrorBody {
    #[serde(rename = "type")]
    pub code: u16,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub description: String,
}

/// Whitelisted user and the PSK used for entertainment streaming.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub client_key: SecretString,
}

/// Outcome of a single push-link registration attempt.
#[derive(Debug, Clone)]
pub enum Registration {
    Granted(Credentials),
    /// Link button not pressed yet; poll again.
    Pending,
}

// ── Groups ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub(crate) struct GroupPayload {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub lights: Vec<String>,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub class: Option<String>,
    #[serde(default)]
    pub locations: HashMap<String, Vec<f64>>,
    #[serde(default)]
    pub stream: Option<StreamPayload>,
    #[serde(default)]
    pub action: Option<ActionPayload>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ActionPayload {
    #[serde(default)]
    pub on: bool,
    #[serde(default)]
    pub bri: u8,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StreamPayload {
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub owner: Option<String>,
}

/// An entertainment group as reported by the bridge.
#[derive(Debug, Clone, PartialEq)]
pub struct EntertainmentGroup {
    pub id: String,
    pub name: String,
    pub class: Option<String>,
    pub lights: Vec<LightLocation>,
    pub stream_active: bool,
    pub stream_owner: Option<String>,
    /// Last on/brightness command applied to the group's lights.
    pub light_state: Option<GroupLightState>,
}

/// Group-wide on/off and brightness as set by regular (non-streaming)
/// control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupLightState {
    pub on: bool,
    pub brightness: u8,
}

/// Light id with its entertainment-area coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct LightLocation {
    pub id: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl EntertainmentGroup {
    pub(crate) fn from_payload(id: String, payload: GroupPayload) -> Self {
        let lights = payload
            .lights
            .into_iter()
            .map(|light_id| {
                let coords = payload.locations.get(&light_id);
                let axis = |i: usize| coords.and_then(|c| c.get(i)).copied().unwrap_or(0.0);
                LightLocation {
                    x: axis(0),
                    y: axis(1),
                    z: axis(2),
                    id: light_id,
                }
            })
            .collect();
        let (stream_active, stream_owner) = payload
            .stream
            .map_or((false, None), |s| (s.active, s.owner));
        Self {
            id,
            name: payload.name,
            class: payload.class,
            lights,
            stream_active,
            stream_owner,
            light_state: payload.action.map(|a| GroupLightState {
                on: a.on,
                brightness: a.bri,
            }),
        }
    }
}

// ── Discovery ───────────────────────────────────────────────────────

/// A bridge found by one of the discovery backends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredBridge {
    /// Bridge id when the backend reports one (lowercase hex).
    pub id: Option<String>,
    /// IP address or host name.
    pub address: String,
    pub port: Option<u16>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct NupnpEntry {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "internalipaddress")]
    pub internal_ip_address: String,
    #[serde(default)]
    pub port: Option<u16>,
}

/// Normalize a bridge id to the lowercase 16-hex-digit form.
///
/// mDNS and some firmware report the id uppercased; older N-UPnP entries
/// carry the 12-digit MAC form, which is expanded with `fffe` in the middle.
pub fn normalize_bridge_id(raw: &str) -> String {
    let id: String = raw
        .chars()
        .filter(char::is_ascii_hexdigit)
        .collect::<String>()
        .to_ascii_lowercase();
    if id.len() == 12 {
        format!("{}fffe{}", &id[..6], &id[6..])
    } else {
        id
    }
}
