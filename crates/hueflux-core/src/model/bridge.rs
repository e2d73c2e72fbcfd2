// ── Bridge record ──
//
// Identity, credentials, pinned certificate and group list of one bridge.
// A record is either empty (no identity) or carries both id and address;
// credentials and the certificate pin may each be absent.

use secrecy::{ExposeSecret, SecretString};

use super::group::Group;

pub const DEFAULT_TCP_PORT: u16 = 80;
pub const DEFAULT_SSL_PORT: u16 = 443;
pub const DEFAULT_STREAMING_PORT: u16 = 2100;

/// Required length of the streaming PSK handed out at push-link time.
pub const CLIENT_KEY_LEN: usize = 32;

/// Minimum bridge capabilities for entertainment streaming.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeRequirements {
    /// Lowest accepted `BSB`/`HSE` model generation.
    pub min_model_generation: u32,
    /// Lowest accepted API version as (major, minor, build).
    pub min_api_version: (u32, u32, u32),
}

impl Default for BridgeRequirements {
    fn default() -> Self {
        Self {
            min_model_generation: 2,
            min_api_version: (1, 24, 0),
        }
    }
}

/// Outcome of validating a record against [`BridgeRequirements`], in
/// evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum BridgeStatus {
    Empty,
    InvalidModel,
    InvalidVersion,
    /// No user or a client key of the wrong length; push-link needed.
    InvalidCredentials,
    NoGroupAvailable,
    InvalidGroupSelected,
    /// The selected group is being streamed by another application.
    Busy,
    Ready,
}

#[derive(Debug, Clone)]
pub struct BridgeRecord {
    pub id: String,
    pub name: String,
    pub address: String,
    pub tcp_port: u16,
    pub ssl_port: u16,
    pub streaming_port: u16,
    pub model_id: String,
    pub api_version: String,
    pub sw_version: String,
    pub user: Option<String>,
    pub client_key: Option<SecretString>,
    /// SHA-256 fingerprint (hex) of the bridge certificate.
    pub certificate: Option<String>,
    pub groups: Vec<Group>,
    pub selected_group: Option<String>,
}

impl Default for BridgeRecord {
    fn default() -> Self {
        Self::empty()
    }
}

impl BridgeRecord {
    pub fn empty() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            address: String::new(),
            tcp_port: DEFAULT_TCP_PORT,
            ssl_port: DEFAULT_SSL_PORT,
            streaming_port: DEFAULT_STREAMING_PORT,
            model_id: String::new(),
            api_version: String::new(),
            sw_version: String::new(),
            user: None,
            client_key: None,
            certificate: None,
            groups: Vec::new(),
            selected_group: None,
        }
    }

    /// A record with identity but no credentials yet.
    pub fn identified(id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            ..Self::empty()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.id.is_empty() || self.address.is_empty()
    }

    pub fn has_credentials(&self) -> bool {
        self.user.as_deref().is_some_and(|u| !u.is_empty()) && self.has_valid_client_key()
    }

    pub fn has_valid_client_key(&self) -> bool {
        self.client_key.as_ref().is_some_and(|k| {
            let k = k.expose_secret();
            k.len() == CLIENT_KEY_LEN && k.chars().all(|c| c.is_ascii_hexdigit())
        })
    }

    /// Drop user, client key and certificate pin but keep identity.
    pub fn forget_credentials(&mut self) {
        self.user = None;
        self.client_key = None;
        self.certificate = None;
    }

    /// `host[:port]` for HTTPS requests.
    pub fn https_authority(&self) -> String {
        if self.ssl_port == DEFAULT_SSL_PORT {
            self.address.clone()
        } else {
            format!("{}:{}", self.address, self.ssl_port)
        }
    }

    // ── Groups ───────────────────────────────────────────────────────

    pub fn group(&self, id: &str) -> Option<&Group> {
        self.groups.iter().find(|g| g.id == id)
    }

    pub fn selected_group(&self) -> Option<&Group> {
        self.selected_group.as_deref().and_then(|id| self.group(id))
    }

    /// Select the only group when there is exactly one. Returns whether the
    /// selection changed.
    pub fn select_group_if_only_one(&mut self) -> bool {
        if self.selected_group().is_some() {
            return false;
        }
        match self.groups.as_slice() {
            [only] => {
                self.selected_group = Some(only.id.clone());
                true
            }
            _ => false,
        }
    }

    // ── Validation ───────────────────────────────────────────────────

    pub fn is_valid_model(&self, requirements: &BridgeRequirements) -> bool {
        model_generation(&self.model_id).is_some_and(|g| g >= requirements.min_model_generation)
    }

    pub fn is_valid_api_version(&self, requirements: &BridgeRequirements) -> bool {
        parse_api_version(&self.api_version).is_some_and(|v| v >= requirements.min_api_version)
    }

    /// Evaluate the record. A group streamed by our own user counts as ready.
    pub fn status(&self, requirements: &BridgeRequirements) -> BridgeStatus {
        if self.is_empty() {
            return BridgeStatus::Empty;
        }
        if !self.is_valid_model(requirements) {
            return BridgeStatus::InvalidModel;
        }
        if !self.is_valid_api_version(requirements) {
            return BridgeStatus::InvalidVersion;
        }
        if !self.has_credentials() {
            return BridgeStatus::InvalidCredentials;
        }
        if self.groups.is_empty() {
            return BridgeStatus::NoGroupAvailable;
        }
        let Some(group) = self.selected_group() else {
            return BridgeStatus::InvalidGroupSelected;
        };
        let owned_elsewhere = group.stream_active
            && group
                .stream_owner
                .as_deref()
                .is_some_and(|owner| Some(owner) != self.user.as_deref());
        if owned_elsewhere {
            return BridgeStatus::Busy;
        }
        BridgeStatus::Ready
    }
}

/// Extract the model generation from ids like `BSB002` or `HSE011`.
fn model_generation(model_id: &str) -> Option<u32> {
    ["BSB", "HSE"].iter().find_map(|prefix| {
        let start = model_id.find(prefix)? + prefix.len();
        let digits: String = model_id[start..]
            .chars()
            .take_while(char::is_ascii_digit)
            .collect();
        digits.parse().ok()
    })
}

fn parse_api_version(version: &str) -> Option<(u32, u32, u32)> {
    let mut parts = version.trim().split('.').map(str::parse::<u32>);
    let major = parts.next()?.ok()?;
    let minor = parts.next()?.ok()?;
    let build = parts.next().transpose().ok()?.unwrap_or(0);
    Some((major, minor, build))
}
