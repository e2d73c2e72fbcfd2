use thiserror::Error;

/// Top-level error type for the `hueflux-api` crate.
///
/// Covers every failure mode of the bridge's local REST surface and the
/// discovery backends. `hueflux-core` maps these into domain errors.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authorization ───────────────────────────────────────────────
    /// The bridge rejected the whitelisted user (error type 1 or HTTP 401/403).
    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    /// Push-link registration attempted before the link button was pressed.
    #[error("Link button not pressed")]
    LinkButtonNotPressed,

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Request timed out.
    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// TLS handshake or client construction error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── Bridge API ──────────────────────────────────────────────────
    /// Structured error from the bridge (`[{"error":{"type":N,...}}]`).
    #[error("Bridge API error {code} at {address}: {description}")]
    BridgeApi {
        code: u16,
        address: String,
        description: String,
    },

    /// Non-success HTTP status without a parseable bridge error.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },

    // ── Discovery ───────────────────────────────────────────────────
    /// mDNS daemon or browse failure.
    #[error("mDNS error: {0}")]
    Mdns(String),

    /// Remote discovery endpoint failure.
    #[error("Discovery failed: {0}")]
    Discovery(String),
}

impl Error {
    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::Timeout { .. } => true,
            Self::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Returns `true` if the bridge refused the supplied credentials.
    pub fn is_unauthorized(&self) -> bool {
        match self {
            Self::Unauthorized { .. } => true,
            Self::Transport(e) => matches!(
                e.status(),
                Some(reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN)
            ),
            _ => false,
        }
    }
}
