// ── Core error types ──
//
// User-facing errors from hueflux-core. These are NOT API-specific --
// consumers never see HTTP status codes or bridge error arrays directly.
// The `From<hueflux_api::Error>` impl translates transport-layer errors
// into domain-appropriate variants.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot reach bridge at {address}: {reason}")]
    NetworkUnreachable { address: String, reason: String },

    #[error("Operation timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("No bridge answered at {address}")]
    BridgeNotFound { address: String },

    // ── Authorization errors ─────────────────────────────────────────
    #[error("Bridge rejected the stored credentials: {message}")]
    InvalidCredentials { message: String },

    #[error("Certificate presented by bridge {bridge_id} does not match the pinned certificate")]
    CertificateMismatch { bridge_id: String },

    #[error("Authorization failed: {0}")]
    Authorization(#[from] AuthError),

    // ── Bridge validation errors ─────────────────────────────────────
    #[error("Unsupported bridge model: {model}")]
    InvalidModel { model: String },

    #[error("Unsupported bridge API version: {version}")]
    InvalidVersion { version: String },

    #[error("Bridge has no entertainment group")]
    NoGroupAvailable,

    #[error("Group '{id}' does not exist on the bridge")]
    InvalidGroup { id: String },

    // ── State machine errors ─────────────────────────────────────────
    #[error("Another operation is in progress")]
    Busy,

    #[error("Operation was cancelled")]
    Cancelled,

    #[error("Cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    // ── Storage errors ───────────────────────────────────────────────
    #[error("Credential store error: {message}")]
    Storage { message: String },

    #[error("Credential store could not be decrypted")]
    DecryptionFailure,

    // ── Streaming errors ─────────────────────────────────────────────
    #[error("Stream transport error: {message}")]
    Transport { message: String },

    // ── API errors (wrapped, not exposed raw) ────────────────────────
    #[error("Bridge API error: {message}")]
    Api { message: String, code: Option<u16> },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failure of a push-link authorization attempt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("link button was not pressed within {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("bridge denied the request: {message}")]
    Denied { message: String },

    #[error("bridge at {address} unreachable: {reason}")]
    NetworkUnreachable { address: String, reason: String },

    #[error("authorization cancelled")]
    Cancelled,

    #[error("authorization already in progress for {address}")]
    AlreadyInProgress { address: String },
}

impl CoreError {
    /// Returns `true` for I/O failures where issuing `connect()` again may help.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::NetworkUnreachable { .. } | Self::Timeout { .. } | Self::BridgeNotFound { .. }
        )
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<hueflux_api::Error> for CoreError {
    fn from(err: hueflux_api::Error) -> Self {
        use hueflux_api::Error as ApiError;

        match err {
            ApiError::Unauthorized { message } => CoreError::InvalidCredentials { message },
            ApiError::LinkButtonNotPressed => CoreError::Authorization(AuthError::Denied {
                message: "link button not pressed".into(),
            }),
            ApiError::Transport(ref e) => {
                let address = e
                    .url()
                    .and_then(|u| u.host_str().map(String::from))
                    .unwrap_or_else(|| "<unknown>".into());
                if e.is_timeout() {
                    CoreError::Timeout { timeout_secs: 0 }
                } else if e.is_connect() || e.is_request() {
                    CoreError::NetworkUnreachable {
                        address,
                        reason: e.to_string(),
                    }
                } else if matches!(e.status().map(|s| s.as_u16()), Some(401 | 403)) {
                    CoreError::InvalidCredentials {
                        message: e.to_string(),
                    }
                } else {
                    CoreError::Api {
                        message: e.to_string(),
                        code: e.status().map(|s| s.as_u16()),
                    }
                }
            }
            ApiError::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid bridge address: {e}"),
            },
            ApiError::Timeout { timeout_secs } => CoreError::Timeout { timeout_secs },
            ApiError::Tls(msg) => CoreError::NetworkUnreachable {
                address: String::new(),
                reason: format!("TLS error: {msg}"),
            },
            ApiError::BridgeApi {
                code, description, ..
            } => CoreError::Api {
                message: description,
                code: Some(code),
            },
            ApiError::Http { status, message } => CoreError::Api {
                message,
                code: Some(status),
            },
            ApiError::Deserialization { message, body: _ } => {
                CoreError::Internal(format!("Deserialization error: {message}"))
            }
            ApiError::Mdns(reason) | ApiError::Discovery(reason) => {
                CoreError::NetworkUnreachable {
                    address: String::new(),
                    reason,
                }
            }
        }
    }
}
