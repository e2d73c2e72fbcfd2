//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` variants into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use hueflux_config::ConfigError;
use hueflux_core::{AuthError, CoreError};

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const UNSUPPORTED: i32 = 5;
    pub const CONFLICT: i32 = 6;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not reach the bridge at {address}")]
    #[diagnostic(
        code(hueflux::unreachable),
        help(
            "Check that the bridge is powered and on the same network.\n\
             Reason: {reason}\n\
             Try: hueflux connect --new"
        )
    )]
    Unreachable { address: String, reason: String },

    #[error("No bridge found")]
    #[diagnostic(
        code(hueflux::no_bridge),
        help("Pass the bridge address explicitly: hueflux connect --ip <ADDRESS>")
    )]
    NoBridge,

    #[error("Timed out after {seconds}s")]
    #[diagnostic(code(hueflux::timeout))]
    Timeout { seconds: u64 },

    // ── Authorization ────────────────────────────────────────────────
    #[error("The bridge no longer accepts this app: {message}")]
    #[diagnostic(
        code(hueflux::unauthorized),
        help("Push-link again with: hueflux reset --bridge && hueflux connect")
    )]
    Unauthorized { message: String },

    #[error("Bridge {bridge_id} presented a different certificate than the pinned one")]
    #[diagnostic(
        code(hueflux::certificate_mismatch),
        help(
            "If the bridge was replaced or factory reset, forget the pin with:\n  \
             hueflux reset --bridge"
        )
    )]
    CertificateMismatch { bridge_id: String },

    #[error("Push-link failed: {reason}")]
    #[diagnostic(
        code(hueflux::push_link),
        help("Press the round link button on the bridge when asked, then retry.")
    )]
    PushLink { reason: String },

    // ── Bridge ───────────────────────────────────────────────────────
    #[error("Unsupported bridge: {what}")]
    #[diagnostic(
        code(hueflux::unsupported),
        help("Entertainment streaming needs a square (v2) bridge with current software.")
    )]
    Unsupported { what: String },

    #[error("The bridge has no entertainment area")]
    #[diagnostic(
        code(hueflux::no_group),
        help("Create an entertainment area in the Hue app first.")
    )]
    NoGroup,

    #[error("Entertainment area '{id}' not found")]
    #[diagnostic(
        code(hueflux::group_not_found),
        help("Run: hueflux groups --refresh to see available areas")
    )]
    GroupNotFound { id: String },

    #[error("Another application is streaming to the selected area")]
    #[diagnostic(code(hueflux::bridge_busy))]
    BridgeBusy,

    // ── State ────────────────────────────────────────────────────────
    #[error("Another operation is in progress")]
    #[diagnostic(code(hueflux::busy))]
    Busy,

    #[error("Cancelled")]
    #[diagnostic(code(hueflux::cancelled))]
    Cancelled,

    #[error("Cannot {operation} while {state}")]
    #[diagnostic(code(hueflux::invalid_state))]
    InvalidState { operation: String, state: String },

    #[error("Not connected (state: {state})")]
    #[diagnostic(
        code(hueflux::not_connected),
        help("Run with -v to see each connection step.")
    )]
    NotConnected { state: String },

    #[error("Action required: {message}")]
    #[diagnostic(code(hueflux::action_required), help("{hint}"))]
    ActionRequired { message: String, hint: String },

    #[error("No bridge stored for profile '{profile}'")]
    #[diagnostic(code(hueflux::not_paired), help("Run: hueflux connect"))]
    NotPaired { profile: String },

    // ── Storage ──────────────────────────────────────────────────────
    #[error("Credential store error: {message}")]
    #[diagnostic(code(hueflux::storage))]
    Storage { message: String },

    // ── Streaming / API ──────────────────────────────────────────────
    #[error("Streaming failed: {message}")]
    #[diagnostic(code(hueflux::stream))]
    Stream { message: String },

    #[error("Bridge API error: {message}")]
    #[diagnostic(code(hueflux::api_error))]
    Api { message: String, code: Option<u16> },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(hueflux::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(hueflux::profile_not_found),
        help(
            "Available profiles: {available}\n\
             Create one with: hueflux --profile {name} config init"
        )
    )]
    ProfileNotFound { name: String, available: String },

    #[error("Profile '{name}' already exists")]
    #[diagnostic(code(hueflux::conflict), help("Use --force to overwrite it."))]
    ProfileExists { name: String },

    #[error("No encryption key for profile '{profile}'")]
    #[diagnostic(
        code(hueflux::no_encryption_key),
        help(
            "Create one with: hueflux config init\n\
             Or set HUEFLUX_ENCRYPTION_KEY, or run: hueflux config set-key"
        )
    )]
    NoEncryptionKey { profile: String },

    #[error("Keyring error: {message}")]
    #[diagnostic(code(hueflux::keyring))]
    Keyring { message: String },

    #[error("Configuration error: {message}")]
    #[diagnostic(code(hueflux::config))]
    Config { message: String },

    // ── Interactive ──────────────────────────────────────────────────
    #[error("Destructive operation '{action}' requires confirmation")]
    #[diagnostic(
        code(hueflux::confirmation_required),
        help("Use --yes (-y) to skip confirmation in non-interactive contexts.")
    )]
    NonInteractiveRequiresYes { action: String },

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Could not encode output: {0}")]
    #[diagnostic(code(hueflux::json))]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    #[diagnostic(code(hueflux::internal))]
    Internal(String),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Unreachable { .. } | Self::NoBridge | Self::Stream { .. } => {
                exit_code::CONNECTION
            }
            Self::Unauthorized { .. }
            | Self::CertificateMismatch { .. }
            | Self::PushLink { .. }
            | Self::NoEncryptionKey { .. }
            | Self::Keyring { .. } => exit_code::AUTH,
            Self::GroupNotFound { .. } | Self::NotPaired { .. } | Self::NoGroup => {
                exit_code::NOT_FOUND
            }
            Self::Unsupported { .. } => exit_code::UNSUPPORTED,
            Self::BridgeBusy
            | Self::Busy
            | Self::InvalidState { .. }
            | Self::ProfileExists { .. }
            | Self::ActionRequired { .. } => exit_code::CONFLICT,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Validation { .. } | Self::NonInteractiveRequiresYes { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NetworkUnreachable { address, reason } => {
                CliError::Unreachable { address, reason }
            }
            CoreError::BridgeNotFound { address } => CliError::Unreachable {
                address,
                reason: "no bridge answered".into(),
            },
            CoreError::Timeout { timeout_secs } => CliError::Timeout {
                seconds: timeout_secs,
            },
            CoreError::InvalidCredentials { message } => CliError::Unauthorized { message },
            CoreError::CertificateMismatch { bridge_id } => {
                CliError::CertificateMismatch { bridge_id }
            }
            CoreError::Authorization(AuthError::Timeout { timeout_secs }) => CliError::PushLink {
                reason: format!("link button was not pressed within {timeout_secs}s"),
            },
            CoreError::Authorization(AuthError::Cancelled) | CoreError::Cancelled => {
                CliError::Cancelled
            }
            CoreError::Authorization(other) => CliError::PushLink {
                reason: other.to_string(),
            },
            CoreError::InvalidModel { model } => CliError::Unsupported {
                what: format!("model {model}"),
            },
            CoreError::InvalidVersion { version } => CliError::Unsupported {
                what: format!("API version {version}"),
            },
            CoreError::NoGroupAvailable => CliError::NoGroup,
            CoreError::InvalidGroup { id } => CliError::GroupNotFound { id },
            CoreError::Busy => CliError::Busy,
            CoreError::InvalidState { operation, state } => CliError::InvalidState {
                operation: operation.into(),
                state,
            },
            CoreError::Storage { message } => CliError::Storage { message },
            CoreError::DecryptionFailure => CliError::Storage {
                message: "store could not be decrypted with the configured key".into(),
            },
            CoreError::Transport { message } => CliError::Stream { message },
            CoreError::Api { message, code } => CliError::Api { message, code },
            CoreError::Config { message } => CliError::Config { message },
            CoreError::Internal(message) => CliError::Internal(message),
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            ConfigError::UnknownProfile { name } => CliError::ProfileNotFound {
                name,
                available: "(see hueflux config show)".into(),
            },
            ConfigError::NoEncryptionKey { profile } => CliError::NoEncryptionKey { profile },
            ConfigError::Keyring(e) => CliError::Keyring {
                message: e.to_string(),
            },
            ConfigError::Io(e) => CliError::Io(e),
            other @ (ConfigError::Serialization(_) | ConfigError::Figment(_)) => {
                CliError::Config {
                    message: other.to_string(),
                }
            }
        }
    }
}
