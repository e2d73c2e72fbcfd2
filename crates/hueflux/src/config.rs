//! CLI configuration -- thin wrapper around `hueflux_config`.
//!
//! Adds profile resolution that respects `--profile` and the construction
//! of a validated core `Context` for bridge-bound commands.

use std::sync::Arc;

use hueflux_core::Context;

use crate::cli::GlobalOpts;
use crate::error::CliError;

// ── Re-exports from shared crate ────────────────────────────────────

pub use hueflux_config::{
    Config, Profile, config_path, load_config, save_config, storage_path,
    store_encryption_key,
};

// ── CLI-specific helpers ────────────────────────────────────────────

/// Resolve the active profile name from CLI flags and config.
pub fn active_profile_name(global: &GlobalOpts, config: &Config) -> String {
    config.profile_name(global.profile.as_deref()).to_owned()
}

/// Look up `name`, listing the configured profiles when it is missing.
pub fn profile(config: &Config, name: &str) -> Result<Profile, CliError> {
    config.profile(name).map_err(|_| CliError::ProfileNotFound {
        name: name.to_owned(),
        available: available_profiles(config),
    })
}

pub fn available_profiles(config: &Config) -> String {
    if config.profiles.is_empty() {
        return "(none)".into();
    }
    let mut names: Vec<_> = config.profiles.keys().map(String::as_str).collect();
    names.sort_unstable();
    names.join(", ")
}

/// Everything a bridge-bound command needs from the configuration.
pub struct Resolved {
    pub profile_name: String,
    pub profile: Profile,
    pub context: Arc<Context>,
}

/// Load the config, pick the active profile and build the core context.
///
/// `auto_start` overrides the profile's setting; one-shot commands manage
/// streaming themselves.
pub fn resolve(global: &GlobalOpts, auto_start: Option<bool>) -> Result<Resolved, CliError> {
    let cfg = load_config()?;
    let profile_name = active_profile_name(global, &cfg);
    let profile = profile(&cfg, &profile_name)?;

    let mut context_config =
        hueflux_config::profile_to_context_config(&profile, &profile_name, &cfg.defaults)?;
    if let Some(auto_start) = auto_start {
        context_config.auto_start = auto_start;
    }
    let context = Context::new(context_config)?;
    tracing::debug!(
        profile = %profile_name,
        store = %context.storage_path().display(),
        "context ready"
    );

    Ok(Resolved {
        profile_name,
        profile,
        context,
    })
}
