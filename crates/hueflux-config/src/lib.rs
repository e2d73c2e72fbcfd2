//! Shared configuration for the hueflux CLI and other front ends.
//!
//! TOML profiles, encryption-key resolution (env + keyring + plaintext),
//! platform paths and translation to `hueflux_core::ContextConfig`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use hueflux_core::ContextConfig;

/// Environment variable consulted for the store key when the profile
/// names none of its own.
pub const ENCRYPTION_KEY_ENV: &str = "HUEFLUX_ENCRYPTION_KEY";

const KEYRING_SERVICE: &str = "hueflux";
const STORE_FILE_NAME: &str = "bridge.json";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("profile '{name}' is not defined")]
    UnknownProfile { name: String },

    #[error("no encryption key configured for profile '{profile}'")]
    NoEncryptionKey { profile: String },

    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Profile used when none is given on the command line.
    pub default_profile: Option<String>,

    #[serde(default)]
    pub defaults: Defaults,

    /// Named bridge profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

impl Config {
    /// Name of the profile to use: `requested`, else `default_profile`,
    /// else "default".
    pub fn profile_name<'a>(&'a self, requested: Option<&'a str>) -> &'a str {
        requested
            .or(self.default_profile.as_deref())
            .unwrap_or("default")
    }

    /// Look up a profile. The "default" profile exists implicitly.
    pub fn profile(&self, name: &str) -> Result<Profile, ConfigError> {
        match self.profiles.get(name) {
            Some(profile) => Ok(profile.clone()),
            None if name == "default" => Ok(Profile::default()),
            None => Err(ConfigError::UnknownProfile { name: name.into() }),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,

    /// HTTP timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
            timeout: default_timeout(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}
fn default_timeout() -> u64 {
    10
}

/// A named bridge profile.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Profile {
    /// Application name sent to the bridge during push-link.
    #[serde(default = "default_app_name")]
    pub app_name: String,

    /// Device name sent to the bridge during push-link.
    #[serde(default = "default_device_name")]
    pub device_name: String,

    /// Bridge address used instead of discovery (e.g., "192.168.1.2").
    pub bridge: Option<String>,

    #[serde(default)]
    pub storage: Storage,

    #[serde(default)]
    pub stream: Stream,

    /// Seconds to wait for the link button.
    #[serde(default = "default_push_link_timeout")]
    pub push_link_timeout: u64,

    /// Seconds to search the network for bridges.
    #[serde(default = "default_discovery_timeout")]
    pub discovery_timeout: u64,

    /// Override the global HTTP timeout.
    pub timeout: Option<u64>,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
            device_name: default_device_name(),
            bridge: None,
            storage: Storage::default(),
            stream: Stream::default(),
            push_link_timeout: default_push_link_timeout(),
            discovery_timeout: default_discovery_timeout(),
            timeout: None,
        }
    }
}

fn default_app_name() -> String {
    "hueflux".into()
}
fn default_device_name() -> String {
    "cli".into()
}
fn default_push_link_timeout() -> u64 {
    30
}
fn default_discovery_timeout() -> u64 {
    5
}

/// Where and how the credential store is kept.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Storage {
    /// Store file; defaults to `<data dir>/<profile>/bridge.json`.
    pub path: Option<PathBuf>,

    /// Environment variable name containing the encryption key.
    pub encryption_key_env: Option<String>,

    /// Encryption key (plaintext, prefer keyring or env var).
    pub encryption_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Stream {
    #[serde(default = "default_update_frequency")]
    pub update_frequency_hz: u32,

    #[serde(default = "default_streaming_port")]
    pub port: u16,

    /// Start streaming as soon as a connect succeeds.
    #[serde(default = "default_auto_start")]
    pub auto_start: bool,
}

impl Default for Stream {
    fn default() -> Self {
        Self {
            update_frequency_hz: default_update_frequency(),
            port: default_streaming_port(),
            auto_start: default_auto_start(),
        }
    }
}

fn default_update_frequency() -> u32 {
    50
}
fn default_streaming_port() -> u16 {
    2100
}
fn default_auto_start() -> bool {
    true
}

// ── Paths ───────────────────────────────────────────────────────────

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("io", "hueflux", "hueflux")
}

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    project_dirs().map_or_else(
        || dirs_fallback(".config").join("config.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

/// Directory holding per-profile credential stores.
pub fn data_dir() -> PathBuf {
    project_dirs().map_or_else(
        || dirs_fallback(".local/share"),
        |dirs| dirs.data_dir().to_path_buf(),
    )
}

fn dirs_fallback(base: &str) -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(base);
    p.push("hueflux");
    p
}

/// Credential store file for `profile_name`.
pub fn storage_path(profile: &Profile, profile_name: &str) -> PathBuf {
    profile
        .storage
        .path
        .clone()
        .unwrap_or_else(|| data_dir().join(profile_name).join(STORE_FILE_NAME))
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from `path` + environment. A missing file yields the defaults.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("HUEFLUX_").split("__"));

    let config: Config = figment.extract()?;
    debug!(path = %path.display(), profiles = config.profiles.len(), "config loaded");
    Ok(config)
}

/// Load config, returning a default if it cannot be read.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Encryption key ──────────────────────────────────────────────────

fn keyring_entry(profile_name: &str) -> Result<keyring::Entry, keyring::Error> {
    keyring::Entry::new(KEYRING_SERVICE, &format!("{profile_name}/storage-key"))
}

/// Resolve the credential-store key from the chain: the profile's env
/// var, `HUEFLUX_ENCRYPTION_KEY`, the system keyring, then plaintext.
pub fn resolve_encryption_key(
    profile: &Profile,
    profile_name: &str,
) -> Result<SecretString, ConfigError> {
    // 1. Profile's encryption_key_env → env var lookup
    if let Some(ref env_name) = profile.storage.encryption_key_env {
        if let Ok(val) = std::env::var(env_name) {
            return Ok(SecretString::from(val));
        }
    }

    // 2. Well-known env var
    if let Ok(val) = std::env::var(ENCRYPTION_KEY_ENV) {
        return Ok(SecretString::from(val));
    }

    // 3. System keyring
    if let Ok(entry) = keyring_entry(profile_name) {
        if let Ok(secret) = entry.get_password() {
            return Ok(SecretString::from(secret));
        }
    }

    // 4. Plaintext in config
    if let Some(ref key) = profile.storage.encryption_key {
        return Ok(SecretString::from(key.clone()));
    }

    Err(ConfigError::NoEncryptionKey {
        profile: profile_name.into(),
    })
}

/// Store the credential-store key in the system keyring.
pub fn store_encryption_key(profile_name: &str, key: &str) -> Result<(), ConfigError> {
    if key.is_empty() {
        return Err(ConfigError::Validation {
            field: "encryption key".into(),
            reason: "must not be empty".into(),
        });
    }
    keyring_entry(profile_name)?.set_password(key)?;
    Ok(())
}

// ── Translation to the core context ─────────────────────────────────

/// Build a `ContextConfig` from a profile. `Context::new` does the
/// remaining validation.
pub fn profile_to_context_config(
    profile: &Profile,
    profile_name: &str,
    defaults: &Defaults,
) -> Result<ContextConfig, ConfigError> {
    if profile.push_link_timeout == 0 {
        return Err(ConfigError::Validation {
            field: "push_link_timeout".into(),
            reason: "must be at least one second".into(),
        });
    }
    let key = resolve_encryption_key(profile, profile_name)?;

    let mut config = ContextConfig::new(
        profile.app_name.clone(),
        profile.device_name.clone(),
        storage_path(profile, profile_name),
        key,
    );
    config.stream.update_frequency_hz = profile.stream.update_frequency_hz;
    config.stream.port = profile.stream.port;
    config.auto_start = profile.stream.auto_start;
    config.timing.push_link_timeout = Duration::from_secs(profile.push_link_timeout);
    config.timing.discovery_timeout = Duration::from_secs(profile.discovery_timeout);
    config.timing.http_timeout = Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout));
    Ok(config)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use figment::Jail;
    use pretty_assertions::assert_eq;
    use secrecy::ExposeSecret;

    use super::*;

    const SAMPLE: &str = r#"
        default_profile = "living_room"

        [defaults]
        timeout = 4

        [profiles.living_room]
        bridge = "192.168.1.2"
        device_name = "htpc"

        [profiles.living_room.storage]
        encryption_key = "plain-key"

        [profiles.living_room.stream]
        update_frequency_hz = 25
        auto_start = false
    "#;

    fn figment_err(e: &ConfigError) -> figment::Error {
        figment::Error::from(e.to_string())
    }

    #[test]
    fn file_values_override_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file("hueflux.toml", SAMPLE)?;
            let cfg = load_config_from(Path::new("hueflux.toml")).map_err(|e| figment_err(&e))?;

            assert_eq!(cfg.profile_name(None), "living_room");
            assert_eq!(cfg.defaults.timeout, 4);
            assert_eq!(cfg.defaults.output, "table");
            let profile = cfg.profile("living_room").unwrap();
            assert_eq!(profile.bridge.as_deref(), Some("192.168.1.2"));
            assert_eq!(profile.app_name, "hueflux");
            assert_eq!(profile.stream.update_frequency_hz, 25);
            assert_eq!(profile.stream.port, 2100);
            assert!(!profile.stream.auto_start);
            Ok(())
        });
    }

    #[test]
    fn environment_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file("hueflux.toml", SAMPLE)?;
            jail.set_env("HUEFLUX_PROFILES__LIVING_ROOM__BRIDGE", "10.0.0.9");
            jail.set_env("HUEFLUX_DEFAULTS__TIMEOUT", "7");
            let cfg = load_config_from(Path::new("hueflux.toml")).map_err(|e| figment_err(&e))?;

            assert_eq!(cfg.defaults.timeout, 7);
            let profile = cfg.profile("living_room").unwrap();
            assert_eq!(profile.bridge.as_deref(), Some("10.0.0.9"));
            Ok(())
        });
    }

    #[test]
    fn missing_file_gives_defaults() {
        Jail::expect_with(|_| {
            let cfg = load_config_from(Path::new("absent.toml")).map_err(|e| figment_err(&e))?;
            assert_eq!(cfg.profile_name(None), "default");
            assert!(cfg.profile("default").is_ok());
            assert!(matches!(
                cfg.profile("kitchen"),
                Err(ConfigError::UnknownProfile { .. })
            ));
            Ok(())
        });
    }

    #[test]
    fn profile_env_var_wins_over_plaintext() {
        Jail::expect_with(|jail| {
            jail.set_env("LIVING_ROOM_KEY", "from-env");
            let mut profile = Profile::default();
            profile.storage.encryption_key_env = Some("LIVING_ROOM_KEY".into());
            profile.storage.encryption_key = Some("plain-key".into());

            let key = resolve_encryption_key(&profile, "living_room").unwrap();
            assert_eq!(key.expose_secret(), "from-env");
            Ok(())
        });
    }

    #[test]
    fn well_known_env_var_is_second() {
        Jail::expect_with(|jail| {
            jail.set_env(ENCRYPTION_KEY_ENV, "global-key");
            let mut profile = Profile::default();
            profile.storage.encryption_key_env = Some("UNSET_KEY_VARIABLE".into());
            profile.storage.encryption_key = Some("plain-key".into());

            let key = resolve_encryption_key(&profile, "living_room").unwrap();
            assert_eq!(key.expose_secret(), "global-key");
            Ok(())
        });
    }

    #[test]
    fn context_config_carries_profile_settings() {
        Jail::expect_with(|jail| {
            jail.set_env(ENCRYPTION_KEY_ENV, "global-key");
            let mut profile = Profile::default();
            profile.storage.path = Some(PathBuf::from("/tmp/hueflux/bridge.json"));
            profile.stream.update_frequency_hz = 25;
            profile.push_link_timeout = 12;
            let defaults = Defaults {
                timeout: 3,
                ..Defaults::default()
            };

            let config = profile_to_context_config(&profile, "default", &defaults).unwrap();
            assert_eq!(config.app_name, "hueflux");
            assert_eq!(config.storage_path, PathBuf::from("/tmp/hueflux/bridge.json"));
            assert_eq!(config.stream.update_frequency_hz, 25);
            assert_eq!(config.timing.push_link_timeout, Duration::from_secs(12));
            assert_eq!(config.timing.http_timeout, Duration::from_secs(3));
            assert!(config.auto_start);
            Ok(())
        });
    }

    #[test]
    fn zero_push_link_timeout_is_rejected() {
        let profile = Profile {
            push_link_timeout: 0,
            ..Profile::default()
        };
        let err = profile_to_context_config(&profile, "default", &Defaults::default());
        assert!(matches!(err, Err(ConfigError::Validation { .. })));
    }

    #[test]
    fn default_storage_path_is_per_profile() {
        let path = storage_path(&Profile::default(), "office");
        assert!(path.ends_with("office/bridge.json"));
    }

    #[test]
    fn config_round_trips_through_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut cfg = Config::default();
        cfg.profiles.insert(
            "den".into(),
            Profile {
                bridge: Some("192.168.1.7".into()),
                ..Profile::default()
            },
        );

        save_config_to(&cfg, &path).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("[profiles.den]"));
        assert!(written.contains("bridge = \"192.168.1.7\""));
    }
}
