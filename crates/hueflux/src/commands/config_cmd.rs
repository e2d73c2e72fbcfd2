//! Config subcommand handlers.

use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts, KeyStorage};
use crate::config::{self, Config, Profile};
use crate::error::CliError;
use crate::output;

/// Bytes of entropy in a generated store key.
const GENERATED_KEY_BYTES: usize = 32;

const REDACTED: &str = "********";

// ── Helpers ─────────────────────────────────────────────────────────

fn prompt_err(e: impl std::fmt::Display) -> CliError {
    CliError::Validation {
        field: "interactive".into(),
        reason: format!("prompt failed: {e}"),
    }
}

fn generate_key() -> SecretString {
    let mut bytes = [0u8; GENERATED_KEY_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    SecretString::from(hex::encode(bytes))
}

/// Copy of `cfg` safe to print.
fn redacted(cfg: &Config) -> Config {
    let mut shown = cfg.clone();
    for profile in shown.profiles.values_mut() {
        if profile.storage.encryption_key.is_some() {
            profile.storage.encryption_key = Some(REDACTED.into());
        }
    }
    shown
}

#[derive(Debug, Serialize)]
struct Paths {
    profile: String,
    config: String,
    store: String,
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        // ── Init ────────────────────────────────────────────────────
        ConfigCommand::Init {
            bridge,
            key_storage,
            force,
        } => {
            let mut cfg = config::load_config()?;
            let profile_name = config::active_profile_name(global, &cfg);
            if cfg.profiles.contains_key(&profile_name) && !force {
                return Err(CliError::ProfileExists { name: profile_name });
            }

            let key = generate_key();
            let mut profile = Profile {
                bridge,
                ..Profile::default()
            };
            match key_storage {
                KeyStorage::Keyring => {
                    config::store_encryption_key(&profile_name, key.expose_secret())?;
                }
                KeyStorage::Config => {
                    profile.storage.encryption_key = Some(key.expose_secret().to_owned());
                }
            }

            let store = config::storage_path(&profile, &profile_name);
            cfg.profiles.insert(profile_name.clone(), profile);
            if cfg.default_profile.is_none() {
                cfg.default_profile = Some(profile_name.clone());
            }
            config::save_config(&cfg)?;
            tracing::info!(profile = %profile_name, "profile initialized");

            if !global.quiet {
                let where_key = match key_storage {
                    KeyStorage::Keyring => "system keyring",
                    KeyStorage::Config => "config file (plaintext)",
                };
                eprintln!(
                    "✓ Profile '{profile_name}' written to {}",
                    config::config_path().display()
                );
                eprintln!("  Encryption key stored in the {where_key}");
                if std::env::var_os(hueflux_config::ENCRYPTION_KEY_ENV).is_some() {
                    eprintln!(
                        "  Note: {} is set and takes precedence",
                        hueflux_config::ENCRYPTION_KEY_ENV
                    );
                }
                if store.exists() {
                    eprintln!(
                        "  The existing store at {} was written with another key; \
                         run `hueflux connect` to pair again",
                        store.display()
                    );
                }
                eprintln!("\n  Next: hueflux connect");
            }
            Ok(())
        }

        // ── Show ────────────────────────────────────────────────────
        ConfigCommand::Show => {
            let cfg = redacted(&config::load_config()?);
            let out = output::render_single(
                &global.output,
                &cfg,
                |c| toml::to_string_pretty(c).unwrap_or_else(|e| format!("# {e}")),
                |c| config::active_profile_name(global, c),
            )?;
            output::print_output(&out, global.quiet);
            Ok(())
        }

        // ── SetKey ──────────────────────────────────────────────────
        ConfigCommand::SetKey => {
            let cfg = config::load_config()?;
            let profile_name = config::active_profile_name(global, &cfg);
            config::profile(&cfg, &profile_name)?;

            let key = SecretString::from(
                rpassword::prompt_password("Encryption key: ").map_err(prompt_err)?,
            );
            config::store_encryption_key(&profile_name, key.expose_secret())?;

            if !global.quiet {
                eprintln!("✓ Encryption key stored in system keyring for '{profile_name}'");
            }
            Ok(())
        }

        // ── Path ────────────────────────────────────────────────────
        ConfigCommand::Path => {
            let cfg = config::load_config()?;
            let profile_name = config::active_profile_name(global, &cfg);
            let profile = config::profile(&cfg, &profile_name)?;
            let paths = Paths {
                config: config::config_path().display().to_string(),
                store: config::storage_path(&profile, &profile_name)
                    .display()
                    .to_string(),
                profile: profile_name,
            };
            let out = output::render_single(
                &global.output,
                &paths,
                |p| {
                    output::detail_lines(&[
                        ("Profile", p.profile.clone()),
                        ("Config", p.config.clone()),
                        ("Store", p.store.clone()),
                    ])
                },
                |p| p.config.clone(),
            )?;
            output::print_output(&out, global.quiet);
            Ok(())
        }
    }
}
