//! Clap derive structures for the `hueflux` CLI.
//!
//! Defines the command tree, global flags, and shared value parsers.

use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use hueflux_core::Color;

// ── Top-Level CLI ────────────────────────────────────────────────────

/// hueflux -- stream light effects to a Hue entertainment area
#[derive(Debug, Parser)]
#[command(
    name = "hueflux",
    version,
    about = "Connect to a Hue bridge and stream entertainment effects",
    long_about = "Discovers Hue bridges on the local network, authorizes through the\n\
        bridge's link button and streams light effects to an entertainment area.\n\n\
        Credentials are kept in an encrypted per-profile store.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Configuration profile to use
    #[arg(long, short = 'p', env = "HUEFLUX_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "HUEFLUX_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color_mode: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Log line format on stderr
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Skip confirmation prompts
    #[arg(long, short = 'y', global = true)]
    pub yes: bool,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Connect to a bridge, push-linking it on first use
    #[command(alias = "c")]
    Connect(ConnectArgs),

    /// Show the stored bridge and its readiness
    #[command(alias = "st")]
    Status,

    /// List the entertainment areas of the stored bridge
    #[command(alias = "g")]
    Groups(GroupsArgs),

    /// Select the entertainment area to stream to
    SelectGroup {
        /// Group id as listed by `hueflux groups`
        id: String,
    },

    /// Stream a demo effect for a while
    Play(PlayArgs),

    /// Forget stored bridges or the active bridge's credentials
    Reset(ResetArgs),

    /// Manage CLI configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  BRIDGE
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct ConnectArgs {
    /// Bridge address; skips network discovery
    #[arg(long, conflicts_with = "new")]
    pub ip: Option<String>,

    /// Ignore the stored bridge and search for a new one
    #[arg(long)]
    pub new: bool,
}

#[derive(Debug, Args)]
pub struct GroupsArgs {
    /// Connect first so the list reflects the bridge's current groups
    #[arg(long)]
    pub refresh: bool,
}

#[derive(Debug, Args)]
pub struct ResetArgs {
    /// Keep the bridge but forget its credentials and certificate pin
    #[arg(long)]
    pub bridge: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  PLAY
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct PlayArgs {
    /// How long to stream, in seconds
    #[arg(long, default_value_t = 10)]
    pub seconds: u64,

    /// Base color as `r,g,b` with components in 0..=1 (or 0..=255)
    #[arg(long, default_value = "0.6,0.2,1.0", value_parser = parse_color)]
    pub color: Color,

    /// Interval between bursts, e.g. `750ms` or `2s`
    #[arg(long, default_value = "1s", value_parser = parse_duration)]
    pub burst_every: Duration,

    /// Group to stream to instead of the selected one
    #[arg(long)]
    pub group: Option<String>,
}

/// Parse `r,g,b`. Components above 1 are read as 8-bit values.
pub fn parse_color(s: &str) -> Result<Color, String> {
    let parts: Vec<f64> = s
        .split(',')
        .map(|p| {
            p.trim()
                .parse::<f64>()
                .map_err(|_| format!("'{p}' is not a number"))
        })
        .collect::<Result<_, _>>()?;
    let [r, g, b] = parts.as_slice() else {
        return Err(format!("expected three components, got {}", parts.len()));
    };
    if [r, g, b].iter().any(|c| !c.is_finite() || **c < 0.0 || **c > 255.0) {
        return Err("components must be within 0..=255".into());
    }
    let scale = if [r, g, b].iter().any(|c| **c > 1.0) {
        255.0
    } else {
        1.0
    };
    Ok(Color::rgb(r / scale, g / scale, b / scale))
}

fn parse_duration(s: &str) -> Result<Duration, String> {
    let d = humantime::parse_duration(s).map_err(|e| e.to_string())?;
    if d.is_zero() {
        return Err("must be greater than zero".into());
    }
    Ok(d)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  CONFIG
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Create a profile and generate its store encryption key
    Init {
        /// Bridge address to use instead of discovery
        #[arg(long)]
        bridge: Option<String>,

        /// Where to keep the generated encryption key
        #[arg(long, value_enum, default_value = "keyring")]
        key_storage: KeyStorage,

        /// Overwrite an existing profile
        #[arg(long)]
        force: bool,
    },

    /// Display current resolved configuration
    Show,

    /// Store an encryption key in the system keyring
    SetKey,

    /// Print the config file and credential store locations
    Path,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum KeyStorage {
    /// System keyring (recommended)
    Keyring,
    /// Plaintext in the config file
    Config,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  COMPLETIONS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_color_components_are_kept() {
        assert_eq!(parse_color("1,0.5,0"), Ok(Color::rgb(1.0, 0.5, 0.0)));
    }

    #[test]
    fn byte_color_components_are_scaled() {
        assert_eq!(parse_color("255, 0, 51"), Ok(Color::rgb(1.0, 0.0, 0.2)));
    }

    #[test]
    fn malformed_colors_are_rejected() {
        assert!(parse_color("1,0").is_err());
        assert!(parse_color("red,0,0").is_err());
        assert!(parse_color("1,0,300").is_err());
        assert!(parse_color("-1,0,0").is_err());
    }

    #[test]
    fn burst_interval_must_be_positive() {
        assert_eq!(parse_duration("750ms"), Ok(Duration::from_millis(750)));
        assert!(parse_duration("0s").is_err());
    }

    #[test]
    fn command_tree_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
