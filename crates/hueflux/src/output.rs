//! Output formatting: table, JSON, plain.
//!
//! Renders data in the format selected by `--output`. Table uses `tabled`,
//! structured formats use serde, plain emits one identifier per line.
//! Feedback events go to stderr so stdout stays machine readable.

use std::io::{self, IsTerminal, Write};

use hueflux_core::{FeedbackEvent, FeedbackId};
use owo_colors::OwoColorize;
use tabled::{Table, Tabled, settings::Style};

use crate::cli::{ColorMode, OutputFormat};
use crate::error::CliError;

// ── Color helpers ────────────────────────────────────────────────────

/// Determine whether color output should be enabled.
pub fn should_color(mode: &ColorMode) -> bool {
    match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => io::stderr().is_terminal() && std::env::var("NO_COLOR").is_err(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tone {
    Progress,
    Success,
    Attention,
    Failure,
}

fn tone(id: FeedbackId) -> Tone {
    match id {
        FeedbackId::FinishSearchBridgesFound
        | FeedbackId::FinishAuthorizingAuthorized
        | FeedbackId::DoneCompleted
        | FeedbackId::DoneReset
        | FeedbackId::BridgeConnected
        | FeedbackId::StreamingConnected => Tone::Success,
        FeedbackId::PressPushLink
        | FeedbackId::SelectGroup
        | FeedbackId::NoGroupAvailable
        | FeedbackId::DoneActionRequired
        | FeedbackId::BridgeBusy
        | FeedbackId::DoneAborted
        | FeedbackId::BridgeChanged
        | FeedbackId::GroupListUpdated
        | FeedbackId::LightsUpdated => Tone::Attention,
        FeedbackId::BridgeNotFound
        | FeedbackId::NoBridgeFound
        | FeedbackId::FinishAuthorizingFailed
        | FeedbackId::FinishRetrievingFailed
        | FeedbackId::InvalidVersion
        | FeedbackId::InvalidModel
        | FeedbackId::InvalidCredentials
        | FeedbackId::BridgeDisconnected
        | FeedbackId::StreamingDisconnected => Tone::Failure,
        FeedbackId::StartSearching
        | FeedbackId::StartAuthorizing
        | FeedbackId::UserProcedureStarted
        | FeedbackId::UserProcedureFinished
        | FeedbackId::GroupLightStateUpdated => Tone::Progress,
    }
}

/// Events worth showing without `-v`; the rest only bracket procedures.
pub fn is_noteworthy(event: &FeedbackEvent) -> bool {
    !matches!(
        event.id,
        FeedbackId::UserProcedureStarted | FeedbackId::UserProcedureFinished
    )
}

/// One stderr line for a feedback event.
pub fn feedback_line(event: &FeedbackEvent, color: bool) -> String {
    let tone = tone(event.id);
    let marker = match tone {
        Tone::Progress => "·",
        Tone::Success => "✓",
        Tone::Attention => "!",
        Tone::Failure => "✗",
    };
    let text = format!("{marker} {}", event.user_message);
    if !color {
        return text;
    }
    match tone {
        Tone::Progress => text.dimmed().to_string(),
        Tone::Success => text.green().to_string(),
        Tone::Attention => text.yellow().bold().to_string(),
        Tone::Failure => text.red().to_string(),
    }
}

// ── Render dispatchers ───────────────────────────────────────────────

/// Render a list of serde-serializable + tabled items in the chosen format.
///
/// - `table`: uses the `Tabled` derive to build a pretty table
/// - `json` / `json-compact`: serializes the original data via serde
/// - `plain`: calls `id_fn` on each item to emit one identifier per line
pub fn render_list<T, R>(
    format: &OutputFormat,
    data: &[T],
    to_row: impl Fn(&T) -> R,
    id_fn: impl Fn(&T) -> String,
) -> Result<String, CliError>
where
    T: serde::Serialize,
    R: Tabled,
{
    Ok(match format {
        OutputFormat::Table => {
            let rows: Vec<R> = data.iter().map(to_row).collect();
            render_table(&rows)
        }
        OutputFormat::Json => serde_json::to_string_pretty(data)?,
        OutputFormat::JsonCompact => serde_json::to_string(data)?,
        OutputFormat::Plain => data.iter().map(&id_fn).collect::<Vec<_>>().join("\n"),
    })
}

/// Render a single serde-serializable item in the chosen format.
///
/// Table rendering uses a custom `detail_fn` that returns a pre-formatted
/// string, since single-item detail views don't use `Tabled` derive.
pub fn render_single<T>(
    format: &OutputFormat,
    data: &T,
    detail_fn: impl Fn(&T) -> String,
    id_fn: impl Fn(&T) -> String,
) -> Result<String, CliError>
where
    T: serde::Serialize,
{
    Ok(match format {
        OutputFormat::Table => detail_fn(data),
        OutputFormat::Json => serde_json::to_string_pretty(data)?,
        OutputFormat::JsonCompact => serde_json::to_string(data)?,
        OutputFormat::Plain => id_fn(data),
    })
}

/// Print the rendered output to stdout, respecting quiet mode.
pub fn print_output(output: &str, quiet: bool) {
    if quiet || output.is_empty() {
        return;
    }
    let mut stdout = io::stdout().lock();
    let _ = writeln!(stdout, "{output}");
}

/// Aligned `key: value` lines for detail views.
pub fn detail_lines(pairs: &[(&str, String)]) -> String {
    let width = pairs.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
    pairs
        .iter()
        .map(|(k, v)| format!("{k:<width$}  {v}"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_table<R: Tabled>(rows: &[R]) -> String {
    Table::new(rows).with(Style::rounded()).to_string()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use hueflux_core::RequestType;

    use super::*;

    #[derive(serde::Serialize, Tabled)]
    struct Item {
        id: String,
        name: String,
    }

    fn items() -> Vec<Item> {
        vec![
            Item {
                id: "1".into(),
                name: "Living room".into(),
            },
            Item {
                id: "2".into(),
                name: "Office".into(),
            },
        ]
    }

    fn render(format: &OutputFormat) -> String {
        render_list(
            format,
            &items(),
            |i| Item {
                id: i.id.clone(),
                name: i.name.clone(),
            },
            |i| i.id.clone(),
        )
        .unwrap()
    }

    #[test]
    fn plain_lists_one_id_per_line() {
        assert_eq!(render(&OutputFormat::Plain), "1\n2");
    }

    #[test]
    fn compact_json_is_one_line() {
        let out = render(&OutputFormat::JsonCompact);
        assert_eq!(
            out,
            r#"[{"id":"1","name":"Living room"},{"id":"2","name":"Office"}]"#
        );
    }

    #[test]
    fn table_contains_headers_and_rows() {
        let out = render(&OutputFormat::Table);
        assert!(out.contains("name"));
        assert!(out.contains("Office"));
    }

    #[test]
    fn detail_lines_align_keys() {
        let out = detail_lines(&[("ID", "a".into()), ("Address", "b".into())]);
        assert_eq!(out, "ID       a\nAddress  b");
    }

    #[test]
    fn uncolored_feedback_uses_markers() {
        let event = FeedbackEvent::new(FeedbackId::PressPushLink, RequestType::User);
        assert_eq!(
            feedback_line(&event, false),
            "! Press the link button on the bridge"
        );
        let done = FeedbackEvent::new(FeedbackId::DoneCompleted, RequestType::User);
        assert_eq!(feedback_line(&done, false), "✓ Connected");
    }
}
