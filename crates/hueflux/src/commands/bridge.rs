//! Bridge command handlers: connect, status, groups, select-group, reset.

use hueflux_core::{BridgeRecord, BridgeStatus, Group};
use serde::Serialize;
use tabled::Tabled;

use crate::cli::{ConnectArgs, GlobalOpts, GroupsArgs, ResetArgs};
use crate::error::CliError;
use crate::output;

use super::util::{self, FeedbackPrinter};

// ── Views ───────────────────────────────────────────────────────────

/// Serializable summary of a stored bridge. Secrets never leave the record.
#[derive(Debug, Serialize)]
struct BridgeView {
    profile: String,
    id: String,
    name: String,
    address: String,
    model: String,
    api_version: String,
    software: String,
    authorized: bool,
    certificate_pinned: bool,
    selected_group: Option<String>,
    groups: usize,
    status: String,
    store: String,
}

impl BridgeView {
    fn new(profile: &str, record: &BridgeRecord, status: BridgeStatus, store: String) -> Self {
        Self {
            profile: profile.to_owned(),
            id: record.id.clone(),
            name: record.name.clone(),
            address: record.address.clone(),
            model: record.model_id.clone(),
            api_version: record.api_version.clone(),
            software: record.sw_version.clone(),
            authorized: record.has_credentials(),
            certificate_pinned: record.certificate.is_some(),
            selected_group: record.selected_group.clone(),
            groups: record.groups.len(),
            status: status_text(status).into(),
            store,
        }
    }
}

fn status_text(status: BridgeStatus) -> &'static str {
    match status {
        BridgeStatus::Empty => "no bridge",
        BridgeStatus::InvalidModel => "unsupported model",
        BridgeStatus::InvalidVersion => "software update required",
        BridgeStatus::InvalidCredentials => "push-link required",
        BridgeStatus::NoGroupAvailable => "no entertainment area",
        BridgeStatus::InvalidGroupSelected => "select an entertainment area",
        BridgeStatus::Busy => "area in use by another app",
        BridgeStatus::Ready => "ready",
    }
}

fn bridge_detail(v: &BridgeView) -> String {
    let name = if v.name.is_empty() { "-" } else { &v.name };
    output::detail_lines(&[
        ("Profile", v.profile.clone()),
        ("Bridge", v.id.clone()),
        ("Name", name.to_owned()),
        ("Address", v.address.clone()),
        ("Model", v.model.clone()),
        ("API version", v.api_version.clone()),
        ("Software", v.software.clone()),
        ("Authorized", yes_no(v.authorized).into()),
        ("Certificate", pinned(v.certificate_pinned).into()),
        (
            "Selected area",
            v.selected_group.clone().unwrap_or_else(|| "-".into()),
        ),
        ("Areas", v.groups.to_string()),
        ("Status", v.status.clone()),
        ("Store", v.store.clone()),
    ])
}

fn yes_no(b: bool) -> &'static str {
    if b { "yes" } else { "no" }
}

fn pinned(b: bool) -> &'static str {
    if b { "pinned" } else { "not pinned" }
}

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct GroupRow {
    #[tabled(rename = "")]
    selected: String,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Class")]
    class: String,
    #[tabled(rename = "Lights")]
    lights: String,
    #[tabled(rename = "Streaming")]
    streaming: String,
}

impl GroupRow {
    fn new(group: &Group, selected: Option<&str>) -> Self {
        let streaming = match (&group.stream_owner, group.stream_active) {
            (Some(owner), true) => owner.clone(),
            (None, true) => "yes".into(),
            (_, false) => String::new(),
        };
        Self {
            selected: if selected == Some(group.id.as_str()) {
                "*".into()
            } else {
                String::new()
            },
            id: group.id.clone(),
            name: group.name.clone(),
            class: group.class.clone().unwrap_or_default(),
            lights: group.lights.len().to_string(),
            streaming,
        }
    }
}

// ── Handlers ────────────────────────────────────────────────────────

pub async fn connect(args: ConnectArgs, global: &GlobalOpts) -> Result<(), CliError> {
    // Streaming would end with the process; connect only prepares.
    let (resolved, controller) = util::controller(global, Some(false)).await?;
    let address = args
        .ip
        .as_deref()
        .or_else(|| util::first_use_address(&controller, &resolved.profile));

    let state = util::connect_and_wait(&controller, address, args.new, false, global).await?;
    tracing::info!(%state, "connect finished");

    let record = controller.bridge();
    if !global.quiet {
        let group = record
            .selected_group()
            .map_or_else(|| "-".to_owned(), |g| g.name.clone());
        eprintln!(
            "Connected to {} at {} (area: {group})",
            record.id, record.address
        );
    }
    Ok(())
}

pub async fn status(global: &GlobalOpts) -> Result<(), CliError> {
    let (resolved, controller) = util::controller(global, Some(false)).await?;
    let record = controller.bridge();
    let status = record.status(resolved.context.requirements());
    let view = BridgeView::new(
        &resolved.profile_name,
        &record,
        status,
        resolved.context.storage_path().display().to_string(),
    );
    let out = output::render_single(&global.output, &view, bridge_detail, |v| {
        v.status.clone()
    })?;
    output::print_output(&out, global.quiet);
    Ok(())
}

pub async fn groups(args: GroupsArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let (resolved, controller) = util::controller(global, Some(false)).await?;
    if args.refresh {
        // A pending selection still refreshes the list.
        let address = util::first_use_address(&controller, &resolved.profile);
        util::connect_and_wait(&controller, address, false, true, global).await?;
    }

    let record = controller.bridge();
    if record.is_empty() {
        return Err(CliError::NotPaired {
            profile: resolved.profile_name,
        });
    }
    let selected = record.selected_group.as_deref();
    let out = output::render_list(
        &global.output,
        &record.groups,
        |g| GroupRow::new(g, selected),
        |g| g.id.clone(),
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}

pub async fn select_group(id: &str, global: &GlobalOpts) -> Result<(), CliError> {
    let (resolved, controller) = util::controller(global, Some(false)).await?;
    if controller.bridge().is_empty() {
        return Err(CliError::NotPaired {
            profile: resolved.profile_name,
        });
    }

    util::connect_and_wait(&controller, None, false, true, global).await?;

    let printer = FeedbackPrinter::attach(controller.feedback(), global);
    let result = controller.select_group(id).await;
    let reason = printer.detach().await;
    util::require_ready(result?, reason.as_deref())?;

    if !global.quiet {
        let name = controller
            .bridge()
            .selected_group()
            .map_or_else(|| id.to_owned(), |g| g.name.clone());
        eprintln!("Streaming area set to {name}");
    }
    Ok(())
}

pub async fn reset(args: ResetArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let (resolved, controller) = util::controller(global, Some(false)).await?;
    let bridge = controller.bridge();
    let prompt = if args.bridge {
        if bridge.is_empty() {
            return Err(CliError::NotPaired {
                profile: resolved.profile_name,
            });
        }
        format!(
            "Forget the credentials of bridge {}? It will need a push-link again.",
            bridge.id
        )
    } else {
        format!(
            "Delete every stored bridge of profile '{}'?",
            resolved.profile_name
        )
    };
    if !util::confirm(&prompt, global.yes)? {
        return Ok(());
    }

    let printer = FeedbackPrinter::attach(controller.feedback(), global);
    let result = if args.bridge {
        controller.reset_bridge().await
    } else {
        controller.reset().await
    };
    printer.detach().await;
    result?;
    Ok(())
}
