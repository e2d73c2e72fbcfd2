//! Shared helpers for command handlers.

use std::io::{self, BufRead, IsTerminal, Write};
use std::sync::Arc;

use hueflux_core::{
    ConnectionResult, Controller, FeedbackBus, FeedbackEvent, FeedbackId, Operation,
    SubscriptionHandle,
};
use tokio::task::JoinHandle;

use crate::cli::GlobalOpts;
use crate::config::{self, Profile, Resolved};
use crate::error::CliError;
use crate::output;

// ── Controller setup ────────────────────────────────────────────────

/// Resolve the profile and build a network-backed controller with the
/// persisted bridge loaded.
pub async fn controller(
    global: &GlobalOpts,
    auto_start: Option<bool>,
) -> Result<(Resolved, Controller), CliError> {
    let resolved = config::resolve(global, auto_start)?;
    let controller = Controller::with_network(Arc::clone(&resolved.context))?;
    controller.load_bridge_info().await?;
    Ok((resolved, controller))
}

/// The profile's bridge address, used only while nothing is stored; a
/// manual address always push-links.
pub fn first_use_address<'a>(controller: &Controller, profile: &'a Profile) -> Option<&'a str> {
    if controller.bridge().is_empty() {
        profile.bridge.as_deref()
    } else {
        None
    }
}

/// Start the connect procedure matching the flags: `--new` searches,
/// an address (flag or profile) skips discovery, otherwise reconnect.
pub fn begin_connect(
    controller: &Controller,
    address: Option<&str>,
    new_bridge: bool,
) -> Result<Operation, CliError> {
    let op = if new_bridge {
        controller.connect_new_bridge()?
    } else if let Some(address) = address {
        controller.connect_with_manual_address(address)?
    } else {
        controller.connect()?
    };
    Ok(op)
}

/// Wait for `op`; Ctrl-C aborts the procedure and waits for it to settle.
pub async fn finish(controller: &Controller, op: Operation) -> ConnectionResult {
    let finished = op.finished();
    tokio::pin!(finished);
    tokio::select! {
        state = &mut finished => state,
        _ = tokio::signal::ctrl_c() => {
            controller.abort();
            finished.await
        }
    }
}

/// Connect and wait, turning anything short of ReadyToStart/Streaming into
/// an error explained by the feedback that led there. With
/// `allow_selection`, a bridge waiting for a group selection also passes.
pub async fn connect_and_wait(
    controller: &Controller,
    address: Option<&str>,
    new_bridge: bool,
    allow_selection: bool,
    global: &GlobalOpts,
) -> Result<ConnectionResult, CliError> {
    let printer = FeedbackPrinter::attach(controller.feedback(), global);
    let result = match begin_connect(controller, address, new_bridge) {
        Ok(op) => Ok(finish(controller, op).await),
        Err(e) => Err(e),
    };
    let reason = printer.detach().await;
    let state = result?;
    let awaiting_selection = state == ConnectionResult::ActionRequired
        && reason.as_ref().is_some_and(|e| e.id == FeedbackId::SelectGroup);
    if !(allow_selection && awaiting_selection) {
        require_ready(state, reason.as_deref())?;
    }
    Ok(state)
}

// ── Outcome mapping ─────────────────────────────────────────────────

/// Whether an event explains how a procedure ended.
fn is_reason(id: FeedbackId) -> bool {
    !matches!(
        id,
        FeedbackId::UserProcedureStarted
            | FeedbackId::UserProcedureFinished
            | FeedbackId::DoneCompleted
            | FeedbackId::DoneActionRequired
    )
}

/// Map a final state plus the last explaining event to a result.
pub fn require_ready(
    state: ConnectionResult,
    reason: Option<&FeedbackEvent>,
) -> Result<(), CliError> {
    let message = || reason.map(|e| e.user_message.clone()).unwrap_or_default();
    let detail = || {
        reason
            .map(|e| {
                if e.debug_message.is_empty() {
                    e.user_message.clone()
                } else {
                    e.debug_message.clone()
                }
            })
            .unwrap_or_default()
    };

    match state {
        ConnectionResult::ReadyToStart | ConnectionResult::Streaming => Ok(()),
        ConnectionResult::ActionRequired => Err(match reason.map(|e| e.id) {
            Some(FeedbackId::SelectGroup) => CliError::ActionRequired {
                message: message(),
                hint: "Run: hueflux groups, then hueflux select-group <ID>".into(),
            },
            Some(FeedbackId::NoGroupAvailable) => CliError::NoGroup,
            Some(FeedbackId::BridgeBusy) => CliError::BridgeBusy,
            Some(FeedbackId::InvalidModel | FeedbackId::InvalidVersion) => {
                CliError::Unsupported { what: message() }
            }
            Some(FeedbackId::FinishAuthorizingFailed) => CliError::ActionRequired {
                message: detail(),
                hint: "If the bridge was replaced, run: hueflux reset --bridge".into(),
            },
            _ => CliError::ActionRequired {
                message: message(),
                hint: "Run: hueflux status".into(),
            },
        }),
        _ => Err(match reason.map(|e| e.id) {
            Some(FeedbackId::NoBridgeFound) => CliError::NoBridge,
            Some(FeedbackId::BridgeNotFound | FeedbackId::FinishRetrievingFailed) => {
                CliError::Unreachable {
                    address: "the bridge".into(),
                    reason: detail(),
                }
            }
            Some(FeedbackId::FinishAuthorizingFailed) => CliError::PushLink { reason: detail() },
            Some(FeedbackId::InvalidCredentials) => CliError::Unauthorized { message: detail() },
            Some(FeedbackId::DoneAborted) => CliError::Cancelled,
            _ => CliError::NotConnected {
                state: state.to_string(),
            },
        }),
    }
}

// ── Feedback printing ───────────────────────────────────────────────

/// Prints feedback events to stderr while a command runs and remembers
/// the last one explaining an outcome.
pub struct FeedbackPrinter {
    bus: FeedbackBus,
    handle: SubscriptionHandle,
    task: JoinHandle<Option<Arc<FeedbackEvent>>>,
}

impl FeedbackPrinter {
    pub fn attach(bus: &FeedbackBus, global: &GlobalOpts) -> Self {
        let (handle, mut rx) = bus.subscribe_channel();
        let color = output::should_color(&global.color_mode);
        let quiet = global.quiet;
        let verbose = global.verbose > 0;

        let task = tokio::spawn(async move {
            let mut reason = None;
            while let Some(event) = rx.recv().await {
                if !quiet && (verbose || output::is_noteworthy(&event)) {
                    let mut line = output::feedback_line(&event, color);
                    if verbose && !event.debug_message.is_empty() {
                        line = format!("{line}  ({})", event.debug_message);
                    }
                    eprintln!("{line}");
                }
                if is_reason(event.id) {
                    reason = Some(event);
                }
            }
            reason
        });

        Self {
            bus: bus.clone(),
            handle,
            task,
        }
    }

    /// Stop printing; events already queued are still shown.
    pub async fn detach(self) -> Option<Arc<FeedbackEvent>> {
        self.bus.unsubscribe(self.handle);
        self.task.await.ok().flatten()
    }
}

// ── Prompts ─────────────────────────────────────────────────────────

/// Prompt for confirmation, auto-approving if `--yes` was passed.
pub fn confirm(message: &str, yes_flag: bool) -> Result<bool, CliError> {
    if yes_flag {
        return Ok(true);
    }
    if !io::stdin().is_terminal() {
        return Err(CliError::NonInteractiveRequiresYes {
            action: message.into(),
        });
    }
    let mut stderr = io::stderr().lock();
    write!(stderr, "{message} [y/N] ")?;
    stderr.flush()?;

    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes" | "Yes"))
}
