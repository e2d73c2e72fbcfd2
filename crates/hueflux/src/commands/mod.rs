//! Command dispatch: bridges CLI args -> controller calls -> output formatting.

pub mod bridge;
pub mod config_cmd;
pub mod play;
pub mod util;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Dispatch a bridge-bound command to the appropriate handler.
pub async fn dispatch(cmd: Command, global: &GlobalOpts) -> Result<(), CliError> {
    match cmd {
        Command::Connect(args) => bridge::connect(args, global).await,
        Command::Status => bridge::status(global).await,
        Command::Groups(args) => bridge::groups(args, global).await,
        Command::SelectGroup { id } => bridge::select_group(&id, global).await,
        Command::Play(args) => play::handle(args, global).await,
        Command::Reset(args) => bridge::reset(args, global).await,
        // Config and Completions are handled before dispatch
        Command::Config(_) | Command::Completions(_) => Err(CliError::Internal(
            "config and completions are not bridge commands".into(),
        )),
    }
}
