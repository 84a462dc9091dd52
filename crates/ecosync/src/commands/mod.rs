//! Command dispatch: bridges CLI args -> engine calls -> output formatting.

pub mod config_cmd;
pub mod drain;
pub mod queue;
pub mod resolve;
pub mod run;
pub mod util;

use ecosync_core::{Connectivity, EngineConfig, SyncEngine};

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Dispatch an engine-bound command to the appropriate handler.
pub async fn dispatch(
    cmd: Command,
    config: EngineConfig,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match cmd {
        Command::Run(args) => run::handle(config, args, global).await,
        Command::Queue(args) => queue::handle(config, args, global).await,
        Command::Drain(args) => drain::handle(config, args, global).await,
        Command::Resolve(args) => resolve::handle(config, args, global).await,
        // Config and Completions are handled before dispatch
        Command::Config(_) | Command::Completions(_) => Err(CliError::Internal(
            "config and completions never reach the engine".into(),
        )),
    }
}

/// The CLI has no reachability check: it is online unless told otherwise.
pub(crate) fn go_online(engine: &SyncEngine, global: &GlobalOpts) {
    let connectivity = if global.offline {
        Connectivity::Offline
    } else {
        Connectivity::Online
    };
    engine.set_connectivity(connectivity);
}
