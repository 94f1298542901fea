use crate::cli::CommandArgs;
use crate::services::Orchestrator;
use std::sync::Arc;
use tokio::runtime::Handle;

/// Shared by every HTTP worker. Each component guards its own state, so no
/// outer lock is needed.
pub type AppState = Arc<Orchestrator>;

pub fn new_state(args: &CommandArgs) -> std::io::Result<AppState> {
    let orchestrator = Orchestrator::new(Handle::current(), args.orchestrator_config())?;
    Ok(Arc::new(orchestrator))
}
