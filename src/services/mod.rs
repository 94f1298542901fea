pub mod job_logger;
pub mod job_monitor;
pub mod metrics_history;
pub mod orchestrator;
pub mod process_registry;
pub mod stats_collector;
pub mod system_reader;
pub mod validators;

pub use orchestrator::{JobView, Orchestrator, OrchestratorConfig};
