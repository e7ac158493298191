pub mod config;
pub mod diff;
pub mod engine;
pub mod error;
pub mod lock;
pub mod model;
pub mod orchestrator;
pub mod poller;
pub mod progress;
pub mod report;
pub mod scanner;
pub mod server;
pub mod sidecar;

pub use config::AppConfig;
pub use engine::{CheckResult, SyncEngine};
pub use error::Error;
pub use orchestrator::{SyncRun, SyncState};
pub use progress::{SilentReporter, SyncReporter};
pub use report::ReconciliationReport;
