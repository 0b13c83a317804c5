pub mod backend;
pub mod config;
pub mod controller;
pub mod events;
pub mod history;
pub mod poller;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use backend::{GenerationBackend, HttpBackend};
pub use config::AppConfig;
pub use controller::{ControllerConfig, JobHandle, JobLifecycleController};
pub use events::LifecycleEvent;
pub use history::HistoryStore;
pub use poller::{JobPoller, PollConfig, PollOutcome, PollerHandle, PollerState};
pub use session::{Credential, SessionContext};
