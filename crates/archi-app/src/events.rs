use archi_core::error::Error;
use archi_core::iteration::Iteration;
use tokio::sync::broadcast;

pub const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    JobSubmitted {
        instance: u64,
        prompt: String,
    },
    JobCompleted {
        instance: u64,
        iteration: Iteration,
    },
    JobFailed {
        instance: u64,
        iteration: Iteration,
    },
    JobErrored {
        instance: u64,
        error: Error,
    },
    JobCancelled {
        instance: u64,
    },

    HistoryLoaded {
        count: usize,
    },
    HistoryLoadFailed {
        error: Error,
    },
}

impl LifecycleEvent {
    /// Poller instance the event belongs to, if it is about a job.
    pub fn instance(&self) -> Option<u64> {
        match self {
            Self::JobSubmitted { instance, .. }
            | Self::JobCompleted { instance, .. }
            | Self::JobFailed { instance, .. }
            | Self::JobErrored { instance, .. }
            | Self::JobCancelled { instance } => Some(*instance),
            Self::HistoryLoaded { .. } | Self::HistoryLoadFailed { .. } => None,
        }
    }
}

pub(crate) fn channel() -> broadcast::Sender<LifecycleEvent> {
    broadcast::channel(EVENT_CAPACITY).0
}
