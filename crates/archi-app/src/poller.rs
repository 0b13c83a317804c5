use std::sync::Arc;
use std::time::Duration;

use archi_core::error::Error;
use archi_core::iteration::{Iteration, IterationId, IterationStatus};
use archi_core::sketch::SketchImage;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::backend::GenerationBackend;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollConfig {
    /// Delay before each status check.
    pub interval: Duration,
    /// Give up after this many pending answers. `None` polls until the job ends.
    pub max_attempts: Option<u32>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_attempts: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    Submitting,
    Polling { job_id: IterationId, attempts: u32 },
    Completed(Iteration),
    Failed(Iteration),
    Errored(Error),
}

impl PollerState {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Submitting | Self::Polling { .. })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed(_) | Self::Failed(_) | Self::Errored(_))
    }

    pub fn job_id(&self) -> Option<&IterationId> {
        match self {
            Self::Polling { job_id, .. } => Some(job_id),
            Self::Completed(iteration) | Self::Failed(iteration) => Some(&iteration.id),
            Self::Idle | Self::Submitting | Self::Errored(_) => None,
        }
    }
}

/// How one poller instance ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Completed(Iteration),
    Failed(Iteration),
    Errored(Error),
    Cancelled,
}

impl PollOutcome {
    /// Collapse into a result. A job the service marked failed is a service error.
    pub fn into_result(self) -> archi_core::Result<Iteration> {
        match self {
            Self::Completed(iteration) => Ok(iteration),
            Self::Failed(iteration) => Err(Error::Service(format!(
                "generation failed for iteration {}",
                iteration.id
            ))),
            Self::Errored(e) => Err(e),
            Self::Cancelled => Err(Error::Cancelled),
        }
    }

    fn state(&self) -> PollerState {
        match self {
            Self::Completed(iteration) => PollerState::Completed(iteration.clone()),
            Self::Failed(iteration) => PollerState::Failed(iteration.clone()),
            Self::Errored(e) => PollerState::Errored(e.clone()),
            Self::Cancelled => PollerState::Idle,
        }
    }
}

struct Shared {
    state: watch::Sender<PollerState>,
    cancelled: watch::Sender<bool>,
}

impl Shared {
    /// Publish `next` unless the instance was cancelled. Both flags are
    /// touched under the state lock, so a cancel can never be overwritten.
    fn publish(&self, next: PollerState) -> bool {
        self.state.send_if_modified(|state| {
            if *self.cancelled.borrow() {
                return false;
            }
            *state = next;
            true
        })
    }

    fn cancel(&self) {
        self.state.send_modify(|state| {
            self.cancelled.send_replace(true);
            *state = PollerState::Idle;
        });
    }

    fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow()
    }
}

/// Cloneable view of a running poller: watch its state or cancel it.
#[derive(Clone)]
pub struct PollerHandle {
    instance: u64,
    shared: Arc<Shared>,
}

impl PollerHandle {
    pub fn instance(&self) -> u64 {
        self.instance
    }

    pub fn state(&self) -> PollerState {
        self.shared.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PollerState> {
        self.shared.state.subscribe()
    }

    /// Stop the instance. No `fetch_job` is issued afterwards and a fetch
    /// already in flight has its answer discarded.
    pub fn cancel(&self) {
        if !self.shared.is_cancelled() {
            debug!(instance = self.instance, "Cancelling job poller");
        }
        self.shared.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.is_cancelled()
    }
}

impl std::fmt::Debug for PollerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollerHandle")
            .field("instance", &self.instance)
            .field("state", &self.state())
            .finish()
    }
}

/// Drives one generation job from submission to a terminal state.
///
/// A poller is single use: [`JobPoller::run`] consumes it, and every new
/// submission gets a fresh instance with its own cancellation flag.
pub struct JobPoller {
    instance: u64,
    backend: Arc<dyn GenerationBackend>,
    config: PollConfig,
    shared: Arc<Shared>,
    session: Option<(watch::Receiver<u64>, u64)>,
}

impl JobPoller {
    pub fn new(instance: u64, backend: Arc<dyn GenerationBackend>, config: PollConfig) -> Self {
        let (state, _) = watch::channel(PollerState::Idle);
        let (cancelled, _) = watch::channel(false);
        Self {
            instance,
            backend,
            config,
            shared: Arc::new(Shared { state, cancelled }),
            session: None,
        }
    }

    /// Cancel this instance as soon as the session epoch moves.
    pub fn invalidated_by(mut self, session: watch::Receiver<u64>) -> Self {
        let epoch = *session.borrow();
        self.session = Some((session, epoch));
        self
    }

    pub fn instance(&self) -> u64 {
        self.instance
    }

    pub fn handle(&self) -> PollerHandle {
        PollerHandle {
            instance: self.instance,
            shared: self.shared.clone(),
        }
    }

    pub async fn run(mut self, prompt: String, sketch: SketchImage) -> PollOutcome {
        if !self.shared.publish(PollerState::Submitting) {
            return PollOutcome::Cancelled;
        }

        let created = self.backend.create_job(&prompt, &sketch).await;
        if self.stale() {
            return PollOutcome::Cancelled;
        }
        let job_id = match created {
            Ok(id) => id,
            Err(e) => {
                warn!(instance = self.instance, "Job submission failed: {}", e);
                return self.finish(PollOutcome::Errored(e));
            }
        };

        info!(instance = self.instance, "Submitted iteration {}", job_id);
        let mut attempts = 0;
        if !self.shared.publish(PollerState::Polling { job_id: job_id.clone(), attempts }) {
            return PollOutcome::Cancelled;
        }

        loop {
            if !self.wait_tick().await {
                return PollOutcome::Cancelled;
            }

            attempts += 1;
            let fetched = self.backend.fetch_job(&job_id).await;
            if self.stale() {
                debug!(instance = self.instance, "Discarding poll result for {}", job_id);
                return PollOutcome::Cancelled;
            }

            let iteration = match fetched {
                Ok(iteration) => iteration,
                Err(e) => {
                    warn!(instance = self.instance, "Polling {} failed: {}", job_id, e);
                    return self.finish(PollOutcome::Errored(e));
                }
            };

            match iteration.status {
                IterationStatus::Pending => {
                    if self.config.max_attempts.is_some_and(|max| attempts >= max) {
                        let id = job_id.clone();
                        return self.finish(PollOutcome::Errored(Error::Timeout { id, attempts }));
                    }
                    debug!(instance = self.instance, attempts, "Iteration {} still pending", job_id);
                    if !self.shared.publish(PollerState::Polling { job_id: job_id.clone(), attempts }) {
                        return PollOutcome::Cancelled;
                    }
                }
                IterationStatus::Completed => {
                    info!(instance = self.instance, "Iteration {} completed", job_id);
                    return self.finish(PollOutcome::Completed(iteration));
                }
                IterationStatus::Failed => {
                    warn!(instance = self.instance, "Iteration {} failed", job_id);
                    return self.finish(PollOutcome::Failed(iteration));
                }
            }
        }
    }

    fn finish(&self, outcome: PollOutcome) -> PollOutcome {
        if self.shared.publish(outcome.state()) {
            outcome
        } else {
            PollOutcome::Cancelled
        }
    }

    /// True once this instance must not apply results: cancelled outright, or
    /// the credential changed underneath it.
    fn stale(&self) -> bool {
        let session_moved = self
            .session
            .as_ref()
            .is_some_and(|(rx, epoch)| *rx.borrow() != *epoch);
        if session_moved {
            info!(instance = self.instance, "Session changed, abandoning job");
            self.shared.cancel();
        }
        self.shared.is_cancelled()
    }

    /// Sleep one interval. Returns false if the instance went stale meanwhile.
    async fn wait_tick(&mut self) -> bool {
        let cancelled = self.shared.cancelled.subscribe();
        tokio::select! {
            _ = tokio::time::sleep(self.config.interval) => {}
            _ = wait_cancelled(cancelled) => {}
            _ = session_changed(self.session.as_mut().map(|(rx, _)| rx)) => {}
        }
        !self.stale()
    }
}

async fn wait_cancelled(mut rx: watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

async fn session_changed(rx: Option<&mut watch::Receiver<u64>>) {
    match rx {
        Some(rx) => {
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedBackend, completed, sketch_image};
    use tokio::time::Instant;

    fn poller(backend: &Arc<ScriptedBackend>, config: PollConfig) -> JobPoller {
        JobPoller::new(1, backend.clone(), config)
    }

    #[tokio::test(start_paused = true)]
    async fn test_completes_after_pending_ticks() {
        let backend = Arc::new(
            ScriptedBackend::new()
                .on_create(Ok("J1".into()))
                .on_fetch("J1", Ok(Iteration::pending("J1", "cabin")))
                .on_fetch("J1", Ok(completed("J1", "A minimalist cabin."))),
        );
        let poller = poller(&backend, PollConfig::default());
        let handle = poller.handle();

        let start = Instant::now();
        let outcome = poller.run("cabin".into(), sketch_image()).await;

        assert_eq!(outcome, PollOutcome::Completed(completed("J1", "A minimalist cabin.")));
        assert_eq!(start.elapsed(), Duration::from_secs(10));
        assert_eq!(backend.fetch_calls("J1"), 2);
        assert_eq!(backend.prompts(), vec!["cabin".to_string()]);
        assert!(matches!(handle.state(), PollerState::Completed(ref it) if it.id.as_str() == "J1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_submission_error_never_polls() {
        let backend = Arc::new(
            ScriptedBackend::new().on_create(Err(Error::Transport("connection refused".into()))),
        );
        let poller = poller(&backend, PollConfig::default());
        let handle = poller.handle();

        let outcome = poller.run("cabin".into(), sketch_image()).await;

        assert_eq!(outcome, PollOutcome::Errored(Error::Transport("connection refused".into())));
        assert_eq!(backend.create_calls(), 1);
        assert_eq!(backend.fetch_calls("J1"), 0);
        assert!(handle.state().is_terminal());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_error_is_terminal() {
        let backend = Arc::new(
            ScriptedBackend::new()
                .on_create(Ok("J1".into()))
                .on_fetch("J1", Err(Error::NotFound("J1".into()))),
        );

        let outcome = poller(&backend, PollConfig::default())
            .run("cabin".into(), sketch_image())
            .await;

        assert_eq!(outcome, PollOutcome::Errored(Error::NotFound("J1".into())));
        assert_eq!(backend.fetch_calls("J1"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_job() {
        let backend = Arc::new(
            ScriptedBackend::new()
                .on_create(Ok("J1".into()))
                .on_fetch("J1", Ok(Iteration::failed("J1", "cabin"))),
        );

        let outcome = poller(&backend, PollConfig::default())
            .run("cabin".into(), sketch_image())
            .await;

        assert_eq!(outcome, PollOutcome::Failed(Iteration::failed("J1", "cabin")));
        let err = outcome.into_result().unwrap_err();
        assert_eq!(err.kind(), "service");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_sleep_stops_polling() {
        let backend = Arc::new(ScriptedBackend::new().on_create(Ok("J1".into())));
        let poller = poller(&backend, PollConfig::default());
        let handle = poller.handle();
        let task = tokio::spawn(poller.run("cabin".into(), sketch_image()));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(
            handle.state(),
            PollerState::Polling { job_id: "J1".into(), attempts: 0 }
        );
        handle.cancel();

        assert_eq!(task.await.unwrap(), PollOutcome::Cancelled);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(backend.fetch_calls("J1"), 0);
        assert_eq!(handle.state(), PollerState::Idle);
        assert!(handle.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_result_is_discarded_after_cancel() {
        let backend = Arc::new(
            ScriptedBackend::new()
                .on_create(Ok("J1".into()))
                .on_fetch("J1", Ok(completed("J1", "late"))),
        );
        let gate = backend.gate("J1");
        let poller = poller(&backend, PollConfig::default());
        let handle = poller.handle();
        let task = tokio::spawn(poller.run("cabin".into(), sketch_image()));

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(backend.fetch_calls("J1"), 1);

        handle.cancel();
        gate.notify_one();

        assert_eq!(task.await.unwrap(), PollOutcome::Cancelled);
        assert_eq!(handle.state(), PollerState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_change_cancels() {
        let backend = Arc::new(ScriptedBackend::new().on_create(Ok("J1".into())));
        let (epoch, rx) = watch::channel(0u64);
        let poller = poller(&backend, PollConfig::default()).invalidated_by(rx);
        let handle = poller.handle();
        let task = tokio::spawn(poller.run("cabin".into(), sketch_image()));

        tokio::time::sleep(Duration::from_secs(1)).await;
        epoch.send_replace(1);

        assert_eq!(task.await.unwrap(), PollOutcome::Cancelled);
        assert_eq!(backend.fetch_calls("J1"), 0);
        assert!(handle.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let backend = Arc::new(ScriptedBackend::new().on_create(Ok("J1".into())));
        let config = PollConfig {
            interval: Duration::from_secs(1),
            max_attempts: Some(2),
        };

        let outcome = poller(&backend, config).run("cabin".into(), sketch_image()).await;

        assert_eq!(
            outcome,
            PollOutcome::Errored(Error::Timeout { id: "J1".into(), attempts: 2 })
        );
        assert_eq!(backend.fetch_calls("J1"), 2);
    }

    #[test]
    fn test_state_predicates() {
        assert!(PollerState::Submitting.is_active());
        assert!(!PollerState::Idle.is_active());
        assert!(PollerState::Errored(Error::Cancelled).is_terminal());
        let polling = PollerState::Polling { job_id: "J1".into(), attempts: 3 };
        assert_eq!(polling.job_id().map(|id| id.as_str()), Some("J1"));
    }
}
