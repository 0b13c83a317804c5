use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use archi_core::error::{Error, Result};
use archi_core::iteration::{Iteration, IterationId};
use archi_core::sketch::{SketchModel, SketchRenderer};
use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, oneshot, watch};
use tracing::{debug, info, warn};

use crate::backend::GenerationBackend;
use crate::events::{self, LifecycleEvent};
use crate::history::HistoryStore;
use crate::poller::{JobPoller, PollConfig, PollOutcome, PollerHandle, PollerState};
use crate::session::SessionContext;

pub const DEFAULT_SKETCH_SCALE: f32 = 2.0;

#[derive(Debug, Clone, PartialEq)]
pub struct ControllerConfig {
    pub poll: PollConfig,
    /// Multiplier applied to the logical canvas when rasterizing.
    pub sketch_scale: f32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            poll: PollConfig::default(),
            sketch_scale: DEFAULT_SKETCH_SCALE,
        }
    }
}

struct Inner {
    backend: Arc<dyn GenerationBackend>,
    renderer: Arc<dyn SketchRenderer>,
    session: Arc<SessionContext>,
    config: ControllerConfig,
    history: Mutex<HistoryStore>,
    sketch: Mutex<SketchModel>,
    active: Mutex<Option<PollerHandle>>,
    next_instance: AtomicU64,
    events: broadcast::Sender<LifecycleEvent>,
}

/// Owns the sketch, the history and the single active job.
///
/// Cheap to clone; clones share state. Locks are only ever held for short
/// synchronous sections, never across an await.
#[derive(Clone)]
pub struct JobLifecycleController {
    inner: Arc<Inner>,
}

impl JobLifecycleController {
    pub fn new(
        backend: Arc<dyn GenerationBackend>,
        renderer: Arc<dyn SketchRenderer>,
        session: Arc<SessionContext>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                backend,
                renderer,
                session,
                config,
                history: Mutex::new(HistoryStore::new()),
                sketch: Mutex::new(SketchModel::new()),
                active: Mutex::new(None),
                next_instance: AtomicU64::new(0),
                events: events::channel(),
            }),
        }
    }

    /// Submit the current sketch with `prompt` and start polling for the result.
    ///
    /// Fails synchronously, without touching the backend, if the prompt is
    /// blank or the sketch can't be rasterized. Any job still running is
    /// cancelled. Must be called from within a tokio runtime.
    pub fn submit_design(&self, prompt: &str) -> Result<JobHandle> {
        if prompt.trim().is_empty() {
            return Err(Error::Validation("prompt must not be empty".into()));
        }

        let sketch = lock(&self.inner.sketch)
            .rasterize(self.inner.renderer.as_ref(), self.inner.config.sketch_scale)?;

        let instance = self.inner.next_instance.fetch_add(1, Ordering::Relaxed) + 1;
        let poller = JobPoller::new(
            instance,
            self.inner.backend.clone(),
            self.inner.config.poll.clone(),
        )
        .invalidated_by(self.inner.session.subscribe());
        let handle = poller.handle();

        if let Some(previous) = lock(&self.inner.active).replace(handle.clone()) {
            if previous.state().is_active() {
                info!("Job {} superseded by job {}", previous.instance(), instance);
            }
            previous.cancel();
        }

        let submitted_at = Utc::now();
        self.emit(LifecycleEvent::JobSubmitted {
            instance,
            prompt: prompt.to_string(),
        });

        let (tx, rx) = oneshot::channel();
        let controller = self.clone();
        let prompt = prompt.to_string();
        tokio::spawn(async move {
            let outcome = poller.run(prompt, sketch).await;
            let _ = tx.send(controller.reconcile(instance, outcome, submitted_at));
        });

        Ok(JobHandle {
            instance,
            submitted_at,
            poller: handle,
            outcome: rx,
        })
    }

    /// Replace the history with the service's list. Never affects a running job.
    pub async fn load_history(&self) -> Result<usize> {
        match self.inner.backend.list_history().await {
            Ok(iterations) => {
                let count = {
                    let mut history = lock(&self.inner.history);
                    history.replace_all(iterations);
                    history.len()
                };
                info!("Loaded {} iterations", count);
                self.emit(LifecycleEvent::HistoryLoaded { count });
                Ok(count)
            }
            Err(e) => {
                warn!("Failed to load history: {}", e);
                self.emit(LifecycleEvent::HistoryLoadFailed { error: e.clone() });
                Err(e)
            }
        }
    }

    /// Run `f` against the sketch, for input handlers.
    pub fn with_sketch<R>(&self, f: impl FnOnce(&mut SketchModel) -> R) -> R {
        f(&mut lock(&self.inner.sketch))
    }

    pub fn select(&self, id: Option<IterationId>) {
        lock(&self.inner.history).select(id);
    }

    pub fn selected(&self) -> Option<Iteration> {
        lock(&self.inner.history).selected().cloned()
    }

    pub fn selected_id(&self) -> Option<IterationId> {
        lock(&self.inner.history).selected_id().cloned()
    }

    pub fn history(&self) -> Vec<Iteration> {
        lock(&self.inner.history).entries().to_vec()
    }

    /// State of the most recent job, `Idle` if there never was one.
    pub fn active_state(&self) -> PollerState {
        lock(&self.inner.active)
            .as_ref()
            .map_or(PollerState::Idle, PollerHandle::state)
    }

    pub fn is_busy(&self) -> bool {
        self.active_state().is_active()
    }

    pub fn cancel_active(&self) {
        if let Some(handle) = lock(&self.inner.active).as_ref() {
            handle.cancel();
        }
    }

    /// Stop the running job and forget the credential.
    pub fn logout(&self) -> Result<()> {
        self.cancel_active();
        self.inner.session.clear()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.inner.events.subscribe()
    }

    pub fn session(&self) -> &Arc<SessionContext> {
        &self.inner.session
    }

    /// Apply a finished poller's outcome, unless a newer job took its place.
    fn reconcile(
        &self,
        instance: u64,
        outcome: PollOutcome,
        submitted_at: DateTime<Utc>,
    ) -> Result<Iteration> {
        // Held until the outcome is applied so a concurrent submit can't
        // interleave with it.
        let active = lock(&self.inner.active);
        let current = active
            .as_ref()
            .is_some_and(|h| h.instance() == instance && !h.is_cancelled());
        if !current {
            debug!("Dropping outcome of stale job {}", instance);
            self.emit(LifecycleEvent::JobCancelled { instance });
            return Err(Error::Cancelled);
        }

        match outcome {
            PollOutcome::Completed(iteration) => {
                {
                    let mut history = lock(&self.inner.history);
                    history.merge(iteration.clone());
                    history.select(Some(iteration.id.clone()));
                }
                lock(&self.inner.sketch).clear();

                let elapsed = Utc::now().signed_duration_since(submitted_at);
                info!(
                    "Iteration {} completed in {}s",
                    iteration.id,
                    elapsed.num_seconds()
                );
                self.emit(LifecycleEvent::JobCompleted {
                    instance,
                    iteration: iteration.clone(),
                });
                Ok(iteration)
            }
            PollOutcome::Failed(iteration) => {
                warn!("Iteration {} failed", iteration.id);
                self.emit(LifecycleEvent::JobFailed {
                    instance,
                    iteration: iteration.clone(),
                });
                PollOutcome::Failed(iteration).into_result()
            }
            PollOutcome::Errored(error) => {
                warn!("Job {} errored ({}): {}", instance, error.kind(), error);
                self.emit(LifecycleEvent::JobErrored {
                    instance,
                    error: error.clone(),
                });
                Err(error)
            }
            PollOutcome::Cancelled => {
                info!("Job {} cancelled", instance);
                self.emit(LifecycleEvent::JobCancelled { instance });
                Err(Error::Cancelled)
            }
        }
    }

    fn emit(&self, event: LifecycleEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }
}

impl std::fmt::Debug for JobLifecycleController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobLifecycleController")
            .field("session", &self.inner.session)
            .field("active", &self.active_state())
            .finish()
    }
}

/// One submitted job, as seen by the caller.
#[derive(Debug)]
pub struct JobHandle {
    instance: u64,
    submitted_at: DateTime<Utc>,
    poller: PollerHandle,
    outcome: oneshot::Receiver<Result<Iteration>>,
}

impl JobHandle {
    pub fn instance(&self) -> u64 {
        self.instance
    }

    pub fn submitted_at(&self) -> DateTime<Utc> {
        self.submitted_at
    }

    pub fn state(&self) -> PollerState {
        self.poller.state()
    }

    pub fn subscribe(&self) -> watch::Receiver<PollerState> {
        self.poller.subscribe()
    }

    pub fn cancel(&self) {
        self.poller.cancel();
    }

    /// Wait for the job to end. A failed job is a `Service` error; a cancelled
    /// or superseded one is `Cancelled`.
    pub async fn outcome(self) -> Result<Iteration> {
        self.outcome.await.unwrap_or(Err(Error::Cancelled))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
