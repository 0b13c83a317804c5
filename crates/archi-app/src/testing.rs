//! Scripted in-process backend shared by the poller and controller tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use archi_core::error::{Error, Result};
use archi_core::iteration::{Iteration, IterationId, IterationOutputs};
use archi_core::sketch::{SketchImage, SketchRenderer, Stroke};
use async_trait::async_trait;
use tokio::sync::Notify;

use crate::backend::GenerationBackend;

#[derive(Default)]
pub(crate) struct ScriptedBackend {
    creates: Mutex<VecDeque<Result<IterationId>>>,
    fetches: Mutex<HashMap<IterationId, VecDeque<Result<Iteration>>>>,
    gates: Mutex<HashMap<IterationId, Arc<Notify>>>,
    history: Mutex<Option<Result<Vec<Iteration>>>>,
    prompts: Mutex<Vec<String>>,
    fetched: Mutex<Vec<IterationId>>,
    history_calls: AtomicUsize,
}

impl ScriptedBackend {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Queue the result of the next `create_job` call.
    pub(crate) fn on_create(self, result: Result<IterationId>) -> Self {
        self.creates.lock().unwrap().push_back(result);
        self
    }

    /// Queue the result of the next `fetch_job` call for this id. Once the
    /// queue runs dry the job keeps reporting pending.
    pub(crate) fn on_fetch(self, id: &str, result: Result<Iteration>) -> Self {
        self.fetches
            .lock()
            .unwrap()
            .entry(IterationId::from(id))
            .or_default()
            .push_back(result);
        self
    }

    pub(crate) fn on_history(self, result: Result<Vec<Iteration>>) -> Self {
        *self.history.lock().unwrap() = Some(result);
        self
    }

    /// Hold every `fetch_job` for `id` until the returned notify is signalled.
    pub(crate) fn gate(&self, id: &str) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        self.gates
            .lock()
            .unwrap()
            .insert(IterationId::from(id), notify.clone());
        notify
    }

    pub(crate) fn create_calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub(crate) fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub(crate) fn fetch_calls(&self, id: &str) -> usize {
        self.fetched
            .lock()
            .unwrap()
            .iter()
            .filter(|f| f.as_str() == id)
            .count()
    }

    pub(crate) fn history_calls(&self) -> usize {
        self.history_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    async fn create_job(&self, prompt: &str, _sketch: &SketchImage) -> Result<IterationId> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.creates
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(Error::Service("no scripted create".into())))
    }

    async fn fetch_job(&self, id: &IterationId) -> Result<Iteration> {
        self.fetched.lock().unwrap().push(id.clone());

        let gate = self.gates.lock().unwrap().get(id).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        self.fetches
            .lock()
            .unwrap()
            .get_mut(id)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Ok(Iteration::pending(id.clone(), "")))
    }

    async fn list_history(&self) -> Result<Vec<Iteration>> {
        self.history_calls.fetch_add(1, Ordering::SeqCst);
        self.history
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

pub(crate) fn completed(id: &str, narrative: &str) -> Iteration {
    Iteration::completed(
        id,
        "cabin",
        IterationOutputs {
            generated_image_url: format!("https://images.example/{id}.png"),
            narrative: narrative.to_string(),
            compliance_check: "No issues found.".to_string(),
        },
    )
}

pub(crate) fn sketch_image() -> SketchImage {
    SketchImage {
        bytes: vec![1, 2, 3],
        width: 1,
        height: 1,
        mime_type: "image/png",
        file_name: "sketch.png",
    }
}

/// Renderer that skips encoding and counts how often it was asked to draw.
#[derive(Default)]
pub(crate) struct StubRenderer {
    renders: AtomicUsize,
}

impl StubRenderer {
    pub(crate) fn renders(&self) -> usize {
        self.renders.load(Ordering::SeqCst)
    }
}

impl SketchRenderer for StubRenderer {
    fn render(&self, _strokes: &[Stroke], _scale: f32) -> Result<SketchImage> {
        self.renders.fetch_add(1, Ordering::SeqCst);
        Ok(sketch_image())
    }
}
