//! Task runtime — bounded workers for background jobs.
//!
//! Dialogues and model-list fetches run as tasks: a global semaphore bounds
//! concurrency, every task gets a [`CancelToken`], and a handle exposes
//! cancellation plus the task's result. `stop(wait = true)` drains in-flight
//! tasks; `stop(wait = false)` cancels and aborts them.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::JoinHandle;
use uuid::Uuid;

use pl_domain::cancel::CancelToken;
use pl_domain::config::ConfigStore;
use pl_domain::dialogue::{DialogueEvent, DialogueMode, DialogueSpec};
use pl_domain::error::Result;
use pl_engine::{DialogueEngine, DialogueOutcome, EVENT_CHANNEL_CAPACITY};
use pl_history::{formatted_topic, HistoryKind, HistoryRecord, HistoryStore};
use pl_providers::ChatClient;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Caller-side view of one submitted task.
pub struct TaskHandle<T> {
    pub id: Uuid,
    cancel: CancelToken,
    result: oneshot::Receiver<T>,
}

impl<T> TaskHandle<T> {
    /// Request cooperative cancellation. Idempotent; the task observes the
    /// flag within one network operation.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Wait for the task's result. `None` when the task was aborted or
    /// dropped before producing one.
    ///
    /// The future resolves on whatever executor the caller polls it from,
    /// so completion handling lands where the host wants it (a UI thread's
    /// dispatcher, the CLI's main task, a test).
    pub async fn await_result(self) -> Option<T> {
        self.result.await.ok()
    }
}

struct TaskEntry {
    label: String,
    cancel: CancelToken,
    join: JoinHandle<()>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Runtime
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Bounded pool of background workers.
pub struct TaskRuntime {
    semaphore: Arc<Semaphore>,
    tasks: Mutex<HashMap<Uuid, TaskEntry>>,
    max_workers: usize,
}

impl TaskRuntime {
    /// Create a runtime with at most `max_workers` concurrent tasks
    /// (clamped to 1..=20).
    pub fn new(max_workers: usize) -> Arc<Self> {
        let max_workers = max_workers.clamp(1, 20);
        Arc::new(Self {
            semaphore: Arc::new(Semaphore::new(max_workers)),
            tasks: Mutex::new(HashMap::new()),
            max_workers,
        })
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Currently registered (queued or running) tasks.
    pub fn active_tasks(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Submit a job. The closure receives the task's [`CancelToken`]; the
    /// job starts once a worker slot frees up.
    pub fn submit<T, F, Fut>(self: &Arc<Self>, label: &str, f: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce(CancelToken) -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        self.submit_with(label, CancelToken::new(), f)
    }

    /// Submit with an externally owned cancel token (used when the job
    /// itself already carries one, like a dialogue engine).
    fn submit_with<T, F, Fut>(
        self: &Arc<Self>,
        label: &str,
        cancel: CancelToken,
        f: F,
    ) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce(CancelToken) -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let id = Uuid::new_v4();
        let (result_tx, result_rx) = oneshot::channel();
        let semaphore = self.semaphore.clone();
        let task_cancel = cancel.clone();
        let runtime = Arc::downgrade(self);
        let span_label = label.to_owned();

        let join = tokio::spawn(async move {
            // Queued tasks wait here for a worker slot.
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return, // runtime dropped
            };
            if task_cancel.is_cancelled() {
                tracing::debug!(task = %span_label, %id, "task cancelled while queued");
            } else {
                let output = f(task_cancel).await;
                let _ = result_tx.send(output);
            }
            if let Some(runtime) = runtime.upgrade() {
                runtime.tasks.lock().remove(&id);
            }
        });

        let handle_cancel = cancel.clone();
        self.tasks.lock().insert(
            id,
            TaskEntry {
                label: label.to_owned(),
                cancel,
                join,
            },
        );
        tracing::debug!(task = %label, %id, "task submitted");

        TaskHandle {
            id,
            cancel: handle_cancel,
            result: result_rx,
        }
    }

    /// Cancel one task by id. Returns whether it was still registered.
    pub fn cancel(&self, id: Uuid) -> bool {
        match self.tasks.lock().get(&id) {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Shut the pool down.
    ///
    /// `wait = true` drains: in-flight tasks run to completion. `wait =
    /// false` cancels every task cooperatively and aborts what remains.
    pub async fn stop(&self, wait: bool) {
        let entries: Vec<TaskEntry> = {
            let mut tasks = self.tasks.lock();
            tasks.drain().map(|(_, entry)| entry).collect()
        };
        if entries.is_empty() {
            return;
        }
        tracing::info!(tasks = entries.len(), wait, "stopping task runtime");

        if wait {
            for entry in entries {
                let _ = entry.join.await;
            }
        } else {
            for entry in &entries {
                entry.cancel.cancel();
            }
            for entry in entries {
                entry.join.abort();
                let _ = entry.join.await;
            }
        }
    }

    /// Labels of registered tasks (diagnostics).
    pub fn task_labels(&self) -> Vec<String> {
        self.tasks.lock().values().map(|e| e.label.clone()).collect()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Built-in jobs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A hosted dialogue: the task handle plus its event channel.
pub struct DialogueTask {
    pub handle: TaskHandle<DialogueOutcome>,
    pub events: mpsc::Receiver<DialogueEvent>,
}

impl TaskRuntime {
    /// Fetch a provider's model list in the background.
    pub fn spawn_model_fetch(
        self: &Arc<Self>,
        client: Arc<dyn ChatClient>,
    ) -> TaskHandle<Result<Vec<String>>> {
        self.submit("fetch-models", move |cancel| async move {
            if cancel.is_cancelled() {
                return Err(pl_domain::error::Error::Cancelled);
            }
            client.refresh_models().await
        })
    }

    /// Host a dialogue run. Events stream on the returned channel; when the
    /// run ends, the transcript (whatever was produced, even after
    /// cancellation or an error) is persisted to `history`.
    pub fn spawn_dialogue(
        self: &Arc<Self>,
        spec: DialogueSpec,
        clients: Vec<Arc<dyn ChatClient>>,
        config: Option<&ConfigStore>,
        history: Option<Arc<HistoryStore>>,
        user_input: Option<mpsc::Receiver<String>>,
    ) -> Result<DialogueTask> {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let cancel = CancelToken::new();
        let mut engine =
            DialogueEngine::new(spec.clone(), clients, config, events_tx, cancel.clone())?;
        if let Some(input) = user_input {
            engine = engine.with_user_input(input);
        }

        let handle = self.submit_with("dialogue", cancel, move |_cancel| async move {
            let outcome = engine.run().await;
            if let Some(history) = history {
                if outcome.utterances() > 0 {
                    if let Err(e) = history.add(outcome_record(&spec, &outcome)) {
                        tracing::warn!(error = %e, "failed to persist dialogue history");
                    }
                }
            }
            outcome
        });

        Ok(DialogueTask {
            handle,
            events: events_rx,
        })
    }
}

/// Convert a finished dialogue into its history record.
fn outcome_record(spec: &DialogueSpec, outcome: &DialogueOutcome) -> HistoryRecord {
    let kind = match spec.mode {
        DialogueMode::Chat => HistoryKind::Chat,
        DialogueMode::Discussion => HistoryKind::Discussion,
        DialogueMode::Debate if spec.topics().len() > 1 => HistoryKind::Batch,
        DialogueMode::Debate => HistoryKind::Debate,
    };
    let first = &spec.agents[0];
    let second = spec.agents.get(1);
    HistoryRecord {
        topic: formatted_topic(kind, spec.topic.as_deref()),
        model1: first.model.clone(),
        model2: second.map(|a| a.model.clone()),
        api1: first.provider.to_string(),
        api2: second.map(|a| a.provider.to_string()).unwrap_or_default(),
        rounds: spec.rounds,
        chat_content: outcome.transcript(),
        start_time: outcome.started_at.clone(),
        end_time: outcome.ended_at.clone(),
        kind,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
