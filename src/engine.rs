// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Worker Engine (§4.6): the node's main loop. Registers with the
//! registry, then runs three concurrent loops for the node's lifetime —
//! heartbeat, task dispatch, and control-message handling — until
//! [`Engine::shutdown`] is called, at which point it drains in-flight
//! tasks before unregistering.

use std::{
    collections::BTreeMap,
    path::PathBuf,
    sync::{
        Arc,
        Mutex as StdMutex,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
    time::Duration,
};

use dashmap::DashSet;
use tokio::sync::{Mutex as AsyncMutex, Notify, Semaphore};
use tokio::task::JoinSet;

use crate::{
    accuracy::accuracy_ratio,
    cfg::config::Config,
    codec::{self, TaskTranslationInput},
    registry::{Registry, RegistryError},
    resource::ResourceProbe,
    store::{Store, StatusUpdate, StoreError},
    task::{NodeRecord, NodeStatus, TaskPayload, TaskStatus},
    transcribe::Transcriber,
    translate::{TranslateError, TranslationRouter},
};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
}

/// Outcome of running one task through the pipeline. `Cancelled` is kept
/// distinct from `Failed` so the caller skips writing a FAILED status
/// over a cancellation already recorded by the control loop.
enum TaskOutcome {
    Completed,
    Cancelled,
    Failed(String),
}

pub struct Engine {
    cfg: Config,
    registry: Arc<dyn Registry>,
    store: Arc<dyn Store>,
    transcriber: Arc<dyn Transcriber>,
    translator: Arc<TranslationRouter>,
    resource_probe: Arc<ResourceProbe>,
    result_dir: PathBuf,

    transcribe_semaphore: Arc<Semaphore>,
    cancelled_tasks: Arc<DashSet<String>>,
    active_task_count: Arc<AtomicU32>,
    running: Arc<AtomicBool>,
    shutdown_notify: Arc<Notify>,
    status: StdMutex<NodeStatus>,
    tasks: AsyncMutex<JoinSet<()>>,
}

impl Engine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: Config,
        registry: Arc<dyn Registry>,
        store: Arc<dyn Store>,
        transcriber: Arc<dyn Transcriber>,
        translator: Arc<TranslationRouter>,
        resource_probe: Arc<ResourceProbe>,
        result_dir: PathBuf,
    ) -> Arc<Self> {
        let transcribe_concurrency = cfg.transcribe_concurrency;
        Arc::new(Self {
            cfg,
            registry,
            store,
            transcriber,
            translator,
            resource_probe,
            result_dir,
            transcribe_semaphore: Arc::new(Semaphore::new(transcribe_concurrency)),
            cancelled_tasks: Arc::new(DashSet::new()),
            active_task_count: Arc::new(AtomicU32::new(0)),
            running: Arc::new(AtomicBool::new(true)),
            shutdown_notify: Arc::new(Notify::new()),
            status: StdMutex::new(NodeStatus::Online),
            tasks: AsyncMutex::new(JoinSet::new()),
        })
    }

    /// Registers the node and runs the heartbeat, dispatch, and control
    /// loops until [`Engine::shutdown`] stops them.
    pub async fn run(self: &Arc<Self>) -> Result<(), EngineError> {
        let initial = self.build_record(NodeStatus::Online).await;
        self.publish_record(&initial).await?;
        tracing::info!(node_id = %self.cfg.node_id, "node registered");

        let heartbeat = tokio::spawn(Arc::clone(self).heartbeat_loop());
        let dispatch = tokio::spawn(Arc::clone(self).dispatch_loop());
        let control = tokio::spawn(Arc::clone(self).control_loop());

        let _ = tokio::join!(heartbeat, dispatch, control);
        Ok(())
    }

    /// Current number of in-flight task handlers. Exposed for monitoring
    /// and for tests asserting Testable Property 8 (the concurrency
    /// bound is never exceeded).
    pub fn active_task_count(&self) -> u32 {
        self.active_task_count.load(Ordering::Relaxed)
    }

    async fn build_record(&self, status: NodeStatus) -> NodeRecord {
        NodeRecord {
            node_id: self.cfg.node_id.clone(),
            host: self.cfg.host.clone(),
            port: self.cfg.port,
            status,
            max_concurrent_tasks: self.cfg.max_concurrent_tasks,
            active_task_count: self.active_task_count.load(Ordering::Relaxed),
            resources: self.resource_probe.sample().await,
            last_heartbeat: chrono::Utc::now(),
        }
    }

    /// Publishes a record and keeps `node_rankings` consistent with it:
    /// present with a fresh score while online, absent otherwise (§4.2).
    async fn publish_record(&self, record: &NodeRecord) -> Result<(), RegistryError> {
        self.registry.publish(record, self.cfg.heartbeat_interval).await?;
        if record.status == NodeStatus::Online {
            self.registry.update_ranking(&record.node_id, record.score()).await?;
        } else {
            self.registry.remove_ranking(&record.node_id).await?;
        }
        Ok(())
    }

    async fn heartbeat_loop(self: Arc<Self>) {
        while self.running.load(Ordering::Relaxed) {
            let status = *self.status.lock().expect("node status mutex poisoned");
            let record = self.build_record(status).await;
            match self.publish_record(&record).await {
                Ok(()) => {
                    tracing::info!(node_id = %self.cfg.node_id, "heartbeat sent");
                    tokio::time::sleep(self.cfg.heartbeat_interval).await;
                },
                Err(e) => {
                    tracing::error!(error = %e, "heartbeat failed");
                    tokio::time::sleep(Duration::from_secs(5)).await;
                },
            }
        }
    }

    async fn control_loop(self: Arc<Self>) {
        while self.running.load(Ordering::Relaxed) {
            match self.registry.pop_control_message(&self.cfg.node_id).await {
                Ok(crate::task::ControlMessage::CancelTask { task_id }) => {
                    tracing::info!(task_id = %task_id, "received cancellation request");
                    self.cancelled_tasks.insert(task_id.clone());
                    if let Err(e) = self
                        .store
                        .update_task_status(&task_id, TaskStatus::Cancelled, StatusUpdate::default())
                        .await
                    {
                        tracing::error!(task_id = %task_id, error = %e, "failed to record cancellation");
                    }
                },
                Ok(crate::task::ControlMessage::Unknown { action }) => {
                    tracing::warn!(action = %action, "ignoring unrecognized control action");
                },
                Err(e) => {
                    tracing::error!(error = %e, "error reading control queue");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                },
            }
        }
    }

    async fn dispatch_loop(self: Arc<Self>) {
        while self.running.load(Ordering::Relaxed) {
            {
                let mut tasks = self.tasks.lock().await;
                while tasks.try_join_next().is_some() {}
            }

            if self.active_task_count.load(Ordering::Relaxed) < self.cfg.max_concurrent_tasks {
                match self.registry.pop_task(&self.cfg.node_id).await {
                    Ok(Some(payload)) => self.dispatch_task(payload).await,
                    Ok(None) => {},
                    Err(e) => tracing::error!(error = %e, "failed to pop task from queue"),
                }
            }

            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Assigns a popped task to this node in the store and, on success,
    /// spawns its pipeline. A failed assignment drops the task —
    /// matching the original's behavior (Open Question 2) — but logs at
    /// error level so an operator can recover it manually.
    async fn dispatch_task(self: &Arc<Self>, payload: TaskPayload) {
        let task_id = payload.task_id.clone();
        match self.store.update_task_assigned_node(&task_id, &self.cfg.node_id).await {
            Ok(true) => {
                tracing::info!(task_id = %task_id, "task assigned to node");
                self.active_task_count.fetch_add(1, Ordering::AcqRel);
                let engine = Arc::clone(self);
                let mut tasks = self.tasks.lock().await;
                tasks.spawn(async move { engine.handle_task(payload).await });
            },
            Ok(false) => {
                tracing::error!(task_id = %task_id, "task not found in store for assignment; dropping");
            },
            Err(e) => {
                tracing::error!(task_id = %task_id, error = %e, "failed to assign task to node; dropping");
            },
        }
    }

    async fn handle_task(self: Arc<Self>, payload: TaskPayload) {
        let task_id = payload.task_id.clone();
        let _guard = ActiveTaskGuard { engine: Arc::clone(&self), task_id: task_id.clone() };

        tracing::info!(task_id = %task_id, "processing task");
        if self.cancelled_tasks.contains(&task_id) {
            tracing::info!(task_id = %task_id, "task was cancelled before processing");
            return;
        }

        match self.run_task(&payload).await {
            TaskOutcome::Completed => {},
            TaskOutcome::Cancelled => {
                tracing::info!(task_id = %task_id, "task cancelled during processing");
            },
            TaskOutcome::Failed(message) => {
                tracing::error!(task_id = %task_id, error = %message, "task failed");
                let update = StatusUpdate { error_message: Some(&message), ..Default::default() };
                if let Err(e) =
                    self.store.update_task_status(&task_id, TaskStatus::Failed, update).await
                {
                    tracing::error!(task_id = %task_id, error = %e, "failed to write FAILED status");
                }
            },
        }
    }

    /// The eight-stage pipeline: PROCESSING write, transcription,
    /// accuracy scoring, translation fan-out (with a five-minute overall
    /// timeout), packing, result write, and the COMPLETED write. A
    /// cancellation check runs before every stage that can suspend.
    async fn run_task(&self, payload: &TaskPayload) -> TaskOutcome {
        let task_id = &payload.task_id;

        if let Err(e) = self
            .store
            .update_task_status(task_id, TaskStatus::Processing, StatusUpdate::default())
            .await
        {
            return TaskOutcome::Failed(format!("failed to write PROCESSING status: {e}"));
        }

        if self.cancelled_tasks.contains(task_id) {
            return TaskOutcome::Cancelled;
        }

        let mut transcribed_text: Option<String> = None;
        if let Some(audio_path) = &payload.audio_file_path {
            if self.cancelled_tasks.contains(task_id) {
                return TaskOutcome::Cancelled;
            }

            let permit = match Arc::clone(&self.transcribe_semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(_closed) => return TaskOutcome::Failed("transcriber is shutting down".to_string()),
            };
            let outcome = self
                .transcriber
                .transcribe(audio_path, Some(&payload.source_language))
                .await;
            drop(permit);

            match outcome {
                Ok(result) => {
                    tracing::info!(task_id = %task_id, text = %result.text, "transcription completed");
                    transcribed_text = Some(result.text);
                },
                Err(e) => return TaskOutcome::Failed(format!("transcription failed: {e}")),
            }
        }

        if self.cancelled_tasks.contains(task_id) {
            return TaskOutcome::Cancelled;
        }

        let accuracy = match (&payload.original_text, &transcribed_text) {
            (Some(original), Some(transcribed)) => Some(accuracy_ratio(original, transcribed)),
            _ => None,
        };

        let original_text_for_translation =
            payload.text_content.clone().or_else(|| payload.original_text.clone());

        let (original_translations, stt_translations) = self
            .run_translations(payload, original_text_for_translation.as_deref(), transcribed_text.as_deref())
            .await;

        let original_translations = match original_translations {
            Ok(maps) => maps,
            Err(TranslateError::Cancelled) => return TaskOutcome::Cancelled,
        };
        let stt_translations = match stt_translations {
            Ok(maps) => maps,
            Err(TranslateError::Cancelled) => return TaskOutcome::Cancelled,
        };

        if self.cancelled_tasks.contains(task_id) {
            return TaskOutcome::Cancelled;
        }

        let pack_input = TaskTranslationInput {
            task_id: task_id.clone(),
            original_text: original_text_for_translation,
            original_translations,
            stt_text: transcribed_text.clone(),
            stt_translations,
        };
        let blob = codec::pack(std::slice::from_ref(&pack_input));

        let result_path = match self.write_result(task_id, &blob).await {
            Ok(path) => path,
            Err(e) => return TaskOutcome::Failed(format!("failed to write result file: {e}")),
        };

        if self.cancelled_tasks.contains(task_id) {
            return TaskOutcome::Cancelled;
        }

        let update = StatusUpdate {
            result_path: Some(&result_path),
            accuracy,
            transcribed_text: transcribed_text.as_deref(),
            ..Default::default()
        };
        match self.store.update_task_status(task_id, TaskStatus::Completed, update).await {
            Ok(_) => TaskOutcome::Completed,
            Err(e) => TaskOutcome::Failed(format!("failed to write COMPLETED status: {e}")),
        }
    }

    /// Runs the original-text and transcribed-text translation fan-outs
    /// concurrently under one five-minute ceiling (§4.6 step 7). A
    /// timeout degrades both to empty maps rather than failing the task,
    /// matching the original's `asyncio.TimeoutError` handling.
    async fn run_translations(
        &self,
        payload: &TaskPayload,
        original_text: Option<&str>,
        stt_text: Option<&str>,
    ) -> (
        Result<Option<BTreeMap<String, String>>, TranslateError>,
        Result<Option<BTreeMap<String, String>>, TranslateError>,
    ) {
        if original_text.is_none() && stt_text.is_none() {
            return (Ok(None), Ok(None));
        }

        let task_id = &payload.task_id;
        let original_fut = async {
            match original_text {
                Some(text) => Some(
                    self.translator
                        .translate(text, &payload.source_language, &payload.target_languages, task_id, &self.cancelled_tasks)
                        .await,
                ),
                None => None,
            }
        };
        let stt_fut = async {
            match stt_text {
                Some(text) => Some(
                    self.translator
                        .translate(text, &payload.source_language, &payload.target_languages, task_id, &self.cancelled_tasks)
                        .await,
                ),
                None => None,
            }
        };

        match tokio::time::timeout(Duration::from_secs(300), async { tokio::join!(original_fut, stt_fut) }).await {
            Ok((original, stt)) => (transpose_translation(original), transpose_translation(stt)),
            Err(_elapsed) => {
                tracing::error!(task_id = %task_id, "translation tasks timed out");
                (Ok(Some(BTreeMap::new())), Ok(Some(BTreeMap::new())))
            },
        }
    }

    async fn write_result(&self, task_id: &str, blob: &[u8]) -> std::io::Result<String> {
        let path = self.result_dir.join(format!("{task_id}.bin"));
        tokio::fs::write(&path, blob).await?;
        Ok(path.to_string_lossy().into_owned())
    }

    /// Stops accepting new tasks, waits up to `task_timeout` for active
    /// tasks to drain, then marks the node offline and unregisters it —
    /// the behavior of the original's second (and only live)
    /// `shutdown()` definition.
    pub async fn shutdown(self: &Arc<Self>) {
        tracing::info!(node_id = %self.cfg.node_id, "shutting down worker");
        *self.status.lock().expect("node status mutex poisoned") = NodeStatus::ShuttingDown;
        self.running.store(false, Ordering::SeqCst);

        let shutting_down = self.build_record(NodeStatus::ShuttingDown).await;
        if let Err(e) = self.publish_record(&shutting_down).await {
            tracing::error!(error = %e, "failed to publish SHUTTING_DOWN status");
        }

        let active = self.active_task_count.load(Ordering::SeqCst);
        if active > 0 {
            tracing::info!(active, "waiting for active tasks to complete");
            let notified = self.shutdown_notify.notified();
            if tokio::time::timeout(self.cfg.task_timeout, notified).await.is_err() {
                tracing::warn!(task_timeout_secs = self.cfg.task_timeout.as_secs(), "timed out waiting for tasks to complete");
            } else {
                tracing::info!("all tasks completed successfully");
            }
        }

        let offline = self.build_record(NodeStatus::Offline).await;
        if let Err(e) = self.publish_record(&offline).await {
            tracing::error!(error = %e, "failed to publish OFFLINE status");
        }
        if let Err(e) = self.registry.unregister(&self.cfg.node_id).await {
            tracing::error!(error = %e, "failed to unregister node");
        }

        tracing::info!(node_id = %self.cfg.node_id, "worker shutdown complete");
    }
}

fn transpose_translation(
    outcome: Option<Result<BTreeMap<String, String>, TranslateError>>,
) -> Result<Option<BTreeMap<String, String>>, TranslateError> {
    match outcome {
        Some(Ok(map)) => Ok(Some(map)),
        Some(Err(e)) => Err(e),
        None => Ok(None),
    }
}

struct ActiveTaskGuard {
    engine: Arc<Engine>,
    task_id: String,
}

impl Drop for ActiveTaskGuard {
    fn drop(&mut self) {
        self.engine.cancelled_tasks.remove(&self.task_id);
        let previous = self.engine.active_task_count.fetch_sub(1, Ordering::AcqRel);
        if previous == 1 && !self.engine.running.load(Ordering::Acquire) {
            self.engine.shutdown_notify.notify_waiters();
        }
    }
}
