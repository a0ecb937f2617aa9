// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! In-memory fakes for the Registry, Store, Transcriber, and provider
//! seams the Worker Engine depends on, so the engine's task lifecycle
//! (§4.6) can be driven end-to-end without a live Redis, MySQL, or
//! translation provider.

use std::{
    collections::{HashMap, VecDeque},
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use translation_worker::{
    cfg::config::Config,
    engine::Engine,
    registry::{Registry, RegistryError},
    resource::ResourceProbe,
    store::{Store, StatusUpdate, StoreError},
    task::{ControlMessage, NodeRecord, NodeStatus, TaskPayload, TaskStatus},
    transcribe::{TranscribeError, Transcriber, Transcription},
    translate::{Provider, ProviderError, TranslationRouter},
};

pub fn test_config(node_id: &str) -> Config {
    Config {
        node_id: node_id.to_string(),
        host: "localhost".to_string(),
        port: 8001,
        redis_host: "localhost".to_string(),
        redis_port: 6379,
        redis_password: None,
        redis_db: 0,
        db_host: "localhost".to_string(),
        db_port: 3306,
        db_name: "giggle_translation".to_string(),
        db_user: "root".to_string(),
        db_password: String::new(),
        whisper_model_size: "large-v3".to_string(),
        transcribe_concurrency: 2,
        max_concurrent_tasks: 2,
        heartbeat_interval: Duration::from_millis(50),
        task_timeout: Duration::from_secs(5),
        result_dir: String::new(),
        translation_api_key: None,
        google_translate_api_key: None,
        deepl_api_key: None,
        deepl_api_url: "https://api-free.deepl.com".to_string(),
    }
}

pub fn unique_result_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("translation-worker-it-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).expect("create result dir");
    dir
}

/// A registry backed by an in-process queue and an mpsc control channel,
/// standing in for the Redis-backed `RegistryClient` (§4.2).
pub struct FakeRegistry {
    tasks: AsyncMutex<VecDeque<TaskPayload>>,
    control_rx: AsyncMutex<mpsc::UnboundedReceiver<ControlMessage>>,
    pub published_statuses: std::sync::Mutex<Vec<NodeStatus>>,
    pub unregistered: AtomicBool,
    pub ranked: AtomicBool,
}

impl FakeRegistry {
    pub fn new(tasks: Vec<TaskPayload>) -> (Arc<Self>, mpsc::UnboundedSender<ControlMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let registry = Arc::new(Self {
            tasks: AsyncMutex::new(tasks.into()),
            control_rx: AsyncMutex::new(rx),
            published_statuses: std::sync::Mutex::new(Vec::new()),
            unregistered: AtomicBool::new(false),
            ranked: AtomicBool::new(false),
        });
        (registry, tx)
    }

    pub fn last_published_status(&self) -> Option<NodeStatus> {
        self.published_statuses.lock().expect("published_statuses poisoned").last().copied()
    }

    pub fn has_published(&self, status: NodeStatus) -> bool {
        self.published_statuses
            .lock()
            .expect("published_statuses poisoned")
            .iter()
            .any(|s| *s == status)
    }
}

#[async_trait]
impl Registry for FakeRegistry {
    async fn publish(&self, record: &NodeRecord, _heartbeat_interval: Duration) -> Result<(), RegistryError> {
        self.published_statuses.lock().expect("published_statuses poisoned").push(record.status);
        Ok(())
    }

    async fn update_ranking(&self, _node_id: &str, _score: f64) -> Result<(), RegistryError> {
        self.ranked.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn remove_ranking(&self, _node_id: &str) -> Result<(), RegistryError> {
        self.ranked.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn unregister(&self, _node_id: &str) -> Result<(), RegistryError> {
        self.unregistered.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn pop_task(&self, _node_id: &str) -> Result<Option<TaskPayload>, RegistryError> {
        Ok(self.tasks.lock().await.pop_front())
    }

    async fn pop_control_message(&self, _node_id: &str) -> Result<ControlMessage, RegistryError> {
        let mut rx = self.control_rx.lock().await;
        match rx.recv().await {
            Some(msg) => Ok(msg),
            // The real BRPOP(timeout=0) blocks forever on a closed
            // connection too; pending here mirrors that rather than
            // unwinding the control loop.
            None => std::future::pending().await,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TaskRow {
    pub status: Option<TaskStatus>,
    pub assigned_node_id: Option<String>,
    pub result_path: Option<String>,
    pub error_message: Option<String>,
    pub accuracy: Option<f64>,
    pub transcribed_text: Option<String>,
    pub retry_count: u32,
}

/// A store backed by an in-process map, standing in for the
/// MySQL-backed `StoreClient` (§4.5).
pub struct FakeStore {
    rows: std::sync::Mutex<HashMap<String, TaskRow>>,
}

impl FakeStore {
    pub fn new(task_ids: &[&str]) -> Arc<Self> {
        let rows = task_ids.iter().map(|id| ((*id).to_string(), TaskRow::default())).collect();
        Arc::new(Self { rows: std::sync::Mutex::new(rows) })
    }

    pub fn snapshot(&self, task_id: &str) -> Option<TaskRow> {
        self.rows.lock().expect("rows poisoned").get(task_id).cloned()
    }
}

#[async_trait]
impl Store for FakeStore {
    async fn update_task_status(
        &self,
        task_id: &str,
        status: TaskStatus,
        update: StatusUpdate<'_>,
    ) -> Result<bool, StoreError> {
        let mut rows = self.rows.lock().expect("rows poisoned");
        let Some(row) = rows.get_mut(task_id) else { return Ok(false) };
        row.status = Some(status);
        if let Some(p) = update.result_path {
            row.result_path = Some(p.to_string());
        }
        if let Some(e) = update.error_message {
            row.error_message = Some(e.to_string());
        }
        if let Some(a) = update.accuracy {
            row.accuracy = Some(a);
        }
        if let Some(t) = update.transcribed_text {
            row.transcribed_text = Some(t.to_string());
        }
        Ok(true)
    }

    async fn update_task_assigned_node(&self, task_id: &str, node_id: &str) -> Result<bool, StoreError> {
        let mut rows = self.rows.lock().expect("rows poisoned");
        let Some(row) = rows.get_mut(task_id) else { return Ok(false) };
        row.assigned_node_id = Some(node_id.to_string());
        Ok(true)
    }

    async fn increment_retry_count(&self, task_id: &str) -> Result<bool, StoreError> {
        let mut rows = self.rows.lock().expect("rows poisoned");
        let Some(row) = rows.get_mut(task_id) else { return Ok(false) };
        row.retry_count += 1;
        Ok(true)
    }
}

pub enum FakeTranscription {
    Text { text: String, delay: Duration },
    Fail(String),
}

pub struct FakeTranscriber(pub FakeTranscription);

#[async_trait]
impl Transcriber for FakeTranscriber {
    async fn transcribe(
        &self,
        _audio_path: &str,
        _language_hint: Option<&str>,
    ) -> Result<Transcription, TranscribeError> {
        match &self.0 {
            FakeTranscription::Text { text, delay } => {
                if !delay.is_zero() {
                    tokio::time::sleep(*delay).await;
                }
                Ok(Transcription { text: text.clone(), detected_language: "en".to_string() })
            },
            FakeTranscription::Fail(message) => Err(TranscribeError::Backend(message.clone())),
        }
    }

    fn supported_languages(&self) -> &[&str] {
        translation_worker::transcribe::SUPPORTED_LANGUAGES
    }
}

/// A translation provider that either echoes a tagged translation or
/// always fails, standing in for the real HTTP-backed providers.
pub struct FakeProvider {
    pub name: &'static str,
    pub succeed: bool,
    pub delay: Duration,
}

impl FakeProvider {
    pub fn succeeding(name: &'static str) -> Self {
        Self { name, succeed: true, delay: Duration::ZERO }
    }

    pub fn failing(name: &'static str) -> Self {
        Self { name, succeed: false, delay: Duration::ZERO }
    }
}

#[async_trait]
impl Provider for FakeProvider {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn translate(&self, text: &str, _source_lang: &str, target_lang: &str) -> Result<String, ProviderError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.succeed {
            Ok(format!("[{}->{target_lang}] {text}", self.name))
        } else {
            Err(ProviderError::Shape)
        }
    }
}

#[allow(clippy::too_many_arguments)]
pub fn build_engine(
    cfg: Config,
    registry: Arc<dyn Registry>,
    store: Arc<dyn Store>,
    transcriber: Arc<dyn Transcriber>,
    translator: Arc<TranslationRouter>,
    result_dir: PathBuf,
) -> Arc<Engine> {
    Engine::new(cfg, registry, store, transcriber, translator, Arc::new(ResourceProbe::new()), result_dir)
}

/// Polls `cond` until it returns `true` or `timeout` elapses, returning
/// whether it converged. Used in place of a fixed sleep so tests aren't
/// flaky under load.
pub async fn wait_for(mut cond: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
