use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use super::classifier::Classifier;
use super::pipeline::defaults::pipeline_for_platform;
use super::pipeline::{CheckpointSink, PipelineConfig, PipelineError, PipelineRunner, PromptLibrary};
use super::queue::{Completion, TaskQueue};
use super::types::{Classification, Intent, Task, TaskStatus};
use crate::core::hooks::{ExecutionObserver, ToolHooks};
use crate::core::lessons::format_lessons_with_budget;
use crate::core::memory::MemorySystem;
use crate::core::reporter::{MessageRef, Reporter};
use crate::core::runtime::{AgentRuntime, InvokeOptions};

const DISMISSALS: &[&str] = &[
    "dismiss",
    "cancel",
    "nevermind",
    "never mind",
    "stop",
    "abort",
];

/// Whether a reply to a pending clarification means "drop it".
pub fn is_dismissal(text: &str) -> bool {
    let normalized = text
        .trim()
        .trim_end_matches(['.', '!'])
        .trim()
        .to_lowercase();
    DISMISSALS.contains(&normalized.as_str())
}

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub lesson_recall: usize,
    pub lesson_field_budget: usize,
    pub retry_limit: usize,
    pub model: Option<String>,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            lesson_recall: 10,
            lesson_field_budget: crate::core::lessons::LESSON_FIELD_BUDGET,
            retry_limit: 0,
            model: None,
        }
    }
}

/// What happened to an inbound message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum InboundOutcome {
    NotClassified,
    AwaitingClarification { task_id: String },
    Queued { task_id: String, started: bool },
    Resumed { task_id: String, started: bool },
    Dismissed { task_id: String },
}

/// Routes inbound text through classification into the queue and runs
/// admitted tasks to completion.
pub struct Dispatcher {
    queue: Arc<TaskQueue>,
    classifier: Classifier,
    runtime: Arc<dyn AgentRuntime>,
    memory: Arc<MemorySystem>,
    reporter: Reporter,
    prompts: PromptLibrary,
    pipelines: HashMap<String, PipelineConfig>,
    settings: DispatchSettings,
    waiters: Mutex<HashMap<String, oneshot::Sender<Task>>>,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: Arc<TaskQueue>,
        classifier: Classifier,
        runtime: Arc<dyn AgentRuntime>,
        memory: Arc<MemorySystem>,
        reporter: Reporter,
        prompts: PromptLibrary,
        pipelines: Vec<PipelineConfig>,
        settings: DispatchSettings,
    ) -> Result<Self> {
        let mut by_name = HashMap::new();
        for config in pipelines {
            config.validate()?;
            by_name.insert(config.name.clone(), config);
        }
        Ok(Self {
            queue,
            classifier,
            runtime,
            memory,
            reporter,
            prompts,
            pipelines: by_name,
            settings,
            waiters: Mutex::new(HashMap::new()),
        })
    }

    pub fn queue(&self) -> &Arc<TaskQueue> {
        &self.queue
    }

    pub fn memory(&self) -> &Arc<MemorySystem> {
        &self.memory
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    pub fn has_pipeline(&self, name: &str) -> bool {
        self.pipelines.contains_key(name)
    }

    /// Entry point for every inbound message on a conversation thread.
    pub async fn handle_inbound(
        self: &Arc<Self>,
        thread_id: &str,
        text: &str,
    ) -> Result<InboundOutcome> {
        if self.queue.awaiting_task(thread_id).is_some() {
            return self.handle_clarification_reply(thread_id, text).await;
        }
        self.classify_and_route(thread_id, text).await
    }

    /// Classify `text` as a new request, then queue it or park it for clarification.
    async fn classify_and_route(
        self: &Arc<Self>,
        thread_id: &str,
        text: &str,
    ) -> Result<InboundOutcome> {
        let classification = match self.classifier.classify(text).await {
            Ok(c) => c,
            Err(e) => {
                warn!("[thread:{}] classification failed: {}", thread_id, e);
                if let Err(e) = self.reporter.could_not_classify(thread_id).await {
                    warn!("[thread:{}] failed to report: {}", thread_id, e);
                }
                return Ok(InboundOutcome::NotClassified);
            }
        };

        let task = self.prepare_task(thread_id, text, &classification);
        info!(
            "[task:{}] {} ({}) on thread {}",
            task.id,
            task.intent.as_str(),
            task.autonomy.as_str(),
            thread_id
        );
        if let Err(e) = self.reporter.acknowledge(thread_id, &classification).await {
            warn!("[task:{}] failed to acknowledge: {}", task.id, e);
        }

        if classification.needs_clarification() {
            let (parked, displaced) = self.queue.hold_for_clarification(task)?;
            if let Some(displaced) = displaced {
                self.persist(&displaced).await;
            }
            self.persist(&parked).await;
            return Ok(InboundOutcome::AwaitingClarification { task_id: parked.id });
        }

        let task_id = task.id.clone();
        let started = self.submit(task).await?;
        Ok(InboundOutcome::Queued { task_id, started })
    }

    pub(super) async fn handle_clarification_reply(
        self: &Arc<Self>,
        thread_id: &str,
        text: &str,
    ) -> Result<InboundOutcome> {
        if is_dismissal(text) {
            let Some(task) = self.queue.dismiss(thread_id) else {
                return self.classify_and_route(thread_id, text).await;
            };
            self.persist(&task).await;
            self.notify_waiter(&task);
            if let Err(e) = self.reporter.dismissed(thread_id, &task.summary).await {
                warn!("[task:{}] failed to report dismissal: {}", task.id, e);
            }
            return Ok(InboundOutcome::Dismissed { task_id: task.id });
        }

        let Some((resumed, admitted)) = self.queue.resume(thread_id, text.trim())? else {
            return self.classify_and_route(thread_id, text).await;
        };
        info!("[task:{}] clarified, queued", resumed.id);
        self.persist(&resumed).await;
        let started = admitted.iter().any(|t| t.id == resumed.id);
        for task in admitted {
            self.launch(task);
        }
        Ok(InboundOutcome::Resumed {
            task_id: resumed.id,
            started,
        })
    }

    /// Build a pending task from a classification, choosing a content pipeline when relevant.
    pub fn prepare_task(&self, thread_id: &str, text: &str, classification: &Classification) -> Task {
        let mut task = Task::new(thread_id, text.trim(), classification);
        if classification.intent == Intent::Content {
            let pipeline = pipeline_for_platform(classification.platform.as_deref());
            if self.pipelines.contains_key(pipeline) {
                task.pipeline = Some(pipeline.to_string());
                task.category = classification.platform.clone();
            }
        }
        task
    }

    /// Queue a pending task. Returns whether it started immediately.
    pub async fn submit(self: &Arc<Self>, task: Task) -> Result<bool> {
        let mut audit = task.clone();
        audit.status = TaskStatus::Queued;
        self.persist(&audit).await;

        let task_id = task.id.clone();
        let admitted = self.queue.enqueue(task)?;
        let started = admitted.iter().any(|t| t.id == task_id);
        for task in admitted {
            self.launch(task);
        }
        Ok(started)
    }

    /// Queue a pending task and wait until it reaches a terminal status.
    pub async fn submit_and_wait(self: &Arc<Self>, task: Task) -> Result<Task> {
        let (tx, rx) = oneshot::channel();
        let task_id = task.id.clone();
        self.lock_waiters().insert(task_id.clone(), tx);
        if let Err(e) = self.submit(task).await {
            self.lock_waiters().remove(&task_id);
            return Err(e);
        }
        rx.await
            .map_err(|_| anyhow!("task {} finished without reporting", task_id))
    }

    fn lock_waiters(&self) -> std::sync::MutexGuard<'_, HashMap<String, oneshot::Sender<Task>>> {
        self.waiters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn notify_waiter(&self, task: &Task) {
        if let Some(tx) = self.lock_waiters().remove(&task.id) {
            let _ = tx.send(task.clone());
        }
    }

    async fn persist(&self, task: &Task) {
        if let Err(e) = self.memory.upsert_task(&task.to_record()).await {
            warn!("[task:{}] failed to persist status {}: {}", task.id, task.status.as_str(), e);
        }
    }

    fn launch(self: &Arc<Self>, task: Task) {
        let this = self.clone();
        tokio::spawn(async move {
            this.supervise(task).await;
        });
    }

    /// Run one admitted task in its own spawned task so a panic still releases the slot.
    async fn supervise(self: Arc<Self>, task: Task) {
        self.persist(&task).await;

        let worker = self.clone();
        let job = task.clone();
        let handle = tokio::spawn(async move { worker.execute(&job).await });

        let outcome = match handle.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                error!("[task:{}] failed: {:#}", task.id, e);
                Err(e.to_string())
            }
            Err(join_error) => {
                error!("[task:{}] panicked: {}", task.id, join_error);
                Err("task panicked".to_string())
            }
        };

        if outcome.is_err()
            && let Err(e) = self.reporter.failure(&task.thread_id).await
        {
            warn!("[task:{}] failed to report failure: {}", task.id, e);
        }

        match self.queue.complete(&task.id, outcome) {
            Ok(Completion { finished, admitted }) => {
                info!("[task:{}] {}", finished.id, finished.status.as_str());
                self.persist(&finished).await;
                self.notify_waiter(&finished);
                for next in admitted {
                    self.launch(next);
                }
            }
            Err(e) => error!("[task:{}] could not release slot: {}", task.id, e),
        }
    }

    async fn execute(&self, task: &Task) -> Result<()> {
        let lessons = match self.memory.recent_lessons(self.settings.lesson_recall).await {
            Ok(lessons) => lessons,
            Err(e) => {
                warn!("[task:{}] could not load lessons: {}", task.id, e);
                Vec::new()
            }
        };
        let preamble = format_lessons_with_budget(&lessons, self.settings.lesson_field_budget);

        let session_id = match self.memory.get_session(&task.thread_id).await {
            Ok(session) => session,
            Err(e) => {
                warn!("[task:{}] could not load session: {}", task.id, e);
                None
            }
        };
        let observer = Arc::new(ExecutionObserver::new(
            self.memory.clone(),
            session_id.clone().unwrap_or_else(|| format!("local-{}", task.id)),
            Some(task.id.clone()),
        ));
        let hooks = observer.hooks();

        let progress = match self
            .reporter
            .progress_started(&task.thread_id, &task.summary)
            .await
        {
            Ok(message) => Some(message),
            Err(e) => {
                warn!("[task:{}] could not post progress: {}", task.id, e);
                None
            }
        };

        match task.pipeline.as_deref() {
            Some(name) => {
                self.run_pipeline(task, name, preamble, session_id, hooks, progress)
                    .await
            }
            None => self.run_plain(task, preamble, session_id, hooks).await,
        }
    }

    async fn run_plain(
        &self,
        task: &Task,
        preamble: String,
        session_id: Option<String>,
        hooks: ToolHooks,
    ) -> Result<()> {
        let mut prompt = String::new();
        if !preamble.is_empty() {
            prompt.push_str(&preamble);
            prompt.push('\n');
        }
        prompt.push_str(&format!("## Request\n{}\n", task.effective_request()));

        let options = InvokeOptions {
            tools_allowed: true,
            external_search_allowed: task.intent != Intent::Chat,
            model: self.settings.model.clone(),
            session_id: session_id.clone(),
        };
        let output = self.runtime.invoke(&prompt, &options, &hooks).await?;
        self.remember_session(task, session_id.as_deref(), output.session_id.as_deref())
            .await;

        self.reporter.result(&task.thread_id, &output.text).await?;
        Ok(())
    }

    async fn run_pipeline(
        &self,
        task: &Task,
        name: &str,
        preamble: String,
        session_id: Option<String>,
        hooks: ToolHooks,
        progress: Option<MessageRef>,
    ) -> Result<()> {
        let config = self
            .pipelines
            .get(name)
            .ok_or_else(|| anyhow!("unknown pipeline '{}'", name))?;
        let checkpoint = TaskCheckpoint {
            memory: self.memory.clone(),
            reporter: self.reporter.clone(),
            job_id: task.id.clone(),
            summary: task.summary.clone(),
            total: config.phases.len(),
            progress,
        };
        let runner = PipelineRunner::new(self.runtime.as_ref(), &self.prompts)
            .with_hooks(hooks)
            .with_lessons(preamble)
            .with_model(self.settings.model.clone())
            .with_session(session_id.clone());

        let request = task.effective_request();
        let mut attempt = 0;
        let output = loop {
            if attempt > 0 {
                self.memory.clear_phase_artifacts(&task.id).await?;
            }
            match runner
                .run(config, &request, task.category.as_deref(), &checkpoint)
                .await
            {
                Ok(output) => break output,
                Err(e @ PipelineError::InvalidConfig { .. }) => return Err(e.into()),
                Err(e) if attempt < self.settings.retry_limit => {
                    attempt += 1;
                    warn!(
                        "[task:{}] pipeline attempt {} failed ({}), retrying",
                        task.id, attempt, e
                    );
                }
                Err(e) => return Err(e.into()),
            }
        };

        self.remember_session(task, session_id.as_deref(), output.session_id.as_deref())
            .await;

        self.reporter.result(&task.thread_id, &output.text()).await?;
        let filename = format!("{}-{}.json", config.name, &task.id[..8.min(task.id.len())]);
        match serde_json::to_vec_pretty(&output.keyed()) {
            Ok(bytes) => {
                if let Err(e) = self.reporter.attach(&task.thread_id, &filename, bytes).await {
                    warn!("[task:{}] could not upload output: {}", task.id, e);
                }
            }
            Err(e) => warn!("[task:{}] could not encode output: {}", task.id, e),
        }
        self.reporter
            .artifact_summary(&task.thread_id, output.artifacts.len())
            .await?;
        Ok(())
    }

    async fn remember_session(&self, task: &Task, known: Option<&str>, returned: Option<&str>) {
        let Some(returned) = returned else {
            return;
        };
        if known == Some(returned) {
            return;
        }
        if let Err(e) = self.memory.upsert_session(&task.thread_id, returned).await {
            warn!("[task:{}] could not store session: {}", task.id, e);
        }
    }
}

/// Persists each phase artifact and advances the progress message.
struct TaskCheckpoint {
    memory: Arc<MemorySystem>,
    reporter: Reporter,
    job_id: String,
    summary: String,
    total: usize,
    progress: Option<MessageRef>,
}

#[async_trait]
impl CheckpointSink for TaskCheckpoint {
    async fn checkpoint(&self, phase_index: usize, phase: &str, content: &str) -> Result<()> {
        self.memory
            .upsert_phase_artifact(&self.job_id, phase_index, phase, content)
            .await?;
        if let Some(message) = &self.progress
            && let Err(e) = self
                .reporter
                .progress_phase(message, &self.summary, phase_index + 1, self.total, phase)
                .await
        {
            warn!("[task:{}] could not update progress: {}", self.job_id, e);
        }
        Ok(())
    }
}
