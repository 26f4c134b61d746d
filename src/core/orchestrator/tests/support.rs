use std::sync::Arc;
use std::time::Duration;

use crate::core::memory::{MemorySystem, test_memory_system};
use crate::core::orchestrator::pipeline::defaults::builtin_pipelines;
use crate::core::orchestrator::{
    AutonomyLevel, Classification, Classifier, DispatchSettings, Dispatcher, Intent, PromptLibrary,
    Task, TaskQueue,
};
use crate::core::reporter::Reporter;
use crate::core::reporter::testing::RecordingSurface;
use crate::core::runtime::mock::MockRuntime;

pub fn classification(intent: Intent) -> Classification {
    Classification {
        intent,
        autonomy: AutonomyLevel::Assisted,
        summary: "do the thing".to_string(),
        clarify_question: None,
        platform: None,
    }
}

pub fn task(thread: &str, request: &str) -> Task {
    Task::new(thread, request, &classification(Intent::Chat))
}

pub fn classifier_json(intent: &str, autonomy: &str, clarify: Option<&str>) -> String {
    serde_json::json!({
        "intent": intent,
        "autonomy_level": autonomy,
        "summary": format!("Handle a {} request", intent),
        "clarify_question": clarify,
        "platform": null,
    })
    .to_string()
}

pub struct Harness {
    pub dispatcher: Arc<Dispatcher>,
    pub runtime: Arc<MockRuntime>,
    pub surface: Arc<RecordingSurface>,
    pub memory: Arc<MemorySystem>,
}

pub async fn harness(max_concurrent: usize, runtime: MockRuntime) -> Harness {
    harness_with(max_concurrent, runtime, DispatchSettings::default()).await
}

pub async fn harness_with(
    max_concurrent: usize,
    runtime: MockRuntime,
    settings: DispatchSettings,
) -> Harness {
    let runtime = Arc::new(runtime);
    let surface = Arc::new(RecordingSurface::default());
    let memory = Arc::new(test_memory_system().await);
    let dispatcher = Dispatcher::new(
        Arc::new(TaskQueue::new(max_concurrent)),
        Classifier::new(runtime.clone(), None),
        runtime.clone(),
        memory.clone(),
        Reporter::new(surface.clone(), 3000),
        PromptLibrary::builtin(),
        builtin_pipelines(),
        settings,
    )
    .expect("dispatcher");
    Harness {
        dispatcher: Arc::new(dispatcher),
        runtime,
        surface,
        memory,
    }
}

/// Poll `check` until it holds or a couple of seconds pass.
pub async fn eventually<F: Fn() -> bool>(check: F) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

/// Poll the audit store until `task_id` reaches `status`.
pub async fn wait_for_status(memory: &MemorySystem, task_id: &str, status: &str) -> bool {
    for _ in 0..200 {
        if let Ok(Some(record)) = memory.get_task(task_id).await
            && record.status == status
        {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
