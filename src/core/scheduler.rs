use anyhow::{Result, anyhow};
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

use crate::core::config::ScheduleConfig;
use crate::core::memory::MemorySystem;
use crate::core::orchestrator::{Dispatcher, Task, TaskStatus};

pub type JobFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;
pub type JobHandler = Arc<dyn Fn() -> JobFuture + Send + Sync>;

/// Box a handler body.
pub fn job_future<F>(fut: F) -> JobFuture
where
    F: Future<Output = Result<()>> + Send + 'static,
{
    Box::pin(fut)
}

/// Spawn `fut` and watch it from a second task so that an error or a panic
/// is always logged instead of vanishing with the handle.
pub fn spawn_logged<F>(label: String, fut: F) -> JoinHandle<()>
where
    F: Future<Output = Result<()>> + Send + 'static,
{
    let inner = tokio::spawn(fut);
    tokio::spawn(async move {
        match inner.await {
            Ok(Ok(())) => info!("[{}] finished", label),
            Ok(Err(e)) => error!("[{}] failed: {:#}", label, e),
            Err(join_error) => error!("[{}] panicked: {}", label, join_error),
        }
    })
}

/// Answer to a manual trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunNow {
    Accepted,
    Busy,
    UnknownJob,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub name: String,
    pub cron: String,
    pub running: bool,
}

struct RegisteredJob {
    name: String,
    cron: String,
    handler: JobHandler,
    running: Arc<Mutex<()>>,
}

/// Named recurring jobs. Each job runs at most once at a time; a trigger
/// that lands while the previous run is still going is skipped.
pub struct CronScheduler {
    jobs: BTreeMap<String, Arc<RegisteredJob>>,
    memory: Arc<MemorySystem>,
}

impl CronScheduler {
    pub fn new(memory: Arc<MemorySystem>) -> Self {
        Self {
            jobs: BTreeMap::new(),
            memory,
        }
    }

    /// Register a job. The cron expression has six fields, seconds first.
    pub fn register(&mut self, name: &str, cron: &str, handler: JobHandler) -> Result<()> {
        if self.jobs.contains_key(name) {
            return Err(anyhow!("job '{}' is already registered", name));
        }
        // Parse eagerly so a bad expression fails at registration, not at start.
        Job::new_async(cron, |_uuid, _l| Box::pin(async {}))
            .map_err(|e| anyhow!("invalid cron expression '{}' for job '{}': {}", cron, name, e))?;
        self.jobs.insert(
            name.to_string(),
            Arc::new(RegisteredJob {
                name: name.to_string(),
                cron: cron.to_string(),
                handler,
                running: Arc::new(Mutex::new(())),
            }),
        );
        Ok(())
    }

    /// Register every `[[schedules]]` entry as a job that submits a
    /// pre-classified task and waits for it to finish.
    pub fn register_configured(
        &mut self,
        schedules: &[ScheduleConfig],
        dispatcher: &Arc<Dispatcher>,
    ) -> Result<()> {
        for schedule in schedules {
            if let Some(pipeline) = &schedule.pipeline
                && !dispatcher.has_pipeline(pipeline)
            {
                return Err(anyhow!(
                    "schedule '{}' names unknown pipeline '{}'",
                    schedule.name,
                    pipeline
                ));
            }
            let dispatcher = dispatcher.clone();
            let schedule_for_job = schedule.clone();
            let handler: JobHandler = Arc::new(move || {
                let dispatcher = dispatcher.clone();
                let schedule = schedule_for_job.clone();
                job_future(async move { run_scheduled_task(&dispatcher, &schedule).await })
            });
            self.register(&schedule.name, &schedule.cron, handler)?;
        }
        Ok(())
    }

    pub fn jobs(&self) -> Vec<JobStatus> {
        self.jobs
            .values()
            .map(|job| JobStatus {
                name: job.name.clone(),
                cron: job.cron.clone(),
                running: job.running.try_lock().is_err(),
            })
            .collect()
    }

    /// Fire a job outside its schedule. Returns immediately; the run is logged when it ends.
    pub fn run_now(&self, name: &str) -> RunNow {
        let Some(job) = self.jobs.get(name) else {
            return RunNow::UnknownJob;
        };
        if fire(job.clone(), self.memory.clone(), "manual") {
            RunNow::Accepted
        } else {
            RunNow::Busy
        }
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Hand every registered job to `scheduler`. Triggers start once the scheduler does.
    pub async fn install(&self, scheduler: &JobScheduler) -> Result<()> {
        for job in self.jobs.values() {
            let registered = job.clone();
            let memory = self.memory.clone();
            let cron_job = Job::new_async(job.cron.as_str(), move |_uuid, _l| {
                let registered = registered.clone();
                let memory = memory.clone();
                Box::pin(async move {
                    fire(registered, memory, "cron");
                })
            })
            .map_err(|e| anyhow!("invalid cron expression for '{}': {}", job.name, e))?;
            scheduler.add(cron_job).await?;
            info!("Schedule '{}' installed: {}", job.name, job.cron);
        }
        Ok(())
    }
}

/// Start one run of `job` unless the previous run still holds its lock.
fn fire(job: Arc<RegisteredJob>, memory: Arc<MemorySystem>, trigger: &'static str) -> bool {
    let guard = match job.running.clone().try_lock_owned() {
        Ok(guard) => guard,
        Err(_) => {
            warn!(
                "[job:{}] {} trigger skipped, previous run still in progress",
                job.name, trigger
            );
            return false;
        }
    };
    tokio::spawn(run_job(job, memory, trigger, guard));
    true
}

async fn run_job(
    job: Arc<RegisteredJob>,
    memory: Arc<MemorySystem>,
    trigger: &'static str,
    _guard: OwnedMutexGuard<()>,
) {
    info!("[job:{}] {} run starting", job.name, trigger);
    let run_id = match memory.start_schedule_run(&job.name).await {
        Ok(id) => Some(id),
        Err(e) => {
            warn!("[job:{}] could not record run start: {}", job.name, e);
            None
        }
    };

    let outcome = match tokio::spawn((job.handler)()).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(format!("{:#}", e)),
        Err(join_error) => Err(format!("handler panicked: {}", join_error)),
    };
    match &outcome {
        Ok(()) => info!("[job:{}] run finished", job.name),
        Err(e) => error!("[job:{}] run failed: {}", job.name, e),
    }

    if let Some(run_id) = run_id {
        let (status, error) = match &outcome {
            Ok(()) => ("completed", None),
            Err(e) => ("error", Some(e.as_str())),
        };
        if let Err(e) = memory.finish_schedule_run(&run_id, status, error).await {
            warn!("[job:{}] could not record run end: {}", job.name, e);
        }
    }
}

async fn run_scheduled_task(dispatcher: &Arc<Dispatcher>, schedule: &ScheduleConfig) -> Result<()> {
    let task = Task::scheduled(
        &schedule.name,
        &schedule.thread_id,
        &schedule.prompt,
        schedule.pipeline.as_deref(),
        schedule.category.as_deref(),
    );
    let finished = dispatcher.submit_and_wait(task).await?;
    match finished.status {
        TaskStatus::Completed => Ok(()),
        status => Err(anyhow!(
            "task {} ended {}: {}",
            finished.id,
            status.as_str(),
            finished.error.unwrap_or_default()
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::memory::test_memory_system;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    async fn scheduler() -> (CronScheduler, Arc<MemorySystem>) {
        let memory = Arc::new(test_memory_system().await);
        (CronScheduler::new(memory.clone()), memory)
    }

    fn counting_handler(count: Arc<AtomicUsize>, gate: Option<Arc<Notify>>) -> JobHandler {
        Arc::new(move || {
            let count = count.clone();
            let gate = gate.clone();
            job_future(async move {
                count.fetch_add(1, Ordering::SeqCst);
                if let Some(gate) = gate {
                    gate.notified().await;
                }
                Ok(())
            })
        })
    }

    async fn wait_until<F: Fn() -> bool>(check: F) -> bool {
        for _ in 0..200 {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        check()
    }

    async fn finished_runs(memory: &MemorySystem, status: &str) -> usize {
        memory
            .last_schedule_runs()
            .await
            .unwrap()
            .iter()
            .filter(|r| r.status == status)
            .count()
    }

    #[tokio::test]
    async fn rejects_bad_cron_and_duplicates() {
        let (mut sched, _) = scheduler().await;
        let count = Arc::new(AtomicUsize::new(0));
        assert!(
            sched
                .register("bad", "not a cron", counting_handler(count.clone(), None))
                .is_err()
        );
        sched
            .register("digest", "0 0 9 * * *", counting_handler(count.clone(), None))
            .unwrap();
        assert!(
            sched
                .register("digest", "0 0 9 * * *", counting_handler(count, None))
                .is_err()
        );
        assert_eq!(sched.jobs().len(), 1);
    }

    #[tokio::test]
    async fn run_now_unknown_job() {
        let (sched, _) = scheduler().await;
        assert_eq!(sched.run_now("missing"), RunNow::UnknownJob);
    }

    #[tokio::test]
    async fn overlapping_trigger_is_skipped() {
        let (mut sched, memory) = scheduler().await;
        let count = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());
        sched
            .register(
                "slow",
                "0 0 * * * *",
                counting_handler(count.clone(), Some(gate.clone())),
            )
            .unwrap();

        assert_eq!(sched.run_now("slow"), RunNow::Accepted);
        assert!(wait_until(|| count.load(Ordering::SeqCst) == 1).await);
        assert_eq!(sched.run_now("slow"), RunNow::Busy);
        assert!(sched.jobs()[0].running);

        gate.notify_one();
        assert!(wait_until(|| !sched.jobs()[0].running).await);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(finished_runs(&memory, "completed").await, 1);

        assert_eq!(sched.run_now("slow"), RunNow::Accepted);
        gate.notify_one();
        assert!(wait_until(|| count.load(Ordering::SeqCst) == 2).await);
    }

    #[tokio::test]
    async fn independent_jobs_run_concurrently() {
        let (mut sched, _) = scheduler().await;
        let count = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());
        for name in ["a", "b"] {
            sched
                .register(
                    name,
                    "0 0 * * * *",
                    counting_handler(count.clone(), Some(gate.clone())),
                )
                .unwrap();
        }
        assert_eq!(sched.run_now("a"), RunNow::Accepted);
        assert_eq!(sched.run_now("b"), RunNow::Accepted);
        assert!(wait_until(|| count.load(Ordering::SeqCst) == 2).await);
        gate.notify_waiters();
    }

    #[tokio::test]
    async fn failing_and_panicking_handlers_are_contained() {
        let (mut sched, memory) = scheduler().await;
        sched
            .register(
                "fails",
                "0 0 * * * *",
                Arc::new(|| job_future(async { Err(anyhow!("upstream down")) })),
            )
            .unwrap();
        sched
            .register(
                "panics",
                "0 0 * * * *",
                Arc::new(|| job_future(async { panic!("handler bug") })),
            )
            .unwrap();

        assert_eq!(sched.run_now("fails"), RunNow::Accepted);
        assert_eq!(sched.run_now("panics"), RunNow::Accepted);

        let mut errors = 0;
        for _ in 0..200 {
            errors = finished_runs(&memory, "error").await;
            if errors == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(errors, 2);

        let runs = memory.last_schedule_runs().await.unwrap();
        let panicked = runs.iter().find(|r| r.job_name == "panics").unwrap();
        assert!(panicked.error.as_deref().unwrap().contains("panicked"));

        // Both jobs remain triggerable.
        assert!(wait_until(|| sched.jobs().iter().all(|j| !j.running)).await);
        assert_eq!(sched.run_now("fails"), RunNow::Accepted);
    }

    #[tokio::test]
    async fn configured_schedule_submits_task_and_waits() {
        use crate::core::orchestrator::pipeline::defaults::builtin_pipelines;
        use crate::core::orchestrator::{
            Classifier, DispatchSettings, PromptLibrary, TaskQueue,
        };
        use crate::core::reporter::Reporter;
        use crate::core::reporter::testing::RecordingSurface;
        use crate::core::runtime::mock::MockRuntime;

        let memory = Arc::new(test_memory_system().await);
        let runtime = Arc::new(MockRuntime::new("weekly digest body"));
        let surface = Arc::new(RecordingSurface::default());
        let dispatcher = Arc::new(
            Dispatcher::new(
                Arc::new(TaskQueue::new(3)),
                Classifier::new(runtime.clone(), None),
                runtime.clone(),
                memory.clone(),
                Reporter::new(surface.clone(), 3000),
                PromptLibrary::builtin(),
                builtin_pipelines(),
                DispatchSettings::default(),
            )
            .unwrap(),
        );

        let schedules = vec![ScheduleConfig {
            name: "digest".into(),
            cron: "0 0 9 * * MON".into(),
            prompt: "Summarise last week".into(),
            pipeline: None,
            category: None,
            thread_id: "C-digest".into(),
        }];
        let mut sched = CronScheduler::new(memory.clone());
        sched.register_configured(&schedules, &dispatcher).unwrap();
        assert_eq!(sched.run_now("digest"), RunNow::Accepted);

        let mut completed = 0;
        for _ in 0..200 {
            completed = finished_runs(&memory, "completed").await;
            if completed == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(completed, 1);
        assert_eq!(
            surface.sent_to("C-digest").last().map(String::as_str),
            Some("weekly digest body")
        );
        // Scheduled tasks skip classification.
        assert_eq!(runtime.calls().len(), 1);

        let bad = vec![ScheduleConfig {
            pipeline: Some("no_such_pipeline".into()),
            ..schedules[0].clone()
        }];
        let mut other = CronScheduler::new(memory);
        assert!(other.register_configured(&bad, &dispatcher).is_err());
    }

    #[tokio::test]
    async fn spawn_logged_survives_panics() {
        let handle = spawn_logged("test".to_string(), async { panic!("boom") });
        assert!(handle.await.is_ok());
    }
}
