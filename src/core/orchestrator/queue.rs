use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

use super::types::{Task, TaskStatus, can_transition};
use crate::core::memory::now_rfc3339;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum QueueError {
    #[error("task {0} is not tracked by the queue")]
    NotFound(String),
    #[error("task {task_id} cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        task_id: String,
        from: TaskStatus,
        to: TaskStatus,
    },
}

/// Result of releasing a running slot.
#[derive(Debug, Clone)]
pub struct Completion {
    pub finished: Task,
    pub admitted: Vec<Task>,
}

#[derive(Default)]
struct QueueState {
    tasks: HashMap<String, Task>,
    queued: VecDeque<String>,
    running: HashSet<String>,
    awaiting: HashMap<String, String>,
}

/// Owns every non-terminal task and bounds how many run at once.
///
/// All admission decisions happen under one synchronous lock, so the
/// "slot free?" check and the slot increment can never interleave with
/// another caller. Terminal tasks are removed and returned to the caller
/// for persistence.
pub struct TaskQueue {
    max_concurrent: usize,
    state: Mutex<QueueState>,
}

impl TaskQueue {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent: max_concurrent.max(1),
            state: Mutex::new(QueueState::default()),
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Park a new task until the user answers its clarification question.
    /// Returns the parked task and any earlier task on the same thread that it displaced.
    pub fn hold_for_clarification(&self, mut task: Task) -> Result<(Task, Option<Task>), QueueError> {
        let mut state = self.lock();
        set_status(&mut task, TaskStatus::AwaitingClarification)?;

        let displaced = match state.awaiting.remove(&task.thread_id) {
            Some(previous_id) => state.tasks.remove(&previous_id).map(|mut previous| {
                previous.status = TaskStatus::Cancelled;
                previous.updated_at = now_rfc3339();
                warn!(
                    "[task:{}] superseded by {} while awaiting clarification",
                    previous.id, task.id
                );
                previous
            }),
            None => None,
        };

        state
            .awaiting
            .insert(task.thread_id.clone(), task.id.clone());
        state.tasks.insert(task.id.clone(), task.clone());
        Ok((task, displaced))
    }

    /// Queue a pending task and admit whatever fits. Returns the tasks now running.
    pub fn enqueue(&self, mut task: Task) -> Result<Vec<Task>, QueueError> {
        let mut state = self.lock();
        set_status(&mut task, TaskStatus::Queued)?;
        state.queued.push_back(task.id.clone());
        state.tasks.insert(task.id.clone(), task);
        Ok(self.admit(&mut state))
    }

    pub fn awaiting_task(&self, thread_id: &str) -> Option<Task> {
        let state = self.lock();
        state
            .awaiting
            .get(thread_id)
            .and_then(|id| state.tasks.get(id))
            .cloned()
    }

    /// Attach the user's answer and move the thread's parked task to the queue.
    /// Returns `None` when nothing is awaiting on that thread.
    pub fn resume(
        &self,
        thread_id: &str,
        answer: &str,
    ) -> Result<Option<(Task, Vec<Task>)>, QueueError> {
        let mut state = self.lock();
        let Some(task_id) = state.awaiting.remove(thread_id) else {
            return Ok(None);
        };
        let task = state
            .tasks
            .get_mut(&task_id)
            .ok_or_else(|| QueueError::NotFound(task_id.clone()))?;
        set_status(task, TaskStatus::Queued)?;
        task.clarify_answer = Some(answer.to_string());
        let resumed = task.clone();
        state.queued.push_back(task_id);
        let admitted = self.admit(&mut state);
        Ok(Some((resumed, admitted)))
    }

    /// Cancel the thread's parked task. Never touches a running slot.
    pub fn dismiss(&self, thread_id: &str) -> Option<Task> {
        let mut state = self.lock();
        let task_id = state.awaiting.remove(thread_id)?;
        let mut task = state.tasks.remove(&task_id)?;
        task.status = TaskStatus::Cancelled;
        task.updated_at = now_rfc3339();
        info!("[task:{}] dismissed", task.id);
        Some(task)
    }

    /// Finish a running task, release its slot and admit the next queued tasks.
    pub fn complete(&self, task_id: &str, outcome: Result<(), String>) -> Result<Completion, QueueError> {
        let mut state = self.lock();
        let mut task = state
            .tasks
            .remove(task_id)
            .ok_or_else(|| QueueError::NotFound(task_id.to_string()))?;

        let target = if outcome.is_ok() {
            TaskStatus::Completed
        } else {
            TaskStatus::Error
        };
        if let Err(e) = set_status(&mut task, target) {
            state.tasks.insert(task.id.clone(), task);
            return Err(e);
        }
        task.error = outcome.err();
        state.running.remove(task_id);

        let admitted = self.admit(&mut state);
        Ok(Completion {
            finished: task,
            admitted,
        })
    }

    fn admit(&self, state: &mut QueueState) -> Vec<Task> {
        let mut admitted = Vec::new();
        while state.running.len() < self.max_concurrent {
            let Some(next_id) = state.queued.pop_front() else {
                break;
            };
            let Some(task) = state.tasks.get_mut(&next_id) else {
                continue;
            };
            if set_status(task, TaskStatus::Running).is_err() {
                continue;
            }
            state.running.insert(next_id);
            admitted.push(task.clone());
        }
        admitted
    }

    pub fn get(&self, task_id: &str) -> Option<Task> {
        self.lock().tasks.get(task_id).cloned()
    }

    pub fn running_count(&self) -> usize {
        self.lock().running.len()
    }

    pub fn queued_count(&self) -> usize {
        self.lock().queued.len()
    }

    /// Every live task, oldest first.
    pub fn snapshot(&self) -> Vec<Task> {
        let state = self.lock();
        let mut tasks: Vec<Task> = state.tasks.values().cloned().collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        tasks
    }
}

fn set_status(task: &mut Task, to: TaskStatus) -> Result<(), QueueError> {
    if !can_transition(task.status, to) {
        return Err(QueueError::InvalidTransition {
            task_id: task.id.clone(),
            from: task.status,
            to,
        });
    }
    task.status = to;
    task.updated_at = now_rfc3339();
    Ok(())
}
