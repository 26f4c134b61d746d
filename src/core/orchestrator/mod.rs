pub mod classifier;
pub mod dispatcher;
pub mod pipeline;
pub mod queue;
pub mod types;

#[cfg(test)]
mod tests;

pub use classifier::{ClassifyError, Classifier};
pub use dispatcher::{DispatchSettings, Dispatcher, InboundOutcome};
pub use pipeline::{PipelineConfig, PipelineError, PipelineRunner, PromptLibrary};
pub use queue::{QueueError, TaskQueue};
pub use types::{AutonomyLevel, Classification, Intent, Task, TaskStatus, can_transition};
