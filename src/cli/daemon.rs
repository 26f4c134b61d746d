use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast};
use tracing::{info, warn};

use crate::core::config::{RelayConfig, secret_from_env};
use crate::core::lifecycle::LifecycleManager;
use crate::core::memory::MemorySystem;
use crate::core::orchestrator::pipeline::defaults::builtin_pipelines;
use crate::core::orchestrator::{
    Classifier, DispatchSettings, Dispatcher, PromptLibrary, TaskQueue,
};
use crate::core::reporter::{LogSurface, MessagingSurface, Reporter};
use crate::core::runtime::{AgentRuntime, HttpAgentRuntime};
use crate::core::scheduler::CronScheduler;
use crate::interfaces::slack::{SlackChannel, SlackSurface};
use crate::interfaces::web::{ApiServer, ApiServerConfig};

/// Wire the agent runtime, audit store, reporter and queue into a dispatcher.
pub(crate) async fn build_dispatcher(
    config: &RelayConfig,
    data_dir: &Path,
) -> Result<(Arc<Dispatcher>, Arc<MemorySystem>)> {
    let memory = Arc::new(MemorySystem::new(data_dir).await?);

    let runtime: Arc<dyn AgentRuntime> = Arc::new(HttpAgentRuntime::new(
        config.agent.endpoint.clone(),
        secret_from_env(&config.agent.api_key_env),
        config.agent.timeout_secs,
    )?);

    let surface: Arc<dyn MessagingSurface> = match secret_from_env(&config.slack.bot_token_env) {
        Some(token) => {
            info!("Reporting to Slack");
            Arc::new(SlackSurface::new(token))
        }
        None => {
            info!(
                "No Slack bot token in ${}, replies go to the log",
                config.slack.bot_token_env
            );
            Arc::new(LogSurface::default())
        }
    };

    let settings = DispatchSettings {
        lesson_recall: config.lessons.recall_limit,
        lesson_field_budget: config.lessons.field_budget,
        retry_limit: config.pipeline.retry_limit,
        model: config.agent.model.clone(),
    };

    let dispatcher = Dispatcher::new(
        Arc::new(TaskQueue::new(config.queue.max_concurrent)),
        Classifier::new(runtime.clone(), config.classifier.model.clone()),
        runtime,
        memory.clone(),
        Reporter::new(surface, config.reporter.chunk_limit),
        PromptLibrary::builtin().with_overrides(&config.prompts),
        builtin_pipelines(),
        settings,
    )?;

    Ok((Arc::new(dispatcher), memory))
}

/// Run the long-lived service until Ctrl+C: API server, Slack channel and cron schedules.
pub(crate) async fn run_service(
    config: RelayConfig,
    data_dir: &Path,
    api_host: String,
    api_port: u16,
    log_tx: broadcast::Sender<String>,
) -> Result<()> {
    let (dispatcher, memory) = build_dispatcher(&config, data_dir).await?;

    let mut lifecycle = LifecycleManager::new().await?;

    let mut scheduler = CronScheduler::new(memory.clone());
    scheduler.register_configured(&config.schedules, &dispatcher)?;
    scheduler.install(&lifecycle.scheduler).await?;
    if scheduler.is_empty() {
        info!("No schedules configured");
    }
    let scheduler = Arc::new(scheduler);

    if config.api.token.is_none() && api_host != "127.0.0.1" && api_host != "localhost" {
        warn!(
            "API bound to {} without [api].token; protected routes will refuse requests",
            api_host
        );
    }

    let memory_component = Arc::new(Mutex::new(memory.as_ref().clone()));
    lifecycle.attach("memory", memory_component);
    lifecycle.attach(
        "api",
        Arc::new(Mutex::new(ApiServer::new(ApiServerConfig {
            dispatcher: dispatcher.clone(),
            scheduler,
            log_tx,
            api_host,
            api_port,
            api_token: config.api.token.clone(),
        }))),
    );
    lifecycle.attach(
        "slack",
        Arc::new(Mutex::new(SlackChannel::new(
            config.slack.clone(),
            dispatcher.clone(),
        ))),
    );

    lifecycle.start().await?;
    info!("relay is ready. Press Ctrl+C to stop.");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down relay...");
    lifecycle.shutdown().await?;
    Ok(())
}
