mod daemon;

use anyhow::{Result, anyhow};
use console::style;
use std::path::Path;
use tracing_subscriber::EnvFilter;

use crate::core::config::{CONFIG_FILE, RelayConfig};
use crate::core::terminal::{self, print_error, print_info, print_status, print_success};
use crate::logging::LogBroadcastWriter;
use crate::platform::{NativePlatform, Platform};

pub const LOG_ENV: &str = "RELAY_LOG";

fn print_help() {
    terminal::print_banner();

    println!(" {}", style("Commands").bold().underlined());
    print_status("serve", "Run the service: API, Slack events and schedules");
    print_status("run", "Classify and run one request, then exit");
    print_status("tasks", "Show recent tasks from the audit store");
    print_status("lessons", "Show recent lessons learned from tool failures");
    print_status("config", "Print the effective configuration");
    print_status("help", "Show this message");

    println!(
        "\n {} {} <command> [flags]\n",
        style("Usage:").bold(),
        style("relay").green()
    );
    println!(
        " {}",
        style("serve [--api-host <host>] [--api-port <port>]").dim()
    );
    println!(
        " {}",
        style("run --prompt <text> [--thread <id>]").dim()
    );
    println!(" {}\n", style("tasks|lessons [--limit <n>]").dim());
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RunCommandArgs {
    pub prompt: String,
    pub thread: String,
}

pub(crate) fn parse_run_command_args(args: &[String], start: usize) -> RunCommandArgs {
    let mut prompt = String::new();
    let mut thread = "cli".to_string();
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--prompt" | "-p" => {
                if i + 1 < args.len() {
                    prompt = args[i + 1].clone();
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--thread" | "-t" => {
                if i + 1 < args.len() {
                    thread = args[i + 1].clone();
                    i += 2;
                } else {
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }
    RunCommandArgs { prompt, thread }
}

pub(crate) fn parse_api_server_flags(
    args: &[String],
    start: usize,
    mut api_host: String,
    mut api_port: u16,
) -> (String, u16) {
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--api-port" => {
                if i + 1 < args.len() {
                    api_port = args[i + 1].parse().unwrap_or(api_port);
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--api-host" => {
                if i + 1 < args.len() {
                    api_host = args[i + 1].clone();
                    i += 2;
                } else {
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }
    (api_host, api_port)
}

pub(crate) fn parse_limit_flag(args: &[String], start: usize, default: usize) -> usize {
    let mut i = start;
    while i < args.len() {
        if args[i] == "--limit" || args[i] == "-n" {
            return args
                .get(i + 1)
                .and_then(|v| v.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(default);
        }
        i += 1;
    }
    default
}

/// Install the global subscriber. `RELAY_LOG` wins over the configured level.
fn init_logging(config: &RelayConfig, suppress_stdout: bool) -> LogBroadcastWriter {
    let writer = LogBroadcastWriter::new(suppress_stdout);
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer.clone())
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();
    writer
}

pub async fn run_main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let data_dir = NativePlatform::data_dir();

    let Some(cmd) = args.get(1).map(String::as_str) else {
        print_help();
        return Ok(());
    };

    match cmd {
        "serve" => {
            tokio::fs::create_dir_all(&data_dir).await?;
            NativePlatform::restrict_dir_permissions(&data_dir);
            let config = RelayConfig::load(&data_dir).await?;
            let writer = init_logging(&config, false);
            let (api_host, api_port) =
                parse_api_server_flags(&args, 2, config.api.host.clone(), config.api.port);

            terminal::print_banner();
            print_status("Data", &data_dir.display().to_string());
            terminal::print_link("API", &format!("http://{}:{}/api", api_host, api_port));
            println!();

            daemon::run_service(config, &data_dir, api_host, api_port, writer.sender).await?;
            terminal::print_goodbye();
            Ok(())
        }
        "run" => {
            let parsed = parse_run_command_args(&args, 2);
            if parsed.prompt.trim().is_empty() {
                print_error("Error: --prompt is required for run mode.");
                print_help();
                return Ok(());
            }
            tokio::fs::create_dir_all(&data_dir).await?;
            let config = RelayConfig::load(&data_dir).await?;
            init_logging(&config, false);
            run_once(&config, &data_dir, &parsed).await
        }
        "tasks" => {
            let limit = parse_limit_flag(&args, 2, 20);
            show_tasks(&data_dir, limit).await
        }
        "lessons" => {
            let limit = parse_limit_flag(&args, 2, 10);
            show_lessons(&data_dir, limit).await
        }
        "config" => {
            let config = RelayConfig::load(&data_dir).await?;
            print_info(&format!(
                "{} ({})",
                data_dir.join(CONFIG_FILE).display(),
                if data_dir.join(CONFIG_FILE).exists() {
                    "loaded"
                } else {
                    "defaults"
                }
            ));
            println!("{}", config.to_toml()?);
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_help();
            Ok(())
        }
        _ => {
            print_error(&format!("Unknown command: {}", cmd));
            print_help();
            Ok(())
        }
    }
}

async fn run_once(config: &RelayConfig, data_dir: &Path, parsed: &RunCommandArgs) -> Result<()> {
    let (dispatcher, _) = daemon::build_dispatcher(config, data_dir).await?;

    let classification = dispatcher
        .classifier()
        .classify(&parsed.prompt)
        .await
        .map_err(|e| anyhow!("could not classify request: {}", e))?;
    if let Some(question) = &classification.clarify_question {
        terminal::print_warn(&format!(
            "The request is ambiguous ({}); running it as written.",
            question
        ));
    }

    let task = dispatcher.prepare_task(&parsed.thread, &parsed.prompt, &classification);
    print_info(&format!(
        "{} [{}] {}",
        task.id,
        task.intent.as_str(),
        task.summary
    ));
    let finished = dispatcher.submit_and_wait(task).await?;
    match finished.error {
        None => {
            print_success(&format!("Task {} {}", finished.id, finished.status.as_str()));
            Ok(())
        }
        Some(error) => Err(anyhow!(
            "task {} {}: {}",
            finished.id,
            finished.status.as_str(),
            error
        )),
    }
}

async fn open_memory(data_dir: &Path) -> Result<Option<crate::core::memory::MemorySystem>> {
    if !data_dir.exists() {
        print_info("Nothing recorded yet. Run 'relay serve' or 'relay run' first.");
        return Ok(None);
    }
    Ok(Some(crate::core::memory::MemorySystem::new(data_dir).await?))
}

async fn show_tasks(data_dir: &Path, limit: usize) -> Result<()> {
    let Some(memory) = open_memory(data_dir).await? else {
        return Ok(());
    };
    let tasks = memory.list_tasks(limit).await?;
    if tasks.is_empty() {
        print_info("No tasks recorded.");
        return Ok(());
    }
    for task in tasks {
        println!(
            " {} {} {} {}",
            style(&task.updated_at).dim(),
            terminal::status_style(&task.status),
            style(&task.task_id).cyan(),
            task.summary
        );
        if let Some(error) = &task.error {
            println!("     {}", style(error).red());
        }
    }
    Ok(())
}

async fn show_lessons(data_dir: &Path, limit: usize) -> Result<()> {
    let Some(memory) = open_memory(data_dir).await? else {
        return Ok(());
    };
    let lessons = memory.recent_lessons(limit).await?;
    if lessons.is_empty() {
        print_info("No lessons recorded.");
        return Ok(());
    }
    println!(
        "{}",
        crate::core::lessons::format_lessons_for_prompt(&lessons)
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{parse_api_server_flags, parse_limit_flag, parse_run_command_args};

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parse_run_command_args_reads_prompt_and_thread() {
        let args = argv(&["relay", "run", "--prompt", "hello", "--thread", "C1"]);
        let parsed = parse_run_command_args(&args, 2);
        assert_eq!(parsed.prompt, "hello");
        assert_eq!(parsed.thread, "C1");
    }

    #[test]
    fn parse_run_command_args_defaults_thread() {
        let args = argv(&["relay", "run", "-p", "hello"]);
        assert_eq!(parse_run_command_args(&args, 2).thread, "cli");
    }

    #[test]
    fn parse_api_server_flags_reads_host_and_port() {
        let args = argv(&["relay", "serve", "--api-host", "0.0.0.0", "--api-port", "19000"]);
        let (host, port) = parse_api_server_flags(&args, 2, "127.0.0.1".to_string(), 17900);
        assert_eq!(host, "0.0.0.0");
        assert_eq!(port, 19000);
    }

    #[test]
    fn parse_api_server_flags_keeps_port_on_garbage() {
        let args = argv(&["relay", "serve", "--api-port", "lots"]);
        let (_, port) = parse_api_server_flags(&args, 2, "127.0.0.1".to_string(), 17900);
        assert_eq!(port, 17900);
    }

    #[test]
    fn parse_limit_flag_falls_back_on_zero() {
        assert_eq!(parse_limit_flag(&argv(&["relay", "tasks", "--limit", "5"]), 2, 20), 5);
        assert_eq!(parse_limit_flag(&argv(&["relay", "tasks", "--limit", "0"]), 2, 20), 20);
        assert_eq!(parse_limit_flag(&argv(&["relay", "tasks"]), 2, 20), 20);
    }
}
