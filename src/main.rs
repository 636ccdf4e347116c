use anyhow::{anyhow, Context};
use clap::{Args, Parser, Subcommand};
use coding_manager_lib::agent_loop::{AgentCallbacks, AgentLoop, AgentLoopConfig, AgentServices, AgentStatus, LogKind};
use coding_manager_lib::channel::{ChannelConfig, MessageChannel};
use coding_manager_lib::config::{merge_overrides, ConfigManager, ConfigOverrides, ManagerConfig, StepMode};
use coding_manager_lib::events::TestStatus;
use coding_manager_lib::learning::LearningStore;
use coding_manager_lib::preview::{HtmlFileTarget, HttpAnalysisClient};
use coding_manager_lib::remote::{RemoteClient, TestTarget};
use coding_manager_lib::server::{self, BackendState, MockBackend};
use coding_manager_lib::shutdown::{register_signal_handlers, ShutdownHandler, ShutdownResult, ShutdownState};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Coding manager - autonomous improvement loop for a live coding workspace
#[derive(Parser, Debug)]
#[command(name = "coding-manager")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Project directory holding .coding-manager/config.yaml
    #[arg(long, global = true, default_value = ".")]
    project: PathBuf,

    /// Backend base URL (http://host:port); the WebSocket URL is derived from it
    #[arg(long, global = true, env = "CODING_MANAGER_BACKEND_URL")]
    backend_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the mock backend (WebSocket channel plus analysis/editor endpoints)
    Serve {
        /// Port to bind to (overrides server.port)
        #[arg(long)]
        port: Option<u16>,

        /// Probability that a simulated test fails
        #[arg(long, default_value = "0.1")]
        failure_rate: f64,
    },

    /// Run the autonomous loop against a preview page
    Run(RunArgs),

    /// Submit one instruction against a file
    Prompt {
        #[arg(long)]
        file_id: i64,

        /// File whose content is sent along with the instruction
        #[arg(long)]
        file: Option<PathBuf>,

        instruction: String,
    },

    /// Run one test or every test for a set of files
    Test {
        #[arg(long, conflicts_with = "file_ids", required_unless_present = "file_ids")]
        test_id: Option<i64>,

        #[arg(long, value_delimiter = ',')]
        file_ids: Vec<i64>,
    },

    /// Print recent prompt history and top keywords
    History {
        #[arg(long, default_value = "10")]
        limit: usize,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// HTML file rendered as the preview
    #[arg(long)]
    preview: PathBuf,

    #[arg(long)]
    interval_ms: Option<u64>,

    #[arg(long)]
    max_iterations: Option<u32>,

    /// Step implementation: placeholder or remote
    #[arg(long)]
    steps: Option<StepMode>,

    /// Workspace files checked by the remote steps (ids are assigned in order, from 1)
    #[arg(long = "analyze")]
    analyze: Vec<PathBuf>,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    if let Err(e) = dispatch(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    let mut overrides = ConfigOverrides::default();
    if let Some(ref url) = cli.backend_url {
        let (http_url, ws_url) = backend_urls(url);
        overrides.http_url = Some(http_url);
        overrides.ws_url = Some(ws_url);
    }

    match cli.command {
        Command::Serve { port, failure_rate } => {
            overrides.port = port;
            let config = load_config(&cli.project, &overrides)?;
            serve(config, failure_rate).await
        }
        Command::Run(args) => {
            overrides.interval_ms = args.interval_ms;
            overrides.max_iterations = args.max_iterations;
            overrides.steps = args.steps;
            let config = load_config(&cli.project, &overrides)?;
            run_loop(config, args).await
        }
        Command::Prompt {
            file_id,
            file,
            instruction,
        } => {
            let config = load_config(&cli.project, &overrides)?;
            prompt(config, file_id, file, &instruction).await
        }
        Command::Test { test_id, file_ids } => {
            let config = load_config(&cli.project, &overrides)?;
            let target = match test_id {
                Some(id) => TestTarget::Single(id),
                None => TestTarget::Files(file_ids),
            };
            run_test(config, target).await
        }
        Command::History { limit } => {
            let config = load_config(&cli.project, &overrides)?;
            print_history(&config, limit);
            Ok(())
        }
    }
}

fn load_config(project: &Path, overrides: &ConfigOverrides) -> anyhow::Result<ManagerConfig> {
    let file_config = ConfigManager::new(project).read().map_err(|e| anyhow!(e))?;
    Ok(merge_overrides(&file_config, overrides))
}

/// Derive the HTTP base URL and WebSocket URL from a single backend URL
fn backend_urls(url: &str) -> (String, String) {
    let base = url.trim_end_matches('/');
    let base = base.strip_suffix("/ws").unwrap_or(base);

    let (http_url, ws_url) = if let Some(rest) = base.strip_prefix("https://") {
        (base.to_string(), format!("wss://{}", rest))
    } else if let Some(rest) = base.strip_prefix("http://") {
        (base.to_string(), format!("ws://{}", rest))
    } else if let Some(rest) = base.strip_prefix("wss://") {
        (format!("https://{}", rest), base.to_string())
    } else if let Some(rest) = base.strip_prefix("ws://") {
        (format!("http://{}", rest), base.to_string())
    } else {
        (format!("http://{}", base), format!("ws://{}", base))
    };

    (http_url, format!("{}/ws", ws_url))
}

fn remote_client(config: &ManagerConfig) -> RemoteClient {
    let channel = MessageChannel::new(ChannelConfig::from(&config.backend));
    let learning = Arc::new(LearningStore::open(&config.learning));
    RemoteClient::new(channel, learning)
}

async fn serve(config: ManagerConfig, failure_rate: f64) -> anyhow::Result<()> {
    let shutdown_state = ShutdownState::new();
    if let Err(e) = register_signal_handlers(shutdown_state.clone()) {
        log::warn!("Failed to register signal handlers: {}", e);
    }

    let state = BackendState::new(
        MockBackend::new().with_failure_rate(failure_rate),
        shutdown_state,
    );
    server::run_server(&config.server.bind, config.server.port, state)
        .await
        .map_err(|e| anyhow!(e))
}

async fn run_loop(config: ManagerConfig, args: RunArgs) -> anyhow::Result<()> {
    let shutdown_state = ShutdownState::new();
    if let Err(e) = register_signal_handlers(shutdown_state.clone()) {
        log::warn!("Failed to register signal handlers: {}", e);
    }

    let client = remote_client(&config);
    let http = Arc::new(HttpAnalysisClient::new(
        config.backend.http_url.clone(),
        config.backend.request_timeout(),
    ));

    let mut services = AgentServices::default()
        .with_analyzer(http.clone())
        .with_editor(http);
    if config.agent.steps == StepMode::Remote {
        let files: Vec<(i64, PathBuf)> = args
            .analyze
            .iter()
            .enumerate()
            .map(|(i, path)| (i as i64 + 1, path.clone()))
            .collect();
        let file_ids = files.iter().map(|(id, _)| *id).collect();
        services = services.with_remote_steps(client.clone(), file_ids, files);
    }

    let agent = AgentLoop::new(AgentLoopConfig::from(&config.agent), services);
    agent.set_preview_frame(Arc::new(HtmlFileTarget::new(args.preview)));
    agent.register_callbacks(
        AgentCallbacks::new()
            .on_status_change(|status| println!("status: {}", status))
            .on_log(|kind, message| {
                let tag = match kind {
                    LogKind::Info => "info",
                    LogKind::Success => "ok",
                    LogKind::Warning => "warn",
                    LogKind::Error => "error",
                };
                println!("[{}] {}", tag, message);
            })
            .on_file_update(|file_id, content| {
                println!("file {} updated ({} bytes)", file_id, content.len())
            }),
    );
    let watcher = agent.watch_file_updates(client.file_updates());

    agent.start().await;

    // Run until the loop pauses at its ceiling, is stopped, or a signal arrives
    while !shutdown_state.is_shutdown_requested() {
        if matches!(agent.status(), AgentStatus::Paused | AgentStatus::Idle) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    let handler = ShutdownHandler::with_state(shutdown_state);
    let stopping = agent.clone();
    let result = handler
        .handle_shutdown(move || async move {
            stopping.stop();
            watcher.abort();

            let channel = client.channel();
            let result = ShutdownResult {
                iterations_completed: stopping.state().current_iteration,
                requests_abandoned: channel.pending_len(),
                messages_dropped: channel.queued_len(),
                errors: Vec::new(),
            };
            channel.disconnect();
            Ok(result)
        })
        .await?;

    let improvements = agent.state().improvements;
    println!(
        "Finished {} iteration(s): {} code, {} ui, {} tests, {} errors fixed",
        result.iterations_completed,
        improvements.code_improvements,
        improvements.ui_improvements,
        improvements.tests_fixed,
        improvements.errors_fixed
    );
    Ok(())
}

async fn prompt(
    config: ManagerConfig,
    file_id: i64,
    file: Option<PathBuf>,
    instruction: &str,
) -> anyhow::Result<()> {
    let content = match file {
        Some(path) => Some(
            std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?,
        ),
        None => None,
    };

    let client = remote_client(&config);
    let suggestions = client
        .learning()
        .get_suggestions(content.as_deref().unwrap_or_default(), instruction);
    for suggestion in &suggestions {
        log::debug!("Suggestion: {}", suggestion);
    }

    let result = client
        .submit_instruction(instruction, file_id, content.as_deref())
        .await;
    client.channel().disconnect();
    let response = result?;

    println!("{}", response.response);
    if !response.code_snippet.is_empty() {
        println!("\n{}", response.code_snippet);
    }
    for suggestion in &response.suggestions {
        println!("- {}", suggestion);
    }
    Ok(())
}

async fn run_test(config: ManagerConfig, target: TestTarget) -> anyhow::Result<()> {
    let client = remote_client(&config);
    let result = client.run_test(target).await;
    client.channel().disconnect();
    let outcome = result?;

    for result in outcome.results() {
        let status = match result.status {
            TestStatus::Passed => "PASS",
            TestStatus::Failed => "FAIL",
        };
        println!(
            "{} test {}: {} (coverage {:.1}%, {} ms)",
            status,
            result.test_id,
            result.result,
            result.details.coverage,
            result.details.execution_time_ms
        );
    }
    println!(
        "{}/{} passed",
        outcome.passed_count(),
        outcome.results().len()
    );
    Ok(())
}

fn print_history(config: &ManagerConfig, limit: usize) {
    let store = LearningStore::open(&config.learning);
    let history = store.history();
    let skip = history.len().saturating_sub(limit);

    for item in history.iter().skip(skip) {
        let outcome = match &item.result {
            Some(result) if result.success => "ok",
            Some(_) => "failed",
            None => "pending",
        };
        println!(
            "{}  [{}]  {}",
            item.timestamp.format("%Y-%m-%d %H:%M:%S"),
            outcome,
            item.prompt
        );
    }

    let keywords = store.top_keywords(5);
    if !keywords.is_empty() {
        println!("\nTop keywords: {}", keywords.join(", "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_urls_from_http() {
        let (http, ws) = backend_urls("http://localhost:3421/");
        assert_eq!(http, "http://localhost:3421");
        assert_eq!(ws, "ws://localhost:3421/ws");
    }

    #[test]
    fn test_backend_urls_from_ws() {
        let (http, ws) = backend_urls("wss://example.com/ws");
        assert_eq!(http, "https://example.com");
        assert_eq!(ws, "wss://example.com/ws");
    }

    #[test]
    fn test_cli_parses_test_file_ids() {
        let cli = Cli::parse_from(["coding-manager", "test", "--file-ids", "1,2,3"]);
        match cli.command {
            Command::Test { test_id, file_ids } => {
                assert_eq!(test_id, None);
                assert_eq!(file_ids, vec![1, 2, 3]);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
