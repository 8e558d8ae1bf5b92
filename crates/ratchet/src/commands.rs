//! Ratchet command implementations

use anyhow::{Context, Result};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use ratchet_agent::tools::register_default_tools;
use ratchet_agent::{
    FileMentionExpander, Orchestrator, OrchestratorConfig, TaskError, ToolRegistry,
    COMPLETION_TOOL,
};
use ratchet_config::{self, Config};
use ratchet_provider::{schema_properties, ContentBlock, OpenRouterProvider};

/// Initialize config and workspace
pub async fn init_command() -> Result<()> {
    println!("Initializing Ratchet...");

    let config = ratchet_config::init()
        .await
        .context("failed to write default config")?;

    println!("Config:    {}", ratchet_config::config_path().display());
    println!("Workspace: {}", config.workspace_path().display());
    println!("\nNext steps:");
    println!("  1. Add your API key to ~/.ratchet/config.json");
    println!("     Get one at: https://openrouter.ai/keys");
    println!("  2. Run a task: ratchet run -m \"List the files in the workspace\"");

    Ok(())
}

/// Run tasks until completion, one per message
pub async fn run_command(message: Option<String>) -> Result<()> {
    let config = Config::load().await.context("failed to load config")?;

    let api_key = config
        .api_key()
        .context("No API key configured. Set one in ~/.ratchet/config.json")?;
    let provider =
        OpenRouterProvider::new(api_key, config.api_base(), Some(config.default_model()));

    let workspace = config.workspace_path();
    ratchet_config::paths::ensure_dir(&workspace)
        .await
        .with_context(|| format!("failed to create workspace {}", workspace.display()))?;

    let mut registry = ToolRegistry::new();
    register_default_tools(&mut registry, &workspace, config.engine.tool_timeout());
    let registry = Arc::new(registry);

    let engine = OrchestratorConfig::from_config(&config)
        .with_system_prompt(system_prompt(&registry, &workspace));
    let mentions = FileMentionExpander::new(workspace.clone())?;
    let mut orchestrator =
        Orchestrator::new(Arc::new(provider), registry, engine).with_mention_expander(mentions);

    let abort = orchestrator.abort_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, aborting after the current step");
            abort.abort();
        }
    });

    if let Some(msg) = message {
        return run_task(&mut orchestrator, msg).await;
    }

    println!("Interactive mode (type 'exit' to quit)");
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let mut input = String::new();
        if std::io::stdin().read_line(&mut input)? == 0 {
            break;
        }

        let input = input.trim();
        if input.is_empty() {
            continue;
        }
        if input == "exit" || input == "quit" {
            break;
        }

        if let Err(e) = run_task(&mut orchestrator, input.to_string()).await {
            eprintln!("Error: {:#}", e);
            if orchestrator.abort_handle().is_aborted() {
                break;
            }
        }
    }

    Ok(())
}

async fn run_task(orchestrator: &mut Orchestrator, message: String) -> Result<()> {
    info!("starting task");
    let outcome = orchestrator.run(vec![ContentBlock::text(message)]).await;

    let usage = orchestrator.usage();
    debug!(
        "tokens so far: {} prompt, {} completion",
        usage.prompt_tokens, usage.completion_tokens
    );
    if let Ok(stats) = serde_json::to_string(orchestrator.tool_usage()) {
        debug!("tool usage: {}", stats);
    }

    match outcome {
        Ok(true) => {
            println!("\n{}\n", orchestrator.completion().unwrap_or_default());
            Ok(())
        }
        Ok(false) => anyhow::bail!("task ended without completion"),
        Err(TaskError::MaxRetryExceeded { errors }) => {
            for (attempt, err) in errors.iter().enumerate() {
                eprintln!("  attempt {}: {}", attempt + 1, err);
            }
            anyhow::bail!("task failed after {} attempts", errors.len())
        }
        Err(e) => Err(e).context("task failed"),
    }
}

/// Describe the workspace and every tool, with the xml calling convention
fn system_prompt(registry: &ToolRegistry, workspace: &Path) -> String {
    let mut prompt = format!(
        "You are an agent that completes tasks by calling tools.\n\
         Your workspace is {}. File paths are relative to it.\n\n\
         Use at least one tool in every response. When the task is done, call \
         {} with the final result.\n\n\
         When tools are not offered as functions, write each call as xml tags:\n\n\
         <tool_name>\n<parameter_name>value</parameter_name>\n</tool_name>\n\n\
         # Tools\n",
        workspace.display(),
        COMPLETION_TOOL
    );

    for tool in registry.definitions() {
        let params = schema_properties(&tool.function.parameters);
        prompt.push_str(&format!(
            "\n## {}\n{}\nParameters: {}\n",
            tool.function.name,
            tool.function.description,
            if params.is_empty() {
                "none".to_string()
            } else {
                params.join(", ")
            }
        ));
    }
    prompt
}

/// Show status
pub async fn status_command() -> Result<()> {
    let config_path = ratchet_config::config_path();

    println!("Ratchet Status");
    println!(
        "Config:    {} {}",
        config_path.display(),
        if config_path.exists() {
            "[OK]"
        } else {
            "[Missing]"
        }
    );

    let config = Config::load().await.context("failed to load config")?;
    let workspace = config.workspace_path();
    println!(
        "Workspace: {} {}",
        workspace.display(),
        if workspace.exists() {
            "[OK]"
        } else {
            "[Missing]"
        }
    );
    println!("Model:     {}", config.default_model());
    println!(
        "API Key:   {}",
        if config.has_api_key() {
            "[Set]"
        } else {
            "[Missing]"
        }
    );

    let engine = &config.engine;
    println!("Protocol:  {:?}", engine.protocol);
    println!(
        "Limits:    {} retries, {} consecutive mistakes",
        engine.max_retry_attempts, engine.consecutive_mistake_limit
    );
    println!(
        "Timeouts:  api {}ms, tool {}ms",
        engine.api_request_timeout_ms, engine.tool_timeout_ms
    );
    println!(
        "Ceilings:  message {} bytes, parameter {} bytes",
        engine.max_message_bytes, engine.max_param_bytes
    );

    Ok(())
}
