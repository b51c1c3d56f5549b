use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use conductor::agent::Orchestrator;
use conductor::cli::{Cli, Commands};
use conductor::config::{self, AppConfig};
use conductor::context::RuntimeContext;
use conductor::debug::{DebugBus, listener};
use conductor::specialist::{SpawnRequest, Spawner};

/// How long to wait for in-flight debug pushes before exiting.
const DEBUG_FLUSH_LIMIT: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries only answers.
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let config = config::load_config(&cli).context("failed to load configuration")?;
    tracing::info!(
        model = %config.model,
        specialists = config.specialists.len(),
        providers = config.providers.len(),
        debug = config.debug.enabled,
        "Config loaded"
    );
    for issue in config.validate() {
        tracing::warn!("{issue}");
    }

    match cli.command {
        Commands::Chat => run_chat(config).await,
        Commands::Ask { message } => {
            let ctx = Arc::new(RuntimeContext::from_config(config)?);
            let mut orchestrator = Orchestrator::new(ctx.clone());
            let answer = orchestrator.chat(&message.join(" ")).await;
            println!("{answer}");
            ctx.debug.flush(DEBUG_FLUSH_LIMIT).await;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Spawn {
            specialist,
            task,
            context,
            max_turns,
        } => {
            let ctx = Arc::new(RuntimeContext::from_config(config)?);
            let mut request = SpawnRequest::new(specialist, task);
            request.context = context;
            request.max_turns = max_turns;

            let result = Spawner::new(ctx.clone()).spawn(request).await;
            println!("{}", serde_json::to_string_pretty(&result)?);
            ctx.debug.flush(DEBUG_FLUSH_LIMIT).await;
            Ok(if result.success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::Specialists => {
            if config.specialists.is_empty() {
                println!("No specialists configured.");
            }
            for def in &config.specialists {
                let providers = if def.providers.is_empty() {
                    "-".to_string()
                } else {
                    def.providers.join(", ")
                };
                println!(
                    "{}\n  {}\n  model: {}  providers: {}",
                    def.name,
                    def.description,
                    config.model_for_tier(def.model_tier.as_deref()),
                    providers
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Providers { check } => run_providers(config, check).await,
        Commands::DebugListen { addr } => {
            let addr = addr.unwrap_or_else(|| config.debug.listener_addr.clone());
            let socket = tokio::net::TcpListener::bind(&addr)
                .await
                .with_context(|| format!("failed to bind debug listener on {addr}"))?;
            let bus = Arc::new(DebugBus::for_listener(&config.debug));
            println!("Debug listener on http://{addr} (stream: /events/stream)");
            tokio::select! {
                result = listener::serve(socket, bus) => result.context("debug listener failed")?,
                _ = tokio::signal::ctrl_c() => tracing::info!("Debug listener shutting down"),
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run_chat(config: AppConfig) -> anyhow::Result<ExitCode> {
    let ctx = Arc::new(RuntimeContext::from_config(config)?);
    let mut orchestrator = Orchestrator::new(ctx.clone());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("conductor chat. /clear resets the conversation, /quit exits.");
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };
        let input = line.trim();

        match input {
            "" => continue,
            "/quit" | "/exit" => break,
            "/clear" => {
                orchestrator.clear();
                println!("(conversation cleared)");
            }
            "/usage" => {
                let usage = orchestrator.usage();
                println!(
                    "tokens: {} in, {} out, {} total",
                    usage.input_tokens,
                    usage.output_tokens,
                    usage.total()
                );
            }
            message => {
                let answer = orchestrator.chat(message).await;
                println!("{answer}\n");
            }
        }
    }
    ctx.debug.flush(DEBUG_FLUSH_LIMIT).await;
    Ok(ExitCode::SUCCESS)
}

async fn run_providers(config: AppConfig, check: bool) -> anyhow::Result<ExitCode> {
    let ctx = RuntimeContext::from_config(config)?;
    let manager = &ctx.connections;

    if manager.providers().next().is_none() {
        println!("No providers configured.");
        return Ok(ExitCode::SUCCESS);
    }

    for provider in manager.providers() {
        let auth = match &provider.auth {
            Some(auth) => format!(
                "{} ({})",
                auth.kind,
                match &auth.credential {
                    Some(var) if auth.credential_present() => format!("{var} set"),
                    Some(var) => format!("{var} missing"),
                    None => "no credential".to_string(),
                }
            ),
            None => "none".to_string(),
        };
        println!("{}  [{}]  auth: {}", provider.name, provider.transport.kind(), auth);

        if check {
            match manager.connect(&provider.name).await {
                Ok(connection) => {
                    let names: Vec<&str> =
                        connection.tools().iter().map(|t| t.name.as_str()).collect();
                    println!("  ok: {} tools: {}", names.len(), names.join(", "));
                    manager.close(connection).await;
                }
                Err(e) => println!("  failed: {e}"),
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}
