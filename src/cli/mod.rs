use anyhow::{Context, Result, anyhow};
use console::style;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::core::config::AppConfig;
use crate::core::llm::AnthropicProvider;
use crate::core::routing::IntentRouter;
use crate::core::terminal::{self, GuideSection, print_error};
use crate::core::types::{ConversationTurn, SchemaMetadata};
use crate::core::warehouse::HttpWarehouseClient;
use crate::interfaces::web::{self, AppState};
use crate::logging;

fn print_help() {
    terminal::print_banner();

    GuideSection::new("Questions")
        .command("ask", "Classify a message and answer it")
        .command("query", "Generate, run and explain SQL for a question")
        .command("classify", "Show the detected intent of a message")
        .print();

    GuideSection::new("Server")
        .command("serve", "Start the HTTP API")
        .print();

    GuideSection::new("Options")
        .command("-m, --message <text>", "Message to answer")
        .command("--history <file>", "JSON array of {role, content} turns")
        .command("--schema <file>", "Schema document (overrides config)")
        .command("--config <file>", "Path to querybrain.toml")
        .command("--json", "Print the raw JSON response")
        .command("-v, --verbose", "Show logs on stderr")
        .command("--host / --port", "Bind address for serve")
        .print();

    println!(
        "\n {} {} <command> [options]\n",
        style("Usage:").bold(),
        style("querybrain").green()
    );
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct AskCommandArgs {
    pub message: String,
    pub history_path: Option<PathBuf>,
    pub schema_path: Option<PathBuf>,
    pub json: bool,
    pub verbose: bool,
}

pub(crate) fn parse_ask_command_args(args: &[String], start: usize) -> AskCommandArgs {
    let mut parsed = AskCommandArgs::default();
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--message" | "-m" => {
                if i + 1 < args.len() {
                    parsed.message = args[i + 1].clone();
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--history" => {
                if i + 1 < args.len() {
                    parsed.history_path = Some(PathBuf::from(&args[i + 1]));
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--schema" => {
                if i + 1 < args.len() {
                    parsed.schema_path = Some(PathBuf::from(&args[i + 1]));
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--config" => i += 2,
            "--json" => {
                parsed.json = true;
                i += 1;
            }
            "--verbose" | "-v" => {
                parsed.verbose = true;
                i += 1;
            }
            other => {
                // A bare argument is taken as the message.
                if parsed.message.is_empty() && !other.starts_with('-') {
                    parsed.message = other.to_string();
                }
                i += 1;
            }
        }
    }
    parsed
}

pub(crate) fn parse_serve_flags(
    args: &[String],
    start: usize,
    mut host: String,
    mut port: u16,
) -> (String, u16, Option<PathBuf>) {
    let mut schema_path = None;
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--port" => {
                if i + 1 < args.len() {
                    port = args[i + 1].parse().unwrap_or(port);
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--host" => {
                if i + 1 < args.len() {
                    host = args[i + 1].clone();
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--schema" => {
                if i + 1 < args.len() {
                    schema_path = Some(PathBuf::from(&args[i + 1]));
                    i += 2;
                } else {
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }
    (host, port, schema_path)
}

pub(crate) fn parse_config_flag(args: &[String]) -> Option<PathBuf> {
    args.iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(PathBuf::from)
}

async fn load_config(args: &[String]) -> Result<AppConfig> {
    let mut config = match parse_config_flag(args).or_else(AppConfig::default_path) {
        Some(path) => AppConfig::load(&path).await?,
        None => AppConfig::default(),
    };
    config.apply_env(|key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

pub(crate) async fn load_schema(path: Option<&Path>) -> Result<SchemaMetadata> {
    let path = path.ok_or_else(|| {
        anyhow!("No schema document configured. Pass --schema <file> or set schema_path in querybrain.toml.")
    })?;
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read schema document {:?}", path))?;
    SchemaMetadata::from_json_str(&raw)
        .with_context(|| format!("Schema document {:?} is not valid JSON", path))
}

pub(crate) async fn load_history(path: Option<&Path>) -> Result<Vec<ConversationTurn>> {
    let Some(path) = path else {
        return Ok(Vec::new());
    };
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read history file {:?}", path))?;
    serde_json::from_str(&raw).with_context(|| format!("History file {:?} is malformed", path))
}

fn build_router(config: &AppConfig) -> Result<IntentRouter> {
    let api_key = config.llm.api_key.clone().ok_or_else(|| {
        anyhow!("No Anthropic API key configured. Set ANTHROPIC_API_KEY or [llm] api_key.")
    })?;
    let llm = Arc::new(AnthropicProvider::new(api_key, config.llm.base_url.clone()));
    let warehouse = Arc::new(HttpWarehouseClient::new(
        &config.warehouse,
        config.warehouse.token.clone(),
    ));
    Ok(IntentRouter::from_config(llm, warehouse, config))
}

/// Token cancelled on Ctrl+C, so an in-flight statement is cancelled too.
fn ctrl_c_token() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            child.cancel();
        }
    });
    token
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run_question(cmd: &str, args: &[String], config: &AppConfig) -> Result<()> {
    let parsed = parse_ask_command_args(args, 2);
    if parsed.message.trim().is_empty() {
        print_help();
        return Err(anyhow!("--message is required for `{}`", cmd));
    }
    logging::init_tracing(config.log_level(), !parsed.verbose);

    let router = build_router(config)?;
    let history = load_history(parsed.history_path.as_deref()).await?;
    let cancel = ctrl_c_token();

    match cmd {
        "classify" => {
            let intent = router
                .classifier()
                .classify_with_cancel(&parsed.message, &history, &cancel)
                .await?;
            if parsed.json {
                print_json(&serde_json::json!({ "intent": intent.as_str() }))?;
            } else {
                terminal::print_status("Intent", intent.as_str());
            }
        }
        "query" => {
            let schema_path = parsed.schema_path.as_deref().or(config.schema_path.as_deref());
            let schema = load_schema(schema_path).await?;
            let envelope = router
                .pipeline()
                .orchestrate_with_cancel(&parsed.message, &schema, &history, &cancel)
                .await;
            if parsed.json {
                print_json(&envelope)?;
            } else {
                terminal::print_envelope(&envelope);
            }
        }
        _ => {
            let schema_path = parsed.schema_path.as_deref().or(config.schema_path.as_deref());
            let schema = load_schema(schema_path).await?;
            let response = router
                .respond_with_cancel(&parsed.message, &schema, &history, &cancel)
                .await?;
            if parsed.json {
                print_json(&response)?;
            } else {
                terminal::print_intent_response(&response);
            }
        }
    }
    Ok(())
}

async fn run_serve(args: &[String], config: &AppConfig) -> Result<()> {
    let (host, port, schema_flag) =
        parse_serve_flags(args, 2, config.server.host.clone(), config.server.port);
    let log_tx = logging::init_tracing(config.log_level(), false);

    let schema = load_schema(schema_flag.as_deref().or(config.schema_path.as_deref())).await?;
    let router = Arc::new(build_router(config)?);
    info!("Starting querybrain API (model: {})", config.llm.model);

    GuideSection::new("API Server")
        .status("Model", &config.llm.model)
        .status("Database", &config.warehouse.database)
        .status("Warehouse", &config.warehouse.endpoint)
        .blank()
        .print();
    terminal::print_link("API", &format!("http://{}:{}/api", host, port));
    terminal::print_info("Press Ctrl+C to stop the server.");
    println!();

    let state = AppState {
        router,
        schema,
        log_tx,
        api_port: port,
        shutdown: CancellationToken::new(),
    };
    web::serve(state, &host).await?;
    terminal::print_success("Server stopped.");
    Ok(())
}

pub async fn run_main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let cmd = args.get(1).map(String::as_str).unwrap_or("help");

    match cmd {
        "ask" | "query" | "classify" => {
            let config = load_config(&args).await?;
            run_question(cmd, &args, &config).await
        }
        "serve" => {
            let config = load_config(&args).await?;
            run_serve(&args, &config).await
        }
        "help" | "--help" | "-h" => {
            print_help();
            Ok(())
        }
        other => {
            print_error(&format!("Unknown command: {}", other));
            print_help();
            Ok(())
        }
    }
}
