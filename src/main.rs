//! sleepwise server and CLI
//!
//! Run with: cargo run -- --serve
//! Or one-shot: cargo run -- chat how much sleep do I need

use anyhow::{bail, Context, Result};
use serde_json::{json, Map, Value};
use sleepwise::{
    load_model, server, Advisor, ChatRequest, FileStore, GoogleSheetsMirror, MemoryStore,
    PredictionSource, RegisterRequest, Settings, SqliteStore, StatsOutcome, StorageBackend, UserStore,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "\
Usage: sleepwise [--config=PATH] <command>

Commands:
  --serve [--port=N]          Run the HTTP API
  chat <text> [--user=ID]     Classify and answer one message
  predict name=value... [--user=ID] [--json]
                              Predict sleep quality from features
  stats <id> [--json]         Summarize a user's history
  --config-dump               Print the effective configuration as TOML
  --validate-config <path>    Check a configuration file and exit
  (no command)                Interactive chat";

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sleepwise=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let args: Vec<String> = std::env::args().collect();
    let config_path = args
        .iter()
        .find_map(|a| a.strip_prefix("--config="))
        .map(PathBuf::from);
    // Global flags stripped; everything else is the command line proper
    let args: Vec<String> = args
        .into_iter()
        .skip(1)
        .filter(|a| !a.starts_with("--config="))
        .collect();

    let user = args
        .iter()
        .find_map(|a| a.strip_prefix("--user="))
        .map(String::from);
    let json_output = args.iter().any(|a| a == "--json");

    // COMMAND MODE
    if let Some(command) = args.first() {
        match command.as_str() {
            "--help" | "-h" => {
                println!("{}", USAGE);
                return Ok(());
            }
            "--validate-config" => {
                let path = args.get(1).context("Usage: --validate-config <path>")?;
                return run_validate_config(&PathBuf::from(path));
            }
            "--config-dump" => {
                let settings = Settings::load(config_path.as_deref())?;
                print!("{}", settings.to_toml()?);
                return Ok(());
            }
            "--serve" => {
                let mut settings = Settings::load(config_path.as_deref())?;
                if let Some(port) = args
                    .iter()
                    .find_map(|a| a.strip_prefix("--port="))
                {
                    settings.server.port = port
                        .parse()
                        .with_context(|| format!("Invalid --port value: {}", port))?;
                }
                return run_http_server(&settings).await;
            }
            "chat" => {
                let text = positional(&args[1..]).join(" ");
                if text.is_empty() {
                    bail!("Usage: chat <text> [--user=ID]");
                }
                let advisor = build_advisor(&Settings::load(config_path.as_deref())?)?;
                return run_chat(&advisor, &text, user, json_output);
            }
            "predict" => {
                let pairs = positional(&args[1..]);
                let advisor = build_advisor(&Settings::load(config_path.as_deref())?)?;
                return run_predict(&advisor, &pairs, user, json_output).await;
            }
            "stats" => {
                let id = positional(&args[1..])
                    .into_iter()
                    .next()
                    .context("Usage: stats <id>")?;
                let advisor = build_advisor(&Settings::load(config_path.as_deref())?)?;
                return run_stats(&advisor, &id, json_output);
            }
            other => bail!("Unknown command: {}\n\n{}", other, USAGE),
        }
    }

    // REPL MODE
    let advisor = build_advisor(&Settings::load(config_path.as_deref())?)?;
    run_cli_mode(&advisor, user).await
}

/// Arguments that are not `--flags`
fn positional(args: &[String]) -> Vec<String> {
    args.iter().filter(|a| !a.starts_with("--")).cloned().collect()
}

fn build_store(settings: &Settings) -> Result<Arc<dyn UserStore>> {
    let store: Arc<dyn UserStore> = match settings.storage.backend {
        StorageBackend::Memory => Arc::new(MemoryStore::new()),
        StorageBackend::File => {
            let path = settings.storage_path();
            Arc::new(FileStore::open(&path).with_context(|| format!("Failed to open user file {:?}", path))?)
        }
        StorageBackend::Sqlite => Arc::new(SqliteStore::open(&settings.storage_path())?),
    };
    Ok(store)
}

fn build_advisor(settings: &Settings) -> Result<Advisor> {
    let store = build_store(settings)?;
    let mut advisor = Advisor::new(settings.advisor.clone(), store).context("Invalid advisor configuration")?;

    if let Some(path) = &settings.model.path {
        let model = load_model(path, settings.model.kind)?;
        advisor = advisor.with_model(model, Duration::from_millis(settings.model.timeout_ms))?;
    } else {
        tracing::info!("No model configured, predictions use the fallback rule");
    }

    if let Some(mirror) = GoogleSheetsMirror::from_settings(&settings.sheets)? {
        tracing::info!("Mirroring persisted rows to Google Sheets");
        advisor = advisor.with_mirror(Arc::new(mirror), &settings.sheets);
    }

    Ok(advisor)
}

fn run_validate_config(path: &Path) -> Result<()> {
    let settings = Settings::from_file(path)?;
    settings.advisor.validate().context("Invalid advisor configuration")?;
    if let Some(model_path) = &settings.model.path {
        load_model(model_path, settings.model.kind)?;
    }
    println!("Configuration OK: {}", path.display());
    Ok(())
}

async fn run_http_server(settings: &Settings) -> Result<()> {
    let advisor = Arc::new(build_advisor(settings)?);
    let addr = format!("{}:{}", settings.server.host, settings.server.port);

    println!("sleepwise HTTP server");
    println!("  POST /chat         - Ask a sleep question");
    println!("  POST /predict      - Predict sleep quality");
    println!("  POST /register     - Create a user");
    println!("  POST /stats        - Summarize a user's history");
    println!("  POST /prescription - Follow-up plan from the latest assessment");
    println!("  GET  /health       - Health check");

    server::serve(advisor, &addr).await
}

fn run_chat(advisor: &Advisor, text: &str, user: Option<String>, json_output: bool) -> Result<()> {
    let reply = advisor.chat(ChatRequest {
        message: text.to_string(),
        user_identifier: user,
    })?;
    if json_output {
        println!("{}", serde_json::to_string_pretty(&reply)?);
    } else {
        println!("[{}]\n{}", reply.topic, reply.response);
    }
    Ok(())
}

/// `name=value` pairs to a predict request body
fn predict_body(pairs: &[String], user: Option<String>) -> Result<Value> {
    let mut features = Map::new();
    for pair in pairs {
        let (name, value) = pair
            .split_once('=')
            .with_context(|| format!("Expected name=value, got {:?}", pair))?;
        features.insert(name.trim().to_string(), Value::String(value.trim().to_string()));
    }
    let mut body = json!({ "features": features });
    if let Some(user) = user {
        body["user_identifier"] = Value::String(user);
    }
    Ok(body)
}

async fn run_predict(advisor: &Advisor, pairs: &[String], user: Option<String>, json_output: bool) -> Result<()> {
    let body = predict_body(pairs, user)?;
    let reply = advisor.predict(&body).await?;
    if json_output {
        println!("{}", serde_json::to_string_pretty(&reply)?);
        return Ok(());
    }

    let source = match reply.source {
        PredictionSource::Model => "model",
        PredictionSource::Fallback => "fallback rule",
    };
    println!("Sleep quality: {} ({})", reply.sleep_quality.display(), source);
    for (i, line) in reply.recommendations.iter().enumerate() {
        if i == 0 {
            println!("{}", line);
        } else {
            println!("  - {}", line);
        }
    }
    if reply.saved {
        println!("(saved to history)");
    }
    Ok(())
}

fn run_stats(advisor: &Advisor, id: &str, json_output: bool) -> Result<()> {
    let Some(outcome) = advisor.stats(id)? else {
        bail!("Unknown user: {}", id);
    };
    if json_output {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }

    match outcome {
        StatsOutcome::NoData => println!("No sleep assessments recorded for {} yet.", id),
        StatsOutcome::Summary(summary) => {
            println!("{}: {} assessments", id, summary.total);
            for (label, count) in &summary.per_label_counts {
                println!("  {:<5} {}", label, count);
            }
            println!("Latest: {} at {}", summary.latest.quality.display(), summary.latest.timestamp);
            println!("Recent days:");
            for day in &summary.recent_window {
                println!(
                    "  {}  total {}  good {}  bad {}",
                    day.date,
                    day.total,
                    day.counts.get("good").copied().unwrap_or(0),
                    day.counts.get("bad").copied().unwrap_or(0)
                );
            }
            println!("Averages:");
            for (feature, avg) in &summary.feature_averages {
                println!("  {:<18} {:.2}", feature, avg);
            }
        }
    }
    Ok(())
}

async fn run_cli_mode(advisor: &Advisor, mut user: Option<String>) -> Result<()> {
    use std::io::{self, BufRead, Write};

    println!("sleepwise sleep assistant");
    println!("=========================");
    println!("Ask anything about sleep, /help for commands, or 'quit' to exit.\n");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("> ");
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();

        if line.is_empty() {
            continue;
        }

        if line == "quit" || line == "exit" {
            break;
        }

        if line.starts_with('/') {
            if let Err(e) = handle_command(advisor, line, &mut user).await {
                eprintln!("Error: {}", e);
            }
            continue;
        }

        if let Err(e) = run_chat(advisor, line, user.clone(), false) {
            eprintln!("Error: {}", e);
        }
    }

    Ok(())
}

async fn handle_command(advisor: &Advisor, line: &str, user: &mut Option<String>) -> Result<()> {
    let parts: Vec<&str> = line.splitn(2, ' ').collect();
    let cmd = parts[0];
    let arg = parts.get(1).copied().unwrap_or("").trim();

    match cmd {
        "/user" => {
            if arg.is_empty() {
                println!("Current user: {}", user.as_deref().unwrap_or("(none)"));
            } else {
                *user = Some(arg.to_string());
                println!("Now chatting as {}", arg);
            }
        }
        "/register" => {
            // /register <id> [contact]
            let mut words = arg.split_whitespace();
            let id = words.next().context("Usage: /register <id> [contact]")?;
            let reply = advisor.register(RegisterRequest {
                user_identifier: id.to_string(),
                contact: words.next().unwrap_or("").to_string(),
            })?;
            println!("{}", reply.message);
            if reply.created {
                *user = Some(id.to_string());
            }
        }
        "/predict" => {
            let pairs: Vec<String> = arg.split_whitespace().map(String::from).collect();
            run_predict(advisor, &pairs, user.clone(), false).await?;
        }
        "/stats" => {
            let id = if arg.is_empty() { user.clone() } else { Some(arg.to_string()) };
            let id = id.context("Usage: /stats <id> (or set /user first)")?;
            run_stats(advisor, &id, false)?;
        }
        "/help" => {
            println!("/user [id]              Show or set the current user");
            println!("/register <id> [email]  Create a user");
            println!("/predict name=value...  Predict sleep quality");
            println!("/stats [id]             Summarize history");
            println!("quit                    Exit");
        }
        _ => println!("Unknown command: {} (try /help)", cmd),
    }
    Ok(())
}
