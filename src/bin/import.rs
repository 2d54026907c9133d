//! Import users from the legacy `users.json` layout
//!
//! Usage: cargo run --bin import -- [--db=PATH] [--config=PATH] <files-or-dirs...>
//!
//! Legacy shape: `{username: {email, created_at, chat_history[], sleep_data[]}}`
//! where each sleep entry carries `Q*` answers, a `sleep_quality` of
//! "Good Sleep"/"Bad Sleep" and its recommendations.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};
use sleepwise::{
    ChatExchange, CreateOutcome, FeatureSchema, IntentClassifier, Judgment, Label,
    PredictionSource, Settings, SleepQuality, SqliteStore, UserRecord,
};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize)]
struct LegacyUser {
    #[serde(default)]
    email: String,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    chat_history: Vec<LegacyChat>,
    #[serde(default)]
    sleep_data: Vec<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
struct LegacyChat {
    #[serde(default)]
    timestamp: Option<String>,
    message: String,
    #[serde(default)]
    response: String,
}

#[derive(Debug, Default)]
struct ImportStats {
    users: usize,
    duplicates: usize,
    judgments: usize,
    chats: usize,
    skipped: usize,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let args: Vec<String> = std::env::args().collect();
    let inputs: Vec<&String> = args[1..].iter().filter(|a| !a.starts_with("--")).collect();

    if inputs.is_empty() {
        eprintln!("Usage: {} [--db=PATH] [--config=PATH] <users.json|dir...>", args[0]);
        eprintln!("Example: {} ./server/users.json", args[0]);
        std::process::exit(1);
    }

    let config_path = args
        .iter()
        .find_map(|a| a.strip_prefix("--config="))
        .map(PathBuf::from);
    let settings = Settings::load(config_path.as_deref())?;

    let db_path = args
        .iter()
        .find_map(|a| a.strip_prefix("--db="))
        .map(PathBuf::from)
        .unwrap_or_else(|| settings.storage_path());
    println!("Opening database at {:?}", db_path);
    let store = SqliteStore::open(&db_path)?;

    let schema = settings.advisor.schema()?;
    let classifier = IntentClassifier::new(&settings.advisor.intents)?;

    let mut stats = ImportStats::default();

    for arg in inputs {
        let path = PathBuf::from(arg);
        if !path.exists() {
            eprintln!("Warning: {} does not exist, skipping", arg);
            continue;
        }

        println!("\nProcessing: {:?}", path);

        for file in json_files(&path) {
            let fname = file.display().to_string();
            match import_file(&store, &schema, &classifier, &file, &mut stats) {
                Ok(n) => println!("  ✓ {} ({} users)", fname, n),
                Err(e) => eprintln!("  ✗ {}: {:#}", fname, e),
            }
        }
    }

    println!("\n========================================");
    println!("Import complete!");
    println!("  Users:      {}", stats.users);
    println!("  Duplicates: {}", stats.duplicates);
    println!("  Judgments:  {}", stats.judgments);
    println!("  Chats:      {}", stats.chats);
    println!("  Skipped:    {}", stats.skipped);
    println!("========================================");

    Ok(())
}

/// A file stands for itself; a directory is walked for `*.json`
fn json_files(path: &Path) -> Vec<PathBuf> {
    if path.is_file() {
        return vec![path.to_path_buf()];
    }
    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.file_name()
                .to_str()
                .map(|n| n.ends_with(".json"))
                .unwrap_or(false)
        })
        .map(|e| e.into_path())
        .collect();
    files.sort();
    files
}

fn import_file(
    store: &SqliteStore,
    schema: &FeatureSchema,
    classifier: &IntentClassifier,
    path: &Path,
    stats: &mut ImportStats,
) -> Result<usize> {
    let content = fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
    let users: BTreeMap<String, LegacyUser> =
        serde_json::from_str(&content).with_context(|| format!("Not a legacy users file: {:?}", path))?;

    let mut imported = 0;
    for (username, legacy) in users {
        let (record, skipped) = convert_user(&username, legacy, schema, classifier);
        stats.skipped += skipped;
        match store.insert_record(&record)? {
            CreateOutcome::Created => {
                imported += 1;
                stats.users += 1;
                stats.judgments += record.judgments.len();
                stats.chats += record.chats.len();
            }
            CreateOutcome::AlreadyExists => {
                tracing::warn!(user = %username, "user already in the database, skipping");
                stats.duplicates += 1;
            }
        }
    }
    Ok(imported)
}

/// Python `isoformat()` (naive, taken as UTC) or RFC 3339
fn parse_timestamp(raw: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = raw?.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Some(t.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|t| t.and_utc())
}

fn parse_quality(raw: &str) -> Option<SleepQuality> {
    let lower = raw.to_lowercase();
    if lower.contains("bad") || lower.contains("poor") {
        Some(SleepQuality::Bad)
    } else if lower.contains("good") {
        Some(SleepQuality::Good)
    } else {
        None
    }
}

/// Recommendations were stored as a list, occasionally as one string
fn parse_recommendations(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(String::from))
            .collect(),
        Some(Value::String(s)) if !s.is_empty() => vec![s.clone()],
        _ => Vec::new(),
    }
}

/// Convert one legacy user. Returns the record and how many entries were
/// dropped.
fn convert_user(
    username: &str,
    legacy: LegacyUser,
    schema: &FeatureSchema,
    classifier: &IntentClassifier,
) -> (UserRecord, usize) {
    let mut record = UserRecord::new(username, legacy.email);
    if let Some(created) = parse_timestamp(legacy.created_at.as_deref()) {
        record.created_at = created;
    }
    let mut skipped = 0;

    for (i, entry) in legacy.sleep_data.iter().enumerate() {
        let features = schema.known(entry);
        let quality = entry
            .get("sleep_quality")
            .and_then(Value::as_str)
            .and_then(parse_quality);

        let Some(quality) = quality.filter(|_| !features.is_empty()) else {
            tracing::warn!(user = %username, entry = i, "sleep entry lacks features or label, skipping");
            skipped += 1;
            continue;
        };

        let timestamp = parse_timestamp(entry.get("timestamp").and_then(Value::as_str)).unwrap_or_else(|| {
            tracing::warn!(user = %username, entry = i, "unreadable timestamp, using account creation time");
            record.created_at
        });

        record.judgments.push(Judgment {
            id: uuid::Uuid::new_v4().to_string(),
            features,
            label: Label::Category(quality),
            quality,
            recommendations: parse_recommendations(entry.get("recommendations")),
            // Every legacy assessment came from the deployed model
            source: PredictionSource::Model,
            timestamp,
        });
    }

    for chat in legacy.chat_history {
        let timestamp = parse_timestamp(chat.timestamp.as_deref()).unwrap_or(record.created_at);
        record.chats.push(ChatExchange {
            timestamp,
            topic: classifier.classify(&chat.message),
            message: chat.message,
            response: chat.response,
        });
    }

    (record, skipped)
}
