//! SQLite storage for users, judgments and chat history
//!
//! A single database file holds everything. Judgments and chats carry an
//! autoincrement `seq` so reads return them in append order even when
//! imported timestamps are out of order.

use crate::error::StoreError;
use crate::store::{StoreResult, UserStore};
use crate::types::{ChatExchange, CreateOutcome, FeatureVector, Judgment, UserRecord};
use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Initialize the database with schema
pub fn init_db(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create data directory {:?}", parent))?;
    }
    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open database at {:?}", path))?;

    conn.execute_batch(SCHEMA)?;

    Ok(conn)
}

const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS users (
    identifier TEXT PRIMARY KEY,
    contact TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL
);

-- One row per sleep assessment
CREATE TABLE IF NOT EXISTS judgments (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL,
    user_identifier TEXT NOT NULL REFERENCES users(identifier),
    features_json TEXT NOT NULL,    -- ordered {name: value}
    label_json TEXT NOT NULL,
    quality TEXT NOT NULL,
    recommendations_json TEXT NOT NULL,
    source TEXT NOT NULL,
    timestamp TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_judgments_user ON judgments(user_identifier, seq);

CREATE TABLE IF NOT EXISTS chats (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    user_identifier TEXT NOT NULL REFERENCES users(identifier),
    message TEXT NOT NULL,
    topic TEXT NOT NULL,
    response TEXT NOT NULL,
    timestamp TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_chats_user ON chats(user_identifier, seq);
"#;

fn ts(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn parse_ts(s: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp {:?}: {}", s, e)))
}

/// Unit enums are stored as their bare serde name
fn enum_text<T: Serialize>(value: &T) -> StoreResult<String> {
    match serde_json::to_value(value)? {
        serde_json::Value::String(s) => Ok(s),
        other => Err(StoreError::Corrupt(format!("expected a name, got {}", other))),
    }
}

fn parse_enum<T: DeserializeOwned>(s: &str) -> StoreResult<T> {
    Ok(serde_json::from_value(serde_json::Value::String(s.to_string()))?)
}

fn user_exists(conn: &Connection, identifier: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT 1 FROM users WHERE identifier = ?1",
        params![identifier],
        |_| Ok(()),
    )
    .optional()
    .map(|r| r.is_some())
}

fn insert_judgment(conn: &Connection, identifier: &str, j: &Judgment) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO judgments (id, user_identifier, features_json, label_json, quality,
                                recommendations_json, source, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            j.id,
            identifier,
            serde_json::to_string(&j.features)?,
            serde_json::to_string(&j.label)?,
            enum_text(&j.quality)?,
            serde_json::to_string(&j.recommendations)?,
            enum_text(&j.source)?,
            ts(&j.timestamp),
        ],
    )?;
    Ok(())
}

fn insert_chat(conn: &Connection, identifier: &str, c: &ChatExchange) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO chats (user_identifier, message, topic, response, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![identifier, c.message, enum_text(&c.topic)?, c.response, ts(&c.timestamp)],
    )?;
    Ok(())
}

type JudgmentRow = (String, String, String, String, String, String, String);

fn load_judgments(conn: &Connection, identifier: &str) -> StoreResult<Vec<Judgment>> {
    let mut stmt = conn.prepare(
        "SELECT id, features_json, label_json, quality, recommendations_json, source, timestamp
         FROM judgments WHERE user_identifier = ?1 ORDER BY seq",
    )?;
    let rows = stmt
        .query_map(params![identifier], |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
                row.get(6)?,
            ))
        })?
        .collect::<Result<Vec<JudgmentRow>, _>>()?;

    rows.into_iter()
        .map(|(id, features, label, quality, recs, source, timestamp)| {
            Ok(Judgment {
                id,
                features: serde_json::from_str::<FeatureVector>(&features)?,
                label: serde_json::from_str(&label)?,
                quality: parse_enum(&quality)?,
                recommendations: serde_json::from_str(&recs)?,
                source: parse_enum(&source)?,
                timestamp: parse_ts(&timestamp)?,
            })
        })
        .collect()
}

fn load_chats(conn: &Connection, identifier: &str) -> StoreResult<Vec<ChatExchange>> {
    let mut stmt = conn.prepare(
        "SELECT message, topic, response, timestamp
         FROM chats WHERE user_identifier = ?1 ORDER BY seq",
    )?;
    let rows = stmt
        .query_map(params![identifier], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        })?
        .collect::<Result<Vec<(String, String, String, String)>, _>>()?;

    rows.into_iter()
        .map(|(message, topic, response, timestamp)| {
            Ok(ChatExchange {
                timestamp: parse_ts(&timestamp)?,
                message,
                topic: parse_enum(&topic)?,
                response,
            })
        })
        .collect()
}

/// `UserStore` over one SQLite connection
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = init_db(path)?;
        tracing::info!(path = %path.display(), "sqlite store opened");
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Corrupt("connection lock poisoned".to_string()))
    }

    /// Insert a complete record in one transaction. Existing users are
    /// skipped, never merged.
    pub fn insert_record(&self, record: &UserRecord) -> StoreResult<CreateOutcome> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO users (identifier, contact, created_at) VALUES (?1, ?2, ?3)",
            params![record.identifier, record.contact, ts(&record.created_at)],
        )?;
        if inserted == 0 {
            return Ok(CreateOutcome::AlreadyExists);
        }
        for j in &record.judgments {
            insert_judgment(&tx, &record.identifier, j)?;
        }
        for c in &record.chats {
            insert_chat(&tx, &record.identifier, c)?;
        }
        tx.commit()?;
        Ok(CreateOutcome::Created)
    }

    pub fn user_count(&self) -> StoreResult<usize> {
        let conn = self.lock()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        Ok(n as usize)
    }
}

impl UserStore for SqliteStore {
    fn get(&self, identifier: &str) -> StoreResult<Option<UserRecord>> {
        let conn = self.lock()?;
        let user: Option<(String, String)> = conn
            .query_row(
                "SELECT contact, created_at FROM users WHERE identifier = ?1",
                params![identifier],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((contact, created_at)) = user else {
            return Ok(None);
        };

        Ok(Some(UserRecord {
            identifier: identifier.to_string(),
            contact,
            created_at: parse_ts(&created_at)?,
            judgments: load_judgments(&conn, identifier)?,
            chats: load_chats(&conn, identifier)?,
        }))
    }

    fn create(&self, identifier: &str, contact: &str) -> StoreResult<CreateOutcome> {
        let conn = self.lock()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO users (identifier, contact, created_at) VALUES (?1, ?2, ?3)",
            params![identifier, contact, ts(&Utc::now())],
        )?;
        Ok(if inserted == 0 {
            CreateOutcome::AlreadyExists
        } else {
            CreateOutcome::Created
        })
    }

    fn append_judgment(&self, identifier: &str, judgment: &Judgment) -> StoreResult<bool> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        if !user_exists(&tx, identifier)? {
            return Ok(false);
        }
        insert_judgment(&tx, identifier, judgment)?;
        tx.commit()?;
        Ok(true)
    }

    fn append_chat(&self, identifier: &str, exchange: &ChatExchange) -> StoreResult<bool> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        if !user_exists(&tx, identifier)? {
            return Ok(false);
        }
        insert_chat(&tx, identifier, exchange)?;
        tx.commit()?;
        Ok(true)
    }
}
