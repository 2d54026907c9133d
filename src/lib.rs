//! sleepwise - sleep-wellness advisor
//!
//! Answers free-text questions about sleep with canned guidance, turns a
//! handful of lifestyle measurements into a good/bad sleep prediction with
//! concrete advice, and keeps a per-user history it can summarize.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use sleepwise::{Advisor, AdvisorConfig, ChatRequest, MemoryStore};
//! use std::sync::Arc;
//!
//! let advisor = Advisor::new(AdvisorConfig::default(), Arc::new(MemoryStore::new()))?;
//!
//! let reply = advisor.chat(ChatRequest { message: "hi".into(), user_identifier: None })?;
//! let prediction = advisor.predict(&serde_json::json!({
//!     "features": {"sleep_duration": 6, "stress_level": 0.8, "physical_activity": 0.2,
//!                  "screen_time": 0.9, "caffeine_intake": 0.6}
//! })).await?;
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │            HTTP (axum) / CLI / REPL                   │
//! └─────────────────────┬────────────────────────────────┘
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │  Advisor                                              │
//! │  chat()     → intent → template / prescription        │
//! │  predict()  → features → model|fallback → advice      │
//! │  stats()    → summarize(history)                      │
//! └──────┬───────────────────────────────┬───────────────┘
//!        ▼                               ▼
//!   UserStore (memory | file | sqlite)   SheetMirror (best effort)
//! ```

pub mod advisor;
pub mod config;
pub mod db;
pub mod error;
pub mod features;
pub mod intent;
pub mod model;
pub mod prescription;
pub mod recommend;
pub mod server;
pub mod sheets;
pub mod stats;
pub mod store;
pub mod templates;
pub mod types;

// Core types
pub use advisor::Advisor;
pub use config::{AdvisorConfig, Settings};
pub use error::{AdvisorError, ConfigError, ErrorBody, StoreError};
pub use types::*;

// Components
pub use features::{FeatureSchema, FeatureSpec};
pub use intent::{IntentClassifier, KeywordRule};
pub use model::{load_model, LabelPolicy, LinearModel, OnnxModel, Predictor, SleepClassifier};
pub use prescription::{prescribe, Prescription, PrescriptionOutcome};
pub use recommend::{Comparison, FeatureRule, Recommendation, RecommendationEngine};
pub use stats::{summarize, StatsOutcome, StatsSummary, RECENT_WINDOW};
pub use templates::{SelectionMode, TemplateEntry, TemplateStore};

// Storage and mirrors
pub use db::{init_db, SqliteStore};
pub use sheets::{GoogleSheetsMirror, SheetMirror};
pub use store::{FileStore, MemoryStore, StorageBackend, UserStore};
