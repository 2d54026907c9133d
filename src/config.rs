//! Configuration: advisor behavior plus process settings
//!
//! `AdvisorConfig` is the single place behavior lives (keyword rules,
//! templates, features, recommendation rules, label polarity, fallback).
//! `Settings` wraps it with server, storage, model and sheets sections and is
//! read from TOML. Every field has a serde default, so an empty file is valid.

use crate::error::ConfigError;
use crate::features::{default_features, FeatureSchema, FeatureSpec};
use crate::intent::{default_rules, IntentClassifier, KeywordRule};
use crate::model::{FallbackRule, LabelPolicy, ModelKind};
use crate::recommend::RecommendationConfig;
use crate::store::StorageBackend;
use crate::templates::{default_templates, TemplateEntry, TemplateStore};
use crate::types::Topic;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "sleepwise.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvisorConfig {
    /// Bumped whenever the topic taxonomy or rule set changes shape
    pub version: u32,
    /// Fixed RNG seed for template selection; entropy when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    pub features: Vec<FeatureSpec>,
    pub labels: LabelPolicy,
    pub fallback: FallbackRule,
    pub recommendations: RecommendationConfig,
    pub intents: Vec<KeywordRule>,
    pub templates: BTreeMap<Topic, TemplateEntry>,
}

impl Default for AdvisorConfig {
    fn default() -> Self {
        Self {
            version: 1,
            seed: None,
            features: default_features(),
            labels: LabelPolicy::default(),
            fallback: FallbackRule::default(),
            recommendations: RecommendationConfig::default(),
            intents: default_rules(),
            templates: default_templates(),
        }
    }
}

impl AdvisorConfig {
    pub fn schema(&self) -> Result<FeatureSchema, ConfigError> {
        FeatureSchema::new(self.features.clone())
    }

    /// Check everything `Advisor::new` would reject
    pub fn validate(&self) -> Result<(), ConfigError> {
        let schema = self.schema()?;
        IntentClassifier::new(&self.intents)?;
        TemplateStore::new(self.templates.clone())?;

        for rule in &self.recommendations.rules {
            if !schema.contains(&rule.feature) {
                return Err(ConfigError::UnknownFeature {
                    context: "recommendation rule".to_string(),
                    feature: rule.feature.clone(),
                });
            }
        }
        if !schema.contains(&self.fallback.feature) {
            return Err(ConfigError::UnknownFeature {
                context: "fallback rule".to_string(),
                feature: self.fallback.feature.clone(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub backend: StorageBackend,
    /// Defaults to a file in the data directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    /// No path means every prediction uses the fallback rule
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    pub kind: ModelKind,
    pub timeout_ms: u64,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            path: None,
            kind: ModelKind::default(),
            timeout_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SheetsSettings {
    /// Mirroring is off unless both id and token are present
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spreadsheet_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    pub judgment_range: String,
    pub chat_range: String,
    pub timeout_ms: u64,
    pub endpoint: String,
}

impl Default for SheetsSettings {
    fn default() -> Self {
        Self {
            spreadsheet_id: None,
            access_token: None,
            judgment_range: "SleepData!A:Z".to_string(),
            chat_range: "ChatHistory!A:D".to_string(),
            timeout_ms: 5000,
            endpoint: "https://sheets.googleapis.com".to_string(),
        }
    }
}

impl SheetsSettings {
    pub fn enabled(&self) -> bool {
        self.spreadsheet_id.is_some() && self.access_token.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub storage: StorageSettings,
    pub model: ModelSettings,
    pub sheets: SheetsSettings,
    pub advisor: AdvisorConfig,
}

/// Default data directory, overridable with `SLEEPWISE_DATA_DIR`
pub fn data_dir() -> PathBuf {
    match std::env::var("SLEEPWISE_DATA_DIR") {
        Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sleepwise"),
    }
}

impl Settings {
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config at {:?}", path))?;
        Self::from_toml(&content).with_context(|| format!("Failed to parse config at {:?}", path))
    }

    /// Explicit path, else `<data_dir>/sleepwise.toml` when present, else
    /// defaults. Environment overrides are applied last.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut settings = match explicit {
            Some(path) => {
                tracing::info!("Loading config from: {}", path.display());
                Self::from_file(path)?
            }
            None => {
                let path = data_dir().join(CONFIG_FILE);
                if path.exists() {
                    tracing::info!("Loading config from: {}", path.display());
                    Self::from_file(&path)?
                } else {
                    Self::default()
                }
            }
        };
        settings.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(settings)
    }

    /// Apply `SLEEPWISE_*` overrides from `lookup`
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(port) = lookup("SLEEPWISE_PORT") {
            self.server.port = port
                .trim()
                .parse()
                .with_context(|| format!("SLEEPWISE_PORT is not a port number: {:?}", port))?;
        }
        if let Some(token) = lookup("SLEEPWISE_SHEETS_TOKEN").filter(|t| !t.is_empty()) {
            self.sheets.access_token = Some(token);
        }
        Ok(())
    }

    /// Where the configured backend keeps its data
    pub fn storage_path(&self) -> PathBuf {
        if let Some(path) = &self.storage.path {
            return path.clone();
        }
        match self.storage.backend {
            StorageBackend::File => data_dir().join("users.json"),
            StorageBackend::Sqlite | StorageBackend::Memory => data_dir().join("sleepwise.db"),
        }
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize settings")
    }
}
