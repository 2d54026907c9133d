//! Feature schema: which measurements exist and how raw input maps onto them

use crate::error::{AdvisorError, ConfigError};
use crate::types::FeatureVector;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;

/// One configured measurement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSpec {
    pub name: String,
    /// Alternate input names (e.g. the legacy form's `Q1`)
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub description: String,
}

impl FeatureSpec {
    pub fn new(name: &str, aliases: &[&str], description: &str) -> Self {
        Self {
            name: name.to_string(),
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
            description: description.to_string(),
        }
    }

    fn answers_to(&self, key: &str) -> bool {
        self.name == key || self.aliases.iter().any(|a| a == key)
    }
}

/// Ordered set of feature specs
#[derive(Debug, Clone)]
pub struct FeatureSchema {
    specs: Vec<FeatureSpec>,
}

impl FeatureSchema {
    pub fn new(specs: Vec<FeatureSpec>) -> Result<Self, ConfigError> {
        let mut seen = HashSet::new();
        for spec in &specs {
            for key in std::iter::once(&spec.name).chain(spec.aliases.iter()) {
                if !seen.insert(key.as_str()) {
                    return Err(ConfigError::DuplicateFeature(key.clone()));
                }
            }
        }
        Ok(Self { specs })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.specs.iter().map(|s| s.name.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.specs.iter().any(|s| s.name == name)
    }

    /// Canonical name for an input key, if it names a known feature
    pub fn canonical(&self, key: &str) -> Option<&str> {
        self.specs
            .iter()
            .find(|s| s.answers_to(key))
            .map(|s| s.name.as_str())
    }

    /// The raw entry for `spec`: its own name first, then aliases in the
    /// order they are declared
    fn lookup<'s, 'a>(spec: &'s FeatureSpec, raw: &'a Map<String, Value>) -> Option<(&'s str, &'a Value)> {
        std::iter::once(&spec.name)
            .chain(spec.aliases.iter())
            .find_map(|key| raw.get(key.as_str()).map(|v| (key.as_str(), v)))
    }

    /// Build a vector in schema order from raw named input.
    ///
    /// Every configured feature is required. Values may be JSON numbers or
    /// numeric strings. Unknown keys are ignored.
    pub fn parse(&self, raw: &Map<String, Value>) -> Result<FeatureVector, AdvisorError> {
        let mut vector = FeatureVector::new();

        for spec in &self.specs {
            let (key, value) = Self::lookup(spec, raw)
                .ok_or_else(|| AdvisorError::missing(&spec.name))?;

            let number = match value {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            };

            match number {
                Some(v) if v.is_finite() => vector.insert(spec.name.clone(), v),
                _ => return Err(AdvisorError::non_numeric(key)),
            }
        }

        Ok(vector)
    }

    /// Keep the known features among `raw`, canonically named and in schema
    /// order. Used for historical records, where partial vectors are fine.
    pub fn known(&self, raw: &Map<String, Value>) -> FeatureVector {
        let mut vector = FeatureVector::new();
        for spec in &self.specs {
            let number = Self::lookup(spec, raw)
                .and_then(|(_, v)| match v {
                    Value::Number(n) => n.as_f64(),
                    Value::String(s) => s.trim().parse::<f64>().ok(),
                    _ => None,
                });
            if let Some(v) = number.filter(|v| v.is_finite()) {
                vector.insert(spec.name.clone(), v);
            }
        }
        vector
    }
}

/// Built-in feature set
pub fn default_features() -> Vec<FeatureSpec> {
    vec![
        FeatureSpec::new("sleep_duration", &["Q1"], "Hours of sleep per night"),
        FeatureSpec::new("stress_level", &["Q2"], "Perceived stress, 0 (none) to 1 (severe)"),
        FeatureSpec::new("physical_activity", &["Q4"], "Daily physical activity, 0 to 1"),
        FeatureSpec::new("caffeine_intake", &["Q5"], "Caffeine intake, 0 to 1"),
        FeatureSpec::new("screen_time", &["Q6"], "Screen time before bed, 0 to 1"),
    ]
}
