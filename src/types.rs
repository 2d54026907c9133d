//! Core types for the sleepwise advisor
//!
//! Everything here is plain data: topics, feature vectors, judgments and the
//! user record that owns them. Behavior lives in the modules that consume
//! these types.

use chrono::{DateTime, Utc};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// A topic a chat message is classified into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    Greeting,
    Farewell,
    Help,
    #[serde(alias = "sleep_quality")]
    SleepTips,
    SleepDuration,
    SleepHygiene,
    SleepRoutine,
    SleepQualityFactors,
    Prescription,
    Default,
}

impl Topic {
    pub const ALL: [Topic; 10] = [
        Topic::Greeting,
        Topic::Farewell,
        Topic::Help,
        Topic::SleepTips,
        Topic::SleepDuration,
        Topic::SleepHygiene,
        Topic::SleepRoutine,
        Topic::SleepQualityFactors,
        Topic::Prescription,
        Topic::Default,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Topic::Greeting => "greeting",
            Topic::Farewell => "farewell",
            Topic::Help => "help",
            Topic::SleepTips => "sleep_tips",
            Topic::SleepDuration => "sleep_duration",
            Topic::SleepHygiene => "sleep_hygiene",
            Topic::SleepRoutine => "sleep_routine",
            Topic::SleepQualityFactors => "sleep_quality_factors",
            Topic::Prescription => "prescription",
            Topic::Default => "default",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The sleep-quality category that drives recommendation polarity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SleepQuality {
    Good,
    Bad,
}

impl SleepQuality {
    pub fn name(&self) -> &'static str {
        match self {
            SleepQuality::Good => "good",
            SleepQuality::Bad => "bad",
        }
    }

    /// Human-facing label, as shown to end users and mirrored to sheets
    pub fn display(&self) -> &'static str {
        match self {
            SleepQuality::Good => "Good Sleep",
            SleepQuality::Bad => "Bad Sleep",
        }
    }
}

/// Raw output of a classifier or of the fallback rule
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Prediction {
    /// Discrete class index
    Class(i64),
    /// Continuous sleep-quality score (higher is better)
    Score(f64),
}

/// Label as reported on the wire: a category name, or the raw score
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Label {
    Category(SleepQuality),
    Score(f64),
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Label::Category(q) => f.write_str(q.name()),
            Label::Score(s) => write!(f, "{}", s),
        }
    }
}

/// Where a prediction came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PredictionSource {
    Model,
    Fallback,
}

/// One named measurement
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub name: String,
    pub value: f64,
}

/// Ordered named measurements. Serialized as a JSON object whose key order
/// follows the vector order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureVector {
    features: Vec<Feature>,
}

impl FeatureVector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a measurement, replacing an earlier one with the same name
    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        let name = name.into();
        match self.features.iter_mut().find(|f| f.name == name) {
            Some(existing) => existing.value = value,
            None => self.features.push(Feature { name, value }),
        }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.features.iter().find(|f| f.name == name).map(|f| f.value)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Feature> {
        self.features.iter()
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

impl<N: Into<String>> FromIterator<(N, f64)> for FeatureVector {
    fn from_iter<I: IntoIterator<Item = (N, f64)>>(iter: I) -> Self {
        let mut vector = FeatureVector::new();
        for (name, value) in iter {
            vector.insert(name, value);
        }
        vector
    }
}

impl Serialize for FeatureVector {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.features.len()))?;
        for feature in &self.features {
            map.serialize_entry(&feature.name, &feature.value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for FeatureVector {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct FeatureVisitor;

        impl<'de> Visitor<'de> for FeatureVisitor {
            type Value = FeatureVector;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of feature name to number")
            }

            fn visit_map<M: MapAccess<'de>>(self, mut access: M) -> Result<Self::Value, M::Error> {
                let mut vector = FeatureVector::new();
                while let Some((name, value)) = access.next_entry::<String, f64>()? {
                    vector.insert(name, value);
                }
                Ok(vector)
            }
        }

        deserializer.deserialize_map(FeatureVisitor)
    }
}

/// One timestamped sleep-quality judgment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Judgment {
    pub id: String,
    pub features: FeatureVector,
    pub label: Label,
    pub quality: SleepQuality,
    pub recommendations: Vec<String>,
    pub source: PredictionSource,
    pub timestamp: DateTime<Utc>,
}

/// One chat message and the reply it got
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatExchange {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub topic: Topic,
    pub response: String,
}

/// Everything the store keeps about one user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub identifier: String,
    pub contact: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub judgments: Vec<Judgment>,
    #[serde(default)]
    pub chats: Vec<ChatExchange>,
}

impl UserRecord {
    pub fn new(identifier: impl Into<String>, contact: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            contact: contact.into(),
            created_at: Utc::now(),
            judgments: Vec::new(),
            chats: Vec::new(),
        }
    }
}

/// Result of a registration attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
}

// ============================================================================
// Request / response shapes
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default, alias = "username")]
    pub user_identifier: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatReply {
    pub response: String,
    pub topic: Topic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictReply {
    pub label: Label,
    pub sleep_quality: SleepQuality,
    pub recommendations: Vec<String>,
    pub source: PredictionSource,
    /// Whether the judgment was appended to a user's history
    pub saved: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    #[serde(alias = "username")]
    pub user_identifier: String,
    #[serde(default, alias = "email")]
    pub contact: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterReply {
    pub created: bool,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_serialization_names() {
        for topic in Topic::ALL {
            let json = serde_json::to_string(&topic).unwrap();
            assert_eq!(json, format!("\"{}\"", topic.name()));
        }
    }

    #[test]
    fn test_topic_accepts_sleep_quality_alias() {
        let topic: Topic = serde_json::from_str("\"sleep_quality\"").unwrap();
        assert_eq!(topic, Topic::SleepTips);
    }

    #[test]
    fn test_feature_vector_preserves_order() {
        let vector: FeatureVector =
            serde_json::from_str(r#"{"stress_level": 0.8, "sleep_duration": 5, "screen_time": 0.1}"#)
                .unwrap();
        let names: Vec<_> = vector.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["stress_level", "sleep_duration", "screen_time"]);

        let json = serde_json::to_string(&vector).unwrap();
        assert_eq!(json, r#"{"stress_level":0.8,"sleep_duration":5.0,"screen_time":0.1}"#);
    }

    #[test]
    fn test_feature_vector_insert_replaces() {
        let mut vector = FeatureVector::new();
        vector.insert("a", 1.0);
        vector.insert("b", 2.0);
        vector.insert("a", 3.0);
        assert_eq!(vector.len(), 2);
        assert_eq!(vector.get("a"), Some(3.0));
    }

    #[test]
    fn test_label_wire_format() {
        assert_eq!(
            serde_json::to_string(&Label::Category(SleepQuality::Bad)).unwrap(),
            "\"bad\""
        );
        assert_eq!(serde_json::to_string(&Label::Score(0.25)).unwrap(), "0.25");

        let parsed: Label = serde_json::from_str("\"good\"").unwrap();
        assert_eq!(parsed, Label::Category(SleepQuality::Good));
        let parsed: Label = serde_json::from_str("0.75").unwrap();
        assert_eq!(parsed, Label::Score(0.75));
    }

    #[test]
    fn test_chat_request_accepts_username_alias() {
        let req: ChatRequest =
            serde_json::from_str(r#"{"message": "hi", "username": "ada"}"#).unwrap();
        assert_eq!(req.user_identifier.as_deref(), Some("ada"));
    }
}
