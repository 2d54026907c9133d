//! Recommendation engine
//!
//! Turns a feature vector and a predicted sleep quality into an ordered list
//! of advice. The list opens with a header for the predicted quality, then
//! one line per rule whose comparison holds, in rule order. A rule carries a
//! message for each quality: the comparison decides *whether* a rule speaks,
//! the prediction decides *what* it says.

use crate::error::AdvisorError;
use crate::types::{FeatureVector, SleepQuality};
use serde::{Deserialize, Serialize};

/// Threshold comparison. Each variant states its own inclusivity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Comparison {
    /// value < threshold (exclusive)
    #[serde(alias = "<")]
    Lt,
    /// value <= threshold (inclusive)
    #[serde(alias = "<=")]
    Le,
    /// value > threshold (exclusive)
    #[serde(alias = ">")]
    Gt,
    /// value >= threshold (inclusive)
    #[serde(alias = ">=")]
    Ge,
}

impl Comparison {
    pub fn holds(&self, value: f64, threshold: f64) -> bool {
        match self {
            Comparison::Lt => value < threshold,
            Comparison::Le => value <= threshold,
            Comparison::Gt => value > threshold,
            Comparison::Ge => value >= threshold,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Comparison::Lt => "<",
            Comparison::Le => "<=",
            Comparison::Gt => ">",
            Comparison::Ge => ">=",
        }
    }
}

/// One per-feature advice rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRule {
    pub feature: String,
    pub comparison: Comparison,
    pub threshold: f64,
    /// Said when sleep is predicted good (keep-it-up phrasing)
    pub good_message: String,
    /// Said when sleep is predicted bad (improvement phrasing)
    pub bad_message: String,
}

impl FeatureRule {
    pub fn new(
        feature: &str,
        comparison: Comparison,
        threshold: f64,
        good_message: &str,
        bad_message: &str,
    ) -> Self {
        Self {
            feature: feature.to_string(),
            comparison,
            threshold,
            good_message: good_message.to_string(),
            bad_message: bad_message.to_string(),
        }
    }

    fn message_for(&self, quality: SleepQuality, value: f64) -> String {
        let template = match quality {
            SleepQuality::Good => &self.good_message,
            SleepQuality::Bad => &self.bad_message,
        };
        template
            .replace("{value}", &value.to_string())
            .replace("{threshold}", &self.threshold.to_string())
    }
}

/// Headers and rules for the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecommendationConfig {
    pub good_header: String,
    pub bad_header: String,
    pub rules: Vec<FeatureRule>,
}

impl Default for RecommendationConfig {
    fn default() -> Self {
        Self {
            good_header: "Your sleep is predicted to be good. Here is how to keep it up:".to_string(),
            bad_header: "Your sleep is predicted to be poor. Here is how to improve it:".to_string(),
            rules: default_rules(),
        }
    }
}

/// Engine output: the quality the advice was phrased for, plus the lines
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub quality: SleepQuality,
    pub lines: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RecommendationEngine {
    config: RecommendationConfig,
}

impl RecommendationEngine {
    pub fn new(config: RecommendationConfig) -> Self {
        Self { config }
    }

    pub fn rules(&self) -> &[FeatureRule] {
        &self.config.rules
    }

    pub fn header(&self, quality: SleepQuality) -> &str {
        match quality {
            SleepQuality::Good => &self.config.good_header,
            SleepQuality::Bad => &self.config.bad_header,
        }
    }

    /// Build the advice list. A rule whose feature is absent from `features`
    /// is a validation error, never a silent skip.
    pub fn recommend(
        &self,
        features: &FeatureVector,
        quality: SleepQuality,
    ) -> Result<Recommendation, AdvisorError> {
        let mut lines = Vec::with_capacity(self.config.rules.len() + 1);
        lines.push(self.header(quality).to_string());

        for rule in &self.config.rules {
            let value = features
                .get(&rule.feature)
                .ok_or_else(|| AdvisorError::missing(&rule.feature))?;

            if rule.comparison.holds(value, rule.threshold) {
                lines.push(rule.message_for(quality, value));
            }
        }

        Ok(Recommendation { quality, lines })
    }
}

/// Built-in rules, all exclusive comparisons
pub fn default_rules() -> Vec<FeatureRule> {
    vec![
        FeatureRule::new(
            "sleep_duration",
            Comparison::Lt,
            7.0,
            "You're sleeping {value} hours. You're doing well, but adding a little more time in bed would give you a buffer toward 7-9 hours.",
            "You're sleeping {value} hours. Aim for 7-9 hours by moving your bedtime earlier in 15-minute steps.",
        ),
        FeatureRule::new(
            "stress_level",
            Comparison::Gt,
            0.7,
            "Your stress is high even though you sleep well. Keep protecting your wind-down time so it stays that way.",
            "High stress is likely hurting your sleep. Try 10 minutes of breathing exercises or journaling before bed.",
        ),
        FeatureRule::new(
            "physical_activity",
            Comparison::Lt,
            0.3,
            "A bit more daytime movement would help you keep sleeping this well.",
            "Low physical activity can make sleep lighter. Aim for at least 30 minutes of movement, finishing a few hours before bed.",
        ),
        FeatureRule::new(
            "screen_time",
            Comparison::Gt,
            0.7,
            "Your screen time is high. Keep an eye on it so it doesn't start cutting into your sleep.",
            "Heavy screen time before bed delays sleep. Put devices away an hour before bed or switch on a blue-light filter.",
        ),
        FeatureRule::new(
            "caffeine_intake",
            Comparison::Gt,
            0.5,
            "Your caffeine intake is on the high side. Keeping it to the morning will help protect your good sleep.",
            "High caffeine intake can keep you awake. Cut back and avoid caffeine after mid-day.",
        ),
    ]
}
