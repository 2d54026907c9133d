//! Intent classification: free text to a single topic
//!
//! Rules are checked in list order and the first rule with any matching
//! keyword wins. Match counts never matter, so a message that mentions both
//! "hello" and "caffeine" is a greeting because greetings are listed first.
//!
//! A single-word keyword must equal a whole token. A keyword with spaces is a
//! phrase and must appear in the normalized text on token boundaries.

use crate::error::ConfigError;
use crate::types::Topic;
use serde::{Deserialize, Serialize};

/// One ordered (keywords, topic) rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordRule {
    pub topic: Topic,
    pub keywords: Vec<String>,
}

impl KeywordRule {
    pub fn new(topic: Topic, keywords: &[&str]) -> Self {
        Self {
            topic,
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone)]
struct CompiledRule {
    topic: Topic,
    words: Vec<String>,
    phrases: Vec<String>,
}

/// Keyword-rule intent classifier
#[derive(Debug, Clone)]
pub struct IntentClassifier {
    rules: Vec<CompiledRule>,
}

impl IntentClassifier {
    /// Compile rules, rejecting any rule without usable keywords
    pub fn new(rules: &[KeywordRule]) -> Result<Self, ConfigError> {
        let mut compiled = Vec::with_capacity(rules.len());

        for rule in rules {
            let mut words = Vec::new();
            let mut phrases = Vec::new();

            for keyword in &rule.keywords {
                let tokens = tokenize(keyword);
                match tokens.len() {
                    0 => continue,
                    1 => words.extend(tokens),
                    _ => phrases.push(tokens.join(" ")),
                }
            }

            if words.is_empty() && phrases.is_empty() {
                return Err(ConfigError::EmptyKeywords(rule.topic.to_string()));
            }

            compiled.push(CompiledRule {
                topic: rule.topic,
                words,
                phrases,
            });
        }

        Ok(Self { rules: compiled })
    }

    /// Classify a message. Never fails; unmatched text is `Topic::Default`.
    pub fn classify(&self, text: &str) -> Topic {
        let tokens = tokenize(text);
        if tokens.is_empty() {
            return Topic::Default;
        }
        // Padding lets phrase lookups respect token boundaries
        let padded = format!(" {} ", tokens.join(" "));

        for rule in &self.rules {
            let word_hit = rule.words.iter().any(|w| tokens.iter().any(|t| t == w));
            let phrase_hit = rule
                .phrases
                .iter()
                .any(|p| padded.contains(&format!(" {} ", p)));

            if word_hit || phrase_hit {
                tracing::debug!(topic = %rule.topic, "intent matched");
                return rule.topic;
            }
        }

        Topic::Default
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}

/// Lower-case, split on anything that is not alphanumeric, and drop
/// apostrophes so "what's" becomes "whats"
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .replace(['\'', '\u{2019}'], "")
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(String::from)
        .collect()
}

/// Built-in rule list, in priority order
pub fn default_rules() -> Vec<KeywordRule> {
    vec![
        KeywordRule::new(Topic::Help, &["help", "commands", "what can you do", "menu"]),
        KeywordRule::new(
            Topic::Greeting,
            &["hi", "hello", "hey", "greetings", "good morning", "good afternoon", "good evening"],
        ),
        KeywordRule::new(
            Topic::Farewell,
            &["bye", "goodbye", "farewell", "see you", "see ya", "see you later", "thanks bye"],
        ),
        KeywordRule::new(
            Topic::Prescription,
            &["prescription", "prescribe", "my plan", "treatment plan"],
        ),
        KeywordRule::new(
            Topic::SleepDuration,
            &["how long", "how many hours", "duration", "hours of sleep", "how much sleep"],
        ),
        KeywordRule::new(
            Topic::SleepHygiene,
            &["hygiene", "bedroom", "environment", "practices", "mattress"],
        ),
        KeywordRule::new(
            Topic::SleepRoutine,
            &["routine", "schedule", "bedtime", "wind down", "habit", "habits"],
        ),
        KeywordRule::new(
            Topic::SleepQualityFactors,
            &["diet", "food", "caffeine", "coffee", "alcohol", "exercise", "stress", "affect", "affects", "factors"],
        ),
        KeywordRule::new(
            Topic::SleepTips,
            &["improve", "tips", "better", "quality", "insomnia", "cant sleep", "advice"],
        ),
    ]
}
