//! Response templates and selection
//!
//! Each topic owns one entry. Conversational topics hold several
//! interchangeable replies and one is picked at random; fact-sheet topics hold
//! the lines of a single reply that is always returned whole.

use crate::error::ConfigError;
use crate::types::Topic;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How a topic's lines turn into one reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMode {
    /// Uniformly pick one line
    SinglePick,
    /// Join every line with newlines, in order
    FullSheet,
}

/// The template entry for one topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateEntry {
    pub mode: SelectionMode,
    pub lines: Vec<String>,
}

impl TemplateEntry {
    pub fn single_pick(lines: &[&str]) -> Self {
        Self {
            mode: SelectionMode::SinglePick,
            lines: lines.iter().map(|l| l.to_string()).collect(),
        }
    }

    pub fn full_sheet(lines: &[&str]) -> Self {
        Self {
            mode: SelectionMode::FullSheet,
            lines: lines.iter().map(|l| l.to_string()).collect(),
        }
    }
}

/// Validated, immutable topic → template mapping
#[derive(Debug, Clone)]
pub struct TemplateStore {
    entries: BTreeMap<Topic, TemplateEntry>,
}

impl TemplateStore {
    /// Every topic must have an entry with at least one line
    pub fn new(entries: BTreeMap<Topic, TemplateEntry>) -> Result<Self, ConfigError> {
        for topic in Topic::ALL {
            match entries.get(&topic) {
                Some(entry) if !entry.lines.is_empty() => {}
                _ => return Err(ConfigError::EmptyTemplates(topic.to_string())),
            }
        }
        Ok(Self { entries })
    }

    pub fn entry(&self, topic: Topic) -> Option<&TemplateEntry> {
        self.entries.get(&topic)
    }

    /// Produce the reply for a topic. `rng` is only consulted for
    /// single-pick topics.
    pub fn select<R: Rng + ?Sized>(&self, topic: Topic, rng: &mut R) -> String {
        let Some(entry) = self.entries.get(&topic) else {
            return String::new();
        };

        match entry.mode {
            SelectionMode::FullSheet => entry.lines.join("\n"),
            SelectionMode::SinglePick => entry.lines.choose(rng).cloned().unwrap_or_default(),
        }
    }
}

/// Built-in templates for every topic
pub fn default_templates() -> BTreeMap<Topic, TemplateEntry> {
    let mut templates = BTreeMap::new();

    templates.insert(
        Topic::Greeting,
        TemplateEntry::single_pick(&[
            "Hello! I'm your sleep assistant. How can I help you sleep better tonight?",
            "Hi there! Ask me anything about sleep duration, routines or hygiene.",
            "Hey! Ready to talk about getting some better rest?",
        ]),
    );
    templates.insert(
        Topic::Farewell,
        TemplateEntry::single_pick(&[
            "Goodbye! Sleep well.",
            "See you soon. Remember to keep a consistent bedtime!",
            "Take care, and rest easy tonight.",
        ]),
    );
    templates.insert(
        Topic::Help,
        TemplateEntry::full_sheet(&[
            "Here's what I can help with:",
            "- Sleep tips: ask how to improve your sleep quality",
            "- Sleep duration: ask how many hours you need for your age",
            "- Sleep hygiene: ask about a sleep-friendly bedroom and habits",
            "- Sleep routine: ask how to build a bedtime routine",
            "- Sleep factors: ask how diet, caffeine, exercise or stress affect sleep",
            "- Prescription: ask for your personalized sleep plan after an assessment",
        ]),
    );
    templates.insert(
        Topic::SleepTips,
        TemplateEntry::single_pick(&[
            "Keep the same wake-up time every day, even on weekends. A steady rhythm is the single biggest lever on sleep quality.",
            "Get bright daylight within an hour of waking and dim the lights in the evening to anchor your body clock.",
            "Keep your bedroom cool, dark and quiet, and save the bed for sleep so your brain links it with rest.",
            "If you can't fall asleep within about 20 minutes, get up and do something calm in low light until you feel drowsy.",
        ]),
    );
    templates.insert(
        Topic::SleepDuration,
        TemplateEntry::full_sheet(&[
            "Recommended sleep by age:",
            "- Newborns (0-3 months): 14-17 hours",
            "- Infants (4-11 months): 12-15 hours",
            "- Toddlers (1-2 years): 11-14 hours",
            "- Preschoolers (3-5 years): 10-13 hours",
            "- School-age children (6-13 years): 9-11 hours",
            "- Teenagers (14-17 years): 8-10 hours",
            "- Adults (18-64 years): 7-9 hours",
            "- Older adults (65+ years): 7-8 hours",
        ]),
    );
    templates.insert(
        Topic::SleepHygiene,
        TemplateEntry::single_pick(&[
            "Good sleep hygiene: a cool (around 18°C), dark, quiet bedroom, a comfortable mattress, and no screens in bed.",
            "Avoid heavy meals, alcohol and caffeine in the hours before bed, and keep naps short and early.",
            "Use your bed only for sleep. Working or scrolling in bed teaches your brain to stay alert there.",
        ]),
    );
    templates.insert(
        Topic::SleepRoutine,
        TemplateEntry::single_pick(&[
            "Start winding down 30-60 minutes before bed: dim the lights, put devices away and do something calm like reading.",
            "Pick a fixed bedtime and wake time, then build a short ritual around it: a warm shower, light stretching, a few pages of a book.",
            "Try a consistent pre-sleep sequence every night. Repetition is what turns a routine into a sleep cue.",
        ]),
    );
    templates.insert(
        Topic::SleepQualityFactors,
        TemplateEntry::single_pick(&[
            "Caffeine can stay in your system for 6+ hours, so a mid-afternoon coffee may still be active at bedtime.",
            "Regular exercise deepens sleep, but intense workouts right before bed can keep you wired.",
            "Alcohol may make you drowsy, but it fragments sleep later in the night.",
            "Stress keeps your nervous system alert. Journaling or breathing exercises before bed can help you switch off.",
            "Large or spicy meals late in the evening can cause discomfort and reflux that disturb sleep.",
        ]),
    );
    templates.insert(
        Topic::Prescription,
        TemplateEntry::single_pick(&[
            "Complete a sleep assessment first and I'll put together a personalized sleep plan for you.",
            "I need at least one sleep assessment before I can prescribe a plan. Submit yours and ask again!",
        ]),
    );
    templates.insert(
        Topic::Default,
        TemplateEntry::single_pick(&[
            "I'm not sure I understood. Type 'help' to see what I can answer.",
            "I can help with sleep tips, duration, hygiene, routines and more. Try asking about one of those!",
        ]),
    );

    templates
}
