//! Follow-up plan built from a user's most recent judgment

use crate::types::{Judgment, SleepQuality};
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prescription {
    pub sleep_quality: SleepQuality,
    pub recommendations: Vec<String>,
    pub lifestyle_changes: Vec<String>,
    pub follow_up: String,
    pub issued_at: DateTime<Utc>,
}

impl Prescription {
    /// Plain-text form used as a chat reply
    pub fn render(&self) -> String {
        let mut lines = vec![format!(
            "Your sleep plan (latest assessment: {}):",
            self.sleep_quality.display()
        )];
        lines.push("Recommendations:".to_string());
        lines.extend(self.recommendations.iter().map(|r| format!("- {}", r)));
        lines.push("Lifestyle changes:".to_string());
        lines.extend(self.lifestyle_changes.iter().map(|r| format!("- {}", r)));
        lines.push(self.follow_up.clone());
        lines.join("\n")
    }
}

/// `{"has_data": false}` or `{"has_data": true, ...prescription}`
#[derive(Debug, Clone, PartialEq)]
pub enum PrescriptionOutcome {
    NoData,
    Plan(Prescription),
}

impl Serialize for PrescriptionOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Wire<'a> {
            has_data: bool,
            #[serde(flatten, skip_serializing_if = "Option::is_none")]
            plan: Option<&'a Prescription>,
        }

        let plan = match self {
            PrescriptionOutcome::Plan(p) => Some(p),
            PrescriptionOutcome::NoData => None,
        };
        Wire {
            has_data: plan.is_some(),
            plan,
        }
        .serialize(serializer)
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Plan for the newest judgment in `history`
pub fn prescribe(history: &[Judgment], now: DateTime<Utc>) -> PrescriptionOutcome {
    // Stored oldest first; pick by timestamp so out-of-order imports still work
    let Some(latest) = history
        .iter()
        .enumerate()
        .max_by(|(ia, a), (ib, b)| a.timestamp.cmp(&b.timestamp).then(ib.cmp(ia)))
        .map(|(_, j)| j)
    else {
        return PrescriptionOutcome::NoData;
    };

    let plan = match latest.quality {
        SleepQuality::Bad => Prescription {
            sleep_quality: SleepQuality::Bad,
            recommendations: strings(&[
                "Establish a consistent sleep schedule",
                "Create a relaxing bedtime routine",
                "Limit screen time before bed",
                "Exercise regularly but not close to bedtime",
            ]),
            lifestyle_changes: strings(&[
                "Avoid caffeine after mid-day",
                "Create a dark and quiet sleep environment",
                "Consider stress management techniques",
            ]),
            follow_up: "Schedule a follow-up in 2 weeks".to_string(),
            issued_at: now,
        },
        SleepQuality::Good => Prescription {
            sleep_quality: SleepQuality::Good,
            recommendations: strings(&[
                "Maintain your current sleep schedule",
                "Continue practicing good sleep hygiene",
                "Keep a sleep diary to track patterns",
            ]),
            lifestyle_changes: strings(&["Regular exercise", "Balanced diet", "Stress management"]),
            follow_up: "Schedule a follow-up in 1 month".to_string(),
            issued_at: now,
        },
    };

    PrescriptionOutcome::Plan(plan)
}
