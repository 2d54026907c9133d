//! Best-effort spreadsheet mirror
//!
//! Persisted judgments and chats can be copied to a Google Sheets document.
//! The mirror is never authoritative: a sync runs detached from the request,
//! under its own timeout, and failures are only logged.

use crate::config::SheetsSettings;
use crate::types::{ChatExchange, Judgment};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::SecondsFormat;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

#[async_trait]
pub trait SheetMirror: Send + Sync {
    /// Append rows to `range` (A1 notation, e.g. `SleepData!A:Z`)
    async fn append_rows(&self, range: &str, rows: Vec<Vec<String>>) -> Result<()>;
}

/// Judgment row: identifier, timestamp, feature values in configured order,
/// label, recommendations joined with " | "
pub fn judgment_row(identifier: &str, judgment: &Judgment) -> Vec<String> {
    let mut row = vec![
        identifier.to_string(),
        judgment.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
    ];
    row.extend(judgment.features.iter().map(|f| f.value.to_string()));
    row.push(judgment.label.to_string());
    row.push(judgment.recommendations.join(" | "));
    row
}

/// Chat row: identifier, timestamp, message, response
pub fn chat_row(identifier: &str, exchange: &ChatExchange) -> Vec<String> {
    vec![
        identifier.to_string(),
        exchange.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
        exchange.message.clone(),
        exchange.response.clone(),
    ]
}

/// Sheets v4 `values:append` over HTTPS
pub struct GoogleSheetsMirror {
    client: reqwest::Client,
    endpoint: String,
    spreadsheet_id: String,
    access_token: String,
}

impl GoogleSheetsMirror {
    pub fn new(spreadsheet_id: &str, access_token: &str, endpoint: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            spreadsheet_id: spreadsheet_id.to_string(),
            access_token: access_token.to_string(),
        })
    }

    /// `None` unless both spreadsheet id and token are configured
    pub fn from_settings(settings: &SheetsSettings) -> Result<Option<Self>> {
        match (&settings.spreadsheet_id, &settings.access_token) {
            (Some(id), Some(token)) => Ok(Some(Self::new(
                id,
                token,
                &settings.endpoint,
                Duration::from_millis(settings.timeout_ms),
            )?)),
            _ => Ok(None),
        }
    }

    fn append_url(&self, range: &str) -> String {
        format!(
            "{}/v4/spreadsheets/{}/values/{}:append?valueInputOption=RAW",
            self.endpoint, self.spreadsheet_id, range
        )
    }
}

#[async_trait]
impl SheetMirror for GoogleSheetsMirror {
    async fn append_rows(&self, range: &str, rows: Vec<Vec<String>>) -> Result<()> {
        let body = serde_json::json!({ "values": rows });

        let response = self
            .client
            .post(self.append_url(range))
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow!("Sheets API error {}: {}", status, error_text));
        }
        Ok(())
    }
}

/// Run one append in the background. The handle is only for tests; callers
/// normally drop it.
pub fn spawn_sync(
    mirror: Arc<dyn SheetMirror>,
    range: String,
    rows: Vec<Vec<String>>,
    timeout: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        match tokio::time::timeout(timeout, mirror.append_rows(&range, rows)).await {
            Ok(Ok(())) => tracing::debug!(range = %range, "mirrored rows to sheet"),
            Ok(Err(e)) => tracing::warn!(range = %range, error = %e, "sheet sync failed"),
            Err(_) => tracing::warn!(
                range = %range,
                timeout_ms = timeout.as_millis() as u64,
                "sheet sync timed out"
            ),
        }
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::types::{FeatureVector, Label, PredictionSource, SleepQuality, Topic};
    use chrono::{TimeZone, Utc};
    use std::sync::Mutex;

    /// Keeps every append in memory
    #[derive(Default)]
    pub(crate) struct RecordingMirror {
        pub(crate) appends: Mutex<Vec<(String, Vec<Vec<String>>)>>,
    }

    #[async_trait]
    impl SheetMirror for RecordingMirror {
        async fn append_rows(&self, range: &str, rows: Vec<Vec<String>>) -> Result<()> {
            self.appends.lock().unwrap().push((range.to_string(), rows));
            Ok(())
        }
    }

    pub(crate) struct FailingMirror;

    #[async_trait]
    impl SheetMirror for FailingMirror {
        async fn append_rows(&self, _range: &str, _rows: Vec<Vec<String>>) -> Result<()> {
            Err(anyhow!("sheet unavailable"))
        }
    }

    struct HangingMirror;

    #[async_trait]
    impl SheetMirror for HangingMirror {
        async fn append_rows(&self, _range: &str, _rows: Vec<Vec<String>>) -> Result<()> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    fn judgment() -> Judgment {
        let features: FeatureVector = [("sleep_duration", 5.5), ("stress_level", 0.8)].into_iter().collect();
        Judgment {
            id: "j".to_string(),
            features,
            label: Label::Category(SleepQuality::Bad),
            quality: SleepQuality::Bad,
            recommendations: vec!["Header".to_string(), "Sleep more".to_string()],
            source: PredictionSource::Model,
            timestamp: Utc.with_ymd_and_hms(2026, 4, 2, 23, 15, 0).unwrap(),
        }
    }

    #[test]
    fn test_judgment_row_columns() {
        let row = judgment_row("ada", &judgment());
        assert_eq!(
            row,
            vec!["ada", "2026-04-02T23:15:00Z", "5.5", "0.8", "bad", "Header | Sleep more"]
        );
    }

    #[test]
    fn test_chat_row_columns() {
        let exchange = ChatExchange {
            timestamp: Utc.with_ymd_and_hms(2026, 4, 2, 8, 0, 0).unwrap(),
            message: "hi".to_string(),
            topic: Topic::Greeting,
            response: "Hello!".to_string(),
        };
        assert_eq!(chat_row("ada", &exchange), vec!["ada", "2026-04-02T08:00:00Z", "hi", "Hello!"]);
    }

    #[test]
    fn test_append_url() {
        let mirror =
            GoogleSheetsMirror::new("sheet-1", "tok", "https://sheets.example.com/", Duration::from_secs(1)).unwrap();
        assert_eq!(
            mirror.append_url("SleepData!A:Z"),
            "https://sheets.example.com/v4/spreadsheets/sheet-1/values/SleepData!A:Z:append?valueInputOption=RAW"
        );
    }

    #[test]
    fn test_disabled_without_token() {
        let settings = SheetsSettings {
            spreadsheet_id: Some("sheet-1".to_string()),
            ..Default::default()
        };
        assert!(GoogleSheetsMirror::from_settings(&settings).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_spawn_sync_delivers_rows() {
        let mirror = Arc::new(RecordingMirror::default());
        spawn_sync(
            mirror.clone(),
            "SleepData!A:Z".to_string(),
            vec![judgment_row("ada", &judgment())],
            Duration::from_secs(1),
        )
        .await
        .unwrap();
        let appends = mirror.appends.lock().unwrap();
        assert_eq!(appends.len(), 1);
        assert_eq!(appends[0].0, "SleepData!A:Z");
    }

    #[tokio::test]
    async fn test_spawn_sync_swallows_failure() {
        let handle = spawn_sync(Arc::new(FailingMirror), "x".to_string(), vec![], Duration::from_secs(1));
        assert!(handle.await.is_ok());
    }

    #[tokio::test]
    async fn test_spawn_sync_times_out() {
        let handle = spawn_sync(Arc::new(HangingMirror), "x".to_string(), vec![], Duration::from_millis(20));
        assert!(handle.await.is_ok());
    }
}
