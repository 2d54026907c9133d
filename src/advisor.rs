//! The advisor: one object that answers chat, predict, register, stats and
//! prescription calls.
//!
//! Everything behavioral comes from `AdvisorConfig`; storage, the model and
//! the spreadsheet mirror are injected. The only interior mutability is the
//! template RNG.

use crate::config::{AdvisorConfig, SheetsSettings};
use crate::error::{AdvisorError, ConfigError};
use crate::features::FeatureSchema;
use crate::intent::IntentClassifier;
use crate::model::{Predictor, SleepClassifier};
use crate::prescription::{prescribe, PrescriptionOutcome};
use crate::recommend::RecommendationEngine;
use crate::sheets::{chat_row, judgment_row, spawn_sync, SheetMirror};
use crate::stats::{summarize, StatsOutcome};
use crate::store::UserStore;
use crate::templates::TemplateStore;
use crate::types::{
    ChatExchange, ChatReply, ChatRequest, CreateOutcome, Judgment, Label, Prediction, PredictReply,
    RegisterReply, RegisterRequest, Topic, UserRecord,
};
use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
enum SheetKind {
    Judgments,
    Chats,
}

/// Where and how persisted rows get mirrored
struct MirrorTarget {
    mirror: Arc<dyn SheetMirror>,
    judgment_range: String,
    chat_range: String,
    timeout: Duration,
}

pub struct Advisor {
    config: AdvisorConfig,
    classifier: IntentClassifier,
    templates: TemplateStore,
    schema: FeatureSchema,
    engine: RecommendationEngine,
    predictor: Predictor,
    store: Arc<dyn UserStore>,
    mirror: Option<MirrorTarget>,
    rng: Mutex<StdRng>,
}

impl Advisor {
    /// Validate `config` and build the advisor. Predictions use the fallback
    /// rule until a model is attached.
    pub fn new(config: AdvisorConfig, store: Arc<dyn UserStore>) -> Result<Self, ConfigError> {
        config.validate()?;

        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Ok(Self {
            classifier: IntentClassifier::new(&config.intents)?,
            templates: TemplateStore::new(config.templates.clone())?,
            schema: config.schema()?,
            engine: RecommendationEngine::new(config.recommendations.clone()),
            predictor: Predictor::new(config.fallback.clone(), config.labels),
            store,
            mirror: None,
            rng: Mutex::new(rng),
            config,
        })
    }

    /// Attach a classifier. Every input the model declares must be a
    /// configured feature.
    pub fn with_model(mut self, model: Arc<dyn SleepClassifier>, timeout: Duration) -> Result<Self, ConfigError> {
        if let Some(unknown) = model.feature_order().iter().find(|f| !self.schema.contains(f)) {
            return Err(ConfigError::UnknownFeature {
                context: format!("model `{}`", model.name()),
                feature: unknown.clone(),
            });
        }
        self.predictor = self.predictor.with_model(model, timeout);
        Ok(self)
    }

    pub fn with_mirror(mut self, mirror: Arc<dyn SheetMirror>, settings: &SheetsSettings) -> Self {
        self.mirror = Some(MirrorTarget {
            mirror,
            judgment_range: settings.judgment_range.clone(),
            chat_range: settings.chat_range.clone(),
            timeout: Duration::from_millis(settings.timeout_ms),
        });
        self
    }

    pub fn with_seed(self, seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            ..self
        }
    }

    pub fn config(&self) -> &AdvisorConfig {
        &self.config
    }

    pub fn predictor(&self) -> &Predictor {
        &self.predictor
    }

    pub fn store(&self) -> &Arc<dyn UserStore> {
        &self.store
    }

    pub fn topics(&self) -> Vec<Topic> {
        Topic::ALL.to_vec()
    }

    pub fn classify(&self, text: &str) -> Topic {
        self.classifier.classify(text)
    }

    fn template_reply(&self, topic: Topic) -> String {
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        self.templates.select(topic, &mut *rng)
    }

    /// Known user with at least one judgment
    fn user_with_history(&self, identifier: Option<&str>) -> Result<Option<UserRecord>, AdvisorError> {
        let Some(id) = identifier else {
            return Ok(None);
        };
        Ok(self.store.get(id)?.filter(|u| !u.judgments.is_empty()))
    }

    fn mirror_rows(&self, kind: SheetKind, rows: Vec<Vec<String>>) {
        let Some(target) = &self.mirror else {
            return;
        };
        if tokio::runtime::Handle::try_current().is_err() {
            tracing::debug!("no async runtime, skipping sheet sync");
            return;
        }
        let range = match kind {
            SheetKind::Judgments => &target.judgment_range,
            SheetKind::Chats => &target.chat_range,
        };
        // Detached; the response never waits on the sheet
        let _ = spawn_sync(
            Arc::clone(&target.mirror),
            range.clone(),
            rows,
            target.timeout,
        );
    }

    pub fn chat(&self, request: ChatRequest) -> Result<ChatReply, AdvisorError> {
        let message = request.message.trim();
        if message.is_empty() {
            return Err(AdvisorError::MissingMessage);
        }
        let identifier = request
            .user_identifier
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty());

        let topic = self.classify(message);

        let response = match topic {
            Topic::Prescription => match self.user_with_history(identifier)? {
                Some(user) => match prescribe(&user.judgments, Utc::now()) {
                    PrescriptionOutcome::Plan(plan) => plan.render(),
                    PrescriptionOutcome::NoData => self.template_reply(topic),
                },
                None => self.template_reply(topic),
            },
            _ => self.template_reply(topic),
        };

        if let Some(id) = identifier {
            let exchange = ChatExchange {
                timestamp: Utc::now(),
                message: message.to_string(),
                topic,
                response: response.clone(),
            };
            if self.store.append_chat(id, &exchange)? {
                tracing::info!(user = %id, topic = %topic, "chat saved");
                self.mirror_rows(SheetKind::Chats, vec![chat_row(id, &exchange)]);
            }
        }

        Ok(ChatReply { response, topic })
    }

    /// Predict from a raw request body.
    ///
    /// Accepts `{"features": {...}, "user_identifier": ...}` or the legacy
    /// flat form with feature fields at the top level.
    pub async fn predict(&self, body: &Value) -> Result<PredictReply, AdvisorError> {
        let Value::Object(object) = body else {
            return Err(AdvisorError::invalid("body", "expected a JSON object"));
        };

        let raw: &Map<String, Value> = match object.get("features") {
            Some(Value::Object(features)) => features,
            Some(_) => return Err(AdvisorError::invalid("features", "expected an object")),
            None => object,
        };

        let identifier = ["user_identifier", "username"]
            .iter()
            .find_map(|key| object.get(*key).and_then(Value::as_str))
            .map(str::trim)
            .filter(|id| !id.is_empty());

        let features = self.schema.parse(raw)?;
        let result = self.predictor.predict(&features).await;
        let quality = self.predictor.policy().quality(result.prediction);
        let label = match result.prediction {
            Prediction::Class(_) => Label::Category(quality),
            Prediction::Score(score) => Label::Score(score),
        };
        let recommendation = self.engine.recommend(&features, quality)?;

        let mut saved = false;
        if let Some(id) = identifier {
            let judgment = Judgment {
                id: uuid::Uuid::new_v4().to_string(),
                features,
                label,
                quality,
                recommendations: recommendation.lines.clone(),
                source: result.source,
                timestamp: Utc::now(),
            };
            saved = self.store.append_judgment(id, &judgment)?;
            if saved {
                tracing::info!(user = %id, quality = quality.name(), "judgment saved");
                self.mirror_rows(SheetKind::Judgments, vec![judgment_row(id, &judgment)]);
            } else {
                tracing::debug!(user = %id, "unknown user, judgment not saved");
            }
        }

        Ok(PredictReply {
            label,
            sleep_quality: quality,
            recommendations: recommendation.lines,
            source: result.source,
            saved,
        })
    }

    pub fn register(&self, request: RegisterRequest) -> Result<RegisterReply, AdvisorError> {
        let identifier = request.user_identifier.trim();
        if identifier.is_empty() {
            return Err(AdvisorError::missing("user_identifier"));
        }

        let reply = match self.store.create(identifier, request.contact.trim())? {
            CreateOutcome::Created => {
                tracing::info!(user = %identifier, "user registered");
                RegisterReply {
                    created: true,
                    message: "User created successfully".to_string(),
                }
            }
            CreateOutcome::AlreadyExists => RegisterReply {
                created: false,
                message: "User already exists".to_string(),
            },
        };
        Ok(reply)
    }

    /// `None` for an unknown user
    pub fn stats(&self, identifier: &str) -> Result<Option<StatsOutcome>, AdvisorError> {
        Ok(self.store.get(identifier)?.map(|user| summarize(&user.judgments)))
    }

    /// `None` for an unknown user
    pub fn prescription(&self, identifier: &str) -> Result<Option<PrescriptionOutcome>, AdvisorError> {
        Ok(self
            .store
            .get(identifier)?
            .map(|user| prescribe(&user.judgments, Utc::now())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::sheets::tests::{FailingMirror, RecordingMirror};
    use crate::store::MemoryStore;
    use crate::templates::default_templates;
    use crate::types::{PredictionSource, SleepQuality};
    use anyhow::Result;
    use serde_json::json;

    fn advisor() -> Advisor {
        Advisor::new(AdvisorConfig::default(), Arc::new(MemoryStore::new()))
            .unwrap()
            .with_seed(7)
    }

    fn bad_sleep_body(user: Option<&str>) -> Value {
        let mut body = json!({
            "features": {
                "sleep_duration": 5,
                "stress_level": 0.8,
                "physical_activity": 0.2,
                "screen_time": 0.9,
                "caffeine_intake": 0.6
            }
        });
        if let Some(user) = user {
            body["user_identifier"] = json!(user);
        }
        body
    }

    struct FixedModel(Prediction, Vec<String>);

    impl SleepClassifier for FixedModel {
        fn feature_order(&self) -> &[String] {
            &self.1
        }
        fn predict(&self, _input: &[f64]) -> Result<Prediction> {
            Ok(self.0)
        }
        fn name(&self) -> &str {
            "fixed"
        }
    }

    /// Store whose every operation fails
    struct BrokenStore;

    impl UserStore for BrokenStore {
        fn get(&self, _: &str) -> Result<Option<UserRecord>, StoreError> {
            Err(StoreError::Corrupt("disk on fire".to_string()))
        }
        fn create(&self, _: &str, _: &str) -> Result<CreateOutcome, StoreError> {
            Err(StoreError::Corrupt("disk on fire".to_string()))
        }
        fn append_judgment(&self, _: &str, _: &Judgment) -> Result<bool, StoreError> {
            Err(StoreError::Corrupt("disk on fire".to_string()))
        }
        fn append_chat(&self, _: &str, _: &ChatExchange) -> Result<bool, StoreError> {
            Err(StoreError::Corrupt("disk on fire".to_string()))
        }
    }

    fn chat(advisor: &Advisor, message: &str, user: Option<&str>) -> ChatReply {
        advisor
            .chat(ChatRequest {
                message: message.to_string(),
                user_identifier: user.map(String::from),
            })
            .unwrap()
    }

    #[test]
    fn test_hi_is_a_greeting() {
        let advisor = advisor();
        let reply = chat(&advisor, "hi", None);
        assert_eq!(reply.topic, Topic::Greeting);
        let templates = default_templates();
        assert!(templates[&Topic::Greeting].lines.contains(&reply.response));
    }

    #[test]
    fn test_help_returns_full_sheet() {
        let advisor = advisor();
        let reply = chat(&advisor, "help", None);
        assert_eq!(reply.topic, Topic::Help);
        assert_eq!(reply.response, default_templates()[&Topic::Help].lines.join("\n"));
    }

    #[test]
    fn test_greeting_wins_over_sleep_keywords() {
        let reply = chat(&advisor(), "hello, how much caffeine is too much before sleep?", None);
        assert_eq!(reply.topic, Topic::Greeting);
    }

    #[test]
    fn test_same_seed_same_replies() {
        let a = advisor();
        let b = advisor();
        for message in ["hi", "bye", "tips for better sleep", "what?"] {
            assert_eq!(chat(&a, message, None), chat(&b, message, None));
        }
    }

    #[test]
    fn test_empty_message_rejected() {
        let err = advisor()
            .chat(ChatRequest {
                message: "   ".to_string(),
                user_identifier: None,
            })
            .unwrap_err();
        assert!(matches!(err, AdvisorError::MissingMessage));
    }

    #[test]
    fn test_chat_saved_for_known_user_only() {
        let advisor = advisor();
        advisor.register(RegisterRequest {
            user_identifier: "ada".to_string(),
            contact: String::new(),
        })
        .unwrap();
        chat(&advisor, "hi", Some("ada"));
        chat(&advisor, "bye", Some("ghost"));

        let user = advisor.store().get("ada").unwrap().unwrap();
        assert_eq!(user.chats.len(), 1);
        assert_eq!(user.chats[0].topic, Topic::Greeting);
        assert!(advisor.store().get("ghost").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_bad_sleep_scenario() {
        let advisor = advisor();
        let reply = advisor.predict(&bad_sleep_body(None)).await.unwrap();

        assert_eq!(reply.sleep_quality, SleepQuality::Bad);
        assert_eq!(reply.label, Label::Category(SleepQuality::Bad));
        assert_eq!(reply.source, PredictionSource::Fallback);
        assert!(!reply.saved);
        // Header plus one line per default rule
        assert_eq!(reply.recommendations.len(), 6);
        assert_eq!(reply.recommendations[0], advisor.config().recommendations.bad_header);
    }

    #[tokio::test]
    async fn test_legacy_flat_form() {
        let body = json!({"Q1": "8", "Q2": 0.2, "Q4": 0.6, "Q5": 0.1, "Q6": 0.1, "username": "ada"});
        let reply = advisor().predict(&body).await.unwrap();
        assert_eq!(reply.sleep_quality, SleepQuality::Good);
        assert_eq!(reply.recommendations.len(), 1);
    }

    #[tokio::test]
    async fn test_legacy_flat_form_without_stress_is_rejected() {
        let body = json!({"Q1": 8, "Q4": 0.6, "Q5": 0.1, "Q6": 0.1, "username": "ada"});
        let err = advisor().predict(&body).await.unwrap_err();
        assert!(err.is_validation());
        assert_eq!(err.field(), Some("stress_level"));
    }

    #[tokio::test]
    async fn test_predict_validation() {
        let advisor = advisor();

        let mut body = bad_sleep_body(None);
        body["features"].as_object_mut().unwrap().remove("screen_time");
        let err = advisor.predict(&body).await.unwrap_err();
        assert_eq!(err.field(), Some("screen_time"));

        let mut body = bad_sleep_body(None);
        body["features"]["stress_level"] = json!("very");
        let err = advisor.predict(&body).await.unwrap_err();
        assert!(matches!(err, AdvisorError::NonNumeric { ref field } if field == "stress_level"));

        let err = advisor.predict(&json!({"features": [1, 2]})).await.unwrap_err();
        assert_eq!(err.field(), Some("features"));

        let err = advisor.predict(&json!("nope")).await.unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_model_prediction_is_used() {
        let features: Vec<String> = ["sleep_duration", "stress_level"].iter().map(|s| s.to_string()).collect();
        let advisor = advisor()
            .with_model(Arc::new(FixedModel(Prediction::Score(0.5), features)), Duration::from_secs(1))
            .unwrap();
        let reply = advisor.predict(&bad_sleep_body(None)).await.unwrap();
        // 0.5 is inclusive-good
        assert_eq!(reply.sleep_quality, SleepQuality::Good);
        assert_eq!(reply.label, Label::Score(0.5));
        assert_eq!(reply.source, PredictionSource::Model);
        assert_eq!(reply.recommendations[0], advisor.config().recommendations.good_header);
    }

    #[test]
    fn test_model_with_unknown_input_rejected() {
        let model = FixedModel(Prediction::Class(0), vec!["naps".to_string()]);
        let err = advisor().with_model(Arc::new(model), Duration::from_secs(1)).err().expect("should reject");
        assert!(matches!(err, ConfigError::UnknownFeature { ref feature, .. } if feature == "naps"));
    }

    #[tokio::test]
    async fn test_stats_flow() {
        let advisor = advisor();
        assert!(advisor.stats("ada").unwrap().is_none());

        advisor.register(RegisterRequest {
            user_identifier: "ada".to_string(),
            contact: "ada@example.com".to_string(),
        })
        .unwrap();
        assert_eq!(advisor.stats("ada").unwrap(), Some(StatsOutcome::NoData));

        let reply = advisor.predict(&bad_sleep_body(Some("ada"))).await.unwrap();
        assert!(reply.saved);
        let stats = advisor.stats("ada").unwrap().unwrap();
        let summary = stats.summary().unwrap();
        assert_eq!(summary.total, 1);
        assert_eq!(summary.per_label_counts["bad"], 1);
        assert_eq!(summary.feature_averages["sleep_duration"], 5.0);
    }

    #[test]
    fn test_duplicate_registration_keeps_first_record() {
        let advisor = advisor();
        let first = advisor
            .register(RegisterRequest {
                user_identifier: "ada".to_string(),
                contact: "first@example.com".to_string(),
            })
            .unwrap();
        assert!(first.created);

        let second = advisor
            .register(RegisterRequest {
                user_identifier: "ada".to_string(),
                contact: "second@example.com".to_string(),
            })
            .unwrap();
        assert!(!second.created);
        assert_eq!(second.message, "User already exists");
        assert_eq!(advisor.store().get("ada").unwrap().unwrap().contact, "first@example.com");
    }

    #[test]
    fn test_register_requires_identifier() {
        let err = advisor()
            .register(RegisterRequest {
                user_identifier: " ".to_string(),
                contact: String::new(),
            })
            .unwrap_err();
        assert_eq!(err.field(), Some("user_identifier"));
    }

    #[tokio::test]
    async fn test_prescription_chat_uses_history() {
        let advisor = advisor();
        advisor.register(RegisterRequest {
            user_identifier: "ada".to_string(),
            contact: String::new(),
        })
        .unwrap();

        // No history yet: the topic's template
        let before = chat(&advisor, "can I get a prescription", Some("ada"));
        assert_eq!(before.topic, Topic::Prescription);
        assert!(default_templates()[&Topic::Prescription].lines.contains(&before.response));
        assert_eq!(advisor.prescription("ada").unwrap(), Some(PrescriptionOutcome::NoData));

        advisor.predict(&bad_sleep_body(Some("ada"))).await.unwrap();
        let after = chat(&advisor, "can I get a prescription", Some("ada"));
        assert!(after.response.starts_with("Your sleep plan (latest assessment: Bad Sleep):"));
        assert!(matches!(advisor.prescription("ada").unwrap(), Some(PrescriptionOutcome::Plan(_))));
        assert!(advisor.prescription("ghost").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mirror_receives_persisted_rows() {
        let mirror = Arc::new(RecordingMirror::default());
        let advisor = advisor().with_mirror(mirror.clone(), &SheetsSettings::default());
        advisor.register(RegisterRequest {
            user_identifier: "ada".to_string(),
            contact: String::new(),
        })
        .unwrap();
        advisor.predict(&bad_sleep_body(Some("ada"))).await.unwrap();
        chat(&advisor, "hi", Some("ada"));

        for _ in 0..100 {
            if mirror.appends.lock().unwrap().len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let appends = mirror.appends.lock().unwrap();
        let ranges: Vec<&str> = appends.iter().map(|(r, _)| r.as_str()).collect();
        assert!(ranges.contains(&"SleepData!A:Z"));
        assert!(ranges.contains(&"ChatHistory!A:D"));
    }

    #[tokio::test]
    async fn test_mirror_failure_does_not_fail_predict() {
        let advisor = advisor().with_mirror(Arc::new(FailingMirror), &SheetsSettings::default());
        advisor.register(RegisterRequest {
            user_identifier: "ada".to_string(),
            contact: String::new(),
        })
        .unwrap();
        let reply = advisor.predict(&bad_sleep_body(Some("ada"))).await.unwrap();
        assert!(reply.saved);
        assert_eq!(advisor.store().get("ada").unwrap().unwrap().judgments.len(), 1);
    }

    #[test]
    fn test_storage_failure_surfaces() {
        let advisor = Advisor::new(AdvisorConfig::default(), Arc::new(BrokenStore)).unwrap();
        let err = advisor.stats("ada").unwrap_err();
        assert!(matches!(err, AdvisorError::Store(_)));
        assert!(!err.is_validation());
    }

    #[test]
    fn test_invalid_config_is_fatal() {
        let mut config = AdvisorConfig::default();
        config.intents[0].keywords.clear();
        assert!(Advisor::new(config, Arc::new(MemoryStore::new())).is_err());
    }
}
