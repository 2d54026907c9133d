//! Sleep-quality prediction
//!
//! The fitted classifier is opaque: it takes an ordered numeric vector and
//! returns a class or a score. Two on-disk forms are supported:
//!
//! - a JSON bundle holding a standard scaler and logistic-regression
//!   weights (the portable form of a scikit-learn pipeline),
//! - an ONNX export, run through ONNX Runtime.
//!
//! `Predictor` bounds every model call with a timeout and falls back to a
//! fixed threshold rule when the model is absent, fails or is too slow.

use crate::error::ConfigError;
use crate::recommend::Comparison;
use crate::types::{FeatureVector, Prediction, PredictionSource, SleepQuality};
use anyhow::{anyhow, Context, Result};
use ndarray::Array2;
use ort::{
    inputs,
    session::{builder::GraphOptimizationLevel, Session},
    value::Tensor,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Maps raw predictions onto sleep quality. This is the only place the
/// meaning of a class index or score is defined.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelPolicy {
    /// Class index that denotes bad sleep; any other class is good
    pub bad_class: i64,
    /// Scores at or above this are good sleep
    pub good_score_min: f64,
}

impl Default for LabelPolicy {
    fn default() -> Self {
        Self {
            bad_class: 1,
            good_score_min: 0.5,
        }
    }
}

impl LabelPolicy {
    pub fn quality(&self, prediction: Prediction) -> SleepQuality {
        match prediction {
            Prediction::Class(c) if c == self.bad_class => SleepQuality::Bad,
            Prediction::Class(_) => SleepQuality::Good,
            Prediction::Score(s) if s >= self.good_score_min => SleepQuality::Good,
            Prediction::Score(_) => SleepQuality::Bad,
        }
    }

    /// Class index the policy uses for a quality
    pub fn class_for(&self, quality: SleepQuality) -> i64 {
        match quality {
            SleepQuality::Bad => self.bad_class,
            SleepQuality::Good if self.bad_class == 0 => 1,
            SleepQuality::Good => 0,
        }
    }
}

/// Deterministic rule used when no model answer is available
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackRule {
    pub feature: String,
    pub comparison: Comparison,
    pub threshold: f64,
    /// Quality assigned when the comparison holds; the other one otherwise
    pub when_true: SleepQuality,
}

impl Default for FallbackRule {
    fn default() -> Self {
        Self {
            feature: "sleep_duration".to_string(),
            comparison: Comparison::Lt,
            threshold: 7.0,
            when_true: SleepQuality::Bad,
        }
    }
}

impl FallbackRule {
    /// Returns `None` when the vector lacks the rule's feature
    pub fn judge(&self, features: &FeatureVector) -> Option<SleepQuality> {
        let value = features.get(&self.feature)?;
        let holds = self.comparison.holds(value, self.threshold);
        Some(match (holds, self.when_true) {
            (true, q) => q,
            (false, SleepQuality::Bad) => SleepQuality::Good,
            (false, SleepQuality::Good) => SleepQuality::Bad,
        })
    }
}

/// An already-fitted sleep-quality classifier
pub trait SleepClassifier: Send + Sync {
    /// Feature names, in the order `predict` expects them
    fn feature_order(&self) -> &[String];

    fn predict(&self, input: &[f64]) -> Result<Prediction>;

    fn name(&self) -> &str;
}

/// Standardization applied before the model: (x - mean) / scale
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scaler {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl Scaler {
    pub fn transform(&self, input: &[f64]) -> Vec<f64> {
        input
            .iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(x, (m, s))| if *s == 0.0 { x - m } else { (x - m) / s })
            .collect()
    }

    fn check(&self, n: usize) -> Result<(), ConfigError> {
        if self.mean.len() != n || self.scale.len() != n {
            return Err(ConfigError::InvalidModel(format!(
                "scaler has {}/{} entries for {} features",
                self.mean.len(),
                self.scale.len(),
                n
            )));
        }
        Ok(())
    }
}

/// What a linear bundle reports
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinearOutput {
    /// `1` when the logistic probability is >= 0.5, else `0`
    #[default]
    Class,
    /// The logistic probability itself
    Score,
}

/// Logistic regression over scaled features, loaded from JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    pub features: Vec<String>,
    #[serde(default)]
    pub scaler: Option<Scaler>,
    pub coefficients: Vec<f64>,
    pub intercept: f64,
    #[serde(default)]
    pub output: LinearOutput,
}

impl LinearModel {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read model bundle at {:?}", path))?;
        let model: LinearModel =
            serde_json::from_str(&content).context("Failed to parse model bundle JSON")?;
        model.validate()?;
        Ok(model)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let n = self.features.len();
        if n == 0 || self.coefficients.len() != n {
            return Err(ConfigError::InvalidModel(format!(
                "{} coefficients for {} features",
                self.coefficients.len(),
                n
            )));
        }
        if let Some(scaler) = &self.scaler {
            scaler.check(n)?;
        }
        Ok(())
    }

    pub fn probability(&self, input: &[f64]) -> f64 {
        let scaled = match &self.scaler {
            Some(scaler) => scaler.transform(input),
            None => input.to_vec(),
        };
        let z: f64 = self.intercept
            + scaled
                .iter()
                .zip(&self.coefficients)
                .map(|(x, w)| x * w)
                .sum::<f64>();
        1.0 / (1.0 + (-z).exp())
    }
}

impl SleepClassifier for LinearModel {
    fn feature_order(&self) -> &[String] {
        &self.features
    }

    fn predict(&self, input: &[f64]) -> Result<Prediction> {
        if input.len() != self.features.len() {
            return Err(anyhow!(
                "expected {} inputs, got {}",
                self.features.len(),
                input.len()
            ));
        }
        let p = self.probability(input);
        Ok(match self.output {
            LinearOutput::Class => Prediction::Class(if p >= 0.5 { 1 } else { 0 }),
            LinearOutput::Score => Prediction::Score(p),
        })
    }

    fn name(&self) -> &str {
        "linear"
    }
}

/// Sidecar metadata for an ONNX export
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnnxMeta {
    pub features: Vec<String>,
    #[serde(default)]
    pub scaler: Option<Scaler>,
    #[serde(default = "default_input_name")]
    pub input_name: String,
    #[serde(default = "default_output_name")]
    pub output_name: String,
}

fn default_input_name() -> String {
    "float_input".to_string()
}

fn default_output_name() -> String {
    "label".to_string()
}

/// ONNX Runtime classifier. An integer output is a class, a float output is
/// a score.
pub struct OnnxModel {
    session: Mutex<Session>,
    meta: OnnxMeta,
}

impl OnnxModel {
    /// Load `<stem>.onnx` plus the `<stem>.json` metadata next to it
    pub fn new(model_path: &Path) -> Result<Self> {
        if !model_path.exists() {
            return Err(ConfigError::ModelMissing(model_path.display().to_string()).into());
        }

        let meta_path = model_path.with_extension("json");
        let content = std::fs::read_to_string(&meta_path)
            .with_context(|| format!("Failed to read model metadata at {:?}", meta_path))?;
        let meta: OnnxMeta =
            serde_json::from_str(&content).context("Failed to parse model metadata JSON")?;
        if let Some(scaler) = &meta.scaler {
            scaler.check(meta.features.len())?;
        }

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(ort::Error::<()>::from)?
            .with_intra_threads(1)
            .map_err(ort::Error::<()>::from)?
            .commit_from_file(model_path)
            .context("Failed to load sleep-quality ONNX model")?;

        Ok(Self {
            session: Mutex::new(session),
            meta,
        })
    }
}

impl SleepClassifier for OnnxModel {
    fn feature_order(&self) -> &[String] {
        &self.meta.features
    }

    fn predict(&self, input: &[f64]) -> Result<Prediction> {
        let scaled = match &self.meta.scaler {
            Some(scaler) => scaler.transform(input),
            None => input.to_vec(),
        };
        let row: Vec<f32> = scaled.iter().map(|v| *v as f32).collect();
        let array = Array2::from_shape_vec((1, row.len()), row)?;
        let tensor = Tensor::from_array(array)?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| anyhow!("ONNX session lock poisoned"))?;
        let outputs = session.run(inputs![self.meta.input_name.as_str() => tensor])?;

        let output = outputs
            .get(self.meta.output_name.as_str())
            .ok_or_else(|| anyhow!("No {} output", self.meta.output_name))?;

        if let Ok((_shape, data)) = output.try_extract_tensor::<i64>() {
            let class = *data.first().ok_or_else(|| anyhow!("empty label output"))?;
            return Ok(Prediction::Class(class));
        }
        let (_shape, data) = output.try_extract_tensor::<f32>()?;
        let score = *data.first().ok_or_else(|| anyhow!("empty score output"))?;
        Ok(Prediction::Score(score as f64))
    }

    fn name(&self) -> &str {
        "onnx"
    }
}

/// On-disk model formats
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    #[default]
    Linear,
    Onnx,
}

/// Load a model at startup. A configured path that does not exist is fatal.
pub fn load_model(path: &Path, kind: ModelKind) -> Result<Arc<dyn SleepClassifier>> {
    if !path.exists() {
        return Err(ConfigError::ModelMissing(path.display().to_string()).into());
    }
    let model: Arc<dyn SleepClassifier> = match kind {
        ModelKind::Linear => Arc::new(LinearModel::from_file(path)?),
        ModelKind::Onnx => Arc::new(OnnxModel::new(path)?),
    };
    tracing::info!(model = model.name(), path = %path.display(), "sleep-quality model loaded");
    Ok(model)
}

/// Outcome of one prediction
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PredictionResult {
    pub prediction: Prediction,
    pub source: PredictionSource,
}

/// Model call with timeout and rule-based fallback
#[derive(Clone)]
pub struct Predictor {
    model: Option<Arc<dyn SleepClassifier>>,
    timeout: Duration,
    fallback: FallbackRule,
    policy: LabelPolicy,
}

impl Predictor {
    pub fn new(fallback: FallbackRule, policy: LabelPolicy) -> Self {
        Self {
            model: None,
            timeout: Duration::from_millis(2000),
            fallback,
            policy,
        }
    }

    pub fn with_model(mut self, model: Arc<dyn SleepClassifier>, timeout: Duration) -> Self {
        self.model = Some(model);
        self.timeout = timeout;
        self
    }

    pub fn has_model(&self) -> bool {
        self.model.is_some()
    }

    pub fn model(&self) -> Option<&Arc<dyn SleepClassifier>> {
        self.model.as_ref()
    }

    pub fn fallback(&self) -> &FallbackRule {
        &self.fallback
    }

    pub fn policy(&self) -> &LabelPolicy {
        &self.policy
    }

    /// Model inputs in the model's own order. A feature the model needs but
    /// the vector lacks yields `None`.
    fn model_input(model: &dyn SleepClassifier, features: &FeatureVector) -> Option<Vec<f64>> {
        model
            .feature_order()
            .iter()
            .map(|name| features.get(name))
            .collect()
    }

    /// Predict with the model when possible, otherwise with the fallback.
    pub async fn predict(&self, features: &FeatureVector) -> PredictionResult {
        if let Some(model) = &self.model {
            match Self::model_input(model.as_ref(), features) {
                Some(input) => {
                    let model = Arc::clone(model);
                    let call = tokio::task::spawn_blocking(move || model.predict(&input));
                    match tokio::time::timeout(self.timeout, call).await {
                        Ok(Ok(Ok(prediction))) => {
                            return PredictionResult {
                                prediction,
                                source: PredictionSource::Model,
                            }
                        }
                        Ok(Ok(Err(e))) => tracing::warn!(error = %e, "model prediction failed, using fallback rule"),
                        Ok(Err(e)) => tracing::warn!(error = %e, "model task panicked, using fallback rule"),
                        Err(_) => tracing::warn!(timeout_ms = self.timeout.as_millis() as u64, "model prediction timed out, using fallback rule"),
                    }
                }
                None => tracing::warn!("feature vector lacks model inputs, using fallback rule"),
            }
        }

        self.predict_fallback(features)
    }

    pub fn predict_fallback(&self, features: &FeatureVector) -> PredictionResult {
        let quality = match self.fallback.judge(features) {
            Some(q) => q,
            None => {
                tracing::warn!(feature = %self.fallback.feature, "fallback feature missing, assuming good sleep");
                SleepQuality::Good
            }
        };
        PredictionResult {
            prediction: Prediction::Class(self.policy.class_for(quality)),
            source: PredictionSource::Fallback,
        }
    }
}
