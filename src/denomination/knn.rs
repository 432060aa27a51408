use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::DynamicImage;
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::denomination::features::FeatureExtractor;
use crate::denomination::Classify;
use crate::error::{Error, Result};
use crate::models::{Denomination, DenominationEstimate};

const ZSTD_LEVEL: i32 = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledSample {
    pub denomination: Denomination,
    pub features: Vec<f32>,
}

/// k-nearest-neighbour model over labeled feature vectors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnnModel {
    pub extractor: FeatureExtractor,
    pub k: usize,
    pub samples: Vec<LabeledSample>,
    /// RFC 3339 timestamp of the training run
    pub trained_at: String,
    /// Accuracy on the held-out split, when one was available
    pub validation_accuracy: Option<f64>,
}

impl KnnModel {
    /// Fit on `samples`; every vector must match the extractor's length
    pub fn fit(extractor: FeatureExtractor, k: usize, samples: Vec<LabeledSample>) -> Result<Self> {
        if k == 0 {
            return Err(Error::Training("k must be at least 1".to_string()));
        }
        if samples.is_empty() {
            return Err(Error::Training("no training samples".to_string()));
        }
        extractor
            .validate()
            .map_err(|e| Error::Training(e.to_string()))?;
        let expected = extractor.feature_len();
        if let Some(bad) = samples.iter().find(|s| s.features.len() != expected) {
            return Err(Error::Training(format!(
                "feature length {} for {} does not match extractor length {}",
                bad.features.len(),
                bad.denomination,
                expected
            )));
        }

        let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
        let trained_at = now
            .format(&Rfc3339)
            .map_err(|e| Error::Training(format!("cannot format training time: {e}")))?;

        Ok(Self {
            extractor,
            k,
            samples,
            trained_at,
            validation_accuracy: None,
        })
    }

    pub fn trained_at(&self) -> Option<OffsetDateTime> {
        OffsetDateTime::parse(&self.trained_at, &Rfc3339).ok()
    }

    /// Majority vote among the `k` nearest samples.
    ///
    /// Returns the winning denomination and its share of the votes, or None
    /// when `features` does not have the model's length. Vote ties go to the
    /// label whose closest sample is nearest.
    pub fn predict(&self, features: &[f32]) -> Option<(Denomination, f32)> {
        if self.samples.is_empty() || features.len() != self.extractor.feature_len() {
            return None;
        }

        let mut distances: Vec<(f32, Denomination)> = self
            .samples
            .iter()
            .map(|s| (squared_distance(&s.features, features), s.denomination))
            .collect();
        distances.sort_by(|a, b| a.0.total_cmp(&b.0));

        let k = self.k.min(distances.len());
        let nearest = &distances[..k];

        // Labels in order of first appearance among the nearest
        let mut votes: Vec<(Denomination, usize)> = Vec::new();
        for (_, d) in nearest {
            match votes.iter().position(|(label, _)| label == d) {
                Some(i) => votes[i].1 += 1,
                None => votes.push((*d, 1)),
            }
        }

        let (label, count) = votes
            .into_iter()
            .fold(None, |best: Option<(Denomination, usize)>, v| match best {
                Some(b) if b.1 >= v.1 => Some(b),
                _ => Some(v),
            })?;
        Some((label, count as f32 / k as f32))
    }

    /// Write the model as zstd-compressed JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec(self)?;
        let compressed = zstd::encode_all(json.as_slice(), ZSTD_LEVEL)?;
        fs::write(path, compressed)?;
        log::info!(
            "Saved model with {} samples to {}",
            self.samples.len(),
            path.display()
        );
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let unavailable = |reason: String| Error::ModelUnavailable {
            path: path.to_path_buf(),
            reason,
        };

        let compressed = fs::read(path).map_err(|e| unavailable(e.to_string()))?;
        let json = zstd::decode_all(compressed.as_slice())
            .map_err(|e| unavailable(format!("not a model artifact: {e}")))?;
        let model: Self = serde_json::from_slice(&json)
            .map_err(|e| unavailable(format!("unreadable model: {e}")))?;

        model
            .extractor
            .validate()
            .map_err(|e| unavailable(format!("model is stale: {e}")))?;
        let expected = model.extractor.feature_len();
        if model.k == 0
            || model.samples.is_empty()
            || model.samples.iter().any(|s| s.features.len() != expected)
        {
            return Err(unavailable("model is stale or inconsistent".to_string()));
        }
        Ok(model)
    }
}

fn squared_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Classifier backed by an optional k-NN model
#[derive(Debug, Clone)]
pub struct LearnedClassifier {
    model: Option<Arc<KnnModel>>,
    source: Option<PathBuf>,
}

impl LearnedClassifier {
    pub fn from_model(model: KnnModel) -> Self {
        Self {
            model: Some(Arc::new(model)),
            source: None,
        }
    }

    /// A classifier that always answers "model unavailable"
    pub fn unavailable() -> Self {
        Self {
            model: None,
            source: None,
        }
    }

    /// Load the model at `path`; a missing or stale artifact is logged and
    /// leaves the classifier without a model
    pub fn load(path: &Path) -> Self {
        let model = match KnnModel::load(path) {
            Ok(model) => {
                log::info!(
                    "Loaded denomination model from {} ({} samples, trained {})",
                    path.display(),
                    model.samples.len(),
                    model
                        .trained_at()
                        .map(|t| t.date().to_string())
                        .unwrap_or_else(|| "at unknown time".to_string())
                );
                Some(Arc::new(model))
            }
            Err(e) => {
                log::warn!("{e}; denomination classification disabled");
                None
            }
        };
        Self {
            model,
            source: Some(path.to_path_buf()),
        }
    }

    pub fn is_available(&self) -> bool {
        self.model.is_some()
    }

    pub fn model(&self) -> Option<&KnnModel> {
        self.model.as_deref()
    }
}

impl Classify for LearnedClassifier {
    fn classify(&self, image: &DynamicImage) -> Result<DenominationEstimate> {
        let Some(model) = &self.model else {
            return Ok(DenominationEstimate::model_unavailable());
        };

        let features = match model.extractor.extract(image) {
            Ok(features) => features,
            Err(e) if e.is_input_error() => return Err(e),
            Err(e) => {
                log::warn!("Cannot extract model features: {e}");
                return Ok(DenominationEstimate::model_unavailable());
            }
        };
        match model.predict(&features) {
            Some((denomination, confidence)) => {
                log::debug!("k-NN predicted {denomination} with {confidence:.2} of votes");
                Ok(DenominationEstimate::known(denomination, confidence))
            }
            None => {
                log::warn!(
                    "Model {} does not accept {}-long features",
                    self.source
                        .as_ref()
                        .map(|p| p.display().to_string())
                        .unwrap_or_default(),
                    features.len()
                );
                Ok(DenominationEstimate::model_unavailable())
            }
        }
    }

    fn name(&self) -> &str {
        "k-NN"
    }
}
