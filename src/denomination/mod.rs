pub mod features;
pub mod knn;
pub mod template;
pub mod training;

use std::path::Path;
use std::sync::Arc;

use image::DynamicImage;

use crate::error::Result;
use crate::models::DenominationEstimate;

pub use features::{FeatureExtractor, FeatureKind};
pub use knn::{KnnModel, LabeledSample, LearnedClassifier};
pub use template::{ReferenceTemplate, TemplateGallery, TemplateMatcher};

/// Common contract of every denomination strategy
pub trait Classify: Send + Sync {
    /// Estimate the denomination of a raw (color or grayscale) image.
    ///
    /// Only malformed input is an error; missing templates or models give an
    /// "unrecognized" or "model unavailable" estimate instead.
    fn classify(&self, image: &DynamicImage) -> Result<DenominationEstimate>;

    /// Human-readable strategy name
    fn name(&self) -> &str;
}

/// Strategy chosen when the inspector is constructed
#[derive(Debug, Clone)]
pub enum DenominationClassifier {
    Template(TemplateMatcher),
    Learned(LearnedClassifier),
}

impl DenominationClassifier {
    /// Template matching over the gallery in `dir`
    pub fn from_template_dir(dir: &Path) -> Self {
        DenominationClassifier::Template(TemplateMatcher::new(Arc::new(TemplateGallery::load(dir))))
    }

    /// Learned classifier from the model artifact at `path`
    pub fn from_model_file(path: &Path) -> Self {
        DenominationClassifier::Learned(LearnedClassifier::load(path))
    }

    fn strategy(&self) -> &dyn Classify {
        match self {
            DenominationClassifier::Template(matcher) => matcher,
            DenominationClassifier::Learned(learned) => learned,
        }
    }
}

impl Classify for DenominationClassifier {
    fn classify(&self, image: &DynamicImage) -> Result<DenominationEstimate> {
        self.strategy().classify(image)
    }

    fn name(&self) -> &str {
        self.strategy().name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DenominationLabel;

    #[test]
    fn test_missing_resources_degrade() {
        let dir = tempfile::TempDir::new().unwrap();
        let img = DynamicImage::ImageLuma8(image::GrayImage::new(16, 16));

        let templates = DenominationClassifier::from_template_dir(dir.path());
        assert_eq!(templates.name(), "template matching");
        assert_eq!(
            templates.classify(&img).unwrap().label,
            DenominationLabel::Unrecognized
        );

        let learned = DenominationClassifier::from_model_file(&dir.path().join("model.knn"));
        assert_eq!(learned.name(), "k-NN");
        assert_eq!(
            learned.classify(&img).unwrap().label,
            DenominationLabel::ModelUnavailable
        );
    }
}
