pub mod authenticity;
pub mod clahe;
pub mod preprocessing;
pub mod roi;
pub mod steps;

use std::path::PathBuf;
use std::sync::Arc;

use image::{DynamicImage, GrayImage};

use crate::config::{ConfigStore, ConfigUpdate, Configuration};
use crate::denomination::{Classify, DenominationClassifier};
use crate::error::Result;
use crate::models::{AnalysisResult, BoundingBox, DenominationEstimate, EdgeMap};
use crate::pipeline::{prepare_debug_dir, DebugConfig, Pipeline};

/// Everything one analysis call produces
#[derive(Debug, Clone)]
pub struct Inspection {
    pub roi: Option<BoundingBox>,
    pub edge_map: EdgeMap,
    pub analysis: AnalysisResult,
    pub denomination: DenominationEstimate,
    /// Revision of the configuration snapshot the analysis ran with
    pub config_revision: u64,
}

/// Stateless processing stages behind the configuration store and the
/// denomination strategy chosen at construction
pub struct BanknoteInspector {
    config: ConfigStore,
    classifier: DenominationClassifier,
    debug: Option<DebugConfig>,
}

impl BanknoteInspector {
    pub fn new(config: ConfigStore, classifier: DenominationClassifier) -> Self {
        Self {
            config,
            classifier,
            debug: None,
        }
    }

    /// Save every stage image of `inspect` under `output_dir`
    /// The directory must be empty or non-existent
    pub fn with_debug(mut self, output_dir: PathBuf) -> anyhow::Result<Self> {
        self.debug = Some(prepare_debug_dir(output_dir)?);
        Ok(self)
    }

    pub fn locate_roi(&self, image: &DynamicImage) -> Option<BoundingBox> {
        roi::locate_roi(image)
    }

    pub fn preprocess(&self, image: &DynamicImage, roi: Option<&BoundingBox>) -> Result<GrayImage> {
        preprocessing::preprocess(image, roi, &self.config.snapshot())
    }

    pub fn detect_edges(&self, image: &GrayImage) -> Result<EdgeMap> {
        preprocessing::detect_edges(image, &self.config.snapshot())
    }

    pub fn score_authenticity(&self, edge_map: &EdgeMap) -> AnalysisResult {
        authenticity::score(edge_map, &self.config.snapshot())
    }

    pub fn classify_denomination(&self, image: &DynamicImage) -> Result<DenominationEstimate> {
        self.classifier.classify(image)
    }

    pub fn classifier(&self) -> &DenominationClassifier {
        &self.classifier
    }

    pub fn get_config(&self) -> Configuration {
        self.config.snapshot().as_ref().clone()
    }

    /// Validate, persist and publish a partial update
    pub fn update_config(&self, update: &ConfigUpdate) -> Result<Configuration> {
        Ok(self.config.update(update)?.as_ref().clone())
    }

    pub fn config_store(&self) -> &ConfigStore {
        &self.config
    }

    /// Run every stage on `image` with a single configuration snapshot
    pub fn inspect(&self, image: &DynamicImage) -> Result<Inspection> {
        preprocessing::ensure_non_empty(image.width(), image.height())?;

        let (config_revision, config) = self.config.versioned_snapshot();

        let data = build_authenticity_pipeline()
            .with_debug_config(self.debug.clone())
            .run(image.clone(), Arc::clone(&config))?;

        let edge_map = data.image.to_luma8();
        let analysis = data
            .analysis
            .unwrap_or_else(|| authenticity::score(&edge_map, &config));
        let denomination = self.classifier.classify(image)?;

        log::debug!(
            "Inspection: roi={}, verdict={}, denomination={} ({:.2})",
            data.bbox
                .map(|b| b.to_string())
                .unwrap_or_else(|| "none".to_string()),
            analysis.verdict,
            denomination.label,
            denomination.confidence
        );

        Ok(Inspection {
            roi: data.bbox,
            edge_map,
            analysis,
            denomination,
            config_revision,
        })
    }
}

/// ROI, equalization, edges, then scoring; stage parameters come from the
/// configuration snapshot passed to `Pipeline::run`
pub fn build_authenticity_pipeline() -> Pipeline {
    use steps::*;

    Pipeline::new()
        .add_step(Arc::new(RoiStep))
        .add_step(Arc::new(PreprocessStep))
        .add_step(Arc::new(EdgeDetectionStep))
        .add_step(Arc::new(AuthenticityStep))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::denomination::LearnedClassifier;
    use crate::models::{DenominationLabel, Verdict};
    use image::Luma;

    fn inspector() -> BanknoteInspector {
        BanknoteInspector::new(
            ConfigStore::in_memory(Configuration::default()).unwrap(),
            DenominationClassifier::Learned(LearnedClassifier::unavailable()),
        )
    }

    fn note() -> DynamicImage {
        let mut img = GrayImage::from_pixel(120, 80, Luma([250]));
        for y in 20..60 {
            for x in 30..90 {
                let v = if (x / 4 + y / 4) % 2 == 0 { 30 } else { 160 };
                img.put_pixel(x, y, Luma([v]));
            }
        }
        DynamicImage::ImageLuma8(img)
    }

    #[test]
    fn test_pipeline_step_order() {
        let pipeline = build_authenticity_pipeline();
        assert_eq!(
            pipeline.step_names(),
            vec![
                "ROI Localization",
                "Equalization",
                "Edge Detection",
                "Authenticity Scoring"
            ]
        );
    }

    #[test]
    fn test_inspect_matches_individual_stages() {
        let inspector = inspector();
        let img = note();

        let roi = inspector.locate_roi(&img);
        let pre = inspector.preprocess(&img, roi.as_ref()).unwrap();
        let edges = inspector.detect_edges(&pre).unwrap();
        let expected = inspector.score_authenticity(&edges);

        let inspection = inspector.inspect(&img).unwrap();
        assert_eq!(inspection.roi, roi);
        assert_eq!(inspection.edge_map, edges);
        assert_eq!(inspection.analysis, expected);
        assert_eq!(
            inspection.denomination.label,
            DenominationLabel::ModelUnavailable
        );
    }

    #[test]
    fn test_empty_image_is_rejected() {
        let err = inspector()
            .inspect(&DynamicImage::ImageLuma8(GrayImage::new(0, 0)))
            .unwrap_err();
        assert!(err.is_input_error());
    }

    #[test]
    fn test_blank_image_is_counterfeit() {
        let blank = DynamicImage::ImageLuma8(GrayImage::from_pixel(64, 64, Luma([0])));
        let inspection = inspector().inspect(&blank).unwrap();
        assert_eq!(inspection.analysis.verdict, Verdict::Counterfeit);
        assert_eq!(inspection.analysis.edge_pixels, 0);
    }

    #[test]
    fn test_rejected_update_keeps_config() {
        let inspector = inspector();
        let mut update = ConfigUpdate::default();
        update.gaussian_blur = Some(4);
        assert!(inspector.update_config(&update).unwrap_err().is_input_error());
        assert_eq!(inspector.get_config(), Configuration::default());
        assert_eq!(inspector.config_store().revision(), 0);
    }
}
