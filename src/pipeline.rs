use image::DynamicImage;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::Configuration;
use crate::error::Result;
use crate::models::{AnalysisResult, BoundingBox};

/// Data that flows through the pipeline
#[derive(Clone)]
pub struct PipelineData {
    /// The current stage image (color for the raw input, grayscale afterwards)
    pub image: DynamicImage,

    /// Reference to the original image (shared efficiently via Arc)
    pub original: Arc<DynamicImage>,

    /// Watermark region in the original image (None means full image)
    pub bbox: Option<BoundingBox>,

    /// Set by the authenticity step
    pub analysis: Option<AnalysisResult>,

    /// Per-stage measurements, kept for debug output and callers
    pub metadata: HashMap<String, MetadataValue>,
}

/// Metadata value types
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataValue {
    Bool(bool),
    Float(f64),
    String(String),
    Int(i64),
}

impl PipelineData {
    /// Create PipelineData for a full image
    pub fn from_image(image: DynamicImage) -> Self {
        let original = Arc::new(image.clone());
        Self {
            image,
            original,
            bbox: None,
            analysis: None,
            metadata: HashMap::new(),
        }
    }

    /// Replace the stage image, keeping everything else
    pub fn with_image(mut self, image: DynamicImage) -> Self {
        self.image = image;
        self
    }

    /// Add metadata
    pub fn with_metadata(mut self, key: impl Into<String>, value: MetadataValue) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Get metadata as bool
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.metadata.get(key) {
            Some(MetadataValue::Bool(v)) => Some(*v),
            _ => None,
        }
    }

    /// Get metadata as float
    pub fn get_float(&self, key: &str) -> Option<f64> {
        match self.metadata.get(key) {
            Some(MetadataValue::Float(v)) => Some(*v),
            _ => None,
        }
    }

    /// Get metadata as integer
    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.metadata.get(key) {
            Some(MetadataValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    /// Get metadata as string
    pub fn get_string(&self, key: &str) -> Option<&str> {
        match self.metadata.get(key) {
            Some(MetadataValue::String(v)) => Some(v.as_str()),
            _ => None,
        }
    }
}

/// Debug configuration for pipeline execution
#[derive(Clone, Debug)]
pub struct DebugConfig {
    /// Root directory for debug outputs
    pub output_dir: PathBuf,
}

/// Context available to all pipeline steps
#[derive(Clone)]
pub struct PipelineContext {
    /// Configuration snapshot taken when the run started
    pub config: Arc<Configuration>,
    pub debug: Option<DebugConfig>,
}

/// Trait that all pipeline steps must implement
pub trait PipelineStep: Send + Sync {
    /// Transform one item; a failure ends the run for this image
    fn process(&self, data: PipelineData, context: &PipelineContext) -> Result<PipelineData>;

    /// Human-readable name for this step (used in logs and debug directory names)
    fn name(&self) -> &str;
}

/// Composable pipeline builder
pub struct Pipeline {
    steps: Vec<Arc<dyn PipelineStep>>,
    debug: Option<DebugConfig>,
}

impl Pipeline {
    /// Create a new empty pipeline
    pub fn new() -> Self {
        Self {
            steps: Vec::new(),
            debug: None,
        }
    }

    /// Enable debug mode with output directory
    /// The directory must be empty or non-existent
    pub fn with_debug(mut self, output_dir: PathBuf) -> anyhow::Result<Self> {
        self.debug = Some(prepare_debug_dir(output_dir)?);
        Ok(self)
    }

    /// Use an already prepared debug configuration
    pub fn with_debug_config(mut self, debug: Option<DebugConfig>) -> Self {
        self.debug = debug;
        self
    }

    /// Add a processing step to the pipeline
    pub fn add_step(mut self, step: Arc<dyn PipelineStep>) -> Self {
        self.steps.push(step);
        self
    }

    /// Helper method to add a step from a Box (for convenience)
    pub fn add_step_boxed(mut self, step: Box<dyn PipelineStep>) -> Self {
        self.steps.push(Arc::from(step));
        self
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Run every step in order on `input` using one configuration snapshot
    pub fn run(&self, input: DynamicImage, config: Arc<Configuration>) -> Result<PipelineData> {
        let context = PipelineContext {
            config,
            debug: self.debug.clone(),
        };

        if let Some(debug_config) = &context.debug {
            save_debug_image(debug_config, "00_input", &input);
        }

        let mut data = PipelineData::from_image(input);

        for (step_idx, step) in self.steps.iter().enumerate() {
            log::debug!("Running step: {}", step.name());
            data = step.process(data, &context)?;

            if let Some(debug_config) = &context.debug {
                let step_dir_name = format!(
                    "{:02}_{}",
                    step_idx + 1,
                    step.name().to_lowercase().replace(' ', "_")
                );
                save_debug_image(debug_config, &step_dir_name, &data.image);
            }
        }

        Ok(data)
    }

    /// Run the pipeline but stop at an intermediate step (useful for debugging)
    pub fn run_partial(
        &self,
        input: DynamicImage,
        config: Arc<Configuration>,
        num_steps: usize,
    ) -> Result<PipelineData> {
        let context = PipelineContext {
            config,
            debug: None,
        };
        let mut data = PipelineData::from_image(input);

        for step in self.steps.iter().take(num_steps) {
            log::debug!("Running step: {}", step.name());
            data = step.process(data, &context)?;
        }

        Ok(data)
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

/// Check that `output_dir` is usable for debug output, creating it if needed
pub fn prepare_debug_dir(output_dir: PathBuf) -> anyhow::Result<DebugConfig> {
    if output_dir.exists() {
        let entries = std::fs::read_dir(&output_dir)?;
        if entries.count() > 0 {
            return Err(anyhow::anyhow!(
                "Debug directory is not empty: {}",
                output_dir.display()
            ));
        }
    } else {
        std::fs::create_dir_all(&output_dir)?;
    }

    Ok(DebugConfig { output_dir })
}

/// Debug output is best effort: a failed write is logged, never fatal
fn save_debug_image(debug_config: &DebugConfig, step_dir_name: &str, image: &DynamicImage) {
    let step_dir = debug_config.output_dir.join(step_dir_name);
    if let Err(e) = write_debug_image(&step_dir, image) {
        log::warn!("Failed to save debug output to {}: {e:#}", step_dir.display());
    } else {
        log::debug!("Debug: saved {}/01.png", step_dir_name);
    }
}

fn write_debug_image(step_dir: &Path, image: &DynamicImage) -> anyhow::Result<()> {
    std::fs::create_dir_all(step_dir)?;
    image
        .save(step_dir.join("01.png"))
        .map_err(|e| anyhow::anyhow!("Failed to save debug image: {}", e))?;
    Ok(())
}
