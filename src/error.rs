//! Error types for the banknote_inspect library

use std::path::PathBuf;

use thiserror::Error;

use crate::models::BoundingBox;

/// Result type alias for banknote_inspect operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the inspection pipeline.
///
/// Input errors reject a call before any processing happens. Resource
/// errors are normally absorbed by the component that owns the resource
/// and turned into an "unavailable" result; they only reach callers of the
/// loading functions themselves.
#[derive(Error, Debug)]
pub enum Error {
    /// The image has zero width or height
    #[error("image is empty ({width}x{height})")]
    EmptyImage { width: u32, height: u32 },

    /// Image file could not be read or decoded
    #[error("failed to load image {path}: {source}")]
    ImageLoad {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// ROI does not fit inside the image it is applied to
    #[error("ROI {roi} lies outside the {width}x{height} image")]
    RoiOutOfBounds {
        roi: BoundingBox,
        width: u32,
        height: u32,
    },

    /// A configuration value violates its constraint
    #[error("invalid configuration value {parameter} = {value}: {reason}")]
    InvalidConfig {
        parameter: &'static str,
        value: String,
        reason: &'static str,
    },

    /// A configuration update named a parameter that does not exist
    #[error("unknown configuration parameter: {0}")]
    UnknownConfigKey(String),

    /// The persisted configuration file is not valid JSON for the schema
    #[error("malformed configuration file {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A reference template could not be loaded
    #[error("template for {label} unavailable at {path}")]
    TemplateUnavailable { label: String, path: PathBuf },

    /// The trained model artifact is missing or unusable
    #[error("model unavailable at {path}: {reason}")]
    ModelUnavailable { path: PathBuf, reason: String },

    /// The capture device could not be opened or stopped producing frames
    #[error("capture device unavailable: {reason}")]
    CaptureUnavailable { reason: String },

    /// The model artifact could not be encoded or decoded
    #[error("model serialization error: {0}")]
    ModelFormat(#[from] serde_json::Error),

    /// A feature vector could not be computed from the image
    #[error("feature extraction failed: {0}")]
    FeatureExtraction(String),

    /// Training could not produce a usable model
    #[error("training failed: {0}")]
    Training(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Malformed input that the caller has to fix before retrying
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Error::EmptyImage { .. }
                | Error::ImageLoad { .. }
                | Error::RoiOutOfBounds { .. }
                | Error::InvalidConfig { .. }
                | Error::UnknownConfigKey(_)
                | Error::ConfigParse { .. }
        )
    }

    /// A missing external resource; dependent features degrade instead of failing
    pub fn is_resource_unavailable(&self) -> bool {
        matches!(
            self,
            Error::TemplateUnavailable { .. }
                | Error::ModelUnavailable { .. }
                | Error::CaptureUnavailable { .. }
        )
    }

    pub(crate) fn invalid_config(
        parameter: &'static str,
        value: impl ToString,
        reason: &'static str,
    ) -> Self {
        Self::InvalidConfig {
            parameter,
            value: value.to_string(),
            reason,
        }
    }
}
