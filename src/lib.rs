pub mod capture;
pub mod config;
pub mod denomination;
pub mod detection;
pub mod error;
pub mod models;
pub mod pipeline;

pub use capture::{CaptureLoop, DirectoryFrameSource, Frame, FrameSource};
pub use config::{ConfigStore, ConfigUpdate, Configuration};
pub use denomination::{Classify, DenominationClassifier};
pub use detection::{BanknoteInspector, Inspection};
pub use error::{Error, Result};
pub use models::{
    AnalysisResult, BoundingBox, Denomination, DenominationEstimate, DenominationLabel, EdgeMap,
    Verdict,
};
pub use pipeline::{DebugConfig, MetadataValue, Pipeline, PipelineContext, PipelineData, PipelineStep};
