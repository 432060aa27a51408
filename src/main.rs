use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use image::ImageReader;

use banknote_inspect::config::DEFAULT_CONFIG_PATH;
use banknote_inspect::denomination::training::{self, TrainingOptions};
use banknote_inspect::denomination::{FeatureExtractor, FeatureKind};
use banknote_inspect::{
    BanknoteInspector, CaptureLoop, Classify, ConfigStore, ConfigUpdate, DenominationClassifier,
    DirectoryFrameSource, Inspection,
};

#[derive(Parser)]
#[command(name = "banknote-inspect")]
#[command(about = "Check banknote watermarks and recognize denominations")]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file
    #[arg(long, value_name = "FILE", default_value = DEFAULT_CONFIG_PATH, global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args)]
struct ClassifierArgs {
    /// Directory with one reference image per denomination
    #[arg(long, value_name = "DIR", default_value = "samples/asli")]
    templates: PathBuf,

    /// Use a trained model instead of template matching
    #[arg(long, value_name = "FILE", conflicts_with = "templates")]
    model: Option<PathBuf>,
}

impl ClassifierArgs {
    fn build(&self) -> DenominationClassifier {
        match &self.model {
            Some(model) => DenominationClassifier::from_model_file(model),
            None => DenominationClassifier::from_template_dir(&self.templates),
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Analyze a single image
    Analyze {
        #[arg(value_name = "IMAGE")]
        image_path: PathBuf,

        #[command(flatten)]
        classifier: ClassifierArgs,

        /// Save every stage image to directory (must be empty)
        #[arg(long, value_name = "DIR")]
        debug_out: Option<PathBuf>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show or change the persisted configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Train a denomination model from labeled sample directories
    Train {
        /// Directory containing one subdirectory per denomination
        #[arg(value_name = "SAMPLES")]
        samples: PathBuf,

        /// Where to write the model
        #[arg(long, value_name = "FILE")]
        out: PathBuf,

        #[arg(long, value_enum, default_value_t = Features::Histogram)]
        features: Features,

        /// Neighbours consulted per prediction
        #[arg(long, default_value_t = 3)]
        k: usize,

        /// Crop samples to the located watermark region first
        #[arg(long)]
        roi: bool,
    },

    /// Analyze frames from a capture source as they arrive
    Capture {
        /// Directory of images replayed as camera frames
        #[arg(long, value_name = "DIR")]
        frames: PathBuf,

        #[arg(long, default_value_t = 500)]
        interval_ms: u64,

        /// Stop after analyzing this many frames
        #[arg(long, default_value_t = 5)]
        count: usize,

        #[command(flatten)]
        classifier: ClassifierArgs,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the current configuration
    Show,
    /// Update one or more parameters, e.g. `gaussian_blur=7`
    Set {
        #[arg(value_name = "KEY=VALUE", required = true)]
        assignments: Vec<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Features {
    Histogram,
    Hog,
}

fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    match args.command {
        Command::Analyze {
            image_path,
            classifier,
            debug_out,
            json,
        } => {
            let store = open_config(&args.config)?;
            let mut inspector = BanknoteInspector::new(store, classifier.build());
            if let Some(debug_dir) = debug_out {
                inspector = inspector.with_debug(debug_dir)?;
            }

            let img = ImageReader::open(&image_path)
                .with_context(|| format!("Failed to open {}", image_path.display()))?
                .with_guessed_format()?
                .decode()
                .with_context(|| format!("Failed to decode {}", image_path.display()))?;
            log::debug!("Image loaded: {}x{}", img.width(), img.height());

            let inspection = inspector.inspect(&img)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&inspection_json(&inspection))?);
            } else {
                print_inspection(&inspection, inspector.classifier().name());
            }
        }

        Command::Config { action } => {
            let store = open_config(&args.config)?;
            match action {
                ConfigAction::Show => {}
                ConfigAction::Set { assignments } => {
                    let update =
                        ConfigUpdate::from_assignments(assignments.iter().map(String::as_str))?;
                    store.update(&update)?;
                }
            }
            println!("{}", serde_json::to_string_pretty(store.snapshot().as_ref())?);
        }

        Command::Train {
            samples,
            out,
            features,
            k,
            roi,
        } => {
            let kind = match features {
                Features::Histogram => FeatureKind::histogram(),
                Features::Hog => FeatureKind::Hog,
            };
            let options = TrainingOptions {
                extractor: FeatureExtractor::new(kind).with_roi_crop(roi),
                k,
            };
            let (model, report) = training::train(&samples, &options)
                .with_context(|| format!("Training on {} failed", samples.display()))?;
            println!("{report}");
            model.save(&out)?;
            println!("Model written to {}", out.display());
        }

        Command::Capture {
            frames,
            interval_ms,
            count,
            classifier,
        } => {
            let store = open_config(&args.config)?;
            let inspector = BanknoteInspector::new(store, classifier.build());
            let source = DirectoryFrameSource::open(&frames)?;
            let interval = Duration::from_millis(interval_ms);
            let capture = CaptureLoop::start(source, interval)?;

            let mut last_seen = 0;
            let mut analyzed = 0;
            while analyzed < count && capture.is_running() {
                std::thread::sleep(interval);
                let Some(frame) = capture.current_frame() else {
                    continue;
                };
                if frame.sequence == last_seen {
                    continue;
                }
                last_seen = frame.sequence;

                match inspector.inspect(&frame.image) {
                    Ok(inspection) => {
                        println!("--- frame {} ---", frame.sequence);
                        print_inspection(&inspection, inspector.classifier().name());
                    }
                    Err(e) => log::warn!("Frame {} rejected: {e}", frame.sequence),
                }
                analyzed += 1;
            }
            capture.stop();
        }
    }

    Ok(())
}

fn open_config(path: &Path) -> anyhow::Result<ConfigStore> {
    let store = ConfigStore::open(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    if let Some(path) = store.path() {
        log::debug!("Configuration file: {}", path.display());
    }
    Ok(store)
}

fn print_inspection(inspection: &Inspection, strategy: &str) {
    match &inspection.roi {
        Some(roi) => println!("Watermark region: {roi}"),
        None => println!("Watermark region: not found, using full image"),
    }
    println!("Edge pixels:      {}", inspection.analysis.edge_pixels);
    println!("Entropy:          {:.3} bits", inspection.analysis.entropy);
    println!("Verdict:          {}", inspection.analysis.verdict);
    println!(
        "Denomination:     {} (confidence {:.2}, {strategy})",
        inspection.denomination.label, inspection.denomination.confidence
    );
}

fn inspection_json(inspection: &Inspection) -> serde_json::Value {
    serde_json::json!({
        "roi": inspection.roi,
        "verdict": inspection.analysis.verdict.to_string(),
        "edge_pixels": inspection.analysis.edge_pixels,
        "entropy": inspection.analysis.entropy,
        "denomination": inspection.denomination.label.to_string(),
        "confidence": inspection.denomination.confidence,
        "config_revision": inspection.config_revision,
    })
}
