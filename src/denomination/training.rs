//! Offline training of the k-NN denomination model.
//!
//! Samples are laid out one directory per denomination:
//!
//! ```text
//! samples/
//!   10000/  a.jpg b.jpg ...
//!   20000/  ...
//! ```
//!
//! Every fifth sample of each class (in file-name order) is held out for
//! validation, the rest are fitted.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use image::ImageReader;

use crate::denomination::features::FeatureExtractor;
use crate::denomination::knn::{KnnModel, LabeledSample};
use crate::error::{Error, Result};
use crate::models::Denomination;

const SAMPLE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

/// One sample in every `VALIDATION_EVERY` goes to the validation split
const VALIDATION_EVERY: usize = 5;

#[derive(Debug, Clone, Copy)]
pub struct TrainingOptions {
    pub extractor: FeatureExtractor,
    pub k: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabeledImage {
    pub path: PathBuf,
    pub denomination: Denomination,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassReport {
    pub denomination: Denomination,
    pub train: usize,
    pub validation: usize,
    pub correct: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingReport {
    pub classes: Vec<ClassReport>,
    /// Images that could not be read and were left out
    pub skipped: usize,
    /// None when the validation split is empty
    pub accuracy: Option<f64>,
}

impl TrainingReport {
    pub fn train_count(&self) -> usize {
        self.classes.iter().map(|c| c.train).sum()
    }

    pub fn validation_count(&self) -> usize {
        self.classes.iter().map(|c| c.validation).sum()
    }
}

impl fmt::Display for TrainingReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:>10} {:>6} {:>6} {:>8}", "class", "train", "valid", "correct")?;
        for c in &self.classes {
            writeln!(
                f,
                "{:>10} {:>6} {:>6} {:>8}",
                c.denomination.label(),
                c.train,
                c.validation,
                c.correct
            )?;
        }
        if self.skipped > 0 {
            writeln!(f, "skipped {} unreadable images", self.skipped)?;
        }
        match self.accuracy {
            Some(acc) => write!(f, "validation accuracy: {:.1}%", acc * 100.0),
            None => write!(f, "validation accuracy: n/a (no held-out samples)"),
        }
    }
}

fn has_sample_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| SAMPLE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// List labeled images under `dir`; directories that are not a known
/// denomination are skipped
pub fn discover_samples(dir: &Path) -> Result<Vec<LabeledImage>> {
    let mut samples = Vec::new();
    for entry in fs::read_dir(dir)? {
        let class_dir = entry?.path();
        if !class_dir.is_dir() {
            continue;
        }
        let Some(name) = class_dir.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let denomination: Denomination = match name.parse() {
            Ok(d) => d,
            Err(_) => {
                log::warn!("Skipping {}: not a known denomination", class_dir.display());
                continue;
            }
        };

        let mut paths: Vec<PathBuf> = fs::read_dir(&class_dir)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && has_sample_extension(p))
            .collect();
        paths.sort();
        samples.extend(paths.into_iter().map(|path| LabeledImage { path, denomination }));
    }
    samples.sort_by(|a, b| (a.denomination, &a.path).cmp(&(b.denomination, &b.path)));
    Ok(samples)
}

/// Deterministic per-class split into (train, validation)
pub fn split_samples(samples: &[LabeledImage]) -> (Vec<LabeledImage>, Vec<LabeledImage>) {
    let mut train = Vec::new();
    let mut validation = Vec::new();
    for denomination in Denomination::ALL {
        let class: Vec<&LabeledImage> = samples
            .iter()
            .filter(|s| s.denomination == denomination)
            .collect();
        for (i, sample) in class.into_iter().enumerate() {
            if i % VALIDATION_EVERY == VALIDATION_EVERY - 1 {
                validation.push(sample.clone());
            } else {
                train.push(sample.clone());
            }
        }
    }
    (train, validation)
}

/// Extract features, skipping images that cannot be decoded
fn extract_all(
    images: &[LabeledImage],
    extractor: &FeatureExtractor,
    skipped: &mut usize,
) -> Vec<LabeledSample> {
    let mut out = Vec::with_capacity(images.len());
    for labeled in images {
        let features = ImageReader::open(&labeled.path)
            .map_err(Error::from)
            .and_then(|r| r.with_guessed_format().map_err(Error::from))
            .and_then(|r| {
                r.decode().map_err(|source| Error::ImageLoad {
                    path: labeled.path.clone(),
                    source,
                })
            })
            .and_then(|img| extractor.extract(&img));
        match features {
            Ok(features) => out.push(LabeledSample {
                denomination: labeled.denomination,
                features,
            }),
            Err(e) => {
                log::warn!("Skipping {}: {e}", labeled.path.display());
                *skipped += 1;
            }
        }
    }
    out
}

/// Fit a model on the samples under `dir` and evaluate it on the held-out split
pub fn train(dir: &Path, options: &TrainingOptions) -> Result<(KnnModel, TrainingReport)> {
    let samples = discover_samples(dir)?;
    if samples.is_empty() {
        return Err(Error::Training(format!(
            "no labeled images found under {}",
            dir.display()
        )));
    }
    let (train_images, validation_images) = split_samples(&samples);
    log::info!(
        "Training on {} images, validating on {}",
        train_images.len(),
        validation_images.len()
    );

    let mut skipped = 0;
    let train_set = extract_all(&train_images, &options.extractor, &mut skipped);
    let validation_set = extract_all(&validation_images, &options.extractor, &mut skipped);

    let mut model = KnnModel::fit(options.extractor, options.k, train_set.clone())?;

    let mut classes: Vec<ClassReport> = Denomination::ALL
        .iter()
        .map(|&denomination| ClassReport {
            denomination,
            train: train_set.iter().filter(|s| s.denomination == denomination).count(),
            validation: 0,
            correct: 0,
        })
        .collect();

    for sample in &validation_set {
        let predicted = model.predict(&sample.features).map(|(d, _)| d);
        if let Some(class) = classes.iter_mut().find(|c| c.denomination == sample.denomination) {
            class.validation += 1;
            if predicted == Some(sample.denomination) {
                class.correct += 1;
            }
        }
    }
    classes.retain(|c| c.train > 0 || c.validation > 0);

    let validated: usize = classes.iter().map(|c| c.validation).sum();
    let correct: usize = classes.iter().map(|c| c.correct).sum();
    let accuracy = (validated > 0).then(|| correct as f64 / validated as f64);
    model.validation_accuracy = accuracy;

    Ok((
        model,
        TrainingReport {
            classes,
            skipped,
            accuracy,
        },
    ))
}
