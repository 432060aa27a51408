//! Tunable parameters for the inspection pipeline and their persisted store.
//!
//! The configuration file is a flat JSON object with one numeric value per
//! parameter. A missing file yields the defaults, a missing key yields that
//! key's default:
//!
//! ```json
//! {
//!   "canny_threshold1": 50.0,
//!   "canny_threshold2": 150.0,
//!   "gaussian_blur": 5,
//!   "histogram_clip_limit": 2.0,
//!   "histogram_tile_size": 8,
//!   "watermark_threshold": 1000,
//!   "entropy_threshold": 3.0
//! }
//! ```
//!
//! Stages never hold on to a [`ConfigStore`]; they receive a whole
//! [`Configuration`] snapshot at the start of each call, so an update is
//! never observed half-applied.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const DEFAULT_CONFIG_PATH: &str = "config.json";

/// Largest accepted `gaussian_blur` kernel size
pub const MAX_BLUR_KERNEL: u32 = 31;

/// Every parameter name accepted in the file and in updates
pub const CONFIG_KEYS: [&str; 7] = [
    "canny_threshold1",
    "canny_threshold2",
    "gaussian_blur",
    "histogram_clip_limit",
    "histogram_tile_size",
    "watermark_threshold",
    "entropy_threshold",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    /// Canny low hysteresis threshold
    pub canny_threshold1: f32,

    /// Canny high hysteresis threshold
    pub canny_threshold2: f32,

    /// Gaussian blur kernel size (odd, 1 to 31)
    pub gaussian_blur: u32,

    /// CLAHE clip limit, relative to a uniform histogram; 0 disables clipping
    pub histogram_clip_limit: f32,

    /// CLAHE grid size: the image is split into tile_size x tile_size tiles
    pub histogram_tile_size: u32,

    /// Minimum edge pixel count for a genuine verdict (exclusive)
    pub watermark_threshold: u64,

    /// Minimum edge-map entropy in bits for a genuine verdict (exclusive)
    pub entropy_threshold: f64,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            canny_threshold1: 50.0,
            canny_threshold2: 150.0,
            gaussian_blur: 5,
            histogram_clip_limit: 2.0,
            histogram_tile_size: 8,
            watermark_threshold: 1000,
            entropy_threshold: 3.0,
        }
    }
}

fn check_non_negative(parameter: &'static str, value: f64) -> Result<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(Error::invalid_config(
            parameter,
            value,
            "must be a finite non-negative number",
        ));
    }
    Ok(())
}

/// `gaussian_blur` must be odd and within 1..=MAX_BLUR_KERNEL
pub(crate) fn check_blur_kernel(ksize: u32) -> Result<()> {
    if ksize % 2 == 0 {
        return Err(Error::invalid_config(
            "gaussian_blur",
            ksize,
            "kernel size must be odd and at least 1",
        ));
    }
    if ksize > MAX_BLUR_KERNEL {
        return Err(Error::invalid_config(
            "gaussian_blur",
            ksize,
            "kernel size must not exceed 31",
        ));
    }
    Ok(())
}

impl Configuration {
    pub fn validate(&self) -> Result<()> {
        check_non_negative("canny_threshold1", self.canny_threshold1 as f64)?;
        check_non_negative("canny_threshold2", self.canny_threshold2 as f64)?;
        check_non_negative("histogram_clip_limit", self.histogram_clip_limit as f64)?;
        check_non_negative("entropy_threshold", self.entropy_threshold)?;

        check_blur_kernel(self.gaussian_blur)?;
        if self.histogram_tile_size == 0 {
            return Err(Error::invalid_config(
                "histogram_tile_size",
                self.histogram_tile_size,
                "must be greater than zero",
            ));
        }
        Ok(())
    }

    /// Read a configuration file. A missing file yields the defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("No configuration at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };
        let config: Self = serde_json::from_str(&content).map_err(|source| Error::ConfigParse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the full configuration, replacing the file in one rename
    pub fn to_json_file(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let staging = path.with_extension("json.tmp");
        fs::write(&staging, json)?;
        fs::rename(&staging, path)?;
        Ok(())
    }
}

/// Partial configuration; unset fields keep their current value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigUpdate {
    pub canny_threshold1: Option<f32>,
    pub canny_threshold2: Option<f32>,
    pub gaussian_blur: Option<u32>,
    pub histogram_clip_limit: Option<f32>,
    pub histogram_tile_size: Option<u32>,
    pub watermark_threshold: Option<u64>,
    pub entropy_threshold: Option<f64>,
}

fn parse_value<T: std::str::FromStr>(parameter: &'static str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| Error::invalid_config(parameter, raw, "not a valid number for this parameter"))
}

impl ConfigUpdate {
    /// Update that rewrites every parameter
    pub fn full(config: &Configuration) -> Self {
        Self {
            canny_threshold1: Some(config.canny_threshold1),
            canny_threshold2: Some(config.canny_threshold2),
            gaussian_blur: Some(config.gaussian_blur),
            histogram_clip_limit: Some(config.histogram_clip_limit),
            histogram_tile_size: Some(config.histogram_tile_size),
            watermark_threshold: Some(config.watermark_threshold),
            entropy_threshold: Some(config.entropy_threshold),
        }
    }

    /// Set one parameter from its textual form
    pub fn set(&mut self, key: &str, raw: &str) -> Result<()> {
        match key.trim() {
            "canny_threshold1" => self.canny_threshold1 = Some(parse_value("canny_threshold1", raw)?),
            "canny_threshold2" => self.canny_threshold2 = Some(parse_value("canny_threshold2", raw)?),
            "gaussian_blur" => self.gaussian_blur = Some(parse_value("gaussian_blur", raw)?),
            "histogram_clip_limit" => {
                self.histogram_clip_limit = Some(parse_value("histogram_clip_limit", raw)?)
            }
            "histogram_tile_size" => {
                self.histogram_tile_size = Some(parse_value("histogram_tile_size", raw)?)
            }
            "watermark_threshold" => {
                self.watermark_threshold = Some(parse_value("watermark_threshold", raw)?)
            }
            "entropy_threshold" => self.entropy_threshold = Some(parse_value("entropy_threshold", raw)?),
            other => return Err(Error::UnknownConfigKey(other.to_string())),
        }
        Ok(())
    }

    /// Build an update from `key=value` assignments
    pub fn from_assignments<'a>(assignments: impl IntoIterator<Item = &'a str>) -> Result<Self> {
        let mut update = Self::default();
        for assignment in assignments {
            let (key, value) = assignment
                .split_once('=')
                .ok_or_else(|| Error::UnknownConfigKey(assignment.to_string()))?;
            update.set(key, value)?;
        }
        Ok(update)
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Merge onto `base` without validating the result
    pub fn apply(&self, base: &Configuration) -> Configuration {
        Configuration {
            canny_threshold1: self.canny_threshold1.unwrap_or(base.canny_threshold1),
            canny_threshold2: self.canny_threshold2.unwrap_or(base.canny_threshold2),
            gaussian_blur: self.gaussian_blur.unwrap_or(base.gaussian_blur),
            histogram_clip_limit: self.histogram_clip_limit.unwrap_or(base.histogram_clip_limit),
            histogram_tile_size: self.histogram_tile_size.unwrap_or(base.histogram_tile_size),
            watermark_threshold: self.watermark_threshold.unwrap_or(base.watermark_threshold),
            entropy_threshold: self.entropy_threshold.unwrap_or(base.entropy_threshold),
        }
    }
}

#[derive(Debug)]
struct StoreState {
    revision: u64,
    config: Arc<Configuration>,
}

/// Owner of the current configuration and, optionally, its backing file
#[derive(Debug)]
pub struct ConfigStore {
    path: Option<PathBuf>,
    state: RwLock<StoreState>,
}

impl ConfigStore {
    /// Load from `path`, falling back to defaults when the file is absent
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let config = Configuration::from_json_file(&path)?;
        log::debug!("Loaded configuration from {}: {:?}", path.display(), config);
        Ok(Self {
            path: Some(path),
            state: RwLock::new(StoreState {
                revision: 0,
                config: Arc::new(config),
            }),
        })
    }

    /// Store without persistence; updates only change the in-memory snapshot
    pub fn in_memory(config: Configuration) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            path: None,
            state: RwLock::new(StoreState {
                revision: 0,
                config: Arc::new(config),
            }),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// The whole current configuration
    pub fn snapshot(&self) -> Arc<Configuration> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&state.config)
    }

    /// Incremented on every accepted update
    pub fn revision(&self) -> u64 {
        self.state.read().unwrap_or_else(PoisonError::into_inner).revision
    }

    /// Snapshot and the revision it belongs to, read under one lock
    pub fn versioned_snapshot(&self) -> (u64, Arc<Configuration>) {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        (state.revision, Arc::clone(&state.config))
    }

    /// Merge, validate and persist `update`, then publish the new snapshot.
    ///
    /// A rejected update leaves the file and the current snapshot untouched.
    /// An empty update changes nothing, not even the revision.
    pub fn update(&self, update: &ConfigUpdate) -> Result<Arc<Configuration>> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if update.is_empty() {
            return Ok(Arc::clone(&state.config));
        }
        let next = update.apply(&state.config);
        next.validate()?;

        if let Some(path) = &self.path {
            next.to_json_file(path)?;
            log::info!("Configuration saved to {}", path.display());
        }

        state.config = Arc::new(next);
        state.revision += 1;
        Ok(Arc::clone(&state.config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Configuration::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.gaussian_blur, 5);
        assert_eq!(config.watermark_threshold, 1000);
        assert_eq!(config.entropy_threshold, 3.0);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let even_blur = Configuration {
            gaussian_blur: 4,
            ..Configuration::default()
        };
        assert!(matches!(
            even_blur.validate(),
            Err(Error::InvalidConfig { parameter: "gaussian_blur", .. })
        ));

        let zero_blur = Configuration {
            gaussian_blur: 0,
            ..Configuration::default()
        };
        assert!(zero_blur.validate().is_err());

        let huge_blur = Configuration {
            gaussian_blur: u32::MAX,
            ..Configuration::default()
        };
        assert!(matches!(
            huge_blur.validate(),
            Err(Error::InvalidConfig { parameter: "gaussian_blur", .. })
        ));
        let widest = Configuration {
            gaussian_blur: MAX_BLUR_KERNEL,
            ..Configuration::default()
        };
        assert!(widest.validate().is_ok());

        let zero_tiles = Configuration {
            histogram_tile_size: 0,
            ..Configuration::default()
        };
        assert!(zero_tiles.validate().is_err());

        let negative_entropy = Configuration {
            entropy_threshold: -0.5,
            ..Configuration::default()
        };
        assert!(negative_entropy.validate().is_err());

        let nan_canny = Configuration {
            canny_threshold1: f32::NAN,
            ..Configuration::default()
        };
        assert!(nan_canny.validate().is_err());
    }

    #[test]
    fn test_missing_keys_take_defaults() {
        let config: Configuration =
            serde_json::from_str(r#"{ "gaussian_blur": 7, "entropy_threshold": 2.5 }"#).unwrap();
        assert_eq!(config.gaussian_blur, 7);
        assert_eq!(config.entropy_threshold, 2.5);
        assert_eq!(config.canny_threshold1, 50.0);
        assert_eq!(config.histogram_tile_size, 8);
    }

    #[test]
    fn test_update_from_assignments() {
        let update =
            ConfigUpdate::from_assignments(["gaussian_blur=9", "entropy_threshold = 2.0"]).unwrap();
        let merged = update.apply(&Configuration::default());
        assert_eq!(merged.gaussian_blur, 9);
        assert_eq!(merged.entropy_threshold, 2.0);
        assert_eq!(merged.canny_threshold2, 150.0);

        assert!(matches!(
            ConfigUpdate::from_assignments(["sharpness=3"]),
            Err(Error::UnknownConfigKey(_))
        ));
        assert!(ConfigUpdate::from_assignments(["gaussian_blur=-3"]).is_err());
    }

    #[test]
    fn test_rejected_update_keeps_snapshot() {
        let store = ConfigStore::in_memory(Configuration::default()).unwrap();
        let before = store.snapshot();

        let update = ConfigUpdate {
            gaussian_blur: Some(6),
            ..ConfigUpdate::default()
        };
        assert!(store.update(&update).is_err());
        assert_eq!(*store.snapshot(), *before);
        assert_eq!(store.revision(), 0);

        let update = ConfigUpdate {
            gaussian_blur: Some(3),
            ..ConfigUpdate::default()
        };
        let after = store.update(&update).unwrap();
        assert_eq!(after.gaussian_blur, 3);
        assert_eq!(store.revision(), 1);
        // Earlier snapshots are unaffected by the update
        assert_eq!(before.gaussian_blur, 5);
    }

    #[test]
    fn test_empty_update_is_a_no_op() {
        let store = ConfigStore::in_memory(Configuration::default()).unwrap();
        assert!(store.path().is_none());

        let empty = ConfigUpdate::default();
        assert!(empty.is_empty());
        assert!(!ConfigUpdate::full(&Configuration::default()).is_empty());

        let current = store.update(&empty).unwrap();
        assert_eq!(*current, Configuration::default());
        assert_eq!(store.revision(), 0);
    }
}
