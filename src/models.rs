use std::fmt;
use std::str::FromStr;

use image::GrayImage;
use serde::{Deserialize, Serialize};

/// Binary edge map: 255 on edges, 0 elsewhere, same size as its source
pub type EdgeMap = GrayImage;

/// Axis-aligned box in pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Exclusive right edge
    pub fn right(&self) -> u64 {
        self.x as u64 + self.width as u64
    }

    /// Exclusive bottom edge
    pub fn bottom(&self) -> u64 {
        self.y as u64 + self.height as u64
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// True when the box is non-empty and lies entirely inside a `width` x `height` image
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        self.width > 0
            && self.height > 0
            && self.right() <= width as u64
            && self.bottom() <= height as u64
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}+{}+{}", self.width, self.height, self.x, self.y)
    }
}

/// Summary of one outer contour found in a foreground mask
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub min_x: u32,
    pub min_y: u32,
    pub max_x: u32,
    pub max_y: u32,
    /// Polygon area enclosed by the contour points
    pub area: f64,
}

impl Region {
    pub fn width(&self) -> u32 {
        self.max_x - self.min_x + 1
    }

    pub fn height(&self) -> u32 {
        self.max_y - self.min_y + 1
    }

    pub fn bounding_box(&self) -> BoundingBox {
        BoundingBox::new(self.min_x, self.min_y, self.width(), self.height())
    }
}

/// Authenticity verdict from the watermark edge analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Genuine,
    Counterfeit,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Genuine => write!(f, "genuine"),
            Verdict::Counterfeit => write!(f, "counterfeit"),
        }
    }
}

/// Outcome of scoring one edge map
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub verdict: Verdict,
    /// Number of non-zero pixels in the edge map
    pub edge_pixels: u64,
    /// Shannon entropy of the edge-map intensity histogram, in bits
    pub entropy: f64,
}

/// Known banknote denominations (Indonesian rupiah)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Denomination {
    Rp10000,
    Rp20000,
    Rp50000,
    Rp100000,
}

impl Denomination {
    pub const ALL: [Denomination; 4] = [
        Denomination::Rp10000,
        Denomination::Rp20000,
        Denomination::Rp50000,
        Denomination::Rp100000,
    ];

    /// Face value as printed on the note, also used as the file stem of its template
    pub fn label(&self) -> &'static str {
        match self {
            Denomination::Rp10000 => "10000",
            Denomination::Rp20000 => "20000",
            Denomination::Rp50000 => "50000",
            Denomination::Rp100000 => "100000",
        }
    }
}

impl fmt::Display for Denomination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Denomination {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Denomination::ALL
            .into_iter()
            .find(|d| d.label() == s.trim())
            .ok_or_else(|| format!("unknown denomination: {s}"))
    }
}

impl TryFrom<String> for Denomination {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Denomination> for String {
    fn from(value: Denomination) -> Self {
        value.label().to_string()
    }
}

/// Label half of a denomination estimate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DenominationLabel {
    Known(Denomination),
    /// No reference or class matched the image
    Unrecognized,
    /// The learned classifier has no usable model loaded
    ModelUnavailable,
}

impl fmt::Display for DenominationLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenominationLabel::Known(d) => write!(f, "{d}"),
            DenominationLabel::Unrecognized => write!(f, "unrecognized"),
            DenominationLabel::ModelUnavailable => write!(f, "model unavailable"),
        }
    }
}

/// Denomination guess with a confidence in `[0, 1]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DenominationEstimate {
    pub label: DenominationLabel,
    pub confidence: f32,
}

impl DenominationEstimate {
    /// Known denomination; the raw score is clamped into `[0, 1]`
    pub fn known(denomination: Denomination, score: f32) -> Self {
        let confidence = if score.is_finite() {
            score.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            label: DenominationLabel::Known(denomination),
            confidence,
        }
    }

    pub fn unrecognized() -> Self {
        Self {
            label: DenominationLabel::Unrecognized,
            confidence: 0.0,
        }
    }

    pub fn model_unavailable() -> Self {
        Self {
            label: DenominationLabel::ModelUnavailable,
            confidence: 0.0,
        }
    }

    pub fn denomination(&self) -> Option<Denomination> {
        match self.label {
            DenominationLabel::Known(d) => Some(d),
            _ => None,
        }
    }
}
