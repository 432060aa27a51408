//! Watermark authenticity scoring from an edge map.
//!
//! A genuine watermark produces a dense, structurally varied edge pattern
//! under transmitted light. Two measurements are taken from the edge map:
//! the number of edge pixels and the Shannon entropy of its intensity
//! histogram. The note is genuine only when both exceed their configured
//! thresholds.

use image::GrayImage;

use crate::config::Configuration;
use crate::models::{AnalysisResult, EdgeMap, Verdict};

/// Guards `log2` against empty bins
const ENTROPY_EPSILON: f64 = 1e-7;

pub fn count_edge_pixels(edges: &EdgeMap) -> u64 {
    edges.pixels().filter(|p| p[0] > 0).count() as u64
}

/// 256-bin intensity histogram
pub fn intensity_histogram(img: &GrayImage) -> [u64; 256] {
    let mut hist = [0u64; 256];
    for p in img.pixels() {
        hist[p[0] as usize] += 1;
    }
    hist
}

/// Shannon entropy in bits of the distribution given by `counts`.
///
/// Counts are normalized to probabilities first, so scaling all counts by a
/// positive constant leaves the result unchanged. An empty or non-finite
/// histogram has entropy 0.
pub fn entropy_from_histogram(counts: &[f64]) -> f64 {
    let total: f64 = counts.iter().sum();
    if !total.is_finite() || total <= 0.0 {
        return 0.0;
    }
    let entropy: f64 = -counts
        .iter()
        .map(|c| {
            let p = c / total;
            p * (p + ENTROPY_EPSILON).log2()
        })
        .sum::<f64>();
    // A single full bin gives a tiny negative value through the epsilon
    entropy.max(0.0)
}

pub fn edge_entropy(edges: &EdgeMap) -> f64 {
    let hist = intensity_histogram(edges);
    let counts: Vec<f64> = hist.iter().map(|&c| c as f64).collect();
    entropy_from_histogram(&counts)
}

/// Conjunctive rule: both measurements must strictly exceed their thresholds
pub fn classify(edge_pixels: u64, entropy: f64, config: &Configuration) -> Verdict {
    if edge_pixels > config.watermark_threshold && entropy > config.entropy_threshold {
        Verdict::Genuine
    } else {
        Verdict::Counterfeit
    }
}

pub fn score(edges: &EdgeMap, config: &Configuration) -> AnalysisResult {
    let edge_pixels = count_edge_pixels(edges);
    let entropy = edge_entropy(edges);
    let verdict = classify(edge_pixels, entropy, config);

    log::debug!(
        "Authenticity: edge_pixels={} (threshold {}), entropy={:.3} (threshold {}) -> {}",
        edge_pixels,
        config.watermark_threshold,
        entropy,
        config.entropy_threshold,
        verdict
    );

    AnalysisResult {
        verdict,
        edge_pixels,
        entropy,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn test_all_zero_edge_map_is_counterfeit() {
        let edges = GrayImage::new(100, 100);
        let result = score(&edges, &Configuration::default());
        assert_eq!(result.verdict, Verdict::Counterfeit);
        assert_eq!(result.edge_pixels, 0);
        assert!(result.entropy.is_finite());
        assert!(result.entropy >= 0.0);
        assert!(result.entropy < 1e-6);
    }

    #[test]
    fn test_empty_histogram_entropy() {
        assert_eq!(entropy_from_histogram(&[0.0; 256]), 0.0);
        assert_eq!(entropy_from_histogram(&[]), 0.0);
        assert_eq!(entropy_from_histogram(&[f64::NAN, 1.0]), 0.0);
    }

    #[test]
    fn test_entropy_of_uniform_distribution() {
        let counts = [10.0; 16];
        let entropy = entropy_from_histogram(&counts);
        assert!((entropy - 4.0).abs() < 1e-4);
    }

    #[test]
    fn test_entropy_invariant_under_scaling() {
        let counts: Vec<f64> = (0..256).map(|i| ((i * 37) % 11) as f64).collect();
        let base = entropy_from_histogram(&counts);
        for factor in [0.5, 3.0, 1000.0] {
            let scaled: Vec<f64> = counts.iter().map(|c| c * factor).collect();
            assert!((entropy_from_histogram(&scaled) - base).abs() < 1e-9);
        }
    }

    #[test]
    fn test_half_edges_gives_one_bit() {
        let edges = GrayImage::from_fn(20, 20, |x, _| if x % 2 == 0 { Luma([255]) } else { Luma([0]) });
        assert_eq!(count_edge_pixels(&edges), 200);
        assert!((edge_entropy(&edges) - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_verdict_requires_both_conditions() {
        let config = Configuration::default();
        // 1500 of 10000 pixels on edges, 3.5 bits of entropy
        assert_eq!(classify(1500, 3.5, &config), Verdict::Genuine);

        let strict_count = Configuration {
            watermark_threshold: 2000,
            ..Configuration::default()
        };
        assert_eq!(classify(1500, 3.5, &strict_count), Verdict::Counterfeit);

        assert_eq!(classify(1500, 2.9, &config), Verdict::Counterfeit);
        // Thresholds are exclusive
        assert_eq!(classify(1000, 3.5, &config), Verdict::Counterfeit);
        assert_eq!(classify(1500, 3.0, &config), Verdict::Counterfeit);
    }

    #[test]
    fn test_thresholds_are_configurable() {
        let edges = GrayImage::from_fn(20, 20, |x, _| if x % 2 == 0 { Luma([255]) } else { Luma([0]) });
        let lenient = Configuration {
            watermark_threshold: 100,
            entropy_threshold: 0.5,
            ..Configuration::default()
        };
        assert_eq!(score(&edges, &lenient).verdict, Verdict::Genuine);
        assert_eq!(score(&edges, &Configuration::default()).verdict, Verdict::Counterfeit);
    }
}
