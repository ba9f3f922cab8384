//! ID-card generation classifier
//!
//! Scores the top band of the card against an ordered list of colour
//! rules. Current cards carry a pink/red band, older ones a green/yellow
//! band.

use image::RgbImage;
use serde::Serialize;
use tracing::debug;

use crate::document::DocumentType;

/// Fraction of the image height analysed
pub const BAND_FRACTION: f32 = 0.20;

/// Colour statistics of the top band
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BandStatistics {
    pub mean_r: f32,
    pub mean_g: f32,
    pub mean_b: f32,
    /// Mean hue on the 0-180 scale
    pub mean_hue: f32,
    /// Mean saturation on the 0-255 scale
    pub mean_saturation: f32,
}

/// One weighted vote for a card generation
pub struct ClassificationRule {
    pub name: &'static str,
    pub weight: u32,
    pub target: DocumentType,
    pub predicate: fn(&BandStatistics) -> bool,
}

/// Mean colour inside an inclusive (B, G, R) box
fn bgr_in_range(s: &BandStatistics, min: [f32; 3], max: [f32; 3]) -> bool {
    let bgr = [s.mean_b.trunc(), s.mean_g.trunc(), s.mean_r.trunc()];
    (0..3).all(|i| min[i] <= bgr[i] && bgr[i] <= max[i])
}

fn is_yellow_green(s: &BandStatistics) -> bool {
    (20.0..=60.0).contains(&s.mean_hue) && s.mean_saturation < 60.0
}

/// Evaluated in order; every rule whose predicate holds adds its weight
pub const RULES: &[ClassificationRule] = &[
    ClassificationRule {
        name: "color_range_old",
        weight: 3,
        target: DocumentType::CinOld,
        predicate: |s| bgr_in_range(s, [100.0, 150.0, 100.0], [200.0, 255.0, 200.0]),
    },
    ClassificationRule {
        name: "color_range_new",
        weight: 3,
        target: DocumentType::CinNew,
        predicate: |s| bgr_in_range(s, [140.0, 140.0, 180.0], [240.0, 200.0, 255.0]),
    },
    ClassificationRule {
        name: "hue_yellow_green",
        weight: 4,
        target: DocumentType::CinOld,
        predicate: is_yellow_green,
    },
    ClassificationRule {
        name: "hue_pink_red",
        weight: 4,
        target: DocumentType::CinNew,
        predicate: |s| !is_yellow_green(s) && (s.mean_hue >= 140.0 || s.mean_hue <= 10.0),
    },
    ClassificationRule {
        name: "red_dominant",
        weight: 5,
        target: DocumentType::CinNew,
        predicate: |s| s.mean_r.trunc() > s.mean_g.trunc() && s.mean_r.trunc() > s.mean_b.trunc(),
    },
    ClassificationRule {
        name: "green_dominant",
        weight: 5,
        target: DocumentType::CinOld,
        predicate: |s| s.mean_g.trunc() >= s.mean_r.trunc(),
    },
    ClassificationRule {
        name: "high_saturation",
        weight: 2,
        target: DocumentType::CinNew,
        predicate: |s| s.mean_saturation > 100.0,
    },
    ClassificationRule {
        name: "low_saturation",
        weight: 2,
        target: DocumentType::CinOld,
        predicate: |s| s.mean_saturation < 80.0,
    },
];

/// Classifier decision with the evidence behind it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationOutcome {
    pub variant: DocumentType,
    pub score_new: u32,
    pub score_old: u32,
    /// Names of the rules that fired, in evaluation order
    pub fired: Vec<&'static str>,
    pub statistics: BandStatistics,
}

/// Mean RGB, hue and saturation of the top band
pub fn band_statistics(image: &RgbImage) -> BandStatistics {
    let (width, height) = image.dimensions();
    let band_height = ((height as f32 * BAND_FRACTION) as u32).clamp(1.min(height), height);

    let mut sums = [0.0f64; 5];
    let mut count = 0u64;
    for y in 0..band_height {
        for x in 0..width {
            let p = image.get_pixel(x, y);
            let (hue, saturation) = hue_saturation(p[0], p[1], p[2]);
            sums[0] += p[0] as f64;
            sums[1] += p[1] as f64;
            sums[2] += p[2] as f64;
            sums[3] += hue as f64;
            sums[4] += saturation as f64;
            count += 1;
        }
    }

    let mean = |i: usize| if count == 0 { 0.0 } else { (sums[i] / count as f64) as f32 };
    BandStatistics {
        mean_r: mean(0),
        mean_g: mean(1),
        mean_b: mean(2),
        mean_hue: mean(3),
        mean_saturation: mean(4),
    }
}

/// Hue (0-180) and saturation (0-255) of one pixel, 8-bit HSV convention
fn hue_saturation(r: u8, g: u8, b: u8) -> (f32, f32) {
    let (r, g, b) = (r as f32, g as f32, b as f32);
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let saturation = if max > 0.0 { 255.0 * delta / max } else { 0.0 };
    if delta == 0.0 {
        return (0.0, saturation);
    }

    let mut degrees = if max == r {
        60.0 * (g - b) / delta
    } else if max == g {
        60.0 * (b - r) / delta + 120.0
    } else {
        60.0 * (r - g) / delta + 240.0
    };
    if degrees < 0.0 {
        degrees += 360.0;
    }

    (degrees / 2.0, saturation)
}

/// Apply [`RULES`] to precomputed statistics. Equal scores resolve to `cin_new`.
pub fn classify_statistics(statistics: BandStatistics) -> ClassificationOutcome {
    let mut score_new = 0;
    let mut score_old = 0;
    let mut fired = Vec::new();

    for rule in RULES {
        if (rule.predicate)(&statistics) {
            match rule.target {
                DocumentType::CinNew => score_new += rule.weight,
                _ => score_old += rule.weight,
            }
            fired.push(rule.name);
        }
    }

    let variant = if score_old > score_new {
        DocumentType::CinOld
    } else {
        DocumentType::CinNew
    };

    debug!(
        "Classified {} (new={}, old={}, rules={:?}, stats={:?})",
        variant, score_new, score_old, fired, statistics
    );

    ClassificationOutcome {
        variant,
        score_new,
        score_old,
        fired,
        statistics,
    }
}

/// Decide which ID-card generation an image shows
pub fn classify(image: &RgbImage) -> ClassificationOutcome {
    classify_statistics(band_statistics(image))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    /// Card with a coloured top band and a white body
    fn card(band: [u8; 3]) -> RgbImage {
        RgbImage::from_fn(200, 120, |_, y| if y < 24 { Rgb(band) } else { Rgb([255, 255, 255]) })
    }

    #[test]
    fn test_red_band_is_new() {
        let outcome = classify(&card([200, 80, 90]));
        assert_eq!(outcome.variant, DocumentType::CinNew);
        assert!(outcome.fired.contains(&"red_dominant"));
        assert!(outcome.score_new > outcome.score_old);
    }

    #[test]
    fn test_green_band_is_old() {
        let outcome = classify(&card([150, 200, 120]));
        assert_eq!(outcome.variant, DocumentType::CinOld);
        assert!(outcome.fired.contains(&"green_dominant"));
        assert!(outcome.fired.contains(&"color_range_old"));
    }

    #[test]
    fn test_only_band_is_analysed() {
        // Body colour must not influence the decision
        let image = RgbImage::from_fn(200, 120, |_, y| {
            if y < 24 { Rgb([200, 80, 90]) } else { Rgb([20, 220, 20]) }
        });
        assert_eq!(classify(&image).variant, DocumentType::CinNew);
    }

    #[test]
    fn test_classifier_is_deterministic() {
        let image = card([170, 160, 150]);
        let first = classify(&image);
        for _ in 0..5 {
            assert_eq!(classify(&image), first);
        }
    }

    #[test]
    fn test_tie_resolves_to_new() {
        // old: green_dominant 5 + low_saturation 2
        // new: color_range_new 3 + hue_pink_red 4
        let statistics = BandStatistics {
            mean_r: 180.0,
            mean_g: 190.0,
            mean_b: 210.0,
            mean_hue: 150.0,
            mean_saturation: 70.0,
        };
        let outcome = classify_statistics(statistics);
        assert_eq!((outcome.score_new, outcome.score_old), (7, 7));
        assert_eq!(outcome.variant, DocumentType::CinNew);
    }

    #[test]
    fn test_exclusive_rules() {
        // Hue rules are exclusive
        let statistics = BandStatistics {
            mean_r: 100.0,
            mean_g: 100.0,
            mean_b: 100.0,
            mean_hue: 40.0,
            mean_saturation: 50.0,
        };
        let outcome = classify_statistics(statistics);
        assert!(outcome.fired.contains(&"hue_yellow_green"));
        assert!(!outcome.fired.contains(&"hue_pink_red"));
        assert!(!outcome.fired.contains(&"red_dominant"));
    }
}
