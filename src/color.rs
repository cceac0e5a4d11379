//! Perceptual color conversions and distances.
//!
//! Everything in this module is pure and deterministic. The pipeline works
//! in CIE Lab under the D65 reference white with `f64` components so that
//! centroid means and hex rounding are stable across reruns.

use palette::color_difference::{Ciede2000, DeltaE};
use palette::{white_point::D65, FromColor, Lab, Srgb};

/// Lab color as used throughout the pipeline.
pub type LabColor = Lab<D65, f64>;

/// Convert an 8-bit sRGB triplet to Lab. Alpha never enters color math.
pub fn srgb_to_lab(rgb: [u8; 3]) -> LabColor {
    let srgb = Srgb::new(
        rgb[0] as f64 / 255.0,
        rgb[1] as f64 / 255.0,
        rgb[2] as f64 / 255.0,
    );
    Lab::from_color(srgb)
}

/// Convert Lab back to an 8-bit sRGB triplet, clamping out-of-gamut values.
pub fn lab_to_srgb(lab: LabColor) -> [u8; 3] {
    let srgb = Srgb::from_color(lab);
    [
        (srgb.red.clamp(0.0, 1.0) * 255.0).round() as u8,
        (srgb.green.clamp(0.0, 1.0) * 255.0).round() as u8,
        (srgb.blue.clamp(0.0, 1.0) * 255.0).round() as u8,
    ]
}

/// CIE76 Delta-E: Euclidean distance in Lab.
pub fn delta_e_76(a: LabColor, b: LabColor) -> f64 {
    a.delta_e(b)
}

/// CIEDE2000 Delta-E, used for catalog matching when quality is requested.
pub fn delta_e_00(a: LabColor, b: LabColor) -> f64 {
    a.difference(b)
}

/// Parse a `#RRGGBB` hex string to an RGB triplet.
pub fn hex_to_rgb(hex: &str) -> Option<[u8; 3]> {
    let trimmed = hex.trim_start_matches('#');
    if trimmed.len() != 6 {
        return None;
    }
    let r = u8::from_str_radix(&trimmed[0..2], 16).ok()?;
    let g = u8::from_str_radix(&trimmed[2..4], 16).ok()?;
    let b = u8::from_str_radix(&trimmed[4..6], 16).ok()?;
    Some([r, g, b])
}

/// Format an RGB triplet as `#RRGGBB`.
pub fn rgb_to_hex(rgb: [u8; 3]) -> String {
    format!("#{:02X}{:02X}{:02X}", rgb[0], rgb[1], rgb[2])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_conversion() {
        assert_eq!(hex_to_rgb("#FF0000"), Some([255, 0, 0]));
        assert_eq!(hex_to_rgb("#00FF00"), Some([0, 255, 0]));
        assert_eq!(hex_to_rgb("#0000FF"), Some([0, 0, 255]));
        assert_eq!(hex_to_rgb("bogus"), None);
        assert_eq!(rgb_to_hex([255, 128, 0]), "#FF8000");
    }

    #[test]
    fn lab_endpoints() {
        let white = srgb_to_lab([255, 255, 255]);
        assert!((white.l - 100.0).abs() < 0.01);
        assert!(white.a.abs() < 0.01);
        assert!(white.b.abs() < 0.01);

        let black = srgb_to_lab([0, 0, 0]);
        assert!(black.l.abs() < 0.01);
    }

    #[test]
    fn lab_red_reference() {
        // sRGB red under D65: L* 53.24, a* 80.09, b* 67.20.
        let red = srgb_to_lab([255, 0, 0]);
        assert!((red.l - 53.24).abs() < 0.05);
        assert!((red.a - 80.09).abs() < 0.05);
        assert!((red.b - 67.20).abs() < 0.05);
    }

    #[test]
    fn srgb_roundtrip_within_rounding() {
        for rgb in [[12u8, 200, 99], [255, 255, 255], [0, 0, 0], [17, 17, 17]] {
            assert_eq!(lab_to_srgb(srgb_to_lab(rgb)), rgb);
        }
    }

    #[test]
    fn delta_e_metric_properties() {
        let a = srgb_to_lab([10, 140, 230]);
        let b = srgb_to_lab([200, 30, 40]);

        assert_eq!(delta_e_76(a, a), 0.0);
        assert!((delta_e_76(a, b) - delta_e_76(b, a)).abs() < 1e-12);
        assert!(delta_e_76(a, b) > 0.0);

        assert!(delta_e_00(a, a).abs() < 1e-9);
        assert!(delta_e_00(a, b) > 0.0);
        assert!((delta_e_00(a, b) - delta_e_00(b, a)).abs() < 1e-9);
    }
}
