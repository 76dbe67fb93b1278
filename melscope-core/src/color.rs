//! # Color Map Module
//!
//! Perceptual palettes used to turn normalised spectrogram values into RGBA.
//! Each palette is a short table of anchors; values between two anchors are
//! linearly interpolated per channel.

use serde::{Deserialize, Serialize};

/// One palette anchor: a position in `[0, 1]` and the color at that position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorAnchor {
    pub position: f32,
    pub rgb: [u8; 3],
}

const fn anchor(position: f32, r: u8, g: u8, b: u8) -> ColorAnchor {
    ColorAnchor {
        position,
        rgb: [r, g, b],
    }
}

pub const VIRIDIS: [ColorAnchor; 9] = [
    anchor(0.0, 68, 1, 84),
    anchor(0.13, 71, 44, 122),
    anchor(0.25, 59, 81, 139),
    anchor(0.38, 44, 113, 142),
    anchor(0.5, 33, 144, 140),
    anchor(0.63, 39, 173, 129),
    anchor(0.75, 92, 200, 99),
    anchor(0.88, 170, 220, 50),
    anchor(1.0, 253, 231, 37),
];

pub const INFERNO: [ColorAnchor; 9] = [
    anchor(0.0, 0, 0, 4),
    anchor(0.13, 31, 12, 72),
    anchor(0.25, 85, 15, 109),
    anchor(0.38, 136, 19, 97),
    anchor(0.5, 186, 25, 51),
    anchor(0.63, 219, 51, 28),
    anchor(0.75, 232, 113, 32),
    anchor(0.88, 236, 173, 55),
    anchor(1.0, 252, 255, 164),
];

pub const PLASMA: [ColorAnchor; 9] = [
    anchor(0.0, 13, 8, 135),
    anchor(0.13, 84, 2, 163),
    anchor(0.25, 139, 10, 165),
    anchor(0.38, 185, 50, 137),
    anchor(0.5, 219, 92, 104),
    anchor(0.63, 244, 136, 73),
    anchor(0.75, 254, 188, 43),
    anchor(0.88, 240, 249, 33),
    anchor(1.0, 240, 249, 33),
];

/// Available palettes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorMap {
    #[default]
    Viridis,
    Inferno,
    Plasma,
}

impl ColorMap {
    /// Maps the integer palette code used by the C surface.
    ///
    /// `0` = viridis, `1` = inferno, `2` = plasma. Anything else is `None`.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(ColorMap::Viridis),
            1 => Some(ColorMap::Inferno),
            2 => Some(ColorMap::Plasma),
            _ => None,
        }
    }

    pub fn code(self) -> i32 {
        match self {
            ColorMap::Viridis => 0,
            ColorMap::Inferno => 1,
            ColorMap::Plasma => 2,
        }
    }

    pub fn anchors(self) -> &'static [ColorAnchor] {
        match self {
            ColorMap::Viridis => &VIRIDIS,
            ColorMap::Inferno => &INFERNO,
            ColorMap::Plasma => &PLASMA,
        }
    }

    /// Shorthand for [`interpolate_color`] over this palette.
    pub fn color(self, value: f32) -> [u8; 4] {
        interpolate_color(value, self.anchors())
    }
}

/// Maps `value` to an RGBA color by interpolating between palette anchors.
///
/// # Arguments
/// * `value` - Normalised value; clamped to `[0, 1]`, NaN is treated as 0
/// * `anchors` - Palette anchors sorted by position
///
/// # Returns
/// * `[r, g, b, 255]`, or opaque black for an empty palette
pub fn interpolate_color(value: f32, anchors: &[ColorAnchor]) -> [u8; 4] {
    let (first, last) = match (anchors.first(), anchors.last()) {
        (Some(first), Some(last)) => (first, last),
        _ => return [0, 0, 0, 255],
    };

    let v = if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) };
    if v <= first.position {
        return opaque(first.rgb);
    }
    if v >= last.position {
        return opaque(last.rgb);
    }

    for pair in anchors.windows(2) {
        let (lo, hi) = (&pair[0], &pair[1]);
        if v >= lo.position && v < hi.position {
            let span = hi.position - lo.position;
            let t = if span > 0.0 { (v - lo.position) / span } else { 0.0 };
            let mut rgba = [0, 0, 0, 255];
            for c in 0..3 {
                let a = lo.rgb[c] as f32;
                let b = hi.rgb[c] as f32;
                rgba[c] = (a + t * (b - a) + 0.5) as u8;
            }
            return rgba;
        }
    }
    opaque(last.rgb)
}

fn opaque(rgb: [u8; 3]) -> [u8; 4] {
    [rgb[0], rgb[1], rgb[2], 255]
}
