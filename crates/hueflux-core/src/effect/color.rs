// ── RGBA color ──

use serde::{Deserialize, Serialize};

/// Linear RGB in `[0, 1]` plus an alpha used for layer blending.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub r: f64,
    pub g: f64,
    pub b: f64,
    pub a: f64,
}

impl Default for Color {
    fn default() -> Self {
        Self::TRANSPARENT
    }
}

impl Color {
    pub const TRANSPARENT: Self = Self::rgba(0.0, 0.0, 0.0, 0.0);
    pub const BLACK: Self = Self::rgb(0.0, 0.0, 0.0);
    pub const WHITE: Self = Self::rgb(1.0, 1.0, 1.0);
    pub const RED: Self = Self::rgb(1.0, 0.0, 0.0);
    pub const GREEN: Self = Self::rgb(0.0, 1.0, 0.0);
    pub const BLUE: Self = Self::rgb(0.0, 0.0, 1.0);

    /// Opaque color.
    pub const fn rgb(r: f64, g: f64, b: f64) -> Self {
        Self::rgba(r, g, b, 1.0)
    }

    pub const fn rgba(r: f64, g: f64, b: f64, a: f64) -> Self {
        Self { r, g, b, a }
    }

    pub fn with_alpha(self, a: f64) -> Self {
        Self { a, ..self }
    }

    pub fn clamped(self) -> Self {
        Self {
            r: clamp_unit(self.r),
            g: clamp_unit(self.g),
            b: clamp_unit(self.b),
            a: clamp_unit(self.a),
        }
    }

    /// Composite `top` over `self` using `top`'s alpha. The result is opaque
    /// wherever either input was.
    pub fn blend_over(self, top: Color) -> Color {
        let top = top.clamped();
        let a = top.a;
        Color {
            r: self.r * (1.0 - a) + top.r * a,
            g: self.g * (1.0 - a) + top.g * a,
            b: self.b * (1.0 - a) + top.b * a,
            a: self.a.max(a),
        }
    }

    /// Channel values scaled to `0..=65535` for the wire.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn to_rgb16(self) -> [u16; 3] {
        let scale = |c: f64| (clamp_unit(c) * f64::from(u16::MAX)).round() as u16;
        [scale(self.r), scale(self.g), scale(self.b)]
    }
}

fn clamp_unit(v: f64) -> f64 {
    if v.is_nan() { 0.0 } else { v.clamp(0.0, 1.0) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opaque_top_replaces_bottom() {
        assert_eq!(Color::RED.blend_over(Color::BLUE), Color::BLUE);
    }

    #[test]
    fn transparent_top_keeps_bottom() {
        assert_eq!(Color::RED.blend_over(Color::TRANSPARENT), Color::RED);
    }

    #[test]
    fn half_alpha_mixes() {
        let mixed = Color::BLACK.blend_over(Color::WHITE.with_alpha(0.5));
        assert!((mixed.r - 0.5).abs() < 1e-9);
        assert!((mixed.a - 1.0).abs() < 1e-9);
    }

    #[test]
    fn wire_scaling_clamps() {
        assert_eq!(Color::rgb(2.0, 0.5, -1.0).to_rgb16(), [65535, 32768, 0]);
    }
}
