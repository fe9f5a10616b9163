//! Color types and the pure math used by [`crate::processing`]: sRGB <->
//! linear conversion, HSV, and the byte-order swap drivers need for their
//! hardware's channel layout.

use std::cmp::{max, min};

/// Just a simple modulo function, since `%` in rust is remainder.
fn modulo(l: f32, r: f32) -> f32 {
    if l >= 0.0 {
        l % r
    } else {
        r + l % r
    }
}

/// An sRGB-encoded 8-bit-per-channel color, as stored by the LED layout and
/// written to the wire by drivers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct ColorRgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl ColorRgb {
    pub const BLACK: ColorRgb = ColorRgb { r: 0, g: 0, b: 0 };

    pub fn new(r: u8, g: u8, b: u8) -> Self {
        ColorRgb { r, g, b }
    }

    /// Byte order a driver's hardware expects, applied just before writing
    /// a frame (§4.5 step "swap channels").
    pub fn swizzle(self, order: ByteOrder) -> [u8; 3] {
        match order {
            ByteOrder::Rgb => [self.r, self.g, self.b],
            ByteOrder::Rbg => [self.r, self.b, self.g],
            ByteOrder::Grb => [self.g, self.r, self.b],
            ByteOrder::Gbr => [self.g, self.b, self.r],
            ByteOrder::Brg => [self.b, self.r, self.g],
            ByteOrder::Bgr => [self.b, self.g, self.r],
        }
    }

    pub fn to_hsv(self) -> Hsv {
        let hi = max(max(self.r, self.g), self.b);
        let lo = min(min(self.r, self.g), self.b);
        let chroma = hi - lo;

        let hue = (1.0 / 6.0)
            * if chroma == 0 {
                0.0
            } else if hi == self.r {
                modulo((self.g as f32 - self.b as f32) / chroma as f32, 6.0)
            } else if hi == self.g {
                ((self.b as f32 - self.r as f32) / chroma as f32) + 2.0
            } else {
                ((self.r as f32 - self.g as f32) / chroma as f32) + 4.0
            };

        let value = hi as f32 / 255.0;
        let saturation = if hi == 0 { 0.0 } else { chroma as f32 / hi as f32 };

        Hsv { hue, saturation, value }
    }

    /// Convert to a linear-RGB float triple in `[0, 1]`, undoing the sRGB
    /// transfer function (§4.5's "srgbDecode").
    pub fn to_linear(self) -> LinearRgb {
        LinearRgb {
            r: srgb_decode(self.r as f32 / 255.0),
            g: srgb_decode(self.g as f32 / 255.0),
            b: srgb_decode(self.b as f32 / 255.0),
        }
    }
}

/// Hardware byte order a driver writes colors in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ByteOrder {
    Rgb,
    Rbg,
    Grb,
    Gbr,
    Brg,
    Bgr,
}

impl Default for ByteOrder {
    fn default() -> Self {
        ByteOrder::Rgb
    }
}

/// A pixel in the [HSV](http://en.wikipedia.org/wiki/HSL_and_HSV) color format.
#[derive(Clone, Copy, Debug)]
pub struct Hsv {
    pub hue: f32,
    pub saturation: f32,
    pub value: f32,
}

impl Hsv {
    pub fn to_rgb(self) -> ColorRgb {
        if self.saturation == 0.0 {
            let v = (self.value * 255.0).round() as u8;
            return ColorRgb { r: v, g: v, b: v };
        }

        let sector_f = self.hue * 6.0;
        let sector = sector_f as u8 % 6;
        let frac = sector_f - sector_f.floor();
        let val = self.value * 255.0;

        let p = (val * (1.0 - self.saturation)) as u8;
        let q = (val * (1.0 - self.saturation * frac)) as u8;
        let t = (val * (1.0 - self.saturation * (1.0 - frac))) as u8;
        let v = val as u8;

        match sector {
            0 => ColorRgb { r: v, g: t, b: p },
            1 => ColorRgb { r: q, g: v, b: p },
            2 => ColorRgb { r: p, g: v, b: t },
            3 => ColorRgb { r: p, g: q, b: v },
            4 => ColorRgb { r: t, g: p, b: v },
            _ => ColorRgb { r: v, g: p, b: q },
        }
    }
}

/// A float triple in `[0, 1]` after gamma removal; the working color space
/// of [`crate::processing`].
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LinearRgb {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl LinearRgb {
    pub fn new(r: f32, g: f32, b: f32) -> Self {
        LinearRgb { r, g, b }
    }

    pub fn clamp01(self) -> Self {
        LinearRgb {
            r: self.r.clamp(0.0, 1.0),
            g: self.g.clamp(0.0, 1.0),
            b: self.b.clamp(0.0, 1.0),
        }
    }

    pub fn scale(self, k: f32) -> Self {
        LinearRgb { r: self.r * k, g: self.g * k, b: self.b * k }
    }

    pub fn component_mul(self, other: LinearRgb) -> Self {
        LinearRgb { r: self.r * other.r, g: self.g * other.g, b: self.b * other.b }
    }

    pub fn sum(self) -> f32 {
        self.r + self.g + self.b
    }

    /// Re-encode to sRGB 8-bit (§4.5 step 4, "Linear -> sRGB gamma encode").
    pub fn to_srgb(self) -> ColorRgb {
        let c = self.clamp01();
        ColorRgb {
            r: (srgb_encode(c.r) * 255.0).round() as u8,
            g: (srgb_encode(c.g) * 255.0).round() as u8,
            b: (srgb_encode(c.b) * 255.0).round() as u8,
        }
    }
}

impl std::ops::Add for LinearRgb {
    type Output = LinearRgb;
    fn add(self, rhs: LinearRgb) -> LinearRgb {
        LinearRgb { r: self.r + rhs.r, g: self.g + rhs.g, b: self.b + rhs.b }
    }
}

impl std::ops::Sub for LinearRgb {
    type Output = LinearRgb;
    fn sub(self, rhs: LinearRgb) -> LinearRgb {
        LinearRgb { r: self.r - rhs.r, g: self.g - rhs.g, b: self.b - rhs.b }
    }
}

/// The Philips-Hue `(x, y, brightness)` color space, used only by that
/// driver family.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ColorXyb {
    pub x: f32,
    pub y: f32,
    pub brightness: f32,
}

impl ColorXyb {
    /// Convert an sRGB color to CIE xyY via linear RGB -> XYZ, the
    /// transform Philips documents for the Entertainment API.
    pub fn from_srgb(c: ColorRgb) -> Self {
        let lin = c.to_linear();
        let x = lin.r * 0.649_926 + lin.g * 0.103_455 + lin.b * 0.197_109;
        let y = lin.r * 0.234_327 + lin.g * 0.743_075 + lin.b * 0.022_598;
        let z = lin.g * 0.053_077 + lin.b * 1.035_763;
        let sum = x + y + z;
        if sum <= 0.0 {
            ColorXyb { x: 0.0, y: 0.0, brightness: 0.0 }
        } else {
            ColorXyb { x: x / sum, y: y / sum, brightness: y }
        }
    }
}

/// The standard piecewise sRGB transfer function, decode direction
/// (sRGB-encoded `[0,1]` -> linear `[0,1]`).
pub fn srgb_decode(c: f32) -> f32 {
    if c <= 0.04045 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

/// The standard piecewise sRGB transfer function, encode direction (linear
/// `[0,1]` -> sRGB-encoded `[0,1]`).
pub fn srgb_encode(c: f32) -> f32 {
    let c = c.clamp(0.0, 1.0);
    if c <= 0.003_130_8 {
        c * 12.92
    } else {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    }
}

/// Represent a slice of [`ColorRgb`] as raw interleaved bytes in the given
/// hardware byte order, for drivers handing the buffer straight to a
/// socket write.
pub fn colors_as_bytes(v: &[ColorRgb], order: ByteOrder) -> Vec<u8> {
    let mut out = Vec::with_capacity(v.len() * 3);
    for c in v {
        out.extend_from_slice(&c.swizzle(order));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn srgb_roundtrip_within_one_lsb() {
        for i in 0u16..=255 {
            let v = i as f32 / 255.0;
            let decoded = srgb_decode(v);
            let reencoded = srgb_encode(decoded);
            let diff = (reencoded - v).abs() * 255.0;
            assert!(diff <= 1.0, "round trip drifted {diff} LSB at {i}");
        }
    }

    #[test]
    fn hsv_roundtrip() {
        let c = ColorRgb::new(200, 50, 10);
        let back = c.to_hsv().to_rgb();
        // Allow a little integer-rounding slop.
        assert!((back.r as i16 - c.r as i16).abs() <= 1);
        assert!((back.g as i16 - c.g as i16).abs() <= 1);
        assert!((back.b as i16 - c.b as i16).abs() <= 1);
    }

    #[test]
    fn swizzle_grb() {
        let c = ColorRgb::new(1, 2, 3);
        assert_eq!(c.swizzle(ByteOrder::Grb), [2, 1, 3]);
    }

    #[test]
    fn xyb_white_is_balanced() {
        let xyb = ColorXyb::from_srgb(ColorRgb::new(255, 255, 255));
        assert!((xyb.x - 0.3127).abs() < 0.02);
        assert!((xyb.y - 0.3290).abs() < 0.02);
    }
}
