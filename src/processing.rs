//! InfiniteProcessing (§4.5): the per-frame color transform chain applied
//! to the linear-RGB LED vector. `CalibrationSnapshot` is rebuilt off
//! thread on reconfiguration and published with an atomic pointer swap
//! (`arc_swap::ArcSwap`) so a running pipeline is never torn mid-frame by
//! a config edit (§3, §5).

use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::color::{ByteOrder, ColorRgb, LinearRgb};
use crate::config::{BacklightMode, CalibrationConfig, ColorConfig, TemperaturePreset};

const GAMMA_LUT_SIZE: usize = 1024;

/// Either a 3x3 primary-only matrix or a full tetrahedral LUT built by
/// trilinear blend of the 8 RGBCMYWK reference corners (§3, §4.5 step 2).
enum Calibration {
    Identity,
    Matrix([[f32; 3]; 3]),
    Tetrahedral17 { side: usize, samples: Vec<[f32; 3]> },
}

impl Calibration {
    fn from_config(cfg: &CalibrationConfig) -> Self {
        match cfg {
            CalibrationConfig::Identity => Calibration::Identity,
            CalibrationConfig::PrimaryMatrix { r, g, b } => Calibration::Matrix([*r, *g, *b]),
            CalibrationConfig::Tetrahedral { corners } => Calibration::Tetrahedral17 {
                side: 17,
                samples: build_tetrahedral_lut(17, corners),
            },
        }
    }

    fn apply(&self, c: LinearRgb) -> LinearRgb {
        match self {
            Calibration::Identity => c,
            Calibration::Matrix(m) => {
                let r = m[0][0] * c.r + m[1][0] * c.g + m[2][0] * c.b;
                let g = m[0][1] * c.r + m[1][1] * c.g + m[2][1] * c.b;
                let b = m[0][2] * c.r + m[1][2] * c.g + m[2][2] * c.b;
                LinearRgb::new(r, g, b).clamp01()
            }
            Calibration::Tetrahedral17 { side, samples } => trilinear_sample(*side, samples, c),
        }
    }
}

/// Build a `side^3` LUT by trilinear blend of the 8 RGBCMYWK reference
/// corners. Corner order: `[R, G, B, C, M, Y, W, K]`, matching the order a
/// calibration wizard would present them in.
fn build_tetrahedral_lut(side: usize, corners: &[[f32; 3]; 8]) -> Vec<[f32; 3]> {
    let mut out = Vec::with_capacity(side * side * side);
    for ri in 0..side {
        for gi in 0..side {
            for bi in 0..side {
                let (r, g, b) = (
                    ri as f32 / (side - 1) as f32,
                    gi as f32 / (side - 1) as f32,
                    bi as f32 / (side - 1) as f32,
                );
                out.push(trilinear_corner_blend(corners, r, g, b));
            }
        }
    }
    out
}

/// Blend the 8 cube corners (`K,R,G,B,C,M,Y,W` addressed by the bits of
/// `(r>0.5,g>0.5,b>0.5)` is too coarse for a real tetrahedral fit; instead
/// we blend all 8 named corners by their RGB-cube distance weights, which
/// degenerates to the same trilinear interpolation at the cube's actual
/// corners).
fn trilinear_corner_blend(corners: &[[f32; 3]; 8], r: f32, g: f32, b: f32) -> [f32; 3] {
    // Corner coordinates in RGB space: R,G,B,C,M,Y,W,K.
    const CORNER_COORDS: [[f32; 3]; 8] = [
        [1.0, 0.0, 0.0],
        [0.0, 1.0, 0.0],
        [0.0, 0.0, 1.0],
        [0.0, 1.0, 1.0],
        [1.0, 0.0, 1.0],
        [1.0, 1.0, 0.0],
        [1.0, 1.0, 1.0],
        [0.0, 0.0, 0.0],
    ];
    let mut acc = [0.0f32; 3];
    let mut weight_sum = 0.0f32;
    for (coord, corner) in CORNER_COORDS.iter().zip(corners.iter()) {
        let d2 = (coord[0] - r).powi(2) + (coord[1] - g).powi(2) + (coord[2] - b).powi(2);
        let weight = 1.0 / (d2 + 1e-4);
        weight_sum += weight;
        acc[0] += weight * corner[0];
        acc[1] += weight * corner[1];
        acc[2] += weight * corner[2];
    }
    [acc[0] / weight_sum, acc[1] / weight_sum, acc[2] / weight_sum]
}

fn trilinear_sample(side: usize, samples: &[[f32; 3]], c: LinearRgb) -> LinearRgb {
    let idx = |v: f32| ((v.clamp(0.0, 1.0) * (side - 1) as f32).round() as usize).min(side - 1);
    let (ri, gi, bi) = (idx(c.r), idx(c.g), idx(c.b));
    let flat = ri * side * side + gi * side + bi;
    let s = samples[flat];
    LinearRgb::new(s[0], s[1], s[2]).clamp01()
}

/// Immutable, reference-counted snapshot published by the processing
/// chain each time color settings change (§3 `CalibrationSnapshot`).
pub struct CalibrationSnapshot {
    temperature: (f32, f32, f32),
    calibration: Calibration,
    scale_output: f32,
    gamma_lut: [[u16; GAMMA_LUT_SIZE]; 3],
    saturation_gain: f32,
    value_gain: f32,
    backlight_threshold: f32,
    backlight_mode: BacklightMode,
    power_limit: f32,
    byte_order: ByteOrder,
}

impl CalibrationSnapshot {
    pub fn build(cfg: &ColorConfig) -> Arc<Self> {
        Arc::new(CalibrationSnapshot {
            temperature: cfg.temperature.multipliers(),
            calibration: Calibration::from_config(&cfg.calibration),
            scale_output: cfg.scale_output.clamp(0.0, 2.0),
            gamma_lut: build_gamma_lut(cfg.gamma),
            saturation_gain: cfg.saturation_gain,
            value_gain: cfg.value_gain,
            backlight_threshold: cfg.backlight_threshold,
            backlight_mode: cfg.backlight_mode,
            power_limit: cfg.power_limit,
            byte_order: cfg.byte_order,
        })
    }

    fn gamma_channel(&self, channel: usize, v: f32) -> f32 {
        let lut = &self.gamma_lut[channel];
        let scaled = v.clamp(0.0, 1.0) * (GAMMA_LUT_SIZE - 1) as f32;
        let lo = scaled.floor() as usize;
        let hi = (lo + 1).min(GAMMA_LUT_SIZE - 1);
        let frac = scaled - lo as f32;
        let a = lut[lo] as f32 / 65535.0;
        let b = lut[hi] as f32 / 65535.0;
        a + (b - a) * frac
    }
}

fn build_gamma_lut(gamma: (f32, f32, f32)) -> [[u16; GAMMA_LUT_SIZE]; 3] {
    let mut out = [[0u16; GAMMA_LUT_SIZE]; 3];
    let gammas = [gamma.0, gamma.1, gamma.2];
    for (channel, g) in gammas.iter().enumerate() {
        for (i, slot) in out[channel].iter_mut().enumerate() {
            let x = i as f32 / (GAMMA_LUT_SIZE - 1) as f32;
            *slot = (x.powf(*g) * 65535.0).round() as u16;
        }
    }
    out
}

/// Holds the current [`CalibrationSnapshot`] behind an atomic pointer and
/// applies the fixed processing chain to LED vectors.
pub struct InfiniteProcessing {
    snapshot: ArcSwap<CalibrationSnapshot>,
}

impl InfiniteProcessing {
    pub fn new(cfg: &ColorConfig) -> Self {
        InfiniteProcessing { snapshot: ArcSwap::from(CalibrationSnapshot::build(cfg)) }
    }

    /// Rebuild off-thread and atomically publish a new snapshot; readers
    /// mid-frame keep seeing the old one until this store completes.
    pub fn reconfigure(&self, cfg: &ColorConfig) {
        self.snapshot.store(CalibrationSnapshot::build(cfg));
    }

    pub fn current_snapshot(&self) -> Arc<CalibrationSnapshot> {
        self.snapshot.load_full()
    }

    /// Run the full chain (§4.5 steps 1-8 plus the final byte-order swap)
    /// over a vector of linear-RGB LED colors, producing the
    /// hardware-ready `ColorRgb` vector.
    pub fn process(&self, input: &[LinearRgb]) -> Vec<ColorRgb> {
        let snap = self.snapshot.load();
        let mut encoded: Vec<ColorRgb> = input
            .iter()
            .map(|&c| {
                let mut c = c;
                // 1. Temperature tint.
                c = LinearRgb::new(c.r * snap.temperature.0, c.g * snap.temperature.1, c.b * snap.temperature.2);
                // 2. Calibration.
                c = snap.calibration.apply(c);
                // 3. Scale-output.
                c = c.scale(snap.scale_output).clamp01();
                // 4. Linear -> sRGB gamma encode.
                let srgb = c.to_srgb();
                // 5. User gamma, applied in sRGB-encoded space via the
                // precomputed per-channel LUT.
                let r = snap.gamma_channel(0, srgb.r as f32 / 255.0);
                let g = snap.gamma_channel(1, srgb.g as f32 / 255.0);
                let b = snap.gamma_channel(2, srgb.b as f32 / 255.0);
                ColorRgb::new((r * 255.0).round() as u8, (g * 255.0).round() as u8, (b * 255.0).round() as u8)
            })
            .collect();

        // 6. Brightness & Saturation (HSV gain, clamped to 1).
        for c in encoded.iter_mut() {
            let mut hsv = c.to_hsv();
            hsv.saturation = (hsv.saturation * snap.saturation_gain).min(1.0);
            hsv.value = (hsv.value * snap.value_gain).min(1.0);
            *c = hsv.to_rgb();
        }

        // 7. Minimum backlight.
        let t = (snap.backlight_threshold.clamp(0.0, 1.0) * 255.0).round() as u8;
        if t > 0 {
            for c in encoded.iter_mut() {
                let below = c.r < t && c.g < t && c.b < t;
                if below {
                    *c = match snap.backlight_mode {
                        BacklightMode::Colored => ColorRgb::new(t, t, t),
                        BacklightMode::NonColored => {
                            let avg = ((c.r as u16 + c.g as u16 + c.b as u16) / 3).max(t as u16) as u8;
                            ColorRgb::new(avg, avg, avg)
                        }
                    };
                }
            }
        }

        // 8. Power limit: if Sigma(r+g+b) > A = 3N*limit, scale all colors
        // by A/Sigma.
        apply_power_limit(&mut encoded, snap.power_limit);

        // Final byte-order swap for the target hardware.
        encoded.into_iter().map(|c| {
            let [a, b, cc] = c.swizzle(snap.byte_order);
            ColorRgb::new(a, b, cc)
        }).collect()
    }
}

fn apply_power_limit(colors: &mut [ColorRgb], limit: f32) {
    if colors.is_empty() {
        return;
    }
    let sum: u64 = colors.iter().map(|c| c.r as u64 + c.g as u64 + c.b as u64).sum();
    let budget = 3.0 * colors.len() as f32 * limit.clamp(0.0, 1.0) * 255.0;
    if (sum as f32) > budget && sum > 0 {
        let factor = budget / sum as f32;
        for c in colors.iter_mut() {
            c.r = (c.r as f32 * factor).round() as u8;
            c.g = (c.g as f32 * factor).round() as u8;
            c.b = (c.b as f32 * factor).round() as u8;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::srgb_encode;

    fn identity_cfg() -> ColorConfig {
        ColorConfig::default()
    }

    #[test]
    fn identity_config_matches_plain_srgb_encode() {
        let proc = InfiniteProcessing::new(&identity_cfg());
        let input = vec![LinearRgb::new(0.2, 0.5, 0.8)];
        let out = proc.process(&input);
        let expected = LinearRgb::new(0.2, 0.5, 0.8).to_srgb();
        // A touch of slop: the user-gamma LUT interpolation rounds to 1024
        // steps even at gamma=1.0.
        assert!((out[0].r as i16 - expected.r as i16).abs() <= 1);
        assert!((out[0].g as i16 - expected.g as i16).abs() <= 1);
        assert!((out[0].b as i16 - expected.b as i16).abs() <= 1);
        let _ = srgb_encode(0.5);
    }

    #[test]
    fn power_limit_caps_total_energy() {
        let mut cfg = identity_cfg();
        cfg.power_limit = 0.1;
        let proc = InfiniteProcessing::new(&cfg);
        let input = vec![LinearRgb::new(1.0, 1.0, 1.0); 10];
        let out = proc.process(&input);
        let sum: u64 = out.iter().map(|c| c.r as u64 + c.g as u64 + c.b as u64).sum();
        let budget = 3.0 * 10.0 * 0.1 * 255.0 + 30.0; // + rounding slack
        assert!((sum as f32) <= budget);
    }

    #[test]
    fn backlight_elevates_dark_colors() {
        let mut cfg = identity_cfg();
        cfg.backlight_threshold = 0.1;
        cfg.backlight_mode = BacklightMode::Colored;
        let proc = InfiniteProcessing::new(&cfg);
        let out = proc.process(&[LinearRgb::new(0.0, 0.0, 0.0)]);
        let t = (0.1f32 * 255.0).round() as u8;
        assert_eq!(out[0], ColorRgb::new(t, t, t));
    }

    #[test]
    fn reconfigure_swaps_snapshot_atomically() {
        let proc = InfiniteProcessing::new(&identity_cfg());
        let before = proc.current_snapshot();
        let mut cfg = identity_cfg();
        cfg.temperature = TemperaturePreset::Cold;
        proc.reconfigure(&cfg);
        let after = proc.current_snapshot();
        assert!(!Arc::ptr_eq(&before, &after));
    }
}
