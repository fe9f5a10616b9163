//! Configuration tree. One section per core component, parsed from the
//! per-instance JSON documents a settings store (persistence is out of
//! core scope here) would otherwise hand to us.
//!
//! Kept from the original prototype: `//`-comment stripping before parsing,
//! and the comma/range LED-index syntax used by per-LED color transforms.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::color::ByteOrder;
use crate::error::{HyperError, Result};

/// Root configuration: one or more instances, each an independent pipeline.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Config {
    pub instances: Vec<InstanceConfig>,
}

/// Configuration of a single [`crate::instance::Instance`].
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct InstanceConfig {
    pub name: String,
    pub leds: LedLayoutConfig,
    pub color: ColorConfig,
    pub smoothing: SmoothingSetConfig,
    pub grabber: GrabberConfig,
    pub blackbar: BlackBarConfig,
    pub device: DeviceConfig,
}

/// The LED layout: an ordered, fixed-length list of sample regions.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct LedLayoutConfig {
    pub leds: Vec<LedSpec>,
}

/// One LED: its normalized sample rectangle, calibration group, and
/// enable flag.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct LedSpec {
    pub hmin: f32,
    pub hmax: f32,
    pub vmin: f32,
    pub vmax: f32,
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub disabled: bool,
}

impl LedSpec {
    pub fn validate(&self) -> Result<()> {
        if !(self.hmin < self.hmax) || !(self.vmin < self.vmax) {
            return Err(HyperError::config(format!(
                "led region must satisfy hmin<hmax and vmin<vmax, got {self:?}"
            )));
        }
        let in_unit = |v: f32| (0.0..=1.0).contains(&v);
        if ![self.hmin, self.hmax, self.vmin, self.vmax].into_iter().all(in_unit) {
            return Err(HyperError::config(format!(
                "led region must be within [0,1]^2, got {self:?}"
            )));
        }
        Ok(())
    }
}

/// Color temperature preset (§4.5 step 1).
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq)]
pub enum TemperaturePreset {
    Warm,
    Neutral,
    Cold,
    Custom { r: f32, g: f32, b: f32 },
}

impl TemperaturePreset {
    pub fn multipliers(self) -> (f32, f32, f32) {
        match self {
            TemperaturePreset::Warm => (1.0, 0.93, 0.85),
            TemperaturePreset::Neutral => (1.0, 1.0, 1.0),
            TemperaturePreset::Cold => (0.9, 0.95, 1.0),
            TemperaturePreset::Custom { r, g, b } => (r, g, b),
        }
    }
}

/// Minimum-backlight mode (§4.5 step 7).
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub enum BacklightMode {
    /// Set the color to `(t,t,t)` when all channels fall below threshold.
    Colored,
    /// Elevate the average instead of forcing a fixed gray.
    NonColored,
}

/// Full color-processing configuration (§4.5).
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ColorConfig {
    pub temperature: TemperaturePreset,
    pub calibration: CalibrationConfig,
    /// Overall gain in `[0,2]` (§4.5 step 3).
    pub scale_output: f32,
    /// Per-channel gamma exponent (§4.5 step 5).
    pub gamma: (f32, f32, f32),
    pub saturation_gain: f32,
    pub value_gain: f32,
    pub backlight_threshold: f32,
    pub backlight_mode: BacklightMode,
    /// Per-LED power budget in `[0,1]`; `Σ(r+g+b) <= 3N*limit` (§4.5 step 8).
    pub power_limit: f32,
    pub byte_order: ByteOrder,
}

impl Default for ColorConfig {
    fn default() -> Self {
        ColorConfig {
            temperature: TemperaturePreset::Neutral,
            calibration: CalibrationConfig::Identity,
            scale_output: 1.0,
            gamma: (1.0, 1.0, 1.0),
            saturation_gain: 1.0,
            value_gain: 1.0,
            backlight_threshold: 0.0,
            backlight_mode: BacklightMode::Colored,
            power_limit: 1.0,
            byte_order: ByteOrder::Rgb,
        }
    }
}

/// Calibration mode: identity, a 3x3 primary-only matrix, or a full
/// RGBCMYWK tetrahedral LUT (§3 "CalibrationSnapshot", §4.5 step 2).
#[derive(Clone, Debug, Deserialize, Serialize)]
pub enum CalibrationConfig {
    Identity,
    /// Columns are the target R, G, B primaries.
    PrimaryMatrix { r: [f32; 3], g: [f32; 3], b: [f32; 3] },
    /// The 8 RGBCMYWK reference corners, each a linear-RGB triple.
    Tetrahedral { corners: Box<[[f32; 3]; 8]> },
}

/// One named smoothing configuration (§3 "Smoothing Configuration").
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SmoothingConfig {
    pub id: i32,
    pub settling_time_ms: u32,
    pub update_frequency_hz: f64,
    pub direct_mode: bool,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        SmoothingConfig { id: 0, settling_time_ms: 200, update_frequency_hz: 25.0, direct_mode: false }
    }
}

/// The set of smoothing configurations an instance may reference by id.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SmoothingSetConfig {
    pub configs: Vec<SmoothingConfig>,
}

impl Default for SmoothingSetConfig {
    fn default() -> Self {
        SmoothingSetConfig { configs: vec![SmoothingConfig::default()] }
    }
}

/// Frame-grabber configuration (§4.1).
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct GrabberConfig {
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub input: u32,
    pub pixel_format: crate::decode::PixelFormat,
    pub qframe: bool,
    pub decimation: u32,
}

impl Default for GrabberConfig {
    fn default() -> Self {
        GrabberConfig {
            device: String::new(),
            width: 1920,
            height: 1080,
            fps: 30,
            input: 0,
            pixel_format: crate::decode::PixelFormat::Rgb24,
            qframe: false,
            decimation: 1,
        }
    }
}

/// Blackbar detection configuration (§4.4).
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct BlackBarConfig {
    pub enabled: bool,
    /// Rows/columns of margin scanned before concluding there's no border.
    pub scan_depth: u32,
    /// Luma threshold below which a pixel is treated as "black".
    pub threshold: u8,
}

impl Default for BlackBarConfig {
    fn default() -> Self {
        BlackBarConfig { enabled: true, scan_depth: 180, threshold: 4 }
    }
}

/// Device/driver configuration: which backend, and its transport
/// parameters (§4.7).
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct DeviceConfig {
    pub kind: DriverKind,
    pub max_retry: u32,
    pub retry_backoff_ms: u64,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub enum DriverKind {
    UdpRaw { host: String, port: u16 },
    Sacn { host: String, universe: u16 },
    ArtNet { host: String, universe: u16 },
    Tpm2Net { host: String, port: u16 },
    WledWarls { host: String, port: u16, timeout_s: u8 },
    WledHttp { host: String },
    NanoleafRest { host: String, auth_token: String },
    NanoleafStreaming { host: String, port: u16, psk: Vec<u8> },
    HueEntertainment { bridge_host: String, username: String, client_key: Vec<u8>, group_id: String },
    Yeelight { host: String, port: u16 },
    SerialAdalight { tty: String, baud: u32 },
}

/// Parse the `//`-commented JSON config documents this system uses.
pub fn parse_config(json_text: &str) -> Result<Config> {
    let stripped = strip_json_comments(json_text);
    serde_json::from_str(&stripped)
        .map_err(|e| HyperError::config(format!("config could not be parsed: {e}")))
}

/// Strip whole-line `//` comments before feeding the document to serde_json.
fn strip_json_comments(json_text: &str) -> String {
    json_text
        .lines()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty() && !l.starts_with("//"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parse string of comma separated indices or index ranges to a vector of
/// ranges, e.g. for applying a color transform to a subset of LEDs.
///
/// # Examples
/// ```
/// use hyperhdr_core::config::parse_led_indices;
/// assert_eq!(parse_led_indices("3, 4-8, 0, 20-24", 10), vec![3..4, 4..9, 0..1, 20..25]);
/// ```
pub fn parse_led_indices(indices_str: &str, total_n_leds: usize) -> Vec<Range<usize>> {
    if indices_str == "*" {
        vec![0..total_n_leds]
    } else {
        indices_str
            .split(',')
            .map(|index_str| index_str.trim().split('-').collect::<Vec<_>>())
            .filter(|is| (1..=2).contains(&is.len()))
            .filter_map(|index_strs| match index_strs.len() {
                1 => index_strs[0].trim().parse::<usize>().ok().map(|i| i..(i + 1)),
                2 => {
                    let i = index_strs[0].trim().parse::<usize>().ok()?;
                    let j = index_strs[1].trim().parse::<usize>().ok()?;
                    Some(i..(j + 1))
                }
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_led_indices_test() {
        assert_eq!(parse_led_indices("3, 4-8, 0, 20-24", 10), vec![3..4, 4..9, 0..1, 20..25]);
        assert_eq!(parse_led_indices("*", 10), vec![0..10]);
        assert_eq!(parse_led_indices("0, 1 - 5", 10), vec![0..1]);
        assert_eq!(parse_led_indices("1-A", 10), vec![]);
    }

    #[test]
    fn led_spec_rejects_degenerate_region() {
        let bad = LedSpec { hmin: 0.5, hmax: 0.4, vmin: 0.0, vmax: 1.0, group: String::new(), disabled: false };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn strip_comments_drops_comment_lines() {
        let src = "{\n  // a comment\n  \"a\": 1\n}";
        let stripped = strip_json_comments(src);
        assert!(!stripped.contains("comment"));
        assert!(stripped.contains("\"a\": 1"));
    }
}
