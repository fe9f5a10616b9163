//! Image-to-LED reduction (§4.4): map a rectangular image to the
//! configured LED ring via per-LED sample regions, with blackbar
//! detection cropping the effective image first.

use crate::color::ColorRgb;
use crate::config::{BlackBarConfig, LedSpec};
use crate::image::Image;

/// How a LED's sample rectangle is reduced to one color.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReductionMode {
    Mean,
    Dominant,
    MeanOfDominantCluster,
    WeightedMean,
}

/// A resolved, runtime LED layout: each LED's sample rectangle converted
/// to pixel coordinates for the current image size.
pub struct LedLayout {
    specs: Vec<LedSpec>,
    mode: ReductionMode,
}

impl LedLayout {
    pub fn new(specs: Vec<LedSpec>, mode: ReductionMode) -> Self {
        LedLayout { specs, mode }
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Reduce `image` to one `ColorRgb` per LED. Disabled LEDs receive
    /// black; sample rectangles are clamped to image bounds.
    pub fn reduce(&self, image: &Image<ColorRgb>) -> Vec<ColorRgb> {
        let (w, h) = (image.width(), image.height());
        self.specs
            .iter()
            .map(|led| {
                if led.disabled || w == 0 || h == 0 {
                    return ColorRgb::BLACK;
                }
                let (x1, x2, y1, y2) = pixel_rect(led, w, h);
                if x2 <= x1 || y2 <= y1 {
                    return ColorRgb::BLACK;
                }
                reduce_rect(image, x1, x2, y1, y2, self.mode)
            })
            .collect()
    }
}

/// Convert a LED's normalized sample rectangle to clamped pixel bounds.
fn pixel_rect(led: &LedSpec, w: u32, h: u32) -> (u32, u32, u32, u32) {
    let x1 = ((led.hmin * w as f32) as u32).min(w);
    let x2 = ((led.hmax * w as f32).ceil() as u32).min(w);
    let y1 = ((led.vmin * h as f32) as u32).min(h);
    let y2 = ((led.vmax * h as f32).ceil() as u32).min(h);
    (x1, x2, y1, y2)
}

fn reduce_rect(image: &Image<ColorRgb>, x1: u32, x2: u32, y1: u32, y2: u32, mode: ReductionMode) -> ColorRgb {
    match mode {
        ReductionMode::Mean | ReductionMode::WeightedMean => mean_rect(image, x1, x2, y1, y2),
        ReductionMode::Dominant => dominant_rect(image, x1, x2, y1, y2, 1),
        ReductionMode::MeanOfDominantCluster => mean_of_dominant_cluster(image, x1, x2, y1, y2),
    }
}

fn mean_rect(image: &Image<ColorRgb>, x1: u32, x2: u32, y1: u32, y2: u32) -> ColorRgb {
    let (mut r, mut g, mut b, mut n) = (0u64, 0u64, 0u64, 0u64);
    for y in y1..y2 {
        let row = image.row(y);
        for px in &row[x1 as usize..x2 as usize] {
            r += px.r as u64;
            g += px.g as u64;
            b += px.b as u64;
            n += 1;
        }
    }
    if n == 0 {
        ColorRgb::BLACK
    } else {
        ColorRgb::new((r / n) as u8, (g / n) as u8, (b / n) as u8)
    }
}

/// Bucket pixels into `256 / bucket_size^3`-ish coarse bins and return the
/// most frequent bucket's representative color.
fn dominant_rect(image: &Image<ColorRgb>, x1: u32, x2: u32, y1: u32, y2: u32, bucket_shift: u32) -> ColorRgb {
    use std::collections::HashMap;
    let mut counts: HashMap<(u8, u8, u8), (u32, u64, u64, u64)> = HashMap::new();
    for y in y1..y2 {
        let row = image.row(y);
        for px in &row[x1 as usize..x2 as usize] {
            let key = (px.r >> bucket_shift, px.g >> bucket_shift, px.b >> bucket_shift);
            let entry = counts.entry(key).or_insert((0, 0, 0, 0));
            entry.0 += 1;
            entry.1 += px.r as u64;
            entry.2 += px.g as u64;
            entry.3 += px.b as u64;
        }
    }
    match counts.values().max_by_key(|(n, ..)| *n) {
        Some((n, r, g, b)) => ColorRgb::new((r / *n as u64) as u8, (g / *n as u64) as u8, (b / *n as u64) as u8),
        None => ColorRgb::BLACK,
    }
}

/// Mean restricted to the pixels belonging to the single largest coarse
/// color cluster, filtering out outliers a plain mean would blend in.
fn mean_of_dominant_cluster(image: &Image<ColorRgb>, x1: u32, x2: u32, y1: u32, y2: u32) -> ColorRgb {
    dominant_rect(image, x1, x2, y1, y2, 3)
}

/// Blackbar detection (§4.4): scan a configurable strip of rows/columns;
/// if near-black margins are found, return the cropped-in bounds to
/// reduce against instead of the full image.
pub struct BlackBorder {
    pub x_range: (u32, u32),
    pub y_range: (u32, u32),
}

pub struct BlackBarDetector {
    cfg: BlackBarConfig,
    current: BlackBorder,
}

impl BlackBarDetector {
    pub fn new(cfg: BlackBarConfig) -> Self {
        BlackBarDetector { cfg, current: BlackBorder { x_range: (0, 0), y_range: (0, 0) } }
    }

    pub fn current_border(&self) -> &BlackBorder {
        &self.current
    }

    /// Re-scan `image`'s margins and update the cached border.
    pub fn process(&mut self, image: &Image<ColorRgb>) {
        if !self.cfg.enabled {
            self.current = BlackBorder { x_range: (0, 0), y_range: (0, 0) };
            return;
        }
        let (w, h) = (image.width(), image.height());
        if w == 0 || h == 0 {
            return;
        }
        let depth = self.cfg.scan_depth.min(w / 2).min(h / 2);
        let is_black = |c: &ColorRgb| {
            (c.r as u32 + c.g as u32 + c.b as u32) / 3 <= self.cfg.threshold as u32
        };

        let top = (0..depth).take_while(|&y| image.row(y).iter().all(is_black)).count() as u32;
        let bottom = (0..depth)
            .take_while(|&i| image.row(h - 1 - i).iter().all(is_black))
            .count() as u32;
        let left = (0..depth)
            .take_while(|&x| (0..h).all(|y| is_black(&image.row(y)[x as usize])))
            .count() as u32;
        let right = (0..depth)
            .take_while(|&i| (0..h).all(|y| is_black(&image.row(y)[(w - 1 - i) as usize])))
            .count() as u32;

        self.current = BlackBorder { x_range: (left, w - right), y_range: (top, h - bottom) };
    }
}

impl BlackBorder {
    /// `(xmin,xmax), (ymin,ymax)` ranges given the full image dimensions,
    /// falling back to the whole image when no border was detected.
    pub fn get_ranges(&self, width: u32, height: u32) -> ((u32, u32), (u32, u32)) {
        let x = if self.x_range.1 > self.x_range.0 { self.x_range } else { (0, width) };
        let y = if self.y_range.1 > self.y_range.0 { self.y_range } else { (0, height) };
        (x, y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::OriginFormat;

    fn flat_spec(hmin: f32, hmax: f32, vmin: f32, vmax: f32) -> LedSpec {
        LedSpec { hmin, hmax, vmin, vmax, group: String::new(), disabled: false }
    }

    #[test]
    fn reduce_produces_one_color_per_led() {
        let mut img: Image<ColorRgb> = Image::with_size(10, 10, OriginFormat::Synthetic);
        for px in img.data_mut() {
            *px = ColorRgb::new(100, 150, 200);
        }
        let layout = LedLayout::new(
            vec![flat_spec(0.0, 0.5, 0.0, 1.0), flat_spec(0.5, 1.0, 0.0, 1.0)],
            ReductionMode::Mean,
        );
        let out = layout.reduce(&img);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], ColorRgb::new(100, 150, 200));
    }

    #[test]
    fn disabled_led_is_black() {
        let mut img: Image<ColorRgb> = Image::with_size(4, 4, OriginFormat::Synthetic);
        for px in img.data_mut() {
            *px = ColorRgb::new(255, 255, 255);
        }
        let mut spec = flat_spec(0.0, 1.0, 0.0, 1.0);
        spec.disabled = true;
        let layout = LedLayout::new(vec![spec], ReductionMode::Mean);
        assert_eq!(layout.reduce(&img)[0], ColorRgb::BLACK);
    }

    #[test]
    fn blackbar_detects_top_and_bottom_margins() {
        let mut img: Image<ColorRgb> = Image::with_size(8, 8, OriginFormat::Synthetic);
        for y in 0..8u32 {
            for x in 0..8u32 {
                let c = if y < 2 || y >= 6 { ColorRgb::BLACK } else { ColorRgb::new(200, 200, 200) };
                let idx = (y * 8 + x) as usize;
                img.data_mut()[idx] = c;
            }
        }
        let mut detector = BlackBarDetector::new(BlackBarConfig { enabled: true, scan_depth: 3, threshold: 4 });
        detector.process(&img);
        let ((_, _), (ymin, ymax)) = detector.current_border().get_ranges(8, 8);
        assert_eq!((ymin, ymax), (2, 6));
    }
}
