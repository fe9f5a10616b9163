//! Capture Grabbers (§4.1): enumerate OS capture devices, open one at a
//! requested mode, and fan raw frames out to subscribers. The real
//! backends (screen, DMA-BUF) are feature-gated; [`TestPatternGrabber`] is
//! always available and needs no OS capture API, which is what both the
//! integration tests and a headless deployment fall back to.

#[cfg(feature = "dma-buf")]
pub mod dmabuf;
#[cfg(feature = "screen-capture")]
pub mod screen;
pub mod worker;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::decode::PixelFormat;
use crate::error::Result;

/// One mode a device can be opened in.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DeviceMode {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub format: PixelFormat,
    pub input: u32,
}

#[derive(Clone, Debug)]
pub struct DeviceInfo {
    pub device_key: String,
    pub friendly_name: String,
    pub inputs: Vec<u32>,
    pub valid_modes: Vec<DeviceMode>,
}

/// A requested capture configuration; may not exactly match any declared
/// mode, in which case [`select_mode`] picks the closest one.
#[derive(Clone, Copy, Debug)]
pub struct RequestedMode {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub format: PixelFormat,
    pub input: u32,
}

/// One decoded (or raw, pre-decode) frame delivered to subscribers.
#[derive(Clone, Debug)]
pub struct RawFrame {
    pub data: std::sync::Arc<Vec<u8>>,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub format: PixelFormat,
    pub timestamp: std::time::Instant,
}

/// Mode selection (§4.1): a strict match wins outright; otherwise fall
/// back to the best-guess rule over the smallest-width candidates.
pub fn select_mode(modes: &[DeviceMode], requested: &RequestedMode) -> Option<DeviceMode> {
    if let Some(m) = modes.iter().find(|m| {
        m.width == requested.width
            && m.height == requested.height
            && m.fps == requested.fps
            && m.format == requested.format
            && m.input == requested.input
    }) {
        return Some(*m);
    }

    let candidates: Vec<&DeviceMode> = modes.iter().filter(|m| m.width >= 640).collect();
    if candidates.is_empty() {
        return None;
    }
    let min_width = candidates.iter().map(|m| m.width).min().unwrap();
    let narrowest: Vec<&DeviceMode> = candidates.into_iter().filter(|m| m.width == min_width).collect();

    let best = if min_width > 800 {
        narrowest.iter().min_by_key(|m| if m.fps >= 10 { m.fps } else { u32::MAX }).copied()
    } else {
        narrowest.iter().max_by_key(|m| m.fps).copied()
    };
    best.copied()
}

/// A capture backend: screen, V4L2 device, or a synthetic source (§4.1).
#[async_trait]
pub trait Grabber: Send + Sync {
    async fn enumerate(&self) -> Result<Vec<DeviceInfo>>;

    /// Open the closest-matching mode and begin emitting frames on the
    /// returned broadcast channel.
    async fn start(&mut self, requested: RequestedMode) -> Result<broadcast::Receiver<RawFrame>>;

    async fn stop(&mut self) -> Result<()>;

    async fn set_brightness(&mut self, _value: i32) -> Result<()> {
        Ok(())
    }
    async fn set_contrast(&mut self, _value: i32) -> Result<()> {
        Ok(())
    }
    async fn set_saturation(&mut self, _value: i32) -> Result<()> {
        Ok(())
    }
    async fn set_hue(&mut self, _value: i32) -> Result<()> {
        Ok(())
    }
}

/// Generates a deterministic moving gradient at the requested mode; no OS
/// dependency, usable in tests and on hosts with no real capture device.
pub struct TestPatternGrabber {
    tx: Option<broadcast::Sender<RawFrame>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl Default for TestPatternGrabber {
    fn default() -> Self {
        Self::new()
    }
}

impl TestPatternGrabber {
    pub fn new() -> Self {
        TestPatternGrabber { tx: None, task: None }
    }
}

#[async_trait]
impl Grabber for TestPatternGrabber {
    async fn enumerate(&self) -> Result<Vec<DeviceInfo>> {
        Ok(vec![DeviceInfo {
            device_key: "test-pattern".into(),
            friendly_name: "Synthetic test pattern".into(),
            inputs: vec![0],
            valid_modes: vec![DeviceMode { width: 1280, height: 720, fps: 30, format: PixelFormat::Rgb24, input: 0 }],
        }])
    }

    async fn start(&mut self, requested: RequestedMode) -> Result<broadcast::Receiver<RawFrame>> {
        let (tx, rx) = broadcast::channel(4);
        let tx_clone = tx.clone();
        let (w, h, fps) = (requested.width.max(1), requested.height.max(1), requested.fps.max(1));
        let period = std::time::Duration::from_secs_f64(1.0 / fps as f64);

        let task = tokio::spawn(async move {
            let mut phase: u8 = 0;
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let mut data = vec![0u8; (w * h * 3) as usize];
                for (i, px) in data.chunks_mut(3).enumerate() {
                    let x = (i as u32 % w) as u8;
                    px[0] = x.wrapping_add(phase);
                    px[1] = phase;
                    px[2] = 255u8.wrapping_sub(phase);
                }
                phase = phase.wrapping_add(1);
                let frame = RawFrame {
                    data: std::sync::Arc::new(data),
                    width: w,
                    height: h,
                    stride: w * 3,
                    format: PixelFormat::Rgb24,
                    timestamp: std::time::Instant::now(),
                };
                if tx_clone.send(frame).is_err() {
                    break;
                }
            }
        });

        self.tx = Some(tx);
        self.task = Some(task);
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.tx = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mode(w: u32, h: u32, fps: u32) -> DeviceMode {
        DeviceMode { width: w, height: h, fps, format: PixelFormat::Rgb24, input: 0 }
    }

    #[test]
    fn strict_match_wins_outright() {
        let modes = vec![mode(1920, 1080, 60), mode(1280, 720, 30)];
        let req = RequestedMode { width: 1280, height: 720, fps: 30, format: PixelFormat::Rgb24, input: 0 };
        assert_eq!(select_mode(&modes, &req), Some(mode(1280, 720, 30)));
    }

    #[test]
    fn best_guess_prefers_smallest_width_above_800_with_fps_at_least_10() {
        let modes = vec![mode(1920, 1080, 5), mode(1920, 1080, 15), mode(3840, 2160, 30)];
        let req = RequestedMode { width: 999, height: 999, fps: 999, format: PixelFormat::Mjpeg, input: 9 };
        assert_eq!(select_mode(&modes, &req), Some(mode(1920, 1080, 15)));
    }

    #[test]
    fn best_guess_prefers_largest_fps_at_or_below_800_width() {
        let modes = vec![mode(640, 480, 15), mode(640, 480, 30)];
        let req = RequestedMode { width: 1, height: 1, fps: 1, format: PixelFormat::Rgb24, input: 1 };
        assert_eq!(select_mode(&modes, &req), Some(mode(640, 480, 30)));
    }

    #[test]
    fn modes_below_640_width_are_excluded() {
        let modes = vec![mode(320, 240, 30)];
        let req = RequestedMode { width: 1, height: 1, fps: 1, format: PixelFormat::Rgb24, input: 0 };
        assert_eq!(select_mode(&modes, &req), None);
    }

    #[tokio::test]
    async fn test_pattern_grabber_emits_frames() {
        let mut g = TestPatternGrabber::new();
        let mut rx = g
            .start(RequestedMode { width: 16, height: 16, fps: 200, format: PixelFormat::Rgb24, input: 0 })
            .await
            .unwrap();
        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.width, 16);
        assert_eq!(frame.data.len(), 16 * 16 * 3);
        g.stop().await.unwrap();
    }
}
