//! Screen-capture grabber backed by `captrs` (§4.1), the crate the
//! original prototype pulled in for its `Bgr8` pixel type. `captrs` is a
//! blocking, synchronous API, so every capture call runs inside
//! `spawn_blocking` to keep the async event loop free.

use std::sync::Arc;

use async_trait::async_trait;
use captrs::Capturer;
use tokio::sync::broadcast;

use crate::decode::PixelFormat;
use crate::error::{HyperError, Result};

use super::{DeviceInfo, DeviceMode, Grabber, RawFrame, RequestedMode};

pub struct ScreenGrabber {
    display: usize,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl ScreenGrabber {
    pub fn new(display: usize) -> Self {
        ScreenGrabber { display, task: None }
    }
}

#[async_trait]
impl Grabber for ScreenGrabber {
    async fn enumerate(&self) -> Result<Vec<DeviceInfo>> {
        let display = self.display;
        let geometry = tokio::task::spawn_blocking(move || {
            Capturer::new(display).map(|mut c| c.geometry())
        })
        .await
        .map_err(|e| HyperError::internal(format!("capturer probe task panicked: {e}")))?
        .map_err(|e| HyperError::FatalDevice(format!("failed to open display {display}: {e}")))?;

        Ok(vec![DeviceInfo {
            device_key: format!("display:{display}"),
            friendly_name: format!("Screen {display}"),
            inputs: vec![0],
            valid_modes: vec![DeviceMode {
                width: geometry.0 as u32,
                height: geometry.1 as u32,
                fps: 60,
                format: PixelFormat::Rgb24,
                input: 0,
            }],
        }])
    }

    async fn start(&mut self, requested: RequestedMode) -> Result<broadcast::Receiver<RawFrame>> {
        let display = self.display;
        let (tx, rx) = broadcast::channel(4);
        let tx_clone = tx.clone();
        let fps = requested.fps.max(1);
        let period = std::time::Duration::from_secs_f64(1.0 / fps as f64);

        let mut capturer = tokio::task::spawn_blocking(move || Capturer::new(display))
            .await
            .map_err(|e| HyperError::internal(format!("capturer open task panicked: {e}")))?
            .map_err(|e| HyperError::FatalDevice(format!("failed to open display {display}: {e}")))?;

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let captured = tokio::task::spawn_blocking(move || {
                    let frame = capturer.capture_frame();
                    (capturer, frame)
                })
                .await;

                let (returned, frame_result) = match captured {
                    Ok(pair) => pair,
                    Err(_) => break,
                };
                capturer = returned;

                let pixels = match frame_result {
                    Ok(p) => p,
                    Err(_) => {
                        // Transient read errors retry on the next tick per
                        // the 3-second re-entry rule (§4.1); we just skip
                        // this frame instead of restarting immediately.
                        continue;
                    }
                };

                let (w, h) = capturer.geometry();
                let mut data = Vec::with_capacity(pixels.len() * 3);
                for px in &pixels {
                    data.extend_from_slice(&[px.r, px.g, px.b]);
                }

                let frame = RawFrame {
                    data: Arc::new(data),
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

        self.task = Some(task);
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        Ok(())
    }
}
