//! Decode worker pool (§4.1 "Worker pool"): a bounded set of tokio tasks,
//! each decoding one raw frame end-to-end (§4.2) before emitting the
//! result. When every worker is busy the current frame is dropped and the
//! `badFrame` counter increments — the pipeline never blocks the capture
//! producer waiting for a slot.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, Semaphore};

use crate::color::ColorRgb;
use crate::decode::lut::Lut;
use crate::decode::{self, Crop, DecodeRequest};
use crate::image::Image;
use crate::perf::PerformanceCounters;

use super::RawFrame;

/// Per-instance decode request shaping: crop, LUT, tone-mapping, qframe
/// and the software frame-skip factor (§4.1 "decimation").
#[derive(Clone)]
pub struct DecodeSettings {
    pub crop: Crop,
    pub lut: Option<Arc<Lut>>,
    pub tone_mapping: bool,
    pub qframe: bool,
    pub decimation: u32,
}

impl Default for DecodeSettings {
    fn default() -> Self {
        DecodeSettings { crop: Crop::default(), lut: None, tone_mapping: false, qframe: false, decimation: 1 }
    }
}

/// Spawn a worker pool consuming `raw_rx`, decoding frames concurrently
/// (bounded by `concurrency`), and forwarding decoded images on the
/// returned channel. Decimation drops `decimation - 1` out of every
/// `decimation` raw frames before they ever reach a worker.
pub fn spawn_decode_pool(
    mut raw_rx: broadcast::Receiver<RawFrame>,
    settings: DecodeSettings,
    concurrency: usize,
    perf: Arc<PerformanceCounters>,
) -> mpsc::Receiver<Arc<Image<ColorRgb>>> {
    let (out_tx, out_rx) = mpsc::channel(4);
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));

    tokio::spawn(async move {
        let mut skip_counter: u32 = 0;
        loop {
            let frame = match raw_rx.recv().await {
                Ok(f) => f,
                Err(broadcast::error::RecvError::Closed) => break,
                // A lagged receiver already represents dropped frames;
                // count them as bad and keep going from the newest one.
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    for _ in 0..n {
                        perf.record_bad();
                    }
                    continue;
                }
            };

            skip_counter += 1;
            if settings.decimation > 1 && skip_counter % settings.decimation != 0 {
                continue;
            }

            let permit = match Arc::clone(&semaphore).try_acquire_owned() {
                Ok(p) => p,
                Err(_) => {
                    perf.record_bad();
                    continue;
                }
            };

            let settings = settings.clone();
            let out_tx = out_tx.clone();
            let perf = Arc::clone(&perf);

            tokio::spawn(async move {
                let _permit = permit;
                let result = tokio::task::spawn_blocking(move || {
                    let req = DecodeRequest {
                        raw: &frame.data,
                        format: frame.format,
                        width: frame.width,
                        height: frame.height,
                        stride: frame.stride,
                        crop: settings.crop,
                        tone_mapping: settings.tone_mapping,
                        qframe: settings.qframe,
                    };
                    decode::decode(&req, settings.lut.as_deref())
                })
                .await;

                match result {
                    Ok(Ok(image)) => {
                        perf.record_good();
                        let _ = out_tx.send(Arc::new(image)).await;
                    }
                    _ => perf.record_bad(),
                }
            });
        }
    });

    out_rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::PixelFormat;

    #[tokio::test]
    async fn decoded_frames_flow_through_the_pool() {
        let (tx, rx) = broadcast::channel(4);
        let perf = Arc::new(PerformanceCounters::new());
        let mut out = spawn_decode_pool(rx, DecodeSettings::default(), 2, Arc::clone(&perf));

        let frame = RawFrame {
            data: Arc::new(vec![10u8, 20, 30, 10, 20, 30, 10, 20, 30, 10, 20, 30]),
            width: 2,
            height: 2,
            stride: 6,
            format: PixelFormat::Rgb24,
            timestamp: std::time::Instant::now(),
        };
        tx.send(frame).unwrap();
        drop(tx);

        let img = out.recv().await.unwrap();
        assert_eq!(img.width(), 2);
        assert_eq!(img.height(), 2);
        assert_eq!(perf.snapshot().good_frame, 1);
    }

    #[tokio::test]
    async fn decimation_drops_intermediate_frames() {
        let (tx, rx) = broadcast::channel(8);
        let perf = Arc::new(PerformanceCounters::new());
        let settings = DecodeSettings { decimation: 2, ..Default::default() };
        let mut out = spawn_decode_pool(rx, settings, 2, Arc::clone(&perf));

        for _ in 0..4 {
            let frame = RawFrame {
                data: Arc::new(vec![0u8; 2 * 2 * 3]),
                width: 2,
                height: 2,
                stride: 6,
                format: PixelFormat::Rgb24,
                timestamp: std::time::Instant::now(),
            };
            tx.send(frame).unwrap();
        }
        drop(tx);

        let mut count = 0;
        while out.recv().await.is_some() {
            count += 1;
        }
        assert_eq!(count, 2);
    }
}
