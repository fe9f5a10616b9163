//! Instance (§3): one complete pipeline from a decoded image (or any other
//! muxer input) through to a driver write. Each instance owns its
//! sub-components outright; they only ever see the `Instance` back
//! through non-owning references used for signalling (§3 "Ownership").

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{info, instrument, warn};

use crate::color::{ColorRgb, LinearRgb};
use crate::config::InstanceConfig;
use crate::driver::Driver;
use crate::error::Result;
use crate::image::Image;
use crate::image_to_leds::{BlackBarDetector, LedLayout};
use crate::muxer::{ChannelPayload, PriorityMuxer, WATCHDOG_PERIOD};
use crate::perf::PerformanceCounters;
use crate::processing::InfiniteProcessing;
use crate::smoothing::SmoothingSet;

/// Named register of this instance's live component-to-priority bindings,
/// used by the JSON-RPC surface to report "what's currently driving the
/// output" without reaching into the muxer's internals (§3
/// `ComponentRegister`).
#[derive(Default)]
pub struct ComponentRegister {
    visible_priority: AtomicI32,
}

impl ComponentRegister {
    pub fn update(&self, priority: i32) {
        self.visible_priority.store(priority, Ordering::Relaxed);
    }

    pub fn visible_priority(&self) -> i32 {
        self.visible_priority.load(Ordering::Relaxed)
    }
}

pub struct Instance {
    pub name: String,
    pub index: u32,
    led_layout: LedLayout,
    blackbar: BlackBarDetector,
    muxer: Arc<PriorityMuxer>,
    processing: InfiniteProcessing,
    smoothing: SmoothingSet,
    driver: Box<dyn Driver>,
    components: Arc<ComponentRegister>,
    perf: Arc<PerformanceCounters>,
    /// Smallest update period any registered smoothing config asks for;
    /// drives the pipeline's output cadence.
    tick_period: Duration,
}

impl Instance {
    pub fn new(
        index: u32,
        cfg: &InstanceConfig,
        led_layout: LedLayout,
        driver: Box<dyn Driver>,
        perf: Arc<PerformanceCounters>,
    ) -> Self {
        let tick_period = cfg
            .smoothing
            .configs
            .iter()
            .map(|s| Duration::from_secs_f64(1.0 / s.update_frequency_hz.max(1.0)))
            .min()
            .unwrap_or(Duration::from_millis(40));

        Instance {
            name: cfg.name.clone(),
            index,
            led_layout,
            blackbar: BlackBarDetector::new(cfg.blackbar.clone()),
            muxer: Arc::new(PriorityMuxer::new()),
            processing: InfiniteProcessing::new(&cfg.color),
            smoothing: SmoothingSet::new(&cfg.smoothing),
            driver,
            components: Arc::new(ComponentRegister::default()),
            perf,
            tick_period,
        }
    }

    pub fn muxer(&self) -> Arc<PriorityMuxer> {
        Arc::clone(&self.muxer)
    }

    pub fn components(&self) -> Arc<ComponentRegister> {
        Arc::clone(&self.components)
    }

    /// Reduce a decoded capture image through blackbar cropping and the
    /// LED layout, then register it with the grabber's muxer priority.
    pub fn ingest_capture_image(&mut self, image: &Image<ColorRgb>, grabber_priority: i32, timeout_ms: Option<u64>) {
        self.blackbar.process(image);
        let (x_range, y_range) = self.blackbar.current_border().get_ranges(image.width(), image.height());
        let cropped = image.cropped_view(x_range.0, x_range.1, y_range.0, y_range.1);
        let colors = self.led_layout.reduce(&cropped);
        self.muxer.set_input_colors(grabber_priority, colors, timeout_ms);
    }

    /// One full pipeline tick: pull the muxer's currently visible payload,
    /// reduce/smooth/process it, and write it to the driver. Call this on
    /// `tick_period` cadence from the instance's event loop.
    #[instrument(skip(self), fields(instance = %self.name))]
    async fn tick(&mut self, now: Instant) -> Result<()> {
        self.muxer.reselect();
        let priority = self.muxer.visible_priority();
        self.components.update(priority);

        let colors = match self.muxer.visible_payload() {
            Some(ChannelPayload::Colors(c)) => c,
            Some(ChannelPayload::Image(img)) => self.led_layout.reduce(&img),
            Some(ChannelPayload::Inactive) | None => vec![ColorRgb::BLACK; self.led_layout.len().max(1)],
        };

        let smoothing_cfg_id = self.muxer.visible_smoothing_cfg().unwrap_or(0);
        let linear: Vec<LinearRgb> = colors.iter().map(|c| c.to_linear()).collect();
        let smoothed = match self.smoothing.get_mut(smoothing_cfg_id) {
            Some(smoother) => smoother.step(&linear, now),
            None => linear,
        };

        let output = self.processing.process(&smoothed);
        self.driver.write(&output).await?;
        self.perf.record_good();
        Ok(())
    }

    /// Drive this instance's event loop until `shutdown` resolves.
    pub async fn run(mut self, mut capture_rx: mpsc::Receiver<Arc<Image<ColorRgb>>>, mut shutdown: tokio::sync::oneshot::Receiver<()>) {
        const GRABBER_PRIORITY: i32 = 200;
        let mut ticker = tokio::time::interval(self.tick_period);
        let mut watchdog = tokio::time::interval(WATCHDOG_PERIOD);
        self.muxer.register_input(GRABBER_PRIORITY, "grabber", "capture", self.name.clone(), 0);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!(instance = %self.name, "instance shutting down");
                    break;
                }
                Some(image) = capture_rx.recv() => {
                    self.ingest_capture_image(&image, GRABBER_PRIORITY, Some(1000));
                }
                _ = watchdog.tick() => {
                    self.muxer.reselect();
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.tick(Instant::now()).await {
                        warn!(instance = %self.name, error = %e, "pipeline tick failed");
                        self.perf.record_bad();
                    }
                }
            }
        }

        let _ = self.driver.close().await;
    }
}
