//! End-to-end instance scenarios, one per named case in the scenario
//! table: an instance with no sources settles to an all-black frame, and
//! a higher-priority static color wins over a lower-priority effect for
//! its full duration.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use hyperhdr_core::color::{ByteOrder, ColorRgb};
use hyperhdr_core::config::{
    BacklightMode, BlackBarConfig, CalibrationConfig, ColorConfig, DeviceConfig, DriverKind, GrabberConfig,
    InstanceConfig, LedLayoutConfig, LedSpec, SmoothingConfig, SmoothingSetConfig, TemperaturePreset,
};
use hyperhdr_core::decode::PixelFormat;
use hyperhdr_core::driver::{Driver, DriverProperties};
use hyperhdr_core::error::Result;
use hyperhdr_core::image::Image;
use hyperhdr_core::image_to_leds::{LedLayout, ReductionMode};
use hyperhdr_core::instance::Instance;
use hyperhdr_core::perf::PerformanceCounters;

/// Records every frame written to it so tests can assert on the exact
/// sequence of colors a driver receives.
#[derive(Clone)]
struct RecordingDriver {
    frames: Arc<Mutex<Vec<Vec<ColorRgb>>>>,
    write_count: Arc<AtomicUsize>,
}

impl RecordingDriver {
    fn new() -> Self {
        RecordingDriver { frames: Arc::new(Mutex::new(Vec::new())), write_count: Arc::new(AtomicUsize::new(0)) }
    }

    fn last_frame(&self) -> Option<Vec<ColorRgb>> {
        self.frames.lock().last().cloned()
    }

    fn frame_count(&self) -> usize {
        self.write_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Driver for RecordingDriver {
    async fn open(&mut self) -> Result<()> {
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }

    async fn write(&mut self, colors: &[ColorRgb]) -> Result<()> {
        self.frames.lock().push(colors.to_vec());
        self.write_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_properties(&self) -> DriverProperties {
        DriverProperties::default()
    }
}

fn passthrough_color_config() -> ColorConfig {
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

fn fast_instant_smoothing_config() -> SmoothingSetConfig {
    SmoothingSetConfig {
        configs: vec![SmoothingConfig { id: 0, settling_time_ms: 1, update_frequency_hz: 200.0, direct_mode: true }],
    }
}

fn two_led_instance_config(name: &str) -> InstanceConfig {
    InstanceConfig {
        name: name.to_string(),
        leds: LedLayoutConfig {
            leds: vec![
                LedSpec { hmin: 0.0, hmax: 0.5, vmin: 0.0, vmax: 1.0, group: String::new(), disabled: false },
                LedSpec { hmin: 0.5, hmax: 1.0, vmin: 0.0, vmax: 1.0, group: String::new(), disabled: false },
            ],
        },
        color: passthrough_color_config(),
        smoothing: fast_instant_smoothing_config(),
        grabber: GrabberConfig {
            device: String::new(),
            width: 64,
            height: 64,
            fps: 30,
            input: 0,
            pixel_format: PixelFormat::Rgb24,
            qframe: false,
            decimation: 1,
        },
        blackbar: BlackBarConfig { enabled: false, scan_depth: 180, threshold: 4 },
        device: DeviceConfig {
            kind: DriverKind::UdpRaw { host: "127.0.0.1".into(), port: 0 },
            max_retry: 1,
            retry_backoff_ms: 0,
        },
    }
}

fn build_instance(cfg: &InstanceConfig, driver: RecordingDriver) -> Instance {
    let layout = LedLayout::new(cfg.leds.leds.clone(), ReductionMode::Mean);
    Instance::new(0, cfg, layout, Box::new(driver), Arc::new(PerformanceCounters::new()))
}

/// An instance with no registered sources must settle to an all-black
/// frame on its own tick cadence, without ever receiving a capture frame.
#[tokio::test]
async fn boot_to_black_with_no_sources() {
    let cfg = two_led_instance_config("boot-to-black");
    let driver = RecordingDriver::new();
    let instance = build_instance(&cfg, driver.clone());

    let (_capture_tx, capture_rx) = mpsc::channel::<Arc<Image<ColorRgb>>>(1);
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    let handle = tokio::spawn(instance.run(capture_rx, shutdown_rx));

    let deadline = Instant::now() + Duration::from_millis(500);
    while driver.frame_count() == 0 && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let frame = driver.last_frame().expect("instance must write at least one frame within 500ms");
    assert!(frame.iter().all(|c| *c == ColorRgb::BLACK));

    let _ = shutdown_tx.send(());
    let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;
}

/// A priority-30 static red input must stay visible over a priority-50
/// effect input for as long as its timeout holds, and the effect must
/// take over only once the static color's deadline lapses.
#[tokio::test]
async fn static_color_beats_effect_for_its_duration() {
    let cfg = two_led_instance_config("priority-arbitration");
    let driver = RecordingDriver::new();
    let instance = build_instance(&cfg, driver.clone());
    let muxer = instance.muxer();

    let (_capture_tx, capture_rx) = mpsc::channel::<Arc<Image<ColorRgb>>>(1);
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    let handle = tokio::spawn(instance.run(capture_rx, shutdown_rx));

    muxer.register_input(50, "effect", "rainbow", "effects", 0);
    muxer.set_input_colors(50, vec![ColorRgb::new(0, 255, 0), ColorRgb::new(0, 200, 0)], None);

    muxer.register_input(30, "color", "static", "api", 0);
    muxer.set_input_colors(30, vec![ColorRgb::new(255, 0, 0), ColorRgb::new(255, 0, 0)], Some(300));

    tokio::time::sleep(Duration::from_millis(100)).await;
    let frame = driver.last_frame().expect("frame expected while static color is active");
    assert!(frame.iter().all(|c| c.r > c.g), "priority 30 (red) must win over priority 50 (green)");

    tokio::time::sleep(Duration::from_millis(400)).await;
    let frame = driver.last_frame().expect("frame expected after static color expires");
    assert!(frame.iter().all(|c| c.g > c.r), "effect must take over once the static color's timeout lapses");

    let _ = shutdown_tx.send(());
    let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;
}
