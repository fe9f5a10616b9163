//! Instance Manager (§3): owns every [`Instance`] in the process, exposed
//! through a map keyed by instance index. Exclusively owns each instance;
//! lifecycle transitions are the only mutation a caller can make from
//! outside the instance's own event loop.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, oneshot};
use tracing::{info, instrument};

use crate::config::Config;
use crate::driver::{http, hue, udp, yeelight, Driver};
use crate::config::DriverKind;
use crate::error::{HyperError, Result};
use crate::image_to_leds::{LedLayout, ReductionMode};
use crate::instance::Instance;
use crate::perf::PerformanceCounters;

#[cfg(feature = "serial-driver")]
use crate::driver::serial;

/// Lifecycle state of one managed instance (§3).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstanceState {
    Created,
    Starting,
    Running,
    Stopping,
    Stopped,
    Errored,
}

struct ManagedInstance {
    config: crate::config::InstanceConfig,
    state: InstanceState,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<tokio::task::JoinHandle<()>>,
    perf: Arc<PerformanceCounters>,
}

pub struct InstanceManager {
    instances: Mutex<HashMap<u32, ManagedInstance>>,
    state_tx: broadcast::Sender<(u32, InstanceState)>,
}

impl Default for InstanceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl InstanceManager {
    pub fn new() -> Self {
        let (state_tx, _) = broadcast::channel(64);
        InstanceManager { instances: Mutex::new(HashMap::new()), state_tx }
    }

    pub fn subscribe_state_changes(&self) -> broadcast::Receiver<(u32, InstanceState)> {
        self.state_tx.subscribe()
    }

    fn set_state(&self, index: u32, state: InstanceState) {
        if let Some(m) = self.instances.lock().get_mut(&index) {
            m.state = state;
        }
        let _ = self.state_tx.send((index, state));
    }

    pub fn state_of(&self, index: u32) -> Option<InstanceState> {
        self.instances.lock().get(&index).map(|m| m.state)
    }

    /// Build a driver from its declared configuration. Grounded in
    /// `DriverKind`'s variants (§4.7): each kind maps to exactly one
    /// concrete driver type.
    fn build_driver(kind: &DriverKind) -> Result<Box<dyn Driver>> {
        Ok(match kind {
            DriverKind::UdpRaw { host, port } => {
                Box::new(udp::UdpRawDriver::new(host.clone(), *port, Default::default()))
            }
            DriverKind::Sacn { host, universe } => Box::new(udp::SacnDriver::new(host.clone(), *universe)),
            DriverKind::ArtNet { host, universe } => Box::new(udp::ArtNetDriver::new(host.clone(), *universe)),
            DriverKind::Tpm2Net { host, port } => Box::new(udp::Tpm2NetDriver::new(host.clone(), *port)),
            DriverKind::WledWarls { host, port, timeout_s } => {
                Box::new(udp::WledWarlsDriver::new(host.clone(), *port, *timeout_s))
            }
            DriverKind::WledHttp { host } => Box::new(http::WledHttpDriver::new(host.clone())),
            DriverKind::NanoleafRest { host, auth_token } => {
                Box::new(http::NanoleafRestDriver::new(host.clone(), auth_token.clone()))
            }
            DriverKind::NanoleafStreaming { host, port, psk } => {
                Box::new(udp::NanoleafStreamingDriver::new(host.clone(), *port, psk.clone()))
            }
            DriverKind::HueEntertainment { bridge_host, username, client_key, group_id } => Box::new(
                hue::HueEntertainmentDriver::new(bridge_host.clone(), username.clone(), client_key.clone(), group_id.clone()),
            ),
            DriverKind::Yeelight { host, port } => Box::new(yeelight::YeelightDriver::new(host.clone(), *port)),
            #[cfg(feature = "serial-driver")]
            DriverKind::SerialAdalight { tty, baud } => Box::new(serial::SerialAdalightDriver::new(tty.clone(), *baud)),
            #[cfg(not(feature = "serial-driver"))]
            DriverKind::SerialAdalight { .. } => {
                return Err(HyperError::config(
                    "serial-adalight device configured but the serial-driver feature is not enabled",
                ))
            }
        })
    }

    /// Register, but do not start, every instance declared in `cfg`.
    /// Validates each LED layout up front so a bad config is rejected
    /// before any driver connection is attempted.
    #[instrument(skip(self, cfg))]
    pub fn load_config(&self, cfg: &Config) -> Result<()> {
        let mut instances = self.instances.lock();
        for (index, instance_cfg) in cfg.instances.iter().enumerate() {
            let index = index as u32;
            instance_cfg.leds.leds.iter().try_for_each(|l| l.validate())?;

            let perf = Arc::new(PerformanceCounters::new());
            instances.insert(
                index,
                ManagedInstance {
                    config: instance_cfg.clone(),
                    state: InstanceState::Created,
                    shutdown_tx: None,
                    task: None,
                    perf,
                },
            );
        }
        Ok(())
    }

    /// Build the real [`Instance`] for a loaded config and start its event
    /// loop as a background task, feeding it decoded frames from
    /// `capture_rx`.
    pub fn start_instance(
        &self,
        index: u32,
        capture_rx: tokio::sync::mpsc::Receiver<Arc<crate::image::Image<crate::color::ColorRgb>>>,
    ) -> Result<()> {
        self.set_state(index, InstanceState::Starting);
        let (tx, rx) = oneshot::channel();

        let mut instances = self.instances.lock();
        let entry = instances
            .get_mut(&index)
            .ok_or_else(|| HyperError::internal(format!("instance {index} not registered")))?;

        let driver = Self::build_driver(&entry.config.device.kind)?;
        let layout = LedLayout::new(entry.config.leds.leds.clone(), ReductionMode::Mean);
        let instance = Instance::new(index, &entry.config, layout, driver, Arc::clone(&entry.perf));

        entry.shutdown_tx = Some(tx);

        let state_tx = self.state_tx.clone();
        let task = tokio::spawn(async move {
            instance.run(capture_rx, rx).await;
            let _ = state_tx.send((index, InstanceState::Stopped));
        });
        entry.task = Some(task);
        drop(instances);

        self.set_state(index, InstanceState::Running);
        info!(index, "instance started");
        Ok(())
    }

    pub fn stop_instance(&self, index: u32) -> Result<()> {
        self.set_state(index, InstanceState::Stopping);
        let mut instances = self.instances.lock();
        let entry = instances
            .get_mut(&index)
            .ok_or_else(|| HyperError::internal(format!("instance {index} not registered")))?;
        if let Some(tx) = entry.shutdown_tx.take() {
            let _ = tx.send(());
        }
        Ok(())
    }

    pub fn delete_instance(&self, index: u32) -> Result<()> {
        self.stop_instance(index).ok();
        self.instances.lock().remove(&index);
        Ok(())
    }

    pub fn stop_all(&self) {
        let indices: Vec<u32> = self.instances.lock().keys().copied().collect();
        for i in indices {
            let _ = self.stop_instance(i);
        }
    }

    pub fn instance_count(&self) -> usize {
        self.instances.lock().len()
    }

    pub fn perf_of(&self, index: u32) -> Option<Arc<PerformanceCounters>> {
        self.instances.lock().get(&index).map(|m| Arc::clone(&m.perf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::*;

    fn minimal_config() -> Config {
        Config {
            instances: vec![InstanceConfig {
                name: "test".into(),
                leds: LedLayoutConfig {
                    leds: vec![LedSpec { hmin: 0.0, hmax: 1.0, vmin: 0.0, vmax: 1.0, group: String::new(), disabled: false }],
                },
                color: ColorConfig::default(),
                smoothing: SmoothingSetConfig::default(),
                grabber: GrabberConfig::default(),
                blackbar: BlackBarConfig::default(),
                device: DeviceConfig {
                    kind: DriverKind::UdpRaw { host: "127.0.0.1".into(), port: 19446 },
                    max_retry: 3,
                    retry_backoff_ms: 1000,
                },
            }],
        }
    }

    #[test]
    fn load_config_registers_instances_in_created_state() {
        let mgr = InstanceManager::new();
        mgr.load_config(&minimal_config()).unwrap();
        assert_eq!(mgr.instance_count(), 1);
        assert_eq!(mgr.state_of(0), Some(InstanceState::Created));
    }

    #[test]
    fn serial_driver_without_feature_is_a_config_error() {
        #[cfg(not(feature = "serial-driver"))]
        {
            let err = InstanceManager::build_driver(&DriverKind::SerialAdalight { tty: "/dev/ttyUSB0".into(), baud: 115200 });
            assert!(err.is_err());
        }
    }
}
