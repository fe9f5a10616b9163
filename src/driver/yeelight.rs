//! Yeelight driver (§4.7): a plain TCP JSON-RPC control socket, optionally
//! upgraded to "music mode" — the bulb opens a second TCP connection back
//! to us and then accepts a raw stream of JSON commands with no
//! rate limit. Direct JSON-RPC calls are capped at the bulb's documented
//! quota (Open Question resolved via the generic `DeviceQuota` error kind
//! in §7).

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};

use crate::color::ColorRgb;
use crate::error::{HyperError, Result};

use super::{Driver, DriverProperties};

/// Yeelight's documented direct-control rate limit: no more than one
/// command per this interval outside of music mode.
const DIRECT_MODE_MIN_INTERVAL: Duration = Duration::from_millis(1000);

const MUSIC_MODE_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Opened,
    JsonCommand,
    AwaitReverseConnect,
    MusicStreaming,
}

pub struct YeelightDriver {
    host: String,
    port: u16,
    control: Option<TcpStream>,
    state: State,
    music_stream: Option<TcpStream>,
    last_direct_write: Option<Instant>,
    request_id: u64,
}

impl YeelightDriver {
    pub fn new(host: String, port: u16) -> Self {
        YeelightDriver {
            host,
            port,
            control: None,
            state: State::Opened,
            music_stream: None,
            last_direct_write: None,
            request_id: 0,
        }
    }

    fn next_id(&mut self) -> u64 {
        self.request_id = self.request_id.wrapping_add(1);
        self.request_id
    }

    async fn send_command(stream: &mut TcpStream, payload: &serde_json::Value) -> Result<()> {
        let mut line = serde_json::to_vec(payload).map_err(|e| HyperError::internal(format!("bad yeelight payload: {e}")))?;
        line.extend_from_slice(b"\r\n");
        stream
            .write_all(&line)
            .await
            .map_err(|e| HyperError::TransientIo(format!("yeelight write failed: {e}")))
    }

    /// Ask the bulb to open a reverse TCP connection to `local_addr` for
    /// streaming; succeeds once we actually accept that connection within
    /// [`MUSIC_MODE_CONNECT_TIMEOUT`], otherwise falls back to direct mode.
    async fn try_enter_music_mode(&mut self) -> Result<()> {
        let listener = TcpListener::bind("0.0.0.0:0")
            .await
            .map_err(|e| HyperError::TransientIo(format!("music-mode listener bind failed: {e}")))?;
        let local_addr: SocketAddr = listener
            .local_addr()
            .map_err(|e| HyperError::internal(format!("listener has no local addr: {e}")))?;

        let control = self.control.as_mut().ok_or_else(|| HyperError::internal("yeelight control socket not open"))?;
        let id = self.next_id();
        Self::send_command(
            control,
            &json!({ "id": id, "method": "set_music", "params": [1, local_addr.ip().to_string(), local_addr.port()] }),
        )
        .await?;

        self.state = State::AwaitReverseConnect;
        let accepted = tokio::time::timeout(MUSIC_MODE_CONNECT_TIMEOUT, listener.accept()).await;
        match accepted {
            Ok(Ok((stream, _))) => {
                self.music_stream = Some(stream);
                self.state = State::MusicStreaming;
                Ok(())
            }
            _ => {
                self.state = State::JsonCommand;
                Err(HyperError::TransientIo("bulb did not open reverse music-mode connection in time".into()))
            }
        }
    }

    fn set_rgb_command(&mut self, color: ColorRgb) -> serde_json::Value {
        let rgb_int = ((color.r as u32) << 16) | ((color.g as u32) << 8) | color.b as u32;
        let id = self.next_id();
        json!({ "id": id, "method": "set_rgb", "params": [rgb_int, "smooth", 50] })
    }
}

#[async_trait]
impl Driver for YeelightDriver {
    async fn open(&mut self) -> Result<()> {
        let target = format!("{}:{}", self.host, self.port);
        let stream = TcpStream::connect(&target)
            .await
            .map_err(|e| HyperError::TransientIo(format!("yeelight connect failed: {e}")))?;
        self.control = Some(stream);
        self.state = State::Opened;

        // Music mode is an optimization, not a requirement: a failure here
        // just leaves us in direct JSON-command mode.
        let _ = self.try_enter_music_mode().await;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.music_stream = None;
        self.control = None;
        self.state = State::Opened;
        Ok(())
    }

    async fn write(&mut self, colors: &[ColorRgb]) -> Result<()> {
        let color = colors.first().copied().unwrap_or(ColorRgb::BLACK);

        if self.state == State::MusicStreaming {
            let cmd = self.set_rgb_command(color);
            let stream = self.music_stream.as_mut().ok_or_else(|| HyperError::internal("music stream missing in MusicStreaming state"))?;
            return Self::send_command(stream, &cmd).await;
        }

        let now = Instant::now();
        if let Some(last) = self.last_direct_write {
            if now.duration_since(last) < DIRECT_MODE_MIN_INTERVAL {
                return Err(HyperError::DeviceQuota("yeelight direct-mode rate limit (1 cmd/s) exceeded".into()));
            }
        }
        let cmd = self.set_rgb_command(color);
        let control = self.control.as_mut().ok_or_else(|| HyperError::internal("yeelight control socket not open"))?;
        Self::send_command(control, &cmd).await?;
        self.last_direct_write = Some(now);
        self.state = State::JsonCommand;
        Ok(())
    }

    async fn switch_on(&mut self) -> Result<()> {
        let id = self.next_id();
        let control = self.control.as_mut().ok_or_else(|| HyperError::internal("yeelight control socket not open"))?;
        Self::send_command(control, &json!({ "id": id, "method": "set_power", "params": ["on", "smooth", 50] })).await
    }

    async fn switch_off(&mut self) -> Result<()> {
        let id = self.next_id();
        let control = self.control.as_mut().ok_or_else(|| HyperError::internal("yeelight control socket not open"))?;
        Self::send_command(control, &json!({ "id": id, "method": "set_power", "params": ["off", "smooth", 50] })).await
    }

    async fn get_properties(&self) -> DriverProperties {
        DriverProperties { name: "yeelight".into(), ..Default::default() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_rgb_packs_channels_into_one_integer() {
        let mut d = YeelightDriver::new("127.0.0.1".into(), 55443);
        let cmd = d.set_rgb_command(ColorRgb::new(0x12, 0x34, 0x56));
        assert_eq!(cmd["params"][0], 0x123456);
    }

    #[test]
    fn request_ids_increment() {
        let mut d = YeelightDriver::new("127.0.0.1".into(), 55443);
        let a = d.next_id();
        let b = d.next_id();
        assert_eq!(b, a + 1);
    }
}
