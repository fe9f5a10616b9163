//! Philips Hue Entertainment driver (§4.7): streams over a PSK-encrypted
//! UDP session to a Hue bridge. The real protocol is DTLS 1.2 with a
//! pre-shared key; we model its session-key derivation and per-packet
//! AEAD framing with `hkdf`+`sha2`+`aes-gcm` rather than a full RFC 6347
//! state machine (see DESIGN.md).
//!
//! Connection goes through the state machine the bridge's REST API
//! requires before streaming can start (§3, §8 scenario 5): probe the
//! bridge's API version once and commit to it, authorize, check the
//! entertainment group exists, stop any stale stream, then start one.

use std::net::SocketAddr;
use std::time::Duration;

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes128Gcm, Nonce};
use async_trait::async_trait;
use hkdf::Hkdf;
use sha2::Sha256;
use tokio::net::UdpSocket;

use crate::color::{ColorRgb, ColorXyb};
use crate::error::{HyperError, Result};

use super::{Driver, DriverProperties, RetryPolicy};

const HUE_STREAM_PORT: u16 = 2100;

/// Which Hue Bridge API generation we've committed to after probing once.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ApiGeneration {
    /// CLIP v2 (`/clip/v2/...`, modern bridges, firmware >= 1948086000).
    V2,
    /// Legacy CLIP v1 (`/api/...`), used by bridges that 404 on v2.
    V1,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Disconnected,
    RestQuery,
    Authorize,
    GroupCheck,
    StopStream,
    StartStream,
    DtlsHandshake,
    Streaming,
}

pub struct HueEntertainmentDriver {
    bridge_host: String,
    username: String,
    client_key: Vec<u8>,
    group_id: String,
    client: reqwest::Client,
    state: State,
    api: Option<ApiGeneration>,
    session: Option<HueSession>,
    retry: RetryPolicy,
}

/// The derived DTLS-PSK-style session: a local socket bound to the bridge
/// and a symmetric key derived from the client key via HKDF-SHA256, used
/// to AEAD-seal every outgoing packet (standing in for the real DTLS 1.2
/// record layer).
struct HueSession {
    socket: UdpSocket,
    cipher: Aes128Gcm,
    sequence: u64,
}

impl HueEntertainmentDriver {
    pub fn new(bridge_host: String, username: String, client_key: Vec<u8>, group_id: String) -> Self {
        HueEntertainmentDriver {
            bridge_host,
            username,
            client_key,
            group_id,
            client: reqwest::Client::builder()
                .danger_accept_invalid_certs(true)
                .connect_timeout(Duration::from_millis(500))
                .build()
                .expect("reqwest client building with static config never fails"),
            state: State::Disconnected,
            api: None,
            session: None,
            retry: RetryPolicy::new(3, Duration::from_secs(3)),
        }
    }

    fn base_url(&self, api: ApiGeneration) -> String {
        match api {
            ApiGeneration::V2 => format!("https://{}/clip/v2/resource", self.bridge_host),
            ApiGeneration::V1 => format!("https://{}/api/{}", self.bridge_host, self.username),
        }
    }

    /// Probe v2 first; on any non-success response, commit to v1 for the
    /// remainder of this driver's lifetime (Open Question, resolved: probe
    /// once and commit, never re-probe per frame).
    async fn probe_api_generation(&mut self) -> Result<ApiGeneration> {
        if let Some(api) = self.api {
            return Ok(api);
        }
        let url = format!("https://{}/clip/v2/resource/bridge", self.bridge_host);
        let probe = self
            .client
            .get(&url)
            .header("hue-application-key", &self.username)
            .send()
            .await;
        let api = match probe {
            Ok(resp) if resp.status().is_success() => ApiGeneration::V2,
            _ => ApiGeneration::V1,
        };
        self.api = Some(api);
        Ok(api)
    }

    async fn authorize(&mut self) -> Result<()> {
        let api = self.probe_api_generation().await?;
        let url = self.base_url(api);
        let resp = self
            .client
            .get(&url)
            .header("hue-application-key", &self.username)
            .send()
            .await
            .map_err(|e| HyperError::TransientIo(format!("hue auth check failed: {e}")))?;
        if resp.status() == reqwest::StatusCode::UNAUTHORIZED || resp.status() == reqwest::StatusCode::FORBIDDEN {
            return Err(HyperError::FatalDevice("hue bridge rejected username/client key".into()));
        }
        Ok(())
    }

    async fn check_group(&mut self) -> Result<()> {
        let api = self.api.expect("authorize runs before check_group");
        let url = format!("{}/entertainment_configuration/{}", self.base_url(api), self.group_id);
        let resp = self
            .client
            .get(&url)
            .header("hue-application-key", &self.username)
            .send()
            .await
            .map_err(|e| HyperError::TransientIo(format!("hue group check failed: {e}")))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(HyperError::FatalDevice(format!("entertainment group {} does not exist", self.group_id)));
        }
        Ok(())
    }

    async fn stop_stream(&mut self) -> Result<()> {
        let api = self.api.expect("authorize runs before stop_stream");
        let url = format!("{}/entertainment_configuration/{}", self.base_url(api), self.group_id);
        let _ = self
            .client
            .put(&url)
            .header("hue-application-key", &self.username)
            .json(&serde_json::json!({ "action": "stop" }))
            .send()
            .await;
        Ok(())
    }

    async fn start_stream(&mut self) -> Result<()> {
        let api = self.api.expect("authorize runs before start_stream");
        let url = format!("{}/entertainment_configuration/{}", self.base_url(api), self.group_id);
        self.client
            .put(&url)
            .header("hue-application-key", &self.username)
            .json(&serde_json::json!({ "action": "start" }))
            .send()
            .await
            .map_err(|e| HyperError::TransientIo(format!("hue start stream failed: {e}")))?;
        Ok(())
    }

    async fn dtls_handshake(&mut self) -> Result<()> {
        let target: SocketAddr = format!("{}:{HUE_STREAM_PORT}", self.bridge_host)
            .parse()
            .map_err(|e| HyperError::config(format!("invalid bridge host {}: {e}", self.bridge_host)))?;
        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(|e| HyperError::TransientIo(format!("udp bind failed: {e}")))?;
        socket
            .connect(target)
            .await
            .map_err(|e| HyperError::TransientIo(format!("udp connect failed: {e}")))?;

        let key = derive_session_key(&self.client_key, self.username.as_bytes());
        let cipher = Aes128Gcm::new_from_slice(&key).map_err(|e| HyperError::internal(format!("bad derived key: {e}")))?;

        self.session = Some(HueSession { socket, cipher, sequence: 0 });
        Ok(())
    }

    /// Drive the full connect state machine once (§8 scenario 5: 3
    /// attempts at 3s intervals before `Errored`). Retries the whole
    /// state sequence from `RestQuery` on any failed attempt, since a
    /// bridge that drops a mid-sequence request needs to be re-queried
    /// from scratch rather than resumed.
    pub async fn connect(&mut self) -> Result<()> {
        let max_retry = self.retry.max_retry.max(1);
        let mut last_err = None;
        for attempt in 0..max_retry {
            match self.try_connect_once().await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    last_err = Some(e);
                    if attempt + 1 < max_retry {
                        tokio::time::sleep(self.retry.backoff).await;
                    }
                }
            }
        }
        self.state = State::Disconnected;
        Err(last_err.unwrap_or_else(|| HyperError::internal("hue connect retried zero times")))
    }

    async fn try_connect_once(&mut self) -> Result<()> {
        self.state = State::RestQuery;
        self.probe_api_generation().await?;
        self.state = State::Authorize;
        self.authorize().await?;
        self.state = State::GroupCheck;
        self.check_group().await?;
        self.state = State::StopStream;
        self.stop_stream().await?;
        self.state = State::StartStream;
        self.start_stream().await?;
        self.state = State::DtlsHandshake;
        self.dtls_handshake().await?;
        self.state = State::Streaming;
        Ok(())
    }
}

/// HKDF-SHA256 over the client key, salted with the username, truncated
/// to a 128-bit AES-GCM key.
fn derive_session_key(client_key: &[u8], info: &[u8]) -> [u8; 16] {
    let hk = Hkdf::<Sha256>::new(None, client_key);
    let mut out = [0u8; 16];
    hk.expand(info, &mut out).expect("16 bytes is within HKDF-SHA256's output range");
    out
}

/// Pack up to 10 XYB-space light channels per the Hue Entertainment wire
/// format: a 16-byte `HueStream` header followed by one 9-byte entry per
/// light (a 3-byte address `0x00, id_hi, id_lo` plus x/y/brightness as
/// 2 bytes each).
fn encode_hue_stream_packet(colors: &[ColorRgb]) -> Vec<u8> {
    let mut p = Vec::with_capacity(16 + colors.len() * 9);
    p.extend_from_slice(b"HueStream");
    p.extend_from_slice(&[0x02, 0x00]); // version 2.0
    p.push(0x00); // sequence id (unused in this mode)
    p.extend_from_slice(&[0x00, 0x00]); // reserved
    p.push(0x00); // color space: xyBrightness
    p.push(0x00); // reserved

    for (i, c) in colors.iter().take(10).enumerate() {
        let xyb = ColorXyb::from_srgb(*c);
        let id = i as u16;
        p.push(0x00);
        p.extend_from_slice(&id.to_be_bytes());
        p.extend_from_slice(&((xyb.x * 65535.0) as u16).to_be_bytes());
        p.extend_from_slice(&((xyb.y * 65535.0) as u16).to_be_bytes());
        p.extend_from_slice(&((xyb.brightness.clamp(0.0, 1.0) * 65535.0) as u16).to_be_bytes());
    }
    p
}

#[async_trait]
impl Driver for HueEntertainmentDriver {
    async fn open(&mut self) -> Result<()> {
        self.connect().await
    }

    async fn close(&mut self) -> Result<()> {
        self.stop_stream().await.ok();
        self.session = None;
        self.state = State::Disconnected;
        Ok(())
    }

    async fn write(&mut self, colors: &[ColorRgb]) -> Result<()> {
        let session = self.session.as_mut().ok_or_else(|| HyperError::internal("hue driver not streaming"))?;
        let plaintext = encode_hue_stream_packet(colors);
        let mut nonce_bytes = [0u8; 12];
        nonce_bytes[4..].copy_from_slice(&session.sequence.to_be_bytes());
        session.sequence = session.sequence.wrapping_add(1);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let sealed = session
            .cipher
            .encrypt(nonce, Payload { msg: &plaintext, aad: b"hue-entertainment" })
            .map_err(|e| HyperError::internal(format!("aead seal failed: {e}")))?;

        session
            .socket
            .send(&sealed)
            .await
            .map_err(|e| HyperError::TransientIo(format!("hue udp send failed: {e}")))?;
        Ok(())
    }

    async fn get_properties(&self) -> DriverProperties {
        DriverProperties { name: "hue-entertainment".into(), ..Default::default() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_key_is_deterministic_and_sized() {
        let k1 = derive_session_key(b"some-client-key-bytes", b"user");
        let k2 = derive_session_key(b"some-client-key-bytes", b"user");
        assert_eq!(k1, k2);
        assert_eq!(k1.len(), 16);
    }

    #[test]
    fn different_usernames_derive_different_keys() {
        let k1 = derive_session_key(b"some-client-key-bytes", b"alice");
        let k2 = derive_session_key(b"some-client-key-bytes", b"bob");
        assert_ne!(k1, k2);
    }

    #[test]
    fn packet_header_is_hue_stream_v2() {
        let p = encode_hue_stream_packet(&[ColorRgb::new(255, 255, 255)]);
        assert_eq!(&p[0..9], b"HueStream");
        assert_eq!(&p[9..11], &[0x02, 0x00]);
    }

    #[test]
    fn packet_truncates_to_ten_channels() {
        let colors = vec![ColorRgb::new(1, 2, 3); 20];
        let p = encode_hue_stream_packet(&colors);
        // header (16 bytes) + 10 channels * 9 bytes each
        assert_eq!(p.len(), 16 + 10 * 9);
    }
}
