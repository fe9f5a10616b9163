//! Fire-and-forget UDP protocols (§4.7): raw RGB, ArtNet DMX512, E1.31
//! (sACN), TPM2.net, WLED's WARLS realtime protocol, and Nanoleaf's
//! External Control streaming frame. None of these have a handshake;
//! `open` just binds a local socket and `connect`s it to the target so
//! `write`s become plain `send`s.

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::net::UdpSocket;

use crate::color::{colors_as_bytes, ByteOrder, ColorRgb};
use crate::error::{HyperError, Result};

use super::{Driver, DriverProperties};

async fn connected_socket(host: &str, port: u16) -> Result<UdpSocket> {
    let target: SocketAddr = format!("{host}:{port}")
        .parse()
        .map_err(|e| HyperError::config(format!("invalid udp target {host}:{port}: {e}")))?;
    let bind_addr: SocketAddr = if target.is_ipv6() { "[::]:0" } else { "0.0.0.0:0" }.parse().unwrap();
    let socket = UdpSocket::bind(bind_addr)
        .await
        .map_err(|e| HyperError::TransientIo(format!("udp bind failed: {e}")))?;
    socket
        .connect(target)
        .await
        .map_err(|e| HyperError::TransientIo(format!("udp connect failed: {e}")))?;
    Ok(socket)
}

async fn send(socket: &UdpSocket, buf: &[u8]) -> Result<()> {
    socket
        .send(buf)
        .await
        .map(|_| ())
        .map_err(|e| HyperError::TransientIo(format!("udp send failed: {e}")))
}

/// Plain RGB-triples-over-UDP, no header at all.
pub struct UdpRawDriver {
    host: String,
    port: u16,
    order: ByteOrder,
    socket: Option<UdpSocket>,
}

impl UdpRawDriver {
    pub fn new(host: String, port: u16, order: ByteOrder) -> Self {
        UdpRawDriver { host, port, order, socket: None }
    }
}

#[async_trait]
impl Driver for UdpRawDriver {
    async fn open(&mut self) -> Result<()> {
        self.socket = Some(connected_socket(&self.host, self.port).await?);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.socket = None;
        Ok(())
    }

    async fn write(&mut self, colors: &[ColorRgb]) -> Result<()> {
        let socket = self.socket.as_ref().ok_or_else(|| HyperError::internal("udp raw driver not open"))?;
        send(socket, &colors_as_bytes(colors, self.order)).await
    }

    async fn get_properties(&self) -> DriverProperties {
        DriverProperties { name: "udp-raw".into(), ..Default::default() }
    }
}

/// ArtNet DMX512-over-UDP (port 6454). Each packet carries up to 512 bytes
/// (170 RGB LEDs) of one universe; longer layouts are split across
/// consecutive universes.
pub struct ArtNetDriver {
    host: String,
    universe: u16,
    sequence: u8,
    socket: Option<UdpSocket>,
}

const ARTNET_PORT: u16 = 6454;
const ARTNET_MAX_CHANNELS_PER_UNIVERSE: usize = 510; // 170 RGB LEDs, even byte count

impl ArtNetDriver {
    pub fn new(host: String, universe: u16) -> Self {
        ArtNetDriver { host, universe, sequence: 0, socket: None }
    }

    fn header(&self, universe: u16, len: u16) -> [u8; 18] {
        let mut h = [0u8; 18];
        h[0..8].copy_from_slice(b"Art-Net\0");
        h[8] = 0x00; // OpOutput/OpDmx low byte
        h[9] = 0x50; // high byte
        h[10] = 0; // protocol version high
        h[11] = 14; // protocol version low
        h[12] = self.sequence;
        h[13] = 0; // physical port
        h[14] = (universe & 0xFF) as u8;
        h[15] = (universe >> 8) as u8;
        h[16] = (len >> 8) as u8;
        h[17] = (len & 0xFF) as u8;
        h
    }
}

#[async_trait]
impl Driver for ArtNetDriver {
    async fn open(&mut self) -> Result<()> {
        self.socket = Some(connected_socket(&self.host, ARTNET_PORT).await?);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.socket = None;
        Ok(())
    }

    async fn write(&mut self, colors: &[ColorRgb]) -> Result<()> {
        let socket = self.socket.as_ref().ok_or_else(|| HyperError::internal("artnet driver not open"))?;
        let bytes = colors_as_bytes(colors, ByteOrder::Rgb);
        self.sequence = self.sequence.wrapping_add(1).max(1);

        for (chunk_idx, chunk) in bytes.chunks(ARTNET_MAX_CHANNELS_PER_UNIVERSE).enumerate() {
            let universe = self.universe.wrapping_add(chunk_idx as u16);
            let mut packet = self.header(universe, chunk.len() as u16).to_vec();
            packet.extend_from_slice(chunk);
            send(socket, &packet).await?;
        }
        Ok(())
    }

    async fn get_properties(&self) -> DriverProperties {
        DriverProperties { name: "artnet".into(), ..Default::default() }
    }
}

/// E1.31 (sACN), root layer + framing layer + DMP layer, 126-byte header
/// ahead of the DMX data (port 5568).
pub struct SacnDriver {
    host: String,
    universe: u16,
    sequence: u8,
    socket: Option<UdpSocket>,
}

const SACN_PORT: u16 = 5568;
const SACN_CID: [u8; 16] = *b"hyperhdr-core-rs";

impl SacnDriver {
    pub fn new(host: String, universe: u16) -> Self {
        SacnDriver { host, universe, sequence: 0, socket: None }
    }

    fn packet(&self, dmx: &[u8]) -> Vec<u8> {
        let mut p = Vec::with_capacity(126 + dmx.len());
        let dmx_len = dmx.len() as u16;

        // Root layer.
        p.extend_from_slice(&[0x00, 0x10]); // preamble size
        p.extend_from_slice(&[0x00, 0x00]); // postamble size
        p.extend_from_slice(b"ASC-E1.17\0\0\0");
        let root_pdu_len = 0x7000 | (dmx_len + 0x76);
        p.extend_from_slice(&root_pdu_len.to_be_bytes());
        p.extend_from_slice(&[0x00, 0x00, 0x00, 0x04]); // vector ROOT_E131_DATA
        p.extend_from_slice(&SACN_CID);

        // Framing layer.
        let frame_pdu_len = 0x7000 | (dmx_len + 0x58);
        p.extend_from_slice(&frame_pdu_len.to_be_bytes());
        p.extend_from_slice(&[0x00, 0x00, 0x00, 0x02]); // vector DATA_PACKET
        let mut source_name = [0u8; 64];
        source_name[..14].copy_from_slice(b"hyperhdr-core\0");
        p.extend_from_slice(&source_name);
        p.push(100); // priority
        p.extend_from_slice(&[0x00, 0x00]); // sync address
        p.push(self.sequence);
        p.push(0x00); // options
        p.extend_from_slice(&self.universe.to_be_bytes());

        // DMP layer.
        let dmp_pdu_len = 0x7000 | (dmx_len + 0x0B);
        p.extend_from_slice(&dmp_pdu_len.to_be_bytes());
        p.push(0x02); // vector
        p.push(0xA1); // address type & data type
        p.extend_from_slice(&[0x00, 0x00]); // first property address
        p.extend_from_slice(&[0x00, 0x01]); // address increment
        p.extend_from_slice(&(dmx_len + 1).to_be_bytes());
        p.push(0x00); // DMX start code
        p.extend_from_slice(dmx);
        p
    }
}

#[async_trait]
impl Driver for SacnDriver {
    async fn open(&mut self) -> Result<()> {
        self.socket = Some(connected_socket(&self.host, SACN_PORT).await?);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.socket = None;
        Ok(())
    }

    async fn write(&mut self, colors: &[ColorRgb]) -> Result<()> {
        let socket = self.socket.as_ref().ok_or_else(|| HyperError::internal("sacn driver not open"))?;
        self.sequence = self.sequence.wrapping_add(1);
        let dmx = colors_as_bytes(colors, ByteOrder::Rgb);
        send(socket, &self.packet(&dmx)).await
    }

    async fn get_properties(&self) -> DriverProperties {
        DriverProperties { name: "sacn".into(), ..Default::default() }
    }
}

/// TPM2.net: a 6-byte header (`0x9C, 0xDA, kind, len_hi, len_lo, ...data,
/// 0x36`).
pub struct Tpm2NetDriver {
    host: String,
    port: u16,
    socket: Option<UdpSocket>,
}

impl Tpm2NetDriver {
    pub fn new(host: String, port: u16) -> Self {
        Tpm2NetDriver { host, port, socket: None }
    }
}

#[async_trait]
impl Driver for Tpm2NetDriver {
    async fn open(&mut self) -> Result<()> {
        self.socket = Some(connected_socket(&self.host, self.port).await?);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.socket = None;
        Ok(())
    }

    async fn write(&mut self, colors: &[ColorRgb]) -> Result<()> {
        let socket = self.socket.as_ref().ok_or_else(|| HyperError::internal("tpm2net driver not open"))?;
        let data = colors_as_bytes(colors, ByteOrder::Rgb);
        let mut packet = Vec::with_capacity(data.len() + 6);
        packet.push(0x9C); // start of frame
        packet.push(0xDA); // data frame
        packet.push((data.len() >> 8) as u8);
        packet.push((data.len() & 0xFF) as u8);
        packet.extend_from_slice(&data);
        packet.push(0x36); // end of frame
        send(socket, &packet).await
    }

    async fn get_properties(&self) -> DriverProperties {
        DriverProperties { name: "tpm2net".into(), ..Default::default() }
    }
}

/// WLED's realtime WARLS protocol: `[protocol=1, timeout_s, idx_hi, idx_lo,
/// r, g, b]*` over UDP port 21324.
pub struct WledWarlsDriver {
    host: String,
    port: u16,
    timeout_s: u8,
    socket: Option<UdpSocket>,
}

impl WledWarlsDriver {
    pub fn new(host: String, port: u16, timeout_s: u8) -> Self {
        WledWarlsDriver { host, port, timeout_s, socket: None }
    }
}

#[async_trait]
impl Driver for WledWarlsDriver {
    async fn open(&mut self) -> Result<()> {
        self.socket = Some(connected_socket(&self.host, self.port).await?);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.socket = None;
        Ok(())
    }

    async fn write(&mut self, colors: &[ColorRgb]) -> Result<()> {
        let socket = self.socket.as_ref().ok_or_else(|| HyperError::internal("wled warls driver not open"))?;
        let mut packet = Vec::with_capacity(2 + colors.len() * 5);
        packet.push(1); // WARLS protocol id
        packet.push(self.timeout_s);
        for (i, c) in colors.iter().enumerate() {
            packet.push((i >> 8) as u8);
            packet.push((i & 0xFF) as u8);
            packet.extend_from_slice(&[c.r, c.g, c.b]);
        }
        send(socket, &packet).await
    }

    async fn get_properties(&self) -> DriverProperties {
        DriverProperties { name: "wled-warls".into(), ..Default::default() }
    }
}

/// Nanoleaf's External Control streaming frame (protocol v2): panel count
/// followed by `[panelId_hi, panelId_lo, 1, r, g, b, 0, transition_hi,
/// transition_lo]` per panel. The `psk` is the pairing token issued by the
/// device's `/api/v1/new` handshake and isn't part of the per-frame wire
/// format; it's kept here for the session to re-pair if the device drops it.
pub struct NanoleafStreamingDriver {
    host: String,
    port: u16,
    #[allow(dead_code)]
    psk: Vec<u8>,
    socket: Option<UdpSocket>,
}

impl NanoleafStreamingDriver {
    pub fn new(host: String, port: u16, psk: Vec<u8>) -> Self {
        NanoleafStreamingDriver { host, port, psk, socket: None }
    }
}

#[async_trait]
impl Driver for NanoleafStreamingDriver {
    async fn open(&mut self) -> Result<()> {
        self.socket = Some(connected_socket(&self.host, self.port).await?);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.socket = None;
        Ok(())
    }

    async fn write(&mut self, colors: &[ColorRgb]) -> Result<()> {
        let socket = self.socket.as_ref().ok_or_else(|| HyperError::internal("nanoleaf streaming driver not open"))?;
        let mut packet = Vec::with_capacity(2 + colors.len() * 9);
        packet.extend_from_slice(&(colors.len() as u16).to_be_bytes());
        for (i, c) in colors.iter().enumerate() {
            packet.extend_from_slice(&(i as u16).to_be_bytes());
            packet.push(1); // number of states for this panel
            packet.extend_from_slice(&[c.r, c.g, c.b]);
            packet.push(0); // white channel, unused
            packet.extend_from_slice(&50u16.to_be_bytes()); // transition time, 100ms units
        }
        send(socket, &packet).await
    }

    async fn get_properties(&self) -> DriverProperties {
        DriverProperties { name: "nanoleaf-streaming".into(), ..Default::default() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artnet_header_carries_universe_and_sequence() {
        let d = ArtNetDriver::new("127.0.0.1".into(), 3);
        let h = d.header(3, 9);
        assert_eq!(&h[0..8], b"Art-Net\0");
        assert_eq!(h[14], 3);
        assert_eq!(u16::from_be_bytes([h[16], h[17]]), 9);
    }

    #[test]
    fn sacn_packet_embeds_dmx_payload() {
        let d = SacnDriver::new("127.0.0.1".into(), 1);
        let dmx = vec![10u8, 20, 30];
        let p = d.packet(&dmx);
        assert!(p.ends_with(&dmx));
        assert_eq!(&p[4..16], b"ASC-E1.17\0\0\0");
    }
}
