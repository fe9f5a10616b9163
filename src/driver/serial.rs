//! Adalight-over-serial driver (§4.7): the `Ada<hi><lo><checksum>` header
//! plus raw RGB triples that the `LEDstream` Arduino sketch expects,
//! carried over a real serial port instead of UDP. Ported from the
//! original prototype's `init_pixel_buffer`/serial-write path.

use async_trait::async_trait;
use serial::SerialPort;

use crate::color::{colors_as_bytes, ByteOrder};
use crate::color::ColorRgb;
use crate::error::{HyperError, Result};

use super::{Driver, DriverProperties};

const HEADER_SIZE: usize = 6;

fn adalight_header(n_leds: u16) -> [u8; HEADER_SIZE] {
    let mut h = [0u8; HEADER_SIZE];
    h[0] = b'A';
    h[1] = b'd';
    h[2] = b'a';
    h[3] = ((n_leds - 1) >> 8) as u8;
    h[4] = ((n_leds - 1) & 0xff) as u8;
    h[5] = h[3] ^ h[4] ^ 0x55;
    h
}

pub struct SerialAdalightDriver {
    tty: String,
    baud: u32,
    port: Option<serial::SystemPort>,
}

impl SerialAdalightDriver {
    pub fn new(tty: String, baud: u32) -> Self {
        SerialAdalightDriver { tty, baud, port: None }
    }
}

#[async_trait]
impl Driver for SerialAdalightDriver {
    async fn open(&mut self) -> Result<()> {
        let tty = self.tty.clone();
        let baud = self.baud;
        // `serial` is a blocking API; opening a device node is a quick
        // syscall so a `spawn_blocking` round-trip isn't worth it here,
        // unlike the per-frame writes below.
        let mut port = serial::open(&tty).map_err(|e| HyperError::FatalDevice(format!("failed to open {tty}: {e}")))?;
        port.reconfigure(&|settings| {
            settings.set_baud_rate(serial::BaudOther(baud as usize))?;
            settings.set_char_size(serial::Bits8);
            settings.set_parity(serial::ParityNone);
            settings.set_stop_bits(serial::Stop1);
            settings.set_flow_control(serial::FlowNone);
            Ok(())
        })
        .map_err(|e| HyperError::FatalDevice(format!("failed to configure {tty}: {e}")))?;
        self.port = Some(port);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.port = None;
        Ok(())
    }

    async fn write(&mut self, colors: &[ColorRgb]) -> Result<()> {
        let mut port = self.port.take().ok_or_else(|| HyperError::internal("serial driver not open"))?;
        let mut frame = adalight_header(colors.len() as u16).to_vec();
        frame.extend_from_slice(&colors_as_bytes(colors, ByteOrder::Rgb));

        let result = tokio::task::spawn_blocking(move || {
            use std::io::Write;
            port.write_all(&frame).map(|_| port)
        })
        .await
        .map_err(|e| HyperError::internal(format!("serial write task panicked: {e}")))?;

        match result {
            Ok(port) => {
                self.port = Some(port);
                Ok(())
            }
            Err(e) => Err(HyperError::TransientIo(format!("serial write failed: {e}"))),
        }
    }

    async fn get_properties(&self) -> DriverProperties {
        DriverProperties { name: "serial-adalight".into(), ..Default::default() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_checksum_matches_arduino_ledstream_scheme() {
        let h = adalight_header(100);
        assert_eq!(&h[0..3], b"Ada");
        assert_eq!(h[5], h[3] ^ h[4] ^ 0x55);
    }
}
