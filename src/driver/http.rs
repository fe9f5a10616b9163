//! REST/JSON drivers (§4.7): WLED's HTTP JSON API and the Nanoleaf REST
//! control surface, both over `reqwest`. Streaming realtime data for
//! Nanoleaf (UDP) lives in [`super::udp`]'s framing pattern but is kept
//! here since it shares the same client/auth state as the REST driver.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;

use crate::color::ColorRgb;
use crate::error::{HyperError, Result};

use super::{Driver, DriverProperties};

fn map_reqwest(e: reqwest::Error) -> HyperError {
    if e.is_timeout() || e.is_connect() {
        HyperError::TransientIo(e.to_string())
    } else if e.status().map(|s| s.is_server_error()).unwrap_or(false) {
        HyperError::TransientIo(e.to_string())
    } else {
        HyperError::FatalDevice(e.to_string())
    }
}

/// WLED's `/json/state` HTTP endpoint; simplest possible driver, one POST
/// per frame.
pub struct WledHttpDriver {
    host: String,
    client: reqwest::Client,
}

impl WledHttpDriver {
    pub fn new(host: String) -> Self {
        WledHttpDriver { host, client: reqwest::Client::new() }
    }
}

#[derive(Serialize)]
struct WledSegment {
    i: Vec<serde_json::Value>,
}

#[async_trait]
impl Driver for WledHttpDriver {
    async fn open(&mut self) -> Result<()> {
        self.client
            .get(format!("http://{}/json/info", self.host))
            .send()
            .await
            .map_err(map_reqwest)?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }

    async fn switch_on(&mut self) -> Result<()> {
        self.client
            .post(format!("http://{}/json/state", self.host))
            .json(&json!({ "on": true }))
            .send()
            .await
            .map_err(map_reqwest)?;
        Ok(())
    }

    async fn switch_off(&mut self) -> Result<()> {
        self.client
            .post(format!("http://{}/json/state", self.host))
            .json(&json!({ "on": false }))
            .send()
            .await
            .map_err(map_reqwest)?;
        Ok(())
    }

    async fn write(&mut self, colors: &[ColorRgb]) -> Result<()> {
        let indices: Vec<serde_json::Value> = colors
            .iter()
            .flat_map(|c| vec![json!([c.r, c.g, c.b])])
            .collect();
        let body = json!({ "seg": { "i": indices } });
        self.client
            .post(format!("http://{}/json/state", self.host))
            .json(&body)
            .send()
            .await
            .map_err(map_reqwest)?;
        Ok(())
    }

    async fn get_properties(&self) -> DriverProperties {
        DriverProperties { name: "wled-http".into(), ..Default::default() }
    }
}

/// Nanoleaf's REST control surface (power, auth) over the device's local
/// HTTP API; realtime color streaming for Nanoleaf is the separate UDP
/// `NanoleafStreaming` transport (§4.7).
pub struct NanoleafRestDriver {
    host: String,
    auth_token: String,
    client: reqwest::Client,
}

impl NanoleafRestDriver {
    pub fn new(host: String, auth_token: String) -> Self {
        NanoleafRestDriver { host, auth_token, client: reqwest::Client::new() }
    }

    fn base_url(&self) -> String {
        format!("http://{}/api/v1/{}", self.host, self.auth_token)
    }
}

#[async_trait]
impl Driver for NanoleafRestDriver {
    async fn open(&mut self) -> Result<()> {
        self.client.get(self.base_url()).send().await.map_err(map_reqwest)?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }

    async fn switch_on(&mut self) -> Result<()> {
        self.client
            .put(format!("{}/state", self.base_url()))
            .json(&json!({ "on": { "value": true } }))
            .send()
            .await
            .map_err(map_reqwest)?;
        Ok(())
    }

    async fn switch_off(&mut self) -> Result<()> {
        self.client
            .put(format!("{}/state", self.base_url()))
            .json(&json!({ "on": { "value": false } }))
            .send()
            .await
            .map_err(map_reqwest)?;
        Ok(())
    }

    async fn write(&mut self, colors: &[ColorRgb]) -> Result<()> {
        // Static-panel write via REST (effect "displayTemp" payload),
        // used when the caller hasn't escalated to the UDP streaming
        // transport.
        let avg = mean_color(colors);
        self.client
            .put(format!("{}/state", self.base_url()))
            .json(&json!({ "hue": { "value": avg.to_hsv().hue * 360.0 } }))
            .send()
            .await
            .map_err(map_reqwest)?;
        Ok(())
    }

    async fn identify(&mut self) -> Result<()> {
        self.client
            .put(format!("{}/identify", self.base_url()))
            .send()
            .await
            .map_err(map_reqwest)?;
        Ok(())
    }

    async fn get_properties(&self) -> DriverProperties {
        DriverProperties { name: "nanoleaf-rest".into(), ..Default::default() }
    }
}

fn mean_color(colors: &[ColorRgb]) -> ColorRgb {
    if colors.is_empty() {
        return ColorRgb::BLACK;
    }
    let (mut r, mut g, mut b) = (0u32, 0u32, 0u32);
    for c in colors {
        r += c.r as u32;
        g += c.g as u32;
        b += c.b as u32;
    }
    let n = colors.len() as u32;
    ColorRgb::new((r / n) as u8, (g / n) as u8, (b / n) as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_color_of_uniform_input_is_identity() {
        let colors = vec![ColorRgb::new(10, 20, 30); 5];
        assert_eq!(mean_color(&colors), ColorRgb::new(10, 20, 30));
    }

    #[test]
    fn mean_color_of_empty_is_black() {
        assert_eq!(mean_color(&[]), ColorRgb::BLACK);
    }
}
