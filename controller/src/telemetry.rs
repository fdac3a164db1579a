use std::time::Duration;

use anyhow::Context;
use tracing::debug;

use vent_common::{
    config::WeatherConfig,
    types::{WeatherCurrent, WeatherResponse},
    Property, TemperatureReading, Token, CODE_SWITCH, CODE_TEMP_CURRENT,
};

use crate::{
    cloud::CloudSession,
    error::{ControlError, Result},
};

pub const WEATHER_PATH: &str = "/v1/current.json";

fn find_property<'a>(
    properties: &'a [Property],
    device_id: &str,
    code: &'static str,
) -> Result<&'a Property> {
    properties
        .iter()
        .find(|property| property.code == code)
        .ok_or_else(|| ControlError::MissingSensorData {
            device_id: device_id.to_string(),
            code,
        })
}

/// The platform reports temperature in tenths of a degree.
pub fn indoor_reading(properties: &[Property], device_id: &str) -> Result<TemperatureReading> {
    let property = find_property(properties, device_id, CODE_TEMP_CURRENT)?;
    let raw = property
        .value
        .as_f64()
        .ok_or_else(|| ControlError::MissingSensorData {
            device_id: device_id.to_string(),
            code: CODE_TEMP_CURRENT,
        })?;

    Ok(TemperatureReading {
        celsius: raw / 10.0,
        observed_at_ms: property.time,
    })
}

pub fn switch_state(properties: &[Property], device_id: &str) -> Result<bool> {
    find_property(properties, device_id, CODE_SWITCH)?
        .value
        .as_bool()
        .ok_or_else(|| ControlError::MissingSensorData {
            device_id: device_id.to_string(),
            code: CODE_SWITCH,
        })
}

pub async fn read_indoor_temperature(
    session: &CloudSession,
    token: &Token,
    device_id: &str,
) -> Result<TemperatureReading> {
    let properties = session.fetch_properties(token, device_id).await?;
    indoor_reading(&properties, device_id)
}

pub async fn read_switch_state(
    session: &CloudSession,
    token: &Token,
    device_id: &str,
) -> Result<bool> {
    let properties = session.fetch_properties(token, device_id).await?;
    switch_state(&properties, device_id)
}

pub fn outdoor_reading(
    current: Option<WeatherCurrent>,
) -> std::result::Result<TemperatureReading, String> {
    let current = current.ok_or("response has no 'current' block")?;
    let celsius = current
        .temp_c
        .filter(|value| value.is_finite())
        .ok_or("response has no 'current.temp_c'")?;
    let updated_epoch = current
        .last_updated_epoch
        .ok_or("response has no 'current.last_updated_epoch'")?;

    Ok(TemperatureReading {
        celsius,
        observed_at_ms: updated_epoch.saturating_mul(1_000),
    })
}

#[derive(Clone)]
pub struct WeatherClient {
    http: reqwest::Client,
    config: WeatherConfig,
}

impl WeatherClient {
    pub fn new(config: WeatherConfig, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build weather http client")?;
        Ok(Self::with_client(config, http))
    }

    pub fn with_client(config: WeatherConfig, http: reqwest::Client) -> Self {
        Self { http, config }
    }

    pub async fn read_outdoor_temperature(&self) -> Result<TemperatureReading> {
        let url = format!(
            "{}{}",
            self.config.base_url.trim_end_matches('/'),
            WEATHER_PATH
        );
        let unavailable = |message: String, status: Option<u16>| {
            ControlError::WeatherUnavailable {
                endpoint: WEATHER_PATH.to_string(),
                message,
                status,
            }
        };

        let response = self
            .http
            .get(&url)
            .query(&[
                ("key", self.config.api_key.as_str()),
                ("q", self.config.location.as_str()),
                ("aqi", "no"),
            ])
            .send()
            .await
            .map_err(|err| unavailable(format!("request failed: {err}"), None))?;

        let status = Some(response.status().as_u16());
        let success = response.status().is_success();
        let raw = response
            .text()
            .await
            .map_err(|err| unavailable(format!("failed to read response: {err}"), status))?;

        if !success {
            return Err(unavailable(raw, status));
        }

        let parsed: WeatherResponse = serde_json::from_str(&raw)
            .map_err(|err| unavailable(format!("undecodable response ({err}): {raw}"), status))?;

        let reading =
            outdoor_reading(parsed.current).map_err(|message| unavailable(message, status))?;
        debug!(celsius = reading.celsius, "outdoor temperature read");
        Ok(reading)
    }
}
