use serde::{Deserialize, Serialize};

pub const CODE_TEMP_CURRENT: &str = "temp_current";
pub const CODE_SWITCH: &str = "switch_1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub value: String,
    pub issued_at_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TemperatureReading {
    pub celsius: f64,
    #[serde(rename = "observedAt")]
    pub observed_at_ms: i64,
}

impl TemperatureReading {
    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms.saturating_sub(self.observed_at_ms).max(0)
    }
}

/// Last switch state confirmed by the device. `Unknown` until the first
/// successful command after process start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SwitchState {
    #[default]
    Unknown,
    Known(bool),
}

impl SwitchState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::Known(true) => "COOLING",
            Self::Known(false) => "IDLE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedRequest {
    pub timestamp: String,
    pub canonical_path: String,
    pub client_id: String,
    pub signature: String,
    pub sign_method: &'static str,
    pub access_token: Option<String>,
}

impl SignedRequest {
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            ("client_id", self.client_id.clone()),
            ("sign", self.signature.clone()),
            ("t", self.timestamp.clone()),
            ("sign_method", self.sign_method.to_string()),
        ];
        if let Some(token) = &self.access_token {
            headers.push(("access_token", token.clone()));
        }
        headers
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub code: String,
    #[serde(default)]
    pub value: serde_json::Value,
    #[serde(default)]
    pub time: i64,
}

/// Envelope shared by every cloud response.
#[derive(Debug, Clone, Deserialize)]
pub struct CloudResponse<T> {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub msg: Option<String>,
    pub result: Option<T>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenResult {
    pub access_token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PropertiesResult {
    #[serde(default)]
    pub properties: Vec<Property>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SwitchCommand {
    pub properties: SwitchProperties,
}

#[derive(Debug, Clone, Serialize)]
pub struct SwitchProperties {
    pub switch_1: bool,
}

impl SwitchCommand {
    pub fn new(is_on: bool) -> Self {
        Self {
            properties: SwitchProperties { switch_1: is_on },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WeatherResponse {
    pub current: Option<WeatherCurrent>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WeatherCurrent {
    pub temp_c: Option<f64>,
    pub last_updated_epoch: Option<i64>,
}
