use crate::types::Credentials;

pub const DEFAULT_MIN_INDOOR_TEMP_C: f64 = 18.0;

#[derive(Debug, Clone)]
pub struct CloudConfig {
    pub access_key: String,
    pub secret_key: String,
    pub base_url: String,
    pub thermometer_device_id: String,
    pub switch_device_id: String,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            access_key: String::new(),
            secret_key: String::new(),
            base_url: "https://openapi.tuyaeu.com".to_string(),
            thermometer_device_id: String::new(),
            switch_device_id: String::new(),
        }
    }
}

impl CloudConfig {
    pub fn credentials(&self) -> Credentials {
        Credentials {
            access_key: self.access_key.clone(),
            secret_key: self.secret_key.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WeatherConfig {
    pub api_key: String,
    pub location: String,
    pub base_url: String,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            location: String::new(),
            base_url: "https://api.weatherapi.com".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub cloud: CloudConfig,
    pub weather: WeatherConfig,
    pub min_indoor_temp_c: f64,
    pub cycle_interval_secs: u64,
    pub request_timeout_ms: u64,
    pub http_port: u16,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            cloud: CloudConfig::default(),
            weather: WeatherConfig::default(),
            min_indoor_temp_c: DEFAULT_MIN_INDOOR_TEMP_C,
            cycle_interval_secs: 300,
            request_timeout_ms: 5_000,
            http_port: 8080,
        }
    }
}

impl ControllerSettings {
    pub fn sanitize(&mut self) {
        if !self.min_indoor_temp_c.is_finite() {
            self.min_indoor_temp_c = DEFAULT_MIN_INDOOR_TEMP_C;
        }
        self.cycle_interval_secs = self.cycle_interval_secs.max(10);
        self.request_timeout_ms = self.request_timeout_ms.clamp(500, 60_000);

        for url in [&mut self.cloud.base_url, &mut self.weather.base_url] {
            while url.ends_with('/') {
                url.pop();
            }
        }
    }

    /// Names of required fields that are still empty.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        [
            ("access_key", &self.cloud.access_key),
            ("secret_key", &self.cloud.secret_key),
            ("thermometer_device_id", &self.cloud.thermometer_device_id),
            ("switch_device_id", &self.cloud.switch_device_id),
            ("weather api_key", &self.weather.api_key),
            ("weather location", &self.weather.location),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect()
    }
}
