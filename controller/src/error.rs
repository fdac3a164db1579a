use axum::http::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("token request to {endpoint} failed: {message}")]
    Authentication {
        endpoint: String,
        message: String,
        status: Option<u16>,
    },

    #[error("query {endpoint} failed: {message}")]
    Query {
        endpoint: String,
        message: String,
        status: Option<u16>,
    },

    #[error("command {endpoint} failed: {message}")]
    Command {
        endpoint: String,
        message: String,
        status: Option<u16>,
    },

    #[error("device {device_id} reported no '{code}' property")]
    MissingSensorData { device_id: String, code: &'static str },

    #[error("weather data unavailable from {endpoint}: {message}")]
    WeatherUnavailable {
        endpoint: String,
        message: String,
        status: Option<u16>,
    },
}

pub type Result<T> = std::result::Result<T, ControlError>;

impl ControlError {
    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            Self::Authentication { status, .. }
            | Self::Query { status, .. }
            | Self::Command { status, .. }
            | Self::WeatherUnavailable { status, .. } => *status,
            Self::MissingSensorData { .. } => None,
        }
    }

    /// Status handed back to a trigger caller: the upstream one when it was a
    /// real HTTP error, otherwise 502.
    pub fn http_status(&self) -> StatusCode {
        self.upstream_status()
            .and_then(|code| StatusCode::from_u16(code).ok())
            .filter(|status| status.is_client_error() || status.is_server_error())
            .unwrap_or(StatusCode::BAD_GATEWAY)
    }
}
