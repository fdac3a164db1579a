pub mod config;
pub mod decision;
pub mod signer;
pub mod types;

pub use config::{CloudConfig, ControllerSettings, WeatherConfig};
pub use decision::{decide, Decision};
pub use signer::{canonical_url, sign, sign_request, string_to_sign, SIGN_METHOD};
pub use types::{
    Credentials, Property, SignedRequest, SwitchCommand, SwitchState, TemperatureReading, Token,
    CODE_SWITCH, CODE_TEMP_CURRENT,
};
