//! In-process stand-in for the cloud and weather APIs. Every signed call is
//! re-verified with the shared signer before it is answered.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;

use vent_common::{canonical_url, sign, string_to_sign, ControllerSettings};

use crate::{cloud::CloudSession, control::ControlLoop, telemetry::WeatherClient};

pub const ACCESS_KEY: &str = "access-key";
pub const SECRET_KEY: &str = "secret-key";
pub const THERMOMETER: &str = "thermo-1";
pub const SWITCH: &str = "plug-1";

#[derive(Default)]
pub struct FakeCloud {
    pub indoor_tenths: i64,
    pub outdoor_c: f64,
    pub fail_properties: bool,
    pub omit_properties_result: bool,
    pub fail_commands: bool,
    pub commands: Vec<Value>,
}

pub type Shared = Arc<Mutex<FakeCloud>>;

pub fn fake(indoor_tenths: i64, outdoor_c: f64) -> Shared {
    Arc::new(Mutex::new(FakeCloud {
        indoor_tenths,
        outdoor_c,
        ..FakeCloud::default()
    }))
}

pub fn commands(fake: &Shared) -> Vec<Value> {
    fake.lock().unwrap().commands.clone()
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
}

fn signature_valid(headers: &HeaderMap, method: &str, uri: &Uri, body: &str) -> bool {
    let target = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    let message = format!(
        "{}{}{}{}",
        header(headers, "client_id"),
        header(headers, "access_token"),
        header(headers, "t"),
        string_to_sign(method, body, &canonical_url(target, &[]))
    );
    header(headers, "client_id") == ACCESS_KEY
        && header(headers, "sign_method") == "HMAC-SHA256"
        && sign(SECRET_KEY, &message) == header(headers, "sign")
}

fn rejected() -> Response {
    Json(json!({ "success": false, "code": 1004, "msg": "sign invalid" })).into_response()
}

async fn token(headers: HeaderMap, uri: Uri) -> Response {
    if !signature_valid(&headers, "GET", &uri, "") || headers.contains_key("access_token") {
        return rejected();
    }
    Json(json!({ "success": true, "result": { "access_token": "token-1" } })).into_response()
}

async fn properties(
    State(fake): State<Shared>,
    Path(device_id): Path<String>,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    if !signature_valid(&headers, "GET", &uri, "")
        || header(&headers, "access_token") != "token-1"
    {
        return rejected();
    }
    let fake = fake.lock().unwrap();
    if fake.fail_properties {
        return (StatusCode::INTERNAL_SERVER_ERROR, "upstream down").into_response();
    }
    if fake.omit_properties_result {
        return Json(json!({ "success": true })).into_response();
    }
    let now = chrono::Utc::now().timestamp_millis();
    let properties = if device_id == THERMOMETER {
        json!([
            { "code": "va_humidity", "value": 400, "time": now - 60_000 },
            { "code": "temp_current", "value": fake.indoor_tenths, "time": now - 60_000 }
        ])
    } else {
        json!([{ "code": "switch_1", "value": false, "time": now }])
    };
    Json(json!({ "success": true, "result": { "properties": properties } })).into_response()
}

async fn issue(
    State(fake): State<Shared>,
    headers: HeaderMap,
    uri: Uri,
    body: Bytes,
) -> Response {
    let body = String::from_utf8_lossy(&body).to_string();
    if !signature_valid(&headers, "POST", &uri, &body) {
        return rejected();
    }
    let mut fake = fake.lock().unwrap();
    if fake.fail_commands {
        return Json(json!({ "success": false, "code": 2001, "msg": "device is offline" }))
            .into_response();
    }
    fake.commands.push(serde_json::from_str(&body).unwrap());
    Json(json!({ "success": true, "result": true })).into_response()
}

async fn weather(
    State(fake): State<Shared>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if params.get("key").map(String::as_str) != Some("weather-key")
        || params.get("aqi").map(String::as_str) != Some("no")
    {
        return (StatusCode::UNAUTHORIZED, "bad key").into_response();
    }
    let epoch = chrono::Utc::now().timestamp() - 900;
    let temp_c = fake.lock().unwrap().outdoor_c;
    Json(json!({ "current": { "temp_c": temp_c, "last_updated_epoch": epoch } }))
        .into_response()
}

/// Serves the fake on an ephemeral local port and returns its base url.
pub async fn spawn(fake: Shared) -> String {
    let app = Router::new()
        .route("/v1.0/token", get(token))
        .route(
            "/v2.0/cloud/thing/{device_id}/shadow/properties",
            get(properties),
        )
        .route(
            "/v2.0/cloud/thing/{device_id}/shadow/properties/issue",
            post(issue),
        )
        .route("/v1/current.json", get(weather))
        .with_state(fake);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

pub fn settings(base_url: &str, secret: &str) -> ControllerSettings {
    let mut settings = ControllerSettings::default();
    settings.cloud.access_key = ACCESS_KEY.to_string();
    settings.cloud.secret_key = secret.to_string();
    settings.cloud.base_url = base_url.to_string();
    settings.cloud.thermometer_device_id = THERMOMETER.to_string();
    settings.cloud.switch_device_id = SWITCH.to_string();
    settings.weather.api_key = "weather-key".to_string();
    settings.weather.location = "Lyon".to_string();
    settings.weather.base_url = base_url.to_string();
    settings.min_indoor_temp_c = 18.0;
    settings
}

pub fn clients(settings: &ControllerSettings) -> (CloudSession, WeatherClient) {
    let http = reqwest::Client::builder()
        .no_proxy()
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap();
    (
        CloudSession::with_client(&settings.cloud, http.clone()),
        WeatherClient::with_client(settings.weather.clone(), http),
    )
}

pub async fn control_loop(fake: &Shared, secret: &str) -> ControlLoop {
    let base_url = spawn(fake.clone()).await;
    let settings = settings(&base_url, secret);
    let (session, weather) = clients(&settings);
    ControlLoop::new(&settings, session, weather)
}
