use std::{
    net::SocketAddr,
    sync::{atomic::AtomicBool, Arc},
    time::Duration,
};

use anyhow::{bail, Context};
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tokio::{
    net::TcpListener,
    sync::Mutex,
    time::{Interval, MissedTickBehavior},
};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use vent_common::{ControllerSettings, TemperatureReading};

use crate::{
    cloud::{now_ms, CloudSession},
    control::{ControlLoop, CyclePhase, CycleReport},
    error::ControlError,
    telemetry::{read_indoor_temperature, read_switch_state, WeatherClient},
};

#[derive(Clone)]
struct AppState {
    control: Arc<Mutex<ControlLoop>>,
    running: Arc<AtomicBool>,
    session: CloudSession,
    weather: WeatherClient,
    settings: Arc<ControllerSettings>,
}

impl AppState {
    fn new(settings: ControllerSettings, session: CloudSession, weather: WeatherClient) -> Self {
        let control = ControlLoop::new(&settings, session.clone(), weather.clone());
        let running = control.running_flag();
        Self {
            control: Arc::new(Mutex::new(control)),
            running,
            session,
            weather,
            settings: Arc::new(settings),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Serialize)]
struct TriggerResponse {
    ok: bool,
    #[serde(flatten)]
    report: CycleReport,
}

#[derive(Debug, Serialize)]
struct StatusView {
    #[serde(rename = "indoorTemp")]
    indoor_temp: f64,
    #[serde(rename = "indoorAgeMin")]
    indoor_age_min: i64,
    #[serde(rename = "outdoorTemp")]
    outdoor_temp: f64,
    #[serde(rename = "outdoorAgeMin")]
    outdoor_age_min: i64,
    #[serde(rename = "minIndoorTemp")]
    min_indoor_temp: f64,
    #[serde(rename = "switchOn")]
    switch_on: bool,
    phase: CyclePhase,
}

impl StatusView {
    fn new(
        indoor: TemperatureReading,
        outdoor: TemperatureReading,
        switch_on: bool,
        min_indoor_temp: f64,
        phase: CyclePhase,
        now_ms: i64,
    ) -> Self {
        Self {
            indoor_temp: indoor.celsius,
            indoor_age_min: indoor.age_ms(now_ms) / 60_000,
            outdoor_temp: outdoor.celsius,
            outdoor_age_min: outdoor.age_ms(now_ms) / 60_000,
            min_indoor_temp,
            switch_on,
            phase,
        }
    }

    fn summary(&self) -> String {
        format!(
            "Indoor {:.1}°C ({} min ago), outdoor {:.1}°C ({} min ago), floor {:.1}°C, switch is {}",
            self.indoor_temp,
            self.indoor_age_min,
            self.outdoor_temp,
            self.outdoor_age_min,
            self.min_indoor_temp,
            if self.switch_on { "ON" } else { "OFF" }
        )
    }
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut settings = load_settings()?;
    settings.sanitize();

    let timeout = Duration::from_millis(settings.request_timeout_ms);
    let session = CloudSession::new(&settings.cloud, timeout)?;
    let weather = WeatherClient::new(settings.weather.clone(), timeout)?;
    let app_state = AppState::new(settings, session, weather);

    spawn_control_loop(app_state.clone());

    let port = app_state.settings.http_port;
    let app = Router::new()
        .route("/", get(handle_get_summary))
        .route("/api/status", get(handle_get_status))
        .route("/api/trigger", post(handle_trigger))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind controller server at {addr}"))?;

    info!("controller listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

fn load_settings() -> anyhow::Result<ControllerSettings> {
    let defaults = ControllerSettings::default();
    let mut settings = ControllerSettings::default();

    settings.cloud.access_key = env_or("TUYA_ACCESS_KEY", String::new());
    settings.cloud.secret_key = env_or("TUYA_SECRET_KEY", String::new());
    settings.cloud.base_url = env_or("TUYA_BASE_URL", defaults.cloud.base_url);
    settings.cloud.thermometer_device_id = env_or("THERMOMETER_DEVICE_ID", String::new());
    settings.cloud.switch_device_id = env_or("SWITCH_DEVICE_ID", String::new());
    settings.weather.api_key = env_or("WEATHER_API_KEY", String::new());
    settings.weather.location = env_or("WEATHER_LOCATION", String::new());
    settings.weather.base_url = env_or("WEATHER_BASE_URL", defaults.weather.base_url);

    settings.min_indoor_temp_c =
        env_parse("MIN_INDOOR_TEMP_C")?.unwrap_or(defaults.min_indoor_temp_c);
    settings.cycle_interval_secs =
        env_parse("CYCLE_INTERVAL_SECS")?.unwrap_or(defaults.cycle_interval_secs);
    settings.request_timeout_ms =
        env_parse("REQUEST_TIMEOUT_MS")?.unwrap_or(defaults.request_timeout_ms);
    settings.http_port = env_parse("PORT")?.unwrap_or(defaults.http_port);

    let missing = settings.missing_fields();
    if !missing.is_empty() {
        bail!("missing required configuration: {}", missing.join(", "));
    }
    Ok(settings)
}

fn env_or(name: &str, default: String) -> String {
    std::env::var(name).unwrap_or(default)
}

fn env_parse<T>(name: &str) -> anyhow::Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("invalid value for {name}: {value:?}")),
        Err(_) => Ok(None),
    }
}

fn scheduler_interval(period: Duration) -> Interval {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

fn spawn_control_loop(app_state: AppState) {
    tokio::spawn(async move {
        let period = Duration::from_secs(app_state.settings.cycle_interval_secs);
        let mut interval = scheduler_interval(period);

        loop {
            interval.tick().await;
            try_scheduled_cycle(&app_state).await;
        }
    });
}

/// Runs one cycle unless another holds the loop. Returns whether it ran.
async fn try_scheduled_cycle(state: &AppState) -> bool {
    // A manual trigger owns the loop; skip rather than stack ticks.
    let Ok(mut control) = state.control.try_lock() else {
        info!("control cycle already running, skipping scheduled tick");
        return false;
    };
    // run_cycle already logged the failure; the next tick retries.
    if let Err(err) = control.run_cycle().await {
        debug!("scheduled cycle aborted: {err}");
    }
    true
}

fn phase(state: &AppState) -> CyclePhase {
    CyclePhase::from_flag(&state.running)
}

async fn collect_status(state: &AppState) -> Result<StatusView, ControlError> {
    let token = state.session.acquire_token().await?;
    let (indoor, outdoor, switch_on) = tokio::try_join!(
        read_indoor_temperature(
            &state.session,
            &token,
            &state.settings.cloud.thermometer_device_id
        ),
        state.weather.read_outdoor_temperature(),
        read_switch_state(&state.session, &token, &state.settings.cloud.switch_device_id),
    )?;

    Ok(StatusView::new(
        indoor,
        outdoor,
        switch_on,
        state.settings.min_indoor_temp_c,
        phase(state),
        now_ms(),
    ))
}

async fn handle_get_summary(State(state): State<AppState>) -> impl IntoResponse {
    match collect_status(&state).await {
        Ok(status) => (StatusCode::OK, status.summary()).into_response(),
        Err(err) => {
            warn!("status collection failed: {err}");
            (err.http_status(), err.to_string()).into_response()
        }
    }
}

async fn handle_get_status(State(state): State<AppState>) -> impl IntoResponse {
    match collect_status(&state).await {
        Ok(status) => Json(status).into_response(),
        Err(err) => {
            warn!("status collection failed: {err}");
            error_response(err.http_status(), &err.to_string())
        }
    }
}

async fn handle_trigger(State(state): State<AppState>) -> impl IntoResponse {
    // Queues behind a scheduled cycle that is already in progress.
    let mut control = state.control.lock().await;
    match control.run_cycle().await {
        Ok(report) => Json(TriggerResponse { ok: true, report }).into_response(),
        Err(err) => error_response(err.http_status(), &err.to_string()),
    }
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_cloud::{self, commands, fake, Shared, SECRET_KEY};

    async fn app_state(fake: &Shared) -> AppState {
        let base_url = fake_cloud::spawn(fake.clone()).await;
        let settings = fake_cloud::settings(&base_url, SECRET_KEY);
        let (session, weather) = fake_cloud::clients(&settings);
        AppState::new(settings, session, weather)
    }

    fn reading(celsius: f64, observed_at_ms: i64) -> TemperatureReading {
        TemperatureReading {
            celsius,
            observed_at_ms,
        }
    }

    #[test]
    fn summary_line_reports_readings_and_switch() {
        let now = 10 * 60_000;
        let status = StatusView::new(
            reading(24.56, now - 3 * 60_000),
            reading(19.0, now - 15 * 60_000),
            true,
            18.0,
            CyclePhase::Idle,
            now,
        );

        assert_eq!(
            status.summary(),
            "Indoor 24.6°C (3 min ago), outdoor 19.0°C (15 min ago), floor 18.0°C, switch is ON"
        );
    }

    #[test]
    fn status_view_serializes_camel_case() {
        let status = StatusView::new(
            reading(21.0, 0),
            reading(12.0, 0),
            false,
            18.0,
            CyclePhase::Running,
            0,
        );
        let value = serde_json::to_value(&status).unwrap();

        assert_eq!(value["indoorTemp"], 21.0);
        assert_eq!(value["switchOn"], false);
        assert_eq!(value["phase"], "RUNNING");
    }

    #[tokio::test]
    async fn cycles_never_interleave() {
        let fake = fake(250, 20.0);
        let state = app_state(&fake).await;

        let guard = state.control.lock().await;
        assert!(!try_scheduled_cycle(&state).await);
        assert_eq!(phase(&state), CyclePhase::Idle);

        let trigger = tokio::spawn(handle_trigger(State(state.clone())));
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!trigger.is_finished());
        assert!(commands(&fake).is_empty());

        drop(guard);
        let response = trigger.await.unwrap().into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            commands(&fake),
            vec![serde_json::json!({ "properties": { "switch_1": true } })]
        );
    }

    #[tokio::test]
    async fn scheduled_tick_runs_when_idle() {
        let fake = fake(250, 20.0);
        let state = app_state(&fake).await;

        assert!(try_scheduled_cycle(&state).await);
        assert!(try_scheduled_cycle(&state).await);

        assert_eq!(commands(&fake).len(), 1);
        assert_eq!(phase(&state), CyclePhase::Idle);
    }

    #[tokio::test]
    async fn failed_scheduled_tick_still_counts_as_run() {
        let fake = fake(250, 20.0);
        fake.lock().unwrap().fail_properties = true;
        let state = app_state(&fake).await;

        assert!(try_scheduled_cycle(&state).await);
        assert!(commands(&fake).is_empty());
        assert_eq!(phase(&state), CyclePhase::Idle);
    }

    #[tokio::test]
    async fn trigger_propagates_upstream_status() {
        let fake = fake(250, 20.0);
        fake.lock().unwrap().fail_properties = true;
        let state = app_state(&fake).await;

        let response = handle_trigger(State(state)).await.into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn scheduler_delays_missed_ticks() {
        let interval = scheduler_interval(Duration::from_secs(60));
        assert_eq!(interval.missed_tick_behavior(), MissedTickBehavior::Delay);
    }
}
