use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use serde::Serialize;
use tracing::{info, warn};

use vent_common::{decide, ControllerSettings, Decision, SwitchState, TemperatureReading};

use crate::{
    cloud::{now_ms, CloudSession},
    error::Result,
    telemetry::{read_indoor_temperature, WeatherClient},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CyclePhase {
    Idle,
    Running,
}

impl CyclePhase {
    pub fn from_flag(running: &AtomicBool) -> Self {
        if running.load(Ordering::Relaxed) {
            Self::Running
        } else {
            Self::Idle
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub indoor: TemperatureReading,
    pub outdoor: TemperatureReading,
    pub desired: bool,
    pub changed: bool,
}

/// What a cycle learned before it finished or failed.
#[derive(Debug, Default)]
struct CycleTrace {
    indoor: Option<TemperatureReading>,
    outdoor: Option<TemperatureReading>,
    decision: Option<Decision>,
}

/// Sole owner of the confirmed switch state. Callers serialize cycles by
/// holding the loop behind a single lock.
pub struct ControlLoop {
    session: CloudSession,
    weather: WeatherClient,
    thermometer_device_id: String,
    switch_device_id: String,
    min_indoor_temp_c: f64,
    switch_state: SwitchState,
    running: Arc<AtomicBool>,
}

impl ControlLoop {
    pub fn new(
        settings: &ControllerSettings,
        session: CloudSession,
        weather: WeatherClient,
    ) -> Self {
        Self {
            session,
            weather,
            thermometer_device_id: settings.cloud.thermometer_device_id.clone(),
            switch_device_id: settings.cloud.switch_device_id.clone(),
            min_indoor_temp_c: settings.min_indoor_temp_c,
            switch_state: SwitchState::Unknown,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag raised for the duration of `run_cycle`; readable without the
    /// lock that serializes cycles.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    pub async fn run_cycle(&mut self) -> Result<CycleReport> {
        self.running.store(true, Ordering::Relaxed);
        let mut trace = CycleTrace::default();
        let outcome = self.execute(&mut trace).await;
        log_cycle(&trace, &outcome, self.switch_state, now_ms());
        self.running.store(false, Ordering::Relaxed);
        outcome
    }

    async fn execute(&mut self, trace: &mut CycleTrace) -> Result<CycleReport> {
        let token = self.session.acquire_token().await?;

        let (indoor, outdoor) = tokio::try_join!(
            read_indoor_temperature(&self.session, &token, &self.thermometer_device_id),
            self.weather.read_outdoor_temperature(),
        )?;
        trace.indoor = Some(indoor);
        trace.outdoor = Some(outdoor);

        let decision = decide(
            indoor.celsius,
            outdoor.celsius,
            self.min_indoor_temp_c,
            self.switch_state,
        );
        trace.decision = Some(decision);

        if decision.changed {
            self.session
                .issue_command(&token, &self.switch_device_id, decision.desired)
                .await?;
            self.switch_state = SwitchState::Known(decision.desired);
        }

        Ok(CycleReport {
            indoor,
            outdoor,
            desired: decision.desired,
            changed: decision.changed,
        })
    }
}

fn describe(reading: Option<TemperatureReading>, now_ms: i64) -> String {
    match reading {
        Some(reading) => format!(
            "{:.1}C ({}s old)",
            reading.celsius,
            reading.age_ms(now_ms) / 1_000
        ),
        None => "n/a".to_string(),
    }
}

fn log_cycle(
    trace: &CycleTrace,
    outcome: &Result<CycleReport>,
    state: SwitchState,
    now_ms: i64,
) {
    let indoor = describe(trace.indoor, now_ms);
    let outdoor = describe(trace.outdoor, now_ms);
    let desired = trace
        .decision
        .map(|decision| decision.desired.to_string())
        .unwrap_or_else(|| "n/a".to_string());
    let changed = trace
        .decision
        .map(|decision| decision.changed.to_string())
        .unwrap_or_else(|| "n/a".to_string());

    match outcome {
        Ok(_) => info!(
            "cycle: indoor {indoor}, outdoor {outdoor}, desired {desired}, changed {changed}, switch {}",
            state.as_str()
        ),
        Err(err) => warn!(
            "cycle failed: indoor {indoor}, outdoor {outdoor}, desired {desired}, changed {changed}, switch {}: {err}",
            state.as_str()
        ),
    }
}
