use crate::types::SwitchState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub desired: bool,
    pub changed: bool,
}

/// Desired cooling state for the given readings.
///
/// Below or at the floor cooling is always off. Above it, cooling runs only
/// while inside is warmer than outside. `Unknown` previous state always
/// counts as changed so the first cycle syncs the device.
pub fn decide(
    indoor_c: f64,
    outdoor_c: f64,
    min_indoor_c: f64,
    previous: SwitchState,
) -> Decision {
    let desired = if indoor_c <= min_indoor_c {
        false
    } else {
        indoor_c > outdoor_c
    };

    let changed = match previous {
        SwitchState::Unknown => true,
        SwitchState::Known(state) => state != desired,
    };

    Decision { desired, changed }
}
