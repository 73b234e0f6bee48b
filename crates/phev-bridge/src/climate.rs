//! Combined climate view
//!
//! The vehicle reports the selected climate mode and the pre-AC operating
//! state in separate registers. The topic view is derived from both.

use phev_core::{ClimateMode, PreAcState};

pub const STATE_TOPIC: &str = "/climate/state";
pub const COOL_TOPIC: &str = "/climate/cool";
pub const HEAT_TOPIC: &str = "/climate/heat";
pub const WINDSCREEN_TOPIC: &str = "/climate/windscreen";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClimateAggregator {
    mode: Option<ClimateMode>,
    status: Option<PreAcState>,
}

impl ClimateAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_mode(&mut self, mode: ClimateMode) {
        self.mode = Some(mode);
    }

    pub fn set_status(&mut self, status: PreAcState) {
        self.status = Some(status);
    }

    /// Forget the operating state, e.g. after a termination was acknowledged
    pub fn reset_status(&mut self) {
        self.status = None;
    }

    /// Topic payloads for the current view, in a fixed order.
    ///
    /// Everything is `off` until both mode and status have been seen.
    pub fn states(&self) -> [(&'static str, &'static str); 4] {
        let mut state = "off";
        let mut flags = [("cool", "off"), ("heat", "off"), ("windscreen", "off")];

        if let (Some(mode), Some(status)) = (self.mode, self.status) {
            match status {
                PreAcState::On => {
                    state = mode.as_str();
                    let active = match mode {
                        ClimateMode::Cool => Some(0),
                        ClimateMode::Heat => Some(1),
                        ClimateMode::Windscreen => Some(2),
                        ClimateMode::Unknown => None,
                    };
                    if let Some(i) = active {
                        flags[i].1 = "on";
                    }
                }
                PreAcState::Off => state = "off",
                PreAcState::Terminated => state = "terminated",
                PreAcState::Unknown(_) => state = "unknown",
            }
        }

        [
            (STATE_TOPIC, state),
            (COOL_TOPIC, flags[0].1),
            (HEAT_TOPIC, flags[1].1),
            (WINDSCREEN_TOPIC, flags[2].1),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_all_off_until_both_known() {
        let mut climate = ClimateAggregator::new();
        climate.set_status(PreAcState::On);
        assert!(climate.states().iter().all(|(_, payload)| *payload == "off"));
    }

    #[test]
    fn test_cool_on() {
        let mut climate = ClimateAggregator::new();
        climate.set_mode(ClimateMode::Cool);
        climate.set_status(PreAcState::On);
        assert_eq!(
            climate.states(),
            [
                (STATE_TOPIC, "cool"),
                (COOL_TOPIC, "on"),
                (HEAT_TOPIC, "off"),
                (WINDSCREEN_TOPIC, "off"),
            ]
        );
    }

    #[test]
    fn test_non_on_states_clear_flags() {
        let mut climate = ClimateAggregator::new();
        climate.set_mode(ClimateMode::Heat);

        climate.set_status(PreAcState::Off);
        assert_eq!(climate.states()[0], (STATE_TOPIC, "off"));
        assert_eq!(climate.states()[2], (HEAT_TOPIC, "off"));

        climate.set_status(PreAcState::Terminated);
        assert_eq!(climate.states()[0], (STATE_TOPIC, "terminated"));

        climate.set_status(PreAcState::Unknown(7));
        assert_eq!(climate.states()[0], (STATE_TOPIC, "unknown"));
        assert!(climate.states()[1..].iter().all(|(_, p)| *p == "off"));
    }

    #[test]
    fn test_reset_status() {
        let mut climate = ClimateAggregator::new();
        climate.set_mode(ClimateMode::Windscreen);
        climate.set_status(PreAcState::Terminated);
        climate.reset_status();
        assert_eq!(climate.states()[0], (STATE_TOPIC, "off"));
    }
}
