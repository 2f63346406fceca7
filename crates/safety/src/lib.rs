use serde::{Deserialize, Serialize};
use sim::{FaultTargets, PermissivePanel, SensorPanel};

/// Trip thresholds. A reading strictly above a limit trips its interlock.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterlockLimits {
    pub tank_overpressure_psi: f64,
    pub chamber_overpressure_psi: f64,
    pub temp_limit_c: f64,
}

impl Default for InterlockLimits {
    fn default() -> Self {
        Self {
            tank_overpressure_psi: 750.0,
            chamber_overpressure_psi: 900.0,
            temp_limit_c: 850.0,
        }
    }
}

impl InterlockLimits {
    pub fn validate(&self) -> Result<(), String> {
        for (name, v) in [
            ("tank_overpressure_psi", self.tank_overpressure_psi),
            ("chamber_overpressure_psi", self.chamber_overpressure_psi),
            ("temp_limit_c", self.temp_limit_c),
        ] {
            if !v.is_finite() || v < 0.0 {
                return Err(format!("{name} must be a finite, non-negative number (got {v})"));
            }
        }
        Ok(())
    }

    /// Readings the fault injector forces, each safely past its limit.
    pub fn fault_targets(&self) -> FaultTargets {
        FaultTargets {
            tank_pressure: self.tank_overpressure_psi + 50.0,
            chamber_pressure: self.chamber_overpressure_psi + 40.0,
            temperature: self.temp_limit_c + 50.0,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterlockSet {
    pub overpressure: bool,
    pub high_temp: bool,
    pub flame: bool,
    pub telemetry: bool,
    pub estop: bool,
}

impl InterlockSet {
    pub fn any_active(&self) -> bool {
        self.overpressure || self.high_temp || self.flame || self.telemetry || self.estop
    }
}

/// Evaluate the interlocks for the current sensor readings.
///
/// `estop` is not derived from the panel: it is whatever the controller has latched.
pub fn evaluate_interlocks(limits: &InterlockLimits, s: &SensorPanel, estop: bool) -> InterlockSet {
    InterlockSet {
        overpressure: s.tank_pressure > limits.tank_overpressure_psi
            || s.chamber_pressure > limits.chamber_overpressure_psi,
        high_temp: s.temperature > limits.temp_limit_c,
        flame: s.flame_detected,
        telemetry: s.telemetry_lost,
        estop,
    }
}

/// True iff every permissive is granted.
pub fn evaluate_permissives(p: &PermissivePanel) -> bool {
    p.personnel_clear && p.vent_open && p.daq_ready && p.gas_stable && p.emergency_healthy
}

/// Per-flag pass/fail, for indicator lamps.
pub fn permissive_report(p: &PermissivePanel) -> Vec<(&'static str, bool)> {
    p.flags().to_vec()
}

/// Combined result of running both evaluators once.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub interlocks: InterlockSet,
    pub permissives_ok: bool,
}

impl Verdict {
    pub fn any_interlock(&self) -> bool {
        self.interlocks.any_active()
    }

    /// Arm/start guard: all permissives granted and nothing tripped.
    pub fn ready(&self) -> bool {
        self.permissives_ok && !self.any_interlock()
    }
}

pub fn evaluate(
    limits: &InterlockLimits,
    s: &SensorPanel,
    p: &PermissivePanel,
    estop: bool,
) -> Verdict {
    Verdict {
        interlocks: evaluate_interlocks(limits, s, estop),
        permissives_ok: evaluate_permissives(p),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn panel_from_bits(bits: u8) -> PermissivePanel {
        PermissivePanel {
            personnel_clear: bits & 1 != 0,
            vent_open: bits & 2 != 0,
            daq_ready: bits & 4 != 0,
            gas_stable: bits & 8 != 0,
            emergency_healthy: bits & 16 != 0,
        }
    }

    #[test]
    fn permissive_truth_table() {
        for bits in 0u8..32 {
            let p = panel_from_bits(bits);
            assert_eq!(evaluate_permissives(&p), bits == 31, "bits {bits:05b}");
        }
    }

    #[test]
    fn report_lists_each_flag_in_panel_order() {
        let p = PermissivePanel {
            vent_open: true,
            gas_stable: true,
            ..Default::default()
        };
        assert_eq!(
            permissive_report(&p),
            vec![
                ("personnel_clear", false),
                ("vent_open", true),
                ("daq_ready", false),
                ("gas_stable", true),
                ("emergency_healthy", false),
            ]
        );
    }

    #[test]
    fn ready_needs_permissives_and_no_interlock() {
        let l = InterlockLimits::default();
        let granted = PermissivePanel::all_granted();
        assert!(evaluate(&l, &SensorPanel::default(), &granted, false).ready());
        assert!(!evaluate(&l, &SensorPanel::default(), &granted, true).ready());
        assert!(!evaluate(&l, &SensorPanel::default(), &PermissivePanel::default(), false).ready());
    }

    #[test]
    fn overpressure_boundaries_are_strict() {
        let l = InterlockLimits::default();
        let at = |tank: f64, chamber: f64| {
            let s = SensorPanel {
                tank_pressure: tank,
                chamber_pressure: chamber,
                ..Default::default()
            };
            evaluate_interlocks(&l, &s, false).overpressure
        };
        assert!(!at(750.0, 0.0));
        assert!(at(751.0, 0.0));
        assert!(!at(0.0, 900.0));
        assert!(at(0.0, 901.0));
    }

    #[test]
    fn temperature_boundary_is_strict() {
        let l = InterlockLimits::default();
        let mut s = SensorPanel {
            temperature: 850.0,
            ..Default::default()
        };
        assert!(!evaluate_interlocks(&l, &s, false).high_temp);
        s.temperature = 851.0;
        assert!(evaluate_interlocks(&l, &s, false).high_temp);
    }

    #[test]
    fn estop_passes_through() {
        let l = InterlockLimits::default();
        let set = evaluate_interlocks(&l, &SensorPanel::default(), true);
        assert!(set.estop);
        assert!(set.any_active());
        assert!(!evaluate_interlocks(&l, &SensorPanel::default(), false).any_active());
    }

    #[test]
    fn fault_targets_exceed_limits() {
        let l = InterlockLimits::default();
        let t = l.fault_targets();
        assert_eq!(t.tank_pressure, 800.0);
        assert_eq!(t.chamber_pressure, 940.0);
        assert_eq!(t.temperature, 900.0);
    }

    #[test]
    fn negative_limit_is_rejected() {
        let l = InterlockLimits {
            temp_limit_c: -1.0,
            ..Default::default()
        };
        assert!(l.validate().is_err());
        assert!(InterlockLimits::default().validate().is_ok());
    }

    proptest! {
        #[test]
        fn overpressure_matches_threshold_rule(tank in 0.0f64..2000.0, chamber in 0.0f64..2000.0) {
            let s = SensorPanel { tank_pressure: tank, chamber_pressure: chamber, ..Default::default() };
            let set = evaluate_interlocks(&InterlockLimits::default(), &s, false);
            prop_assert_eq!(set.overpressure, tank > 750.0 || chamber > 900.0);
        }

        #[test]
        fn high_temp_matches_threshold_rule(temp in -100.0f64..2000.0) {
            let s = SensorPanel { temperature: temp, ..Default::default() };
            let set = evaluate_interlocks(&InterlockLimits::default(), &s, false);
            prop_assert_eq!(set.high_temp, temp > 850.0);
        }

        #[test]
        fn any_active_is_or_of_flags(flame: bool, telemetry: bool, estop: bool) {
            let s = SensorPanel { flame_detected: flame, telemetry_lost: telemetry, ..Default::default() };
            let set = evaluate_interlocks(&InterlockLimits::default(), &s, estop);
            prop_assert_eq!(set.any_active(), flame || telemetry || estop);
        }
    }
}
