use rand::Rng;
use serde::{Deserialize, Serialize};

/// Process variables watched by the interlocks.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SensorPanel {
    /// psi
    pub tank_pressure: f64,
    /// psi
    pub chamber_pressure: f64,
    /// °C
    pub temperature: f64,
    pub flame_detected: bool,
    pub telemetry_lost: bool,
}

impl Default for SensorPanel {
    fn default() -> Self {
        Self {
            tank_pressure: 50.0,
            chamber_pressure: 0.0,
            temperature: 25.0,
            flame_detected: false,
            telemetry_lost: false,
        }
    }
}

/// Operator readiness flags. All must be set before the stand can be armed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissivePanel {
    pub personnel_clear: bool,
    pub vent_open: bool,
    pub daq_ready: bool,
    pub gas_stable: bool,
    pub emergency_healthy: bool,
}

impl PermissivePanel {
    /// Panel with every permissive granted.
    pub fn all_granted() -> Self {
        Self {
            personnel_clear: true,
            vent_open: true,
            daq_ready: true,
            gas_stable: true,
            emergency_healthy: true,
        }
    }

    /// Flags in display order, paired with their names.
    pub fn flags(&self) -> [(&'static str, bool); 5] {
        [
            ("personnel_clear", self.personnel_clear),
            ("vent_open", self.vent_open),
            ("daq_ready", self.daq_ready),
            ("gas_stable", self.gas_stable),
            ("emergency_healthy", self.emergency_healthy),
        ]
    }
}

/// Allowed range for simulated tank pressure drift.
pub const TANK_RANGE_PSI: (f64, f64) = (0.0, 800.0);
/// Allowed range for simulated chamber pressure drift.
pub const CHAMBER_RANGE_PSI: (f64, f64) = (0.0, 1000.0);
/// Allowed range for simulated temperature drift.
pub const TEMPERATURE_RANGE_C: (f64, f64) = (0.0, 1000.0);

fn nudge(value: &mut f64, delta: f64, range: (f64, f64)) {
    *value = (*value + delta).clamp(range.0, range.1);
}

/// One timed segment of the automated test sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    Chilldown,
    Pressurize,
    Ignition,
    Burn,
    Shutdown,
}

impl Phase {
    /// The sequence, in execution order.
    pub const SEQUENCE: [Phase; 5] = [
        Phase::Chilldown,
        Phase::Pressurize,
        Phase::Ignition,
        Phase::Burn,
        Phase::Shutdown,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Phase::Chilldown => "CHILLDOWN",
            Phase::Pressurize => "PRESSURIZE",
            Phase::Ignition => "IGNITION",
            Phase::Burn => "BURN",
            Phase::Shutdown => "SHUTDOWN",
        }
    }

    pub fn duration_ms(self) -> u64 {
        match self {
            Phase::Chilldown => 4000,
            Phase::Pressurize => 4000,
            Phase::Ignition => 3500,
            Phase::Burn => 5500,
            Phase::Shutdown => 3500,
        }
    }

    /// Apply the phase's entry drift to the sensor panel.
    ///
    /// Each delta is clamped into its documented range so the simulation never
    /// produces values a real gauge could not show.
    pub fn apply_drift(self, s: &mut SensorPanel) {
        match self {
            Phase::Chilldown => {
                nudge(&mut s.chamber_pressure, 50.0, CHAMBER_RANGE_PSI);
                nudge(&mut s.temperature, -20.0, TEMPERATURE_RANGE_C);
            }
            Phase::Pressurize => {
                nudge(&mut s.tank_pressure, 250.0, TANK_RANGE_PSI);
            }
            Phase::Ignition => {
                nudge(&mut s.chamber_pressure, 250.0, CHAMBER_RANGE_PSI);
                // The ignition flame is expected and must not trip the flame interlock.
                s.flame_detected = false;
            }
            Phase::Burn => {
                nudge(&mut s.chamber_pressure, 150.0, CHAMBER_RANGE_PSI);
                nudge(&mut s.temperature, 200.0, TEMPERATURE_RANGE_C);
            }
            Phase::Shutdown => {
                nudge(&mut s.tank_pressure, -200.0, TANK_RANGE_PSI);
                nudge(&mut s.chamber_pressure, -300.0, CHAMBER_RANGE_PSI);
            }
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Values written into the sensor panel by the overpressure and overtemperature faults.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FaultTargets {
    pub tank_pressure: f64,
    pub chamber_pressure: f64,
    pub temperature: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FaultKind {
    TankOverpressure,
    ChamberOverpressure,
    HighTemperature,
    Flame,
    TelemetryLoss,
    VentClosed,
    PersonnelPresent,
}

impl FaultKind {
    pub const ALL: [FaultKind; 7] = [
        FaultKind::TankOverpressure,
        FaultKind::ChamberOverpressure,
        FaultKind::HighTemperature,
        FaultKind::Flame,
        FaultKind::TelemetryLoss,
        FaultKind::VentClosed,
        FaultKind::PersonnelPresent,
    ];

    /// Uniform pick among all fault kinds.
    pub fn pick<R: Rng + ?Sized>(rng: &mut R) -> FaultKind {
        Self::ALL[rng.gen_range(0..Self::ALL.len())]
    }

    pub fn describe(self) -> &'static str {
        match self {
            FaultKind::TankOverpressure => "tank overpressure",
            FaultKind::ChamberOverpressure => "chamber overpressure",
            FaultKind::HighTemperature => "critical hardware over-temperature",
            FaultKind::Flame => "unexpected flame detected",
            FaultKind::TelemetryLoss => "telemetry link lost",
            FaultKind::VentClosed => "vent valve unexpectedly closed",
            FaultKind::PersonnelPresent => "personnel detected in test cell",
        }
    }

    /// Mutate the panels the way this fault would in the field.
    pub fn apply(self, targets: &FaultTargets, s: &mut SensorPanel, p: &mut PermissivePanel) {
        match self {
            FaultKind::TankOverpressure => s.tank_pressure = targets.tank_pressure,
            FaultKind::ChamberOverpressure => s.chamber_pressure = targets.chamber_pressure,
            FaultKind::HighTemperature => s.temperature = targets.temperature,
            FaultKind::Flame => s.flame_detected = true,
            FaultKind::TelemetryLoss => s.telemetry_lost = true,
            FaultKind::VentClosed => p.vent_open = false,
            FaultKind::PersonnelPresent => p.personnel_clear = false,
        }
    }
}
