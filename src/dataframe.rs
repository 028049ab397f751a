use serde::{Deserialize, Serialize};

/// Normalized snapshot of the ECU's output-channels block. Every field is
/// either genuinely decoded or left at its zero value — `parse` never fails
/// on a short payload, it just leaves the channels past the available bytes
/// at zero (spec.md §4.3, §9: legacy plain payloads are shorter than
/// enhanced).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DataFrame {
    pub seconds_counter: u8,
    pub dfco: bool,
    pub running: bool,
    pub cranking: bool,
    pub ase: bool,
    pub warmup: bool,
    pub dwell_ms: f32,
    pub map_kpa: u16,
    pub iat_c: i16,
    pub coolant_c: i16,
    pub bat_correction_pct: u8,
    pub battery_v: f32,
    pub afr: f32,
    pub rpm: u16,
    pub pulse_width_1_ms: f32,
    pub advance_deg: i8,
    pub tps_pct: u8,
    pub loops_per_second: u16,
    pub sync: bool,
    pub rpm_dot: i16,
    pub baro_kpa: u8,
    pub errors: u8,
    pub vss_kmh: u16,
    pub gear: u8,
    pub fuel_pressure_psi: u8,
    pub oil_pressure_psi: u8,

    // Additional plain-mode channels (offsets 76-118), spec.md §9's reused
    // offset 18 (ve_current / ve_table_1) is intentionally mirrored, not a
    // bug: both fields carry the same value.
    pub ve_current: u8,
    pub ve_table_1: u8,
    pub pulse_width_2_ms: f32,
    pub pulse_width_3_ms: f32,
    pub pulse_width_4_ms: f32,
    pub boost_target_kpa: u8,
    pub boost_duty_pct: u8,
    pub spark_soft_limit: bool,
    pub spark_hard_limit: bool,
    pub ethanol_pct: u8,
    pub flex_correction_pct: u8,
    pub flex_ign_correction_deg: i8,
    pub idle_load: u8,
    pub test_outputs: u8,
    pub fuel_load: u8,

    // Framed-mode-only channels; stay zero for plain-mode frames.
    pub knock_count: u8,
    pub knock_correction: u8,
    pub vvt1_angle_deg: f32,
    pub vvt2_angle_deg: f32,
    pub fan_duty_pct: f32,
    pub dwell_actual_ms: f32,

    // Derived channels (spec.md §4.3), computed after parse regardless of
    // mode.
    pub lambda: f32,
    pub duty_cycle_pct: f32,
}

impl DataFrame {
    /// Applies the derived-channel formulas from spec.md §4.3.
    pub(crate) fn with_derived(mut self, stoich: f32) -> Self {
        self.lambda = if stoich > 0.0 { self.afr / stoich } else { 0.0 };

        self.duty_cycle_pct = if self.rpm > 0 {
            let cycle_ms = 60_000.0 / f32::from(self.rpm) * 2.0;
            self.pulse_width_1_ms / cycle_ms * 100.0
        } else {
            0.0
        };

        self
    }
}
