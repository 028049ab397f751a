//! Pure, deterministic parsing from a raw channel payload into a
//! [`DataFrame`]. Offsets and scalings below are fixed wire contracts
//! (spec.md §4.3); out-of-range offsets read back as zero rather than
//! erroring.

use crate::dataframe::DataFrame;

/// Which parser applies to a [`crate::driver::RawResponse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseTag {
    PlainN,
    PlainA,
    Framed,
}

fn u8_at(payload: &[u8], offset: usize) -> u8 {
    payload.get(offset).copied().unwrap_or(0)
}

fn i8_at(payload: &[u8], offset: usize) -> i8 {
    u8_at(payload, offset) as i8
}

fn u16_le_at(payload: &[u8], offset: usize) -> u16 {
    let lo = u8_at(payload, offset);
    let hi = u8_at(payload, offset + 1);
    u16::from_le_bytes([lo, hi])
}

fn i16_le_at(payload: &[u8], offset: usize) -> i16 {
    u16_le_at(payload, offset) as i16
}

/// Parses a plain-mode payload (enhanced or legacy share the same offset
/// contract; legacy is simply shorter, so channels past its length come
/// back zero).
pub fn parse_plain(payload: &[u8], stoich: f32) -> DataFrame {
    let status1 = u8_at(payload, 1);
    let status2 = u8_at(payload, 2);
    let sync_byte = u8_at(payload, 31);

    let frame = DataFrame {
        seconds_counter: u8_at(payload, 0),
        dfco: status1 & (1 << 4) != 0,
        running: status2 & (1 << 0) != 0,
        cranking: status2 & (1 << 1) != 0,
        ase: status2 & (1 << 2) != 0,
        warmup: status2 & (1 << 3) != 0,
        dwell_ms: f32::from(u8_at(payload, 3)) * 0.1,
        map_kpa: u16_le_at(payload, 4),
        iat_c: i16::from(u8_at(payload, 6)) - 40,
        coolant_c: i16::from(u8_at(payload, 7)) - 40,
        bat_correction_pct: u8_at(payload, 8),
        battery_v: f32::from(u8_at(payload, 9)) * 0.1,
        afr: f32::from(u8_at(payload, 10)) * 0.1,
        rpm: u16_le_at(payload, 14),
        pulse_width_1_ms: f32::from(u16_le_at(payload, 20)) * 0.1,
        advance_deg: i8_at(payload, 23),
        tps_pct: u8_at(payload, 24),
        loops_per_second: u16_le_at(payload, 25),
        sync: sync_byte & (1 << 7) != 0,
        rpm_dot: i16_le_at(payload, 32),
        baro_kpa: u8_at(payload, 40),
        errors: u8_at(payload, 74),
        vss_kmh: u16_le_at(payload, 100),
        gear: u8_at(payload, 102),
        fuel_pressure_psi: u8_at(payload, 103),
        oil_pressure_psi: u8_at(payload, 104),

        // Offset 18 is intentionally written to both fields (spec.md §9).
        ve_current: u8_at(payload, 18),
        ve_table_1: u8_at(payload, 18),

        pulse_width_2_ms: f32::from(u16_le_at(payload, 76)) * 0.1,
        pulse_width_3_ms: f32::from(u16_le_at(payload, 78)) * 0.1,
        pulse_width_4_ms: f32::from(u16_le_at(payload, 80)) * 0.1,
        boost_target_kpa: u8_at(payload, 90),
        boost_duty_pct: u8_at(payload, 91),
        spark_soft_limit: u8_at(payload, 92) & (1 << 0) != 0,
        spark_hard_limit: u8_at(payload, 92) & (1 << 1) != 0,
        ethanol_pct: u8_at(payload, 94),
        flex_correction_pct: u8_at(payload, 95),
        flex_ign_correction_deg: i8_at(payload, 96),
        idle_load: u8_at(payload, 97),
        test_outputs: u8_at(payload, 98),
        fuel_load: u8_at(payload, 118),

        ..Default::default()
    };

    frame.with_derived(stoich)
}

/// Parses a framed-mode 130-byte payload using its own independent offset
/// map (spec.md §4.3).
pub fn parse_framed(payload: &[u8], stoich: f32) -> DataFrame {
    let frame = DataFrame {
        coolant_c: i16::from(u8_at(payload, 7)) - 40,
        rpm: u16_le_at(payload, 14),
        pulse_width_1_ms: f32::from(u16_le_at(payload, 76)) * 0.001,
        pulse_width_2_ms: f32::from(u16_le_at(payload, 78)) * 0.001,
        pulse_width_3_ms: f32::from(u16_le_at(payload, 80)) * 0.001,
        pulse_width_4_ms: f32::from(u16_le_at(payload, 82)) * 0.001,
        vvt1_angle_deg: f32::from(i16_le_at(payload, 84)) * 0.5,
        vvt2_angle_deg: f32::from(i16_le_at(payload, 86)) * 0.5,
        vss_kmh: u16_le_at(payload, 104),
        fan_duty_pct: f32::from(u8_at(payload, 123)) * 0.5,
        dwell_actual_ms: f32::from(u16_le_at(payload, 125)) * 0.001,
        knock_count: u8_at(payload, 128),
        knock_correction: u8_at(payload, 129),

        ..Default::default()
    };

    frame.with_derived(stoich)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_parse_decodes_little_endian_rpm() {
        let mut payload = vec![0u8; 119];
        payload[14] = 0x10;
        payload[15] = 0x0E;
        let frame = parse_plain(&payload, 14.7);
        assert_eq!(frame.rpm, 3600);
    }

    #[test]
    fn plain_parse_zero_fills_short_legacy_payload() {
        let payload = vec![0u8; 75];
        let frame = parse_plain(&payload, 14.7);
        assert_eq!(frame.vss_kmh, 0);
        assert_eq!(frame.fuel_load, 0);
    }

    #[test]
    fn plain_parse_mirrors_offset_18_into_both_ve_fields() {
        let mut payload = vec![0u8; 119];
        payload[18] = 42;
        let frame = parse_plain(&payload, 14.7);
        assert_eq!(frame.ve_current, 42);
        assert_eq!(frame.ve_table_1, 42);
    }

    #[test]
    fn framed_parse_decodes_rpm_at_offset_14() {
        let mut payload = vec![0u8; 130];
        payload[14] = 0xA0;
        payload[15] = 0x0F;
        let frame = parse_framed(&payload, 14.7);
        assert_eq!(frame.rpm, 4000);
    }

    #[test]
    fn derived_lambda_uses_stoich() {
        let mut payload = vec![0u8; 119];
        payload[10] = 147; // afr = 14.7
        let frame = parse_plain(&payload, 14.7);
        assert!((frame.lambda - 1.0).abs() < 1e-3);
    }

    #[test]
    fn derived_duty_cycle_zero_when_rpm_zero() {
        let payload = vec![0u8; 119];
        let frame = parse_plain(&payload, 14.7);
        assert_eq!(frame.duty_cycle_pct, 0.0);
    }
}
