//! Line-oriented NMEA 0183 decoder. Assembles a [`GpsFix`] from paired RMC
//! and GGA sentences, each independently checksum-verified.

use std::time::Duration;

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::CoreResult;
use crate::serial::SerialTransport;

const MAX_LINES_PER_POLL: usize = 20;
const LINE_READ_TIMEOUT: Duration = Duration::from_millis(200);

/// A merged GPS fix. Mutated in place as RMC/GGA sentences validate;
/// callers receive a value copy on each `poll`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsFix {
    pub valid: bool,
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    pub speed_kmh: f64,
    pub heading_deg: f64,
    pub altitude_m: f64,
    pub satellites: u8,
    pub fix_quality: u8,
    pub hdop: f64,
    pub utc_time: Option<NaiveTime>,
}

impl Default for GpsFix {
    fn default() -> Self {
        Self {
            valid: false,
            latitude_deg: 0.0,
            longitude_deg: 0.0,
            speed_kmh: 0.0,
            heading_deg: 0.0,
            altitude_m: 0.0,
            satellites: 0,
            fix_quality: 0,
            hdop: 0.0,
            utc_time: None,
        }
    }
}

/// Reads newline-delimited sentences and merges validated RMC/GGA fields
/// into an internally held `GpsFix`.
pub struct NmeaDecoder {
    fix: GpsFix,
    line_buf: Vec<u8>,
}

impl NmeaDecoder {
    pub fn new() -> Self {
        Self {
            fix: GpsFix::default(),
            line_buf: Vec::new(),
        }
    }

    /// Reads at most ~20 lines, returning a copy of the current fix once
    /// both an RMC and a GGA have been merged, or when the sentence budget
    /// is exhausted.
    pub async fn poll(&mut self, transport: &mut dyn SerialTransport) -> CoreResult<GpsFix> {
        let mut got_rmc = false;
        let mut got_gga = false;

        for _ in 0..MAX_LINES_PER_POLL {
            if got_rmc && got_gga {
                break;
            }

            let chunk = transport.read_up_to(256, LINE_READ_TIMEOUT).await?;
            if chunk.is_empty() {
                break;
            }

            for &byte in &chunk {
                if byte == b'\n' {
                    if let Some(sentence) = take_line(&mut self.line_buf) {
                        match self.apply_sentence(&sentence) {
                            Some(SentenceKind::Rmc) => got_rmc = true,
                            Some(SentenceKind::Gga) => got_gga = true,
                            None => {}
                        }
                    }
                } else if byte != b'\r' {
                    self.line_buf.push(byte);
                }
            }
        }

        Ok(self.fix)
    }

    fn apply_sentence(&mut self, line: &str) -> Option<SentenceKind> {
        if !line.starts_with('$') {
            return None;
        }
        if !verify_checksum(line) {
            debug!(%line, "NMEA checksum invalid, discarding");
            return None;
        }

        let body = &line[1..line.find('*').unwrap_or(line.len())];
        let mut fields = body.split(',');
        let talker_type = fields.next()?;

        if is_sentence(talker_type, "RMC") {
            parse_rmc(&mut self.fix, fields);
            Some(SentenceKind::Rmc)
        } else if is_sentence(talker_type, "GGA") {
            parse_gga(&mut self.fix, fields);
            Some(SentenceKind::Gga)
        } else {
            None
        }
    }
}

impl Default for NmeaDecoder {
    fn default() -> Self {
        Self::new()
    }
}

enum SentenceKind {
    Rmc,
    Gga,
}

fn is_sentence(talker_type: &str, kind: &str) -> bool {
    (talker_type.len() == 5)
        && (&talker_type[..2] == "GP" || &talker_type[..2] == "GN")
        && &talker_type[2..] == kind
}

fn take_line(buf: &mut Vec<u8>) -> Option<String> {
    if buf.is_empty() {
        return None;
    }
    let line = String::from_utf8_lossy(buf).into_owned();
    buf.clear();
    Some(line)
}

/// Verifies the trailing `*HH` XOR checksum over the bytes between `$` and
/// `*`.
pub fn verify_checksum(line: &str) -> bool {
    let Some(star) = line.find('*') else {
        return false;
    };
    if !line.starts_with('$') || line.len() < star + 3 {
        return false;
    }

    let body = &line[1..star];
    let expected = xor_checksum(body);

    let hex = &line[star + 1..star + 3];
    let Ok(want) = u8::from_str_radix(hex, 16) else {
        return false;
    };

    expected == want
}

/// Computes the XOR checksum over the bytes between `$` and `*`.
pub fn xor_checksum(body: &str) -> u8 {
    body.bytes().fold(0u8, |acc, b| acc ^ b)
}

fn parse_ddmm(raw: &str) -> Option<f64> {
    if raw.is_empty() {
        return None;
    }
    let v: f64 = raw.parse().ok()?;
    let deg = (v / 100.0).floor();
    let minutes = v - deg * 100.0;
    Some(deg + minutes / 60.0)
}

fn parse_rmc<'a>(fix: &mut GpsFix, mut fields: impl Iterator<Item = &'a str>) {
    let time_field = fields.next().unwrap_or_default();
    let status = fields.next().unwrap_or_default();
    let lat_field = fields.next().unwrap_or_default();
    let lat_hemi = fields.next().unwrap_or_default();
    let lon_field = fields.next().unwrap_or_default();
    let lon_hemi = fields.next().unwrap_or_default();
    let speed_knots = fields.next().unwrap_or_default();
    let course = fields.next().unwrap_or_default();

    fix.valid = status == "A";

    if let Some(mut lat) = parse_ddmm(lat_field) {
        if lat_hemi == "S" {
            lat = -lat;
        }
        fix.latitude_deg = lat;
    }
    if let Some(mut lon) = parse_ddmm(lon_field) {
        if lon_hemi == "W" {
            lon = -lon;
        }
        fix.longitude_deg = lon;
    }
    if let Ok(knots) = speed_knots.parse::<f64>() {
        fix.speed_kmh = knots * 1.852;
    }
    if let Ok(heading) = course.parse::<f64>() {
        fix.heading_deg = heading;
    }
    fix.utc_time = parse_utc_time(time_field);
}

fn parse_gga<'a>(fix: &mut GpsFix, mut fields: impl Iterator<Item = &'a str>) {
    let _time_field = fields.next();
    let _lat = fields.next();
    let _lat_hemi = fields.next();
    let _lon = fields.next();
    let _lon_hemi = fields.next();
    let quality = fields.next().unwrap_or_default();
    let sats = fields.next().unwrap_or_default();
    let hdop = fields.next().unwrap_or_default();
    let altitude = fields.next().unwrap_or_default();

    if let Ok(q) = quality.parse::<u8>() {
        fix.fix_quality = q;
    }
    if let Ok(s) = sats.parse::<u8>() {
        fix.satellites = s;
    }
    if let Ok(h) = hdop.parse::<f64>() {
        fix.hdop = h;
    }
    if let Ok(alt) = altitude.parse::<f64>() {
        fix.altitude_m = alt;
    }
}

fn parse_utc_time(raw: &str) -> Option<NaiveTime> {
    if raw.len() < 6 {
        return None;
    }
    let hh: u32 = raw[0..2].parse().ok()?;
    let mm: u32 = raw[2..4].parse().ok()?;
    let ss: f64 = raw[4..].parse().ok()?;
    NaiveTime::from_hms_milli_opt(hh, mm, ss.trunc() as u32, ((ss.fract()) * 1000.0) as u32)
}
