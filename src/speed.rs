//! Pure speed-source fusion between the ECU's VSS channel and GPS speed.

use serde::{Deserialize, Serialize};

use crate::dataframe::DataFrame;
use crate::gps::GpsFix;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeedSource {
    EcuVss,
    Gps,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpeedReading {
    pub value_kmh: f64,
    pub source: SpeedSource,
}

/// Chooses ECU VSS over GPS speed whenever the ECU reports nonzero vehicle
/// speed; falls back to a valid GPS fix; otherwise reports no speed source.
pub fn fuse(ecu: Option<&DataFrame>, gps: Option<&GpsFix>) -> SpeedReading {
    if let Some(ecu) = ecu {
        if ecu.vss_kmh > 0 {
            return SpeedReading {
                value_kmh: f64::from(ecu.vss_kmh),
                source: SpeedSource::EcuVss,
            };
        }
    }

    if let Some(gps) = gps {
        if gps.valid {
            return SpeedReading {
                value_kmh: gps.speed_kmh,
                source: SpeedSource::Gps,
            };
        }
    }

    SpeedReading {
        value_kmh: 0.0,
        source: SpeedSource::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_ecu_vss_when_nonzero() {
        let mut ecu = DataFrame::default();
        ecu.vss_kmh = 55;
        let gps = GpsFix {
            valid: true,
            speed_kmh: 42.0,
            ..Default::default()
        };

        let reading = fuse(Some(&ecu), Some(&gps));
        assert_eq!(reading.source, SpeedSource::EcuVss);
        assert_eq!(reading.value_kmh, 55.0);
    }

    #[test]
    fn falls_back_to_gps_when_ecu_vss_is_zero() {
        let ecu = DataFrame::default();
        let gps = GpsFix {
            valid: true,
            speed_kmh: 42.0,
            ..Default::default()
        };

        let reading = fuse(Some(&ecu), Some(&gps));
        assert_eq!(reading.source, SpeedSource::Gps);
        assert_eq!(reading.value_kmh, 42.0);
    }

    #[test]
    fn reports_none_when_neither_source_available() {
        let reading = fuse(None, None);
        assert_eq!(reading.source, SpeedSource::None);
        assert_eq!(reading.value_kmh, 0.0);
    }

    #[test]
    fn ignores_invalid_gps_fix() {
        let gps = GpsFix {
            valid: false,
            speed_kmh: 99.0,
            ..Default::default()
        };
        let reading = fuse(None, Some(&gps));
        assert_eq!(reading.source, SpeedSource::None);
    }
}
