//! In-memory total/trip distance accumulator, updated from successive valid
//! GPS fixes and persisted to a tiny text file (spec.md §4.5).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{info, warn};

use crate::error::CoreError;
use crate::gps::GpsFix;

const EARTH_RADIUS_KM: f64 = 6371.0;
const GLITCH_THRESHOLD_KM: f64 = 0.5;
const ACCUMULATE_THRESHOLD_KM: f64 = 0.002;
const STATIONARY_SPEED_KMH: f64 = 1.0;

/// `(total_km, trip_km, last_lat, last_lon, last_fix_valid)`. Total and
/// trip are independent, monotonically non-decreasing accumulators except
/// when `reset_trip` zeroes the trip counter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OdometerState {
    pub total_km: f64,
    pub trip_km: f64,
    #[serde(skip)]
    last_lat: f64,
    #[serde(skip)]
    last_lon: f64,
    #[serde(skip)]
    last_valid: bool,
}

impl Default for OdometerState {
    fn default() -> Self {
        Self {
            total_km: 0.0,
            trip_km: 0.0,
            last_lat: 0.0,
            last_lon: 0.0,
            last_valid: false,
        }
    }
}

/// Haversine great-circle distance between two WGS-84 points, in km.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let dphi = (lat2 - lat1).to_radians();
    let dlambda = (lon2 - lon1).to_radians();

    let a = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().atan2((1.0 - a).sqrt())
}

pub struct Odometer {
    state: OdometerState,
    path: PathBuf,
}

impl Odometer {
    /// Loads persisted state from `path` if present; a missing or corrupt
    /// file seeds both counters to zero rather than erroring.
    pub async fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let state = match fs::read_to_string(&path).await {
            Ok(contents) => parse_state_file(&contents).unwrap_or_default(),
            Err(_) => OdometerState::default(),
        };

        Self { state, path }
    }

    pub fn snapshot(&self) -> OdometerState {
        self.state
    }

    /// Updates accumulators from a new fix per the policy in spec.md §4.5:
    /// invalid or stationary fixes are ignored; a >500 m jump reseeds
    /// position without accumulating; a >2 m delta accumulates onto both
    /// totals; anything smaller is held (prevents stop-light drift).
    pub fn update(&mut self, fix: &GpsFix) {
        if !fix.valid || fix.speed_kmh <= STATIONARY_SPEED_KMH {
            return;
        }

        if !self.state.last_valid {
            self.seed(fix);
            return;
        }

        let d = haversine_km(
            self.state.last_lat,
            self.state.last_lon,
            fix.latitude_deg,
            fix.longitude_deg,
        );

        if d > GLITCH_THRESHOLD_KM {
            self.seed(fix);
        } else if d > ACCUMULATE_THRESHOLD_KM {
            self.state.total_km += d;
            self.state.trip_km += d;
            self.state.last_lat = fix.latitude_deg;
            self.state.last_lon = fix.longitude_deg;
        }
        // else: sub-2m, hold position and accumulators unchanged.
    }

    fn seed(&mut self, fix: &GpsFix) {
        self.state.last_lat = fix.latitude_deg;
        self.state.last_lon = fix.longitude_deg;
        self.state.last_valid = true;
    }

    /// Zeroes only the trip counter; idempotent.
    pub fn reset_trip(&mut self) {
        self.state.trip_km = 0.0;
    }

    /// Atomically persists two decimal lines (`total`, `trip`) to the
    /// configured file. Failures are logged, not propagated — acquisition
    /// must continue regardless (spec.md §7: `OdometerPersistFailed`).
    pub async fn persist(&self) {
        if let Err(e) = self.persist_inner().await {
            warn!(error = %e, "odometer persist failed");
        }
    }

    async fn persist_inner(&self) -> Result<(), CoreError> {
        let contents = format!("{:.6}\n{:.6}\n", self.state.total_km, self.state.trip_km);

        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, contents)
            .await
            .map_err(CoreError::OdometerPersistFailed)?;
        fs::rename(&tmp_path, &self.path)
            .await
            .map_err(CoreError::OdometerPersistFailed)?;

        info!(total_km = self.state.total_km, trip_km = self.state.trip_km, "odometer persisted");
        Ok(())
    }
}

fn parse_state_file(contents: &str) -> Option<OdometerState> {
    let mut lines = contents.lines();
    let total: f64 = lines.next()?.trim().parse().ok()?;
    let trip: f64 = lines.next()?.trim().parse().ok()?;

    Some(OdometerState {
        total_km: total,
        trip_km: trip,
        ..Default::default()
    })
}
