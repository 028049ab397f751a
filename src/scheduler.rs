//! Runs the ECU and GPS pollers as independent tasks, merges their latest
//! snapshots on a broadcast tick, and fans merged frames out to subscribers
//! without letting a slow subscriber block the others (spec.md §4.7, §5).

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::Config;
use crate::dataframe::DataFrame;
use crate::driver::Driver;
use crate::gps::{GpsFix, NmeaDecoder};
use crate::odometer::{Odometer, OdometerState};
use crate::serial::{SerialTransport, TokioSerialTransport};
use crate::speed::{self, SpeedReading};

const SUBSCRIBER_CAPACITY: usize = 64;
const GPS_POLL_HZ: u32 = 10;
const ODOMETER_PERSIST_INTERVAL: Duration = Duration::from_secs(30);

/// Rounded-to-one-decimal odometer figures, suitable for publication.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OdometerSnapshot {
    pub total_km: f64,
    pub trip_km: f64,
}

impl From<OdometerState> for OdometerSnapshot {
    fn from(state: OdometerState) -> Self {
        Self {
            total_km: (state.total_km * 10.0).round() / 10.0,
            trip_km: (state.trip_km * 10.0).round() / 10.0,
        }
    }
}

/// Produced per broadcast tick; consumed by the subscriber fan-out.
/// `stamp_ms` is monotonic, taken at merge time rather than at acquisition
/// time (spec.md §5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergedFrame {
    pub ecu: Option<DataFrame>,
    pub gps: Option<GpsFix>,
    pub odometer: OdometerSnapshot,
    pub speed: SpeedReading,
    pub stamp_ms: u64,
}

/// What a subscriber receives: exactly one `Config` snapshot immediately
/// after registering, followed by a `Frame` per broadcast tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SubscriberEvent {
    Config(Config),
    Frame(MergedFrame),
}

/// Bounded, non-blocking subscriber registry. A subscriber that never
/// drains its channel only drops its own frames; it never slows down
/// delivery to anyone else. Dropping the receiver unregisters it lazily on
/// the next publish.
#[derive(Clone, Default)]
pub struct Subscribers {
    senders: Arc<RwLock<Vec<mpsc::Sender<SubscriberEvent>>>>,
}

impl Subscribers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new subscriber and delivers `config` as an initial
    /// snapshot ahead of the first frame (spec.md §4.7, §6).
    pub async fn register(&self, config: &Config) -> mpsc::Receiver<SubscriberEvent> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);
        debug!(protocol = ?config.ecu.protocol, "subscriber registered");
        if tx.send(SubscriberEvent::Config(config.clone())).await.is_err() {
            warn!("subscriber dropped its receiver before the initial config snapshot");
        }
        self.senders.write().await.push(tx);
        rx
    }

    pub async fn publish(&self, frame: MergedFrame) {
        let mut senders = self.senders.write().await;
        senders.retain(|tx| match tx.try_send(SubscriberEvent::Frame(frame.clone())) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("subscriber channel full, dropping frame for it");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }
}

struct LatestCells {
    ecu: watch::Sender<Option<DataFrame>>,
    gps: watch::Sender<Option<GpsFix>>,
}

pub struct Scheduler {
    config: Config,
    subscribers: Subscribers,
    cancel: CancellationToken,
    start: Instant,
    odometer: Arc<Mutex<Odometer>>,
}

impl Scheduler {
    pub async fn new(config: Config) -> Self {
        let odometer = Odometer::load(&config.odometer_path).await;
        Self {
            config,
            subscribers: Subscribers::new(),
            cancel: CancellationToken::new(),
            start: Instant::now(),
            odometer: Arc::new(Mutex::new(odometer)),
        }
    }

    pub fn subscribers(&self) -> Subscribers {
        self.subscribers.clone()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Zeroes the trip counter and persists immediately (spec.md §6).
    pub async fn reset_trip(&self) {
        let mut odo = self.odometer.lock().await;
        odo.reset_trip();
        odo.persist().await;
    }

    /// Starts the ECU poller, GPS poller, broadcast ticker, and odometer
    /// persistence ticker as independent tasks sharing `cancel`. Returns
    /// their join handles; the caller typically awaits them after invoking
    /// `shutdown`.
    pub fn run(&self, driver: Arc<Mutex<Driver>>) -> Vec<tokio::task::JoinHandle<()>> {
        let (ecu_tx, ecu_rx) = watch::channel(None);
        let (gps_tx, gps_rx) = watch::channel(None);
        let cells = LatestCells {
            ecu: ecu_tx,
            gps: gps_tx,
        };

        let mut handles = Vec::new();

        handles.push(tokio::spawn(ecu_poll_loop(
            driver,
            cells.ecu,
            self.config.poll_period(),
            self.cancel.clone(),
        )));

        match self.config.gps.mode {
            crate::config::GpsMode::Nmea => {
                handles.push(tokio::spawn(gps_poll_loop(
                    self.config.gps.clone(),
                    cells.gps,
                    self.odometer.clone(),
                    self.cancel.clone(),
                )));
            }
            crate::config::GpsMode::Simulator => {
                handles.push(tokio::spawn(gps_simulator_loop(
                    cells.gps,
                    self.odometer.clone(),
                    self.cancel.clone(),
                )));
            }
            crate::config::GpsMode::Disabled => {}
        }

        handles.push(tokio::spawn(broadcast_loop(
            ecu_rx,
            gps_rx,
            self.odometer.clone(),
            self.subscribers.clone(),
            self.config.poll_period(),
            self.start,
            self.cancel.clone(),
        )));

        handles.push(tokio::spawn(odometer_persist_loop(
            self.odometer.clone(),
            self.cancel.clone(),
        )));

        handles
    }

    /// Cooperative shutdown: cancels every loop, then flushes the odometer.
    pub async fn shutdown(&self, handles: Vec<tokio::task::JoinHandle<()>>) {
        self.cancel.cancel();
        for handle in handles {
            let _ = handle.await;
        }
        self.odometer.lock().await.persist().await;
    }
}

async fn ecu_poll_loop(
    driver: Arc<Mutex<Driver>>,
    latest: watch::Sender<Option<DataFrame>>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {
                let mut guard = driver.lock().await;
                match guard.poll().await {
                    Ok(frame) => {
                        let _ = latest.send(Some(frame));
                    }
                    Err(e) => {
                        debug!(error = %e, "ECU poll error, keeping previous frame");
                    }
                }
            }
        }
    }
}

async fn gps_poll_loop(
    config: crate::config::GpsConfig,
    latest: watch::Sender<Option<GpsFix>>,
    odometer: Arc<Mutex<Odometer>>,
    cancel: CancellationToken,
) {
    let period = Duration::from_secs_f64(1.0 / f64::from(GPS_POLL_HZ));
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let mut transport = match TokioSerialTransport::open(&config.port_path, config.baud_rate).await {
        Ok(t) => t,
        Err(e) => {
            warn!(error = %e, "GPS port open failed, GPS poller exiting");
            return;
        }
    };

    let mut decoder = NmeaDecoder::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {
                match decoder.poll(&mut transport as &mut dyn SerialTransport).await {
                    Ok(fix) => {
                        let _ = latest.send(Some(fix));
                        odometer.lock().await.update(&fix);
                    }
                    Err(e) => {
                        debug!(error = %e, "GPS poll error, keeping previous fix");
                    }
                }
            }
        }
    }
}

/// Generates a synthetic fix that walks slowly north, for development and
/// demos without a real GPS attached (`GpsMode::Simulator`).
async fn gps_simulator_loop(
    latest: watch::Sender<Option<GpsFix>>,
    odometer: Arc<Mutex<Odometer>>,
    cancel: CancellationToken,
) {
    let period = Duration::from_secs_f64(1.0 / f64::from(GPS_POLL_HZ));
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let mut lat = 43.6532;
    let step_deg = 0.000_02; // roughly 2 m per tick at 10 Hz

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {
                lat += step_deg;
                let fix = GpsFix {
                    valid: true,
                    latitude_deg: lat,
                    longitude_deg: -79.3832,
                    speed_kmh: 20.0,
                    heading_deg: 0.0,
                    altitude_m: 100.0,
                    satellites: 9,
                    fix_quality: 1,
                    hdop: 0.9,
                    utc_time: None,
                };
                let _ = latest.send(Some(fix));
                odometer.lock().await.update(&fix);
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn broadcast_loop(
    mut ecu_rx: watch::Receiver<Option<DataFrame>>,
    mut gps_rx: watch::Receiver<Option<GpsFix>>,
    odometer: Arc<Mutex<Odometer>>,
    subscribers: Subscribers,
    period: Duration,
    start: Instant,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {
                let ecu = *ecu_rx.borrow();
                let gps = *gps_rx.borrow();

                if ecu.is_none() && gps.is_none() {
                    continue;
                }

                let speed = speed::fuse(ecu.as_ref(), gps.as_ref());
                let odometer_snapshot: OdometerSnapshot = odometer.lock().await.snapshot().into();

                let frame = MergedFrame {
                    ecu,
                    gps,
                    odometer: odometer_snapshot,
                    speed,
                    stamp_ms: start.elapsed().as_millis() as u64,
                };

                subscribers.publish(frame).await;
            }
        }
    }
}

async fn odometer_persist_loop(odometer: Arc<Mutex<Odometer>>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(ODOMETER_PERSIST_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {
                odometer.lock().await.persist().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EcuConfig, GpsConfig, GpsMode, ProtocolKind};

    fn test_config(odometer_path: String) -> Config {
        Config {
            ecu: EcuConfig {
                port_path: "/dev/null".into(),
                baud_rate: 115_200,
                can_id: 0,
                stoich: 14.7,
                protocol: ProtocolKind::Plain,
            },
            gps: GpsConfig {
                port_path: "/dev/null".into(),
                baud_rate: 9600,
                mode: GpsMode::Disabled,
            },
            poll_hz: 20,
            odometer_path,
        }
    }

    #[tokio::test]
    async fn subscriber_registration_gets_bounded_channel() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("odometer.txt");
        let config = test_config(path.to_string_lossy().into_owned());
        let scheduler = Scheduler::new(config.clone()).await;
        let subs = scheduler.subscribers();

        let mut rx = subs.register(&config).await;
        assert_eq!(rx.max_capacity(), SUBSCRIBER_CAPACITY);

        // The first delivery is always the config snapshot, ahead of any frame.
        match rx.try_recv().unwrap() {
            SubscriberEvent::Config(got) => assert_eq!(got.ecu.protocol, config.ecu.protocol),
            SubscriberEvent::Frame(_) => panic!("expected config snapshot before any frame"),
        }

        // A slow subscriber that never drains must not block publication to
        // others, nor must it block publish() itself (non-blocking fan-out).
        for i in 0..SUBSCRIBER_CAPACITY + 5 {
            subs.publish(MergedFrame {
                ecu: None,
                gps: None,
                odometer: OdometerSnapshot { total_km: 0.0, trip_km: 0.0 },
                speed: SpeedReading { value_kmh: 0.0, source: crate::speed::SpeedSource::None },
                stamp_ms: i as u64,
            })
            .await;
        }

        // Channel is full but bounded; draining still yields the oldest frame.
        let first = match rx.try_recv().unwrap() {
            SubscriberEvent::Frame(frame) => frame,
            SubscriberEvent::Config(_) => panic!("unexpected second config snapshot"),
        };
        assert_eq!(first.stamp_ms, 0);
    }

    #[tokio::test]
    async fn dropped_subscriber_is_pruned_on_next_publish() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("odometer.txt");
        let config = test_config(path.to_string_lossy().into_owned());
        let scheduler = Scheduler::new(config.clone()).await;
        let subs = scheduler.subscribers();

        let rx = subs.register(&config).await;
        drop(rx);

        subs.publish(MergedFrame {
            ecu: None,
            gps: None,
            odometer: OdometerSnapshot { total_km: 0.0, trip_km: 0.0 },
            speed: SpeedReading { value_kmh: 0.0, source: crate::speed::SpeedSource::None },
            stamp_ms: 0,
        })
        .await;

        assert_eq!(subs.senders.read().await.len(), 0);
    }
}
