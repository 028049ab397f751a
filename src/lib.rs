//! Realtime ECU acquisition and fan-out core for a Speeduino dashboard.
//!
//! Establishes and maintains a serial link to a Speeduino ECU across two
//! wire protocol variants, decodes its output-channels block at roughly
//! 20 Hz, fuses it with a parallel NMEA GPS stream, maintains a persistent
//! odometer, and publishes merged frames to an arbitrary number of
//! subscribers with bounded backpressure. Strictly read-only: no burn,
//! write, or reset commands are ever sent to the ECU.

pub mod config;
pub mod dataframe;
pub mod driver;
pub mod envelope;
pub mod error;
pub mod gps;
pub mod odometer;
pub mod parse;
pub mod scheduler;
pub mod serial;
pub mod speed;
pub mod supervisor;

pub use config::{Config, EcuConfig, GpsConfig, GpsMode, ProtocolKind};
pub use dataframe::DataFrame;
pub use driver::{ConnectionState, Driver, ProtocolMode};
pub use error::{CoreError, CoreResult};
pub use gps::GpsFix;
pub use odometer::{Odometer, OdometerState};
pub use scheduler::{MergedFrame, OdometerSnapshot, Scheduler, SubscriberEvent, Subscribers};
pub use speed::{SpeedReading, SpeedSource};
