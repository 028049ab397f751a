use std::sync::Arc;

use speeduino_dash_core::config::{Config, EcuConfig, GpsConfig, GpsMode, ProtocolKind};
use speeduino_dash_core::driver::Driver;
use speeduino_dash_core::scheduler::Scheduler;
use speeduino_dash_core::supervisor::supervise;
use tokio::sync::Mutex;
use tracing::{info, Level};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::fmt()
        .with_max_level(Level::INFO)
        .with_file(false)
        .init();

    info!("speeduino-dash-core starting");

    let config = Config {
        ecu: EcuConfig {
            port_path: "/dev/ttyUSB0".into(),
            baud_rate: 115_200,
            can_id: 0,
            stoich: 14.7,
            protocol: ProtocolKind::Plain,
        },
        gps: GpsConfig {
            port_path: "/dev/ttyACM0".into(),
            baud_rate: 9600,
            mode: GpsMode::Nmea,
        },
        poll_hz: 20,
        odometer_path: "odometer.txt".into(),
    };

    let scheduler = Scheduler::new(config.clone()).await;
    let cancel = scheduler.cancellation_token();

    let ecu_config = config.ecu.clone();
    let Some(driver) = supervise("ecu", &cancel, || {
        let ecu_config = ecu_config.clone();
        async move { Driver::connect(&ecu_config).await }
    })
    .await
    else {
        info!("shutdown requested before ECU connected");
        return;
    };

    info!("ECU connected, starting scheduler");
    let handles = scheduler.run(Arc::new(Mutex::new(driver)));

    tokio::signal::ctrl_c()
        .await
        .expect("failed to listen for ctrl-c");

    info!("shutdown signal received, flushing odometer and closing port");
    scheduler.shutdown(handles).await;
}
