//! End-to-end scenarios driven against a cooperative scripted transport,
//! covering the literal examples from the specification (§8).

use std::time::Duration;

use speeduino_dash_core::config::{EcuConfig, ProtocolKind};
use speeduino_dash_core::dataframe::DataFrame;
use speeduino_dash_core::driver::{ConnectionState, Driver};
use speeduino_dash_core::envelope::wrap;
use speeduino_dash_core::gps::GpsFix;
use speeduino_dash_core::odometer::Odometer;
use speeduino_dash_core::serial::testing::ScriptedTransport;
use speeduino_dash_core::speed::{fuse, SpeedSource};

fn plain_config() -> EcuConfig {
    EcuConfig {
        port_path: "scripted".into(),
        baud_rate: 115_200,
        can_id: 0,
        stoich: 14.7,
        protocol: ProtocolKind::Plain,
    }
}

fn framed_config() -> EcuConfig {
    EcuConfig {
        port_path: "scripted".into(),
        baud_rate: 115_200,
        can_id: 0,
        stoich: 14.7,
        protocol: ProtocolKind::Framed,
    }
}

/// Scenario 1 + 2 from spec.md §8: plain enhanced handshake, then a poll
/// whose scripted reply decodes to rpm == 3600.
#[tokio::test(start_paused = true)]
async fn plain_enhanced_handshake_then_poll_decodes_rpm() {
    let mut handshake_transport = ScriptedTransport::new();
    let mut handshake_reply = vec![0x6E, 0x32, 0x77];
    handshake_reply.extend(std::iter::repeat(0u8).take(119));
    handshake_transport.push_reply_after_write(&handshake_reply);

    let handle = tokio::spawn(Driver::handshake_over(
        Box::new(handshake_transport),
        plain_config(),
    ));
    tokio::time::advance(Duration::from_millis(1600)).await;
    let mut driver = handle.await.unwrap().unwrap();
    assert_eq!(driver.state(), ConnectionState::Connected);

    let mut poll_transport = ScriptedTransport::new();
    let mut reply = vec![0x6E, 0x32, 119u8];
    let mut payload = vec![0u8; 119];
    payload[14] = 0x10;
    payload[15] = 0x0E;
    reply.extend_from_slice(&payload);
    poll_transport.push_reply_after_write(&reply);
    driver.replace_transport_for_testing(Box::new(poll_transport));

    let frame = driver.poll().await.unwrap();
    assert_eq!(frame.rpm, 3600);
}

/// Scenario 3 from spec.md §8: framed handshake against a CRC-valid
/// `'Q'` envelope reply.
#[tokio::test(start_paused = true)]
async fn framed_handshake_succeeds_with_crc_validated_envelope() {
    let payload = b"speeduino 202501".to_vec();
    let frame = wrap(&payload);

    let mut transport = ScriptedTransport::new();
    transport.push_reply_after_write(&frame);

    let handle = tokio::spawn(Driver::handshake_over(Box::new(transport), framed_config()));
    tokio::time::advance(Duration::from_millis(1600)).await;
    let driver = handle.await.unwrap().unwrap();

    assert_eq!(driver.state(), ConnectionState::Connected);
    assert!(matches!(driver.protocol(), ProtocolKind::Framed));
}

/// Scenario 4 from spec.md §8: framed poll with a one-byte status prefix.
#[tokio::test(start_paused = true)]
async fn framed_poll_with_status_prefix_decodes_rpm() {
    let handshake_payload = b"speeduino 202501".to_vec();
    let mut handshake_transport = ScriptedTransport::new();
    handshake_transport.push_reply_after_write(&wrap(&handshake_payload));

    let handle = tokio::spawn(Driver::handshake_over(
        Box::new(handshake_transport),
        framed_config(),
    ));
    tokio::time::advance(Duration::from_millis(1600)).await;
    let mut driver = handle.await.unwrap().unwrap();

    let mut poll_payload = vec![0u8; 131];
    poll_payload[0] = 0x00;
    poll_payload[1 + 14] = 0xA0;
    poll_payload[1 + 15] = 0x0F;
    let mut poll_transport = ScriptedTransport::new();
    poll_transport.push_reply_after_write(&wrap(&poll_payload));
    driver.replace_transport_for_testing(Box::new(poll_transport));

    let frame = driver.poll().await.unwrap();
    assert_eq!(frame.rpm, 4000);
}

/// Scenario 5 from spec.md §8: GPS odometer accumulation then reseed.
#[tokio::test]
async fn odometer_accumulates_then_reseeds_on_large_jump() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("odometer.txt");
    let mut odo = Odometer::load(&path).await;

    let fix_a = GpsFix {
        valid: true,
        latitude_deg: 43.6532,
        longitude_deg: -79.3832,
        speed_kmh: 30.0,
        ..Default::default()
    };
    let fix_b = GpsFix {
        latitude_deg: 43.65329,
        ..fix_a
    };
    let fix_jump = GpsFix {
        latitude_deg: 43.75,
        longitude_deg: -79.38,
        ..fix_a
    };

    odo.update(&fix_a);
    odo.update(&fix_b);
    let accumulated = odo.snapshot().total_km;
    assert!(accumulated > 0.005 && accumulated < 0.02, "{accumulated}");
    assert_eq!(odo.snapshot().trip_km, accumulated);

    odo.update(&fix_jump);
    assert_eq!(odo.snapshot().total_km, accumulated, "jump must not accumulate");
}

/// Scenario 6 from spec.md §8: speed fuser prefers ECU VSS, falls back to
/// GPS, and the preference flips tick to tick as ECU data changes.
#[test]
fn speed_fuser_prefers_ecu_then_falls_back_to_gps() {
    let gps = GpsFix {
        valid: true,
        speed_kmh: 42.0,
        ..Default::default()
    };

    let reading = fuse(None, Some(&gps));
    assert_eq!(reading.source, SpeedSource::Gps);
    assert_eq!(reading.value_kmh, 42.0);

    let mut ecu = DataFrame::default();
    ecu.vss_kmh = 55;
    let reading = fuse(Some(&ecu), Some(&gps));
    assert_eq!(reading.source, SpeedSource::EcuVss);
    assert_eq!(reading.value_kmh, 55.0);
}
