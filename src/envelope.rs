//! Size + CRC-32 framing for the framed protocol variant.
//!
//! `[size_hi, size_lo, payload.., crc32_be_4]`. Size is a 16-bit big-endian
//! payload length; CRC is CRC-32/IEEE-802.3 over the payload only.

use std::time::Duration;

use crate::error::{CoreError, CoreResult};
use crate::serial::SerialTransport;

const MAX_PAYLOAD: usize = 1024;

/// Wraps `payload` in the size + CRC-32 envelope.
pub fn wrap(payload: &[u8]) -> Vec<u8> {
    let len = payload.len() as u16;
    let crc = crc32fast::hash(payload);

    let mut frame = Vec::with_capacity(2 + payload.len() + 4);
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(payload);
    frame.extend_from_slice(&crc.to_be_bytes());
    frame
}

/// Reads one envelope off `transport` and returns its verified payload.
pub async fn read_frame(
    transport: &mut dyn SerialTransport,
    deadline: Duration,
) -> CoreResult<Vec<u8>> {
    let size_bytes = transport.read_exact(2, deadline).await?;
    let size = u16::from_be_bytes([size_bytes[0], size_bytes[1]]);

    if size == 0 || size as usize > MAX_PAYLOAD {
        return Err(CoreError::EnvelopeSizeInvalid(size));
    }

    let payload = transport.read_exact(size as usize, deadline).await?;
    let crc_bytes = transport.read_exact(4, deadline).await?;
    let want = u32::from_be_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
    let got = crc32fast::hash(&payload);

    if got != want {
        return Err(CoreError::CrcMismatch { got, want });
    }

    Ok(payload)
}

/// Decodes an already-assembled envelope buffer (used by tests that want a
/// synchronous round-trip check rather than driving a transport).
pub fn decode(frame: &[u8]) -> CoreResult<Vec<u8>> {
    if frame.len() < 6 {
        return Err(CoreError::EnvelopeSizeInvalid(0));
    }
    let size = u16::from_be_bytes([frame[0], frame[1]]);
    if size == 0 || size as usize > MAX_PAYLOAD {
        return Err(CoreError::EnvelopeSizeInvalid(size));
    }
    let size = size as usize;
    if frame.len() != 2 + size + 4 {
        return Err(CoreError::EnvelopeSizeInvalid(size as u16));
    }
    let payload = &frame[2..2 + size];
    let crc_bytes = &frame[2 + size..2 + size + 4];
    let want = u32::from_be_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
    let got = crc32fast::hash(payload);
    if got != want {
        return Err(CoreError::CrcMismatch { got, want });
    }
    Ok(payload.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::testing::ScriptedTransport;

    #[test]
    fn wrap_then_decode_round_trips_arbitrary_payloads() {
        for len in [0usize, 1, 7, 130, 1024] {
            let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let frame = wrap(&payload);
            if payload.is_empty() {
                assert!(decode(&frame).is_err());
            } else {
                assert_eq!(decode(&frame).unwrap(), payload);
            }
        }
    }

    #[test]
    fn single_byte_perturbation_breaks_decode() {
        let payload = b"speeduino 202501".to_vec();
        let frame = wrap(&payload);

        // Flip a payload byte: CRC should no longer match.
        let mut corrupt = frame.clone();
        corrupt[4] ^= 0x01;
        assert!(matches!(decode(&corrupt), Err(CoreError::CrcMismatch { .. })));

        // Flip a size byte: either the size or the CRC will disagree.
        let mut corrupt_size = frame.clone();
        corrupt_size[1] ^= 0x01;
        assert!(decode(&corrupt_size).is_err());
    }

    #[tokio::test]
    async fn read_frame_over_transport_matches_wrap() {
        let payload = vec![1, 2, 3, 4, 5];
        let frame = wrap(&payload);

        let mut transport = ScriptedTransport::new();
        transport.push_bytes(&frame);

        let decoded = read_frame(&mut transport, Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(decoded, payload);
    }

    #[tokio::test]
    async fn read_frame_rejects_oversized_length() {
        let mut transport = ScriptedTransport::new();
        transport.push_bytes(&[0xFF, 0xFF]);

        let err = read_frame(&mut transport, Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::EnvelopeSizeInvalid(_)));
    }
}
