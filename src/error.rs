use thiserror::Error;

/// Errors surfaced by the serial transport, envelope codec, and ECU driver.
///
/// `NmeaChecksumInvalid` sentences are discarded silently by the NMEA
/// decoder and never reach this type; `Cancelled` is expected during
/// cooperative shutdown and is not logged as a failure.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("failed to open port {path}: {source}")]
    PortOpenFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("handshake failed on {path}")]
    HandshakeFailed { path: String },

    #[error("read timed out with {got} of {want} bytes")]
    ReadIncomplete { got: usize, want: usize },

    #[error("expected header byte(s) not present")]
    HeaderMismatch,

    #[error("framed payload length {0} is not one of the allowed sizes")]
    PayloadSizeUnexpected(usize),

    #[error("CRC mismatch: got {got:#010x}, want {want:#010x}")]
    CrcMismatch { got: u32, want: u32 },

    #[error("envelope size {0} is zero or exceeds the 1024-byte cap")]
    EnvelopeSizeInvalid(u16),

    #[error("write failed: {0}")]
    Write(#[source] std::io::Error),

    #[error("odometer state could not be persisted: {0}")]
    OdometerPersistFailed(#[source] std::io::Error),

    #[error("operation cancelled")]
    Cancelled,
}

pub type CoreResult<T> = Result<T, CoreError>;
