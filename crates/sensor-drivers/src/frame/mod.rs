//! Fixed-length frame decoding for stream peripherals.
//!
//! A [`FrameDecoder`] reads whole windows of [`FrameFormat::LEN`] bytes and hands
//! each to its format. Rejected windows are dropped without shifting, so a
//! misaligned stream resynchronises on the next window boundary.

use crate::Reading;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

mod air_quality;
pub use air_quality::AirQualityFrame;

mod formaldehyde;
pub use formaldehyde::{FormaldehydeControl, FormaldehydeFrame, FormaldehydeMode};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("bad header byte 0x{0:02X}")]
    BadHeader(u8),
    #[error("checksum mismatch: computed 0x{computed:02X}, frame carries 0x{carried:02X}")]
    BadChecksum { computed: u8, carried: u8 },
    #[error("field invariant violated: {0}")]
    InvariantViolation(&'static str),
    #[error("expected {expected} bytes, got {got}")]
    Length { expected: usize, got: usize },
}

/// A fixed-length, checksummed wire format.
pub trait FrameFormat {
    const LEN: usize;
    const NAME: &'static str;

    fn decode(&self, frame: &[u8]) -> Result<Reading, FrameError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeStats {
    pub decoded: u64,
    pub dropped: u64,
}

pub struct FrameDecoder<R, F> {
    reader: R,
    format: F,
    buf: Vec<u8>,
    stats: DecodeStats,
}

impl<R, F> FrameDecoder<R, F>
where
    R: AsyncRead + Unpin,
    F: FrameFormat,
{
    pub fn new(reader: R, format: F) -> Self {
        Self {
            reader,
            format,
            buf: vec![0; F::LEN],
            stats: DecodeStats::default(),
        }
    }

    /// Wait for the next valid frame.
    ///
    /// Only stream errors surface, including `UnexpectedEof` when the source closes.
    pub async fn next_reading(&mut self) -> std::io::Result<Reading> {
        loop {
            self.reader.read_exact(&mut self.buf).await?;
            match self.format.decode(&self.buf) {
                Ok(reading) => {
                    self.stats.decoded += 1;
                    return Ok(reading);
                }
                Err(e) => {
                    self.stats.dropped += 1;
                    tracing::debug!(format = F::NAME, error = %e, "frame dropped");
                }
            }
        }
    }

    pub fn stats(&self) -> DecodeStats {
        self.stats
    }

    pub fn format(&self) -> &F {
        &self.format
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

pub(crate) fn check_len(frame: &[u8], expected: usize) -> Result<(), FrameError> {
    if frame.len() != expected {
        return Err(FrameError::Length {
            expected,
            got: frame.len(),
        });
    }
    Ok(())
}

pub(crate) fn be_u16(frame: &[u8], at: usize) -> u16 {
    u16::from(frame[at]) << 8 | u16::from(frame[at + 1])
}
