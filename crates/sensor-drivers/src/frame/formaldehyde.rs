use super::{be_u16, check_len, FrameError, FrameFormat};
use crate::{metric, Reading};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Reporting mode of the formaldehyde sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FormaldehydeMode {
    /// Sensor pushes a concentration frame every second.
    Active = 0,
    /// Sensor only answers explicit requests.
    Query = 1,
}

/// Nine-byte frame of the formaldehyde sensor.
///
/// The frame layout depends on the mode the host last selected, so the decoder and
/// the [`FormaldehydeControl`] writing to the same port share the current mode.
#[derive(Debug, Clone)]
pub struct FormaldehydeFrame {
    mode: Arc<AtomicU8>,
}

impl Default for FormaldehydeFrame {
    fn default() -> Self {
        Self::new(FormaldehydeMode::Active)
    }
}

impl FormaldehydeFrame {
    pub const START: u8 = 0xFF;
    pub const FULL_SCALE: u16 = 2000;

    pub fn new(mode: FormaldehydeMode) -> Self {
        Self {
            mode: Arc::new(AtomicU8::new(mode as u8)),
        }
    }

    pub fn mode(&self) -> FormaldehydeMode {
        match self.mode.load(Ordering::Acquire) {
            0 => FormaldehydeMode::Active,
            _ => FormaldehydeMode::Query,
        }
    }

    pub fn set_mode(&self, mode: FormaldehydeMode) {
        self.mode.store(mode as u8, Ordering::Release);
    }

    /// Two's complement of the byte sum over bytes 1..8.
    pub fn checksum(payload: &[u8]) -> u8 {
        let sum = payload.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
        (0xFF ^ sum).wrapping_add(1)
    }

    fn decode_active(f: &[u8]) -> Result<Reading, FrameError> {
        if f[1..4] != [0x17, 0x04, 0x00] {
            return Err(FrameError::InvariantViolation("active frame gas/unit signature"));
        }
        if be_u16(f, 6) != Self::FULL_SCALE {
            return Err(FrameError::InvariantViolation("full scale is not 2000"));
        }
        Ok(Reading::new().with(metric::CH2O, f64::from(be_u16(f, 4))))
    }

    fn decode_query(f: &[u8]) -> Result<Reading, FrameError> {
        if f[1] != 0x86 {
            return Err(FrameError::BadHeader(f[1]));
        }
        Ok(Reading::new()
            .with(metric::CH2O_MG, f64::from(be_u16(f, 2)))
            .with(metric::CH2O, f64::from(be_u16(f, 6))))
    }
}

impl FrameFormat for FormaldehydeFrame {
    const LEN: usize = 9;
    const NAME: &'static str = "formaldehyde";

    fn decode(&self, f: &[u8]) -> Result<Reading, FrameError> {
        check_len(f, Self::LEN)?;
        if f[0] != Self::START {
            return Err(FrameError::BadHeader(f[0]));
        }
        let computed = Self::checksum(&f[1..8]);
        if computed != f[8] {
            return Err(FrameError::BadChecksum {
                computed,
                carried: f[8],
            });
        }
        match self.mode() {
            FormaldehydeMode::Active => Self::decode_active(f),
            FormaldehydeMode::Query => Self::decode_query(f),
        }
    }
}

/// Host side of the formaldehyde sensor's serial line.
pub struct FormaldehydeControl<W> {
    writer: W,
    frame: FormaldehydeFrame,
}

impl<W: AsyncWrite + Unpin> FormaldehydeControl<W> {
    pub const REQUEST: [u8; 9] = [0xFF, 0x01, 0x86, 0x00, 0x00, 0x00, 0x00, 0x00, 0x79];
    pub const QUERY_MODE: [u8; 9] = [0xFF, 0x01, 0x78, 0x41, 0x00, 0x00, 0x00, 0x00, 0x46];
    pub const ACTIVE_MODE: [u8; 9] = [0xFF, 0x01, 0x78, 0x40, 0x00, 0x00, 0x00, 0x00, 0x47];

    /// `frame` must be the format handed to the decoder reading the same port.
    pub fn new(writer: W, frame: FormaldehydeFrame) -> Self {
        Self { writer, frame }
    }

    async fn send(&mut self, cmd: &[u8; 9]) -> std::io::Result<()> {
        self.writer.write_all(cmd).await?;
        self.writer.flush().await
    }

    /// Ask for one reading. Only answered in query mode.
    pub async fn request(&mut self) -> std::io::Result<()> {
        self.send(&Self::REQUEST).await
    }

    pub async fn query_mode(&mut self) -> std::io::Result<()> {
        self.send(&Self::QUERY_MODE).await?;
        self.frame.set_mode(FormaldehydeMode::Query);
        tracing::debug!("formaldehyde sensor switched to query mode");
        Ok(())
    }

    pub async fn active_mode(&mut self) -> std::io::Result<()> {
        self.send(&Self::ACTIVE_MODE).await?;
        self.frame.set_mode(FormaldehydeMode::Active);
        tracing::debug!("formaldehyde sensor switched to active mode");
        Ok(())
    }

    pub fn mode(&self) -> FormaldehydeMode {
        self.frame.mode()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DecodeStats, FrameDecoder};

    type Control = FormaldehydeControl<Vec<u8>>;

    fn sealed(mut f: [u8; 9]) -> [u8; 9] {
        f[8] = FormaldehydeFrame::checksum(&f[1..8]);
        f
    }

    #[test]
    fn checksum_matches_command_vectors() {
        for cmd in [Control::REQUEST, Control::QUERY_MODE, Control::ACTIVE_MODE] {
            assert_eq!(FormaldehydeFrame::checksum(&cmd[1..8]), cmd[8]);
        }
    }

    #[test]
    fn corrupted_vector_fails_checksum() {
        let mut f = sealed([0xFF, 0x17, 0x04, 0x00, 0x00, 0x25, 0x07, 0xD0, 0x00]);
        f[5] = 0x26;
        assert!(matches!(
            FormaldehydeFrame::default().decode(&f),
            Err(FrameError::BadChecksum { .. })
        ));
    }

    #[test]
    fn zero_payload_checksum_wraps_to_zero() {
        assert_eq!(FormaldehydeFrame::checksum(&[0; 7]), 0x00);
    }

    #[test]
    fn active_frame_yields_ch2o() {
        let f = sealed([0xFF, 0x17, 0x04, 0x00, 0x00, 0x25, 0x07, 0xD0, 0x00]);
        let r = FormaldehydeFrame::default().decode(&f).unwrap();
        assert_eq!(r.get(metric::CH2O), Some(37.0));
        assert_eq!(r.get(metric::CH2O_MG), None);
    }

    #[test]
    fn active_frame_with_wrong_full_scale_is_dropped() {
        let f = sealed([0xFF, 0x17, 0x04, 0x00, 0x00, 0x25, 0x03, 0xE8, 0x00]);
        assert!(matches!(
            FormaldehydeFrame::default().decode(&f),
            Err(FrameError::InvariantViolation(_))
        ));
    }

    #[test]
    fn query_reply_yields_both_units() {
        let f = sealed([0xFF, 0x86, 0x00, 0x2A, 0x00, 0x00, 0x00, 0x20, 0x00]);
        let r = FormaldehydeFrame::new(FormaldehydeMode::Query)
            .decode(&f)
            .unwrap();
        assert_eq!(r.get(metric::CH2O_MG), Some(42.0));
        assert_eq!(r.get(metric::CH2O), Some(32.0));
    }

    #[tokio::test]
    async fn mode_switch_changes_decoder_layout() {
        let frame = FormaldehydeFrame::default();
        let mut ctl = FormaldehydeControl::new(Vec::new(), frame.clone());
        ctl.query_mode().await.unwrap();
        ctl.request().await.unwrap();
        assert_eq!(frame.mode(), FormaldehydeMode::Query);

        let mut sent = Control::QUERY_MODE.to_vec();
        sent.extend_from_slice(&Control::REQUEST);
        assert_eq!(ctl.writer, sent);

        let reply = sealed([0xFF, 0x86, 0x00, 0x10, 0x00, 0x00, 0x00, 0x0C, 0x00]);
        let mut decoder = FrameDecoder::new(&reply[..], frame);
        let r = decoder.next_reading().await.unwrap();
        assert_eq!(r.get(metric::CH2O), Some(12.0));
    }

    #[test]
    fn wrong_start_byte_is_rejected() {
        let mut f = sealed([0xFF, 0x17, 0x04, 0x00, 0x00, 0x25, 0x07, 0xD0, 0x00]);
        f[0] = 0xFE;
        assert_eq!(
            FormaldehydeFrame::default().decode(&f).unwrap_err(),
            FrameError::BadHeader(0xFE)
        );
    }

    #[test]
    fn query_reply_needs_command_echo() {
        let f = sealed([0xFF, 0x17, 0x04, 0x00, 0x00, 0x25, 0x07, 0xD0, 0x00]);
        assert_eq!(
            FormaldehydeFrame::new(FormaldehydeMode::Query)
                .decode(&f)
                .unwrap_err(),
            FrameError::BadHeader(0x17)
        );
    }

    #[tokio::test]
    async fn resyncs_past_rejected_windows() {
        let good = sealed([0xFF, 0x17, 0x04, 0x00, 0x00, 0x40, 0x07, 0xD0, 0x00]);
        let mut bad_start = good;
        bad_start[0] = 0x00;
        let mut bad_sum = good;
        bad_sum[8] ^= 0x01;

        let mut stream = Vec::new();
        for f in [bad_start, bad_sum, good] {
            stream.extend_from_slice(&f);
        }
        let mut decoder = FrameDecoder::new(&stream[..], FormaldehydeFrame::default());
        let r = decoder.next_reading().await.unwrap();
        assert_eq!(r.get(metric::CH2O), Some(64.0));
        assert_eq!(decoder.stats(), DecodeStats { decoded: 1, dropped: 2 });
        assert_eq!(
            decoder.next_reading().await.unwrap_err().kind(),
            std::io::ErrorKind::UnexpectedEof
        );
    }
}
