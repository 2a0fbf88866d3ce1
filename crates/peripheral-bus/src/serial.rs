use crate::{BusError, PortInfo, Result, SerialSettings};
use serialport::SerialPortType;
use std::io::{ErrorKind, Read, Write};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::runtime::Handle;

const READ_TIMEOUT: Duration = Duration::from_millis(200);
const BRIDGE_BUFFER: usize = 256;

/// Open a serial port and expose it as an async byte stream.
///
/// The port itself is blocking, so two OS threads pump bytes between it and the
/// returned half of an in-memory duplex pipe. Both threads exit once the stream is
/// dropped. Must be called from within a tokio runtime.
pub fn open_serial(settings: &SerialSettings) -> Result<DuplexStream> {
    let handle = Handle::try_current()
        .map_err(|_| BusError::Unsupported("open_serial requires a tokio runtime"))?;
    let rx_port = serialport::new(&settings.path, settings.baud_rate)
        .timeout(READ_TIMEOUT)
        .open()
        .map_err(|e| match e.kind {
            serialport::ErrorKind::NoDevice => BusError::PortNotFound(settings.path.clone()),
            _ => BusError::Io(e.to_string()),
        })?;
    let tx_port = rx_port
        .try_clone()
        .map_err(|e| BusError::Io(e.to_string()))?;

    tracing::info!(path = %settings.path, baud = settings.baud_rate, "serial port opened");
    Ok(bridge(&handle, settings.path.clone(), rx_port, tx_port))
}

/// Pump bytes between a blocking reader/writer pair and an in-memory duplex pipe.
///
/// When the reader fails or reports end of input, the pipe's write side is shut
/// down so the async end sees EOF once the buffered bytes are consumed.
fn bridge<R, W>(handle: &Handle, path: String, mut rx_port: R, mut tx_port: W) -> DuplexStream
where
    R: Read + Send + 'static,
    W: Write + Send + 'static,
{
    let (local, remote) = tokio::io::duplex(BRIDGE_BUFFER);
    let (mut remote_rx, mut remote_tx) = tokio::io::split(remote);

    let rx_handle = handle.clone();
    let rx_path = path.clone();
    std::thread::spawn(move || {
        let mut buf = [0u8; 64];
        loop {
            let n = match rx_port.read(&mut buf) {
                Ok(0) => {
                    tracing::warn!(path = %rx_path, "serial port closed");
                    break;
                }
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::TimedOut => continue,
                Err(e) => {
                    tracing::warn!(path = %rx_path, error = %e, "serial read failed");
                    break;
                }
            };
            if rx_handle.block_on(remote_tx.write_all(&buf[..n])).is_err() {
                break;
            }
        }
        // The read half stays alive in the writer thread, so close explicitly.
        let _ = rx_handle.block_on(remote_tx.shutdown());
    });

    let handle = handle.clone();
    std::thread::spawn(move || {
        let mut buf = [0u8; 64];
        loop {
            let n = match handle.block_on(remote_rx.read(&mut buf)) {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            if let Err(e) = tx_port.write_all(&buf[..n]).and_then(|_| tx_port.flush()) {
                tracing::warn!(path = %path, error = %e, "serial write failed");
                break;
            }
        }
    });

    local
}

/// Enumerate serial ports visible to the host.
pub fn list_ports() -> Result<Vec<PortInfo>> {
    let ports = serialport::available_ports().map_err(|e| BusError::Io(e.to_string()))?;
    Ok(ports
        .into_iter()
        .map(|p| {
            let driver = match p.port_type {
                SerialPortType::UsbPort(_) => "usb-serial",
                _ => "serial",
            };
            PortInfo {
                name: p.port_name,
                driver: driver.to_string(),
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::mpsc;

    /// Yields a few bytes, then fails like an unplugged adapter.
    struct FailingPort {
        data: Vec<u8>,
    }

    impl Read for FailingPort {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.data.is_empty() {
                return Err(io::Error::new(ErrorKind::BrokenPipe, "device removed"));
            }
            let n = self.data.len().min(buf.len());
            buf[..n].copy_from_slice(&self.data[..n]);
            self.data.drain(..n);
            Ok(n)
        }
    }

    struct ChannelPort(mpsc::Sender<Vec<u8>>);

    impl Write for ChannelPort {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let _ = self.0.send(buf.to_vec());
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn port_failure_reaches_reader_as_eof() {
        let (tx, _written) = mpsc::channel();
        let port = FailingPort {
            data: vec![0x3C, 0x02, 0x01],
        };
        let mut local = bridge(&Handle::current(), "test".into(), port, ChannelPort(tx));

        let mut frame = [0u8; 17];
        let res = tokio::time::timeout(Duration::from_secs(3), local.read_exact(&mut frame))
            .await
            .unwrap();
        assert_eq!(res.unwrap_err().kind(), ErrorKind::UnexpectedEof);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn host_writes_reach_the_port() {
        let (tx, written) = mpsc::channel();
        let port = FailingPort { data: Vec::new() };
        let mut local = bridge(&Handle::current(), "test".into(), port, ChannelPort(tx));

        local.write_all(&[0xFF, 0x01, 0x86]).await.unwrap();
        let got = tokio::task::spawn_blocking(move || written.recv_timeout(Duration::from_secs(3)))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, vec![0xFF, 0x01, 0x86]);
    }
}
