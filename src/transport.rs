use async_trait::async_trait;
use bytes::Bytes;
use serialport::SerialPort;
use std::{
    io::{self, Write},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info};

use crate::{
    error::{BikeError, Result},
    types::BikeConfig,
};

/// Ordered full-duplex byte stream to the bike firmware
///
/// The stream is assumed byte-reliable but has no framing of its own. Every
/// read blocks until the requested bytes arrive or the stream fails; there is
/// no read timeout.
#[async_trait]
pub trait Transport: Send {
    /// Write every byte of `data` as one contiguous write
    async fn write_all(&mut self, data: &[u8]) -> Result<()>;

    /// Read exactly `len` bytes
    ///
    /// A stream that ends early is a [`BikeError::Transport`] error.
    async fn read_exact(&mut self, len: usize) -> Result<Bytes>;

    /// Read up to and including the first `sentinel` byte
    ///
    /// If the stream ends first, the bytes read so far are returned without
    /// a sentinel and the caller decides how to treat the truncation.
    async fn read_until(&mut self, sentinel: u8) -> Result<Bytes>;

    /// Release the underlying device
    async fn close(&mut self) -> Result<()>;
}

/// Transport over any tokio byte stream
///
/// Useful for serial-over-TCP bridges, pipes, and in-memory streams.
pub struct StreamTransport<S> {
    stream: BufReader<S>,
}

impl<S> StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap a connected stream
    pub fn new(stream: S) -> Self {
        Self {
            stream: BufReader::new(stream),
        }
    }

    /// Unwrap the inner stream, discarding any buffered unread bytes
    pub fn into_inner(self) -> S {
        self.stream.into_inner()
    }
}

#[async_trait]
impl<S> Transport for StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.stream.write_all(data).await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn read_exact(&mut self, len: usize) -> Result<Bytes> {
        let mut buf = vec![0; len];
        self.stream.read_exact(&mut buf).await?;
        Ok(Bytes::from(buf))
    }

    async fn read_until(&mut self, sentinel: u8) -> Result<Bytes> {
        let mut buf = Vec::new();
        self.stream.read_until(sentinel, &mut buf).await?;
        Ok(Bytes::from(buf))
    }

    async fn close(&mut self) -> Result<()> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

type SharedPort = Arc<Mutex<Box<dyn SerialPort>>>;

/// Transport over a local serial device
///
/// The port is cloned into separate reader and writer handles so a write is
/// never queued behind a read that is still waiting for the device. Blocking
/// I/O runs on tokio's blocking pool.
pub struct SerialTransport {
    name: String,
    reader: SharedPort,
    writer: SharedPort,
    closed: Arc<AtomicBool>,
}

impl SerialTransport {
    /// Open the serial device named in `config`
    ///
    /// # Errors
    ///
    /// Returns [`BikeError::Serial`] if the device cannot be opened or cloned.
    pub fn open(config: &BikeConfig) -> Result<Self> {
        info!(
            "Opening serial port {} at {} baud",
            config.serial_port, config.baud_rate
        );

        let writer = serialport::new(&config.serial_port, config.baud_rate)
            .timeout(config.read_poll_interval())
            .open()?;
        let reader = writer.try_clone()?;

        Ok(Self {
            name: config.serial_port.clone(),
            reader: Arc::new(Mutex::new(reader)),
            writer: Arc::new(Mutex::new(writer)),
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Device path this transport was opened on
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    async fn with_reader<T, F>(&self, read: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn SerialPort, &AtomicBool) -> io::Result<T> + Send + 'static,
    {
        let reader = Arc::clone(&self.reader);
        let closed = Arc::clone(&self.closed);

        let outcome = tokio::task::spawn_blocking(move || {
            let mut port = reader
                .lock()
                .map_err(|_| io::Error::other("serial reader lock poisoned"))?;
            read(port.as_mut(), &closed)
        })
        .await
        .map_err(io::Error::other)?;

        Ok(outcome?)
    }
}

/// Fill as much of `buf` as one poll allows; `Ok(0)` is end of stream
fn poll_read(port: &mut dyn SerialPort, buf: &mut [u8], closed: &AtomicBool) -> io::Result<usize> {
    loop {
        if closed.load(Ordering::Acquire) {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "serial port closed",
            ));
        }

        match port.read(buf) {
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::Interrupted) => {}
            other => return other,
        }
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BikeError::Transport(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "serial port closed",
            )));
        }

        let writer = Arc::clone(&self.writer);
        let data = data.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut port = writer
                .lock()
                .map_err(|_| io::Error::other("serial writer lock poisoned"))?;
            port.write_all(&data)?;
            port.flush()
        })
        .await
        .map_err(io::Error::other)??;

        Ok(())
    }

    async fn read_exact(&mut self, len: usize) -> Result<Bytes> {
        self.with_reader(move |port, closed| {
            let mut buf = vec![0; len];
            let mut filled = 0;
            while filled < len {
                match poll_read(port, &mut buf[filled..], closed)? {
                    0 => {
                        return Err(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            format!("serial stream ended after {filled} of {len} bytes"),
                        ))
                    }
                    n => filled += n,
                }
            }
            Ok(Bytes::from(buf))
        })
        .await
    }

    async fn read_until(&mut self, sentinel: u8) -> Result<Bytes> {
        self.with_reader(move |port, closed| {
            let mut buf = Vec::new();
            let mut byte = [0u8; 1];
            loop {
                if poll_read(port, &mut byte, closed)? == 0 {
                    break;
                }
                buf.push(byte[0]);
                if byte[0] == sentinel {
                    break;
                }
            }
            Ok(Bytes::from(buf))
        })
        .await
    }

    async fn close(&mut self) -> Result<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!("Closing serial port {}", self.name);
        }
        Ok(())
    }
}
