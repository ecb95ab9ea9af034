//! Device channel: [`SerialChannel`] over any byte stream.
//!
//! [`LineChannel`] frames an `AsyncRead + AsyncWrite` stream with
//! [`LineCodec`] and bounds each read by the configured read timeout.  The
//! same type serves a local serial port (`tokio-serial`), a TCP serial bridge,
//! and the in-memory duplex streams used by tests.
//!
//! A partial line that has not seen its terminator when the timeout fires
//! stays buffered in the codec and is completed by a later read.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, StopBits};
use tokio_util::codec::Framed;
use tracing::info;

use crate::application::{ChannelError, SerialChannel};
use crate::domain::DeviceEndpoint;
use crate::infrastructure::codec::LineCodec;

/// Line-framed device stream with a per-read timeout.
#[derive(Debug)]
pub struct LineChannel<T> {
    framed: Framed<T, LineCodec>,
    read_timeout: Duration,
}

impl<T> LineChannel<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: T, read_timeout: Duration, max_line_length: usize) -> Self {
        Self {
            framed: Framed::new(stream, LineCodec::new(max_line_length)),
            read_timeout,
        }
    }
}

#[async_trait]
impl<T> SerialChannel for LineChannel<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn read_line(&mut self) -> Result<Option<String>, ChannelError> {
        match timeout(self.read_timeout, self.framed.next()).await {
            Err(_elapsed) => Ok(None),
            Ok(None) => Err(ChannelError::Closed),
            Ok(Some(Ok(line))) => Ok(Some(line)),
            Ok(Some(Err(e))) => Err(ChannelError::Io(e)),
        }
    }

    async fn write_line(&mut self, line: &str) -> Result<(), ChannelError> {
        // `send` flushes, so the command is on the wire before the engine
        // starts counting read attempts.
        self.framed.send(line).await?;
        Ok(())
    }
}

/// Opens the device described by `endpoint`.
///
/// Serial ports are opened 8N1 without flow control.
///
/// # Errors
///
/// [`ChannelError::Open`] if the port cannot be opened or the bridge refuses
/// the connection.
pub async fn open_device(
    endpoint: &DeviceEndpoint,
    read_timeout: Duration,
    max_line_length: usize,
) -> Result<Box<dyn SerialChannel>, ChannelError> {
    let open_error = |source: io::Error| ChannelError::Open {
        endpoint: endpoint.to_string(),
        source,
    };

    match endpoint {
        DeviceEndpoint::Serial { path, baud_rate } => {
            let port = tokio_serial::new(path.as_str(), *baud_rate)
                .data_bits(DataBits::Eight)
                .parity(Parity::None)
                .stop_bits(StopBits::One)
                .flow_control(FlowControl::None)
                .open_native_async()
                .map_err(|e| open_error(io::Error::from(e)))?;
            info!("opened serial device {endpoint}");
            Ok(Box::new(LineChannel::new(port, read_timeout, max_line_length)))
        }
        DeviceEndpoint::Tcp(addr) => {
            let stream = TcpStream::connect(addr).await.map_err(open_error)?;
            // Commands are single short lines; do not hold them back.
            stream.set_nodelay(true).map_err(open_error)?;
            info!("connected to serial bridge {endpoint}");
            Ok(Box::new(LineChannel::new(stream, read_timeout, max_line_length)))
        }
    }
}
