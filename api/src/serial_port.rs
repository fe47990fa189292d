//! This module defines [`SerialTransport`], the [`Transport`] backed by a
//! native serial port.

use crate::transport::{ChunkDecoder, Transport, TransportError};
use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio_serial::{SerialPortBuilderExt, SerialPortInfo, SerialPortType, SerialStream};
use tokio_stream::StreamExt;
use tokio_util::{io::ReaderStream, sync::CancellationToken};

/// How the port to open is chosen.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PortSelection {
    /// Open this exact port, e.g. `/dev/ttyACM0` or `COM3`.
    Named(String),
    /// Pick among the USB serial ports currently attached.
    Auto,
}

/// Lists the USB serial ports attached to the host.
pub fn usb_ports() -> Result<Vec<SerialPortInfo>, TransportError> {
    let ports = tokio_serial::available_ports()
        .map_err(TransportError::UnsupportedTransport)?
        .into_iter()
        .filter(|info| matches!(info.port_type, SerialPortType::UsbPort(_)))
        .collect();

    Ok(ports)
}

/// Serial port connection with independent read and write halves.
#[derive(Debug)]
pub struct SerialTransport {
    port_name: String,
    #[debug(ignore)]
    reader: Option<ReaderStream<ReadHalf<SerialStream>>>,
    #[debug(ignore)]
    writer: Option<WriteHalf<SerialStream>>,
    decoder: ChunkDecoder,
    shutdown: CancellationToken,
}

impl SerialTransport {
    /// Resolves `selection` to a port and opens it at `baud_rate`.
    ///
    /// With [`PortSelection::Auto`] a single attached USB port is used
    /// directly; when there are several, `choose` is asked for the index of
    /// the one to use and may decline by returning `None`.
    pub async fn open<F>(
        selection: &PortSelection,
        baud_rate: u32,
        choose: F,
    ) -> Result<Self, TransportError>
    where
        F: FnOnce(&[SerialPortInfo]) -> Option<usize>,
    {
        let port_name = match selection {
            PortSelection::Named(name) => name.clone(),
            PortSelection::Auto => {
                let mut ports = usb_ports()?;

                let index = match ports.len() {
                    0 => return Err(TransportError::NoPortSelected),
                    1 => 0,
                    _ => choose(&ports).ok_or(TransportError::NoPortSelected)?,
                };

                if index >= ports.len() {
                    return Err(TransportError::NoPortSelected);
                }

                ports.swap_remove(index).port_name
            }
        };

        // native ports are opened in exclusive mode
        let stream = tokio_serial::new(&port_name, baud_rate)
            .open_native_async()
            .map_err(TransportError::OpeningPort)?;

        let (reader, writer) = tokio::io::split(stream);

        info!(port = %port_name, baud_rate, "serial port opened");

        Ok(Self {
            port_name,
            reader: Some(ReaderStream::new(reader)),
            writer: Some(writer),
            decoder: ChunkDecoder::default(),
            shutdown: CancellationToken::new(),
        })
    }

    /// Name of the underlying port.
    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// A token that aborts the pending read when cancelled, e.g. from a
    /// Ctrl-C handler. The port has to be closed afterwards.
    pub fn cancel_handle(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}

impl Transport for SerialTransport {
    async fn write_text(&mut self, data: &str) -> Result<(), TransportError> {
        let writer = self
            .writer
            .as_mut()
            .ok_or(TransportError::WriterUnavailable)?;

        writer
            .write_all(data.as_bytes())
            .await
            .map_err(TransportError::Writing)?;

        writer.flush().await.map_err(TransportError::Writing)
    }

    async fn read_chunk(&mut self) -> Result<String, TransportError> {
        loop {
            let reader = self
                .reader
                .as_mut()
                .ok_or(TransportError::ReaderUnavailable)?;

            let next = tokio::select! {
                _ = self.shutdown.cancelled() => return Err(TransportError::Cancelled),
                next = reader.next() => next,
            };

            match next {
                None => {
                    debug!(port = %self.port_name, "serial stream ended");
                    // a finished stream cannot be read again
                    self.reader = None;

                    return Ok(String::new());
                }
                Some(Err(err)) => return Err(TransportError::Reading(err)),
                Some(Ok(bytes)) => {
                    let text = self.decoder.decode(&bytes);

                    if !text.is_empty() {
                        return Ok(text);
                    }
                }
            }
        }
    }

    async fn close(&mut self) {
        self.shutdown.cancel();

        let was_open = self.reader.is_some() || self.writer.is_some();

        self.reader = None;

        if let Some(mut writer) = self.writer.take() {
            if let Err(err) = writer.shutdown().await {
                debug!("failed to shut down serial writer: {err}");
            }
        }

        if was_open {
            info!(port = %self.port_name, "serial port closed");
        }
    }
}
