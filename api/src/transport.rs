//! This module defines the [`Transport`] trait, the byte link the sync
//! protocol runs over.
//!
//! The protocol never names a concrete port type. It is handed something
//! implementing [`Transport`], which lets the serial implementation in
//! [`crate::serial_port`] be swapped for a scripted one in tests.

use bytes::{Buf, BytesMut};
use std::future::Future;

/// Error produced by a [`Transport`].
#[derive(Debug, Display, Error)]
pub enum TransportError {
    /// The host has no usable serial support.
    #[display("serial ports are not supported on this host: {_0}")]
    UnsupportedTransport(tokio_serial::Error),
    /// The user did not pick a port, or there was none to pick.
    #[display("no serial port selected")]
    NoPortSelected,
    /// The port exists but could not be opened.
    #[display("failed to open serial port: {_0}")]
    OpeningPort(tokio_serial::Error),
    /// Nothing is open to write to.
    #[display("writer not available")]
    WriterUnavailable,
    /// Nothing is open to read from.
    #[display("reader not available")]
    ReaderUnavailable,
    /// Writing to the device failed.
    #[display("failed to write to the device: {_0}")]
    Writing(std::io::Error),
    /// Reading from the device failed.
    #[display("failed to read from the device: {_0}")]
    Reading(std::io::Error),
    /// The pending read was cancelled because the port is closing.
    #[display("read cancelled")]
    Cancelled,
}

/// A bidirectional text link to the keyboard.
///
/// Only one read may be outstanding at a time, which `&mut self` enforces.
/// Reads must be cancel-safe: dropping a pending [`Transport::read_chunk`]
/// future must not lose data that was already received.
pub trait Transport: Send {
    /// Encodes `data` as UTF-8 and writes all of it.
    fn write_text(&mut self, data: &str) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Waits for the next chunk of text.
    ///
    /// An empty string means the stream has ended.
    fn read_chunk(&mut self) -> impl Future<Output = Result<String, TransportError>> + Send;

    /// Releases the link. Calling it again is a no-op.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// Turns raw byte chunks into text without splitting multi-byte characters.
///
/// Bytes of a character cut off at the end of a chunk are held back until
/// the rest of it arrives.
#[derive(Debug, Default)]
pub(crate) struct ChunkDecoder {
    pending: BytesMut,
}

impl ChunkDecoder {
    pub(crate) fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);

        let mut text = String::with_capacity(self.pending.len());

        loop {
            let err = match std::str::from_utf8(&self.pending) {
                Ok(valid) => {
                    text.push_str(valid);
                    self.pending.clear();

                    break;
                }
                Err(err) => err,
            };

            let valid = self.pending.split_to(err.valid_up_to());
            text.push_str(&String::from_utf8_lossy(&valid));

            match err.error_len() {
                Some(invalid) => {
                    warn!("data received is not utf8, replacing invalid bytes\n{err}");
                    text.push(char::REPLACEMENT_CHARACTER);
                    self.pending.advance(invalid);
                }
                None => {
                    debug!(
                        "chunk ends inside a utf8 sequence, holding back {} bytes",
                        self.pending.len()
                    );

                    break;
                }
            }
        }

        text
    }
}
