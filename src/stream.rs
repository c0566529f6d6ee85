//! Control stream ownership
//!
//! Exactly one byte stream talks to the modem at a time. Installing a new stream revokes
//! the previous one, whose owner is told through its revocation callback.

use alloc::boxed::Box;
use core::fmt;

use embedded_hal::serial;
use log::info;

/// Stream I/O failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamError {
    /// Underlying transport failed
    Io,
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamError::Io => f.write_str("stream I/O error"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for StreamError {}

/// A duplex byte stream
pub trait Stream {
    /// Read one byte, `WouldBlock` if none is available
    fn read(&mut self) -> nb::Result<u8, StreamError>;

    /// Write one byte
    fn write(&mut self, byte: u8) -> nb::Result<(), StreamError>;

    /// Push out buffered bytes
    fn flush(&mut self) -> nb::Result<(), StreamError>;

    /// Write all of `bytes`, blocking while the stream is busy
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), StreamError> {
        for &byte in bytes {
            nb::block!(self.write(byte))?;
        }
        Ok(())
    }
}

impl<S: Stream + ?Sized> Stream for Box<S> {
    fn read(&mut self) -> nb::Result<u8, StreamError> {
        (**self).read()
    }

    fn write(&mut self, byte: u8) -> nb::Result<(), StreamError> {
        (**self).write(byte)
    }

    fn flush(&mut self) -> nb::Result<(), StreamError> {
        (**self).flush()
    }
}

/// Sink installed while no client is connected
#[derive(Debug, Default, Clone, Copy)]
pub struct NullStream;

impl Stream for NullStream {
    fn read(&mut self) -> nb::Result<u8, StreamError> {
        Err(nb::Error::WouldBlock)
    }

    fn write(&mut self, _byte: u8) -> nb::Result<(), StreamError> {
        Ok(())
    }

    fn flush(&mut self) -> nb::Result<(), StreamError> {
        Ok(())
    }
}

/// Adapter for an `embedded-hal` serial port
pub struct SerialStream<S> {
    port: S,
}

impl<S> SerialStream<S>
where
    S: serial::Read<u8> + serial::Write<u8>,
{
    /// Wrap a serial port
    pub fn new(port: S) -> Self {
        Self { port }
    }

    /// Give back the serial port
    pub fn release(self) -> S {
        self.port
    }
}

impl<S> Stream for SerialStream<S>
where
    S: serial::Read<u8> + serial::Write<u8>,
{
    fn read(&mut self) -> nb::Result<u8, StreamError> {
        self.port.read().map_err(|e| e.map(|_| StreamError::Io))
    }

    fn write(&mut self, byte: u8) -> nb::Result<(), StreamError> {
        self.port.write(byte).map_err(|e| e.map(|_| StreamError::Io))
    }

    fn flush(&mut self) -> nb::Result<(), StreamError> {
        self.port.flush().map_err(|e| e.map(|_| StreamError::Io))
    }
}

/// Identity of a client stream; two streams with the same id are the same client
pub type StreamId = u32;

/// A stream offered by a transport, tagged with its identity
pub struct ClientStream {
    /// Identity of the client
    pub id: StreamId,
    /// The byte stream
    pub io: Box<dyn Stream>,
}

impl ClientStream {
    /// Tag `io` with `id`
    pub fn new(id: StreamId, io: impl Stream + 'static) -> Self {
        Self {
            id,
            io: Box::new(io),
        }
    }
}

/// Told once when its stream is replaced
pub type RevokedCallback = Box<dyn FnOnce()>;

/// Holds the single active control stream
pub struct StreamManager {
    active: Box<dyn Stream>,
    active_id: Option<StreamId>,
    on_revoked: Option<RevokedCallback>,
}

impl Default for StreamManager {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamManager {
    /// Start with no client, writes go to a [`NullStream`]
    pub fn new() -> Self {
        Self {
            active: Box::new(NullStream),
            active_id: None,
            on_revoked: None,
        }
    }

    /// Install `stream` as the active stream
    ///
    /// Returns `false` and leaves everything untouched if `stream` is already active.
    /// Otherwise the previous owner's `on_revoked` runs, then `stream` (or a
    /// [`NullStream`] for `None`) becomes active.
    pub fn set_stream(
        &mut self,
        stream: Option<ClientStream>,
        on_revoked: Option<RevokedCallback>,
    ) -> bool {
        let id = stream.as_ref().map(|s| s.id);
        if id == self.active_id {
            return false;
        }

        if let Some(revoked) = self.on_revoked.take() {
            revoked();
        }
        info!("control stream {:?} replaced by {:?}", self.active_id, id);

        self.active = match stream {
            Some(client) => client.io,
            None => Box::new(NullStream),
        };
        self.active_id = id;
        self.on_revoked = on_revoked;
        true
    }

    /// Id of the active stream, `None` while no client is connected
    pub fn active_id(&self) -> Option<StreamId> {
        self.active_id
    }

    /// The active stream
    pub fn stream(&mut self) -> &mut dyn Stream {
        self.active.as_mut()
    }

    /// Write `bytes` to the active stream and flush it
    pub fn send(&mut self, bytes: &[u8]) -> Result<(), StreamError> {
        self.active.write_all(bytes)?;
        nb::block!(self.active.flush())
    }
}
