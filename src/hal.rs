//! Collaborator traits standing in for the platform-specific layers this
//! crate does not own: the physical CAN transceiver, a monotonic clock,
//! persistent log storage, and the configuration backend.
//!
//! Mirrors the boundary the bus-management code draws around
//! `Dependencies<Id>` rather than owning register access directly: logic
//! here is written against these traits so it can run unmodified on
//! whatever board wires them up.

use crate::frame::Frame;

/// Transmits CAN frames onto the physical bus.
pub trait CanTransceiver {
    /// Error type for transmit failures.
    type Error;

    /// Attempt to transmit `frame`. Returns `WouldBlock` if the transmit
    /// mailbox is currently busy; the caller is expected to retry later.
    fn transmit(&mut self, frame: &Frame) -> nb::Result<(), Self::Error>;
}

/// Monotonic millisecond time source.
pub trait Clock {
    /// Milliseconds since an arbitrary epoch. Must never go backwards.
    fn now_ms(&self) -> u32;
}

/// Append-only sink for log bytes (an SD card file, a ring of flash pages,
/// a serial port — whatever the board provides).
pub trait StorageSink {
    /// Error type for write failures.
    type Error;

    /// Write as many of `bytes` as can currently be accepted, returning the
    /// count actually written. A short write is not an error.
    fn write(&mut self, bytes: &[u8]) -> Result<usize, Self::Error>;
}

/// Keyed persistent storage backing the configuration store.
pub trait ConfigBackend {
    /// Error type for backend access failures.
    type Error;

    /// Reads up to `buf.len()` bytes stored under `key`, returning the
    /// number of bytes actually present. Absent keys return `Ok(0)`.
    fn read(&mut self, key: &str, buf: &mut [u8]) -> Result<usize, Self::Error>;

    /// Overwrites the bytes stored under `key`.
    fn write(&mut self, key: &str, bytes: &[u8]) -> Result<(), Self::Error>;
}

/// Receives notification of transport/UDS-layer error conditions. Stands in
/// for the original firmware's `iso15765_error_callback_t` function pointer.
pub trait ErrorSink {
    /// Called with a coarse error code and static description whenever a
    /// recoverable protocol error occurs.
    fn on_error(&mut self, code: ErrorCode, description: &'static str);
}

/// Receives notification of logger lifecycle events (file rotation, dropped
/// records). Stands in for the original firmware's `DEBUG_PRINT` calls.
pub trait LogEventSink {
    /// Called when the logger opens a new log file.
    fn on_file_opened(&mut self, file_number: u16);
    /// Called when a log record could not be appended because the ring
    /// buffer was full.
    fn on_record_dropped(&mut self);
}

/// Coarse classification of transport/UDS error conditions, reported via
/// [`ErrorSink::on_error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// A consecutive frame did not arrive before `N_Cr` elapsed.
    Timeout,
    /// A consecutive frame arrived with an unexpected sequence number.
    SequenceError,
    /// A first frame announced a length this implementation cannot buffer.
    BufferOverflow,
    /// A flow control frame did not arrive before `N_Bs` elapsed.
    FlowControlTimeout,
    /// The peer requested overflow one too many times.
    FlowControlOverflow,
}

/// [`ErrorSink`] implementation that discards every report. Useful for
/// tests and for boards with nowhere to route diagnostics.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullErrorSink;

impl ErrorSink for NullErrorSink {
    fn on_error(&mut self, _code: ErrorCode, _description: &'static str) {}
}

/// [`LogEventSink`] implementation that discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLogEventSink;

impl LogEventSink for NullLogEventSink {
    fn on_file_opened(&mut self, _file_number: u16) {}
    fn on_record_dropped(&mut self) {}
}
