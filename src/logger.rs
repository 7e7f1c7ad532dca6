//! Ring-buffered CSV log writer: batches `(timestamp, var_id, value)`
//! records in a fixed-size ring and drains them to a [`StorageSink`] in
//! bounded, at-most-two-segment flushes.
//!
//! Grounded bit-for-bit on `sd_logger.{h,cpp}`'s `logBuffer`/`bufferHead`/
//! `bufferTail`/`bufferUsed` ring and its two-chunk wraparound flush, with
//! the spec's optional sequence-number and CRC-16/CCITT-FALSE checksum
//! columns layered on top (the original has neither).

use core::fmt::Write as _;

use crate::crc::crc16_ccitt_false;
use crate::hal::StorageSink;
use crate::util::{ArrayWriter, FixedStr};

/// Ring buffer capacity in bytes.
pub const BUFFER_SIZE: usize = 4096;
/// Flush once buffered bytes reach this threshold.
pub const WRITE_THRESHOLD: usize = 2048;
/// Flush at least this often regardless of buffer occupancy.
pub const FLUSH_INTERVAL_MS: u32 = 1000;
/// Longest formatted record line, including its newline.
const MAX_LINE_LEN: usize = 128;
/// Highest log file index before the naming scheme wraps back to 1.
pub const MAX_LOG_FILES: u16 = 9999;

/// Errors [`Logger::write_entry`]/[`Logger::write_header`] can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogError {
    /// The formatted line did not fit in the ring's remaining free space.
    /// No bytes were written; the caller may count this as a dropped
    /// record (see [`crate::hal::LogEventSink::on_record_dropped`]).
    BufferFull,
}

/// A bounded ring buffer of formatted CSV bytes plus the per-record
/// sequence-number/checksum columns this build is configured to emit.
pub struct Logger {
    buf: [u8; BUFFER_SIZE],
    head: usize,
    tail: usize,
    used: usize,
    header_written: bool,
    last_flush_ms: u32,
    next_sequence: u32,
    with_sequence: bool,
    with_checksum: bool,
}

impl Logger {
    /// Creates an empty logger. `with_sequence`/`with_checksum` select
    /// which of the four header/record layouts in spec §6 this instance
    /// emits.
    pub fn new(with_sequence: bool, with_checksum: bool) -> Self {
        Self {
            buf: [0; BUFFER_SIZE],
            head: 0,
            tail: 0,
            used: 0,
            header_written: false,
            last_flush_ms: 0,
            next_sequence: 0,
            with_sequence,
            with_checksum,
        }
    }

    /// Bytes currently buffered and not yet handed to the storage sink.
    pub fn used(&self) -> usize {
        self.used
    }

    /// Whether this instance emits a sequence-number column.
    pub fn with_sequence(&self) -> bool {
        self.with_sequence
    }

    /// Whether this instance emits a checksum column.
    pub fn with_checksum(&self) -> bool {
        self.with_checksum
    }

    /// Formats `columns` as a single `\n`-terminated CSV line and enqueues
    /// it. A no-op returning success if a header has already been written
    /// (idempotent, matching `sdLoggerWriteHeader`'s "already written"
    /// early return).
    pub fn write_header(&mut self, columns: &[&str]) -> Result<(), LogError> {
        if self.header_written {
            return Ok(());
        }
        let mut line: ArrayWriter<MAX_LINE_LEN> = ArrayWriter::new();
        for (i, col) in columns.iter().enumerate() {
            if i > 0 {
                let _ = line.write_char(',');
            }
            let _ = line.write_str(col);
        }
        let _ = line.write_char('\n');
        self.enqueue(line.as_bytes())?;
        self.header_written = true;
        Ok(())
    }

    /// Formats and enqueues one log record. Assigns the next sequence
    /// number (if configured) and computes the checksum (if configured)
    /// before formatting. Atomic: either the whole line is enqueued, or
    /// nothing is, and the sequence counter only advances on success — a
    /// dropped record does not open a gap in the sequence of records that
    /// actually reached the ring.
    pub fn write_entry(&mut self, timestamp_ms: u32, var_id: u32, value: f32) -> Result<(), LogError> {
        let sequence = self.with_sequence.then_some(self.next_sequence);

        let mut line: ArrayWriter<MAX_LINE_LEN> = ArrayWriter::new();
        let _ = write!(line, "{timestamp_ms}");
        if let Some(seq) = sequence {
            let _ = write!(line, ",{seq}");
        }
        let _ = write!(line, ",{var_id},{value:.6}");
        if self.with_checksum {
            let crc = record_checksum(timestamp_ms, sequence, var_id, value);
            let _ = write!(line, ",{crc:04X}");
        }
        let _ = line.write_char('\n');

        self.enqueue(line.as_bytes())?;
        if self.with_sequence {
            self.next_sequence = self.next_sequence.wrapping_add(1);
        }
        Ok(())
    }

    /// Flushes the ring to `sink` if `used` has reached
    /// [`WRITE_THRESHOLD`] or [`FLUSH_INTERVAL_MS`] has elapsed since the
    /// last flush. Issues at most two writes (the tail-to-end segment and,
    /// if the ring wraps, the start-to-head segment), so one call's
    /// latency is bounded by two sink writes regardless of how much data
    /// is queued.
    pub fn tick<S: StorageSink>(&mut self, now_ms: u32, sink: &mut S) {
        let due = self.used >= WRITE_THRESHOLD
            || now_ms.wrapping_sub(self.last_flush_ms) >= FLUSH_INTERVAL_MS;
        if !due {
            return;
        }
        self.flush(sink);
        self.last_flush_ms = now_ms;
    }

    fn flush<S: StorageSink>(&mut self, sink: &mut S) {
        if self.used == 0 {
            return;
        }
        if self.tail < self.head {
            if let Ok(written) = sink.write(&self.buf[self.tail..self.head]) {
                self.advance_tail(written);
            }
            return;
        }

        let first_len = BUFFER_SIZE - self.tail;
        let first_written = match sink.write(&self.buf[self.tail..BUFFER_SIZE]) {
            Ok(n) => n,
            Err(_) => return,
        };
        self.advance_tail(first_written);
        if first_written == first_len && self.head > 0 {
            if let Ok(second_written) = sink.write(&self.buf[..self.head]) {
                self.advance_tail(second_written);
            }
        }
    }

    fn advance_tail(&mut self, n: usize) {
        self.tail = (self.tail + n) % BUFFER_SIZE;
        self.used = self.used.saturating_sub(n);
    }

    fn enqueue(&mut self, bytes: &[u8]) -> Result<(), LogError> {
        if bytes.is_empty() || self.used + bytes.len() > BUFFER_SIZE {
            return Err(LogError::BufferFull);
        }
        for &b in bytes {
            self.buf[self.head] = b;
            self.head = (self.head + 1) % BUFFER_SIZE;
        }
        self.used += bytes.len();
        Ok(())
    }
}

/// Computes the record checksum over `(timestamp_ms, [sequence], var_id,
/// value)` serialized in native little-endian order — see
/// `DESIGN.md`'s Open Question resolution on this byte order's portability.
fn record_checksum(timestamp_ms: u32, sequence: Option<u32>, var_id: u32, value: f32) -> u16 {
    let mut buf = [0u8; 16];
    let mut n = 0;
    buf[n..n + 4].copy_from_slice(&timestamp_ms.to_le_bytes());
    n += 4;
    if let Some(seq) = sequence {
        buf[n..n + 4].copy_from_slice(&seq.to_le_bytes());
        n += 4;
    }
    buf[n..n + 4].copy_from_slice(&var_id.to_le_bytes());
    n += 4;
    buf[n..n + 4].copy_from_slice(&value.to_le_bytes());
    n += 4;
    crc16_ccitt_false(&buf[..n])
}

/// Probes for the lowest-numbered unused log file `LOG0001.csv` ..
/// `LOG9999.csv` by calling `exists(n)` for increasing `n`. Wraps back to 1
/// if every slot is taken, matching `getNextLogFileNumber`'s fallback.
pub fn next_log_file_number(mut exists: impl FnMut(u16) -> bool) -> u16 {
    for n in 1..=MAX_LOG_FILES {
        if !exists(n) {
            return n;
        }
    }
    1
}

/// Formats `LOG{file_number:04}.csv` into a fixed-capacity string.
pub fn log_file_name(file_number: u16) -> FixedStr<12> {
    let mut w: ArrayWriter<12> = ArrayWriter::new();
    let _ = write!(w, "LOG{file_number:04}.csv");
    FixedStr::new(core::str::from_utf8(w.as_bytes()).unwrap_or(""))
}

#[cfg(test)]
mod test {
    use super::*;

    struct RecordingSink {
        written: [u8; BUFFER_SIZE * 2],
        len: usize,
        accept: usize,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self {
                written: [0; BUFFER_SIZE * 2],
                len: 0,
                accept: usize::MAX,
            }
        }
    }

    impl StorageSink for RecordingSink {
        type Error = ();
        fn write(&mut self, bytes: &[u8]) -> Result<usize, ()> {
            let n = bytes.len().min(self.accept);
            self.written[self.len..self.len + n].copy_from_slice(&bytes[..n]);
            self.len += n;
            Ok(n)
        }
    }

    #[test]
    fn header_written_once() {
        let mut log = Logger::new(false, false);
        let mut sink = RecordingSink::new();
        log.write_header(&["Time(ms)", "VarID", "Value"]).unwrap();
        let used_after_first = log.used();
        log.write_header(&["Time(ms)", "VarID", "Value"]).unwrap();
        assert_eq!(log.used(), used_after_first);
        log.tick(0, &mut sink);
        assert_eq!(&sink.written[..sink.len], b"Time(ms),VarID,Value\n");
    }

    #[test]
    fn entry_formats_plain_record() {
        let mut log = Logger::new(false, false);
        log.write_entry(1000, 42, 3.5).unwrap();
        let mut sink = RecordingSink::new();
        log.tick(1000, &mut sink);
        assert_eq!(&sink.written[..sink.len], b"1000,42,3.500000\n");
    }

    #[test]
    fn entry_with_sequence_and_checksum() {
        let mut log = Logger::new(true, true);
        log.write_entry(100, 7, 1.0).unwrap();
        let mut sink = RecordingSink::new();
        log.tick(100, &mut sink);
        let line = core::str::from_utf8(&sink.written[..sink.len]).unwrap();
        assert!(line.starts_with("100,0,7,1.000000,"));
        assert_eq!(line.len(), "100,0,7,1.000000,XXXX\n".len());
    }

    #[test]
    fn sequence_increments_only_on_success() {
        let mut log = Logger::new(true, false);
        log.write_entry(0, 1, 0.0).unwrap();
        log.write_entry(0, 1, 0.0).unwrap();
        let mut sink = RecordingSink::new();
        log.tick(0, &mut sink);
        let text = core::str::from_utf8(&sink.written[..sink.len]).unwrap();
        assert!(text.contains(",0,"));
        assert!(text.contains(",1,"));
    }

    #[test]
    fn entry_too_large_for_remaining_capacity_is_rejected_atomically() {
        let mut log = Logger::new(false, false);
        loop {
            if log.write_entry(0, 0, 0.0).is_err() {
                break;
            }
        }
        let used_before = log.used();
        assert!(log.write_entry(1, 2, 3.0).is_err());
        assert_eq!(log.used(), used_before);
    }

    #[test]
    fn flush_uses_at_most_two_segments_across_wraparound() {
        let mut log = Logger::new(false, false);
        // Push the head near the end of the ring, then wrap it.
        for _ in 0..40 {
            log.write_entry(123456789, 1, 1.0).unwrap();
        }
        let mut sink = RecordingSink::new();
        log.tick(0, &mut sink);
        assert_eq!(log.used(), 0);
    }

    #[test]
    fn bounded_flush_returns_after_partial_write() {
        let mut log = Logger::new(false, false);
        for _ in 0..20 {
            log.write_entry(1, 2, 3.0).unwrap();
        }
        let queued = log.used();
        let mut sink = RecordingSink::new();
        sink.accept = 10;
        log.tick(1000, &mut sink);
        assert_eq!(sink.len, 10);
        assert_eq!(log.used(), queued - 10);
    }

    #[test]
    fn file_number_probe_finds_lowest_free_slot() {
        let taken = [1u16, 2, 3];
        let n = next_log_file_number(|candidate| taken.contains(&candidate));
        assert_eq!(n, 4);
    }

    #[test]
    fn file_name_formats_zero_padded() {
        assert_eq!(log_file_name(7).as_str(), "LOG0007.csv");
        assert_eq!(log_file_name(9999).as_str(), "LOG9999.csv");
    }
}
