//! Small fixed-capacity helpers for formatting log records without an
//! allocator.

use core::fmt::{self, Write};

/// A byte buffer with a compile-time capacity that implements
/// [`core::fmt::Write`], so `write!`/`writeln!` can target it directly.
///
/// Writes past capacity are truncated rather than panicking: a partially
/// formatted record is still preferable to crashing the logger task.
pub struct ArrayWriter<const N: usize> {
    buf: [u8; N],
    len: usize,
}

impl<const N: usize> ArrayWriter<N> {
    /// Creates an empty writer.
    pub fn new() -> Self {
        Self {
            buf: [0; N],
            len: 0,
        }
    }

    /// The bytes written so far.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// Discards all written bytes, keeping the backing storage.
    pub fn clear(&mut self) {
        self.len = 0;
    }
}

impl<const N: usize> Default for ArrayWriter<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> Write for ArrayWriter<N> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let bytes = s.as_bytes();
        let available = N - self.len;
        let to_copy = bytes.len().min(available);
        self.buf[self.len..self.len + to_copy].copy_from_slice(&bytes[..to_copy]);
        self.len += to_copy;
        Ok(())
    }
}

/// A fixed-capacity, ASCII-oriented string used for configuration fields
/// (Wi-Fi SSID/password) that need to live in a `no_std` struct without an
/// allocator. Non-ASCII or oversized input is truncated at construction
/// rather than rejected, matching the original firmware's `strncpy`-into-
/// fixed-buffer behavior.
#[derive(Clone, Copy)]
pub struct FixedStr<const N: usize> {
    buf: [u8; N],
    len: u8,
}

impl<const N: usize> FixedStr<N> {
    /// Builds a `FixedStr` from `s`, truncating to `N` bytes if necessary.
    pub fn new(s: &str) -> Self {
        let mut buf = [0u8; N];
        let to_copy = s.len().min(N);
        buf[..to_copy].copy_from_slice(&s.as_bytes()[..to_copy]);
        Self {
            buf,
            len: to_copy as u8,
        }
    }

    /// The string's contents.
    pub fn as_str(&self) -> &str {
        core::str::from_utf8(&self.buf[..self.len as usize]).unwrap_or("")
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// True if the string is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<const N: usize> Default for FixedStr<N> {
    fn default() -> Self {
        Self {
            buf: [0u8; N],
            len: 0,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn writes_within_capacity() {
        let mut w: ArrayWriter<32> = ArrayWriter::new();
        write!(w, "{},{:.3}", 42, 1.5f32).unwrap();
        assert_eq!(w.as_bytes(), b"42,1.500");
    }

    #[test]
    fn truncates_past_capacity() {
        let mut w: ArrayWriter<4> = ArrayWriter::new();
        write!(w, "abcdef").unwrap();
        assert_eq!(w.as_bytes(), b"abcd");
    }

    #[test]
    fn clear_resets_length() {
        let mut w: ArrayWriter<8> = ArrayWriter::new();
        write!(w, "ab").unwrap();
        w.clear();
        assert_eq!(w.as_bytes(), b"");
    }

    #[test]
    fn fixed_str_round_trips_within_capacity() {
        let s: FixedStr<16> = FixedStr::new("hello");
        assert_eq!(s.as_str(), "hello");
        assert_eq!(s.len(), 5);
    }

    #[test]
    fn fixed_str_truncates_oversized_input() {
        let s: FixedStr<4> = FixedStr::new("abcdef");
        assert_eq!(s.as_str(), "abcd");
    }
}
