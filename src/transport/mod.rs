//! ISO 15765-2 (DoCAN) transport layer: segmentation and reassembly of
//! diagnostic messages larger than a single CAN frame's 8 data bytes.
//!
//! Split rx/tx like the upstream peripheral's own receive/transmit code:
//! [`rx`] handles frames arriving from the bus, [`tx`] handles outbound
//! segmentation and flow-control-driven retry.

pub mod rx;
pub mod tx;

use crate::frame::Frame;
use crate::hal::{CanTransceiver, ErrorSink};

/// Internal reassembly/segmentation buffer size. Also the largest message
/// this transport can send or receive.
pub const BUFFER_SIZE: usize = 4096;
/// ISO 15765-2's own maximum message size; always `<= BUFFER_SIZE`.
pub const MAX_MESSAGE_SIZE: usize = 4095;
/// Consecutive sequence errors tolerated before a receive is aborted.
pub const SEQ_ERROR_MAX: u8 = 3;
/// Consecutive Frame send failures tolerated before a transmit is aborted.
pub const MAX_RETRIES: u8 = 3;
/// Base flow-control-overflow backoff, doubled per retry.
pub const BACKOFF_MS: u32 = 100;
/// Ceiling on the overflow backoff delay.
pub const MAX_BACKOFF_MS: u32 = 1000;
/// Timeout waiting for the request side (unused locally; informational).
pub const N_AS: u32 = 1000;
/// Timeout waiting for a response (unused locally; informational).
pub const N_AR: u32 = 5000;
/// Timeout waiting for a Flow Control frame after a First Frame.
pub const N_BS: u32 = 1000;
/// Timeout waiting for the next Consecutive Frame.
pub const N_CR: u32 = 1000;

/// Receive-side reassembly state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RxState {
    Idle,
    ReceivingConsecutive,
}

/// Transmit-side segmentation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TxState {
    Idle,
    SendingConsecutive,
    WaitingFlowControl,
}

/// Errors [`Transport::send`] can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendError<E> {
    /// Requested payload exceeds [`MAX_MESSAGE_SIZE`], or is empty.
    TooLong,
    /// `can_id` is not representable as a standard 11-bit identifier.
    InvalidId,
    /// A send is already in progress.
    Busy,
    /// The transceiver failed to accept the frame.
    Transceiver(E),
}

/// A reassembled or ready-to-send message, paired with its CAN id.
#[derive(Debug, Clone, Copy)]
pub struct ReceivedMessage {
    /// The identifier the message arrived on.
    pub can_id: u16,
    /// Number of valid bytes in the backing buffer.
    pub len: u16,
}

/// ISO 15765-2 segmentation/reassembly engine for one logical diagnostic
/// conversation. Owns no transceiver or clock; both are supplied per call,
/// matching the non-blocking, caller-driven style the rest of this crate
/// uses.
pub struct Transport {
    pub(crate) rx_state: RxState,
    pub(crate) rx_buffer: [u8; BUFFER_SIZE],
    pub(crate) rx_total_len: u16,
    pub(crate) rx_received: u16,
    pub(crate) rx_sequence: u8,
    pub(crate) rx_can_id: u16,
    pub(crate) rx_last_cf_time: u32,
    pub(crate) seq_error_count: u8,

    pub(crate) rx_ready_buffer: [u8; BUFFER_SIZE],
    pub(crate) rx_ready_len: u16,
    pub(crate) rx_message_ready: bool,
    dropped_message_count: u32,

    pub(crate) tx_state: TxState,
    pub(crate) tx_buffer: [u8; BUFFER_SIZE],
    pub(crate) tx_total_len: u16,
    pub(crate) tx_sent: u16,
    pub(crate) tx_sequence: u8,
    pub(crate) tx_can_id: u16,
    pub(crate) tx_last_send_time: u32,
    pub(crate) tx_retry_count: u8,
    pub(crate) tx_overflow_count: u8,
    pub(crate) tx_last_overflow_time: u32,
    pub(crate) tx_fc_wait_start: u32,
    pub(crate) tx_block_size: u8,
    pub(crate) tx_st_min: u8,
}

impl Transport {
    /// Creates a transport with empty rx/tx state.
    pub fn new() -> Self {
        Self {
            rx_state: RxState::Idle,
            rx_buffer: [0; BUFFER_SIZE],
            rx_total_len: 0,
            rx_received: 0,
            rx_sequence: 0,
            rx_can_id: 0,
            rx_last_cf_time: 0,
            seq_error_count: 0,

            rx_ready_buffer: [0; BUFFER_SIZE],
            rx_ready_len: 0,
            rx_message_ready: false,
            dropped_message_count: 0,

            tx_state: TxState::Idle,
            tx_buffer: [0; BUFFER_SIZE],
            tx_total_len: 0,
            tx_sent: 0,
            tx_sequence: 0,
            tx_can_id: 0,
            tx_last_send_time: 0,
            tx_retry_count: 0,
            tx_overflow_count: 0,
            tx_last_overflow_time: 0,
            tx_fc_wait_start: 0,
            tx_block_size: 0,
            tx_st_min: 0,
        }
    }

    /// Takes the most recently completed receive, if any. A new
    /// single-frame or completed multi-frame message silently overwrites an
    /// unread previous one; no drop is signalled for that case specifically
    /// (see [`Transport::dropped_message_count`] for the counter this
    /// crate does expose).
    pub fn take_received(&mut self) -> Option<ReceivedMessage> {
        if self.rx_message_ready {
            self.rx_message_ready = false;
            let msg = ReceivedMessage {
                can_id: self.rx_can_id,
                len: self.rx_ready_len,
            };
            Some(msg)
        } else {
            None
        }
    }

    /// The bytes of the last message returned by [`Transport::take_received`]'s
    /// companion call; call this immediately after, before anything else
    /// feeds the transport.
    pub fn received_data(&self) -> &[u8] {
        &self.rx_ready_buffer[..self.rx_ready_len as usize]
    }

    /// Count of multi-frame receives aborted by timeout, sequence error, or
    /// an over-length First Frame. Monotonic, saturating.
    pub fn dropped_message_count(&self) -> u32 {
        self.dropped_message_count
    }

    pub(crate) fn note_dropped(&mut self) {
        self.dropped_message_count = self.dropped_message_count.saturating_add(1);
    }

    fn deliver(&mut self, can_id: u16, len: u16) {
        self.rx_can_id = can_id;
        self.rx_ready_len = len;
        self.rx_message_ready = true;
    }

    /// Periodic housekeeping: advances pending transmits and expires stale
    /// receives. Must be called regularly regardless of frame traffic.
    pub fn tick<T: CanTransceiver, E: ErrorSink>(
        &mut self,
        now_ms: u32,
        transceiver: &mut T,
        errors: &mut E,
    ) {
        tx::tick(self, now_ms, transceiver, errors);
        rx::check_timeout(self, now_ms, errors);
    }
}

impl Default for Transport {
    fn default() -> Self {
        Self::new()
    }
}
