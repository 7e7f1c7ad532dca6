//! Outbound segmentation: single-frame sends, First/Consecutive Frame
//! transmission, and Flow-Control-driven pacing/retry.

use super::{SendError, Transport, TxState, BACKOFF_MS, MAX_BACKOFF_MS, MAX_MESSAGE_SIZE, MAX_RETRIES, N_BS};
use crate::frame::{FlowStatus, Frame, Pci};
use crate::hal::{CanTransceiver, ErrorCode, ErrorSink};

/// Sends `data` to `can_id`. Payloads of 7 bytes or fewer go out as a
/// Single Frame immediately; larger payloads begin (or continue) a
/// multi-frame transmission paced by [`Transport::tick`].
pub fn send<T: CanTransceiver>(
    transport: &mut Transport,
    can_id: u16,
    data: &[u8],
    now_ms: u32,
    transceiver: &mut T,
) -> nb::Result<(), SendError<T::Error>> {
    if data.is_empty() {
        return Err(nb::Error::Other(SendError::TooLong));
    }
    if embedded_can::StandardId::new(can_id).is_none() {
        return Err(nb::Error::Other(SendError::InvalidId));
    }
    if data.len() <= 7 {
        let mut buf = [0u8; 8];
        let n = Pci::SingleFrame {
            len: data.len() as u8,
        }
        .encode(&mut buf);
        buf[n..n + data.len()].copy_from_slice(data);
        let frame = Frame::with_standard_id(can_id, &buf[..n + data.len()])
            .map_err(|_| nb::Error::Other(SendError::TooLong))?;
        return transceiver
            .transmit(&frame)
            .map_err(|e| e.map(SendError::Transceiver));
    }

    if data.len() > MAX_MESSAGE_SIZE {
        return Err(nb::Error::Other(SendError::TooLong));
    }
    if transport.tx_state != TxState::Idle {
        return Err(nb::Error::Other(SendError::Busy));
    }

    transport.tx_buffer[..data.len()].copy_from_slice(data);
    transport.tx_total_len = data.len() as u16;
    transport.tx_can_id = can_id;
    transport.tx_sequence = 0;
    transport.tx_overflow_count = 0;

    transmit_first_frame(transport, now_ms, transceiver)
        .map_err(|e| e.map(SendError::Transceiver))
}

fn transmit_first_frame<T: CanTransceiver>(
    transport: &mut Transport,
    now_ms: u32,
    transceiver: &mut T,
) -> nb::Result<(), T::Error> {
    let mut buf = [0u8; 8];
    let n = Pci::FirstFrame {
        total_len: transport.tx_total_len,
    }
    .encode(&mut buf);
    let lead = (8 - n).min(transport.tx_total_len as usize);
    buf[n..n + lead].copy_from_slice(&transport.tx_buffer[..lead]);
    let frame = Frame::with_standard_id(transport.tx_can_id, &buf).expect("tx_can_id validated as a standard id in send()");

    transceiver.transmit(&frame)?;

    transport.tx_sent = lead as u16;
    transport.tx_last_send_time = now_ms;
    transport.tx_fc_wait_start = now_ms;
    transport.tx_state = TxState::SendingConsecutive;
    Ok(())
}

/// Applies a received Flow Control frame to the transmit state. An
/// `Overflow` status that reaches [`MAX_RETRIES`] aborts the send
/// immediately here (matching the original firmware's FC handler), rather
/// than waiting for a later `tick` to notice — otherwise `tick`'s `N_Bs`
/// wait-timeout can fire first and report the wrong error code.
pub(super) fn on_flow_control<E: ErrorSink>(
    transport: &mut Transport,
    status: FlowStatus,
    block_size: u8,
    st_min: u8,
    now_ms: u32,
    errors: &mut E,
) {
    if transport.tx_state != TxState::SendingConsecutive && transport.tx_state != TxState::WaitingFlowControl {
        return;
    }
    transport.tx_block_size = block_size;
    transport.tx_st_min = st_min;

    match status {
        FlowStatus::ContinueToSend => {
            transport.tx_state = TxState::SendingConsecutive;
            transport.tx_fc_wait_start = 0;
            transport.tx_overflow_count = 0;
        }
        FlowStatus::Wait => {
            transport.tx_state = TxState::WaitingFlowControl;
            transport.tx_fc_wait_start = now_ms;
        }
        FlowStatus::Overflow => {
            transport.tx_overflow_count = transport.tx_overflow_count.saturating_add(1);
            if transport.tx_overflow_count >= MAX_RETRIES {
                errors.on_error(
                    ErrorCode::FlowControlOverflow,
                    "Flow control overflow - max retries exceeded",
                );
                transport.tx_state = TxState::Idle;
                transport.tx_overflow_count = 0;
                transport.tx_fc_wait_start = 0;
                return;
            }
            transport.tx_last_overflow_time = now_ms;
            transport.tx_state = TxState::WaitingFlowControl;
        }
    }
}

fn overflow_backoff_ms(overflow_count: u8) -> u32 {
    let doublings = overflow_count.min(4);
    let mut delay = BACKOFF_MS;
    for _ in 0..doublings {
        delay *= 2;
    }
    delay.min(MAX_BACKOFF_MS)
}

/// Advances pending transmit work: retries the First Frame after an
/// overflow backoff, aborts on Flow Control timeout, and sends the next
/// Consecutive Frame once `STmin` has elapsed.
pub(super) fn tick<T: CanTransceiver, E: ErrorSink>(
    transport: &mut Transport,
    now_ms: u32,
    transceiver: &mut T,
    errors: &mut E,
) {
    match transport.tx_state {
        TxState::Idle => {}
        TxState::WaitingFlowControl => {
            if transport.tx_fc_wait_start > 0 && now_ms.wrapping_sub(transport.tx_fc_wait_start) > N_BS
            {
                errors.on_error(ErrorCode::FlowControlTimeout, "Flow control response timeout");
                transport.tx_state = TxState::Idle;
                transport.tx_fc_wait_start = 0;
                return;
            }

            // `on_flow_control` already aborts the send as soon as the overflow
            // count reaches MAX_RETRIES, so by the time we get here there is
            // always another retry to schedule.
            if transport.tx_overflow_count > 0 && transport.tx_last_overflow_time > 0 {
                let backoff = overflow_backoff_ms(transport.tx_overflow_count);
                if now_ms.wrapping_sub(transport.tx_last_overflow_time) >= backoff
                    && transmit_first_frame(transport, now_ms, transceiver).is_ok()
                {
                    transport.tx_last_overflow_time = 0;
                }
            }
        }
        TxState::SendingConsecutive => {
            if now_ms.wrapping_sub(transport.tx_last_send_time) < transport.tx_st_min as u32 {
                return;
            }
            if transport.tx_sent >= transport.tx_total_len {
                transport.tx_state = TxState::Idle;
                return;
            }

            let seq = (transport.tx_sequence + 1) & 0x0F;
            let remaining = (transport.tx_total_len - transport.tx_sent) as usize;
            let to_send = remaining.min(7);
            let mut buf = [0xFFu8; 8];
            let n = Pci::ConsecutiveFrame { sequence: seq }.encode(&mut buf);
            let start = transport.tx_sent as usize;
            buf[n..n + to_send]
                .copy_from_slice(&transport.tx_buffer[start..start + to_send]);
            let frame = Frame::with_standard_id(transport.tx_can_id, &buf).expect("tx_can_id validated as a standard id in send()");

            match transceiver.transmit(&frame) {
                Ok(()) => {
                    transport.tx_sent += to_send as u16;
                    transport.tx_sequence = seq;
                    transport.tx_last_send_time = now_ms;
                    transport.tx_retry_count = 0;
                    if transport.tx_sent >= transport.tx_total_len {
                        transport.tx_state = TxState::Idle;
                        transport.tx_fc_wait_start = 0;
                    }
                }
                Err(_) => {
                    transport.tx_retry_count += 1;
                    if transport.tx_retry_count >= MAX_RETRIES {
                        transport.tx_state = TxState::Idle;
                        transport.tx_retry_count = 0;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::hal::NullErrorSink;

    struct CountingTransceiver {
        frames: heapless_vec::Vec,
    }

    mod heapless_vec {
        use crate::frame::Frame;
        pub struct Vec {
            pub items: [Option<Frame>; 16],
            pub len: usize,
        }
        impl Vec {
            pub fn new() -> Self {
                Self {
                    items: [None; 16],
                    len: 0,
                }
            }
            pub fn push(&mut self, frame: Frame) {
                self.items[self.len] = Some(frame);
                self.len += 1;
            }
        }
    }

    impl CanTransceiver for CountingTransceiver {
        type Error = ();
        fn transmit(&mut self, frame: &Frame) -> nb::Result<(), ()> {
            self.frames.push(*frame);
            Ok(())
        }
    }

    #[test]
    fn short_payload_sends_single_frame() {
        let mut t = Transport::new();
        let mut tx = CountingTransceiver {
            frames: heapless_vec::Vec::new(),
        };
        send(&mut t, 0x7E0, &[1, 2, 3], 0, &mut tx).unwrap();
        assert_eq!(tx.frames.len, 1);
        let f = tx.frames.items[0].unwrap();
        assert_eq!(f.data(), &[0x03, 1, 2, 3]);
    }

    #[test]
    fn long_payload_segments_into_first_and_consecutive_frames() {
        let mut t = Transport::new();
        let mut tx = CountingTransceiver {
            frames: heapless_vec::Vec::new(),
        };
        let mut errors = NullErrorSink;
        let payload: [u8; 10] = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10];
        send(&mut t, 0x7E0, &payload, 0, &mut tx).unwrap();
        assert_eq!(tx.frames.len, 1);
        let ff = tx.frames.items[0].unwrap();
        assert_eq!(ff.data(), &[0x10, 0x0A, 0x00, 1, 2, 3, 4, 5]);
        assert_eq!(t.tx_state, TxState::SendingConsecutive);

        tick(&mut t, 0, &mut tx, &mut errors);
        assert_eq!(tx.frames.len, 2);
        let cf = tx.frames.items[1].unwrap();
        assert_eq!(cf.data(), &[0x21, 6, 7, 8, 9, 10, 0xFF, 0xFF]);
        assert_eq!(t.tx_state, TxState::Idle);
    }

    #[test]
    fn overflow_backoff_doubles_and_caps() {
        assert_eq!(overflow_backoff_ms(0), BACKOFF_MS);
        assert_eq!(overflow_backoff_ms(1), BACKOFF_MS * 2);
        assert_eq!(overflow_backoff_ms(2), BACKOFF_MS * 4);
        assert_eq!(overflow_backoff_ms(10), MAX_BACKOFF_MS);
    }

    struct RecordingErrorSink {
        last: Option<ErrorCode>,
        count: usize,
    }
    impl RecordingErrorSink {
        fn new() -> Self {
            Self { last: None, count: 0 }
        }
    }
    impl ErrorSink for RecordingErrorSink {
        fn on_error(&mut self, code: ErrorCode, _description: &'static str) {
            self.last = Some(code);
            self.count += 1;
        }
    }

    #[test]
    fn third_overflow_aborts_immediately_with_overflow_error() {
        let mut t = Transport::new();
        let mut tx = CountingTransceiver {
            frames: heapless_vec::Vec::new(),
        };
        let payload = [0u8; 20];
        let mut errors = RecordingErrorSink::new();
        send(&mut t, 0x7E0, &payload, 0, &mut tx).unwrap();

        on_flow_control(&mut t, FlowStatus::Overflow, 0, 0, 0, &mut errors);
        assert_eq!(t.tx_state, TxState::WaitingFlowControl);
        assert_eq!(errors.count, 0);

        on_flow_control(&mut t, FlowStatus::Overflow, 0, 0, 200, &mut errors);
        assert_eq!(t.tx_state, TxState::WaitingFlowControl);
        assert_eq!(errors.count, 0);

        // Third overflow hits MAX_RETRIES: aborts right here, not on a later tick.
        on_flow_control(&mut t, FlowStatus::Overflow, 0, 0, 400, &mut errors);
        assert_eq!(t.tx_state, TxState::Idle);
        assert_eq!(errors.last, Some(ErrorCode::FlowControlOverflow));
        assert_eq!(errors.count, 1);
    }

    #[test]
    fn busy_while_multi_frame_send_in_progress() {
        let mut t = Transport::new();
        let mut tx = CountingTransceiver {
            frames: heapless_vec::Vec::new(),
        };
        let payload = [0u8; 20];
        send(&mut t, 0x7E0, &payload, 0, &mut tx).unwrap();
        let result = send(&mut t, 0x7E0, &payload, 1, &mut tx);
        assert_eq!(result, Err(nb::Error::Other(SendError::Busy)));
    }
}
