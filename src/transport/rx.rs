//! Handling of frames arriving from the bus: single-frame messages,
//! First/Consecutive Frame reassembly, and the Flow Control replies that
//! drive the peer's transmit side.

use super::{RxState, Transport, BUFFER_SIZE, MAX_MESSAGE_SIZE, N_CR, SEQ_ERROR_MAX};
use crate::frame::{Frame, FlowStatus, Pci};
use crate::hal::{CanTransceiver, ErrorCode, ErrorSink};

/// Feeds one received CAN frame into the transport. First Frames trigger an
/// immediate Flow Control reply (Continue to Send, block size 0, STmin 0)
/// addressed to `can_id + 8`, matching this ECU's fixed physical-addressing
/// scheme.
pub fn feed<T: CanTransceiver, E: ErrorSink>(
    transport: &mut Transport,
    frame: &Frame,
    now_ms: u32,
    transceiver: &mut T,
    errors: &mut E,
) {
    let can_id = match frame.standard_id() {
        Some(id) => id,
        None => return,
    };
    let data = frame.data();
    let pci = match Pci::decode(data) {
        Ok(pci) => pci,
        Err(_) => return,
    };

    match pci {
        Pci::SingleFrame { len } => {
            if (len as usize) <= data.len().saturating_sub(1) {
                transport.rx_ready_buffer[..len as usize]
                    .copy_from_slice(&data[1..1 + len as usize]);
                transport.deliver(can_id, len as u16);
            }
        }
        Pci::FirstFrame { total_len } => {
            handle_first_frame(transport, can_id, total_len, data, now_ms, transceiver, errors);
        }
        Pci::ConsecutiveFrame { sequence } => {
            handle_consecutive_frame(transport, sequence, data, now_ms, errors);
        }
        Pci::FlowControl {
            status,
            block_size,
            st_min,
        } => {
            super::tx::on_flow_control(transport, status, block_size, st_min, now_ms, errors);
        }
    }
}

fn handle_first_frame<T: CanTransceiver, E: ErrorSink>(
    transport: &mut Transport,
    can_id: u16,
    total_len: u16,
    data: &[u8],
    now_ms: u32,
    transceiver: &mut T,
    errors: &mut E,
) {
    // A First Frame always discards whatever reassembly was in progress,
    // matching the original firmware's behavior.
    transport.rx_state = RxState::Idle;

    if data.len() < 8
        || total_len == 0
        || total_len as usize > MAX_MESSAGE_SIZE
        || total_len as usize > BUFFER_SIZE
    {
        if total_len as usize > BUFFER_SIZE {
            errors.on_error(ErrorCode::BufferOverflow, "First frame length exceeds buffer size");
        }
        return;
    }

    transport.rx_buffer[..5].copy_from_slice(&data[3..8]);
    transport.rx_received = 5;
    transport.rx_total_len = total_len;
    transport.rx_sequence = 0;
    transport.rx_can_id = can_id;
    transport.seq_error_count = 0;

    let mut fc = [0u8; 3];
    let n = Pci::FlowControl {
        status: FlowStatus::ContinueToSend,
        block_size: 0,
        st_min: 0,
    }
    .encode(&mut fc);
    if let Ok(reply) = Frame::with_standard_id(can_id + 8, &fc[..n]) {
        let _ = transceiver.transmit(&reply);
    }

    transport.rx_state = RxState::ReceivingConsecutive;
    transport.rx_last_cf_time = now_ms;
}

fn handle_consecutive_frame<E: ErrorSink>(
    transport: &mut Transport,
    sequence: u8,
    data: &[u8],
    now_ms: u32,
    errors: &mut E,
) {
    if transport.rx_state != RxState::ReceivingConsecutive {
        transport.rx_state = RxState::Idle;
        return;
    }

    if now_ms.wrapping_sub(transport.rx_last_cf_time) > N_CR {
        errors.on_error(ErrorCode::Timeout, "Consecutive frame timeout");
        transport.rx_state = RxState::Idle;
        transport.note_dropped();
        return;
    }

    let expected = (transport.rx_sequence + 1) & 0x0F;
    if sequence != expected {
        transport.seq_error_count += 1;
        errors.on_error(ErrorCode::SequenceError, "Consecutive frame sequence mismatch");
        if transport.seq_error_count >= SEQ_ERROR_MAX {
            transport.rx_state = RxState::Idle;
            transport.seq_error_count = 0;
            transport.note_dropped();
        }
        return;
    }
    transport.seq_error_count = 0;
    transport.rx_sequence = sequence;
    transport.rx_last_cf_time = now_ms;

    if data.len() < 8 {
        return;
    }
    let remaining = transport.rx_total_len - transport.rx_received;
    let to_copy = (remaining as usize).min(7);
    let start = transport.rx_received as usize;
    transport.rx_buffer[start..start + to_copy].copy_from_slice(&data[1..1 + to_copy]);
    transport.rx_received += to_copy as u16;

    if transport.rx_received >= transport.rx_total_len {
        let len = transport.rx_total_len;
        transport.rx_ready_buffer[..len as usize]
            .copy_from_slice(&transport.rx_buffer[..len as usize]);
        let can_id = transport.rx_can_id;
        transport.deliver(can_id, len);
        transport.rx_state = RxState::Idle;
    }
}

/// Expires a reassembly in progress if no Consecutive Frame has arrived
/// within `N_Cr`. Call alongside [`super::tx::tick`] from
/// [`Transport::tick`].
pub(super) fn check_timeout<E: ErrorSink>(transport: &mut Transport, now_ms: u32, errors: &mut E) {
    if transport.rx_state == RxState::ReceivingConsecutive
        && now_ms.wrapping_sub(transport.rx_last_cf_time) > N_CR
    {
        errors.on_error(ErrorCode::Timeout, "Receive consecutive frame timeout");
        transport.rx_state = RxState::Idle;
        transport.note_dropped();
    }
}
