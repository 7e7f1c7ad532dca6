//! CAN frame representation and ISO 15765-2 Protocol Control Information
//! (PCI) byte encoding/decoding.

use bitfield::bitfield;
use embedded_can::{Id, StandardId};

/// Maximum data length of a classic CAN frame.
pub const MAX_DATA_LEN: usize = 8;

/// A classic CAN frame: an identifier plus up to 8 data bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    id: Id,
    data: [u8; MAX_DATA_LEN],
    len: u8,
}

/// Errors constructing or reading a [`Frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// More than [`MAX_DATA_LEN`] bytes of data were supplied.
    TooMuchData,
}

impl Frame {
    /// Builds a frame carrying `data` addressed to `id`.
    pub fn new(id: impl Into<Id>, data: &[u8]) -> Result<Self, Error> {
        if data.len() > MAX_DATA_LEN {
            return Err(Error::TooMuchData);
        }
        let mut buf = [0u8; MAX_DATA_LEN];
        buf[..data.len()].copy_from_slice(data);
        Ok(Self {
            id: id.into(),
            data: buf,
            len: data.len() as u8,
        })
    }

    /// Convenience constructor for a standard (11-bit) identifier given as a
    /// raw value.
    pub fn with_standard_id(raw_id: u16, data: &[u8]) -> Result<Self, Error> {
        let id = StandardId::new(raw_id).ok_or(Error::TooMuchData)?;
        Self::new(id, data)
    }

    /// The frame's identifier.
    pub fn id(&self) -> Id {
        self.id
    }

    /// The frame's identifier as a raw 11-bit value, or `None` for extended
    /// identifiers (this crate only produces and consumes standard ids).
    pub fn standard_id(&self) -> Option<u16> {
        match self.id {
            Id::Standard(id) => Some(id.as_raw()),
            Id::Extended(_) => None,
        }
    }

    /// Number of valid data bytes (0-8).
    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// True if the frame carries no data.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The frame's data bytes.
    pub fn data(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }
}

bitfield! {
    /// Byte-0 PCI field, common to all four ISO 15765-2 frame types. The
    /// upper nibble selects the frame type; the lower nibble's meaning
    /// depends on that type (data length for Single/First Frame, sequence
    /// number for Consecutive Frame, flow status for Flow Control).
    #[derive(Clone, Copy, PartialEq, Eq)]
    struct PciByte(u8);
    impl Debug;
    u8, type_nibble, set_type_nibble: 7, 4;
    u8, low_nibble, set_low_nibble: 3, 0;
}

/// The ISO 15765-2 frame type, decoded from a CAN frame's data bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pci {
    /// Single Frame: up to 7 bytes of data, `len` given in the low nibble.
    SingleFrame {
        /// Number of data bytes (1-7).
        len: u8,
    },
    /// First Frame of a multi-frame message. The header occupies three
    /// bytes (PCI, length low byte, a reserved byte always sent as zero),
    /// leaving five payload bytes per frame rather than the six a
    /// two-byte-header encoding would allow — this ECU's wire format, not
    /// a generic ISO 15765-2 implementation choice.
    FirstFrame {
        /// Total message length in bytes (up to 4095).
        total_len: u16,
    },
    /// Consecutive Frame continuing a multi-frame message.
    ConsecutiveFrame {
        /// Sequence number, wrapping modulo 16.
        sequence: u8,
    },
    /// Flow Control frame sent by the receiver of a multi-frame message.
    FlowControl {
        /// The flow status reported by the receiver.
        status: FlowStatus,
        /// Maximum consecutive frames before another Flow Control is
        /// required. 0 means "send all".
        block_size: u8,
        /// Minimum separation time between consecutive frames, in
        /// milliseconds.
        st_min: u8,
    },
}

/// Flow Control sub-type, ISO 15765-2 §FC.FS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowStatus {
    /// Receiver is ready; sender may continue.
    ContinueToSend,
    /// Receiver is not yet ready; sender must wait for another Flow
    /// Control frame.
    Wait,
    /// Receiver cannot accept the message; sender must abort.
    Overflow,
}

/// PCI type nibble values, ISO 15765-2 Table 2.
mod type_nibble {
    pub const SINGLE_FRAME: u8 = 0x0;
    pub const FIRST_FRAME: u8 = 0x1;
    pub const CONSECUTIVE_FRAME: u8 = 0x2;
    pub const FLOW_CONTROL: u8 = 0x3;
}

/// Flow status nibble values.
mod fc_status {
    pub const CONTINUE_TO_SEND: u8 = 0x0;
    pub const WAIT: u8 = 0x1;
    pub const OVERFLOW: u8 = 0x2;
}

/// Errors decoding a [`Pci`] from frame data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// The frame carried no data bytes at all.
    Empty,
    /// The frame was too short for the fields its PCI type requires.
    Truncated,
    /// The PCI type nibble or Flow Status nibble was not one ISO 15765-2
    /// defines.
    UnknownType,
}

impl Pci {
    /// Decodes the PCI and any associated fields from a frame's data bytes.
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        let first = *data.first().ok_or(DecodeError::Empty)?;
        let pci = PciByte(first);
        match pci.type_nibble() {
            type_nibble::SINGLE_FRAME => {
                let len = pci.low_nibble();
                if len == 0 || (len as usize) > data.len().saturating_sub(1) {
                    return Err(DecodeError::Truncated);
                }
                Ok(Pci::SingleFrame { len })
            }
            type_nibble::FIRST_FRAME => {
                if data.len() < 3 {
                    return Err(DecodeError::Truncated);
                }
                // 12-bit length: low nibble of byte 0, all of byte 1. Byte 2
                // is reserved and not consulted here.
                let total_len = ((pci.low_nibble() as u16) << 8) | data[1] as u16;
                Ok(Pci::FirstFrame { total_len })
            }
            type_nibble::CONSECUTIVE_FRAME => Ok(Pci::ConsecutiveFrame {
                sequence: pci.low_nibble(),
            }),
            type_nibble::FLOW_CONTROL => {
                if data.len() < 3 {
                    return Err(DecodeError::Truncated);
                }
                let status = match pci.low_nibble() {
                    fc_status::CONTINUE_TO_SEND => FlowStatus::ContinueToSend,
                    fc_status::WAIT => FlowStatus::Wait,
                    fc_status::OVERFLOW => FlowStatus::Overflow,
                    _ => return Err(DecodeError::UnknownType),
                };
                Ok(Pci::FlowControl {
                    status,
                    block_size: data[1],
                    st_min: data[2],
                })
            }
            _ => Err(DecodeError::UnknownType),
        }
    }

    /// Encodes the PCI byte (and any immediately following header bytes)
    /// into `out`, returning the number of bytes written.
    pub fn encode(&self, out: &mut [u8]) -> usize {
        match *self {
            Pci::SingleFrame { len } => {
                let mut pci = PciByte(0);
                pci.set_type_nibble(type_nibble::SINGLE_FRAME);
                pci.set_low_nibble(len);
                out[0] = pci.0;
                1
            }
            Pci::FirstFrame { total_len } => {
                let mut pci = PciByte(0);
                pci.set_type_nibble(type_nibble::FIRST_FRAME);
                pci.set_low_nibble(((total_len >> 8) & 0x0F) as u8);
                out[0] = pci.0;
                out[1] = (total_len & 0xFF) as u8;
                out[2] = 0;
                3
            }
            Pci::ConsecutiveFrame { sequence } => {
                let mut pci = PciByte(0);
                pci.set_type_nibble(type_nibble::CONSECUTIVE_FRAME);
                pci.set_low_nibble(sequence & 0x0F);
                out[0] = pci.0;
                1
            }
            Pci::FlowControl {
                status,
                block_size,
                st_min,
            } => {
                let mut pci = PciByte(0);
                pci.set_type_nibble(type_nibble::FLOW_CONTROL);
                pci.set_low_nibble(match status {
                    FlowStatus::ContinueToSend => fc_status::CONTINUE_TO_SEND,
                    FlowStatus::Wait => fc_status::WAIT,
                    FlowStatus::Overflow => fc_status::OVERFLOW,
                });
                out[0] = pci.0;
                out[1] = block_size;
                out[2] = st_min;
                3
            }
        }
    }
}
