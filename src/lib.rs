#![no_std]

//! Diagnostics-over-CAN protocol engine for EPIC engine control units.
//!
//! Reassembles ISO 15765-2 (DoCAN) segmented transport frames, dispatches
//! the UDS (ISO 14229) services layered on top of them, decodes the ECU's
//! fixed set of broadcast DBC messages, and logs decoded values to a CSV
//! ring buffer. [`engine::Engine`] is the single entry point tying all of
//! that together; everything else is usable standalone for testing or for
//! a host tool that only needs one layer (e.g. a DBC-only bus sniffer).
//!
//! Hardware access is abstracted behind the traits in [`hal`]; this crate
//! never talks to a CAN controller, clock, or storage medium directly.

pub mod config;
pub mod crc;
pub mod dbc;
pub mod engine;
pub mod frame;
pub mod hal;
pub mod logger;
pub mod scheduler;
pub mod transport;
pub mod uds;
pub mod util;
pub mod variables;

pub use engine::Engine;
pub use frame::Frame;
