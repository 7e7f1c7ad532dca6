//! Top-level aggregate wiring components B-G into the single per-tick
//! dispatch the original firmware split across `iso15765_task()`,
//! `uds_task()`, and `sdLoggerTask()`.
//!
//! Mirrors the sibling `mcan` subcrate's `Can<'a, Id, D, C>` struct: one
//! owning struct, one call per main-loop iteration
//! ([`Engine::poll`]) replacing the separate task functions.
//!
//! This gateway both answers `ReadDataByIdentifier` queries about its own
//! cached EPIC variables (the server role spec §4.D describes literally)
//! and actively polls the EPIC ECU for those same variables (component
//! E). Both directions share one [`Transport`]/one diagnostic id pair;
//! they are told apart by the leading byte of a reassembled payload —
//! `0x10/0x11/0x22/0x3E` are requests addressed to us, `0x50/0x51/0x62/
//! 0x7E/0x7F` are responses to a poll we issued ourselves.

use crate::config::ConfigRecord;
use crate::dbc;
use crate::frame::Frame;
use crate::hal::{CanTransceiver, ErrorSink, LogEventSink, StorageSink};
use crate::logger::{LogError, Logger};
use crate::scheduler::Scheduler;
use crate::transport::{rx, tx, Transport};
use crate::uds::{Outcome, ResetType, UdsServer};
use crate::variables::{did_for_var, did_for_var_id, VariableTable};

const REQUEST_SIDS: [u8; 4] = [0x10, 0x11, 0x22, 0x3E];
const READ_DATA_BY_IDENTIFIER_POSITIVE: u8 = 0x62;
const NEGATIVE_RESPONSE: u8 = 0x7F;

/// Owns one instance of every protocol component (B-G) and drives them
/// through one ordered tick.
pub struct Engine {
    pub transport: Transport,
    pub uds: UdsServer,
    pub variables: VariableTable,
    pub scheduler: Scheduler,
    pub logger: Logger,
    pub config: ConfigRecord,
    pending_reset: Option<ResetType>,
}

impl Engine {
    /// Builds an engine from a loaded configuration record. `with_sequence`
    /// and `with_checksum` select the logger's record format (spec §6's
    /// four header/record variants); they are build-time choices, not
    /// stored in the configuration record itself.
    pub fn new(config: ConfigRecord, with_sequence: bool, with_checksum: bool) -> Self {
        Self {
            transport: Transport::new(),
            uds: UdsServer::new(),
            variables: VariableTable::new(),
            scheduler: Scheduler::new(
                config.request_interval_ms as u32,
                config.max_pending_requests,
            ),
            logger: Logger::new(with_sequence, with_checksum),
            config,
            pending_reset: None,
        }
    }

    /// Takes the reset this engine was asked to perform by an ECUReset
    /// request, if any. The positive response for that request has already
    /// been sent by the time this returns `Some`; the caller is responsible
    /// for actually resetting the board (spec §4.D: the response always
    /// precedes the reset).
    pub fn take_pending_reset(&mut self) -> Option<ResetType> {
        self.pending_reset.take()
    }

    fn request_id(&self) -> u16 {
        0x7E0 + self.config.ecu_id as u16
    }

    fn response_id(&self) -> u16 {
        0x7E8 + self.config.ecu_id as u16
    }

    /// Writes the CSV header appropriate to this logger's configured
    /// columns. Idempotent; safe to call every startup.
    pub fn write_log_header(&mut self) -> Result<(), LogError> {
        match (self.logger.with_sequence(), self.logger.with_checksum()) {
            (false, false) => self.logger.write_header(&["Time(ms)", "VarID", "Value"]),
            (true, false) => self
                .logger
                .write_header(&["Time(ms)", "Sequence", "VarID", "Value"]),
            (false, true) => self
                .logger
                .write_header(&["Time(ms)", "VarID", "Value", "Checksum"]),
            (true, true) => self
                .logger
                .write_header(&["Time(ms)", "Sequence", "VarID", "Value", "Checksum"]),
        }
    }

    /// Runs one main-loop iteration: drains `frames`, advances the
    /// transport and UDS session state, issues the next scheduled variable
    /// poll if one is due, and flushes the logger. Matches spec §5's
    /// prescribed order: CAN frame drain, transport feed, UDS/scheduler
    /// tick, logger tick.
    pub fn poll<T, S, ErrS, LogS>(
        &mut self,
        now_ms: u32,
        frames: impl IntoIterator<Item = Frame>,
        transceiver: &mut T,
        storage: &mut S,
        errors: &mut ErrS,
        log_events: &mut LogS,
    ) where
        T: CanTransceiver,
        S: StorageSink,
        ErrS: ErrorSink,
        LogS: LogEventSink,
    {
        for frame in frames {
            self.on_frame(&frame, now_ms, transceiver, errors, log_events);
        }
        self.transport.tick(now_ms, transceiver, errors);

        self.uds.tick(now_ms);
        if let Some(var_id) = self.scheduler.tick(now_ms, &mut self.variables) {
            self.issue_poll(var_id, now_ms, transceiver);
        }

        self.logger.tick(now_ms, storage);
    }

    fn on_frame<T: CanTransceiver, ErrS: ErrorSink, LogS: LogEventSink>(
        &mut self,
        frame: &Frame,
        now_ms: u32,
        transceiver: &mut T,
        errors: &mut ErrS,
        log_events: &mut LogS,
    ) {
        let Some(can_id) = frame.standard_id() else {
            return;
        };

        if let Some(message) = dbc::message_for_can_id(can_id) {
            let payload = pad_to_8(frame.data());
            let mut index: u32 = 0;
            dbc::decode_message(message, &payload, |_name, value| {
                let synthetic_var_id = (can_id as u32) << 8 | index;
                if self
                    .logger
                    .write_entry(now_ms, synthetic_var_id, value)
                    .is_err()
                {
                    log_events.on_record_dropped();
                }
                index += 1;
            });
            return;
        }

        rx::feed(&mut self.transport, frame, now_ms, transceiver, errors);
        if self.transport.take_received().is_some() {
            self.handle_diagnostic_payload(now_ms, transceiver, log_events);
        }
    }

    fn handle_diagnostic_payload<T: CanTransceiver, LogS: LogEventSink>(
        &mut self,
        now_ms: u32,
        transceiver: &mut T,
        log_events: &mut LogS,
    ) {
        let mut buf = [0u8; 16];
        let data = self.transport.received_data();
        let n = data.len().min(buf.len());
        buf[..n].copy_from_slice(&data[..n]);
        let payload = &buf[..n];

        match payload.first() {
            Some(&sid) if REQUEST_SIDS.contains(&sid) => {
                let outcome = self.uds.process(payload, now_ms, &self.variables);
                match outcome {
                    Outcome::Respond(response) => {
                        let dest = self.response_id();
                        let _ = tx::send(
                            &mut self.transport,
                            dest,
                            response.as_bytes(),
                            now_ms,
                            transceiver,
                        );
                    }
                    Outcome::ResetRequested(response, reset_type) => {
                        let dest = self.response_id();
                        let _ = tx::send(
                            &mut self.transport,
                            dest,
                            response.as_bytes(),
                            now_ms,
                            transceiver,
                        );
                        self.pending_reset = Some(reset_type);
                    }
                    Outcome::NoResponse => {}
                }
            }
            Some(&READ_DATA_BY_IDENTIFIER_POSITIVE) if payload.len() >= 7 => {
                let did = ((payload[1] as u16) << 8) | payload[2] as u16;
                if let Some(var_id) = did_for_var(did) {
                    let value =
                        f32::from_be_bytes([payload[3], payload[4], payload[5], payload[6]]);
                    Scheduler::on_response(&mut self.variables, var_id, value, now_ms);
                    if self
                        .logger
                        .write_entry(now_ms, var_id as u32, value)
                        .is_err()
                    {
                        log_events.on_record_dropped();
                    }
                }
            }
            Some(&NEGATIVE_RESPONSE) => {
                // A poll came back negative; let the scheduler's own
                // response timeout reclaim the slot.
            }
            _ => {}
        }
    }

    fn issue_poll<T: CanTransceiver>(&mut self, var_id: i32, now_ms: u32, transceiver: &mut T) {
        let Some(did) = did_for_var_id(var_id) else {
            return;
        };
        let request = [0x22, (did >> 8) as u8, did as u8];
        let dest = self.request_id();
        let _ = tx::send(&mut self.transport, dest, &request, now_ms, transceiver);
    }
}

fn pad_to_8(data: &[u8]) -> [u8; 8] {
    let mut buf = [0u8; 8];
    let n = data.len().min(8);
    buf[..n].copy_from_slice(&data[..n]);
    buf
}
