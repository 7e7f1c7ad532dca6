//! ISO 14229 Unified Diagnostic Services: session management and the
//! service subset this ECU implements (DiagnosticSessionControl,
//! ECUReset, ReadDataByIdentifier, TesterPresent).

use crate::variables::{did_for_var, VariableTable};

/// UDS service identifiers this ECU recognizes.
pub mod service {
    pub const DIAGNOSTIC_SESSION_CONTROL: u8 = 0x10;
    pub const ECU_RESET: u8 = 0x11;
    pub const READ_DATA_BY_IDENTIFIER: u8 = 0x22;
    pub const TESTER_PRESENT: u8 = 0x3E;
}

/// Negative Response Codes this ECU can return.
pub mod nrc {
    pub const SERVICE_NOT_SUPPORTED: u8 = 0x11;
    pub const SUBFUNCTION_NOT_SUPPORTED: u8 = 0x12;
    pub const INCORRECT_MESSAGE_LENGTH: u8 = 0x13;
    pub const CONDITIONS_NOT_CORRECT: u8 = 0x22;
    pub const REQUEST_OUT_OF_RANGE: u8 = 0x31;
}

/// Diagnostic session identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Session {
    /// Default session: entered at power-up and on tester-present timeout.
    Default,
    /// Programming session.
    Programming,
    /// Extended diagnostic session.
    Extended,
    /// Safety system session.
    SafetySystem,
}

impl Session {
    fn from_sub_function(sub_function: u8) -> Option<Self> {
        match sub_function {
            0x01 => Some(Session::Default),
            0x02 => Some(Session::Programming),
            0x03 => Some(Session::Extended),
            0x04 => Some(Session::SafetySystem),
            _ => None,
        }
    }

    fn as_sub_function(self) -> u8 {
        match self {
            Session::Default => 0x01,
            Session::Programming => 0x02,
            Session::Extended => 0x03,
            Session::SafetySystem => 0x04,
        }
    }
}

/// Requested ECU reset type, ISO 14229 Table 118 subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetType {
    /// Hard reset (0x01).
    Hard,
    /// Soft reset (0x03).
    Soft,
}

/// Milliseconds of silence after which a non-default session reverts to
/// [`Session::Default`].
pub const TESTER_PRESENT_TIMEOUT_MS: u32 = 5000;

/// Outcome of processing one UDS request.
pub enum Outcome {
    /// A response should be sent, its bytes written into the caller's
    /// buffer (returned length via [`Response::len`]).
    Respond(Response),
    /// The tester asked to suppress the positive response
    /// (TesterPresent sub-function 0x00).
    NoResponse,
    /// A positive response should be sent, and then the caller must carry
    /// out the requested reset (e.g. actually resetting the MCU) — the
    /// response is always sent *before* the reset takes effect.
    ResetRequested(Response, ResetType),
}

/// A UDS response, positive or negative, as raw bytes.
#[derive(Debug, Clone, Copy)]
pub struct Response {
    buf: [u8; 7],
    len: u8,
}

impl Response {
    fn positive(bytes: &[u8]) -> Self {
        let mut buf = [0u8; 7];
        buf[..bytes.len()].copy_from_slice(bytes);
        Self {
            buf,
            len: bytes.len() as u8,
        }
    }

    fn negative(service_id: u8, code: u8) -> Self {
        Self::positive(&[0x7F, service_id, code])
    }

    /// The response bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len as usize]
    }
}

/// Tester-present-driven session state machine plus service dispatch.
pub struct UdsServer {
    session: Session,
    last_tester_present_ms: u32,
}

impl UdsServer {
    /// Creates a server starting in the default session.
    pub fn new() -> Self {
        Self {
            session: Session::Default,
            last_tester_present_ms: 0,
        }
    }

    /// The currently active diagnostic session.
    pub fn session(&self) -> Session {
        self.session
    }

    /// Reverts to the default session if no TesterPresent/session-changing
    /// request has arrived within [`TESTER_PRESENT_TIMEOUT_MS`]. Call
    /// regularly regardless of request traffic.
    pub fn tick(&mut self, now_ms: u32) {
        if self.session != Session::Default
            && now_ms.wrapping_sub(self.last_tester_present_ms) > TESTER_PRESENT_TIMEOUT_MS
        {
            self.session = Session::Default;
        }
    }

    /// Dispatches one UDS request, reading live values from `variables`.
    pub fn process(&mut self, request: &[u8], now_ms: u32, variables: &VariableTable) -> Outcome {
        let Some(&service_id) = request.first() else {
            return Outcome::NoResponse;
        };

        match service_id {
            service::DIAGNOSTIC_SESSION_CONTROL => self.handle_session_control(request, now_ms),
            service::ECU_RESET => self.handle_ecu_reset(request),
            service::READ_DATA_BY_IDENTIFIER => self.handle_read_data_by_id(request, variables),
            service::TESTER_PRESENT => self.handle_tester_present(request, now_ms),
            _ => Outcome::Respond(Response::negative(service_id, nrc::SERVICE_NOT_SUPPORTED)),
        }
    }

    fn handle_session_control(&mut self, request: &[u8], now_ms: u32) -> Outcome {
        let Some(&sub_function) = request.get(1) else {
            return Outcome::Respond(Response::negative(
                service::DIAGNOSTIC_SESSION_CONTROL,
                nrc::INCORRECT_MESSAGE_LENGTH,
            ));
        };
        let Some(session) = Session::from_sub_function(sub_function) else {
            return Outcome::Respond(Response::negative(
                service::DIAGNOSTIC_SESSION_CONTROL,
                nrc::SUBFUNCTION_NOT_SUPPORTED,
            ));
        };
        self.session = session;
        self.last_tester_present_ms = now_ms;
        Outcome::Respond(Response::positive(&[
            0x50,
            session.as_sub_function(),
        ]))
    }

    fn handle_ecu_reset(&mut self, request: &[u8]) -> Outcome {
        let Some(&reset_type) = request.get(1) else {
            return Outcome::Respond(Response::negative(
                service::ECU_RESET,
                nrc::INCORRECT_MESSAGE_LENGTH,
            ));
        };
        let reset = match reset_type {
            0x01 => ResetType::Hard,
            0x03 => ResetType::Soft,
            _ => {
                return Outcome::Respond(Response::negative(
                    service::ECU_RESET,
                    nrc::SUBFUNCTION_NOT_SUPPORTED,
                ))
            }
        };
        // The positive response precedes the actual reset; the caller
        // performs the reset itself after sending it.
        Outcome::ResetRequested(Response::positive(&[0x51, reset_type]), reset)
    }

    fn handle_read_data_by_id(&self, request: &[u8], variables: &VariableTable) -> Outcome {
        if request.len() < 3 {
            return Outcome::Respond(Response::negative(
                service::READ_DATA_BY_IDENTIFIER,
                nrc::INCORRECT_MESSAGE_LENGTH,
            ));
        }
        let did = ((request[1] as u16) << 8) | request[2] as u16;
        let Some(var_id) = did_for_var(did) else {
            return Outcome::Respond(Response::negative(
                service::READ_DATA_BY_IDENTIFIER,
                nrc::REQUEST_OUT_OF_RANGE,
            ));
        };
        let Some(value) = variables.value(var_id) else {
            return Outcome::Respond(Response::negative(
                service::READ_DATA_BY_IDENTIFIER,
                nrc::CONDITIONS_NOT_CORRECT,
            ));
        };

        let be = value.to_be_bytes();
        Outcome::Respond(Response::positive(&[
            0x62,
            (did >> 8) as u8,
            did as u8,
            be[0],
            be[1],
            be[2],
            be[3],
        ]))
    }

    fn handle_tester_present(&mut self, request: &[u8], now_ms: u32) -> Outcome {
        let Some(&sub_function) = request.get(1) else {
            return Outcome::Respond(Response::negative(
                service::TESTER_PRESENT,
                nrc::INCORRECT_MESSAGE_LENGTH,
            ));
        };
        self.last_tester_present_ms = now_ms;
        match sub_function {
            0x01 => Outcome::Respond(Response::positive(&[0x7E, 0x01])),
            0x00 => Outcome::NoResponse,
            _ => Outcome::Respond(Response::negative(
                service::TESTER_PRESENT,
                nrc::SUBFUNCTION_NOT_SUPPORTED,
            )),
        }
    }
}

impl Default for UdsServer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::variables::VariableTable;

    fn outcome_bytes(outcome: Outcome) -> Option<[u8; 7]> {
        match outcome {
            Outcome::Respond(r) => {
                let mut buf = [0u8; 7];
                buf[..r.as_bytes().len()].copy_from_slice(r.as_bytes());
                Some(buf)
            }
            _ => None,
        }
    }

    #[test]
    fn session_upgrade_then_timeout_reverts_to_default() {
        let mut server = UdsServer::new();
        let vars = VariableTable::new();
        let outcome = server.process(&[0x10, 0x03], 0, &vars);
        assert!(matches!(outcome, Outcome::Respond(_)));
        assert_eq!(server.session(), Session::Extended);

        server.tick(4999);
        assert_eq!(server.session(), Session::Extended);
        server.tick(5001);
        assert_eq!(server.session(), Session::Default);
    }

    #[test]
    fn read_rpm_did_returns_big_endian_float() {
        let mut server = UdsServer::new();
        let mut vars = VariableTable::new();
        vars.set_rpm(3500.0);
        let outcome = server.process(&[0x22, 0xF1, 0x91], 0, &vars);
        let bytes = outcome_bytes(outcome).unwrap();
        assert_eq!(&bytes[..3], &[0x62, 0xF1, 0x91]);
        assert_eq!(f32::from_be_bytes([bytes[3], bytes[4], bytes[5], bytes[6]]), 3500.0);
    }

    #[test]
    fn read_unknown_did_is_out_of_range() {
        let mut server = UdsServer::new();
        let vars = VariableTable::new();
        let outcome = server.process(&[0x22, 0xF1, 0x99], 0, &vars);
        let bytes = outcome_bytes(outcome).unwrap();
        assert_eq!(&bytes[..3], &[0x7F, 0x22, nrc::REQUEST_OUT_OF_RANGE]);
    }

    #[test]
    fn read_not_yet_valid_var_is_conditions_not_correct() {
        let mut server = UdsServer::new();
        let vars = VariableTable::new();
        let outcome = server.process(&[0x22, 0xF1, 0x91], 0, &vars);
        let bytes = outcome_bytes(outcome).unwrap();
        assert_eq!(&bytes[..3], &[0x7F, 0x22, nrc::CONDITIONS_NOT_CORRECT]);
    }

    #[test]
    fn tester_present_suppresses_response_on_subfunction_zero() {
        let mut server = UdsServer::new();
        let vars = VariableTable::new();
        let outcome = server.process(&[0x3E, 0x00], 0, &vars);
        assert!(matches!(outcome, Outcome::NoResponse));
    }

    #[test]
    fn ecu_reset_emits_positive_response_before_requesting_reset() {
        let mut server = UdsServer::new();
        let vars = VariableTable::new();
        let outcome = server.process(&[0x11, 0x01], 0, &vars);
        match outcome {
            Outcome::ResetRequested(response, reset_type) => {
                assert_eq!(response.as_bytes(), &[0x51, 0x01]);
                assert_eq!(reset_type, ResetType::Hard);
            }
            _ => panic!("expected ResetRequested"),
        }
    }

    #[test]
    fn ecu_reset_rejects_unknown_subfunction() {
        let mut server = UdsServer::new();
        let vars = VariableTable::new();
        let outcome = server.process(&[0x11, 0x02], 0, &vars);
        let bytes = outcome_bytes(outcome).unwrap();
        assert_eq!(&bytes[..3], &[0x7F, 0x11, nrc::SUBFUNCTION_NOT_SUPPORTED]);
    }

    #[test]
    fn unsupported_service_is_rejected() {
        let mut server = UdsServer::new();
        let vars = VariableTable::new();
        let outcome = server.process(&[0x19], 0, &vars);
        let bytes = outcome_bytes(outcome).unwrap();
        assert_eq!(&bytes[..3], &[0x7F, 0x19, nrc::SERVICE_NOT_SUPPORTED]);
    }
}
