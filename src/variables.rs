//! The compiled-in set of EPIC ECU variables this build knows how to poll
//! and expose over UDS, and their mapping to UDS Data Identifiers.
//!
//! The variable ids are whatever the EPIC firmware's variable directory
//! assigns; this build only needs to echo them back on the wire, not
//! interpret them, so they're kept as opaque `i32`s.

/// Variable id for `TPSValue`.
pub const VAR_ID_TPS_VALUE: i32 = 1272048601;
/// Variable id for `RPMValue`.
pub const VAR_ID_RPM_VALUE: i32 = 1699696209;
/// Variable id for `AFRValue`.
pub const VAR_ID_AFR_VALUE: i32 = -1093429509;

/// Number of compiled-in variables. TODO: grow this table as more EPIC
/// variables get DIDs assigned.
pub const VARIABLE_COUNT: usize = 3;

/// `(var_id, name)` for every variable this build requests and logs.
pub const VARIABLES: [(i32, &str); VARIABLE_COUNT] = [
    (VAR_ID_TPS_VALUE, "TPSValue"),
    (VAR_ID_RPM_VALUE, "RPMValue"),
    (VAR_ID_AFR_VALUE, "AFRValue"),
];

struct DidMapping {
    did: u16,
    var_id: i32,
}

const DID_MAP: [DidMapping; VARIABLE_COUNT] = [
    DidMapping {
        did: 0xF190,
        var_id: VAR_ID_TPS_VALUE,
    },
    DidMapping {
        did: 0xF191,
        var_id: VAR_ID_RPM_VALUE,
    },
    DidMapping {
        did: 0xF192,
        var_id: VAR_ID_AFR_VALUE,
    },
];

/// Looks up the EPIC variable id a UDS DID maps to, if any.
pub fn did_for_var(did: u16) -> Option<i32> {
    DID_MAP.iter().find(|m| m.did == did).map(|m| m.var_id)
}

/// Looks up the UDS DID a given EPIC variable id is exposed under, if any
/// (the inverse of [`did_for_var`]). Used to format an outgoing
/// `ReadDataByIdentifier` request for a scheduler-selected variable.
pub fn did_for_var_id(var_id: i32) -> Option<u16> {
    DID_MAP.iter().find(|m| m.var_id == var_id).map(|m| m.did)
}

#[derive(Clone, Copy)]
struct VarResponse {
    var_id: i32,
    value: f32,
    valid: bool,
    timestamp_ms: u32,
    in_flight: bool,
    request_time_ms: u32,
}

/// Caches the most recently received value of every compiled-in variable,
/// plus the bookkeeping the request scheduler needs to keep at most
/// `max_pending_requests` DID reads outstanding at once: whether a request
/// for a variable is currently awaiting a response, and when it was sent.
///
/// A variable reads as absent ([`VariableTable::value`] returns `None`)
/// until its first response arrives; an evicted/never-seen entry is never
/// surfaced as valid, matching the purely-cached semantics of the table.
pub struct VariableTable {
    responses: [VarResponse; VARIABLE_COUNT],
}

impl VariableTable {
    /// Creates a table with every variable marked invalid and idle.
    pub fn new() -> Self {
        let mut responses = [VarResponse {
            var_id: 0,
            value: 0.0,
            valid: false,
            timestamp_ms: 0,
            in_flight: false,
            request_time_ms: 0,
        }; VARIABLE_COUNT];
        for (slot, (var_id, _name)) in responses.iter_mut().zip(VARIABLES.iter()) {
            slot.var_id = *var_id;
        }
        Self { responses }
    }

    fn slot_mut(&mut self, var_id: i32) -> Option<&mut VarResponse> {
        self.responses.iter_mut().find(|r| r.var_id == var_id)
    }

    fn slot(&self, var_id: i32) -> Option<&VarResponse> {
        self.responses.iter().find(|r| r.var_id == var_id)
    }

    /// Records a fresh value for `var_id` without touching its timestamp
    /// or in-flight bookkeeping. Intended for tests and for callers that
    /// don't go through the request/response cycle `record_response` models.
    pub fn set(&mut self, var_id: i32, value: f32) {
        if let Some(slot) = self.slot_mut(var_id) {
            slot.value = value;
            slot.valid = true;
        }
    }

    /// The current value of `var_id`, or `None` if it has never been
    /// updated (or is not a compiled-in variable).
    pub fn value(&self, var_id: i32) -> Option<f32> {
        self.slot(var_id).filter(|r| r.valid).map(|r| r.value)
    }

    /// The timestamp of the last value update for `var_id`, if any.
    pub fn timestamp_ms(&self, var_id: i32) -> Option<u32> {
        self.slot(var_id).filter(|r| r.valid).map(|r| r.timestamp_ms)
    }

    /// True if a request for `var_id` is currently outstanding.
    pub fn is_in_flight(&self, var_id: i32) -> bool {
        self.slot(var_id).is_some_and(|r| r.in_flight)
    }

    /// The number of variables with a request currently outstanding.
    pub fn in_flight_count(&self) -> usize {
        self.responses.iter().filter(|r| r.in_flight).count()
    }

    /// Marks `var_id` as having a request outstanding as of `now_ms`.
    /// No-op for ids this table doesn't track.
    pub(crate) fn mark_in_flight(&mut self, var_id: i32, now_ms: u32) {
        if let Some(slot) = self.slot_mut(var_id) {
            slot.in_flight = true;
            slot.request_time_ms = now_ms;
        }
    }

    /// Clears `var_id`'s in-flight marker without altering its cached value
    /// or validity, matching the abandon-on-timeout contract.
    pub(crate) fn clear_in_flight(&mut self, var_id: i32) {
        if let Some(slot) = self.slot_mut(var_id) {
            slot.in_flight = false;
        }
    }

    /// How long `var_id`'s outstanding request has been in flight, if any.
    pub(crate) fn in_flight_age_ms(&self, var_id: i32, now_ms: u32) -> Option<u32> {
        self.slot(var_id)
            .filter(|r| r.in_flight)
            .map(|r| now_ms.wrapping_sub(r.request_time_ms))
    }

    /// Records a response arriving for `var_id`: updates its value,
    /// timestamp, and clears its in-flight marker. Unknown ids are ignored.
    pub fn record_response(&mut self, var_id: i32, value: f32, now_ms: u32) {
        if let Some(slot) = self.slot_mut(var_id) {
            slot.value = value;
            slot.valid = true;
            slot.timestamp_ms = now_ms;
            slot.in_flight = false;
        }
    }

    #[cfg(test)]
    fn set_rpm(&mut self, value: f32) {
        self.set(VAR_ID_RPM_VALUE, value);
    }
}

impl Default for VariableTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn did_map_round_trips_all_variables() {
        assert_eq!(did_for_var(0xF190), Some(VAR_ID_TPS_VALUE));
        assert_eq!(did_for_var(0xF191), Some(VAR_ID_RPM_VALUE));
        assert_eq!(did_for_var(0xF192), Some(VAR_ID_AFR_VALUE));
        assert_eq!(did_for_var(0xF199), None);
    }

    #[test]
    fn reverse_did_lookup_matches_forward_map() {
        assert_eq!(did_for_var_id(VAR_ID_TPS_VALUE), Some(0xF190));
        assert_eq!(did_for_var_id(VAR_ID_RPM_VALUE), Some(0xF191));
        assert_eq!(did_for_var_id(VAR_ID_AFR_VALUE), Some(0xF192));
        assert_eq!(did_for_var_id(999), None);
    }

    #[test]
    fn unset_variable_reads_as_absent() {
        let table = VariableTable::new();
        assert_eq!(table.value(VAR_ID_RPM_VALUE), None);
    }

    #[test]
    fn set_then_read_round_trips() {
        let mut table = VariableTable::new();
        table.set(VAR_ID_AFR_VALUE, 14.7);
        assert_eq!(table.value(VAR_ID_AFR_VALUE), Some(14.7));
    }

    #[test]
    fn unknown_var_id_is_ignored() {
        let mut table = VariableTable::new();
        table.set(999, 1.0);
        assert_eq!(table.value(999), None);
    }

    #[test]
    fn record_response_sets_value_timestamp_and_clears_in_flight() {
        let mut table = VariableTable::new();
        table.mark_in_flight(VAR_ID_TPS_VALUE, 10);
        assert!(table.is_in_flight(VAR_ID_TPS_VALUE));

        table.record_response(VAR_ID_TPS_VALUE, 42.0, 55);
        assert_eq!(table.value(VAR_ID_TPS_VALUE), Some(42.0));
        assert_eq!(table.timestamp_ms(VAR_ID_TPS_VALUE), Some(55));
        assert!(!table.is_in_flight(VAR_ID_TPS_VALUE));
    }

    #[test]
    fn clear_in_flight_abandons_without_touching_value() {
        let mut table = VariableTable::new();
        table.record_response(VAR_ID_RPM_VALUE, 1000.0, 5);
        table.mark_in_flight(VAR_ID_RPM_VALUE, 10);

        table.clear_in_flight(VAR_ID_RPM_VALUE);
        assert!(!table.is_in_flight(VAR_ID_RPM_VALUE));
        assert_eq!(table.value(VAR_ID_RPM_VALUE), Some(1000.0));
    }

    #[test]
    fn in_flight_count_tracks_multiple_outstanding_requests() {
        let mut table = VariableTable::new();
        assert_eq!(table.in_flight_count(), 0);
        table.mark_in_flight(VAR_ID_TPS_VALUE, 0);
        table.mark_in_flight(VAR_ID_RPM_VALUE, 0);
        assert_eq!(table.in_flight_count(), 2);
        table.clear_in_flight(VAR_ID_TPS_VALUE);
        assert_eq!(table.in_flight_count(), 1);
    }
}
