//! Round-robin scheduler for polling the EPIC ECU's compiled-in variables
//! over UDS ReadDataByIdentifier, keeping up to `max_pending_requests`
//! reads outstanding at once.
//!
//! The in-flight/request-time bookkeeping per variable lives on
//! [`crate::variables::VariableTable`] itself (it's the table's state, not
//! the scheduler's) — this module only tracks the round-robin cursor and
//! the minimum spacing between new request issuances.

use crate::variables::{VariableTable, VARIABLES};

/// How long to wait for a response before considering a request abandoned
/// and freeing its slot for another variable.
pub const RESPONSE_TIMEOUT_MS: u32 = 2000;

/// Tracks which variable is due to be requested next.
pub struct Scheduler {
    next_index: usize,
    request_interval_ms: u32,
    last_request_ms: Option<u32>,
    max_pending: u8,
}

impl Scheduler {
    /// Creates a scheduler that issues at most one new request every
    /// `request_interval_ms` and keeps at most `max_pending` reads
    /// outstanding at once.
    pub fn new(request_interval_ms: u32, max_pending: u8) -> Self {
        Self {
            next_index: 0,
            request_interval_ms,
            last_request_ms: None,
            max_pending: max_pending.max(1),
        }
    }

    /// Advances the scheduler against `table`, reclaiming any requests that
    /// have timed out, and returns the next variable id to request if one
    /// is due: the pending-request budget has room, the issuance interval
    /// has elapsed, and the round robin finds a variable that isn't
    /// already in flight.
    pub fn tick(&mut self, now_ms: u32, table: &mut VariableTable) -> Option<i32> {
        self.reclaim_timed_out(now_ms, table);

        if table.in_flight_count() >= self.max_pending as usize {
            return None;
        }
        if let Some(last) = self.last_request_ms {
            if now_ms.wrapping_sub(last) < self.request_interval_ms {
                return None;
            }
        }

        for _ in 0..VARIABLES.len() {
            let (var_id, _name) = VARIABLES[self.next_index];
            self.next_index = (self.next_index + 1) % VARIABLES.len();
            if table.is_in_flight(var_id) {
                continue;
            }
            table.mark_in_flight(var_id, now_ms);
            self.last_request_ms = Some(now_ms);
            return Some(var_id);
        }
        // Every variable already in flight (max_pending == VARIABLES.len()).
        None
    }

    fn reclaim_timed_out(&self, now_ms: u32, table: &mut VariableTable) {
        for (var_id, _name) in VARIABLES.iter() {
            if let Some(age) = table.in_flight_age_ms(*var_id, now_ms) {
                if age >= RESPONSE_TIMEOUT_MS {
                    table.clear_in_flight(*var_id);
                }
            }
        }
    }

    /// Records that a response for `var_id` arrived, via the shared
    /// [`VariableTable`]. Kept as a thin pass-through so callers don't need
    /// to reach for `VariableTable::record_response` directly just because
    /// the value came from a scheduler-issued poll.
    pub fn on_response(table: &mut VariableTable, var_id: i32, value: f32, now_ms: u32) {
        table.record_response(var_id, value, now_ms);
    }
}
