//! Admission control for write, search, build and dump calls.

use parking_lot::{Condvar, Mutex};
use tracing::warn;
use vdoc_core::config::AdmissionPolicy;
use vdoc_core::{Error, Result};

struct GateState {
    in_flight: usize,
    limit: usize,
    policy: AdmissionPolicy,
    closed: bool,
}

pub struct AdmissionGate {
    state: Mutex<GateState>,
    released: Condvar,
}

/// Held for the duration of one gated call; releases on drop, including
/// during unwinding.
#[must_use]
pub struct Permit<'a> {
    gate: &'a AdmissionGate,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        let mut st = self.gate.state.lock();
        st.in_flight -= 1;
        drop(st);
        self.gate.released.notify_all();
    }
}

impl AdmissionGate {
    pub fn new(limit: usize, policy: AdmissionPolicy) -> Self {
        Self {
            state: Mutex::new(GateState { in_flight: 0, limit: limit.max(1), policy, closed: false }),
            released: Condvar::new(),
        }
    }

    pub fn acquire(&self) -> Result<Permit<'_>> {
        let mut st = self.state.lock();
        loop {
            if st.closed {
                return Err(Error::EngineClosed);
            }
            if st.in_flight < st.limit {
                st.in_flight += 1;
                return Ok(Permit { gate: self });
            }
            match st.policy {
                AdmissionPolicy::Reject => {
                    warn!(in_flight = st.in_flight, limit = st.limit, "admission rejected");
                    return Err(Error::Overloaded { in_flight: st.in_flight, limit: st.limit });
                }
                AdmissionPolicy::Block => self.released.wait(&mut st),
            }
        }
    }

    pub fn in_flight(&self) -> usize {
        self.state.lock().in_flight
    }

    pub fn reconfigure(&self, limit: usize, policy: AdmissionPolicy) {
        let mut st = self.state.lock();
        st.limit = limit.max(1);
        st.policy = policy;
        drop(st);
        self.released.notify_all();
    }

    /// Refuses new permits, wakes blocked callers, and waits until every
    /// outstanding permit has been dropped.
    pub fn close_and_drain(&self) {
        let mut st = self.state.lock();
        st.closed = true;
        self.released.notify_all();
        while st.in_flight > 0 {
            self.released.wait(&mut st);
        }
    }
}
