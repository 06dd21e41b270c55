use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use slipstream_core::prelude::ShutdownListener;

const WAIT_SLICE: Duration = Duration::from_millis(100);

/// Admission gate for closed-workload executors.
///
/// VUs are admitted by index: VU `i` may start an iteration while `i < target`. Raising the
/// target wakes parked VUs; lowering it lets VUs above the line finish their current
/// iteration and then park, so concurrency ramps down without force-killing anything.
pub(crate) struct ClosedGate {
    state: Mutex<GateState>,
    admitted: Condvar,
}

#[derive(Default)]
struct GateState {
    target: usize,
    retired: bool,
}

impl ClosedGate {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(GateState::default()),
            admitted: Condvar::new(),
        }
    }

    pub(crate) fn set_target(&self, target: usize) {
        let mut state = self.state.lock();
        if state.target != target {
            state.target = target;
            self.admitted.notify_all();
        }
    }

    /// Signal all VUs to finish their current iteration and not start another.
    pub(crate) fn retire(&self) {
        let mut state = self.state.lock();
        state.retired = true;
        self.admitted.notify_all();
    }

    /// Block until this VU is admitted for its next iteration. Returns false once the
    /// scenario retires or the run is draining.
    pub(crate) fn wait_admitted(&self, vu_index: usize, stop: &ShutdownListener) -> bool {
        let mut state = self.state.lock();
        loop {
            if state.retired || stop.should_stop() {
                return false;
            }
            if vu_index < state.target {
                return true;
            }
            // Bounded wait so a drain that doesn't touch the gate is still noticed.
            self.admitted.wait_for(&mut state, WAIT_SLICE);
        }
    }
}

/// What happened to one arrival event in an open-workload executor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Dispatch {
    /// An idle VU picked up the iteration.
    Started,
    /// No VU was idle but the pool is under capacity; the caller must spawn a VU, which will
    /// claim the queued start.
    Grow,
    /// Pool saturated at max capacity. The iteration is dropped, not failed: this is the
    /// signal that the target cannot sustain the offered rate.
    Dropped,
}

/// VU pool for open-workload executors. A single mutex serialises all idle/running
/// transitions; VUs block cooperatively on the condvar while waiting for work.
pub(crate) struct OpenPool {
    state: Mutex<PoolState>,
    work: Condvar,
    max: usize,
}

#[derive(Default)]
struct PoolState {
    /// VUs currently blocked waiting for a start.
    idle: usize,
    /// Iteration starts not yet claimed by a VU.
    starts: usize,
    /// VUs constructed so far, never exceeding `max`.
    total: usize,
    retired: bool,
}

impl OpenPool {
    pub(crate) fn new(max: usize) -> Self {
        Self {
            state: Mutex::new(PoolState::default()),
            work: Condvar::new(),
            max,
        }
    }

    /// Reserve capacity for an eagerly created VU. Returns false at capacity.
    pub(crate) fn reserve(&self) -> bool {
        let mut state = self.state.lock();
        if state.total < self.max {
            state.total += 1;
            true
        } else {
            false
        }
    }

    /// Route one arrival event to the pool.
    pub(crate) fn dispatch(&self) -> Dispatch {
        let mut state = self.state.lock();
        if state.idle > state.starts {
            state.starts += 1;
            self.work.notify_one();
            Dispatch::Started
        } else if state.total < self.max {
            state.total += 1;
            state.starts += 1;
            Dispatch::Grow
        } else {
            Dispatch::Dropped
        }
    }

    /// Block until an iteration start is available for this VU. Returns false once the
    /// scenario retires or the run is draining.
    pub(crate) fn next_start(&self, stop: &ShutdownListener) -> bool {
        let mut state = self.state.lock();
        state.idle += 1;
        loop {
            if state.starts > 0 {
                state.starts -= 1;
                state.idle -= 1;
                return true;
            }
            if state.retired || stop.should_stop() {
                state.idle -= 1;
                return false;
            }
            self.work.wait_for(&mut state, WAIT_SLICE);
        }
    }

    pub(crate) fn retire(&self) {
        let mut state = self.state.lock();
        state.retired = true;
        self.work.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use slipstream_core::prelude::ShutdownHandle;

    use super::*;

    #[test]
    fn gate_admits_below_target_only() {
        let gate = ClosedGate::new();
        let listener = ShutdownHandle::new().new_listener();

        gate.set_target(2);
        assert!(gate.wait_admitted(0, &listener));
        assert!(gate.wait_admitted(1, &listener));

        gate.retire();
        assert!(!gate.wait_admitted(0, &listener));
    }

    #[test]
    fn gate_unblocks_parked_vu_when_target_rises() {
        let gate = Arc::new(ClosedGate::new());
        let listener = ShutdownHandle::new().new_listener();

        let waiter = {
            let gate = gate.clone();
            let listener = listener.clone();
            std::thread::spawn(move || gate.wait_admitted(0, &listener))
        };

        std::thread::sleep(Duration::from_millis(50));
        gate.set_target(1);
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn saturated_pool_drops_arrivals() {
        let pool = OpenPool::new(1);
        assert!(pool.reserve());
        assert!(!pool.reserve());

        // The single VU is busy (not waiting), so the arrival cannot be serviced.
        assert_eq!(pool.dispatch(), Dispatch::Dropped);
    }

    #[test]
    fn under_capacity_pool_grows_on_demand() {
        let pool = OpenPool::new(2);
        assert_eq!(pool.dispatch(), Dispatch::Grow);
        assert_eq!(pool.dispatch(), Dispatch::Grow);
        assert_eq!(pool.dispatch(), Dispatch::Dropped);
    }

    #[test]
    fn idle_vu_claims_dispatched_start() {
        let pool = Arc::new(OpenPool::new(1));
        let listener = ShutdownHandle::new().new_listener();
        assert!(pool.reserve());

        let vu = {
            let pool = pool.clone();
            let listener = listener.clone();
            std::thread::spawn(move || pool.next_start(&listener))
        };

        // Give the VU time to park as idle, then dispatch one arrival to it.
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(pool.dispatch(), Dispatch::Started);
        assert!(vu.join().unwrap());
    }

    #[test]
    fn retire_releases_waiting_vus() {
        let pool = Arc::new(OpenPool::new(1));
        let listener = ShutdownHandle::new().new_listener();
        assert!(pool.reserve());

        let vu = {
            let pool = pool.clone();
            let listener = listener.clone();
            std::thread::spawn(move || pool.next_start(&listener))
        };

        std::thread::sleep(Duration::from_millis(50));
        pool.retire();
        assert!(!vu.join().unwrap());
    }
}
