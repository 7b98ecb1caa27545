//! Deferred-action scheduler.
//!
//! Handlers must not block or suspend, so anything slow or destructive
//! (reboot, Wi-Fi disconnect, state resend, provisioning shutdown) is
//! recorded here as a deferred action and executed by the supervisor on a
//! later tick. One slot per action kind; re-triggering an already-pending
//! action keeps the earlier trigger time, so a second request can only move
//! the event sooner, never later.

use std::sync::Mutex;

/// The closed set of deferrable side effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Reboot,
    WifiDisconnect,
    SendState,
    BleDisconnect,
}

const ALL_KINDS: [ActionKind; 4] = [
    ActionKind::Reboot,
    ActionKind::WifiDisconnect,
    ActionKind::SendState,
    ActionKind::BleDisconnect,
];

#[derive(Debug, Clone, Copy, Default)]
struct Slot {
    requested: bool,
    request_time: u64,
    delay_ms: u64,
    trigger_time: u64,
}

/// Fixed per-kind slot table. The only process-wide mutable state in the
/// gateway; the raw array stays private behind this module.
#[derive(Debug, Default)]
pub struct ActionScheduler {
    slots: Mutex<[Slot; ALL_KINDS.len()]>,
}

impl ActionScheduler {
    pub fn new() -> Self {
        ActionScheduler::default()
    }

    /// Request `kind` to run `delay_ms` after `now_ms`.
    ///
    /// If the slot is already pending with an earlier trigger time, that
    /// earlier time wins.
    pub fn trigger(&self, kind: ActionKind, delay_ms: u64, now_ms: u64) {
        let idx = ALL_KINDS.iter().position(|k| *k == kind).unwrap();
        let mut slots = self.slots.lock().unwrap();
        let slot = &mut slots[idx];

        let trigger_time = now_ms + delay_ms;
        if slot.requested && slot.trigger_time <= trigger_time {
            return;
        }
        *slot = Slot {
            requested: true,
            request_time: now_ms,
            delay_ms,
            trigger_time,
        };
    }

    /// Clear and return every action whose trigger time has passed.
    ///
    /// The snapshot-then-clear keeps executors free to re-trigger without
    /// deadlocking on the table.
    pub fn take_due(&self, now_ms: u64) -> Vec<ActionKind> {
        let mut due = Vec::new();
        let mut slots = self.slots.lock().unwrap();
        for (idx, slot) in slots.iter_mut().enumerate() {
            if slot.requested && slot.trigger_time <= now_ms {
                *slot = Slot::default();
                due.push(ALL_KINDS[idx]);
            }
        }
        due
    }

    /// Whether `kind` is currently pending (diagnostics only).
    pub fn is_pending(&self, kind: ActionKind) -> bool {
        let idx = ALL_KINDS.iter().position(|k| *k == kind).unwrap();
        self.slots.lock().unwrap()[idx].requested
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_fires_after_delay() {
        let sched = ActionScheduler::new();
        sched.trigger(ActionKind::Reboot, 1000, 0);

        assert!(sched.take_due(999).is_empty());
        assert_eq!(sched.take_due(1000), vec![ActionKind::Reboot]);
        // Slot cleared after firing.
        assert!(sched.take_due(10_000).is_empty());
        assert!(!sched.is_pending(ActionKind::Reboot));
    }

    #[test]
    fn retrigger_keeps_the_earlier_time() {
        let sched = ActionScheduler::new();
        // t1 = 0 + 1000, t2 = 100 + 500 = 600: the later call wins because
        // it is sooner.
        sched.trigger(ActionKind::Reboot, 1000, 0);
        sched.trigger(ActionKind::Reboot, 500, 100);

        assert!(sched.take_due(599).is_empty());
        assert_eq!(sched.take_due(600), vec![ActionKind::Reboot]);
        assert!(sched.take_due(1000).is_empty(), "fires exactly once");
    }

    #[test]
    fn retrigger_cannot_postpone() {
        let sched = ActionScheduler::new();
        sched.trigger(ActionKind::WifiDisconnect, 100, 0);
        sched.trigger(ActionKind::WifiDisconnect, 5000, 50);

        assert_eq!(sched.take_due(100), vec![ActionKind::WifiDisconnect]);
    }

    #[test]
    fn kinds_are_independent() {
        let sched = ActionScheduler::new();
        sched.trigger(ActionKind::Reboot, 100, 0);
        sched.trigger(ActionKind::SendState, 50, 0);

        assert_eq!(sched.take_due(50), vec![ActionKind::SendState]);
        assert_eq!(sched.take_due(100), vec![ActionKind::Reboot]);
    }

    #[test]
    fn zero_delay_fires_on_next_check() {
        let sched = ActionScheduler::new();
        sched.trigger(ActionKind::BleDisconnect, 0, 42);
        assert_eq!(sched.take_due(42), vec![ActionKind::BleDisconnect]);
    }
}
