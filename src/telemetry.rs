use crate::config::{MAX_DEPTH, MAX_TIMEOUTS};
use crate::machine::StateMachine;
use crate::state::{StateId, StateName};
use heapless::Vec;
use serde::{Deserialize, Serialize};

/// Point-in-time view of one timeout slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutSnapshot {
    pub slot: usize,
    pub armed: bool,
    pub periodic: bool,
    pub interval_ms: u64,
    pub remaining_ms: Option<u64>,
}

/// Serializable diagnostics for a running machine.
///
/// Built on demand by [`StateMachine::snapshot`]; nothing is recorded
/// between calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineSnapshot {
    pub started: bool,
    pub current: Option<StateId>,
    pub current_name: Option<StateName>,
    pub active_path: Vec<StateName, MAX_DEPTH>,
    pub state_count: usize,
    pub queued_signals: usize,
    pub queue_capacity: usize,
    pub mailbox_occupied: bool,
    pub timeouts: Vec<TimeoutSnapshot, MAX_TIMEOUTS>,
    pub subscriptions: usize,
}

impl MachineSnapshot {
    /// Whether any signal is waiting to be dispatched.
    pub fn has_pending(&self) -> bool {
        self.queued_signals > 0 || self.mailbox_occupied
    }

    pub fn armed_timeouts(&self) -> usize {
        self.timeouts.iter().filter(|t| t.armed).count()
    }
}

impl<D> StateMachine<D> {
    pub fn snapshot(&self) -> MachineSnapshot {
        let name = |id: StateId| {
            self.state_name(id)
                .map(|n| StateName::from(n).unwrap_or_default())
        };

        let mut active_path = Vec::new();
        for id in self.active_path() {
            if let Some(n) = name(id) {
                // Both vectors are bounded by MAX_DEPTH.
                let _ = active_path.push(n);
            }
        }

        let sender = self.sender();
        let (queued_signals, queue_capacity) = self
            .queue()
            .map_or((0, 0), |q| (q.len(), q.capacity()));

        let mut timeouts = Vec::new();
        if let Some(spec) = self.timeout_spec() {
            for slot in 0..MAX_TIMEOUTS {
                let Some(timer) = spec.timer(slot) else {
                    continue;
                };
                let _ = timeouts.push(TimeoutSnapshot {
                    slot,
                    armed: timer.is_armed(),
                    periodic: spec.is_periodic(slot),
                    interval_ms: timer.interval().as_millis() as u64,
                    remaining_ms: spec.remaining(slot).map(|d| d.as_millis() as u64),
                });
            }
        }

        MachineSnapshot {
            started: self.is_started(),
            current: self.current(),
            current_name: self.current().and_then(name),
            active_path,
            state_count: self.state_count(),
            queued_signals,
            queue_capacity,
            mailbox_occupied: sender.mailbox_occupied(),
            timeouts,
            subscriptions: self.broker().map_or(0, |b| b.subscriptions_of(&sender)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::Handler;
    use crate::queue::SignalQueue;
    use crate::signal::{Signal, SignalId};
    use crate::state::Status;
    use crate::timeout::TimeoutSpec;
    use crate::timer::ManualClock;
    use std::time::Duration;

    fn absent(_: &mut Handler<'_, ()>) -> Status {
        Status::Absent
    }

    #[test]
    fn test_snapshot_before_and_after_start() {
        let mut sm = StateMachine::new(());
        let idle = sm.add("idle", absent).unwrap();
        sm.setup(absent, idle, None).unwrap();
        sm.install_signal_queue(SignalQueue::new::<4>()).unwrap();
        sm.install_timeout_spec(TimeoutSpec::new(ManualClock::new()))
            .unwrap();

        let before = sm.snapshot();
        assert!(!before.started);
        assert_eq!(before.current, None);
        assert_eq!(before.queue_capacity, 4);
        assert_eq!(before.timeouts.len(), MAX_TIMEOUTS);

        sm.run(Signal::none());
        sm.timeout_set(1, Duration::from_millis(250)).unwrap();
        sm.send_signal(SignalId(7), None, false).unwrap();

        let after = sm.snapshot();
        assert!(after.started);
        assert_eq!(after.current, Some(idle));
        assert_eq!(after.current_name.as_deref(), Some("idle"));
        assert_eq!(after.active_path.len(), 2);
        assert_eq!(after.queued_signals, 1);
        assert!(after.has_pending());
        assert_eq!(after.armed_timeouts(), 1);
        assert_eq!(after.timeouts[1].remaining_ms, Some(250));
    }

    #[test]
    fn test_snapshot_serializes_to_json() {
        let mut sm = StateMachine::new(());
        let idle = sm.add("idle", absent).unwrap();
        sm.setup(absent, idle, None).unwrap();
        sm.run(Signal::none());

        let json = serde_json::to_string(&sm.snapshot()).unwrap();
        assert!(json.contains("\"current_name\":\"idle\""));
        let back: MachineSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sm.snapshot());
    }
}
