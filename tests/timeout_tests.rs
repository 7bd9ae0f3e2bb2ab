use coopfsm::*;
use std::time::Duration;

const LEAVE: SignalId = SignalId(1);
const BACK: SignalId = SignalId(2);
const NOISE: SignalId = SignalId(3);

#[derive(Debug, Default)]
struct Counters {
    ticks: u32,
    noise: u32,
    timeouts: Vec<usize>,
}

fn absent(_: &mut Handler<'_, Counters>) -> Status {
    Status::Absent
}

fn count(h: &mut Handler<'_, Counters>) -> Status {
    let signal = h.signal();
    if let Some(slot) = signal.timeout_slot() {
        h.data_mut().timeouts.push(slot);
        if slot == 1 {
            h.data_mut().ticks += 1;
        }
        return Status::SignalHandled;
    }
    if signal == NOISE {
        h.data_mut().noise += 1;
        return Status::SignalHandled;
    }
    Status::Absent
}

fn arm_on_entry(h: &mut Handler<'_, Counters>) -> Status {
    if h.signal() == SignalId::ENTRY {
        h.timeout_set(1, Duration::from_millis(20)).unwrap();
        return Status::Success;
    }
    count(h)
}

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

struct Rig {
    sm: StateMachine<Counters>,
    clock: ManualClock,
    a: StateId,
    b: StateId,
}

/// A arms slot 0 on entry and drops it on exit; its expiry moves A to B.
fn rig(queue: SignalQueue) -> Rig {
    let mut sm = StateMachine::new(Counters::default());
    let a = sm.add("a", count).unwrap();
    let b = sm.add("b", count).unwrap();
    sm.set_transitions(
        a,
        [
            Transition::new(SignalId::timeout(0), b),
            Transition::new(LEAVE, b),
        ],
    )
    .unwrap();
    sm.set_transitions(
        b,
        [
            Transition::new(SignalId::timeout(0), a),
            Transition::new(BACK, a),
        ],
    )
    .unwrap();
    sm.set_timeouts(
        a,
        &[TimeoutBinding::new(
            0,
            ms(100),
            TimeoutOptions::SET_ENTRY | TimeoutOptions::RST_EXIT,
        )],
    )
    .unwrap();
    sm.setup(absent, a, None).unwrap();

    let clock = ManualClock::new();
    sm.install_signal_queue(queue).unwrap();
    sm.install_timeout_spec(TimeoutSpec::new(clock.clone()))
        .unwrap();
    Rig { sm, clock, a, b }
}

#[test]
fn test_timeout_fires_after_duration() {
    let Rig {
        mut sm, clock, a, b,
    } = rig(SignalQueue::new::<4>());
    sm.run(Signal::none());
    assert_eq!(sm.current(), Some(a));

    clock.advance(ms(99));
    sm.run(Signal::none());
    assert_eq!(sm.current(), Some(a));

    clock.advance(ms(1));
    assert!(sm.run(Signal::none()));
    assert_eq!(sm.current(), Some(b));
    assert!(!sm.timeout_spec().unwrap().timer(0).unwrap().is_armed());
}

#[test]
fn test_exit_before_expiry_disarms() {
    let Rig {
        mut sm, clock, b, ..
    } = rig(SignalQueue::new::<4>());
    sm.run(Signal::none());

    clock.advance(ms(50));
    sm.run(LEAVE);
    assert_eq!(sm.current(), Some(b));

    clock.advance(ms(500));
    sm.run(Signal::none());
    sm.run(Signal::none());
    assert_eq!(sm.current(), Some(b));
    assert!(sm.data().timeouts.is_empty());
}

#[test]
fn test_reentry_rearms_from_entry_time() {
    let Rig {
        mut sm, clock, a, ..
    } = rig(SignalQueue::new::<4>());
    sm.run(Signal::none());
    sm.run(LEAVE);

    clock.advance(ms(300));
    sm.run(BACK);
    assert_eq!(sm.current(), Some(a));
    assert_eq!(sm.timeout_spec().unwrap().remaining(0), Some(ms(100)));
}

#[test]
fn test_queued_signal_precedes_timeout() {
    let Rig {
        mut sm, clock, a, b,
    } = rig(SignalQueue::new::<4>());
    sm.run(Signal::none());

    sm.send_signal(NOISE, None, false).unwrap();
    clock.advance(ms(100));

    sm.run(Signal::none());
    assert_eq!(sm.data().noise, 1);
    assert_eq!(sm.current(), Some(a));

    sm.run(Signal::none());
    assert_eq!(sm.current(), Some(b));
}

#[test]
fn test_timeout_delayed_while_queue_full() {
    let Rig {
        mut sm, clock, a, b,
    } = rig(SignalQueue::new::<1>());
    sm.run(Signal::none());

    sm.send_signal(NOISE, None, false).unwrap();
    clock.advance(ms(150));

    // No room for the expiry: the queued signal goes first, the timer
    // stays expired.
    sm.run(Signal::none());
    assert_eq!(sm.data().noise, 1);
    assert_eq!(sm.current(), Some(a));
    assert!(sm.timeout_spec().unwrap().timer(0).unwrap().is_armed());

    sm.run(Signal::none());
    assert_eq!(sm.current(), Some(b));
}

#[test]
fn test_periodic_slot_reloads() {
    let mut sm = StateMachine::new(Counters::default());
    let a = sm.add("a", count).unwrap();
    sm.set_timeouts(
        a,
        &[TimeoutBinding::new(
            1,
            ms(10),
            TimeoutOptions::SET_ENTRY | TimeoutOptions::PERIODIC,
        )],
    )
    .unwrap();
    sm.setup(absent, a, None).unwrap();
    let clock = ManualClock::new();
    sm.install_signal_queue(SignalQueue::new::<4>()).unwrap();
    sm.install_timeout_spec(TimeoutSpec::new(clock.clone()))
        .unwrap();
    sm.run(Signal::none());

    for _ in 0..5 {
        clock.advance(ms(10));
        sm.run(Signal::none());
    }
    assert_eq!(sm.data().ticks, 5);
    assert!(sm.timeout_spec().unwrap().is_periodic(1));
    assert!(sm.timeout_spec().unwrap().timer(1).unwrap().is_armed());
}

#[test]
fn test_keep_if_set_preserves_running_timer() {
    let mut sm = StateMachine::new(Counters::default());
    let a = sm.add("a", count).unwrap();
    sm.set_timeouts(
        a,
        &[TimeoutBinding::new(
            2,
            ms(100),
            TimeoutOptions::SET_ENTRY | TimeoutOptions::KEEP_IF_SET,
        )],
    )
    .unwrap();
    sm.setup(absent, a, None).unwrap();
    sm.install_signal_queue(SignalQueue::new::<4>()).unwrap();
    sm.install_timeout_spec(TimeoutSpec::new(ManualClock::new()))
        .unwrap();

    sm.timeout_set(2, ms(30)).unwrap();
    sm.run(Signal::none());
    assert_eq!(sm.timeout_spec().unwrap().remaining(2), Some(ms(30)));
}

#[test]
fn test_handler_can_arm_slot() {
    let mut sm = StateMachine::new(Counters::default());
    let a = sm.add("a", arm_on_entry).unwrap();
    sm.setup(absent, a, None).unwrap();
    let clock = ManualClock::new();
    sm.install_signal_queue(SignalQueue::new::<4>()).unwrap();
    sm.install_timeout_spec(TimeoutSpec::new(clock.clone()))
        .unwrap();

    sm.run(Signal::none());
    assert_eq!(sm.timeout_spec().unwrap().remaining(1), Some(ms(20)));

    clock.advance(ms(20));
    sm.run(Signal::none());
    assert_eq!(sm.data().timeouts, vec![1]);

    sm.timeout_set(1, ms(5)).unwrap();
    sm.timeout_stop(1).unwrap();
    clock.advance(ms(50));
    sm.run(Signal::none());
    assert_eq!(sm.data().timeouts, vec![1]);
}

#[test]
fn test_timeout_spec_requires_queue() {
    let mut sm = StateMachine::new(Counters::default());
    assert_eq!(
        sm.install_timeout_spec(TimeoutSpec::new(ManualClock::new())),
        Err(FsmError::QueueRequired)
    );
    assert_eq!(sm.timeout_set(0, ms(1)), Err(FsmError::NoTimeoutSpec));
    assert_eq!(sm.timeout_stop(0), Err(FsmError::NoTimeoutSpec));
}

#[test]
fn test_invalid_slots_rejected() {
    let Rig { mut sm, a, .. } = rig(SignalQueue::new::<4>());
    assert_eq!(
        sm.timeout_set(config::MAX_TIMEOUTS, ms(1)),
        Err(FsmError::InvalidTimeoutSlot(config::MAX_TIMEOUTS))
    );
    assert_eq!(
        sm.set_timeouts(
            a,
            &[TimeoutBinding::new(7, ms(1), TimeoutOptions::SET_ENTRY)]
        ),
        Err(FsmError::InvalidTimeoutSlot(7))
    );
}

#[test]
fn test_handler_timeout_without_spec() {
    fn try_arm(h: &mut Handler<'_, Counters>) -> Status {
        if h.signal() == SignalId::ENTRY {
            assert_eq!(
                h.timeout_set(0, Duration::from_millis(1)),
                Err(FsmError::NoTimeoutSpec)
            );
            h.data_mut().noise += 1;
        }
        Status::Absent
    }

    let mut sm = StateMachine::new(Counters::default());
    let a = sm.add("a", try_arm).unwrap();
    sm.setup(absent, a, None).unwrap();
    sm.run(Signal::none());
    assert_eq!(sm.data().noise, 1);
}

#[test]
fn test_reserved_signal_from_caller_does_not_rearm() {
    let Rig {
        mut sm, clock, a, ..
    } = rig(SignalQueue::new::<4>());
    sm.run(Signal::none());

    clock.advance(ms(50));
    assert!(!sm.run(SignalId::ENTRY));
    assert!(!sm.run(SignalId::EXIT));
    assert_eq!(sm.current(), Some(a));
    assert_eq!(sm.timeout_spec().unwrap().remaining(0), Some(ms(50)));
}
