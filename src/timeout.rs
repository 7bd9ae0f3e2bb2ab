use crate::config::MAX_TIMEOUTS;
use crate::error::FsmError;
use crate::state::{TimeoutBinding, TimeoutOptions};
use crate::timer::{Clock, Timer};
use std::time::Duration;
use tracing::trace;

/// Which side of a state boundary is being processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Boundary {
    Entry,
    Exit,
}

/// Bank of built-in timeout timers owned by one machine.
///
/// Expired slots are turned into [`SignalId::timeout`](crate::SignalId::timeout)
/// signals by the machine, which is why a signal queue has to be installed
/// before the bank.
pub struct TimeoutSpec {
    timers: [Timer; MAX_TIMEOUTS],
    periodic: u32,
    clock: Box<dyn Clock>,
}

impl TimeoutSpec {
    pub fn new(clock: impl Clock + 'static) -> Self {
        Self {
            timers: [Timer::new(); MAX_TIMEOUTS],
            periodic: 0,
            clock: Box::new(clock),
        }
    }

    pub fn now(&self) -> Duration {
        self.clock.now()
    }

    /// Arm `slot` to expire `duration` from now.
    pub fn set(&mut self, slot: usize, duration: Duration) -> Result<(), FsmError> {
        let now = self.clock.now();
        let timer = self
            .timers
            .get_mut(slot)
            .ok_or(FsmError::InvalidTimeoutSlot(slot))?;
        timer.set(duration, now);
        Ok(())
    }

    pub fn stop(&mut self, slot: usize) -> Result<(), FsmError> {
        let timer = self
            .timers
            .get_mut(slot)
            .ok_or(FsmError::InvalidTimeoutSlot(slot))?;
        timer.disarm();
        Ok(())
    }

    pub fn timer(&self, slot: usize) -> Option<&Timer> {
        self.timers.get(slot)
    }

    pub fn is_periodic(&self, slot: usize) -> bool {
        slot < MAX_TIMEOUTS && self.periodic & (1 << slot) != 0
    }

    pub fn remaining(&self, slot: usize) -> Option<Duration> {
        let now = self.clock.now();
        self.timers.get(slot).and_then(|t| t.remaining(now))
    }

    /// Lowest-numbered slot whose timer has run out.
    pub(crate) fn first_expired(&self) -> Option<usize> {
        let now = self.clock.now();
        self.timers.iter().position(|t| t.expired(now))
    }

    /// Consume an expiry: periodic slots start over, the rest disarm.
    pub(crate) fn acknowledge(&mut self, slot: usize) {
        let now = self.clock.now();
        let periodic = self.is_periodic(slot);
        if let Some(timer) = self.timers.get_mut(slot) {
            if periodic {
                timer.reload(now);
            } else {
                timer.disarm();
            }
        }
    }

    /// Apply a state's bindings as it is entered or left.
    pub(crate) fn apply(&mut self, bindings: &[TimeoutBinding], boundary: Boundary) {
        let now = self.clock.now();
        let (arm, reset) = match boundary {
            Boundary::Entry => (TimeoutOptions::SET_ENTRY, TimeoutOptions::RST_ENTRY),
            Boundary::Exit => (TimeoutOptions::SET_EXIT, TimeoutOptions::RST_EXIT),
        };

        for binding in bindings {
            let Some(timer) = self.timers.get_mut(binding.slot) else {
                continue;
            };
            let opts = binding.options;
            let bit = 1u32 << binding.slot;

            if opts.contains(arm) {
                if !(opts.contains(TimeoutOptions::KEEP_IF_SET) && timer.is_armed()) {
                    timer.set(binding.duration, now);
                    trace!(slot = binding.slot, ?boundary, duration = ?binding.duration, "timeout armed");
                }
                if opts.contains(TimeoutOptions::PERIODIC) {
                    self.periodic |= bit;
                } else {
                    self.periodic &= !bit;
                }
            } else if opts.contains(reset) {
                timer.disarm();
                trace!(slot = binding.slot, ?boundary, "timeout disarmed");
            }
        }
    }
}

impl core::fmt::Debug for TimeoutSpec {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TimeoutSpec")
            .field("timers", &self.timers)
            .field("periodic", &format_args!("{:#b}", self.periodic))
            .finish_non_exhaustive()
    }
}
