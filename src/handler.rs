use crate::broker::SignalBroker;
use crate::error::FsmError;
use crate::queue::SignalSender;
use crate::signal::{Signal, SignalData, SignalId};
use crate::state::{HistoryMode, StateId, Status};
use crate::timeout::TimeoutSpec;
use std::time::Duration;

/// Context handed to state callbacks, guards and the surrounding callback.
///
/// A fresh handler is built for every callback invocation. Requests made
/// through it (`next_state`, `start_state`) are collected by the machine
/// once the callback returns.
pub struct Handler<'a, D> {
    pub(crate) signal: SignalId,
    pub(crate) signal_data: Option<SignalData>,
    pub(crate) state: StateId,
    pub(crate) state_data: Option<SignalData>,
    pub(crate) next_state: Option<(StateId, HistoryMode)>,
    pub(crate) start_state: Option<StateId>,
    pub(crate) status: Status,
    pub(crate) data: &'a mut D,
    pub(crate) timeouts: Option<&'a mut TimeoutSpec>,
    pub(crate) sender: &'a SignalSender,
    pub(crate) broker: Option<&'a SignalBroker>,
}

impl<D> Handler<'_, D> {
    /// Signal being evaluated.
    pub fn signal(&self) -> SignalId {
        self.signal
    }

    pub fn signal_data(&self) -> Option<SignalData> {
        self.signal_data
    }

    /// State whose callback is executing.
    pub fn this_state(&self) -> StateId {
        self.state
    }

    pub fn state_data(&self) -> Option<SignalData> {
        self.state_data
    }

    /// Status of the dispatch; meaningful in the surrounding callback.
    pub fn last_status(&self) -> Status {
        self.status
    }

    /// Machine user data.
    pub fn data(&self) -> &D {
        &*self.data
    }

    pub fn data_mut(&mut self) -> &mut D {
        &mut *self.data
    }

    /// Request a transition to `target` once this dispatch completes.
    pub fn next_state(&mut self, target: StateId) {
        self.next_state_with(target, HistoryMode::None);
    }

    /// Request a transition to `target`, resolving its sub-states with
    /// `mode`.
    pub fn next_state_with(&mut self, target: StateId, mode: HistoryMode) {
        self.next_state = Some((target, mode));
    }

    /// Pick the sub-state to descend into. Only honoured while handling
    /// [`SignalId::START`].
    pub fn start_state(&mut self, child: StateId) {
        if self.signal == SignalId::START {
            self.start_state = Some(child);
        }
    }

    pub fn timeout_set(&mut self, slot: usize, duration: Duration) -> Result<(), FsmError> {
        self.timeouts
            .as_deref_mut()
            .ok_or(FsmError::NoTimeoutSpec)?
            .set(slot, duration)
    }

    pub fn timeout_stop(&mut self, slot: usize) -> Result<(), FsmError> {
        self.timeouts
            .as_deref_mut()
            .ok_or(FsmError::NoTimeoutSpec)?
            .stop(slot)
    }

    /// Post a signal to this machine. It is picked up by a later `run`,
    /// never dispatched re-entrantly.
    pub fn send_signal(
        &self,
        id: SignalId,
        data: Option<SignalData>,
        urgent: bool,
    ) -> Result<(), FsmError> {
        self.sender.send(Signal { id, data }, urgent)
    }

    pub fn send_signal_to_subscribers(
        &self,
        id: SignalId,
        data: Option<SignalData>,
        urgent: bool,
    ) -> Result<usize, FsmError> {
        self.broker
            .ok_or(FsmError::NoBroker)?
            .publish(Signal { id, data }, urgent)
    }
}
