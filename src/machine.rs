//! The hierarchical state-machine engine.
//!
//! States live in an arena owned by the machine and link to each other by
//! [`StateId`]. The topology is built once (`add`, `add_child`,
//! `set_initial`, `set_transitions`, `set_timeouts`), frozen by the first
//! [`StateMachine::run`], and then driven by repeated `run` calls from the
//! application's scheduler. No allocation happens inside `run`.

use crate::broker::SignalBroker;
use crate::config::{MAX_DEPTH, MAX_TIMEOUTS};
use crate::error::FsmError;
use crate::handler::Handler;
use crate::queue::{SignalQueue, SignalSender};
use crate::signal::{Signal, SignalData, SignalId};
use crate::state::{
    HistoryMode, StateCallback, StateId, StateNode, Status, SurroundingCallback, TimeoutBinding,
    Transition,
};
use crate::timeout::{Boundary, TimeoutSpec};
use heapless::Vec as BoundedVec;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Path of states from an ancestor down to a descendant.
pub type StatePath = BoundedVec<StateId, MAX_DEPTH>;

/// Transition asked for during dispatch: requesting state, target, mode.
type Request = (StateId, (StateId, HistoryMode));

/// Outcome of one callback invocation.
struct Invocation {
    status: Status,
    next: Option<(StateId, HistoryMode)>,
    start: Option<StateId>,
}

/// A hierarchical state machine carrying user data `D`.
///
/// States are registered into an arena owned by the machine and addressed by
/// [`StateId`]. After [`setup`](Self::setup) the machine is driven by
/// repeated [`run`](Self::run) calls; each call dispatches at most one signal
/// and performs at most one transition.
pub struct StateMachine<D = ()> {
    states: Vec<StateNode<D>>,
    current: Option<StateId>,
    ready: bool,
    surrounding: Option<SurroundingCallback<D>>,
    sender: SignalSender,
    timeouts: Option<TimeoutSpec>,
    broker: Option<SignalBroker>,
    data: D,
}

impl<D> StateMachine<D> {
    /// Create a machine holding only its top state.
    pub fn new(data: D) -> Self {
        Self {
            states: vec![StateNode::new("top", None, 0)],
            current: None,
            ready: false,
            surrounding: None,
            sender: SignalSender::new(),
            timeouts: None,
            broker: None,
            data,
        }
    }

    /// Set the top-state callback, the state entered on the first `run` and
    /// the optional surrounding callback.
    pub fn setup(
        &mut self,
        top_callback: StateCallback<D>,
        initial: StateId,
        surrounding: Option<SurroundingCallback<D>>,
    ) -> Result<(), FsmError> {
        self.ensure_building()?;
        self.ensure_descendant(StateId::TOP, initial)?;

        let top = &mut self.states[StateId::TOP.index()];
        top.callback = Some(top_callback);
        top.initial = Some(initial);
        self.surrounding = surrounding;
        self.ready = true;
        Ok(())
    }

    /// Register a new state directly under the top state.
    pub fn add(&mut self, name: &str, callback: StateCallback<D>) -> Result<StateId, FsmError> {
        self.add_child(StateId::TOP, name, callback)
    }

    /// Register a new state under `parent`.
    pub fn add_child(
        &mut self,
        parent: StateId,
        name: &str,
        callback: StateCallback<D>,
    ) -> Result<StateId, FsmError> {
        self.ensure_building()?;
        let depth = self.node(parent)?.depth + 1;
        if depth >= MAX_DEPTH {
            return Err(FsmError::DepthExceeded(MAX_DEPTH));
        }
        let id = u16::try_from(self.states.len())
            .map(StateId)
            .map_err(|_| FsmError::TooManyStates)?;

        let mut node = StateNode::new(name, Some(parent), depth);
        node.callback = Some(callback);
        self.states.push(node);
        trace!(state = %id, name, parent = %parent, "state added");
        Ok(id)
    }

    /// Default sub-state entered when `parent` is entered without history.
    /// `child` may sit several levels below `parent`.
    pub fn set_initial(&mut self, parent: StateId, child: StateId) -> Result<(), FsmError> {
        self.ensure_building()?;
        self.ensure_descendant(parent, child)?;
        self.states[parent.index()].initial = Some(child);
        Ok(())
    }

    /// Attach the outgoing transition table of `state`. Rows are evaluated
    /// in order; the first one whose signal matches and whose guard passes
    /// wins.
    pub fn set_transitions<I>(&mut self, state: StateId, table: I) -> Result<(), FsmError>
    where
        I: IntoIterator<Item = Transition<D>>,
    {
        self.ensure_building()?;
        self.node(state)?;
        let table: Vec<Transition<D>> = table.into_iter().collect();
        for row in &table {
            if row.target == StateId::TOP {
                return Err(FsmError::TopNotTargetable);
            }
            self.node(row.target)?;
        }
        self.states[state.index()].transitions = table;
        Ok(())
    }

    /// Bind timeout slots to the entry and exit of `state`. The bindings
    /// take effect once a [`TimeoutSpec`] is installed.
    pub fn set_timeouts(
        &mut self,
        state: StateId,
        bindings: &[TimeoutBinding],
    ) -> Result<(), FsmError> {
        self.ensure_building()?;
        self.node(state)?;
        if let Some(bad) = bindings.iter().find(|b| b.slot >= MAX_TIMEOUTS) {
            return Err(FsmError::InvalidTimeoutSlot(bad.slot));
        }
        let table = BoundedVec::from_slice(bindings)
            .map_err(|()| FsmError::TimeoutTableFull(MAX_TIMEOUTS))?;
        self.states[state.index()].timeouts = table;
        Ok(())
    }

    pub fn set_callback(
        &mut self,
        state: StateId,
        callback: StateCallback<D>,
    ) -> Result<(), FsmError> {
        self.node(state)?;
        self.states[state.index()].callback = Some(callback);
        Ok(())
    }

    pub fn set_state_data(&mut self, state: StateId, data: SignalData) -> Result<(), FsmError> {
        self.node(state)?;
        self.states[state.index()].data = Some(data);
        Ok(())
    }

    pub fn set_surrounding(&mut self, surrounding: Option<SurroundingCallback<D>>) {
        self.surrounding = surrounding;
    }

    /// Route signals through `queue` instead of the one-deep mailbox.
    pub fn install_signal_queue(&mut self, queue: SignalQueue) -> Result<(), FsmError> {
        self.sender.attach_queue(queue);
        Ok(())
    }

    /// Enable built-in timeouts. Requires a signal queue, since expiries are
    /// delivered as queued signals.
    pub fn install_timeout_spec(&mut self, spec: TimeoutSpec) -> Result<(), FsmError> {
        if !self.sender.has_queue() {
            return Err(FsmError::QueueRequired);
        }
        self.timeouts = Some(spec);
        Ok(())
    }

    /// Join a publish/subscribe group.
    pub fn install_broker(&mut self, broker: SignalBroker) {
        if let Some(previous) = self.broker.replace(broker) {
            previous.unsubscribe_all(&self.sender);
        }
    }

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
            .as_ref()
            .ok_or(FsmError::NoBroker)?
            .publish(Signal { id, data }, urgent)
    }

    pub fn subscribe_to_signal(&self, id: SignalId) -> Result<(), FsmError> {
        self.broker
            .as_ref()
            .ok_or(FsmError::NoBroker)?
            .subscribe(id, &self.sender)
    }

    pub fn unsubscribe_from_signal(&self, id: SignalId) -> Result<(), FsmError> {
        self.broker
            .as_ref()
            .ok_or(FsmError::NoBroker)?
            .unsubscribe(id, &self.sender)
    }

    pub fn timeout_set(&mut self, slot: usize, duration: Duration) -> Result<(), FsmError> {
        self.timeouts
            .as_mut()
            .ok_or(FsmError::NoTimeoutSpec)?
            .set(slot, duration)
    }

    pub fn timeout_stop(&mut self, slot: usize) -> Result<(), FsmError> {
        self.timeouts
            .as_mut()
            .ok_or(FsmError::NoTimeoutSpec)?
            .stop(slot)
    }

    /// Execute one step.
    ///
    /// Picks the pending signal with the highest precedence (queued signals,
    /// including expired timeouts, then the mailbox, then `signal`),
    /// dispatches it from the current state towards the top until a state
    /// consumes it, and performs the requested transition. The first call
    /// also performs the initial descent from the top state. Built-in ids
    /// (`START`, `ENTRY`, `EXIT`) belong to the engine; passed here they are
    /// replaced by `NONE`.
    ///
    /// Returns `true` if some state consumed the signal.
    pub fn run(&mut self, signal: impl Into<Signal>) -> bool {
        if !self.ready {
            warn!("run() called before setup()");
            return false;
        }

        let mut signal = signal.into();
        if signal.id.is_builtin() && signal.id != SignalId::NONE {
            warn!(signal = %signal.id, "reserved signal passed to run(), treated as NONE");
            signal = Signal::none();
        }
        let signal = self.select_signal(signal);
        let current = if let Some(current) = self.current {
            current
        } else {
            debug!("initial descent");
            self.current = Some(StateId::TOP);
            self.descend(StateId::TOP, HistoryMode::None)
        };

        let (status, request) = self.bubble(current, signal);

        if let Some((source, (target, mode))) = request {
            if self.validate_target(target) {
                self.transition(source, target, mode);
            }
        }

        if let Some(surrounding) = self.surrounding {
            let here = self.current.unwrap_or(StateId::TOP);
            let mut handler = self.handler(here, signal.id, signal.data);
            handler.status = status;
            surrounding(&mut handler);
        }

        !status.bubbles()
    }

    pub fn current(&self) -> Option<StateId> {
        self.current
    }

    pub fn top(&self) -> StateId {
        StateId::TOP
    }

    pub fn data(&self) -> &D {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut D {
        &mut self.data
    }

    pub fn is_started(&self) -> bool {
        self.current.is_some()
    }

    /// Handle for external producers to post signals to this machine.
    pub fn sender(&self) -> SignalSender {
        self.sender.clone()
    }

    pub fn queue(&self) -> Option<SignalQueue> {
        self.sender.queue()
    }

    pub fn timeout_spec(&self) -> Option<&TimeoutSpec> {
        self.timeouts.as_ref()
    }

    pub fn broker(&self) -> Option<&SignalBroker> {
        self.broker.as_ref()
    }

    pub fn state_name(&self, state: StateId) -> Option<&str> {
        self.states.get(state.index()).map(|n| n.name.as_str())
    }

    pub fn parent(&self, state: StateId) -> Option<StateId> {
        self.states.get(state.index()).and_then(|n| n.parent)
    }

    pub fn initial(&self, state: StateId) -> Option<StateId> {
        self.states.get(state.index()).and_then(|n| n.initial)
    }

    /// Child that was active when `state` was last left through it.
    pub fn last_running_child(&self, state: StateId) -> Option<StateId> {
        self.states.get(state.index()).and_then(|n| n.last_running_child)
    }

    pub fn transitions(&self, state: StateId) -> Option<&[Transition<D>]> {
        self.states.get(state.index()).map(|n| n.transitions.as_slice())
    }

    pub fn state_count(&self) -> usize {
        self.states.len()
    }

    /// Whether `state` is the current state or one of its ancestors.
    pub fn is_in(&self, state: StateId) -> bool {
        let mut cursor = self.current;
        while let Some(s) = cursor {
            if s == state {
                return true;
            }
            cursor = self.parent(s);
        }
        false
    }

    /// States from the top down to the current state.
    pub fn active_path(&self) -> StatePath {
        let mut path = StatePath::new();
        let mut cursor = self.current;
        while let Some(s) = cursor {
            // Depth is bounded by MAX_DEPTH at registration.
            let _ = path.push(s);
            cursor = self.parent(s);
        }
        path.reverse();
        path
    }

    fn ensure_building(&self) -> Result<(), FsmError> {
        if self.current.is_some() {
            return Err(FsmError::TopologyFrozen);
        }
        Ok(())
    }

    fn node(&self, state: StateId) -> Result<&StateNode<D>, FsmError> {
        self.states
            .get(state.index())
            .ok_or(FsmError::UnknownState(state))
    }

    fn ensure_descendant(&self, ancestor: StateId, child: StateId) -> Result<(), FsmError> {
        self.node(ancestor)?;
        self.node(child)?;
        if self.is_strict_descendant(ancestor, child) {
            Ok(())
        } else {
            Err(FsmError::NotADescendant { ancestor, child })
        }
    }

    fn is_strict_descendant(&self, ancestor: StateId, child: StateId) -> bool {
        let mut cursor = self.parent(child);
        while let Some(s) = cursor {
            if s == ancestor {
                return true;
            }
            cursor = self.parent(s);
        }
        false
    }

    fn parent_or_top(&self, state: StateId) -> StateId {
        self.parent(state).unwrap_or(StateId::TOP)
    }

    fn depth(&self, state: StateId) -> usize {
        self.states[state.index()].depth
    }

    /// Lowest common ancestor: lift the deeper state to the other's depth,
    /// then walk both up until they meet.
    fn lca(&self, a: StateId, b: StateId) -> StateId {
        let (mut a, mut b) = (a, b);
        while self.depth(a) > self.depth(b) {
            a = self.parent_or_top(a);
        }
        while self.depth(b) > self.depth(a) {
            b = self.parent_or_top(b);
        }
        while a != b {
            a = self.parent_or_top(a);
            b = self.parent_or_top(b);
        }
        a
    }

    fn validate_target(&self, target: StateId) -> bool {
        if target == StateId::TOP {
            warn!("transition to the top state ignored");
            return false;
        }
        if self.states.get(target.index()).is_none() {
            warn!(target = %target, "transition to unknown state ignored");
            return false;
        }
        true
    }

    fn select_signal(&mut self, fallback: Signal) -> Signal {
        if let Some(spec) = self.timeouts.as_mut() {
            if let Some(slot) = spec.first_expired() {
                let expiry = Signal::new(SignalId::timeout(slot));
                match self.sender.send(expiry, false) {
                    Ok(()) => {
                        spec.acknowledge(slot);
                        debug!(slot, "timeout expired");
                    }
                    // Left armed and expired, so the next run retries.
                    Err(e) => warn!(slot, error = %e, "timeout signal delayed"),
                }
            }
        }
        self.sender.receive().unwrap_or(fallback)
    }

    fn handler(
        &mut self,
        state: StateId,
        signal: SignalId,
        signal_data: Option<SignalData>,
    ) -> Handler<'_, D> {
        Handler {
            signal,
            signal_data,
            state,
            state_data: self.states[state.index()].data,
            next_state: None,
            start_state: None,
            status: Status::Absent,
            data: &mut self.data,
            timeouts: self.timeouts.as_mut(),
            sender: &self.sender,
            broker: self.broker.as_ref(),
        }
    }

    fn invoke(
        &mut self,
        state: StateId,
        signal: SignalId,
        signal_data: Option<SignalData>,
        start: Option<StateId>,
    ) -> Invocation {
        let boundary = match signal {
            SignalId::ENTRY => Some(Boundary::Entry),
            SignalId::EXIT => Some(Boundary::Exit),
            _ => None,
        };
        if let (Some(boundary), Some(spec)) = (boundary, self.timeouts.as_mut()) {
            spec.apply(&self.states[state.index()].timeouts, boundary);
        }

        let Some(callback) = self.states[state.index()].callback else {
            return Invocation {
                status: Status::Absent,
                next: None,
                start,
            };
        };

        let mut handler = self.handler(state, signal, signal_data);
        handler.start_state = start;
        let status = callback(&mut handler);
        Invocation {
            status,
            next: handler.next_state,
            start: handler.start_state,
        }
    }

    /// Dispatch from `state` towards the top until some state stops the
    /// signal. Returns the final status and the transition request, if any,
    /// paired with the state that made it.
    fn bubble(
        &mut self,
        mut state: StateId,
        signal: Signal,
    ) -> (Status, Option<Request>) {
        loop {
            let outcome = self.dispatch(state, signal);
            if let Some(next) = outcome.next {
                return (outcome.status, Some((state, next)));
            }
            if !outcome.status.bubbles() {
                return (outcome.status, None);
            }
            let Some(parent) = self.states[state.index()].parent else {
                return (outcome.status, None);
            };
            state = parent;
        }
    }

    /// Deliver `signal` to one state: its transition table first, then its
    /// callback.
    fn dispatch(&mut self, state: StateId, signal: Signal) -> Invocation {
        trace!(state = %state, signal = %signal.id, "dispatch");

        if !signal.id.is_builtin() {
            for i in 0..self.states[state.index()].transitions.len() {
                let row = self.states[state.index()].transitions[i];
                if row.signal != signal.id {
                    continue;
                }
                let accepted = match row.guard {
                    None => true,
                    Some(guard) => {
                        let data = row.signal_data.or(signal.data);
                        let mut handler = self.handler(state, signal.id, data);
                        guard(&mut handler)
                    }
                };
                if accepted {
                    return Invocation {
                        status: Status::SignalHandled,
                        next: Some((row.target, row.history)),
                        start: None,
                    };
                }
            }
        }

        let mut outcome = self.invoke(state, signal.id, signal.data, None);
        if outcome.next.is_some() && outcome.status.bubbles() {
            outcome.status = Status::SignalHandled;
        }
        outcome
    }

    fn exit(&mut self, state: StateId) -> StateId {
        self.invoke(state, SignalId::EXIT, None, None);
        let parent = self.parent_or_top(state);
        self.states[parent.index()].last_running_child = Some(state);
        parent
    }

    fn enter(&mut self, state: StateId) {
        self.invoke(state, SignalId::ENTRY, None, None);
    }

    /// Enter every state strictly below `from` down to and including `to`.
    fn enter_path(&mut self, from: StateId, to: StateId) {
        let mut path = StatePath::new();
        let mut cursor = to;
        while cursor != from {
            if path.push(cursor).is_err() {
                break;
            }
            cursor = self.parent_or_top(cursor);
        }
        for &state in path.iter().rev() {
            self.enter(state);
        }
    }

    /// Deliver START to `state` with `default` preselected and return the
    /// sub-state the callback settled on. An override outside the subtree of
    /// `state` falls back to `default`.
    fn start(&mut self, state: StateId, default: Option<StateId>) -> Option<StateId> {
        let chosen = self.invoke(state, SignalId::START, None, default).start?;
        if self.states.get(chosen.index()).is_some() && self.is_strict_descendant(state, chosen) {
            Some(chosen)
        } else {
            warn!(state = %state, chosen = %chosen, "start state is not a descendant, ignored");
            default
        }
    }

    /// Resolve sub-states below `from` until no further default exists.
    /// Returns the resulting current state.
    fn descend(&mut self, from: StateId, mode: HistoryMode) -> StateId {
        let mut state = from;
        let mut level = 0;
        loop {
            let node = &self.states[state.index()];
            let use_history = match mode {
                HistoryMode::Deep => true,
                HistoryMode::Shallow => level == 0,
                HistoryMode::None => false,
            };
            // A recorded child is restored as is; START only decides where
            // there is no history to follow.
            let restored = if use_history {
                node.last_running_child
            } else {
                None
            };
            let initial = node.initial;

            let Some(child) = restored.or_else(|| self.start(state, initial)) else {
                break;
            };
            self.enter_path(state, child);
            state = child;
            level += 1;
        }
        self.current = Some(state);
        state
    }

    fn transition(&mut self, source: StateId, target: StateId, mode: HistoryMode) {
        let mut state = self.current.unwrap_or(StateId::TOP);
        while state != source {
            state = self.exit(state);
        }

        let lca = if source == target {
            self.parent_or_top(source)
        } else {
            self.lca(source, target)
        };
        while state != lca {
            state = self.exit(state);
        }
        self.current = Some(lca);

        self.enter_path(lca, target);
        self.current = Some(target);
        let resolved = self.descend(target, mode);
        debug!(
            source = self.state_name(source).unwrap_or("?"),
            target = self.state_name(target).unwrap_or("?"),
            lca = self.state_name(lca).unwrap_or("?"),
            current = self.state_name(resolved).unwrap_or("?"),
            ?mode,
            "transition"
        );
    }
}

impl<D> Drop for StateMachine<D> {
    fn drop(&mut self) {
        if let Some(broker) = &self.broker {
            broker.unsubscribe_all(&self.sender);
        }
    }
}

impl<D> core::fmt::Debug for StateMachine<D> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("StateMachine")
            .field("states", &self.states.len())
            .field("current", &self.current)
            .field("ready", &self.ready)
            .field("timeouts", &self.timeouts)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn absent(_: &mut Handler<'_, ()>) -> Status {
        Status::Absent
    }

    #[test]
    fn test_lca_of_cousins_and_ancestors() {
        let mut sm = StateMachine::new(());
        let a = sm.add("a", absent).unwrap();
        let a1 = sm.add_child(a, "a1", absent).unwrap();
        let a11 = sm.add_child(a1, "a11", absent).unwrap();
        let a2 = sm.add_child(a, "a2", absent).unwrap();
        let b = sm.add("b", absent).unwrap();

        assert_eq!(sm.lca(a11, a2), a);
        assert_eq!(sm.lca(a11, a1), a1);
        assert_eq!(sm.lca(a11, b), StateId::TOP);
        assert_eq!(sm.lca(a2, a2), a2);
    }

    #[test]
    fn test_depth_limit() {
        let mut sm = StateMachine::new(());
        let mut parent = StateId::TOP;
        for _ in 1..MAX_DEPTH {
            parent = sm.add_child(parent, "nested", absent).unwrap();
        }
        assert_eq!(
            sm.add_child(parent, "too-deep", absent),
            Err(FsmError::DepthExceeded(MAX_DEPTH))
        );
    }

    #[test]
    fn test_initial_must_be_descendant() {
        let mut sm = StateMachine::new(());
        let a = sm.add("a", absent).unwrap();
        let b = sm.add("b", absent).unwrap();
        assert_eq!(
            sm.set_initial(a, b),
            Err(FsmError::NotADescendant {
                ancestor: a,
                child: b
            })
        );
        assert_eq!(
            sm.set_initial(a, a),
            Err(FsmError::NotADescendant {
                ancestor: a,
                child: a
            })
        );
    }
}
