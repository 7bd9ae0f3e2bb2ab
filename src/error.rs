use crate::signal::SignalId;
use crate::state::StateId;
use thiserror::Error;

/// Configuration and resource failures reported by the engine.
///
/// A call that returns an error leaves the machine, queue or broker exactly
/// as it was before the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FsmError {
    #[error("topology is frozen once the machine has started")]
    TopologyFrozen,

    #[error("state {0} does not belong to this machine")]
    UnknownState(StateId),

    #[error("state {child} is not a descendant of {ancestor}")]
    NotADescendant { ancestor: StateId, child: StateId },

    #[error("nesting depth limit of {0} exceeded")]
    DepthExceeded(usize),

    #[error("state arena is full")]
    TooManyStates,

    #[error("the top state cannot be the target of a transition")]
    TopNotTargetable,

    #[error("a signal queue must be installed first")]
    QueueRequired,

    #[error("timeout slot {0} out of range")]
    InvalidTimeoutSlot(usize),

    #[error("no timeout specification installed")]
    NoTimeoutSpec,

    #[error("a state can bind at most {0} timeout slots")]
    TimeoutTableFull(usize),

    #[error("signal queue full")]
    QueueFull,

    #[error("pending-signal mailbox already occupied")]
    MailboxOccupied,

    #[error("signal {0} is reserved for the engine")]
    ReservedSignal(SignalId),

    #[error("signal {0} has no subscription slot")]
    SignalNotFound(SignalId),

    #[error("machine is not subscribed to signal {0}")]
    SubscriberNotFound(SignalId),

    #[error("all signal slots are in use")]
    SignalSlotsFull,

    #[error("all subscriber slots for signal {0} are in use")]
    SubscriberSlotsFull(SignalId),

    #[error("no signal broker installed")]
    NoBroker,

    #[error("signal reached {delivered} subscribers, {failed} rejected it")]
    PartialDelivery { delivered: usize, failed: usize },
}
