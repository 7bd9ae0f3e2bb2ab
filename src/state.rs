use crate::config::{MAX_TIMEOUTS, STATE_NAME_LEN};
use crate::handler::Handler;
use crate::signal::{SignalData, SignalId};
use arrayvec::ArrayString;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Behaviour of a state. Runs once per signal delivered to the state.
pub type StateCallback<D> = fn(&mut Handler<'_, D>) -> Status;

/// Guard/action of a transition-table row. Returning `false` rejects the row.
/// It may also perform side effects before the transition happens.
pub type GuardCallback<D> = fn(&mut Handler<'_, D>) -> bool;

/// Observer invoked once per `run` with the final status of the dispatch.
pub type SurroundingCallback<D> = fn(&mut Handler<'_, D>);

/// Handle of a state inside its machine's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateId(pub(crate) u16);

impl StateId {
    /// The synthesized root every machine owns.
    pub const TOP: Self = Self(0);

    pub fn index(self) -> usize {
        usize::from(self.0)
    }
}

impl core::fmt::Display for StateId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Result a state callback reports back to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Status {
    /// The state did not recognize the signal; it bubbles to the parent.
    #[default]
    Absent,
    Failure,
    Success,
    /// Consumed; the parent never sees it.
    SignalHandled,
    /// Application-defined outcome. Stops bubbling like `Success`.
    Custom(i16),
}

impl Status {
    /// Whether dispatch continues with the parent state.
    pub fn bubbles(self) -> bool {
        matches!(self, Status::Absent)
    }
}

/// How a transition resolves the sub-states of its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HistoryMode {
    /// Descend through the initial children.
    #[default]
    None,
    /// Restore the target's last active child, then use initial children.
    Shallow,
    /// Restore the last active child at every level down to the leaf.
    Deep,
}

/// One row of a state's transition table.
pub struct Transition<D> {
    pub signal: SignalId,
    pub guard: Option<GuardCallback<D>>,
    pub target: StateId,
    pub history: HistoryMode,
    /// Handed to the guard through [`Handler::signal_data`] in place of the
    /// data carried by the signal.
    pub signal_data: Option<SignalData>,
}

impl<D> Transition<D> {
    pub fn new(signal: SignalId, target: StateId) -> Self {
        Self {
            signal,
            guard: None,
            target,
            history: HistoryMode::None,
            signal_data: None,
        }
    }

    #[must_use]
    pub fn guard(mut self, guard: GuardCallback<D>) -> Self {
        self.guard = Some(guard);
        self
    }

    #[must_use]
    pub fn history(mut self, mode: HistoryMode) -> Self {
        self.history = mode;
        self
    }

    #[must_use]
    pub fn with_data(mut self, data: SignalData) -> Self {
        self.signal_data = Some(data);
        self
    }
}

// Manual impls: the derives would demand `D: Clone` although only fn
// pointers mention `D`.
impl<D> Clone for Transition<D> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<D> Copy for Transition<D> {}

impl<D> core::fmt::Debug for Transition<D> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Transition")
            .field("signal", &self.signal)
            .field("guarded", &self.guard.is_some())
            .field("target", &self.target)
            .field("history", &self.history)
            .field("signal_data", &self.signal_data)
            .finish()
    }
}

/// Entry/exit actions applied to a timeout slot. Combine with `|`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimeoutOptions(u32);

impl TimeoutOptions {
    pub const NONE: Self = Self(0);
    /// Arm the slot when the state is entered.
    pub const SET_ENTRY: Self = Self(0x0100_0000);
    /// Disarm the slot when the state is entered.
    pub const RST_ENTRY: Self = Self(0x0200_0000);
    /// Arm the slot when the state is left.
    pub const SET_EXIT: Self = Self(0x0400_0000);
    /// Disarm the slot when the state is left.
    pub const RST_EXIT: Self = Self(0x0800_0000);
    /// Only arm if the slot is not already counting.
    pub const KEEP_IF_SET: Self = Self(0x1000_0000);
    /// Reload the slot every time it expires.
    pub const PERIODIC: Self = Self(0x2000_0000);

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl core::ops::BitOr for TimeoutOptions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl core::ops::BitOrAssign for TimeoutOptions {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Binds a machine timeout slot to a state's entry/exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutBinding {
    pub slot: usize,
    pub duration: Duration,
    pub options: TimeoutOptions,
}

impl TimeoutBinding {
    pub fn new(slot: usize, duration: Duration, options: TimeoutOptions) -> Self {
        Self {
            slot,
            duration,
            options,
        }
    }
}

pub type StateName = ArrayString<STATE_NAME_LEN>;

/// Arena node. Links are indices into the same arena.
pub(crate) struct StateNode<D> {
    pub name: StateName,
    pub parent: Option<StateId>,
    pub depth: usize,
    pub initial: Option<StateId>,
    pub last_running_child: Option<StateId>,
    pub callback: Option<StateCallback<D>>,
    pub transitions: Vec<Transition<D>>,
    pub timeouts: heapless::Vec<TimeoutBinding, MAX_TIMEOUTS>,
    pub data: Option<SignalData>,
}

impl<D> StateNode<D> {
    pub fn new(name: &str, parent: Option<StateId>, depth: usize) -> Self {
        Self {
            name: truncated_name(name),
            parent,
            depth,
            initial: None,
            last_running_child: None,
            callback: None,
            transitions: Vec::new(),
            timeouts: heapless::Vec::new(),
            data: None,
        }
    }
}

/// Names longer than the inline buffer are cut at a char boundary.
fn truncated_name(name: &str) -> StateName {
    let mut out = StateName::new();
    for ch in name.chars() {
        if out.try_push(ch).is_err() {
            break;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_options_combine() {
        let opts = TimeoutOptions::SET_ENTRY | TimeoutOptions::RST_EXIT;
        assert!(opts.contains(TimeoutOptions::SET_ENTRY));
        assert!(opts.contains(TimeoutOptions::RST_EXIT));
        assert!(!opts.contains(TimeoutOptions::PERIODIC));
        assert_eq!(opts.bits(), 0x0900_0000);
    }

    #[test]
    fn test_status_bubbling() {
        assert!(Status::Absent.bubbles());
        assert!(!Status::SignalHandled.bubbles());
        assert!(!Status::Custom(3).bubbles());
        assert_eq!(Status::default(), Status::Absent);
    }

    #[test]
    fn test_long_names_are_truncated() {
        let name = truncated_name("a-state-name-that-is-way-too-long-for-the-buffer");
        assert_eq!(name.len(), STATE_NAME_LEN);
        assert!(name.starts_with("a-state-name"));
    }
}
