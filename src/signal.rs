use crate::config::MAX_TIMEOUTS;
use serde::{Deserialize, Serialize};

/// Opaque word attached to a signal. The engine never interprets it; it is
/// typically an index or handle into storage owned by the application.
pub type SignalData = usize;

/// Identifier of a signal.
///
/// The numeric space is partitioned: user signals occupy the low range, the
/// top four values are the engine's built-ins and the slots immediately below
/// them are reserved for the built-in timeout signals. The numbering is part
/// of the external contract, so generated tables and tooling can hard-code it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignalId(pub u32);

impl SignalId {
    /// Delivered to a state right after its entry to choose a sub-state.
    pub const START: Self = Self(0xFFFF_FFFF);
    /// Delivered to a state being left.
    pub const EXIT: Self = Self(0xFFFF_FFFE);
    /// Delivered to a state being entered.
    pub const ENTRY: Self = Self(0xFFFF_FFFD);
    /// Nothing pending; still dispatched so states can do periodic work.
    pub const NONE: Self = Self(0xFFFF_FFFC);
    /// Largest id that is not one of the four built-ins above.
    pub const MAX_SIGNAL: Self = Self(0xFFFF_FFFB);
    pub const MIN_SIGNAL: Self = Self(0);
    /// Highest timeout signal id.
    pub const TM_MAX: Self = Self(0xFFFF_FFFB);
    /// Lowest timeout signal id. User signals should stay below it.
    pub const TM_MIN: Self = Self(Self::TM_MAX.0 - (MAX_TIMEOUTS as u32 - 1));

    /// Built-in signal raised when timeout slot `slot` expires.
    ///
    /// # Panics
    ///
    /// Panics if `slot >= MAX_TIMEOUTS`.
    #[must_use]
    pub const fn timeout(slot: usize) -> Self {
        assert!(slot < MAX_TIMEOUTS, "timeout slot out of range");
        Self(Self::TM_MIN.0 + slot as u32)
    }

    /// Inverse of [`SignalId::timeout`].
    #[must_use]
    pub const fn timeout_slot(self) -> Option<usize> {
        if self.is_timeout() {
            Some((self.0 - Self::TM_MIN.0) as usize)
        } else {
            None
        }
    }

    #[must_use]
    pub const fn is_timeout(self) -> bool {
        self.0 >= Self::TM_MIN.0 && self.0 <= Self::TM_MAX.0
    }

    /// `START`, `EXIT`, `ENTRY` or `NONE`.
    #[must_use]
    pub const fn is_builtin(self) -> bool {
        self.0 >= Self::NONE.0
    }

    /// Ids an application may freely assign.
    #[must_use]
    pub const fn is_user(self) -> bool {
        self.0 < Self::TM_MIN.0
    }
}

impl From<u32> for SignalId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl core::fmt::Display for SignalId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match *self {
            Self::START => write!(f, "START"),
            Self::EXIT => write!(f, "EXIT"),
            Self::ENTRY => write!(f, "ENTRY"),
            Self::NONE => write!(f, "NONE"),
            id => match id.timeout_slot() {
                Some(slot) => write!(f, "TIMEOUT({slot})"),
                None => write!(f, "{}", id.0),
            },
        }
    }
}

/// A signal record as stored in queues and mailboxes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signal {
    pub id: SignalId,
    pub data: Option<SignalData>,
}

impl Signal {
    #[must_use]
    pub const fn new(id: SignalId) -> Self {
        Self { id, data: None }
    }

    #[must_use]
    pub const fn with_data(id: SignalId, data: SignalData) -> Self {
        Self { id, data: Some(data) }
    }

    #[must_use]
    pub const fn none() -> Self {
        Self::new(SignalId::NONE)
    }
}

impl Default for Signal {
    fn default() -> Self {
        Self::none()
    }
}

impl From<SignalId> for Signal {
    fn from(id: SignalId) -> Self {
        Self::new(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_numbering() {
        assert_eq!(SignalId::START.0, u32::MAX);
        assert_eq!(SignalId::EXIT.0, u32::MAX - 1);
        assert_eq!(SignalId::ENTRY.0, u32::MAX - 2);
        assert_eq!(SignalId::NONE.0, u32::MAX - 3);
        assert_eq!(SignalId::TM_MAX.0, u32::MAX - 4);
    }

    #[test]
    fn test_timeout_ids_sit_below_builtins() {
        let last = SignalId::timeout(MAX_TIMEOUTS - 1);
        assert_eq!(last, SignalId::TM_MAX);
        assert_eq!(SignalId::timeout(0), SignalId::TM_MIN);

        for slot in 0..MAX_TIMEOUTS {
            let id = SignalId::timeout(slot);
            assert!(id.is_timeout());
            assert!(!id.is_builtin());
            assert!(!id.is_user());
            assert_eq!(id.timeout_slot(), Some(slot));
        }
    }

    #[test]
    fn test_user_signal_classification() {
        let id = SignalId(42);
        assert!(id.is_user());
        assert!(!id.is_timeout());
        assert_eq!(id.timeout_slot(), None);
        assert!(SignalId::NONE.is_builtin());
    }

    #[test]
    fn test_display() {
        assert_eq!(SignalId::ENTRY.to_string(), "ENTRY");
        assert_eq!(SignalId::timeout(1).to_string(), "TIMEOUT(1)");
        assert_eq!(SignalId(7).to_string(), "7");
    }
}
