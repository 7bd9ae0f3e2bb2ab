use crate::config::{MAX_PS_SIGNALS, MAX_SUBSCRIBERS_PER_SIGNAL};
use crate::error::FsmError;
use crate::queue::SignalSender;
use crate::signal::{Signal, SignalId};
use heapless::Vec;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

type Subscribers = Vec<SignalSender, MAX_SUBSCRIBERS_PER_SIGNAL>;

#[derive(Debug)]
struct Subscription {
    signal: SignalId,
    subscribers: Subscribers,
}

#[derive(Debug, Default)]
struct Index {
    slots: Vec<Subscription, MAX_PS_SIGNALS>,
}

impl Index {
    fn slot(&self, signal: SignalId) -> Option<usize> {
        self.slots.iter().position(|s| s.signal == signal)
    }
}

/// Publish/subscribe index shared by a group of machines.
///
/// Maps a signal to the machines that want it. Both dimensions are bounded
/// by [`MAX_PS_SIGNALS`] and [`MAX_SUBSCRIBERS_PER_SIGNAL`]; a full table is
/// reported to the caller, never grown.
#[derive(Debug, Clone, Default)]
pub struct SignalBroker {
    index: Arc<Mutex<Index>>,
}

impl SignalBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `sender` for `signal`. Subscribing twice is a no-op.
    pub fn subscribe(&self, signal: SignalId, sender: &SignalSender) -> Result<(), FsmError> {
        if signal.is_builtin() {
            return Err(FsmError::ReservedSignal(signal));
        }

        let mut index = self.index.lock();
        let slot = if let Some(slot) = index.slot(signal) {
            slot
        } else {
            index
                .slots
                .push(Subscription {
                    signal,
                    subscribers: Vec::new(),
                })
                .map_err(|_| FsmError::SignalSlotsFull)?;
            index.slots.len() - 1
        };

        let subscribers = &mut index.slots[slot].subscribers;
        if subscribers.iter().any(|s| s.same_target(sender)) {
            return Ok(());
        }
        subscribers
            .push(sender.clone())
            .map_err(|_| FsmError::SubscriberSlotsFull(signal))
    }

    /// Remove `sender` from `signal`. The signal slot is released once its
    /// last subscriber leaves.
    pub fn unsubscribe(&self, signal: SignalId, sender: &SignalSender) -> Result<(), FsmError> {
        let mut index = self.index.lock();
        let slot = index.slot(signal).ok_or(FsmError::SignalNotFound(signal))?;

        let subscribers = &mut index.slots[slot].subscribers;
        let position = subscribers
            .iter()
            .position(|s| s.same_target(sender))
            .ok_or(FsmError::SubscriberNotFound(signal))?;
        subscribers.swap_remove(position);

        if subscribers.is_empty() {
            index.slots.swap_remove(slot);
        }
        Ok(())
    }

    /// Remove `sender` from every signal.
    pub fn unsubscribe_all(&self, sender: &SignalSender) {
        let mut index = self.index.lock();
        for subscription in &mut index.slots {
            subscription.subscribers.retain(|s| !s.same_target(sender));
        }
        index.slots.retain(|s| !s.subscribers.is_empty());
    }

    /// Deliver `signal` to every subscriber of its id.
    ///
    /// Every subscriber gets a delivery attempt even if an earlier one fails.
    /// Returns how many accepted it; a subscriber whose queue is full or
    /// whose mailbox is still occupied turns the result into
    /// [`FsmError::PartialDelivery`].
    pub fn publish(&self, signal: Signal, urgent: bool) -> Result<usize, FsmError> {
        if signal.id.is_builtin() {
            return Err(FsmError::ReservedSignal(signal.id));
        }

        // Deliver outside the index lock so a subscriber may itself publish.
        let targets: Subscribers = {
            let index = self.index.lock();
            index
                .slot(signal.id)
                .map_or_else(Vec::new, |slot| index.slots[slot].subscribers.clone())
        };

        let mut delivered = 0;
        let mut failed = 0;
        for target in &targets {
            match target.send(signal, urgent) {
                Ok(()) => delivered += 1,
                Err(_) => failed += 1,
            }
        }

        debug!(signal = %signal.id, delivered, failed, "published signal");
        if failed > 0 {
            return Err(FsmError::PartialDelivery { delivered, failed });
        }
        Ok(delivered)
    }

    pub fn subscriber_count(&self, signal: SignalId) -> usize {
        let index = self.index.lock();
        index
            .slot(signal)
            .map_or(0, |slot| index.slots[slot].subscribers.len())
    }

    /// Number of signals `sender` is subscribed to.
    pub fn subscriptions_of(&self, sender: &SignalSender) -> usize {
        self.index
            .lock()
            .slots
            .iter()
            .filter(|s| s.subscribers.iter().any(|t| t.same_target(sender)))
            .count()
    }

    pub fn signal_count(&self) -> usize {
        self.index.lock().slots.len()
    }
}
