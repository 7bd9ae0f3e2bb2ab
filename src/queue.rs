use crate::error::FsmError;
use crate::signal::Signal;
use heapless::Deque;
use parking_lot::Mutex;
use std::sync::Arc;

/// Storage behind a [`SignalQueue`], erased over its capacity.
trait Ring: Send {
    fn push_back(&mut self, signal: Signal) -> Result<(), Signal>;
    fn push_front(&mut self, signal: Signal) -> Result<(), Signal>;
    fn pop_front(&mut self) -> Option<Signal>;
    fn len(&self) -> usize;
    fn capacity(&self) -> usize;
    fn clear(&mut self);
}

impl<const N: usize> Ring for Deque<Signal, N> {
    fn push_back(&mut self, signal: Signal) -> Result<(), Signal> {
        Deque::push_back(self, signal)
    }

    fn push_front(&mut self, signal: Signal) -> Result<(), Signal> {
        Deque::push_front(self, signal)
    }

    fn pop_front(&mut self) -> Option<Signal> {
        Deque::pop_front(self)
    }

    fn len(&self) -> usize {
        Deque::len(self)
    }

    fn capacity(&self) -> usize {
        Deque::capacity(self)
    }

    fn clear(&mut self) {
        Deque::clear(self);
    }
}

/// Fixed-capacity FIFO of signal records.
///
/// Cloning yields another handle to the same ring, so producers (other
/// machines, interrupt shims, other threads) can share it with the consuming
/// machine. Access is serialized internally; the machine is the single
/// consumer.
#[derive(Clone)]
pub struct SignalQueue {
    ring: Arc<Mutex<dyn Ring>>,
}

impl SignalQueue {
    /// Create a queue holding up to `N` signals. The storage is allocated
    /// once here and never grows.
    pub fn new<const N: usize>() -> Self {
        let ring: Arc<Mutex<dyn Ring>> = Arc::new(Mutex::new(Deque::<Signal, N>::new()));
        Self { ring }
    }

    pub fn push_back(&self, signal: Signal) -> Result<(), FsmError> {
        self.ring
            .lock()
            .push_back(signal)
            .map_err(|_| FsmError::QueueFull)
    }

    /// Insert ahead of everything already queued.
    pub fn push_front(&self, signal: Signal) -> Result<(), FsmError> {
        self.ring
            .lock()
            .push_front(signal)
            .map_err(|_| FsmError::QueueFull)
    }

    pub fn pop_front(&self) -> Option<Signal> {
        self.ring.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.ring.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        let ring = self.ring.lock();
        ring.len() == ring.capacity()
    }

    pub fn capacity(&self) -> usize {
        self.ring.lock().capacity()
    }

    pub fn clear(&self) {
        self.ring.lock().clear();
    }

    /// Whether both handles refer to the same ring.
    pub fn same_queue(&self, other: &SignalQueue) -> bool {
        Arc::ptr_eq(&self.ring, &other.ring)
    }
}

impl core::fmt::Debug for SignalQueue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let ring = self.ring.lock();
        f.debug_struct("SignalQueue")
            .field("len", &ring.len())
            .field("capacity", &ring.capacity())
            .finish()
    }
}

#[derive(Debug, Default)]
struct Route {
    queue: Option<SignalQueue>,
    mailbox: Option<Signal>,
}

/// Delivery endpoint of one state machine.
///
/// Signals go to the machine's installed queue when there is one. Otherwise
/// they land in a one-deep mailbox that stays occupied until the machine's
/// next `run` consumes it, which gives producers back-pressure instead of
/// silent overwrites.
#[derive(Debug, Clone, Default)]
pub struct SignalSender {
    route: Arc<Mutex<Route>>,
}

impl SignalSender {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Deliver `signal`; `urgent` puts it at the front of the queue. The
    /// flag has no effect on mailbox delivery.
    pub fn send(&self, signal: Signal, urgent: bool) -> Result<(), FsmError> {
        if signal.id.is_builtin() {
            return Err(FsmError::ReservedSignal(signal.id));
        }

        let mut guard = self.route.lock();
        let route = &mut *guard;
        match &route.queue {
            Some(queue) if urgent => queue.push_front(signal),
            Some(queue) => queue.push_back(signal),
            None => {
                if route.mailbox.is_some() {
                    return Err(FsmError::MailboxOccupied);
                }
                route.mailbox = Some(signal);
                Ok(())
            }
        }
    }

    /// Next pending signal: queue head first, then the mailbox.
    pub(crate) fn receive(&self) -> Option<Signal> {
        let mut guard = self.route.lock();
        let route = &mut *guard;
        if let Some(signal) = route.queue.as_ref().and_then(SignalQueue::pop_front) {
            return Some(signal);
        }
        route.mailbox.take()
    }

    pub(crate) fn attach_queue(&self, queue: SignalQueue) {
        self.route.lock().queue = Some(queue);
    }

    pub fn queue(&self) -> Option<SignalQueue> {
        self.route.lock().queue.clone()
    }

    pub fn has_queue(&self) -> bool {
        self.route.lock().queue.is_some()
    }

    pub fn mailbox_occupied(&self) -> bool {
        self.route.lock().mailbox.is_some()
    }

    /// Whether both senders feed the same machine.
    pub fn same_target(&self, other: &SignalSender) -> bool {
        Arc::ptr_eq(&self.route, &other.route)
    }
}
