//! Typed fan-out event emitter.
//!
//! Listeners are plain closures invoked synchronously, in subscription
//! order, on the thread that fires the event. Delivery never suspends, so
//! two events fired back to back are observed by every listener in that
//! order. Async consumers can take an [`EventStream`] instead.

use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Lock a std mutex, recovering the data if a listener panicked while
/// holding it.
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct Listeners<T> {
    next_id: u64,
    entries: Vec<(u64, Listener<T>)>,
    disposed: bool,
}

/// A single-producer, many-listener notification primitive.
pub struct EventEmitter<T> {
    listeners: Arc<Mutex<Listeners<T>>>,
}

impl<T: Clone + Send + 'static> EventEmitter<T> {
    pub fn new() -> Self {
        Self {
            listeners: Arc::new(Mutex::new(Listeners {
                next_id: 0,
                entries: Vec::new(),
                disposed: false,
            })),
        }
    }

    /// Register a listener. It stays registered until the returned
    /// [`Subscription`] is disposed or dropped.
    ///
    /// Subscribing to a disposed emitter returns an inert subscription.
    pub fn subscribe(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        let id = {
            let mut guard = lock(&self.listeners);
            if guard.disposed {
                return Subscription::empty();
            }
            let id = guard.next_id;
            guard.next_id += 1;
            guard.entries.push((id, Arc::new(listener)));
            id
        };

        let weak = Arc::downgrade(&self.listeners);
        Subscription::new(move || {
            if let Some(listeners) = weak.upgrade() {
                lock(&listeners).entries.retain(|(entry_id, _)| *entry_id != id);
            }
        })
    }

    /// Deliver `event` to every current listener.
    pub fn fire(&self, event: &T) {
        // Snapshot so listeners may subscribe or unsubscribe re-entrantly.
        let snapshot: Vec<Listener<T>> = {
            let guard = lock(&self.listeners);
            guard.entries.iter().map(|(_, l)| Arc::clone(l)).collect()
        };
        for listener in snapshot {
            listener(event);
        }
    }

    /// Receive events as an async stream. The stream ends when the emitter
    /// is disposed.
    pub fn stream(&self) -> EventStream<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = self.subscribe(move |event: &T| {
            let _ = tx.send(event.clone());
        });
        EventStream {
            inner: UnboundedReceiverStream::new(rx),
            _subscription: subscription,
        }
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.listeners).entries.len()
    }

    /// Drop every listener and refuse new ones.
    pub fn dispose(&self) {
        let mut guard = lock(&self.listeners);
        guard.disposed = true;
        guard.entries.clear();
    }

    pub fn is_disposed(&self) -> bool {
        lock(&self.listeners).disposed
    }
}

impl<T: Clone + Send + 'static> Default for EventEmitter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for EventEmitter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let guard = lock(&self.listeners);
        f.debug_struct("EventEmitter")
            .field("listeners", &guard.entries.len())
            .field("disposed", &guard.disposed)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// Handle for a registered listener. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes the listener immediately"]
pub struct Subscription {
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    fn new(release: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    fn empty() -> Self {
        Self { release: None }
    }

    /// Unsubscribe now.
    pub fn dispose(mut self) {
        self.release_now();
    }

    /// Keep the listener registered for the emitter's whole lifetime.
    pub fn detach(mut self) {
        self.release.take();
    }

    fn release_now(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.release.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// EventStream
// ---------------------------------------------------------------------------

/// Async view of an [`EventEmitter`]. Holds its own subscription.
pub struct EventStream<T> {
    inner: UnboundedReceiverStream<T>,
    _subscription: Subscription,
}

impl<T> Stream for EventStream<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn recorder() -> (Arc<Mutex<Vec<u32>>>, impl Fn(&u32) + Send + Sync + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |v: &u32| sink.lock().unwrap().push(*v))
    }

    #[test]
    fn fire_reaches_listeners_in_order() {
        let emitter = EventEmitter::new();
        let (seen, listener) = recorder();
        let _sub = emitter.subscribe(listener);

        emitter.fire(&1);
        emitter.fire(&2);

        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn dropping_subscription_unsubscribes() {
        let emitter = EventEmitter::new();
        let (seen, listener) = recorder();
        let sub = emitter.subscribe(listener);
        assert_eq!(emitter.listener_count(), 1);

        drop(sub);
        emitter.fire(&1);

        assert_eq!(emitter.listener_count(), 0);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn detached_subscription_survives() {
        let emitter = EventEmitter::new();
        let (seen, listener) = recorder();
        emitter.subscribe(listener).detach();

        emitter.fire(&5);
        assert_eq!(*seen.lock().unwrap(), vec![5]);
    }

    #[test]
    fn dispose_clears_and_rejects_listeners() {
        let emitter = EventEmitter::new();
        let (seen, listener) = recorder();
        let _sub = emitter.subscribe(listener);

        emitter.dispose();
        emitter.fire(&1);
        let (_, late) = recorder();
        let _late = emitter.subscribe(late);

        assert!(emitter.is_disposed());
        assert_eq!(emitter.listener_count(), 0);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn listener_may_unsubscribe_reentrantly() {
        let emitter: Arc<EventEmitter<u32>> = Arc::new(EventEmitter::new());
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let slot_in = Arc::clone(&slot);
        let sub = emitter.subscribe(move |_| {
            slot_in.lock().unwrap().take();
        });
        *slot.lock().unwrap() = Some(sub);

        emitter.fire(&1);
        assert_eq!(emitter.listener_count(), 0);
    }

    #[tokio::test]
    async fn stream_yields_fired_events_and_ends_on_dispose() {
        let emitter = EventEmitter::new();
        let mut stream = emitter.stream();

        emitter.fire(&10u32);
        emitter.fire(&11u32);
        emitter.dispose();

        assert_eq!(stream.next().await, Some(10));
        assert_eq!(stream.next().await, Some(11));
        assert_eq!(stream.next().await, None);
    }
}
