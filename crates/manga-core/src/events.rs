//! A small, panic-tolerant event listener system shared by every layer that
//! wants to notify observers (progress events, circuit transitions, job
//! lifecycle) without depending on a specific sink.
//!
//! Grounded on `tower_resilience_core::events`.

use std::fmt;
use std::sync::Arc;

/// An event emitted by some part of the federated provider core.
pub trait CoreEvent: Send + Sync + fmt::Debug {
    /// Short machine-readable event kind, e.g. `"state_transition"`.
    fn event_type(&self) -> &'static str;
}

/// Listens for events of a particular type.
pub trait EventListener<E: CoreEvent>: Send + Sync {
    /// Called synchronously whenever an event is emitted.
    fn on_event(&self, event: &E);
}

type BoxedListener<E> = Arc<dyn EventListener<E>>;

/// A collection of listeners for one event type.
///
/// Emission is best-effort: a panicking listener is caught so the remaining
/// listeners still run, matching the "all three sinks are best-effort"
/// requirement on `ProgressTracker` emission (spec §4.6).
#[derive(Clone)]
pub struct EventListeners<E: CoreEvent> {
    listeners: Vec<BoxedListener<E>>,
}

impl<E: CoreEvent> EventListeners<E> {
    /// An empty listener set.
    pub fn new() -> Self {
        Self {
            listeners: Vec::new(),
        }
    }

    /// Registers a listener.
    pub fn add<L>(&mut self, listener: L)
    where
        L: EventListener<E> + 'static,
    {
        self.listeners.push(Arc::new(listener));
    }

    /// Emits `event` to every registered listener, isolating panics.
    pub fn emit(&self, event: &E) {
        for listener in &self.listeners {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                listener.on_event(event);
            }));
            if result.is_err() {
                #[cfg(feature = "tracing")]
                tracing::warn!(event_type = event.event_type(), "event listener panicked");
                #[cfg(feature = "metrics")]
                metrics::counter!("core_event_listener_panics_total", "event_type" => event.event_type()).increment(1);
            }
        }
    }

    /// `true` if no listeners are registered.
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.listeners.len()
    }
}

impl<E: CoreEvent> Default for EventListeners<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Adapts a plain closure into an [`EventListener`].
pub struct FnListener<E, F>
where
    F: Fn(&E) + Send + Sync,
{
    f: F,
    _marker: std::marker::PhantomData<E>,
}

impl<E, F> FnListener<E, F>
where
    F: Fn(&E) + Send + Sync,
{
    /// Wraps `f` as a listener.
    pub fn new(f: F) -> Self {
        Self {
            f,
            _marker: std::marker::PhantomData,
        }
    }
}

impl<E, F> EventListener<E> for FnListener<E, F>
where
    E: CoreEvent,
    F: Fn(&E) + Send + Sync,
{
    fn on_event(&self, event: &E) {
        (self.f)(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct Tick;
    impl CoreEvent for Tick {
        fn event_type(&self) -> &'static str {
            "tick"
        }
    }

    #[test]
    fn emits_to_all_listeners() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut listeners = EventListeners::new();
        let c = counter.clone();
        listeners.add(FnListener::new(move |_: &Tick| {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        let c2 = counter.clone();
        listeners.add(FnListener::new(move |_: &Tick| {
            c2.fetch_add(10, Ordering::SeqCst);
        }));

        listeners.emit(&Tick);
        assert_eq!(counter.load(Ordering::SeqCst), 11);
    }

    #[test]
    fn panicking_listener_does_not_stop_others() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut listeners = EventListeners::new();
        listeners.add(FnListener::new(|_: &Tick| panic!("boom")));
        let c = counter.clone();
        listeners.add(FnListener::new(move |_: &Tick| {
            c.fetch_add(1, Ordering::SeqCst);
        }));

        listeners.emit(&Tick);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
