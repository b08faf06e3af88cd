//! A buffering, typed event logger and a name-indexed registry of them.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// A buffering logger for events of type `T`.
///
/// Events are timestamped relative to a shared `Instant` at the moment
/// they are logged, but delivery to `action` is batched: it happens
/// either when the internal buffer fills or when [`Logger::flush`] is
/// called explicitly. `Logger` is cheap to clone (it shares its buffer
/// and action via reference counting), so every task/command/transfer
/// that wants to log can hold its own handle without contending for a
/// lock — loggers are thread-local by construction (`Rc`, not `Arc`),
/// matching the rest of the runtime's "single mutator per thread" rule.
pub struct Logger<T> {
    time: Instant,
    action: Rc<dyn Fn(&Duration, &[(Duration, T)])>,
    buffer: Rc<RefCell<Vec<(Duration, T)>>>,
}

impl<T> Clone for Logger<T> {
    fn clone(&self) -> Self {
        Logger { time: self.time, action: Rc::clone(&self.action), buffer: Rc::clone(&self.buffer) }
    }
}

impl<T> Logger<T> {
    /// Creates a logger bound to `action`, which is invoked with
    /// buffered events whenever the buffer fills or is flushed.
    pub fn new(time: Instant, action: Rc<dyn Fn(&Duration, &[(Duration, T)])>) -> Self {
        Logger { time, action, buffer: Rc::new(RefCell::new(Vec::with_capacity(1024))) }
    }

    /// Records `event`, timestamped against this logger's shared clock.
    pub fn log(&self, event: T) {
        let mut buffer = self.buffer.borrow_mut();
        buffer.push((self.time.elapsed(), event));
        if buffer.len() == buffer.capacity() {
            (self.action)(&self.time.elapsed(), &buffer[..]);
            buffer.clear();
        }
    }

    /// Delivers any buffered events to the action now, regardless of
    /// whether the buffer is full.
    pub fn flush(&self) {
        let mut buffer = self.buffer.borrow_mut();
        (self.action)(&self.time.elapsed(), &buffer[..]);
        buffer.clear();
    }
}

/// A name-indexed collection of loggers for possibly-differing event
/// types, bound to a single shared clock.
///
/// Each of the three cooperating threads builds its own
/// `Registry` from a shared, genuinely `Send + Sync` sink handed to it
/// at spawn time: the `Logger`s it holds are `Rc`-based and therefore
/// cannot themselves cross a thread boundary, so a `Registry` is always
/// thread-local even though the clock and the sink it wraps are shared.
pub struct Registry {
    time: Instant,
    map: HashMap<String, Box<dyn Any>>,
}

impl Registry {
    /// Creates a registry whose loggers time events relative to `time`.
    pub fn new(time: Instant) -> Self {
        Registry { time, map: HashMap::new() }
    }

    /// Binds `name` to `action`, returning any logger previously bound
    /// to that name. The type `T` is fixed by the first binding of a
    /// given name; rebinding with a different `T` silently shadows the
    /// old entry rather than erroring, since `Any` cannot tell them
    /// apart at this layer — callers are expected to use one event type
    /// per name throughout a run.
    pub fn insert<T: 'static>(
        &mut self,
        name: impl Into<String>,
        action: Rc<dyn Fn(&Duration, &[(Duration, T)])>,
    ) -> Option<Box<dyn Any>> {
        let logger = Logger::<T>::new(self.time, action);
        self.map.insert(name.into(), Box::new(logger))
    }

    /// Removes a bound logger, signalling to anyone still holding a
    /// clone that no further events will be delivered downstream of it.
    pub fn remove(&mut self, name: &str) -> Option<Box<dyn Any>> {
        self.map.remove(name)
    }

    /// Retrieves a clone of the logger bound to `name`, if any, typed
    /// at `T`.
    pub fn get<T: 'static>(&self, name: &str) -> Option<Logger<T>> {
        self.map.get(name).and_then(|entry| entry.downcast_ref::<Logger<T>>()).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn logger_batches_until_flush() {
        let seen = Rc::new(Cell::new(0usize));
        let seen2 = Rc::clone(&seen);
        let action: Rc<dyn Fn(&Duration, &[(Duration, u32)])> =
            Rc::new(move |_now, events| seen2.set(seen2.get() + events.len()));
        let logger = Logger::new(Instant::now(), action);

        logger.log(1);
        logger.log(2);
        assert_eq!(seen.get(), 0);
        logger.flush();
        assert_eq!(seen.get(), 2);
    }

    #[test]
    fn registry_round_trips_by_name() {
        let mut registry = Registry::new(Instant::now());
        registry.insert::<&'static str>("task", Rc::new(|_now, _events| {}));
        assert!(registry.get::<&'static str>("task").is_some());
        assert!(registry.get::<&'static str>("missing").is_none());
        registry.remove("task");
        assert!(registry.get::<&'static str>("task").is_none());
    }
}
