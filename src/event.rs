//! Ordered, synchronous, multi-subscriber fan-out.
//!
//! Reserved for the hooks that genuinely fan out to more than one interested
//! party: `ModelAgent::on_handle_message`, `Server::on_update_environment`,
//! `Server::on_iteration_finished`, `ObserverAgent::on_after_all_state_updates_received`.
//! Every other per-agent callback in this crate (validation predicate, state-update
//! function, the single "begin main phase" hook, a meta-agent's partner-search /
//! predict / verify / evaluate / explain) is a single plugged-in closure, not an
//! `Event` — see spec §9.

use std::sync::Arc;

type Subscriber<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// A subscription handle returned by [`Event::subscribe`], usable with
/// [`Event::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

/// An ordered list of subscribers invoked synchronously, in subscription order,
/// each time [`Event::invoke`] is called.
///
/// There is no way to unsubscribe from *within* a subscriber: `unsubscribe` takes
/// `&mut self`, which is unavailable while `invoke` holds only a shared borrow —
/// this statically rules out the self-unsubscribe-during-invocation hazard the
/// spec calls out.
pub struct Event<T> {
    next_id: u64,
    subscribers: Vec<(SubscriptionId, Subscriber<T>)>,
}

impl<T> Event<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: 0,
            subscribers: Vec::new(),
        }
    }

    /// Registers a subscriber, returning a handle that can later be passed to
    /// [`Event::unsubscribe`].
    pub fn subscribe<F>(&mut self, subscriber: F) -> SubscriptionId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.subscribers.push((id, Arc::new(subscriber)));
        id
    }

    /// Removes a subscriber previously registered with [`Event::subscribe`].
    pub fn unsubscribe(&mut self, id: SubscriptionId) {
        self.subscribers.retain(|(sub_id, _)| *sub_id != id);
    }

    /// Invokes every subscriber, in subscription order, with `payload`.
    ///
    /// Returns `true` if there was at least one subscriber. Callers that treat
    /// "nobody is listening" as a signal to auto-complete (as `ModelAgent`'s main
    /// phase does) should inspect this return value.
    pub fn invoke(&self, payload: &T) -> bool {
        for (_, subscriber) in &self.subscribers {
            subscriber(payload);
        }
        !self.subscribers.is_empty()
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

impl<T> Default for Event<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn invoke_returns_false_with_no_subscribers() {
        let event: Event<u32> = Event::new();
        assert!(!event.invoke(&1));
    }

    #[test]
    fn subscribers_run_in_order() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut event: Event<u32> = Event::new();
        for tag in 0..3 {
            let order = Arc::clone(&order);
            event.subscribe(move |_| order.lock().unwrap().push(tag));
        }
        assert!(event.invoke(&0));
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn unsubscribe_stops_future_invocations() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut event: Event<u32> = Event::new();
        let counted = Arc::clone(&count);
        let id = event.subscribe(move |_| {
            counted.fetch_add(1, Ordering::SeqCst);
        });
        event.invoke(&0);
        event.unsubscribe(id);
        event.invoke(&0);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
