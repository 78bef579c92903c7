//! Entry listener trait and registration configuration.
//!
//! A listener observes entry lifecycle events. Each registration carries the
//! event types it subscribes to, a delivery mode, an optional filter, and
//! whether delivered events must include the prior value.

use std::sync::Arc;

use crate::event::{EntryEvent, EventType, EventTypeMask};

/// Callback observing entry lifecycle events.
///
/// Implementations must be cheap or tolerate asynchronous delivery; a
/// synchronous listener runs on the mutating caller's task. Panics are
/// caught and logged by the dispatcher, never propagated.
///
/// Used as `Arc<dyn EntryListener<K, V>>`.
pub trait EntryListener<K, V>: Send + Sync {
    /// Called once per delivered event.
    fn on_event(&self, event: &EntryEvent<K, V>);
}

/// Predicate applied to an event before delivery to one registration.
pub type EventFilter<K, V> = Arc<dyn Fn(&EntryEvent<K, V>) -> bool + Send + Sync>;

/// How events reach one registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryMode {
    /// The mutating caller invokes the listener inline.
    #[default]
    Sync,
    /// Events are queued onto a bounded per-listener queue serviced by a
    /// dedicated worker; enqueue blocks up to a configured timeout, then
    /// the event is dropped and counted.
    AsyncTimed,
}

/// Configuration for one listener registration.
///
/// Built fluently and handed to the cache's register operation:
///
/// ```ignore
/// let config = ListenerConfig::new(listener)
///     .with_types(&[EventType::Created, EventType::Removed])
///     .async_timed()
///     .require_old_value();
/// ```
pub struct ListenerConfig<K, V> {
    /// The callback to deliver events to.
    pub listener: Arc<dyn EntryListener<K, V>>,
    /// Event types this registration subscribes to.
    pub types: EventTypeMask,
    /// Delivery mode for this registration.
    pub mode: DeliveryMode,
    /// Optional per-event predicate; events failing it are not delivered.
    pub filter: Option<EventFilter<K, V>>,
    /// Whether delivered events must carry the prior value. When `false`,
    /// the dispatcher strips `old_value` from update and removal events.
    pub old_value_required: bool,
}

impl<K, V> ListenerConfig<K, V> {
    /// Configuration subscribing `listener` to all event types, synchronous
    /// delivery, no filter, without the prior value.
    #[must_use]
    pub fn new(listener: Arc<dyn EntryListener<K, V>>) -> Self {
        Self {
            listener,
            types: EventTypeMask::ALL,
            mode: DeliveryMode::Sync,
            filter: None,
            old_value_required: false,
        }
    }

    /// Restricts the subscription to the given event types.
    #[must_use]
    pub fn with_types(mut self, types: &[EventType]) -> Self {
        self.types = EventTypeMask::of(types);
        self
    }

    /// Switches the registration to bounded asynchronous delivery.
    #[must_use]
    pub fn async_timed(mut self) -> Self {
        self.mode = DeliveryMode::AsyncTimed;
        self
    }

    /// Attaches a per-event filter predicate.
    #[must_use]
    pub fn with_filter(mut self, filter: EventFilter<K, V>) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Requests that delivered events carry the prior value.
    #[must_use]
    pub fn require_old_value(mut self) -> Self {
        self.old_value_required = true;
        self
    }
}

impl<K, V> Clone for ListenerConfig<K, V> {
    fn clone(&self) -> Self {
        Self {
            listener: Arc::clone(&self.listener),
            types: self.types,
            mode: self.mode,
            filter: self.filter.clone(),
            old_value_required: self.old_value_required,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopListener;

    impl EntryListener<String, u64> for NoopListener {
        fn on_event(&self, _event: &EntryEvent<String, u64>) {}
    }

    #[test]
    fn defaults_subscribe_to_all_types_sync() {
        let config: ListenerConfig<String, u64> = ListenerConfig::new(Arc::new(NoopListener));
        assert_eq!(config.types, EventTypeMask::ALL);
        assert_eq!(config.mode, DeliveryMode::Sync);
        assert!(config.filter.is_none());
        assert!(!config.old_value_required);
    }

    #[test]
    fn builder_methods_compose() {
        let config: ListenerConfig<String, u64> = ListenerConfig::new(Arc::new(NoopListener))
            .with_types(&[EventType::Created])
            .async_timed()
            .require_old_value();
        assert!(config.types.contains(EventType::Created));
        assert!(!config.types.contains(EventType::Removed));
        assert_eq!(config.mode, DeliveryMode::AsyncTimed);
        assert!(config.old_value_required);
    }

    #[test]
    fn filter_is_applied_through_the_alias() {
        let filter: EventFilter<String, u64> = Arc::new(|event| event.key == "match");
        let config =
            ListenerConfig::new(Arc::new(NoopListener) as Arc<dyn EntryListener<_, _>>)
                .with_filter(filter);
        let event = EntryEvent {
            event_type: EventType::Created,
            key: "match".to_string(),
            value: Some(1),
            old_value: None,
        };
        assert!(config.filter.expect("filter")(&event));
    }
}
