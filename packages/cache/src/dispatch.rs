//! Event delivery to registered listeners.
//!
//! Every registration owns a bounded queue serviced by a dedicated worker
//! task. Synchronous registrations are invoked inline on the dispatching
//! task unless the dispatch site forces asynchronous delivery (eviction and
//! sweep notifications, which must never block on user code). Within one
//! queue, delivery order matches enqueue order; nothing is promised across
//! listeners.
//!
//! Listener panics are caught and logged. A queue that stays full past the
//! enqueue timeout drops the event, which is counted and logged.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use gridcache_core::{
    CacheResult, DeliveryMode, DispatchConfig, EntryEvent, EntryListener, EventType,
    ListenerConfig,
};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tracing::{debug, warn};

use crate::listener::{ListenerHandle, ListenerRegistration, ListenerRegistry};
use crate::stats::StatisticsCalculator;

/// Invokes a listener, containing any panic.
fn deliver<K, V>(listener: &dyn EntryListener<K, V>, event: &EntryEvent<K, V>, label: &str) {
    let outcome = catch_unwind(AssertUnwindSafe(|| listener.on_event(event)));
    if outcome.is_err() {
        warn!(
            cache = %label,
            event_type = ?event.event_type,
            "entry listener panicked; continuing delivery"
        );
    }
}

/// Delivers events to the registration set.
///
/// Owns registration and deregistration so worker tasks are spawned and torn
/// down together with their registry entries.
pub struct Dispatcher<K, V> {
    registry: Arc<ListenerRegistry<K, V>>,
    stats: Arc<StatisticsCalculator>,
    queue_capacity: usize,
    enqueue_timeout: Duration,
    drain_grace: Duration,
    label: String,
}

impl<K, V> Dispatcher<K, V>
where
    K: Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Creates a dispatcher over `registry`.
    #[must_use]
    pub fn new(
        registry: Arc<ListenerRegistry<K, V>>,
        stats: Arc<StatisticsCalculator>,
        config: &DispatchConfig,
        label: String,
    ) -> Self {
        Self {
            registry,
            stats,
            queue_capacity: config.queue_capacity,
            enqueue_timeout: config.enqueue_timeout,
            drain_grace: config.drain_grace,
            label,
        }
    }

    /// Returns `true` if any current registration subscribes to `ty`.
    ///
    /// Callers check this before building an event record so the hot path
    /// allocates nothing when nobody is listening.
    #[must_use]
    pub fn wants(&self, ty: EventType) -> bool {
        self.registry.has_listener_for(ty)
    }

    /// Registers a listener, spawning its dispatch worker.
    pub fn register(&self, config: ListenerConfig<K, V>) -> CacheResult<ListenerHandle> {
        let id = self.registry.allocate_id();
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let worker = spawn_worker(Arc::clone(&config.listener), rx, self.label.clone());
        let registration = Arc::new(ListenerRegistration {
            id,
            listener: config.listener,
            types: config.types,
            mode: config.mode,
            filter: config.filter,
            old_value_required: config.old_value_required,
            queue: tx,
            worker: Mutex::new(Some(worker)),
        });
        // On rejection the registration (and queue sender) drops here and
        // the freshly spawned worker exits on the closed channel.
        self.registry.insert_unique(registration)?;
        Ok(ListenerHandle { id })
    }

    /// Deregisters a listener. Its worker drains buffered events and exits.
    ///
    /// Returns `false` if the handle does not match a current registration.
    pub fn deregister(&self, handle: &ListenerHandle) -> bool {
        self.registry.remove(handle.id).is_some()
    }

    /// Delivers one event to every subscribed registration.
    ///
    /// With `force_async`, synchronous registrations also receive through
    /// their queue, so the calling task never runs user code.
    pub async fn dispatch(&self, event: EntryEvent<K, V>, force_async: bool) {
        if !self.registry.has_listener_for(event.event_type) {
            return;
        }
        let snapshot = self.registry.snapshot();
        for registration in snapshot.iter() {
            if !registration.types.contains(event.event_type) {
                continue;
            }
            if let Some(filter) = &registration.filter {
                if !filter(&event) {
                    continue;
                }
            }

            let mut delivery = event.clone();
            if !registration.old_value_required {
                delivery.old_value = None;
            }

            if registration.mode == DeliveryMode::Sync && !force_async {
                deliver(registration.listener.as_ref(), &delivery, &self.label);
            } else {
                self.enqueue(registration, delivery).await;
            }
        }
    }

    /// Bulk path: delivers a batch of events in order.
    pub async fn dispatch_batch(&self, events: Vec<EntryEvent<K, V>>, force_async: bool) {
        for event in events {
            self.dispatch(event, force_async).await;
        }
    }

    async fn enqueue(
        &self,
        registration: &Arc<ListenerRegistration<K, V>>,
        event: EntryEvent<K, V>,
    ) {
        match registration
            .queue
            .send_timeout(event, self.enqueue_timeout)
            .await
        {
            Ok(()) => {}
            Err(SendTimeoutError::Timeout(_)) => {
                self.stats.event_dropped();
                warn!(
                    cache = %self.label,
                    listener = registration.id,
                    "listener queue full past enqueue timeout; event dropped"
                );
            }
            Err(SendTimeoutError::Closed(_)) => {
                // Worker already stopped (deregistration in flight).
                debug!(
                    cache = %self.label,
                    listener = registration.id,
                    "listener queue closed; event discarded"
                );
            }
        }
    }

    /// Tears down every registration, draining queues up to the grace
    /// period and aborting workers that outlive it.
    pub async fn shutdown(&self) {
        let registrations = self.registry.drain();
        let mut workers = Vec::with_capacity(registrations.len());
        for registration in &registrations {
            if let Some(handle) = registration.worker.lock().take() {
                workers.push(handle);
            }
        }
        // Dropping the registrations closes the queue senders, so workers
        // finish their buffered events and exit.
        drop(registrations);

        let deadline = tokio::time::Instant::now() + self.drain_grace;
        for worker in workers {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let abort = worker.abort_handle();
            if tokio::time::timeout(remaining, worker).await.is_err() {
                abort.abort();
                warn!(
                    cache = %self.label,
                    "dispatch worker exceeded drain grace period; aborted"
                );
            }
        }
    }
}

/// Spawns the dedicated worker servicing one registration's queue.
fn spawn_worker<K, V>(
    listener: Arc<dyn EntryListener<K, V>>,
    mut rx: mpsc::Receiver<EntryEvent<K, V>>,
    label: String,
) -> tokio::task::JoinHandle<()>
where
    K: Send + 'static,
    V: Send + 'static,
{
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            deliver(listener.as_ref(), &event, &label);
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Test listener that counts deliveries per event type.
    struct CountingListener {
        created: AtomicUsize,
        updated: AtomicUsize,
        removed: AtomicUsize,
        expired: AtomicUsize,
        seen_old_values: Mutex<Vec<Option<u64>>>,
    }

    impl CountingListener {
        fn new() -> Self {
            Self {
                created: AtomicUsize::new(0),
                updated: AtomicUsize::new(0),
                removed: AtomicUsize::new(0),
                expired: AtomicUsize::new(0),
                seen_old_values: Mutex::new(Vec::new()),
            }
        }

        fn count(&self, ty: EventType) -> usize {
            match ty {
                EventType::Created => self.created.load(Ordering::Relaxed),
                EventType::Updated => self.updated.load(Ordering::Relaxed),
                EventType::Removed => self.removed.load(Ordering::Relaxed),
                EventType::Expired => self.expired.load(Ordering::Relaxed),
            }
        }
    }

    impl EntryListener<String, u64> for CountingListener {
        fn on_event(&self, event: &EntryEvent<String, u64>) {
            match event.event_type {
                EventType::Created => self.created.fetch_add(1, Ordering::Relaxed),
                EventType::Updated => self.updated.fetch_add(1, Ordering::Relaxed),
                EventType::Removed => self.removed.fetch_add(1, Ordering::Relaxed),
                EventType::Expired => self.expired.fetch_add(1, Ordering::Relaxed),
            };
            self.seen_old_values.lock().push(event.old_value);
        }
    }

    struct PanickingListener;

    impl EntryListener<String, u64> for PanickingListener {
        fn on_event(&self, _event: &EntryEvent<String, u64>) {
            panic!("listener misbehaves");
        }
    }

    fn dispatcher() -> Dispatcher<String, u64> {
        Dispatcher::new(
            Arc::new(ListenerRegistry::new()),
            Arc::new(StatisticsCalculator::new()),
            &DispatchConfig::default(),
            "test".to_string(),
        )
    }

    fn created_event(key: &str, value: u64) -> EntryEvent<String, u64> {
        EntryEvent {
            event_type: EventType::Created,
            key: key.to_string(),
            value: Some(value),
            old_value: None,
        }
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn sync_listener_receives_inline() {
        let dispatcher = dispatcher();
        let listener = Arc::new(CountingListener::new());
        dispatcher
            .register(ListenerConfig::new(
                Arc::clone(&listener) as Arc<dyn EntryListener<_, _>>
            ))
            .expect("register");

        dispatcher.dispatch(created_event("a", 1), false).await;
        // Inline delivery completes before dispatch returns.
        assert_eq!(listener.count(EventType::Created), 1);
    }

    #[tokio::test]
    async fn async_listener_receives_through_worker() {
        let dispatcher = dispatcher();
        let listener = Arc::new(CountingListener::new());
        dispatcher
            .register(
                ListenerConfig::new(Arc::clone(&listener) as Arc<dyn EntryListener<_, _>>)
                    .async_timed(),
            )
            .expect("register");

        dispatcher.dispatch(created_event("a", 1), false).await;
        let observer = Arc::clone(&listener);
        wait_for(move || observer.count(EventType::Created) == 1).await;
    }

    #[tokio::test]
    async fn unsubscribed_types_are_not_delivered() {
        let dispatcher = dispatcher();
        let listener = Arc::new(CountingListener::new());
        dispatcher
            .register(
                ListenerConfig::new(Arc::clone(&listener) as Arc<dyn EntryListener<_, _>>)
                    .with_types(&[EventType::Created]),
            )
            .expect("register");

        dispatcher
            .dispatch(
                EntryEvent {
                    event_type: EventType::Updated,
                    key: "a".to_string(),
                    value: Some(2),
                    old_value: Some(1),
                },
                false,
            )
            .await;
        assert_eq!(listener.count(EventType::Updated), 0);
    }

    #[tokio::test]
    async fn filter_suppresses_delivery() {
        let dispatcher = dispatcher();
        let listener = Arc::new(CountingListener::new());
        dispatcher
            .register(
                ListenerConfig::new(Arc::clone(&listener) as Arc<dyn EntryListener<_, _>>)
                    .with_filter(Arc::new(|event| event.key == "wanted")),
            )
            .expect("register");

        dispatcher.dispatch(created_event("ignored", 1), false).await;
        dispatcher.dispatch(created_event("wanted", 2), false).await;
        assert_eq!(listener.count(EventType::Created), 1);
    }

    #[tokio::test]
    async fn old_value_is_stripped_unless_required() {
        let dispatcher = dispatcher();
        let stripped = Arc::new(CountingListener::new());
        let carried = Arc::new(CountingListener::new());
        dispatcher
            .register(ListenerConfig::new(
                Arc::clone(&stripped) as Arc<dyn EntryListener<_, _>>
            ))
            .expect("register stripped");
        dispatcher
            .register(
                ListenerConfig::new(Arc::clone(&carried) as Arc<dyn EntryListener<_, _>>)
                    .require_old_value(),
            )
            .expect("register carried");

        dispatcher
            .dispatch(
                EntryEvent {
                    event_type: EventType::Updated,
                    key: "a".to_string(),
                    value: Some(2),
                    old_value: Some(1),
                },
                false,
            )
            .await;

        assert_eq!(stripped.seen_old_values.lock().as_slice(), &[None]);
        assert_eq!(carried.seen_old_values.lock().as_slice(), &[Some(1)]);
    }

    #[tokio::test]
    async fn force_async_routes_sync_listener_through_queue() {
        let dispatcher = dispatcher();
        let listener = Arc::new(CountingListener::new());
        dispatcher
            .register(ListenerConfig::new(
                Arc::clone(&listener) as Arc<dyn EntryListener<_, _>>
            ))
            .expect("register");

        dispatcher.dispatch(created_event("a", 1), true).await;
        let observer = Arc::clone(&listener);
        wait_for(move || observer.count(EventType::Created) == 1).await;
    }

    #[tokio::test]
    async fn panicking_listener_does_not_poison_dispatch() {
        let dispatcher = dispatcher();
        let healthy = Arc::new(CountingListener::new());
        dispatcher
            .register(ListenerConfig::new(
                Arc::new(PanickingListener) as Arc<dyn EntryListener<_, _>>
            ))
            .expect("register panicking");
        dispatcher
            .register(ListenerConfig::new(
                Arc::clone(&healthy) as Arc<dyn EntryListener<_, _>>
            ))
            .expect("register healthy");

        dispatcher.dispatch(created_event("a", 1), false).await;
        assert_eq!(healthy.count(EventType::Created), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn full_queue_drops_and_counts_after_timeout() {
        /// Stalls its worker so the bounded queue backs up.
        struct BlockingListener;

        impl EntryListener<String, u64> for BlockingListener {
            fn on_event(&self, _event: &EntryEvent<String, u64>) {
                std::thread::sleep(Duration::from_millis(200));
            }
        }

        let registry = Arc::new(ListenerRegistry::new());
        let stats = Arc::new(StatisticsCalculator::new());
        let dispatcher = Dispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&stats),
            &DispatchConfig {
                queue_capacity: 1,
                enqueue_timeout: Duration::from_millis(20),
                drain_grace: Duration::from_millis(500),
            },
            "test".to_string(),
        );
        dispatcher
            .register(
                ListenerConfig::new(Arc::new(BlockingListener) as Arc<dyn EntryListener<_, _>>)
                    .async_timed(),
            )
            .expect("register");

        // First event occupies the worker, second fills the queue, third
        // times out and is dropped.
        for i in 0..3 {
            dispatcher.dispatch(created_event("a", i), false).await;
        }
        assert!(stats.snapshot().dropped_events >= 1);
    }

    #[tokio::test]
    async fn deregistered_listener_receives_nothing_further() {
        let dispatcher = dispatcher();
        let listener = Arc::new(CountingListener::new());
        let handle = dispatcher
            .register(ListenerConfig::new(
                Arc::clone(&listener) as Arc<dyn EntryListener<_, _>>
            ))
            .expect("register");

        dispatcher.dispatch(created_event("a", 1), false).await;
        assert!(dispatcher.deregister(&handle));
        dispatcher.dispatch(created_event("b", 2), false).await;
        assert_eq!(listener.count(EventType::Created), 1);
        assert!(!dispatcher.deregister(&handle), "second deregister is a no-op");
    }

    #[tokio::test]
    async fn shutdown_drains_queued_events() {
        let dispatcher = dispatcher();
        let listener = Arc::new(CountingListener::new());
        dispatcher
            .register(
                ListenerConfig::new(Arc::clone(&listener) as Arc<dyn EntryListener<_, _>>)
                    .async_timed(),
            )
            .expect("register");

        for i in 0..16 {
            dispatcher.dispatch(created_event("a", i), false).await;
        }
        dispatcher.shutdown().await;
        assert_eq!(listener.count(EventType::Created), 16);
    }
}
