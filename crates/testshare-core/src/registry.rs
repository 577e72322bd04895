//! Host-side adapter registry.
//!
//! Maps host-allocated [`AdapterId`]s to live adapters, forwards each
//! adapter's events to the guest as notifications, and remembers the last
//! finished discovery result so late-joining guests can be replayed.

use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, error, info, warn};

use crate::adapter::{same_adapter, TestAdapter};
use crate::events::{lock, Subscription};
use crate::model::{AdapterId, TestLoadEvent, TestRunEvent, TestSuiteInfo};
use crate::protocol::{AdapterIdArgs, AdapterSnapshot, Method, TestStateNotification, TestsNotification};
use crate::translate::{Direction, LocationTranslator};
use crate::transport::{notify_json, SharedChannel};

/// One registered adapter.
struct AdapterRecord {
    id: AdapterId,
    handle: Arc<dyn TestAdapter>,
    /// Released when the record is dropped.
    subscriptions: Vec<Subscription>,
    /// Most recent finished discovery result, already in the shared scheme.
    cached_tree: Option<TestSuiteInfo>,
}

#[derive(Default)]
struct RegistryState {
    next_id: u64,
    /// Ordered by id.
    records: Vec<AdapterRecord>,
}

impl RegistryState {
    fn record_mut(&mut self, id: AdapterId) -> Option<&mut AdapterRecord> {
        self.records.iter_mut().find(|r| r.id == id)
    }
}

/// Adapter table owned by one host coordinator.
pub struct AdapterRegistry {
    state: Arc<Mutex<RegistryState>>,
    channel: Arc<dyn SharedChannel>,
    translator: LocationTranslator,
}

impl AdapterRegistry {
    pub fn new(channel: Arc<dyn SharedChannel>, translator: LocationTranslator) -> Self {
        Self {
            state: Arc::new(Mutex::new(RegistryState::default())),
            channel,
            translator,
        }
    }

    /// Register an adapter and start forwarding its events.
    ///
    /// The `registerAdapter` notification is sent before any event
    /// subscription exists, so the guest always learns about the id before
    /// it sees events for it. Registering a handle that is already known
    /// keeps the existing record and returns its id.
    pub fn register(&self, handle: Arc<dyn TestAdapter>) -> AdapterId {
        let id = {
            let mut state = lock(&self.state);
            if let Some(existing) = state.records.iter().find(|r| same_adapter(&r.handle, &handle)) {
                warn!(adapter_id = existing.id.0, "adapter already registered; keeping existing record");
                return existing.id;
            }
            let id = AdapterId(state.next_id);
            state.next_id += 1;
            state.records.push(AdapterRecord {
                id,
                handle: Arc::clone(&handle),
                subscriptions: Vec::new(),
                cached_tree: None,
            });
            id
        };

        info!(adapter_id = id.0, "registering adapter");
        self.send(Method::RegisterAdapter, &AdapterIdArgs { adapter_id: id });

        let subscriptions = vec![
            self.subscribe_discovery(id, handle.as_ref()),
            self.subscribe_run_states(id, handle.as_ref()),
        ];
        match lock(&self.state).record_mut(id) {
            Some(record) => record.subscriptions = subscriptions,
            // Unregistered while we were subscribing; the subscriptions drop here.
            None => debug!(adapter_id = id.0, "adapter vanished during registration"),
        }
        id
    }

    /// Unregister an adapter by handle identity.
    ///
    /// Returns the id it had, or `None` (with a warning) if the handle was
    /// never registered.
    pub fn unregister(&self, handle: &Arc<dyn TestAdapter>) -> Option<AdapterId> {
        let record = {
            let mut state = lock(&self.state);
            let index = state.records.iter().position(|r| same_adapter(&r.handle, handle));
            index.map(|i| state.records.remove(i))
        };
        let Some(record) = record else {
            warn!("unregister called for an adapter that is not registered");
            return None;
        };

        let id = record.id;
        let released = record.subscriptions.len();
        drop(record);
        info!(adapter_id = id.0, released, "unregistered adapter");
        self.send(Method::UnregisterAdapter, &AdapterIdArgs { adapter_id: id });
        Some(id)
    }

    /// Unregister every adapter not in `live`, notifying the guest for each.
    /// Returns the ids that were dropped.
    pub fn retain(&self, live: &[Arc<dyn TestAdapter>]) -> Vec<AdapterId> {
        let stale: Vec<AdapterRecord> = {
            let mut state = lock(&self.state);
            let (keep, stale): (Vec<_>, Vec<_>) = std::mem::take(&mut state.records)
                .into_iter()
                .partition(|r| live.iter().any(|a| same_adapter(&r.handle, a)));
            state.records = keep;
            stale
        };

        let ids: Vec<AdapterId> = stale.iter().map(|r| r.id).collect();
        drop(stale);
        for &id in &ids {
            info!(adapter_id = id.0, "dropping adapter no longer known to the hub");
            self.send(Method::UnregisterAdapter, &AdapterIdArgs { adapter_id: id });
        }
        ids
    }

    pub fn contains(&self, handle: &Arc<dyn TestAdapter>) -> bool {
        lock(&self.state).records.iter().any(|r| same_adapter(&r.handle, handle))
    }

    /// Look up a live adapter.
    pub fn get(&self, id: AdapterId) -> Option<Arc<dyn TestAdapter>> {
        lock(&self.state)
            .records
            .iter()
            .find(|r| r.id == id)
            .map(|r| Arc::clone(&r.handle))
    }

    /// Every registered adapter with its cached tree, ordered by id.
    pub fn snapshot(&self) -> Vec<AdapterSnapshot> {
        lock(&self.state)
            .records
            .iter()
            .map(|r| AdapterSnapshot {
                adapter_id: r.id,
                tests: r.cached_tree.clone(),
            })
            .collect()
    }

    pub fn ids(&self) -> Vec<AdapterId> {
        lock(&self.state).records.iter().map(|r| r.id).collect()
    }

    pub fn cached_tree(&self, id: AdapterId) -> Option<TestSuiteInfo> {
        lock(&self.state)
            .records
            .iter()
            .find(|r| r.id == id)
            .and_then(|r| r.cached_tree.clone())
    }

    pub fn len(&self) -> usize {
        lock(&self.state).records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every record and release its subscriptions without notifying.
    /// The id counter keeps counting.
    pub fn clear(&self) {
        let records = std::mem::take(&mut lock(&self.state).records);
        debug!(count = records.len(), "clearing adapter registry");
    }

    fn send<T: serde::Serialize>(&self, method: Method, payload: &T) {
        send(self.channel.as_ref(), method, payload);
    }

    fn subscribe_discovery(&self, id: AdapterId, adapter: &dyn TestAdapter) -> Subscription {
        let state: Weak<Mutex<RegistryState>> = Arc::downgrade(&self.state);
        let channel = Arc::clone(&self.channel);
        let translator = self.translator.clone();

        adapter.tests().subscribe(move |event: &TestLoadEvent| {
            let translated = translator.load_event(event, Direction::ToShared);
            if let Some(state) = state.upgrade() {
                if let Some(record) = lock(&state).record_mut(id) {
                    record.cached_tree = match &translated {
                        TestLoadEvent::Started => None,
                        TestLoadEvent::Finished { suite, .. } => suite.clone(),
                    };
                }
            }
            debug!(adapter_id = id.0, "forwarding discovery event");
            send(
                channel.as_ref(),
                Method::Tests,
                &TestsNotification {
                    adapter_id: id,
                    event: translated,
                },
            );
        })
    }

    fn subscribe_run_states(&self, id: AdapterId, adapter: &dyn TestAdapter) -> Subscription {
        let channel = Arc::clone(&self.channel);
        let translator = self.translator.clone();

        adapter.test_states().subscribe(move |event: &TestRunEvent| {
            send(
                channel.as_ref(),
                Method::TestState,
                &TestStateNotification {
                    adapter_id: id,
                    event: translator.run_event(event, Direction::ToShared),
                },
            );
        })
    }
}

fn send<T: serde::Serialize>(channel: &dyn SharedChannel, method: Method, payload: &T) {
    if let Err(e) = notify_json(channel, method.as_str(), payload) {
        error!(method = %method, error = %e, "failed to send notification");
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("adapters", &self.ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventEmitter;
    use crate::model::{TestInfo, TestNode};
    use crate::transport::{notify_handler, MemoryChannel};
    use crate::translate::PrefixPathConverter;
    use anyhow::Result;
    use async_trait::async_trait;
    use serde_json::{json, Value};

    #[derive(Default)]
    struct StubAdapter {
        tests: EventEmitter<TestLoadEvent>,
        states: EventEmitter<TestRunEvent>,
    }

    #[async_trait]
    impl TestAdapter for StubAdapter {
        async fn load(&self) -> Result<()> {
            Ok(())
        }
        async fn run(&self, _selection: &TestNode) -> Result<()> {
            Ok(())
        }
        async fn debug(&self, _selection: &TestNode) -> Result<()> {
            Ok(())
        }
        fn cancel(&self) {}
        fn tests(&self) -> &EventEmitter<TestLoadEvent> {
            &self.tests
        }
        fn test_states(&self) -> &EventEmitter<TestRunEvent> {
            &self.states
        }
    }

    /// Registry wired to a memory channel whose guest end records every
    /// notification as `(method, payload)`.
    fn fixture() -> (AdapterRegistry, Arc<Mutex<Vec<(String, Value)>>>) {
        let (host, guest) = MemoryChannel::pair("svc");
        let seen = Arc::new(Mutex::new(Vec::new()));
        for method in ["registerAdapter", "unregisterAdapter", "tests", "testState"] {
            let sink = Arc::clone(&seen);
            guest.on_notify(
                method,
                notify_handler(move |v| sink.lock().unwrap().push((method.to_string(), v))),
            );
        }
        // Handlers live on the shared endpoint, so the guest end may drop.
        drop(guest);
        let translator = LocationTranslator::new(Arc::new(PrefixPathConverter::new("/p", "vsls:")));
        (AdapterRegistry::new(host, translator), seen)
    }

    fn stub() -> (Arc<StubAdapter>, Arc<dyn TestAdapter>) {
        let concrete = Arc::new(StubAdapter::default());
        let handle: Arc<dyn TestAdapter> = concrete.clone();
        (concrete, handle)
    }

    #[test]
    fn ids_increase_and_are_never_reused() {
        let (registry, _) = fixture();
        let (_, a) = stub();
        let (_, b) = stub();

        assert_eq!(registry.register(Arc::clone(&a)), AdapterId(0));
        assert_eq!(registry.unregister(&a), Some(AdapterId(0)));
        assert_eq!(registry.register(Arc::clone(&b)), AdapterId(1));
        assert_eq!(registry.register(Arc::clone(&a)), AdapterId(2));
        assert_eq!(registry.ids(), vec![AdapterId(1), AdapterId(2)]);
    }

    #[test]
    fn duplicate_registration_keeps_existing_record() {
        let (registry, seen) = fixture();
        let (_, a) = stub();

        let first = registry.register(Arc::clone(&a));
        let second = registry.register(Arc::clone(&a));

        assert_eq!(first, second);
        assert_eq!(registry.len(), 1);
        let registrations = seen.lock().unwrap().iter().filter(|(m, _)| m == "registerAdapter").count();
        assert_eq!(registrations, 1);
    }

    #[test]
    fn unregister_unknown_is_a_noop() {
        let (registry, seen) = fixture();
        let (_, a) = stub();
        assert_eq!(registry.unregister(&a), None);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn registration_notifies_before_events() {
        let (registry, seen) = fixture();
        let (concrete, a) = stub();
        registry.register(a);
        concrete.tests.fire(&TestLoadEvent::Started);

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0], ("registerAdapter".to_string(), json!({"adapterId": 0})));
        assert_eq!(seen[1], ("tests".to_string(), json!({"adapterId": 0, "event": {"type": "started"}})));
    }

    #[test]
    fn discovery_caches_translated_tree() {
        let (registry, seen) = fixture();
        let (concrete, a) = stub();
        let id = registry.register(a);

        let tree = TestSuiteInfo::new("s1", "root").with_child(TestInfo::new("t1", "one").with_file("/p/a.rs", Some(2)));
        concrete.tests.fire(&TestLoadEvent::Started);
        assert!(registry.cached_tree(id).is_none());
        concrete.tests.fire(&TestLoadEvent::finished(Some(tree)));

        let cached = registry.cached_tree(id).expect("tree cached");
        assert_eq!(cached.children[0].file(), Some("vsls:/a.rs"));
        assert_eq!(registry.snapshot()[0].tests, Some(cached));

        let last = seen.lock().unwrap().last().cloned().unwrap();
        assert_eq!(last.0, "tests");
        assert_eq!(last.1["event"]["suite"]["children"][0]["file"], json!("vsls:/a.rs"));
    }

    #[test]
    fn started_discovery_clears_cache() {
        let (registry, _) = fixture();
        let (concrete, a) = stub();
        let id = registry.register(a);

        concrete.tests.fire(&TestLoadEvent::finished(Some(TestSuiteInfo::new("s1", "root"))));
        assert!(registry.cached_tree(id).is_some());
        concrete.tests.fire(&TestLoadEvent::Started);
        assert!(registry.cached_tree(id).is_none());
    }

    #[test]
    fn run_events_forward_as_test_state() {
        let (registry, seen) = fixture();
        let (concrete, a) = stub();
        registry.register(a);

        concrete.states.fire(&TestRunEvent::Started {
            tests: vec!["t1".into()],
            test_run_id: None,
        });

        let last = seen.lock().unwrap().last().cloned().unwrap();
        assert_eq!(
            last,
            (
                "testState".to_string(),
                json!({"adapterId": 0, "event": {"type": "started", "tests": ["t1"]}})
            )
        );
    }

    #[test]
    fn unregister_releases_subscriptions() {
        let (registry, seen) = fixture();
        let (concrete, a) = stub();
        registry.register(Arc::clone(&a));
        assert_eq!(concrete.tests.listener_count(), 1);
        assert_eq!(concrete.states.listener_count(), 1);

        registry.unregister(&a);
        concrete.tests.fire(&TestLoadEvent::Started);

        assert_eq!(concrete.tests.listener_count(), 0);
        assert_eq!(concrete.states.listener_count(), 0);
        let last = seen.lock().unwrap().last().cloned().unwrap();
        assert_eq!(last.0, "unregisterAdapter");
        assert!(registry.snapshot().is_empty());
    }

    #[test]
    fn retain_drops_and_announces_missing_adapters() {
        let (registry, seen) = fixture();
        let (gone, a) = stub();
        let (_, b) = stub();
        registry.register(Arc::clone(&a));
        registry.register(Arc::clone(&b));

        assert_eq!(registry.retain(&[Arc::clone(&b)]), vec![AdapterId(0)]);

        assert_eq!(registry.ids(), vec![AdapterId(1)]);
        assert!(!registry.contains(&a));
        assert_eq!(gone.tests.listener_count(), 0);
        let last = seen.lock().unwrap().last().cloned().unwrap();
        assert_eq!(last, ("unregisterAdapter".to_string(), json!({"adapterId": 0})));
    }

    #[test]
    fn clear_keeps_counting() {
        let (registry, _) = fixture();
        let (concrete, a) = stub();
        registry.register(Arc::clone(&a));
        registry.clear();

        assert!(registry.is_empty());
        assert_eq!(concrete.tests.listener_count(), 0);
        assert_eq!(registry.register(a), AdapterId(1));
    }
}
