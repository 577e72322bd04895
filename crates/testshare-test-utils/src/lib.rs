//! Shared test utilities for testshare integration tests.
//!
//! Provides a scriptable [`FakeAdapter`], an event [`Recorder`], a sample
//! test tree rooted in a fake host workspace, and [`wait_until`] for
//! assertions that depend on background availability watchers.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use testshare_core::adapter::{same_adapter, TestAdapter, TestController};
use testshare_core::events::{EventEmitter, Subscription};
use testshare_core::model::{TestEvent, TestInfo, TestLoadEvent, TestNode, TestRunEvent, TestState, TestSuiteInfo};
use testshare_core::translate::PrefixPathConverter;

/// Host workspace root used by every fixture path.
pub const LOCAL_ROOT: &str = "/home/host/project";

/// Shared-scheme prefix that [`LOCAL_ROOT`] maps to.
pub const SHARED_ROOT: &str = "vsls:";

pub fn converter() -> Arc<PrefixPathConverter> {
    Arc::new(PrefixPathConverter::new(LOCAL_ROOT, SHARED_ROOT))
}

/// `s1 { t1 }` with `t1` located at `LOCAL_ROOT/tests/a.rs:1`.
pub fn sample_tree() -> TestSuiteInfo {
    TestSuiteInfo::new("s1", "Sample suite")
        .with_file(format!("{LOCAL_ROOT}/tests"), None)
        .with_child(TestInfo::new("t1", "first test").with_file(format!("{LOCAL_ROOT}/tests/a.rs"), Some(1)))
}

// ---------------------------------------------------------------------------
// FakeAdapter
// ---------------------------------------------------------------------------

/// A call observed by a [`FakeAdapter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterCall {
    Load,
    Run(TestNode),
    Debug(TestNode),
    Cancel,
}

/// Adapter that records calls and emits plausible events.
///
/// `load` emits started/finished with the configured tree. `run` and
/// `debug` emit a started event listing the selection id, a `passed` event
/// for every test under the selection, and a finished event.
#[derive(Default)]
pub struct FakeAdapter {
    tests: EventEmitter<TestLoadEvent>,
    states: EventEmitter<TestRunEvent>,
    tree: Mutex<Option<TestSuiteInfo>>,
    calls: Mutex<Vec<AdapterCall>>,
}

impl FakeAdapter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_tree(tree: TestSuiteInfo) -> Arc<Self> {
        let adapter = Self::default();
        *adapter.tree.lock().unwrap() = Some(tree);
        Arc::new(adapter)
    }

    /// Type-erased handle sharing this allocation.
    pub fn handle(self: &Arc<Self>) -> Arc<dyn TestAdapter> {
        Arc::clone(self) as Arc<dyn TestAdapter>
    }

    pub fn calls(&self) -> Vec<AdapterCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Emit a discovery cycle ending in `tree`.
    pub fn discover(&self, tree: Option<TestSuiteInfo>) {
        *self.tree.lock().unwrap() = tree.clone();
        self.tests.fire(&TestLoadEvent::Started);
        self.tests.fire(&TestLoadEvent::finished(tree));
    }

    /// Listeners currently attached to either event stream.
    pub fn listener_count(&self) -> usize {
        self.tests.listener_count() + self.states.listener_count()
    }

    pub fn emit_run_event(&self, event: TestRunEvent) {
        self.states.fire(&event);
    }

    fn simulate_run(&self, selection: &TestNode) {
        self.states.fire(&TestRunEvent::Started {
            tests: vec![selection.id().to_string()],
            test_run_id: None,
        });
        for id in leaf_ids(selection) {
            self.states.fire(&TestRunEvent::Test(TestEvent::new(id, TestState::Passed)));
        }
        self.states.fire(&TestRunEvent::Finished { test_run_id: None });
    }
}

fn leaf_ids(node: &TestNode) -> Vec<String> {
    match node {
        TestNode::Test(test) => vec![test.id.clone()],
        TestNode::Suite(suite) => suite.children.iter().flat_map(leaf_ids).collect(),
    }
}

#[async_trait]
impl TestAdapter for FakeAdapter {
    async fn load(&self) -> Result<()> {
        self.calls.lock().unwrap().push(AdapterCall::Load);
        let tree = self.tree.lock().unwrap().clone();
        self.discover(tree);
        Ok(())
    }

    async fn run(&self, selection: &TestNode) -> Result<()> {
        self.calls.lock().unwrap().push(AdapterCall::Run(selection.clone()));
        self.simulate_run(selection);
        Ok(())
    }

    async fn debug(&self, selection: &TestNode) -> Result<()> {
        self.calls.lock().unwrap().push(AdapterCall::Debug(selection.clone()));
        self.simulate_run(selection);
        Ok(())
    }

    fn cancel(&self) {
        self.calls.lock().unwrap().push(AdapterCall::Cancel);
    }

    fn tests(&self) -> &EventEmitter<TestLoadEvent> {
        &self.tests
    }

    fn test_states(&self) -> &EventEmitter<TestRunEvent> {
        &self.states
    }
}

// ---------------------------------------------------------------------------
// Recorder
// ---------------------------------------------------------------------------

/// Collects every event fired on an emitter while alive.
pub struct Recorder<T> {
    events: Arc<Mutex<Vec<T>>>,
    _subscription: Subscription,
}

impl<T: Clone> Recorder<T> {
    pub fn events(&self) -> Vec<T> {
        self.events.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub fn record<T: Clone + Send + 'static>(emitter: &EventEmitter<T>) -> Recorder<T> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let subscription = emitter.subscribe(move |event: &T| sink.lock().unwrap().push(event.clone()));
    Recorder {
        events,
        _subscription: subscription,
    }
}

// ---------------------------------------------------------------------------
// RecordingController
// ---------------------------------------------------------------------------

/// What a [`RecordingController`] knows about one adapter.
pub struct ControllerEntry {
    pub adapter: Arc<dyn TestAdapter>,
    pub tests: Recorder<TestLoadEvent>,
    pub states: Recorder<TestRunEvent>,
    pub unregistered: bool,
}

/// Controller that subscribes to every adapter the hub hands it, the way a
/// test explorer UI would, and keeps the events it saw.
#[derive(Default)]
pub struct RecordingController {
    entries: Mutex<Vec<ControllerEntry>>,
}

impl RecordingController {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of adapters ever registered.
    pub fn seen(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Number of adapters registered and not yet unregistered.
    pub fn live(&self) -> usize {
        self.entries.lock().unwrap().iter().filter(|e| !e.unregistered).count()
    }

    /// Discovery events seen by the `index`-th registered adapter.
    pub fn tests(&self, index: usize) -> Vec<TestLoadEvent> {
        self.entries.lock().unwrap()[index].tests.events()
    }

    /// Run-state events seen by the `index`-th registered adapter.
    pub fn states(&self, index: usize) -> Vec<TestRunEvent> {
        self.entries.lock().unwrap()[index].states.events()
    }

    pub fn adapter(&self, index: usize) -> Arc<dyn TestAdapter> {
        Arc::clone(&self.entries.lock().unwrap()[index].adapter)
    }

    pub fn is_unregistered(&self, index: usize) -> bool {
        self.entries.lock().unwrap()[index].unregistered
    }
}

impl TestController for RecordingController {
    fn register_adapter(&self, adapter: Arc<dyn TestAdapter>) {
        let entry = ControllerEntry {
            tests: record(adapter.tests()),
            states: record(adapter.test_states()),
            adapter,
            unregistered: false,
        };
        self.entries.lock().unwrap().push(entry);
    }

    fn unregister_adapter(&self, adapter: &Arc<dyn TestAdapter>) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries
            .iter_mut()
            .find(|e| !e.unregistered && same_adapter(&e.adapter, adapter))
        {
            entry.unregistered = true;
        }
    }
}

// ---------------------------------------------------------------------------
// Polling
// ---------------------------------------------------------------------------

/// Poll `condition` until it holds, panicking after two seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let poll = async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(2), poll)
        .await
        .expect("condition not reached within 2s");
}
