//! `testshare demo`: a host and a guest in one process.
//!
//! The host side serves a fixed test tree through [`StaticAdapter`]. The
//! guest side records what its test explorer would see through
//! [`DemoExplorer`]. Both run over [`MemoryCollaboration`], so everything
//! the guest prints has gone through the real protocol path.

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use tracing::info;

use testshare_core::ShareConfig;
use testshare_core::adapter::{InMemoryHub, TestAdapter, TestController, TestHub, same_adapter};
use testshare_core::events::{EventEmitter, Subscription, lock};
use testshare_core::model::{
    NodeRef, SuiteState, TestEvent, TestLoadEvent, TestNode, TestRunEvent, TestState, TestSuiteEvent,
    TestSuiteInfo,
};
use testshare_core::session::{MemoryCollaboration, Role, SessionInfo, SessionManager};
use testshare_core::translate::PrefixPathConverter;

/// Shared-scheme root the demo maps the local root to.
pub const SHARED_ROOT: &str = "vsls:";

const DEMO_SESSION: &str = "demo";

// -----------------------------------------------------------------------
// Host side
// -----------------------------------------------------------------------

/// Adapter backed by a fixed tree. Every run passes, except tests marked
/// `skipped`.
pub struct StaticAdapter {
    tree: TestSuiteInfo,
    tests: EventEmitter<TestLoadEvent>,
    states: EventEmitter<TestRunEvent>,
}

impl StaticAdapter {
    pub fn new(tree: TestSuiteInfo) -> Self {
        Self {
            tree,
            tests: EventEmitter::new(),
            states: EventEmitter::new(),
        }
    }

    fn emit_node(&self, node: &TestNode) {
        match node {
            TestNode::Suite(suite) => {
                self.states.fire(&suite_event(&suite.id, SuiteState::Running));
                for child in &suite.children {
                    self.emit_node(child);
                }
                self.states.fire(&suite_event(&suite.id, SuiteState::Completed));
            }
            TestNode::Test(test) => {
                if test.skipped == Some(true) {
                    self.states.fire(&TestRunEvent::Test(TestEvent::new(&test.id, TestState::Skipped)));
                    return;
                }
                self.states.fire(&TestRunEvent::Test(TestEvent::new(&test.id, TestState::Running)));
                self.states.fire(&TestRunEvent::Test(TestEvent::new(&test.id, TestState::Passed)));
            }
        }
    }

    fn execute(&self, selection: &TestNode) -> Result<()> {
        // Only nodes from our own tree can run.
        let node = self
            .tree
            .find(selection.id())
            .ok_or_else(|| anyhow!("unknown test id {}", selection.id()))?;
        self.states.fire(&TestRunEvent::Started {
            tests: vec![node.id().to_string()],
            test_run_id: None,
        });
        self.emit_node(&node);
        self.states.fire(&TestRunEvent::Finished { test_run_id: None });
        Ok(())
    }
}

fn suite_event(id: &str, state: SuiteState) -> TestRunEvent {
    TestRunEvent::Suite(TestSuiteEvent {
        suite: NodeRef::Id(id.to_string()),
        state,
        description: None,
        tooltip: None,
        test_run_id: None,
    })
}

#[async_trait]
impl TestAdapter for StaticAdapter {
    async fn load(&self) -> Result<()> {
        self.tests.fire(&TestLoadEvent::Started);
        self.tests.fire(&TestLoadEvent::finished(Some(self.tree.clone())));
        Ok(())
    }

    async fn run(&self, selection: &TestNode) -> Result<()> {
        self.execute(selection)
    }

    async fn debug(&self, selection: &TestNode) -> Result<()> {
        info!(test_id = selection.id(), "no debugger in demo; running instead");
        self.execute(selection)
    }

    fn cancel(&self) {}

    fn tests(&self) -> &EventEmitter<TestLoadEvent> {
        &self.tests
    }

    fn test_states(&self) -> &EventEmitter<TestRunEvent> {
        &self.states
    }
}

// -----------------------------------------------------------------------
// Guest side
// -----------------------------------------------------------------------

#[derive(Default)]
struct ExplorerState {
    adapters: Vec<Arc<dyn TestAdapter>>,
    subscriptions: Vec<Subscription>,
}

/// Guest-side controller keeping the latest tree and every run event.
#[derive(Default)]
pub struct DemoExplorer {
    state: Mutex<ExplorerState>,
    tree: Arc<Mutex<Option<TestSuiteInfo>>>,
    run_events: Arc<Mutex<Vec<TestRunEvent>>>,
}

impl DemoExplorer {
    fn first_adapter(&self) -> Option<Arc<dyn TestAdapter>> {
        lock(&self.state).adapters.first().cloned()
    }

    fn tree(&self) -> Option<TestSuiteInfo> {
        lock(&self.tree).clone()
    }

    fn run_events(&self) -> Vec<TestRunEvent> {
        lock(&self.run_events).clone()
    }
}

impl TestController for DemoExplorer {
    fn register_adapter(&self, adapter: Arc<dyn TestAdapter>) {
        let tree = Arc::clone(&self.tree);
        let discovery = adapter.tests().subscribe(move |event| {
            if let TestLoadEvent::Finished { suite, .. } = event {
                *lock(&tree) = suite.clone();
            }
        });
        let run_events = Arc::clone(&self.run_events);
        let runs = adapter
            .test_states()
            .subscribe(move |event| lock(&run_events).push(event.clone()));

        let mut state = lock(&self.state);
        state.adapters.push(adapter);
        state.subscriptions.extend([discovery, runs]);
    }

    fn unregister_adapter(&self, adapter: &Arc<dyn TestAdapter>) {
        lock(&self.state)
            .adapters
            .retain(|a| !same_adapter(a, adapter));
    }
}

// -----------------------------------------------------------------------
// Command
// -----------------------------------------------------------------------

/// What the guest observed during a demo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemoReport {
    pub tree: Option<TestSuiteInfo>,
    pub run_events: Vec<TestRunEvent>,
}

/// Read a test tree (a root suite in protocol JSON) from `path`.
pub fn load_tree(path: &Path) -> Result<TestSuiteInfo> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read test tree at {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("invalid test tree in {}", path.display()))
}

/// Share `tree` from a host session, join as a guest and optionally run
/// the node `run_id` from the guest.
pub async fn run_demo(
    share: &ShareConfig,
    tree: TestSuiteInfo,
    local_root: &str,
    run_id: Option<&str>,
) -> Result<DemoReport> {
    let broker = MemoryCollaboration::new(Arc::new(PrefixPathConverter::new(local_root, SHARED_ROOT)));
    let host_hub = Arc::new(InMemoryHub::new());
    let guest_hub = Arc::new(InMemoryHub::new());
    let explorer = Arc::new(DemoExplorer::default());
    guest_hub.register_controller(explorer.clone());

    let adapter = Arc::new(StaticAdapter::new(tree));
    host_hub.register_adapter(adapter.clone());

    let mut host = SessionManager::new(share.clone(), host_hub, broker.host());
    let mut guest = SessionManager::new(share.clone(), guest_hub, broker.guest());

    host.on_session_changed(SessionInfo::new(DEMO_SESSION, Role::Host)).await;
    adapter.load().await?;
    guest.on_session_changed(SessionInfo::new(DEMO_SESSION, Role::Guest)).await;

    let result = drive_guest(&explorer, run_id).await;

    guest.shutdown().await;
    host.shutdown().await;
    if let Some(message) = broker.messages().first() {
        bail!("{message}");
    }
    result
}

async fn drive_guest(explorer: &DemoExplorer, run_id: Option<&str>) -> Result<DemoReport> {
    let tree = explorer.tree();
    if let Some(id) = run_id {
        let proxy = explorer.first_adapter().context("guest has no adapters")?;
        let node = tree
            .as_ref()
            .and_then(|t| t.find(id))
            .with_context(|| format!("no test or suite with id {id} in the guest's tree"))?;
        info!(test_id = id, "running from the guest");
        proxy.run(&node).await?;
    }
    Ok(DemoReport {
        tree,
        run_events: explorer.run_events(),
    })
}

// -----------------------------------------------------------------------
// Rendering
// -----------------------------------------------------------------------

/// One line per node, children indented by two spaces.
pub fn render_tree(tree: &TestSuiteInfo) -> Vec<String> {
    let mut lines = Vec::new();
    render_node(&TestNode::Suite(tree.clone()), 0, &mut lines);
    lines
}

fn render_node(node: &TestNode, depth: usize, lines: &mut Vec<String>) {
    let kind = match node {
        TestNode::Suite(_) => "suite",
        TestNode::Test(_) => "test",
    };
    let mut line = format!("{}{kind} {}: {}", "  ".repeat(depth), node.id(), node.label());
    if let Some(file) = node.file() {
        line.push_str(&format!("  [{file}"));
        if let Some(l) = node_line(node) {
            line.push_str(&format!(":{l}"));
        }
        line.push(']');
    }
    lines.push(line);
    for child in node.children() {
        render_node(child, depth + 1, lines);
    }
}

fn node_line(node: &TestNode) -> Option<u32> {
    match node {
        TestNode::Suite(suite) => suite.line,
        TestNode::Test(test) => test.line,
    }
}

pub fn describe_run_event(event: &TestRunEvent) -> String {
    match event {
        TestRunEvent::Started { tests, .. } => format!("started {}", tests.join(", ")),
        TestRunEvent::Suite(e) => {
            let id = match &e.suite {
                NodeRef::Id(id) => id.as_str(),
                NodeRef::Info(suite) => suite.id.as_str(),
            };
            format!("suite {id} {:?}", e.state)
        }
        TestRunEvent::Test(e) => {
            let id = match &e.test {
                NodeRef::Id(id) => id.as_str(),
                NodeRef::Info(test) => test.id.as_str(),
            };
            format!("test {id} {:?}", e.state)
        }
        TestRunEvent::Finished { .. } => "finished".to_string(),
    }
}
