//! Test tree and event types exchanged between adapters, coordinators and
//! the shared channel.
//!
//! The wire shape follows the test-adapter conventions: nodes carry a
//! `"type"` discriminator (`"suite"` or `"test"`), fields are camelCase,
//! and absent optionals are omitted rather than serialized as `null`.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Host-assigned identifier for a registered adapter.
///
/// Allocated from a monotonically increasing counter owned by one host
/// coordinator; never reused, even after the adapter unregisters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AdapterId(pub u64);

impl fmt::Display for AdapterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Test tree
// ---------------------------------------------------------------------------

/// A single runnable test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestInfo {
    pub id: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tooltip: Option<String>,
    /// Location reference. Local scheme on the host, shared scheme on the
    /// wire and on the guest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skipped: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debuggable: Option<bool>,
}

/// A suite: a labelled, ordered group of tests and nested suites.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestSuiteInfo {
    pub id: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tooltip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default)]
    pub children: Vec<TestNode>,
}

/// A node in a discovered test tree.
///
/// Only suites have children; a [`TestInfo`] has no children field at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TestNode {
    Suite(TestSuiteInfo),
    Test(TestInfo),
}

impl TestInfo {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            description: None,
            tooltip: None,
            file: None,
            line: None,
            skipped: None,
            debuggable: None,
        }
    }

    /// Builder-style setter for the location reference.
    pub fn with_file(mut self, file: impl Into<String>, line: Option<u32>) -> Self {
        self.file = Some(file.into());
        self.line = line;
        self
    }
}

impl TestSuiteInfo {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            description: None,
            tooltip: None,
            file: None,
            line: None,
            children: Vec::new(),
        }
    }

    pub fn with_file(mut self, file: impl Into<String>, line: Option<u32>) -> Self {
        self.file = Some(file.into());
        self.line = line;
        self
    }

    pub fn with_child(mut self, child: impl Into<TestNode>) -> Self {
        self.children.push(child.into());
        self
    }

    /// Depth-first search for a node with the given id, including `self`.
    pub fn find(&self, id: &str) -> Option<TestNode> {
        if self.id == id {
            return Some(TestNode::Suite(self.clone()));
        }
        self.children.iter().find_map(|child| child.find(id))
    }
}

impl TestNode {
    pub fn id(&self) -> &str {
        match self {
            TestNode::Suite(suite) => &suite.id,
            TestNode::Test(test) => &test.id,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            TestNode::Suite(suite) => &suite.label,
            TestNode::Test(test) => &test.label,
        }
    }

    pub fn file(&self) -> Option<&str> {
        match self {
            TestNode::Suite(suite) => suite.file.as_deref(),
            TestNode::Test(test) => test.file.as_deref(),
        }
    }

    pub fn children(&self) -> &[TestNode] {
        match self {
            TestNode::Suite(suite) => &suite.children,
            TestNode::Test(_) => &[],
        }
    }

    pub fn find(&self, id: &str) -> Option<TestNode> {
        match self {
            TestNode::Suite(suite) => suite.find(id),
            TestNode::Test(test) if test.id == id => Some(self.clone()),
            TestNode::Test(_) => None,
        }
    }

    /// All node ids in depth-first, pre-order sequence.
    pub fn ids(&self) -> Vec<String> {
        let mut out = Vec::new();
        collect_ids(self, &mut out);
        out
    }
}

fn collect_ids(node: &TestNode, out: &mut Vec<String>) {
    out.push(node.id().to_string());
    for child in node.children() {
        collect_ids(child, out);
    }
}

impl From<TestInfo> for TestNode {
    fn from(test: TestInfo) -> Self {
        TestNode::Test(test)
    }
}

impl From<TestSuiteInfo> for TestNode {
    fn from(suite: TestSuiteInfo) -> Self {
        TestNode::Suite(suite)
    }
}

// ---------------------------------------------------------------------------
// Discovery events
// ---------------------------------------------------------------------------

/// Signals the start or completion of test enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TestLoadEvent {
    Started,
    #[serde(rename_all = "camelCase")]
    Finished {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        suite: Option<TestSuiteInfo>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_message: Option<String>,
    },
}

impl TestLoadEvent {
    pub fn finished(suite: Option<TestSuiteInfo>) -> Self {
        TestLoadEvent::Finished {
            suite,
            error_message: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Run-state events
// ---------------------------------------------------------------------------

/// Either a bare node id or the full node description.
///
/// Adapters may report progress for nodes that were not part of the last
/// discovery result; those arrive with the full info attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NodeRef<T> {
    Id(String),
    Info(T),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuiteState {
    Running,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestState {
    Running,
    Passed,
    Failed,
    Skipped,
    Errored,
}

/// Inline annotation attached to a test result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestDecoration {
    pub line: u32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hover: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestSuiteEvent {
    pub suite: NodeRef<TestSuiteInfo>,
    pub state: SuiteState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tooltip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_run_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestEvent {
    pub test: NodeRef<TestInfo>,
    pub state: TestState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tooltip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decorations: Option<Vec<TestDecoration>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_run_id: Option<String>,
}

impl TestEvent {
    pub fn new(test_id: impl Into<String>, state: TestState) -> Self {
        Self {
            test: NodeRef::Id(test_id.into()),
            state,
            message: None,
            description: None,
            tooltip: None,
            decorations: None,
            test_run_id: None,
        }
    }
}

/// Progress of a test execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TestRunEvent {
    /// A run began. `tests` restates the ids the caller asked to run.
    #[serde(rename_all = "camelCase")]
    Started {
        tests: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        test_run_id: Option<String>,
    },
    Suite(TestSuiteEvent),
    Test(TestEvent),
    #[serde(rename_all = "camelCase")]
    Finished {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        test_run_id: Option<String>,
    },
}
