//! Location translation between the host's local addressing scheme and the
//! channel's shared addressing scheme.
//!
//! Translation copies every field of a test tree and rewrites only the
//! `file` references. A reference that cannot be converted is logged and
//! dropped, so one unmappable file never costs the rest of the tree.

use std::sync::Arc;

use tracing::error;

use crate::model::{NodeRef, TestEvent, TestInfo, TestLoadEvent, TestNode, TestRunEvent, TestSuiteEvent, TestSuiteInfo};

/// A location reference could not be mapped into the target scheme.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConversionError {
    #[error("{0:?} is outside every shared folder")]
    NotShared(String),

    #[error("{0:?} is not a shared-scheme reference")]
    NotSharedScheme(String),
}

/// The collaborative session's conversion primitives.
pub trait PathConverter: Send + Sync {
    fn to_shared(&self, local: &str) -> Result<String, ConversionError>;
    fn to_local(&self, shared: &str) -> Result<String, ConversionError>;
}

/// Which way a translation goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Host-local to channel-shared (outbound from the host).
    ToShared,
    /// Channel-shared to host-local (inbound to the host).
    ToLocal,
}

// ---------------------------------------------------------------------------
// PrefixPathConverter
// ---------------------------------------------------------------------------

/// Maps one local root directory onto a shared URI prefix.
///
/// With `local_root = "/home/ada/proj"` and `shared_root = "vsls:"`,
/// `/home/ada/proj/src/lib.rs` becomes `vsls:/src/lib.rs`.
#[derive(Debug, Clone)]
pub struct PrefixPathConverter {
    local_root: String,
    shared_root: String,
}

impl PrefixPathConverter {
    pub fn new(local_root: impl Into<String>, shared_root: impl Into<String>) -> Self {
        let local_root = local_root.into().trim_end_matches('/').to_string();
        let shared_root = shared_root.into().trim_end_matches('/').to_string();
        Self {
            local_root,
            shared_root,
        }
    }
}

/// Strip `root` from `path` only on a path-segment boundary.
fn strip_root<'a>(path: &'a str, root: &str) -> Option<&'a str> {
    let rest = path.strip_prefix(root)?;
    if rest.is_empty() || rest.starts_with('/') {
        Some(rest)
    } else {
        None
    }
}

impl PathConverter for PrefixPathConverter {
    fn to_shared(&self, local: &str) -> Result<String, ConversionError> {
        let rest = strip_root(local, &self.local_root)
            .ok_or_else(|| ConversionError::NotShared(local.to_string()))?;
        Ok(format!("{}{}", self.shared_root, rest))
    }

    fn to_local(&self, shared: &str) -> Result<String, ConversionError> {
        let rest = strip_root(shared, &self.shared_root)
            .ok_or_else(|| ConversionError::NotSharedScheme(shared.to_string()))?;
        Ok(format!("{}{}", self.local_root, rest))
    }
}

// ---------------------------------------------------------------------------
// LocationTranslator
// ---------------------------------------------------------------------------

/// Rewrites location references across test trees and events.
#[derive(Clone)]
pub struct LocationTranslator {
    converter: Arc<dyn PathConverter>,
}

impl LocationTranslator {
    pub fn new(converter: Arc<dyn PathConverter>) -> Self {
        Self { converter }
    }

    fn convert(&self, file: Option<&String>, direction: Direction) -> Option<String> {
        let file = file?;
        let result = match direction {
            Direction::ToShared => self.converter.to_shared(file),
            Direction::ToLocal => self.converter.to_local(file),
        };
        match result {
            Ok(converted) => Some(converted),
            Err(e) => {
                error!(file = %file, ?direction, error = %e, "dropping unconvertible location");
                None
            }
        }
    }

    pub fn test(&self, test: &TestInfo, direction: Direction) -> TestInfo {
        TestInfo {
            file: self.convert(test.file.as_ref(), direction),
            ..test.clone()
        }
    }

    pub fn suite(&self, suite: &TestSuiteInfo, direction: Direction) -> TestSuiteInfo {
        TestSuiteInfo {
            id: suite.id.clone(),
            label: suite.label.clone(),
            description: suite.description.clone(),
            tooltip: suite.tooltip.clone(),
            file: self.convert(suite.file.as_ref(), direction),
            line: suite.line,
            children: suite
                .children
                .iter()
                .map(|child| self.node(child, direction))
                .collect(),
        }
    }

    pub fn node(&self, node: &TestNode, direction: Direction) -> TestNode {
        match node {
            TestNode::Suite(suite) => TestNode::Suite(self.suite(suite, direction)),
            TestNode::Test(test) => TestNode::Test(self.test(test, direction)),
        }
    }

    pub fn load_event(&self, event: &TestLoadEvent, direction: Direction) -> TestLoadEvent {
        match event {
            TestLoadEvent::Started => TestLoadEvent::Started,
            TestLoadEvent::Finished {
                suite,
                error_message,
            } => TestLoadEvent::Finished {
                suite: suite.as_ref().map(|s| self.suite(s, direction)),
                error_message: error_message.clone(),
            },
        }
    }

    /// Translate a run-state event.
    ///
    /// `Started` is returned unchanged: its `tests` list only restates ids
    /// the caller supplied.
    pub fn run_event(&self, event: &TestRunEvent, direction: Direction) -> TestRunEvent {
        match event {
            TestRunEvent::Started { .. } | TestRunEvent::Finished { .. } => event.clone(),
            TestRunEvent::Suite(suite_event) => TestRunEvent::Suite(TestSuiteEvent {
                suite: match &suite_event.suite {
                    NodeRef::Id(id) => NodeRef::Id(id.clone()),
                    NodeRef::Info(info) => NodeRef::Info(self.suite(info, direction)),
                },
                ..suite_event.clone()
            }),
            TestRunEvent::Test(test_event) => TestRunEvent::Test(TestEvent {
                test: match &test_event.test {
                    NodeRef::Id(id) => NodeRef::Id(id.clone()),
                    NodeRef::Info(info) => NodeRef::Info(self.test(info, direction)),
                },
                ..test_event.clone()
            }),
        }
    }
}

impl std::fmt::Debug for LocationTranslator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocationTranslator").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TestState;

    fn translator() -> LocationTranslator {
        LocationTranslator::new(Arc::new(PrefixPathConverter::new("/home/ada/proj", "vsls:")))
    }

    fn local_tree() -> TestSuiteInfo {
        TestSuiteInfo::new("s1", "root")
            .with_file("/home/ada/proj/tests", None)
            .with_child(TestInfo::new("t1", "inside").with_file("/home/ada/proj/tests/a.rs", Some(4)))
            .with_child(TestInfo::new("t2", "outside").with_file("/etc/passwd", Some(1)))
            .with_child(TestInfo::new("t3", "no file"))
    }

    #[test]
    fn prefix_converter_maps_both_ways() {
        let conv = PrefixPathConverter::new("/home/ada/proj/", "vsls:/");
        assert_eq!(conv.to_shared("/home/ada/proj/src/x.rs").unwrap(), "vsls:/src/x.rs");
        assert_eq!(conv.to_local("vsls:/src/x.rs").unwrap(), "/home/ada/proj/src/x.rs");
    }

    #[test]
    fn prefix_converter_respects_segment_boundaries() {
        let conv = PrefixPathConverter::new("/home/ada/proj", "vsls:");
        assert!(matches!(
            conv.to_shared("/home/ada/project/x.rs"),
            Err(ConversionError::NotShared(_))
        ));
        assert!(matches!(conv.to_local("file:///x.rs"), Err(ConversionError::NotSharedScheme(_))));
    }

    #[test]
    fn failed_conversion_drops_only_that_reference() {
        let shared = translator().suite(&local_tree(), Direction::ToShared);

        assert_eq!(shared.file.as_deref(), Some("vsls:/tests"));
        assert_eq!(shared.children.len(), 3);
        assert_eq!(shared.children[0].file(), Some("vsls:/tests/a.rs"));
        assert_eq!(shared.children[1].file(), None);
        assert_eq!(shared.children[1].label(), "outside");
        assert_eq!(shared.children[2].file(), None);
    }

    #[test]
    fn round_trip_restores_representable_locations() {
        let t = translator();
        let tree = TestSuiteInfo::new("s1", "root")
            .with_child(TestInfo::new("t1", "a").with_file("/home/ada/proj/a.rs", Some(9)))
            .with_child(TestSuiteInfo::new("s2", "inner").with_child(TestInfo::new("t2", "b")));

        let back = t.suite(&t.suite(&tree, Direction::ToShared), Direction::ToLocal);
        assert_eq!(back, tree);
    }

    #[test]
    fn children_keep_their_order() {
        let shared = translator().suite(&local_tree(), Direction::ToShared);
        let ids: Vec<_> = shared.children.iter().map(|c| c.id().to_string()).collect();
        assert_eq!(ids, vec!["t1", "t2", "t3"]);
    }

    #[test]
    fn run_started_is_forwarded_verbatim() {
        let event = TestRunEvent::Started {
            tests: vec!["/home/ada/proj/not-a-path-really".into()],
            test_run_id: None,
        };
        assert_eq!(translator().run_event(&event, Direction::ToShared), event);
    }

    #[test]
    fn run_test_event_with_info_is_translated() {
        let event = TestRunEvent::Test(TestEvent {
            test: NodeRef::Info(TestInfo::new("t1", "a").with_file("/home/ada/proj/a.rs", None)),
            ..TestEvent::new("t1", TestState::Passed)
        });
        match translator().run_event(&event, Direction::ToShared) {
            TestRunEvent::Test(TestEvent {
                test: NodeRef::Info(info),
                state,
                ..
            }) => {
                assert_eq!(info.file.as_deref(), Some("vsls:/a.rs"));
                assert_eq!(state, TestState::Passed);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn load_finished_without_suite_stays_empty() {
        let event = TestLoadEvent::Finished {
            suite: None,
            error_message: Some("adapter crashed".into()),
        };
        assert_eq!(translator().load_event(&event, Direction::ToShared), event);
    }
}
