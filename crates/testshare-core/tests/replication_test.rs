//! End-to-end host/guest replication over an in-memory session.

use std::sync::Arc;

use serde_json::{json, Value};

use testshare_core::adapter::{InMemoryHub, TestAdapter, TestHub};
use testshare_core::guest::GuestCoordinator;
use testshare_core::host::HostCoordinator;
use testshare_core::model::{
    AdapterId, NodeRef, TestEvent, TestInfo, TestLoadEvent, TestNode, TestRunEvent, TestState,
    TestSuiteInfo,
};
use testshare_core::session::{
    CollaborationService, MemoryCollaboration, Role, SessionInfo, SessionManager,
};
use testshare_core::transport::SharedChannel;
use testshare_core::ShareConfig;
use testshare_test_utils::{
    converter, sample_tree, wait_until, AdapterCall, FakeAdapter, RecordingController, LOCAL_ROOT,
};

// ---------------------------------------------------------------------------
// Fixture
// ---------------------------------------------------------------------------

const SERVICE: &str = ShareConfig::DEFAULT_SERVICE_NAME;

/// A host session already running, plus a guest session ready to join.
struct Session {
    broker: Arc<MemoryCollaboration>,
    host_hub: Arc<InMemoryHub>,
    /// Stands in for the guest's test explorer UI.
    ui: Arc<RecordingController>,
    host: SessionManager,
    guest: SessionManager,
}

impl Session {
    async fn start() -> Self {
        let broker = MemoryCollaboration::new(converter());
        let host_hub = Arc::new(InMemoryHub::new());
        let guest_hub = Arc::new(InMemoryHub::new());
        let ui = RecordingController::new();
        guest_hub.register_controller(ui.clone());

        let mut host = SessionManager::new(ShareConfig::default(), host_hub.clone(), broker.host());
        host.on_session_changed(SessionInfo::new("session-1", Role::Host)).await;
        let guest = SessionManager::new(ShareConfig::default(), guest_hub, broker.guest());

        Self {
            broker,
            host_hub,
            ui,
            host,
            guest,
        }
    }

    async fn join_guest(&mut self) {
        self.guest
            .on_session_changed(SessionInfo::new("session-1", Role::Guest))
            .await;
    }

    fn host(&self) -> &HostCoordinator {
        self.host.host().expect("host coordinator running")
    }

    fn guest(&self) -> &GuestCoordinator {
        self.guest.guest().expect("guest coordinator running")
    }

    /// A raw guest-side channel, for speaking the protocol directly.
    async fn raw_guest_channel(&self) -> Arc<dyn SharedChannel> {
        self.broker
            .guest()
            .get_shared_service(SERVICE)
            .await
            .expect("service shared")
    }
}

/// `sample_tree()` as the guest sees it.
fn shared_sample_tree() -> TestSuiteInfo {
    TestSuiteInfo::new("s1", "Sample suite")
        .with_file("vsls:/tests", None)
        .with_child(TestInfo::new("t1", "first test").with_file("vsls:/tests/a.rs", Some(1)))
}

fn discovered(tree: TestSuiteInfo) -> Vec<TestLoadEvent> {
    vec![TestLoadEvent::Started, TestLoadEvent::finished(Some(tree))]
}

/// The guest-side `t1` node, taken from what the guest UI received.
fn guest_selection(ui: &RecordingController) -> TestNode {
    let suite = ui
        .tests(0)
        .into_iter()
        .rev()
        .find_map(|event| match event {
            TestLoadEvent::Finished { suite, .. } => suite,
            TestLoadEvent::Started => None,
        })
        .expect("guest received a tree");
    suite.find("t1").expect("t1 present")
}

// ---------------------------------------------------------------------------
// Late join
// ---------------------------------------------------------------------------

#[tokio::test]
async fn late_guest_after_unregister_sees_empty_snapshot() {
    let mut s = Session::start().await;
    let adapter = FakeAdapter::new();

    s.host_hub.register_adapter(adapter.handle());
    adapter.discover(Some(sample_tree()));
    s.host_hub.unregister_adapter(&adapter.handle());

    s.join_guest().await;

    assert!(s.guest().is_active());
    assert!(s.guest().adapter_ids().is_empty());
    assert_eq!(s.ui.seen(), 0);

    let channel = s.raw_guest_channel().await;
    assert_eq!(channel.request("adapters", vec![]).await.unwrap(), json!([]));
}

#[tokio::test]
async fn late_guest_replays_cached_tree() {
    let mut s = Session::start().await;
    let adapter = FakeAdapter::new();
    s.host_hub.register_adapter(adapter.handle());
    adapter.discover(Some(sample_tree()));

    s.join_guest().await;

    assert_eq!(s.guest().adapter_ids(), vec![AdapterId(0)]);
    assert_eq!(s.ui.seen(), 1);
    assert_eq!(s.ui.tests(0), discovered(shared_sample_tree()));

    let snapshot = s.raw_guest_channel().await.request("adapters", vec![]).await.unwrap();
    assert_eq!(snapshot[0]["adapterId"], json!(0));
    assert_eq!(snapshot[0]["tests"]["id"], json!("s1"));
    assert_eq!(snapshot[0]["tests"]["children"][0]["file"], json!("vsls:/tests/a.rs"));
}

#[tokio::test]
async fn late_guest_without_discovery_gets_bare_proxy() {
    let mut s = Session::start().await;
    let adapter = FakeAdapter::new();
    s.host_hub.register_adapter(adapter.handle());

    s.join_guest().await;

    assert_eq!(s.ui.seen(), 1);
    assert!(s.ui.tests(0).is_empty());
}

// ---------------------------------------------------------------------------
// Live replication
// ---------------------------------------------------------------------------

#[tokio::test]
async fn live_registration_reaches_connected_guest() {
    let mut s = Session::start().await;
    s.join_guest().await;
    assert_eq!(s.ui.seen(), 0);

    let adapter = FakeAdapter::new();
    s.host_hub.register_adapter(adapter.handle());
    assert_eq!(s.ui.live(), 1);

    adapter.discover(Some(sample_tree()));
    assert_eq!(s.ui.tests(0), discovered(shared_sample_tree()));

    s.host_hub.unregister_adapter(&adapter.handle());
    assert!(s.ui.is_unregistered(0));
    assert!(s.guest().adapter_ids().is_empty());
}

#[tokio::test]
async fn adapter_ids_are_not_reused_across_registrations() {
    let mut s = Session::start().await;
    s.join_guest().await;

    let first = FakeAdapter::new();
    let second = FakeAdapter::new();
    s.host_hub.register_adapter(first.handle());
    s.host_hub.unregister_adapter(&first.handle());
    s.host_hub.register_adapter(second.handle());

    assert_eq!(s.guest().adapter_ids(), vec![AdapterId(1)]);
    assert_eq!(s.host().registry().unwrap().ids(), vec![AdapterId(1)]);
}

#[tokio::test]
async fn run_events_with_node_info_are_translated_for_guest() {
    let mut s = Session::start().await;
    let adapter = FakeAdapter::new();
    s.host_hub.register_adapter(adapter.handle());
    s.join_guest().await;

    let info = TestInfo::new("t9", "dynamic").with_file(format!("{LOCAL_ROOT}/tests/b.rs"), Some(7));
    adapter.emit_run_event(TestRunEvent::Test(TestEvent {
        test: NodeRef::Info(info),
        ..TestEvent::new("t9", TestState::Failed)
    }));

    match &s.ui.states(0)[0] {
        TestRunEvent::Test(TestEvent {
            test: NodeRef::Info(info),
            state,
            ..
        }) => {
            assert_eq!(info.file.as_deref(), Some("vsls:/tests/b.rs"));
            assert_eq!(*state, TestState::Failed);
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Requests from the guest
// ---------------------------------------------------------------------------

#[tokio::test]
async fn guest_run_round_trips_through_host() {
    let mut s = Session::start().await;
    let adapter = FakeAdapter::new();
    s.host_hub.register_adapter(adapter.handle());
    adapter.discover(Some(sample_tree()));
    s.join_guest().await;

    let selection = guest_selection(&s.ui);
    assert_eq!(selection.file(), Some("vsls:/tests/a.rs"));
    s.ui.adapter(0).run(&selection).await.unwrap();

    // The host adapter saw the selection in its own scheme.
    let expected = TestNode::Test(
        TestInfo::new("t1", "first test").with_file(format!("{LOCAL_ROOT}/tests/a.rs"), Some(1)),
    );
    assert_eq!(adapter.calls(), vec![AdapterCall::Run(expected)]);

    // The guest saw the run progress, with the started list unchanged.
    assert_eq!(
        s.ui.states(0),
        vec![
            TestRunEvent::Started {
                tests: vec!["t1".into()],
                test_run_id: None,
            },
            TestRunEvent::Test(TestEvent::new("t1", TestState::Passed)),
            TestRunEvent::Finished { test_run_id: None },
        ]
    );
}

#[tokio::test]
async fn guest_debug_and_load_reach_host_adapter() {
    let mut s = Session::start().await;
    let adapter = FakeAdapter::with_tree(sample_tree());
    s.host_hub.register_adapter(adapter.handle());
    s.join_guest().await;
    let proxy = s.ui.adapter(0);

    proxy.load().await.unwrap();
    assert_eq!(s.ui.tests(0), discovered(shared_sample_tree()));

    let selection = guest_selection(&s.ui);
    proxy.debug(&selection).await.unwrap();

    let calls = adapter.calls();
    assert_eq!(calls[0], AdapterCall::Load);
    assert!(matches!(calls[1], AdapterCall::Debug(ref node) if node.id() == "t1"));
}

#[tokio::test]
async fn guest_cancel_reaches_host_adapter() {
    let mut s = Session::start().await;
    let adapter = FakeAdapter::new();
    s.host_hub.register_adapter(adapter.handle());
    s.join_guest().await;

    s.ui.adapter(0).cancel();

    wait_until(|| adapter.calls().contains(&AdapterCall::Cancel)).await;
}

#[tokio::test]
async fn unknown_adapter_requests_are_ignored() {
    let mut s = Session::start().await;
    let adapter = FakeAdapter::new();
    s.host_hub.register_adapter(adapter.handle());
    s.join_guest().await;

    let channel = s.raw_guest_channel().await;
    let selection = serde_json::to_value(TestNode::Test(TestInfo::new("t1", "x"))).unwrap();
    for method in ["run", "debug"] {
        let response = channel
            .request(method, vec![json!(99), selection.clone()])
            .await
            .unwrap();
        assert_eq!(response, Value::Null);
    }

    assert!(adapter.calls().is_empty());
    assert!(s.ui.states(0).is_empty());
}

#[tokio::test]
async fn malformed_requests_return_null() {
    let mut s = Session::start().await;
    let adapter = FakeAdapter::new();
    s.host_hub.register_adapter(adapter.handle());
    s.join_guest().await;
    let channel = s.raw_guest_channel().await;

    assert_eq!(channel.request("load", vec![json!("zero")]).await.unwrap(), Value::Null);
    assert_eq!(channel.request("run", vec![json!(0)]).await.unwrap(), Value::Null);
    assert_eq!(channel.request("load", vec![]).await.unwrap(), Value::Null);
    assert!(adapter.calls().is_empty());
}

// ---------------------------------------------------------------------------
// Notifications the guest cannot place
// ---------------------------------------------------------------------------

#[tokio::test]
async fn guest_ignores_events_for_unknown_adapters() {
    let mut s = Session::start().await;
    let adapter = FakeAdapter::new();
    s.host_hub.register_adapter(adapter.handle());
    s.join_guest().await;

    let host_end = s.broker.channel(SERVICE).expect("shared");
    host_end.notify(
        "testState",
        json!({"adapterId": 42, "event": {"type": "finished"}}),
    );
    host_end.notify("tests", json!({"adapterId": 42, "event": {"type": "started"}}));
    host_end.notify("unregisterAdapter", json!({"adapterId": 42}));
    host_end.notify("registerAdapter", json!({"adapterId": "not-a-number"}));

    assert_eq!(s.ui.seen(), 1);
    assert!(s.ui.states(0).is_empty());
    assert_eq!(s.guest().adapter_ids(), vec![AdapterId(0)]);
}

#[tokio::test]
async fn duplicate_register_notification_keeps_existing_proxy() {
    let mut s = Session::start().await;
    let adapter = FakeAdapter::new();
    s.host_hub.register_adapter(adapter.handle());
    s.join_guest().await;
    let before = s.guest().proxy(AdapterId(0)).unwrap();

    s.broker
        .channel(SERVICE)
        .unwrap()
        .notify("registerAdapter", json!({"adapterId": 0}));

    let after = s.guest().proxy(AdapterId(0)).unwrap();
    assert!(Arc::ptr_eq(&before, &after));
    assert_eq!(s.ui.seen(), 1);
}

// ---------------------------------------------------------------------------
// Availability
// ---------------------------------------------------------------------------

#[tokio::test]
async fn availability_flap_keeps_host_state_and_replays_guest() {
    let mut s = Session::start().await;
    let adapter = FakeAdapter::new();
    s.host_hub.register_adapter(adapter.handle());
    adapter.discover(Some(sample_tree()));
    s.join_guest().await;
    assert_eq!(s.ui.live(), 1);

    let channel = s.broker.channel(SERVICE).unwrap();
    channel.set_available(false);
    wait_until(|| !s.host().is_active() && !s.guest().is_active()).await;

    assert_eq!(s.ui.live(), 0);
    assert!(s.guest().adapter_ids().is_empty());
    let registry = s.host().registry().unwrap();
    assert_eq!(registry.ids(), vec![AdapterId(0)]);
    assert_eq!(registry.cached_tree(AdapterId(0)), Some(shared_sample_tree()));

    channel.set_available(true);
    wait_until(|| s.host().is_active() && s.guest().adapter_ids() == vec![AdapterId(0)]).await;

    assert_eq!(s.ui.seen(), 2);
    assert_eq!(s.ui.tests(1), discovered(shared_sample_tree()));
    assert_eq!(s.host().registry().unwrap().len(), 1);
}

#[tokio::test]
async fn adapter_removed_while_unavailable_is_pruned_on_return() {
    let mut s = Session::start().await;
    let removed = FakeAdapter::new();
    let kept = FakeAdapter::new();
    s.host_hub.register_adapter(removed.handle());
    s.host_hub.register_adapter(kept.handle());
    s.join_guest().await;
    assert_eq!(s.guest().adapter_ids(), vec![AdapterId(0), AdapterId(1)]);

    let channel = s.broker.channel(SERVICE).unwrap();
    channel.set_available(false);
    wait_until(|| !s.host().is_active() && !s.guest().is_active()).await;
    s.host_hub.unregister_adapter(&removed.handle());

    channel.set_available(true);
    wait_until(|| s.host().is_active() && s.guest().adapter_ids() == vec![AdapterId(1)]).await;

    assert_eq!(s.host().registry().unwrap().ids(), vec![AdapterId(1)]);
    assert_eq!(removed.listener_count(), 0);
    assert_eq!(kept.listener_count(), 2);

    let raw = s.raw_guest_channel().await;
    assert_eq!(raw.request("adapters", vec![]).await.unwrap(), json!([{"adapterId": 1}]));
    let selection = serde_json::to_value(TestNode::Test(TestInfo::new("t1", "x"))).unwrap();
    assert_eq!(raw.request("run", vec![json!(0), selection]).await.unwrap(), Value::Null);
    assert!(removed.calls().is_empty());
}
