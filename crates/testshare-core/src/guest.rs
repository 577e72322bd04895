//! Guest coordinator: mirrors the host's adapters as local proxies.
//!
//! On activation the guest asks the host for a snapshot (`adapters`) and
//! builds one [`AdapterProxy`] per entry, replaying any cached discovery
//! result as a synthetic started/finished pair. After that, live
//! notifications keep the proxy table and their event streams current.
//! Deactivation drops everything; the next activation replays from scratch.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::adapter::{TestAdapter, TestHub};
use crate::config::ShareConfig;
use crate::events::lock;
use crate::model::{AdapterId, TestLoadEvent};
use crate::protocol::{
    decode_notification, decode_snapshot, AdapterIdArgs, Method, TestStateNotification, TestsNotification,
};
use crate::proxy::AdapterProxy;
use crate::session::CollaborationService;
use crate::transport::{notify_handler, SharedChannel};

struct GuestShared {
    channel: Arc<dyn SharedChannel>,
    hub: Arc<dyn TestHub>,
    proxies: Mutex<BTreeMap<AdapterId, Arc<AdapterProxy>>>,
    active: AtomicBool,
}

impl GuestShared {
    async fn set_available(&self, available: bool) {
        if available {
            self.activate().await;
        } else {
            self.deactivate();
        }
    }

    async fn activate(&self) {
        if self.active.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(service = %self.channel.name(), "shared service available; requesting adapter snapshot");

        let response = match self.channel.request(Method::Adapters.as_str(), Vec::new()).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "adapter snapshot request failed");
                self.active.store(false, Ordering::SeqCst);
                return;
            }
        };
        let snapshots = match decode_snapshot(response) {
            Ok(snapshots) => snapshots,
            Err(e) => {
                error!(error = %e, "malformed adapter snapshot");
                return;
            }
        };

        info!(count = snapshots.len(), "replaying adapter snapshot");
        for snapshot in snapshots {
            let proxy = self.add_proxy(snapshot.adapter_id);
            if let Some(tree) = snapshot.tests {
                proxy.tests().fire(&TestLoadEvent::Started);
                proxy.tests().fire(&TestLoadEvent::finished(Some(tree)));
            }
        }
    }

    /// Drop every proxy, including ones live notifications added after a
    /// failed snapshot request.
    fn deactivate(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            info!(service = %self.channel.name(), "shared service unavailable; dropping adapter proxies");
        }
        self.clear_proxies();
    }

    fn clear_proxies(&self) {
        let proxies = std::mem::take(&mut *lock(&self.proxies));
        for (_, proxy) in proxies {
            self.hub.unregister_adapter(&(proxy.clone() as Arc<dyn TestAdapter>));
            proxy.dispose();
        }
    }

    /// Create and register a proxy for `id`, or return the existing one.
    fn add_proxy(&self, id: AdapterId) -> Arc<AdapterProxy> {
        let proxy = {
            let mut proxies = lock(&self.proxies);
            if let Some(existing) = proxies.get(&id) {
                warn!(adapter_id = id.0, "adapter already known; keeping existing proxy");
                return Arc::clone(existing);
            }
            let proxy = Arc::new(AdapterProxy::new(id, Arc::clone(&self.channel)));
            proxies.insert(id, Arc::clone(&proxy));
            proxy
        };
        self.hub.register_adapter(proxy.clone() as Arc<dyn TestAdapter>);
        proxy
    }

    fn remove_proxy(&self, id: AdapterId) {
        let Some(proxy) = lock(&self.proxies).remove(&id) else {
            warn!(adapter_id = id.0, "unregisterAdapter for unknown adapter");
            return;
        };
        self.hub.unregister_adapter(&(proxy.clone() as Arc<dyn TestAdapter>));
        proxy.dispose();
    }

    fn proxy(&self, id: AdapterId) -> Option<Arc<AdapterProxy>> {
        lock(&self.proxies).get(&id).cloned()
    }

    fn on_register(&self, payload: Value) {
        match decode_notification::<AdapterIdArgs>(Method::RegisterAdapter, payload) {
            Ok(args) => {
                debug!(adapter_id = args.adapter_id.0, "received registerAdapter");
                self.add_proxy(args.adapter_id);
            }
            Err(e) => warn!(error = %e, "dropping notification"),
        }
    }

    fn on_unregister(&self, payload: Value) {
        match decode_notification::<AdapterIdArgs>(Method::UnregisterAdapter, payload) {
            Ok(args) => {
                debug!(adapter_id = args.adapter_id.0, "received unregisterAdapter");
                self.remove_proxy(args.adapter_id);
            }
            Err(e) => warn!(error = %e, "dropping notification"),
        }
    }

    fn on_tests(&self, payload: Value) {
        let notification = match decode_notification::<TestsNotification>(Method::Tests, payload) {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "dropping notification");
                return;
            }
        };
        match self.proxy(notification.adapter_id) {
            Some(proxy) => proxy.tests().fire(&notification.event),
            None => warn!(adapter_id = notification.adapter_id.0, "tests event for unknown adapter"),
        }
    }

    fn on_test_state(&self, payload: Value) {
        let notification = match decode_notification::<TestStateNotification>(Method::TestState, payload) {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "dropping notification");
                return;
            }
        };
        match self.proxy(notification.adapter_id) {
            Some(proxy) => proxy.test_states().fire(&notification.event),
            None => warn!(adapter_id = notification.adapter_id.0, "testState event for unknown adapter"),
        }
    }
}

/// Guest side of the protocol.
pub struct GuestCoordinator {
    shared: Option<Arc<GuestShared>>,
    cancel: CancellationToken,
    watcher: Option<JoinHandle<()>>,
}

impl GuestCoordinator {
    /// Obtain the host's service, install notification handlers and replay
    /// the host's current state if the channel is already available.
    ///
    /// If the service cannot be obtained the user is told once and the
    /// returned coordinator stays inert.
    pub async fn start(
        config: &ShareConfig,
        hub: Arc<dyn TestHub>,
        collaboration: Arc<dyn CollaborationService>,
    ) -> Self {
        info!(service = %config.service_name, "starting guest session");
        let cancel = CancellationToken::new();

        let Some(channel) = collaboration.get_shared_service(&config.service_name).await else {
            error!(service = %config.service_name, "getting shared service failed");
            collaboration.show_error_message("Could not connect to the host's test explorer");
            return Self {
                shared: None,
                cancel,
                watcher: None,
            };
        };
        info!(available = channel.is_available(), "obtained shared service");

        let shared = Arc::new(GuestShared {
            channel: Arc::clone(&channel),
            hub,
            proxies: Mutex::new(BTreeMap::new()),
            active: AtomicBool::new(false),
        });
        install_handlers(channel.as_ref(), &shared);

        let mut availability = channel.availability();
        let available = *availability.borrow_and_update();
        shared.set_available(available).await;

        let watcher = tokio::spawn(follow_availability(
            Arc::clone(&shared),
            availability,
            cancel.clone(),
        ));

        Self {
            shared: Some(shared),
            cancel,
            watcher: Some(watcher),
        }
    }

    pub fn is_inert(&self) -> bool {
        self.shared.is_none()
    }

    /// `true` from the snapshot request until deactivation. A failed
    /// request resets it.
    pub fn is_active(&self) -> bool {
        self.shared
            .as_ref()
            .is_some_and(|s| s.active.load(Ordering::SeqCst))
    }

    pub fn proxy(&self, id: AdapterId) -> Option<Arc<AdapterProxy>> {
        self.shared.as_ref().and_then(|s| s.proxy(id))
    }

    /// Ids of every live proxy, ascending.
    pub fn adapter_ids(&self) -> Vec<AdapterId> {
        self.shared
            .as_ref()
            .map(|s| lock(&s.proxies).keys().copied().collect())
            .unwrap_or_default()
    }

    /// Stop following availability and drop every proxy.
    pub async fn dispose(mut self) {
        info!("disposing guest session");
        self.cancel.cancel();
        if let Some(watcher) = self.watcher.take() {
            if let Err(e) = watcher.await {
                warn!(error = %e, "availability watcher ended abnormally");
            }
        }
        if let Some(shared) = self.shared.take() {
            shared.active.store(false, Ordering::SeqCst);
            shared.clear_proxies();
        }
    }
}

impl Drop for GuestCoordinator {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for GuestCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuestCoordinator")
            .field("inert", &self.is_inert())
            .field("active", &self.is_active())
            .field("adapters", &self.adapter_ids())
            .finish()
    }
}

fn install_handlers(channel: &dyn SharedChannel, shared: &Arc<GuestShared>) {
    let routes: [(Method, fn(&GuestShared, Value)); 4] = [
        (Method::RegisterAdapter, GuestShared::on_register),
        (Method::UnregisterAdapter, GuestShared::on_unregister),
        (Method::Tests, GuestShared::on_tests),
        (Method::TestState, GuestShared::on_test_state),
    ];
    for (method, route) in routes {
        let weak: Weak<GuestShared> = Arc::downgrade(shared);
        channel.on_notify(
            method.as_str(),
            notify_handler(move |payload| {
                if let Some(shared) = weak.upgrade() {
                    route(&shared, payload);
                }
            }),
        );
    }
}

async fn follow_availability(
    shared: Arc<GuestShared>,
    mut availability: watch::Receiver<bool>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = availability.changed() => {
                if changed.is_err() {
                    debug!("availability sender dropped");
                    break;
                }
                let available = *availability.borrow_and_update();
                shared.set_available(available).await;
            }
        }
    }
}
