//! Host coordinator: owns the adapter registry, serves guest requests and
//! follows the shared channel's availability.
//!
//! While the channel is available the coordinator is registered with the
//! test hub as a controller, so every local adapter flows into the
//! registry. When the channel drops, the controller is withdrawn but the
//! registry (ids, subscriptions, cached trees) is kept; a later
//! reactivation picks up where it left off. Adapters the hub dropped in the
//! meantime are pruned from the registry on reactivation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::adapter::{TestAdapter, TestController, TestHub};
use crate::config::ShareConfig;
use crate::events::lock;
use crate::model::{AdapterId, TestNode};
use crate::protocol::{adapter_id_arg, selection_arg, Method};
use crate::registry::AdapterRegistry;
use crate::session::CollaborationService;
use crate::translate::{Direction, LocationTranslator};
use crate::transport::{request_handler, SharedChannel};

/// Feeds hub adapter registrations into the registry.
struct RegistryController {
    registry: Arc<AdapterRegistry>,
    /// Adapters the hub replayed since `begin_replay`, if one is in progress.
    replayed: Mutex<Option<Vec<Arc<dyn TestAdapter>>>>,
}

impl RegistryController {
    fn begin_replay(&self) {
        *lock(&self.replayed) = Some(Vec::new());
    }

    /// Stop recording and drop every registry record the hub did not
    /// replay. Registrations racing with the prune wait on the lock.
    fn finish_replay(&self) -> Vec<AdapterId> {
        let mut replayed = lock(&self.replayed);
        let live = replayed.take().unwrap_or_default();
        self.registry.retain(&live)
    }
}

impl TestController for RegistryController {
    fn register_adapter(&self, adapter: Arc<dyn TestAdapter>) {
        if let Some(replayed) = lock(&self.replayed).as_mut() {
            replayed.push(Arc::clone(&adapter));
        }
        // Known adapters come back on every reactivation; keep their ids.
        if !self.registry.contains(&adapter) {
            self.registry.register(adapter);
        }
    }

    fn unregister_adapter(&self, adapter: &Arc<dyn TestAdapter>) {
        self.registry.unregister(adapter);
    }
}

struct HostShared {
    hub: Arc<dyn TestHub>,
    registry: Arc<AdapterRegistry>,
    translator: LocationTranslator,
    controller: Arc<RegistryController>,
    active: AtomicBool,
}

impl HostShared {
    fn set_available(&self, available: bool) {
        let controller: Arc<dyn TestController> = self.controller.clone();
        if available {
            if !self.active.swap(true, Ordering::SeqCst) {
                info!("shared service available; registering controller");
                self.controller.begin_replay();
                self.hub.register_controller(controller);
                let dropped = self.controller.finish_replay();
                if !dropped.is_empty() {
                    info!(count = dropped.len(), "pruned adapters removed while unavailable");
                }
            }
        } else if self.active.swap(false, Ordering::SeqCst) {
            info!("shared service unavailable; unregistering controller");
            self.hub.unregister_controller(&controller);
        }
    }

    /// Resolve `args[0]` to a live adapter, logging why not otherwise.
    fn adapter_for(&self, method: Method, args: &[Value]) -> Option<Arc<dyn TestAdapter>> {
        let id = match adapter_id_arg(method, args) {
            Ok(id) => id,
            Err(e) => {
                warn!(method = %method, error = %e, "malformed request");
                return None;
            }
        };
        let adapter = self.registry.get(id);
        if adapter.is_none() {
            warn!(method = %method, adapter_id = id.0, "request for unknown adapter");
        }
        adapter
    }

    /// Resolve `args[1]` and bring its locations back to the local scheme.
    fn selection_for(&self, method: Method, args: &[Value]) -> Option<TestNode> {
        match selection_arg(method, args) {
            Ok(selection) => Some(self.translator.node(&selection, Direction::ToLocal)),
            Err(e) => {
                warn!(method = %method, error = %e, "malformed selection");
                None
            }
        }
    }

    async fn handle(&self, method: Method, args: Vec<Value>) -> Value {
        debug!(method = %method, "inbound request");
        if method == Method::Adapters {
            return match serde_json::to_value(self.registry.snapshot()) {
                Ok(value) => value,
                Err(e) => {
                    error!(error = %e, "failed to encode adapter snapshot");
                    Value::Null
                }
            };
        }

        let Some(adapter) = self.adapter_for(method, &args) else {
            return Value::Null;
        };

        let result = match method {
            Method::Load => adapter.load().await,
            Method::Run | Method::Debug => {
                let Some(selection) = self.selection_for(method, &args) else {
                    return Value::Null;
                };
                if method == Method::Run {
                    adapter.run(&selection).await
                } else {
                    adapter.debug(&selection).await
                }
            }
            Method::Cancel => {
                adapter.cancel();
                Ok(())
            }
            other => {
                warn!(method = %other, "not a request method");
                Ok(())
            }
        };

        if let Err(e) = result {
            warn!(method = %method, error = %e, "adapter call failed");
        }
        Value::Null
    }
}

/// Host side of the protocol.
pub struct HostCoordinator {
    service_name: String,
    collaboration: Arc<dyn CollaborationService>,
    shared: Option<Arc<HostShared>>,
    channel: Option<Arc<dyn SharedChannel>>,
    cancel: CancellationToken,
    watcher: Option<JoinHandle<()>>,
}

impl HostCoordinator {
    /// Share the service, install request handlers and follow availability.
    ///
    /// If the service cannot be shared the user is told once and the
    /// returned coordinator stays inert.
    pub async fn start(
        config: &ShareConfig,
        hub: Arc<dyn TestHub>,
        collaboration: Arc<dyn CollaborationService>,
    ) -> Self {
        info!(service = %config.service_name, "starting host session");
        let cancel = CancellationToken::new();

        let Some(channel) = collaboration.share_service(&config.service_name).await else {
            error!(service = %config.service_name, "sharing service failed");
            collaboration.show_error_message("Could not share the test explorer with the session");
            return Self {
                service_name: config.service_name.clone(),
                collaboration,
                shared: None,
                channel: None,
                cancel,
                watcher: None,
            };
        };

        let translator = LocationTranslator::new(collaboration.path_converter());
        let registry = Arc::new(AdapterRegistry::new(Arc::clone(&channel), translator.clone()));
        let controller = Arc::new(RegistryController {
            registry: Arc::clone(&registry),
            replayed: Mutex::new(None),
        });
        let shared = Arc::new(HostShared {
            hub,
            registry,
            translator,
            controller,
            active: AtomicBool::new(false),
        });

        install_handlers(channel.as_ref(), &shared);

        let mut availability = channel.availability();
        let available = *availability.borrow_and_update();
        shared.set_available(available);

        let watcher = tokio::spawn(follow_availability(
            Arc::clone(&shared),
            availability,
            cancel.clone(),
        ));

        Self {
            service_name: config.service_name.clone(),
            collaboration,
            shared: Some(shared),
            channel: Some(channel),
            cancel,
            watcher: Some(watcher),
        }
    }

    /// `true` when sharing failed and the coordinator does nothing.
    pub fn is_inert(&self) -> bool {
        self.shared.is_none()
    }

    /// `true` while registered with the hub as a controller.
    pub fn is_active(&self) -> bool {
        self.shared
            .as_ref()
            .is_some_and(|s| s.active.load(Ordering::SeqCst))
    }

    pub fn registry(&self) -> Option<&AdapterRegistry> {
        self.shared.as_ref().map(|s| s.registry.as_ref())
    }

    pub fn channel(&self) -> Option<&Arc<dyn SharedChannel>> {
        self.channel.as_ref()
    }

    /// Tear down: stop following availability, withdraw the controller,
    /// release every adapter subscription and unshare the service.
    pub async fn dispose(mut self) {
        info!(service = %self.service_name, "disposing host session");
        self.cancel.cancel();
        if let Some(watcher) = self.watcher.take() {
            if let Err(e) = watcher.await {
                warn!(error = %e, "availability watcher ended abnormally");
            }
        }
        if let Some(shared) = self.shared.take() {
            shared.set_available(false);
            shared.registry.clear();
            self.collaboration.unshare_service(&self.service_name).await;
        }
        self.channel = None;
    }
}

impl Drop for HostCoordinator {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for HostCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostCoordinator")
            .field("service_name", &self.service_name)
            .field("inert", &self.is_inert())
            .field("active", &self.is_active())
            .finish()
    }
}

fn install_handlers(channel: &dyn SharedChannel, shared: &Arc<HostShared>) {
    for method in [Method::Adapters, Method::Load, Method::Run, Method::Debug, Method::Cancel] {
        // Weak: the channel outlives the coordinator's interest in it.
        let weak: Weak<HostShared> = Arc::downgrade(shared);
        channel.on_request(
            method.as_str(),
            request_handler(move |args| {
                let weak = weak.clone();
                async move {
                    match weak.upgrade() {
                        Some(shared) => shared.handle(method, args).await,
                        None => Value::Null,
                    }
                }
            }),
        );
    }
}

async fn follow_availability(
    shared: Arc<HostShared>,
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
                shared.set_available(available);
            }
        }
    }
}
