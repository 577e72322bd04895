//! In-process [`TestHub`] implementation.

use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use super::trait_def::{same_adapter, TestAdapter, TestController, TestHub};
use crate::events::lock;

/// A minimal test explorer: tracks registered adapters and controllers and
/// relays adapter registrations to every controller.
#[derive(Default)]
pub struct InMemoryHub {
    adapters: Mutex<Vec<Arc<dyn TestAdapter>>>,
    controllers: Mutex<Vec<Arc<dyn TestController>>>,
}

impl InMemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Currently registered adapters, in registration order.
    pub fn adapters(&self) -> Vec<Arc<dyn TestAdapter>> {
        lock(&self.adapters).clone()
    }

    pub fn controller_count(&self) -> usize {
        lock(&self.controllers).len()
    }
}

impl TestHub for InMemoryHub {
    fn register_controller(&self, controller: Arc<dyn TestController>) {
        {
            let mut controllers = lock(&self.controllers);
            if controllers.iter().any(|c| std::ptr::addr_eq(Arc::as_ptr(c), Arc::as_ptr(&controller))) {
                warn!("controller registered twice; ignoring");
                return;
            }
            controllers.push(Arc::clone(&controller));
        }
        // Replay existing adapters outside the lock; the controller may call
        // back into the hub.
        for adapter in self.adapters() {
            controller.register_adapter(adapter);
        }
    }

    fn unregister_controller(&self, controller: &Arc<dyn TestController>) {
        lock(&self.controllers).retain(|c| !std::ptr::addr_eq(Arc::as_ptr(c), Arc::as_ptr(controller)));
    }

    fn register_adapter(&self, adapter: Arc<dyn TestAdapter>) {
        {
            let mut adapters = lock(&self.adapters);
            if adapters.iter().any(|a| same_adapter(a, &adapter)) {
                warn!("adapter registered twice; ignoring");
                return;
            }
            adapters.push(Arc::clone(&adapter));
        }
        debug!("adapter registered with hub");
        let controllers = lock(&self.controllers).clone();
        for controller in controllers {
            controller.register_adapter(Arc::clone(&adapter));
        }
    }

    fn unregister_adapter(&self, adapter: &Arc<dyn TestAdapter>) {
        let removed = {
            let mut adapters = lock(&self.adapters);
            let before = adapters.len();
            adapters.retain(|a| !same_adapter(a, adapter));
            adapters.len() != before
        };
        if !removed {
            warn!("unregistering an adapter the hub does not know");
            return;
        }
        let controllers = lock(&self.controllers).clone();
        for controller in controllers {
            controller.unregister_adapter(adapter);
        }
    }
}

impl std::fmt::Debug for InMemoryHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryHub")
            .field("adapters", &lock(&self.adapters).len())
            .field("controllers", &lock(&self.controllers).len())
            .finish()
    }
}
