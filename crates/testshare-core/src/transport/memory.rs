//! In-process duplex channel.
//!
//! [`MemoryChannel::pair`] returns two connected ends. Notifications are
//! dispatched synchronously to the remote end's handlers, which preserves
//! per-direction ordering without a background task. Requests invoke the
//! remote handler directly and await it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;
use tracing::debug;

use super::{NotifyHandler, RequestHandler, SharedChannel, TransportError};
use crate::events::lock;

#[derive(Default)]
struct Endpoint {
    requests: Mutex<HashMap<String, RequestHandler>>,
    notifications: Mutex<HashMap<String, Vec<NotifyHandler>>>,
}

/// One end of an in-process shared channel.
pub struct MemoryChannel {
    name: String,
    local: Arc<Endpoint>,
    remote: Arc<Endpoint>,
    available: Arc<watch::Sender<bool>>,
}

impl MemoryChannel {
    /// Create two connected ends. The pair starts out available.
    pub fn pair(name: impl Into<String>) -> (Arc<Self>, Arc<Self>) {
        let name = name.into();
        let a = Arc::new(Endpoint::default());
        let b = Arc::new(Endpoint::default());
        let (tx, _rx) = watch::channel(true);
        let available = Arc::new(tx);

        let first = Arc::new(Self {
            name: name.clone(),
            local: Arc::clone(&a),
            remote: Arc::clone(&b),
            available: Arc::clone(&available),
        });
        let second = Arc::new(Self {
            name,
            local: b,
            remote: a,
            available,
        });
        (first, second)
    }

    /// Flip availability for both ends.
    pub fn set_available(&self, available: bool) {
        let previous = self.available.send_replace(available);
        if previous != available {
            debug!(service = %self.name, available, "shared service availability changed");
        }
    }
}

#[async_trait]
impl SharedChannel for MemoryChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn request(&self, method: &str, args: Vec<Value>) -> Result<Value, TransportError> {
        if !self.is_available() {
            return Err(TransportError::Unavailable(self.name.clone()));
        }
        let handler = lock(&self.remote.requests).get(method).cloned();
        let Some(handler) = handler else {
            return Err(TransportError::NoHandler(method.to_string()));
        };
        Ok(handler(args).await)
    }

    fn notify(&self, method: &str, payload: Value) {
        if !self.is_available() {
            debug!(service = %self.name, method, "dropping notification while unavailable");
            return;
        }
        let handlers = lock(&self.remote.notifications)
            .get(method)
            .cloned()
            .unwrap_or_default();
        if handlers.is_empty() {
            debug!(service = %self.name, method, "no remote handler for notification");
        }
        for handler in handlers {
            handler(payload.clone());
        }
    }

    fn on_request(&self, method: &str, handler: RequestHandler) {
        lock(&self.local.requests).insert(method.to_string(), handler);
    }

    fn on_notify(&self, method: &str, handler: NotifyHandler) {
        lock(&self.local.notifications)
            .entry(method.to_string())
            .or_default()
            .push(handler);
    }

    fn is_available(&self) -> bool {
        *self.available.borrow()
    }

    fn availability(&self) -> watch::Receiver<bool> {
        self.available.subscribe()
    }
}

impl std::fmt::Debug for MemoryChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryChannel")
            .field("name", &self.name)
            .field("available", &self.is_available())
            .finish()
    }
}
