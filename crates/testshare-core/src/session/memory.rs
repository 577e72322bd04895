//! In-process collaborative session.
//!
//! One [`MemoryCollaboration`] plays the collaboration service for both
//! participants: [`MemoryCollaboration::host`] returns the view a host
//! process sees and [`MemoryCollaboration::guest`] the view a guest sees.
//! Shared services are [`MemoryChannel`] pairs.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{debug, error};

use super::CollaborationService;
use crate::events::lock;
use crate::translate::PathConverter;
use crate::transport::{MemoryChannel, SharedChannel};

struct SharedPair {
    host_end: Arc<MemoryChannel>,
    guest_end: Arc<MemoryChannel>,
}

/// Broker for an in-process host/guest session.
pub struct MemoryCollaboration {
    services: Mutex<HashMap<String, SharedPair>>,
    converter: Arc<dyn PathConverter>,
    sharing_enabled: Mutex<bool>,
    messages: Mutex<Vec<String>>,
}

impl MemoryCollaboration {
    pub fn new(converter: Arc<dyn PathConverter>) -> Arc<Self> {
        Arc::new(Self {
            services: Mutex::new(HashMap::new()),
            converter,
            sharing_enabled: Mutex::new(true),
            messages: Mutex::new(Vec::new()),
        })
    }

    pub fn host(self: &Arc<Self>) -> Arc<dyn CollaborationService> {
        Arc::new(HostView(Arc::clone(self)))
    }

    pub fn guest(self: &Arc<Self>) -> Arc<dyn CollaborationService> {
        Arc::new(GuestView(Arc::clone(self)))
    }

    /// When disabled, `share_service` fails as if the session refused.
    pub fn set_sharing_enabled(&self, enabled: bool) {
        *lock(&self.sharing_enabled) = enabled;
    }

    /// Host end of a shared service, for driving availability.
    pub fn channel(&self, name: &str) -> Option<Arc<MemoryChannel>> {
        lock(&self.services).get(name).map(|p| Arc::clone(&p.host_end))
    }

    /// Messages shown to the user so far.
    pub fn messages(&self) -> Vec<String> {
        lock(&self.messages).clone()
    }

    fn record_message(&self, message: &str) {
        error!(message, "user-visible error");
        lock(&self.messages).push(message.to_string());
    }
}

impl std::fmt::Debug for MemoryCollaboration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCollaboration")
            .field("services", &lock(&self.services).keys().collect::<Vec<_>>())
            .finish()
    }
}

struct HostView(Arc<MemoryCollaboration>);

struct GuestView(Arc<MemoryCollaboration>);

#[async_trait]
impl CollaborationService for HostView {
    async fn share_service(&self, name: &str) -> Option<Arc<dyn SharedChannel>> {
        if !*lock(&self.0.sharing_enabled) {
            return None;
        }
        let mut services = lock(&self.0.services);
        let pair = services.entry(name.to_string()).or_insert_with(|| {
            let (host_end, guest_end) = MemoryChannel::pair(name);
            SharedPair { host_end, guest_end }
        });
        pair.host_end.set_available(true);
        debug!(service = name, "service shared");
        Some(Arc::clone(&pair.host_end) as Arc<dyn SharedChannel>)
    }

    async fn unshare_service(&self, name: &str) {
        if let Some(pair) = lock(&self.0.services).remove(name) {
            pair.host_end.set_available(false);
            debug!(service = name, "service unshared");
        }
    }

    async fn get_shared_service(&self, _name: &str) -> Option<Arc<dyn SharedChannel>> {
        None
    }

    fn path_converter(&self) -> Arc<dyn PathConverter> {
        Arc::clone(&self.0.converter)
    }

    fn show_error_message(&self, message: &str) {
        self.0.record_message(message);
    }
}

#[async_trait]
impl CollaborationService for GuestView {
    async fn share_service(&self, _name: &str) -> Option<Arc<dyn SharedChannel>> {
        None
    }

    async fn unshare_service(&self, _name: &str) {}

    async fn get_shared_service(&self, name: &str) -> Option<Arc<dyn SharedChannel>> {
        lock(&self.0.services)
            .get(name)
            .map(|p| Arc::clone(&p.guest_end) as Arc<dyn SharedChannel>)
    }

    fn path_converter(&self) -> Arc<dyn PathConverter> {
        Arc::clone(&self.0.converter)
    }

    fn show_error_message(&self, message: &str) {
        self.0.record_message(message);
    }
}
