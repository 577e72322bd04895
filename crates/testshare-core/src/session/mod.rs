//! Session lifecycle: turns collaborative-session role changes into a host
//! coordinator, a guest coordinator, or nothing.
//!
//! Transitions:
//!
//! ```text
//! any --(id empty | role none)--> Inactive
//! any --(role host)-------------> Host(HostCoordinator)
//! any --(role guest)------------> Guest(GuestCoordinator)
//! ```
//!
//! The previous coordinator is always fully disposed before the next one
//! is constructed. Failed channel setup leaves an inert coordinator; the
//! next role change is the only recovery path.

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::adapter::TestHub;
use crate::config::ShareConfig;
use crate::guest::GuestCoordinator;
use crate::host::HostCoordinator;
use crate::translate::PathConverter;
use crate::transport::SharedChannel;

pub use memory::MemoryCollaboration;

/// The local participant's role in the collaborative session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    None,
    Host,
    Guest,
}

/// Payload of a session-role-changed signal.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: Option<String>,
    pub role: Role,
}

impl SessionInfo {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: Some(id.into()),
            role,
        }
    }

    pub fn ended() -> Self {
        Self::default()
    }
}

/// The collaborative-session layer.
#[async_trait]
pub trait CollaborationService: Send + Sync {
    /// Publish a service under `name` (host side).
    async fn share_service(&self, name: &str) -> Option<Arc<dyn SharedChannel>>;

    /// Withdraw a published service.
    async fn unshare_service(&self, name: &str);

    /// Obtain a proxy for a service the host published (guest side).
    async fn get_shared_service(&self, name: &str) -> Option<Arc<dyn SharedChannel>>;

    /// Conversion between the local and shared addressing schemes.
    fn path_converter(&self) -> Arc<dyn PathConverter>;

    /// Show a message to the user.
    fn show_error_message(&self, message: &str);
}

enum ActiveSession {
    Host(HostCoordinator),
    Guest(GuestCoordinator),
}

/// Owns at most one coordinator at a time.
pub struct SessionManager {
    config: ShareConfig,
    hub: Arc<dyn TestHub>,
    collaboration: Arc<dyn CollaborationService>,
    current: Option<ActiveSession>,
}

impl SessionManager {
    pub fn new(config: ShareConfig, hub: Arc<dyn TestHub>, collaboration: Arc<dyn CollaborationService>) -> Self {
        Self {
            config,
            hub,
            collaboration,
            current: None,
        }
    }

    /// Apply a session-role-changed signal.
    pub async fn on_session_changed(&mut self, session: SessionInfo) {
        info!(session_id = ?session.id, role = ?session.role, "session changed");

        self.shutdown().await;

        let has_id = session.id.as_deref().is_some_and(|id| !id.is_empty());
        if !has_id {
            return;
        }

        self.current = match session.role {
            Role::None => None,
            Role::Host => Some(ActiveSession::Host(
                HostCoordinator::start(&self.config, Arc::clone(&self.hub), Arc::clone(&self.collaboration)).await,
            )),
            Role::Guest => Some(ActiveSession::Guest(
                GuestCoordinator::start(&self.config, Arc::clone(&self.hub), Arc::clone(&self.collaboration)).await,
            )),
        };
    }

    /// Process role changes until `signals` ends, then dispose.
    pub async fn run<S>(&mut self, signals: S)
    where
        S: Stream<Item = SessionInfo>,
    {
        let mut signals = std::pin::pin!(signals);
        while let Some(session) = signals.next().await {
            self.on_session_changed(session).await;
        }
        self.shutdown().await;
    }

    /// Dispose the current coordinator, if any.
    pub async fn shutdown(&mut self) {
        match self.current.take() {
            Some(ActiveSession::Host(host)) => host.dispose().await,
            Some(ActiveSession::Guest(guest)) => guest.dispose().await,
            None => {}
        }
    }

    /// Role of the coordinator currently owned.
    pub fn current_role(&self) -> Role {
        match self.current {
            Some(ActiveSession::Host(_)) => Role::Host,
            Some(ActiveSession::Guest(_)) => Role::Guest,
            None => Role::None,
        }
    }

    pub fn host(&self) -> Option<&HostCoordinator> {
        match &self.current {
            Some(ActiveSession::Host(host)) => Some(host),
            _ => None,
        }
    }

    pub fn guest(&self) -> Option<&GuestCoordinator> {
        match &self.current {
            Some(ActiveSession::Guest(guest)) => Some(guest),
            _ => None,
        }
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("config", &self.config)
            .field("role", &self.current_role())
            .finish()
    }
}
