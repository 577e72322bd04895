//! Guest-side stand-in for a host adapter.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::adapter::TestAdapter;
use crate::events::EventEmitter;
use crate::model::{AdapterId, TestLoadEvent, TestNode, TestRunEvent};
use crate::protocol::Method;
use crate::transport::{SharedChannel, TransportError};

/// Forwards every adapter call to the host as a request and re-emits the
/// host's notifications as local events. Holds no other state.
pub struct AdapterProxy {
    id: AdapterId,
    channel: Arc<dyn SharedChannel>,
    tests: EventEmitter<TestLoadEvent>,
    test_states: EventEmitter<TestRunEvent>,
}

impl AdapterProxy {
    pub fn new(id: AdapterId, channel: Arc<dyn SharedChannel>) -> Self {
        debug!(adapter_id = id.0, "creating adapter proxy");
        Self {
            id,
            channel,
            tests: EventEmitter::new(),
            test_states: EventEmitter::new(),
        }
    }

    pub fn id(&self) -> AdapterId {
        self.id
    }

    /// Drop every local listener.
    pub fn dispose(&self) {
        debug!(adapter_id = self.id.0, "disposing adapter proxy");
        self.tests.dispose();
        self.test_states.dispose();
    }

    async fn forward(&self, method: Method, args: Vec<Value>) -> Result<()> {
        debug!(adapter_id = self.id.0, method = %method, "passing on request");
        self.channel
            .request(method.as_str(), args)
            .await
            .with_context(|| format!("{method} request for adapter {} failed", self.id))?;
        Ok(())
    }

    fn selection_args(&self, method: Method, selection: &TestNode) -> Result<Vec<Value>> {
        let selection = serde_json::to_value(selection).map_err(|source| TransportError::Encode {
            method: method.to_string(),
            source,
        })?;
        Ok(vec![json!(self.id), selection])
    }
}

#[async_trait]
impl TestAdapter for AdapterProxy {
    async fn load(&self) -> Result<()> {
        self.forward(Method::Load, vec![json!(self.id)]).await
    }

    async fn run(&self, selection: &TestNode) -> Result<()> {
        let args = self.selection_args(Method::Run, selection)?;
        self.forward(Method::Run, args).await
    }

    async fn debug(&self, selection: &TestNode) -> Result<()> {
        let args = self.selection_args(Method::Debug, selection)?;
        self.forward(Method::Debug, args).await
    }

    fn cancel(&self) {
        debug!(adapter_id = self.id.0, "passing on cancel request");
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(adapter_id = self.id.0, "no runtime to send cancel on");
            return;
        };
        let channel = Arc::clone(&self.channel);
        let id = self.id;
        runtime.spawn(async move {
            if let Err(e) = channel.request(Method::Cancel.as_str(), vec![json!(id)]).await {
                warn!(adapter_id = id.0, error = %e, "cancel request failed");
            }
        });
    }

    fn tests(&self) -> &EventEmitter<TestLoadEvent> {
        &self.tests
    }

    fn test_states(&self) -> &EventEmitter<TestRunEvent> {
        &self.test_states
    }
}

impl std::fmt::Debug for AdapterProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterProxy").field("id", &self.id).finish()
    }
}
