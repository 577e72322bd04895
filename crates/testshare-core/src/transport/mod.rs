//! Transport port: the shared, bidirectional messaging channel between
//! host and guest.
//!
//! A channel carries two kinds of traffic:
//!
//! - **requests**: the caller awaits a JSON response produced by the
//!   remote side's handler for that method name.
//! - **notifications**: fire-and-forget messages dispatched to every
//!   remote handler registered for that name.
//!
//! Each direction is delivered in issue order. Nothing is guaranteed about
//! interleaving between the two directions.

pub mod memory;

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use tokio::sync::watch;

pub use memory::MemoryChannel;

/// Handler for an inbound request. Receives the positional argument list.
pub type RequestHandler = Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, Value> + Send + Sync>;

/// Handler for an inbound notification.
pub type NotifyHandler = Arc<dyn Fn(Value) + Send + Sync>;

/// Errors surfaced by a [`SharedChannel`].
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("shared service {0:?} is not available")]
    Unavailable(String),

    #[error("no handler registered for request {0:?}")]
    NoHandler(String),

    #[error("failed to encode payload for {method:?}: {source}")]
    Encode {
        method: String,
        #[source]
        source: serde_json::Error,
    },
}

/// The shared-messaging channel consumed by both coordinators.
#[async_trait]
pub trait SharedChannel: Send + Sync {
    /// The service name both sides agreed on.
    fn name(&self) -> &str;

    /// Send a request and await the remote handler's response.
    async fn request(&self, method: &str, args: Vec<Value>) -> Result<Value, TransportError>;

    /// Send a notification. Never blocks; dropped while unavailable.
    fn notify(&self, method: &str, payload: Value);

    /// Install the handler for inbound requests named `method`, replacing
    /// any previous one.
    fn on_request(&self, method: &str, handler: RequestHandler);

    /// Add a handler for inbound notifications named `method`.
    fn on_notify(&self, method: &str, handler: NotifyHandler);

    fn is_available(&self) -> bool;

    /// Watch availability changes. The current value is visible immediately.
    fn availability(&self) -> watch::Receiver<bool>;
}

/// Serialize `payload` and send it as a notification.
pub fn notify_json<T: serde::Serialize + ?Sized>(
    channel: &dyn SharedChannel,
    method: &str,
    payload: &T,
) -> Result<(), TransportError> {
    let value = serde_json::to_value(payload).map_err(|source| TransportError::Encode {
        method: method.to_string(),
        source,
    })?;
    channel.notify(method, value);
    Ok(())
}

/// Wrap an async closure as a [`RequestHandler`].
pub fn request_handler<F, Fut>(f: F) -> RequestHandler
where
    F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Value> + Send + 'static,
{
    Arc::new(move |args| f(args).boxed())
}

/// Wrap a closure as a [`NotifyHandler`].
pub fn notify_handler<F>(f: F) -> NotifyHandler
where
    F: Fn(Value) + Send + Sync + 'static,
{
    Arc::new(f)
}
