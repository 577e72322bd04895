//! The `TestAdapter` trait and the registration surfaces around it.
//!
//! Real adapters (on the host) and [`crate::proxy::AdapterProxy`] (on the
//! guest) both implement [`TestAdapter`], so the test explorer cannot tell
//! them apart. The trait is object-safe and adapters travel as
//! `Arc<dyn TestAdapter>`.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::events::EventEmitter;
use crate::model::{TestLoadEvent, TestNode, TestRunEvent};

/// Discovers, runs and debugs a set of tests.
///
/// Results are reported through the two event emitters rather than through
/// return values: `load` completes once discovery has been kicked off or
/// finished, and the tree arrives in a [`TestLoadEvent::Finished`].
#[async_trait]
pub trait TestAdapter: Send + Sync {
    /// Discover tests.
    async fn load(&self) -> Result<()>;

    /// Run the tests in `selection` (a test, or a suite and everything
    /// beneath it).
    async fn run(&self, selection: &TestNode) -> Result<()>;

    /// Run the tests in `selection` under a debugger.
    async fn debug(&self, selection: &TestNode) -> Result<()>;

    /// Ask the adapter to stop the current run. Advisory; never awaited.
    fn cancel(&self);

    /// Discovery events.
    fn tests(&self) -> &EventEmitter<TestLoadEvent>;

    /// Run-state events.
    fn test_states(&self) -> &EventEmitter<TestRunEvent>;
}

const _: () = {
    fn _assert_object_safe(_: &dyn TestAdapter) {}
};

/// Identity comparison for adapter handles.
///
/// Compares only the data pointer; two `Arc<dyn TestAdapter>` created from
/// the same allocation may carry different vtable pointers.
pub fn same_adapter(a: &Arc<dyn TestAdapter>, b: &Arc<dyn TestAdapter>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Receives adapters from a [`TestHub`].
pub trait TestController: Send + Sync {
    fn register_adapter(&self, adapter: Arc<dyn TestAdapter>);
    fn unregister_adapter(&self, adapter: &Arc<dyn TestAdapter>);
}

/// The test explorer's registration surface.
///
/// Adapters registered here become visible to every registered controller.
/// A controller registered after adapters already exist receives a
/// `register_adapter` call for each of them.
pub trait TestHub: Send + Sync {
    fn register_controller(&self, controller: Arc<dyn TestController>);
    fn unregister_controller(&self, controller: &Arc<dyn TestController>);
    fn register_adapter(&self, adapter: Arc<dyn TestAdapter>);
    fn unregister_adapter(&self, adapter: &Arc<dyn TestAdapter>);
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopAdapter {
        tests: EventEmitter<TestLoadEvent>,
        states: EventEmitter<TestRunEvent>,
    }

    impl NoopAdapter {
        fn new() -> Self {
            Self {
                tests: EventEmitter::new(),
                states: EventEmitter::new(),
            }
        }
    }

    #[async_trait]
    impl TestAdapter for NoopAdapter {
        async fn load(&self) -> Result<()> {
            Ok(())
        }

        async fn run(&self, _selection: &TestNode) -> Result<()> {
            Ok(())
        }

        async fn debug(&self, _selection: &TestNode) -> Result<()> {
            Ok(())
        }

        fn cancel(&self) {}

        fn tests(&self) -> &EventEmitter<TestLoadEvent> {
            &self.tests
        }

        fn test_states(&self) -> &EventEmitter<TestRunEvent> {
            &self.states
        }
    }

    #[test]
    fn same_adapter_compares_allocation() {
        let a: Arc<dyn TestAdapter> = Arc::new(NoopAdapter::new());
        let a2 = Arc::clone(&a);
        let b: Arc<dyn TestAdapter> = Arc::new(NoopAdapter::new());

        assert!(same_adapter(&a, &a2));
        assert!(!same_adapter(&a, &b));
    }
}
