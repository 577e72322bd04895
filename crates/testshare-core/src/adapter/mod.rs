//! Adapter capability contract and the test explorer registration surface.
//!
//! # Architecture
//!
//! ```text
//!            TestHub  (test explorer)
//!           /       \
//!  register_adapter   register_controller
//!         |                 |
//!   dyn TestAdapter    dyn TestController
//!   (real adapter,     (host coordinator)
//!    or AdapterProxy)
//! ```

pub mod hub;
pub mod trait_def;

pub use hub::InMemoryHub;
pub use trait_def::{same_adapter, TestAdapter, TestController, TestHub};
