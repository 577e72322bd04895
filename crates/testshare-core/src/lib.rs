//! Share a test explorer between a host and a guest over a collaborative
//! session's shared channel.
//!
//! The host owns the real test adapters. It allocates an [`AdapterId`] for
//! each one, forwards their discovery and run-state events as
//! notifications, and serves `load`/`run`/`debug`/`cancel` requests from
//! the guest. The guest mirrors each host adapter as an
//! [`proxy::AdapterProxy`] registered with its own test hub, so the local
//! test explorer sees the host's tests as if they were local.
//!
//! ```text
//!  host process                                   guest process
//!  ------------                                   -------------
//!  TestHub ── adapters ──> HostCoordinator        GuestCoordinator ──> TestHub
//!                             │ AdapterRegistry      │ AdapterProxy*
//!                             │                      │
//!                             └──── SharedChannel ───┘
//!                     requests <──  adapters/load/run/debug/cancel
//!                notifications ──>  registerAdapter/unregisterAdapter/tests/testState
//! ```
//!
//! [`session::SessionManager`] picks which side to run based on the
//! collaborative session's role.

pub mod adapter;
pub mod config;
pub mod events;
pub mod guest;
pub mod host;
pub mod model;
pub mod protocol;
pub mod proxy;
pub mod registry;
pub mod session;
pub mod translate;
pub mod transport;

pub use config::ShareConfig;
pub use model::AdapterId;
