//! Method names and payload schemas for the host/guest protocol.
//!
//! | direction   | method              | args / payload             | result                 |
//! |-------------|---------------------|----------------------------|------------------------|
//! | guest→host  | `adapters`          | `[]`                       | `[AdapterSnapshot]`    |
//! | guest→host  | `load`              | `[adapterId]`              | `null`                 |
//! | guest→host  | `run`               | `[adapterId, selection]`   | `null`                 |
//! | guest→host  | `debug`             | `[adapterId, selection]`   | `null`                 |
//! | guest→host  | `cancel`            | `[adapterId]`              | `null`, not awaited    |
//! | host→guest  | `registerAdapter`   | `{adapterId}`              | notification           |
//! | host→guest  | `unregisterAdapter` | `{adapterId}`              | notification           |
//! | host→guest  | `tests`             | `{adapterId, event}`       | notification           |
//! | host→guest  | `testState`         | `{adapterId, event}`       | notification           |
//!
//! Every embedded test node carries its file location in the shared scheme.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::{AdapterId, TestLoadEvent, TestNode, TestRunEvent, TestSuiteInfo};

/// Malformed arguments or payloads received from the remote side.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("missing argument {index} for {method}")]
    MissingArgument { method: Method, index: usize },

    #[error("invalid argument {index} for {method}: {source}")]
    InvalidArgument {
        method: Method,
        index: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid {method} payload: {source}")]
    InvalidPayload {
        method: Method,
        #[source]
        source: serde_json::Error,
    },
}

/// Every message name used on the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Adapters,
    Load,
    Run,
    Debug,
    Cancel,
    RegisterAdapter,
    UnregisterAdapter,
    Tests,
    TestState,
}

impl Method {
    pub const fn as_str(self) -> &'static str {
        match self {
            Method::Adapters => "adapters",
            Method::Load => "load",
            Method::Run => "run",
            Method::Debug => "debug",
            Method::Cancel => "cancel",
            Method::RegisterAdapter => "registerAdapter",
            Method::UnregisterAdapter => "unregisterAdapter",
            Method::Tests => "tests",
            Method::TestState => "testState",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// `registerAdapter` / `unregisterAdapter` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdapterIdArgs {
    pub adapter_id: AdapterId,
}

/// One entry of the `adapters` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdapterSnapshot {
    pub adapter_id: AdapterId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tests: Option<TestSuiteInfo>,
}

/// `tests` notification payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestsNotification {
    pub adapter_id: AdapterId,
    pub event: TestLoadEvent,
}

/// `testState` notification payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestStateNotification {
    pub adapter_id: AdapterId,
    pub event: TestRunEvent,
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

fn arg<T: DeserializeOwned>(method: Method, args: &[Value], index: usize) -> Result<T, ProtocolError> {
    let value = args
        .get(index)
        .ok_or(ProtocolError::MissingArgument { method, index })?;
    serde_json::from_value(value.clone()).map_err(|source| ProtocolError::InvalidArgument {
        method,
        index,
        source,
    })
}

/// Read the adapter id from `args[0]`.
pub fn adapter_id_arg(method: Method, args: &[Value]) -> Result<AdapterId, ProtocolError> {
    arg(method, args, 0)
}

/// Read the test selection from `args[1]`.
pub fn selection_arg(method: Method, args: &[Value]) -> Result<TestNode, ProtocolError> {
    arg(method, args, 1)
}

/// Decode a notification payload.
pub fn decode_notification<T: DeserializeOwned>(method: Method, payload: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(payload).map_err(|source| ProtocolError::InvalidPayload { method, source })
}

/// Decode the `adapters` response.
pub fn decode_snapshot(payload: Value) -> Result<Vec<AdapterSnapshot>, ProtocolError> {
    // A host with nothing to report may answer `null`.
    if payload.is_null() {
        return Ok(Vec::new());
    }
    serde_json::from_value(payload).map_err(|source| ProtocolError::InvalidPayload {
        method: Method::Adapters,
        source,
    })
}
