use std::env;

/// Protocol configuration shared by host and guest.
///
/// Both sides must use the same service name or the guest will never find
/// the host's channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareConfig {
    /// Name identifying this protocol instance on the shared transport.
    pub service_name: String,
}

impl ShareConfig {
    /// The service name used when nothing else is configured.
    pub const DEFAULT_SERVICE_NAME: &str = "test-explorer";

    /// Environment variable that overrides the service name.
    pub const SERVICE_NAME_ENV: &str = "TESTSHARE_SERVICE_NAME";

    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }

    /// Build a config from the environment.
    ///
    /// Priority: `TESTSHARE_SERVICE_NAME` env var, then the default.
    pub fn from_env() -> Self {
        let service_name = env::var(Self::SERVICE_NAME_ENV)
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| Self::DEFAULT_SERVICE_NAME.to_owned());
        Self { service_name }
    }
}

impl Default for ShareConfig {
    fn default() -> Self {
        Self::new(Self::DEFAULT_SERVICE_NAME)
    }
}
