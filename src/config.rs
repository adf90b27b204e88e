//! Engine configuration

use std::time::Duration;

use url::Url;

use crate::error::Result;
use crate::push::PushConfig;
use crate::sync::DEFAULT_DISTANCE_CEILING;

/// Top-level engine configuration.
///
/// Constructed once at application start and passed by reference into the
/// components that need it; there are no lazily initialized globals.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Base URL of the REST API, e.g. `http://localhost:5000/api`.
    pub api_base: String,
    /// WebSocket URL of the push channel, e.g. `ws://localhost:5000/push`.
    pub push_url: String,
    /// Poll period for the request list.
    pub poll_period: Duration,
    /// Refetch period used by open chat sessions as a push backstop.
    pub chat_refetch_period: Duration,
    /// User-adjustable distance ceiling for the "available" projection.
    /// Clamped to `[0, 100]` when applied.
    pub distance_ceiling: f64,
}

impl EngineConfig {
    pub fn new(api_base: impl Into<String>, push_url: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into(),
            push_url: push_url.into(),
            poll_period: Duration::from_secs(5),
            chat_refetch_period: Duration::from_secs(3),
            distance_ceiling: DEFAULT_DISTANCE_CEILING,
        }
    }

    /// Check both endpoint URLs parse, before any component starts using
    /// them.
    pub fn validate(&self) -> Result<()> {
        Url::parse(&self.api_base)?;
        Url::parse(&self.push_url)?;
        Ok(())
    }

    /// Push channel settings derived from this configuration.
    pub fn push_config(&self) -> PushConfig {
        PushConfig::new(self.push_url.clone())
    }
}
