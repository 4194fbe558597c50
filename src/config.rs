//! Configuration for sessions, handlers and the DevKit store.

use crate::error::{EtpError, Result};
use crate::messages::Encoding;
use crate::types::{ContextScope, EtpVersion};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Per-session settings.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Name reported in RequestSession/OpenSession.
    pub application_name: String,

    pub application_version: String,

    /// Protocol version spoken on this session.
    pub version: EtpVersion,

    /// Wire encoding for message frames.
    pub encoding: Encoding,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            application_name: "ETP DevKit".to_string(),
            application_version: env!("CARGO_PKG_VERSION").to_string(),
            version: EtpVersion::V12,
            encoding: Encoding::Binary,
        }
    }
}

impl SessionConfig {
    pub fn v11() -> Self {
        Self {
            version: EtpVersion::V11,
            ..Default::default()
        }
    }

    pub fn v12() -> Self {
        Self::default()
    }
}

/// Capability values a handler advertises and the fallbacks it assumes when
/// the counterpart advertises nothing.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct CapabilityConfig {
    /// Max data items per message.
    /// Default: 10000
    pub max_data_item_count: i64,

    /// Max index values a stream may reach back when started.
    /// Default: 1000
    pub max_index_count: i64,

    /// Seconds of inactivity before a stream may be closed.
    /// Default: 3600
    pub streaming_timeout_period: i64,

    /// Max channels per range request.
    /// Default: 1000
    pub max_range_channels: i64,
}

impl Default for CapabilityConfig {
    fn default() -> Self {
        Self {
            max_data_item_count: 10_000,
            max_index_count: 1_000,
            streaming_timeout_period: 3_600,
            max_range_channels: 1_000,
        }
    }
}

/// Settings for the synthetic data generator.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Milliseconds between ticks.
    /// Default: 1000
    pub interval_ms: u64,

    /// Depth step for depth-indexed channels, metres.
    pub depth_step: f64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1_000,
            depth_step: 0.5,
        }
    }
}

impl GeneratorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// DevKit store configuration.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct DevKitConfig {
    pub session: SessionConfig,

    pub capabilities: CapabilityConfig,

    /// v1.1 producer acts as a simple streamer: Start streams every channel
    /// and explicit describe/start/stop/range requests are denied.
    pub simple_streamer: bool,

    /// Scope used when a v1.1 ChannelDescribe or a bulk stream registers a URI.
    pub describe_scope: ContextScope,

    /// Depth used with `describe_scope`.
    pub describe_depth: u32,

    pub generator: GeneratorConfig,
}

impl Default for DevKitConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            capabilities: CapabilityConfig::default(),
            simple_streamer: false,
            describe_scope: ContextScope::SourcesOrSelf,
            describe_depth: 8,
            generator: GeneratorConfig::default(),
        }
    }
}

impl DevKitConfig {
    /// Parse from a JSON document. Missing fields take their defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| EtpError::InvalidArgument(e.to_string()))
    }

    /// Load from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| EtpError::NotFound(format!("{}: {}", path.as_ref().display(), e)))?;
        Self::from_json(&text)
    }
}
