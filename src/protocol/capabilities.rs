//! Capability sets exchanged at session open.

use crate::config::CapabilityConfig;
use crate::types::DataValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const MAX_DATA_ITEM_COUNT: &str = "MaxDataItemCount";
pub const MAX_INDEX_COUNT: &str = "MaxIndexCount";
pub const STREAMING_TIMEOUT_PERIOD: &str = "StreamingTimeoutPeriod";
pub const MAX_RANGE_CHANNELS: &str = "MaxRangeChannels";

/// Named typed scalars advertised for one protocol.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Capabilities(BTreeMap<String, DataValue>);

impl Capabilities {
    pub fn new() -> Self {
        Self::default()
    }

    /// Streaming limits from configuration.
    pub fn streaming(config: &CapabilityConfig) -> Self {
        Self::new()
            .with(MAX_DATA_ITEM_COUNT, DataValue::Long(config.max_data_item_count))
            .with(MAX_INDEX_COUNT, DataValue::Long(config.max_index_count))
            .with(
                STREAMING_TIMEOUT_PERIOD,
                DataValue::Long(config.streaming_timeout_period),
            )
            .with(MAX_RANGE_CHANNELS, DataValue::Long(config.max_range_channels))
    }

    pub fn with(mut self, key: &str, value: DataValue) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: &str, value: DataValue) {
        self.0.insert(key.to_string(), value);
    }

    pub fn get(&self, key: &str) -> Option<&DataValue> {
        self.0.get(key)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(DataValue::as_i64)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &DataValue)> {
        self.0.iter()
    }
}

/// Local and counterpart capabilities of one handler.
///
/// Limits that bound outbound data always come from the counterpart; the
/// configured fallback applies only to keys the counterpart did not send.
#[derive(Clone, Debug)]
pub struct NegotiatedCapabilities {
    local: Capabilities,
    counterpart: Option<Capabilities>,
    fallback: CapabilityConfig,
}

impl NegotiatedCapabilities {
    pub fn new(config: &CapabilityConfig) -> Self {
        Self {
            local: Capabilities::streaming(config),
            counterpart: None,
            fallback: config.clone(),
        }
    }

    pub fn local(&self) -> &Capabilities {
        &self.local
    }

    pub fn counterpart(&self) -> Option<&Capabilities> {
        self.counterpart.as_ref()
    }

    pub fn set_counterpart(&mut self, capabilities: Capabilities) {
        self.counterpart = Some(capabilities);
    }

    pub fn clear_counterpart(&mut self) {
        self.counterpart = None;
    }

    fn counterpart_limit(&self, key: &str, fallback: i64) -> usize {
        let value = self
            .counterpart
            .as_ref()
            .and_then(|c| c.get_i64(key))
            .unwrap_or(fallback);
        value.max(1) as usize
    }

    pub fn counterpart_max_data_item_count(&self) -> usize {
        self.counterpart_limit(MAX_DATA_ITEM_COUNT, self.fallback.max_data_item_count)
    }

    pub fn counterpart_max_index_count(&self) -> usize {
        self.counterpart_limit(MAX_INDEX_COUNT, self.fallback.max_index_count)
    }

    pub fn counterpart_max_range_channels(&self) -> usize {
        self.counterpart_limit(MAX_RANGE_CHANNELS, self.fallback.max_range_channels)
    }

    /// Seconds.
    pub fn counterpart_streaming_timeout_period(&self) -> usize {
        self.counterpart_limit(STREAMING_TIMEOUT_PERIOD, self.fallback.streaming_timeout_period)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counterpart_limits_win() {
        let config = CapabilityConfig::default();
        let mut negotiated = NegotiatedCapabilities::new(&config);
        assert_eq!(
            negotiated.counterpart_max_data_item_count(),
            config.max_data_item_count as usize
        );

        negotiated.set_counterpart(
            Capabilities::new()
                .with(MAX_DATA_ITEM_COUNT, DataValue::Int(3))
                .with(MAX_INDEX_COUNT, DataValue::Long(0)),
        );
        assert_eq!(negotiated.counterpart_max_data_item_count(), 3);
        // Non-positive limits are clamped to one.
        assert_eq!(negotiated.counterpart_max_index_count(), 1);
        // Keys the counterpart left out fall back to configuration.
        assert_eq!(
            negotiated.counterpart_max_range_channels(),
            config.max_range_channels as usize
        );
        // Local values are untouched.
        assert_eq!(
            negotiated.local().get_i64(MAX_DATA_ITEM_COUNT),
            Some(config.max_data_item_count)
        );
    }

    #[test]
    fn test_capabilities_ignore_non_integer_values() {
        let caps = Capabilities::new().with(MAX_DATA_ITEM_COUNT, DataValue::String("lots".into()));
        assert_eq!(caps.get_i64(MAX_DATA_ITEM_COUNT), None);
        assert_eq!(caps.len(), 1);
    }
}
