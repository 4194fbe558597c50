//! ETP 1.1 ChannelStreaming (protocol 1) bodies.

use super::message_bodies;
use crate::types::{ChannelId, DataValue, IndexDirection, IndexKind, IndexValue, Protocol};
use serde::{Deserialize, Serialize};

/// v1.1 channel status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelStatus {
    Active,
    Inactive,
    Closed,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexMetadataRecord {
    pub index_type: IndexKind,
    pub uom: String,
    pub direction: IndexDirection,
    pub mnemonic: String,
    /// Decimal places of a scaled depth index.
    pub scale: i32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelMetadataRecord {
    pub channel_uri: String,
    pub channel_id: ChannelId,
    pub indexes: Vec<IndexMetadataRecord>,
    pub channel_name: String,
    pub data_type: String,
    pub uom: String,
    pub start_index: Option<i64>,
    pub end_index: Option<i64>,
    pub description: String,
    pub status: ChannelStatus,
    pub source: String,
    pub measure_class: String,
    pub uuid: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DataAttribute {
    pub attribute_id: i32,
    pub attribute_value: DataValue,
}

/// Attribute id flagging an invalid value.
pub const VALUE_VALID_ATTRIBUTE: i32 = 1;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DataItem {
    /// Scaled indexes, primary first.
    pub indexes: Vec<i64>,
    pub channel_id: ChannelId,
    pub value: DataValue,
    pub value_attributes: Vec<DataAttribute>,
}

impl From<&crate::types::DataItem> for DataItem {
    fn from(item: &crate::types::DataItem) -> Self {
        let value_attributes = if item.value_valid {
            Vec::new()
        } else {
            vec![DataAttribute {
                attribute_id: VALUE_VALID_ATTRIBUTE,
                attribute_value: DataValue::Boolean(false),
            }]
        };
        Self {
            indexes: vec![item.index.to_scaled()],
            channel_id: item.channel_id,
            value: item.value.clone(),
            value_attributes,
        }
    }
}

impl DataItem {
    /// Convert back, given the channel's index kind.
    pub fn to_item(&self, kind: IndexKind) -> Option<crate::types::DataItem> {
        let index = *self.indexes.first()?;
        let value_valid = !self.value_attributes.iter().any(|a| {
            a.attribute_id == VALUE_VALID_ATTRIBUTE && a.attribute_value == DataValue::Boolean(false)
        });
        Some(crate::types::DataItem {
            channel_id: self.channel_id,
            index: IndexValue::from_scaled(kind, index),
            value: self.value.clone(),
            value_valid,
        })
    }
}

/// Where a stream starts.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum StreamingStartIndex {
    /// Only new data.
    Latest,
    /// The last N index values.
    IndexCount(i32),
    /// From a scaled index value.
    IndexValue(i64),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelStreamingInfo {
    pub channel_id: ChannelId,
    pub start_index: StreamingStartIndex,
    pub receive_change_notification: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelRangeInfo {
    pub channel_id: Vec<ChannelId>,
    pub start_index: i64,
    pub end_index: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Start {
    pub max_message_rate: i32,
    pub max_data_items: i32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelDescribe {
    pub uris: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelMetadata {
    pub channels: Vec<ChannelMetadataRecord>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelData {
    pub data: Vec<DataItem>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelStreamingStart {
    pub channels: Vec<ChannelStreamingInfo>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelStreamingStop {
    pub channels: Vec<ChannelId>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelRemove {
    pub channel_id: ChannelId,
    pub remove_reason: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelRangeRequest {
    pub channel_ranges: Vec<ChannelRangeInfo>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelStatusChange {
    pub channel_id: ChannelId,
    pub status: ChannelStatus,
}

message_bodies!(Protocol::ChannelStreaming;
    Start = 0,
    ChannelDescribe = 1,
    ChannelMetadata = 2,
    ChannelData = 3,
    ChannelStreamingStart = 4,
    ChannelStreamingStop = 5,
    ChannelRemove = 8,
    ChannelRangeRequest = 9,
    ChannelStatusChange = 10,
);
