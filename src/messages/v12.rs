//! ETP 1.2 ChannelStreaming (protocol 1) and ChannelSubscribe (protocol 21) bodies.

use super::message_bodies;
use crate::types::{
    ActiveStatus, ChannelId, DataValue, IndexDirection, IndexKind, IndexValue, Protocol, Uuid,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexInterval {
    pub start_index: IndexValue,
    pub end_index: IndexValue,
    pub uom: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexMetadataRecord {
    pub index_kind: IndexKind,
    pub interval: Option<IndexInterval>,
    pub direction: IndexDirection,
    pub name: String,
    pub uom: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelMetadataRecord {
    pub uri: String,
    pub id: ChannelId,
    pub indexes: Vec<IndexMetadataRecord>,
    pub channel_name: String,
    pub data_type: String,
    pub uom: String,
    pub status: ActiveStatus,
    pub source: String,
    pub measure_class: String,
    pub uuid: Uuid,
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
    pub channel_id: ChannelId,
    pub indexes: Vec<IndexValue>,
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
            channel_id: item.channel_id,
            indexes: vec![item.index],
            value: item.value.clone(),
            value_attributes,
        }
    }
}

impl DataItem {
    pub fn to_item(&self) -> Option<crate::types::DataItem> {
        let index = *self.indexes.first()?;
        let value_valid = !self.value_attributes.iter().any(|a| {
            a.attribute_id == VALUE_VALID_ATTRIBUTE && a.attribute_value == DataValue::Boolean(false)
        });
        Some(crate::types::DataItem {
            channel_id: self.channel_id,
            index,
            value: self.value.clone(),
            value_valid,
        })
    }
}

// --- ChannelStreaming ---

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelMetadata {
    pub channels: Vec<ChannelMetadataRecord>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelData {
    pub data: Vec<DataItem>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
pub struct StartStreaming {}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
pub struct StopStreaming {}

message_bodies!(Protocol::ChannelStreaming;
    ChannelMetadata = 1,
    ChannelData = 2,
    StartStreaming = 3,
    StopStreaming = 4,
);

// --- ChannelSubscribe ---

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelSubscribeInfo {
    pub channel_id: ChannelId,
    pub start_index: Option<IndexValue>,
    pub data_changes: bool,
    pub request_latest_index_count: Option<i32>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelRangeInfo {
    pub channel_ids: Vec<ChannelId>,
    pub interval: IndexInterval,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GetChannelMetadata {
    pub uris: BTreeMap<String, String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
pub struct GetChannelMetadataResponse {
    pub metadata: BTreeMap<String, ChannelMetadataRecord>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubscribeChannels {
    pub channels: BTreeMap<String, ChannelSubscribeInfo>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
pub struct SubscribeChannelsResponse {
    pub success: BTreeMap<String, String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionChannelData {
    pub data: Vec<DataItem>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UnsubscribeChannels {
    pub channel_ids: BTreeMap<String, ChannelId>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
pub struct SubscriptionsStopped {
    pub reason: String,
    pub channel_ids: BTreeMap<String, ChannelId>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GetRanges {
    pub request_uuid: Uuid,
    pub channel_ranges: Vec<ChannelRangeInfo>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
pub struct GetRangesResponse {
    pub data: Vec<DataItem>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CancelGetRanges {
    pub request_uuid: Uuid,
}

message_bodies!(Protocol::ChannelSubscribe;
    GetChannelMetadata = 1,
    GetChannelMetadataResponse = 2,
    SubscribeChannels = 3,
    SubscriptionChannelData = 4,
    UnsubscribeChannels = 7,
    SubscriptionsStopped = 8,
    GetRanges = 9,
    GetRangesResponse = 10,
    CancelGetRanges = 11,
    SubscribeChannelsResponse = 12,
);
