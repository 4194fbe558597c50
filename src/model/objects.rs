//! Data objects and growing channels.

use crate::error::{EtpError, Result};
use crate::messages::{v11, v12};
use crate::types::{
    ActiveStatus, ChannelId, DataItem, DataValue, IndexDirection, IndexKind, IndexValue,
    Timestamp, Uuid, DEPTH_SCALE,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Source string reported in channel metadata.
pub const CHANNEL_SOURCE: &str = "ETP DevKit";

/// Object types known to the model.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    Well,
    Wellbore,
    ChannelSet,
    Channel,
}

impl ObjectKind {
    /// Type name used in URI segments.
    pub fn type_name(self) -> &'static str {
        match self {
            ObjectKind::Well => "Well",
            ObjectKind::Wellbore => "Wellbore",
            ObjectKind::ChannelSet => "ChannelSet",
            ObjectKind::Channel => "Channel",
        }
    }

    pub fn from_type_name(name: &str) -> Option<Self> {
        match name {
            "Well" => Some(ObjectKind::Well),
            "Wellbore" => Some(ObjectKind::Wellbore),
            "ChannelSet" => Some(ObjectKind::ChannelSet),
            "Channel" => Some(ObjectKind::Channel),
            _ => None,
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// Appendable data of a channel.
#[derive(Clone, Debug)]
pub struct GrowingChannel {
    pub id: ChannelId,
    pub mnemonic: String,
    pub uom: String,
    pub data_type: String,
    pub index_kind: IndexKind,
    points: Vec<DataItem>,
}

impl GrowingChannel {
    pub fn new(
        id: ChannelId,
        mnemonic: impl Into<String>,
        uom: impl Into<String>,
        data_type: impl Into<String>,
        index_kind: IndexKind,
    ) -> Self {
        Self {
            id,
            mnemonic: mnemonic.into(),
            uom: uom.into(),
            data_type: data_type.into(),
            index_kind,
            points: Vec::new(),
        }
    }

    pub fn index_uom(&self) -> &'static str {
        match self.index_kind {
            IndexKind::Time => "us",
            IndexKind::Depth => "m",
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn first_index(&self) -> Option<IndexValue> {
        self.points.first().map(|p| p.index)
    }

    pub fn last_index(&self) -> Option<IndexValue> {
        self.points.last().map(|p| p.index)
    }

    /// Append one point. Indexes must be of the channel's kind, finite and
    /// strictly increasing.
    pub fn append(&mut self, index: IndexValue, value: DataValue, value_valid: bool) -> Result<DataItem> {
        if index.kind() != self.index_kind {
            return Err(EtpError::InvalidArgument(format!(
                "channel {} is {:?} indexed",
                self.id, self.index_kind
            )));
        }
        if let IndexValue::Depth(depth) = index {
            if !depth.is_finite() {
                return Err(EtpError::InvalidArgument(format!(
                    "depth index {} is not finite on channel {}",
                    depth, self.id
                )));
            }
        }
        if let Some(last) = self.last_index() {
            if index <= last {
                return Err(EtpError::InvalidArgument(format!(
                    "index {:?} does not follow {:?} on channel {}",
                    index, last, self.id
                )));
            }
        }
        let item = DataItem {
            channel_id: self.id,
            index,
            value,
            value_valid,
        };
        self.points.push(item.clone());
        Ok(item)
    }

    pub fn points(&self) -> &[DataItem] {
        &self.points
    }

    /// Points with `start <= index <= end`.
    pub fn range(&self, start: IndexValue, end: IndexValue) -> impl Iterator<Item = &DataItem> + '_ {
        let from = self.points.partition_point(|p| p.index < start);
        self.points[from..]
            .iter()
            .take_while(move |p| p.index <= end)
    }

    /// Points with `index >= start`.
    pub fn from_index(&self, start: IndexValue) -> &[DataItem] {
        let from = self.points.partition_point(|p| p.index < start);
        &self.points[from..]
    }

    /// The last `count` points.
    pub fn latest(&self, count: usize) -> &[DataItem] {
        let from = self.points.len().saturating_sub(count);
        &self.points[from..]
    }
}

/// One object in the domain graph.
#[derive(Clone, Debug)]
pub struct DataObject {
    pub uuid: Uuid,
    pub kind: ObjectKind,
    pub name: String,
    /// Containing object; `None` for top-level objects.
    pub parent: Option<Uuid>,
    /// Additional containers this object was joined to.
    pub joined: BTreeSet<Uuid>,
    pub active_status: ActiveStatus,
    pub deleted: bool,
    pub last_update: Timestamp,
    pub channel: Option<GrowingChannel>,
}

impl DataObject {
    pub fn new(kind: ObjectKind, name: impl Into<String>, parent: Option<Uuid>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            kind,
            name: name.into(),
            parent,
            joined: BTreeSet::new(),
            active_status: ActiveStatus::Active,
            deleted: false,
            last_update: Timestamp::now(),
            channel: None,
        }
    }

    /// Objects this one refers to: its parent and joined containers.
    pub fn targets(&self) -> impl Iterator<Item = Uuid> + '_ {
        self.parent.into_iter().chain(self.joined.iter().copied())
    }

    pub fn refers_to(&self, other: Uuid) -> bool {
        self.parent == Some(other) || self.joined.contains(&other)
    }

    pub fn channel_id(&self) -> Option<ChannelId> {
        self.channel.as_ref().map(|c| c.id)
    }

    /// v1.1 metadata record. `None` for objects that are not channels.
    pub fn metadata_v11(&self, uri: &str) -> Option<v11::ChannelMetadataRecord> {
        let channel = self.channel.as_ref()?;
        let status = if self.deleted {
            v11::ChannelStatus::Closed
        } else {
            match self.active_status {
                ActiveStatus::Active => v11::ChannelStatus::Active,
                ActiveStatus::Inactive => v11::ChannelStatus::Inactive,
            }
        };
        let scale = match channel.index_kind {
            IndexKind::Time => 0,
            IndexKind::Depth => DEPTH_SCALE,
        };

        Some(v11::ChannelMetadataRecord {
            channel_uri: uri.to_string(),
            channel_id: channel.id,
            indexes: vec![v11::IndexMetadataRecord {
                index_type: channel.index_kind,
                uom: channel.index_uom().to_string(),
                direction: IndexDirection::Increasing,
                mnemonic: index_mnemonic(channel.index_kind).to_string(),
                scale,
            }],
            channel_name: channel.mnemonic.clone(),
            data_type: channel.data_type.clone(),
            uom: channel.uom.clone(),
            start_index: channel.first_index().map(|i| i.to_scaled()),
            end_index: channel.last_index().map(|i| i.to_scaled()),
            description: self.name.clone(),
            status,
            source: CHANNEL_SOURCE.to_string(),
            measure_class: String::new(),
            uuid: self.uuid.to_string(),
        })
    }

    /// v1.2 metadata record. `None` for objects that are not channels.
    pub fn metadata_v12(&self, uri: &str) -> Option<v12::ChannelMetadataRecord> {
        let channel = self.channel.as_ref()?;
        let interval = match (channel.first_index(), channel.last_index()) {
            (Some(start_index), Some(end_index)) => Some(v12::IndexInterval {
                start_index,
                end_index,
                uom: channel.index_uom().to_string(),
            }),
            _ => None,
        };

        Some(v12::ChannelMetadataRecord {
            uri: uri.to_string(),
            id: channel.id,
            indexes: vec![v12::IndexMetadataRecord {
                index_kind: channel.index_kind,
                interval,
                direction: IndexDirection::Increasing,
                name: index_mnemonic(channel.index_kind).to_string(),
                uom: channel.index_uom().to_string(),
            }],
            channel_name: channel.mnemonic.clone(),
            data_type: channel.data_type.clone(),
            uom: channel.uom.clone(),
            status: self.active_status,
            source: CHANNEL_SOURCE.to_string(),
            measure_class: String::new(),
            uuid: self.uuid,
        })
    }
}

fn index_mnemonic(kind: IndexKind) -> &'static str {
    match kind {
        IndexKind::Time => "Time",
        IndexKind::Depth => "Depth",
    }
}
