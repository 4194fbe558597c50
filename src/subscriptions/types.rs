//! Subscription types for channel streaming and object notifications.

use crate::messages::{v11, v12};
use crate::model::ObjectEvent;
use crate::types::{ActiveStatus, ChannelId, ContextScope, DataItem, EtpVersion, IndexValue, SessionId};
use crate::uri::EtpUri;
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

/// A URI plus the scope and depth to walk from it.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionInfo {
    pub uri: EtpUri,
    pub scope: ContextScope,
    pub depth: u32,
}

impl SubscriptionInfo {
    pub fn new(uri: EtpUri, scope: ContextScope, depth: u32) -> Self {
        Self { uri, scope, depth }
    }

    /// Only what the URI itself names.
    pub fn self_only(uri: EtpUri) -> Self {
        Self::new(uri, ContextScope::SelfOnly, 0)
    }
}

/// Per-session settings of a channel subscription.
#[derive(Clone, Debug)]
pub struct ChannelSubscriptionOptions {
    /// Wire version callbacks are translated into.
    pub version: EtpVersion,

    /// Max data items per callback invocation.
    /// Default: 10000
    pub max_data_items: usize,

    /// Minimum interval between data messages the customer asked for.
    pub max_message_interval: Duration,

    /// Max points a stream may reach back when started.
    /// Default: 1000
    pub max_index_count: usize,

    /// Every channel in scope streams as soon as it is in scope, and explicit
    /// per-channel requests are denied.
    pub bulk_mode: bool,
}

impl Default for ChannelSubscriptionOptions {
    fn default() -> Self {
        Self {
            version: EtpVersion::V12,
            max_data_items: 10_000,
            max_message_interval: Duration::ZERO,
            max_index_count: 1_000,
            bulk_mode: false,
        }
    }
}

/// Where a stream starts.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum StartIndex {
    /// Only data appended from now on.
    Latest,
    /// The last N points, then live data.
    IndexCount(usize),
    /// Points at or after this index, then live data.
    Index(IndexValue),
}

impl StartIndex {
    pub fn from_v11(start: v11::StreamingStartIndex, kind: crate::types::IndexKind) -> Self {
        match start {
            v11::StreamingStartIndex::Latest => StartIndex::Latest,
            v11::StreamingStartIndex::IndexCount(n) => StartIndex::IndexCount(n.max(0) as usize),
            v11::StreamingStartIndex::IndexValue(v) => {
                StartIndex::Index(IndexValue::from_scaled(kind, v))
            }
        }
    }

    pub fn from_v12(info: &v12::ChannelSubscribeInfo) -> Self {
        match (info.start_index, info.request_latest_index_count) {
            (Some(index), _) => StartIndex::Index(index),
            (None, Some(count)) => StartIndex::IndexCount(count.max(0) as usize),
            (None, None) => StartIndex::Latest,
        }
    }
}

/// Streaming status of one channel for one session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamingStatus {
    /// In scope, not streaming.
    Stopped,
    Started,
    /// The channel was deleted while in scope.
    Closed,
}

/// Per (session, channel) state.
#[derive(Clone, Debug, PartialEq)]
pub struct ChannelStreamingState {
    pub status: StreamingStatus,
    pub receive_change_notification: bool,
    /// Low-water mark for live data and range queries.
    pub start_index: Option<IndexValue>,
    pub last_delivered: Option<IndexValue>,
}

impl ChannelStreamingState {
    pub fn stopped() -> Self {
        Self {
            status: StreamingStatus::Stopped,
            receive_change_notification: false,
            start_index: None,
            last_delivered: None,
        }
    }
}

/// Classification of channel ids against one session's subscription.
///
/// The four sets are disjoint and together hold every id asked about.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChannelPartition {
    pub started: BTreeSet<ChannelId>,
    pub stopped: BTreeSet<ChannelId>,
    pub closed: BTreeSet<ChannelId>,
    pub invalid: BTreeSet<ChannelId>,
}

/// Which partition an id fell into.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PartitionKind {
    Started,
    Stopped,
    Closed,
    Invalid,
}

impl ChannelPartition {
    pub fn insert(&mut self, id: ChannelId, kind: PartitionKind) {
        match kind {
            PartitionKind::Started => self.started.insert(id),
            PartitionKind::Stopped => self.stopped.insert(id),
            PartitionKind::Closed => self.closed.insert(id),
            PartitionKind::Invalid => self.invalid.insert(id),
        };
    }

    pub fn kind_of(&self, id: ChannelId) -> Option<PartitionKind> {
        if self.started.contains(&id) {
            Some(PartitionKind::Started)
        } else if self.stopped.contains(&id) {
            Some(PartitionKind::Stopped)
        } else if self.closed.contains(&id) {
            Some(PartitionKind::Closed)
        } else if self.invalid.contains(&id) {
            Some(PartitionKind::Invalid)
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.started.len() + self.stopped.len() + self.closed.len() + self.invalid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids that can be read from: started or stopped.
    pub fn usable(&self) -> impl Iterator<Item = ChannelId> + '_ {
        self.started.iter().chain(self.stopped.iter()).copied()
    }

    /// True when nothing asked about can be read from.
    pub fn none_usable(&self) -> bool {
        self.started.is_empty() && self.stopped.is_empty()
    }
}

/// A range of one channel's data.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RangeQuery {
    pub channel_id: ChannelId,
    pub start: IndexValue,
    pub end: IndexValue,
}

/// Channel metadata in the session's wire version.
#[derive(Clone, Debug, PartialEq)]
pub enum ChannelMetadata {
    V11(v11::ChannelMetadataRecord),
    V12(v12::ChannelMetadataRecord),
}

impl ChannelMetadata {
    pub fn channel_id(&self) -> ChannelId {
        match self {
            ChannelMetadata::V11(record) => record.channel_id,
            ChannelMetadata::V12(record) => record.id,
        }
    }

    pub fn uri(&self) -> &str {
        match self {
            ChannelMetadata::V11(record) => &record.channel_uri,
            ChannelMetadata::V12(record) => &record.uri,
        }
    }

    pub fn into_v11(self) -> Option<v11::ChannelMetadataRecord> {
        match self {
            ChannelMetadata::V11(record) => Some(record),
            ChannelMetadata::V12(_) => None,
        }
    }

    pub fn into_v12(self) -> Option<v12::ChannelMetadataRecord> {
        match self {
            ChannelMetadata::V12(record) => Some(record),
            ChannelMetadata::V11(_) => None,
        }
    }
}

/// A batch of data items in the session's wire version.
#[derive(Clone, Debug, PartialEq)]
pub enum ChannelDataBatch {
    V11(Vec<v11::DataItem>),
    V12(Vec<v12::DataItem>),
}

impl ChannelDataBatch {
    pub fn from_items(version: EtpVersion, items: &[DataItem]) -> Self {
        match version {
            EtpVersion::V11 => ChannelDataBatch::V11(items.iter().map(Into::into).collect()),
            EtpVersion::V12 => ChannelDataBatch::V12(items.iter().map(Into::into).collect()),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ChannelDataBatch::V11(items) => items.len(),
            ChannelDataBatch::V12(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

type MetadataCallback = Box<dyn Fn(SessionId, &ChannelMetadata) + Send + Sync>;
type ChannelCallback = Box<dyn Fn(SessionId, ChannelId) + Send + Sync>;
type StatusCallback = Box<dyn Fn(SessionId, ChannelId, ActiveStatus) + Send + Sync>;
type DataCallback = Box<dyn Fn(SessionId, ChannelDataBatch) + Send + Sync>;
type EndedCallback = Box<dyn Fn(SessionId, &str) + Send + Sync>;

/// What a session wants to hear about its channels.
///
/// Every callback is optional and runs with the subscription lock held, so
/// it must not call back into the manager.
#[derive(Default)]
pub struct ChannelStreamingCallbacks {
    pub on_channel_created: Option<MetadataCallback>,
    pub on_channel_joined: Option<MetadataCallback>,
    pub on_channel_unjoined: Option<ChannelCallback>,
    pub on_channel_deleted: Option<ChannelCallback>,
    pub on_active_status_changed: Option<StatusCallback>,
    pub on_data_appended: Option<DataCallback>,
    pub on_subscription_ended: Option<EndedCallback>,
}

impl ChannelStreamingCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn channel_created(mut self, f: impl Fn(SessionId, &ChannelMetadata) + Send + Sync + 'static) -> Self {
        self.on_channel_created = Some(Box::new(f));
        self
    }

    pub fn channel_joined(mut self, f: impl Fn(SessionId, &ChannelMetadata) + Send + Sync + 'static) -> Self {
        self.on_channel_joined = Some(Box::new(f));
        self
    }

    pub fn channel_unjoined(mut self, f: impl Fn(SessionId, ChannelId) + Send + Sync + 'static) -> Self {
        self.on_channel_unjoined = Some(Box::new(f));
        self
    }

    pub fn channel_deleted(mut self, f: impl Fn(SessionId, ChannelId) + Send + Sync + 'static) -> Self {
        self.on_channel_deleted = Some(Box::new(f));
        self
    }

    pub fn active_status_changed(
        mut self,
        f: impl Fn(SessionId, ChannelId, ActiveStatus) + Send + Sync + 'static,
    ) -> Self {
        self.on_active_status_changed = Some(Box::new(f));
        self
    }

    pub fn data_appended(mut self, f: impl Fn(SessionId, ChannelDataBatch) + Send + Sync + 'static) -> Self {
        self.on_data_appended = Some(Box::new(f));
        self
    }

    pub fn subscription_ended(mut self, f: impl Fn(SessionId, &str) + Send + Sync + 'static) -> Self {
        self.on_subscription_ended = Some(Box::new(f));
        self
    }
}

impl fmt::Debug for ChannelStreamingCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelStreamingCallbacks")
            .field("on_channel_created", &self.on_channel_created.is_some())
            .field("on_channel_joined", &self.on_channel_joined.is_some())
            .field("on_channel_unjoined", &self.on_channel_unjoined.is_some())
            .field("on_channel_deleted", &self.on_channel_deleted.is_some())
            .field("on_active_status_changed", &self.on_active_status_changed.is_some())
            .field("on_data_appended", &self.on_data_appended.is_some())
            .field("on_subscription_ended", &self.on_subscription_ended.is_some())
            .finish()
    }
}

/// Receives object events matching a notification subscription.
pub type NotificationCallback = Box<dyn Fn(SessionId, &ObjectEvent) + Send + Sync>;
