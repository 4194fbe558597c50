//! Channel subscription engine.
//!
//! Tracks, per session:
//! - the scopes it subscribed to and the channels they cover
//! - each channel's streaming state (stopped, started, closed)
//! - object notification subscriptions
//!
//! Every operation and every domain mutation runs under one lock held by
//! [`SubscriptionManager`]. Mutating the domain through the engine fans the
//! change out to every session whose scope covers it, in the session's wire
//! version, before the lock is released.
//!
//! # Example
//!
//! ```ignore
//! let manager = SubscriptionManager::default();
//! manager.start_channel_subscription(session, options, callbacks);
//!
//! let info = SubscriptionInfo::new(EtpUri::parse("eml://witsml20/Well")?, ContextScope::SourcesOrSelf, 8);
//! let added = manager.add_channel_subscription_channel_scope(session, info)?;
//!
//! let partition = manager.validate_channel_ids(session, ids);
//! for id in partition.stopped {
//!     manager.start_channel_streaming(session, id, false, StartIndex::Latest);
//! }
//! ```

mod engine;
mod manager;
mod types;

pub use engine::SubscriptionEngine;
pub(crate) use engine::channel_metadata;
pub use manager::SubscriptionManager;
pub use types::{
    ChannelDataBatch, ChannelMetadata, ChannelPartition, ChannelStreamingCallbacks,
    ChannelStreamingState, ChannelSubscriptionOptions, NotificationCallback, PartitionKind,
    RangeQuery, StartIndex, StreamingStatus, SubscriptionInfo,
};
