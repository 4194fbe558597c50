//! The DevKit store: store-role handlers wired to the subscription engine.
//!
//! A [`DevKitStore`] owns the shared [`SubscriptionManager`] and attaches the
//! handlers matching a session's ETP version:
//!
//! - 1.1: ChannelStreaming producer
//! - 1.2: ChannelStreaming producer and ChannelSubscribe store
//!
//! Each handler's events translate requests into engine operations under the
//! manager lock, and the engine's callbacks push notifications and data back
//! through the handler's sender.
//!
//! # Example
//!
//! ```ignore
//! let store = DevKitStore::new(DevKitConfig::default(), model);
//! let (server_end, client_end) = memory_pair();
//! let session = store.accept(server_end.transport.clone())?;
//! let driver = SessionDriver::spawn(session, server_end.inbox);
//! ```

mod streaming_v11;
mod streaming_v12;
mod subscribe;

use crate::config::DevKitConfig;
use crate::error::{ErrorCode, ErrorInfo, Result};
use crate::model::DomainModel;
use crate::protocol::channel_streaming_v11::ChannelStreamingProducer;
use crate::protocol::channel_streaming_v12::StreamingProducer;
use crate::protocol::channel_subscribe::ChannelSubscribeStore;
use crate::session::{Session, Transport};
use crate::subscriptions::{ChannelPartition, PartitionKind, SubscriptionInfo, SubscriptionManager};
use crate::types::{ChannelId, EtpVersion, SessionId};
use crate::uri::EtpUri;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub use streaming_v11::StreamingStoreV11;
pub use streaming_v12::StreamingStoreV12;
pub use subscribe::SubscribeStore;

/// Store side of the DevKit.
pub struct DevKitStore {
    config: Arc<DevKitConfig>,
    manager: Arc<SubscriptionManager>,
}

impl DevKitStore {
    pub fn new(config: DevKitConfig, model: DomainModel) -> Self {
        Self::with_manager(config, Arc::new(SubscriptionManager::new(model)))
    }

    /// Share an existing manager, e.g. between stores with different settings.
    pub fn with_manager(config: DevKitConfig, manager: Arc<SubscriptionManager>) -> Self {
        Self {
            config: Arc::new(config),
            manager,
        }
    }

    pub fn config(&self) -> &DevKitConfig {
        &self.config
    }

    pub fn manager(&self) -> Arc<SubscriptionManager> {
        Arc::clone(&self.manager)
    }

    /// A server session with the store handlers already attached.
    pub fn accept(&self, transport: Arc<dyn Transport>) -> Result<Session> {
        let mut session = Session::server(self.config.session.clone(), transport);
        self.attach(&mut session)?;
        Ok(session)
    }

    /// Register the store handlers for the session's version and release the
    /// session's subscriptions when it closes.
    pub fn attach(&self, session: &mut Session) -> Result<()> {
        let context = session.context();
        let capabilities = &self.config.capabilities;
        match session.version() {
            EtpVersion::V11 => {
                let events = StreamingStoreV11::new(self.manager(), Arc::clone(&self.config));
                session.register_handler(Box::new(ChannelStreamingProducer::new(
                    context,
                    capabilities,
                    Some(Box::new(events)),
                )))?;
            }
            EtpVersion::V12 => {
                let streaming = StreamingStoreV12::new(self.manager(), Arc::clone(&self.config));
                session.register_handler(Box::new(StreamingProducer::new(
                    Arc::clone(&context),
                    capabilities,
                    Some(Box::new(streaming)),
                )))?;
                let subscribe = SubscribeStore::new(self.manager());
                session.register_handler(Box::new(ChannelSubscribeStore::new(
                    context,
                    capabilities,
                    Some(Box::new(subscribe)),
                )))?;
            }
        }
        session.add_observer(self.manager());
        info!(
            version = %session.version(),
            simple_streamer = self.config.simple_streamer,
            "store handlers attached"
        );
        Ok(())
    }
}

/// Scope covering every channel the store knows, used by bulk streaming.
pub(crate) fn global_scope(config: &DevKitConfig) -> SubscriptionInfo {
    SubscriptionInfo::new(EtpUri::root(), config.describe_scope, config.describe_depth)
}

/// Error for a request none of whose channels can be used.
///
/// `ENOT_FOUND` when at least one channel was closed, otherwise
/// `EINVALID_CHANNELID`. `None` when some channel is usable.
pub(crate) fn whole_request_error(partition: &ChannelPartition) -> Option<ErrorInfo> {
    if partition.is_empty() || !partition.none_usable() {
        return None;
    }
    if !partition.closed.is_empty() {
        Some(ErrorInfo::new(ErrorCode::NotFound, "every requested channel is closed or unknown"))
    } else {
        Some(ErrorInfo::new(ErrorCode::InvalidChannelId, "no requested channel is known"))
    }
}

/// Per-channel error for closed or unknown channels.
pub(crate) fn channel_error(partition: &ChannelPartition, id: ChannelId) -> Option<ErrorInfo> {
    match partition.kind_of(id) {
        Some(PartitionKind::Closed) => Some(ErrorInfo::new(
            ErrorCode::NotFound,
            format!("channel {} is closed", id),
        )),
        Some(PartitionKind::Invalid) | None => Some(ErrorInfo::new(
            ErrorCode::InvalidChannelId,
            format!("channel {} is not in this session's subscription", id),
        )),
        _ => None,
    }
}

pub(crate) fn denied_in_simple_streamer() -> ErrorInfo {
    ErrorInfo::new(
        ErrorCode::RequestDenied,
        "requests are not accepted while acting as a simple streamer",
    )
}

/// Interval between messages for a rate in messages per second.
pub(crate) fn message_interval(max_message_rate: i32) -> Duration {
    if max_message_rate > 0 {
        Duration::from_millis(1_000 / max_message_rate as u64)
    } else {
        Duration::ZERO
    }
}

/// Log a send made from inside an engine callback. The session may already be
/// gone; teardown releases its subscription right after.
pub(crate) fn log_send<T>(session: SessionId, what: &'static str, result: Result<T>) {
    if let Err(e) = result {
        debug!(session = %session, message = what, error = %e, "notification not sent");
    }
}
