//! ChannelStreaming 1.2 producer events: streaming every channel the store has.

use super::{global_scope, log_send};
use crate::config::DevKitConfig;
use crate::error::{ErrorCode, ErrorInfo, EtpError};
use crate::messages::v12::{ChannelMetadataRecord, StartStreaming, StopStreaming};
use crate::protocol::channel_streaming_v12::{StreamingProducerEvents, StreamingProducerSender};
use crate::protocol::RequestArgs;
use crate::subscriptions::{
    ChannelDataBatch, ChannelStreamingCallbacks, ChannelSubscriptionOptions, SubscriptionManager,
};
use crate::types::EtpVersion;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Producer events of a 1.2 session.
///
/// `StartStreaming` subscribes the session to the global scope in bulk mode,
/// so every channel streams from its latest index and new channels join as
/// they appear.
pub struct StreamingStoreV12 {
    manager: Arc<SubscriptionManager>,
    config: Arc<DevKitConfig>,
}

impl StreamingStoreV12 {
    pub fn new(manager: Arc<SubscriptionManager>, config: Arc<DevKitConfig>) -> Self {
        Self { manager, config }
    }
}

fn callbacks(sender: &StreamingProducerSender) -> ChannelStreamingCallbacks {
    let created = sender.clone();
    let joined = sender.clone();
    let data = sender.clone();

    ChannelStreamingCallbacks::new()
        .channel_created(move |session, metadata| {
            if let Some(record) = metadata.clone().into_v12() {
                log_send(session, "ChannelMetadata", created.send_channel_metadata(vec![record]));
            }
        })
        .channel_joined(move |session, metadata| {
            if let Some(record) = metadata.clone().into_v12() {
                log_send(session, "ChannelMetadata", joined.send_channel_metadata(vec![record]));
            }
        })
        .channel_deleted(|session, id| {
            debug!(session = %session, channel = %id, "streamed channel deleted");
        })
        .data_appended(move |session, batch| {
            if let ChannelDataBatch::V12(items) = batch {
                log_send(session, "ChannelData", data.send_channel_data(items));
            }
        })
}

impl StreamingProducerEvents for StreamingStoreV12 {
    fn on_start_streaming(&mut self, sender: &StreamingProducerSender, args: &mut RequestArgs<StartStreaming>) {
        let session = sender.session_id();
        let options = ChannelSubscriptionOptions {
            version: EtpVersion::V12,
            max_data_items: sender.consumer_max_data_item_count(),
            max_message_interval: Duration::ZERO,
            max_index_count: sender.context().counterpart_max_index_count(),
            bulk_mode: true,
        };
        let info = global_scope(&self.config);

        let result = self.manager.execute_with_lock(|engine| {
            if !engine.start_channel_subscription(session, options, callbacks(sender)) {
                return Err(EtpError::InvalidState(
                    "session already subscribes to individual channels".to_string(),
                ));
            }
            let added = engine.add_channel_subscription_channel_scope(session, info)?;
            let records: Vec<ChannelMetadataRecord> = added.into_iter().filter_map(|m| m.into_v12()).collect();
            let count = records.len();
            if !records.is_empty() {
                log_send(session, "ChannelMetadata", sender.send_channel_metadata(records));
            }
            Ok(count)
        });

        match result {
            Ok(count) => info!(session = %session, channels = count, "streaming started"),
            Err(e) => args.final_error = Some(e.to_error_info()),
        }
    }

    fn on_stop_streaming(&mut self, sender: &StreamingProducerSender, args: &mut RequestArgs<StopStreaming>) {
        let session = sender.session_id();
        let stopped = self.manager.execute_with_lock(|engine| {
            let streaming = engine
                .channel_subscription_options(session)
                .map_or(false, |options| options.bulk_mode);
            streaming && engine.stop_channel_subscription(session, "streaming stopped")
        });
        if stopped {
            info!(session = %session, "streaming stopped");
        } else {
            args.final_error = Some(ErrorInfo::new(ErrorCode::InvalidState, "not streaming"));
        }
    }
}
