//! ChannelStreaming 1.1 producer events backed by the subscription engine.

use super::{channel_error, denied_in_simple_streamer, global_scope, log_send, message_interval, whole_request_error};
use crate::config::DevKitConfig;
use crate::error::{ErrorCode, ErrorInfo};
use crate::messages::v11::{
    ChannelDescribe, ChannelMetadataRecord, ChannelRangeRequest, ChannelStatus,
    ChannelStreamingStart, ChannelStreamingStop, DataItem, Start,
};
use crate::protocol::channel_streaming_v11::{ChannelStreamingProducerEvents, ChannelStreamingProducerSender};
use crate::protocol::{ListRequestArgs, RequestArgs};
use crate::subscriptions::{
    channel_metadata, ChannelDataBatch, ChannelStreamingCallbacks, ChannelSubscriptionOptions,
    PartitionKind, RangeQuery, StartIndex, SubscriptionInfo, SubscriptionManager,
};
use crate::types::{ActiveStatus, EtpVersion, IndexValue};
use crate::uri::EtpUri;
use std::sync::Arc;
use tracing::debug;

/// Producer events of a 1.1 session.
pub struct StreamingStoreV11 {
    manager: Arc<SubscriptionManager>,
    config: Arc<DevKitConfig>,
}

impl StreamingStoreV11 {
    pub fn new(manager: Arc<SubscriptionManager>, config: Arc<DevKitConfig>) -> Self {
        Self { manager, config }
    }

    fn simple_streamer(&self) -> bool {
        self.config.simple_streamer
    }
}

/// Engine callbacks translated into 1.1 producer messages.
fn callbacks(sender: &ChannelStreamingProducerSender) -> ChannelStreamingCallbacks {
    let created = sender.clone();
    let joined = sender.clone();
    let unjoined = sender.clone();
    let deleted = sender.clone();
    let status = sender.clone();
    let data = sender.clone();

    ChannelStreamingCallbacks::new()
        .channel_created(move |session, metadata| {
            if let Some(record) = metadata.clone().into_v11() {
                log_send(session, "ChannelMetadata", created.send_channel_metadata(vec![record]));
            }
        })
        .channel_joined(move |session, metadata| {
            if let Some(record) = metadata.clone().into_v11() {
                log_send(session, "ChannelMetadata", joined.send_channel_metadata(vec![record]));
            }
        })
        .channel_unjoined(move |session, id| {
            log_send(session, "ChannelRemove", unjoined.send_channel_remove(id, Some("unjoined")));
        })
        .channel_deleted(move |session, id| {
            log_send(session, "ChannelRemove", deleted.send_channel_remove(id, Some("deleted")));
        })
        .active_status_changed(move |session, id, active| {
            let channel_status = match active {
                ActiveStatus::Active => ChannelStatus::Active,
                ActiveStatus::Inactive => ChannelStatus::Inactive,
            };
            log_send(
                session,
                "ChannelStatusChange",
                status.send_channel_status_change(id, channel_status),
            );
        })
        .data_appended(move |session, batch| {
            if let ChannelDataBatch::V11(items) = batch {
                log_send(session, "ChannelData", data.send_channel_data(items));
            }
        })
        .subscription_ended(|session, reason| {
            debug!(session = %session, reason, "1.1 channel subscription ended");
        })
}

impl ChannelStreamingProducerEvents for StreamingStoreV11 {
    fn on_start(&mut self, sender: &ChannelStreamingProducerSender, args: &mut RequestArgs<Start>) {
        let session = sender.session_id();
        let options = ChannelSubscriptionOptions {
            version: EtpVersion::V11,
            max_data_items: sender.consumer_max_data_item_count(),
            max_message_interval: message_interval(args.request.max_message_rate),
            max_index_count: sender.consumer_max_index_count(),
            bulk_mode: self.simple_streamer(),
        };
        if !self
            .manager
            .start_channel_subscription(session, options, callbacks(sender))
        {
            args.final_error = Some(ErrorInfo::new(
                ErrorCode::InvalidState,
                "channel subscription already started in another mode",
            ));
            return;
        }
        if !self.simple_streamer() {
            return;
        }

        // Metadata goes out before any data can be appended to the new channels.
        let info = global_scope(&self.config);
        let result = self.manager.execute_with_lock(|engine| {
            let added = engine.add_channel_subscription_channel_scope(session, info)?;
            let records: Vec<ChannelMetadataRecord> = added.into_iter().filter_map(|m| m.into_v11()).collect();
            if !records.is_empty() {
                log_send(session, "ChannelMetadata", sender.send_channel_metadata(records));
            }
            Ok::<_, crate::error::EtpError>(())
        });
        if let Err(e) = result {
            args.final_error = Some(e.to_error_info());
        }
    }

    fn on_channel_describe(
        &mut self,
        sender: &ChannelStreamingProducerSender,
        args: &mut ListRequestArgs<ChannelDescribe, ChannelMetadataRecord>,
    ) {
        if self.simple_streamer() {
            args.final_error = Some(denied_in_simple_streamer());
            return;
        }
        let session = sender.session_id();
        let (scope, depth) = (self.config.describe_scope, self.config.describe_depth);

        for uri in &args.request.uris {
            let parsed = match EtpUri::parse(uri) {
                Ok(parsed) => parsed,
                Err(e) => {
                    args.errors.insert(uri.clone(), e.to_error_info());
                    continue;
                }
            };
            let info = SubscriptionInfo::new(parsed.clone(), scope, depth);
            let described = self.manager.execute_with_lock(|engine| {
                engine.add_channel_subscription_channel_scope(session, info)?;
                let ids = engine.model().channels_in_scope(&parsed, scope, depth)?;
                Ok::<_, crate::error::EtpError>(
                    ids.into_iter()
                        .filter_map(|id| channel_metadata(engine.model(), EtpVersion::V11, id))
                        .filter_map(|m| m.into_v11())
                        .collect::<Vec<_>>(),
                )
            });
            match described {
                Ok(records) => {
                    for record in records {
                        if !args.response.iter().any(|r| r.channel_id == record.channel_id) {
                            args.response.push(record);
                        }
                    }
                }
                Err(e) => {
                    args.errors.insert(uri.clone(), e.to_error_info());
                }
            }
        }
        debug!(
            session = %session,
            uris = args.request.uris.len(),
            channels = args.response.len(),
            "channels described"
        );
    }

    fn on_channel_streaming_start(
        &mut self,
        sender: &ChannelStreamingProducerSender,
        args: &mut RequestArgs<ChannelStreamingStart>,
    ) {
        if self.simple_streamer() {
            args.final_error = Some(denied_in_simple_streamer());
            return;
        }
        let session = sender.session_id();
        let channels = &args.request.channels;

        let errors = self.manager.execute_with_lock(|engine| {
            let partition = engine.validate_channel_ids(session, channels.iter().map(|c| c.channel_id));
            if let Some(error) = whole_request_error(&partition) {
                return Err(error);
            }

            let mut errors = Vec::new();
            for info in channels {
                let id = info.channel_id;
                match partition.kind_of(id) {
                    Some(PartitionKind::Stopped) => {
                        let kind = engine
                            .model()
                            .channel(id)
                            .and_then(|o| o.channel.as_ref())
                            .map(|c| c.index_kind);
                        let started = kind.map_or(false, |kind| {
                            let start = StartIndex::from_v11(info.start_index, kind);
                            engine.start_channel_streaming(session, id, info.receive_change_notification, start)
                        });
                        if !started {
                            errors.push((id, ErrorInfo::new(ErrorCode::InvalidArgument, "cannot start channel")));
                        }
                    }
                    Some(PartitionKind::Started) => errors.push((
                        id,
                        ErrorInfo::new(ErrorCode::InvalidState, format!("channel {} is already streaming", id)),
                    )),
                    _ => {
                        if let Some(error) = channel_error(&partition, id) {
                            errors.push((id, error));
                        }
                    }
                }
            }
            Ok(errors)
        });

        match errors {
            Ok(errors) => args.errors.extend(errors.into_iter().map(|(id, e)| (id.to_string(), e))),
            Err(error) => args.final_error = Some(error),
        }
    }

    fn on_channel_streaming_stop(
        &mut self,
        sender: &ChannelStreamingProducerSender,
        args: &mut RequestArgs<ChannelStreamingStop>,
    ) {
        if self.simple_streamer() {
            args.final_error = Some(denied_in_simple_streamer());
            return;
        }
        let session = sender.session_id();
        let channels = &args.request.channels;

        let errors = self.manager.execute_with_lock(|engine| {
            let partition = engine.validate_channel_ids(session, channels.iter().copied());
            if let Some(error) = whole_request_error(&partition) {
                return Err(error);
            }
            let mut errors = Vec::new();
            for id in channels {
                match partition.kind_of(*id) {
                    Some(PartitionKind::Started) => {
                        engine.stop_channel_streaming(session, *id);
                    }
                    Some(PartitionKind::Stopped) => errors.push((
                        *id,
                        ErrorInfo::new(ErrorCode::InvalidState, format!("channel {} is not streaming", id)),
                    )),
                    _ => {
                        if let Some(error) = channel_error(&partition, *id) {
                            errors.push((*id, error));
                        }
                    }
                }
            }
            Ok(errors)
        });

        match errors {
            Ok(errors) => args.errors.extend(errors.into_iter().map(|(id, e)| (id.to_string(), e))),
            Err(error) => args.final_error = Some(error),
        }
    }

    fn on_channel_range_request(
        &mut self,
        sender: &ChannelStreamingProducerSender,
        args: &mut ListRequestArgs<ChannelRangeRequest, DataItem>,
    ) {
        if self.simple_streamer() {
            args.final_error = Some(denied_in_simple_streamer());
            return;
        }
        let session = sender.session_id();
        let ranges = &args.request.channel_ranges;

        let result = self.manager.execute_with_lock(|engine| {
            let ids = ranges.iter().flat_map(|r| r.channel_id.iter().copied());
            let partition = engine.validate_channel_ids(session, ids);
            if let Some(error) = whole_request_error(&partition) {
                return Err(error);
            }

            let mut errors = Vec::new();
            let mut queries = Vec::new();
            for range in ranges {
                for id in &range.channel_id {
                    if let Some(error) = channel_error(&partition, *id) {
                        errors.push((*id, error));
                        continue;
                    }
                    if let Some(growing) = engine.model().channel(*id).and_then(|o| o.channel.as_ref()) {
                        queries.push(RangeQuery {
                            channel_id: *id,
                            start: IndexValue::from_scaled(growing.index_kind, range.start_index),
                            end: IndexValue::from_scaled(growing.index_kind, range.end_index),
                        });
                    }
                }
            }
            let data: Vec<DataItem> = engine
                .get_channel_data_ranges(session, &queries)
                .map(DataItem::from)
                .collect();
            Ok((data, errors))
        });

        match result {
            Ok((data, errors)) => {
                args.response = data;
                args.errors.extend(errors.into_iter().map(|(id, e)| (id.to_string(), e)));
            }
            Err(error) => args.final_error = Some(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChannelSpec, ObjectSpec};
    use crate::protocol::channel_streaming_v11::ChannelStreamingProducer;
    use crate::protocol::testing::{drain, inbound, open_context};
    use crate::protocol::{Capabilities, ProtocolHandler};
    use crate::config::CapabilityConfig;
    use crate::messages::v11::{ChannelData, ChannelMetadata, ChannelRemove, ChannelStreamingInfo, StreamingStartIndex};
    use crate::messages::core::ProtocolException;
    use crate::messages::{MessageBody, MessageFlags};
    use crate::types::{ChannelId, DataValue, IndexKind};

    fn setup(simple_streamer: bool) -> (ChannelStreamingProducer, Arc<SubscriptionManager>, crossbeam_channel::Receiver<Vec<u8>>) {
        let manager = Arc::new(SubscriptionManager::default());
        let well = manager.create_object(ObjectSpec::well("Well 01")).unwrap();
        manager
            .create_object(ObjectSpec::channel(well, ChannelSpec::new("ROPA", "m/h", IndexKind::Time)))
            .unwrap();
        for i in 0..5 {
            manager
                .append_data(ChannelId(1), IndexValue::Time(i * 10), DataValue::Double(i as f64))
                .unwrap();
        }

        let config = Arc::new(DevKitConfig {
            simple_streamer,
            ..DevKitConfig::default()
        });
        let (context, inbox) = open_context(EtpVersion::V11);
        let mut producer = ChannelStreamingProducer::new(
            context,
            &CapabilityConfig::default(),
            Some(Box::new(StreamingStoreV11::new(manager.clone(), config))),
        );
        producer.on_session_opened(Capabilities::new());

        let (header, raw) = inbound(1, 0, MessageFlags::FINAL_PART, &Start { max_message_rate: 10, max_data_items: 100 });
        producer.handle_message(&header, raw).unwrap();
        (producer, manager, inbox)
    }

    fn send<B: MessageBody>(producer: &mut ChannelStreamingProducer, id: i64, body: &B) {
        let (header, raw) = inbound(id, 0, MessageFlags::FINAL_PART, body);
        producer.handle_message(&header, raw).unwrap();
    }

    #[test]
    fn test_describe_then_stream() {
        let (mut producer, manager, inbox) = setup(false);
        send(&mut producer, 2, &ChannelDescribe { uris: vec!["eml://witsml20/Well".to_string()] });

        let sent = drain(&inbox);
        assert_eq!(sent.len(), 1);
        let metadata: ChannelMetadata = sent[0].1.clone().decode().unwrap();
        assert_eq!(metadata.channels.len(), 1);
        assert_eq!(metadata.channels[0].channel_name, "ROPA");

        let start = ChannelStreamingStart {
            channels: vec![ChannelStreamingInfo {
                channel_id: ChannelId(1),
                start_index: StreamingStartIndex::IndexCount(2),
                receive_change_notification: true,
            }],
        };
        send(&mut producer, 3, &start);
        let sent = drain(&inbox);
        assert_eq!(sent.len(), 1);
        let data: ChannelData = sent[0].1.clone().decode().unwrap();
        assert_eq!(data.data.len(), 2);

        manager.append_data(ChannelId(1), IndexValue::Time(100), DataValue::Double(9.0)).unwrap();
        let sent = drain(&inbox);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0.message_type, ChannelData::MESSAGE_TYPE);
    }

    #[test]
    fn test_delete_sends_channel_remove() {
        let (mut producer, manager, inbox) = setup(false);
        send(&mut producer, 2, &ChannelDescribe { uris: vec!["eml://witsml20/Well".to_string()] });
        drain(&inbox);

        let uuid = manager.execute_with_lock(|e| e.model().channel(ChannelId(1)).map(|o| o.uuid)).unwrap();
        manager.delete_object(uuid).unwrap();

        let sent = drain(&inbox);
        assert_eq!(sent.len(), 1);
        let remove: ChannelRemove = sent[0].1.clone().decode().unwrap();
        assert_eq!(remove.channel_id, ChannelId(1));
    }

    #[test]
    fn test_stop_unknown_channel_fails_whole_request() {
        let (mut producer, _manager, inbox) = setup(false);
        send(&mut producer, 2, &ChannelStreamingStop { channels: vec![ChannelId(42)] });

        let sent = drain(&inbox);
        assert_eq!(sent.len(), 1);
        let exception: ProtocolException = sent[0].1.clone().decode().unwrap();
        assert_eq!(exception.error.unwrap().error_code(), ErrorCode::InvalidChannelId);
    }

    #[test]
    fn test_simple_streamer_streams_everything() {
        let (mut producer, manager, inbox) = setup(true);
        let sent = drain(&inbox);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0.message_type, ChannelMetadata::MESSAGE_TYPE);

        send(&mut producer, 2, &ChannelDescribe { uris: vec!["eml://witsml20/Well".to_string()] });
        let sent = drain(&inbox);
        let exception: ProtocolException = sent[0].1.clone().decode().unwrap();
        assert_eq!(exception.error.unwrap().error_code(), ErrorCode::RequestDenied);

        manager.append_data(ChannelId(1), IndexValue::Time(100), DataValue::Double(9.0)).unwrap();
        let sent = drain(&inbox);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0.message_type, ChannelData::MESSAGE_TYPE);
    }
}
