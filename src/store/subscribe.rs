//! ChannelSubscribe store events backed by the subscription engine.

use super::{channel_error, log_send, whole_request_error};
use crate::error::{ErrorCode, ErrorInfo, EtpError};
use crate::messages::v12::{
    CancelGetRanges, ChannelMetadataRecord, DataItem, GetChannelMetadata, GetRanges,
    SubscribeChannels, UnsubscribeChannels,
};
use crate::protocol::channel_subscribe::{ChannelSubscribeStoreEvents, ChannelSubscribeStoreSender};
use crate::protocol::{ListRequestArgs, MapRequestArgs, RequestArgs};
use crate::subscriptions::{
    channel_metadata, ChannelDataBatch, ChannelStreamingCallbacks, ChannelSubscriptionOptions,
    PartitionKind, RangeQuery, StartIndex, SubscriptionInfo, SubscriptionManager,
};
use crate::types::{ChannelId, ContextScope, EtpVersion};
use crate::uri::EtpUri;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Store events of a 1.2 ChannelSubscribe session.
///
/// The session's channel subscription starts with its first metadata or
/// subscribe request. Channels must be described with `GetChannelMetadata`
/// before they can be subscribed to or queried.
pub struct SubscribeStore {
    manager: Arc<SubscriptionManager>,
}

impl SubscribeStore {
    pub fn new(manager: Arc<SubscriptionManager>) -> Self {
        Self { manager }
    }

    fn ensure_subscription(&self, sender: &ChannelSubscribeStoreSender) -> Option<ErrorInfo> {
        let options = ChannelSubscriptionOptions {
            version: EtpVersion::V12,
            max_data_items: sender.customer_max_data_item_count(),
            max_message_interval: Duration::ZERO,
            max_index_count: sender.customer_max_index_count(),
            bulk_mode: false,
        };
        if self
            .manager
            .start_channel_subscription(sender.session_id(), options, callbacks(sender))
        {
            None
        } else {
            Some(ErrorInfo::new(
                ErrorCode::InvalidState,
                "session is already streaming every channel",
            ))
        }
    }
}

/// Unsolicited stops are keyed by the channel id itself.
fn stopped(id: ChannelId) -> BTreeMap<String, ChannelId> {
    let mut ids = BTreeMap::new();
    ids.insert(id.to_string(), id);
    ids
}

fn callbacks(sender: &ChannelSubscribeStoreSender) -> ChannelStreamingCallbacks {
    let unjoined = sender.clone();
    let deleted = sender.clone();
    let data = sender.clone();

    ChannelStreamingCallbacks::new()
        .channel_unjoined(move |session, id| {
            log_send(
                session,
                "SubscriptionsStopped",
                unjoined.send_subscriptions_stopped("channel left the subscribed scope", stopped(id)),
            );
        })
        .channel_deleted(move |session, id| {
            log_send(
                session,
                "SubscriptionsStopped",
                deleted.send_subscriptions_stopped("channel deleted", stopped(id)),
            );
        })
        .data_appended(move |session, batch| {
            if let ChannelDataBatch::V12(items) = batch {
                log_send(session, "SubscriptionChannelData", data.send_channel_data(items));
            }
        })
}

impl ChannelSubscribeStoreEvents for SubscribeStore {
    fn on_get_channel_metadata(
        &mut self,
        sender: &ChannelSubscribeStoreSender,
        args: &mut MapRequestArgs<GetChannelMetadata, ChannelMetadataRecord>,
    ) {
        if let Some(error) = self.ensure_subscription(sender) {
            args.final_error = Some(error);
            return;
        }
        let session = sender.session_id();

        for (key, uri) in &args.request.uris {
            let parsed = match EtpUri::parse(uri) {
                Ok(parsed) => parsed,
                Err(e) => {
                    args.errors.insert(key.clone(), e.to_error_info());
                    continue;
                }
            };
            let info = SubscriptionInfo::self_only(parsed.clone());
            let described = self.manager.execute_with_lock(|engine| {
                let ids = engine.model().channels_in_scope(&parsed, ContextScope::SelfOnly, 0)?;
                let id = match ids.len() {
                    1 => ids.into_iter().next(),
                    _ => None,
                };
                let id = id.ok_or_else(|| EtpError::InvalidUri(format!("{} does not name one channel", parsed)))?;
                engine.add_channel_subscription_channel_scope(session, info)?;
                channel_metadata(engine.model(), EtpVersion::V12, id)
                    .and_then(|m| m.into_v12())
                    .ok_or_else(|| EtpError::NotFound(parsed.to_string()))
            });
            match described {
                Ok(record) => {
                    args.response.insert(key.clone(), record);
                }
                Err(e) => {
                    args.errors.insert(key.clone(), e.to_error_info());
                }
            }
        }
    }

    fn on_subscribe_channels(
        &mut self,
        sender: &ChannelSubscribeStoreSender,
        args: &mut MapRequestArgs<SubscribeChannels, String>,
    ) {
        if let Some(error) = self.ensure_subscription(sender) {
            args.final_error = Some(error);
            return;
        }
        let session = sender.session_id();
        let channels = &args.request.channels;

        let outcome = self.manager.execute_with_lock(|engine| {
            let partition = engine.validate_channel_ids(session, channels.values().map(|c| c.channel_id));
            if let Some(error) = whole_request_error(&partition) {
                return Err(error);
            }
            let mut outcome = Vec::new();
            for (key, info) in channels {
                let id = info.channel_id;
                let result = match partition.kind_of(id) {
                    Some(PartitionKind::Stopped) => {
                        let start = StartIndex::from_v12(info);
                        if engine.start_channel_streaming(session, id, info.data_changes, start) {
                            Ok(())
                        } else {
                            Err(ErrorInfo::new(
                                ErrorCode::InvalidArgument,
                                format!("start index does not match channel {}", id),
                            ))
                        }
                    }
                    Some(PartitionKind::Started) => Err(ErrorInfo::new(
                        ErrorCode::InvalidState,
                        format!("channel {} is already subscribed", id),
                    )),
                    _ => match channel_error(&partition, id) {
                        Some(error) => Err(error),
                        None => Ok(()),
                    },
                };
                outcome.push((key.clone(), result));
            }
            Ok(outcome)
        });

        match outcome {
            Ok(outcome) => {
                for (key, result) in outcome {
                    match result {
                        Ok(()) => {
                            args.response.insert(key, String::new());
                        }
                        Err(error) => {
                            args.errors.insert(key, error);
                        }
                    }
                }
            }
            Err(error) => args.final_error = Some(error),
        }
        debug!(
            session = %session,
            subscribed = args.response.len(),
            failed = args.errors.len(),
            "channels subscribed"
        );
    }

    fn on_unsubscribe_channels(
        &mut self,
        sender: &ChannelSubscribeStoreSender,
        args: &mut MapRequestArgs<UnsubscribeChannels, ChannelId>,
    ) {
        let session = sender.session_id();
        let channel_ids = &args.request.channel_ids;

        let outcome = self.manager.execute_with_lock(|engine| {
            let partition = engine.validate_channel_ids(session, channel_ids.values().copied());
            if let Some(error) = whole_request_error(&partition) {
                return Err(error);
            }
            let mut outcome = Vec::new();
            for (key, id) in channel_ids {
                let result = match partition.kind_of(*id) {
                    Some(PartitionKind::Started) => {
                        engine.stop_channel_streaming(session, *id);
                        Ok(*id)
                    }
                    Some(PartitionKind::Stopped) => Err(ErrorInfo::new(
                        ErrorCode::InvalidState,
                        format!("channel {} is not subscribed", id),
                    )),
                    _ => Err(channel_error(&partition, *id).unwrap_or_else(|| {
                        ErrorInfo::new(ErrorCode::InvalidChannelId, id.to_string())
                    })),
                };
                outcome.push((key.clone(), result));
            }
            Ok(outcome)
        });

        match outcome {
            Ok(outcome) => {
                for (key, result) in outcome {
                    match result {
                        Ok(id) => {
                            args.response.insert(key, id);
                        }
                        Err(error) => {
                            args.errors.insert(key, error);
                        }
                    }
                }
            }
            Err(error) => args.final_error = Some(error),
        }
    }

    fn on_get_ranges(
        &mut self,
        sender: &ChannelSubscribeStoreSender,
        args: &mut ListRequestArgs<GetRanges, DataItem>,
    ) {
        let session = sender.session_id();
        let ranges = &args.request.channel_ranges;

        let result = self.manager.execute_with_lock(|engine| {
            let ids = ranges.iter().flat_map(|r| r.channel_ids.iter().copied());
            let partition = engine.validate_channel_ids(session, ids);
            if let Some(error) = whole_request_error(&partition) {
                return Err(error);
            }

            let mut errors = Vec::new();
            let mut queries = Vec::new();
            for range in ranges {
                for id in &range.channel_ids {
                    match channel_error(&partition, *id) {
                        Some(error) => errors.push((*id, error)),
                        None => queries.push(RangeQuery {
                            channel_id: *id,
                            start: range.interval.start_index,
                            end: range.interval.end_index,
                        }),
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
                debug!(
                    session = %session,
                    request = %args.request.request_uuid,
                    items = data.len(),
                    "ranges collected"
                );
                args.response = data;
                args.errors.extend(errors.into_iter().map(|(id, e)| (id.to_string(), e)));
            }
            Err(error) => args.final_error = Some(error),
        }
    }

    fn on_cancel_get_ranges(&mut self, sender: &ChannelSubscribeStoreSender, args: &mut RequestArgs<CancelGetRanges>) {
        debug!(
            session = %sender.session_id(),
            request = %args.request.request_uuid,
            found = args.final_error.is_none(),
            "range request cancel"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CapabilityConfig;
    use crate::messages::core::ProtocolException;
    use crate::messages::v12::{
        ChannelRangeInfo, ChannelSubscribeInfo, GetChannelMetadataResponse, GetRangesResponse,
        IndexInterval, SubscribeChannelsResponse, SubscriptionChannelData, SubscriptionsStopped,
    };
    use crate::messages::{MessageBody, MessageFlags};
    use crate::model::{ChannelSpec, ObjectSpec};
    use crate::protocol::channel_subscribe::ChannelSubscribeStore;
    use crate::protocol::testing::{drain, inbound, open_context};
    use crate::protocol::{Capabilities, ProtocolHandler};
    use crate::types::{DataValue, IndexKind, IndexValue, Uuid};

    struct Fixture {
        store: ChannelSubscribeStore,
        manager: Arc<SubscriptionManager>,
        inbox: crossbeam_channel::Receiver<Vec<u8>>,
        channel_uri: String,
        channel_uuid: Uuid,
    }

    fn fixture() -> Fixture {
        let manager = Arc::new(SubscriptionManager::default());
        let well = manager.create_object(ObjectSpec::well("Well 01")).unwrap();
        let channel_uuid = manager
            .create_object(ObjectSpec::channel(well, ChannelSpec::new("ROPA", "m/h", IndexKind::Time)))
            .unwrap();
        for i in 0..4 {
            manager
                .append_data(ChannelId(1), IndexValue::Time(i * 10), DataValue::Double(i as f64))
                .unwrap();
        }
        let channel_uri = manager
            .execute_with_lock(|e| e.model().uri(channel_uuid))
            .unwrap()
            .to_string();

        let (context, inbox) = open_context(EtpVersion::V12);
        let mut store = ChannelSubscribeStore::new(
            context,
            &CapabilityConfig::default(),
            Some(Box::new(SubscribeStore::new(manager.clone()))),
        );
        store.on_session_opened(Capabilities::new());
        Fixture {
            store,
            manager,
            inbox,
            channel_uri,
            channel_uuid,
        }
    }

    fn send<B: MessageBody>(fixture: &mut Fixture, id: i64, body: &B) {
        let (header, raw) = inbound(id, 0, MessageFlags::FINAL_PART, body);
        fixture.store.handle_message(&header, raw).unwrap();
    }

    fn describe(fixture: &mut Fixture) {
        let mut uris = BTreeMap::new();
        uris.insert("a".to_string(), fixture.channel_uri.clone());
        uris.insert("b".to_string(), "eml://witsml20/Well".to_string());
        send(fixture, 2, &GetChannelMetadata { uris });
    }

    fn subscribe(fixture: &mut Fixture, id: i64) {
        let mut channels = BTreeMap::new();
        channels.insert(
            "x".to_string(),
            ChannelSubscribeInfo {
                channel_id: ChannelId(id),
                start_index: None,
                data_changes: false,
                request_latest_index_count: Some(1),
            },
        );
        send(fixture, 3, &SubscribeChannels { channels });
    }

    #[test]
    fn test_metadata_subscribe_and_stream() {
        let mut f = fixture();
        describe(&mut f);

        let sent = drain(&f.inbox);
        assert_eq!(sent.len(), 2);
        let response: GetChannelMetadataResponse = sent[0].1.clone().decode().unwrap();
        assert_eq!(response.metadata["a"].id, ChannelId(1));
        let exception: ProtocolException = sent[1].1.clone().decode().unwrap();
        assert!(exception.errors.contains_key("b"));

        subscribe(&mut f, 1);
        let sent = drain(&f.inbox);
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].0.message_type, SubscriptionChannelData::MESSAGE_TYPE);
        assert_eq!(sent[1].0.message_type, SubscribeChannelsResponse::MESSAGE_TYPE);

        f.manager
            .append_data(ChannelId(1), IndexValue::Time(50), DataValue::Double(5.0))
            .unwrap();
        let sent = drain(&f.inbox);
        assert_eq!(sent.len(), 1);
        let data: SubscriptionChannelData = sent[0].1.clone().decode().unwrap();
        assert_eq!(data.data[0].indexes, vec![IndexValue::Time(50)]);
    }

    #[test]
    fn test_subscribe_without_metadata_is_invalid() {
        let mut f = fixture();
        subscribe(&mut f, 1);
        let sent = drain(&f.inbox);
        assert_eq!(sent.len(), 1);
        let exception: ProtocolException = sent[0].1.clone().decode().unwrap();
        assert_eq!(exception.error.unwrap().error_code(), ErrorCode::InvalidChannelId);
    }

    #[test]
    fn test_ranges_on_closed_channel_not_found() {
        let mut f = fixture();
        describe(&mut f);
        drain(&f.inbox);
        f.manager.delete_object(f.channel_uuid).unwrap();
        let sent = drain(&f.inbox);
        let stopped: SubscriptionsStopped = sent[0].1.clone().decode().unwrap();
        assert_eq!(stopped.channel_ids.len(), 1);
        assert_eq!(stopped.channel_ids["1"], ChannelId(1));

        let request = GetRanges {
            request_uuid: Uuid::new_v4(),
            channel_ranges: vec![ChannelRangeInfo {
                channel_ids: vec![ChannelId(1), ChannelId(7)],
                interval: IndexInterval {
                    start_index: IndexValue::Time(0),
                    end_index: IndexValue::Time(100),
                    uom: "us".to_string(),
                },
            }],
        };
        send(&mut f, 5, &request);
        let sent = drain(&f.inbox);
        assert_eq!(sent.len(), 1);
        let exception: ProtocolException = sent[0].1.clone().decode().unwrap();
        assert_eq!(exception.error.unwrap().error_code(), ErrorCode::NotFound);
    }

    #[test]
    fn test_ranges_mixed_ids_return_data_and_errors() {
        let mut f = fixture();
        describe(&mut f);
        drain(&f.inbox);

        let request = GetRanges {
            request_uuid: Uuid::new_v4(),
            channel_ranges: vec![ChannelRangeInfo {
                channel_ids: vec![ChannelId(1), ChannelId(7)],
                interval: IndexInterval {
                    start_index: IndexValue::Time(10),
                    end_index: IndexValue::Time(20),
                    uom: "us".to_string(),
                },
            }],
        };
        send(&mut f, 6, &request);
        let sent = drain(&f.inbox);
        assert_eq!(sent.len(), 2);
        let response: GetRangesResponse = sent[0].1.clone().decode().unwrap();
        assert_eq!(response.data.len(), 2);
        let exception: ProtocolException = sent[1].1.clone().decode().unwrap();
        assert_eq!(exception.errors["7"].error_code(), ErrorCode::InvalidChannelId);
    }

    #[test]
    fn test_unsubscribe_stops_stream() {
        let mut f = fixture();
        describe(&mut f);
        subscribe(&mut f, 1);
        drain(&f.inbox);

        let mut channel_ids = BTreeMap::new();
        channel_ids.insert("x".to_string(), ChannelId(1));
        send(&mut f, 8, &UnsubscribeChannels { channel_ids });
        let sent = drain(&f.inbox);
        assert_eq!(sent.len(), 1);
        let stopped: SubscriptionsStopped = sent[0].1.clone().decode().unwrap();
        assert_eq!(stopped.channel_ids["x"], ChannelId(1));

        f.manager
            .append_data(ChannelId(1), IndexValue::Time(60), DataValue::Double(6.0))
            .unwrap();
        assert!(drain(&f.inbox).is_empty());
    }
}
