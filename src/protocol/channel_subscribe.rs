//! ChannelSubscribe (protocol 21, ETP 1.2): store and customer handlers.
//!
//! The store answers metadata, subscription and range requests through an
//! events delegate and pushes subscribed data with
//! [`ChannelSubscribeStoreSender::send_channel_data`]. The customer tracks its
//! cancellable `GetRanges` requests and drops parts arriving after a cancel.

use super::capabilities::Capabilities;
use super::handler::{
    HandlerContext, ListRequestArgs, MapRequestArgs, MessageArgs, ProtocolHandler, RequestArgs,
    Router,
};
use crate::config::CapabilityConfig;
use crate::error::{ErrorCode, ErrorInfo, Result};
use crate::messages::core::{Acknowledge, ProtocolException};
use crate::messages::v12::{
    CancelGetRanges, ChannelMetadataRecord, ChannelRangeInfo, ChannelSubscribeInfo, DataItem,
    GetChannelMetadata, GetChannelMetadataResponse, GetRanges, GetRangesResponse,
    SubscribeChannels, SubscribeChannelsResponse, SubscriptionChannelData, SubscriptionsStopped,
    UnsubscribeChannels,
};
use crate::messages::{MessageHeader, RawBody};
use crate::session::SessionContext;
use crate::types::{ChannelId, MessageId, Protocol, Role, SessionId, Uuid};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, trace, warn};

// --- Store ---

/// Outbound side of the store handler, usable from any thread.
#[derive(Clone)]
pub struct ChannelSubscribeStoreSender {
    context: HandlerContext,
}

impl ChannelSubscribeStoreSender {
    pub fn context(&self) -> &HandlerContext {
        &self.context
    }

    pub fn session_id(&self) -> SessionId {
        self.context.session_id()
    }

    pub fn customer_max_data_item_count(&self) -> usize {
        self.context.counterpart_max_data_item_count()
    }

    pub fn customer_max_index_count(&self) -> usize {
        self.context.counterpart_max_index_count()
    }

    /// Push subscribed data, split by the customer's `MaxDataItemCount`.
    pub fn send_channel_data(&self, data: Vec<DataItem>) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        for part in super::chunk(data, self.customer_max_data_item_count()) {
            self.context.send_data(&SubscriptionChannelData { data: part })?;
        }
        Ok(())
    }

    /// Tell the customer that subscriptions ended outside of a request.
    pub fn send_subscriptions_stopped(
        &self,
        reason: &str,
        channel_ids: BTreeMap<String, ChannelId>,
    ) -> Result<MessageId> {
        self.context.send_notification(&SubscriptionsStopped {
            reason: reason.to_string(),
            channel_ids,
        })
    }
}

/// Store-side request events. Every method defaults to doing nothing, which
/// answers each request with an empty success response.
pub trait ChannelSubscribeStoreEvents: Send {
    fn on_session_opened(&mut self, _sender: &ChannelSubscribeStoreSender) {}

    fn on_session_closed(&mut self, _sender: &ChannelSubscribeStoreSender) {}

    fn on_get_channel_metadata(
        &mut self,
        _sender: &ChannelSubscribeStoreSender,
        _args: &mut MapRequestArgs<GetChannelMetadata, ChannelMetadataRecord>,
    ) {
    }

    /// Fill `response` with the keys that subscribed successfully.
    fn on_subscribe_channels(
        &mut self,
        _sender: &ChannelSubscribeStoreSender,
        _args: &mut MapRequestArgs<SubscribeChannels, String>,
    ) {
    }

    /// Fill `response` with the channels actually stopped.
    fn on_unsubscribe_channels(
        &mut self,
        _sender: &ChannelSubscribeStoreSender,
        _args: &mut MapRequestArgs<UnsubscribeChannels, ChannelId>,
    ) {
    }

    fn on_get_ranges(
        &mut self,
        _sender: &ChannelSubscribeStoreSender,
        _args: &mut ListRequestArgs<GetRanges, DataItem>,
    ) {
    }

    fn on_cancel_get_ranges(
        &mut self,
        _sender: &ChannelSubscribeStoreSender,
        _args: &mut RequestArgs<CancelGetRanges>,
    ) {
    }

    fn on_protocol_exception(
        &mut self,
        _sender: &ChannelSubscribeStoreSender,
        _args: &MessageArgs<ProtocolException>,
    ) {
    }
}

/// ChannelSubscribe handler in the store role.
pub struct ChannelSubscribeStore {
    sender: ChannelSubscribeStoreSender,
    router: Arc<Router<Self>>,
    events: Option<Box<dyn ChannelSubscribeStoreEvents>>,
}

impl ChannelSubscribeStore {
    pub fn new(
        session: Arc<SessionContext>,
        config: &CapabilityConfig,
        events: Option<Box<dyn ChannelSubscribeStoreEvents>>,
    ) -> Self {
        let router = Router::new(Protocol::ChannelSubscribe)
            .route(Self::on_get_channel_metadata)
            .route(Self::on_subscribe_channels)
            .route(Self::on_unsubscribe_channels)
            .route(Self::on_get_ranges)
            .route(Self::on_cancel_get_ranges)
            .route(Self::on_protocol_exception)
            .route(Self::on_acknowledge);
        Self {
            sender: ChannelSubscribeStoreSender {
                context: HandlerContext::new(Protocol::ChannelSubscribe, Role::Store, session, config),
            },
            router: Arc::new(router),
            events,
        }
    }

    pub fn sender(&self) -> ChannelSubscribeStoreSender {
        self.sender.clone()
    }

    fn on_get_channel_metadata(&mut self, header: &MessageHeader, request: GetChannelMetadata) -> Result<()> {
        let mut args = MapRequestArgs::new(*header, request);
        if let Some(events) = self.events.as_mut() {
            events.on_get_channel_metadata(&self.sender, &mut args);
        }
        self.sender
            .context
            .respond_map(args, |metadata| GetChannelMetadataResponse { metadata })
    }

    fn on_subscribe_channels(&mut self, header: &MessageHeader, request: SubscribeChannels) -> Result<()> {
        let mut args = MapRequestArgs::new(*header, request);
        if let Some(events) = self.events.as_mut() {
            events.on_subscribe_channels(&self.sender, &mut args);
        }
        self.sender
            .context
            .respond_map(args, |success| SubscribeChannelsResponse { success })
    }

    fn on_unsubscribe_channels(&mut self, header: &MessageHeader, request: UnsubscribeChannels) -> Result<()> {
        let mut args = MapRequestArgs::new(*header, request);
        if let Some(events) = self.events.as_mut() {
            events.on_unsubscribe_channels(&self.sender, &mut args);
        }
        self.sender.context.respond_map(args, |channel_ids| SubscriptionsStopped {
            reason: "unsubscribed".to_string(),
            channel_ids,
        })
    }

    fn on_get_ranges(&mut self, header: &MessageHeader, request: GetRanges) -> Result<()> {
        let context = &self.sender.context;
        let request_uuid = request.request_uuid;

        let channels: usize = request.channel_ranges.iter().map(|r| r.channel_ids.len()).sum();
        let limit = context.local_max_range_channels();
        if channels > limit {
            return context.send_final_error(
                header,
                ErrorInfo::new(
                    ErrorCode::LimitExceeded,
                    format!("{} channels requested, at most {} allowed", channels, limit),
                ),
            );
        }

        if let Err(e) = context.try_register_request(request_uuid, *header) {
            return context.send_final_error(header, e.to_error_info());
        }

        let mut args = ListRequestArgs::new(*header, request);
        if let Some(events) = self.events.as_mut() {
            events.on_get_ranges(&self.sender, &mut args);
        }

        let context = &self.sender.context;
        if context.try_unregister_request(&request_uuid).is_none() {
            debug!(request = %request_uuid, "range request cancelled while running");
            args.cancel = true;
        }
        context.respond_list(args, context.counterpart_max_data_item_count(), |data| {
            GetRangesResponse { data }
        })
    }

    fn on_cancel_get_ranges(&mut self, header: &MessageHeader, request: CancelGetRanges) -> Result<()> {
        let mut args = RequestArgs::new(*header, request);
        if let Err(e) = self.sender.context.cancel_request(&args.request.request_uuid) {
            args.final_error = Some(e.to_error_info());
        }
        if let Some(events) = self.events.as_mut() {
            events.on_cancel_get_ranges(&self.sender, &mut args);
        }
        self.sender.context.respond_errors(args)
    }

    fn on_protocol_exception(&mut self, header: &MessageHeader, body: ProtocolException) -> Result<()> {
        warn!(
            session = %self.sender.session_id(),
            correlation = %header.correlation_id,
            error = ?body.error,
            "customer reported exception"
        );
        let args = MessageArgs { header: *header, body };
        if let Some(events) = self.events.as_mut() {
            events.on_protocol_exception(&self.sender, &args);
        }
        Ok(())
    }

    fn on_acknowledge(&mut self, header: &MessageHeader, _body: Acknowledge) -> Result<()> {
        trace!(correlation = %header.correlation_id, "acknowledged");
        Ok(())
    }
}

impl ProtocolHandler for ChannelSubscribeStore {
    fn protocol(&self) -> Protocol {
        Protocol::ChannelSubscribe
    }

    fn role(&self) -> Role {
        Role::Store
    }

    fn capabilities(&self) -> Capabilities {
        self.sender.context.local_capabilities()
    }

    fn on_session_opened(&mut self, counterpart: Capabilities) {
        self.sender.context.set_counterpart_capabilities(counterpart);
        if let Some(events) = self.events.as_mut() {
            events.on_session_opened(&self.sender);
        }
    }

    fn on_session_closed(&mut self) {
        self.sender.context.clear_requests();
        if let Some(events) = self.events.as_mut() {
            events.on_session_closed(&self.sender);
        }
    }

    fn handle_message(&mut self, header: &MessageHeader, body: RawBody) -> Result<()> {
        let route = self.router.lookup(header)?;
        route(self, header, body)
    }
}

// --- Customer ---

/// Outbound side of the customer handler.
#[derive(Clone)]
pub struct ChannelSubscribeCustomerSender {
    context: HandlerContext,
}

impl ChannelSubscribeCustomerSender {
    pub fn context(&self) -> &HandlerContext {
        &self.context
    }

    pub fn store_max_data_item_count(&self) -> usize {
        self.context.counterpart_max_data_item_count()
    }

    pub fn store_max_index_count(&self) -> usize {
        self.context.counterpart_max_index_count()
    }

    pub fn get_channel_metadata(&self, uris: BTreeMap<String, String>) -> Result<MessageId> {
        self.context.send_request(&GetChannelMetadata { uris })
    }

    pub fn subscribe_channels(&self, channels: BTreeMap<String, ChannelSubscribeInfo>) -> Result<MessageId> {
        self.context.send_request(&SubscribeChannels { channels })
    }

    pub fn unsubscribe_channels(&self, channel_ids: BTreeMap<String, ChannelId>) -> Result<MessageId> {
        self.context.send_request(&UnsubscribeChannels { channel_ids })
    }

    /// Request ranges; the request stays pending until its final part.
    pub fn get_ranges(&self, request_uuid: Uuid, channel_ranges: Vec<ChannelRangeInfo>) -> Result<MessageId> {
        self.context.send_cancellable_request(
            &GetRanges {
                request_uuid,
                channel_ranges,
            },
            request_uuid,
        )
    }

    /// Cancel a pending range request. Parts still in flight are dropped.
    pub fn cancel_get_ranges(&self, request_uuid: Uuid) -> Result<MessageId> {
        self.context.cancel_request(&request_uuid)?;
        self.context.send_request(&CancelGetRanges { request_uuid })
    }
}

/// Customer-side response and notification events.
pub trait ChannelSubscribeCustomerEvents: Send {
    fn on_session_opened(&mut self, _sender: &ChannelSubscribeCustomerSender) {}

    fn on_session_closed(&mut self, _sender: &ChannelSubscribeCustomerSender) {}

    fn on_get_channel_metadata_response(
        &mut self,
        _sender: &ChannelSubscribeCustomerSender,
        _args: &MessageArgs<GetChannelMetadataResponse>,
    ) {
    }

    fn on_subscribe_channels_response(
        &mut self,
        _sender: &ChannelSubscribeCustomerSender,
        _args: &MessageArgs<SubscribeChannelsResponse>,
    ) {
    }

    fn on_channel_data(
        &mut self,
        _sender: &ChannelSubscribeCustomerSender,
        _args: &MessageArgs<SubscriptionChannelData>,
    ) {
    }

    /// Both the UnsubscribeChannels response and unsolicited stops.
    fn on_subscriptions_stopped(
        &mut self,
        _sender: &ChannelSubscribeCustomerSender,
        _args: &MessageArgs<SubscriptionsStopped>,
    ) {
    }

    fn on_get_ranges_response(
        &mut self,
        _sender: &ChannelSubscribeCustomerSender,
        _request_uuid: Uuid,
        _args: &MessageArgs<GetRangesResponse>,
    ) {
    }

    fn on_protocol_exception(
        &mut self,
        _sender: &ChannelSubscribeCustomerSender,
        _args: &MessageArgs<ProtocolException>,
    ) {
    }
}

/// ChannelSubscribe handler in the customer role.
pub struct ChannelSubscribeCustomer {
    sender: ChannelSubscribeCustomerSender,
    router: Arc<Router<Self>>,
    events: Option<Box<dyn ChannelSubscribeCustomerEvents>>,
}

impl ChannelSubscribeCustomer {
    pub fn new(
        session: Arc<SessionContext>,
        config: &CapabilityConfig,
        events: Option<Box<dyn ChannelSubscribeCustomerEvents>>,
    ) -> Self {
        let router = Router::new(Protocol::ChannelSubscribe)
            .route(Self::on_get_channel_metadata_response)
            .route(Self::on_subscribe_channels_response)
            .route(Self::on_channel_data)
            .route(Self::on_subscriptions_stopped)
            .route(Self::on_get_ranges_response)
            .route(Self::on_protocol_exception)
            .route(Self::on_acknowledge);
        Self {
            sender: ChannelSubscribeCustomerSender {
                context: HandlerContext::new(Protocol::ChannelSubscribe, Role::Customer, session, config),
            },
            router: Arc::new(router),
            events,
        }
    }

    pub fn sender(&self) -> ChannelSubscribeCustomerSender {
        self.sender.clone()
    }

    fn on_get_channel_metadata_response(
        &mut self,
        header: &MessageHeader,
        body: GetChannelMetadataResponse,
    ) -> Result<()> {
        let args = MessageArgs { header: *header, body };
        if let Some(events) = self.events.as_mut() {
            events.on_get_channel_metadata_response(&self.sender, &args);
        }
        Ok(())
    }

    fn on_subscribe_channels_response(
        &mut self,
        header: &MessageHeader,
        body: SubscribeChannelsResponse,
    ) -> Result<()> {
        let args = MessageArgs { header: *header, body };
        if let Some(events) = self.events.as_mut() {
            events.on_subscribe_channels_response(&self.sender, &args);
        }
        Ok(())
    }

    fn on_channel_data(&mut self, header: &MessageHeader, body: SubscriptionChannelData) -> Result<()> {
        let args = MessageArgs { header: *header, body };
        if let Some(events) = self.events.as_mut() {
            events.on_channel_data(&self.sender, &args);
        }
        Ok(())
    }

    fn on_subscriptions_stopped(&mut self, header: &MessageHeader, body: SubscriptionsStopped) -> Result<()> {
        let args = MessageArgs { header: *header, body };
        if let Some(events) = self.events.as_mut() {
            events.on_subscriptions_stopped(&self.sender, &args);
        }
        Ok(())
    }

    fn on_get_ranges_response(&mut self, header: &MessageHeader, body: GetRangesResponse) -> Result<()> {
        let pending = match self.sender.context.find_request(header.correlation_id) {
            Some(pending) => pending,
            None => {
                debug!(
                    correlation = %header.correlation_id,
                    items = body.data.len(),
                    "dropping range data for unknown or cancelled request"
                );
                return Ok(());
            }
        };
        if header.is_final_part() {
            self.sender.context.try_unregister_request(&pending.request_uuid);
        }
        let args = MessageArgs { header: *header, body };
        if let Some(events) = self.events.as_mut() {
            events.on_get_ranges_response(&self.sender, pending.request_uuid, &args);
        }
        Ok(())
    }

    fn on_protocol_exception(&mut self, header: &MessageHeader, body: ProtocolException) -> Result<()> {
        if header.is_final_part() {
            if let Some(pending) = self.sender.context.find_request(header.correlation_id) {
                self.sender.context.try_unregister_request(&pending.request_uuid);
            }
        }
        warn!(
            correlation = %header.correlation_id,
            error = ?body.error,
            errors = body.errors.len(),
            "store reported exception"
        );
        let args = MessageArgs { header: *header, body };
        if let Some(events) = self.events.as_mut() {
            events.on_protocol_exception(&self.sender, &args);
        }
        Ok(())
    }

    fn on_acknowledge(&mut self, header: &MessageHeader, _body: Acknowledge) -> Result<()> {
        trace!(correlation = %header.correlation_id, "acknowledged");
        Ok(())
    }
}

impl ProtocolHandler for ChannelSubscribeCustomer {
    fn protocol(&self) -> Protocol {
        Protocol::ChannelSubscribe
    }

    fn role(&self) -> Role {
        Role::Customer
    }

    fn capabilities(&self) -> Capabilities {
        self.sender.context.local_capabilities()
    }

    fn on_session_opened(&mut self, counterpart: Capabilities) {
        self.sender.context.set_counterpart_capabilities(counterpart);
        if let Some(events) = self.events.as_mut() {
            events.on_session_opened(&self.sender);
        }
    }

    fn on_session_closed(&mut self) {
        self.sender.context.clear_requests();
        if let Some(events) = self.events.as_mut() {
            events.on_session_closed(&self.sender);
        }
    }

    fn handle_message(&mut self, header: &MessageHeader, body: RawBody) -> Result<()> {
        let route = self.router.lookup(header)?;
        route(self, header, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EtpError;
    use crate::messages::{MessageBody, MessageFlags};
    use crate::protocol::capabilities::MAX_DATA_ITEM_COUNT;
    use crate::protocol::testing::{drain, inbound, open_context};
    use crate::types::{DataValue, EtpVersion, IndexValue};
    use parking_lot::Mutex;

    fn item(channel: i64, index: i64) -> DataItem {
        DataItem {
            channel_id: ChannelId(channel),
            indexes: vec![IndexValue::Time(index)],
            value: DataValue::Double(index as f64),
            value_attributes: Vec::new(),
        }
    }

    struct Ranges {
        items: usize,
        errors: Vec<String>,
    }

    impl ChannelSubscribeStoreEvents for Ranges {
        fn on_get_ranges(
            &mut self,
            _sender: &ChannelSubscribeStoreSender,
            args: &mut ListRequestArgs<GetRanges, DataItem>,
        ) {
            args.response = (0..self.items as i64).map(|i| item(1, i)).collect();
            for key in &self.errors {
                args.errors.insert(key.clone(), ErrorInfo::new(ErrorCode::InvalidChannelId, "unknown"));
            }
        }

        fn on_subscribe_channels(
            &mut self,
            _sender: &ChannelSubscribeStoreSender,
            args: &mut MapRequestArgs<SubscribeChannels, String>,
        ) {
            for key in args.request.channels.keys() {
                args.response.insert(key.clone(), String::new());
            }
        }
    }

    fn store(items: usize, errors: Vec<String>) -> (ChannelSubscribeStore, crossbeam_channel::Receiver<Vec<u8>>) {
        let (context, inbox) = open_context(EtpVersion::V12);
        let mut store = ChannelSubscribeStore::new(
            context,
            &CapabilityConfig::default(),
            Some(Box::new(Ranges { items, errors })),
        );
        store.on_session_opened(Capabilities::new().with(MAX_DATA_ITEM_COUNT, DataValue::Long(2)));
        (store, inbox)
    }

    fn get_ranges(uuid: Uuid) -> GetRanges {
        GetRanges {
            request_uuid: uuid,
            channel_ranges: vec![ChannelRangeInfo {
                channel_ids: vec![ChannelId(1)],
                interval: crate::messages::v12::IndexInterval {
                    start_index: IndexValue::Time(0),
                    end_index: IndexValue::Time(100),
                    uom: "us".to_string(),
                },
            }],
        }
    }

    // --- Store ---

    #[test]
    fn test_get_ranges_chunked_by_customer_max() {
        let (mut store, inbox) = store(5, Vec::new());
        let (header, body) = inbound(7, 0, MessageFlags::FINAL_PART, &get_ranges(Uuid::new_v4()));
        store.handle_message(&header, body).unwrap();

        let sent = drain(&inbox);
        assert_eq!(sent.len(), 3);
        for (i, (header, _)) in sent.iter().enumerate() {
            assert_eq!(header.message_type, GetRangesResponse::MESSAGE_TYPE);
            assert_eq!(header.correlation_id, MessageId(7));
            assert_eq!(header.is_final_part(), i == 2);
        }
        assert_eq!(store.sender().context().pending_request_count(), 0);
    }

    #[test]
    fn test_get_ranges_errors_trail_the_data() {
        let (mut store, inbox) = store(1, vec!["9".to_string()]);
        let (header, body) = inbound(3, 0, MessageFlags::FINAL_PART, &get_ranges(Uuid::new_v4()));
        store.handle_message(&header, body).unwrap();

        let sent = drain(&inbox);
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].0.message_type, GetRangesResponse::MESSAGE_TYPE);
        assert!(!sent[0].0.is_final_part());
        assert_eq!(sent[1].0.message_type, ProtocolException::MESSAGE_TYPE);
        assert!(sent[1].0.is_final_part());
        let exception: ProtocolException = sent[1].1.clone().decode().unwrap();
        assert!(exception.errors.contains_key("9"));
    }

    #[test]
    fn test_unknown_cancel_is_not_found() {
        let (mut store, inbox) = store(0, Vec::new());
        let cancel = CancelGetRanges {
            request_uuid: Uuid::new_v4(),
        };
        let (header, body) = inbound(4, 0, MessageFlags::FINAL_PART, &cancel);
        store.handle_message(&header, body).unwrap();

        let sent = drain(&inbox);
        assert_eq!(sent.len(), 1);
        let exception: ProtocolException = sent[0].1.clone().decode().unwrap();
        assert_eq!(exception.error.unwrap().error_code(), ErrorCode::NotFound);
    }

    #[test]
    fn test_subscribe_response_is_single_final_part() {
        let (mut store, inbox) = store(0, Vec::new());
        let mut channels = BTreeMap::new();
        channels.insert(
            "0".to_string(),
            ChannelSubscribeInfo {
                channel_id: ChannelId(1),
                start_index: None,
                data_changes: true,
                request_latest_index_count: None,
            },
        );
        let (header, body) = inbound(2, 0, MessageFlags::FINAL_PART, &SubscribeChannels { channels });
        store.handle_message(&header, body).unwrap();

        let sent = drain(&inbox);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0.message_flags, MessageFlags::MULTI_PART_AND_FINAL_PART);
        let response: SubscribeChannelsResponse = sent[0].1.clone().decode().unwrap();
        assert!(response.success.contains_key("0"));
    }

    #[test]
    fn test_channel_data_split_by_customer_max() {
        let (store, inbox) = store(0, Vec::new());
        store
            .sender()
            .send_channel_data((0..3).map(|i| item(1, i)).collect())
            .unwrap();
        assert_eq!(drain(&inbox).len(), 2);
    }

    #[test]
    fn test_unknown_message_type_rejected() {
        let (mut store, _inbox) = store(0, Vec::new());
        let (header, body) = inbound(1, 0, MessageFlags::FINAL_PART, &GetRangesResponse::default());
        assert!(matches!(
            store.handle_message(&header, body),
            Err(EtpError::InvalidMessageType { .. })
        ));
    }

    // --- Customer ---

    #[derive(Default)]
    struct Received {
        ranges: Arc<Mutex<Vec<(Uuid, usize)>>>,
    }

    impl ChannelSubscribeCustomerEvents for Received {
        fn on_get_ranges_response(
            &mut self,
            _sender: &ChannelSubscribeCustomerSender,
            request_uuid: Uuid,
            args: &MessageArgs<GetRangesResponse>,
        ) {
            self.ranges.lock().push((request_uuid, args.body.data.len()));
        }
    }

    #[test]
    fn test_customer_drops_parts_after_cancel() {
        let (context, inbox) = open_context(EtpVersion::V12);
        let received = Received::default();
        let ranges = received.ranges.clone();
        let mut customer =
            ChannelSubscribeCustomer::new(context, &CapabilityConfig::default(), Some(Box::new(received)));

        let uuid = Uuid::new_v4();
        let sender = customer.sender();
        let request_id = sender.get_ranges(uuid, Vec::new()).unwrap();
        assert!(matches!(
            sender.get_ranges(uuid, Vec::new()),
            Err(EtpError::RequestUuidRejected(_))
        ));

        let part = GetRangesResponse { data: vec![item(1, 1)] };
        let (header, body) = inbound(10, request_id.0, MessageFlags::MULTI_PART, &part);
        customer.handle_message(&header, body).unwrap();
        assert_eq!(ranges.lock().as_slice(), &[(uuid, 1)]);

        sender.cancel_get_ranges(uuid).unwrap();
        let (header, body) = inbound(11, request_id.0, MessageFlags::MULTI_PART_AND_FINAL_PART, &part);
        customer.handle_message(&header, body).unwrap();
        assert_eq!(ranges.lock().len(), 1);

        let sent = drain(&inbox);
        assert_eq!(sent.last().unwrap().0.message_type, CancelGetRanges::MESSAGE_TYPE);
    }

    #[test]
    fn test_final_part_completes_request() {
        let (context, _inbox) = open_context(EtpVersion::V12);
        let mut customer = ChannelSubscribeCustomer::new(context, &CapabilityConfig::default(), None);
        let sender = customer.sender();
        let request_id = sender.get_ranges(Uuid::new_v4(), Vec::new()).unwrap();
        assert_eq!(sender.context().pending_request_count(), 1);

        let (header, body) = inbound(
            5,
            request_id.0,
            MessageFlags::MULTI_PART_AND_FINAL_PART,
            &GetRangesResponse::default(),
        );
        customer.handle_message(&header, body).unwrap();
        assert_eq!(sender.context().pending_request_count(), 0);
    }
}
