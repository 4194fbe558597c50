//! ChannelStreaming (protocol 1, ETP 1.1): producer and consumer handlers.
//!
//! The consumer opens the exchange with `Start`, which also carries the most
//! data items it accepts per message. Until then the producer refuses every
//! other request.

use super::capabilities::{Capabilities, MAX_DATA_ITEM_COUNT};
use super::handler::{
    HandlerContext, ListRequestArgs, MessageArgs, ProtocolHandler, RequestArgs, Router,
};
use crate::config::CapabilityConfig;
use crate::error::{ErrorCode, ErrorInfo, Result};
use crate::messages::core::{Acknowledge, ProtocolException};
use crate::messages::v11::{
    ChannelData, ChannelDescribe, ChannelMetadata, ChannelMetadataRecord, ChannelRangeInfo,
    ChannelRangeRequest, ChannelRemove, ChannelStatus, ChannelStatusChange, ChannelStreamingInfo,
    ChannelStreamingStart, ChannelStreamingStop, DataItem, Start,
};
use crate::messages::{MessageHeader, RawBody};
use crate::session::SessionContext;
use crate::types::{ChannelId, DataValue, MessageId, Protocol, Role, SessionId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

// --- Producer ---

/// Outbound side of the producer handler.
#[derive(Clone)]
pub struct ChannelStreamingProducerSender {
    context: HandlerContext,
    started: Arc<AtomicBool>,
}

impl ChannelStreamingProducerSender {
    pub fn context(&self) -> &HandlerContext {
        &self.context
    }

    pub fn session_id(&self) -> SessionId {
        self.context.session_id()
    }

    /// Whether the consumer sent `Start`.
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// From the consumer's `Start`, or its advertised capabilities before that.
    pub fn consumer_max_data_item_count(&self) -> usize {
        self.context.counterpart_max_data_item_count()
    }

    pub fn consumer_max_index_count(&self) -> usize {
        self.context.counterpart_max_index_count()
    }

    /// Describe channels outside of a ChannelDescribe exchange.
    pub fn send_channel_metadata(&self, channels: Vec<ChannelMetadataRecord>) -> Result<MessageId> {
        self.context.send_notification(&ChannelMetadata { channels })
    }

    /// Stream data, split by the consumer's max data items.
    pub fn send_channel_data(&self, data: Vec<DataItem>) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        for part in super::chunk(data, self.consumer_max_data_item_count()) {
            self.context.send_data(&ChannelData { data: part })?;
        }
        Ok(())
    }

    pub fn send_channel_remove(&self, channel_id: ChannelId, reason: Option<&str>) -> Result<MessageId> {
        self.context.send_notification(&ChannelRemove {
            channel_id,
            remove_reason: reason.map(str::to_string),
        })
    }

    pub fn send_channel_status_change(&self, channel_id: ChannelId, status: ChannelStatus) -> Result<MessageId> {
        self.context
            .send_notification(&ChannelStatusChange { channel_id, status })
    }
}

/// Producer-side request events.
///
/// Per-channel failures go into `errors` keyed by channel id; a failure of
/// the whole request goes into `final_error`.
pub trait ChannelStreamingProducerEvents: Send {
    fn on_session_opened(&mut self, _sender: &ChannelStreamingProducerSender) {}

    fn on_session_closed(&mut self, _sender: &ChannelStreamingProducerSender) {}

    fn on_start(&mut self, _sender: &ChannelStreamingProducerSender, _args: &mut RequestArgs<Start>) {}

    fn on_channel_describe(
        &mut self,
        _sender: &ChannelStreamingProducerSender,
        _args: &mut ListRequestArgs<ChannelDescribe, ChannelMetadataRecord>,
    ) {
    }

    fn on_channel_streaming_start(
        &mut self,
        _sender: &ChannelStreamingProducerSender,
        _args: &mut RequestArgs<ChannelStreamingStart>,
    ) {
    }

    fn on_channel_streaming_stop(
        &mut self,
        _sender: &ChannelStreamingProducerSender,
        _args: &mut RequestArgs<ChannelStreamingStop>,
    ) {
    }

    fn on_channel_range_request(
        &mut self,
        _sender: &ChannelStreamingProducerSender,
        _args: &mut ListRequestArgs<ChannelRangeRequest, DataItem>,
    ) {
    }

    fn on_protocol_exception(
        &mut self,
        _sender: &ChannelStreamingProducerSender,
        _args: &MessageArgs<ProtocolException>,
    ) {
    }
}

/// ChannelStreaming 1.1 handler in the producer role.
pub struct ChannelStreamingProducer {
    sender: ChannelStreamingProducerSender,
    router: Arc<Router<Self>>,
    events: Option<Box<dyn ChannelStreamingProducerEvents>>,
}

impl ChannelStreamingProducer {
    pub fn new(
        session: Arc<SessionContext>,
        config: &CapabilityConfig,
        events: Option<Box<dyn ChannelStreamingProducerEvents>>,
    ) -> Self {
        let router = Router::new(Protocol::ChannelStreaming)
            .route(Self::on_start)
            .route(Self::on_channel_describe)
            .route(Self::on_channel_streaming_start)
            .route(Self::on_channel_streaming_stop)
            .route(Self::on_channel_range_request)
            .route(Self::on_protocol_exception)
            .route(Self::on_acknowledge);
        Self {
            sender: ChannelStreamingProducerSender {
                context: HandlerContext::new(Protocol::ChannelStreaming, Role::Producer, session, config),
                started: Arc::new(AtomicBool::new(false)),
            },
            router: Arc::new(router),
            events,
        }
    }

    pub fn sender(&self) -> ChannelStreamingProducerSender {
        self.sender.clone()
    }

    fn require_start(&self, header: &MessageHeader) -> Result<bool> {
        if self.sender.is_started() {
            return Ok(true);
        }
        self.sender.context.send_final_error(
            header,
            ErrorInfo::new(ErrorCode::InvalidState, "Start has not been received"),
        )?;
        Ok(false)
    }

    fn on_start(&mut self, header: &MessageHeader, start: Start) -> Result<()> {
        let context = &self.sender.context;
        if start.max_data_items > 0 {
            let limits = context
                .counterpart_capabilities()
                .unwrap_or_default()
                .with(MAX_DATA_ITEM_COUNT, DataValue::Long(start.max_data_items as i64));
            context.set_counterpart_capabilities(limits);
        }
        debug!(
            session = %self.sender.session_id(),
            max_data_items = start.max_data_items,
            max_message_rate = start.max_message_rate,
            "consumer started"
        );

        let mut args = RequestArgs::new(*header, start);
        if let Some(events) = self.events.as_mut() {
            events.on_start(&self.sender, &mut args);
        }
        if args.final_error.is_none() {
            self.sender.started.store(true, Ordering::SeqCst);
        }
        self.sender.context.respond_errors(args)
    }

    fn on_channel_describe(&mut self, header: &MessageHeader, request: ChannelDescribe) -> Result<()> {
        if !self.require_start(header)? {
            return Ok(());
        }
        let mut args = ListRequestArgs::new(*header, request);
        if let Some(events) = self.events.as_mut() {
            events.on_channel_describe(&self.sender, &mut args);
        }
        self.sender
            .context
            .respond_list(args, usize::MAX, |channels| ChannelMetadata { channels })
    }

    fn on_channel_streaming_start(&mut self, header: &MessageHeader, request: ChannelStreamingStart) -> Result<()> {
        if !self.require_start(header)? {
            return Ok(());
        }
        let mut args = RequestArgs::new(*header, request);
        if let Some(events) = self.events.as_mut() {
            events.on_channel_streaming_start(&self.sender, &mut args);
        }
        self.sender.context.respond_errors(args)
    }

    fn on_channel_streaming_stop(&mut self, header: &MessageHeader, request: ChannelStreamingStop) -> Result<()> {
        if !self.require_start(header)? {
            return Ok(());
        }
        let mut args = RequestArgs::new(*header, request);
        if let Some(events) = self.events.as_mut() {
            events.on_channel_streaming_stop(&self.sender, &mut args);
        }
        self.sender.context.respond_errors(args)
    }

    fn on_channel_range_request(&mut self, header: &MessageHeader, request: ChannelRangeRequest) -> Result<()> {
        if !self.require_start(header)? {
            return Ok(());
        }
        let mut args = ListRequestArgs::new(*header, request);
        if let Some(events) = self.events.as_mut() {
            events.on_channel_range_request(&self.sender, &mut args);
        }
        let context = &self.sender.context;
        context.respond_list(args, context.counterpart_max_data_item_count(), |data| {
            ChannelData { data }
        })
    }

    fn on_protocol_exception(&mut self, header: &MessageHeader, body: ProtocolException) -> Result<()> {
        warn!(
            session = %self.sender.session_id(),
            correlation = %header.correlation_id,
            error = ?body.error,
            "consumer reported exception"
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

impl ProtocolHandler for ChannelStreamingProducer {
    fn protocol(&self) -> Protocol {
        Protocol::ChannelStreaming
    }

    fn role(&self) -> Role {
        Role::Producer
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
        self.sender.started.store(false, Ordering::SeqCst);
        if let Some(events) = self.events.as_mut() {
            events.on_session_closed(&self.sender);
        }
    }

    fn handle_message(&mut self, header: &MessageHeader, body: RawBody) -> Result<()> {
        let route = self.router.lookup(header)?;
        route(self, header, body)
    }
}

// --- Consumer ---

/// Outbound side of the consumer handler.
#[derive(Clone)]
pub struct ChannelStreamingConsumerSender {
    context: HandlerContext,
}

impl ChannelStreamingConsumerSender {
    pub fn context(&self) -> &HandlerContext {
        &self.context
    }

    pub fn producer_max_data_item_count(&self) -> usize {
        self.context.counterpart_max_data_item_count()
    }

    pub fn start(&self, max_message_rate: i32, max_data_items: i32) -> Result<MessageId> {
        self.context.send_request(&Start {
            max_message_rate,
            max_data_items,
        })
    }

    pub fn channel_describe(&self, uris: Vec<String>) -> Result<MessageId> {
        self.context.send_request(&ChannelDescribe { uris })
    }

    pub fn channel_streaming_start(&self, channels: Vec<ChannelStreamingInfo>) -> Result<MessageId> {
        self.context.send_request(&ChannelStreamingStart { channels })
    }

    pub fn channel_streaming_stop(&self, channels: Vec<ChannelId>) -> Result<MessageId> {
        self.context.send_request(&ChannelStreamingStop { channels })
    }

    pub fn channel_range_request(&self, channel_ranges: Vec<ChannelRangeInfo>) -> Result<MessageId> {
        self.context.send_request(&ChannelRangeRequest { channel_ranges })
    }
}

/// Consumer-side notification events.
pub trait ChannelStreamingConsumerEvents: Send {
    fn on_session_opened(&mut self, _sender: &ChannelStreamingConsumerSender) {}

    fn on_session_closed(&mut self, _sender: &ChannelStreamingConsumerSender) {}

    fn on_channel_metadata(&mut self, _sender: &ChannelStreamingConsumerSender, _args: &MessageArgs<ChannelMetadata>) {}

    fn on_channel_data(&mut self, _sender: &ChannelStreamingConsumerSender, _args: &MessageArgs<ChannelData>) {}

    fn on_channel_remove(&mut self, _sender: &ChannelStreamingConsumerSender, _args: &MessageArgs<ChannelRemove>) {}

    fn on_channel_status_change(
        &mut self,
        _sender: &ChannelStreamingConsumerSender,
        _args: &MessageArgs<ChannelStatusChange>,
    ) {
    }

    fn on_protocol_exception(
        &mut self,
        _sender: &ChannelStreamingConsumerSender,
        _args: &MessageArgs<ProtocolException>,
    ) {
    }
}

/// ChannelStreaming 1.1 handler in the consumer role.
pub struct ChannelStreamingConsumer {
    sender: ChannelStreamingConsumerSender,
    router: Arc<Router<Self>>,
    events: Option<Box<dyn ChannelStreamingConsumerEvents>>,
}

impl ChannelStreamingConsumer {
    pub fn new(
        session: Arc<SessionContext>,
        config: &CapabilityConfig,
        events: Option<Box<dyn ChannelStreamingConsumerEvents>>,
    ) -> Self {
        let router = Router::new(Protocol::ChannelStreaming)
            .route(Self::on_channel_metadata)
            .route(Self::on_channel_data)
            .route(Self::on_channel_remove)
            .route(Self::on_channel_status_change)
            .route(Self::on_protocol_exception)
            .route(Self::on_acknowledge);
        Self {
            sender: ChannelStreamingConsumerSender {
                context: HandlerContext::new(Protocol::ChannelStreaming, Role::Consumer, session, config),
            },
            router: Arc::new(router),
            events,
        }
    }

    pub fn sender(&self) -> ChannelStreamingConsumerSender {
        self.sender.clone()
    }

    fn on_channel_metadata(&mut self, header: &MessageHeader, body: ChannelMetadata) -> Result<()> {
        let args = MessageArgs { header: *header, body };
        if let Some(events) = self.events.as_mut() {
            events.on_channel_metadata(&self.sender, &args);
        }
        Ok(())
    }

    fn on_channel_data(&mut self, header: &MessageHeader, body: ChannelData) -> Result<()> {
        let args = MessageArgs { header: *header, body };
        if let Some(events) = self.events.as_mut() {
            events.on_channel_data(&self.sender, &args);
        }
        Ok(())
    }

    fn on_channel_remove(&mut self, header: &MessageHeader, body: ChannelRemove) -> Result<()> {
        let args = MessageArgs { header: *header, body };
        if let Some(events) = self.events.as_mut() {
            events.on_channel_remove(&self.sender, &args);
        }
        Ok(())
    }

    fn on_channel_status_change(&mut self, header: &MessageHeader, body: ChannelStatusChange) -> Result<()> {
        let args = MessageArgs { header: *header, body };
        if let Some(events) = self.events.as_mut() {
            events.on_channel_status_change(&self.sender, &args);
        }
        Ok(())
    }

    fn on_protocol_exception(&mut self, header: &MessageHeader, body: ProtocolException) -> Result<()> {
        warn!(
            correlation = %header.correlation_id,
            error = ?body.error,
            "producer reported exception"
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

impl ProtocolHandler for ChannelStreamingConsumer {
    fn protocol(&self) -> Protocol {
        Protocol::ChannelStreaming
    }

    fn role(&self) -> Role {
        Role::Consumer
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
        if let Some(events) = self.events.as_mut() {
            events.on_session_closed(&self.sender);
        }
    }

    fn handle_message(&mut self, header: &MessageHeader, body: RawBody) -> Result<()> {
        let route = self.router.lookup(header)?;
        route(self, header, body)
    }
}
