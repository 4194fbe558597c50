//! ChannelStreaming (protocol 1, ETP 1.2): producer and consumer handlers.
//!
//! The consumer only starts and stops the stream; what is streamed is up to
//! the producer, which announces channels with `ChannelMetadata` before
//! sending their data.

use super::capabilities::Capabilities;
use super::handler::{HandlerContext, MessageArgs, ProtocolHandler, RequestArgs, Router};
use crate::config::CapabilityConfig;
use crate::error::Result;
use crate::messages::core::{Acknowledge, ProtocolException};
use crate::messages::v12::{
    ChannelData, ChannelMetadata, ChannelMetadataRecord, DataItem, StartStreaming, StopStreaming,
};
use crate::messages::{MessageHeader, RawBody};
use crate::session::SessionContext;
use crate::types::{MessageId, Protocol, Role, SessionId};
use std::sync::Arc;
use tracing::{trace, warn};

// --- Producer ---

/// Outbound side of the producer handler.
#[derive(Clone)]
pub struct StreamingProducerSender {
    context: HandlerContext,
}

impl StreamingProducerSender {
    pub fn context(&self) -> &HandlerContext {
        &self.context
    }

    pub fn session_id(&self) -> SessionId {
        self.context.session_id()
    }

    pub fn consumer_max_data_item_count(&self) -> usize {
        self.context.counterpart_max_data_item_count()
    }

    pub fn send_channel_metadata(&self, channels: Vec<ChannelMetadataRecord>) -> Result<MessageId> {
        self.context.send_notification(&ChannelMetadata { channels })
    }

    /// Stream data, split by the consumer's `MaxDataItemCount`.
    pub fn send_channel_data(&self, data: Vec<DataItem>) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        for part in super::chunk(data, self.consumer_max_data_item_count()) {
            self.context.send_data(&ChannelData { data: part })?;
        }
        Ok(())
    }
}

pub trait StreamingProducerEvents: Send {
    fn on_session_opened(&mut self, _sender: &StreamingProducerSender) {}

    fn on_session_closed(&mut self, _sender: &StreamingProducerSender) {}

    fn on_start_streaming(&mut self, _sender: &StreamingProducerSender, _args: &mut RequestArgs<StartStreaming>) {}

    fn on_stop_streaming(&mut self, _sender: &StreamingProducerSender, _args: &mut RequestArgs<StopStreaming>) {}

    fn on_protocol_exception(&mut self, _sender: &StreamingProducerSender, _args: &MessageArgs<ProtocolException>) {}
}

/// ChannelStreaming 1.2 handler in the producer role.
pub struct StreamingProducer {
    sender: StreamingProducerSender,
    router: Arc<Router<Self>>,
    events: Option<Box<dyn StreamingProducerEvents>>,
}

impl StreamingProducer {
    pub fn new(
        session: Arc<SessionContext>,
        config: &CapabilityConfig,
        events: Option<Box<dyn StreamingProducerEvents>>,
    ) -> Self {
        let router = Router::new(Protocol::ChannelStreaming)
            .route(Self::on_start_streaming)
            .route(Self::on_stop_streaming)
            .route(Self::on_protocol_exception)
            .route(Self::on_acknowledge);
        Self {
            sender: StreamingProducerSender {
                context: HandlerContext::new(Protocol::ChannelStreaming, Role::Producer, session, config),
            },
            router: Arc::new(router),
            events,
        }
    }

    pub fn sender(&self) -> StreamingProducerSender {
        self.sender.clone()
    }

    fn on_start_streaming(&mut self, header: &MessageHeader, request: StartStreaming) -> Result<()> {
        let mut args = RequestArgs::new(*header, request);
        if let Some(events) = self.events.as_mut() {
            events.on_start_streaming(&self.sender, &mut args);
        }
        self.sender.context.respond_errors(args)
    }

    fn on_stop_streaming(&mut self, header: &MessageHeader, request: StopStreaming) -> Result<()> {
        let mut args = RequestArgs::new(*header, request);
        if let Some(events) = self.events.as_mut() {
            events.on_stop_streaming(&self.sender, &mut args);
        }
        self.sender.context.respond_errors(args)
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

impl ProtocolHandler for StreamingProducer {
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

#[derive(Clone)]
pub struct StreamingConsumerSender {
    context: HandlerContext,
}

impl StreamingConsumerSender {
    pub fn context(&self) -> &HandlerContext {
        &self.context
    }

    pub fn start_streaming(&self) -> Result<MessageId> {
        self.context.send_request(&StartStreaming {})
    }

    pub fn stop_streaming(&self) -> Result<MessageId> {
        self.context.send_request(&StopStreaming {})
    }
}

pub trait StreamingConsumerEvents: Send {
    fn on_session_opened(&mut self, _sender: &StreamingConsumerSender) {}

    fn on_session_closed(&mut self, _sender: &StreamingConsumerSender) {}

    fn on_channel_metadata(&mut self, _sender: &StreamingConsumerSender, _args: &MessageArgs<ChannelMetadata>) {}

    fn on_channel_data(&mut self, _sender: &StreamingConsumerSender, _args: &MessageArgs<ChannelData>) {}

    fn on_protocol_exception(&mut self, _sender: &StreamingConsumerSender, _args: &MessageArgs<ProtocolException>) {}
}

/// ChannelStreaming 1.2 handler in the consumer role.
pub struct StreamingConsumer {
    sender: StreamingConsumerSender,
    router: Arc<Router<Self>>,
    events: Option<Box<dyn StreamingConsumerEvents>>,
}

impl StreamingConsumer {
    pub fn new(
        session: Arc<SessionContext>,
        config: &CapabilityConfig,
        events: Option<Box<dyn StreamingConsumerEvents>>,
    ) -> Self {
        let router = Router::new(Protocol::ChannelStreaming)
            .route(Self::on_channel_metadata)
            .route(Self::on_channel_data)
            .route(Self::on_protocol_exception)
            .route(Self::on_acknowledge);
        Self {
            sender: StreamingConsumerSender {
                context: HandlerContext::new(Protocol::ChannelStreaming, Role::Consumer, session, config),
            },
            router: Arc::new(router),
            events,
        }
    }

    pub fn sender(&self) -> StreamingConsumerSender {
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

    fn on_protocol_exception(&mut self, header: &MessageHeader, body: ProtocolException) -> Result<()> {
        warn!(correlation = %header.correlation_id, error = ?body.error, "producer reported exception");
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

impl ProtocolHandler for StreamingConsumer {
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
