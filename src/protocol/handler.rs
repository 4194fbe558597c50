//! The generic protocol handler: routing, send helpers and request events.
//!
//! A handler is one (protocol, role) pair of a session. It owns a [`Router`]
//! built at construction that maps message types to typed decode-and-handle
//! functions, and a [`HandlerContext`] used to send. Request handling follows
//! one shape everywhere:
//!
//! 1. decode the body and build request args with empty success/error
//!    containers,
//! 2. pass them to the events delegate, which fills the containers,
//! 3. unless the delegate cancelled, send the response via
//!    [`HandlerContext::respond_map`] or [`HandlerContext::respond_list`].

use super::capabilities::{Capabilities, NegotiatedCapabilities, MAX_RANGE_CHANNELS};
use super::requests::{PendingRequest, PendingRequests};
use crate::config::CapabilityConfig;
use crate::error::{ErrorInfo, EtpError, Result};
use crate::messages::core::{Acknowledge, ProtocolException};
use crate::messages::{MessageBody, MessageFlags, MessageHeader, RawBody};
use crate::session::SessionContext;
use crate::types::{EtpVersion, MessageId, Protocol, Role, SessionId, Uuid};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// One (protocol, role) endpoint registered with a session.
pub trait ProtocolHandler: Send {
    fn protocol(&self) -> Protocol;

    fn role(&self) -> Role;

    /// Capabilities advertised for this protocol during the handshake.
    fn capabilities(&self) -> Capabilities;

    /// Store the counterpart's capabilities once the session opens.
    fn on_session_opened(&mut self, counterpart: Capabilities);

    fn on_session_closed(&mut self) {}

    /// Route one inbound message of this handler's protocol.
    fn handle_message(&mut self, header: &MessageHeader, body: RawBody) -> Result<()>;
}

type Route<H> = Arc<dyn Fn(&mut H, &MessageHeader, RawBody) -> Result<()> + Send + Sync>;

/// Message type to typed handler function table.
pub struct Router<H> {
    protocol: Protocol,
    routes: HashMap<u16, (&'static str, Route<H>)>,
}

impl<H: 'static> Router<H> {
    pub fn new(protocol: Protocol) -> Self {
        Self {
            protocol,
            routes: HashMap::new(),
        }
    }

    /// Register the function handling body type `B`.
    pub fn route<B: MessageBody>(mut self, handle: fn(&mut H, &MessageHeader, B) -> Result<()>) -> Self {
        let route: Route<H> = Arc::new(move |handler, header, body| {
            let body: B = body.decode()?;
            handle(handler, header, body)
        });
        self.routes.insert(B::MESSAGE_TYPE, (B::NAME, route));
        self
    }

    /// Find the route for a header, or fail with `EINVALID_MESSAGETYPE`.
    pub fn lookup(&self, header: &MessageHeader) -> Result<Route<H>> {
        self.routes
            .get(&header.message_type)
            .map(|(_, route)| Arc::clone(route))
            .ok_or(EtpError::InvalidMessageType {
                protocol: self.protocol.id(),
                message_type: header.message_type,
            })
    }

    pub fn message_name(&self, message_type: u16) -> Option<&'static str> {
        self.routes.get(&message_type).map(|(name, _)| *name)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Inbound request whose response is a keyed map.
#[derive(Debug)]
pub struct MapRequestArgs<Req, T> {
    pub header: MessageHeader,
    pub request: Req,
    pub response: BTreeMap<String, T>,
    pub errors: BTreeMap<String, ErrorInfo>,
    /// Fails the whole request; suppresses `response` and `errors`.
    pub final_error: Option<ErrorInfo>,
    /// Set to send nothing.
    pub cancel: bool,
}

impl<Req, T> MapRequestArgs<Req, T> {
    pub fn new(header: MessageHeader, request: Req) -> Self {
        Self {
            header,
            request,
            response: BTreeMap::new(),
            errors: BTreeMap::new(),
            final_error: None,
            cancel: false,
        }
    }
}

/// Inbound request whose response is a list, possibly split across parts.
#[derive(Debug)]
pub struct ListRequestArgs<Req, T> {
    pub header: MessageHeader,
    pub request: Req,
    pub response: Vec<T>,
    pub errors: BTreeMap<String, ErrorInfo>,
    pub final_error: Option<ErrorInfo>,
    pub cancel: bool,
}

impl<Req, T> ListRequestArgs<Req, T> {
    pub fn new(header: MessageHeader, request: Req) -> Self {
        Self {
            header,
            request,
            response: Vec::new(),
            errors: BTreeMap::new(),
            final_error: None,
            cancel: false,
        }
    }
}

/// Inbound message answered only by errors, if any.
#[derive(Debug)]
pub struct RequestArgs<Req> {
    pub header: MessageHeader,
    pub request: Req,
    pub errors: BTreeMap<String, ErrorInfo>,
    pub final_error: Option<ErrorInfo>,
}

impl<Req> RequestArgs<Req> {
    pub fn new(header: MessageHeader, request: Req) -> Self {
        Self {
            header,
            request,
            errors: BTreeMap::new(),
            final_error: None,
        }
    }
}

/// Inbound notification or response.
#[derive(Clone, Debug)]
pub struct MessageArgs<B> {
    pub header: MessageHeader,
    pub body: B,
}

/// Send helpers and shared state of one handler.
///
/// Cheap to clone; clones share negotiated capabilities and pending requests.
#[derive(Clone)]
pub struct HandlerContext {
    protocol: Protocol,
    role: Role,
    session: Arc<SessionContext>,
    capabilities: Arc<RwLock<NegotiatedCapabilities>>,
    requests: Arc<Mutex<PendingRequests>>,
}

impl HandlerContext {
    pub fn new(
        protocol: Protocol,
        role: Role,
        session: Arc<SessionContext>,
        config: &CapabilityConfig,
    ) -> Self {
        Self {
            protocol,
            role,
            session,
            capabilities: Arc::new(RwLock::new(NegotiatedCapabilities::new(config))),
            requests: Arc::new(Mutex::new(PendingRequests::new())),
        }
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn session_id(&self) -> SessionId {
        self.session.id()
    }

    pub fn version(&self) -> EtpVersion {
        self.session.version()
    }

    pub fn is_open(&self) -> bool {
        self.session.is_open()
    }

    // --- Capabilities ---

    pub fn local_capabilities(&self) -> Capabilities {
        self.capabilities.read().local().clone()
    }

    pub fn counterpart_capabilities(&self) -> Option<Capabilities> {
        self.capabilities.read().counterpart().cloned()
    }

    pub fn set_counterpart_capabilities(&self, capabilities: Capabilities) {
        self.capabilities.write().set_counterpart(capabilities);
    }

    pub fn counterpart_max_data_item_count(&self) -> usize {
        self.capabilities.read().counterpart_max_data_item_count()
    }

    pub fn counterpart_max_index_count(&self) -> usize {
        self.capabilities.read().counterpart_max_index_count()
    }

    pub fn counterpart_max_range_channels(&self) -> usize {
        self.capabilities.read().counterpart_max_range_channels()
    }

    /// Channels this end accepts in one range request.
    pub fn local_max_range_channels(&self) -> usize {
        self.capabilities
            .read()
            .local()
            .get_i64(MAX_RANGE_CHANNELS)
            .map_or(usize::MAX, |max| max.max(1) as usize)
    }

    // --- Pending requests ---

    pub fn try_register_request(&self, request_uuid: Uuid, header: MessageHeader) -> Result<()> {
        self.requests.lock().try_register(request_uuid, header)
    }

    pub fn try_get_request(&self, request_uuid: &Uuid) -> Option<PendingRequest> {
        self.requests.lock().try_get(request_uuid).cloned()
    }

    pub fn find_request(&self, message_id: MessageId) -> Option<PendingRequest> {
        self.requests.lock().find_by_message(message_id).cloned()
    }

    pub fn try_unregister_request(&self, request_uuid: &Uuid) -> Option<PendingRequest> {
        self.requests.lock().try_unregister(request_uuid)
    }

    pub fn cancel_request(&self, request_uuid: &Uuid) -> Result<PendingRequest> {
        self.requests.lock().cancel(request_uuid)
    }

    pub fn pending_request_count(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn clear_requests(&self) {
        self.requests.lock().clear();
    }

    // --- Sending ---

    /// Send with explicit correlation and flags.
    pub fn send<B: MessageBody>(
        &self,
        body: &B,
        correlation_id: MessageId,
        flags: MessageFlags,
    ) -> Result<MessageId> {
        self.session
            .send_message(self.protocol, body, correlation_id, flags)
    }

    /// Start a new exchange.
    pub fn send_request<B: MessageBody>(&self, body: &B) -> Result<MessageId> {
        self.send(body, MessageId::NONE, MessageFlags::FINAL_PART)
    }

    /// Send a request and register it as cancellable under `request_uuid`.
    ///
    /// The registry stays locked from the duplicate check until the sent
    /// header is registered, so a response dispatched on another thread
    /// always finds it. Nothing is registered if the send fails.
    pub fn send_cancellable_request<B: MessageBody>(
        &self,
        body: &B,
        request_uuid: Uuid,
    ) -> Result<MessageId> {
        let mut requests = self.requests.lock();
        if requests.try_get(&request_uuid).is_some() {
            return Err(EtpError::RequestUuidRejected(request_uuid));
        }
        let message_id = self.send_request(body)?;
        let mut header = MessageHeader::new(self.protocol.id(), B::MESSAGE_TYPE);
        header.message_id = message_id;
        header.message_flags = MessageFlags::FINAL_PART;
        requests.try_register(request_uuid, header)?;
        Ok(message_id)
    }

    /// Answer `request` with one part.
    pub fn send_response<B: MessageBody>(
        &self,
        body: &B,
        request: &MessageHeader,
        flags: MessageFlags,
    ) -> Result<MessageId> {
        self.send(body, request.message_id, flags)
    }

    /// Uncorrelated single-part message.
    pub fn send_notification<B: MessageBody>(&self, body: &B) -> Result<MessageId> {
        self.send(body, MessageId::NONE, MessageFlags::FINAL_PART)
    }

    /// Streaming data; same framing as a notification.
    pub fn send_data<B: MessageBody>(&self, body: &B) -> Result<MessageId> {
        self.send_notification(body)
    }

    /// Acknowledge a message that asked for it.
    pub fn send_acknowledge(&self, request: &MessageHeader) -> Result<MessageId> {
        self.send(&Acknowledge {}, request.message_id, MessageFlags::FINAL_PART)
    }

    /// Send a ProtocolException in this handler's protocol.
    ///
    /// v1.1 has no keyed errors, so a keyed exception goes out as one message
    /// per key with the last carrying `flags`.
    pub fn send_exception(
        &self,
        request: Option<&MessageHeader>,
        exception: ProtocolException,
        flags: MessageFlags,
    ) -> Result<()> {
        let correlation_id = request.map_or(MessageId::NONE, |h| h.message_id);

        if self.version() == EtpVersion::V11 && !exception.errors.is_empty() {
            let mut parts: Vec<ProtocolException> = Vec::new();
            if let Some(error) = exception.error {
                parts.push(ProtocolException::single(error));
            }
            for (key, error) in exception.errors {
                parts.push(ProtocolException::single(ErrorInfo {
                    message: format!("{}: {}", key, error.message),
                    code: error.code,
                }));
            }
            let last = parts.len() - 1;
            for (i, part) in parts.into_iter().enumerate() {
                let part_flags = if i == last {
                    flags
                } else {
                    flags.without(MessageFlags::FINAL_PART) | MessageFlags::MULTI_PART
                };
                self.send(&part, correlation_id, part_flags)?;
            }
            return Ok(());
        }

        self.send(&exception, correlation_id, flags)?;
        Ok(())
    }

    /// Fail a whole request with a single error.
    pub fn send_final_error(&self, request: &MessageHeader, error: ErrorInfo) -> Result<()> {
        self.send_exception(
            Some(request),
            ProtocolException::single(error),
            MessageFlags::FINAL_PART,
        )
    }

    /// Send a keyed success map followed, if needed, by a keyed exception.
    ///
    /// The success response is always sent, even when empty. FinalPart goes
    /// on whichever message is sent last.
    pub fn send_map_response<B, T>(
        &self,
        request: &MessageHeader,
        response: BTreeMap<String, T>,
        errors: BTreeMap<String, ErrorInfo>,
        build: impl FnOnce(BTreeMap<String, T>) -> B,
    ) -> Result<()>
    where
        B: MessageBody,
    {
        let body = build(response);
        if errors.is_empty() {
            self.send_response(&body, request, MessageFlags::MULTI_PART_AND_FINAL_PART)?;
        } else {
            self.send_response(&body, request, MessageFlags::MULTI_PART)?;
            self.send_exception(
                Some(request),
                ProtocolException::keyed(errors),
                MessageFlags::MULTI_PART_AND_FINAL_PART,
            )?;
        }
        Ok(())
    }

    /// Send a list split into parts of at most `max_per_part` items, followed,
    /// if needed, by a keyed exception. An empty list still sends one part.
    ///
    /// Returns the number of response parts sent.
    pub fn send_list_response<B, T>(
        &self,
        request: &MessageHeader,
        items: Vec<T>,
        max_per_part: usize,
        errors: BTreeMap<String, ErrorInfo>,
        build: impl Fn(Vec<T>) -> B,
    ) -> Result<usize>
    where
        B: MessageBody,
    {
        let chunks = chunk(items, max_per_part);
        let count = chunks.len();

        for (i, part) in chunks.into_iter().enumerate() {
            let last = i + 1 == count && errors.is_empty();
            let flags = if last {
                MessageFlags::MULTI_PART_AND_FINAL_PART
            } else {
                MessageFlags::MULTI_PART
            };
            self.send_response(&build(part), request, flags)?;
        }

        if !errors.is_empty() {
            self.send_exception(
                Some(request),
                ProtocolException::keyed(errors),
                MessageFlags::MULTI_PART_AND_FINAL_PART,
            )?;
        }
        Ok(count)
    }

    /// Finish a map request after the events delegate ran.
    pub fn respond_map<Req, T, B>(
        &self,
        args: MapRequestArgs<Req, T>,
        build: impl FnOnce(BTreeMap<String, T>) -> B,
    ) -> Result<()>
    where
        B: MessageBody,
    {
        if args.cancel {
            return Ok(());
        }
        if let Some(error) = args.final_error {
            return self.send_final_error(&args.header, error);
        }
        self.send_map_response(&args.header, args.response, args.errors, build)
    }

    /// Finish a list request after the events delegate ran.
    pub fn respond_list<Req, T, B>(
        &self,
        args: ListRequestArgs<Req, T>,
        max_per_part: usize,
        build: impl Fn(Vec<T>) -> B,
    ) -> Result<()>
    where
        B: MessageBody,
    {
        if args.cancel {
            return Ok(());
        }
        if let Some(error) = args.final_error {
            return self.send_final_error(&args.header, error);
        }
        self.send_list_response(&args.header, args.response, max_per_part, args.errors, build)?;
        Ok(())
    }

    /// Report the errors of a request that has no success response.
    pub fn respond_errors<Req>(&self, args: RequestArgs<Req>) -> Result<()> {
        if let Some(error) = args.final_error {
            return self.send_final_error(&args.header, error);
        }
        if !args.errors.is_empty() {
            self.send_exception(
                Some(&args.header),
                ProtocolException::keyed(args.errors),
                MessageFlags::FINAL_PART,
            )?;
        }
        Ok(())
    }
}

/// Split into parts of at most `size` items; always at least one part.
pub(crate) fn chunk<T>(items: Vec<T>, size: usize) -> Vec<Vec<T>> {
    let size = size.max(1);
    if items.is_empty() {
        return vec![Vec::new()];
    }
    let mut parts = Vec::with_capacity(items.len() / size + 1);
    let mut current = Vec::with_capacity(size.min(items.len()));
    for item in items {
        current.push(item);
        if current.len() == size {
            parts.push(std::mem::replace(&mut current, Vec::new()));
        }
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}
