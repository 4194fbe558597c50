//! Session handshake, inbound dispatch and lifecycle.

use super::context::SessionContext;
use super::transport::Transport;
use crate::config::SessionConfig;
use crate::error::{ErrorCode, ErrorInfo, EtpError, Result};
use crate::messages::core::{
    Acknowledge, CloseSession, OpenSession, Ping, Pong, ProtocolException, RequestSession,
    SupportedProtocol,
};
use crate::messages::{
    decode_frame, MessageBody, MessageFlags, MessageHeader, MultiPartTracker, PartProgress,
    RawBody, ACKNOWLEDGE, PROTOCOL_EXCEPTION,
};
use crate::protocol::ProtocolHandler;
use crate::types::{EtpVersion, MessageId, Protocol, Role, SessionId, Timestamp, Uuid};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Which end of the handshake this session is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Endpoint {
    Client,
    Server,
}

/// Lifecycle notifications for things living beyond one handler.
pub trait SessionObserver: Send + Sync {
    fn session_opened(&self, _session_id: SessionId, _version: EtpVersion) {}

    /// Called exactly once per session, clean close or not.
    fn session_closed(&self, session_id: SessionId, reason: &str);
}

/// Lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Pending,
    Open,
    Closed,
}

/// One logical ETP connection.
///
/// Owns the registered handlers and dispatches every inbound frame. Handlers
/// become active when the handshake accepts their protocol; inbound messages
/// for anything else are rejected.
pub struct Session {
    endpoint: Endpoint,
    config: SessionConfig,
    context: Arc<SessionContext>,
    instance_id: Uuid,
    handlers: Vec<Box<dyn ProtocolHandler>>,
    /// Protocol id to index in `handlers`, filled by the handshake.
    active: HashMap<u16, usize>,
    observers: Vec<Arc<dyn SessionObserver>>,
    parts: MultiPartTracker,
    counterpart_application: Option<String>,
}

impl Session {
    pub fn client(config: SessionConfig, transport: Arc<dyn Transport>) -> Self {
        Self::new(Endpoint::Client, config, transport)
    }

    pub fn server(config: SessionConfig, transport: Arc<dyn Transport>) -> Self {
        Self::new(Endpoint::Server, config, transport)
    }

    fn new(endpoint: Endpoint, config: SessionConfig, transport: Arc<dyn Transport>) -> Self {
        let context = Arc::new(SessionContext::new(config.version, config.encoding, transport));
        Self {
            endpoint,
            config,
            context,
            instance_id: Uuid::new_v4(),
            handlers: Vec::new(),
            active: HashMap::new(),
            observers: Vec::new(),
            parts: MultiPartTracker::new(),
            counterpart_application: None,
        }
    }

    /// Shared context handed to handler constructors.
    pub fn context(&self) -> Arc<SessionContext> {
        Arc::clone(&self.context)
    }

    pub fn id(&self) -> SessionId {
        self.context.id()
    }

    pub fn version(&self) -> EtpVersion {
        self.context.version()
    }

    pub fn endpoint(&self) -> Endpoint {
        self.endpoint
    }

    pub fn state(&self) -> SessionState {
        if self.context.is_closed() {
            SessionState::Closed
        } else if self.context.is_open() {
            SessionState::Open
        } else {
            SessionState::Pending
        }
    }

    pub fn is_open(&self) -> bool {
        self.context.is_open()
    }

    pub fn counterpart_application(&self) -> Option<&str> {
        self.counterpart_application.as_deref()
    }

    /// Register a handler. One handler per (protocol, role).
    pub fn register_handler(&mut self, handler: Box<dyn ProtocolHandler>) -> Result<()> {
        if self.state() != SessionState::Pending {
            return Err(EtpError::InvalidState(
                "handlers must be registered before the session opens".to_string(),
            ));
        }
        let key = (handler.protocol(), handler.role());
        if self
            .handlers
            .iter()
            .any(|h| (h.protocol(), h.role()) == key)
        {
            return Err(EtpError::InvalidArgument(format!(
                "handler already registered for {} as {:?}",
                key.0, key.1
            )));
        }
        self.handlers.push(handler);
        Ok(())
    }

    pub fn add_observer(&mut self, observer: Arc<dyn SessionObserver>) {
        self.observers.push(observer);
    }

    /// Whether a handler for `protocol` was accepted by the handshake.
    pub fn is_protocol_active(&self, protocol: Protocol) -> bool {
        self.active.contains_key(&protocol.id())
    }

    /// Inbound multi-part exchanges still waiting for their final part.
    pub fn open_exchanges(&self) -> usize {
        self.parts.open_exchanges()
    }

    // --- Handshake ---

    /// Client side: offer every registered handler's protocol to the server.
    pub fn request_session(&mut self) -> Result<MessageId> {
        if self.endpoint != Endpoint::Client {
            return Err(EtpError::InvalidState(
                "only a client requests a session".to_string(),
            ));
        }
        let protocol_version = self.version().to_string();
        let requested_protocols = self
            .handlers
            .iter()
            .map(|h| SupportedProtocol {
                protocol: h.protocol().id(),
                protocol_version: protocol_version.clone(),
                role: h.role().counterpart(),
                protocol_capabilities: h.capabilities(),
            })
            .collect();

        let request = RequestSession {
            application_name: self.config.application_name.clone(),
            application_version: self.config.application_version.clone(),
            client_instance_id: self.instance_id,
            requested_protocols,
            supported_data_objects: vec!["*".to_string()],
            supported_formats: vec!["xml".to_string()],
            current_date_time: Timestamp::now().0,
            protocol_version,
        };
        debug!(application = %request.application_name, "requesting session");
        self.send_core(&request, MessageId::NONE)
    }

    fn on_request_session(&mut self, header: &MessageHeader, request: RequestSession) -> Result<()> {
        if self.endpoint != Endpoint::Server || self.state() != SessionState::Pending {
            return self.send_error(
                header,
                ErrorInfo::new(ErrorCode::InvalidState, "session already requested"),
            );
        }
        if request.protocol_version != self.version().to_string() {
            return self.send_error(
                header,
                ErrorInfo::new(
                    ErrorCode::NoSupportedProtocols,
                    format!(
                        "requested ETP {} but this server speaks {}",
                        request.protocol_version,
                        self.version()
                    ),
                ),
            );
        }

        let mut matched = Vec::new();
        for requested in &request.requested_protocols {
            let found = self
                .handlers
                .iter()
                .position(|h| h.protocol().id() == requested.protocol && h.role() == requested.role);
            match found {
                Some(index) => matched.push((index, requested)),
                None => debug!(
                    protocol = requested.protocol,
                    role = ?requested.role,
                    "requested protocol not supported"
                ),
            }
        }

        if matched.is_empty() {
            return self.send_error(
                header,
                ErrorInfo::new(
                    ErrorCode::NoSupportedProtocols,
                    "none of the requested protocols are supported",
                ),
            );
        }

        // Handlers see the session id when they are opened.
        let session_id = SessionId::new();
        self.context.set_id(session_id);

        let mut accepted = Vec::with_capacity(matched.len());
        for (index, requested) in matched {
            let handler = &mut self.handlers[index];
            handler.on_session_opened(requested.protocol_capabilities.clone());
            accepted.push(SupportedProtocol {
                protocol: requested.protocol,
                protocol_version: requested.protocol_version.clone(),
                role: handler.role(),
                protocol_capabilities: handler.capabilities(),
            });
            self.active.insert(requested.protocol, index);
        }

        self.counterpart_application = Some(request.application_name.clone());
        self.context.mark_open();

        let open = OpenSession {
            application_name: self.config.application_name.clone(),
            application_version: self.config.application_version.clone(),
            server_instance_id: self.instance_id,
            supported_protocols: accepted,
            supported_data_objects: request.supported_data_objects,
            supported_formats: request.supported_formats,
            session_id: session_id.0,
            current_date_time: Timestamp::now().0,
        };
        self.send_core(&open, header.message_id)?;

        info!(
            session = %session_id,
            client = %request.application_name,
            protocols = self.active.len(),
            "session opened"
        );
        self.notify_opened();
        Ok(())
    }

    fn on_open_session(&mut self, header: &MessageHeader, open: OpenSession) -> Result<()> {
        if self.endpoint != Endpoint::Client || self.state() != SessionState::Pending {
            return self.send_error(
                header,
                ErrorInfo::new(ErrorCode::InvalidState, "unexpected OpenSession"),
            );
        }

        let session_id = SessionId(open.session_id);
        self.context.set_id(session_id);

        for supported in &open.supported_protocols {
            let client_role = supported.role.counterpart();
            let found = self
                .handlers
                .iter()
                .position(|h| h.protocol().id() == supported.protocol && h.role() == client_role);
            if let Some(index) = found {
                self.handlers[index].on_session_opened(supported.protocol_capabilities.clone());
                self.active.insert(supported.protocol, index);
            }
        }

        self.counterpart_application = Some(open.application_name.clone());
        self.context.mark_open();

        info!(
            session = %session_id,
            server = %open.application_name,
            protocols = self.active.len(),
            "session opened"
        );
        self.notify_opened();
        Ok(())
    }

    fn notify_opened(&self) {
        let id = self.id();
        let version = self.version();
        for observer in &self.observers {
            observer.session_opened(id, version);
        }
    }

    // --- Dispatch ---

    /// Decode and dispatch one inbound frame.
    ///
    /// Protocol errors are reported to the counterpart as ProtocolException;
    /// only a failure to send is returned.
    pub fn handle_frame(&mut self, frame: &[u8]) -> Result<()> {
        if self.context.is_closed() {
            return Err(EtpError::SessionClosed);
        }

        let (header, body) = match decode_frame(self.context.encoding(), frame) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(session = %self.id(), error = %e, "undecodable frame");
                return self.send_exception(
                    Protocol::Core,
                    MessageId::NONE,
                    ErrorInfo::new(ErrorCode::InvalidMessage, e.to_string()),
                );
            }
        };
        trace!(
            session = %self.id(),
            protocol = header.protocol,
            message_type = header.message_type,
            id = %header.message_id,
            correlation = %header.correlation_id,
            "received"
        );

        if let PartProgress::Continuing { parts } = self.parts.observe(&header) {
            trace!(correlation = %header.correlation_id, parts, "multi-part continuing");
        }

        if header.is_compressed() {
            return self.send_error(
                &header,
                ErrorInfo::new(
                    ErrorCode::CompressionNotSupported,
                    "compressed messages are not supported",
                ),
            );
        }

        if header.requests_acknowledge() && header.message_type != ACKNOWLEDGE {
            self.send_acknowledge(&header)?;
        }

        if header.protocol == Protocol::Core.id() {
            return self.handle_core(&header, body);
        }

        if !self.is_open() {
            return self.send_error(
                &header,
                ErrorInfo::new(ErrorCode::InvalidState, "session is not open"),
            );
        }

        let index = match self.active.get(&header.protocol) {
            Some(index) => *index,
            None => {
                return self.send_error(
                    &header,
                    EtpError::UnsupportedProtocol(header.protocol).to_error_info(),
                );
            }
        };

        if let Err(e) = self.handlers[index].handle_message(&header, body) {
            if matches!(e, EtpError::SessionClosed) {
                return Err(e);
            }
            warn!(
                session = %self.id(),
                protocol = header.protocol,
                message_type = header.message_type,
                error = %e,
                "message handling failed"
            );
            return self.send_error(&header, e.to_error_info());
        }
        Ok(())
    }

    fn handle_core(&mut self, header: &MessageHeader, body: RawBody) -> Result<()> {
        match self.route_core(header, body) {
            Err(EtpError::SessionClosed) => Err(EtpError::SessionClosed),
            Err(e) => self.send_error(header, e.to_error_info()),
            Ok(()) => Ok(()),
        }
    }

    fn route_core(&mut self, header: &MessageHeader, body: RawBody) -> Result<()> {
        match header.message_type {
            RequestSession::MESSAGE_TYPE => {
                let request = body.decode()?;
                self.on_request_session(header, request)
            }
            OpenSession::MESSAGE_TYPE => {
                let open = body.decode()?;
                self.on_open_session(header, open)
            }
            CloseSession::MESSAGE_TYPE => {
                let close: CloseSession = body.decode()?;
                info!(session = %self.id(), reason = %close.reason, "counterpart closed session");
                self.teardown(&close.reason);
                Ok(())
            }
            Ping::MESSAGE_TYPE => {
                let _: Ping = body.decode()?;
                self.send_core(
                    &Pong {
                        current_date_time: Timestamp::now().0,
                    },
                    header.message_id,
                )
                .map(|_| ())
            }
            Pong::MESSAGE_TYPE => {
                let pong: Pong = body.decode()?;
                debug!(session = %self.id(), at = pong.current_date_time, "pong");
                Ok(())
            }
            PROTOCOL_EXCEPTION => {
                let exception: ProtocolException = body.decode()?;
                warn!(
                    session = %self.id(),
                    correlation = %header.correlation_id,
                    error = ?exception.error,
                    errors = exception.errors.len(),
                    "core protocol exception"
                );
                Ok(())
            }
            ACKNOWLEDGE => {
                trace!(correlation = %header.correlation_id, "acknowledged");
                Ok(())
            }
            other => Err(EtpError::InvalidMessageType {
                protocol: Protocol::Core.id(),
                message_type: other,
            }),
        }
    }

    // --- Sending ---

    fn send_core<B: MessageBody>(&self, body: &B, correlation_id: MessageId) -> Result<MessageId> {
        self.context
            .send_message(Protocol::Core, body, correlation_id, MessageFlags::FINAL_PART)
    }

    fn send_acknowledge(&self, header: &MessageHeader) -> Result<()> {
        let protocol = self.reply_protocol(header.protocol);
        self.context
            .send_message(protocol, &Acknowledge {}, header.message_id, MessageFlags::FINAL_PART)?;
        Ok(())
    }

    /// Report an error correlated to `header`, in the header's protocol.
    fn send_error(&self, header: &MessageHeader, error: ErrorInfo) -> Result<()> {
        self.send_exception(self.reply_protocol(header.protocol), header.message_id, error)
    }

    fn send_exception(&self, protocol: Protocol, correlation_id: MessageId, error: ErrorInfo) -> Result<()> {
        debug!(session = %self.id(), error = %error, "sending protocol exception");
        self.context.send_message(
            protocol,
            &ProtocolException::single(error),
            correlation_id,
            MessageFlags::FINAL_PART,
        )?;
        Ok(())
    }

    /// Replies go in the request's protocol, or Core when that protocol is
    /// unknown or the session is not open yet.
    fn reply_protocol(&self, protocol: u16) -> Protocol {
        match Protocol::from_id(protocol) {
            Some(p) if p == Protocol::Core || self.is_open() => p,
            _ => Protocol::Core,
        }
    }

    // --- Close ---

    /// Close cleanly, telling the counterpart why.
    pub fn close(&mut self, reason: &str) -> Result<()> {
        if self.context.is_closed() {
            return Ok(());
        }
        let sent = self.send_core(
            &CloseSession {
                reason: reason.to_string(),
            },
            MessageId::NONE,
        );
        self.teardown(reason);
        sent.map(|_| ())
    }

    /// The transport went away without a CloseSession.
    pub fn on_transport_closed(&mut self) {
        self.teardown("transport closed");
    }

    fn teardown(&mut self, reason: &str) {
        if !self.context.mark_closed() {
            return;
        }
        let id = self.id();
        for handler in &mut self.handlers {
            handler.on_session_closed();
        }
        for observer in &self.observers {
            observer.session_closed(id, reason);
        }
        self.parts.clear();
        self.context.transport().close();
        info!(session = %id, reason, "session closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{decode_frame, encode_frame, Encoding};
    use crate::session::transport::memory_pair;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        opened: Mutex<Vec<SessionId>>,
        closed: Mutex<Vec<(SessionId, String)>>,
    }

    impl SessionObserver for Recorder {
        fn session_opened(&self, session_id: SessionId, _version: EtpVersion) {
            self.opened.lock().push(session_id);
        }

        fn session_closed(&self, session_id: SessionId, reason: &str) {
            self.closed.lock().push((session_id, reason.to_string()));
        }
    }

    fn frame<B: MessageBody>(protocol: Protocol, id: i64, flags: MessageFlags, body: &B) -> Vec<u8> {
        let mut header = MessageHeader::new(protocol.id(), B::MESSAGE_TYPE);
        header.message_id = MessageId(id);
        header.message_flags = flags;
        encode_frame(Encoding::Binary, &header, body).unwrap()
    }

    #[test]
    fn test_ping_gets_correlated_pong() {
        let (a, b) = memory_pair();
        let mut server = Session::server(SessionConfig::v12(), a.transport.clone());

        server
            .handle_frame(&frame(Protocol::Core, 4, MessageFlags::FINAL_PART, &Ping { current_date_time: 0 }))
            .unwrap();

        let (header, _) = decode_frame(Encoding::Binary, &b.inbox.try_recv().unwrap()).unwrap();
        assert_eq!(header.message_type, Pong::MESSAGE_TYPE);
        assert_eq!(header.correlation_id, MessageId(4));
    }

    #[test]
    fn test_acknowledge_and_compression() {
        let (a, b) = memory_pair();
        let mut server = Session::server(SessionConfig::v12(), a.transport.clone());

        let flags = MessageFlags::FINAL_PART | MessageFlags::ACKNOWLEDGE;
        server
            .handle_frame(&frame(Protocol::Core, 9, flags, &Ping { current_date_time: 0 }))
            .unwrap();
        let (header, _) = decode_frame(Encoding::Binary, &b.inbox.try_recv().unwrap()).unwrap();
        assert_eq!(header.message_type, ACKNOWLEDGE);
        assert_eq!(header.correlation_id, MessageId(9));
        let _pong = b.inbox.try_recv().unwrap();

        let flags = MessageFlags::FINAL_PART | MessageFlags::COMPRESSED;
        server
            .handle_frame(&frame(Protocol::Core, 10, flags, &Ping { current_date_time: 0 }))
            .unwrap();
        let (header, body) = decode_frame(Encoding::Binary, &b.inbox.try_recv().unwrap()).unwrap();
        assert_eq!(header.message_type, PROTOCOL_EXCEPTION);
        let exception: ProtocolException = body.decode().unwrap();
        assert_eq!(
            exception.error.unwrap().error_code(),
            ErrorCode::CompressionNotSupported
        );
    }

    #[test]
    fn test_request_without_matching_handler_is_refused() {
        let (a, b) = memory_pair();
        let mut server = Session::server(SessionConfig::v12(), a.transport.clone());

        let request = RequestSession {
            application_name: "client".into(),
            application_version: "1".into(),
            client_instance_id: Uuid::new_v4(),
            requested_protocols: vec![SupportedProtocol {
                protocol: Protocol::ChannelSubscribe.id(),
                protocol_version: "1.2".into(),
                role: Role::Store,
                protocol_capabilities: Default::default(),
            }],
            supported_data_objects: vec![],
            supported_formats: vec![],
            current_date_time: 0,
            protocol_version: "1.2".into(),
        };
        server
            .handle_frame(&frame(Protocol::Core, 1, MessageFlags::FINAL_PART, &request))
            .unwrap();

        let (_, body) = decode_frame(Encoding::Binary, &b.inbox.try_recv().unwrap()).unwrap();
        let exception: ProtocolException = body.decode().unwrap();
        assert_eq!(
            exception.error.unwrap().error_code(),
            ErrorCode::NoSupportedProtocols
        );
        assert_eq!(server.state(), SessionState::Pending);
    }

    #[test]
    fn test_close_notifies_observers_once() {
        let (a, b) = memory_pair();
        let mut session = Session::client(SessionConfig::v12(), a.transport.clone());
        let recorder = Arc::new(Recorder::default());
        session.add_observer(recorder.clone());

        session.close("done").unwrap();
        session.on_transport_closed();

        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(recorder.closed.lock().len(), 1);
        assert_eq!(recorder.closed.lock()[0].1, "done");
        let (header, _) = decode_frame(Encoding::Binary, &b.inbox.try_recv().unwrap()).unwrap();
        assert_eq!(header.message_type, CloseSession::MESSAGE_TYPE);
        assert!(recorder.opened.lock().is_empty());
    }
}
