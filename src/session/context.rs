//! Shared, thread-safe part of a session used by every sender.

use super::transport::Transport;
use crate::error::{EtpError, Result};
use crate::messages::{encode_frame, Encoding, MessageBody, MessageFlags, MessageHeader};
use crate::types::{EtpVersion, MessageId, Protocol, SessionId};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Identity, encoding and outbound path of one session.
///
/// Cloned into every handler sender so that data can be pushed from threads
/// other than the session's dispatch thread.
pub struct SessionContext {
    id: RwLock<SessionId>,
    version: EtpVersion,
    encoding: Encoding,
    transport: Arc<dyn Transport>,
    /// Next outbound message id. Held until the frame is on the transport so
    /// ids reach the wire in order.
    next_message_id: Mutex<i64>,
    open: AtomicBool,
    closed: AtomicBool,
}

impl SessionContext {
    pub fn new(version: EtpVersion, encoding: Encoding, transport: Arc<dyn Transport>) -> Self {
        Self {
            id: RwLock::new(SessionId::nil()),
            version,
            encoding,
            transport,
            next_message_id: Mutex::new(1),
            open: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> SessionId {
        *self.id.read()
    }

    pub(crate) fn set_id(&self, id: SessionId) {
        *self.id.write() = id;
    }

    pub fn version(&self) -> EtpVersion {
        self.version
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.is_closed()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_open(&self) {
        self.open.store(true, Ordering::SeqCst);
    }

    /// Returns false if the session was already closed.
    pub(crate) fn mark_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Encode and send a body, assigning the next message id.
    ///
    /// Only Core messages may be sent before the session opens.
    pub fn send_message<B: MessageBody>(
        &self,
        protocol: Protocol,
        body: &B,
        correlation_id: MessageId,
        flags: MessageFlags,
    ) -> Result<MessageId> {
        if self.is_closed() {
            return Err(EtpError::SessionClosed);
        }
        if protocol != Protocol::Core && !self.is_open() {
            return Err(EtpError::InvalidState(format!(
                "session not open, cannot send {}",
                B::NAME
            )));
        }

        let mut next_id = self.next_message_id.lock();
        let message_id = MessageId(*next_id);
        let header = MessageHeader {
            protocol: protocol.id(),
            message_type: B::MESSAGE_TYPE,
            correlation_id,
            message_id,
            message_flags: flags,
        };
        let frame = encode_frame(self.encoding, &header, body)?;

        trace!(
            session = %self.id(),
            message = B::NAME,
            id = %message_id,
            correlation = %correlation_id,
            frame = %hex::encode(&frame),
            "send"
        );

        self.transport.send(frame)?;
        *next_id += 1;
        Ok(message_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::core::{CloseSession, Ping};
    use crate::messages::decode_frame;
    use crate::session::transport::memory_pair;

    #[test]
    fn test_message_ids_increase() {
        let (a, b) = memory_pair();
        let context = SessionContext::new(EtpVersion::V12, Encoding::Binary, a.transport.clone());

        let first = context
            .send_message(Protocol::Core, &Ping { current_date_time: 1 }, MessageId::NONE, MessageFlags::FINAL_PART)
            .unwrap();
        let second = context
            .send_message(Protocol::Core, &Ping { current_date_time: 2 }, first, MessageFlags::FINAL_PART)
            .unwrap();
        assert!(second > first);

        let frame = b.inbox.try_recv().unwrap();
        let (header, _) = decode_frame(Encoding::Binary, &frame).unwrap();
        assert_eq!(header.message_id, first);
        let frame = b.inbox.try_recv().unwrap();
        let (header, _) = decode_frame(Encoding::Binary, &frame).unwrap();
        assert_eq!(header.correlation_id, first);
    }

    #[test]
    fn test_concurrent_senders_keep_wire_order() {
        let (a, b) = memory_pair();
        let context = Arc::new(SessionContext::new(EtpVersion::V12, Encoding::Binary, a.transport.clone()));

        let senders: Vec<_> = (0..4)
            .map(|n| {
                let context = Arc::clone(&context);
                std::thread::spawn(move || {
                    for i in 0..2_000 {
                        context
                            .send_message(
                                Protocol::Core,
                                &Ping { current_date_time: n * 10_000 + i },
                                MessageId::NONE,
                                MessageFlags::FINAL_PART,
                            )
                            .unwrap();
                    }
                })
            })
            .collect();
        for sender in senders {
            sender.join().unwrap();
        }

        let mut last = MessageId::NONE;
        let mut received = 0;
        while let Ok(frame) = b.inbox.try_recv() {
            let (header, _) = decode_frame(Encoding::Binary, &frame).unwrap();
            assert!(header.message_id > last, "{} after {}", header.message_id, last);
            last = header.message_id;
            received += 1;
        }
        assert_eq!(received, 8_000);
        assert_eq!(last, MessageId(8_000));
    }

    #[test]
    fn test_non_core_send_requires_open_session() {
        let (a, _b) = memory_pair();
        let context = SessionContext::new(EtpVersion::V12, Encoding::Binary, a.transport.clone());
        let result = context.send_message(
            Protocol::ChannelSubscribe,
            &crate::messages::v12::CancelGetRanges {
                request_uuid: crate::types::Uuid::new_v4(),
            },
            MessageId::NONE,
            MessageFlags::FINAL_PART,
        );
        assert!(matches!(result, Err(EtpError::InvalidState(_))));

        context.mark_closed();
        let result = context.send_message(
            Protocol::Core,
            &CloseSession { reason: "bye".into() },
            MessageId::NONE,
            MessageFlags::FINAL_PART,
        );
        assert!(matches!(result, Err(EtpError::SessionClosed)));
    }
}
