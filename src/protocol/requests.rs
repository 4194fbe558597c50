//! Registry of cancellable in-flight requests.

use crate::error::{EtpError, Result};
use crate::messages::MessageHeader;
use crate::types::{MessageId, Uuid};
use std::collections::HashMap;

/// A request that may still be answered or cancelled.
#[derive(Clone, Debug, PartialEq)]
pub struct PendingRequest {
    pub request_uuid: Uuid,
    pub header: MessageHeader,
    pub cancelled: bool,
}

/// Bodies carrying a request UUID.
pub trait RequestUuid {
    fn request_uuid(&self) -> Uuid;
}

impl RequestUuid for crate::messages::v12::GetRanges {
    fn request_uuid(&self) -> Uuid {
        self.request_uuid
    }
}

impl RequestUuid for crate::messages::v12::CancelGetRanges {
    fn request_uuid(&self) -> Uuid {
        self.request_uuid
    }
}

/// Pending requests keyed by request UUID.
#[derive(Debug, Default)]
pub struct PendingRequests {
    by_uuid: HashMap<Uuid, PendingRequest>,
    by_message: HashMap<MessageId, Uuid>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request. A UUID that is already pending is rejected.
    pub fn try_register(&mut self, request_uuid: Uuid, header: MessageHeader) -> Result<()> {
        if self.by_uuid.contains_key(&request_uuid) {
            return Err(EtpError::RequestUuidRejected(request_uuid));
        }
        self.by_message.insert(header.message_id, request_uuid);
        self.by_uuid.insert(
            request_uuid,
            PendingRequest {
                request_uuid,
                header,
                cancelled: false,
            },
        );
        Ok(())
    }

    /// Register the UUID found in a request body.
    pub fn try_register_body<B: RequestUuid>(&mut self, body: &B, header: MessageHeader) -> Result<()> {
        self.try_register(body.request_uuid(), header)
    }

    pub fn try_get(&self, request_uuid: &Uuid) -> Option<&PendingRequest> {
        self.by_uuid.get(request_uuid)
    }

    /// Find the request a response correlates to.
    pub fn find_by_message(&self, message_id: MessageId) -> Option<&PendingRequest> {
        self.by_message
            .get(&message_id)
            .and_then(|uuid| self.by_uuid.get(uuid))
    }

    pub fn try_unregister(&mut self, request_uuid: &Uuid) -> Option<PendingRequest> {
        let pending = self.by_uuid.remove(request_uuid)?;
        self.by_message.remove(&pending.header.message_id);
        Some(pending)
    }

    /// Mark cancelled and remove. Unknown UUIDs are `NotFound`.
    pub fn cancel(&mut self, request_uuid: &Uuid) -> Result<PendingRequest> {
        let mut pending = self
            .try_unregister(request_uuid)
            .ok_or_else(|| EtpError::NotFound(format!("request {}", request_uuid)))?;
        pending.cancelled = true;
        Ok(pending)
    }

    pub fn len(&self) -> usize {
        self.by_uuid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_uuid.is_empty()
    }

    pub fn clear(&mut self) {
        self.by_uuid.clear();
        self.by_message.clear();
    }
}
