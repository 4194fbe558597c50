//! Message header and flags.

use crate::types::{MessageId, Protocol};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Header flag bits.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct MessageFlags(pub u8);

impl MessageFlags {
    pub const NONE: MessageFlags = MessageFlags(0x00);
    pub const MULTI_PART: MessageFlags = MessageFlags(0x01);
    pub const FINAL_PART: MessageFlags = MessageFlags(0x02);
    pub const MULTI_PART_AND_FINAL_PART: MessageFlags = MessageFlags(0x03);
    pub const NO_DATA: MessageFlags = MessageFlags(0x04);
    pub const COMPRESSED: MessageFlags = MessageFlags(0x08);
    pub const ACKNOWLEDGE: MessageFlags = MessageFlags(0x10);

    pub fn contains(self, other: MessageFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn with(self, other: MessageFlags) -> Self {
        MessageFlags(self.0 | other.0)
    }

    pub fn without(self, other: MessageFlags) -> Self {
        MessageFlags(self.0 & !other.0)
    }
}

impl BitOr for MessageFlags {
    type Output = MessageFlags;

    fn bitor(self, rhs: Self) -> Self {
        self.with(rhs)
    }
}

impl BitOrAssign for MessageFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for MessageFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageFlags({:#04x})", self.0)
    }
}

/// Envelope header preceding every message body.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHeader {
    pub protocol: u16,
    pub message_type: u16,
    pub correlation_id: MessageId,
    pub message_id: MessageId,
    pub message_flags: MessageFlags,
}

impl MessageHeader {
    /// Header for a message not yet assigned an id.
    pub fn new(protocol: u16, message_type: u16) -> Self {
        Self {
            protocol,
            message_type,
            correlation_id: MessageId::NONE,
            message_id: MessageId::NONE,
            message_flags: MessageFlags::NONE,
        }
    }

    pub fn protocol(&self) -> Option<Protocol> {
        Protocol::from_id(self.protocol)
    }

    pub fn is_multi_part(&self) -> bool {
        self.message_flags.contains(MessageFlags::MULTI_PART)
    }

    pub fn is_final_part(&self) -> bool {
        self.message_flags.contains(MessageFlags::FINAL_PART)
    }

    pub fn is_compressed(&self) -> bool {
        self.message_flags.contains(MessageFlags::COMPRESSED)
    }

    pub fn requests_acknowledge(&self) -> bool {
        self.message_flags.contains(MessageFlags::ACKNOWLEDGE)
    }

    pub fn has_no_data(&self) -> bool {
        self.message_flags.contains(MessageFlags::NO_DATA)
    }

    /// The exchange this message belongs to: its correlation id, or its own
    /// id when it starts a new exchange.
    pub fn exchange_id(&self) -> MessageId {
        if self.correlation_id.is_none() {
            self.message_id
        } else {
            self.correlation_id
        }
    }
}
