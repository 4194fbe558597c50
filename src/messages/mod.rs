//! Message envelope: headers, flags, frame codec and typed bodies.
//!
//! Every body type implements [`MessageBody`], which ties it to its protocol
//! and message type. Handlers register bodies by type and the router decodes
//! inbound frames into them.

/// Implements [`MessageBody`] for a list of body types.
macro_rules! message_bodies {
    ($protocol:expr; $($body:ident = $message_type:expr),+ $(,)?) => {
        $(
            impl $crate::messages::MessageBody for $body {
                const PROTOCOL: $crate::types::Protocol = $protocol;
                const MESSAGE_TYPE: u16 = $message_type;
                const NAME: &'static str = stringify!($body);
            }
        )+
    };
}

pub(crate) use message_bodies;

mod codec;
pub mod core;
mod header;
mod multipart;
pub mod v11;
pub mod v12;

pub use codec::{decode_frame, encode_frame, Encoding, RawBody};
pub use header::{MessageFlags, MessageHeader};
pub use multipart::{MultiPartTracker, PartProgress};

use crate::types::Protocol;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Message type used by ProtocolException in every protocol.
pub const PROTOCOL_EXCEPTION: u16 = 1000;

/// Message type used by Acknowledge in every protocol.
pub const ACKNOWLEDGE: u16 = 1001;

/// A typed message body.
pub trait MessageBody: Serialize + DeserializeOwned + Send + 'static {
    const PROTOCOL: Protocol;
    const MESSAGE_TYPE: u16;
    const NAME: &'static str;
}

