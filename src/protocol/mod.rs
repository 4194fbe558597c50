//! Protocol handlers.
//!
//! Every (protocol, role) pair is one [`ProtocolHandler`]. Handlers share a
//! single pattern built from [`Router`] and [`HandlerContext`]:
//!
//! - inbound messages are routed by message type to typed functions,
//! - requests become event args that an events delegate fills in,
//! - responses go out as single messages or multi-part map/list responses.
//!
//! Concrete handlers:
//! - ChannelStreaming 1.1 producer and consumer
//! - ChannelStreaming 1.2 producer and consumer
//! - ChannelSubscribe 1.2 store and customer

pub mod capabilities;
pub mod channel_streaming_v11;
pub mod channel_streaming_v12;
pub mod channel_subscribe;
mod handler;
mod requests;

pub use capabilities::{Capabilities, NegotiatedCapabilities};
pub use handler::{
    HandlerContext, ListRequestArgs, MapRequestArgs, MessageArgs, ProtocolHandler, RequestArgs,
    Router,
};
pub(crate) use handler::chunk;
pub use requests::{PendingRequest, PendingRequests, RequestUuid};
