//! # ETP DevKit
//!
//! Session and channel subscription core for the Energistics Transfer
//! Protocol, versions 1.1 and 1.2.
//!
//! ## Core Concepts
//!
//! - **Messages**: Header plus body, correlated by message id, optionally
//!   split into multi-part exchanges
//! - **Protocol handlers**: One handler per (protocol, role), routing message
//!   types to typed events with success and error containers
//! - **Sessions**: Handshake, capability exchange, message ids and lifecycle
//! - **Subscriptions**: Per-session channel scopes and streaming state, all
//!   behind one lock so a domain change reaches every session in one step
//!
//! ## Example
//!
//! ```ignore
//! use etp_devkit::{DevKitConfig, DevKitStore, DomainModel, SessionDriver, memory_pair};
//!
//! let store = DevKitStore::new(DevKitConfig::default(), DomainModel::default());
//! let (server_end, client_end) = memory_pair();
//!
//! let session = store.accept(server_end.transport.clone())?;
//! let driver = SessionDriver::spawn(session, server_end.inbox);
//!
//! // Feed every channel with synthetic data.
//! let generator = DataGenerator::spawn(store.manager(), store.config().generator.clone());
//! ```

pub mod config;
pub mod error;
pub mod generator;
pub mod messages;
pub mod model;
pub mod protocol;
pub mod session;
pub mod store;
pub mod subscriptions;
pub mod types;
pub mod uri;

// Re-exports
pub use config::{CapabilityConfig, DevKitConfig, GeneratorConfig, SessionConfig};
pub use error::{ErrorCode, ErrorInfo, EtpError, Result};
pub use generator::DataGenerator;
pub use messages::{Encoding, MessageBody, MessageFlags, MessageHeader};
pub use model::{ChannelSpec, DomainModel, ObjectEvent, ObjectSpec};
pub use protocol::{Capabilities, HandlerContext, ProtocolHandler};
pub use session::{memory_pair, Session, SessionDriver, SessionObserver, SessionState, Transport};
pub use store::DevKitStore;
pub use subscriptions::{
    ChannelStreamingCallbacks, ChannelSubscriptionOptions, StartIndex, SubscriptionInfo,
    SubscriptionManager,
};
pub use types::*;
pub use uri::EtpUri;
