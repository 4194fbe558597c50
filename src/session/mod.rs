//! Sessions: handshake, dispatch, lifecycle and transports.
//!
//! A [`Session`] owns the protocol handlers of one connection. The shared
//! [`SessionContext`] assigns message ids and writes frames; handlers and
//! their senders hold it so data can be pushed from any thread.
//!
//! # Example
//!
//! ```ignore
//! let (client_end, server_end) = memory_pair();
//! let mut server = Session::server(SessionConfig::v12(), server_end.transport.clone());
//! server.register_handler(Box::new(store_handler))?;
//! let driver = SessionDriver::spawn(server, server_end.inbox);
//! ```

mod context;
mod dispatch;
mod driver;
mod transport;

pub use context::SessionContext;
pub use dispatch::{Endpoint, Session, SessionObserver, SessionState};
pub use driver::SessionDriver;
pub use transport::{memory_pair, MemoryConnection, MemoryTransport, Transport};
