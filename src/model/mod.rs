//! In-memory domain model observed by the subscription engine.
//!
//! Wells contain wellbores, wellbores contain channel sets and channels, and
//! channels can additionally be joined to other containers. Channels are the
//! growing objects: they carry an id and appendable data points.

mod domain;
mod objects;

pub use domain::{ChannelSpec, DomainModel, ObjectEvent, ObjectSpec, DEFAULT_FAMILY};
pub use objects::{DataObject, GrowingChannel, ObjectKind, CHANNEL_SOURCE};
