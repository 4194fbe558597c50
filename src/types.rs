//! Core types shared by sessions, handlers and the subscription engine.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

pub use uuid::Uuid;

/// Unique identifier for a session.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        SessionId(Uuid::new_v4())
    }

    pub fn nil() -> Self {
        SessionId(Uuid::nil())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::nil()
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-session message identifier. Zero means "no message".
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct MessageId(pub i64);

impl MessageId {
    pub const NONE: MessageId = MessageId(0);

    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Msg({})", self.0)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Store-assigned channel identifier.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub i64);

impl fmt::Debug for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChannelId({})", self.0)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Negotiated protocol version.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EtpVersion {
    V11,
    V12,
}

impl EtpVersion {
    /// WebSocket sub-protocol name for this version.
    pub fn subprotocol(self) -> &'static str {
        match self {
            EtpVersion::V11 => "energistics-tp",
            EtpVersion::V12 => "etp12.energistics.org",
        }
    }
}

impl fmt::Display for EtpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EtpVersion::V11 => f.write_str("1.1"),
            EtpVersion::V12 => f.write_str("1.2"),
        }
    }
}

/// Protocol identifiers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Protocol {
    Core,
    ChannelStreaming,
    ChannelDataFrame,
    Discovery,
    Store,
    StoreNotification,
    GrowingObject,
    ChannelSubscribe,
}

impl Protocol {
    pub fn id(self) -> u16 {
        match self {
            Protocol::Core => 0,
            Protocol::ChannelStreaming => 1,
            Protocol::ChannelDataFrame => 2,
            Protocol::Discovery => 3,
            Protocol::Store => 4,
            Protocol::StoreNotification => 5,
            Protocol::GrowingObject => 6,
            Protocol::ChannelSubscribe => 21,
        }
    }

    pub fn from_id(id: u16) -> Option<Self> {
        match id {
            0 => Some(Protocol::Core),
            1 => Some(Protocol::ChannelStreaming),
            2 => Some(Protocol::ChannelDataFrame),
            3 => Some(Protocol::Discovery),
            4 => Some(Protocol::Store),
            5 => Some(Protocol::StoreNotification),
            6 => Some(Protocol::GrowingObject),
            21 => Some(Protocol::ChannelSubscribe),
            _ => None,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.id())
    }
}

/// Role an endpoint plays in a protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Role {
    Client,
    Server,
    Producer,
    Consumer,
    Store,
    Customer,
}

impl Role {
    /// The role the other endpoint plays.
    pub fn counterpart(self) -> Role {
        match self {
            Role::Client => Role::Server,
            Role::Server => Role::Client,
            Role::Producer => Role::Consumer,
            Role::Consumer => Role::Producer,
            Role::Store => Role::Customer,
            Role::Customer => Role::Store,
        }
    }
}

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as i64)
            .unwrap_or_default();
        Timestamp(micros)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// Kind of primary index a channel is indexed by.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexKind {
    Time,
    Depth,
}

/// Direction of index growth.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexDirection {
    Increasing,
    Decreasing,
}

/// Decimal places kept when a depth is carried as a scaled integer (v1.1).
pub const DEPTH_SCALE: i32 = 3;

/// A single typed index value.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum IndexValue {
    /// Microseconds since Unix epoch.
    Time(i64),
    /// Measured depth in metres.
    Depth(f64),
}

impl IndexValue {
    pub fn kind(&self) -> IndexKind {
        match self {
            IndexValue::Time(_) => IndexKind::Time,
            IndexValue::Depth(_) => IndexKind::Depth,
        }
    }

    /// v1.1 wire form: times stay in microseconds, depths are scaled.
    pub fn to_scaled(&self) -> i64 {
        match *self {
            IndexValue::Time(t) => t,
            IndexValue::Depth(d) => (d * 10f64.powi(DEPTH_SCALE)).round() as i64,
        }
    }

    /// Inverse of [`IndexValue::to_scaled`].
    pub fn from_scaled(kind: IndexKind, value: i64) -> Self {
        match kind {
            IndexKind::Time => IndexValue::Time(value),
            IndexKind::Depth => IndexValue::Depth(value as f64 / 10f64.powi(DEPTH_SCALE)),
        }
    }
}

impl PartialOrd for IndexValue {
    /// Values of different kinds are unordered.
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (IndexValue::Time(a), IndexValue::Time(b)) => a.partial_cmp(b),
            (IndexValue::Depth(a), IndexValue::Depth(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

/// Typed scalar used for channel values and capability values.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum DataValue {
    Null,
    Boolean(bool),
    Int(i32),
    Long(i64),
    Double(f64),
    String(String),
}

impl DataValue {
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            DataValue::Int(v) => Some(v as i64),
            DataValue::Long(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            DataValue::Int(v) => Some(v as f64),
            DataValue::Long(v) => Some(v as f64),
            DataValue::Double(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            DataValue::Boolean(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            DataValue::String(s) => Some(s),
            _ => None,
        }
    }
}

/// A single channel data point.
#[derive(Clone, Debug, PartialEq)]
pub struct DataItem {
    pub channel_id: ChannelId,
    pub index: IndexValue,
    pub value: DataValue,
    pub value_valid: bool,
}

/// Active status of a data object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActiveStatus {
    Active,
    Inactive,
}

/// Direction and distance of a scope query.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContextScope {
    /// Only the object(s) the URI resolves to.
    SelfOnly,
    /// Objects referring to the resolved objects.
    Sources,
    /// Objects the resolved objects refer to.
    Targets,
    SourcesOrSelf,
    TargetsOrSelf,
}

impl ContextScope {
    pub fn includes_self(self) -> bool {
        matches!(
            self,
            ContextScope::SelfOnly | ContextScope::SourcesOrSelf | ContextScope::TargetsOrSelf
        )
    }

    pub fn includes_sources(self) -> bool {
        matches!(self, ContextScope::Sources | ContextScope::SourcesOrSelf)
    }

    pub fn includes_targets(self) -> bool {
        matches!(self, ContextScope::Targets | ContextScope::TargetsOrSelf)
    }
}
