//! Core protocol (0) bodies, shared by both protocol versions.

use super::message_bodies;
use crate::error::ErrorInfo;
use crate::protocol::Capabilities;
use crate::types::{Protocol, Role, Uuid};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One protocol offered or accepted during the handshake.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SupportedProtocol {
    pub protocol: u16,
    pub protocol_version: String,
    /// Role the server plays in this protocol.
    pub role: Role,
    pub protocol_capabilities: Capabilities,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RequestSession {
    pub application_name: String,
    pub application_version: String,
    pub client_instance_id: Uuid,
    pub requested_protocols: Vec<SupportedProtocol>,
    pub supported_data_objects: Vec<String>,
    pub supported_formats: Vec<String>,
    pub current_date_time: i64,
    pub protocol_version: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OpenSession {
    pub application_name: String,
    pub application_version: String,
    pub server_instance_id: Uuid,
    pub supported_protocols: Vec<SupportedProtocol>,
    pub supported_data_objects: Vec<String>,
    pub supported_formats: Vec<String>,
    pub session_id: Uuid,
    pub current_date_time: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CloseSession {
    pub reason: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Ping {
    pub current_date_time: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Pong {
    pub current_date_time: i64,
}

/// Error report. Sent in whichever protocol the failing request used.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
pub struct ProtocolException {
    /// Whole-message failure.
    pub error: Option<ErrorInfo>,
    /// Per-item failures keyed like the request.
    pub errors: BTreeMap<String, ErrorInfo>,
}

impl ProtocolException {
    pub fn single(error: ErrorInfo) -> Self {
        Self {
            error: Some(error),
            errors: BTreeMap::new(),
        }
    }

    pub fn keyed(errors: BTreeMap<String, ErrorInfo>) -> Self {
        Self {
            error: None,
            errors,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
pub struct Acknowledge {}

message_bodies!(Protocol::Core;
    RequestSession = 1,
    OpenSession = 2,
    CloseSession = 5,
    Ping = 8,
    Pong = 9,
    ProtocolException = 1000,
    Acknowledge = 1001,
);
