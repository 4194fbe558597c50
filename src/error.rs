//! Error types for the ETP core.

use crate::types::{ChannelId, Uuid};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// ETP protocol error codes carried in `ErrorInfo`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NoRole,
    NoSupportedProtocols,
    InvalidMessageType,
    UnsupportedProtocol,
    InvalidArgument,
    RequestDenied,
    NotSupported,
    InvalidState,
    InvalidUri,
    NotFound,
    LimitExceeded,
    CompressionNotSupported,
    InvalidMessage,
    RequestUuidRejected,
    InvalidChannelId,
    /// A code this crate does not know by name.
    Other(i32),
}

impl ErrorCode {
    /// Numeric wire value.
    pub fn value(self) -> i32 {
        match self {
            ErrorCode::NoRole => 1,
            ErrorCode::NoSupportedProtocols => 2,
            ErrorCode::InvalidMessageType => 3,
            ErrorCode::UnsupportedProtocol => 4,
            ErrorCode::InvalidArgument => 5,
            ErrorCode::RequestDenied => 6,
            ErrorCode::NotSupported => 7,
            ErrorCode::InvalidState => 8,
            ErrorCode::InvalidUri => 9,
            ErrorCode::NotFound => 11,
            ErrorCode::LimitExceeded => 12,
            ErrorCode::CompressionNotSupported => 13,
            ErrorCode::InvalidMessage => 19,
            ErrorCode::RequestUuidRejected => 22,
            ErrorCode::InvalidChannelId => 1002,
            ErrorCode::Other(code) => code,
        }
    }

    /// Map a wire value back onto a known code.
    pub fn from_value(value: i32) -> Self {
        match value {
            1 => ErrorCode::NoRole,
            2 => ErrorCode::NoSupportedProtocols,
            3 => ErrorCode::InvalidMessageType,
            4 => ErrorCode::UnsupportedProtocol,
            5 => ErrorCode::InvalidArgument,
            6 => ErrorCode::RequestDenied,
            7 => ErrorCode::NotSupported,
            8 => ErrorCode::InvalidState,
            9 => ErrorCode::InvalidUri,
            11 => ErrorCode::NotFound,
            12 => ErrorCode::LimitExceeded,
            13 => ErrorCode::CompressionNotSupported,
            19 => ErrorCode::InvalidMessage,
            22 => ErrorCode::RequestUuidRejected,
            1002 => ErrorCode::InvalidChannelId,
            other => ErrorCode::Other(other),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::NoRole => "ENOROLE",
            ErrorCode::NoSupportedProtocols => "ENOSUPPORTEDPROTOCOLS",
            ErrorCode::InvalidMessageType => "EINVALID_MESSAGETYPE",
            ErrorCode::UnsupportedProtocol => "EUNSUPPORTED_PROTOCOL",
            ErrorCode::InvalidArgument => "EINVALID_ARGUMENT",
            ErrorCode::RequestDenied => "EREQUEST_DENIED",
            ErrorCode::NotSupported => "ENOTSUPPORTED",
            ErrorCode::InvalidState => "EINVALID_STATE",
            ErrorCode::InvalidUri => "EINVALID_URI",
            ErrorCode::NotFound => "ENOT_FOUND",
            ErrorCode::LimitExceeded => "ELIMIT_EXCEEDED",
            ErrorCode::CompressionNotSupported => "ECOMPRESSION_NOTSUPPORTED",
            ErrorCode::InvalidMessage => "EINVALID_MESSAGE",
            ErrorCode::RequestUuidRejected => "EREQUESTUUID_REJECTED",
            ErrorCode::InvalidChannelId => "EINVALID_CHANNELID",
            ErrorCode::Other(code) => return write!(f, "E{}", code),
        };
        f.write_str(name)
    }
}

/// Wire form of a protocol error.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub message: String,
    pub code: i32,
}

impl ErrorInfo {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: code.value(),
        }
    }

    pub fn error_code(&self) -> ErrorCode {
        ErrorCode::from_value(self.code)
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.error_code(), self.message)
    }
}

/// Main error type for ETP operations.
#[derive(Debug, Error)]
pub enum EtpError {
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Invalid URI: {0}")]
    InvalidUri(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid channel id: {0}")]
    InvalidChannelId(ChannelId),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Request denied: {0}")]
    RequestDenied(String),

    #[error("Request UUID rejected: {0}")]
    RequestUuidRejected(Uuid),

    #[error("Unsupported protocol: {0}")]
    UnsupportedProtocol(u16),

    #[error("Invalid message type {message_type} for protocol {protocol}")]
    InvalidMessageType { protocol: u16, message_type: u16 },

    #[error("Compressed messages are not supported")]
    CompressionNotSupported,

    #[error("Session is closed")]
    SessionClosed,

    #[error("Protocol exception from counterpart: {0}")]
    Remote(ErrorInfo),
}

impl EtpError {
    /// ETP error code reported to the counterpart for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            EtpError::Serialization(_) | EtpError::Deserialization(_) => ErrorCode::InvalidMessage,
            EtpError::InvalidUri(_) => ErrorCode::InvalidUri,
            EtpError::InvalidArgument(_) => ErrorCode::InvalidArgument,
            EtpError::InvalidChannelId(_) => ErrorCode::InvalidChannelId,
            EtpError::InvalidState(_) | EtpError::SessionClosed => ErrorCode::InvalidState,
            EtpError::NotFound(_) => ErrorCode::NotFound,
            EtpError::RequestDenied(_) => ErrorCode::RequestDenied,
            EtpError::RequestUuidRejected(_) => ErrorCode::RequestUuidRejected,
            EtpError::UnsupportedProtocol(_) => ErrorCode::UnsupportedProtocol,
            EtpError::InvalidMessageType { .. } => ErrorCode::InvalidMessageType,
            EtpError::CompressionNotSupported => ErrorCode::CompressionNotSupported,
            EtpError::Remote(info) => info.error_code(),
        }
    }

    /// Convert into the wire form.
    pub fn to_error_info(&self) -> ErrorInfo {
        match self {
            EtpError::Remote(info) => info.clone(),
            other => ErrorInfo::new(other.code(), other.to_string()),
        }
    }
}

impl From<serde_json::Error> for EtpError {
    fn from(e: serde_json::Error) -> Self {
        EtpError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for EtpError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        EtpError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for EtpError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        EtpError::Deserialization(e.to_string())
    }
}

/// Result type for ETP operations.
pub type Result<T> = std::result::Result<T, EtpError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_values() {
        assert_eq!(ErrorCode::InvalidChannelId.value(), 1002);
        assert_eq!(ErrorCode::from_value(22), ErrorCode::RequestUuidRejected);
        assert_eq!(ErrorCode::from_value(4242), ErrorCode::Other(4242));
        assert_eq!(ErrorCode::RequestDenied.to_string(), "EREQUEST_DENIED");
    }

    #[test]
    fn test_error_info_from_error() {
        let info = EtpError::InvalidChannelId(ChannelId(7)).to_error_info();
        assert_eq!(info.error_code(), ErrorCode::InvalidChannelId);
        assert!(info.message.contains('7'));

        let remote = ErrorInfo::new(ErrorCode::NotFound, "gone");
        assert_eq!(EtpError::Remote(remote.clone()).to_error_info(), remote);
    }
}
