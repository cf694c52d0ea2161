//! # Error Types
//!
//! Error handling for the remote objects wire protocol.
//!
//! This module defines every failure the transport, framing, schema and
//! invocation layers can report. Decoders never fabricate default values on
//! malformed input: a short read always surfaces as
//! [`ProtocolError::DecodeTruncated`].
//!
//! ## Error Categories
//! - **Transport Errors**: unknown address schemes, host resolution, bind failures
//! - **Framing Errors**: oversized frames, unknown packet types
//! - **Decode Errors**: truncated payloads, unknown value tags, unknown types
//! - **Session Errors**: protocol version mismatch, unmatched replies
//!
//! ## Example Usage
//! ```rust
//! use remote_objects::error::{ProtocolError, Result};
//!
//! fn require_scheme(scheme: &str) -> Result<()> {
//!     match scheme {
//!         "local" | "tcp" => Ok(()),
//!         other => Err(ProtocolError::UnknownScheme(other.to_string())),
//!     }
//! }
//!
//! assert!(require_scheme("udp").is_err());
//! ```

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Decode contexts reported by [`super::ProtocolError::DecodeTruncated`]
    pub const CTX_FRAME_HEADER: &str = "frame header";
    pub const CTX_U8: &str = "u8";
    pub const CTX_U32: &str = "u32";
    pub const CTX_I32: &str = "i32";
    pub const CTX_I64: &str = "i64";
    pub const CTX_F64: &str = "f64";
    pub const CTX_STRING: &str = "string";
    pub const CTX_BLOB: &str = "byte array";
    pub const CTX_LIST: &str = "count-prefixed list";

    /// Address errors
    pub const ERR_MISSING_PORT: &str = "tcp address requires a port";
    pub const ERR_MISSING_HOST: &str = "tcp address requires a host";
    pub const ERR_EMPTY_ENDPOINT: &str = "local address requires an endpoint name";
}

/// ProtocolError is the primary error type for all protocol operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("No transport registered for scheme '{0}'")]
    UnknownScheme(String),

    #[error("Host '{0}' did not resolve to any address")]
    ResolutionFailed(String),

    #[error("Failed to bind {address}: {source}")]
    BindFailed {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Input truncated while decoding {0}")]
    DecodeTruncated(&'static str),

    #[error("Protocol version mismatch: expected '{expected}', received '{received}'")]
    VersionMismatch { expected: String, received: String },

    #[error("Unknown packet type id: {0}")]
    InvalidPacketType(u8),

    #[error("Unknown value tag: {0}")]
    InvalidValueTag(u8),

    #[error("Unknown object kind: {0}")]
    InvalidObjectKind(u8),

    #[error("Unknown call kind: {0}")]
    InvalidCallKind(i32),

    #[error("String is not valid UTF-8")]
    InvalidUtf8,

    #[error("Packet too large: {0} bytes")]
    OversizedPacket(usize),

    #[error("Type '{0}' has not been described on this connection")]
    UnknownType(String),

    #[error("Value does not match the schema of '{0}'")]
    SchemaMismatch(String),

    #[error("Source '{0}' has no live object")]
    NullObject(String),

    #[error("Property index {index} out of range for '{source_name}'")]
    InvalidPropertyIndex { source_name: String, index: usize },

    #[error("Value nesting exceeds the recursion limit")]
    RecursionLimitExceeded,

    #[error("Reply for serial id {0} has no outstanding call")]
    UnknownSerialId(i32),

    #[error("Unexpected message type")]
    UnexpectedMessage,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Timeout occurred")]
    Timeout,

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl ProtocolError {
    /// Whether this error means the received bytes were malformed.
    ///
    /// The dispatcher closes the offending connection on these.
    pub fn is_decode_error(&self) -> bool {
        matches!(
            self,
            ProtocolError::DecodeTruncated(_)
                | ProtocolError::InvalidPacketType(_)
                | ProtocolError::InvalidValueTag(_)
                | ProtocolError::InvalidObjectKind(_)
                | ProtocolError::InvalidCallKind(_)
                | ProtocolError::InvalidUtf8
                | ProtocolError::OversizedPacket(_)
                | ProtocolError::UnknownType(_)
                | ProtocolError::SchemaMismatch(_)
                | ProtocolError::RecursionLimitExceeded
        )
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
