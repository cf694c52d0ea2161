//! # Invocation Protocol
//!
//! Remote method calls, property reads/writes and their replies, plus the
//! property change notification a publisher emits.
//!
//! ## Payloads
//! ```text
//! InvokePacket:         [CallKind(4)] [Index(4)] [Args: Count(4) Value*] [SerialId(4)] [PropertyIndex(4)]
//! InvokeReplyPacket:    [AckedSerialId(4)] [Value]
//! PropertyChangePacket: [PropertyIndex(4)] [Property]
//! ```
//!
//! ## Correlation
//! Replies are paired with calls by serial id only. A callee may answer out of
//! issue order; [`PendingCalls`] completes whichever call a reply names and
//! rejects replies naming no outstanding call.

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::core::packet::{PacketType, PacketWriter};
use crate::core::stream::DataReader;
use crate::core::value::{decode_value, encode_value, TypeRegistry, Value};
use crate::error::{ProtocolError, Result};
use crate::protocol::definition::RemoteTypes;
use crate::protocol::property::{
    decode_value_list_into, deserialize_property, encode_value_list, serialize_property, PropertyData,
};
use crate::protocol::source::{SessionState, Source};
use crate::transport::TransportOptions;
use crate::utils::timeout::{with_timeout, RESPONSE_TIMEOUT};

/// Property index carried by calls that do not target a property
pub const NO_PROPERTY_INDEX: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum CallKind {
    InvokeMethod = 0,
    ReadProperty = 1,
    WriteProperty = 2,
}

impl TryFrom<i32> for CallKind {
    type Error = ProtocolError;

    fn try_from(value: i32) -> Result<Self> {
        match value {
            0 => Ok(CallKind::InvokeMethod),
            1 => Ok(CallKind::ReadProperty),
            2 => Ok(CallKind::WriteProperty),
            other => Err(ProtocolError::InvalidCallKind(other)),
        }
    }
}

/// Decoded `InvokePacket` payload
#[derive(Debug, Clone, PartialEq)]
pub struct InvokeRequest {
    pub call: CallKind,
    pub index: i32,
    pub args: Vec<Value>,
    pub serial_id: i32,
    pub property_index: i32,
}

impl InvokeRequest {
    pub fn method(index: i32, args: Vec<Value>, serial_id: i32) -> Self {
        Self {
            call: CallKind::InvokeMethod,
            index,
            args,
            serial_id,
            property_index: NO_PROPERTY_INDEX,
        }
    }

    /// A setter call for property `property_index`
    pub fn write_property(property_index: i32, value: Value, serial_id: i32) -> Self {
        Self {
            call: CallKind::WriteProperty,
            index: property_index,
            args: vec![value],
            serial_id,
            property_index,
        }
    }
}

pub fn serialize_invoke_packet(writer: &mut PacketWriter, name: &str, request: &InvokeRequest) -> Bytes {
    writer.begin(PacketType::InvokePacket, name);
    writer.write_i32(request.call as i32);
    writer.write_i32(request.index);
    encode_value_list(writer, &request.args);
    writer.write_i32(request.serial_id);
    writer.write_i32(request.property_index);
    writer.finish()
}

pub fn deserialize_invoke_packet(
    reader: &mut DataReader<'_>,
    registry: &TypeRegistry,
) -> Result<InvokeRequest> {
    let call = CallKind::try_from(reader.read_i32()?)?;
    let index = reader.read_i32()?;
    let mut args = Vec::new();
    decode_value_list_into(reader, registry, &mut args)?;
    let serial_id = reader.read_i32()?;
    let property_index = reader.read_i32()?;
    Ok(InvokeRequest {
        call,
        index,
        args,
        serial_id,
        property_index,
    })
}

/// Decoded `InvokeReplyPacket` payload
#[derive(Debug, Clone, PartialEq)]
pub struct InvokeReply {
    pub serial_id: i32,
    pub value: Value,
}

pub fn serialize_invoke_reply_packet(
    writer: &mut PacketWriter,
    name: &str,
    acked_serial_id: i32,
    value: &Value,
) -> Bytes {
    writer.begin(PacketType::InvokeReplyPacket, name);
    writer.write_i32(acked_serial_id);
    encode_value(writer, value);
    writer.finish()
}

pub fn deserialize_invoke_reply_packet(
    reader: &mut DataReader<'_>,
    registry: &TypeRegistry,
) -> Result<InvokeReply> {
    let serial_id = reader.read_i32()?;
    let value = decode_value(reader, registry)?;
    Ok(InvokeReply { serial_id, value })
}

/// Serialize the current value of property `index` as a change notification
pub fn serialize_property_change_packet(
    writer: &mut PacketWriter,
    session: &mut SessionState,
    source: &mut Source,
    index: usize,
) -> Result<Bytes> {
    writer.begin(PacketType::PropertyChangePacket, source.name());
    let wire_index =
        i32::try_from(index).map_err(|_| ProtocolError::InvalidPropertyIndex {
            source_name: source.name().to_string(),
            index,
        })?;
    writer.write_i32(wire_index);
    serialize_property(writer, session, source, index)?;
    Ok(writer.finish())
}

/// Change notification for the property notified by `signal_index`.
///
/// Returns `Ok(None)` when no property uses that signal.
pub fn serialize_property_change_for_signal(
    writer: &mut PacketWriter,
    session: &mut SessionState,
    source: &mut Source,
    signal_index: usize,
) -> Result<Option<Bytes>> {
    let index = source
        .live_object()?
        .description()
        .property_index_from_signal(signal_index);
    match index {
        Some(index) => serialize_property_change_packet(writer, session, source, index).map(Some),
        None => Ok(None),
    }
}

/// Decoded `PropertyChangePacket` payload
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyChange {
    pub index: i32,
    pub data: PropertyData,
}

/// Read a change notification for an object of type `type_name`
pub fn deserialize_property_change_packet(
    reader: &mut DataReader<'_>,
    types: &mut RemoteTypes,
    type_name: Option<&str>,
) -> Result<PropertyChange> {
    let index = reader.read_i32()?;
    let declared = match (type_name, usize::try_from(index)) {
        (Some(type_name), Ok(i)) => types.property_type(type_name, i),
        _ => None,
    };
    let data = deserialize_property(reader, types, declared.as_ref())?;
    Ok(PropertyChange { index, data })
}

/// Receiving half of one outstanding call
#[derive(Debug)]
pub struct PendingReply {
    serial_id: i32,
    response_timeout: Duration,
    receiver: oneshot::Receiver<Value>,
}

impl PendingReply {
    pub fn serial_id(&self) -> i32 {
        self.serial_id
    }

    /// Wait for the reply.
    ///
    /// # Errors
    /// `Timeout` when `timeout` elapses first; `ConnectionClosed` when the
    /// call was abandoned.
    pub async fn wait(self, timeout: Duration) -> Result<Value> {
        with_timeout(timeout, self.receiver)
            .await?
            .map_err(|_| ProtocolError::ConnectionClosed)
    }

    /// Wait for the reply within the response timeout of the issuing table
    pub async fn reply(self) -> Result<Value> {
        let timeout = self.response_timeout;
        self.wait(timeout).await
    }
}

/// Caller-side table of calls awaiting replies on one connection
#[derive(Debug)]
pub struct PendingCalls {
    next_serial: i32,
    response_timeout: Duration,
    outstanding: HashMap<i32, oneshot::Sender<Value>>,
}

impl Default for PendingCalls {
    fn default() -> Self {
        Self {
            next_serial: 0,
            response_timeout: RESPONSE_TIMEOUT,
            outstanding: HashMap::new(),
        }
    }
}

impl PendingCalls {
    pub fn new() -> Self {
        Self::default()
    }

    /// A table whose replies wait at most the configured response timeout
    pub fn from_options(options: &TransportOptions) -> Self {
        Self::new().with_response_timeout(options.response_timeout)
    }

    /// Start numbering at `serial_id`
    pub fn starting_at(serial_id: i32) -> Self {
        Self {
            next_serial: serial_id,
            ..Self::default()
        }
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn response_timeout(&self) -> Duration {
        self.response_timeout
    }

    /// Allocate a serial id unique among outstanding calls
    pub fn register(&mut self) -> PendingReply {
        while self.outstanding.contains_key(&self.next_serial) {
            self.next_serial = self.next_serial.wrapping_add(1);
        }
        let serial_id = self.next_serial;
        self.next_serial = self.next_serial.wrapping_add(1);

        let (sender, receiver) = oneshot::channel();
        self.outstanding.insert(serial_id, sender);
        debug!(serial_id, outstanding = self.outstanding.len(), "Registered pending call");
        PendingReply {
            serial_id,
            response_timeout: self.response_timeout,
            receiver,
        }
    }

    /// Complete the call named by `reply`.
    ///
    /// # Errors
    /// `UnknownSerialId` when no outstanding call has that serial id.
    pub fn complete(&mut self, reply: InvokeReply) -> Result<()> {
        let Some(sender) = self.outstanding.remove(&reply.serial_id) else {
            warn!(serial_id = reply.serial_id, "Reply for unknown serial id");
            return Err(ProtocolError::UnknownSerialId(reply.serial_id));
        };
        if sender.send(reply.value).is_err() {
            debug!(serial_id = reply.serial_id, "Caller stopped waiting for reply");
        }
        Ok(())
    }

    pub fn is_pending(&self, serial_id: i32) -> bool {
        self.outstanding.contains_key(&serial_id)
    }

    pub fn len(&self) -> usize {
        self.outstanding.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outstanding.is_empty()
    }

    /// Abandon every outstanding call; waiters see `ConnectionClosed`
    pub fn cancel_all(&mut self) {
        if !self.outstanding.is_empty() {
            debug!(count = self.outstanding.len(), "Abandoning pending calls");
        }
        self.outstanding.clear();
    }
}
