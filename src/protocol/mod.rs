//! # Replication Protocol
//!
//! Packet payloads exchanged between a publishing side and its replicas.
//!
//! ## Components
//! - **Api**: static descriptions of what an object exposes
//! - **Source**: published objects, their child sources and per-connection state
//! - **Definition**: lazily propagated structural type definitions
//! - **Descriptor**: wire handles for object references
//! - **Property**: property serialization and count-prefixed lists
//! - **Invoke**: calls, replies, change notifications and reply correlation
//! - **Packets**: init, add/remove, object list and liveness packets
//! - **Handshake**: protocol version exchange
//! - **Dispatcher**: packet routing for one connection
//!
//! ## Schema Propagation
//! A structural type is described at most once per connection. The record of
//! what was sent lives in a [`source::SessionState`] owned by whoever owns the
//! connection; replace it (or call `reset`) when the connection is replaced.

pub mod api;
pub mod definition;
pub mod descriptor;
pub mod dispatcher;
pub mod handshake;
pub mod invoke;
pub mod packets;
pub mod property;
pub mod source;

#[cfg(test)]
pub(crate) mod tests;

pub use api::{ApiDescription, EnumInfo, ExposedApi, MethodInfo, Parameter, PropertyInfo, PropertyValue, SignalInfo};
pub use definition::{RemoteTypes, TypeDefinition};
pub use descriptor::{ObjectDescriptor, ObjectKind};
pub use dispatcher::{serve_connection, Dispatcher};
pub use invoke::{CallKind, InvokeReply, InvokeRequest, PendingCalls, PendingReply};
pub use property::{PropertyData, RemoteObject};
pub use source::{SessionState, Source};
