//! # Remote Objects
//!
//! Wire protocol and transport layer for replicating live objects between a
//! publishing process and its replicas.
//!
//! A publisher exposes objects as named *sources*. Replicas connect over a
//! scheme-addressed transport, receive an initial property snapshot, and then
//! follow property changes while routing method calls back to the source.
//! Structural type information travels lazily: each type is described at most
//! once per connection, the first time a replica needs it.
//!
//! ## Layers
//! - [`transport`]: `local:` and `tcp://` byte-stream transports, listeners and connections
//! - [`core`]: big-endian data streams, the tagged value codec and packet framing
//! - [`protocol`]: packet payloads, type definitions, descriptors and invocation
//! - [`config`]: TOML / environment configuration
//! - [`utils`]: logging, metrics and timeouts
//!
//! ## Example
//! ```rust
//! use remote_objects::core::packet::{Packet, PacketType, PacketWriter};
//! use remote_objects::protocol::packets::serialize_ping_packet;
//!
//! let mut writer = PacketWriter::new();
//! let frame = serialize_ping_packet(&mut writer, "counter");
//! let packet = Packet::from_bytes(&frame).unwrap();
//! assert_eq!(packet.packet_type, PacketType::Ping);
//! assert_eq!(packet.name, "counter");
//! ```

#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod transport;
pub mod utils;

pub use crate::core::packet::{Packet, PacketType, PacketWriter};
pub use crate::core::value::{DeclaredType, GadgetSchema, GadgetValue, TypeRegistry, Value};
pub use error::{ProtocolError, Result};
pub use transport::{Connection, Listener, TransportFactory, TransportRegistry};
