//! # Core Protocol Components
//!
//! Low-level data streams, value encoding and packet framing.
//!
//! ## Components
//! - **Stream**: bounds-checked big-endian primitives
//! - **Value**: tagged generic value codec and nested value type schemas
//! - **Packet**: packet type enumeration, writer and decoded packet
//! - **Codec**: Tokio codec for framing over byte streams
//!
//! ## Wire Format
//! ```text
//! [Length(4)] [TypeId(1)] [TargetName] [Payload(N)]
//! ```
//!
//! ## Limits
//! - Maximum frame size: 16MB by default (prevents memory exhaustion)
//! - Length validation before allocation

pub mod codec;
pub mod packet;
pub mod stream;
pub mod value;
