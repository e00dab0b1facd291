#![warn(missing_docs)]

//! bedwire-core: foundational types and utilities.
//!
//! This crate provides the minimal set of core utilities shared across all layers:
//! - Configuration types
//! - Error handling
//! - Protocol constants
//! - The transport abstraction
//!
//! Protocol-specific logic lives in specialized crates:
//! - `bedwire-protocol`: packet catalog, batch codec, encryption, login tokens
//! - `bedwire-conn`: connection facade, handshake engine, pack transfer

/// Protocol constants shared across layers.
pub mod constants {
    /// The protocol version this library is compiled against. Clients whose
    /// version differs are rejected during the login sequence.
    pub const CURRENT_PROTOCOL: i32 = 361;
    /// The game version string matching [`CURRENT_PROTOCOL`].
    pub const CURRENT_VERSION: &str = "1.12.0";
    /// The size of a single resource pack chunk sent to downloading clients:
    /// 512 kB or 0.5 MB.
    pub const PACK_CHUNK_SIZE: usize = 512 * 1024;
    /// Capacity of the inbound packet queue. The transport reader blocks once
    /// this many payloads are waiting, putting backpressure on the peer.
    pub const PACKET_QUEUE_SIZE: usize = 32;
    /// Length in bytes of the randomly generated server salt mixed into the
    /// encryption key derivation.
    pub const SALT_LEN: usize = 16;
}

/// Configuration options for connections.
pub mod config;
/// Error types and results.
pub mod error;
/// Transport abstraction for pluggable I/O.
pub mod transport;
