#![warn(missing_docs)]

//! Bedwire: a small public API facade for the workspace.
//!
//! This crate provides a clean, stable surface that re-exports the most
//! commonly used types to run a Minecraft Bedrock login sequence over any
//! ordered-stream transport:
//!
//! - Connection and its role ([`Connection`], [`Side`])
//! - The packet catalog ([`GamePacket`], [`PlayStatus`], [`PackResponse`])
//! - Login identity ([`IdentityData`], [`ClientData`])
//! - Resource packs ([`ResourcePack`])
//! - Core configuration ([`Config`]) and errors ([`ErrorKind`])
//!
//! Example
//! ```ignore
//! use std::sync::Arc;
//! use bedwire::{ClientData, Config, Connection, IdentityData};
//!
//! // Any Transport works; here an in-memory pipe stands in for a session.
//! let (server_end, client_end) = bedwire_core::transport::pipe();
//!
//! let server = Connection::server(Arc::new(server_end), Vec::new(), Config::default());
//! let client = Connection::client(
//!     Arc::new(client_end),
//!     IdentityData::default(),
//!     ClientData::default(),
//!     Config::default(),
//! ).unwrap();
//!
//! client.wait_connected().unwrap();
//! ```

// Core config and errors
pub use bedwire_core::{
    config::Config,
    error::{ErrorKind, Result},
    transport::Transport,
};
// Connection: the facade and the login state machine behind it
pub use bedwire_conn::{Connection, PacketObserver, ResourcePack, Side};
// Protocol: packets and login identity
pub use bedwire_protocol::{
    login::{ClientData, IdentityData},
    packet::{GamePacket, Header, PackResponse, PlayStatus},
};

/// Convenience prelude with the most commonly used items.
pub mod prelude {
    pub use crate::{
        ClientData, Config, Connection, ErrorKind, GamePacket, IdentityData, PackResponse,
        PlayStatus, ResourcePack, Side, Transport,
    };
}
