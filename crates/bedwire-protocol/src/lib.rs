#![warn(missing_docs)]

//! bedwire-protocol: the Bedrock wire format.
//!
//! This crate covers everything between raw transport bytes and typed
//! packets:
//! - `io`: variable-length integers, strings and byte blobs
//! - `packet`: the game packet catalog and its (un)marshaling
//! - `codec`: length-prefixed, compressed, optionally encrypted batches
//! - `encryption`: the post-handshake stream cipher and key derivation
//! - `login`: ES384 JWTs, the login request chain, identity and client data

pub mod codec;
pub mod encryption;
pub mod io;
pub mod login;
pub mod packet;
