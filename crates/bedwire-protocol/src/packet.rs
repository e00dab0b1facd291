//! The game packet catalog.
//!
//! Every packet the login sequence touches is a variant of [`GamePacket`],
//! (un)marshaled by a hand-rolled match on the packet ID. IDs that are not
//! in the catalog decode to [`GamePacket::Unknown`] carrying the raw
//! payload, so late or modded gameplay packets pass through untouched.

use std::{convert::TryFrom, io::Cursor};

use bedwire_core::error::{DecodingErrorKind, ErrorKind, Result};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::io::{WireRead, WireWrite};

/// Packet identifiers, varuint32-encoded in the packet header.
pub mod ids {
    /// Client login request, opening the sequence.
    pub const LOGIN: u32 = 0x01;
    /// Server verdict on the login state.
    pub const PLAY_STATUS: u32 = 0x02;
    /// Server handshake carrying the encryption JWT.
    pub const SERVER_TO_CLIENT_HANDSHAKE: u32 = 0x03;
    /// Empty client acknowledgement, first encrypted packet.
    pub const CLIENT_TO_SERVER_HANDSHAKE: u32 = 0x04;
    /// Connection teardown with a reason.
    pub const DISCONNECT: u32 = 0x05;
    /// Advertises the packs a joining client must download.
    pub const RESOURCE_PACKS_INFO: u32 = 0x06;
    /// The order downloaded packs are applied in.
    pub const RESOURCE_PACK_STACK: u32 = 0x07;
    /// Client's answer to pack info or stack.
    pub const RESOURCE_PACK_CLIENT_RESPONSE: u32 = 0x08;
    /// World start; opaque to the login sequence.
    pub const START_GAME: u32 = 0x0b;
    /// Post-login chunk radius negotiation; opaque to the login sequence.
    pub const REQUEST_CHUNK_RADIUS: u32 = 0x45;
    /// Announces chunk count and size for one pack download.
    pub const RESOURCE_PACK_DATA_INFO: u32 = 0x52;
    /// One chunk of pack content.
    pub const RESOURCE_PACK_CHUNK_DATA: u32 = 0x53;
    /// Client request for one pack chunk.
    pub const RESOURCE_PACK_CHUNK_REQUEST: u32 = 0x54;
}

/// The varuint32 header in front of every packet payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Identifier of the packet that follows.
    pub packet_id: u32,
}

impl Header {
    /// Writes the header to a buffer.
    pub fn write(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.write_varu32(self.packet_id)
    }

    /// Reads a header from the front of a payload.
    pub fn read(cursor: &mut Cursor<&[u8]>) -> Result<Self> {
        let packet_id = cursor
            .read_varu32()
            .map_err(|_| ErrorKind::DecodingError(DecodingErrorKind::PacketHeader))?;
        Ok(Self { packet_id })
    }
}

/// Verdict carried by a `PlayStatus` packet. The integer values are
/// order-sensitive for wire compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayStatus {
    /// The login sequence may proceed.
    LoginSuccess = 0,
    /// The client runs an older protocol than the server.
    LoginFailedClient = 1,
    /// The client runs a newer protocol than the server.
    LoginFailedServer = 2,
    /// The player is spawned into the world; post-login.
    PlayerSpawn = 3,
    /// Education Edition game with an invalid owner.
    LoginFailedInvalidTenant = 4,
    /// Vanilla client joining an Education Edition game.
    LoginFailedVanillaEdu = 5,
    /// Education Edition client joining a vanilla game.
    LoginFailedEduVanilla = 6,
    /// The server has no player slots left.
    LoginFailedServerFull = 7,
}

impl PlayStatus {
    /// Returns the wire integer for this status.
    pub fn to_i32(self) -> i32 {
        self as i32
    }
}

impl TryFrom<i32> for PlayStatus {
    type Error = ErrorKind;

    fn try_from(value: i32) -> Result<Self> {
        match value {
            0 => Ok(PlayStatus::LoginSuccess),
            1 => Ok(PlayStatus::LoginFailedClient),
            2 => Ok(PlayStatus::LoginFailedServer),
            3 => Ok(PlayStatus::PlayerSpawn),
            4 => Ok(PlayStatus::LoginFailedInvalidTenant),
            5 => Ok(PlayStatus::LoginFailedVanillaEdu),
            6 => Ok(PlayStatus::LoginFailedEduVanilla),
            7 => Ok(PlayStatus::LoginFailedServerFull),
            _ => Err(ErrorKind::DecodingError(DecodingErrorKind::PlayStatus(value))),
        }
    }
}

/// Client answer inside a `ResourcePackClientResponse`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackResponse {
    /// The client refuses the advertised packs.
    Refused = 1,
    /// The client asks for the listed packs to be sent.
    SendPacks = 2,
    /// The client holds every advertised pack.
    AllPacksDownloaded = 3,
    /// The client applied the stack; login is complete.
    Completed = 4,
}

impl PackResponse {
    /// Returns the wire byte for this response.
    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for PackResponse {
    type Error = ErrorKind;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(PackResponse::Refused),
            2 => Ok(PackResponse::SendPacks),
            3 => Ok(PackResponse::AllPacksDownloaded),
            4 => Ok(PackResponse::Completed),
            _ => Err(ErrorKind::UnknownPackResponse(value)),
        }
    }
}

/// One pack advertised in `ResourcePacksInfo`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackInfoEntry {
    /// Stable pack identifier.
    pub uuid: String,
    /// Pack version string.
    pub version: String,
    /// Content length in bytes.
    pub size: u64,
    /// Whether the pack ships scripts.
    pub has_scripts: bool,
}

/// One pack listed in `ResourcePackStack`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackEntry {
    /// Stable pack identifier.
    pub uuid: String,
    /// Pack version string.
    pub version: String,
}

/// A packet of the login sequence, or an opaque passthrough.
#[derive(Debug, Clone, PartialEq)]
pub enum GamePacket {
    /// Client login request.
    Login {
        /// Protocol version the client was compiled against. Big-endian on
        /// the wire, unlike every other fixed-width field.
        protocol: i32,
        /// The JWT chain and client data blob, decoded by `login::verify`
        /// and `login::decode`.
        connection_request: Vec<u8>,
    },
    /// Server verdict on the login state.
    PlayStatus {
        /// The status code.
        status: PlayStatus,
    },
    /// Server handshake carrying the self-signed encryption JWT.
    ServerToClientHandshake {
        /// Compact ES384 JWT whose payload carries the salt.
        jwt: Vec<u8>,
    },
    /// Client acknowledgement of the handshake. Zero payload; its arrival
    /// under the new cipher is the information.
    ClientToServerHandshake,
    /// Connection teardown.
    Disconnect {
        /// Skip showing the reason to the player.
        hide_screen: bool,
        /// Human-readable reason.
        message: String,
    },
    /// Packs a joining client is asked to download.
    ResourcePacksInfo {
        /// Clients must accept the texture packs to play.
        texture_pack_required: bool,
        /// Any advertised pack ships scripts.
        has_scripts: bool,
        /// Packs with behaviours.
        behaviour_packs: Vec<PackInfoEntry>,
        /// Packs without behaviours.
        texture_packs: Vec<PackInfoEntry>,
    },
    /// The order downloaded packs are applied in.
    ResourcePackStack {
        /// Clients must accept the texture packs to play.
        texture_pack_required: bool,
        /// Behaviour packs, bottom first.
        behaviour_packs: Vec<StackEntry>,
        /// Texture packs, bottom first.
        texture_packs: Vec<StackEntry>,
    },
    /// Client's answer to pack info or stack.
    ResourcePackClientResponse {
        /// The response code.
        response: PackResponse,
        /// `uuid_version` tokens of the packs to send, for `SendPacks`.
        packs_to_download: Vec<String>,
    },
    /// Announces chunk count and size for one pack download.
    ResourcePackDataInfo {
        /// Pack being transferred.
        uuid: String,
        /// Size of each chunk except possibly the last.
        data_chunk_size: u32,
        /// Number of chunks the client must request.
        chunk_count: u32,
        /// Total content length; must match the advertised size.
        size: u64,
    },
    /// Client request for one pack chunk.
    ResourcePackChunkRequest {
        /// Pack being transferred.
        uuid: String,
        /// Zero-based chunk index.
        chunk_index: u32,
    },
    /// One chunk of pack content.
    ResourcePackChunkData {
        /// Pack being transferred.
        uuid: String,
        /// Zero-based chunk index.
        chunk_index: u32,
        /// Byte offset of this chunk inside the pack.
        data_offset: u64,
        /// Chunk content; shorter than the chunk size only for the final
        /// chunk.
        data: Vec<u8>,
    },
    /// Post-login chunk radius negotiation.
    RequestChunkRadius {
        /// Requested radius in chunks.
        chunk_radius: i32,
    },
    /// World start. The login sequence never interprets it; the payload is
    /// conduited verbatim.
    StartGame {
        /// Raw marshaled fields.
        payload: Vec<u8>,
    },
    /// A packet ID outside the catalog.
    Unknown {
        /// The unrecognized packet ID.
        id: u32,
        /// Raw payload after the header.
        payload: Vec<u8>,
    },
}

impl GamePacket {
    /// Returns the wire identifier of this packet.
    pub fn id(&self) -> u32 {
        match self {
            GamePacket::Login { .. } => ids::LOGIN,
            GamePacket::PlayStatus { .. } => ids::PLAY_STATUS,
            GamePacket::ServerToClientHandshake { .. } => ids::SERVER_TO_CLIENT_HANDSHAKE,
            GamePacket::ClientToServerHandshake => ids::CLIENT_TO_SERVER_HANDSHAKE,
            GamePacket::Disconnect { .. } => ids::DISCONNECT,
            GamePacket::ResourcePacksInfo { .. } => ids::RESOURCE_PACKS_INFO,
            GamePacket::ResourcePackStack { .. } => ids::RESOURCE_PACK_STACK,
            GamePacket::ResourcePackClientResponse { .. } => ids::RESOURCE_PACK_CLIENT_RESPONSE,
            GamePacket::ResourcePackDataInfo { .. } => ids::RESOURCE_PACK_DATA_INFO,
            GamePacket::ResourcePackChunkRequest { .. } => ids::RESOURCE_PACK_CHUNK_REQUEST,
            GamePacket::ResourcePackChunkData { .. } => ids::RESOURCE_PACK_CHUNK_DATA,
            GamePacket::RequestChunkRadius { .. } => ids::REQUEST_CHUNK_RADIUS,
            GamePacket::StartGame { .. } => ids::START_GAME,
            GamePacket::Unknown { id, .. } => *id,
        }
    }

    /// Marshals the packet payload (without header) into `buf`.
    pub fn marshal(&self, buf: &mut Vec<u8>) -> Result<()> {
        match self {
            GamePacket::Login { protocol, connection_request } => {
                buf.write_i32::<BigEndian>(*protocol)?;
                buf.write_byte_slice(connection_request)?;
            }
            GamePacket::PlayStatus { status } => {
                buf.write_i32::<BigEndian>(status.to_i32())?;
            }
            GamePacket::ServerToClientHandshake { jwt } => {
                buf.write_byte_slice(jwt)?;
            }
            GamePacket::ClientToServerHandshake => {}
            GamePacket::Disconnect { hide_screen, message } => {
                buf.write_u8(u8::from(*hide_screen))?;
                if !hide_screen {
                    buf.write_string(message)?;
                }
            }
            GamePacket::ResourcePacksInfo {
                texture_pack_required,
                has_scripts,
                behaviour_packs,
                texture_packs,
            } => {
                buf.write_u8(u8::from(*texture_pack_required))?;
                buf.write_u8(u8::from(*has_scripts))?;
                write_pack_info_entries(buf, behaviour_packs)?;
                write_pack_info_entries(buf, texture_packs)?;
            }
            GamePacket::ResourcePackStack {
                texture_pack_required,
                behaviour_packs,
                texture_packs,
            } => {
                buf.write_u8(u8::from(*texture_pack_required))?;
                write_stack_entries(buf, behaviour_packs)?;
                write_stack_entries(buf, texture_packs)?;
            }
            GamePacket::ResourcePackClientResponse { response, packs_to_download } => {
                buf.write_u8(response.to_u8())?;
                buf.write_varu32(packs_to_download.len() as u32)?;
                for token in packs_to_download {
                    buf.write_string(token)?;
                }
            }
            GamePacket::ResourcePackDataInfo { uuid, data_chunk_size, chunk_count, size } => {
                buf.write_string(uuid)?;
                buf.write_varu32(*data_chunk_size)?;
                buf.write_varu32(*chunk_count)?;
                buf.write_varu64(*size)?;
            }
            GamePacket::ResourcePackChunkRequest { uuid, chunk_index } => {
                buf.write_string(uuid)?;
                buf.write_varu32(*chunk_index)?;
            }
            GamePacket::ResourcePackChunkData { uuid, chunk_index, data_offset, data } => {
                buf.write_string(uuid)?;
                buf.write_varu32(*chunk_index)?;
                buf.write_varu64(*data_offset)?;
                buf.write_byte_slice(data)?;
            }
            GamePacket::RequestChunkRadius { chunk_radius } => {
                buf.write_vari32(*chunk_radius)?;
            }
            GamePacket::StartGame { payload } | GamePacket::Unknown { payload, .. } => {
                buf.extend_from_slice(payload);
            }
        }
        Ok(())
    }

    /// Unmarshals a packet payload for the ID read from its header.
    ///
    /// IDs outside the catalog yield [`GamePacket::Unknown`]. The cursor is
    /// left where decoding stopped, so callers can spot trailing bytes.
    pub fn unmarshal(id: u32, cursor: &mut Cursor<&[u8]>) -> Result<GamePacket> {
        let pk = match id {
            ids::LOGIN => GamePacket::Login {
                protocol: cursor.read_i32::<BigEndian>()?,
                connection_request: cursor.read_byte_slice()?,
            },
            ids::PLAY_STATUS => GamePacket::PlayStatus {
                status: PlayStatus::try_from(cursor.read_i32::<BigEndian>()?)?,
            },
            ids::SERVER_TO_CLIENT_HANDSHAKE => {
                GamePacket::ServerToClientHandshake { jwt: cursor.read_byte_slice()? }
            }
            ids::CLIENT_TO_SERVER_HANDSHAKE => GamePacket::ClientToServerHandshake,
            ids::DISCONNECT => {
                let hide_screen = cursor.read_u8()? != 0;
                let message = if hide_screen { String::new() } else { cursor.read_string()? };
                GamePacket::Disconnect { hide_screen, message }
            }
            ids::RESOURCE_PACKS_INFO => {
                let texture_pack_required = cursor.read_u8()? != 0;
                let has_scripts = cursor.read_u8()? != 0;
                let behaviour_packs = read_pack_info_entries(cursor)?;
                let texture_packs = read_pack_info_entries(cursor)?;
                GamePacket::ResourcePacksInfo {
                    texture_pack_required,
                    has_scripts,
                    behaviour_packs,
                    texture_packs,
                }
            }
            ids::RESOURCE_PACK_STACK => {
                let texture_pack_required = cursor.read_u8()? != 0;
                let behaviour_packs = read_stack_entries(cursor)?;
                let texture_packs = read_stack_entries(cursor)?;
                GamePacket::ResourcePackStack {
                    texture_pack_required,
                    behaviour_packs,
                    texture_packs,
                }
            }
            ids::RESOURCE_PACK_CLIENT_RESPONSE => {
                let response = PackResponse::try_from(cursor.read_u8()?)?;
                let count = cursor.read_varu32()? as usize;
                let mut packs_to_download = Vec::with_capacity(count.min(64));
                for _ in 0..count {
                    packs_to_download.push(cursor.read_string()?);
                }
                GamePacket::ResourcePackClientResponse { response, packs_to_download }
            }
            ids::RESOURCE_PACK_DATA_INFO => GamePacket::ResourcePackDataInfo {
                uuid: cursor.read_string()?,
                data_chunk_size: cursor.read_varu32()?,
                chunk_count: cursor.read_varu32()?,
                size: cursor.read_varu64()?,
            },
            ids::RESOURCE_PACK_CHUNK_REQUEST => GamePacket::ResourcePackChunkRequest {
                uuid: cursor.read_string()?,
                chunk_index: cursor.read_varu32()?,
            },
            ids::RESOURCE_PACK_CHUNK_DATA => GamePacket::ResourcePackChunkData {
                uuid: cursor.read_string()?,
                chunk_index: cursor.read_varu32()?,
                data_offset: cursor.read_varu64()?,
                data: cursor.read_byte_slice()?,
            },
            ids::REQUEST_CHUNK_RADIUS => {
                GamePacket::RequestChunkRadius { chunk_radius: cursor.read_vari32()? }
            }
            ids::START_GAME => GamePacket::StartGame { payload: cursor.read_rest()? },
            _ => GamePacket::Unknown { id, payload: cursor.read_rest()? },
        };
        Ok(pk)
    }
}

fn write_pack_info_entries(buf: &mut Vec<u8>, entries: &[PackInfoEntry]) -> Result<()> {
    buf.write_varu32(entries.len() as u32)?;
    for entry in entries {
        buf.write_string(&entry.uuid)?;
        buf.write_string(&entry.version)?;
        buf.write_varu64(entry.size)?;
        buf.write_u8(u8::from(entry.has_scripts))?;
    }
    Ok(())
}

fn read_pack_info_entries(cursor: &mut Cursor<&[u8]>) -> Result<Vec<PackInfoEntry>> {
    let count = cursor.read_varu32()? as usize;
    let mut entries = Vec::with_capacity(count.min(64));
    for _ in 0..count {
        entries.push(PackInfoEntry {
            uuid: cursor.read_string()?,
            version: cursor.read_string()?,
            size: cursor.read_varu64()?,
            has_scripts: cursor.read_u8()? != 0,
        });
    }
    Ok(entries)
}

fn write_stack_entries(buf: &mut Vec<u8>, entries: &[StackEntry]) -> Result<()> {
    buf.write_varu32(entries.len() as u32)?;
    for entry in entries {
        buf.write_string(&entry.uuid)?;
        buf.write_string(&entry.version)?;
    }
    Ok(())
}

fn read_stack_entries(cursor: &mut Cursor<&[u8]>) -> Result<Vec<StackEntry>> {
    let count = cursor.read_varu32()? as usize;
    let mut entries = Vec::with_capacity(count.min(64));
    for _ in 0..count {
        entries.push(StackEntry { uuid: cursor.read_string()?, version: cursor.read_string()? });
    }
    Ok(entries)
}
