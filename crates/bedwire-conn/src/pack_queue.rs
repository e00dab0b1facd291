//! Bookkeeping for resource pack transfers in both directions.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use bedwire_core::{
    constants::PACK_CHUNK_SIZE,
    error::{ErrorKind, Result},
};
use bedwire_protocol::packet::GamePacket;
use crossbeam_channel::{bounded, Receiver, Sender};

use crate::pack::ResourcePack;

/// One pack a client is pulling down: declared metadata, the growing
/// reassembly buffer, and the fragment handoff between the packet
/// dispatcher and the pack's fetcher thread.
pub(crate) struct DownloadingPack {
    /// Size the pack was advertised with; the data-info packet and the
    /// final buffer must both agree.
    pub size: u64,
    pub version: String,
    pub behaviours: bool,
    pub scripts: bool,
    /// Chunk size declared by the data-info packet.
    pub chunk_size: u32,
    /// Index the next chunk-data packet must carry.
    pub expected_index: u32,
    /// Reassembled content. Shared with the fetcher thread, which appends
    /// each fragment before requesting the next chunk.
    pub buf: Arc<Mutex<Vec<u8>>>,
    pub frag_tx: Sender<Vec<u8>>,
    pub frag_rx: Receiver<Vec<u8>>,
}

impl DownloadingPack {
    pub fn new(size: u64, version: String, behaviours: bool, scripts: bool) -> Self {
        let (frag_tx, frag_rx) = bounded(1);
        Self {
            size,
            version,
            behaviours,
            scripts,
            chunk_size: 0,
            expected_index: 0,
            buf: Arc::new(Mutex::new(Vec::with_capacity(size as usize))),
            frag_tx,
            frag_rx,
        }
    }
}

/// A transfer in progress. Created when the peer advertises pack metadata,
/// destroyed when every pack is accounted for.
///
/// The server role uses `packs` with the two cursors; the client role uses
/// the `downloading_packs` → `awaiting_packs` maps. `pack_amount` counts
/// packs still outstanding in either role.
pub(crate) struct PackQueue {
    pub pack_amount: usize,
    pub packs: Vec<Arc<ResourcePack>>,
    pub current_pack: usize,
    pub current_offset: u64,
    pub downloading_packs: HashMap<String, DownloadingPack>,
    pub awaiting_packs: HashMap<String, DownloadingPack>,
}

impl PackQueue {
    /// Creates a queue over the packs a server owns, before filtering.
    pub fn serving(packs: Vec<Arc<ResourcePack>>) -> Self {
        Self {
            pack_amount: packs.len(),
            packs,
            current_pack: 0,
            current_offset: 0,
            downloading_packs: HashMap::new(),
            awaiting_packs: HashMap::new(),
        }
    }

    /// Creates a queue for the client role, to be filled from the
    /// advertised pack lists.
    pub fn downloading() -> Self {
        Self {
            pack_amount: 0,
            packs: Vec::new(),
            current_pack: 0,
            current_offset: 0,
            downloading_packs: HashMap::new(),
            awaiting_packs: HashMap::new(),
        }
    }

    /// Restricts the queue to the packs the client requested, keeping the
    /// owned order. Tokens are the `uuid_version` form the client echoes
    /// back from the info packet; a bare UUID is accepted too. A token that
    /// matches no owned pack is an error.
    pub fn request(&mut self, tokens: &[String]) -> Result<()> {
        let matches = |pack: &ResourcePack, token: &str| {
            token == pack.uuid() || token == format!("{}_{}", pack.uuid(), pack.version())
        };
        for token in tokens {
            if !self.packs.iter().any(|pack| matches(pack, token)) {
                return Err(ErrorKind::PackTransfer(format!(
                    "lookup of requested pack {} failed",
                    token
                )));
            }
        }
        self.packs.retain(|pack| tokens.iter().any(|token| matches(pack, token)));
        self.pack_amount = self.packs.len();
        self.current_pack = 0;
        self.current_offset = 0;
        Ok(())
    }

    /// The data-info packet for the pack the cursor points at, or `None`
    /// when every pack is served.
    pub fn data_info(&self) -> Option<GamePacket> {
        self.packs.get(self.current_pack).map(|pack| GamePacket::ResourcePackDataInfo {
            uuid: pack.uuid().to_string(),
            data_chunk_size: PACK_CHUNK_SIZE as u32,
            chunk_count: (pack.len() as u64).div_ceil(PACK_CHUNK_SIZE as u64) as u32,
            size: pack.len() as u64,
        })
    }

    /// Moves the cursor to the next pack to serve.
    pub fn advance(&mut self) {
        self.current_pack += 1;
        self.current_offset = 0;
    }

    /// Whether the pack the cursor points at is the last one.
    pub fn all_downloaded(&self) -> bool {
        self.current_pack + 1 >= self.packs.len()
    }
}
