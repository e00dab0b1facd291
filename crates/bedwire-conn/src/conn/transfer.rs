//! The resource pack transfer legs of the state machine.
//!
//! The server walks its pack queue with a pack index and a byte offset,
//! serving 512 kB chunks on request. The client runs one fetcher thread per
//! pack, requesting chunks strictly in order and handing each fragment over
//! a capacity-one channel so reassembly can never interleave.

use std::sync::{Arc, Mutex};
use std::thread;

use bedwire_core::{
    constants::PACK_CHUNK_SIZE,
    error::{ErrorKind, Result},
};
use bedwire_protocol::packet::{ids, GamePacket, PackResponse, StackEntry};
use crossbeam_channel::{select, Receiver};
use tracing::warn;

use super::Connection;
use crate::{pack::ResourcePack, pack_queue::PackQueue};

impl Connection {
    /// Server: branches on the client's answer to the pack info or stack.
    pub(crate) fn handle_resource_pack_client_response(
        self: &Arc<Self>,
        response: PackResponse,
        packs_to_download: &[String],
    ) -> Result<()> {
        match response {
            // Never sent by current clients, but handled in case that is
            // fixed again.
            PackResponse::Refused => self.close(),
            PackResponse::SendPacks => {
                {
                    let mut state = self.login.lock().unwrap();
                    let mut queue = PackQueue::serving(state.resource_packs.clone());
                    queue.request(packs_to_download)?;
                    state.pack_queue = Some(queue);
                }
                // Downloads run in sequence, not in parallel; less prone to
                // packet loss.
                self.next_resource_pack_download()
            }
            PackResponse::AllPacksDownloaded => {
                let mut behaviour_packs = Vec::new();
                let mut texture_packs = Vec::new();
                for pack in self.login.lock().unwrap().resource_packs.iter() {
                    let entry = StackEntry {
                        uuid: pack.uuid().to_string(),
                        version: pack.version().to_string(),
                    };
                    if pack.has_behaviours() {
                        behaviour_packs.push(entry);
                    } else {
                        texture_packs.push(entry);
                    }
                }
                self.write_packet(&GamePacket::ResourcePackStack {
                    texture_pack_required: self.config().texture_packs_required,
                    behaviour_packs,
                    texture_packs,
                })
            }
            // The next packet is StartGame, which is out of the login
            // sequence's hands.
            PackResponse::Completed => {
                self.mark_logged_in();
                Ok(())
            }
        }
    }

    /// Server: announces the pack under the queue cursor and waits for its
    /// chunk requests.
    pub(crate) fn next_resource_pack_download(&self) -> Result<()> {
        let data_info = self
            .login
            .lock()
            .unwrap()
            .pack_queue
            .as_ref()
            .and_then(|queue| queue.data_info())
            .ok_or_else(|| {
                ErrorKind::PackTransfer("no resource packs to download".to_string())
            })?;
        self.write_packet(&data_info)?;
        self.expect(&[ids::RESOURCE_PACK_CHUNK_REQUEST]);
        Ok(())
    }

    /// Server: serves one chunk. A short read marks the end of the pack and
    /// moves the queue to the next one, or back to waiting for the client's
    /// response when everything is served.
    pub(crate) fn handle_resource_pack_chunk_request(
        &self,
        uuid: &str,
        chunk_index: u32,
    ) -> Result<()> {
        let (response, short) = {
            let mut state = self.login.lock().unwrap();
            let queue = state.pack_queue.as_mut().ok_or_else(|| {
                ErrorKind::PackTransfer("no pack transfer in progress".to_string())
            })?;
            let current = queue.packs.get(queue.current_pack).cloned().ok_or_else(|| {
                ErrorKind::PackTransfer("no resource packs to download".to_string())
            })?;
            if current.uuid() != uuid {
                return Err(ErrorKind::PackTransfer(format!(
                    "chunk request had unexpected UUID: expected {}, but got {}",
                    current.uuid(),
                    uuid
                )));
            }
            if queue.current_offset != chunk_index as u64 * PACK_CHUNK_SIZE as u64 {
                return Err(ErrorKind::PackTransfer(format!(
                    "chunk request had unexpected chunk index: expected {}, but got {}",
                    queue.current_offset / PACK_CHUNK_SIZE as u64,
                    chunk_index
                )));
            }
            let offset = queue.current_offset;
            // The offset only exists for the reader's next expected call;
            // after a short read the pack is done with.
            queue.current_offset += PACK_CHUNK_SIZE as u64;

            let mut data = vec![0u8; PACK_CHUNK_SIZE];
            let n = current.read_at(&mut data, offset);
            let short = n < PACK_CHUNK_SIZE;
            data.truncate(n);
            (
                GamePacket::ResourcePackChunkData {
                    uuid: uuid.to_string(),
                    chunk_index,
                    data_offset: offset,
                    data,
                },
                short,
            )
        };

        self.write_packet(&response)?;

        if short {
            let advanced = {
                let mut state = self.login.lock().unwrap();
                match state.pack_queue.as_mut() {
                    Some(queue) if !queue.all_downloaded() => {
                        queue.advance();
                        true
                    }
                    _ => false,
                }
            };
            if advanced {
                self.next_resource_pack_download()?;
            } else {
                self.expect(&[ids::RESOURCE_PACK_CLIENT_RESPONSE]);
            }
        }
        Ok(())
    }

    /// Client: the server opened one pack's transfer. Moves the pack from
    /// the downloading set to the awaiting set and spawns its fetcher.
    pub(crate) fn handle_resource_pack_data_info(
        self: &Arc<Self>,
        uuid: &str,
        data_chunk_size: u32,
        chunk_count: u32,
        size: u64,
    ) -> Result<()> {
        let (frag_rx, buf, version, behaviours, scripts) = {
            let mut state = self.login.lock().unwrap();
            let queue = state.pack_queue.as_mut().ok_or_else(|| {
                ErrorKind::PackTransfer("no pack transfer in progress".to_string())
            })?;
            // Either already downloaded, or an UUID that matched nothing in
            // the ResourcePacksInfo packet.
            let mut entry = queue.downloading_packs.remove(uuid).ok_or_else(|| {
                ErrorKind::PackTransfer(format!("unknown pack to download with UUID {}", uuid))
            })?;
            if entry.size != size {
                return Err(ErrorKind::PackTransfer(format!(
                    "pack {} had a different size in the ResourcePacksInfo packet than the ResourcePackDataInfo packet",
                    uuid
                )));
            }
            entry.chunk_size = data_chunk_size;

            let handles = (
                entry.frag_rx.clone(),
                Arc::clone(&entry.buf),
                entry.version.clone(),
                entry.behaviours,
                entry.scripts,
            );
            queue.awaiting_packs.insert(uuid.to_string(), entry);
            handles
        };

        let conn = Arc::clone(self);
        let uuid = uuid.to_string();
        thread::spawn(move || {
            conn.fetch_pack(uuid, chunk_count, size, frag_rx, buf, version, behaviours, scripts)
        });
        Ok(())
    }

    /// Client fetcher: requests chunks strictly in sequence, blocking on the
    /// fragment handoff between requests, then finalizes the pack.
    #[allow(clippy::too_many_arguments)]
    fn fetch_pack(
        self: Arc<Self>,
        uuid: String,
        chunk_count: u32,
        size: u64,
        frag_rx: Receiver<Vec<u8>>,
        buf: Arc<Mutex<Vec<u8>>>,
        version: String,
        behaviours: bool,
        scripts: bool,
    ) {
        for chunk_index in 0..chunk_count {
            if self
                .write_packet(&GamePacket::ResourcePackChunkRequest {
                    uuid: uuid.clone(),
                    chunk_index,
                })
                .is_err()
            {
                return;
            }
            let (close_rx, close_tx) = self.close_receiver();
            let close = close_rx.clone();
            let fragment = select! {
                recv(frag_rx) -> fragment => match fragment {
                    Ok(fragment) => fragment,
                    Err(_) => return,
                },
                recv(close) -> _ => {
                    let _ = close_tx.try_send(());
                    return;
                }
            };
            buf.lock().unwrap().extend_from_slice(&fragment);
        }

        let content = std::mem::take(&mut *buf.lock().unwrap());
        if content.len() as u64 != size {
            warn!(
                "incorrect resource pack size: expected {}, but got {}",
                size,
                content.len()
            );
            return;
        }
        let pack = ResourcePack::new(uuid.clone(), version, content, behaviours, scripts);

        let all_downloaded = {
            let mut state = self.login.lock().unwrap();
            state.resource_packs.push(Arc::new(pack));
            match state.pack_queue.as_mut() {
                Some(queue) => {
                    queue.awaiting_packs.remove(&uuid);
                    queue.pack_amount = queue.pack_amount.saturating_sub(1);
                    queue.pack_amount == 0
                }
                None => false,
            }
        };
        if all_downloaded {
            self.expect(&[ids::RESOURCE_PACK_STACK]);
            let _ = self.write_packet(&GamePacket::ResourcePackClientResponse {
                response: PackResponse::AllPacksDownloaded,
                packs_to_download: Vec::new(),
            });
        }
    }

    /// Client: one fragment arrived. Validates the chunk index and length,
    /// then hands the bytes to the pack's fetcher.
    pub(crate) fn handle_resource_pack_chunk_data(
        &self,
        uuid: &str,
        chunk_index: u32,
        data: Vec<u8>,
    ) -> Result<()> {
        let frag_tx = {
            let mut state = self.login.lock().unwrap();
            let queue = state.pack_queue.as_mut().ok_or_else(|| {
                ErrorKind::PackTransfer("no pack transfer in progress".to_string())
            })?;
            let entry = queue.awaiting_packs.get_mut(uuid).ok_or_else(|| {
                ErrorKind::PackTransfer(
                    "chunk data for a resource pack that was not being downloaded".to_string(),
                )
            })?;
            let buffered = entry.buf.lock().unwrap().len() as u64;
            let last = buffered + entry.chunk_size as u64 >= entry.size;
            if !last && data.len() as u32 != entry.chunk_size {
                return Err(ErrorKind::PackTransfer(format!(
                    "chunk data had a length of {}, but expected {}",
                    data.len(),
                    entry.chunk_size
                )));
            }
            if chunk_index != entry.expected_index {
                return Err(ErrorKind::PackTransfer(format!(
                    "chunk data had chunk index {}, but expected {}",
                    chunk_index, entry.expected_index
                )));
            }
            entry.expected_index += 1;
            entry.frag_tx.clone()
        };
        // Sent outside the state lock: the fetcher appends to the buffer
        // before requesting the next chunk.
        let _ = frag_tx.send(data);
        Ok(())
    }
}
