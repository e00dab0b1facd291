//! The connection facade.
//!
//! A [`Connection`] owns the transport, the batch encoder/decoder pair, the
//! identity key, and the login state machine. Two internal threads run per
//! connection: the transport reader, which decodes batches and during the
//! handshake dispatches each payload to the state machine, and the flush
//! ticker, which hands buffered writes to the encoder every 20th of a
//! second.

mod handshake;
mod transfer;

use std::{
    io::Cursor,
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    thread,
    time::{Duration, Instant},
};

use bedwire_core::{
    config::Config,
    constants::{CURRENT_PROTOCOL, SALT_LEN},
    error::{ErrorKind, Result},
    transport::Transport,
};
use bedwire_protocol::{
    codec::{Decoder, Encoder},
    login::{self, ClientData, IdentityData},
    packet::{ids, GamePacket, Header},
};
use crossbeam_channel::{after, bounded, never, select, tick, Receiver, Sender};
use p384::ecdsa::{SigningKey, VerifyingKey};
use tracing::{debug, error, warn};

use crate::pack::ResourcePack;
use crate::pack_queue::PackQueue;

/// Which end of the login sequence this connection drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// Accepted by a listener; expects a Login packet first.
    Server,
    /// Produced by a dial; sends the Login packet and expects the server's
    /// handshake.
    Client,
}

/// Observer invoked once per outgoing packet (after the header is written,
/// before buffering) and once per incoming packet (after the header is
/// read, before decoding), with `(header, payload, source, destination)`.
pub type PacketObserver = Box<dyn Fn(&Header, &[u8], SocketAddr, SocketAddr) + Send + Sync>;

struct SendQueue {
    encoder: Encoder,
    // Packets 'written' so far, buffered until the next 20th of a second.
    buffered: Vec<Vec<u8>>,
}

pub(crate) struct LoginState {
    /// Packet IDs that may arrive next; anything else (except Disconnect)
    /// is dropped until the connection is logged in.
    pub expected_ids: Vec<u32>,
    pub identity_data: IdentityData,
    pub client_data: ClientData,
    pub resource_packs: Vec<Arc<ResourcePack>>,
    pub pack_queue: Option<PackQueue>,
}

/// A Minecraft Bedrock connection over an ordered-stream [`Transport`].
///
/// All public operations are safe to call from multiple threads
/// simultaneously.
pub struct Connection {
    transport: Arc<dyn Transport>,
    config: Config,
    side: Side,
    // The private key identifying this end. Generated per connection when
    // not supplied.
    signing_key: SigningKey,
    // Only meaningful in the server role; mixed into key derivation.
    salt: [u8; SALT_LEN],
    local_addr: SocketAddr,
    remote_addr: SocketAddr,

    send: Mutex<SendQueue>,
    decoder: Mutex<Decoder>,

    packets_tx: Sender<Vec<u8>>,
    packets_rx: Receiver<Vec<u8>>,
    read_deadline: Mutex<Receiver<Instant>>,

    close_tx: Sender<()>,
    close_rx: Receiver<()>,
    closed: AtomicBool,
    close_reason: Mutex<Option<ErrorKind>>,

    connected_tx: Sender<()>,
    connected_rx: Receiver<()>,
    logged_in: AtomicBool,

    pub(crate) login: Mutex<LoginState>,
    observer: Option<PacketObserver>,
}

impl Connection {
    /// Creates the server end of a connection over a freshly accepted
    /// transport. `packs` are offered to the joining client for download.
    pub fn server(
        transport: Arc<dyn Transport>,
        packs: Vec<Arc<ResourcePack>>,
        config: Config,
    ) -> Arc<Self> {
        Self::server_with_key_and_observer(transport, packs, config, None, None)
    }

    /// Creates the server end with an explicit identity key and an optional
    /// per-packet observer.
    pub fn server_with_key_and_observer(
        transport: Arc<dyn Transport>,
        packs: Vec<Arc<ResourcePack>>,
        config: Config,
        key: Option<SigningKey>,
        observer: Option<PacketObserver>,
    ) -> Arc<Self> {
        Self::spawn(transport, Side::Server, packs, config, key, observer)
    }

    /// Creates the client end of a connection over a freshly dialed
    /// transport and sends the Login packet for the given identity.
    pub fn client(
        transport: Arc<dyn Transport>,
        identity: IdentityData,
        client_data: ClientData,
        config: Config,
    ) -> Result<Arc<Self>> {
        Self::client_with_key_and_observer(transport, identity, client_data, config, None, None)
    }

    /// Creates the client end with an explicit identity key and an optional
    /// per-packet observer.
    pub fn client_with_key_and_observer(
        transport: Arc<dyn Transport>,
        identity: IdentityData,
        client_data: ClientData,
        config: Config,
        key: Option<SigningKey>,
        observer: Option<PacketObserver>,
    ) -> Result<Arc<Self>> {
        let conn = Self::spawn(transport, Side::Client, Vec::new(), config, key, observer);
        {
            let mut state = conn.login.lock().unwrap();
            state.identity_data = identity.clone();
            state.client_data = client_data.clone();
        }
        let request = login::encode_request(&identity, &client_data, &conn.signing_key)?;
        conn.write_packet(&GamePacket::Login {
            protocol: CURRENT_PROTOCOL,
            connection_request: request,
        })?;
        conn.flush()?;
        Ok(conn)
    }

    fn spawn(
        transport: Arc<dyn Transport>,
        side: Side,
        packs: Vec<Arc<ResourcePack>>,
        config: Config,
        key: Option<SigningKey>,
        observer: Option<PacketObserver>,
    ) -> Arc<Self> {
        let signing_key = key.unwrap_or_else(|| SigningKey::random(&mut rand::rngs::OsRng));
        let unspecified: SocketAddr = ([0, 0, 0, 0], 0).into();
        let (packets_tx, packets_rx) = bounded(config.packet_queue_size);
        let (close_tx, close_rx) = bounded(1);
        let (connected_tx, connected_rx) = bounded(1);
        let expected_ids = match side {
            Side::Server => vec![ids::LOGIN],
            Side::Client => vec![ids::SERVER_TO_CLIENT_HANDSHAKE],
        };

        let conn = Arc::new(Self {
            send: Mutex::new(SendQueue {
                encoder: Encoder::new(Arc::clone(&transport), config.compression_level),
                buffered: Vec::new(),
            }),
            decoder: Mutex::new(Decoder::new(Arc::clone(&transport))),
            local_addr: transport.local_addr().unwrap_or(unspecified),
            remote_addr: transport.remote_addr().unwrap_or(unspecified),
            transport,
            side,
            signing_key,
            salt: rand::random(),
            packets_tx,
            packets_rx,
            read_deadline: Mutex::new(never()),
            close_tx,
            close_rx,
            closed: AtomicBool::new(false),
            close_reason: Mutex::new(None),
            connected_tx,
            connected_rx,
            logged_in: AtomicBool::new(false),
            login: Mutex::new(LoginState {
                expected_ids,
                identity_data: IdentityData::default(),
                client_data: ClientData::default(),
                resource_packs: packs,
                pack_queue: None,
            }),
            observer,
            config,
        });

        let ticker = Arc::clone(&conn);
        thread::spawn(move || ticker.flush_loop());
        let reader = Arc::clone(&conn);
        thread::spawn(move || reader.read_loop());
        conn
    }

    /// The identity data of the connected end user. Populated on the server
    /// role once the Login packet is verified.
    pub fn identity_data(&self) -> IdentityData {
        self.login.lock().unwrap().identity_data.clone()
    }

    /// The descriptor the client connected with. May be changed by the
    /// client during the session, so read it right after connecting.
    pub fn client_data(&self) -> ClientData {
        self.login.lock().unwrap().client_data.clone()
    }

    /// The resource packs this connection holds: the served packs on the
    /// server role, the downloaded packs on the client role.
    pub fn resource_packs(&self) -> Vec<Arc<ResourcePack>> {
        self.login.lock().unwrap().resource_packs.clone()
    }

    /// Whether the login sequence has completed.
    pub fn logged_in(&self) -> bool {
        self.logged_in.load(Ordering::SeqCst)
    }

    /// Which end of the login sequence this connection drives.
    pub fn side(&self) -> Side {
        self.side
    }

    /// The local address of the underlying transport.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The remote address of the underlying transport.
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Blocks until the client role reaches the logged-in state, or fails
    /// with the error that closed the connection.
    pub fn wait_connected(&self) -> Result<()> {
        let connected = self.connected_rx.clone();
        let close = self.close_rx.clone();
        select! {
            recv(connected) -> _ => {
                let _ = self.connected_tx.try_send(());
                Ok(())
            }
            recv(close) -> _ => {
                let _ = self.close_tx.try_send(());
                Err(self.take_close_error())
            }
        }
    }

    /// Encodes the packet and buffers it for the next flush. Never blocks
    /// on the transport.
    pub fn write_packet(&self, pk: &GamePacket) -> Result<()> {
        let header = Header { packet_id: pk.id() };
        let mut buf = Vec::with_capacity(64);
        header.write(&mut buf)?;
        let header_len = buf.len();
        pk.marshal(&mut buf)?;
        if let Some(observer) = &self.observer {
            observer(&header, &buf[header_len..], self.local_addr, self.remote_addr);
        }
        let mut send = self.send.lock().unwrap();
        send.buffered.push(buf);
        Ok(())
    }

    /// Reads the next packet, honoring the read deadline and the close
    /// signal.
    ///
    /// Payloads that fail to decode are logged and skipped rather than
    /// surfaced; the peer misbehaving is not something the caller can act
    /// on. Packet IDs outside the catalog come back as
    /// [`GamePacket::Unknown`].
    pub fn read_packet(&self) -> Result<GamePacket> {
        loop {
            let data = self.next_payload()?;
            let mut cursor = Cursor::new(data.as_slice());
            let header = match Header::read(&mut cursor) {
                Ok(header) => header,
                Err(err) => {
                    warn!("error reading packet header: {}", err);
                    continue;
                }
            };
            if let Some(observer) = &self.observer {
                observer(
                    &header,
                    &data[cursor.position() as usize..],
                    self.remote_addr,
                    self.local_addr,
                );
            }
            let pk = match GamePacket::unmarshal(header.packet_id, &mut cursor) {
                Ok(pk) => pk,
                Err(err) => {
                    warn!("error decoding packet {:#04x}: {}", header.packet_id, err);
                    continue;
                }
            };
            let unread = data.len() - cursor.position() as usize;
            if unread != 0 {
                debug!("{} unread bytes left in packet {:#04x}", unread, header.packet_id);
            }
            return Ok(pk);
        }
    }

    /// Reads one raw payload into `buf`, returning its length. Fails if the
    /// buffer is too small to carry the whole payload. Prefer
    /// [`Connection::read_packet`].
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let data = self.next_payload()?;
        if buf.len() < data.len() {
            return Err(ErrorKind::BufferTooSmall { buffer: buf.len(), packet: data.len() });
        }
        buf[..data.len()].copy_from_slice(&data);
        Ok(data.len())
    }

    /// Buffers a pre-serialized packet for the next flush, returning the
    /// number of bytes taken.
    pub fn write(&self, data: &[u8]) -> Result<usize> {
        let mut send = self.send.lock().unwrap();
        send.buffered.push(data.to_vec());
        Ok(data.len())
    }

    /// Hands every buffered packet to the encoder as one batch. A flush
    /// with nothing buffered is a no-op.
    pub fn flush(&self) -> Result<()> {
        let mut send = self.send.lock().unwrap();
        if send.buffered.is_empty() {
            return Ok(());
        }
        let buffered = std::mem::take(&mut send.buffered);
        send.encoder.encode(&buffered)?;
        Ok(())
    }

    /// Flushes pending writes, signals closure to every waiting operation
    /// and closes the transport. Subsequent calls are no-ops.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let _ = self.flush();
        let _ = self.close_tx.try_send(());
        self.transport.close()?;
        Ok(())
    }

    /// Sets the read and write deadline at once. Equivalent to
    /// [`Connection::set_read_deadline`], as write deadlines have no effect.
    pub fn set_deadline(&self, deadline: Option<Instant>) -> Result<()> {
        self.set_read_deadline(deadline)
    }

    /// Arms the read deadline: pending and subsequent reads fail with
    /// [`ErrorKind::ReadTimeout`] once it fires. The most recent call wins.
    /// A deadline already in the past is rejected; `None` clears the
    /// deadline.
    pub fn set_read_deadline(&self, deadline: Option<Instant>) -> Result<()> {
        let now = Instant::now();
        let timer = match deadline {
            Some(t) if t < now => return Err(ErrorKind::DeadlineInPast),
            Some(t) => after(t - now),
            // Clearing is a timer far enough out to never be reached.
            None => after(Duration::from_secs(3600) * 1_000_000),
        };
        *self.read_deadline.lock().unwrap() = timer;
        Ok(())
    }

    /// Writes are buffered and flushed on a cadence, so write deadlines
    /// have no effect. Present to mirror the read side.
    pub fn set_write_deadline(&self, _deadline: Option<Instant>) -> Result<()> {
        Ok(())
    }

    pub(crate) fn expect(&self, expected: &[u32]) {
        self.login.lock().unwrap().expected_ids = expected.to_vec();
    }

    fn next_payload(&self) -> Result<Vec<u8>> {
        let packets = self.packets_rx.clone();
        let deadline = self.read_deadline.lock().unwrap().clone();
        let close = self.close_rx.clone();
        select! {
            recv(packets) -> data => data.map_err(|_| ErrorKind::ConnectionClosed),
            recv(deadline) -> _ => Err(ErrorKind::ReadTimeout),
            recv(close) -> _ => {
                // Re-fill the latch so every other waiting reader wakes too.
                let _ = self.close_tx.try_send(());
                Err(self.take_close_error())
            }
        }
    }

    fn take_close_error(&self) -> ErrorKind {
        self.close_reason.lock().unwrap().take().unwrap_or(ErrorKind::ConnectionClosed)
    }

    fn flush_loop(&self) {
        let ticker = tick(self.config.flush_interval);
        let close = self.close_rx.clone();
        loop {
            select! {
                recv(ticker) -> _ => {
                    if self.flush().is_err() {
                        // The transport is gone; the reader observes the
                        // same and closes the connection.
                        return;
                    }
                }
                recv(close) -> _ => {
                    let _ = self.close_tx.try_send(());
                    return;
                }
            }
        }
    }

    fn read_loop(self: Arc<Self>) {
        loop {
            let decoded = self.decoder.lock().unwrap().decode();
            let payload = match decoded {
                Ok(payload) => payload,
                Err(err) => {
                    if !self.closed.load(Ordering::SeqCst) {
                        debug!("connection {}: transport read ended: {}", self.remote_addr, err);
                    }
                    let _ = self.close();
                    return;
                }
            };
            if let Err(err) = self.handle_incoming(payload) {
                error!("connection {}: {}", self.remote_addr, err);
                *self.close_reason.lock().unwrap() = Some(err);
                let _ = self.close();
                return;
            }
        }
    }

    /// Enqueues an inbound payload. While the connection is not logged in,
    /// the payload is immediately read back and dispatched to the login
    /// state machine; afterwards it waits for the caller's
    /// [`Connection::read_packet`].
    fn handle_incoming(self: &Arc<Self>, data: Vec<u8>) -> Result<()> {
        if self.packets_tx.send(data).is_err() {
            return Ok(());
        }
        if self.logged_in.load(Ordering::SeqCst) {
            return Ok(());
        }
        let pk = self.read_packet()?;
        let expected = self.login.lock().unwrap().expected_ids.clone();
        if !expected.contains(&pk.id()) && pk.id() != ids::DISCONNECT {
            // Not the packet expected next in the login sequence; likely a
            // gameplay packet sent too early. Ignore it.
            return Ok(());
        }
        match pk {
            // Packets destined for the server.
            GamePacket::Login { protocol, connection_request } => {
                self.handle_login(protocol, &connection_request)
            }
            GamePacket::ClientToServerHandshake => self.handle_client_to_server_handshake(),
            GamePacket::ResourcePackClientResponse { response, packs_to_download } => {
                self.handle_resource_pack_client_response(response, &packs_to_download)
            }
            GamePacket::ResourcePackChunkRequest { uuid, chunk_index } => {
                self.handle_resource_pack_chunk_request(&uuid, chunk_index)
            }

            // Packets destined for the client.
            GamePacket::ServerToClientHandshake { jwt } => {
                self.handle_server_to_client_handshake(&jwt)
            }
            GamePacket::PlayStatus { status } => self.handle_play_status(status),
            GamePacket::ResourcePacksInfo { behaviour_packs, texture_packs, .. } => {
                self.handle_resource_packs_info(&behaviour_packs, &texture_packs)
            }
            GamePacket::ResourcePackDataInfo { uuid, data_chunk_size, chunk_count, size } => {
                self.handle_resource_pack_data_info(&uuid, data_chunk_size, chunk_count, size)
            }
            GamePacket::ResourcePackChunkData { uuid, chunk_index, data, .. } => {
                self.handle_resource_pack_chunk_data(&uuid, chunk_index, data)
            }
            GamePacket::ResourcePackStack { behaviour_packs, texture_packs, .. } => {
                self.handle_resource_pack_stack(&behaviour_packs, &texture_packs)
            }

            GamePacket::Disconnect { message, .. } => Err(ErrorKind::Disconnected(message)),

            // StartGame, RequestChunkRadius and unknown packets pass through
            // to the caller once logged in; during the handshake they are
            // never in the expected set.
            _ => Ok(()),
        }
    }

    pub(crate) fn shared_secret(&self, peer: &VerifyingKey) -> Vec<u8> {
        let shared =
            p384::ecdh::diffie_hellman(self.signing_key.as_nonzero_scalar(), peer.as_affine());
        shared.raw_secret_bytes().to_vec()
    }

    pub(crate) fn enable_encryption(&self, key: [u8; 32]) {
        self.send.lock().unwrap().encoder.enable_encryption(&key);
        self.decoder.lock().unwrap().enable_encryption(&key);
    }

    pub(crate) fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    pub(crate) fn salt(&self) -> &[u8; SALT_LEN] {
        &self.salt
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn mark_logged_in(&self) {
        self.logged_in.store(true, Ordering::SeqCst);
    }

    pub(crate) fn signal_connected(&self) {
        let _ = self.connected_tx.try_send(());
    }

    pub(crate) fn close_receiver(&self) -> (&Receiver<()>, &Sender<()>) {
        (&self.close_rx, &self.close_tx)
    }
}
