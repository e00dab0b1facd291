//! Integration tests for the bedwire-conn crate.
//!
//! These tests run complete login sequences between two real connections,
//! or one real connection and a hand-driven raw peer, over an in-memory
//! stream pair, with all three per-connection threads live.

use std::{
    io::Cursor,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use bedwire_conn::{Connection, ResourcePack};
use bedwire_core::{
    config::Config,
    constants::{CURRENT_PROTOCOL, PACK_CHUNK_SIZE},
    error::ErrorKind,
    transport::{pipe, Transport},
};
use bedwire_protocol::{
    codec::{Decoder, Encoder},
    encryption::derive_key,
    login::{self, jwt, ClientData, IdentityData},
    packet::{ids, GamePacket, Header, PackInfoEntry, PackResponse, PlayStatus},
};
use p384::ecdsa::SigningKey;

fn alice() -> IdentityData {
    IdentityData {
        xuid: "2535416679363407".to_string(),
        identity: "e9a077a6-0e0f-4a3e-8344-1e886a1e3f54".to_string(),
        display_name: "Alice".to_string(),
        title_id: String::new(),
    }
}

/// Server configuration that trusts the given client key as the login chain
/// authority, making the client's self-signed chain count as authenticated.
fn trusting_config(client_key: &SigningKey) -> Config {
    let mut config = Config::default();
    config.authentication_key = Some(jwt::marshal_public_key(client_key.verifying_key()).unwrap());
    config
}

fn wait_until(what: &str, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        thread::sleep(Duration::from_millis(10));
    }
}

/// A hand-driven peer speaking the raw wire format, for tests that need to
/// misbehave in ways a real connection never would.
struct RawPeer {
    encoder: Encoder,
    decoder: Decoder,
    key: SigningKey,
}

impl RawPeer {
    fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            encoder: Encoder::new(Arc::clone(&transport), 6),
            decoder: Decoder::new(transport),
            key: SigningKey::random(&mut rand::rngs::OsRng),
        }
    }

    fn write(&mut self, pk: &GamePacket) {
        let mut buf = Vec::new();
        Header { packet_id: pk.id() }.write(&mut buf).unwrap();
        pk.marshal(&mut buf).unwrap();
        self.encoder.encode(&[buf]).unwrap();
    }

    fn read(&mut self) -> GamePacket {
        let payload = self.decoder.decode().unwrap();
        let mut cursor = Cursor::new(payload.as_slice());
        let header = Header::read(&mut cursor).unwrap();
        GamePacket::unmarshal(header.packet_id, &mut cursor).unwrap()
    }

    /// Plays the server part of the handshake up to and including the
    /// encryption switch: read Login, answer with the handshake JWT, turn
    /// the cipher on, and consume the client's acknowledgement.
    fn serve_encryption_handshake(&mut self) {
        let client_key = match self.read() {
            GamePacket::Login { connection_request, .. } => {
                login::verify(&connection_request).unwrap().0
            }
            other => panic!("expected Login, got {:?}", other),
        };

        let salt = *b"0123456789abcdef";
        let x5u = jwt::marshal_public_key(self.key.verifying_key()).unwrap();
        let header = jwt::Header { alg: jwt::ALG.to_string(), x5u };
        let payload = serde_json::to_vec(&serde_json::json!({
            "salt": base64::Engine::encode(&base64::engine::general_purpose::STANDARD, salt),
        }))
        .unwrap();
        let token = jwt::sign(&header, &payload, &self.key).unwrap();
        self.write(&GamePacket::ServerToClientHandshake { jwt: token.into_bytes() });

        let secret =
            p384::ecdh::diffie_hellman(self.key.as_nonzero_scalar(), client_key.as_affine());
        let shared_key = derive_key(&salt, secret.raw_secret_bytes());
        self.encoder.enable_encryption(&shared_key);
        self.decoder.enable_encryption(&shared_key);

        match self.read() {
            GamePacket::ClientToServerHandshake => {}
            other => panic!("expected ClientToServerHandshake, got {:?}", other),
        }
    }
}

#[test]
fn test_happy_path_login_without_packs() {
    let (server_end, client_end) = pipe();
    let client_key = SigningKey::random(&mut rand::rngs::OsRng);

    let server = Connection::server(
        Arc::new(server_end),
        Vec::new(),
        trusting_config(&client_key),
    );
    let client = Connection::client_with_key_and_observer(
        Arc::new(client_end),
        alice(),
        ClientData::default(),
        Config::default(),
        Some(client_key),
        None,
    )
    .unwrap();

    client.wait_connected().unwrap();
    assert!(client.logged_in());
    wait_until("server login", || server.logged_in());

    // The verified identity is available on the server side.
    let identity = server.identity_data();
    assert_eq!(identity.display_name, "Alice");
    assert_eq!(identity.xuid, "2535416679363407");
    assert_eq!(server.client_data().game_version, ClientData::default().game_version);

    // Once logged in, the connection is a transparent conduit both ways.
    client.write_packet(&GamePacket::RequestChunkRadius { chunk_radius: 8 }).unwrap();
    match server.read_packet().unwrap() {
        GamePacket::RequestChunkRadius { chunk_radius } => assert_eq!(chunk_radius, 8),
        other => panic!("expected RequestChunkRadius, got {:?}", other),
    }

    server.write_packet(&GamePacket::StartGame { payload: vec![1, 2, 3, 4] }).unwrap();
    match client.read_packet().unwrap() {
        GamePacket::StartGame { payload } => assert_eq!(payload, vec![1, 2, 3, 4]),
        other => panic!("expected StartGame, got {:?}", other),
    }

    client.close().unwrap();
    server.close().unwrap();
}

#[test]
fn test_unauthenticated_client_is_rejected() {
    let (server_end, client_end) = pipe();

    // Default config trusts the Mojang authority; a self-signed chain is
    // not authenticated.
    let server = Connection::server(Arc::new(server_end), Vec::new(), Config::default());
    let client = Connection::client(
        Arc::new(client_end),
        alice(),
        ClientData::default(),
        Config::default(),
    )
    .unwrap();

    assert!(client.wait_connected().is_err());
    assert!(!server.logged_in());
    assert!(!client.logged_in());
}

#[test]
fn test_outdated_client_protocol_fails_login() {
    let (server_end, client_end) = pipe();
    let server = Connection::server(Arc::new(server_end), Vec::new(), Config::default());

    let mut raw = RawPeer::new(Arc::new(client_end));
    raw.write(&GamePacket::Login {
        protocol: CURRENT_PROTOCOL - 1,
        connection_request: Vec::new(),
    });

    match raw.read() {
        GamePacket::PlayStatus { status } => assert_eq!(status, PlayStatus::LoginFailedClient),
        other => panic!("expected PlayStatus, got {:?}", other),
    }
    assert!(!server.logged_in());
    // The server closed its end; further reads observe end-of-stream.
    assert!(raw.decoder.decode().is_err());
}

#[test]
fn test_outdated_server_protocol_fails_login() {
    let (server_end, client_end) = pipe();
    let _server = Connection::server(Arc::new(server_end), Vec::new(), Config::default());

    let mut raw = RawPeer::new(Arc::new(client_end));
    raw.write(&GamePacket::Login {
        protocol: CURRENT_PROTOCOL + 1,
        connection_request: Vec::new(),
    });

    match raw.read() {
        GamePacket::PlayStatus { status } => assert_eq!(status, PlayStatus::LoginFailedServer),
        other => panic!("expected PlayStatus, got {:?}", other),
    }
}

#[test]
fn test_single_pack_download() {
    let (server_end, client_end) = pipe();
    let client_key = SigningKey::random(&mut rand::rngs::OsRng);

    // One texture pack of 1 MiB + 1 byte: two full chunks and a one-byte
    // tail.
    let size = 2 * PACK_CHUNK_SIZE + 1;
    let content: Vec<u8> = (0..size).map(|i| (i * 31 + 7) as u8).collect();
    let uuid = uuid::Uuid::new_v4().to_string();
    let pack = Arc::new(ResourcePack::new(uuid.clone(), "1.0.0", content.clone(), false, false));

    let server = Connection::server(
        Arc::new(server_end),
        vec![Arc::clone(&pack)],
        trusting_config(&client_key),
    );

    let chunk_requests = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&chunk_requests);
    let client = Connection::client_with_key_and_observer(
        Arc::new(client_end),
        alice(),
        ClientData::default(),
        Config::default(),
        Some(client_key),
        Some(Box::new(move |header, _payload, _src, _dst| {
            if header.packet_id == ids::RESOURCE_PACK_CHUNK_REQUEST {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        })),
    )
    .unwrap();

    client.wait_connected().unwrap();
    wait_until("server login", || server.logged_in());

    assert_eq!(chunk_requests.load(Ordering::SeqCst), 3);
    let downloaded = client.resource_packs();
    assert_eq!(downloaded.len(), 1);
    assert_eq!(downloaded[0].uuid(), uuid);
    assert_eq!(downloaded[0].version(), "1.0.0");
    assert_eq!(downloaded[0].contents(), content.as_slice());
    assert!(!downloaded[0].has_behaviours());

    client.close().unwrap();
    server.close().unwrap();
}

#[test]
fn test_behaviour_and_texture_packs_download_in_sequence() {
    let (server_end, client_end) = pipe();
    let client_key = SigningKey::random(&mut rand::rngs::OsRng);

    let behaviour_uuid = uuid::Uuid::new_v4().to_string();
    let texture_uuid = uuid::Uuid::new_v4().to_string();
    let behaviour = Arc::new(ResourcePack::new(
        behaviour_uuid.clone(),
        "2.1.0",
        vec![0xb0; 100],
        true,
        true,
    ));
    let texture = Arc::new(ResourcePack::new(
        texture_uuid.clone(),
        "1.0.0",
        (0..PACK_CHUNK_SIZE + 9).map(|i| i as u8).collect(),
        false,
        false,
    ));

    let server = Connection::server(
        Arc::new(server_end),
        vec![behaviour, texture],
        trusting_config(&client_key),
    );
    let client = Connection::client_with_key_and_observer(
        Arc::new(client_end),
        alice(),
        ClientData::default(),
        Config::default(),
        Some(client_key),
        None,
    )
    .unwrap();

    client.wait_connected().unwrap();
    wait_until("server login", || server.logged_in());

    let downloaded = client.resource_packs();
    assert_eq!(downloaded.len(), 2);
    let by_uuid = |uuid: &str| {
        downloaded
            .iter()
            .find(|pack| pack.uuid() == uuid)
            .unwrap_or_else(|| panic!("pack {} not downloaded", uuid))
    };
    assert!(by_uuid(&behaviour_uuid).has_behaviours());
    assert!(by_uuid(&behaviour_uuid).has_scripts());
    assert_eq!(by_uuid(&behaviour_uuid).len(), 100);
    assert!(!by_uuid(&texture_uuid).has_behaviours());
    assert_eq!(by_uuid(&texture_uuid).len(), PACK_CHUNK_SIZE + 9);
}

#[test]
fn test_out_of_order_chunk_is_fatal() {
    let (server_end, client_end) = pipe();

    let client = Connection::client(
        Arc::new(client_end),
        alice(),
        ClientData::default(),
        Config::default(),
    )
    .unwrap();

    let mut raw = RawPeer::new(Arc::new(server_end));
    raw.serve_encryption_handshake();
    raw.write(&GamePacket::PlayStatus { status: PlayStatus::LoginSuccess });

    let uuid = "9e304334-0f0c-41e2-b4d8-ab4c81a17a95";
    raw.write(&GamePacket::ResourcePacksInfo {
        texture_pack_required: false,
        has_scripts: false,
        behaviour_packs: Vec::new(),
        texture_packs: vec![PackInfoEntry {
            uuid: uuid.to_string(),
            version: "1.0.0".to_string(),
            size: 1000,
            has_scripts: false,
        }],
    });

    match raw.read() {
        GamePacket::ResourcePackClientResponse { response, packs_to_download } => {
            assert_eq!(response, PackResponse::SendPacks);
            // The echoed token is bit-exactly uuid_version.
            assert_eq!(packs_to_download, vec![format!("{}_1.0.0", uuid)]);
        }
        other => panic!("expected ResourcePackClientResponse, got {:?}", other),
    }

    // An early gameplay packet is tolerated and dropped.
    raw.write(&GamePacket::RequestChunkRadius { chunk_radius: 4 });

    raw.write(&GamePacket::ResourcePackDataInfo {
        uuid: uuid.to_string(),
        data_chunk_size: PACK_CHUNK_SIZE as u32,
        chunk_count: 1,
        size: 1000,
    });
    match raw.read() {
        GamePacket::ResourcePackChunkRequest { chunk_index, .. } => assert_eq!(chunk_index, 0),
        other => panic!("expected ResourcePackChunkRequest, got {:?}", other),
    }

    // Send chunk 1 where chunk 0 is expected.
    raw.write(&GamePacket::ResourcePackChunkData {
        uuid: uuid.to_string(),
        chunk_index: 1,
        data_offset: 0,
        data: vec![0u8; 1000],
    });

    let err = client.wait_connected().unwrap_err();
    let message = err.to_string();
    assert!(
        message.contains("chunk index 1, but expected 0"),
        "unexpected error message {:?}",
        message
    );
    assert!(!client.logged_in());
}

#[test]
fn test_disconnect_mid_handshake_surfaces_reason() {
    let (server_end, client_end) = pipe();

    let client = Connection::client(
        Arc::new(client_end),
        alice(),
        ClientData::default(),
        Config::default(),
    )
    .unwrap();

    let mut raw = RawPeer::new(Arc::new(server_end));
    match raw.read() {
        GamePacket::Login { .. } => {}
        other => panic!("expected Login, got {:?}", other),
    }
    raw.write(&GamePacket::Disconnect {
        hide_screen: false,
        message: "kicked".to_string(),
    });

    // Give the dispatcher time to consume the Disconnect and close.
    thread::sleep(Duration::from_millis(300));
    match client.read_packet() {
        Err(ErrorKind::Disconnected(message)) => {
            assert_eq!(message, "kicked");
            assert_eq!(
                ErrorKind::Disconnected(message).to_string(),
                "Disconnected: kicked"
            );
        }
        other => panic!("expected Disconnected, got {:?}", other.map(|_| ())),
    }
    assert!(!client.logged_in());
}

#[test]
fn test_texture_pack_required_flag_propagates() {
    let (server_end, client_end) = pipe();
    let client_key = SigningKey::random(&mut rand::rngs::OsRng);

    let mut config = trusting_config(&client_key);
    config.texture_packs_required = true;
    let _server = Connection::server(Arc::new(server_end), Vec::new(), config);

    let client = Connection::client_with_key_and_observer(
        Arc::new(client_end),
        alice(),
        ClientData::default(),
        Config::default(),
        Some(client_key),
        Some(Box::new(|header, payload, _src, _dst| {
            if header.packet_id == ids::RESOURCE_PACKS_INFO {
                // First payload byte is the TexturePackRequired bool.
                assert_eq!(payload[0], 1);
            }
        })),
    )
    .unwrap();

    client.wait_connected().unwrap();
}
