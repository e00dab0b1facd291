//! The login and encryption legs of the state machine.
//!
//! Server role: Login → ServerToClientHandshake (encryption on) →
//! ClientToServerHandshake → PlayStatus + ResourcePacksInfo.
//! Client role: ServerToClientHandshake (encryption on) → PlayStatus →
//! ResourcePacksInfo / ResourcePackStack.

use std::collections::HashMap;

use base64::{
    engine::general_purpose::{STANDARD, STANDARD_NO_PAD},
    Engine,
};
use bedwire_core::{
    constants::CURRENT_PROTOCOL,
    error::{CryptoErrorKind, ErrorKind, Result},
};
use bedwire_protocol::{
    encryption::derive_key,
    login::{self, jwt},
    packet::{ids, GamePacket, PackInfoEntry, PackResponse, PlayStatus, StackEntry},
};
use p384::ecdsa::VerifyingKey;

use super::Connection;
use crate::pack_queue::{DownloadingPack, PackQueue};

impl Connection {
    /// Server: verifies the login request, enforces protocol equality and
    /// kicks off encryption.
    pub(crate) fn handle_login(&self, protocol: i32, connection_request: &[u8]) -> Result<()> {
        // The next expected packet is the client's handshake acknowledgement.
        self.expect(&[ids::CLIENT_TO_SERVER_HANDSHAKE]);

        if protocol != CURRENT_PROTOCOL {
            // By default the client is assumed outdated; flip when it is the
            // server that lags behind.
            let status = if protocol > CURRENT_PROTOCOL {
                PlayStatus::LoginFailedServer
            } else {
                PlayStatus::LoginFailedClient
            };
            let _ = self.write_packet(&GamePacket::PlayStatus { status });
            return Err(ErrorKind::ProtocolVersionMismatch {
                client: protocol,
                server: CURRENT_PROTOCOL,
            });
        }

        let (client_key, authenticated) = match &self.config().authentication_key {
            Some(authority) => login::verify_with_authority(connection_request, authority)?,
            None => login::verify(connection_request)?,
        };
        if !authenticated {
            return Err(ErrorKind::NotAuthenticated(self.remote_addr()));
        }

        let (identity_data, client_data) = login::decode(connection_request)?;
        // Never trust the wire: both blobs are validated before use.
        identity_data.validate()?;
        client_data.validate()?;
        {
            let mut state = self.login.lock().unwrap();
            state.identity_data = identity_data;
            state.client_data = client_data;
        }

        self.begin_encryption(&client_key)
    }

    /// Server: sends the handshake JWT in plaintext, then turns the cipher
    /// on for both directions.
    fn begin_encryption(&self, client_key: &VerifyingKey) -> Result<()> {
        let x5u = jwt::marshal_public_key(self.signing_key().verifying_key())?;
        let header = jwt::Header { alg: jwt::ALG.to_string(), x5u };
        let payload = serde_json::to_vec(&serde_json::json!({
            "salt": STANDARD.encode(self.salt()),
        }))
        .map_err(|e| ErrorKind::CryptoError(CryptoErrorKind::JwtFormat(e.to_string())))?;
        let token = jwt::sign(&header, &payload, self.signing_key())?;

        self.write_packet(&GamePacket::ServerToClientHandshake { jwt: token.into_bytes() })?;
        // Flush now: everything after this batch is ciphertext.
        self.flush()?;

        let secret = self.shared_secret(client_key);
        self.enable_encryption(derive_key(self.salt(), &secret));
        Ok(())
    }

    /// Server: the client acknowledged encryption; report login success and
    /// advertise the owned packs.
    pub(crate) fn handle_client_to_server_handshake(&self) -> Result<()> {
        // The next expected packet is the client's answer to the pack info.
        self.expect(&[ids::RESOURCE_PACK_CLIENT_RESPONSE]);

        self.write_packet(&GamePacket::PlayStatus { status: PlayStatus::LoginSuccess })?;

        let mut has_scripts = false;
        let mut behaviour_packs = Vec::new();
        let mut texture_packs = Vec::new();
        for pack in self.login.lock().unwrap().resource_packs.iter() {
            let entry = PackInfoEntry {
                uuid: pack.uuid().to_string(),
                version: pack.version().to_string(),
                size: pack.len() as u64,
                has_scripts: pack.has_scripts(),
            };
            if pack.has_scripts() {
                has_scripts = true;
            }
            if pack.has_behaviours() {
                behaviour_packs.push(entry);
            } else {
                texture_packs.push(entry);
            }
        }
        self.write_packet(&GamePacket::ResourcePacksInfo {
            texture_pack_required: self.config().texture_packs_required,
            has_scripts,
            behaviour_packs,
            texture_packs,
        })
    }

    /// Client: verifies the server's self-signed handshake JWT, derives the
    /// shared key and turns the cipher on for both directions.
    pub(crate) fn handle_server_to_client_handshake(&self, token: &[u8]) -> Result<()> {
        let token = std::str::from_utf8(token).map_err(|_| {
            ErrorKind::CryptoError(CryptoErrorKind::JwtFormat("token is not UTF-8".to_string()))
        })?;
        let header = jwt::header(token)?;
        if !jwt::allowed_alg(&header.alg) {
            return Err(ErrorKind::CryptoError(CryptoErrorKind::JwtAlgorithm(header.alg)));
        }
        // The JWT is self-signed: the key that verifies it is the one in its
        // own header.
        let server_key = jwt::parse_public_key(&header.x5u)?;
        jwt::verify(token, &server_key)?;

        let claims: HashMap<String, String> = serde_json::from_slice(&jwt::payload(token)?)
            .map_err(|e| ErrorKind::CryptoError(CryptoErrorKind::JwtFormat(e.to_string())))?;
        let b64_salt = claims.get("salt").ok_or_else(|| {
            ErrorKind::CryptoError(CryptoErrorKind::Salt(
                "handshake JWT payload contained no 'salt'".to_string(),
            ))
        })?;
        // Some JWT implementations use padded base64 where it should be raw.
        let salt = STANDARD_NO_PAD
            .decode(b64_salt.trim_end_matches('='))
            .map_err(|e| ErrorKind::CryptoError(CryptoErrorKind::Salt(e.to_string())))?;

        let secret = self.shared_secret(&server_key);
        self.enable_encryption(derive_key(&salt, &secret));

        // The empty acknowledgement is the first encrypted packet.
        self.write_packet(&GamePacket::ClientToServerHandshake)?;
        self.expect(&[ids::PLAY_STATUS]);
        Ok(())
    }

    /// Client: reacts to the server's verdict on the login state.
    pub(crate) fn handle_play_status(&self, status: PlayStatus) -> Result<()> {
        let failed = |msg: &str| Err(ErrorKind::LoginFailed(msg.to_string()));
        match status {
            PlayStatus::LoginSuccess => {
                self.expect(&[ids::RESOURCE_PACKS_INFO]);
                Ok(())
            }
            PlayStatus::LoginFailedClient => failed("client outdated"),
            PlayStatus::LoginFailedServer => failed("server outdated"),
            // Reserved for after the login sequence.
            PlayStatus::PlayerSpawn => Ok(()),
            PlayStatus::LoginFailedInvalidTenant => failed("invalid edu edition game owner"),
            PlayStatus::LoginFailedVanillaEdu => {
                failed("cannot join an edu edition game on vanilla")
            }
            PlayStatus::LoginFailedEduVanilla => {
                failed("cannot join a vanilla game on edu edition")
            }
            PlayStatus::LoginFailedServerFull => failed("server full"),
        }
    }

    /// Client: records the advertised packs and asks for the ones to be
    /// sent, echoing the `uuid_version` tokens the protocol requires.
    pub(crate) fn handle_resource_packs_info(
        &self,
        behaviour_packs: &[PackInfoEntry],
        texture_packs: &[PackInfoEntry],
    ) -> Result<()> {
        let mut queue = PackQueue::downloading();
        queue.pack_amount = behaviour_packs.len() + texture_packs.len();

        let mut packs_to_download = Vec::with_capacity(queue.pack_amount);
        for (entry, behaviours) in texture_packs
            .iter()
            .map(|entry| (entry, false))
            .chain(behaviour_packs.iter().map(|entry| (entry, true)))
        {
            packs_to_download.push(format!("{}_{}", entry.uuid, entry.version));
            queue.downloading_packs.insert(
                entry.uuid.clone(),
                DownloadingPack::new(
                    entry.size,
                    entry.version.clone(),
                    behaviours,
                    entry.has_scripts,
                ),
            );
        }
        self.login.lock().unwrap().pack_queue = Some(queue);

        if !packs_to_download.is_empty() {
            self.expect(&[ids::RESOURCE_PACK_DATA_INFO, ids::RESOURCE_PACK_CHUNK_DATA]);
            return self.write_packet(&GamePacket::ResourcePackClientResponse {
                response: PackResponse::SendPacks,
                packs_to_download,
            });
        }
        self.expect(&[ids::RESOURCE_PACK_STACK]);
        self.write_packet(&GamePacket::ResourcePackClientResponse {
            response: PackResponse::AllPacksDownloaded,
            packs_to_download: Vec::new(),
        })
    }

    /// Client: checks every stacked pack was downloaded, then completes the
    /// login sequence.
    pub(crate) fn handle_resource_pack_stack(
        &self,
        behaviour_packs: &[StackEntry],
        texture_packs: &[StackEntry],
    ) -> Result<()> {
        for entry in texture_packs {
            if !self.has_pack(&entry.uuid, &entry.version, false) {
                return Err(ErrorKind::PackTransfer(format!(
                    "texture pack {{uuid={}, version={}}} not downloaded",
                    entry.uuid, entry.version
                )));
            }
        }
        for entry in behaviour_packs {
            if !self.has_pack(&entry.uuid, &entry.version, true) {
                return Err(ErrorKind::PackTransfer(format!(
                    "behaviour pack {{uuid={}, version={}}} not downloaded",
                    entry.uuid, entry.version
                )));
            }
        }
        self.signal_connected();
        self.mark_logged_in();
        self.write_packet(&GamePacket::ResourcePackClientResponse {
            response: PackResponse::Completed,
            packs_to_download: Vec::new(),
        })
    }

    fn has_pack(&self, uuid: &str, version: &str, behaviours: bool) -> bool {
        self.login.lock().unwrap().resource_packs.iter().any(|pack| {
            pack.uuid() == uuid && pack.version() == version && pack.has_behaviours() == behaviours
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bedwire_core::{config::Config, transport::pipe};

    use super::*;

    #[test]
    fn test_play_status_failures_map_to_canonical_strings() {
        let (end, _peer) = pipe();
        let conn = Connection::server(Arc::new(end), Vec::new(), Config::default());

        let cases = [
            (PlayStatus::LoginFailedClient, "client outdated"),
            (PlayStatus::LoginFailedServer, "server outdated"),
            (PlayStatus::LoginFailedInvalidTenant, "invalid edu edition game owner"),
            (PlayStatus::LoginFailedVanillaEdu, "cannot join an edu edition game on vanilla"),
            (PlayStatus::LoginFailedEduVanilla, "cannot join a vanilla game on edu edition"),
            (PlayStatus::LoginFailedServerFull, "server full"),
        ];
        for (status, message) in cases {
            match conn.handle_play_status(status) {
                Err(ErrorKind::LoginFailed(msg)) => assert_eq!(msg, message),
                other => panic!("unexpected result {:?}", other),
            }
        }
    }

    #[test]
    fn test_play_status_player_spawn_is_ignored() {
        let (end, _peer) = pipe();
        let conn = Connection::server(Arc::new(end), Vec::new(), Config::default());
        conn.handle_play_status(PlayStatus::PlayerSpawn).unwrap();
    }
}
