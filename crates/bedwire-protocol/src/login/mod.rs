//! The login connection request.
//!
//! A Login packet carries two length-prefixed blobs: a JSON document
//! `{"chain": [jwt, ...]}` establishing the client's identity key, and a
//! client-data JWT signed by that key. Verification walks the chain, each
//! token signed by the key its predecessor promised in `identityPublicKey`,
//! and marks the connection authenticated when the chain is rooted in the
//! authentication authority's key.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read};

use bedwire_core::error::{CryptoErrorKind, DecodingErrorKind, ErrorKind, Result};
use p384::ecdsa::{SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};

pub mod jwt;

mod data;

pub use data::{ClientData, IdentityData};

/// Standard-base64 DER public key of the Mojang authentication authority.
/// A login chain rooted in this key belongs to an XBOX Live account.
pub const MOJANG_PUBLIC_KEY: &str = "MHYwEAYHKoZIzj0CAQYFK4EEACIDYgAE8ELkixyLcwlZryUQcu1TvPOmI2B7vX83ndnWRUaXm74wFfa5f/lwQNTfrLVHa2PmenpGI6JhIMUJaWZrjmMj90NoKNFSNBuKdm8rYiXsfaz3K36x/1U26HpG0ZxK/V1V";

#[derive(Serialize, Deserialize)]
struct ChainDocument {
    chain: Vec<String>,
}

#[derive(Serialize, Deserialize)]
struct ChainClaims {
    #[serde(rename = "identityPublicKey")]
    identity_public_key: String,
    #[serde(rename = "extraData", default, skip_serializing_if = "Option::is_none")]
    extra_data: Option<IdentityData>,
}

/// Verifies a connection request against the Mojang authority key.
///
/// Returns the client's identity public key, which encryption will be
/// negotiated with, and whether the chain is rooted in the authority.
pub fn verify(request: &[u8]) -> Result<(VerifyingKey, bool)> {
    verify_with_authority(request, MOJANG_PUBLIC_KEY)
}

/// Verifies a connection request against a caller-supplied authority key in
/// `x5u` form. Used by servers that trust a different root, and by tests.
pub fn verify_with_authority(request: &[u8], authority: &str) -> Result<(VerifyingKey, bool)> {
    let (chain, client_jwt) = split_request(request)?;

    let mut authenticated = false;
    let mut expected_x5u: Option<String> = None;
    let mut identity_key: Option<VerifyingKey> = None;

    for token in &chain {
        let header = jwt::header(token)?;
        if !jwt::allowed_alg(&header.alg) {
            return Err(ErrorKind::CryptoError(CryptoErrorKind::JwtAlgorithm(header.alg)));
        }
        match &expected_x5u {
            // The first token is self-signed; its x5u decides authentication.
            None => {
                if header.x5u == authority {
                    authenticated = true;
                }
            }
            Some(promised) => {
                if &header.x5u != promised {
                    return Err(ErrorKind::DecodingError(DecodingErrorKind::LoginRequest(
                        "chain link not signed by the promised key".to_string(),
                    )));
                }
            }
        }
        let key = jwt::parse_public_key(&header.x5u)?;
        jwt::verify(token, &key)?;

        let claims: ChainClaims = serde_json::from_slice(&jwt::payload(token)?).map_err(|e| {
            ErrorKind::DecodingError(DecodingErrorKind::LoginRequest(e.to_string()))
        })?;
        identity_key = Some(jwt::parse_public_key(&claims.identity_public_key)?);
        expected_x5u = Some(claims.identity_public_key);
    }

    let identity_key = identity_key.ok_or_else(|| {
        ErrorKind::DecodingError(DecodingErrorKind::LoginRequest("empty chain".to_string()))
    })?;

    // The client data must be signed by the identity key the chain ends in.
    jwt::verify(&client_jwt, &identity_key)?;

    Ok((identity_key, authenticated))
}

/// Decodes the identity and client data out of a connection request. Call
/// [`verify`] first; decoding performs no signature checks of its own.
pub fn decode(request: &[u8]) -> Result<(IdentityData, ClientData)> {
    let (chain, client_jwt) = split_request(request)?;
    let last = chain.last().ok_or_else(|| {
        ErrorKind::DecodingError(DecodingErrorKind::LoginRequest("empty chain".to_string()))
    })?;

    let claims: ChainClaims = serde_json::from_slice(&jwt::payload(last)?)
        .map_err(|e| ErrorKind::DecodingError(DecodingErrorKind::LoginRequest(e.to_string())))?;
    let identity = claims.extra_data.ok_or_else(|| {
        ErrorKind::DecodingError(DecodingErrorKind::IdentityData(
            "chain carries no extraData".to_string(),
        ))
    })?;

    let client: ClientData = serde_json::from_slice(&jwt::payload(&client_jwt)?)
        .map_err(|e| ErrorKind::DecodingError(DecodingErrorKind::ClientData(e.to_string())))?;

    Ok((identity, client))
}

/// Produces a self-signed connection request for the given identity, the
/// form a client without XBOX Live authentication dials with.
pub fn encode_request(
    identity: &IdentityData,
    client_data: &ClientData,
    key: &SigningKey,
) -> Result<Vec<u8>> {
    let x5u = jwt::marshal_public_key(key.verifying_key())?;
    let header = jwt::Header { alg: jwt::ALG.to_string(), x5u: x5u.clone() };

    let claims = ChainClaims { identity_public_key: x5u, extra_data: Some(identity.clone()) };
    let claims_json = serde_json::to_vec(&claims)
        .map_err(|e| ErrorKind::DecodingError(DecodingErrorKind::LoginRequest(e.to_string())))?;
    let chain_token = jwt::sign(&header, &claims_json, key)?;

    let chain_json = serde_json::to_vec(&ChainDocument { chain: vec![chain_token] })
        .map_err(|e| ErrorKind::DecodingError(DecodingErrorKind::LoginRequest(e.to_string())))?;

    let client_json = serde_json::to_vec(client_data)
        .map_err(|e| ErrorKind::DecodingError(DecodingErrorKind::ClientData(e.to_string())))?;
    let client_token = jwt::sign(&header, &client_json, key)?;

    let mut request = Vec::new();
    request.write_u32::<LittleEndian>(chain_json.len() as u32)?;
    request.extend_from_slice(&chain_json);
    request.write_u32::<LittleEndian>(client_token.len() as u32)?;
    request.extend_from_slice(client_token.as_bytes());
    Ok(request)
}

fn split_request(request: &[u8]) -> Result<(Vec<String>, String)> {
    let malformed = |msg: &str| {
        ErrorKind::DecodingError(DecodingErrorKind::LoginRequest(msg.to_string()))
    };

    let mut cursor = Cursor::new(request);
    let chain_len = cursor.read_u32::<LittleEndian>().map_err(|_| malformed("truncated"))? as usize;
    let mut chain_json = vec![0u8; chain_len];
    cursor.read_exact(&mut chain_json).map_err(|_| malformed("truncated chain"))?;
    let document: ChainDocument =
        serde_json::from_slice(&chain_json).map_err(|_| malformed("chain is not JSON"))?;

    let client_len =
        cursor.read_u32::<LittleEndian>().map_err(|_| malformed("truncated"))? as usize;
    let mut client_jwt = vec![0u8; client_len];
    cursor.read_exact(&mut client_jwt).map_err(|_| malformed("truncated client data"))?;
    let client_jwt =
        String::from_utf8(client_jwt).map_err(|_| malformed("client data is not UTF-8"))?;

    Ok((document.chain, client_jwt))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_identity() -> IdentityData {
        IdentityData {
            xuid: "2535416679363407".to_string(),
            identity: "e9a077a6-0e0f-4a3e-8344-1e886a1e3f54".to_string(),
            display_name: "Alice".to_string(),
            title_id: String::new(),
        }
    }

    #[test]
    fn test_self_signed_request_verifies_unauthenticated() {
        let key = SigningKey::random(&mut rand::rngs::OsRng);
        let request = encode_request(&test_identity(), &ClientData::default(), &key).unwrap();

        let (identity_key, authenticated) = verify(&request).unwrap();
        assert!(!authenticated, "a self-signed chain is not rooted in the Mojang key");
        assert_eq!(&identity_key, key.verifying_key());
    }

    #[test]
    fn test_request_authenticated_against_own_authority() {
        let key = SigningKey::random(&mut rand::rngs::OsRng);
        let request = encode_request(&test_identity(), &ClientData::default(), &key).unwrap();

        let authority = jwt::marshal_public_key(key.verifying_key()).unwrap();
        let (_, authenticated) = verify_with_authority(&request, &authority).unwrap();
        assert!(authenticated);
    }

    #[test]
    fn test_decode_round_trips_identity_and_client_data() {
        let key = SigningKey::random(&mut rand::rngs::OsRng);
        let client_data = ClientData::default();
        let request = encode_request(&test_identity(), &client_data, &key).unwrap();

        let (identity, decoded_client) = decode(&request).unwrap();
        assert_eq!(identity, test_identity());
        assert_eq!(decoded_client, client_data);
    }

    #[test]
    fn test_client_data_signed_by_other_key_is_rejected() {
        let key = SigningKey::random(&mut rand::rngs::OsRng);
        let other = SigningKey::random(&mut rand::rngs::OsRng);
        let mut request = encode_request(&test_identity(), &ClientData::default(), &key).unwrap();

        // Splice in a client-data token signed by an unrelated key.
        let (chain, _) = split_request(&request).unwrap();
        let header = jwt::Header {
            alg: jwt::ALG.to_string(),
            x5u: jwt::marshal_public_key(other.verifying_key()).unwrap(),
        };
        let forged = jwt::sign(&header, b"{}", &other).unwrap();
        let chain_json = serde_json::to_vec(&ChainDocument { chain }).unwrap();
        request.clear();
        request.write_u32::<LittleEndian>(chain_json.len() as u32).unwrap();
        request.extend_from_slice(&chain_json);
        request.write_u32::<LittleEndian>(forged.len() as u32).unwrap();
        request.extend_from_slice(forged.as_bytes());

        assert!(verify(&request).is_err());
    }

    #[test]
    fn test_garbage_request_is_a_login_decode_error() {
        assert!(matches!(
            verify(b"\xff\xff\xff\xff"),
            Err(ErrorKind::DecodingError(DecodingErrorKind::LoginRequest(_)))
        ));
    }
}
