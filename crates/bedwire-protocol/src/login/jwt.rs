//! Compact ES384 JWTs.
//!
//! The login chain and the encryption handshake both ride on three-segment
//! `header.payload.signature` tokens, signed with the P-384 identity key of
//! whoever minted them. Only ES384 is ever accepted.

use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine,
};
use bedwire_core::error::{CryptoErrorKind, ErrorKind, Result};
use p384::{
    ecdsa::{
        signature::{Signer, Verifier},
        Signature, SigningKey, VerifyingKey,
    },
    pkcs8::{DecodePublicKey, EncodePublicKey},
};
use serde::{Deserialize, Serialize};

/// The one signature algorithm the login sequence accepts.
pub const ALG: &str = "ES384";

/// JOSE header of a login-sequence token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Header {
    /// Signature algorithm; must be [`ALG`].
    pub alg: String,
    /// Standard-base64 DER encoding of the signer's public key.
    pub x5u: String,
}

/// Returns whether the algorithm is acceptable for login-sequence tokens.
pub fn allowed_alg(alg: &str) -> bool {
    alg == ALG
}

/// Marshals a public key to the standard-base64 DER form carried in `x5u`.
pub fn marshal_public_key(key: &VerifyingKey) -> Result<String> {
    let der = key
        .to_public_key_der()
        .map_err(|e| ErrorKind::CryptoError(CryptoErrorKind::PublicKey(e.to_string())))?;
    Ok(STANDARD.encode(der.as_bytes()))
}

/// Parses a public key from the standard-base64 DER form carried in `x5u`.
pub fn parse_public_key(x5u: &str) -> Result<VerifyingKey> {
    let der = STANDARD
        .decode(x5u)
        .map_err(|e| ErrorKind::CryptoError(CryptoErrorKind::PublicKey(e.to_string())))?;
    VerifyingKey::from_public_key_der(&der)
        .map_err(|e| ErrorKind::CryptoError(CryptoErrorKind::PublicKey(e.to_string())))
}

/// Signs `payload` (raw JSON bytes) under `header` with the given key,
/// producing a compact token.
pub fn sign(header: &Header, payload: &[u8], key: &SigningKey) -> Result<String> {
    let header_json = serde_json::to_vec(header)
        .map_err(|e| ErrorKind::CryptoError(CryptoErrorKind::JwtFormat(e.to_string())))?;
    let signing_input =
        format!("{}.{}", URL_SAFE_NO_PAD.encode(header_json), URL_SAFE_NO_PAD.encode(payload));
    let signature: Signature = key.sign(signing_input.as_bytes());
    Ok(format!("{}.{}", signing_input, URL_SAFE_NO_PAD.encode(signature.to_bytes())))
}

/// Verifies the signature of a compact token against the given key.
pub fn verify(token: &str, key: &VerifyingKey) -> Result<()> {
    let (signing_input, signature_b64) = token
        .rsplit_once('.')
        .ok_or_else(|| ErrorKind::CryptoError(CryptoErrorKind::JwtFormat("not compact".into())))?;
    let signature_bytes = URL_SAFE_NO_PAD
        .decode(signature_b64)
        .map_err(|e| ErrorKind::CryptoError(CryptoErrorKind::JwtFormat(e.to_string())))?;
    let signature = Signature::from_slice(&signature_bytes)
        .map_err(|_| ErrorKind::CryptoError(CryptoErrorKind::JwtSignature))?;
    key.verify(signing_input.as_bytes(), &signature)
        .map_err(|_| ErrorKind::CryptoError(CryptoErrorKind::JwtSignature))
}

/// Parses the header segment of a compact token.
pub fn header(token: &str) -> Result<Header> {
    serde_json::from_slice(&segment(token, 0)?)
        .map_err(|e| ErrorKind::CryptoError(CryptoErrorKind::JwtFormat(e.to_string())))
}

/// Returns the decoded payload segment of a compact token.
pub fn payload(token: &str) -> Result<Vec<u8>> {
    segment(token, 1)
}

fn segment(token: &str, index: usize) -> Result<Vec<u8>> {
    let seg = token.split('.').nth(index).ok_or_else(|| {
        ErrorKind::CryptoError(CryptoErrorKind::JwtFormat("missing segment".into()))
    })?;
    URL_SAFE_NO_PAD
        .decode(seg)
        .map_err(|e| ErrorKind::CryptoError(CryptoErrorKind::JwtFormat(e.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> SigningKey {
        SigningKey::random(&mut rand::rngs::OsRng)
    }

    fn test_header(key: &SigningKey) -> Header {
        Header { alg: ALG.to_string(), x5u: marshal_public_key(key.verifying_key()).unwrap() }
    }

    #[test]
    fn test_sign_verify_round_trip() {
        let key = test_key();
        let token = sign(&test_header(&key), br#"{"salt":"AAAA"}"#, &key).unwrap();
        verify(&token, key.verifying_key()).unwrap();
        assert_eq!(payload(&token).unwrap(), br#"{"salt":"AAAA"}"#);
    }

    #[test]
    fn test_verify_rejects_other_key() {
        let key = test_key();
        let token = sign(&test_header(&key), b"{}", &key).unwrap();
        let other = test_key();
        assert!(matches!(
            verify(&token, other.verifying_key()),
            Err(ErrorKind::CryptoError(CryptoErrorKind::JwtSignature))
        ));
    }

    #[test]
    fn test_verify_rejects_tampered_payload() {
        let key = test_key();
        let token = sign(&test_header(&key), br#"{"salt":"AAAA"}"#, &key).unwrap();
        let mut parts: Vec<&str> = token.split('.').collect();
        let forged = URL_SAFE_NO_PAD.encode(br#"{"salt":"BBBB"}"#);
        parts[1] = &forged;
        let forged_token = parts.join(".");
        assert!(verify(&forged_token, key.verifying_key()).is_err());
    }

    #[test]
    fn test_public_key_marshal_parse_round_trip() {
        let key = test_key();
        let x5u = marshal_public_key(key.verifying_key()).unwrap();
        let parsed = parse_public_key(&x5u).unwrap();
        assert_eq!(&parsed, key.verifying_key());
    }

    #[test]
    fn test_header_parsing() {
        let key = test_key();
        let token = sign(&test_header(&key), b"{}", &key).unwrap();
        let parsed = header(&token).unwrap();
        assert!(allowed_alg(&parsed.alg));
        assert_eq!(parsed.x5u, marshal_public_key(key.verifying_key()).unwrap());
    }
}
