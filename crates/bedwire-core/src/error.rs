use std::{fmt, io, net::SocketAddr};

/// Convenience alias used across the workspace.
pub type Result<T> = std::result::Result<T, ErrorKind>;

/// Errors that a connection surfaces to its user.
///
/// Errors produced while dispatching the login sequence are terminal for the
/// connection; the dispatcher logs them and closes.
#[derive(Debug)]
pub enum ErrorKind {
    /// A read or write on the underlying transport failed.
    IOError(io::Error),
    /// Wire data could not be decoded.
    DecodingError(DecodingErrorKind),
    /// A cryptographic step of the handshake failed.
    CryptoError(CryptoErrorKind),
    /// The client's protocol version did not equal the compiled version.
    ProtocolVersionMismatch {
        /// Version the client connected with.
        client: i32,
        /// Version this library is compiled against.
        server: i32,
    },
    /// The login JWT chain was not signed by the authentication authority.
    NotAuthenticated(SocketAddr),
    /// A resource pack transfer invariant was violated.
    PackTransfer(String),
    /// The peer sent a Disconnect packet carrying this message.
    Disconnected(String),
    /// The read deadline elapsed before a packet arrived.
    ReadTimeout,
    /// The connection was closed while the operation was pending.
    ConnectionClosed,
    /// A raw read was handed a buffer smaller than the pending payload.
    BufferTooSmall {
        /// Length of the caller's buffer.
        buffer: usize,
        /// Length of the pending payload.
        packet: usize,
    },
    /// The peer sent a ResourcePackClientResponse with an unknown code.
    UnknownPackResponse(u8),
    /// The server ended the login sequence with a failing PlayStatus.
    LoginFailed(String),
    /// A deadline was set to an instant that already passed.
    DeadlineInPast,
}

/// Fine-grained reasons wire data failed to decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodingErrorKind {
    /// A variable-length integer ran past its maximum width.
    VarInt,
    /// A length-prefixed string was not valid UTF-8 or was truncated.
    String,
    /// The varuint packet header could not be read.
    PacketHeader,
    /// A PlayStatus packet carried a status code outside the catalog.
    PlayStatus(i32),
    /// The login connection request was structurally invalid.
    LoginRequest(String),
    /// The identity data inside the login request failed validation.
    IdentityData(String),
    /// The client data inside the login request failed validation.
    ClientData(String),
}

/// Fine-grained reasons a cryptographic handshake step failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CryptoErrorKind {
    /// A JWT was not three base64url segments of valid JSON.
    JwtFormat(String),
    /// A JWT header carried an algorithm other than ES384.
    JwtAlgorithm(String),
    /// A JWT signature did not verify against the carried public key.
    JwtSignature,
    /// A public key could not be parsed from or marshaled to DER.
    PublicKey(String),
    /// The handshake salt was missing or not valid base64.
    Salt(String),
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::IOError(e) => write!(f, "transport error: {}", e),
            ErrorKind::DecodingError(e) => write!(f, "decoding error: {}", e),
            ErrorKind::CryptoError(e) => write!(f, "crypto error: {}", e),
            ErrorKind::ProtocolVersionMismatch { client, server } => {
                write!(f, "client protocol {} does not match server protocol {}", client, server)
            }
            ErrorKind::NotAuthenticated(addr) => {
                write!(f, "connection {} was not authenticated to XBOX Live", addr)
            }
            ErrorKind::PackTransfer(msg) => write!(f, "resource pack transfer: {}", msg),
            ErrorKind::Disconnected(msg) => write!(f, "Disconnected: {}", msg),
            ErrorKind::ReadTimeout => write!(f, "error reading packet: read timeout"),
            ErrorKind::ConnectionClosed => write!(f, "error reading packet: connection closed"),
            ErrorKind::BufferTooSmall { buffer, packet } => write!(
                f,
                "buffer of length {} is too small for payload of length {}",
                buffer, packet
            ),
            ErrorKind::UnknownPackResponse(code) => {
                write!(f, "unknown resource pack client response: {}", code)
            }
            ErrorKind::LoginFailed(msg) => write!(f, "{}", msg),
            ErrorKind::DeadlineInPast => {
                write!(f, "error setting read deadline: time passed is before now")
            }
        }
    }
}

impl fmt::Display for DecodingErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodingErrorKind::VarInt => write!(f, "varint exceeded maximum width"),
            DecodingErrorKind::String => write!(f, "invalid length-prefixed string"),
            DecodingErrorKind::PacketHeader => write!(f, "invalid packet header"),
            DecodingErrorKind::PlayStatus(code) => {
                write!(f, "unknown play status in PlayStatus packet {}", code)
            }
            DecodingErrorKind::LoginRequest(msg) => write!(f, "invalid login request: {}", msg),
            DecodingErrorKind::IdentityData(msg) => write!(f, "invalid identity data: {}", msg),
            DecodingErrorKind::ClientData(msg) => write!(f, "invalid client data: {}", msg),
        }
    }
}

impl fmt::Display for CryptoErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CryptoErrorKind::JwtFormat(msg) => write!(f, "malformed JWT: {}", msg),
            CryptoErrorKind::JwtAlgorithm(alg) => {
                write!(f, "JWT header had unexpected alg: expected ES384, got {}", alg)
            }
            CryptoErrorKind::JwtSignature => write!(f, "JWT signature verification failed"),
            CryptoErrorKind::PublicKey(msg) => write!(f, "invalid public key: {}", msg),
            CryptoErrorKind::Salt(msg) => write!(f, "invalid handshake salt: {}", msg),
        }
    }
}

impl std::error::Error for ErrorKind {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ErrorKind::IOError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ErrorKind {
    fn from(e: io::Error) -> Self {
        ErrorKind::IOError(e)
    }
}

impl From<DecodingErrorKind> for ErrorKind {
    fn from(e: DecodingErrorKind) -> Self {
        ErrorKind::DecodingError(e)
    }
}

impl From<CryptoErrorKind> for ErrorKind {
    fn from(e: CryptoErrorKind) -> Self {
        ErrorKind::CryptoError(e)
    }
}
