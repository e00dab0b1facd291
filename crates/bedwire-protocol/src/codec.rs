//! Batch encoding and decoding over the transport.
//!
//! Packets never travel alone: the encoder serializes a whole flush worth of
//! payloads as one batch. Each payload is varuint32-length-prefixed, the
//! concatenation deflate-compressed, the result optionally encrypted and
//! framed with a varuint32 byte length. The decoder presents one payload at
//! a time, pulling the next batch off the transport when drained.

use std::{
    collections::VecDeque,
    io::{Cursor, Read},
    sync::Arc,
};

use bedwire_core::{error::Result, transport::Transport};
use flate2::{read::DeflateDecoder, write::DeflateEncoder, Compression};

use crate::{
    encryption::PacketCipher,
    io::{WireRead, WireWrite},
};

/// Serializes batches of packet payloads onto the transport.
pub struct Encoder {
    transport: Arc<dyn Transport>,
    cipher: Option<PacketCipher>,
    compression: Compression,
}

impl Encoder {
    /// Creates an encoder writing to the transport at the given deflate
    /// level.
    pub fn new(transport: Arc<dyn Transport>, compression_level: u32) -> Self {
        Self { transport, cipher: None, compression: Compression::new(compression_level) }
    }

    /// Encodes the payloads as one batch and writes it out. Returns the
    /// number of bytes that hit the transport.
    pub fn encode(&mut self, payloads: &[Vec<u8>]) -> Result<usize> {
        let mut plain = Vec::new();
        for payload in payloads {
            plain.write_byte_slice(payload)?;
        }

        let mut compressor = DeflateEncoder::new(Vec::new(), self.compression);
        std::io::Write::write_all(&mut compressor, &plain)?;
        let mut body = compressor.finish()?;

        if let Some(cipher) = &mut self.cipher {
            cipher.apply(&mut body);
        }

        let mut frame = Vec::with_capacity(body.len() + 5);
        frame.write_varu32(body.len() as u32)?;
        frame.extend_from_slice(&body);
        self.transport.write_all(&frame)?;
        Ok(frame.len())
    }

    /// Switches all subsequent output to the stream cipher keyed by `key`.
    /// Called at most once, after the last plaintext batch is flushed.
    pub fn enable_encryption(&mut self, key: &[u8; 32]) {
        self.cipher = Some(PacketCipher::new(key));
    }
}

/// Deserializes batches from the transport, one payload at a time.
pub struct Decoder {
    transport: Arc<dyn Transport>,
    cipher: Option<PacketCipher>,
    pending: VecDeque<Vec<u8>>,
}

impl Decoder {
    /// Creates a decoder reading from the transport.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport, cipher: None, pending: VecDeque::new() }
    }

    /// Returns the next payload, reading and unpacking a new batch from the
    /// transport when the current one is drained.
    pub fn decode(&mut self) -> Result<Vec<u8>> {
        loop {
            if let Some(payload) = self.pending.pop_front() {
                return Ok(payload);
            }
            self.read_batch()?;
        }
    }

    /// Switches all subsequent input to the stream cipher keyed by `key`.
    /// Called at most once, after the last plaintext batch is consumed.
    pub fn enable_encryption(&mut self, key: &[u8; 32]) {
        self.cipher = Some(PacketCipher::new(key));
    }

    fn read_batch(&mut self) -> Result<()> {
        let len = self.read_frame_len()? as usize;
        let mut body = vec![0u8; len];
        self.transport.read_exact(&mut body)?;

        if let Some(cipher) = &mut self.cipher {
            cipher.apply(&mut body);
        }

        let mut plain = Vec::new();
        DeflateDecoder::new(body.as_slice()).read_to_end(&mut plain)?;

        let total = plain.len() as u64;
        let mut cursor = Cursor::new(plain.as_slice());
        while cursor.position() < total {
            self.pending.push_back(cursor.read_byte_slice()?);
        }
        Ok(())
    }

    // The frame length prefix sits outside the cipher, so it is read a byte
    // at a time straight off the transport.
    fn read_frame_len(&mut self) -> Result<u32> {
        struct ByteReader<'a>(&'a dyn Transport);
        impl Read for ByteReader<'_> {
            fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
                self.0.read_exact(&mut buf[..1])?;
                Ok(1)
            }
        }
        ByteReader(self.transport.as_ref()).read_varu32()
    }
}
