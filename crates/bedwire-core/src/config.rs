use std::{default::Default, time::Duration};

use crate::constants::PACKET_QUEUE_SIZE;

#[derive(Clone, Debug)]
/// Configuration options to tune connection behavior.
pub struct Config {
    /// Require clients to accept the served texture packs in order to join.
    /// Clients that refuse can only leave the server.
    pub texture_packs_required: bool,
    /// Interval at which buffered outgoing packets are flushed to the
    /// transport as one batch. The Bedrock client expects 20 Hz.
    pub flush_interval: Duration,
    /// Capacity of the inbound packet queue before the transport reader
    /// blocks. Bounds memory a misbehaving peer can pin.
    pub packet_queue_size: usize,
    /// Deflate compression level (0-9) applied to outgoing batches.
    pub compression_level: u32,
    /// Standard-base64 DER public key trusted as the root of login chains.
    /// `None` trusts the Mojang authentication authority.
    pub authentication_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            texture_packs_required: false,
            flush_interval: Duration::from_millis(50), // 20th of a second
            packet_queue_size: PACKET_QUEUE_SIZE,
            compression_level: 6,
            authentication_key: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_flush_interval_is_a_twentieth_of_a_second() {
        let config = Config::default();
        assert_eq!(config.flush_interval, Duration::from_millis(50));
    }

    #[test]
    fn test_default_queue_size() {
        let config = Config::default();
        assert_eq!(config.packet_queue_size, 32);
    }
}
