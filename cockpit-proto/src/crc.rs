//! CRC-8 check byte for secondary bus replies.
//!
//! The export stream itself carries no checksum (the sync sentinel is its only
//! recovery mechanism), but replies travelling from a secondary to the bus
//! master are short and easy to garble on a shared line, so they end with a
//! CRC-8/SMBUS byte computed over the length byte and the payload.

use crc::{Crc, CRC_8_SMBUS};

/// CRC-8/SMBUS calculator with 256-byte lookup table.
static CRC8: Crc<u8> = Crc::<u8>::new(&CRC_8_SMBUS);

/// Check byte for a reply with the given payload.
///
/// The length byte is folded in first so that a truncated reply whose
/// remaining bytes happen to match cannot pass.
#[inline]
#[must_use]
pub fn reply_crc(payload: &[u8]) -> u8 {
    let mut digest = ReplyDigest::new(payload.len() as u8);
    digest.update_slice(payload);
    digest.finalize()
}

/// Incremental reply check, fed byte by byte while a reply streams in.
pub struct ReplyDigest {
    digest: crc::Digest<'static, u8>,
}

impl ReplyDigest {
    /// Start a digest for a reply announcing `length` payload bytes.
    #[inline]
    #[must_use]
    pub fn new(length: u8) -> Self {
        let mut digest = CRC8.digest();
        digest.update(&[length]);
        Self { digest }
    }

    #[inline]
    pub fn update(&mut self, byte: u8) {
        self.digest.update(&[byte]);
    }

    #[inline]
    pub fn update_slice(&mut self, data: &[u8]) {
        self.digest.update(data);
    }

    #[inline]
    #[must_use]
    pub fn finalize(self) -> u8 {
        self.digest.finalize()
    }
}
