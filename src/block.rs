//! A 128-bit [`Block`] type, the output unit of the OPRF.
use std::fmt;

use serde::{Deserialize, Serialize};

/// A 128-bit block.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Block(pub u128);

impl Block {
    /// 16 bytes in a Block.
    pub const BYTES: usize = 16;

    /// Create a block from its little-endian bytes.
    #[inline]
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(u128::from_le_bytes(bytes))
    }

    /// Low 64 bits of the block.
    #[inline]
    pub fn low(&self) -> u64 {
        self.0 as u64
    }

    /// High 64 bits of the block.
    #[inline]
    pub fn high(&self) -> u64 {
        (self.0 >> 64) as u64
    }

    /// Compresses the block to 64 bits by XORing its two halves.
    ///
    /// Masked element sets are exchanged and compared in this form.
    #[inline]
    pub fn fold(&self) -> u64 {
        self.low() ^ self.high()
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Block({:032x})", self.0)
    }
}
