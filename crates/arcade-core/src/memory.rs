//! Byte-addressed memory bus and a flat RAM implementation.

/// Memory seen by a core. Multi-byte accesses are little-endian.
pub trait MemoryBus {
    /// Reads one byte.
    fn read8(&mut self, addr: u32) -> u8;

    /// Writes one byte.
    fn write8(&mut self, addr: u32, value: u8);

    /// Reads a little-endian word.
    fn read32(&mut self, addr: u32) -> u32 {
        u32::from_le_bytes([
            self.read8(addr),
            self.read8(addr.wrapping_add(1)),
            self.read8(addr.wrapping_add(2)),
            self.read8(addr.wrapping_add(3)),
        ])
    }

    /// Writes a little-endian word.
    fn write32(&mut self, addr: u32, value: u32) {
        for (offset, byte) in (0u32..).zip(value.to_le_bytes()) {
            self.write8(addr.wrapping_add(offset), byte);
        }
    }
}

/// RAM of `2^address_bits` bytes. Addresses wrap at the top.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatMemory {
    data: Vec<u8>,
    mask: u32,
}

impl FlatMemory {
    /// Largest supported address width.
    pub const MAX_ADDRESS_BITS: u8 = 28;

    /// Zeroed RAM spanning `address_bits` bits, clamped to
    /// [`FlatMemory::MAX_ADDRESS_BITS`].
    #[must_use]
    pub fn new(address_bits: u8) -> Self {
        let bits = address_bits.min(Self::MAX_ADDRESS_BITS);
        let size = 1usize << bits;
        Self {
            data: vec![0; size],
            mask: (1u32 << bits) - 1,
        }
    }

    /// Size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Always `false`; even zero address bits give one byte.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Mask applied to every address.
    #[must_use]
    pub const fn address_mask(&self) -> u32 {
        self.mask
    }

    /// Copies `bytes` in at `addr`, wrapping at the top of memory.
    pub fn load(&mut self, addr: u32, bytes: &[u8]) {
        for (offset, &byte) in (0u32..).zip(bytes) {
            self.write8(addr.wrapping_add(offset), byte);
        }
    }

    /// Stores little-endian `words` from `addr` onward.
    pub fn load_words(&mut self, addr: u32, words: &[u32]) {
        for (index, &word) in (0u32..).zip(words) {
            self.write32(addr.wrapping_add(index.wrapping_mul(4)), word);
        }
    }

    /// Raw contents.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

impl MemoryBus for FlatMemory {
    fn read8(&mut self, addr: u32) -> u8 {
        self.data[(addr & self.mask) as usize]
    }

    fn write8(&mut self, addr: u32, value: u8) {
        self.data[(addr & self.mask) as usize] = value;
    }
}

#[cfg(test)]
mod tests {
    use super::{FlatMemory, MemoryBus};

    #[test]
    fn words_are_little_endian() {
        let mut memory = FlatMemory::new(12);
        memory.write32(0x10, 0x1122_3344);
        assert_eq!(&memory.as_slice()[0x10..0x14], &[0x44, 0x33, 0x22, 0x11]);
        assert_eq!(memory.read32(0x10), 0x1122_3344);
    }

    #[test]
    fn addresses_wrap_at_the_configured_width() {
        let mut memory = FlatMemory::new(8);
        assert_eq!(memory.len(), 256);
        memory.write8(0x1FF, 7);
        assert_eq!(memory.read8(0xFF), 7);
        memory.write32(0xFE, 0xAABB_CCDD);
        assert_eq!(memory.read8(0x00), 0xBB);
        assert_eq!(memory.read8(0x01), 0xAA);
    }

    #[test]
    fn load_copies_images() {
        let mut memory = FlatMemory::new(8);
        memory.load(4, &[1, 2, 3]);
        memory.load_words(8, &[0xDEAD_BEEF]);
        assert_eq!(&memory.as_slice()[4..12], &[1, 2, 3, 0, 0xEF, 0xBE, 0xAD, 0xDE]);
        assert!(!memory.is_empty());
        assert_eq!(memory.address_mask(), 0xFF);
    }
}
