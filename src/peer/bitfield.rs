use bytes::Bytes;

/// A bit-indexed set over piece indices.
///
/// Bits are numbered from the high bit of the first byte, matching the
/// BITFIELD wire encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitfield {
    bits: Vec<u8>,
    npieces: usize,
}

impl Bitfield {
    /// Creates an empty bitfield for the given number of pieces.
    pub fn new(npieces: usize) -> Self {
        Self {
            bits: vec![0; npieces.div_ceil(8)],
            npieces,
        }
    }

    /// Creates a bitfield from wire bytes. Short input is zero-padded;
    /// spare bits past `npieces` are cleared.
    pub fn from_bytes(bytes: &[u8], npieces: usize) -> Self {
        let mut bits = bytes.to_vec();
        bits.resize(npieces.div_ceil(8), 0);
        let mut bf = Self { bits, npieces };
        bf.clear_spare_bits();
        bf
    }

    /// Returns true if the bit for `index` is set.
    pub fn has(&self, index: usize) -> bool {
        if index >= self.npieces {
            return false;
        }
        (self.bits[index / 8] >> (7 - index % 8)) & 1 == 1
    }

    /// Sets the bit for `index`. Out-of-range indices are ignored.
    pub fn set(&mut self, index: usize) {
        if index < self.npieces {
            self.bits[index / 8] |= 1 << (7 - index % 8);
        }
    }

    /// Clears the bit for `index`.
    pub fn clear(&mut self, index: usize) {
        if index < self.npieces {
            self.bits[index / 8] &= !(1 << (7 - index % 8));
        }
    }

    /// Number of set bits.
    pub fn count(&self) -> usize {
        self.bits.iter().map(|b| b.count_ones() as usize).sum()
    }

    /// True when every piece bit is set.
    pub fn is_complete(&self) -> bool {
        self.count() == self.npieces
    }

    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|&b| b == 0)
    }

    /// Total number of pieces this bitfield covers.
    pub fn len(&self) -> usize {
        self.npieces
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }

    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.bits)
    }

    /// Spare bits in the last byte don't map to pieces; keep them zero
    /// so count() stays honest.
    fn clear_spare_bits(&mut self) {
        let spare = self.bits.len() * 8 - self.npieces;
        if spare > 0 && !self.bits.is_empty() {
            let last = self.bits.len() - 1;
            self.bits[last] &= 0xFFu8 << spare;
        }
    }
}
