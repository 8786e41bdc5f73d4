use std::fmt;

#[cfg(not(feature = "rxor"))]
use md5::{Digest, Md5};

/// Digest width in bytes. 16 for MD5, 8 for the RXOR table hash.
#[cfg(not(feature = "rxor"))]
pub const HASH_LEN: usize = 16;
#[cfg(feature = "rxor")]
pub const HASH_LEN: usize = 8;

/// Method name recorded in every catalogue and report this build produces.
#[cfg(not(feature = "rxor"))]
pub const HASH_METHOD: &str = "MD5";
#[cfg(feature = "rxor")]
pub const HASH_METHOD: &str = "RXOR";

/// A completed chunk digest. Ordering is byte-lexicographic; the RXOR
/// accumulator is stored big-endian so integer order and byte order agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HashVal(pub [u8; HASH_LEN]);

impl fmt::Display for HashVal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Incremental chunk digest. One value per chunk; the digest of a byte
/// sequence depends only on the concatenation of the `update` buffers.
#[cfg(not(feature = "rxor"))]
pub struct Hasher {
    inner: Md5,
}

#[cfg(not(feature = "rxor"))]
impl Hasher {
    pub fn new() -> Self {
        Self { inner: Md5::new() }
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.inner.update(bytes);
    }

    pub fn finish(self) -> HashVal {
        HashVal(self.inner.finalize().into())
    }
}

#[cfg(not(feature = "rxor"))]
impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// RXOR: Rivest's random-XOR table hash.
//
// A fixed table T of 512 x 256 64-bit constants; hashing XORs one table entry
// per input byte, selected by (byte position mod 512, byte value). One memory
// lookup per byte, and by the birthday bound an 8-byte digest holds up
// against corpora on the order of 10^8 lines.
// ---------------------------------------------------------------------------

#[cfg(feature = "rxor")]
static MAGIC: [[u64; 256]; 512] = magic_table();

/// SplitMix64 finalizer; the table only needs fixed well-mixed constants.
#[cfg(feature = "rxor")]
const fn splitmix64(index: u64) -> u64 {
    let x = index.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let z = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    let z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

#[cfg(feature = "rxor")]
const fn magic_table() -> [[u64; 256]; 512] {
    let mut table = [[0u64; 256]; 512];
    let mut pos = 0;
    while pos < 512 {
        let mut byte = 0;
        while byte < 256 {
            table[pos][byte] = splitmix64(((pos as u64) << 8) | byte as u64);
            byte += 1;
        }
        pos += 1;
    }
    table
}

#[cfg(feature = "rxor")]
pub struct Hasher {
    accum: u64,
    count: usize,
}

#[cfg(feature = "rxor")]
impl Hasher {
    pub fn new() -> Self {
        Self { accum: 0, count: 0 }
    }

    pub fn update(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.accum ^= MAGIC[self.count % 512][byte as usize];
            self.count = self.count.wrapping_add(1);
        }
    }

    pub fn finish(self) -> HashVal {
        HashVal(self.accum.to_be_bytes())
    }
}

#[cfg(feature = "rxor")]
impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Digest a sequence of buffers in one call.
pub fn hash_buffers<B: AsRef<[u8]>>(buffers: &[B]) -> HashVal {
    let mut hasher = Hasher::new();
    for buf in buffers {
        hasher.update(buf.as_ref());
    }
    hasher.finish()
}
