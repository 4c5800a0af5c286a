//! Stable content hashing for cache keys.
//!
//! FNV-1a over the fed bytes. Unlike `DefaultHasher` the result is stable
//! across processes and toolchains, which matters because keys name files in
//! the on-disk codec cache.

const FNV1A_OFFSET_BASIS_64: u64 = 0xcbf2_9ce4_8422_2325;
const FNV1A_PRIME_64: u64 = 0x0000_0100_0000_01b3;

#[derive(Clone, Debug)]
pub struct Fingerprint {
    state: u64,
}

impl Default for Fingerprint {
    fn default() -> Self { Self::new() }
}

impl Fingerprint {
    pub fn new() -> Self {
        Self { state: FNV1A_OFFSET_BASIS_64 }
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        for &byte in bytes {
            self.state ^= u64::from(byte);
            self.state = self.state.wrapping_mul(FNV1A_PRIME_64);
        }
        self
    }

    /// Feed a string followed by a separator so `["ab","c"]` and `["a","bc"]`
    /// hash differently.
    pub fn write_str(&mut self, s: &str) -> &mut Self {
        self.write_bytes(s.as_bytes());
        self.write_bytes(&[0xFF])
    }

    pub fn write_u64(&mut self, n: u64) -> &mut Self {
        self.write_bytes(&n.to_le_bytes())
    }

    pub fn write_bool(&mut self, b: bool) -> &mut Self {
        self.write_bytes(&[b as u8])
    }

    pub fn finish(&self) -> u64 {
        self.state
    }

    pub fn hex(&self) -> String {
        format!("{:016x}", self.state)
    }
}

pub fn hash_str(s: &str) -> u64 {
    let mut fp = Fingerprint::new();
    fp.write_bytes(s.as_bytes());
    fp.finish()
}

// ------------------------------- Tests ------------------------------------ //
