use digest::Digest;
use md4::Md4;
use sha1::Sha1;
use std::fmt;
use std::io::{self, Read};

/// Strong block checksum, zero-filled past the truncated length
///
/// Keeping a fixed-size array (instead of a slice of the configured length)
/// makes checksums directly comparable and hashable.
pub type StrongSum = [u8; 16];

/// Length of a whole-file SHA-1 digest
pub const SHA1_LEN: usize = 20;

/// MD4 block digest truncated to the control file's strong checksum length
///
/// Each matcher owns one, so the hasher state is never shared.
#[derive(Clone)]
pub struct BlockDigest {
    hasher: Md4,
    len: usize,
}

impl fmt::Debug for BlockDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockDigest").field("len", &self.len).finish()
    }
}

impl BlockDigest {
    pub fn new(len: usize) -> Self {
        debug_assert!((1..=16).contains(&len), "strong checksum length out of range");
        Self {
            hasher: Md4::new(),
            len,
        }
    }

    /// Digest one block (already zero-padded to the block size by the caller)
    pub fn digest(&mut self, block: &[u8]) -> StrongSum {
        self.hasher.update(block);
        let full = self.hasher.finalize_reset();
        truncate(&full, self.len)
    }
}

/// Copy the first `len` bytes of a digest into a zero-filled `StrongSum`
pub fn truncate(bytes: &[u8], len: usize) -> StrongSum {
    let mut sum = [0u8; 16];
    let len = len.min(bytes.len()).min(sum.len());
    sum[..len].copy_from_slice(&bytes[..len]);
    sum
}

/// SHA-1 of everything readable from `reader`
pub fn sha1_reader<R: Read>(mut reader: R) -> io::Result<[u8; SHA1_LEN]> {
    let mut hasher = Sha1::new();
    let mut buffer = vec![0u8; 64 * 1024];

    loop {
        let n = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buffer[..n]);
    }

    Ok(hasher.finalize().into())
}
