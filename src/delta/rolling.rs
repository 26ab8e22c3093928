use crate::error::{Result, ZsyncError};

/// zsync rolling checksum ("rsum")
///
/// This is the weak checksum stored in zsync control files. It keeps two
/// 16-bit sums over a block-sized window:
/// - A: sum of all bytes
/// - B: sum of (len - i) * byte[i] for each byte
///
/// Both sums wrap at 16 bits. The value is (A << 16) | B, masked down to the
/// number of bytes the control file keeps. The arithmetic has to match
/// zsyncmake bit for bit, so unlike Adler-32 there is no modulus.
#[derive(Debug, Clone, Copy)]
pub struct Rsum {
    a: u16,
    b: u16,
    block_shift: u32,
    mask: u32,
}

impl Rsum {
    /// Create a rolling checksum for windows of `block_size` bytes, truncated
    /// to `len` bytes (1..=4).
    pub fn new(block_size: usize, len: usize) -> Result<Self> {
        if block_size == 0 || !block_size.is_power_of_two() {
            return Err(ZsyncError::Format(format!(
                "block size {} is not a power of two",
                block_size
            )));
        }
        let mask = match len {
            1 => 0xff,
            2 => 0xffff,
            3 => 0xff_ffff,
            4 => 0xffff_ffff,
            _ => {
                return Err(ZsyncError::Format(format!(
                    "weak checksum length {} out of range (1-4)",
                    len
                )))
            }
        };

        Ok(Self {
            a: 0,
            b: 0,
            block_shift: block_size.trailing_zeros(),
            mask,
        })
    }

    /// Recompute from scratch over a full window
    pub fn init(&mut self, window: &[u8]) {
        self.a = 0;
        self.b = 0;

        let len = window.len();
        for (i, &byte) in window.iter().enumerate() {
            let weight = (len - i) as u16;
            self.a = self.a.wrapping_add(byte as u16);
            self.b = self.b.wrapping_add(weight.wrapping_mul(byte as u16));
        }
    }

    /// Slide the window by one byte: `old_byte` leaves, `new_byte` enters.
    pub fn update(&mut self, old_byte: u8, new_byte: u8) {
        // Shift in 32 bits first; zsync truncates after shifting, so for
        // 64 KiB blocks the old byte's contribution to B vanishes entirely.
        let scaled_old = ((old_byte as u32) << self.block_shift) as u16;

        self.a = self.a.wrapping_add(new_byte as u16).wrapping_sub(old_byte as u16);
        self.b = self.b.wrapping_add(self.a).wrapping_sub(scaled_old);
    }

    /// Current value, truncated to the configured length
    pub fn value(&self) -> u32 {
        (((self.a as u32) << 16) | self.b as u32) & self.mask
    }
}
