use super::BlockSum;
use crate::delta::checksum::StrongSum;
use rustc_hash::{FxHashMap, FxHashSet};

/// Combine the weak checksums of two adjacent blocks into one lookup key
pub fn pair_key(weak_current: u32, weak_next: u32) -> u64 {
    ((weak_current as u64) << 32) | weak_next as u64
}

/// Lookup tables over a control file's block checksums
///
/// Built once and never modified. Identical blocks are common (runs of
/// zeros, repeated records), so every exact lookup returns all positions.
#[derive(Debug, Default)]
pub struct BlockIndex {
    weak: FxHashSet<u32>,
    pairs: FxHashSet<u64>,
    positions: FxHashMap<BlockSum, Vec<usize>>,
    last_weak: Option<u32>,
}

impl BlockIndex {
    pub fn build(blocks: &[BlockSum], double_block_matching: bool) -> Self {
        let mut index = Self::default();

        for (position, block) in blocks.iter().enumerate() {
            index.weak.insert(block.weak);
            index.positions.entry(*block).or_default().push(position);
        }

        if double_block_matching {
            for pair in blocks.windows(2) {
                index.pairs.insert(pair_key(pair[0].weak, pair[1].weak));
            }
        }
        index.last_weak = blocks.last().map(|b| b.weak);

        index
    }

    /// Is any target block's weak checksum equal to `weak`?
    pub fn has_weak(&self, weak: u32) -> bool {
        self.weak.contains(&weak)
    }

    /// Could a window whose halves have these weak checksums start a match?
    ///
    /// The last block has no successor, so its own weak checksum is enough.
    pub fn has_pair(&self, weak_current: u32, weak_next: u32) -> bool {
        self.pairs.contains(&pair_key(weak_current, weak_next))
            || self.last_weak == Some(weak_current)
    }

    /// All target positions whose checksums are exactly `(weak, strong)`
    pub fn positions_for(&self, weak: u32, strong: &StrongSum) -> &[usize] {
        self.positions
            .get(&BlockSum {
                weak,
                strong: *strong,
            })
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}
