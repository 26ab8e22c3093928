//! Matching local data against the target's block checksums
//!
//! A matcher looks at one window of a candidate file per step and writes any
//! target blocks it recognises into the [`OutputFile`]. It tells the caller
//! how far to slide: one byte after a miss, a whole block after a hit.

mod double;
mod single;

pub use double::DoubleBlockMatcher;
pub use single::SingleBlockMatcher;

use super::window::RollingWindow;
use crate::control::ControlFile;
use crate::error::Result;
use crate::sync::target::OutputFile;
use std::io::{self, Read};
use std::sync::Arc;

/// Bytes of scan progress to accumulate before reporting
const PROGRESS_STEP: usize = 64 * 1024;

pub trait BlockMatcher {
    /// Bytes of candidate data examined per step
    fn window_len(&self) -> usize;

    /// Match the window against the target and return how many bytes to
    /// advance (1 or the block size)
    fn step(&mut self, window: &[u8], output: &mut OutputFile) -> Result<usize>;
}

/// Matcher suited to the control file's `Hash-Lengths` sequence setting
pub fn new_matcher(control: Arc<ControlFile>) -> Result<Box<dyn BlockMatcher>> {
    if control.header().double_block_matching {
        Ok(Box::new(DoubleBlockMatcher::new(control)?))
    } else {
        Ok(Box::new(SingleBlockMatcher::new(control)?))
    }
}

/// Run `matcher` over all of `source`, writing matched blocks to `output`
///
/// The source is extended with `window_len - 1` zero bytes, so every real
/// offset starts a full window and a short last block can match its
/// zero-padded checksum. `source` must hold at least one byte. Returns the
/// number of blocks this source completed.
pub fn scan<R: Read>(
    matcher: &mut dyn BlockMatcher,
    source: R,
    output: &mut OutputFile,
    buffer_size: usize,
    mut on_progress: impl FnMut(u64),
) -> Result<usize> {
    let window_len = matcher.window_len();
    let padded = source.chain(io::repeat(0).take(window_len as u64 - 1));
    let mut window = RollingWindow::new(padded, window_len, buffer_size.max(window_len * 2))?;

    let remaining_before = output.blocks_remaining();
    let mut unreported = 0;
    while !output.is_complete() {
        let n = matcher.step(window.as_slice(), output)?;
        if !window.advance(n)? {
            break;
        }
        unreported += n;
        if unreported >= PROGRESS_STEP {
            on_progress(unreported as u64);
            unreported = 0;
        }
    }
    on_progress(unreported as u64);

    Ok(remaining_before - output.blocks_remaining())
}
