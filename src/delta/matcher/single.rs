use super::BlockMatcher;
use crate::control::ControlFile;
use crate::delta::checksum::BlockDigest;
use crate::delta::rolling::Rsum;
use crate::error::Result;
use crate::sync::target::OutputFile;
use std::sync::Arc;

#[derive(Debug, Clone, Copy)]
enum State {
    Init,
    /// The window just jumped a whole block; the weak sum starts over
    Matched,
    /// The window moved one byte; `evicted` is the byte that fell out
    Missed { evicted: u8 },
}

/// Matches one target block per window
pub struct SingleBlockMatcher {
    control: Arc<ControlFile>,
    block_size: usize,
    rsum: Rsum,
    digest: BlockDigest,
    state: State,
}

impl SingleBlockMatcher {
    pub fn new(control: Arc<ControlFile>) -> Result<Self> {
        let header = control.header();
        let block_size = header.block_size as usize;
        let rsum = Rsum::new(block_size, header.weak_checksum_len)?;
        let digest = BlockDigest::new(header.strong_checksum_len);

        Ok(Self {
            control,
            block_size,
            rsum,
            digest,
            state: State::Init,
        })
    }
}

impl BlockMatcher for SingleBlockMatcher {
    fn window_len(&self) -> usize {
        self.block_size
    }

    fn step(&mut self, window: &[u8], output: &mut OutputFile) -> Result<usize> {
        match self.state {
            State::Init | State::Matched => self.rsum.init(window),
            State::Missed { evicted } => self.rsum.update(evicted, window[self.block_size - 1]),
        }

        let weak = self.rsum.value();
        let control = Arc::clone(&self.control);
        let index = control.index();

        if index.has_weak(weak) {
            let strong = self.digest.digest(window);
            let positions = index.positions_for(weak, &strong);
            if !positions.is_empty() {
                for &position in positions {
                    output.write(position, window)?;
                }
                self.state = State::Matched;
                return Ok(self.block_size);
            }
        }

        self.state = State::Missed { evicted: window[0] };
        Ok(1)
    }
}
