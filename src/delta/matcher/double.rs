use super::BlockMatcher;
use crate::control::ControlFile;
use crate::delta::checksum::{BlockDigest, StrongSum};
use crate::delta::rolling::Rsum;
use crate::error::Result;
use crate::sync::target::OutputFile;
use std::sync::Arc;

/// Scan state between steps
///
/// `next_strong` carries the lookahead half's digest when it was computed
/// during the previous step; after a block-sized advance that half becomes
/// the current one and the digest can be reused.
#[derive(Debug)]
enum State {
    Init,
    Missed {
        evicted: u8,
    },
    MatchedFirst {
        next_strong: Option<StrongSum>,
    },
    /// Positions confirmed last step; each `p + 1` is now the current half
    MatchedBoth {
        positions: Vec<usize>,
        next_strong: Option<StrongSum>,
    },
}

/// Matches pairs of consecutive target blocks
///
/// The window spans two blocks. A target block is only accepted when the
/// block after it matches too, except for the last block of the target,
/// which has no successor.
pub struct DoubleBlockMatcher {
    control: Arc<ControlFile>,
    block_size: usize,
    current: Rsum,
    next: Rsum,
    digest: BlockDigest,
    state: State,
}

impl DoubleBlockMatcher {
    pub fn new(control: Arc<ControlFile>) -> Result<Self> {
        let header = control.header();
        let block_size = header.block_size as usize;
        let rsum = Rsum::new(block_size, header.weak_checksum_len)?;
        let digest = BlockDigest::new(header.strong_checksum_len);

        Ok(Self {
            control,
            block_size,
            current: rsum,
            next: rsum,
            digest,
            state: State::Init,
        })
    }

    /// The lookahead half becomes current; checksum the newly exposed half
    fn shift_block(&mut self, window: &[u8]) {
        self.current = self.next;
        self.next.init(&window[self.block_size..]);
    }

    /// Find target positions matching the current half, confirmed by the
    /// lookahead half, and write them. Returns the positions and the
    /// lookahead digest if one was computed.
    fn try_match(
        &mut self,
        window: &[u8],
        current_strong: Option<StrongSum>,
        output: &mut OutputFile,
    ) -> Result<(Vec<usize>, Option<StrongSum>)> {
        let bs = self.block_size;
        let weak = self.current.value();
        let weak_next = self.next.value();

        let control = Arc::clone(&self.control);
        let index = control.index();
        if !index.has_pair(weak, weak_next) {
            return Ok((Vec::new(), None));
        }

        let strong = match current_strong {
            Some(strong) => strong,
            None => self.digest.digest(&window[..bs]),
        };

        let blocks = control.blocks();
        let mut next_strong = None;
        let mut matched = Vec::new();
        for &position in index.positions_for(weak, &strong) {
            let confirmed = match blocks.get(position + 1) {
                None => true,
                Some(following) if following.weak != weak_next => false,
                Some(following) => {
                    let digest = &mut self.digest;
                    let lookahead =
                        *next_strong.get_or_insert_with(|| digest.digest(&window[bs..]));
                    following.strong == lookahead
                }
            };

            if confirmed {
                output.write(position, &window[..bs])?;
                matched.push(position);
            }
        }

        Ok((matched, next_strong))
    }
}

impl BlockMatcher for DoubleBlockMatcher {
    fn window_len(&self) -> usize {
        self.block_size * 2
    }

    fn step(&mut self, window: &[u8], output: &mut OutputFile) -> Result<usize> {
        let bs = self.block_size;
        let mut extending = false;

        let current_strong = match std::mem::replace(&mut self.state, State::Init) {
            State::Init => {
                self.current.init(&window[..bs]);
                self.next.init(&window[bs..]);
                None
            }
            State::Missed { evicted } => {
                self.current.update(evicted, window[bs - 1]);
                self.next.update(window[bs - 1], window[2 * bs - 1]);
                None
            }
            State::MatchedFirst { next_strong } => {
                self.shift_block(window);
                next_strong
            }
            State::MatchedBoth {
                positions,
                next_strong,
            } => {
                let num_blocks = self.control.num_blocks();
                for position in positions {
                    if position + 1 < num_blocks {
                        output.write(position + 1, &window[..bs])?;
                    }
                }
                self.shift_block(window);
                extending = true;
                next_strong
            }
        };

        let (positions, next_strong) = self.try_match(window, current_strong, output)?;

        if !positions.is_empty() {
            self.state = State::MatchedBoth {
                positions,
                next_strong,
            };
            Ok(bs)
        } else if extending {
            self.state = State::MatchedFirst { next_strong };
            Ok(bs)
        } else {
            self.state = State::Missed { evicted: window[0] };
            Ok(1)
        }
    }
}
