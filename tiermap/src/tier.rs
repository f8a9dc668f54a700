use std::fmt;
use std::ops::Range;

use crate::word::{
    first_clear_bit, group_of, is_group_saturated, parent_coord, summary_words, GROUP_WORDS,
    WORD_BITS,
};

/// Upper bound on the number of tiers stacked over the Low tier, Low included.
pub const MAX_TIERS: usize = 3;

/// Names the levels of a `TierStack`, from the block-tracking level upwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierKind {
    /// One bit per block.
    Low,
    /// One bit per group of 16 Low words (1024 blocks).
    Mid,
    /// One bit per group of 16 Mid words (1,048,576 blocks).
    Top,
}

impl TierKind {
    fn level(self) -> usize {
        match self {
            TierKind::Low => 0,
            TierKind::Mid => 1,
            TierKind::Top => 2,
        }
    }
}

impl fmt::Display for TierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TierKind::Low => "low",
            TierKind::Mid => "mid",
            TierKind::Top => "top",
        };
        f.write_str(name)
    }
}

/// A single level of the bitmap: a run of 64 bit words where a set bit means
/// "allocated" (Low) or "group below is saturated" (Mid, Top).
#[derive(Clone, PartialEq, Eq)]
pub struct Tier {
    words: Vec<u64>,
}

impl Tier {
    pub fn zeroed(len: usize) -> Self {
        Self {
            words: vec![0; len],
        }
    }

    pub fn from_words(words: Vec<u64>) -> Self {
        Self { words }
    }

    /// Builds the tier that summarizes `lower`.
    ///
    /// Bits standing for groups past the end of `lower` are set so that they
    /// never look free to a search.
    fn summarize(lower: &Tier) -> Self {
        let groups = (lower.len() + GROUP_WORDS - 1) / GROUP_WORDS;
        let mut tier = Tier::zeroed(summary_words(lower.len()));

        for padding in groups..tier.len() * WORD_BITS as usize {
            tier.set(padding / WORD_BITS as usize, (padding % WORD_BITS as usize) as u32);
        }
        for group in 0..groups {
            if is_group_saturated(&lower.words, group) {
                tier.set(group / WORD_BITS as usize, (group % WORD_BITS as usize) as u32);
            }
        }
        tier
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn words(&self) -> &[u64] {
        &self.words
    }

    pub fn word(&self, index: usize) -> u64 {
        self.words[index]
    }

    pub fn is_set(&self, index: usize, offset: u32) -> bool {
        self.words[index] & (1_u64 << offset) != 0
    }

    pub fn set(&mut self, index: usize, offset: u32) {
        self.words[index] |= 1_u64 << offset;
    }

    pub fn clear(&mut self, index: usize, offset: u32) {
        self.words[index] &= !(1_u64 << offset);
    }

    /// First non-saturated word inside `range` and its lowest clear bit.
    fn first_free_in(&self, range: Range<usize>) -> Option<(usize, u32)> {
        let end = range.end.min(self.len());
        let start = range.start.min(end);
        self.words[start..end]
            .iter()
            .enumerate()
            .find_map(|(i, &w)| first_clear_bit(w).map(|offset| (start + i, offset)))
    }
}

impl fmt::Debug for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tier").field("words", &self.words.len()).finish()
    }
}

/// The Low tier plus every summary tier stacked above it.
///
/// A summary bit is set if and only if each word of the group it covers in the
/// tier below is full. Every mutation keeps this true so the search can skip
/// saturated regions without looking at them.
#[derive(Debug, Clone)]
pub struct TierStack {
    tiers: Vec<Tier>,
}

impl TierStack {
    /// A stack over `low_words` free Low words.
    pub fn new(low_words: usize) -> Self {
        Self::from_low(Tier::zeroed(low_words))
    }

    /// Stacks summary tiers over an existing Low tier, replaying saturation
    /// over every group so that the summaries agree with `low`.
    pub fn from_low(low: Tier) -> Self {
        let mut tiers = vec![low];
        while tiers.len() < MAX_TIERS {
            let below = &tiers[tiers.len() - 1];
            if below.len() <= GROUP_WORDS {
                break;
            }
            let summary = Tier::summarize(below);
            tiers.push(summary);
        }
        log::debug!(
            "built {} tier(s) with word counts {:?}",
            tiers.len(),
            tiers.iter().map(Tier::len).collect::<Vec<_>>()
        );
        Self { tiers }
    }

    pub fn low(&self) -> &Tier {
        &self.tiers[0]
    }

    pub fn tier(&self, kind: TierKind) -> Option<&Tier> {
        self.tiers.get(kind.level())
    }

    pub fn depth(&self) -> usize {
        self.tiers.len()
    }

    /// Sets a Low bit and marks every ancestor whose group it saturates.
    pub fn allocate(&mut self, index: usize, offset: u32) {
        self.tiers[0].set(index, offset);

        let mut index = index;
        for level in 1..self.tiers.len() {
            if !is_group_saturated(self.tiers[level - 1].words(), group_of(index)) {
                return;
            }
            let (parent, bit) = parent_coord(index);
            self.tiers[level].set(parent, bit);
            index = parent;
        }
    }

    /// Clears a Low bit and the summary bit above it on every level. A group
    /// holding a free bit is never saturated, so no re-check is needed.
    pub fn release(&mut self, index: usize, offset: u32) {
        self.tiers[0].clear(index, offset);

        let mut index = index;
        for level in 1..self.tiers.len() {
            let (parent, bit) = parent_coord(index);
            self.tiers[level].clear(parent, bit);
            index = parent;
        }
    }

    /// Lowest free Low coordinate, found by descending from the highest tier
    /// through the first non-saturated group on each level.
    pub fn locate_free(&self) -> Option<(usize, u32)> {
        let top = &self.tiers[self.tiers.len() - 1];
        let mut found = top.first_free_in(0..top.len())?;

        for level in (0..self.tiers.len() - 1).rev() {
            let group = found.0 * WORD_BITS as usize + found.1 as usize;
            let start = group * GROUP_WORDS;
            match self.tiers[level].first_free_in(start..start + GROUP_WORDS) {
                Some(coord) => found = coord,
                None => {
                    log::warn!(
                        "summary bit for group {} on level {} is clear but the group is full",
                        group,
                        level
                    );
                    return self.low().first_free_in(0..self.low().len());
                }
            }
        }
        log::trace!("descended to low word {} bit {}", found.0, found.1);
        Some(found)
    }
}
