/// Number of bits tracked by a single word of any tier.
pub const WORD_BITS: u64 = 64;

/// Number of consecutive words of one tier summarized by a single bit of the
/// tier above it. A group of 16 Low words covers 1024 blocks.
pub const GROUP_WORDS: usize = 16;

/// A word with every bit allocated.
pub const FULL_WORD: u64 = u64::MAX;

/// Index of the word holding `bit`.
pub fn word_index_of(bit: u64) -> usize {
    (bit / WORD_BITS) as usize
}

/// Position of `bit` inside its word.
pub fn bit_offset_of(bit: u64) -> u32 {
    (bit % WORD_BITS) as u32
}

/// Absolute bit number of `offset` inside word `index`.
pub fn bit_number(index: usize, offset: u32) -> u64 {
    index as u64 * WORD_BITS + u64::from(offset)
}

/// The group a word of some tier belongs to.
pub fn group_of(index: usize) -> usize {
    index / GROUP_WORDS
}

/// The word/bit coordinate, in the tier above, of the bit summarizing the group
/// that word `index` belongs to.
pub fn parent_coord(index: usize) -> (usize, u32) {
    let group = group_of(index);
    (group / WORD_BITS as usize, (group % WORD_BITS as usize) as u32)
}

/// Checks whether every word of `group` is fully allocated.
///
/// Words past the end of `words` count as allocated, so a trailing group that
/// is shorter than `GROUP_WORDS` saturates once its real words do.
pub fn is_group_saturated(words: &[u64], group: usize) -> bool {
    let start = (group * GROUP_WORDS).min(words.len());
    let end = (start + GROUP_WORDS).min(words.len());
    words[start..end].iter().all(|&w| w == FULL_WORD)
}

/// Lowest clear bit of `word`, or `None` if the word is full.
pub fn first_clear_bit(word: u64) -> Option<u32> {
    match word {
        FULL_WORD => None,
        _ => Some((!word).trailing_zeros()),
    }
}

/// Number of words a tier needs to summarize `lower_words` words of the tier
/// below it.
pub fn summary_words(lower_words: usize) -> usize {
    let groups = (lower_words + GROUP_WORDS - 1) / GROUP_WORDS;
    (groups + WORD_BITS as usize - 1) / WORD_BITS as usize
}
