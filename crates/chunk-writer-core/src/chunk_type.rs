//! Chunk-type algebra (component C1).
//!
//! A [`ChunkType`] identifies the layout of one on-disk object backing a
//! chunk: either the whole chunk (`Standard`), one of the `L` data strips of
//! an XOR-`L` chunk, or that stripe's parity strip. It packs into a single
//! byte so it can be used as a map key and sent on the wire unchanged.

use crate::constants::{BLOCK_SIZE, XOR_LEVELS};
use crate::error::Error;
use std::fmt;

/// XOR stripe level. Only the values in [`XOR_LEVELS`] are valid.
pub type XorLevel = u8;

/// 1-based position of a data strip within its stripe.
pub type XorPart = u8;

/// Layout of one storage-server object backing a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChunkType {
    /// The chunk is stored as one whole, unstriped object.
    Standard,
    /// Data strip `part` of an XOR-`level` chunk, `part` in `1..=level`.
    XorData {
        /// Stripe width.
        level: XorLevel,
        /// 1-based data-strip index.
        part: XorPart,
    },
    /// The parity strip of an XOR-`level` chunk.
    XorParity {
        /// Stripe width.
        level: XorLevel,
    },
}

impl ChunkType {
    /// The `Standard` (unstriped) chunk type.
    pub fn standard() -> Self {
        ChunkType::Standard
    }

    /// The data-strip chunk type for `part` of an XOR-`level` chunk.
    ///
    /// Panics if `level` is not a recognized stripe width or `part` is out
    /// of `1..=level` — both are programmer errors at every call site in
    /// this crate, where `level`/`part` come from a [`Locator`](crate::locator::Locator)
    /// that already validated them.
    pub fn xor(level: XorLevel, part: XorPart) -> Self {
        assert!(XOR_LEVELS.contains(&level), "unrecognized xor level {level}");
        assert!(
            part >= 1 && part <= level,
            "xor part {part} out of range for level {level}"
        );
        ChunkType::XorData { level, part }
    }

    /// The parity chunk type for an XOR-`level` stripe.
    pub fn xor_parity(level: XorLevel) -> Self {
        assert!(XOR_LEVELS.contains(&level), "unrecognized xor level {level}");
        ChunkType::XorParity { level }
    }

    /// True for [`ChunkType::Standard`].
    pub fn is_standard(&self) -> bool {
        matches!(self, ChunkType::Standard)
    }

    /// True for any XOR variant (data or parity).
    pub fn is_xor(&self) -> bool {
        !self.is_standard()
    }

    /// True for the parity strip of an XOR stripe.
    pub fn is_parity(&self) -> bool {
        matches!(self, ChunkType::XorParity { .. })
    }

    /// Stripe width, if this is an XOR variant.
    pub fn level(&self) -> Option<XorLevel> {
        match self {
            ChunkType::Standard => None,
            ChunkType::XorData { level, .. } | ChunkType::XorParity { level } => Some(*level),
        }
    }

    /// 1-based data-strip index, if this is an XOR data variant.
    pub fn part(&self) -> Option<XorPart> {
        match self {
            ChunkType::XorData { part, .. } => Some(*part),
            _ => None,
        }
    }

    /// Stripe size `S(ct)`: `L` for XOR variants, `1` for `Standard`.
    pub fn stripe_size(&self) -> u32 {
        match self.level() {
            Some(l) => l as u32,
            None => 1,
        }
    }

    /// Projects a chunk-global length `n` (bytes) onto the length of the
    /// per-part object this `ChunkType` identifies, given block size `b`.
    ///
    /// See `SPEC_FULL.md` §3 for the derivation. `Standard` passes `n`
    /// through unchanged.
    pub fn project_length(&self, n: u64, b: u64) -> u64 {
        let level = match self.level() {
            None => return n,
            Some(l) => l as u64,
        };

        let full = n / (level * b);
        let base = full * b;
        let rest = n - full * level * b;

        let rest_len = match self {
            ChunkType::XorData { part, .. } => {
                let offset = (*part as u64 - 1) * b;
                rest.saturating_sub(offset).min(b)
            }
            ChunkType::XorParity { .. } => {
                if rest > 0 {
                    rest.min(b)
                } else {
                    0
                }
            }
            ChunkType::Standard => unreachable!("handled above"),
        };

        base + rest_len
    }

    /// Encodes this chunk type as its single wire byte.
    ///
    /// `Standard` is tag `0`. XOR variants are numbered by walking
    /// [`XOR_LEVELS`] in order and, for each level, assigning consecutive
    /// ids to data parts `1..=level` followed by one id for parity. This is
    /// a greenfield encoding (see `DESIGN.md`): it is injective and stable
    /// across runs of this crate, but makes no claim to match any specific
    /// legacy deployment's wire format bit-for-bit.
    pub fn encode(&self) -> u8 {
        match self {
            ChunkType::Standard => 0,
            ChunkType::XorData { level, part } => Self::level_base(*level) + part,
            ChunkType::XorParity { level } => Self::level_base(*level) + level + 1,
        }
    }

    /// Decodes a wire byte into a `ChunkType`, rejecting unrecognized tags.
    pub fn decode(tag: u8) -> Result<Self, Error> {
        if tag == 0 {
            return Ok(ChunkType::Standard);
        }
        for &level in XOR_LEVELS {
            let base = Self::level_base(level);
            let ids_in_level = level as u16 + 1; // data parts + parity
            if (tag as u16) > base as u16 && (tag as u16) <= base as u16 + ids_in_level {
                let offset = tag - base;
                return Ok(if offset == level + 1 {
                    ChunkType::XorParity { level }
                } else {
                    ChunkType::XorData { level, part: offset }
                });
            }
        }
        Err(Error::BadEncoding(tag))
    }

    /// First id used by `level`'s block of ids (one past the previous
    /// level's last id; `0` is reserved for `Standard`).
    fn level_base(level: XorLevel) -> u8 {
        let mut base = 0u8;
        for &l in XOR_LEVELS {
            if l == level {
                return base;
            }
            base += l + 1;
        }
        unreachable!("level_base called with unrecognized level {level}");
    }

    /// Validates a raw wire tag without constructing a `ChunkType`.
    pub fn validate(tag: u8) -> bool {
        Self::decode(tag).is_ok()
    }
}

impl Default for ChunkType {
    fn default() -> Self {
        ChunkType::Standard
    }
}

impl fmt::Display for ChunkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChunkType::Standard => write!(f, "standard"),
            ChunkType::XorData { level, part } => write!(f, "xor_{part}_of_{level}"),
            ChunkType::XorParity { level } => write!(f, "xor_parity_of_{level}"),
        }
    }
}

/// Length, in bytes, of one (possibly partial) stripe's worth of data
/// blocks — i.e. `level * block_size` — used by the coordinator when
/// deciding stripe boundaries. Kept here alongside the type that defines
/// `level` so the two never drift apart.
pub fn default_block_size() -> u64 {
    BLOCK_SIZE as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_round_trips() {
        let ct = ChunkType::standard();
        assert_eq!(ChunkType::decode(ct.encode()).unwrap(), ct);
    }

    #[test]
    fn all_xor_variants_round_trip() {
        for &level in XOR_LEVELS {
            for part in 1..=level {
                let ct = ChunkType::xor(level, part);
                assert_eq!(ChunkType::decode(ct.encode()).unwrap(), ct);
            }
            let parity = ChunkType::xor_parity(level);
            assert_eq!(ChunkType::decode(parity.encode()).unwrap(), parity);
        }
    }

    #[test]
    fn encodings_are_distinct() {
        let mut tags = Vec::new();
        tags.push(ChunkType::standard().encode());
        for &level in XOR_LEVELS {
            for part in 1..=level {
                tags.push(ChunkType::xor(level, part).encode());
            }
            tags.push(ChunkType::xor_parity(level).encode());
        }
        let mut sorted = tags.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), tags.len(), "chunk type tags must be unique");
    }

    #[test]
    fn unrecognized_tag_is_bad_encoding() {
        // No level produces more than 38 as the highest assigned tag.
        let err = ChunkType::decode(250).unwrap_err();
        assert!(matches!(err, Error::BadEncoding(250)));
    }

    #[test]
    fn to_string_matches_spec_forms() {
        assert_eq!(ChunkType::standard().to_string(), "standard");
        assert_eq!(ChunkType::xor(3, 2).to_string(), "xor_2_of_3");
        assert_eq!(ChunkType::xor_parity(3).to_string(), "xor_parity_of_3");
    }

    #[test]
    fn standard_projects_length_unchanged() {
        let ct = ChunkType::standard();
        for n in [0u64, 1, 100, 65536, 999_999] {
            assert_eq!(ct.project_length(n, 65536), n);
        }
    }

    #[test]
    fn xor_full_stripes_split_evenly() {
        let b = 65536u64;
        let n = 3 * b * 4; // 4 full stripes of level 3
        for part in 1..=3 {
            assert_eq!(ChunkType::xor(3, part).project_length(n, b), 4 * b);
        }
        assert_eq!(ChunkType::xor_parity(3).project_length(n, b), 4 * b);
    }

    #[test]
    fn xor_partial_trailing_stripe() {
        let b = 65536u64;
        // 1 full stripe, plus a trailing partial stripe with 1.5 blocks.
        let n = 3 * b + b + b / 2;
        assert_eq!(ChunkType::xor(3, 1).project_length(n, b), b + b);
        assert_eq!(ChunkType::xor(3, 2).project_length(n, b), b + b / 2);
        assert_eq!(ChunkType::xor(3, 3).project_length(n, b), b + 0);
        assert_eq!(ChunkType::xor_parity(3).project_length(n, b), b + b);
    }

    #[test]
    fn parity_absent_when_no_trailing_data() {
        let b = 65536u64;
        let n = 3 * b * 2; // exactly 2 full stripes, nothing trailing
        assert_eq!(ChunkType::xor_parity(3).project_length(n, b), 2 * b);
    }

    #[test]
    fn project_length_is_monotonic() {
        let b = 65536u64;
        let ct = ChunkType::xor(4, 2);
        let mut prev = 0u64;
        for n in (0..=(4 * b * 3)).step_by(4096) {
            let len = ct.project_length(n, b);
            assert!(len >= prev);
            prev = len;
        }
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    /// Any constructible `ChunkType`, `Standard` or a valid XOR data/parity part.
    fn any_chunk_type() -> impl Strategy<Value = ChunkType> {
        (0usize..=XOR_LEVELS.len(), 0u8..11).prop_map(|(level_choice, part_raw)| {
            if level_choice == 0 {
                ChunkType::standard()
            } else {
                let level = XOR_LEVELS[level_choice - 1];
                let slot = part_raw % (level + 1); // 0..=level
                if slot == level {
                    ChunkType::xor_parity(level)
                } else {
                    ChunkType::xor(level, slot + 1)
                }
            }
        })
    }

    proptest! {
        #[test]
        fn round_trip(ct in any_chunk_type()) {
            prop_assert_eq!(ChunkType::decode(ct.encode()).unwrap(), ct);
        }

        #[test]
        fn unrecognized_or_recognized_tag_encodes_back_to_itself(tag in any::<u8>()) {
            if let Ok(ct) = ChunkType::decode(tag) {
                prop_assert_eq!(ct.encode(), tag);
            }
        }

        #[test]
        fn project_length_is_monotonic_and_bounded(
            ct in any_chunk_type(),
            n1 in 0u64..10_000_000,
            delta in 0u64..1_000_000,
        ) {
            let b = 65536u64;
            let n2 = n1 + delta;
            let len1 = ct.project_length(n1, b);
            let len2 = ct.project_length(n2, b);
            prop_assert!(len2 >= len1);

            let bound = match ct.level() {
                None => n2,
                Some(level) => {
                    let stripe = level as u64 * b;
                    ((n2 + stripe - 1) / stripe) * b
                }
            };
            prop_assert!(len2 <= bound);
        }
    }
}
