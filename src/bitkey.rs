//! Fixed-universe bit-position sets.
//!
//! Every star-schema column carries a globally unique bit position. A `BitKey`
//! is the set type used throughout the crate to answer "which columns does
//! this aggregate cover" via cheap set algebra: union, difference, and
//! subset/superset tests.

use std::fmt;

const WORD_BITS: usize = 64;

/// A set of bit positions over a fixed universe (the star schema's column
/// count). Positions outside the universe are a caller bug.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct BitKey {
    universe: usize,
    words: Vec<u64>,
}

impl BitKey {
    /// Create an empty key sized for `universe` positions.
    pub fn new(universe: usize) -> Self {
        let n = universe.div_ceil(WORD_BITS).max(1);
        BitKey {
            universe,
            words: vec![0; n],
        }
    }

    /// The number of positions this key can hold.
    pub fn universe(&self) -> usize {
        self.universe
    }

    /// Set one position.
    pub fn set(&mut self, pos: usize) {
        assert!(
            pos < self.universe,
            "bit position {} outside universe {}",
            pos,
            self.universe
        );
        self.words[pos / WORD_BITS] |= 1u64 << (pos % WORD_BITS);
    }

    /// Test one position.
    pub fn contains(&self, pos: usize) -> bool {
        if pos >= self.universe {
            return false;
        }
        self.words[pos / WORD_BITS] & (1u64 << (pos % WORD_BITS)) != 0
    }

    /// In-place union.
    pub fn or_with(&mut self, other: &BitKey) {
        debug_assert_eq!(self.universe, other.universe);
        for (w, o) in self.words.iter_mut().zip(&other.words) {
            *w |= o;
        }
    }

    /// Union, returning a new key.
    pub fn union(&self, other: &BitKey) -> BitKey {
        let mut out = self.clone();
        out.or_with(other);
        out
    }

    /// Intersection, returning a new key.
    pub fn intersect(&self, other: &BitKey) -> BitKey {
        debug_assert_eq!(self.universe, other.universe);
        let mut out = self.clone();
        for (w, o) in out.words.iter_mut().zip(&other.words) {
            *w &= o;
        }
        out
    }

    /// Difference (`self` minus `other`), returning a new key.
    pub fn minus(&self, other: &BitKey) -> BitKey {
        debug_assert_eq!(self.universe, other.universe);
        let mut out = self.clone();
        for (w, o) in out.words.iter_mut().zip(&other.words) {
            *w &= !o;
        }
        out
    }

    /// True if every position in `other` is also in `self`.
    pub fn is_superset_of(&self, other: &BitKey) -> bool {
        debug_assert_eq!(self.universe, other.universe);
        self.words
            .iter()
            .zip(&other.words)
            .all(|(w, o)| w & o == *o)
    }

    /// True if no position is set.
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    /// Number of set positions.
    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Iterate over set positions in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.universe).filter(move |p| self.contains(*p))
    }

    /// Build a key from a list of positions.
    pub fn from_positions(universe: usize, positions: &[usize]) -> BitKey {
        let mut key = BitKey::new(universe);
        for p in positions {
            key.set(*p);
        }
        key
    }
}

impl fmt::Debug for BitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BitKey{{")?;
        let mut first = true;
        for p in self.iter() {
            if !first {
                write!(f, ",")?;
            }
            write!(f, "{}", p)?;
            first = false;
        }
        write!(f, "}}")
    }
}
