//! Story randomness
//!
//! A PCG generator with 64-bit seeding lives in the call frame, so choice
//! snapshots replay deterministically and multiple stories in one process
//! never share state. Shuffled sequences do not draw from the stream: each
//! permutation derives from the story seed, the sequence's address, and the
//! loop count, so a given visit always sees the same ordering.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use rand::{RngCore, SeedableRng};
use rand_pcg::Pcg64;

/// Seeded random state carried by the call frame.
#[derive(Debug, Clone)]
pub struct StoryRng {
    seed: u64,
    state: Pcg64,
}

impl StoryRng {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            state: Pcg64::seed_from_u64(seed),
        }
    }

    /// The seed the story was started (or last reseeded) with.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn reseed(&mut self, seed: u64) {
        *self = Self::new(seed);
    }

    /// Next value in `[lo, hi)`; collapses to `lo` when the range is empty.
    pub fn rand_range(&mut self, lo: i64, hi: i64) -> i64 {
        if hi <= lo {
            return lo;
        }
        let span = (hi - lo) as u64;
        lo + (self.state.next_u64() % span) as i64
    }

    /// Shuffled-sequence index for the `seq_count`-th visit of a sequence of
    /// `elements` entries at `address`.
    ///
    /// Each full pass through the sequence (`loop = seq_count / elements`)
    /// uses a fresh permutation; within a pass every index appears exactly
    /// once.
    pub fn seq_index(&self, address: &str, seq_count: i64, elements: i64) -> i64 {
        if elements <= 0 {
            return 0;
        }
        let pass = (seq_count / elements) as u64;
        let mut hasher = DefaultHasher::new();
        address.hash(&mut hasher);
        let mix = self
            .seed
            .wrapping_add(hasher.finish())
            .wrapping_add(pass);
        let mut rng = Pcg64::seed_from_u64(mix);

        let n = elements as usize;
        let mut perm: Vec<i64> = (0..elements).collect();
        for i in (1..n).rev() {
            let j = (rng.next_u64() % (i as u64 + 1)) as usize;
            perm.swap(i, j);
        }
        perm[(seq_count % elements) as usize]
    }
}
