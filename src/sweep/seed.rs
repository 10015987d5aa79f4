// SPDX-License-Identifier: MIT OR Apache-2.0

//! Index-keyed seed derivation.
//!
//! Every sample of an evaluation draws from its own stream, seeded by a
//! pure function of the root seed and the sample's indices. No counter is
//! shared between samples, so units can run in any order (or in parallel)
//! and still reproduce the same tables. Baseline and patched samples live
//! in separate stream families: changing `num_normal` cannot shift a
//! patched draw and vice versa.

/// Weyl-sequence increment used by splitmix64.
const GOLDEN_GAMMA: u64 = 0x9E37_79B9_7F4A_7C15;

/// Stream-family tags.
const BASELINE_TAG: u64 = 0x6261_7365_6c69_6e65; // "baseline"
const PATCHED_TAG: u64 = 0x7061_7463_6865_6400; // "patched\0"

/// The sample a seed is derived for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleUnit {
    /// Unmodified completion `replicate` of prompt `prompt`.
    Baseline {
        /// Prompt index.
        prompt: usize,
        /// Replicate index.
        replicate: usize,
    },
    /// Completion `replicate` of prompt `prompt` under intervention set `set`.
    Patched {
        /// Prompt index.
        prompt: usize,
        /// Intervention-set index.
        set: usize,
        /// Replicate index.
        replicate: usize,
    },
}

impl SampleUnit {
    /// Seed for this sample under `root`.
    ///
    /// ```
    /// use candle_sweep::sweep::SampleUnit;
    ///
    /// let unit = SampleUnit::Patched { prompt: 0, set: 1, replicate: 2 };
    /// assert_eq!(unit.seed(42), unit.seed(42));
    /// assert_ne!(unit.seed(42), unit.seed(43));
    /// ```
    #[must_use]
    pub fn seed(self, root: u64) -> u64 {
        match self {
            Self::Baseline { prompt, replicate } => {
                derive_seed(root, BASELINE_TAG, &[prompt, replicate])
            }
            Self::Patched {
                prompt,
                set,
                replicate,
            } => derive_seed(root, PATCHED_TAG, &[prompt, set, replicate]),
        }
    }
}

/// Fold `indices` into `root` one splitmix64 round at a time.
///
/// Each index is mixed into a fully avalanched state, so `(1, 0)` and
/// `(0, 1)` land on unrelated seeds.
#[must_use]
pub fn derive_seed(root: u64, tag: u64, indices: &[usize]) -> u64 {
    let mut state = splitmix64(root ^ tag);
    for &idx in indices {
        #[allow(clippy::as_conversions)]
        let idx = idx as u64;
        state = splitmix64(state.wrapping_add(GOLDEN_GAMMA) ^ idx);
    }
    state
}

/// splitmix64 finaliser.
const fn splitmix64(mut z: u64) -> u64 {
    z = z.wrapping_add(GOLDEN_GAMMA);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
