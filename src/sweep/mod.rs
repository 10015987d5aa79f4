// SPDX-License-Identifier: MIT OR Apache-2.0

//! Sweep expansion and comparative evaluation.
//!
//! - [`expand`]: phrase groups × activation sites × multipliers into a
//!   [`SweepTable`].
//! - [`evaluate`] / [`evaluate_sweep`]: matched baseline and steered
//!   completions as two [`ResultTable`]s.
//! - [`SampleUnit`]: the pure seed derivation behind reproducible sampling.

mod evaluate;
mod expand;
mod seed;
mod table;

pub use evaluate::{evaluate, evaluate_sweep};
pub use expand::expand;
pub use seed::{SampleUnit, derive_seed};
pub use table::{CompletionRecord, ResultTable, SweepRow, SweepTable};
