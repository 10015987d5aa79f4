// SPDX-License-Identifier: MIT OR Apache-2.0

//! # candle-sweep
//!
//! Activation-addition parameter sweeps for language models, built on
//! [candle](https://github.com/huggingface/candle).
//!
//! A sweep crosses groups of weighted phrases with injection sites and
//! scale multipliers, producing one set of steering interventions per grid
//! point. The evaluator then samples matched baseline and steered
//! completions for a list of prompts, with every sample drawn from its own
//! seed-derived stream so results are reproducible and order-independent.
//!
//! ```
//! use candle_sweep::{PhraseGroup, block_name, sweep};
//!
//! let groups = [
//!     PhraseGroup::from_pairs([("Love", 1.0), ("Hate", -1.0)]),
//!     PhraseGroup::from_pairs([("Amazing", 2.0)]),
//! ];
//! let sites: Vec<String> = [6, 7, 8].into_iter().map(block_name).collect();
//! let table = sweep::expand(&groups, &sites, &[1.0, 5.0, 10.0, 20.0]).unwrap();
//! assert_eq!(table.len(), 24);
//! ```
//!
//! The model is a collaborator: anything implementing [`SteerableModel`]
//! can be evaluated. [`SteeredGenerator`] implements it for any
//! hook-aware [`SteerBackend`] plus a [`TextCodec`].

#![warn(missing_docs)]

pub mod backend;
pub mod config;
pub mod error;
pub mod generate;
pub mod hooks;
pub mod steering;
pub mod sweep;
pub mod tokenizer;

pub use backend::{SteerBackend, sample_token};
pub use config::{EvalConfig, ExperimentConfig, SamplingConfig, SweepConfig};
pub use error::{Result, SweepError};
pub use generate::{Completion, GenerationRequest, SteerableModel, SteeredGenerator};
pub use hooks::{HookCache, HookPoint, HookSpec, apply_additions, block_name};
pub use steering::{PhraseCoeff, PhraseGroup, SteeringSpec};
pub use sweep::{CompletionRecord, ResultTable, SweepRow, SweepTable};
pub use tokenizer::{HfTokenizer, TextCodec};
