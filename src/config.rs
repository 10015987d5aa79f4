// SPDX-License-Identifier: MIT OR Apache-2.0

//! Experiment configuration and JSON parsing.
//!
//! One JSON document describes a whole experiment: the sweep grid, the
//! replicate counts and seed, and the sampling settings handed to the
//! steered generator.
//!
//! ```
//! use candle_sweep::ExperimentConfig;
//!
//! let config = ExperimentConfig::from_json(r#"{
//!     "prompts": ["I feel"],
//!     "sweep": {
//!         "groups": [[["Love", 1.0], ["Hate", -1.0]]],
//!         "sites": [6, "blocks.7.hook_resid_pre"],
//!         "multipliers": [1.0, 5.0]
//!     },
//!     "eval": { "num_normal": 4, "num_patched": 4, "seed": 42 }
//! }"#).unwrap();
//! assert_eq!(config.sweep.sites, ["blocks.6.hook_resid_pre", "blocks.7.hook_resid_pre"]);
//! assert_eq!(config.sampling.tokens_to_generate, 40);
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SweepError};
use crate::hooks::block_name;
use crate::steering::PhraseGroup;
use crate::sweep::{self, SweepTable};

/// Default number of tokens sampled per completion.
pub const DEFAULT_TOKENS_TO_GENERATE: usize = 40;

// ---------------------------------------------------------------------------
// SamplingConfig
// ---------------------------------------------------------------------------

/// Decoding settings used by [`SteeredGenerator`](crate::SteeredGenerator).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SamplingConfig {
    /// Number of tokens appended to each prompt.
    pub tokens_to_generate: usize,
    /// Softmax temperature; `0.0` selects greedy decoding.
    pub temperature: f32,
    /// Nucleus mass in `(0, 1]`; `1.0` disables truncation.
    pub top_p: f32,
    /// Logit penalty subtracted once per previous occurrence of a token.
    pub freq_penalty: f32,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            tokens_to_generate: DEFAULT_TOKENS_TO_GENERATE,
            temperature: 1.0,
            top_p: 1.0,
            freq_penalty: 0.0,
        }
    }
}

impl SamplingConfig {
    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`SweepError::Config`] for a negative or non-finite
    /// temperature, a `top_p` outside `(0, 1]`, or a non-finite penalty.
    pub fn validate(&self) -> Result<()> {
        if !self.temperature.is_finite() || self.temperature < 0.0 {
            return Err(SweepError::Config(format!(
                "temperature must be finite and >= 0, got {}",
                self.temperature
            )));
        }
        if !(self.top_p > 0.0 && self.top_p <= 1.0) {
            return Err(SweepError::Config(format!(
                "top_p must be in (0, 1], got {}",
                self.top_p
            )));
        }
        if !self.freq_penalty.is_finite() {
            return Err(SweepError::Config(format!(
                "freq_penalty must be finite, got {}",
                self.freq_penalty
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// EvalConfig
// ---------------------------------------------------------------------------

/// Replicate counts and seed for [`evaluate`](crate::sweep::evaluate).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EvalConfig {
    /// Unmodified completions per prompt.
    pub num_normal: usize,
    /// Steered completions per `(prompt, intervention set)`.
    pub num_patched: usize,
    /// Root seed every sample stream is derived from.
    pub seed: u64,
}

impl EvalConfig {
    /// Build a config from signed counts, as they arrive from callers and
    /// JSON.
    ///
    /// # Errors
    ///
    /// Returns [`SweepError::InvalidSampleCount`] if either count is negative.
    pub fn new(num_normal: i64, num_patched: i64, seed: u64) -> Result<Self> {
        Ok(Self {
            num_normal: sample_count("num_normal", num_normal)?,
            num_patched: sample_count("num_patched", num_patched)?,
            seed,
        })
    }
}

/// Convert a signed replicate count, rejecting negatives.
fn sample_count(name: &'static str, count: i64) -> Result<usize> {
    usize::try_from(count).map_err(|_| SweepError::InvalidSampleCount { name, count })
}

/// Wire form of [`EvalConfig`]: counts stay signed until validated.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawEvalConfig {
    num_normal: i64,
    num_patched: i64,
    #[serde(default)]
    seed: u64,
}

impl TryFrom<RawEvalConfig> for EvalConfig {
    type Error = SweepError;

    fn try_from(raw: RawEvalConfig) -> Result<Self> {
        Self::new(raw.num_normal, raw.num_patched, raw.seed)
    }
}

// ---------------------------------------------------------------------------
// SweepConfig
// ---------------------------------------------------------------------------

/// An activation site as written in a config file: a bare layer number
/// (meaning its `hook_resid_pre`) or a full hook name.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum SiteEntry {
    Layer(usize),
    Name(String),
}

impl SiteEntry {
    fn into_site(self) -> String {
        match self {
            Self::Layer(layer) => block_name(layer),
            Self::Name(name) => name,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSweepConfig {
    groups: Vec<PhraseGroup>,
    sites: Vec<SiteEntry>,
    multipliers: Vec<f64>,
}

/// The three sweep axes, in expansion order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepConfig {
    /// Phrase groups (outer axis).
    pub groups: Vec<PhraseGroup>,
    /// Activation sites (middle axis), already resolved to hook names.
    pub sites: Vec<String>,
    /// Scale multipliers (inner axis).
    pub multipliers: Vec<f64>,
}

impl From<RawSweepConfig> for SweepConfig {
    fn from(raw: RawSweepConfig) -> Self {
        Self {
            groups: raw.groups,
            sites: raw.sites.into_iter().map(SiteEntry::into_site).collect(),
            multipliers: raw.multipliers,
        }
    }
}

impl SweepConfig {
    /// Expand the configured axes into a [`SweepTable`].
    ///
    /// # Errors
    ///
    /// Returns [`SweepError::InvalidSweepSpec`] if any axis is empty or
    /// malformed.
    pub fn expand(&self) -> Result<SweepTable> {
        sweep::expand(&self.groups, &self.sites, &self.multipliers)
    }
}

// ---------------------------------------------------------------------------
// ExperimentConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawExperimentConfig {
    #[serde(default)]
    prompts: Vec<String>,
    sweep: RawSweepConfig,
    eval: RawEvalConfig,
    #[serde(default)]
    sampling: SamplingConfig,
}

/// A complete experiment definition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExperimentConfig {
    /// Prompts to complete.
    pub prompts: Vec<String>,
    /// Sweep grid.
    pub sweep: SweepConfig,
    /// Replicate counts and seed.
    pub eval: EvalConfig,
    /// Decoding settings.
    pub sampling: SamplingConfig,
}

impl ExperimentConfig {
    /// Parse and validate an experiment from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns [`SweepError::Config`] on malformed JSON or invalid sampling
    /// settings, and [`SweepError::InvalidSampleCount`] on negative counts.
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: RawExperimentConfig = serde_json::from_str(json)
            .map_err(|e| SweepError::Config(format!("parse experiment config: {e}")))?;
        raw.sampling.validate()?;
        Ok(Self {
            prompts: raw.prompts,
            sweep: raw.sweep.into(),
            eval: raw.eval.try_into()?,
            sampling: raw.sampling,
        })
    }

    /// Read and parse an experiment JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`SweepError::Io`] if the file cannot be read and
    /// [`SweepError::Config`] if it does not parse.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
