// SPDX-License-Identifier: MIT OR Apache-2.0

//! Hook-aware backend trait and seeded sampling helpers.
//!
//! [`SteerBackend`] is the seam where a concrete model (a candle transformer,
//! an RWKV, a test double) plugs into the steered generator. The sampling
//! helpers never touch a global RNG: callers pass the per-sample generator
//! derived from the sweep seed.

use candle_core::{DType, Device, Tensor};
use rand::Rng;

use crate::config::SamplingConfig;
use crate::error::{Result, SweepError};
use crate::hooks::{HookCache, HookPoint, HookSpec};

// ---------------------------------------------------------------------------
// SteerBackend trait
// ---------------------------------------------------------------------------

/// Unified interface for model backends with hook-aware forward passes.
///
/// The caller declares captures and additive injections via [`HookSpec`];
/// the backend returns a [`HookCache`] with the logits plus any requested
/// activations. Captures at a hook point must be taken *before* additions
/// at that same point are applied.
pub trait SteerBackend: Send + Sync {
    /// Number of layers (transformer blocks).
    fn num_layers(&self) -> usize;

    /// Hidden dimension (`d_model`).
    fn hidden_size(&self) -> usize;

    /// Vocabulary size.
    fn vocab_size(&self) -> usize;

    /// Device holding the weights; input tensors are created here.
    fn device(&self) -> &Device;

    /// Forward pass with optional hook capture and additions.
    ///
    /// # Shapes
    /// - `input_ids`: `[batch, seq]` -- token IDs
    /// - returns: [`HookCache`] containing `logits` at `[batch, seq, vocab_size]`
    ///
    /// # Errors
    ///
    /// Returns [`SweepError::Model`] on tensor operation failures.
    fn forward(&self, input_ids: &Tensor, hooks: &HookSpec) -> Result<HookCache>;

    /// Whether this backend can capture and inject at `hook`.
    ///
    /// The default accepts `hook_embed`, `hook_final_norm` and every
    /// per-layer point whose layer index is below [`num_layers`](Self::num_layers).
    /// Custom hook points are rejected unless a backend overrides this.
    fn supports_hook(&self, hook: &HookPoint) -> bool {
        match hook.layer() {
            Some(layer) => layer < self.num_layers(),
            None => matches!(hook, HookPoint::Embed | HookPoint::FinalNorm),
        }
    }
}

// ---------------------------------------------------------------------------
// Sampling helpers
// ---------------------------------------------------------------------------

/// Sample the next token from last-position logits.
///
/// Applies, in order: frequency penalty over `history`, temperature
/// scaling, nucleus (top-p) truncation. When `temperature <= 0.0` the
/// penalised logits are decoded greedily and `rng` is not consumed.
///
/// # Shapes
/// - `logits`: `[vocab_size]`
///
/// # Errors
///
/// Returns [`SweepError::Model`] if the logits tensor is empty or
/// cannot be converted to `f32`.
pub fn sample_token<R: Rng>(
    logits: &Tensor,
    history: &[u32],
    sampling: &SamplingConfig,
    rng: &mut R,
) -> Result<u32> {
    let mut scores: Vec<f32> = logits.to_dtype(DType::F32)?.flatten_all()?.to_vec1()?;
    if scores.is_empty() {
        return Err(SweepError::Model(candle_core::Error::Msg(
            "empty logits".into(),
        )));
    }
    apply_freq_penalty(&mut scores, history, sampling.freq_penalty);

    if sampling.temperature <= 0.0 {
        return Ok(argmax(&scores));
    }
    let probs = nucleus_probs(&scores, sampling.temperature, sampling.top_p);
    Ok(sample_categorical(&probs, rng))
}

/// Subtract `penalty * count(token)` from each logit seen in `history`.
fn apply_freq_penalty(scores: &mut [f32], history: &[u32], penalty: f32) {
    if penalty == 0.0 {
        return;
    }
    for &token in history {
        #[allow(clippy::as_conversions)]
        let idx = token as usize;
        if let Some(score) = scores.get_mut(idx) {
            *score -= penalty;
        }
    }
}

/// Index of the largest score (first one on ties).
fn argmax(scores: &[f32]) -> u32 {
    let mut best = 0usize;
    let mut best_score = f32::NEG_INFINITY;
    for (idx, &score) in scores.iter().enumerate() {
        if score > best_score {
            best = idx;
            best_score = score;
        }
    }
    #[allow(clippy::cast_possible_truncation, clippy::as_conversions)]
    let token = best as u32;
    token
}

/// Temperature softmax restricted to the top-p nucleus, as `(token, prob)`
/// pairs sorted by descending probability and renormalised.
fn nucleus_probs(scores: &[f32], temperature: f32, top_p: f32) -> Vec<(u32, f32)> {
    let max_val = scores
        .iter()
        .map(|s| s / temperature)
        .fold(f32::NEG_INFINITY, f32::max);
    let exp_vals: Vec<f32> = scores
        .iter()
        .map(|s| (s / temperature - max_val).exp())
        .collect();
    let sum: f32 = exp_vals.iter().sum();

    #[allow(clippy::cast_possible_truncation, clippy::as_conversions)]
    let mut probs: Vec<(u32, f32)> = exp_vals
        .iter()
        .enumerate()
        .map(|(idx, e)| (idx as u32, e / sum))
        .collect();
    // Stable sort keeps lower token ids first on ties, so draws are reproducible.
    probs.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    if top_p < 1.0 {
        let mut cumsum = 0.0;
        let mut keep = 0;
        for &(_, p) in &probs {
            keep += 1;
            cumsum += p;
            if cumsum >= top_p {
                break;
            }
        }
        probs.truncate(keep.max(1));
        let kept: f32 = probs.iter().map(|(_, p)| p).sum();
        for entry in &mut probs {
            entry.1 /= kept;
        }
    }
    probs
}

/// Draw one token from a categorical distribution.
fn sample_categorical<R: Rng>(probs: &[(u32, f32)], rng: &mut R) -> u32 {
    let r: f32 = rng.r#gen();
    let mut cumsum = 0.0;
    for &(token, p) in probs {
        cumsum += p;
        if r < cumsum {
            return token;
        }
    }
    // Floating-point rounding edge case: fall back to the least likely kept token.
    probs.last().map_or(0, |&(token, _)| token)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
