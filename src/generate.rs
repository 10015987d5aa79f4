// SPDX-License-Identifier: MIT OR Apache-2.0

//! Model collaborator contract and the bundled activation-addition
//! generator.
//!
//! The sweep evaluator only ever talks to [`SteerableModel`]. Any model that
//! can honour a [`GenerationRequest`] (reproducible samples from the given
//! seeds, with every listed [`SteeringSpec`] active) can be evaluated.
//! [`SteeredGenerator`] is the implementation for hook-aware candle
//! backends.
//!
//! ## Activation additions
//!
//! For each spec the generator encodes `spec.prompt`, runs a clean forward
//! pass capturing `spec.act_name`, and scales the captured `[seq, hidden]`
//! activations by `spec.coeff`. Additions that share a site are summed
//! front-aligned (a shorter addition is zero-padded at the end). During
//! decoding the summed addition is injected into the first positions of the
//! residual stream on every forward pass, so the steering stays anchored to
//! the start of the prompt.

use candle_core::{D, DType, Tensor};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::backend::{SteerBackend, sample_token};
use crate::config::SamplingConfig;
use crate::error::{Result, SweepError};
use crate::hooks::{HookPoint, HookSpec};
use crate::steering::SteeringSpec;
use crate::tokenizer::TextCodec;

// ---------------------------------------------------------------------------
// Collaborator contract
// ---------------------------------------------------------------------------

/// One batch of samples for a single prompt under one intervention set.
#[derive(Debug, Clone, Copy)]
pub struct GenerationRequest<'a> {
    /// Prompt to complete.
    pub prompt: &'a str,
    /// Interventions active together for every sample; empty for a baseline.
    pub interventions: &'a [SteeringSpec],
    /// One seed per requested sample. Sample `i` must depend only on
    /// `seeds[i]`, never on its position in the batch.
    pub seeds: &'a [u64],
}

impl GenerationRequest<'_> {
    /// Number of samples requested.
    #[must_use]
    pub const fn num_samples(&self) -> usize {
        self.seeds.len()
    }
}

/// A single sampled continuation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    /// Generated text, excluding the prompt.
    pub text: String,
    /// Mean negative log-likelihood of the generated tokens, if the model
    /// reports one.
    pub loss: Option<f32>,
}

/// A generative model that can sample with steering interventions active.
///
/// Implementations must return exactly `request.num_samples()` completions,
/// in seed order, and must be deterministic in `(prompt, interventions,
/// seed)`. Unknown activation sites are reported as
/// [`SweepError::InterventionSiteNotFound`].
pub trait SteerableModel: Send + Sync {
    /// Sample one completion per seed in `request`.
    ///
    /// # Errors
    ///
    /// Returns [`SweepError::InterventionSiteNotFound`] for an unknown
    /// `act_name`, or any other error the model hits while generating.
    fn generate(&self, request: &GenerationRequest<'_>) -> Result<Vec<Completion>>;
}

// ---------------------------------------------------------------------------
// SteeredGenerator
// ---------------------------------------------------------------------------

/// [`SteerableModel`] over any hook-aware backend and tokenizer.
///
/// ```no_run
/// # use candle_sweep::{HfTokenizer, SamplingConfig, SteerBackend, SteeredGenerator};
/// # fn build<B: SteerBackend>(backend: B) -> candle_sweep::Result<()> {
/// let tokenizer = HfTokenizer::from_path("tokenizer.json")?;
/// let model = SteeredGenerator::new(backend, tokenizer, SamplingConfig::default())?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct SteeredGenerator<B, T> {
    backend: B,
    codec: T,
    sampling: SamplingConfig,
}

impl<B: SteerBackend, T: TextCodec> SteeredGenerator<B, T> {
    /// Combine a backend, a tokenizer and decoding settings.
    ///
    /// # Errors
    ///
    /// Returns [`SweepError::Config`] if `sampling` is out of range.
    pub fn new(backend: B, codec: T, sampling: SamplingConfig) -> Result<Self> {
        sampling.validate()?;
        Ok(Self {
            backend,
            codec,
            sampling,
        })
    }

    /// The wrapped backend.
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    /// Decoding settings.
    pub const fn sampling(&self) -> &SamplingConfig {
        &self.sampling
    }

    /// Compute the summed activation addition for every site in `specs`.
    ///
    /// Sites are validated before any forward pass runs. The result keeps
    /// first-appearance order of the sites.
    ///
    /// # Shapes
    /// - returns: per site, `[positions, hidden]` where `positions` is the
    ///   longest steering prompt at that site
    ///
    /// # Errors
    ///
    /// Returns [`SweepError::InterventionSiteNotFound`] if the backend does
    /// not expose a site, [`SweepError::Hook`] if the backend fails to
    /// capture it or the capture is not `hidden_size` wide.
    pub fn activation_additions(&self, specs: &[SteeringSpec]) -> Result<Vec<(HookPoint, Tensor)>> {
        let hooks: Vec<HookPoint> = specs
            .iter()
            .map(|spec| {
                let hook = HookPoint::from(spec.act_name.as_str());
                if self.backend.supports_hook(&hook) {
                    Ok(hook)
                } else {
                    Err(SweepError::InterventionSiteNotFound(spec.act_name.clone()))
                }
            })
            .collect::<Result<_>>()?;

        let mut by_site: Vec<(HookPoint, Tensor)> = Vec::new();
        for (spec, hook) in specs.iter().zip(hooks) {
            let ids = self.encode(&spec.prompt)?;
            if ids.is_empty() {
                return Err(SweepError::Tokenizer(format!(
                    "steering prompt {:?} encodes to zero tokens",
                    spec.prompt
                )));
            }
            let input = Tensor::new(ids.as_slice(), self.backend.device())?.unsqueeze(0)?;
            let mut capture = HookSpec::new();
            capture.capture(hook.clone());
            let cache = self.backend.forward(&input, &capture)?;
            // [1, seq, hidden] -> [seq, hidden]
            let captured = cache.require(&hook)?.squeeze(0)?;
            let width = captured.dim(1)?;
            if width != self.backend.hidden_size() {
                return Err(SweepError::Hook(format!(
                    "activation at `{hook}` has width {width}, expected hidden size {}",
                    self.backend.hidden_size()
                )));
            }
            let scaled = (captured * spec.coeff)?;

            if let Some((_, acc)) = by_site.iter_mut().find(|(h, _)| *h == hook) {
                *acc = add_front_aligned(acc, &scaled)?;
            } else {
                by_site.push((hook, scaled));
            }
        }
        Ok(by_site)
    }

    /// Encode `text`, rejecting ids the backend has no embedding for.
    #[allow(clippy::as_conversions)]
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let ids = self.codec.encode(text)?;
        let vocab = self.backend.vocab_size();
        if let Some(&id) = ids.iter().find(|&&id| id as usize >= vocab) {
            return Err(SweepError::Tokenizer(format!(
                "token id {id} in {text:?} is outside the model vocabulary ({vocab})"
            )));
        }
        Ok(ids)
    }

    /// Sample one continuation of `prompt_ids` with `additions` injected.
    fn sample_one(
        &self,
        prompt_ids: &[u32],
        additions: &[(HookPoint, Tensor)],
        seed: u64,
    ) -> Result<Completion> {
        let device = self.backend.device();
        let mut rng = StdRng::seed_from_u64(seed);
        let mut tokens = prompt_ids.to_vec();
        let mut nll = 0.0_f64;

        for _ in 0..self.sampling.tokens_to_generate {
            let seq_len = tokens.len();
            let input = Tensor::new(tokens.as_slice(), device)?.unsqueeze(0)?;
            let mut hooks = HookSpec::new();
            for (hook, delta) in additions {
                hooks.add(hook.clone(), pad_rows(delta, seq_len)?.unsqueeze(0)?);
            }

            let cache = self.backend.forward(&input, &hooks)?;
            // [1, seq, vocab] -> [vocab] at the last position
            let last = cache.output().get(0)?.get(seq_len - 1)?;
            let token = sample_token(&last, &tokens, &self.sampling, &mut rng)?;

            let log_probs = candle_nn::ops::log_softmax(&last.to_dtype(DType::F32)?, D::Minus1)?;
            #[allow(clippy::as_conversions)]
            let log_prob: f32 = log_probs.get(token as usize)?.to_scalar()?;
            nll -= f64::from(log_prob);
            tokens.push(token);
        }

        let generated = tokens.split_off(prompt_ids.len());
        #[allow(
            clippy::cast_precision_loss,
            clippy::cast_possible_truncation,
            clippy::as_conversions
        )]
        let loss = (!generated.is_empty()).then(|| (nll / generated.len() as f64) as f32);
        Ok(Completion {
            text: self.codec.decode(&generated)?,
            loss,
        })
    }
}

impl<B: SteerBackend, T: TextCodec> SteerableModel for SteeredGenerator<B, T> {
    fn generate(&self, request: &GenerationRequest<'_>) -> Result<Vec<Completion>> {
        let additions = self.activation_additions(request.interventions)?;

        let prompt_ids = self.encode(request.prompt)?;
        if prompt_ids.is_empty() {
            return Err(SweepError::Tokenizer(format!(
                "prompt {:?} encodes to zero tokens",
                request.prompt
            )));
        }
        for (hook, delta) in &additions {
            let positions = delta.dim(0)?;
            if positions > prompt_ids.len() {
                return Err(SweepError::Hook(format!(
                    "steering activations at `{hook}` span {positions} tokens \
                     but prompt {:?} has only {}",
                    request.prompt,
                    prompt_ids.len()
                )));
            }
        }

        tracing::debug!(
            prompt_tokens = prompt_ids.len(),
            samples = request.num_samples(),
            sites = additions.len(),
            "steered generation"
        );

        request
            .seeds
            .iter()
            .map(|&seed| self.sample_one(&prompt_ids, &additions, seed))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tensor helpers
// ---------------------------------------------------------------------------

/// Zero-pad a `[rows, hidden]` tensor at the end to `len` rows.
fn pad_rows(t: &Tensor, len: usize) -> Result<Tensor> {
    let (rows, hidden) = t.dims2()?;
    if rows >= len {
        return Ok(t.clone());
    }
    let zeros = Tensor::zeros((len - rows, hidden), t.dtype(), t.device())?;
    Ok(Tensor::cat(&[t, &zeros], 0)?)
}

/// Sum two `[rows, hidden]` tensors aligned at row 0.
fn add_front_aligned(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    let len = a.dim(0)?.max(b.dim(0)?);
    Ok((pad_rows(a, len)? + pad_rows(b, len)?)?)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
