// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shared test doubles: a tiny deterministic candle backend and a
//! byte-level codec.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::cast_precision_loss,
    clippy::as_conversions,
    dead_code
)]

use candle_core::{DType, Device, Tensor};
use candle_sweep::{
    HookCache, HookPoint, HookSpec, Result, SamplingConfig, SteerBackend, SteeredGenerator,
    TextCodec, apply_additions,
};

pub const VOCAB: usize = 256;
pub const HIDDEN: usize = 16;
pub const LAYERS: usize = 2;

/// Embedding, `LAYERS` causal-mean mixing blocks, tied unembedding.
///
/// Supports capture and additions at `hook_embed` and
/// `blocks.{i}.hook_resid_pre` only.
#[derive(Debug)]
pub struct ToyBackend {
    embed: Tensor,
    unembed: Tensor,
    device: Device,
}

impl ToyBackend {
    pub fn new() -> Self {
        let device = Device::Cpu;
        let data: Vec<f32> = (0..VOCAB * HIDDEN)
            .map(|k| {
                let (tok, dim) = (k / HIDDEN, k % HIDDEN);
                ((tok as f32).mul_add(0.37, dim as f32 * 1.3)).sin()
            })
            .collect();
        let embed = Tensor::from_vec(data, (VOCAB, HIDDEN), &device).unwrap();
        let unembed = embed.t().unwrap().contiguous().unwrap();
        Self {
            embed,
            unembed,
            device,
        }
    }

    /// Running mean over positions `0..=t`, for every `t`.
    fn causal_mean(h: &Tensor) -> Result<Tensor> {
        let (_, seq, _) = h.dims3()?;
        let counts = Tensor::arange(1u32, seq as u32 + 1, h.device())?
            .to_dtype(DType::F32)?
            .reshape((1, seq, 1))?;
        Ok(h.cumsum(1)?.broadcast_div(&counts)?)
    }
}

impl SteerBackend for ToyBackend {
    fn num_layers(&self) -> usize {
        LAYERS
    }

    fn hidden_size(&self) -> usize {
        HIDDEN
    }

    fn vocab_size(&self) -> usize {
        VOCAB
    }

    fn device(&self) -> &Device {
        &self.device
    }

    fn forward(&self, input_ids: &Tensor, hooks: &HookSpec) -> Result<HookCache> {
        let ids = input_ids.squeeze(0)?;
        let mut hidden = self.embed.index_select(&ids, 0)?.unsqueeze(0)?;
        let mut cache = HookCache::new(Tensor::zeros(1, DType::F32, &self.device)?);

        if hooks.is_captured(&HookPoint::Embed) {
            cache.store(HookPoint::Embed, hidden.clone());
        }
        hidden = apply_additions(&hidden, hooks, &HookPoint::Embed)?;

        for layer in 0..LAYERS {
            let hook = HookPoint::ResidPre(layer);
            if hooks.is_captured(&hook) {
                cache.store(hook.clone(), hidden.clone());
            }
            hidden = apply_additions(&hidden, hooks, &hook)?;
            hidden = (&hidden + Self::causal_mean(&hidden)?.tanh()?)?;
        }

        let logits = hidden.squeeze(0)?.matmul(&self.unembed)?.unsqueeze(0)?;
        cache.set_output(logits);
        Ok(cache)
    }

    fn supports_hook(&self, hook: &HookPoint) -> bool {
        match hook {
            HookPoint::Embed => true,
            HookPoint::ResidPre(layer) => *layer < LAYERS,
            _ => false,
        }
    }
}

/// Logits that put exactly a quarter of the mass on each of `a`..=`d`.
///
/// Every probability is a power of two, so a sampled token is a pure
/// function of the draw from the per-sample generator. Captures at
/// `hook_embed` and `blocks.0.hook_resid_pre` are zeros; additions are
/// ignored.
#[derive(Debug)]
pub struct FourLetterBackend {
    device: Device,
}

impl FourLetterBackend {
    pub const fn new() -> Self {
        Self {
            device: Device::Cpu,
        }
    }
}

impl SteerBackend for FourLetterBackend {
    fn num_layers(&self) -> usize {
        1
    }

    fn hidden_size(&self) -> usize {
        4
    }

    fn vocab_size(&self) -> usize {
        VOCAB
    }

    fn device(&self) -> &Device {
        &self.device
    }

    fn forward(&self, input_ids: &Tensor, hooks: &HookSpec) -> Result<HookCache> {
        let (batch, seq) = input_ids.dims2()?;
        let row: Vec<f32> = (0..VOCAB)
            .map(|tok| if (97..=100).contains(&tok) { 0.0 } else { -1e9 })
            .collect();
        let logits = Tensor::new(row.as_slice(), &self.device)?
            .reshape((1, 1, VOCAB))?
            .repeat((batch, seq, 1))?;

        let mut cache = HookCache::new(logits);
        for hook in [HookPoint::Embed, HookPoint::ResidPre(0)] {
            if hooks.is_captured(&hook) {
                cache.store(hook, Tensor::zeros((batch, seq, 4), DType::F32, &self.device)?);
            }
        }
        Ok(cache)
    }
}

pub fn four_letter_generator(tokens_to_generate: usize) -> SteeredGenerator<FourLetterBackend, ByteCodec> {
    SteeredGenerator::new(FourLetterBackend::new(), ByteCodec, sampling(tokens_to_generate)).unwrap()
}

/// One token per byte; decoding is lossy UTF-8.
#[derive(Debug, Clone, Copy)]
pub struct ByteCodec;

impl TextCodec for ByteCodec {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        Ok(text.bytes().map(u32::from).collect())
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        let bytes: Vec<u8> = ids.iter().map(|&id| id as u8).collect();
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

pub fn sampling(tokens_to_generate: usize) -> SamplingConfig {
    SamplingConfig {
        tokens_to_generate,
        ..SamplingConfig::default()
    }
}

pub fn toy_generator(tokens_to_generate: usize) -> SteeredGenerator<ToyBackend, ByteCodec> {
    SteeredGenerator::new(ToyBackend::new(), ByteCodec, sampling(tokens_to_generate)).unwrap()
}
