// SPDX-License-Identifier: MIT OR Apache-2.0

//! Steered generator against a tiny deterministic candle backend.
//!
//! Run:
//!   `cargo test --test steered_generation`

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::float_cmp,
    missing_docs
)]

mod common;

use candle_core::{Device, Tensor};
use candle_sweep::{
    Completion, GenerationRequest, HookCache, HookPoint, HookSpec, Result, SteerBackend,
    SteerableModel, SteeredGenerator, SteeringSpec, SweepError, TextCodec, block_name,
};

use common::{ByteCodec, ToyBackend, sampling, toy_generator};

const PROMPT: &str = "The most powerful emotion is";
const SEEDS: [u64; 4] = [11, 22, 33, 44];

fn generate(specs: &[SteeringSpec]) -> Vec<Completion> {
    toy_generator(12)
        .generate(&GenerationRequest {
            prompt: PROMPT,
            interventions: specs,
            seeds: &SEEDS,
        })
        .unwrap()
}

fn texts(completions: &[Completion]) -> Vec<String> {
    completions.iter().map(|c| c.text.clone()).collect()
}

#[test]
fn one_completion_per_seed_with_loss() {
    let completions = generate(&[]);
    assert_eq!(completions.len(), SEEDS.len());
    for c in &completions {
        let loss = c.loss.unwrap();
        assert!(loss.is_finite() && loss >= 0.0, "bad loss {loss}");
    }
}

#[test]
fn same_seed_same_text() {
    assert_eq!(generate(&[]), generate(&[]));

    let steer = [SteeringSpec::new("Love", 4.0, block_name(0))];
    assert_eq!(generate(&steer), generate(&steer));
}

#[test]
fn sample_depends_only_on_its_seed() {
    let model = toy_generator(12);
    let single = model
        .generate(&GenerationRequest {
            prompt: PROMPT,
            interventions: &[],
            seeds: &SEEDS[2..3],
        })
        .unwrap();
    assert_eq!(single[0], generate(&[])[2]);
}

#[test]
fn steering_changes_completions() {
    let steer = [SteeringSpec::new("Love", 20.0, block_name(0))];
    assert_ne!(texts(&generate(&steer)), texts(&generate(&[])));
}

#[test]
fn zero_coefficient_matches_baseline() {
    let steer = [SteeringSpec::new("Love", 0.0, block_name(1))];
    assert_eq!(generate(&steer), generate(&[]));
}

#[test]
fn set_members_are_applied_together() {
    // Opposite coefficients on the same phrase cancel only if both
    // additions land in the same forward pass.
    let site = block_name(0);
    let cancel = [
        SteeringSpec::new("Love", 3.0, site.as_str()),
        SteeringSpec::new("Love", -3.0, site.as_str()),
    ];
    assert_eq!(generate(&cancel), generate(&[]));

    let one_sided = [SteeringSpec::new("Love", 3.0, site.as_str())];
    assert_ne!(texts(&generate(&one_sided)), texts(&generate(&[])));
}

#[test]
fn additions_sum_front_aligned_per_site() {
    let model = toy_generator(1);
    let site = block_name(1);
    let additions = model
        .activation_additions(&[
            SteeringSpec::new("Love", 1.0, site.as_str()),
            SteeringSpec::new("Hatred", -1.0, site.as_str()),
            SteeringSpec::new("Joy", 2.0, "hook_embed"),
        ])
        .unwrap();

    assert_eq!(additions.len(), 2);
    assert_eq!(additions[0].0, HookPoint::ResidPre(1));
    assert_eq!(additions[0].1.dims(), &[6, common::HIDDEN]);
    assert_eq!(additions[1].0, HookPoint::Embed);
    assert_eq!(additions[1].1.dims(), &[3, common::HIDDEN]);
}

#[test]
fn unknown_site_is_reported_before_generation() {
    let steer = [
        SteeringSpec::new("Love", 1.0, block_name(0)),
        SteeringSpec::new("Fear", -1.0, block_name(9)),
    ];
    let err = toy_generator(4)
        .generate(&GenerationRequest {
            prompt: PROMPT,
            interventions: &steer,
            seeds: &SEEDS,
        })
        .unwrap_err();
    match err {
        SweepError::InterventionSiteNotFound(site) => assert_eq!(site, "blocks.9.hook_resid_pre"),
        other => panic!("unexpected error: {other}"),
    }

    let custom = [SteeringSpec::new("Love", 1.0, "blocks.0.attn.hook_z")];
    assert!(matches!(
        toy_generator(4).generate(&GenerationRequest {
            prompt: PROMPT,
            interventions: &custom,
            seeds: &SEEDS,
        }),
        Err(SweepError::InterventionSiteNotFound(_))
    ));
}

#[test]
fn steering_longer_than_prompt_is_rejected() {
    let steer = [SteeringSpec::new("Love", 1.0, block_name(0))];
    let err = toy_generator(4)
        .generate(&GenerationRequest {
            prompt: "Hi",
            interventions: &steer,
            seeds: &SEEDS,
        })
        .unwrap_err();
    assert!(matches!(err, SweepError::Hook(_)));
}

#[test]
fn backend_captures_clean_activation_before_adding() {
    let backend = ToyBackend::new();
    let input = Tensor::new(&[[73u32, 32, 102]], backend.device()).unwrap();
    let delta = Tensor::ones((1, 3, common::HIDDEN), candle_core::DType::F32, backend.device())
        .unwrap();

    let mut clean = HookSpec::new();
    clean.capture(HookPoint::ResidPre(1));
    let mut steered = clean.clone();
    steered.add(HookPoint::ResidPre(1), delta);

    let a = backend.forward(&input, &clean).unwrap();
    let b = backend.forward(&input, &steered).unwrap();

    let cap_a: Vec<f32> = a.require(&HookPoint::ResidPre(1)).unwrap().flatten_all().unwrap().to_vec1().unwrap();
    let cap_b: Vec<f32> = b.require(&HookPoint::ResidPre(1)).unwrap().flatten_all().unwrap().to_vec1().unwrap();
    assert_eq!(cap_a, cap_b);

    let out_a: Vec<f32> = a.output().flatten_all().unwrap().to_vec1().unwrap();
    let out_b: Vec<f32> = b.output().flatten_all().unwrap().to_vec1().unwrap();
    assert_ne!(out_a, out_b);
}

/// Encodes each char as its code point, so ids can exceed the toy vocabulary.
struct CharCodec;

impl TextCodec for CharCodec {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        Ok(text.chars().map(u32::from).collect())
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        Ok(ids.iter().filter_map(|&id| char::from_u32(id)).collect())
    }
}

/// Toy backend that reports a hidden size its activations do not have.
struct MisreportedWidth(ToyBackend);

impl SteerBackend for MisreportedWidth {
    fn num_layers(&self) -> usize {
        self.0.num_layers()
    }

    fn hidden_size(&self) -> usize {
        self.0.hidden_size() / 2
    }

    fn vocab_size(&self) -> usize {
        self.0.vocab_size()
    }

    fn device(&self) -> &Device {
        self.0.device()
    }

    fn forward(&self, input_ids: &Tensor, hooks: &HookSpec) -> Result<HookCache> {
        self.0.forward(input_ids, hooks)
    }
}

#[test]
fn generator_exposes_backend_and_sampling() {
    let model = toy_generator(7);
    assert_eq!(model.sampling().tokens_to_generate, 7);
    assert_eq!(model.backend().num_layers(), common::LAYERS);

    let last_block = block_name(model.backend().num_layers() - 1);
    let steer = [SteeringSpec::new("Love", 2.0, last_block)];
    let completions = model
        .generate(&GenerationRequest {
            prompt: PROMPT,
            interventions: &steer,
            seeds: &SEEDS[..1],
        })
        .unwrap();
    assert_eq!(completions.len(), 1);
}

#[test]
fn ids_outside_vocabulary_are_rejected() {
    let model = SteeredGenerator::new(ToyBackend::new(), CharCodec, sampling(3)).unwrap();
    let ok = model.generate(&GenerationRequest {
        prompt: "I feel",
        interventions: &[],
        seeds: &SEEDS[..1],
    });
    assert!(ok.is_ok());

    let err = model
        .generate(&GenerationRequest {
            prompt: "I feel \u{2713}",
            interventions: &[],
            seeds: &SEEDS[..1],
        })
        .unwrap_err();
    assert!(matches!(err, SweepError::Tokenizer(_)), "got {err}");

    let steer = [SteeringSpec::new("\u{2764}", 1.0, block_name(0))];
    let err = model
        .generate(&GenerationRequest {
            prompt: PROMPT,
            interventions: &steer,
            seeds: &SEEDS[..1],
        })
        .unwrap_err();
    assert!(matches!(err, SweepError::Tokenizer(_)), "got {err}");
}

#[test]
fn capture_width_must_match_hidden_size() {
    let model =
        SteeredGenerator::new(MisreportedWidth(ToyBackend::new()), ByteCodec, sampling(3)).unwrap();
    let steer = [SteeringSpec::new("Love", 1.0, block_name(0))];
    let err = model.activation_additions(&steer).unwrap_err();
    assert!(matches!(err, SweepError::Hook(_)), "got {err}");

    // Baselines never capture, so they are unaffected.
    let completions = model
        .generate(&GenerationRequest {
            prompt: PROMPT,
            interventions: &[],
            seeds: &SEEDS[..2],
        })
        .unwrap();
    assert_eq!(completions.len(), 2);
}
