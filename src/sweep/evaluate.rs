// SPDX-License-Identifier: MIT OR Apache-2.0

//! Matched baseline-vs-steered generation.
//!
//! Work is split into units of one `(prompt, intervention set)` each (or one
//! prompt for the baseline). A unit is a single model call that receives one
//! derived seed per replicate. Units share nothing but the root seed, and
//! their outputs are placed by index, so the result tables do not depend on
//! execution order. With the `parallel` feature, units run on the rayon
//! global pool.

use crate::config::EvalConfig;
use crate::error::{Result, SweepError};
use crate::generate::{Completion, GenerationRequest, SteerableModel};
use crate::steering::SteeringSpec;

use super::seed::SampleUnit;
use super::table::{CompletionRecord, ResultTable, SweepTable};

/// One model call: every replicate of a prompt under one intervention set.
#[derive(Debug)]
struct Unit<'a> {
    prompt: &'a str,
    /// `None` for baseline units.
    set_index: Option<usize>,
    interventions: &'a [SteeringSpec],
    seeds: Vec<u64>,
}

impl Unit<'_> {
    fn run<M: SteerableModel + ?Sized>(&self, model: &M) -> Result<Vec<Completion>> {
        tracing::debug!(
            prompt = self.prompt,
            set = ?self.set_index,
            samples = self.seeds.len(),
            "generation unit"
        );
        let completions = model.generate(&GenerationRequest {
            prompt: self.prompt,
            interventions: self.interventions,
            seeds: &self.seeds,
        })?;
        if completions.len() != self.seeds.len() {
            return Err(SweepError::ModelGeneration(format!(
                "requested {} samples for prompt {:?}, model returned {}",
                self.seeds.len(),
                self.prompt,
                completions.len()
            )));
        }
        Ok(completions)
    }

    fn into_records(self, completions: Vec<Completion>) -> impl Iterator<Item = CompletionRecord> {
        let Unit {
            prompt,
            set_index,
            seeds,
            ..
        } = self;
        completions
            .into_iter()
            .zip(seeds)
            .enumerate()
            .map(move |(replicate, (completion, seed))| CompletionRecord {
                prompt: prompt.to_string(),
                completion: completion.text,
                loss: completion.loss,
                replicate,
                is_modified: set_index.is_some(),
                intervention_index: set_index,
                seed,
            })
    }
}

/// Run every unit, keeping unit order in the output.
#[cfg(not(feature = "parallel"))]
fn run_units<M: SteerableModel + ?Sized>(model: &M, units: &[Unit<'_>]) -> Result<Vec<Vec<Completion>>> {
    units.iter().map(|unit| unit.run(model)).collect()
}

/// Run every unit on the rayon pool, keeping unit order in the output.
#[cfg(feature = "parallel")]
fn run_units<M: SteerableModel + ?Sized>(model: &M, units: &[Unit<'_>]) -> Result<Vec<Vec<Completion>>> {
    use rayon::prelude::*;

    units.par_iter().map(|unit| unit.run(model)).collect()
}

/// Flatten finished units into a table, in unit order.
fn assemble(
    units: Vec<Unit<'_>>,
    outputs: Vec<Vec<Completion>>,
    intervention_sets: Vec<Vec<SteeringSpec>>,
) -> ResultTable {
    let records = units
        .into_iter()
        .zip(outputs)
        .flat_map(|(unit, completions)| unit.into_records(completions))
        .collect();
    ResultTable::from_parts(records, intervention_sets)
}

/// Generate matched baseline and steered completions.
///
/// Returns `(normal, patched)`:
///
/// - `normal` has `prompts.len() * num_normal` rows, ordered by prompt then
///   replicate, generated with no intervention. It does not depend on
///   `intervention_sets` at all.
/// - `patched` has `prompts.len() * intervention_sets.len() * num_patched`
///   rows, ordered by prompt, then set, then replicate. All specs of a set
///   are active together; sets never interact.
///
/// Identical arguments produce identical tables. Empty `prompts` or
/// `intervention_sets` give empty tables, not an error.
///
/// # Errors
///
/// Propagates the first model error (e.g.
/// [`SweepError::InterventionSiteNotFound`]); returns
/// [`SweepError::ModelGeneration`] if the model returns the wrong number of
/// samples. No partial tables are returned.
pub fn evaluate<M, P>(
    model: &M,
    prompts: &[P],
    intervention_sets: &[Vec<SteeringSpec>],
    config: &EvalConfig,
) -> Result<(ResultTable, ResultTable)>
where
    M: SteerableModel + ?Sized,
    P: AsRef<str>,
{
    tracing::info!(
        prompts = prompts.len(),
        sets = intervention_sets.len(),
        num_normal = config.num_normal,
        num_patched = config.num_patched,
        seed = config.seed,
        "evaluating sweep"
    );

    let mut normal_units = Vec::with_capacity(prompts.len());
    let mut patched_units = Vec::with_capacity(prompts.len() * intervention_sets.len());
    for (p, prompt) in prompts.iter().enumerate() {
        let prompt = prompt.as_ref();
        normal_units.push(Unit {
            prompt,
            set_index: None,
            interventions: &[],
            seeds: (0..config.num_normal)
                .map(|replicate| SampleUnit::Baseline { prompt: p, replicate }.seed(config.seed))
                .collect(),
        });
        for (s, interventions) in intervention_sets.iter().enumerate() {
            patched_units.push(Unit {
                prompt,
                set_index: Some(s),
                interventions,
                seeds: (0..config.num_patched)
                    .map(|replicate| {
                        SampleUnit::Patched {
                            prompt: p,
                            set: s,
                            replicate,
                        }
                        .seed(config.seed)
                    })
                    .collect(),
            });
        }
    }

    let normal_out = run_units(model, &normal_units)?;
    let patched_out = run_units(model, &patched_units)?;

    let normal = assemble(normal_units, normal_out, Vec::new());
    let patched = assemble(patched_units, patched_out, intervention_sets.to_vec());
    tracing::info!(
        normal_rows = normal.len(),
        patched_rows = patched.len(),
        "sweep evaluated"
    );
    Ok((normal, patched))
}

/// [`evaluate`] every row of an expanded sweep; `intervention_index` in the
/// patched table is the sweep row index.
///
/// # Errors
///
/// Same as [`evaluate`].
pub fn evaluate_sweep<M, P>(
    model: &M,
    prompts: &[P],
    sweep: &SweepTable,
    config: &EvalConfig,
) -> Result<(ResultTable, ResultTable)>
where
    M: SteerableModel + ?Sized,
    P: AsRef<str>,
{
    evaluate(model, prompts, &sweep.intervention_sets(), config)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
