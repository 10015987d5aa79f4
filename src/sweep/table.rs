// SPDX-License-Identifier: MIT OR Apache-2.0

//! Ordered-row tables produced by the expander and the evaluator.

use serde::Serialize;

use crate::steering::{PhraseGroup, SteeringSpec};

// ---------------------------------------------------------------------------
// SweepTable
// ---------------------------------------------------------------------------

/// One grid point of a sweep.
///
/// `specs[i]` is `source_group[i]` scaled by `multiplier` at `act_name`,
/// so both the applied multiplier and the resulting per-phrase
/// coefficients can be read off one row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepRow {
    /// Interventions to apply together.
    pub specs: Vec<SteeringSpec>,
    /// The unscaled group the specs came from.
    pub source_group: PhraseGroup,
    /// Activation site shared by all specs in the row.
    pub act_name: String,
    /// Multiplier applied to every base coefficient.
    pub multiplier: f64,
}

/// Rows of an expanded sweep, in group → site → multiplier order.
///
/// Row order is part of the contract: the row for group `g`, site `s` and
/// multiplier `m` sits at `(g * n_sites + s) * n_multipliers + m`
/// (see [`row_index`](Self::row_index)).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepTable {
    rows: Vec<SweepRow>,
    /// Axis lengths `(groups, sites, multipliers)`.
    shape: (usize, usize, usize),
}

impl SweepTable {
    /// Assemble a table whose rows are already in grid order.
    pub(crate) const fn from_parts(rows: Vec<SweepRow>, shape: (usize, usize, usize)) -> Self {
        Self { rows, shape }
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table has no rows. Never true for an expanded sweep.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Axis lengths `(groups, sites, multipliers)`.
    #[must_use]
    pub const fn shape(&self) -> (usize, usize, usize) {
        self.shape
    }

    /// All rows in grid order.
    #[must_use]
    pub fn rows(&self) -> &[SweepRow] {
        &self.rows
    }

    /// Row at position `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&SweepRow> {
        self.rows.get(index)
    }

    /// Iterate over rows in grid order.
    pub fn iter(&self) -> std::slice::Iter<'_, SweepRow> {
        self.rows.iter()
    }

    /// Position of the row for `(group, site, multiplier)` axis indices, or
    /// `None` if any index is out of range.
    #[must_use]
    pub const fn row_index(&self, group: usize, site: usize, multiplier: usize) -> Option<usize> {
        let (n_groups, n_sites, n_multipliers) = self.shape;
        if group >= n_groups || site >= n_sites || multiplier >= n_multipliers {
            return None;
        }
        Some((group * n_sites + site) * n_multipliers + multiplier)
    }

    /// Rows injecting at `act_name`, in grid order.
    pub fn rows_for_site<'a>(&'a self, act_name: &'a str) -> impl Iterator<Item = &'a SweepRow> {
        self.rows.iter().filter(move |row| row.act_name == act_name)
    }

    /// The `specs` column, one intervention set per row, ready for
    /// [`evaluate`](crate::sweep::evaluate).
    #[must_use]
    pub fn intervention_sets(&self) -> Vec<Vec<SteeringSpec>> {
        self.rows.iter().map(|row| row.specs.clone()).collect()
    }
}

impl<'a> IntoIterator for &'a SweepTable {
    type Item = &'a SweepRow;
    type IntoIter = std::slice::Iter<'a, SweepRow>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

// ---------------------------------------------------------------------------
// ResultTable
// ---------------------------------------------------------------------------

/// One sampled completion with its provenance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRecord {
    /// The prompt that was completed.
    pub prompt: String,
    /// Generated continuation.
    pub completion: String,
    /// Mean per-token loss reported by the model, if any.
    pub loss: Option<f32>,
    /// Replicate number within its `(prompt[, set])` group.
    pub replicate: usize,
    /// `true` for rows generated with an intervention set active.
    pub is_modified: bool,
    /// Index into the evaluated intervention sets (patched rows only).
    pub intervention_index: Option<usize>,
    /// Derived seed the sample was drawn with.
    pub seed: u64,
}

/// Ordered completions from one side of an evaluation.
///
/// The patched table also keeps the intervention sets it was generated
/// from, so [`specs_for`](Self::specs_for) can join a record back to its
/// steering values.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ResultTable {
    records: Vec<CompletionRecord>,
    intervention_sets: Vec<Vec<SteeringSpec>>,
}

impl ResultTable {
    /// Assemble a table from records already in row order.
    pub(crate) const fn from_parts(
        records: Vec<CompletionRecord>,
        intervention_sets: Vec<Vec<SteeringSpec>>,
    ) -> Self {
        Self {
            records,
            intervention_sets,
        }
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the table has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// All rows in order.
    #[must_use]
    pub fn records(&self) -> &[CompletionRecord] {
        &self.records
    }

    /// Iterate over rows in order.
    pub fn iter(&self) -> std::slice::Iter<'_, CompletionRecord> {
        self.records.iter()
    }

    /// Intervention sets referenced by `intervention_index`.
    #[must_use]
    pub fn intervention_sets(&self) -> &[Vec<SteeringSpec>] {
        &self.intervention_sets
    }

    /// The steering values that produced `record`, or `None` for a
    /// baseline row.
    #[must_use]
    pub fn specs_for(&self, record: &CompletionRecord) -> Option<&[SteeringSpec]> {
        record
            .intervention_index
            .and_then(|idx| self.intervention_sets.get(idx))
            .map(Vec::as_slice)
    }

    /// Rows for one prompt, in order.
    pub fn for_prompt<'a>(&'a self, prompt: &'a str) -> impl Iterator<Item = &'a CompletionRecord> {
        self.records.iter().filter(move |r| r.prompt == prompt)
    }

    /// Rows generated under intervention set `index`, in order.
    pub fn for_intervention(&self, index: usize) -> impl Iterator<Item = &CompletionRecord> {
        self.records
            .iter()
            .filter(move |r| r.intervention_index == Some(index))
    }
}

impl<'a> IntoIterator for &'a ResultTable {
    type Item = &'a CompletionRecord;
    type IntoIter = std::slice::Iter<'a, CompletionRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
