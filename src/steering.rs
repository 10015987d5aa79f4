// SPDX-License-Identifier: MIT OR Apache-2.0

//! Steering values: weighted phrases and the activation additions they
//! describe.
//!
//! A [`SteeringSpec`] says "run a forward pass over `prompt`, take the
//! activations at `act_name`, multiply by `coeff` and add them to the
//! residual stream of whatever is being generated". This module only
//! constructs and compares these values; the generator turns them into
//! tensors.

use serde::{Deserialize, Serialize};

/// A phrase with its unscaled coefficient.
///
/// Serialises as a `[text, base_coeff]` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "(String, f64)", into = "(String, f64)")]
pub struct PhraseCoeff {
    /// Phrase whose activations are added.
    pub text: String,
    /// Coefficient before any sweep multiplier is applied.
    pub base_coeff: f64,
}

impl PhraseCoeff {
    /// Create a phrase/coefficient pair.
    pub fn new(text: impl Into<String>, base_coeff: f64) -> Self {
        Self {
            text: text.into(),
            base_coeff,
        }
    }
}

impl From<(String, f64)> for PhraseCoeff {
    fn from((text, base_coeff): (String, f64)) -> Self {
        Self { text, base_coeff }
    }
}

impl From<(&str, f64)> for PhraseCoeff {
    fn from((text, base_coeff): (&str, f64)) -> Self {
        Self::new(text, base_coeff)
    }
}

impl From<PhraseCoeff> for (String, f64) {
    fn from(pc: PhraseCoeff) -> Self {
        (pc.text, pc.base_coeff)
    }
}

/// Ordered phrases that share one scaling axis, e.g. an opposed
/// `("Love", 1.0), ("Hate", -1.0)` pair.
///
/// ```
/// use candle_sweep::PhraseGroup;
///
/// let group = PhraseGroup::from_pairs([("Love", 1.0), ("Hate", -1.0)]);
/// let specs = group.scaled(5.0, "blocks.6.hook_resid_pre");
/// assert_eq!(specs[1].coeff, -5.0);
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhraseGroup(Vec<PhraseCoeff>);

impl PhraseGroup {
    /// Wrap an ordered list of phrases.
    #[must_use]
    pub const fn new(phrases: Vec<PhraseCoeff>) -> Self {
        Self(phrases)
    }

    /// Build a group from `(text, base_coeff)` pairs.
    pub fn from_pairs<I, P>(pairs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PhraseCoeff>,
    {
        Self::new(pairs.into_iter().map(Into::into).collect())
    }

    /// Number of phrases.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the group has no phrases.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over the phrases in order.
    pub fn iter(&self) -> std::slice::Iter<'_, PhraseCoeff> {
        self.0.iter()
    }

    /// One [`SteeringSpec`] per phrase, in order, with
    /// `coeff = base_coeff * multiplier` at `act_name`.
    #[must_use]
    pub fn scaled(&self, multiplier: f64, act_name: &str) -> Vec<SteeringSpec> {
        self.0
            .iter()
            .map(|pc| SteeringSpec::new(pc.text.as_str(), pc.base_coeff * multiplier, act_name))
            .collect()
    }
}

impl<'a> IntoIterator for &'a PhraseGroup {
    type Item = &'a PhraseCoeff;
    type IntoIter = std::slice::Iter<'a, PhraseCoeff>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// One weighted prompt activation at one site (a "rich prompt").
///
/// Equality is structural over all three fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SteeringSpec {
    /// Text whose activations are added.
    pub prompt: String,
    /// Scale applied to those activations.
    pub coeff: f64,
    /// Hook name where the activations are read and injected.
    pub act_name: String,
}

impl SteeringSpec {
    /// Create a steering spec.
    pub fn new(prompt: impl Into<String>, coeff: f64, act_name: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            coeff,
            act_name: act_name.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
