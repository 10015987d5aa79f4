// SPDX-License-Identifier: MIT OR Apache-2.0

//! Hook system for activation capture and additive steering.
//!
//! Provides [`HookPoint`] (named locations in a forward pass),
//! [`HookSpec`] (what to capture and what to add where) and
//! [`HookCache`] (captured tensors from a forward pass).
//!
//! Activation sites travel through the sweep as plain strings; only the
//! model adapter parses them into [`HookPoint`]s.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use candle_core::Tensor;

use crate::error::{Result, SweepError};

// ---------------------------------------------------------------------------
// HookPoint
// ---------------------------------------------------------------------------

/// Named location in a forward pass where activations can be captured
/// or steering additions injected.
///
/// Mirrors the `TransformerLens` hook point naming convention via
/// [`Display`](std::fmt::Display) and [`FromStr`].
///
/// ```
/// use candle_sweep::HookPoint;
///
/// let hook = HookPoint::ResidPre(6);
/// assert_eq!(hook.to_string(), "blocks.6.hook_resid_pre");
///
/// let parsed: HookPoint = "blocks.6.hook_resid_pre".parse().unwrap();
/// assert_eq!(parsed, hook);
/// ```
///
/// Unknown strings parse as [`HookPoint::Custom`], so a backend can still
/// accept (or reject) sites outside the standard naming scheme.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HookPoint {
    /// After token embedding (`hook_embed`).
    Embed,
    /// Residual stream before layer `i` (`blocks.{i}.hook_resid_pre`).
    ResidPre(usize),
    /// Attention output in layer `i` (`blocks.{i}.hook_attn_out`).
    AttnOut(usize),
    /// Residual stream between attention and MLP in layer `i`
    /// (`blocks.{i}.hook_resid_mid`).
    ResidMid(usize),
    /// MLP output in layer `i` (`blocks.{i}.hook_mlp_out`).
    MlpOut(usize),
    /// Residual stream after full layer `i` (`blocks.{i}.hook_resid_post`).
    ResidPost(usize),
    /// After final layer norm (`hook_final_norm`).
    FinalNorm,
    /// Backend-specific hook point not covered by the standard enum.
    Custom(String),
}

impl HookPoint {
    /// Layer index for per-layer hook points, `None` otherwise.
    #[must_use]
    pub const fn layer(&self) -> Option<usize> {
        match self {
            Self::ResidPre(i)
            | Self::AttnOut(i)
            | Self::ResidMid(i)
            | Self::MlpOut(i)
            | Self::ResidPost(i) => Some(*i),
            Self::Embed | Self::FinalNorm | Self::Custom(_) => None,
        }
    }
}

impl fmt::Display for HookPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Embed => write!(f, "hook_embed"),
            Self::ResidPre(i) => write!(f, "blocks.{i}.hook_resid_pre"),
            Self::AttnOut(i) => write!(f, "blocks.{i}.hook_attn_out"),
            Self::ResidMid(i) => write!(f, "blocks.{i}.hook_resid_mid"),
            Self::MlpOut(i) => write!(f, "blocks.{i}.hook_mlp_out"),
            Self::ResidPost(i) => write!(f, "blocks.{i}.hook_resid_post"),
            Self::FinalNorm => write!(f, "hook_final_norm"),
            Self::Custom(s) => write!(f, "{s}"),
        }
    }
}

/// Parse a `TransformerLens`-style string into a [`HookPoint`].
///
/// Unknown strings produce [`HookPoint::Custom`] rather than an error.
impl FromStr for HookPoint {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(parse_hook_string(s))
    }
}

impl From<&str> for HookPoint {
    fn from(s: &str) -> Self {
        parse_hook_string(s)
    }
}

/// Parse a hook string, falling back to [`HookPoint::Custom`] for unknown patterns.
fn parse_hook_string(s: &str) -> HookPoint {
    match s {
        "hook_embed" => return HookPoint::Embed,
        "hook_final_norm" => return HookPoint::FinalNorm,
        _ => {}
    }

    if let Some(rest) = s.strip_prefix("blocks.") {
        if let Some((layer_str, suffix)) = rest.split_once('.') {
            if let Ok(layer) = layer_str.parse::<usize>() {
                return match suffix {
                    "hook_resid_pre" => HookPoint::ResidPre(layer),
                    "hook_attn_out" => HookPoint::AttnOut(layer),
                    "hook_resid_mid" => HookPoint::ResidMid(layer),
                    "hook_mlp_out" => HookPoint::MlpOut(layer),
                    "hook_resid_post" => HookPoint::ResidPost(layer),
                    _ => HookPoint::Custom(s.to_string()),
                };
            }
        }
    }

    HookPoint::Custom(s.to_string())
}

/// Name of the residual stream entering block `layer`.
///
/// This is the default injection site for activation additions.
///
/// ```
/// assert_eq!(candle_sweep::block_name(7), "blocks.7.hook_resid_pre");
/// ```
#[must_use]
pub fn block_name(layer: usize) -> String {
    HookPoint::ResidPre(layer).to_string()
}

// ---------------------------------------------------------------------------
// HookSpec
// ---------------------------------------------------------------------------

/// Declares which activations to capture and which additions to inject.
///
/// Passed to [`SteerBackend::forward`](crate::SteerBackend::forward).
///
/// ```
/// use candle_sweep::{HookPoint, HookSpec};
///
/// let mut hooks = HookSpec::new();
/// hooks.capture(HookPoint::ResidPre(2))
///      .capture("blocks.3.hook_resid_post");
/// assert_eq!(hooks.num_captures(), 2);
/// ```
#[derive(Debug, Clone, Default)]
pub struct HookSpec {
    /// Hook points to capture during the forward pass.
    captures: HashSet<HookPoint>,
    /// Additive tensors to inject, stored as (`hook_point`, delta) pairs.
    additions: Vec<(HookPoint, Tensor)>,
}

impl HookSpec {
    /// Create an empty hook specification.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request capture of the activation at the given hook point.
    pub fn capture<H: Into<HookPoint>>(&mut self, hook: H) -> &mut Self {
        self.captures.insert(hook.into());
        self
    }

    /// Register an additive injection at the given hook point.
    ///
    /// `delta` must broadcast against the activation at that point
    /// (typically `[batch, seq, hidden]`).
    pub fn add<H: Into<HookPoint>>(&mut self, hook: H, delta: Tensor) -> &mut Self {
        self.additions.push((hook.into(), delta));
        self
    }

    /// Check whether a specific hook point should be captured.
    #[must_use]
    pub fn is_captured(&self, hook: &HookPoint) -> bool {
        self.captures.contains(hook)
    }

    /// Check whether this spec has no captures and no additions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.captures.is_empty() && self.additions.is_empty()
    }

    /// Number of requested captures.
    #[must_use]
    pub fn num_captures(&self) -> usize {
        self.captures.len()
    }

    /// Number of registered additions.
    #[must_use]
    pub const fn num_additions(&self) -> usize {
        self.additions.len()
    }

    /// Iterate over additions registered at a specific hook point.
    pub fn additions_at(&self, hook: &HookPoint) -> impl Iterator<Item = &Tensor> {
        self.additions
            .iter()
            .filter(move |(h, _)| h == hook)
            .map(|(_, delta)| delta)
    }

    /// Check whether any addition targets the given hook point.
    #[must_use]
    pub fn has_addition_at(&self, hook: &HookPoint) -> bool {
        self.additions.iter().any(|(h, _)| h == hook)
    }
}

/// Apply every addition registered at `hook` to `tensor`.
///
/// Backends call this at each hook point after any capture, so captured
/// activations are always the clean ones.
///
/// # Shapes
/// - `tensor`: `[batch, seq, hidden]`
/// - returns: same shape as `tensor`
///
/// # Errors
///
/// Returns [`SweepError::Model`] if a delta does not broadcast.
pub fn apply_additions(tensor: &Tensor, hooks: &HookSpec, hook: &HookPoint) -> Result<Tensor> {
    let mut out = tensor.clone();
    for delta in hooks.additions_at(hook) {
        out = out.broadcast_add(delta)?;
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// HookCache
// ---------------------------------------------------------------------------

/// Tensors captured during a forward pass, plus the output logits.
///
/// Returned by [`SteerBackend::forward`](crate::SteerBackend::forward).
#[derive(Debug)]
pub struct HookCache {
    /// Output tensor from the forward pass (logits).
    output: Tensor,
    /// Captured activations keyed by hook point.
    captures: HashMap<HookPoint, Tensor>,
}

impl HookCache {
    /// Create a new cache with the given output tensor and no captures.
    #[must_use]
    pub fn new(output: Tensor) -> Self {
        Self {
            output,
            captures: HashMap::new(),
        }
    }

    /// The output tensor from the forward pass.
    #[must_use]
    pub const fn output(&self) -> &Tensor {
        &self.output
    }

    /// Retrieve a captured tensor by hook point.
    #[must_use]
    pub fn get(&self, hook: &HookPoint) -> Option<&Tensor> {
        self.captures.get(hook)
    }

    /// Retrieve a captured tensor, returning an error if not found.
    ///
    /// # Errors
    ///
    /// Returns [`SweepError::Hook`] if the hook point was not captured.
    pub fn require(&self, hook: &HookPoint) -> Result<&Tensor> {
        self.captures
            .get(hook)
            .ok_or_else(|| SweepError::Hook(format!("hook point `{hook}` was not captured")))
    }

    /// Store a captured activation. Called by backend implementations.
    pub fn store(&mut self, hook: HookPoint, tensor: Tensor) {
        self.captures.insert(hook, tensor);
    }

    /// Replace the output tensor once the final logits are known.
    pub fn set_output(&mut self, output: Tensor) {
        self.output = output;
    }

    /// Number of captured tensors (excludes the output).
    #[must_use]
    pub fn num_captures(&self) -> usize {
        self.captures.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
