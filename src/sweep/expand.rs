// SPDX-License-Identifier: MIT OR Apache-2.0

//! Sweep expansion: phrase groups × activation sites × multipliers.

use crate::error::{Result, SweepError};
use crate::steering::PhraseGroup;

use super::table::{SweepRow, SweepTable};

/// Expand a compact sweep description into one row per grid point.
///
/// Iteration is an explicit nested loop: groups outermost, sites in the
/// middle, multipliers innermost. Every grid point yields a row, even when
/// two points produce identical specs; nothing is deduplicated.
///
/// ```
/// use candle_sweep::{PhraseGroup, SteeringSpec, sweep};
///
/// let groups = [PhraseGroup::from_pairs([("Good", 1.0), ("Bad", -1.0)])];
/// let table = sweep::expand(&groups, &["siteA"], &[1.0, 10.0]).unwrap();
/// assert_eq!(table.len(), 2);
/// assert_eq!(
///     table.get(1).unwrap().specs,
///     [SteeringSpec::new("Good", 10.0, "siteA"), SteeringSpec::new("Bad", -10.0, "siteA")]
/// );
/// ```
///
/// # Errors
///
/// Returns [`SweepError::InvalidSweepSpec`] if `groups`, `sites` or
/// `multipliers` is empty, if any group is empty, if a site name is empty,
/// or if a multiplier or base coefficient is not finite.
pub fn expand<S: AsRef<str>>(
    groups: &[PhraseGroup],
    sites: &[S],
    multipliers: &[f64],
) -> Result<SweepTable> {
    validate(groups, sites, multipliers)?;

    let shape = (groups.len(), sites.len(), multipliers.len());
    let mut rows = Vec::with_capacity(shape.0 * shape.1 * shape.2);
    for group in groups {
        for site in sites {
            let act_name = site.as_ref();
            for &multiplier in multipliers {
                rows.push(SweepRow {
                    specs: group.scaled(multiplier, act_name),
                    source_group: group.clone(),
                    act_name: act_name.to_string(),
                    multiplier,
                });
            }
        }
    }

    tracing::debug!(
        groups = shape.0,
        sites = shape.1,
        multipliers = shape.2,
        rows = rows.len(),
        "expanded sweep"
    );
    Ok(SweepTable::from_parts(rows, shape))
}

/// Reject empty or malformed axes before any row is built.
fn validate<S: AsRef<str>>(groups: &[PhraseGroup], sites: &[S], multipliers: &[f64]) -> Result<()> {
    if groups.is_empty() {
        return Err(SweepError::InvalidSweepSpec("no phrase groups".into()));
    }
    if sites.is_empty() {
        return Err(SweepError::InvalidSweepSpec("no activation sites".into()));
    }
    if multipliers.is_empty() {
        return Err(SweepError::InvalidSweepSpec("no scale multipliers".into()));
    }
    for (idx, group) in groups.iter().enumerate() {
        if group.is_empty() {
            return Err(SweepError::InvalidSweepSpec(format!(
                "phrase group {idx} is empty"
            )));
        }
        if let Some(pc) = group.iter().find(|pc| !pc.base_coeff.is_finite()) {
            return Err(SweepError::InvalidSweepSpec(format!(
                "phrase {:?} in group {idx} has non-finite coefficient {}",
                pc.text, pc.base_coeff
            )));
        }
    }
    if let Some(idx) = sites.iter().position(|s| s.as_ref().is_empty()) {
        return Err(SweepError::InvalidSweepSpec(format!(
            "activation site {idx} is an empty name"
        )));
    }
    if let Some(m) = multipliers.iter().find(|m| !m.is_finite()) {
        return Err(SweepError::InvalidSweepSpec(format!(
            "multiplier {m} is not finite"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
