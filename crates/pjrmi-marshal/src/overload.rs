//! Overload resolution (spec.md §4.4).
//!
//! This module only runs the five-step algorithm over fits the caller has
//! already computed; it never marshals an argument itself; that keeps it
//! usable for both method and constructor resolution without depending on
//! the concrete [`crate::marshal::Marshaller`].

use pjrmi_core::{CallableDescriptor, Specificity, SpecificityMatrix};

/// How one argument fit against one candidate's declared parameter type.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgumentFit {
    /// Marshals with no loss of information.
    Exact,
    /// Marshals, but only via a narrowing that loses precision.
    PrecisionLoss,
    /// Does not marshal at all, with a human-readable reason.
    Incompatible(String),
}

/// A candidate and how each of its declared parameters fit the supplied
/// arguments, along with its position in the type's overload list (which
/// must match `specificity`'s row/column indices).
#[derive(Debug, Clone)]
pub struct CandidateFit<'a> {
    /// Index within the overload list / specificity matrix.
    pub index: usize,
    /// The candidate itself.
    pub candidate: &'a CallableDescriptor,
    /// Per-argument fit, same order as `candidate.argument_type_ids`.
    pub argument_fits: Vec<ArgumentFit>,
}

impl CandidateFit<'_> {
    fn is_compatible(&self) -> bool {
        self.argument_fits.iter().all(|fit| !matches!(fit, ArgumentFit::Incompatible(_)))
    }

    fn has_precision_loss(&self) -> bool {
        self.argument_fits.iter().any(|fit| matches!(fit, ArgumentFit::PrecisionLoss))
    }
}

/// Outcome of running overload resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionOutcome {
    /// Exactly one candidate survived; here is its index.
    Resolved(usize),
    /// No candidate survived; here are the rejected candidates' signatures.
    NoMatch(Vec<String>),
    /// More than one candidate survived; here are their signatures.
    Ambiguous(Vec<String>),
}

/// Runs the five-step algorithm from spec.md §4.4 given the already-
/// computed [`CandidateFit`]s for every candidate of the right arity that
/// is not marked explicit-only and is kwargs-compatible (steps 1 and 2 are
/// the caller's job, since they only need the descriptor, not a fit
/// attempt).
#[must_use]
pub fn resolve(name: &str, fits: Vec<CandidateFit<'_>>, specificity: &SpecificityMatrix) -> ResolutionOutcome {
    let survivors: Vec<&CandidateFit<'_>> = fits.iter().filter(|f| f.is_compatible()).collect();

    if survivors.is_empty() {
        let signatures = fits.iter().map(|f| f.candidate.signature(name)).collect();
        return ResolutionOutcome::NoMatch(signatures);
    }

    let mut working_set: Vec<&CandidateFit<'_>> = Vec::new();
    for candidate in survivors {
        let dominated_by_existing = working_set
            .iter()
            .any(|existing| more_specific(specificity, existing.index, candidate.index));
        if dominated_by_existing {
            continue;
        }
        working_set.retain(|existing| !more_specific(specificity, candidate.index, existing.index));
        working_set.push(candidate);
    }

    // Step 5: prefer lossless candidates over precision-loss ones, but
    // only once both are present in the working set.
    if working_set.iter().any(|c| !c.has_precision_loss()) {
        working_set.retain(|c| !c.has_precision_loss());
    }

    match working_set.len() {
        0 => ResolutionOutcome::NoMatch(fits.iter().map(|f| f.candidate.signature(name)).collect()),
        1 => ResolutionOutcome::Resolved(working_set[0].index),
        _ => {
            ResolutionOutcome::Ambiguous(working_set.iter().map(|c| c.candidate.signature(name)).collect())
        }
    }
}

fn more_specific(matrix: &SpecificityMatrix, a: usize, b: usize) -> bool {
    if a >= matrix.len() || b >= matrix.len() {
        return false;
    }
    matches!(matrix.get(a, b), Specificity::MoreSpecific)
}
