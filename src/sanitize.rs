//! Filter context sanitization: rewrite every object reference into its
//! concrete form using a single batched resolver call.
//!
//! The collect and rewrite phases walk the filter context in the same
//! order. Rewritten references are matched to resolver output by the
//! address of the original reference, not by value, so two equal but
//! distinct references resolve independently.

use std::collections::HashMap;

use crate::backend::RefResolver;
use crate::document::{
    AttributeFilter, AttributeFilterParent, DateFilter, FilterContext, FilterContextItem,
};
use crate::error::{BackendError, CommandError};
use crate::refs::ObjRef;

/// Error returned by [`sanitize_filter_context`].
#[derive(Debug, thiserror::Error)]
pub enum SanitizeError {
    /// The resolver rejected the batch.
    #[error("reference resolution failed: {0}")]
    Resolution(#[source] BackendError),

    /// The resolver broke the one-output-per-input contract.
    #[error("resolver returned {actual} references for {expected} inputs")]
    CountMismatch { expected: usize, actual: usize },

    /// A reference seen during rewrite was never collected.
    #[error("no resolved counterpart for reference {0}")]
    UnmatchedReference(ObjRef),
}

impl From<SanitizeError> for CommandError {
    fn from(err: SanitizeError) -> Self {
        match err {
            SanitizeError::Resolution(source) => {
                CommandError::protocol("failed to resolve filter references", source)
            }
            other => CommandError::invariant(other.to_string()),
        }
    }
}

/// Produce an equivalent filter context containing concrete references only.
///
/// An empty filter context is returned as-is without calling the resolver.
/// Filter count and order are always preserved.
///
/// # Errors
///
/// * [`SanitizeError::Resolution`] - the resolver rejected the batch.
/// * [`SanitizeError::CountMismatch`] / [`SanitizeError::UnmatchedReference`] -
///   the collect and rewrite phases fell out of lockstep.
pub async fn sanitize_filter_context<R>(
    filter_context: &FilterContext,
    resolver: &R,
) -> Result<FilterContext, SanitizeError>
where
    R: RefResolver + ?Sized,
{
    if filter_context.filters.is_empty() {
        return Ok(filter_context.clone());
    }

    let originals = collect_refs(filter_context);
    let batch: Vec<ObjRef> = originals.iter().map(|r| (*r).clone()).collect();
    let resolved = resolver
        .resolve_many(&batch)
        .await
        .map_err(SanitizeError::Resolution)?;

    if resolved.len() != originals.len() {
        return Err(SanitizeError::CountMismatch {
            expected: originals.len(),
            actual: resolved.len(),
        });
    }

    let pairs: HashMap<usize, ObjRef> = originals
        .into_iter()
        .map(address_of)
        .zip(resolved)
        .collect();
    let lookup = |r: &ObjRef| -> Result<ObjRef, SanitizeError> {
        pairs
            .get(&address_of(r))
            .cloned()
            .ok_or_else(|| SanitizeError::UnmatchedReference(r.clone()))
    };

    let filters = filter_context
        .filters
        .iter()
        .map(|item| rewrite_item(item, &lookup))
        .collect::<Result<Vec<_>, _>>()?;

    tracing::debug!(filters = filters.len(), "filter context sanitized");
    Ok(FilterContext::new(filters))
}

fn address_of(r: &ObjRef) -> usize {
    r as *const ObjRef as usize
}

/// Every reference in the filter context, in document order, duplicates kept.
fn collect_refs(filter_context: &FilterContext) -> Vec<&ObjRef> {
    let mut refs = Vec::new();
    for item in &filter_context.filters {
        match item {
            FilterContextItem::Attribute(f) => {
                refs.push(&f.display_form);
                for parent in &f.parents {
                    refs.extend(parent.over.iter());
                }
            }
            FilterContextItem::Date(f) => {
                if let Some(data_set) = &f.data_set {
                    refs.push(data_set);
                }
            }
        }
    }
    refs
}

fn rewrite_item<F>(item: &FilterContextItem, lookup: &F) -> Result<FilterContextItem, SanitizeError>
where
    F: Fn(&ObjRef) -> Result<ObjRef, SanitizeError>,
{
    Ok(match item {
        FilterContextItem::Attribute(f) => FilterContextItem::Attribute(AttributeFilter {
            display_form: lookup(&f.display_form)?,
            parents: f
                .parents
                .iter()
                .map(|p| {
                    Ok(AttributeFilterParent {
                        filter_local_identifier: p.filter_local_identifier.clone(),
                        over: p.over.iter().map(lookup).collect::<Result<_, _>>()?,
                    })
                })
                .collect::<Result<_, SanitizeError>>()?,
            ..f.clone()
        }),
        FilterContextItem::Date(f) => FilterContextItem::Date(DateFilter {
            data_set: f.data_set.as_ref().map(lookup).transpose()?,
            ..f.clone()
        }),
    })
}
