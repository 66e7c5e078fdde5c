//! Seam to the backend collaborators.
//!
//! Handlers reach the analytical backend only through [`DashboardBackend`].
//! Every method returns a boxed future that may reject with a
//! [`BackendError`]; handlers convert rejections into `PROTOCOL_ERROR`
//! failures.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::document::{FilterContext, FilterView};
use crate::error::BackendError;
use crate::refs::ObjRef;

/// Boxed future returned by collaborator calls.
pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, BackendError>> + Send + 'a>>;

/// Batch reference resolution.
///
/// Implementations must be order-preserving and return exactly one output
/// per input. Already-concrete references are passed through unchanged.
pub trait RefResolver: Send + Sync {
    fn resolve_many<'a>(&'a self, refs: &'a [ObjRef]) -> BackendFuture<'a, Vec<ObjRef>>;
}

/// Definition of a filter view that does not exist on the backend yet.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterViewDefinition {
    pub name: String,
    pub is_default: bool,
    /// Sanitized: contains concrete references only.
    pub filter_context: FilterContext,
}

/// Everything the command handlers need from the backend.
pub trait DashboardBackend: RefResolver {
    /// For each input reference, whether the insight exists.
    fn insights_exist<'a>(&'a self, insights: &'a [ObjRef]) -> BackendFuture<'a, Vec<bool>>;

    fn create_filter_view<'a>(
        &'a self,
        definition: FilterViewDefinition,
    ) -> BackendFuture<'a, FilterView>;

    fn delete_filter_view<'a>(&'a self, filter_view: &'a ObjRef) -> BackendFuture<'a, ()>;

    fn set_filter_view_default<'a>(
        &'a self,
        filter_view: &'a ObjRef,
        is_default: bool,
    ) -> BackendFuture<'a, ()>;
}

/// In-process backend keeping everything in memory.
///
/// Identifiers resolve to `/gdc/md/<id>`. Useful for offline sessions and
/// tests; individual operations can be made to fail with
/// [`fail_next`](InMemoryBackend::fail_next).
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    insights: Mutex<HashSet<ObjRef>>,
    filter_views: Mutex<HashMap<ObjRef, FilterView>>,
    fail_next: Mutex<Option<BackendError>>,
    resolve_calls: AtomicUsize,
    next_id: AtomicUsize,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register insights that `insights_exist` will report as present.
    pub fn with_insights(self, insights: impl IntoIterator<Item = ObjRef>) -> Self {
        if let Ok(mut known) = self.insights.lock() {
            known.extend(insights);
        }
        self
    }

    /// Make the next backend call reject with `error`.
    pub fn fail_next(&self, error: BackendError) {
        if let Ok(mut slot) = self.fail_next.lock() {
            *slot = Some(error);
        }
    }

    /// Number of `resolve_many` calls made so far.
    pub fn resolve_calls(&self) -> usize {
        self.resolve_calls.load(Ordering::SeqCst)
    }

    /// Filter views currently stored.
    pub fn filter_views(&self) -> Vec<FilterView> {
        self.filter_views
            .lock()
            .map(|views| views.values().cloned().collect())
            .unwrap_or_default()
    }

    fn take_failure(&self) -> Result<(), BackendError> {
        match self.fail_next.lock() {
            Ok(mut slot) => slot.take().map_or(Ok(()), Err),
            Err(_) => Err(BackendError::Failed("backend state poisoned".into())),
        }
    }

    fn concrete(r: &ObjRef) -> ObjRef {
        match r {
            ObjRef::Identifier(id) => ObjRef::Uri(format!("/gdc/md/{id}")),
            ObjRef::Uri(_) => r.clone(),
        }
    }
}

impl RefResolver for InMemoryBackend {
    fn resolve_many<'a>(&'a self, refs: &'a [ObjRef]) -> BackendFuture<'a, Vec<ObjRef>> {
        Box::pin(async move {
            self.resolve_calls.fetch_add(1, Ordering::SeqCst);
            self.take_failure()?;
            Ok(refs.iter().map(Self::concrete).collect())
        })
    }
}

impl DashboardBackend for InMemoryBackend {
    fn insights_exist<'a>(&'a self, insights: &'a [ObjRef]) -> BackendFuture<'a, Vec<bool>> {
        Box::pin(async move {
            self.take_failure()?;
            let known = self
                .insights
                .lock()
                .map_err(|_| BackendError::Failed("backend state poisoned".into()))?;
            Ok(insights
                .iter()
                .map(|r| known.contains(r) || known.contains(&Self::concrete(r)))
                .collect())
        })
    }

    fn create_filter_view<'a>(
        &'a self,
        definition: FilterViewDefinition,
    ) -> BackendFuture<'a, FilterView> {
        Box::pin(async move {
            self.take_failure()?;
            let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            let view = FilterView {
                filter_view_ref: ObjRef::Uri(format!("/gdc/md/filterView/{n}")),
                name: definition.name,
                is_default: definition.is_default,
                filter_context: definition.filter_context,
            };
            let mut views = self
                .filter_views
                .lock()
                .map_err(|_| BackendError::Failed("backend state poisoned".into()))?;
            if view.is_default {
                views.values_mut().for_each(|v| v.is_default = false);
            }
            views.insert(view.filter_view_ref.clone(), view.clone());
            Ok(view)
        })
    }

    fn delete_filter_view<'a>(&'a self, filter_view: &'a ObjRef) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            self.take_failure()?;
            let mut views = self
                .filter_views
                .lock()
                .map_err(|_| BackendError::Failed("backend state poisoned".into()))?;
            views
                .remove(filter_view)
                .map(|_| ())
                .ok_or_else(|| BackendError::NotFound(filter_view.to_string()))
        })
    }

    fn set_filter_view_default<'a>(
        &'a self,
        filter_view: &'a ObjRef,
        is_default: bool,
    ) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            self.take_failure()?;
            let mut views = self
                .filter_views
                .lock()
                .map_err(|_| BackendError::Failed("backend state poisoned".into()))?;
            if !views.contains_key(filter_view) {
                return Err(BackendError::NotFound(filter_view.to_string()));
            }
            for (key, view) in views.iter_mut() {
                if key == filter_view {
                    view.is_default = is_default;
                } else if is_default {
                    view.is_default = false;
                }
            }
            Ok(())
        })
    }
}
