//! Shared document store.
//!
//! Holds the current [`DashboardDocument`] as an `Arc` inside a tokio
//! `watch` channel. Mutations are pure functions from the current document
//! to its replacement; the new value is swapped in whole, so readers see
//! either the old or the new document and never anything in between.
//!
//! The store expects a single writer: the dispatcher actor. Readers may
//! live anywhere and may hold on to an `Arc` snapshot as long as they like.

use std::convert::Infallible;
use std::sync::Arc;

use tokio::sync::watch;

use crate::document::DashboardDocument;

/// Versioned, replace-on-write holder of the dashboard document.
///
/// `Clone` is cheap; all clones share the same document.
#[derive(Debug, Clone)]
pub struct DocumentStore {
    tx: Arc<watch::Sender<Arc<DashboardDocument>>>,
}

impl DocumentStore {
    /// Create a store holding `initial`.
    pub fn new(initial: DashboardDocument) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(initial));
        Self { tx: Arc::new(tx) }
    }

    /// Snapshot of the current document.
    pub fn get_state(&self) -> Arc<DashboardDocument> {
        self.tx.borrow().clone()
    }

    /// Run a selector against the current document.
    ///
    /// The selector runs while the channel's read lock is held, so it must
    /// not call back into the store.
    pub fn select<T>(&self, selector: impl FnOnce(&DashboardDocument) -> T) -> T {
        selector(&self.tx.borrow())
    }

    /// Apply a pure mutation and swap in its result.
    ///
    /// The version of the returned document is always one greater than the
    /// version it was computed from.
    pub fn dispatch<F>(&self, mutation: F) -> Arc<DashboardDocument>
    where
        F: FnOnce(&DashboardDocument) -> DashboardDocument,
    {
        match self.try_dispatch(|doc| Ok::<_, Infallible>(mutation(doc))) {
            Ok(doc) => doc,
            Err(never) => match never {},
        }
    }

    /// Apply a fallible mutation; on `Err` the store is left unmodified.
    ///
    /// # Errors
    ///
    /// Returns whatever error `mutation` returns.
    pub fn try_dispatch<F, E>(&self, mutation: F) -> Result<Arc<DashboardDocument>, E>
    where
        F: FnOnce(&DashboardDocument) -> Result<DashboardDocument, E>,
    {
        let current = self.get_state();
        let mut next = mutation(&current)?;
        next.version = current.version + 1;
        let next = Arc::new(next);
        self.tx.send_replace(Arc::clone(&next));
        tracing::trace!(version = next.version, "document replaced");
        Ok(next)
    }

    /// Subscribe to document replacements.
    pub fn subscribe(&self) -> watch::Receiver<Arc<DashboardDocument>> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Layout, LayoutSection};

    #[test]
    fn dispatch_bumps_version_and_replaces_value() {
        let store = DocumentStore::new(DashboardDocument::new("sales"));
        let before = store.get_state();

        let after = store.dispatch(|doc| {
            let mut next = doc.clone();
            next.title = "revenue".into();
            next
        });

        assert_eq!(after.version, before.version + 1);
        assert_eq!(store.get_state().title, "revenue");
        // The old snapshot is untouched.
        assert_eq!(before.title, "sales");
    }

    #[test]
    fn failed_mutation_leaves_store_unmodified() {
        let store = DocumentStore::new(DashboardDocument::new("sales"));
        let before = store.get_state();

        let result: Result<_, &str> = store.try_dispatch(|_| Err("nope"));

        assert_eq!(result.unwrap_err(), "nope");
        assert_eq!(*store.get_state(), *before);
    }

    #[test]
    fn select_reads_current_document() {
        let store = DocumentStore::new(
            DashboardDocument::new("d").with_layout(Layout::new(vec![LayoutSection::default()])),
        );
        assert_eq!(store.select(|doc| doc.layout.sections.len()), 1);
    }

    #[tokio::test]
    async fn subscribers_observe_replacement() {
        let store = DocumentStore::new(DashboardDocument::new("d"));
        let mut rx = store.subscribe();

        store.dispatch(|doc| doc.clone());

        rx.changed().await.expect("sender alive");
        assert_eq!(rx.borrow().version, 1);
    }
}
