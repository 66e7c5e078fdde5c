//! Bounded undo/redo history for structural layout edits.
//!
//! Structural handlers are wrapped with [`HistoryManager::wrap`]. The
//! wrapper snapshots the layout subtree a command targets before the
//! handler runs and records it when the handler succeeds and the subtree
//! actually changed. Undo and redo restore snapshots by whole-subtree
//! replacement through the [`DocumentStore`], so restoring never records a
//! new entry.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::command::{CommandTag, DashboardCommand};
use crate::dispatcher::{CommandHandler, HandlerContext, HandlerFuture};
use crate::document::{DashboardDocument, Layout, LayoutSection};
use crate::error::CommandError;
use crate::store::DocumentStore;

/// Default number of entries kept on each stack.
pub(crate) const DEFAULT_HISTORY_CAPACITY: usize = 50;

/// Location of a layout subtree inside the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutPath {
    /// The whole layout.
    Layout,
    /// A single section by index.
    Section(usize),
}

/// A detached copy of the subtree found at a [`LayoutPath`].
#[derive(Debug, Clone, PartialEq)]
pub enum LayoutSubtree {
    Layout(Layout),
    Section(LayoutSection),
}

/// One recorded layout change.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    /// Subtree to put back when this entry is applied.
    pub snapshot: LayoutSubtree,
    pub path: LayoutPath,
    /// Command that produced the change.
    pub command: CommandTag,
    pub correlation_id: String,
}

/// Copy the subtree at `path`, or `None` if the path does not exist.
pub fn read_subtree(doc: &DashboardDocument, path: LayoutPath) -> Option<LayoutSubtree> {
    match path {
        LayoutPath::Layout => Some(LayoutSubtree::Layout(doc.layout.clone())),
        LayoutPath::Section(i) => doc
            .layout
            .sections
            .get(i)
            .cloned()
            .map(LayoutSubtree::Section),
    }
}

/// Produce a document with `subtree` written at `path`.
///
/// # Errors
///
/// [`CommandError::Invariant`] if the path no longer exists or the subtree
/// kind does not match the path.
pub fn write_subtree(
    doc: &DashboardDocument,
    path: LayoutPath,
    subtree: LayoutSubtree,
) -> Result<DashboardDocument, CommandError> {
    let mut next = doc.clone();
    match (path, subtree) {
        (LayoutPath::Layout, LayoutSubtree::Layout(layout)) => next.layout = layout,
        (LayoutPath::Section(i), LayoutSubtree::Section(section)) => {
            let slot = next.layout.sections.get_mut(i).ok_or_else(|| {
                CommandError::invariant(format!("layout section {i} no longer exists"))
            })?;
            *slot = section;
        }
        (path, _) => {
            return Err(CommandError::invariant(format!(
                "snapshot does not fit layout path {path:?}"
            )));
        }
    }
    Ok(next)
}

#[derive(Debug, Default)]
struct Stacks {
    undo: VecDeque<HistoryEntry>,
    redo: VecDeque<HistoryEntry>,
}

/// Undo and redo stacks for one dashboard session.
///
/// Both stacks are bounded; pushing onto a full stack evicts its oldest
/// entry. The lock is never held across an `.await`.
#[derive(Debug)]
pub struct HistoryManager {
    capacity: usize,
    stacks: Mutex<Stacks>,
}

impl Default for HistoryManager {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl HistoryManager {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            stacks: Mutex::new(Stacks::default()),
        }
    }

    /// Wrap a structural handler so its successful edits are recorded.
    pub fn wrap<H: StructuralHandler>(handler: H) -> Undoable<H> {
        Undoable { inner: handler }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn undo_len(&self) -> usize {
        self.lock().undo.len()
    }

    pub fn redo_len(&self) -> usize {
        self.lock().redo.len()
    }

    /// Entries on the undo stack, oldest first.
    pub fn undo_entries(&self) -> Vec<HistoryEntry> {
        self.lock().undo.iter().cloned().collect()
    }

    /// Push a fresh edit. Clears the redo stack.
    pub fn record(&self, entry: HistoryEntry) {
        tracing::debug!(
            command = %entry.command,
            path = ?entry.path,
            "layout change recorded"
        );
        let mut stacks = self.lock();
        stacks.redo.clear();
        push_bounded(&mut stacks.undo, entry, self.capacity);
    }

    pub fn clear(&self) {
        let mut stacks = self.lock();
        stacks.undo.clear();
        stacks.redo.clear();
    }

    /// Restore the most recent entry, then keep going while the next
    /// entry's correlation id starts with `correlation_prefix`.
    ///
    /// All selected entries are applied to one copy of the document and
    /// committed in a single store mutation. Returns the number of entries
    /// applied; `0` means the stack was empty and nothing changed. With
    /// `redoable = false` the undone entries are discarded instead of moving
    /// to the redo stack.
    ///
    /// # Errors
    ///
    /// [`CommandError::Invariant`] if an entry targets a path that no longer
    /// exists. Nothing is committed, that entry is dropped and the other
    /// selected entries stay on the undo stack.
    pub fn undo(
        &self,
        store: &DocumentStore,
        correlation_prefix: Option<&str>,
        redoable: bool,
    ) -> Result<usize, CommandError> {
        let mut stacks = self.lock();
        let Some(top) = stacks.undo.len().checked_sub(1) else {
            return Ok(0);
        };
        let mut first = top;
        if let Some(prefix) = correlation_prefix {
            while first > 0 && stacks.undo[first - 1].correlation_id.starts_with(prefix) {
                first -= 1;
            }
        }
        // Newest first: that is the order in which they are undone.
        let batch: Vec<HistoryEntry> = stacks.undo.range(first..).rev().cloned().collect();

        match restore_all(store, &batch) {
            Ok(reverses) => {
                stacks.undo.truncate(first);
                if redoable {
                    for reverse in reverses {
                        push_bounded(&mut stacks.redo, reverse, self.capacity);
                    }
                }
                Ok(batch.len())
            }
            Err((failed, err)) => {
                stacks.undo.remove(top - failed);
                Err(err)
            }
        }
    }

    /// Re-apply the most recently undone entry.
    ///
    /// Returns `0` when there is nothing to redo.
    ///
    /// # Errors
    ///
    /// Same as [`undo`](Self::undo).
    pub fn redo(&self, store: &DocumentStore) -> Result<usize, CommandError> {
        let mut stacks = self.lock();
        let Some(entry) = stacks.redo.pop_back() else {
            return Ok(0);
        };
        let reverses = restore_all(store, std::slice::from_ref(&entry)).map_err(|(_, err)| err)?;
        for reverse in reverses {
            push_bounded(&mut stacks.undo, reverse, self.capacity);
        }
        Ok(1)
    }

    fn lock(&self) -> MutexGuard<'_, Stacks> {
        self.stacks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn push_bounded(stack: &mut VecDeque<HistoryEntry>, entry: HistoryEntry, capacity: usize) {
    if stack.len() == capacity {
        stack.pop_front();
    }
    stack.push_back(entry);
}

/// Apply `entries` in order as one store mutation and return the entries
/// that reverse them.
///
/// On failure nothing is committed and the index of the offending entry is
/// returned with the error.
fn restore_all(
    store: &DocumentStore,
    entries: &[HistoryEntry],
) -> Result<Vec<HistoryEntry>, (usize, CommandError)> {
    let mut reverses = Vec::with_capacity(entries.len());
    store.try_dispatch(|doc| {
        let mut next = doc.clone();
        for (i, entry) in entries.iter().enumerate() {
            let Some(before) = read_subtree(&next, entry.path) else {
                let err = CommandError::invariant(format!(
                    "cannot restore {} change: layout path {:?} no longer exists",
                    entry.command, entry.path
                ));
                tracing::error!(error = %err, "history entry discarded");
                return Err((i, err));
            };
            next = write_subtree(&next, entry.path, entry.snapshot.clone())
                .map_err(|err| (i, err))?;
            reverses.push(HistoryEntry {
                snapshot: before,
                ..entry.clone()
            });
        }
        Ok(next)
    })?;
    Ok(reverses)
}

/// A handler whose effect is confined to one layout subtree.
pub trait StructuralHandler: Send + Sync {
    /// The subtree `command` will modify when applied to `doc`.
    fn target_path(&self, doc: &DashboardDocument, command: &DashboardCommand) -> LayoutPath;

    fn apply<'a>(
        &'a self,
        ctx: &'a HandlerContext,
        command: DashboardCommand,
    ) -> HandlerFuture<'a>;
}

/// Decorator produced by [`HistoryManager::wrap`].
#[derive(Debug)]
pub struct Undoable<H> {
    inner: H,
}

impl<H: StructuralHandler> CommandHandler for Undoable<H> {
    fn handle<'a>(
        &'a self,
        ctx: &'a HandlerContext,
        command: DashboardCommand,
    ) -> HandlerFuture<'a> {
        Box::pin(async move {
            let state = ctx.state();
            let path = self.inner.target_path(&state, &command);
            let before = read_subtree(&state, path);

            let outcome = self.inner.apply(ctx, command).await;

            if outcome.is_ok()
                && let Some(snapshot) = before
                && read_subtree(&ctx.state(), path).as_ref() != Some(&snapshot)
            {
                ctx.history().record(HistoryEntry {
                    snapshot,
                    path,
                    command: ctx.command(),
                    correlation_id: ctx.correlation_id().to_owned(),
                });
            }
            outcome
        })
    }
}
