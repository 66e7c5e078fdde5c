//! Control core of an interactive analytical dashboard.
//!
//! Commands are routed through a single-writer dispatcher to handlers that
//! replace the shared [`DashboardDocument`] whole, emit events on a
//! broadcast bus, record structural layout edits in a bounded undo/redo
//! history, and drive a render-quiescence coordinator that decides when
//! asynchronously rendering widgets have collectively settled.
//!
//! Start with [`DashboardBuilder`].

mod backend;
pub use backend::{
    BackendFuture, DashboardBackend, FilterViewDefinition, InMemoryBackend, RefResolver,
};
mod command;
pub use command::{CommandEnvelope, CommandTag, DashboardCommand, FilterSelection};
mod dashboard;
pub use dashboard::{Dashboard, DashboardBuilder, DashboardConfig};
mod dispatcher;
pub use dispatcher::{
    CommandHandler, DashboardHandle, HandlerContext, HandlerFuture, HandlerRegistry,
};
mod document;
pub use document::{
    AttributeFilter, AttributeFilterParent, CrossFiltering, DashboardDocument, DateFilter,
    DateFilterSelection, DateGranularity, FilterContext, FilterContextItem, FilterView, ItemSize,
    Layout, LayoutItem, LayoutSection, SectionHeader, UiState, Widget, WidgetKind,
    attribute_filter, date_filter,
};
mod error;
pub use error::{BackendError, CommandError, DispatchError, FailureReason};
mod event;
pub use event::{DashboardEvent, EventBus, EventKind, LayoutChangeCause};
mod handlers;
mod history;
pub use history::{
    HistoryEntry, HistoryManager, LayoutPath, LayoutSubtree, StructuralHandler, Undoable,
    read_subtree, write_subtree,
};
mod refs;
pub use refs::{ObjRef, id_ref, uri_ref};
mod render;
pub use render::{RenderConfig, RenderCoordinatorHandle, RenderStatus, spawn_coordinator};
mod sanitize;
pub use sanitize::{SanitizeError, sanitize_filter_context};
pub mod selectors;
mod store;
pub use store::DocumentStore;
