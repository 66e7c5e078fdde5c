//! Built-in command handlers.

mod filter_views;
mod filters;
mod layout;
mod render;

use std::sync::Arc;

use crate::command::CommandTag;
use crate::dispatcher::{CommandHandler, HandlerContext, HandlerRegistry};
use crate::document::FilterContext;
use crate::error::CommandError;
use crate::event::EventKind;
use crate::history::HistoryManager;

/// Registry with a handler for every built-in command.
///
/// Layout edits are wrapped so that they are recorded in the layout
/// history.
pub(crate) fn default_registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();

    let layout_edits: Arc<dyn CommandHandler> = Arc::new(HistoryManager::wrap(layout::LayoutEdits));
    for tag in [
        CommandTag::AddLayoutSection,
        CommandTag::MoveLayoutSection,
        CommandTag::RemoveLayoutSection,
        CommandTag::ChangeLayoutSectionHeader,
        CommandTag::AddSectionItems,
        CommandTag::MoveSectionItem,
        CommandTag::RemoveSectionItem,
        CommandTag::ReplaceSectionItem,
    ] {
        registry.register(tag, Arc::clone(&layout_edits));
    }

    let layout_history: Arc<dyn CommandHandler> = Arc::new(layout::LayoutHistory);
    for tag in [
        CommandTag::UndoLayoutChanges,
        CommandTag::RedoLayoutChanges,
        CommandTag::ClearLayoutHistory,
    ] {
        registry.register(tag, Arc::clone(&layout_history));
    }

    let filter_edits: Arc<dyn CommandHandler> = Arc::new(filters::FilterContextEdits);
    for tag in [
        CommandTag::AddAttributeFilter,
        CommandTag::RemoveAttributeFilters,
        CommandTag::MoveAttributeFilter,
        CommandTag::ChangeAttributeFilterSelection,
        CommandTag::ChangeDateFilterSelection,
        CommandTag::SetAttributeFilterParent,
        CommandTag::ChangeFilterContextSelection,
    ] {
        registry.register(tag, Arc::clone(&filter_edits));
    }

    let filter_views: Arc<dyn CommandHandler> = Arc::new(filter_views::FilterViews);
    for tag in [
        CommandTag::SaveFilterView,
        CommandTag::DeleteFilterView,
        CommandTag::ApplyFilterView,
        CommandTag::SetFilterViewAsDefault,
    ] {
        registry.register(tag, Arc::clone(&filter_views));
    }

    let render: Arc<dyn CommandHandler> = Arc::new(render::RenderSignals);
    for tag in [
        CommandTag::RequestRender,
        CommandTag::RequestAsyncRender,
        CommandTag::ResolveAsyncRender,
    ] {
        registry.register(tag, Arc::clone(&render));
    }

    registry
}

/// Commit a new filter context and announce it.
pub(crate) fn commit_filter_context(
    ctx: &HandlerContext,
    filter_context: FilterContext,
) -> Result<(), CommandError> {
    let announced = filter_context.clone();
    ctx.try_mutate(move |doc| {
        let mut next = doc.clone();
        next.filter_context = filter_context;
        Ok(next)
    })?;
    ctx.emit(EventKind::FilterContextChanged {
        filter_context: announced,
    });
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use crate::backend::InMemoryBackend;
    use crate::dashboard::{Dashboard, DashboardBuilder};
    use crate::document::DashboardDocument;

    pub(crate) fn open(document: DashboardDocument, backend: Arc<InMemoryBackend>) -> Dashboard {
        DashboardBuilder::new(backend).open(document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_command_has_a_default_handler() {
        let registry = default_registry();
        for tag in [
            CommandTag::AddLayoutSection,
            CommandTag::MoveLayoutSection,
            CommandTag::RemoveLayoutSection,
            CommandTag::ChangeLayoutSectionHeader,
            CommandTag::AddSectionItems,
            CommandTag::MoveSectionItem,
            CommandTag::RemoveSectionItem,
            CommandTag::ReplaceSectionItem,
            CommandTag::UndoLayoutChanges,
            CommandTag::RedoLayoutChanges,
            CommandTag::ClearLayoutHistory,
            CommandTag::AddAttributeFilter,
            CommandTag::RemoveAttributeFilters,
            CommandTag::MoveAttributeFilter,
            CommandTag::ChangeAttributeFilterSelection,
            CommandTag::ChangeDateFilterSelection,
            CommandTag::SetAttributeFilterParent,
            CommandTag::ChangeFilterContextSelection,
            CommandTag::SaveFilterView,
            CommandTag::DeleteFilterView,
            CommandTag::ApplyFilterView,
            CommandTag::SetFilterViewAsDefault,
            CommandTag::RequestRender,
            CommandTag::RequestAsyncRender,
            CommandTag::ResolveAsyncRender,
        ] {
            assert!(registry.contains(tag), "missing handler for {tag}");
        }
    }
}
