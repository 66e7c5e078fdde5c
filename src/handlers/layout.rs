//! Layout edits and the undo/redo commands that revert them.
//!
//! Every edit validates against a snapshot first and then commits the full
//! replacement document in one mutation, so a rejected command never
//! leaves a partial edit behind.

use std::collections::HashSet;

use crate::command::{DashboardCommand, existing_index, insertion_index};
use crate::dispatcher::{CommandHandler, HandlerContext, HandlerFuture};
use crate::document::{DashboardDocument, LayoutItem, LayoutSection, SectionHeader};
use crate::error::CommandError;
use crate::event::{EventKind, LayoutChangeCause};
use crate::history::{LayoutPath, StructuralHandler};
use crate::refs::ObjRef;
use crate::selectors::{select_section, select_widget_by_id};

/// Structural layout edits. Wrapped with
/// [`HistoryManager::wrap`](crate::HistoryManager::wrap) when registered.
pub(crate) struct LayoutEdits;

impl StructuralHandler for LayoutEdits {
    fn target_path(&self, doc: &DashboardDocument, command: &DashboardCommand) -> LayoutPath {
        match command {
            DashboardCommand::ChangeLayoutSectionHeader { index, .. } => {
                LayoutPath::Section(*index)
            }
            DashboardCommand::AddSectionItems { section_index, .. }
            | DashboardCommand::ReplaceSectionItem { section_index, .. }
            | DashboardCommand::RemoveSectionItem {
                section_index,
                eager: false,
                ..
            } => LayoutPath::Section(*section_index),
            DashboardCommand::MoveSectionItem {
                section_index,
                to_section_index,
                ..
            } if existing_index(doc.layout.sections.len(), *to_section_index)
                == Some(*section_index) =>
            {
                LayoutPath::Section(*section_index)
            }
            _ => LayoutPath::Layout,
        }
    }

    fn apply<'a>(
        &'a self,
        ctx: &'a HandlerContext,
        command: DashboardCommand,
    ) -> HandlerFuture<'a> {
        Box::pin(async move {
            match command {
                DashboardCommand::AddLayoutSection {
                    index,
                    header,
                    items,
                } => add_layout_section(ctx, index, header, items).await,
                DashboardCommand::MoveLayoutSection {
                    section_index,
                    to_index,
                } => move_layout_section(ctx, section_index, to_index),
                DashboardCommand::RemoveLayoutSection { index } => {
                    remove_layout_section(ctx, index)
                }
                DashboardCommand::ChangeLayoutSectionHeader { index, header } => {
                    change_section_header(ctx, index, header)
                }
                DashboardCommand::AddSectionItems {
                    section_index,
                    item_index,
                    items,
                } => add_section_items(ctx, section_index, item_index, items).await,
                DashboardCommand::MoveSectionItem {
                    section_index,
                    item_index,
                    to_section_index,
                    to_item_index,
                } => move_section_item(
                    ctx,
                    section_index,
                    item_index,
                    to_section_index,
                    to_item_index,
                ),
                DashboardCommand::RemoveSectionItem {
                    section_index,
                    item_index,
                    eager,
                } => remove_section_item(ctx, section_index, item_index, eager),
                DashboardCommand::ReplaceSectionItem {
                    section_index,
                    item_index,
                    items,
                } => replace_section_item(ctx, section_index, item_index, items).await,
                other => Err(CommandError::invariant(format!(
                    "{} is not a layout edit",
                    other.tag()
                ))),
            }
        })
    }
}

fn section_mut(
    doc: &mut DashboardDocument,
    index: usize,
) -> Result<&mut LayoutSection, CommandError> {
    doc.layout
        .sections
        .get_mut(index)
        .ok_or_else(|| CommandError::invariant(format!("layout section {index} vanished")))
}

fn missing_section(index: usize) -> CommandError {
    CommandError::user(format!("layout section {index} does not exist"))
}

/// Cross-filtering originates from a widget; it ends when that widget goes.
fn drop_cross_filtering_from(doc: &mut DashboardDocument, widget_id: &str) {
    if doc
        .ui
        .cross_filtering
        .as_ref()
        .is_some_and(|cf| cf.widget_id == widget_id)
    {
        doc.ui.cross_filtering = None;
    }
}

/// Widget ids must be unique across the dashboard and every insight must
/// exist on the backend. The id of a widget being `replaced` may be reused.
async fn validate_new_items(
    ctx: &HandlerContext,
    doc: &DashboardDocument,
    items: &[LayoutItem],
    replaced: Option<&str>,
) -> Result<(), CommandError> {
    let mut seen = HashSet::new();
    for item in items {
        let id = item.widget.id.as_str();
        if id.is_empty() {
            return Err(CommandError::user("widget id must not be empty"));
        }
        let taken = replaced != Some(id) && select_widget_by_id(doc, id).is_some();
        if !seen.insert(id) || taken {
            return Err(CommandError::user(format!("widget id {id} is already in use")));
        }
    }

    let insights: Vec<ObjRef> = items
        .iter()
        .filter_map(|item| item.widget.insight_ref().cloned())
        .collect();
    if insights.is_empty() {
        return Ok(());
    }
    let exists = ctx
        .backend()
        .insights_exist(&insights)
        .await
        .map_err(|e| CommandError::protocol("failed to look up insights", e))?;
    if exists.len() != insights.len() {
        return Err(CommandError::invariant(format!(
            "insight lookup returned {} answers for {} insights",
            exists.len(),
            insights.len()
        )));
    }
    match insights.iter().zip(exists).find(|(_, found)| !found) {
        Some((missing, _)) => Err(CommandError::user(format!(
            "insight {missing} does not exist"
        ))),
        None => Ok(()),
    }
}

async fn add_layout_section(
    ctx: &HandlerContext,
    index: i32,
    header: Option<SectionHeader>,
    items: Vec<LayoutItem>,
) -> Result<EventKind, CommandError> {
    let doc = ctx.state();
    let at = insertion_index(doc.layout.sections.len(), index)
        .ok_or_else(|| CommandError::user(format!("section index {index} is out of range")))?;
    validate_new_items(ctx, &doc, &items, None).await?;

    ctx.try_mutate(move |doc| {
        let mut next = doc.clone();
        let mut section = LayoutSection::new(items);
        section.header = header;
        next.layout.sections.insert(at, section);
        Ok(next)
    })?;
    Ok(EventKind::LayoutSectionAdded { index: at })
}

fn move_layout_section(
    ctx: &HandlerContext,
    section_index: usize,
    to_index: i32,
) -> Result<EventKind, CommandError> {
    let len = ctx.state().layout.sections.len();
    if section_index >= len {
        return Err(missing_section(section_index));
    }
    let to = existing_index(len, to_index)
        .ok_or_else(|| CommandError::user(format!("target index {to_index} is out of range")))?;
    if to == section_index {
        return Err(CommandError::user(format!(
            "layout section {section_index} is already at index {to}"
        )));
    }

    ctx.try_mutate(|doc| {
        let mut next = doc.clone();
        let section = next.layout.sections.remove(section_index);
        next.layout.sections.insert(to, section);
        Ok(next)
    })?;
    Ok(EventKind::LayoutSectionMoved {
        from_index: section_index,
        to_index: to,
    })
}

fn remove_layout_section(ctx: &HandlerContext, index: i32) -> Result<EventKind, CommandError> {
    let len = ctx.state().layout.sections.len();
    let at = existing_index(len, index)
        .ok_or_else(|| CommandError::user(format!("section index {index} is out of range")))?;

    ctx.try_mutate(|doc| {
        let mut next = doc.clone();
        next.layout.sections.remove(at);
        Ok(next)
    })?;
    Ok(EventKind::LayoutSectionRemoved { index: at })
}

fn change_section_header(
    ctx: &HandlerContext,
    index: usize,
    header: SectionHeader,
) -> Result<EventKind, CommandError> {
    if select_section(&ctx.state(), index).is_none() {
        return Err(missing_section(index));
    }

    let applied = header.clone();
    ctx.try_mutate(move |doc| {
        let mut next = doc.clone();
        section_mut(&mut next, index)?.header = Some(applied);
        Ok(next)
    })?;
    Ok(EventKind::LayoutSectionHeaderChanged { index, header })
}

async fn add_section_items(
    ctx: &HandlerContext,
    section_index: usize,
    item_index: i32,
    items: Vec<LayoutItem>,
) -> Result<EventKind, CommandError> {
    let doc = ctx.state();
    let section =
        select_section(&doc, section_index).ok_or_else(|| missing_section(section_index))?;
    let at = insertion_index(section.items.len(), item_index)
        .ok_or_else(|| CommandError::user(format!("item index {item_index} is out of range")))?;
    if items.is_empty() {
        return Err(CommandError::user("no items to add"));
    }
    validate_new_items(ctx, &doc, &items, None).await?;

    let widget_ids = items.iter().map(|item| item.widget.id.clone()).collect();
    ctx.try_mutate(move |doc| {
        let mut next = doc.clone();
        section_mut(&mut next, section_index)?
            .items
            .splice(at..at, items);
        Ok(next)
    })?;
    Ok(EventKind::SectionItemsAdded {
        section_index,
        item_index: at,
        widget_ids,
    })
}

fn move_section_item(
    ctx: &HandlerContext,
    section_index: usize,
    item_index: usize,
    to_section_index: i32,
    to_item_index: i32,
) -> Result<EventKind, CommandError> {
    let doc = ctx.state();
    let source =
        select_section(&doc, section_index).ok_or_else(|| missing_section(section_index))?;
    if item_index >= source.items.len() {
        return Err(CommandError::user(format!(
            "item {item_index} does not exist in section {section_index}"
        )));
    }
    let to_section_index = existing_index(doc.layout.sections.len(), to_section_index)
        .ok_or_else(|| {
            CommandError::user(format!("target section {to_section_index} is out of range"))
        })?;
    let target = &doc.layout.sections[to_section_index];
    let same_section = section_index == to_section_index;
    let to = if same_section {
        existing_index(source.items.len(), to_item_index)
    } else {
        insertion_index(target.items.len(), to_item_index)
    }
    .ok_or_else(|| CommandError::user(format!("target index {to_item_index} is out of range")))?;
    if same_section && to == item_index {
        return Err(CommandError::user(format!(
            "item {item_index} is already at index {to}"
        )));
    }

    ctx.try_mutate(|doc| {
        let mut next = doc.clone();
        let item = section_mut(&mut next, section_index)?.items.remove(item_index);
        section_mut(&mut next, to_section_index)?.items.insert(to, item);
        Ok(next)
    })?;
    Ok(EventKind::SectionItemMoved {
        from_section_index: section_index,
        from_item_index: item_index,
        to_section_index,
        to_item_index: to,
    })
}

/// With `eager`, a section left empty by the removal is removed as well.
fn remove_section_item(
    ctx: &HandlerContext,
    section_index: usize,
    item_index: i32,
    eager: bool,
) -> Result<EventKind, CommandError> {
    let doc = ctx.state();
    let section =
        select_section(&doc, section_index).ok_or_else(|| missing_section(section_index))?;
    let at = existing_index(section.items.len(), item_index)
        .ok_or_else(|| CommandError::user(format!("item index {item_index} is out of range")))?;
    let widget_id = section.items[at].widget.id.clone();
    let section_removed = eager && section.items.len() == 1;

    ctx.try_mutate(|doc| {
        let mut next = doc.clone();
        if section_removed {
            next.layout.sections.remove(section_index);
        } else {
            section_mut(&mut next, section_index)?.items.remove(at);
        }
        drop_cross_filtering_from(&mut next, &widget_id);
        Ok(next)
    })?;
    Ok(EventKind::SectionItemRemoved {
        section_index,
        item_index: at,
        widget_id,
        section_removed,
    })
}

async fn replace_section_item(
    ctx: &HandlerContext,
    section_index: usize,
    item_index: i32,
    items: Vec<LayoutItem>,
) -> Result<EventKind, CommandError> {
    let doc = ctx.state();
    let section =
        select_section(&doc, section_index).ok_or_else(|| missing_section(section_index))?;
    let at = existing_index(section.items.len(), item_index)
        .ok_or_else(|| CommandError::user(format!("item index {item_index} is out of range")))?;
    if items.is_empty() {
        return Err(CommandError::user("no replacement items"));
    }
    let replaced = section.items[at].widget.id.clone();
    validate_new_items(ctx, &doc, &items, Some(&replaced)).await?;

    let widget_ids: Vec<String> = items.iter().map(|item| item.widget.id.clone()).collect();
    let retired = (!widget_ids.contains(&replaced)).then(|| replaced.clone());
    ctx.try_mutate(move |doc| {
        let mut next = doc.clone();
        section_mut(&mut next, section_index)?
            .items
            .splice(at..=at, items);
        if let Some(retired) = retired {
            drop_cross_filtering_from(&mut next, &retired);
        }
        Ok(next)
    })?;
    Ok(EventKind::SectionItemReplaced {
        section_index,
        item_index: at,
        replaced,
        widget_ids,
    })
}

/// Undo, redo and clear of the layout history.
pub(crate) struct LayoutHistory;

impl CommandHandler for LayoutHistory {
    fn handle<'a>(
        &'a self,
        ctx: &'a HandlerContext,
        command: DashboardCommand,
    ) -> HandlerFuture<'a> {
        Box::pin(async move {
            let history = ctx.history();
            match command {
                DashboardCommand::UndoLayoutChanges {
                    correlation_prefix,
                    redoable,
                } => {
                    let steps =
                        history.undo(ctx.store(), correlation_prefix.as_deref(), redoable)?;
                    Ok(layout_changed(ctx, LayoutChangeCause::Undo, steps))
                }
                DashboardCommand::RedoLayoutChanges => {
                    let steps = history.redo(ctx.store())?;
                    Ok(layout_changed(ctx, LayoutChangeCause::Redo, steps))
                }
                DashboardCommand::ClearLayoutHistory => {
                    history.clear();
                    Ok(EventKind::LayoutHistoryCleared)
                }
                other => Err(CommandError::invariant(format!(
                    "{} is not a history command",
                    other.tag()
                ))),
            }
        })
    }
}

fn layout_changed(ctx: &HandlerContext, cause: LayoutChangeCause, steps: usize) -> EventKind {
    if steps == 0 {
        tracing::debug!(?cause, "layout history empty");
        EventKind::LayoutHistoryEmpty {
            command: ctx.command(),
        }
    } else {
        EventKind::LayoutChanged { cause, steps }
    }
}
