//! Filter context edits.
//!
//! Each successful edit commits the whole new filter context, then emits
//! `FilterContextChanged` before its terminal event.

use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use crate::command::{DashboardCommand, FilterSelection, existing_index, insertion_index};
use crate::dispatcher::{CommandHandler, HandlerContext, HandlerFuture};
use crate::document::{
    AttributeFilter, AttributeFilterParent, DateFilter, DateFilterSelection, FilterContextItem,
};
use crate::error::CommandError;
use crate::event::EventKind;
use crate::handlers::commit_filter_context;
use crate::refs::ObjRef;
use crate::selectors::{select_attribute_filter, select_attribute_filters};

pub(crate) struct FilterContextEdits;

impl CommandHandler for FilterContextEdits {
    fn handle<'a>(
        &'a self,
        ctx: &'a HandlerContext,
        command: DashboardCommand,
    ) -> HandlerFuture<'a> {
        Box::pin(async move {
            match command {
                DashboardCommand::AddAttributeFilter {
                    display_form,
                    index,
                    local_identifier,
                    parents,
                    selected,
                    negative_selection,
                } => add_attribute_filter(
                    ctx,
                    AttributeFilter {
                        local_identifier: local_identifier
                            .unwrap_or_else(|| Uuid::new_v4().simple().to_string()),
                        display_form,
                        selected,
                        negative_selection,
                        parents,
                        title: None,
                    },
                    index,
                ),
                DashboardCommand::RemoveAttributeFilters { local_identifiers } => {
                    remove_attribute_filters(ctx, local_identifiers)
                }
                DashboardCommand::MoveAttributeFilter {
                    local_identifier,
                    index,
                } => move_attribute_filter(ctx, local_identifier, index),
                DashboardCommand::ChangeAttributeFilterSelection {
                    local_identifier,
                    selected,
                    negative_selection,
                } => {
                    change_attribute_selection(ctx, local_identifier, selected, negative_selection)
                }
                DashboardCommand::ChangeDateFilterSelection {
                    data_set,
                    selection,
                } => change_date_selection(ctx, data_set, selection),
                DashboardCommand::SetAttributeFilterParent {
                    local_identifier,
                    parents,
                } => set_attribute_filter_parent(ctx, local_identifier, parents),
                DashboardCommand::ChangeFilterContextSelection {
                    filters,
                    reset_others,
                } => change_filter_context_selection(ctx, filters, reset_others),
                other => Err(CommandError::invariant(format!(
                    "{} is not a filter context edit",
                    other.tag()
                ))),
            }
        })
    }
}

fn unknown_filter(local_identifier: &str) -> CommandError {
    CommandError::user(format!("no attribute filter with local identifier {local_identifier}"))
}

fn add_attribute_filter(
    ctx: &HandlerContext,
    filter: AttributeFilter,
    index: i32,
) -> Result<EventKind, CommandError> {
    let doc = ctx.state();
    let at = insertion_index(doc.filter_context.filters.len(), index)
        .ok_or_else(|| CommandError::user(format!("filter index {index} is out of range")))?;
    if select_attribute_filters(&doc)
        .iter()
        .any(|f| f.display_form == filter.display_form)
    {
        return Err(CommandError::user(format!(
            "dashboard is already filtered by {}",
            filter.display_form
        )));
    }
    if doc.filter_context.position(&filter.local_identifier).is_some() {
        return Err(CommandError::user(format!(
            "local identifier {} is already in use",
            filter.local_identifier
        )));
    }
    if let Some(parent) = filter
        .parents
        .iter()
        .find(|p| select_attribute_filter(&doc, &p.filter_local_identifier).is_none())
    {
        return Err(unknown_filter(&parent.filter_local_identifier));
    }

    let local_identifier = filter.local_identifier.clone();
    let mut filter_context = doc.filter_context.clone();
    filter_context
        .filters
        .insert(at, FilterContextItem::Attribute(filter));
    commit_filter_context(ctx, filter_context)?;
    Ok(EventKind::AttributeFilterAdded {
        local_identifier,
        index: at,
    })
}

/// Removing a filter also drops it from the parents of remaining filters.
fn remove_attribute_filters(
    ctx: &HandlerContext,
    local_identifiers: Vec<String>,
) -> Result<EventKind, CommandError> {
    if local_identifiers.is_empty() {
        return Err(CommandError::user("no filters to remove"));
    }
    let doc = ctx.state();
    if let Some(missing) = local_identifiers
        .iter()
        .find(|id| select_attribute_filter(&doc, id).is_none())
    {
        return Err(unknown_filter(missing));
    }

    let removed: HashSet<&str> = local_identifiers.iter().map(String::as_str).collect();
    let mut filter_context = doc.filter_context.clone();
    filter_context.filters.retain(|item| match item {
        FilterContextItem::Attribute(f) => !removed.contains(f.local_identifier.as_str()),
        FilterContextItem::Date(_) => true,
    });
    for item in &mut filter_context.filters {
        if let FilterContextItem::Attribute(f) = item {
            f.parents
                .retain(|p| !removed.contains(p.filter_local_identifier.as_str()));
        }
    }

    commit_filter_context(ctx, filter_context)?;
    Ok(EventKind::AttributeFiltersRemoved { local_identifiers })
}

fn move_attribute_filter(
    ctx: &HandlerContext,
    local_identifier: String,
    index: i32,
) -> Result<EventKind, CommandError> {
    let doc = ctx.state();
    if select_attribute_filter(&doc, &local_identifier).is_none() {
        return Err(unknown_filter(&local_identifier));
    }
    let filters = &doc.filter_context.filters;
    let from = doc
        .filter_context
        .position(&local_identifier)
        .ok_or_else(|| unknown_filter(&local_identifier))?;
    let to = existing_index(filters.len(), index)
        .ok_or_else(|| CommandError::user(format!("filter index {index} is out of range")))?;

    let mut filter_context = doc.filter_context.clone();
    let item = filter_context.filters.remove(from);
    filter_context.filters.insert(to, item);
    commit_filter_context(ctx, filter_context)?;
    Ok(EventKind::AttributeFilterMoved {
        local_identifier,
        from_index: from,
        to_index: to,
    })
}

fn change_attribute_selection(
    ctx: &HandlerContext,
    local_identifier: String,
    selected: Vec<String>,
    negative_selection: bool,
) -> Result<EventKind, CommandError> {
    let doc = ctx.state();
    let mut filter_context = doc.filter_context.clone();
    let filter = filter_context
        .filters
        .iter_mut()
        .find_map(|item| match item {
            FilterContextItem::Attribute(f) if f.local_identifier == local_identifier => Some(f),
            _ => None,
        })
        .ok_or_else(|| unknown_filter(&local_identifier))?;
    filter.selected = selected;
    filter.negative_selection = negative_selection;

    commit_filter_context(ctx, filter_context)?;
    Ok(EventKind::AttributeFilterSelectionChanged { local_identifier })
}

/// Changes the date filter on `data_set`. A missing common date filter
/// (`data_set == None`) is created at the front of the filter context.
fn change_date_selection(
    ctx: &HandlerContext,
    data_set: Option<ObjRef>,
    selection: DateFilterSelection,
) -> Result<EventKind, CommandError> {
    let doc = ctx.state();
    let mut filter_context = doc.filter_context.clone();
    let position = filter_context
        .filters
        .iter()
        .position(|item| item.as_date().is_some_and(|f| f.data_set == data_set));

    let local_identifier = match (position, data_set) {
        (Some(position), _) => {
            let FilterContextItem::Date(filter) = &mut filter_context.filters[position] else {
                return Err(CommandError::invariant("date filter position changed"));
            };
            filter.selection = selection;
            filter.local_identifier.clone()
        }
        (None, None) => {
            let local_identifier = Uuid::new_v4().simple().to_string();
            filter_context.filters.insert(
                0,
                FilterContextItem::Date(DateFilter {
                    local_identifier: local_identifier.clone(),
                    data_set: None,
                    selection,
                }),
            );
            local_identifier
        }
        (None, Some(data_set)) => {
            return Err(CommandError::user(format!(
                "no date filter for data set {data_set}"
            )));
        }
    };

    commit_filter_context(ctx, filter_context)?;
    Ok(EventKind::DateFilterSelectionChanged { local_identifier })
}

/// Replace the parents of an attribute filter.
///
/// Parents must be other attribute filters, each listed once, and the
/// resulting parent graph must stay acyclic.
fn set_attribute_filter_parent(
    ctx: &HandlerContext,
    local_identifier: String,
    parents: Vec<AttributeFilterParent>,
) -> Result<EventKind, CommandError> {
    let doc = ctx.state();
    if select_attribute_filter(&doc, &local_identifier).is_none() {
        return Err(unknown_filter(&local_identifier));
    }
    let mut seen = HashSet::new();
    for parent in &parents {
        let parent_id = parent.filter_local_identifier.as_str();
        if parent_id == local_identifier {
            return Err(CommandError::user(format!(
                "attribute filter {local_identifier} cannot be its own parent"
            )));
        }
        if select_attribute_filter(&doc, parent_id).is_none() {
            return Err(unknown_filter(parent_id));
        }
        if !seen.insert(parent_id) {
            return Err(CommandError::user(format!(
                "attribute filter {parent_id} is listed as a parent twice"
            )));
        }
    }

    let mut filter_context = doc.filter_context.clone();
    let filter = filter_context
        .filters
        .iter_mut()
        .find_map(|item| match item {
            FilterContextItem::Attribute(f) if f.local_identifier == local_identifier => Some(f),
            _ => None,
        })
        .ok_or_else(|| unknown_filter(&local_identifier))?;
    filter.parents = parents;
    if let Some(id) = first_cyclic_filter(&filter_context.filters) {
        return Err(CommandError::user(format!(
            "parent links would make attribute filter {id} depend on itself"
        )));
    }

    commit_filter_context(ctx, filter_context)?;
    Ok(EventKind::AttributeFilterParentChanged { local_identifier })
}

/// A filter that reaches itself through parent links, if any.
fn first_cyclic_filter(filters: &[FilterContextItem]) -> Option<&str> {
    let graph: HashMap<&str, Vec<&str>> = filters
        .iter()
        .filter_map(FilterContextItem::as_attribute)
        .map(|f| {
            let parents = f
                .parents
                .iter()
                .map(|p| p.filter_local_identifier.as_str())
                .collect();
            (f.local_identifier.as_str(), parents)
        })
        .collect();

    graph.keys().copied().find(|&start| {
        let mut visited = HashSet::new();
        let mut stack: Vec<&str> = graph[start].clone();
        while let Some(id) = stack.pop() {
            if id == start {
                return true;
            }
            if visited.insert(id)
                && let Some(next) = graph.get(id)
            {
                stack.extend(next.iter().copied());
            }
        }
        false
    })
}

/// Apply several selections in one commit.
///
/// Attribute selections match by display form and date selections by data
/// set. Selections matching no filter, and repeated matches of a filter
/// already set by this command, are skipped. With `reset_others`, every
/// filter not matched is reset to "all".
fn change_filter_context_selection(
    ctx: &HandlerContext,
    selections: Vec<FilterSelection>,
    reset_others: bool,
) -> Result<EventKind, CommandError> {
    let doc = ctx.state();
    let mut filter_context = doc.filter_context.clone();
    let mut matched = HashSet::new();

    for selection in selections {
        let position = match &selection {
            FilterSelection::Attribute { display_form, .. } => {
                filter_context.filters.iter().position(|item| {
                    item.as_attribute()
                        .is_some_and(|f| &f.display_form == display_form)
                })
            }
            FilterSelection::Date { data_set, .. } => filter_context
                .filters
                .iter()
                .position(|item| item.as_date().is_some_and(|f| &f.data_set == data_set)),
        };
        let Some(position) = position else {
            tracing::debug!(?selection, "selection matches no filter; skipped");
            continue;
        };
        if !matched.insert(position) {
            tracing::debug!(?selection, "filter already selected by this command; skipped");
            continue;
        }
        match (&mut filter_context.filters[position], selection) {
            (
                FilterContextItem::Attribute(f),
                FilterSelection::Attribute {
                    selected,
                    negative_selection,
                    ..
                },
            ) => {
                f.selected = selected;
                f.negative_selection = negative_selection;
            }
            (FilterContextItem::Date(f), FilterSelection::Date { selection, .. }) => {
                f.selection = selection;
            }
            _ => return Err(CommandError::invariant("matched filter has the wrong kind")),
        }
    }

    if reset_others {
        for (position, item) in filter_context.filters.iter_mut().enumerate() {
            if matched.contains(&position) {
                continue;
            }
            match item {
                FilterContextItem::Attribute(f) => {
                    f.selected.clear();
                    f.negative_selection = true;
                }
                FilterContextItem::Date(f) => f.selection = DateFilterSelection::AllTime,
            }
        }
    }

    let local_identifiers: Vec<String> = filter_context
        .filters
        .iter()
        .zip(&doc.filter_context.filters)
        .filter(|(after, before)| after != before)
        .map(|(after, _)| after.local_identifier().to_owned())
        .collect();
    if !local_identifiers.is_empty() {
        commit_filter_context(ctx, filter_context)?;
    }
    Ok(EventKind::FilterContextSelectionChanged { local_identifiers })
}
