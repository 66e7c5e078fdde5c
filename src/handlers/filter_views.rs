//! Saved filter views.
//!
//! Saving sanitizes the current filter context first so that persisted
//! views only ever contain concrete references. At most one view is the
//! default at any time.

use crate::backend::FilterViewDefinition;
use crate::command::DashboardCommand;
use crate::dispatcher::{CommandHandler, HandlerContext, HandlerFuture};
use crate::document::FilterView;
use crate::error::CommandError;
use crate::event::EventKind;
use crate::handlers::commit_filter_context;
use crate::refs::ObjRef;
use crate::sanitize::sanitize_filter_context;
use crate::selectors::select_filter_view;

pub(crate) struct FilterViews;

impl CommandHandler for FilterViews {
    fn handle<'a>(
        &'a self,
        ctx: &'a HandlerContext,
        command: DashboardCommand,
    ) -> HandlerFuture<'a> {
        Box::pin(async move {
            match command {
                DashboardCommand::SaveFilterView { name, is_default } => {
                    save(ctx, name, is_default).await
                }
                DashboardCommand::DeleteFilterView { filter_view } => {
                    delete(ctx, filter_view).await
                }
                DashboardCommand::ApplyFilterView { filter_view } => apply(ctx, filter_view),
                DashboardCommand::SetFilterViewAsDefault {
                    filter_view,
                    is_default,
                } => set_default(ctx, filter_view, is_default).await,
                other => Err(CommandError::invariant(format!(
                    "{} is not a filter view command",
                    other.tag()
                ))),
            }
        })
    }
}

fn unknown_view(filter_view: &ObjRef) -> CommandError {
    CommandError::user(format!("filter view {filter_view} does not exist"))
}

fn require_view(ctx: &HandlerContext, filter_view: &ObjRef) -> Result<FilterView, CommandError> {
    select_filter_view(&ctx.state(), filter_view)
        .cloned()
        .ok_or_else(|| unknown_view(filter_view))
}

/// Mark `filter_view` as default (or not), clearing every other default.
fn apply_default_flag(views: &mut [FilterView], filter_view: &ObjRef, is_default: bool) {
    for view in views {
        if &view.filter_view_ref == filter_view {
            view.is_default = is_default;
        } else if is_default {
            view.is_default = false;
        }
    }
}

async fn save(
    ctx: &HandlerContext,
    name: String,
    is_default: bool,
) -> Result<EventKind, CommandError> {
    let name = name.trim().to_owned();
    if name.is_empty() {
        return Err(CommandError::user("filter view name must not be empty"));
    }

    let current = ctx.state().filter_context.clone();
    let filter_context = sanitize_filter_context(&current, ctx.backend()).await?;
    let saved = ctx
        .backend()
        .create_filter_view(FilterViewDefinition {
            name,
            is_default,
            filter_context,
        })
        .await
        .map_err(|e| CommandError::protocol("failed to save filter view", e))?;

    let stored = saved.clone();
    ctx.try_mutate(move |doc| {
        let mut next = doc.clone();
        let filter_view_ref = stored.filter_view_ref.clone();
        let is_default = stored.is_default;
        next.filter_views.push(stored);
        if is_default {
            apply_default_flag(&mut next.filter_views, &filter_view_ref, true);
        }
        Ok(next)
    })?;
    Ok(EventKind::FilterViewSaved { filter_view: saved })
}

async fn delete(ctx: &HandlerContext, filter_view: ObjRef) -> Result<EventKind, CommandError> {
    require_view(ctx, &filter_view)?;
    ctx.backend()
        .delete_filter_view(&filter_view)
        .await
        .map_err(|e| CommandError::protocol("failed to delete filter view", e))?;

    ctx.try_mutate(|doc| {
        let mut next = doc.clone();
        next.filter_views
            .retain(|view| view.filter_view_ref != filter_view);
        Ok(next)
    })?;
    Ok(EventKind::FilterViewDeleted { filter_view })
}

/// Replace the dashboard filter context with the one stored in the view.
fn apply(ctx: &HandlerContext, filter_view: ObjRef) -> Result<EventKind, CommandError> {
    let view = require_view(ctx, &filter_view)?;
    commit_filter_context(ctx, view.filter_context)?;
    Ok(EventKind::FilterViewApplied { filter_view })
}

async fn set_default(
    ctx: &HandlerContext,
    filter_view: ObjRef,
    is_default: bool,
) -> Result<EventKind, CommandError> {
    require_view(ctx, &filter_view)?;
    ctx.backend()
        .set_filter_view_default(&filter_view, is_default)
        .await
        .map_err(|e| CommandError::protocol("failed to update default filter view", e))?;

    ctx.try_mutate(|doc| {
        let mut next = doc.clone();
        apply_default_flag(&mut next.filter_views, &filter_view, is_default);
        Ok(next)
    })?;
    Ok(EventKind::FilterViewDefaultChanged {
        filter_view,
        is_default,
    })
}
