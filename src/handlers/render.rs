//! Render commands: thin adapters onto the render coordinator.

use crate::command::DashboardCommand;
use crate::dispatcher::{CommandHandler, HandlerContext, HandlerFuture};
use crate::error::CommandError;
use crate::event::EventKind;

/// Forwards render signals to the coordinator.
///
/// Widget signals are fire-and-forget: `RequestAsyncRender` and
/// `ResolveAsyncRender` always acknowledge a valid component id, even when
/// no render cycle is active. The coordinator then ignores the signal and
/// the render status is unchanged.
pub(crate) struct RenderSignals;

impl CommandHandler for RenderSignals {
    fn handle<'a>(
        &'a self,
        ctx: &'a HandlerContext,
        command: DashboardCommand,
    ) -> HandlerFuture<'a> {
        Box::pin(async move {
            match command {
                DashboardCommand::RequestRender => {
                    ctx.render().request_render();
                    Ok(EventKind::RenderCycleStarted)
                }
                DashboardCommand::RequestAsyncRender { component_id } => {
                    require_component_id(&component_id)?;
                    ctx.render().request_async_render(component_id.clone());
                    Ok(EventKind::AsyncRenderRequested { component_id })
                }
                DashboardCommand::ResolveAsyncRender { component_id } => {
                    require_component_id(&component_id)?;
                    ctx.render().resolve_async_render(component_id.clone());
                    Ok(EventKind::AsyncRenderResolved { component_id })
                }
                other => Err(CommandError::invariant(format!(
                    "{} is not a render command",
                    other.tag()
                ))),
            }
        })
    }
}

fn require_component_id(component_id: &str) -> Result<(), CommandError> {
    if component_id.is_empty() {
        return Err(CommandError::user("component id must not be empty"));
    }
    Ok(())
}
