//! Composition root: wires the store, event bus, history, render
//! coordinator and dispatcher together.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tokio_stream::Stream;

use crate::backend::DashboardBackend;
use crate::command::{CommandEnvelope, CommandTag, DashboardCommand};
use crate::dispatcher::{
    CommandHandler, DEFAULT_COMMAND_CAPACITY, DashboardHandle, DispatcherCore, spawn_dispatcher,
};
use crate::document::DashboardDocument;
use crate::error::DispatchError;
use crate::event::{DEFAULT_EVENT_CAPACITY, DashboardEvent, EventBus};
use crate::handlers::default_registry;
use crate::history::{DEFAULT_HISTORY_CAPACITY, HistoryManager};
use crate::render::{RenderConfig, RenderCoordinatorHandle, spawn_coordinator};
use crate::store::DocumentStore;

/// Tunables for a dashboard session.
///
/// Deserializable so it can live in an application config file; every
/// field falls back to its default when absent.
///
/// # Examples
///
/// ```
/// use dashboard_core::DashboardConfig;
///
/// let config = DashboardConfig {
///     history_capacity: 10,
///     ..DashboardConfig::default()
/// };
/// assert_eq!(config.command_buffer, 32);
/// assert_eq!(config.event_capacity, 256);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    /// Maximum entries on each of the undo and redo stacks.
    ///
    /// Default: 50.
    pub history_capacity: usize,

    /// Capacity of the dispatcher's command queue. Callers wait when it
    /// is full.
    ///
    /// Default: 32.
    pub command_buffer: usize,

    /// Events buffered per subscriber before the slowest one starts
    /// losing events.
    ///
    /// Default: 256.
    pub event_capacity: usize,

    pub render: RenderConfig,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            command_buffer: DEFAULT_COMMAND_CAPACITY,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            render: RenderConfig::default(),
        }
    }
}

/// Builder for a [`Dashboard`] session.
///
/// Every built-in command gets its default handler; individual handlers
/// can be replaced with [`handler`](DashboardBuilder::handler).
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use dashboard_core::{DashboardBuilder, DashboardDocument, DashboardCommand, InMemoryBackend};
///
/// # async fn example() -> Result<(), dashboard_core::DispatchError> {
/// let dashboard = DashboardBuilder::new(Arc::new(InMemoryBackend::new()))
///     .history_capacity(20)
///     .open(DashboardDocument::new("Sales overview"));
///
/// let terminal = dashboard.dispatch(DashboardCommand::RequestRender).await?;
/// assert!(!terminal.is_failure());
/// # Ok(())
/// # }
/// ```
pub struct DashboardBuilder {
    backend: Arc<dyn DashboardBackend>,
    config: DashboardConfig,
    overrides: Vec<(CommandTag, Arc<dyn CommandHandler>)>,
}

impl DashboardBuilder {
    /// Create a builder with default configuration.
    ///
    /// # Arguments
    ///
    /// * `backend` - Collaborator used by handlers for reference
    ///   resolution, insight lookup and filter view persistence.
    pub fn new(backend: Arc<dyn DashboardBackend>) -> Self {
        Self {
            backend,
            config: DashboardConfig::default(),
            overrides: Vec::new(),
        }
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: DashboardConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the maximum number of entries on each history stack.
    pub fn history_capacity(mut self, capacity: usize) -> Self {
        self.config.history_capacity = capacity;
        self
    }

    /// Set the command queue capacity.
    pub fn command_buffer(mut self, capacity: usize) -> Self {
        self.config.command_buffer = capacity;
        self
    }

    /// Set the event bus capacity.
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    /// Set the render coordinator timeouts.
    ///
    /// If not called, [`RenderConfig::default()`] is used.
    pub fn render_config(mut self, config: RenderConfig) -> Self {
        self.config.render = config;
        self
    }

    /// Register `handler` for `tag`, replacing the built-in one.
    ///
    /// Layout edits registered this way are not recorded in the history
    /// unless the handler is wrapped with
    /// [`HistoryManager::wrap`](crate::HistoryManager::wrap).
    pub fn handler(mut self, tag: CommandTag, handler: Arc<dyn CommandHandler>) -> Self {
        self.overrides.push((tag, handler));
        self
    }

    /// Spawn the dispatcher and render coordinator and return the session.
    ///
    /// # Panics
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(self, document: DashboardDocument) -> Dashboard {
        let mut registry = default_registry();
        for (tag, handler) in self.overrides {
            registry.register(tag, handler);
        }

        let store = DocumentStore::new(document);
        let bus = EventBus::new(self.config.event_capacity);
        let history = Arc::new(HistoryManager::new(self.config.history_capacity));
        let render = spawn_coordinator(self.config.render.clone(), bus.clone());

        let core = DispatcherCore {
            store: store.clone(),
            bus: bus.clone(),
            backend: self.backend,
            render: render.clone(),
            history: Arc::clone(&history),
            handlers: registry.into_map(),
        };
        let handle = spawn_dispatcher(core, self.config.command_buffer);
        tracing::info!(
            history_capacity = self.config.history_capacity,
            command_buffer = self.config.command_buffer,
            "dashboard session opened"
        );

        Dashboard {
            handle,
            store,
            bus,
            render,
            history,
        }
    }
}

/// A running dashboard session.
///
/// Cheap to clone; all clones drive the same dispatcher.
#[derive(Debug, Clone)]
pub struct Dashboard {
    handle: DashboardHandle,
    store: DocumentStore,
    bus: EventBus,
    render: RenderCoordinatorHandle,
    history: Arc<HistoryManager>,
}

impl Dashboard {
    /// Dispatch a command and wait for its terminal event.
    ///
    /// # Errors
    ///
    /// [`DispatchError::DispatcherGone`] if the session has been shut down.
    pub async fn dispatch(
        &self,
        command: DashboardCommand,
    ) -> Result<DashboardEvent, DispatchError> {
        self.handle.dispatch(command).await
    }

    /// Dispatch a command under a caller-supplied correlation id.
    ///
    /// # Errors
    ///
    /// [`DispatchError::DispatcherGone`] if the session has been shut down.
    pub async fn dispatch_with_correlation(
        &self,
        command: DashboardCommand,
        correlation_id: impl Into<String>,
    ) -> Result<DashboardEvent, DispatchError> {
        self.handle
            .dispatch_with_correlation(command, correlation_id)
            .await
    }

    /// # Errors
    ///
    /// [`DispatchError::DispatcherGone`] if the session has been shut down.
    pub async fn dispatch_envelope(
        &self,
        envelope: CommandEnvelope,
    ) -> Result<DashboardEvent, DispatchError> {
        self.handle.dispatch_envelope(envelope).await
    }

    /// Decode a JSON command (`{"type": ..., "data": ...}`) and dispatch it.
    ///
    /// # Errors
    ///
    /// * [`DispatchError::InvalidCommand`] if `command` is not a valid
    ///   [`DashboardCommand`].
    /// * [`DispatchError::DispatcherGone`] if the session has been shut down.
    pub async fn dispatch_json(
        &self,
        command: serde_json::Value,
    ) -> Result<DashboardEvent, DispatchError> {
        let command: DashboardCommand = serde_json::from_value(command).map_err(|e| {
            tracing::warn!(error = %e, "rejected undecodable command");
            DispatchError::InvalidCommand(e.to_string())
        })?;
        self.dispatch(command).await
    }

    /// Handle to the dispatcher, for callers that only dispatch.
    pub fn handle(&self) -> DashboardHandle {
        self.handle.clone()
    }

    pub fn state(&self) -> Arc<DashboardDocument> {
        self.store.get_state()
    }

    pub fn select<T>(&self, selector: impl FnOnce(&DashboardDocument) -> T) -> T {
        self.store.select(selector)
    }

    /// Receiver notified on every document replacement.
    pub fn watch_state(&self) -> watch::Receiver<Arc<DashboardDocument>> {
        self.store.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DashboardEvent> {
        self.bus.subscribe()
    }

    /// All events from now on as a stream.
    pub fn events(&self) -> impl Stream<Item = DashboardEvent> + Send + 'static {
        self.bus.stream()
    }

    pub fn render(&self) -> &RenderCoordinatorHandle {
        &self.render
    }

    pub fn history(&self) -> &HistoryManager {
        &self.history
    }

    /// Stop the dispatcher after the commands already queued.
    pub async fn shutdown(&self) {
        self.handle.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::dispatcher::{HandlerContext, HandlerFuture};
    use crate::event::EventKind;
    use tokio_stream::StreamExt;

    struct Rename;

    impl CommandHandler for Rename {
        fn handle<'a>(
            &'a self,
            ctx: &'a HandlerContext,
            _command: DashboardCommand,
        ) -> HandlerFuture<'a> {
            Box::pin(async move {
                ctx.try_mutate(|doc| {
                    let mut next = doc.clone();
                    next.title = "renamed".into();
                    Ok(next)
                })?;
                Ok(EventKind::LayoutHistoryCleared)
            })
        }
    }

    fn builder() -> DashboardBuilder {
        DashboardBuilder::new(Arc::new(InMemoryBackend::new()))
    }

    #[test]
    fn config_deserializes_partial_documents() {
        let config: DashboardConfig =
            serde_json::from_str(r#"{"history_capacity": 5}"#).expect("deserialize");
        assert_eq!(config.history_capacity, 5);
        assert_eq!(config.command_buffer, 32);
        assert_eq!(config.render, RenderConfig::default());
    }

    #[tokio::test]
    async fn builder_applies_history_capacity() {
        let dashboard = builder()
            .config(DashboardConfig {
                history_capacity: 3,
                ..DashboardConfig::default()
            })
            .open(DashboardDocument::new("d"));
        assert_eq!(dashboard.history().capacity(), 3);
    }

    #[tokio::test]
    async fn handler_override_replaces_builtin() {
        let dashboard = builder()
            .handler(CommandTag::ClearLayoutHistory, Arc::new(Rename))
            .open(DashboardDocument::new("d"));

        dashboard
            .dispatch(DashboardCommand::ClearLayoutHistory)
            .await
            .expect("dispatch");

        assert_eq!(dashboard.state().title, "renamed");
    }

    #[tokio::test]
    async fn dispatch_with_correlation_tags_every_event() {
        let dashboard = builder().open(DashboardDocument::new("d"));
        let mut events = Box::pin(dashboard.events());

        let terminal = dashboard
            .dispatch_with_correlation(DashboardCommand::ClearLayoutHistory, "corr-9")
            .await
            .expect("dispatch");

        assert_eq!(terminal.correlation_id.as_deref(), Some("corr-9"));
        let started = events.next().await.expect("started");
        assert_eq!(started.correlation_id.as_deref(), Some("corr-9"));
        assert!(matches!(started.kind, EventKind::CommandStarted { .. }));
        assert_eq!(events.next().await.expect("terminal"), terminal);
    }

    #[tokio::test]
    async fn watch_state_sees_commits() {
        let dashboard = builder()
            .handler(CommandTag::ClearLayoutHistory, Arc::new(Rename))
            .open(DashboardDocument::new("d"));
        let mut state = dashboard.watch_state();

        dashboard
            .dispatch(DashboardCommand::ClearLayoutHistory)
            .await
            .expect("dispatch");

        state.changed().await.expect("changed");
        assert_eq!(state.borrow().title, "renamed");
        assert_eq!(dashboard.select(|doc| doc.version), 1);
    }

    #[tokio::test]
    async fn dispatch_json_decodes_adjacently_tagged_commands() {
        let dashboard = builder().open(DashboardDocument::new("d"));

        let terminal = dashboard
            .dispatch_json(serde_json::json!({"type": "UndoLayoutChanges", "data": {}}))
            .await
            .expect("dispatch");
        assert!(matches!(terminal.kind, EventKind::LayoutHistoryEmpty { .. }));

        let err = dashboard
            .dispatch_json(serde_json::json!({"type": "Explode"}))
            .await
            .expect_err("should reject");
        assert!(matches!(err, DispatchError::InvalidCommand(_)));
    }

    #[tokio::test]
    async fn shutdown_stops_dispatch() {
        let dashboard = builder().open(DashboardDocument::new("d"));
        dashboard.shutdown().await;
        tokio::task::yield_now().await;

        let result = dashboard.dispatch(DashboardCommand::RequestRender).await;

        assert_eq!(result.unwrap_err(), DispatchError::DispatcherGone);
    }
}
