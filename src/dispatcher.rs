//! Command dispatcher actor.
//!
//! The dispatcher runs as a single tokio task that drains an `mpsc` queue
//! of [`CommandEnvelope`]s and processes them strictly one at a time. It is
//! the only writer to the [`DocumentStore`], so handler mutations never
//! interleave with another command's mutations.
//!
//! Public API: [`CommandHandler`] (the handler seam), [`HandlerContext`]
//! (what a handler may touch), [`HandlerRegistry`] and
//! [`DashboardHandle`] (cloneable async handle to the running actor).

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::Instrument;

use crate::backend::DashboardBackend;
use crate::command::{CommandEnvelope, CommandTag, DashboardCommand};
use crate::document::DashboardDocument;
use crate::error::{CommandError, DispatchError, FailureReason};
use crate::event::{DashboardEvent, EventBus, EventKind};
use crate::history::HistoryManager;
use crate::render::RenderCoordinatorHandle;
use crate::store::DocumentStore;

/// Default capacity of the command queue.
pub(crate) const DEFAULT_COMMAND_CAPACITY: usize = 32;

/// Future returned by a handler: the terminal event payload or an error.
pub type HandlerFuture<'a> =
    Pin<Box<dyn Future<Output = Result<EventKind, CommandError>> + Send + 'a>>;

/// Routine bound to a [`CommandTag`].
///
/// A handler may read the store, call collaborators, apply mutations,
/// emit intermediate events, and dispatch nested commands through the
/// [`HandlerContext`]. It finishes by returning the terminal event payload
/// (`Ok`) or a [`CommandError`], which the dispatcher turns into a
/// `CommandFailed` event.
///
/// # Contract
///
/// - Operations meant to be atomic compute the full replacement document
///   before issuing a single mutation, so a failure leaves the store
///   untouched.
/// - Handlers never panic on user input; validation failures are returned
///   as [`CommandError::User`].
pub trait CommandHandler: Send + Sync {
    fn handle<'a>(
        &'a self,
        ctx: &'a HandlerContext,
        command: DashboardCommand,
    ) -> HandlerFuture<'a>;
}

/// Everything the dispatcher shares with its handlers.
pub(crate) struct DispatcherCore {
    pub(crate) store: DocumentStore,
    pub(crate) bus: EventBus,
    pub(crate) backend: Arc<dyn DashboardBackend>,
    pub(crate) render: RenderCoordinatorHandle,
    pub(crate) history: Arc<HistoryManager>,
    pub(crate) handlers: HashMap<CommandTag, Arc<dyn CommandHandler>>,
}

/// What a handler may touch while processing one command.
pub struct HandlerContext {
    correlation_id: String,
    command: CommandTag,
    core: Arc<DispatcherCore>,
}

impl HandlerContext {
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Tag of the command being processed.
    pub fn command(&self) -> CommandTag {
        self.command
    }

    /// Snapshot of the current document.
    pub fn state(&self) -> Arc<DashboardDocument> {
        self.core.store.get_state()
    }

    pub fn store(&self) -> &DocumentStore {
        &self.core.store
    }

    /// Apply a fallible mutation; on error the store is left untouched.
    ///
    /// # Errors
    ///
    /// Returns the error produced by `mutation`.
    pub fn try_mutate<F>(&self, mutation: F) -> Result<Arc<DashboardDocument>, CommandError>
    where
        F: FnOnce(&DashboardDocument) -> Result<DashboardDocument, CommandError>,
    {
        self.core.store.try_dispatch(mutation)
    }

    /// Publish an intermediate event correlated to this command.
    pub fn emit(&self, kind: EventKind) {
        self.core
            .bus
            .publish(DashboardEvent::correlated(self.correlation_id.clone(), kind));
    }

    pub fn backend(&self) -> &dyn DashboardBackend {
        self.core.backend.as_ref()
    }

    pub fn render(&self) -> &RenderCoordinatorHandle {
        &self.core.render
    }

    pub fn history(&self) -> &HistoryManager {
        &self.core.history
    }

    /// Process a nested command inline and return its terminal event.
    ///
    /// The nested command inherits this command's correlation id. It runs
    /// on the same logical thread, so it never queues behind its parent.
    pub async fn dispatch(&self, command: DashboardCommand) -> DashboardEvent {
        let envelope =
            CommandEnvelope::new(command).with_correlation_id(self.correlation_id.clone());
        Arc::clone(&self.core).process(envelope).await
    }
}

impl DispatcherCore {
    /// Run one command to completion and publish its events.
    ///
    /// Boxed because handlers may recurse into it through
    /// [`HandlerContext::dispatch`].
    pub(crate) fn process(
        self: Arc<Self>,
        envelope: CommandEnvelope,
    ) -> Pin<Box<dyn Future<Output = DashboardEvent> + Send>> {
        let tag = envelope.command.tag();
        let span = tracing::info_span!(
            "dispatch",
            command = %tag,
            correlation_id = %envelope.correlation_id,
        );

        Box::pin(
            async move {
                let CommandEnvelope {
                    correlation_id,
                    command,
                } = envelope;

                self.bus.publish(DashboardEvent::correlated(
                    correlation_id.clone(),
                    EventKind::CommandStarted { command: tag },
                ));

                let outcome = match self.handlers.get(&tag).cloned() {
                    Some(handler) => {
                        let ctx = HandlerContext {
                            correlation_id: correlation_id.clone(),
                            command: tag,
                            core: Arc::clone(&self),
                        };
                        handler.handle(&ctx, command).await
                    }
                    None => Err(CommandError::user(format!(
                        "no handler registered for {tag}"
                    ))),
                };

                let kind = match outcome {
                    Ok(kind) => {
                        tracing::info!("command succeeded");
                        kind
                    }
                    Err(err) => {
                        let reason = err.reason();
                        match reason {
                            FailureReason::UserError => {
                                tracing::warn!(error = %err, "command rejected")
                            }
                            FailureReason::ProtocolError => {
                                tracing::warn!(error = %err, "collaborator call failed")
                            }
                            FailureReason::InvariantError => {
                                tracing::error!(error = %err, "invariant violated")
                            }
                        }
                        EventKind::CommandFailed {
                            command: tag,
                            reason,
                            message: err.to_string(),
                        }
                    }
                };

                let terminal = DashboardEvent::correlated(correlation_id, kind);
                self.bus.publish(terminal.clone());
                terminal
            }
            .instrument(span),
        )
    }
}

/// Handlers keyed by command tag.
///
/// Registering a second handler for the same tag replaces the first.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<CommandTag, Arc<dyn CommandHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tag: CommandTag, handler: Arc<dyn CommandHandler>) -> &mut Self {
        if self.handlers.insert(tag, handler).is_some() {
            tracing::debug!(command = %tag, "replaced command handler");
        }
        self
    }

    pub fn contains(&self, tag: CommandTag) -> bool {
        self.handlers.contains_key(&tag)
    }

    pub(crate) fn into_map(self) -> HashMap<CommandTag, Arc<dyn CommandHandler>> {
        self.handlers
    }
}

/// Messages sent from [`DashboardHandle`] to the actor loop.
pub(crate) enum DispatcherMessage {
    Dispatch {
        envelope: CommandEnvelope,
        reply: oneshot::Sender<DashboardEvent>,
    },
    Shutdown,
}

/// Runs the dispatcher loop until the channel closes or `Shutdown` arrives.
pub(crate) async fn run_dispatcher(
    core: Arc<DispatcherCore>,
    mut rx: mpsc::Receiver<DispatcherMessage>,
) {
    while let Some(msg) = rx.recv().await {
        match msg {
            DispatcherMessage::Dispatch { envelope, reply } => {
                let terminal = Arc::clone(&core).process(envelope).await;
                // The caller may have stopped waiting; the event is on the bus anyway.
                let _ = reply.send(terminal);
            }
            DispatcherMessage::Shutdown => break,
        }
    }
    tracing::debug!("dispatcher stopped");
}

/// Spawn the dispatcher task on the current tokio runtime.
pub(crate) fn spawn_dispatcher(core: DispatcherCore, capacity: usize) -> DashboardHandle {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    tokio::spawn(run_dispatcher(Arc::new(core), rx));
    DashboardHandle { sender: tx }
}

/// Async handle to the running dispatcher.
///
/// Lightweight, cloneable, and `Send + Sync`.
#[derive(Debug, Clone)]
pub struct DashboardHandle {
    sender: mpsc::Sender<DispatcherMessage>,
}

impl std::fmt::Debug for DispatcherMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatcherMessage::Dispatch { envelope, .. } => f
                .debug_struct("Dispatch")
                .field("correlation_id", &envelope.correlation_id)
                .finish(),
            DispatcherMessage::Shutdown => f.write_str("Shutdown"),
        }
    }
}

impl DashboardHandle {
    /// Dispatch a command with a generated correlation id and wait for its
    /// terminal event.
    ///
    /// # Errors
    ///
    /// [`DispatchError::DispatcherGone`] if the dispatcher task has exited.
    pub async fn dispatch(
        &self,
        command: DashboardCommand,
    ) -> Result<DashboardEvent, DispatchError> {
        self.dispatch_envelope(CommandEnvelope::new(command)).await
    }

    /// Dispatch a command under a caller-supplied correlation id.
    ///
    /// # Errors
    ///
    /// [`DispatchError::DispatcherGone`] if the dispatcher task has exited.
    pub async fn dispatch_with_correlation(
        &self,
        command: DashboardCommand,
        correlation_id: impl Into<String>,
    ) -> Result<DashboardEvent, DispatchError> {
        self.dispatch_envelope(CommandEnvelope::new(command).with_correlation_id(correlation_id))
            .await
    }

    /// Dispatch a pre-built envelope and wait for its terminal event.
    ///
    /// # Errors
    ///
    /// [`DispatchError::DispatcherGone`] if the dispatcher task has exited.
    pub async fn dispatch_envelope(
        &self,
        envelope: CommandEnvelope,
    ) -> Result<DashboardEvent, DispatchError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(DispatcherMessage::Dispatch {
                envelope,
                reply: tx,
            })
            .await
            .map_err(|_| DispatchError::DispatcherGone)?;
        rx.await.map_err(|_| DispatchError::DispatcherGone)
    }

    /// Whether the dispatcher task is still running.
    pub fn is_alive(&self) -> bool {
        !self.sender.is_closed()
    }

    /// Ask the dispatcher to stop after the commands already queued.
    pub async fn shutdown(&self) {
        let _ = self.sender.send(DispatcherMessage::Shutdown).await;
    }
}

#[cfg(test)]
pub(crate) mod test_fixtures {
    use super::*;
    use crate::render::{RenderConfig, spawn_coordinator};

    /// A running dispatcher plus the shared pieces behind it.
    pub(crate) struct Harness {
        pub(crate) handle: DashboardHandle,
        pub(crate) store: DocumentStore,
        pub(crate) bus: EventBus,
        pub(crate) history: Arc<HistoryManager>,
    }

    pub(crate) fn spawn_harness(
        registry: HandlerRegistry,
        document: DashboardDocument,
        backend: Arc<dyn DashboardBackend>,
    ) -> Harness {
        let store = DocumentStore::new(document);
        let bus = EventBus::new(64);
        let history = Arc::new(HistoryManager::new(10));
        let core = DispatcherCore {
            store: store.clone(),
            bus: bus.clone(),
            backend,
            render: spawn_coordinator(RenderConfig::default(), bus.clone()),
            history: Arc::clone(&history),
            handlers: registry.into_map(),
        };
        Harness {
            handle: spawn_dispatcher(core, 8),
            store,
            bus,
            history,
        }
    }
}
