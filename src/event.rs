//! Dashboard events and the broadcast bus they are published on.
//!
//! Every command produces a `CommandStarted` event, zero or more
//! intermediate events, and exactly one terminal event: either an
//! operation-specific success variant or `CommandFailed`. The render
//! coordinator additionally publishes spontaneous `RenderRequested` and
//! `RenderResolved` events that carry no correlation id.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};

use crate::command::CommandTag;
use crate::document::{FilterContext, FilterView, SectionHeader};
use crate::error::FailureReason;
use crate::refs::ObjRef;

/// Something that happened, correlated to the command that caused it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardEvent {
    /// Correlation id of the triggering command, `None` for system events.
    pub correlation_id: Option<String>,
    pub kind: EventKind,
}

impl DashboardEvent {
    pub fn correlated(correlation_id: impl Into<String>, kind: EventKind) -> Self {
        Self {
            correlation_id: Some(correlation_id.into()),
            kind,
        }
    }

    pub fn system(kind: EventKind) -> Self {
        Self {
            correlation_id: None,
            kind,
        }
    }

    /// `true` if this is a `CommandFailed` event.
    pub fn is_failure(&self) -> bool {
        matches!(self.kind, EventKind::CommandFailed { .. })
    }

    /// Failure reason, if this is a `CommandFailed` event.
    pub fn failure_reason(&self) -> Option<FailureReason> {
        match &self.kind {
            EventKind::CommandFailed { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}

/// Why the layout changed outside of a regular edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LayoutChangeCause {
    Undo,
    Redo,
}

/// Event payloads. Adjacently tagged (`"type"` + `"data"`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum EventKind {
    // --- command lifecycle ---
    CommandStarted {
        command: CommandTag,
    },
    CommandFailed {
        command: CommandTag,
        reason: FailureReason,
        message: String,
    },

    // --- layout ---
    LayoutSectionAdded {
        index: usize,
    },
    LayoutSectionMoved {
        from_index: usize,
        to_index: usize,
    },
    LayoutSectionRemoved {
        index: usize,
    },
    LayoutSectionHeaderChanged {
        index: usize,
        header: SectionHeader,
    },
    SectionItemsAdded {
        section_index: usize,
        item_index: usize,
        widget_ids: Vec<String>,
    },
    SectionItemMoved {
        from_section_index: usize,
        from_item_index: usize,
        to_section_index: usize,
        to_item_index: usize,
    },
    SectionItemRemoved {
        section_index: usize,
        item_index: usize,
        widget_id: String,
        /// The section went with its last item (eager removal).
        #[serde(default)]
        section_removed: bool,
    },
    SectionItemReplaced {
        section_index: usize,
        item_index: usize,
        /// Id of the widget that was replaced.
        replaced: String,
        widget_ids: Vec<String>,
    },
    LayoutChanged {
        cause: LayoutChangeCause,
        /// Number of history entries applied.
        steps: usize,
    },
    /// Undo or redo was requested with nothing to apply.
    LayoutHistoryEmpty {
        command: CommandTag,
    },
    LayoutHistoryCleared,

    // --- filter context ---
    AttributeFilterAdded {
        local_identifier: String,
        index: usize,
    },
    AttributeFiltersRemoved {
        local_identifiers: Vec<String>,
    },
    AttributeFilterMoved {
        local_identifier: String,
        from_index: usize,
        to_index: usize,
    },
    AttributeFilterSelectionChanged {
        local_identifier: String,
    },
    DateFilterSelectionChanged {
        local_identifier: String,
    },
    AttributeFilterParentChanged {
        local_identifier: String,
    },
    /// Terminal event of a bulk selection change; lists the filters whose
    /// selection changed.
    FilterContextSelectionChanged {
        local_identifiers: Vec<String>,
    },
    /// Intermediate event carrying the filter context after a change.
    FilterContextChanged {
        filter_context: FilterContext,
    },

    // --- filter views ---
    FilterViewSaved {
        filter_view: FilterView,
    },
    FilterViewDeleted {
        filter_view: ObjRef,
    },
    FilterViewApplied {
        filter_view: ObjRef,
    },
    FilterViewDefaultChanged {
        filter_view: ObjRef,
        is_default: bool,
    },

    // --- rendering ---
    RenderCycleStarted,
    AsyncRenderRequested {
        component_id: String,
    },
    AsyncRenderResolved {
        component_id: String,
    },
    /// Published by the coordinator when a render cycle starts.
    RenderRequested {
        cycle: u64,
    },
    /// Published by the coordinator exactly once per render cycle.
    RenderResolved {
        cycle: u64,
        /// `true` when the absolute ceiling elapsed first.
        forced: bool,
        /// Components still rendering when a forced resolution happened.
        outstanding: Vec<String>,
    },
}

/// Default capacity of the broadcast buffer.
pub(crate) const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Broadcast bus shared by the dispatcher and the render coordinator.
///
/// Publishing never fails: with no subscribers the event is dropped.
/// Slow subscribers that fall behind by more than the buffer capacity
/// lose the oldest events.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<DashboardEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, event: DashboardEvent) {
        tracing::trace!(?event, "publishing event");
        // `send` only errors when nobody is listening.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DashboardEvent> {
        self.tx.subscribe()
    }

    /// Subscribe as a stream, silently skipping over lag gaps.
    pub fn stream(&self) -> impl Stream<Item = DashboardEvent> + Send + 'static {
        BroadcastStream::new(self.tx.subscribe()).filter_map(|res| match res {
            Ok(event) => Some(event),
            Err(e) => {
                tracing::warn!(error = %e, "event subscriber lagged");
                None
            }
        })
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_kind_is_adjacently_tagged() {
        let kind = EventKind::CommandFailed {
            command: CommandTag::AddSectionItems,
            reason: FailureReason::UserError,
            message: "bad index".into(),
        };
        let value = serde_json::to_value(&kind).expect("serialize");
        assert_eq!(
            value,
            json!({
                "type": "CommandFailed",
                "data": {
                    "command": "AddSectionItems",
                    "reason": "USER_ERROR",
                    "message": "bad index",
                }
            })
        );
    }

    #[test]
    fn failure_helpers() {
        let ok = DashboardEvent::correlated("c", EventKind::LayoutHistoryCleared);
        assert!(!ok.is_failure());
        assert_eq!(ok.failure_reason(), None);

        let failed = DashboardEvent::correlated(
            "c",
            EventKind::CommandFailed {
                command: CommandTag::DeleteFilterView,
                reason: FailureReason::ProtocolError,
                message: "503".into(),
            },
        );
        assert!(failed.is_failure());
        assert_eq!(failed.failure_reason(), Some(FailureReason::ProtocolError));
    }

    #[test]
    fn system_events_have_no_correlation_id() {
        let ev = DashboardEvent::system(EventKind::RenderRequested { cycle: 1 });
        assert_eq!(ev.correlation_id, None);
    }

    #[tokio::test]
    async fn bus_delivers_to_every_subscriber() {
        let bus = EventBus::new(8);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.publish(DashboardEvent::system(EventKind::RenderCycleStarted));

        assert_eq!(a.recv().await.expect("a").kind, EventKind::RenderCycleStarted);
        assert_eq!(b.recv().await.expect("b").kind, EventKind::RenderCycleStarted);
    }

    #[tokio::test]
    async fn stream_yields_published_events() {
        let bus = EventBus::new(8);
        let mut stream = Box::pin(bus.stream());

        bus.publish(DashboardEvent::system(EventKind::LayoutHistoryCleared));

        let ev = stream.next().await.expect("stream open");
        assert_eq!(ev.kind, EventKind::LayoutHistoryCleared);
    }

    #[test]
    fn publish_without_subscribers_does_not_panic() {
        let bus = EventBus::default();
        bus.publish(DashboardEvent::system(EventKind::RenderCycleStarted));
    }
}
