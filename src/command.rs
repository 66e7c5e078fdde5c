//! Dashboard commands and the envelope that carries them to the dispatcher.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::document::{AttributeFilterParent, DateFilterSelection, LayoutItem, SectionHeader};
use crate::refs::ObjRef;

/// An intended state change.
///
/// Index fields typed `i32` are relative: `-1` means "at the end", any
/// other negative value is invalid. Fields typed `usize` must point at an
/// existing element.
///
/// Uses adjacently tagged serde (`"type"` + `"data"`), the same convention
/// as [`EventKind`](crate::EventKind).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum DashboardCommand {
    // --- layout ---
    AddLayoutSection {
        index: i32,
        #[serde(default)]
        header: Option<SectionHeader>,
        #[serde(default)]
        items: Vec<LayoutItem>,
    },
    MoveLayoutSection {
        section_index: usize,
        to_index: i32,
    },
    RemoveLayoutSection {
        index: i32,
    },
    ChangeLayoutSectionHeader {
        index: usize,
        header: SectionHeader,
    },
    AddSectionItems {
        section_index: usize,
        item_index: i32,
        items: Vec<LayoutItem>,
    },
    MoveSectionItem {
        section_index: usize,
        item_index: usize,
        /// `-1` targets the last section.
        to_section_index: i32,
        to_item_index: i32,
    },
    RemoveSectionItem {
        section_index: usize,
        item_index: i32,
        /// Also remove the section when this was its only item.
        #[serde(default)]
        eager: bool,
    },
    /// Replace one item with one or more new items at the same position.
    ReplaceSectionItem {
        section_index: usize,
        item_index: i32,
        items: Vec<LayoutItem>,
    },
    UndoLayoutChanges {
        /// Keep undoing while the next entry's correlation id starts with
        /// this prefix. `None` undoes exactly one entry.
        #[serde(default)]
        correlation_prefix: Option<String>,
        /// Whether undone entries become available for redo.
        #[serde(default = "default_redoable")]
        redoable: bool,
    },
    RedoLayoutChanges,
    ClearLayoutHistory,

    // --- filter context ---
    AddAttributeFilter {
        display_form: ObjRef,
        index: i32,
        #[serde(default)]
        local_identifier: Option<String>,
        #[serde(default)]
        parents: Vec<AttributeFilterParent>,
        #[serde(default)]
        selected: Vec<String>,
        #[serde(default = "default_negative")]
        negative_selection: bool,
    },
    RemoveAttributeFilters {
        local_identifiers: Vec<String>,
    },
    MoveAttributeFilter {
        local_identifier: String,
        index: i32,
    },
    ChangeAttributeFilterSelection {
        local_identifier: String,
        selected: Vec<String>,
        negative_selection: bool,
    },
    ChangeDateFilterSelection {
        #[serde(default)]
        data_set: Option<ObjRef>,
        selection: DateFilterSelection,
    },
    /// Replace the parents of an attribute filter. An empty list clears them.
    SetAttributeFilterParent {
        local_identifier: String,
        parents: Vec<AttributeFilterParent>,
    },
    /// Apply several selections at once, matched against the filter
    /// context by display form (attribute) or data set (date).
    ChangeFilterContextSelection {
        filters: Vec<FilterSelection>,
        /// Reset filters not mentioned in `filters` to "all".
        #[serde(default)]
        reset_others: bool,
    },

    // --- filter views ---
    SaveFilterView {
        name: String,
        is_default: bool,
    },
    DeleteFilterView {
        filter_view: ObjRef,
    },
    ApplyFilterView {
        filter_view: ObjRef,
    },
    SetFilterViewAsDefault {
        filter_view: ObjRef,
        is_default: bool,
    },

    // --- rendering ---
    RequestRender,
    RequestAsyncRender {
        component_id: String,
    },
    ResolveAsyncRender {
        component_id: String,
    },
}

fn default_redoable() -> bool {
    true
}

fn default_negative() -> bool {
    true
}

impl DashboardCommand {
    /// Undo the most recent layout change, keeping it available for redo.
    pub fn undo() -> Self {
        DashboardCommand::UndoLayoutChanges {
            correlation_prefix: None,
            redoable: true,
        }
    }

    /// Undo the most recent layout change and discard it.
    ///
    /// Meant for cancelling multi-command interactions (e.g. an aborted
    /// drag-and-drop) where redo makes no sense.
    pub fn revert_last_layout_change() -> Self {
        DashboardCommand::UndoLayoutChanges {
            correlation_prefix: None,
            redoable: false,
        }
    }

    pub fn redo() -> Self {
        DashboardCommand::RedoLayoutChanges
    }

    /// The tag handlers are registered under.
    pub fn tag(&self) -> CommandTag {
        match self {
            DashboardCommand::AddLayoutSection { .. } => CommandTag::AddLayoutSection,
            DashboardCommand::MoveLayoutSection { .. } => CommandTag::MoveLayoutSection,
            DashboardCommand::RemoveLayoutSection { .. } => CommandTag::RemoveLayoutSection,
            DashboardCommand::ChangeLayoutSectionHeader { .. } => {
                CommandTag::ChangeLayoutSectionHeader
            }
            DashboardCommand::AddSectionItems { .. } => CommandTag::AddSectionItems,
            DashboardCommand::MoveSectionItem { .. } => CommandTag::MoveSectionItem,
            DashboardCommand::RemoveSectionItem { .. } => CommandTag::RemoveSectionItem,
            DashboardCommand::ReplaceSectionItem { .. } => CommandTag::ReplaceSectionItem,
            DashboardCommand::UndoLayoutChanges { .. } => CommandTag::UndoLayoutChanges,
            DashboardCommand::RedoLayoutChanges => CommandTag::RedoLayoutChanges,
            DashboardCommand::ClearLayoutHistory => CommandTag::ClearLayoutHistory,
            DashboardCommand::AddAttributeFilter { .. } => CommandTag::AddAttributeFilter,
            DashboardCommand::RemoveAttributeFilters { .. } => CommandTag::RemoveAttributeFilters,
            DashboardCommand::MoveAttributeFilter { .. } => CommandTag::MoveAttributeFilter,
            DashboardCommand::ChangeAttributeFilterSelection { .. } => {
                CommandTag::ChangeAttributeFilterSelection
            }
            DashboardCommand::ChangeDateFilterSelection { .. } => {
                CommandTag::ChangeDateFilterSelection
            }
            DashboardCommand::SetAttributeFilterParent { .. } => {
                CommandTag::SetAttributeFilterParent
            }
            DashboardCommand::ChangeFilterContextSelection { .. } => {
                CommandTag::ChangeFilterContextSelection
            }
            DashboardCommand::SaveFilterView { .. } => CommandTag::SaveFilterView,
            DashboardCommand::DeleteFilterView { .. } => CommandTag::DeleteFilterView,
            DashboardCommand::ApplyFilterView { .. } => CommandTag::ApplyFilterView,
            DashboardCommand::SetFilterViewAsDefault { .. } => CommandTag::SetFilterViewAsDefault,
            DashboardCommand::RequestRender => CommandTag::RequestRender,
            DashboardCommand::RequestAsyncRender { .. } => CommandTag::RequestAsyncRender,
            DashboardCommand::ResolveAsyncRender { .. } => CommandTag::ResolveAsyncRender,
        }
    }
}

/// One entry of [`DashboardCommand::ChangeFilterContextSelection`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum FilterSelection {
    Attribute {
        display_form: ObjRef,
        selected: Vec<String>,
        negative_selection: bool,
    },
    Date {
        /// `None` targets the common date filter.
        #[serde(default)]
        data_set: Option<ObjRef>,
        selection: DateFilterSelection,
    },
}

/// Payload-free identifier of a [`DashboardCommand`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandTag {
    AddLayoutSection,
    MoveLayoutSection,
    RemoveLayoutSection,
    ChangeLayoutSectionHeader,
    AddSectionItems,
    MoveSectionItem,
    RemoveSectionItem,
    ReplaceSectionItem,
    UndoLayoutChanges,
    RedoLayoutChanges,
    ClearLayoutHistory,
    AddAttributeFilter,
    RemoveAttributeFilters,
    MoveAttributeFilter,
    ChangeAttributeFilterSelection,
    ChangeDateFilterSelection,
    SetAttributeFilterParent,
    ChangeFilterContextSelection,
    SaveFilterView,
    DeleteFilterView,
    ApplyFilterView,
    SetFilterViewAsDefault,
    RequestRender,
    RequestAsyncRender,
    ResolveAsyncRender,
}

impl fmt::Display for CommandTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A command plus the correlation id that every resulting event carries.
///
/// # Examples
///
/// ```
/// use dashboard_core::{CommandEnvelope, DashboardCommand};
///
/// let envelope = CommandEnvelope::new(DashboardCommand::redo())
///     .with_correlation_id("dnd-42-drop");
/// assert_eq!(envelope.correlation_id, "dnd-42-drop");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub correlation_id: String,
    pub command: DashboardCommand,
}

impl CommandEnvelope {
    /// Wrap `command` with a freshly generated correlation id.
    pub fn new(command: DashboardCommand) -> Self {
        Self {
            correlation_id: Uuid::new_v4().to_string(),
            command,
        }
    }

    /// Replace the generated correlation id with a caller-supplied one.
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = id.into();
        self
    }
}

/// Resolve a relative insertion index against a list of `len` elements.
///
/// `-1` and `len` both mean "append". Returns `None` when out of range.
pub(crate) fn insertion_index(len: usize, index: i32) -> Option<usize> {
    match index {
        -1 => Some(len),
        i if i < 0 => None,
        i => {
            let i = i as usize;
            (i <= len).then_some(i)
        }
    }
}

/// Resolve a relative index that must point at an existing element.
///
/// `-1` means the last element. Returns `None` when out of range or when
/// the list is empty.
pub(crate) fn existing_index(len: usize, index: i32) -> Option<usize> {
    match index {
        -1 => len.checked_sub(1),
        i if i < 0 => None,
        i => {
            let i = i as usize;
            (i < len).then_some(i)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_generates_distinct_correlation_ids() {
        let a = CommandEnvelope::new(DashboardCommand::RequestRender);
        let b = CommandEnvelope::new(DashboardCommand::RequestRender);
        assert_ne!(a.correlation_id, b.correlation_id);
        assert!(Uuid::parse_str(&a.correlation_id).is_ok());
    }

    #[test]
    fn builder_overrides_correlation_id() {
        let env = CommandEnvelope::new(DashboardCommand::redo()).with_correlation_id("corr-1");
        assert_eq!(env.correlation_id, "corr-1");
    }

    #[test]
    fn tag_matches_variant() {
        let cmd = DashboardCommand::AddSectionItems {
            section_index: 0,
            item_index: -1,
            items: vec![],
        };
        assert_eq!(cmd.tag(), CommandTag::AddSectionItems);
        assert_eq!(DashboardCommand::undo().tag(), CommandTag::UndoLayoutChanges);
        assert_eq!(CommandTag::SaveFilterView.to_string(), "SaveFilterView");
    }

    #[test]
    fn undo_defaults_to_redoable_when_deserialized() {
        let cmd: DashboardCommand =
            serde_json::from_value(json!({"type": "UndoLayoutChanges", "data": {}}))
                .expect("deserialize");
        assert_eq!(cmd, DashboardCommand::undo());
    }

    #[test]
    fn move_item_accepts_last_section_target() {
        let cmd: DashboardCommand = serde_json::from_value(json!({
            "type": "MoveSectionItem",
            "data": {
                "section_index": 0,
                "item_index": 0,
                "to_section_index": -1,
                "to_item_index": -1
            }
        }))
        .expect("deserialize");
        assert!(matches!(
            cmd,
            DashboardCommand::MoveSectionItem {
                to_section_index: -1,
                ..
            }
        ));
    }

    #[test]
    fn remove_item_is_not_eager_by_default() {
        let cmd: DashboardCommand = serde_json::from_value(json!({
            "type": "RemoveSectionItem",
            "data": {"section_index": 0, "item_index": 1}
        }))
        .expect("deserialize");
        assert_eq!(
            cmd,
            DashboardCommand::RemoveSectionItem {
                section_index: 0,
                item_index: 1,
                eager: false,
            }
        );
    }

    #[test]
    fn filter_context_selection_decodes_mixed_entries() {
        let cmd: DashboardCommand = serde_json::from_value(json!({
            "type": "ChangeFilterContextSelection",
            "data": {"filters": [
                {"type": "Attribute", "data": {
                    "display_form": {"type": "Identifier", "data": "label.region"},
                    "selected": ["East"],
                    "negative_selection": false
                }},
                {"type": "Date", "data": {"selection": {"type": "AllTime"}}}
            ]}
        }))
        .expect("deserialize");
        let DashboardCommand::ChangeFilterContextSelection {
            filters,
            reset_others,
        } = cmd
        else {
            panic!("unexpected command: {cmd:?}");
        };
        assert_eq!(filters.len(), 2);
        assert!(!reset_others);
    }

    #[test]
    fn insertion_index_rules() {
        assert_eq!(insertion_index(3, -1), Some(3));
        assert_eq!(insertion_index(3, 0), Some(0));
        assert_eq!(insertion_index(3, 3), Some(3));
        assert_eq!(insertion_index(3, 4), None);
        assert_eq!(insertion_index(3, -2), None);
    }

    #[test]
    fn existing_index_rules() {
        assert_eq!(existing_index(3, -1), Some(2));
        assert_eq!(existing_index(3, 2), Some(2));
        assert_eq!(existing_index(3, 3), None);
        assert_eq!(existing_index(0, -1), None);
        assert_eq!(existing_index(0, 0), None);
    }
}
