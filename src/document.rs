//! The dashboard document: layout tree, filter context, saved filter views,
//! and volatile UI state.
//!
//! All types are plain values. The [`DocumentStore`](crate::DocumentStore)
//! owns the current document and replaces it whole on every mutation, so
//! nothing here needs interior mutability.

use serde::{Deserialize, Serialize};

use crate::refs::ObjRef;

/// The versioned dashboard document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DashboardDocument {
    /// Incremented by the store on every committed mutation.
    pub version: u64,
    pub title: String,
    pub layout: Layout,
    pub filter_context: FilterContext,
    /// Filter views known to this session.
    #[serde(default)]
    pub filter_views: Vec<FilterView>,
    /// Derived, non-persisted UI state.
    #[serde(default)]
    pub ui: UiState,
}

impl DashboardDocument {
    /// Create an empty document with the given title.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    /// Replace the layout, returning the updated document.
    pub fn with_layout(mut self, layout: Layout) -> Self {
        self.layout = layout;
        self
    }

    /// Replace the filter context, returning the updated document.
    pub fn with_filter_context(mut self, filter_context: FilterContext) -> Self {
        self.filter_context = filter_context;
        self
    }
}

// --- Layout ---

/// Root of the layout tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Layout {
    pub sections: Vec<LayoutSection>,
}

impl Layout {
    pub fn new(sections: Vec<LayoutSection>) -> Self {
        Self { sections }
    }
}

/// A horizontal band of items with an optional header.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LayoutSection {
    pub header: Option<SectionHeader>,
    pub items: Vec<LayoutItem>,
}

impl LayoutSection {
    pub fn new(items: Vec<LayoutItem>) -> Self {
        Self {
            header: None,
            items,
        }
    }

    pub fn with_header(mut self, header: SectionHeader) -> Self {
        self.header = Some(header);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionHeader {
    pub title: Option<String>,
    pub description: Option<String>,
}

impl SectionHeader {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            description: None,
        }
    }
}

/// One cell in a section: a widget plus its grid size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutItem {
    pub size: ItemSize,
    pub widget: Widget,
}

impl LayoutItem {
    /// Full-width insight item, the common case when building layouts in code.
    pub fn insight(widget_id: impl Into<String>, insight: ObjRef) -> Self {
        Self {
            size: ItemSize::default(),
            widget: Widget {
                id: widget_id.into(),
                title: String::new(),
                kind: WidgetKind::Insight { insight },
            },
        }
    }

    pub fn kpi(widget_id: impl Into<String>, measure: ObjRef) -> Self {
        Self {
            size: ItemSize::default(),
            widget: Widget {
                id: widget_id.into(),
                title: String::new(),
                kind: WidgetKind::Kpi { measure },
            },
        }
    }

    pub fn rich_text(widget_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            size: ItemSize::default(),
            widget: Widget {
                id: widget_id.into(),
                title: String::new(),
                kind: WidgetKind::RichText {
                    content: content.into(),
                },
            },
        }
    }
}

/// Grid size of an item. Geometry is computed elsewhere; this is opaque data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemSize {
    pub grid_width: u32,
    pub grid_height: Option<u32>,
}

impl Default for ItemSize {
    fn default() -> Self {
        Self {
            grid_width: 12,
            grid_height: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Widget {
    /// Session-unique widget identifier; doubles as the render component id.
    pub id: String,
    pub title: String,
    pub kind: WidgetKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum WidgetKind {
    Insight { insight: ObjRef },
    Kpi { measure: ObjRef },
    RichText { content: String },
}

impl Widget {
    /// The insight this widget renders, if it is an insight widget.
    pub fn insight_ref(&self) -> Option<&ObjRef> {
        match &self.kind {
            WidgetKind::Insight { insight } => Some(insight),
            _ => None,
        }
    }
}

// --- Filter context ---

/// Ordered list of dashboard filters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterContext {
    pub filters: Vec<FilterContextItem>,
}

impl FilterContext {
    pub fn new(filters: Vec<FilterContextItem>) -> Self {
        Self { filters }
    }

    /// Position of the filter with the given local identifier.
    pub fn position(&self, local_identifier: &str) -> Option<usize> {
        self.filters
            .iter()
            .position(|f| f.local_identifier() == local_identifier)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum FilterContextItem {
    Attribute(AttributeFilter),
    Date(DateFilter),
}

impl FilterContextItem {
    pub fn local_identifier(&self) -> &str {
        match self {
            FilterContextItem::Attribute(f) => &f.local_identifier,
            FilterContextItem::Date(f) => &f.local_identifier,
        }
    }

    pub fn as_attribute(&self) -> Option<&AttributeFilter> {
        match self {
            FilterContextItem::Attribute(f) => Some(f),
            FilterContextItem::Date(_) => None,
        }
    }

    pub fn as_date(&self) -> Option<&DateFilter> {
        match self {
            FilterContextItem::Date(f) => Some(f),
            FilterContextItem::Attribute(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeFilter {
    pub local_identifier: String,
    pub display_form: ObjRef,
    /// Selected element values; an empty positive selection means "none".
    #[serde(default)]
    pub selected: Vec<String>,
    /// When `true`, `selected` lists the excluded elements ("all except").
    #[serde(default = "default_negative")]
    pub negative_selection: bool,
    #[serde(default)]
    pub parents: Vec<AttributeFilterParent>,
    #[serde(default)]
    pub title: Option<String>,
}

fn default_negative() -> bool {
    true
}

/// Dependency on another attribute filter, joined over the listed attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeFilterParent {
    pub filter_local_identifier: String,
    pub over: Vec<ObjRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DateFilter {
    pub local_identifier: String,
    /// `None` for the dashboard's common date filter.
    pub data_set: Option<ObjRef>,
    pub selection: DateFilterSelection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum DateFilterSelection {
    AllTime,
    Relative {
        granularity: DateGranularity,
        from: i32,
        to: i32,
    },
    Absolute {
        from: String,
        to: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DateGranularity {
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

/// Convenience constructor for an "all elements" attribute filter.
pub fn attribute_filter(
    local_identifier: impl Into<String>,
    display_form: ObjRef,
) -> FilterContextItem {
    FilterContextItem::Attribute(AttributeFilter {
        local_identifier: local_identifier.into(),
        display_form,
        selected: Vec::new(),
        negative_selection: true,
        parents: Vec::new(),
        title: None,
    })
}

/// Convenience constructor for an all-time date filter on `data_set`.
pub fn date_filter(
    local_identifier: impl Into<String>,
    data_set: Option<ObjRef>,
) -> FilterContextItem {
    FilterContextItem::Date(DateFilter {
        local_identifier: local_identifier.into(),
        data_set,
        selection: DateFilterSelection::AllTime,
    })
}

// --- Filter views and UI state ---

/// A named, persisted snapshot of filter selections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterView {
    pub filter_view_ref: ObjRef,
    pub name: String,
    pub is_default: bool,
    pub filter_context: FilterContext,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UiState {
    pub cross_filtering: Option<CrossFiltering>,
}

/// Overlay installed when a widget cross-filters the dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossFiltering {
    pub widget_id: String,
    pub filter_local_ids: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refs::{id_ref, uri_ref};

    #[test]
    fn filter_item_exposes_local_identifier() {
        let attr = attribute_filter("f1", id_ref("label.region"));
        let date = date_filter("d1", None);
        assert_eq!(attr.local_identifier(), "f1");
        assert_eq!(date.local_identifier(), "d1");
        assert!(attr.as_attribute().is_some());
        assert!(date.as_attribute().is_none());
    }

    #[test]
    fn filter_context_position_by_local_id() {
        let fc = FilterContext::new(vec![
            date_filter("d1", None),
            attribute_filter("f1", id_ref("a")),
        ]);
        assert_eq!(fc.position("f1"), Some(1));
        assert_eq!(fc.position("missing"), None);
    }

    #[test]
    fn widget_insight_ref_only_for_insights() {
        let item = LayoutItem::insight("w1", uri_ref("/gdc/md/insight/1"));
        assert_eq!(item.widget.insight_ref(), Some(&uri_ref("/gdc/md/insight/1")));
        let text = LayoutItem::rich_text("w2", "hello");
        assert_eq!(text.widget.insight_ref(), None);
    }

    #[test]
    fn attribute_filter_defaults_to_negative_selection_when_omitted() {
        let json = serde_json::json!({
            "local_identifier": "f1",
            "display_form": {"type": "Identifier", "data": "label.region"},
        });
        let filter: AttributeFilter = serde_json::from_value(json).expect("deserialize");
        assert!(filter.negative_selection);
        assert!(filter.selected.is_empty());
    }
}
