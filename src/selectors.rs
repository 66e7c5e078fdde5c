//! Pure read functions over a [`DashboardDocument`].
//!
//! Selectors never panic: anything that may be absent comes back as an
//! `Option`.

use crate::document::{
    AttributeFilter, CrossFiltering, DashboardDocument, DateFilter, FilterView, LayoutItem,
    LayoutSection,
};
use crate::refs::ObjRef;

pub fn select_section(doc: &DashboardDocument, index: usize) -> Option<&LayoutSection> {
    doc.layout.sections.get(index)
}

pub fn select_item(doc: &DashboardDocument, section: usize, item: usize) -> Option<&LayoutItem> {
    select_section(doc, section)?.items.get(item)
}

/// Locate a widget by id, returning `(section_index, item_index, item)`.
pub fn select_widget_by_id<'a>(
    doc: &'a DashboardDocument,
    widget_id: &str,
) -> Option<(usize, usize, &'a LayoutItem)> {
    doc.layout
        .sections
        .iter()
        .enumerate()
        .find_map(|(s, section)| {
            section
                .items
                .iter()
                .enumerate()
                .find(|(_, item)| item.widget.id == widget_id)
                .map(|(i, item)| (s, i, item))
        })
}

/// Every insight referenced by the layout, in layout order.
pub fn select_insight_refs(doc: &DashboardDocument) -> Vec<&ObjRef> {
    doc.layout
        .sections
        .iter()
        .flat_map(|s| s.items.iter())
        .filter_map(|item| item.widget.insight_ref())
        .collect()
}

pub fn select_attribute_filter<'a>(
    doc: &'a DashboardDocument,
    local_identifier: &str,
) -> Option<&'a AttributeFilter> {
    doc.filter_context
        .filters
        .iter()
        .filter_map(|f| f.as_attribute())
        .find(|f| f.local_identifier == local_identifier)
}

pub fn select_attribute_filters(doc: &DashboardDocument) -> Vec<&AttributeFilter> {
    doc.filter_context
        .filters
        .iter()
        .filter_map(|f| f.as_attribute())
        .collect()
}

/// The common date filter (the one without a data set).
pub fn select_common_date_filter(doc: &DashboardDocument) -> Option<&DateFilter> {
    doc.filter_context
        .filters
        .iter()
        .filter_map(|f| f.as_date())
        .find(|f| f.data_set.is_none())
}

pub fn select_filter_view<'a>(doc: &'a DashboardDocument, view: &ObjRef) -> Option<&'a FilterView> {
    doc.filter_views.iter().find(|v| &v.filter_view_ref == view)
}

pub fn select_default_filter_view(doc: &DashboardDocument) -> Option<&FilterView> {
    doc.filter_views.iter().find(|v| v.is_default)
}

pub fn select_cross_filtering(doc: &DashboardDocument) -> Option<&CrossFiltering> {
    doc.ui.cross_filtering.as_ref()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{
        FilterContext, Layout, attribute_filter, date_filter,
    };
    use crate::refs::{id_ref, uri_ref};

    fn doc() -> DashboardDocument {
        DashboardDocument::new("d")
            .with_layout(Layout::new(vec![
                LayoutSection::new(vec![
                    LayoutItem::insight("w1", uri_ref("/i/1")),
                    LayoutItem::rich_text("w2", "notes"),
                ]),
                LayoutSection::new(vec![LayoutItem::insight("w3", uri_ref("/i/3"))]),
            ]))
            .with_filter_context(FilterContext::new(vec![
                date_filter("d1", None),
                attribute_filter("f1", id_ref("label.region")),
            ]))
    }

    #[test]
    fn out_of_range_lookups_return_none() {
        let doc = doc();
        assert!(select_section(&doc, 5).is_none());
        assert!(select_item(&doc, 0, 9).is_none());
        assert!(select_item(&doc, 9, 0).is_none());
    }

    #[test]
    fn widget_lookup_returns_coordinates() {
        let doc = doc();
        let (s, i, item) = select_widget_by_id(&doc, "w3").expect("widget exists");
        assert_eq!((s, i), (1, 0));
        assert_eq!(item.widget.id, "w3");
        assert!(select_widget_by_id(&doc, "nope").is_none());
    }

    #[test]
    fn insight_refs_in_layout_order() {
        let doc = doc();
        assert_eq!(select_insight_refs(&doc), vec![&uri_ref("/i/1"), &uri_ref("/i/3")]);
    }

    #[test]
    fn filter_selectors() {
        let doc = doc();
        assert!(select_attribute_filter(&doc, "f1").is_some());
        assert!(select_attribute_filter(&doc, "d1").is_none());
        assert_eq!(select_attribute_filters(&doc).len(), 1);
        assert_eq!(
            select_common_date_filter(&doc).map(|f| f.local_identifier.as_str()),
            Some("d1")
        );
    }

    #[test]
    fn selectors_on_empty_document_do_not_panic() {
        let doc = DashboardDocument::default();
        assert!(select_default_filter_view(&doc).is_none());
        assert!(select_cross_filtering(&doc).is_none());
        assert!(select_common_date_filter(&doc).is_none());
        assert!(select_insight_refs(&doc).is_empty());
    }
}
