//! Object references to backend metadata entities.
//!
//! A reference is either symbolic (an identifier that the backend still has
//! to look up) or concrete (a resolved URI). Everything that leaves the
//! session for the backend must carry concrete references only.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Reference to a backend metadata object.
///
/// Serialized adjacently tagged, e.g. `{"type": "Identifier", "data": "x"}`.
///
/// # Examples
///
/// ```
/// use dashboard_core::{ObjRef, id_ref, uri_ref};
///
/// assert!(!id_ref("label.region").is_concrete());
/// assert!(uri_ref("/gdc/md/obj/1").is_concrete());
/// assert_eq!(uri_ref("/gdc/md/obj/1"), ObjRef::Uri("/gdc/md/obj/1".into()));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ObjRef {
    /// Symbolic identifier, not yet resolved.
    Identifier(String),
    /// Concrete, fully resolved address.
    Uri(String),
}

impl ObjRef {
    /// Returns `true` for the resolved (`Uri`) form.
    pub fn is_concrete(&self) -> bool {
        matches!(self, ObjRef::Uri(_))
    }

    /// The raw identifier or URI string.
    pub fn as_str(&self) -> &str {
        match self {
            ObjRef::Identifier(id) => id,
            ObjRef::Uri(uri) => uri,
        }
    }
}

impl fmt::Display for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjRef::Identifier(id) => write!(f, "id:{id}"),
            ObjRef::Uri(uri) => write!(f, "uri:{uri}"),
        }
    }
}

/// Build a symbolic reference.
pub fn id_ref(id: impl Into<String>) -> ObjRef {
    ObjRef::Identifier(id.into())
}

/// Build a concrete reference.
pub fn uri_ref(uri: impl Into<String>) -> ObjRef {
    ObjRef::Uri(uri.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_distinguishes_forms() {
        assert_eq!(id_ref("a").to_string(), "id:a");
        assert_eq!(uri_ref("/a").to_string(), "uri:/a");
    }

    #[test]
    fn same_text_different_form_is_not_equal() {
        assert_ne!(id_ref("x"), uri_ref("x"));
        assert_eq!(id_ref("x").as_str(), uri_ref("x").as_str());
    }

    #[test]
    fn serde_uses_adjacent_tagging() {
        let json = serde_json::to_value(id_ref("some-id")).expect("serialize");
        assert_eq!(json, serde_json::json!({"type": "Identifier", "data": "some-id"}));
    }
}
