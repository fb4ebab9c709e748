//! Canonical data-structure shape detection.
//!
//! Question metadata declares parameter and return types with the names
//! used in the user's code. Three canonical shapes get builder helpers in
//! the generated driver: singly-linked lists, binary trees (level-order
//! with nulls), and undirected graphs (1-indexed adjacency lists). The
//! `customDataStructures` mapping renames a canonical shape to the
//! concrete type name the user code uses.

use std::collections::HashMap;

/// The canonical shapes the harness knows how to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanonicalShape {
    ListNode,
    TreeNode,
    GraphNode,
}

impl CanonicalShape {
    pub const ALL: [CanonicalShape; 3] = [Self::ListNode, Self::TreeNode, Self::GraphNode];

    pub fn canonical_name(self) -> &'static str {
        match self {
            Self::ListNode => "ListNode",
            Self::TreeNode => "TreeNode",
            Self::GraphNode => "GraphNode",
        }
    }
}

/// How a declared type binds to a canonical shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeBinding {
    pub shape: CanonicalShape,
    /// True when the declared type is a list/array of the shape; the outer
    /// JSON array is then a batch of shapes.
    pub batched: bool,
    /// The type name as it appears in user code.
    pub concrete_name: String,
}

/// Resolve the concrete (user-code) name for a canonical shape.
pub fn concrete_name(shape: CanonicalShape, custom: &HashMap<String, String>) -> String {
    custom
        .get(shape.canonical_name())
        .cloned()
        .unwrap_or_else(|| shape.canonical_name().to_string())
}

/// Detect whether a declared type names (or wraps) a canonical shape.
///
/// Wrappers recognized: `List<T>` / `List[T]`, `Optional<T>` /
/// `Optional[T]`, and a trailing `[]`. Any list-style wrapper marks the
/// binding as batched.
pub fn detect_shape(declared: &str, custom: &HashMap<String, String>) -> Option<ShapeBinding> {
    let mut base = declared.trim();
    let mut batched = false;

    loop {
        if let Some(inner) = base.strip_suffix("[]") {
            base = inner.trim();
            batched = true;
        } else if let Some(inner) = strip_wrapper(base, "List") {
            base = inner;
            batched = true;
        } else if let Some(inner) = strip_wrapper(base, "Optional") {
            base = inner;
        } else {
            break;
        }
    }

    for shape in CanonicalShape::ALL {
        let concrete = concrete_name(shape, custom);
        if base == concrete || base == shape.canonical_name() {
            return Some(ShapeBinding {
                shape,
                batched,
                concrete_name: concrete,
            });
        }
    }
    None
}

/// Strip `Name<...>` or `Name[...]`, returning the trimmed inner type.
fn strip_wrapper<'a>(ty: &'a str, name: &str) -> Option<&'a str> {
    for (open, close) in [('<', '>'), ('[', ']')] {
        let inner = ty
            .strip_prefix(name)
            .and_then(|rest| rest.trim_start().strip_prefix(open))
            .and_then(|inner| inner.strip_suffix(close));
        if let Some(inner) = inner {
            return Some(inner.trim());
        }
    }
    None
}
