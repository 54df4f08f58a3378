//! Tree diffing into delta op scripts.
//!
//! The differ walks two trees in parallel, aligning children by index,
//! and emits the smallest op it can at each divergence: a props-only
//! `update` when tags match, `insert`/`remove` at the tail where child
//! counts differ, and `replace` carrying rendered HTML everywhere else.
//! Removals are emitted highest-index first so earlier indices stay
//! stable while the receiver applies ops in order.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{
    node::{Child, Node, PropValue},
    render::{render, render_child},
};
use crate::error::ContentError;

/// Delta policy default: at most this many ops before a full response is
/// cheaper.
pub const DEFAULT_MAX_DELTA_OPS: usize = 10;

/// One edit against a previously delivered tree.
///
/// `path` is `"root"` followed by positional child selectors, e.g.
/// `root[1][0]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DeltaOp {
    /// Replace the node at `path` with rendered HTML.
    Replace {
        /// Target node.
        path: String,
        /// Rendered replacement.
        html: String,
    },
    /// Merge changed props into the element at `path`; `None` removes a
    /// key.
    Update {
        /// Target element.
        path: String,
        /// Changed keys only.
        props: BTreeMap<String, Option<PropValue>>,
    },
    /// Insert rendered HTML as a new child at `path`.
    Insert {
        /// Position of the new child.
        path: String,
        /// Rendered content.
        html: String,
    },
    /// Remove the node at `path`.
    Remove {
        /// Target node.
        path: String,
    },
}

/// Diff `old` against `new`.
///
/// With no prior tree the whole page is one `replace` at the root; that
/// is also the receiver's bootstrap case.
#[must_use]
pub fn diff(old: Option<&Node>, new: &Node) -> Vec<DeltaOp> {
    match old {
        None => vec![DeltaOp::Replace { path: "root".to_string(), html: render(new) }],
        Some(old) => {
            let mut ops = Vec::new();
            diff_node(old, new, "root", &mut ops);
            ops
        },
    }
}

/// Append `[index]` to a path.
#[must_use]
pub fn child_path(path: &str, index: usize) -> String {
    format!("{path}[{index}]")
}

/// Parse a path into child indices. `"root"` parses to an empty list.
pub fn parse_path(path: &str) -> Result<Vec<usize>, ContentError> {
    let rest = path
        .strip_prefix("root")
        .ok_or_else(|| ContentError::BadPath(path.to_string()))?;

    let mut indices = Vec::new();
    let mut chars = rest.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '[' {
            return Err(ContentError::BadPath(path.to_string()));
        }
        let mut digits = String::new();
        for d in chars.by_ref() {
            if d == ']' {
                break;
            }
            digits.push(d);
        }
        let index: usize =
            digits.parse().map_err(|_| ContentError::BadPath(path.to_string()))?;
        indices.push(index);
    }
    Ok(indices)
}

/// Encode a delta op list to CBOR for the wire.
pub fn encode_ops(ops: &[DeltaOp]) -> Result<Vec<u8>, ContentError> {
    let mut out = Vec::new();
    ciborium::ser::into_writer(ops, &mut out).map_err(|e| ContentError::OpCodec(e.to_string()))?;
    Ok(out)
}

/// Decode a delta op list from the wire.
pub fn decode_ops(bytes: &[u8]) -> Result<Vec<DeltaOp>, ContentError> {
    ciborium::de::from_reader(bytes).map_err(|e| ContentError::OpCodec(e.to_string()))
}

fn diff_node(old: &Node, new: &Node, path: &str, ops: &mut Vec<DeltaOp>) {
    if old.tag != new.tag {
        ops.push(DeltaOp::Replace { path: path.to_string(), html: render(new) });
        return;
    }

    let props = changed_props(&old.props, &new.props);
    if !props.is_empty() {
        ops.push(DeltaOp::Update { path: path.to_string(), props });
    }

    let common = old.children.len().min(new.children.len());
    for i in 0..common {
        diff_child(&old.children[i], &new.children[i], &child_path(path, i), ops);
    }
    for i in common..new.children.len() {
        ops.push(DeltaOp::Insert {
            path: child_path(path, i),
            html: render_child(&new.children[i]),
        });
    }
    // Highest index first so the remaining removals stay addressable.
    for i in (common..old.children.len()).rev() {
        ops.push(DeltaOp::Remove { path: child_path(path, i) });
    }
}

fn diff_child(old: &Child, new: &Child, path: &str, ops: &mut Vec<DeltaOp>) {
    match (old, new) {
        (Child::Text(a), Child::Text(b)) => {
            if a != b {
                ops.push(DeltaOp::Replace { path: path.to_string(), html: render_child(new) });
            }
        },
        (Child::Element(a), Child::Element(b)) => diff_node(a, b, path, ops),
        // Text vs element mismatch either way.
        _ => ops.push(DeltaOp::Replace { path: path.to_string(), html: render_child(new) }),
    }
}

fn changed_props(
    old: &BTreeMap<String, PropValue>,
    new: &BTreeMap<String, PropValue>,
) -> BTreeMap<String, Option<PropValue>> {
    let mut changed = BTreeMap::new();
    for (key, value) in new {
        if old.get(key) != Some(value) {
            changed.insert(key.clone(), Some(value.clone()));
        }
    }
    for key in old.keys() {
        if !new.contains_key(key) {
            changed.insert(key.clone(), None);
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_old_tree_is_full_replace() {
        let tree = Node::new("div").with_text("hi");
        let ops = diff(None, &tree);
        assert_eq!(ops, vec![DeltaOp::Replace { path: "root".to_string(), html: render(&tree) }]);
    }

    #[test]
    fn identical_trees_diff_empty() {
        let tree = Node::new("div").with_child(Node::new("p").with_text("x"));
        assert!(diff(Some(&tree), &tree).is_empty());
    }

    #[test]
    fn single_text_change_is_one_replace() {
        // Trees differing only in one text node at root[1][0].
        let old = Node::new("div")
            .with_child(Node::new("h1").with_text("Title"))
            .with_child(Node::new("p").with_text("before"));
        let new = Node::new("div")
            .with_child(Node::new("h1").with_text("Title"))
            .with_child(Node::new("p").with_text("after"));

        let ops = diff(Some(&old), &new);
        assert_eq!(
            ops,
            vec![DeltaOp::Replace { path: "root[1][0]".to_string(), html: "after".to_string() }]
        );
    }

    #[test]
    fn prop_change_is_subset_update() {
        let old = Node::new("div")
            .with_prop("class", PropValue::Text("a".to_string()))
            .with_prop("id", PropValue::Text("keep".to_string()));
        let new = Node::new("div")
            .with_prop("class", PropValue::Text("b".to_string()))
            .with_prop("id", PropValue::Text("keep".to_string()))
            .with_prop("title", PropValue::Text("t".to_string()));

        let ops = diff(Some(&old), &new);
        match &ops[..] {
            [DeltaOp::Update { path, props }] => {
                assert_eq!(path, "root");
                assert_eq!(props.len(), 2);
                assert_eq!(props["class"], Some(PropValue::Text("b".to_string())));
                assert_eq!(props["title"], Some(PropValue::Text("t".to_string())));
                assert!(!props.contains_key("id"));
            },
            other => panic!("unexpected ops: {other:?}"),
        }
    }

    #[test]
    fn removed_prop_appears_as_none() {
        let old = Node::new("div").with_prop("hidden", PropValue::Flag(true));
        let new = Node::new("div");
        let ops = diff(Some(&old), &new);
        match &ops[..] {
            [DeltaOp::Update { props, .. }] => assert_eq!(props["hidden"], None),
            other => panic!("unexpected ops: {other:?}"),
        }
    }

    #[test]
    fn tag_change_replaces_subtree() {
        let old = Node::new("div").with_child(Node::new("span").with_text("x"));
        let new = Node::new("div").with_child(Node::new("b").with_text("x"));
        let ops = diff(Some(&old), &new);
        assert_eq!(
            ops,
            vec![DeltaOp::Replace { path: "root[0]".to_string(), html: "<b>x</b>".to_string() }]
        );
    }

    #[test]
    fn extra_children_insert_and_missing_remove_in_order() {
        let old = Node::new("ul")
            .with_child(Node::new("li").with_text("a"))
            .with_child(Node::new("li").with_text("b"))
            .with_child(Node::new("li").with_text("c"));
        let new = Node::new("ul").with_child(Node::new("li").with_text("a"));

        let ops = diff(Some(&old), &new);
        assert_eq!(
            ops,
            vec![
                DeltaOp::Remove { path: "root[2]".to_string() },
                DeltaOp::Remove { path: "root[1]".to_string() },
            ]
        );
    }

    #[test]
    fn path_parsing() {
        assert_eq!(parse_path("root").unwrap(), Vec::<usize>::new());
        assert_eq!(parse_path("root[1][0]").unwrap(), vec![1, 0]);
        assert!(parse_path("body[0]").is_err());
        assert!(parse_path("root[x]").is_err());
    }

    #[test]
    fn ops_round_trip_cbor() {
        let ops = vec![
            DeltaOp::Replace { path: "root[1]".to_string(), html: "<p>hi</p>".to_string() },
            DeltaOp::Remove { path: "root[2]".to_string() },
        ];
        let bytes = encode_ops(&ops).unwrap();
        assert_eq!(decode_ops(&bytes).unwrap(), ops);
    }
}
