//! Order-preserving delta application.
//!
//! The receiver keeps an applied view of the page: the original tree with
//! replaced or inserted regions held as raw HTML grafts. Each op applies
//! atomically; an op that fails leaves the view exactly as it was, and
//! `apply_all` stops at the first failure so a partial script never
//! renders.

use super::{
    diff::{DeltaOp, parse_path},
    node::{Child, Node},
    render::{escape_text, render_props},
};
use crate::error::ContentError;

/// One slot in the applied view.
#[derive(Debug, Clone, PartialEq)]
enum Slot {
    /// An element with its props and child slots.
    Element {
        tag: String,
        props: std::collections::BTreeMap<String, super::node::PropValue>,
        children: Vec<Slot>,
    },
    /// A text run.
    Text(String),
    /// Grafted raw HTML from a replace or insert op.
    Raw(String),
}

impl Slot {
    fn from_node(node: &Node) -> Self {
        Slot::Element {
            tag: node.tag.clone(),
            props: node.props.clone(),
            children: node.children.iter().map(Slot::from_child).collect(),
        }
    }

    fn from_child(child: &Child) -> Self {
        match child {
            Child::Element(node) => Slot::from_node(node),
            Child::Text(text) => Slot::Text(text.clone()),
        }
    }

    fn render_into(&self, out: &mut String) {
        match self {
            Slot::Element { tag, props, children } => {
                out.push('<');
                out.push_str(tag);
                out.push_str(&render_props(props));
                out.push('>');
                for child in children {
                    child.render_into(out);
                }
                out.push_str("</");
                out.push_str(tag);
                out.push('>');
            },
            Slot::Text(text) => out.push_str(&escape_text(text)),
            Slot::Raw(html) => out.push_str(html),
        }
    }
}

/// The receiver-side applied page state.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedDom {
    root: Slot,
}

impl AppliedDom {
    /// Start from a full tree (the bootstrap `response`).
    #[must_use]
    pub fn from_node(node: &Node) -> Self {
        Self { root: Slot::from_node(node) }
    }

    /// Start from raw rendered HTML (a root `replace`).
    #[must_use]
    pub fn from_html(html: impl Into<String>) -> Self {
        Self { root: Slot::Raw(html.into()) }
    }

    /// Canonical rendering of the applied state.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.root.render_into(&mut out);
        out
    }

    /// Apply one op atomically.
    pub fn apply(&mut self, op: &DeltaOp) -> Result<(), ContentError> {
        match op {
            DeltaOp::Replace { path, html } => {
                let indices = parse_path(path)?;
                let slot = self.navigate(&indices, path)?;
                *slot = Slot::Raw(html.clone());
                Ok(())
            },
            DeltaOp::Update { path, props } => {
                let indices = parse_path(path)?;
                let slot = self.navigate(&indices, path)?;
                let Slot::Element { props: stored, .. } = slot else {
                    return Err(ContentError::NotAnElement(path.clone()));
                };
                for (key, value) in props {
                    match value {
                        Some(value) => {
                            stored.insert(key.clone(), value.clone());
                        },
                        None => {
                            stored.remove(key);
                        },
                    }
                }
                Ok(())
            },
            DeltaOp::Insert { path, html } => {
                let indices = parse_path(path)?;
                let Some((&index, parent_indices)) = indices.split_last() else {
                    return Err(ContentError::BadPath(path.clone()));
                };
                let parent = self.navigate(parent_indices, path)?;
                let Slot::Element { children, .. } = parent else {
                    return Err(ContentError::NotAnElement(path.clone()));
                };
                if index > children.len() {
                    return Err(ContentError::PathNotFound(path.clone()));
                }
                children.insert(index, Slot::Raw(html.clone()));
                Ok(())
            },
            DeltaOp::Remove { path } => {
                let indices = parse_path(path)?;
                let Some((&index, parent_indices)) = indices.split_last() else {
                    return Err(ContentError::BadPath(path.clone()));
                };
                let parent = self.navigate(parent_indices, path)?;
                let Slot::Element { children, .. } = parent else {
                    return Err(ContentError::NotAnElement(path.clone()));
                };
                if index >= children.len() {
                    return Err(ContentError::PathNotFound(path.clone()));
                }
                children.remove(index);
                Ok(())
            },
        }
    }

    /// Apply a whole script in order, stopping at the first failure.
    pub fn apply_all(&mut self, ops: &[DeltaOp]) -> Result<(), ContentError> {
        for op in ops {
            self.apply(op)?;
        }
        Ok(())
    }

    fn navigate(&mut self, indices: &[usize], path: &str) -> Result<&mut Slot, ContentError> {
        let mut slot = &mut self.root;
        for &index in indices {
            let Slot::Element { children, .. } = slot else {
                return Err(ContentError::PathNotFound(path.to_string()));
            };
            slot = children
                .get_mut(index)
                .ok_or_else(|| ContentError::PathNotFound(path.to_string()))?;
        }
        Ok(slot)
    }
}
