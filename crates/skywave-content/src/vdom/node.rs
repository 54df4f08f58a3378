//! Virtual-DOM tree model.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Property value: a small sum over the shapes the renderer understands.
///
/// Event-handler props (keys conventionally prefixed `on`) carry an
/// opaque identifier; binding them to behaviour is the host's job. The
/// canonical renderer serializes every variant deterministically, so
/// there is no "unknown shape" at this layer - the type system already
/// closed the set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropValue {
    /// String value.
    Text(String),
    /// Numeric value.
    Number(f64),
    /// Boolean value.
    Flag(bool),
    /// Opaque event-handler identifier.
    Handler(String),
}

/// An element node: tag, props, ordered children.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Element tag (`div`, `span`, ...).
    pub tag: String,
    /// Properties, sorted by key for deterministic rendering.
    pub props: BTreeMap<String, PropValue>,
    /// Ordered children.
    pub children: Vec<Child>,
}

/// One child slot: an element or a text run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Child {
    /// Nested element.
    Element(Node),
    /// Text content.
    Text(String),
}

impl Node {
    /// Element with no props or children.
    #[must_use]
    pub fn new(tag: impl Into<String>) -> Self {
        Self { tag: tag.into(), props: BTreeMap::new(), children: Vec::new() }
    }

    /// Builder: add a property.
    #[must_use]
    pub fn with_prop(mut self, key: impl Into<String>, value: PropValue) -> Self {
        self.props.insert(key.into(), value);
        self
    }

    /// Builder: append an element child.
    #[must_use]
    pub fn with_child(mut self, child: Node) -> Self {
        self.children.push(Child::Element(child));
        self
    }

    /// Builder: append a text child.
    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.children.push(Child::Text(text.into()));
        self
    }
}
