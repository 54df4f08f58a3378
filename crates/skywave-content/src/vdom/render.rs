//! Canonical HTML rendering.
//!
//! The renderer is a pure function: one tree, one string, always. Props
//! render sorted by key, numbers use the shortest round-trip form, flags
//! render as explicit `"true"`/`"false"`, and handler ids render as
//! plain attribute values. Equality of rendered strings is the diff
//! soundness yardstick, so nothing here may depend on ambient state.

use std::collections::BTreeMap;

use super::node::{Child, Node, PropValue};

/// Render a tree to canonical HTML.
#[must_use]
pub fn render(node: &Node) -> String {
    let mut out = String::new();
    render_node(node, &mut out);
    out
}

/// Render a single child slot (used for delta op payloads).
#[must_use]
pub fn render_child(child: &Child) -> String {
    match child {
        Child::Element(node) => render(node),
        Child::Text(text) => escape_text(text),
    }
}

/// Render a sorted prop map as ` key="value"` pairs.
#[must_use]
pub fn render_props(props: &BTreeMap<String, PropValue>) -> String {
    let mut out = String::new();
    for (key, value) in props {
        out.push(' ');
        out.push_str(key);
        out.push_str("=\"");
        out.push_str(&escape_attr(&prop_value_string(value)));
        out.push('"');
    }
    out
}

fn render_node(node: &Node, out: &mut String) {
    out.push('<');
    out.push_str(&node.tag);
    out.push_str(&render_props(&node.props));
    out.push('>');
    for child in &node.children {
        match child {
            Child::Element(nested) => render_node(nested, out),
            Child::Text(text) => out.push_str(&escape_text(text)),
        }
    }
    out.push_str("</");
    out.push_str(&node.tag);
    out.push('>');
}

fn prop_value_string(value: &PropValue) -> String {
    match value {
        PropValue::Text(s) | PropValue::Handler(s) => s.clone(),
        // f64 Display is the shortest round-trip form: deterministic.
        PropValue::Number(n) => format!("{n}"),
        PropValue::Flag(b) => b.to_string(),
    }
}

/// Escape text content.
#[must_use]
pub fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            other => out.push(other),
        }
    }
    out
}

fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            other => out.push(other),
        }
    }
    out
}
