//! Delta op decoding and application on a fixed base page: op scripts
//! from the wire may fail cleanly but must never panic or corrupt the
//! applied view into something unrenderable.

#![no_main]

use libfuzzer_sys::fuzz_target;
use skywave_content::{
    AppliedDom, Node, PropValue,
    vdom::decode_ops,
};

fn base_page() -> Node {
    Node::new("div")
        .with_prop("class", PropValue::Text("page".to_string()))
        .with_child(Node::new("h1").with_text("Title"))
        .with_child(
            Node::new("ul")
                .with_child(Node::new("li").with_text("one"))
                .with_child(Node::new("li").with_text("two")),
        )
}

fuzz_target!(|data: &[u8]| {
    let Ok(ops) = decode_ops(data) else { return };

    let mut dom = AppliedDom::from_node(&base_page());
    // Stop at the first bad op; whatever applied so far must render.
    let _ = dom.apply_all(&ops);
    let html = dom.render();
    assert!(html.len() < 1 << 24);
});
