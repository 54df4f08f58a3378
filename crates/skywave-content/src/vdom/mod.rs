//! Virtual DOM: tree model, canonical renderer, differ, and applier.
//!
//! The contract binding the four parts: for any trees `old` and `new`,
//! applying `diff(old, new)` to a faithful view of `old` renders a string
//! equal to `render(new)`. The property tests in `apply` hold the pieces
//! to it.

pub mod apply;
pub mod diff;
pub mod node;
pub mod render;

pub use apply::AppliedDom;
pub use diff::{DEFAULT_MAX_DELTA_OPS, DeltaOp, decode_ops, diff, encode_ops, parse_path};
pub use node::{Child, Node, PropValue};
pub use render::{render, render_child};
