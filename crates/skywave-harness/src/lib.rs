//! Deterministic simulation harness for the skywave stack.
//!
//! Everything a test needs to run the stack off the air: a virtual
//! clock with seeded randomness ([`SimEnv`]), an AWGN audio channel
//! ([`AwgnChannel`]), a back-to-back modem link ([`AudioLink`]), and a
//! multi-node mesh world ([`MeshWorld`]). A failing scenario replays
//! exactly from its seed.

pub mod channel;
pub mod link;
pub mod sim_env;
pub mod world;

pub use channel::{AwgnChannel, fade};
pub use link::AudioLink;
pub use sim_env::{SimEnv, SimInstant};
pub use world::{DeliveredMessage, MeshWorld};
