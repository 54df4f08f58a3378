//! On-demand mesh routing for callsign-addressed packet radio.
//!
//! An AODV variant: routes are discovered by flooding route requests,
//! installed by unicast route replies along the reverse path, maintained
//! by lifetimes refreshed on data traversal, and torn down by route
//! errors. Frames for unreachable destinations can wait in a bounded
//! store-and-forward queue until discovery succeeds.
//!
//! The router is a sans-IO state machine: it owns the routing table, the
//! pending-discovery set, and the duplicate-suppression windows, and
//! returns [`RouterAction`] vectors for a driver to execute.

mod router;
mod table;

pub use router::{MeshCounters, MeshRouter, MeshWarning, RouterAction};
pub use table::{InstallOutcome, RouteEntry, RouteState, RoutingTable};
