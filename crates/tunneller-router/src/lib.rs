//! Path-based routing for the tunnel agent
//!
//! A [`RoutingRule`] forwards requests whose path matches either an exact
//! pattern (`/admin`) or a wildcard pattern (`/api/*`) to a local backend.
//! A [`RouteTable`] holds rules sorted by `(priority, specificity)` and
//! answers first-match lookups.

pub mod rule;
pub mod table;

pub use rule::{RouteError, RoutingRule};
pub use table::RouteTable;
