//! Reading: where-clauses, read planning, hydration and the session-level
//! read operations.
//!
//! - [`filter`] - [`Filter`] and [`Lookup`] for where-clauses
//! - [`planner`] - [`ReadArgs`] and the [`QueryPlan`] handed to drivers
//! - [`hydrate`] - merging returned rows into the identity map
//! - [`read`] - `read`, `find_unique` and `count`

pub mod filter;
pub mod hydrate;
pub mod planner;
pub mod read;

pub use filter::{Filter, Lookup};
pub use planner::{PlanField, PlanMode, QueryPlan, ReadArgs, Selection};
