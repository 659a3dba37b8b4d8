//! Authorization queries and the policy decision point.
//!
//! # Modules
//!
//! - [`action`] - HTTP method to [`Action`]
//! - [`query`] - [`AuthorizationQuery`] assembly
//! - [`pdp`] - the [`PolicyDecisionPoint`] trait
//! - [`cerbos`] - HTTP client for a Cerbos PDP

pub mod action;
pub mod cerbos;
pub mod pdp;
pub mod query;

pub use action::{Action, map_action};
pub use cerbos::CerbosClient;
pub use pdp::{Decision, PolicyDecisionPoint};
pub use query::{AuthorizationQuery, Principal, QueryBuilder, Resource, build_query};
