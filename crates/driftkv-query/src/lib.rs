//! Query planner for driftkv.
//!
//! Turns textual `SCAN` statements into operator trees over a store:
//!
//! ```text
//! SCAN
//! SCAN LIMIT 10
//! SCAN SELECT key
//! SCAN WHERE key LIKE user:*
//! SCAN WHERE value CONTAINS alice SELECT * LIMIT 5
//! ```
//!
//! Clauses may appear in any order, each at most once. The tree is always
//! composed the same way: the filter runs before the limit, and the
//! projection wraps the result.

mod glob;
mod planner;

pub use glob::glob_match;
pub use planner::{build, execute, parse, Pred, Projection, QueryError, QueryPlan};
