//! Method selection by textual scope patterns.
//!
//! A [`ScopeFilter`] decides which methods a fragment is eligible for; the
//! [`wildcard_match`] primitive it builds on is exposed for reuse wherever
//! pattern matching on names is needed.

mod filter;
mod wildcard;

pub use filter::ScopeFilter;
pub use wildcard::{wildcard_match, WILDCARD};
