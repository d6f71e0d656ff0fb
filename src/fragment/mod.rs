//! Fragment code representation and processing.
//!
//! A *fragment* is the validated, transformed form of a user-authored snippet
//! or argument processor method, ready for composition by the weaver.
//! [`CodeTemplate`] carries the raw body; [`Code`] is the processed result.

mod code;
mod template;

pub use code::{Code, CodeInfo};
pub use template::CodeTemplate;
