//! SQL text generation
//!
//! - [`builder`]: INSERT/UPDATE/DELETE statements, single and bulk
//! - [`Dialect`]: quoting, echo-back placement and placeholder rendering

pub mod builder;
mod dialect;

pub use dialect::Dialect;
