//! SQL text building: escaping, typed values, filters and statements.

pub mod escape;
pub mod filter;
pub mod statement;
pub mod value;

pub use filter::{Filter, create_query, unique_condition};
pub use value::{SqlValue, ValueMap};
