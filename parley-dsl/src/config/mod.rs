//! Config block parsing and validation

mod parser;
mod schema;

pub use parser::*;
pub use schema::*;
