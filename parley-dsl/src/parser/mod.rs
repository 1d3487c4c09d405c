//! Parser module for Parley templates

pub mod ast;
pub mod expression;
pub mod template;

pub use ast::*;
pub use expression::*;
pub use template::*;
