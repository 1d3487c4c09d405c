//! Lexer module for embedded expressions

pub mod token;
pub mod scanner;

pub use token::*;
pub use scanner::*;
