//! Parley DSL - Prompt Template Parser, Compiler & Chain Stepper
//!
//! This crate turns prompt templates (text with a YAML config block, role
//! tags, `{{ expressions }}` and control-flow blocks) into conversations.
//!
//! Architecture:
//! ```text
//! Template Source
//!     ↓
//! Template Parser (+ expression lexer/parser)
//!     ↓
//! Fragment (AST)
//!     ↓
//! Compiler (scope + evaluator) ──suspends at <step>──┐
//!     ↓                                               │
//! Conversation (config + messages)      Chain (resume with response)
//!
//! Fragment ──→ Metadata Scanner (parameters, config, references; no execution)
//! ```

pub mod chain;
pub mod compiler;
pub mod config;
pub mod lexer;
pub mod metadata;
pub mod parser;

// Re-export key types for convenience
pub use chain::{create_chain, render, Chain, ChainError, ChainResponse, ChainState};
pub use compiler::{compile, evaluate, Compile, CompileInput, CompileOutput, Scope, ScopeStash};
pub use config::{parse_config_block, ConfigError, ConfigField, ConfigSchema, FieldKind};
pub use metadata::{
    read_metadata, resolve_reference_path, ConversationMetadata, ReadMetadataOptions, ReferenceFn,
};
pub use parser::{parse, parse_expression, Fragment, TemplateNode};
