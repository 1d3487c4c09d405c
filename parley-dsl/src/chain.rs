//! Multi-step chains
//!
//! A [`Chain`] compiles a prompt one step at a time. Each call to
//! [`Chain::step`] resumes where the previous one suspended, injecting the
//! model response and carrying the scope across.

use crate::compiler::{Compile, CompileInput, Scope};
use crate::parser::{parse, Fragment};
use parley_core::{
    ChainStep, CompileError, Config, Conversation, Message, MessageContent, Parameters,
};
use thiserror::Error;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ChainError {
    #[error("A response is not allowed before the chain has started")]
    ResponseBeforeStart,

    #[error("A response is required to continue a chain")]
    ResponseRequired,

    #[error("The chain has already completed")]
    AlreadyCompleted,

    #[error("Use a Chain to render prompts with multiple steps")]
    MultiStep,

    #[error(transparent)]
    Compile(#[from] CompileError),
}

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainState {
    NotStarted,
    Running,
    Completed,
}

/// A model response handed to the next step.
#[derive(Debug, Clone, PartialEq)]
pub enum ChainResponse {
    Text(String),
    Contents(Vec<MessageContent>),
}

impl ChainResponse {
    pub fn into_parts(self) -> Vec<MessageContent> {
        match self {
            ChainResponse::Text(text) => vec![MessageContent::text(text)],
            ChainResponse::Contents(parts) => parts,
        }
    }
}

impl From<&str> for ChainResponse {
    fn from(text: &str) -> Self {
        ChainResponse::Text(text.to_string())
    }
}

impl From<String> for ChainResponse {
    fn from(text: String) -> Self {
        ChainResponse::Text(text)
    }
}

impl From<Vec<MessageContent>> for ChainResponse {
    fn from(parts: Vec<MessageContent>) -> Self {
        ChainResponse::Contents(parts)
    }
}

// ============================================================================
// CHAIN
// ============================================================================

#[derive(Debug, Clone)]
pub struct Chain {
    raw_text: String,
    ast: Fragment,
    scope: Scope,
    messages: Vec<Message>,
    config: Config,
    state: ChainState,
}

impl Chain {
    /// Parse `prompt` and seed the root scope with `parameters`.
    pub fn new(prompt: &str, parameters: Parameters) -> Result<Self, CompileError> {
        let ast = parse(prompt)?;
        Ok(Self {
            raw_text: prompt.to_string(),
            ast,
            scope: Scope::with_parameters(&parameters),
            messages: Vec::new(),
            config: Config::new(),
            state: ChainState::NotStarted,
        })
    }

    pub fn state(&self) -> ChainState {
        self.state
    }

    pub fn is_completed(&self) -> bool {
        self.state == ChainState::Completed
    }

    pub fn raw_text(&self) -> &str {
        &self.raw_text
    }

    /// Messages accumulated so far.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Compile the next step. The first call takes no response; every later
    /// call requires one. A failed step leaves the chain untouched.
    pub fn step(&mut self, response: Option<ChainResponse>) -> Result<ChainStep, ChainError> {
        match (self.state, &response) {
            (ChainState::Completed, _) => return Err(ChainError::AlreadyCompleted),
            (ChainState::NotStarted, Some(_)) => return Err(ChainError::ResponseBeforeStart),
            (ChainState::Running, None) => return Err(ChainError::ResponseRequired),
            _ => {}
        }

        let output = Compile::new(CompileInput {
            ast: &self.ast,
            raw_text: &self.raw_text,
            scope: self.scope.copy(),
            step_response: response.map(ChainResponse::into_parts),
        })
        .run()?;

        if let Some(global_config) = output.global_config {
            self.config = global_config;
        }
        // Step attributes apply to this step only.
        let mut config = self.config.clone();
        if let Some(step_config) = output.step_config {
            config.extend(step_config);
        }

        self.messages.extend(output.messages);
        self.ast = output.ast;
        self.scope = Scope::with_stash(output.scope_stash);
        self.state = if output.completed {
            ChainState::Completed
        } else {
            ChainState::Running
        };

        tracing::debug!(
            state = ?self.state,
            messages = self.messages.len(),
            "Chain step compiled"
        );

        Ok(ChainStep {
            conversation: Conversation {
                config,
                messages: self.messages.clone(),
            },
            completed: output.completed,
        })
    }
}

// ============================================================================
// CONVENIENCE FUNCTIONS
// ============================================================================

pub fn create_chain(prompt: &str, parameters: Parameters) -> Result<Chain, CompileError> {
    Chain::new(prompt, parameters)
}

/// Compile a single-step prompt into a conversation.
pub fn render(prompt: &str, parameters: Parameters) -> Result<Conversation, ChainError> {
    let mut chain = Chain::new(prompt, parameters)?;
    let step = chain.step(None)?;
    if !step.completed {
        return Err(ChainError::MultiStep);
    }
    Ok(step.conversation)
}

// =============================================================================
// TESTS
// =============================================================================
