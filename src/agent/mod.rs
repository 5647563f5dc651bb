//! Agent loop: observe the page, ask the model, execute its action, repeat
//! until the model answers.

mod controller;
mod conversation;
pub mod prompts;

pub use controller::AgentLoop;
pub use conversation::Conversation;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::operator::OperatorError;

/// One `{thought, action}` pair per loop iteration. Pure output log — never
/// read back into the loop logic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub thought: String,
    pub action: String,
    pub at: chrono::DateTime<chrono::Utc>,
}

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Model error: {0}")]
    Model(String),

    #[error(transparent)]
    Operator(#[from] OperatorError),

    #[error("Invalid loop state: {0}")]
    InvalidState(String),
}

pub type AgentResult<T> = Result<T, AgentError>;
