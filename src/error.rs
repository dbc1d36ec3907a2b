// ⚠️ Error taxonomy
// Every core operation reports one of these; nothing is fatal to the process.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum HeySaveError {
    /// Malformed input. Each entry is a message the user can read.
    #[error("Validation failed: {}", .0.join(" "))]
    Validation(Vec<String>),

    #[error("Insufficient funds: need S/. {needed:.2}, have S/. {available:.2}")]
    InsufficientFunds { needed: f64, available: f64 },

    #[error("Insufficient points: need {needed}, have {available}")]
    InsufficientPoints { needed: i64, available: i64 },

    #[error("Username already taken: {0}")]
    UsernameTaken(String),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Not logged in")]
    NotAuthenticated,

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Goal not completed yet: S/. {saved:.2} of S/. {target:.2}")]
    GoalNotCompleted { saved: f64, target: f64 },

    #[error("Goal already completed")]
    GoalAlreadyCompleted,

    #[error("Registration wizard is not at {expected}")]
    WrongStep { expected: &'static str },

    #[error("Credential error: {0}")]
    Credential(String),

    /// Store failure. Kept distinct from "no rows".
    #[error("Persistence error: {0}")]
    Persistence(#[from] rusqlite::Error),
}

impl HeySaveError {
    pub fn validation(message: impl Into<String>) -> Self {
        HeySaveError::Validation(vec![message.into()])
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        HeySaveError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Messages for the presentation layer
    pub fn messages(&self) -> Vec<String> {
        match self {
            HeySaveError::Validation(errors) => errors.clone(),
            other => vec![other.to_string()],
        }
    }

    /// True when the caller's input (not the store) caused the failure
    pub fn is_user_error(&self) -> bool {
        !matches!(
            self,
            HeySaveError::Persistence(_) | HeySaveError::Credential(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, HeySaveError>;

/// Collects validation messages and turns them into a single error.
#[derive(Debug, Default)]
pub struct Violations(Vec<String>);

impl Violations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&mut self, ok: bool, message: &str) {
        if !ok {
            self.0.push(message.to_string());
        }
    }

    pub fn push(&mut self, message: impl Into<String>) {
        self.0.push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_result(self) -> Result<()> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(HeySaveError::Validation(self.0))
        }
    }
}
