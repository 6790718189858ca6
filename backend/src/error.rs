//! Error taxonomy for the automation engine.
//!
//! Errors never cross `WorkflowEngine::process_trigger`; they are turned into
//! execution log entries at the workflow, rule or action boundary.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkflowError {
    /// Malformed condition or action configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A referenced field, user or record-type link does not exist
    #[error("Resolution error: {0}")]
    Resolution(String),

    /// Downstream I/O failure (email, webhook, notification, persistence)
    #[error("{service} error: {message}")]
    Collaborator { service: String, message: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Processing cancelled")]
    Cancelled,
}

impl WorkflowError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn resolution(message: impl Into<String>) -> Self {
        Self::Resolution(message.into())
    }

    pub fn collaborator(service: impl Into<String>, message: impl ToString) -> Self {
        Self::Collaborator {
            service: service.into(),
            message: message.to_string(),
        }
    }

    /// Get the error code string
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::Resolution(_) => "RESOLUTION_ERROR",
            Self::Collaborator { .. } => "COLLABORATOR_ERROR",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Configuration and resolution failures are caused by how an automation
    /// was authored, not by infrastructure.
    pub fn is_authoring_error(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::Resolution(_))
    }
}

impl From<reqwest::Error> for WorkflowError {
    fn from(err: reqwest::Error) -> Self {
        Self::collaborator("webhook", err)
    }
}

impl From<lettre::error::Error> for WorkflowError {
    fn from(err: lettre::error::Error) -> Self {
        Self::collaborator("email", err)
    }
}

impl From<lettre::address::AddressError> for WorkflowError {
    fn from(err: lettre::address::AddressError) -> Self {
        Self::resolution(format!("invalid email address: {}", err))
    }
}

impl From<lettre::transport::smtp::Error> for WorkflowError {
    fn from(err: lettre::transport::smtp::Error) -> Self {
        Self::collaborator("email", err)
    }
}

pub type WorkflowResult<T> = Result<T, WorkflowError>;
