use thiserror::Error;

use crate::domain::menu::MenuItemId;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("expected the last assistant message to carry a `{tool_name}` tool call")]
    MissingToolCall { tool_name: String },
    #[error("cart has no line matching `{name}` (item {item_id})")]
    ItemNotFound { item_id: MenuItemId, name: String },
    #[error("adding `{name}` (item {item_id}) would overflow the cart totals")]
    CartTotalsOverflow { item_id: MenuItemId, name: String },
    #[error("please confirm the purchase before executing")]
    ApprovalPreconditionViolation,
    #[error("expected an active cart before executing the purchase")]
    NoActiveCart,
    #[error("invalid arguments for `{tool_name}`: {reason}")]
    InvalidToolArguments { tool_name: String, reason: String },
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("language model failure: {0}")]
    Llm(String),
    #[error("memory store failure: {0}")]
    Memory(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
    #[error("turn exceeded the step limit of {limit}")]
    StepLimitExceeded { limit: usize },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "I couldn't complete that step of your order. Please check the items and try again."
            }
            Self::ServiceUnavailable { .. } => {
                "The ordering assistant is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        match value {
            ApplicationError::Domain(DomainError::InvariantViolation(message)) => {
                Self::Internal { message, correlation_id: "unassigned".to_owned() }
            }
            ApplicationError::Domain(error) => {
                Self::BadRequest {
                    message: error.to_string(),
                    correlation_id: "unassigned".to_owned(),
                }
            }
            ApplicationError::Llm(message) | ApplicationError::Memory(message) => {
                Self::ServiceUnavailable { message, correlation_id: "unassigned".to_owned() }
            }
            ApplicationError::Configuration(message) => {
                Self::Internal { message, correlation_id: "unassigned".to_owned() }
            }
            error @ ApplicationError::StepLimitExceeded { .. } => {
                Self::Internal {
                    message: error.to_string(),
                    correlation_id: "unassigned".to_owned(),
                }
            }
        }
    }
}
