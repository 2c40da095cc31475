//! ---
//! iot_section: "01-core-functionality"
//! iot_subsection: "module"
//! iot_type: "source"
//! iot_scope: "code"
//! iot_description: "Simulation runtime and lifecycle management."
//! iot_version: "v0.0.0-prealpha"
//! iot_owner: "tbd"
//! ---
use r_iot_msg::MessagingError;
use r_iot_sim::TemplateError;
use thiserror::Error;

/// Raised while wiring command handlers.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("a handler named {0} is already registered")]
    DuplicateHandler(String),
}

/// Raised when a reboot cannot be started.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RebootError {
    #[error("reboot already in progress for {0}")]
    AlreadyInProgress(String),
}

/// Failure to build one outbound envelope.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error(transparent)]
    Messaging(#[from] MessagingError),
}

impl PublishError {
    /// A missing template ends the loop; anything else skips one cycle.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PublishError::Template(TemplateError::TemplateNotFound(_))
        )
    }
}
