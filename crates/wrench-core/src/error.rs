/// Failures callers need to tell apart; everything else travels as plain `anyhow` context.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WrenchError {
    #[error("no app named {app}")]
    AppNotInstalled { app: String },
    #[error("{message}")]
    Validation { message: String },
    #[error("patch '{id}' failed: {message}")]
    Patch { id: String, message: String },
    #[error("branch '{branch}' of app '{app}' is no longer supported: {hint}")]
    InvalidBranch {
        app: String,
        branch: String,
        hint: String,
    },
    #[error("invalid remote for '{app}': {message}")]
    InvalidRemote { app: String, message: String },
    #[error("operation cancelled: {reason}")]
    Cancelled { reason: String },
}

impl WrenchError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn app_not_installed(app: impl Into<String>) -> Self {
        Self::AppNotInstalled { app: app.into() }
    }

    /// Operator precondition failures; raised before anything is mutated.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::AppNotInstalled { .. } | Self::Validation { .. })
    }

    /// Recover the typed error from an `anyhow` chain, if one is present.
    pub fn find(err: &anyhow::Error) -> Option<&WrenchError> {
        err.chain()
            .find_map(|cause| cause.downcast_ref::<WrenchError>())
    }
}
