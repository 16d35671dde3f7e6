//! Yes/no confirmations for the guided setup flow.

use dialoguer::Confirm;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("prompt failed: {0}")]
    Terminal(#[from] dialoguer::Error),

    /// The user declined a confirmation that gates the rest of the flow.
    #[error("cancelled by user: {0}")]
    Cancelled(String),
}

/// Ask a yes/no question; `assume_yes` answers yes without prompting.
pub fn confirm(prompt: &str, assume_yes: bool) -> Result<bool, PromptError> {
    if assume_yes {
        info!(prompt, "Confirmation assumed");
        return Ok(true);
    }
    Ok(Confirm::new().with_prompt(prompt).default(false).interact()?)
}

/// Like [`confirm`], but a "no" becomes [`PromptError::Cancelled`].
pub fn require(prompt: &str, assume_yes: bool, cancel_message: &str) -> Result<(), PromptError> {
    if confirm(prompt, assume_yes)? {
        Ok(())
    } else {
        Err(PromptError::Cancelled(cancel_message.to_string()))
    }
}
