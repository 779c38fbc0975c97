use std::fmt::Display;

use crate::application::errors::ApplicationError;
use crate::domain::errors::DomainError;
use crate::infrastructure::logging::logger;
use crate::presentation::errors::CommandError;

pub fn log_command(command: impl AsRef<str>) {
    logger::debug(&format!("Command: {}", command.as_ref()));
}

/// Log `error` under `context` and convert it for the caller.
pub fn map_command_error<E>(context: impl AsRef<str>) -> impl FnOnce(E) -> CommandError
where
    E: Display + Into<CommandError>,
{
    let context = context.as_ref().to_string();

    move |error| {
        logger::error(&format!("{}: {}", context, error));
        error.into()
    }
}

/// Same as [`map_command_error`] for errors raised below the application layer.
pub fn map_domain_error(context: impl AsRef<str>) -> impl FnOnce(DomainError) -> CommandError {
    let map = map_command_error::<ApplicationError>(context);
    move |error| map(ApplicationError::from(error))
}

/// Reject blank path arguments before they reach a coordinator.
pub fn require_path(name: &str, value: &str) -> Result<std::path::PathBuf, CommandError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(CommandError::BadRequest(format!("{} must not be empty", name)));
    }
    Ok(std::path::PathBuf::from(trimmed))
}
