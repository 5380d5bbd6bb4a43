// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use std::fmt;
use std::process::ExitCode;

use omxpipe::component::ComponentError;

/// CLI-specific error type with exit code mapping
#[derive(Debug)]
pub enum CliError {
    /// Invalid command-line arguments
    InvalidArgs(String),
    /// Component name not known to any registry
    ComponentNotFound(String),
    /// A state transition was refused, failed, or timed out
    TransitionFailed(String),
    /// Buffer exchange protocol fault (queue, ownership)
    PipelineFault(String),
    /// General error from the pipeline library
    General(String),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::InvalidArgs(msg) => write!(f, "Invalid arguments: {}", msg),
            CliError::ComponentNotFound(msg) => write!(f, "Component not found: {}", msg),
            CliError::TransitionFailed(msg) => write!(f, "Transition failed: {}", msg),
            CliError::PipelineFault(msg) => write!(f, "Pipeline fault: {}", msg),
            CliError::General(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for CliError {}

impl CliError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> ExitCode {
        match self {
            CliError::InvalidArgs(_) => ExitCode::from(2),
            CliError::ComponentNotFound(_) => ExitCode::from(3),
            CliError::TransitionFailed(_) => ExitCode::from(4),
            CliError::PipelineFault(_) => ExitCode::from(5),
            CliError::General(_) => ExitCode::from(1),
        }
    }
}

/// Map omxpipe::Error to CliError with appropriate exit codes
impl From<omxpipe::Error> for CliError {
    fn from(err: omxpipe::Error) -> Self {
        use omxpipe::Error;

        match err {
            // Open failures on the component name
            Error::Component(
                ComponentError::ComponentNotFound | ComponentError::InvalidComponentName,
            ) => CliError::ComponentNotFound(format!("{}", err)),

            // Anything the transition coordinator reports
            Error::Transition { .. }
            | Error::TransitionTimeout { .. }
            | Error::TransitionPending => CliError::TransitionFailed(format!("{}", err)),

            // Exchange protocol violations
            Error::QueueFault(_)
            | Error::OwnershipViolation { .. }
            | Error::UnknownBuffer(_)
            | Error::UnknownPort(_) => CliError::PipelineFault(format!("{}", err)),

            // Remaining component codes, cancellation, and I/O
            Error::Component(_) | Error::Cancelled | Error::Io(_) => {
                CliError::General(format!("{}", err))
            }
        }
    }
}

/// Helper function to convert result to exit code
pub fn result_to_exit_code<T>(result: Result<T, CliError>) -> ExitCode {
    match result {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            e.exit_code()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(
            CliError::InvalidArgs("test".into()).exit_code(),
            ExitCode::from(2)
        );
        assert_eq!(
            CliError::ComponentNotFound("test".into()).exit_code(),
            ExitCode::from(3)
        );
        assert_eq!(
            CliError::TransitionFailed("test".into()).exit_code(),
            ExitCode::from(4)
        );
        assert_eq!(
            CliError::PipelineFault("test".into()).exit_code(),
            ExitCode::from(5)
        );
        assert_eq!(
            CliError::General("test".into()).exit_code(),
            ExitCode::from(1)
        );
    }

    #[test]
    fn test_error_display() {
        let err = CliError::ComponentNotFound("acme.encoder".to_string());
        assert_eq!(format!("{}", err), "Component not found: acme.encoder");
    }

    #[test]
    fn test_library_error_mapping() {
        let err = CliError::from(omxpipe::Error::Component(
            ComponentError::ComponentNotFound,
        ));
        assert!(matches!(err, CliError::ComponentNotFound(_)));

        let err = CliError::from(omxpipe::Error::TransitionPending);
        assert!(matches!(err, CliError::TransitionFailed(_)));

        let err = CliError::from(omxpipe::Error::QueueFault("over capacity"));
        assert!(matches!(err, CliError::PipelineFault(_)));

        let err = CliError::from(omxpipe::Error::Cancelled);
        assert!(matches!(err, CliError::General(_)));
    }
}
