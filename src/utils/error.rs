use std::fmt;
use thiserror::Error;

/// Coarse classification surfaced to callers of the library.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidConfig,
    AuthFailed,
    TransportError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::NotFound => "not found",
            ErrorKind::InvalidConfig => "invalid configuration",
            ErrorKind::AuthFailed => "authentication failed",
            ErrorKind::TransportError => "transport error",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum IsshoError {
    #[error("No {namespace} named '{name}' in {path}")]
    NotFound {
        namespace: &'static str,
        name: String,
        path: String,
    },

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("No {kind} secret stored for {account} (service '{service}').\n{hint}")]
    MissingSecret {
        kind: String,
        service: String,
        account: String,
        hint: String,
    },

    #[error("Authentication failed: {message}")]
    AuthFailed { message: String },

    #[error("SSH error: {0}")]
    Ssh(#[from] ssh2::Error),

    #[error("Keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl IsshoError {
    pub fn invalid_config(message: impl Into<String>) -> Self {
        IsshoError::InvalidConfig {
            message: message.into(),
        }
    }

    pub fn auth_failed(message: impl Into<String>) -> Self {
        IsshoError::AuthFailed {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            IsshoError::NotFound { .. } => ErrorKind::NotFound,
            IsshoError::InvalidConfig { .. } | IsshoError::MissingSecret { .. } => {
                ErrorKind::InvalidConfig
            }
            IsshoError::AuthFailed { .. } => ErrorKind::AuthFailed,
            IsshoError::Ssh(_) | IsshoError::Keyring(_) | IsshoError::Io(_) => {
                ErrorKind::TransportError
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, IsshoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_secret_is_a_configuration_error() {
        let err = IsshoError::MissingSecret {
            kind: "kinit".into(),
            service: "kinit_dev".into(),
            account: "alice".into(),
            hint: "Run `issho config dev` to store it.".into(),
        };
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
        assert!(err.to_string().contains("issho config dev"));
    }

    #[test]
    fn io_errors_are_transport_errors() {
        let err: IsshoError = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone").into();
        assert_eq!(err.kind(), ErrorKind::TransportError);
    }
}
