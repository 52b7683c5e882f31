//! Error types for pgscope services

/// Result type alias using Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for pgscope services
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid or missing configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// A recognized wire message failed to decode
    #[error("Decode error: {0}")]
    Decode(&'static str),

    /// Underlying transport failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Short machine-readable code for this error kind, used in logs
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config(_) => "CONFIG",
            Error::Decode(_) => "DECODE",
            Error::Io(_) => "IO",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::Config("missing target".into()).code(), "CONFIG");
        assert_eq!(Error::Decode("truncated frame").code(), "DECODE");
    }

    #[test]
    fn test_error_display() {
        let err = Error::Config("source and target are required".into());
        assert_eq!(
            err.to_string(),
            "Configuration error: source and target are required"
        );
    }
}
