use std::error::Error as StdError;
use std::fmt;

/// Boxed cause carried by [`AppError`] variants.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Closed set of failure kinds surfaced by the application.
///
/// `Config` and `Validation` are fatal at startup. `Service` and `File` are
/// local to a single detection and end up on the processing record.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("service error: {message}")]
    Service {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("file error: {message}")]
    File {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("validation error: {message}")]
    Validation {
        message: String,
        #[source]
        source: Option<BoxError>,
    },
}

/// Discriminant of [`AppError`], handy for logging and metrics labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    Service,
    File,
    Validation,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Config => "config",
            ErrorKind::Service => "service",
            ErrorKind::File => "file",
            ErrorKind::Validation => "validation",
        };
        f.write_str(name)
    }
}

impl AppError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    pub fn service(message: impl Into<String>) -> Self {
        Self::Service {
            message: message.into(),
            source: None,
        }
    }

    pub fn file(message: impl Into<String>) -> Self {
        Self::File {
            message: message.into(),
            source: None,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            source: None,
        }
    }

    /// Attach an underlying cause.
    pub fn with_source(self, cause: impl Into<BoxError>) -> Self {
        let cause = Some(cause.into());
        match self {
            Self::Config { message, .. } => Self::Config { message, source: cause },
            Self::Service { message, .. } => Self::Service { message, source: cause },
            Self::File { message, .. } => Self::File { message, source: cause },
            Self::Validation { message, .. } => Self::Validation { message, source: cause },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config { .. } => ErrorKind::Config,
            Self::Service { .. } => ErrorKind::Service,
            Self::File { .. } => ErrorKind::File,
            Self::Validation { .. } => ErrorKind::Validation,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Config { message, .. }
            | Self::Service { message, .. }
            | Self::File { message, .. }
            | Self::Validation { message, .. } => message,
        }
    }

    /// Startup-phase errors abort the process; per-file errors never do.
    pub fn is_fatal(&self) -> bool {
        matches!(self.kind(), ErrorKind::Config | ErrorKind::Validation)
    }

    /// Message followed by the chain of causes, `": "`-separated.
    pub fn detail(&self) -> String {
        let mut out = self.message().to_string();
        let mut cause = StdError::source(self);
        while let Some(err) = cause {
            out.push_str(": ");
            out.push_str(&err.to_string());
            cause = err.source();
        }
        out
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::file(err.to_string()).with_source(err)
    }
}
