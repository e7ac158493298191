use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Tag source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Failed to parse {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("Failed to write {}: {message}", path.display())]
    Write { path: PathBuf, message: String },

    #[error("Remote request failed: {0}")]
    Remote(String),

    #[error("Remote request timed out: {0}")]
    Timeout(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Another sync run holds the lock at {}", .0.display())]
    Locked(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// What the run does when it meets an error of a given kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    /// Count against the current item and keep going.
    Isolate,
    /// Stop the run.
    Abort,
}

impl Error {
    pub fn policy(&self) -> Policy {
        match self {
            Error::Parse { .. } | Error::Write { .. } => Policy::Isolate,
            Error::SourceUnavailable(_)
            | Error::Remote(_)
            | Error::Timeout(_)
            | Error::Config(_)
            | Error::Locked(_)
            | Error::Io(_)
            | Error::Other(_) => Policy::Abort,
        }
    }

    /// True for failures talking to the media server.
    pub fn is_remote(&self) -> bool {
        matches!(self, Error::Remote(_) | Error::Timeout(_))
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::Timeout(err.to_string())
        } else {
            Error::Remote(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_errors_are_isolated() {
        let parse = Error::Parse {
            path: PathBuf::from("/lib/a.info/movie.nfo"),
            message: "unexpected end".to_string(),
        };
        let write = Error::Write {
            path: PathBuf::from("/lib/a.info/movie.nfo"),
            message: "read-only".to_string(),
        };
        assert_eq!(parse.policy(), Policy::Isolate);
        assert_eq!(write.policy(), Policy::Isolate);
    }

    #[test]
    fn test_run_errors_abort() {
        assert_eq!(
            Error::SourceUnavailable("gone".into()).policy(),
            Policy::Abort
        );
        assert_eq!(Error::Remote("refused".into()).policy(), Policy::Abort);
        assert_eq!(Error::Timeout("30s".into()).policy(), Policy::Abort);
        assert!(Error::Timeout("30s".into()).is_remote());
        assert!(!Error::Config("bad".into()).is_remote());
    }
}
