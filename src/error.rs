use std::path::PathBuf;
use thiserror::Error;

/// Everything that can go wrong while publishing a directory to a branch.
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Source directory not found: {path}")]
    SourceMissing { path: PathBuf },

    #[error("Source path is not a directory: {path}")]
    NotADirectory { path: PathBuf },

    #[error("No files to publish in {path}")]
    NoFiles { path: PathBuf },

    #[error("Refusing to use cache directory {path}: {reason}")]
    InvalidCacheDir { path: PathBuf, reason: String },

    #[error("Invalid committer identity: {0}")]
    InvalidCommitter(String),

    #[error("I/O error on {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{context}")]
    Git {
        context: String,
        #[source]
        source: git2::Error,
    },

    #[error("Remote rejected {reference}: {message}")]
    PushRejected { reference: String, message: String },

    #[error("Publish aborted: {0}")]
    Aborted(String),
}

impl PublishError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PublishError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Attaches a human readable step description to libgit2 failures.
pub trait GitContext<T> {
    fn git_context<C: Into<String>>(self, context: C) -> Result<T, PublishError>;
}

impl<T> GitContext<T> for Result<T, git2::Error> {
    fn git_context<C: Into<String>>(self, context: C) -> Result<T, PublishError> {
        self.map_err(|source| PublishError::Git {
            context: context.into(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn git_context_keeps_source() {
        let result: Result<(), git2::Error> = Err(git2::Error::from_str("boom"));
        let err = result.git_context("Failed to fetch").unwrap_err();

        assert_eq!(err.to_string(), "Failed to fetch");
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "boom");
    }

    #[test]
    fn push_rejected_names_reference() {
        let err = PublishError::PushRejected {
            reference: "refs/heads/gh-pages".to_string(),
            message: "non-fast-forward".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Remote rejected refs/heads/gh-pages: non-fast-forward"
        );
    }
}
