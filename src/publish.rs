use std::path::Path;

use crate::config::Committer;
use crate::error::PublishError;

/// Options handed to a [`Publisher`] alongside the source directory.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishOptions {
    pub branch: String,
    pub repo: String,
    pub user: Option<Committer>,
    pub message: String,
    pub remote: String,
    pub dotfiles: bool,
    pub add: bool,
    pub push: bool,
    pub history: bool,
    pub tag: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReport {
    pub branch: String,
    /// Id of the new commit, `None` when the branch already had identical content.
    pub commit: Option<String>,
    pub files: usize,
    pub pushed: bool,
}

/// Stages a directory, commits it to a branch and pushes it to a remote.
///
/// Implementations block; callers run them off the async executor.
pub trait Publisher: Send + Sync + 'static {
    fn publish(
        &self,
        source_dir: &Path,
        options: &PublishOptions,
    ) -> Result<PublishReport, PublishError>;
}
