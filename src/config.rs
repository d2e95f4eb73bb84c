//! Deployment configuration.
//!
//! Values are layered: built-in defaults, then an optional YAML file, then
//! environment variables (a `.env` file is honoured by `main`), then flags.
//!
//! ```yaml
//! source_dir: public
//! branch: gh-pages
//! repo: https://github.com/user/site.git
//! user:
//!   name: Jane Doe
//!   email: jane@example.com
//! ```

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::PublishError;
use crate::publish::PublishOptions;

/// Name and email recorded on the published commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Committer {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Local directory whose contents get published.
    pub source_dir: PathBuf,
    /// Target branch on the remote.
    pub branch: String,
    /// Remote repository URL. Empty means "use the URL of `remote` in the current repository".
    pub repo: String,
    /// Commit identity. Falls back to git config when absent.
    pub user: Option<Committer>,
    pub message: String,
    /// Name given to the remote inside the publish clone.
    pub remote: String,
    /// Include files and directories starting with a dot.
    pub dotfiles: bool,
    /// Keep files already on the branch instead of replacing everything.
    pub add: bool,
    pub push: bool,
    /// When false the branch is rewritten as a single orphan commit and force pushed.
    pub history: bool,
    pub tag: Option<String>,
    /// Reusable clone location. A temporary directory is used when unset.
    pub cache_dir: Option<PathBuf>,
    pub ssh_key_path: Option<PathBuf>,
    #[serde(skip)]
    pub token: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from("public"),
            branch: "gh-pages".to_string(),
            repo: String::new(),
            user: None,
            message: "Updates".to_string(),
            remote: "origin".to_string(),
            dotfiles: false,
            add: false,
            push: true,
            history: true,
            tag: None,
            cache_dir: None,
            ssh_key_path: None,
            token: None,
        }
    }
}

impl Config {
    /// Read a YAML configuration file. Missing keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Overlay values found through `lookup`, normally `std::env::var`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("DEPLOY_SOURCE_DIR") {
            self.source_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("DEPLOY_BRANCH") {
            self.branch = v;
        }
        if let Some(v) = lookup("DEPLOY_REPOSITORY_URL") {
            self.repo = v;
        }
        if let Some(v) = lookup("DEPLOY_MESSAGE") {
            self.message = v;
        }
        if let Some(v) = lookup("DEPLOY_REMOTE") {
            self.remote = v;
        }
        if let Some(v) = lookup("DEPLOY_TAG") {
            self.tag = Some(v);
        }
        if let Some(v) = lookup("DEPLOY_CACHE_DIR") {
            self.cache_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("SSH_KEY_PATH") {
            self.ssh_key_path = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("GITHUB_TOKEN") {
            self.token = Some(v);
        }

        for (var, flag) in [
            ("DEPLOY_DOTFILES", &mut self.dotfiles),
            ("DEPLOY_ADD", &mut self.add),
            ("DEPLOY_PUSH", &mut self.push),
            ("DEPLOY_HISTORY", &mut self.history),
        ] {
            if let Some(v) = lookup(var) {
                *flag = parse_bool(&v).with_context(|| format!("{var}={v}"))?;
            }
        }

        self.set_user(lookup("DEPLOY_USER_NAME"), lookup("DEPLOY_USER_EMAIL"))
            .context("DEPLOY_USER_NAME and DEPLOY_USER_EMAIL must be set together")
    }

    /// Override committer fields. A new identity needs both name and email.
    pub fn set_user(&mut self, name: Option<String>, email: Option<String>) -> Result<()> {
        if let Some(user) = self.user.as_mut() {
            if let Some(name) = name {
                user.name = name;
            }
            if let Some(email) = email {
                user.email = email;
            }
            return Ok(());
        }
        match (name, email) {
            (Some(name), Some(email)) => self.user = Some(Committer { name, email }),
            (None, None) => {}
            _ => bail!("committer name and email are both required"),
        }
        Ok(())
    }

    /// Check the invariants the deploy invoker is responsible for.
    ///
    /// Committer identity is left to the publisher.
    pub fn validate(&self) -> Result<(), PublishError> {
        if self.branch.trim().is_empty() {
            return Err(PublishError::InvalidConfig("branch must not be empty".into()));
        }
        if !git2::Reference::is_valid_name(&format!("refs/heads/{}", self.branch)) {
            return Err(PublishError::InvalidConfig(format!(
                "'{}' is not a valid branch name",
                self.branch
            )));
        }
        if self.repo.trim().is_empty() {
            return Err(PublishError::InvalidConfig(
                "repository URL must not be empty".into(),
            ));
        }
        if self.remote.trim().is_empty() {
            return Err(PublishError::InvalidConfig("remote name must not be empty".into()));
        }
        Ok(())
    }

    pub fn publish_options(&self) -> PublishOptions {
        PublishOptions {
            branch: self.branch.clone(),
            repo: self.repo.clone(),
            user: self.user.clone(),
            message: self.message.clone(),
            remote: self.remote.clone(),
            dotfiles: self.dotfiles,
            add: self.add,
            push: self.push,
            history: self.history,
            tag: self.tag.clone(),
        }
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => bail!("expected a boolean"),
    }
}
