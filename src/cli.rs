use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use crate::config::Config;

/// Publish a local directory to a branch of a git repository
#[derive(Parser, Debug)]
#[command(name = "gh-deploy")]
#[command(version)]
pub struct Cli {
    /// YAML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Directory to publish
    #[arg(short, long)]
    pub dist: Option<PathBuf>,

    /// Target branch
    #[arg(short, long)]
    pub branch: Option<String>,

    /// Remote repository URL
    #[arg(short, long)]
    pub repo: Option<String>,

    /// Committer name
    #[arg(long)]
    pub name: Option<String>,

    /// Committer email
    #[arg(long)]
    pub email: Option<String>,

    /// Commit message
    #[arg(short, long)]
    pub message: Option<String>,

    /// Remote name used inside the publish clone
    #[arg(long)]
    pub remote: Option<String>,

    /// Tag the published commit
    #[arg(short, long)]
    pub tag: Option<String>,

    /// Reuse a clone in this directory between runs
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// Include dotfiles
    #[arg(long)]
    pub dotfiles: bool,

    /// Only add files, never remove existing ones from the branch
    #[arg(short, long)]
    pub add: bool,

    /// Commit without pushing
    #[arg(long)]
    pub no_push: bool,

    /// Replace the branch with a single commit (force push)
    #[arg(long)]
    pub no_history: bool,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Flags win over every other configuration source.
    pub fn apply(&self, config: &mut Config) -> Result<()> {
        if let Some(dist) = &self.dist {
            config.source_dir = dist.clone();
        }
        if let Some(branch) = &self.branch {
            config.branch = branch.clone();
        }
        if let Some(repo) = &self.repo {
            config.repo = repo.clone();
        }
        if let Some(message) = &self.message {
            config.message = message.clone();
        }
        if let Some(remote) = &self.remote {
            config.remote = remote.clone();
        }
        if let Some(tag) = &self.tag {
            config.tag = Some(tag.clone());
        }
        if let Some(cache_dir) = &self.cache_dir {
            config.cache_dir = Some(cache_dir.clone());
        }
        if self.dotfiles {
            config.dotfiles = true;
        }
        if self.add {
            config.add = true;
        }
        if self.no_push {
            config.push = false;
        }
        if self.no_history {
            config.history = false;
        }
        config
            .set_user(self.name.clone(), self.email.clone())
            .context("--name and --email must be given together")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Committer;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("gh-deploy").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_no_flags_keeps_config() {
        let mut config = Config::default();
        parse(&[]).apply(&mut config).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_flags_override_config() {
        let mut config = Config::default();
        parse(&[
            "-d",
            "dist",
            "--branch",
            "pages",
            "-r",
            "https://example.com/site.git",
            "--name",
            "Jane",
            "--email",
            "jane@example.com",
            "-m",
            "Publish",
            "--tag",
            "v2",
            "--dotfiles",
            "--add",
            "--no-push",
            "--no-history",
        ])
        .apply(&mut config)
        .unwrap();

        assert_eq!(config.source_dir, PathBuf::from("dist"));
        assert_eq!(config.branch, "pages");
        assert_eq!(config.repo, "https://example.com/site.git");
        assert_eq!(
            config.user,
            Some(Committer {
                name: "Jane".into(),
                email: "jane@example.com".into()
            })
        );
        assert_eq!(config.message, "Publish");
        assert_eq!(config.tag.as_deref(), Some("v2"));
        assert!(config.dotfiles);
        assert!(config.add);
        assert!(!config.push);
        assert!(!config.history);
    }

    #[test]
    fn test_lone_name_needs_existing_user() {
        let mut config = Config::default();
        assert!(parse(&["--name", "Jane"]).apply(&mut config).is_err());
    }

    #[test]
    fn test_verbose_and_config_path() {
        let cli = parse(&["-v", "-c", "deploy.yaml"]);
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("deploy.yaml")));
    }
}
