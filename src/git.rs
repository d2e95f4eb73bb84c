use std::fs;
use std::path::{Path, PathBuf};

use git2::{
    Cred, CredentialType, ErrorCode, FetchOptions, IndexAddOption, ObjectType, Oid, PushOptions,
    RemoteCallbacks, Repository, ResetType, Signature,
};
use regex::Regex;
use std::sync::LazyLock;
use tempfile::TempDir;
use walkdir::WalkDir;

use crate::config::{Committer, Config};
use crate::error::{GitContext, PublishError};
use crate::publish::{PublishOptions, PublishReport, Publisher};

const MAX_AUTH_ATTEMPTS: usize = 3;

/// Written into `.git` of every clone this tool creates, so a cache directory
/// is only ever reused when it is one of ours.
const CACHE_MARKER: &str = "gh-deploy-cache";

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^@\s<>]+@[^@\s<>]+\.[^@\s<>.]+$").expect("email pattern is valid")
});

/// Authentication material offered to the remote on demand.
#[derive(Clone, Default)]
pub struct Credentials {
    pub ssh_key_path: Option<PathBuf>,
    pub token: Option<String>,
}

impl Credentials {
    fn resolve(&self, username: Option<&str>, allowed: CredentialType) -> Result<Cred, git2::Error> {
        if allowed.contains(CredentialType::USERNAME) {
            return Cred::username(username.unwrap_or("git"));
        }
        if allowed.contains(CredentialType::SSH_KEY) {
            let username = username.unwrap_or("git");
            return match &self.ssh_key_path {
                Some(path) => Cred::ssh_key(username, None, path, None),
                None => Cred::ssh_key_from_agent(username),
            };
        }
        if allowed.contains(CredentialType::USER_PASS_PLAINTEXT) {
            if let Some(token) = &self.token {
                return Cred::userpass_plaintext(username.unwrap_or("x-access-token"), token);
            }
        }
        Cred::default()
    }
}

/// Publishes through a local clone managed with libgit2.
pub struct GitPublisher {
    cache_dir: Option<PathBuf>,
    credentials: Credentials,
}

impl GitPublisher {
    pub fn new(cache_dir: Option<PathBuf>, credentials: Credentials) -> Self {
        Self {
            cache_dir,
            credentials,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.cache_dir.clone(),
            Credentials {
                ssh_key_path: config.ssh_key_path.clone(),
                token: config.token.clone(),
            },
        )
    }

    fn clone_dir(&self, source_dir: &Path) -> Result<CloneDir, PublishError> {
        match &self.cache_dir {
            Some(dir) => {
                fs::create_dir_all(dir).map_err(|e| PublishError::io(dir, e))?;
                let cache = dir.canonicalize().map_err(|e| PublishError::io(dir, e))?;
                let source = source_dir
                    .canonicalize()
                    .map_err(|e| PublishError::io(source_dir, e))?;
                check_cache_dir(&cache, &source)?;
                Ok(CloneDir::Cached(cache))
            }
            None => TempDir::with_prefix("gh-deploy")
                .map(CloneDir::Temporary)
                .map_err(|e| PublishError::io(std::env::temp_dir(), e)),
        }
    }
}

/// The clone gets wiped on every run, so it may neither overlap the site nor
/// be a directory we did not create.
fn check_cache_dir(cache: &Path, source: &Path) -> Result<(), PublishError> {
    let refuse = |reason: &str| -> Result<(), PublishError> {
        Err(PublishError::InvalidCacheDir {
            path: cache.to_path_buf(),
            reason: reason.to_string(),
        })
    };

    if source.starts_with(cache) || cache.starts_with(source) {
        return refuse("it overlaps the source directory");
    }

    let mut entries = fs::read_dir(cache).map_err(|e| PublishError::io(cache, e))?;
    if entries.next().is_some() && !cache.join(".git").join(CACHE_MARKER).is_file() {
        return refuse("it is not empty and was not created by gh-deploy");
    }
    Ok(())
}

enum CloneDir {
    Cached(PathBuf),
    Temporary(TempDir),
}

impl CloneDir {
    fn path(&self) -> &Path {
        match self {
            CloneDir::Cached(path) => path.as_path(),
            CloneDir::Temporary(dir) => dir.path(),
        }
    }
}

impl Publisher for GitPublisher {
    fn publish(
        &self,
        source_dir: &Path,
        options: &PublishOptions,
    ) -> Result<PublishReport, PublishError> {
        if !source_dir.exists() {
            return Err(PublishError::SourceMissing {
                path: source_dir.to_path_buf(),
            });
        }
        if !source_dir.is_dir() {
            return Err(PublishError::NotADirectory {
                path: source_dir.to_path_buf(),
            });
        }
        if let Some(user) = &options.user {
            validate_committer(user)?;
        }

        let files = collect_files(source_dir, options.dotfiles)?;
        if files.is_empty() {
            return Err(PublishError::NoFiles {
                path: source_dir.to_path_buf(),
            });
        }
        log::info!(
            "Publishing {} file(s) from {} to branch {}",
            files.len(),
            source_dir.display(),
            options.branch
        );

        let clone_dir = self.clone_dir(source_dir)?;
        let workdir = clone_dir.path();
        let (repo, remote_tip) = prepare_clone(workdir, options, &self.credentials)?;

        let start_fresh = !options.add || remote_tip.is_none();
        if start_fresh {
            log::debug!("Clearing work tree in {}", workdir.display());
            clear_worktree(workdir)?;
        }

        for relative in &files {
            let dest = workdir.join(relative);
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent).map_err(|e| PublishError::io(parent, e))?;
            }
            let src = source_dir.join(relative);
            fs::copy(&src, &dest).map_err(|e| PublishError::io(&src, e))?;
        }

        let tree_id = stage_all(&repo, start_fresh)?;

        let unchanged = match remote_tip {
            Some(tip) => {
                repo.find_commit(tip)
                    .git_context("Failed to read current branch tip")?
                    .tree_id()
                    == tree_id
            }
            None => false,
        };

        let branch_ref = format!("refs/heads/{}", options.branch);
        let commit = if unchanged {
            log::info!("No changes to {}, skipping commit", options.branch);
            None
        } else {
            let parent = if options.history { remote_tip } else { None };
            let oid = commit_tree(&repo, &branch_ref, tree_id, parent, options)?;
            log::info!("Committed {} on {}", oid, options.branch);
            Some(oid)
        };

        if let Some(tag) = &options.tag {
            let target = commit.or(remote_tip).ok_or_else(|| {
                PublishError::InvalidConfig(format!("nothing to tag on {}", options.branch))
            })?;
            let object = repo
                .find_object(target, None)
                .git_context("Failed to look up commit to tag")?;
            repo.tag_lightweight(tag, &object, true)
                .git_context(format!("Failed to create tag {tag}"))?;
        }

        if options.push {
            push(&repo, options, &self.credentials)?;
            log::info!("Pushed {} to {}", options.branch, options.repo);
        } else {
            log::info!("Push disabled, leaving {} in {}", options.branch, workdir.display());
        }

        Ok(PublishReport {
            branch: options.branch.clone(),
            commit: commit.map(|oid| oid.to_string()),
            files: files.len(),
            pushed: options.push,
        })
    }
}

/// Reject identities libgit2 would accept but hosting providers would not.
pub fn validate_committer(user: &Committer) -> Result<(), PublishError> {
    if user.name.trim().is_empty() {
        return Err(PublishError::InvalidCommitter(
            "committer name must not be empty".into(),
        ));
    }
    if !EMAIL_RE.is_match(&user.email) {
        return Err(PublishError::InvalidCommitter(format!(
            "'{}' is not a valid email address",
            user.email
        )));
    }
    Ok(())
}

/// Find the URL of `remote` in the repository containing `start`.
pub fn discover_remote_url(start: &Path, remote: &str) -> Result<String, PublishError> {
    let repo = Repository::discover(start)
        .git_context("No repository URL configured and no git repository found")?;
    let found = repo
        .find_remote(remote)
        .git_context(format!("Failed to find remote '{remote}'"))?;
    found
        .url()
        .map(str::to_string)
        .ok_or_else(|| PublishError::InvalidConfig(format!("remote '{remote}' has no URL")))
}

fn is_excluded(name: &std::ffi::OsStr, dotfiles: bool) -> bool {
    let name = name.as_encoded_bytes();
    name == b".git" || (!dotfiles && name.starts_with(b"."))
}

/// Relative paths of every file to publish, sorted.
fn collect_files(source_dir: &Path, dotfiles: bool) -> Result<Vec<PathBuf>, PublishError> {
    let mut files = vec![];
    let walker = WalkDir::new(source_dir)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_excluded(e.file_name(), dotfiles));

    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(source_dir).to_path_buf();
            PublishError::io(path, e.into())
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(source_dir) else {
            continue;
        };
        files.push(relative.to_path_buf());
    }

    Ok(files)
}

/// Initialise (or reuse) the clone and point HEAD at the target branch.
///
/// Returns the remote tip of the branch when it already exists.
fn prepare_clone(
    workdir: &Path,
    options: &PublishOptions,
    credentials: &Credentials,
) -> Result<(Repository, Option<Oid>), PublishError> {
    log::info!("Preparing clone of {} in {}", options.repo, workdir.display());

    let repo = Repository::init(workdir)
        .git_context(format!("Failed to init repository in {}", workdir.display()))?;
    let marker = repo.path().join(CACHE_MARKER);
    fs::write(&marker, "").map_err(|e| PublishError::io(&marker, e))?;

    match repo.find_remote(&options.remote) {
        Ok(remote) if remote.url() == Some(options.repo.as_str()) => {}
        Ok(_) => repo
            .remote_set_url(&options.remote, &options.repo)
            .git_context("Failed to update remote URL")?,
        Err(_) => {
            repo.remote(&options.remote, &options.repo)
                .git_context(format!("Failed to add remote {}", options.repo))?;
        }
    }

    let branch_ref = format!("refs/heads/{}", options.branch);
    let tracking_ref = format!("refs/remotes/{}/{}", options.remote, options.branch);

    // A tracking ref left over from an earlier run must not pass for the remote branch.
    if let Ok(mut stale) = repo.find_reference(&tracking_ref) {
        stale
            .delete()
            .git_context("Failed to delete stale tracking branch")?;
    }

    {
        let mut remote = repo
            .find_remote(&options.remote)
            .git_context("Failed to find remote")?;
        let mut fetch_options = FetchOptions::new();
        fetch_options.remote_callbacks(remote_callbacks(credentials));

        let refspec = format!("+{branch_ref}:{tracking_ref}");
        remote
            .fetch(&[refspec.as_str()], Some(&mut fetch_options), None)
            .git_context(format!("Failed to fetch {} from {}", options.branch, options.repo))?;
    }

    let remote_tip = match repo.refname_to_id(&tracking_ref) {
        Ok(oid) => Some(oid),
        Err(e) if e.code() == ErrorCode::NotFound => {
            log::info!("Branch {} does not exist on the remote yet", options.branch);
            None
        }
        Err(e) => {
            return Err(PublishError::Git {
                context: "Failed to resolve fetched branch".into(),
                source: e,
            })
        }
    };

    match remote_tip {
        Some(tip) => {
            repo.set_head(&branch_ref)
                .git_context("Failed to switch to branch")?;
            let commit = repo
                .find_object(tip, Some(ObjectType::Commit))
                .git_context("Failed to read fetched commit")?;
            repo.reset(&commit, ResetType::Hard, None)
                .git_context("Failed to reset to fetched commit")?;
        }
        None => {
            if let Ok(mut stale) = repo.find_reference(&branch_ref) {
                stale
                    .delete()
                    .git_context("Failed to delete stale local branch")?;
            }
            repo.set_head(&branch_ref)
                .git_context("Failed to switch to branch")?;
        }
    }

    Ok((repo, remote_tip))
}

fn clear_worktree(workdir: &Path) -> Result<(), PublishError> {
    let entries = fs::read_dir(workdir).map_err(|e| PublishError::io(workdir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| PublishError::io(workdir, e))?;
        if entry.file_name() == ".git" {
            continue;
        }
        let path = entry.path();
        let is_dir = entry
            .file_type()
            .map_err(|e| PublishError::io(&path, e))?
            .is_dir();
        let removed = if is_dir {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        removed.map_err(|e| PublishError::io(&path, e))?;
    }
    Ok(())
}

fn stage_all(repo: &Repository, start_fresh: bool) -> Result<Oid, PublishError> {
    let mut index = repo.index().git_context("Failed to open index")?;
    if start_fresh {
        index.clear().git_context("Failed to clear index")?;
    }
    index
        .add_all(["."], IndexAddOption::DEFAULT | IndexAddOption::FORCE, None)
        .git_context("Failed to stage files")?;
    index.write().git_context("Failed to write index")?;
    index.write_tree().git_context("Failed to write tree")
}

fn commit_tree(
    repo: &Repository,
    branch_ref: &str,
    tree_id: Oid,
    parent: Option<Oid>,
    options: &PublishOptions,
) -> Result<Oid, PublishError> {
    let signature = match &options.user {
        Some(user) => Signature::now(&user.name, &user.email)
            .map_err(|e| PublishError::InvalidCommitter(e.message().to_string()))?,
        None => repo.signature().map_err(|_| {
            PublishError::InvalidCommitter(
                "no user configured and git config has no user.name/user.email".into(),
            )
        })?,
    };

    let tree = repo.find_tree(tree_id).git_context("Failed to find tree")?;
    let parents = match parent {
        Some(oid) => vec![repo.find_commit(oid).git_context("Failed to find parent")?],
        None => vec![],
    };
    let parent_refs = parents.iter().collect::<Vec<_>>();

    // The branch ref is moved separately so orphan commits can replace an existing tip.
    let oid = repo
        .commit(
            None,
            &signature,
            &signature,
            &options.message,
            &tree,
            &parent_refs,
        )
        .git_context("Failed to create commit")?;
    repo.reference(branch_ref, oid, true, &options.message)
        .git_context(format!("Failed to update {branch_ref}"))?;

    Ok(oid)
}

/// libgit2 keeps asking while the remote rejects what it is given; stop after a few tries.
fn credential_handler(
    credentials: &Credentials,
) -> impl FnMut(&str, Option<&str>, CredentialType) -> Result<Cred, git2::Error> + '_ {
    let mut attempts = 0;
    move |url: &str, username: Option<&str>, allowed: CredentialType| {
        attempts += 1;
        if attempts > MAX_AUTH_ATTEMPTS {
            return Err(git2::Error::from_str(&format!(
                "authentication failed for {url}"
            )));
        }
        credentials.resolve(username, allowed)
    }
}

fn remote_callbacks(credentials: &Credentials) -> RemoteCallbacks<'_> {
    let mut callbacks = RemoteCallbacks::new();
    callbacks.credentials(credential_handler(credentials));
    callbacks
}

fn push(
    repo: &Repository,
    options: &PublishOptions,
    credentials: &Credentials,
) -> Result<(), PublishError> {
    let branch_ref = format!("refs/heads/{}", options.branch);
    let force = if options.history { "" } else { "+" };
    let mut refspecs = vec![format!("{force}{branch_ref}:{branch_ref}")];
    if let Some(tag) = &options.tag {
        refspecs.push(format!("+refs/tags/{tag}:refs/tags/{tag}"));
    }

    let mut remote = repo
        .find_remote(&options.remote)
        .git_context("Failed to find remote")?;

    let mut rejected = vec![];
    {
        let mut callbacks = remote_callbacks(credentials);
        callbacks.push_update_reference(|reference, status| {
            if let Some(message) = status {
                rejected.push((reference.to_string(), message.to_string()));
            }
            Ok(())
        });
        let mut push_options = PushOptions::new();
        push_options.remote_callbacks(callbacks);

        remote
            .push(refspecs.as_slice(), Some(&mut push_options))
            .git_context(format!("Failed to push to {}", options.repo))?;
    }

    match rejected.into_iter().next() {
        Some((reference, message)) => Err(PublishError::PushRejected { reference, message }),
        None => Ok(()),
    }
}
