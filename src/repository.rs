//! # Repository Resolver
//!
//! This module provides the `RepositoryResolver`, which turns repository URLs
//! into local working copies kept inside the registry's `git` realm.
//!
//! ## Design
//!
//! Git access goes through the **`GitOperations`** trait. The application
//! uses `DefaultGitOperations`, which wraps the system `git` command; tests
//! substitute mocks to simulate clones and failures without network access.
//!
//! Each remote repository is cloned at most once per cache directory. URL
//! spellings are collapsed by [`RepositoryKey`], so `git@github.com:u/r.git`
//! and `https://github.com/u/r` share one clone. When the resolver is opened
//! it reloads every clone the registry remembers and discards directories
//! that are not usable working copies, e.g. leftovers of an interrupted
//! clone.

use std::collections::HashMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::rc::Rc;

use log::{debug, info, warn};

use crate::error::{Error, Result};
use crate::git::{self, GitRepository, HeadInfo, RepositoryKey, GITHUB_HOST};
use crate::registry::{Claim, ResourceRegistry};

/// Realm holding one directory per cloned repository.
pub const GIT_REALM: &str = "git";

/// Trait for git operations - allows mocking in tests
pub trait GitOperations {
    /// Shallow-clones `url` into the existing, empty `target_dir`.
    fn clone_shallow(&self, url: &str, target_dir: &Path) -> Result<()>;

    /// Reads commit and commit date of HEAD in a working copy.
    fn head(&self, repo_dir: &Path) -> Result<HeadInfo>;

    /// Reads the origin URL of a working copy.
    fn remote_url(&self, repo_dir: &Path) -> Result<String>;
}

/// The default implementation of `GitOperations`, which uses the system's
/// `git` command.
pub struct DefaultGitOperations;

impl GitOperations for DefaultGitOperations {
    fn clone_shallow(&self, url: &str, target_dir: &Path) -> Result<()> {
        git::clone_shallow(url, target_dir)
    }

    fn head(&self, repo_dir: &Path) -> Result<HeadInfo> {
        git::read_head(repo_dir)
    }

    fn remote_url(&self, repo_dir: &Path) -> Result<String> {
        git::read_remote_url(repo_dir)
    }
}

/// A file or directory inside a cloned repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitPath {
    /// Absolute local path.
    pub path: PathBuf,
    /// Final component of the path inside the repository.
    pub basename: String,
    pub repo: Rc<GitRepository>,
    /// Web link to the file or directory, see [`GitRepository::permalink`].
    pub url: String,
}

/// The SSH spelling of an HTTPS GitHub URL, if `url` is one.
fn github_ssh_fallback(url: &str) -> Option<String> {
    let rest = url
        .trim()
        .strip_prefix("https://")
        .and_then(|r| r.strip_prefix(GITHUB_HOST))
        .and_then(|r| r.strip_prefix('/'))?;
    let path = rest.trim_end_matches('/');
    let path = path.strip_suffix(".git").unwrap_or(path);
    if path.is_empty() {
        return None;
    }
    Some(format!("ssh://git@{}/{}.git", GITHUB_HOST, path))
}

/// Adds a hint for the most common reason a clone fails.
fn describe_clone_failure(error: &Error) -> String {
    let message = error.to_string();
    if message.contains("Authentication failed")
        || message.contains("Permission denied")
        || message.contains("Could not read from remote repository")
    {
        format!(
            "{}\n\nHint: Check your git credentials. For SSH URLs, ensure your SSH key is configured. For HTTPS, check your credential helper or use a personal access token.",
            message
        )
    } else {
        message
    }
}

/// Joins `relative` onto `root`, rejecting anything that could leave `root`.
fn resolve_inside(root: &Path, relative: &str) -> Result<PathBuf> {
    let relative = relative.trim();
    let mut path = root.to_path_buf();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => path.push(part),
            Component::CurDir => {}
            _ => {
                return Err(Error::InvalidArgument {
                    message: format!(
                        "relative path {:?} must stay inside the repository",
                        relative
                    ),
                })
            }
        }
    }
    Ok(path)
}

/// Wipes and recreates `dir` so it can receive another clone attempt.
fn reset_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        fs::remove_dir_all(dir)?;
    }
    fs::create_dir_all(dir)?;
    Ok(())
}

/// Resolves repository URLs to local clones managed by a [`ResourceRegistry`].
pub struct RepositoryResolver {
    registry: ResourceRegistry,
    git_ops: Box<dyn GitOperations>,
    repos: HashMap<RepositoryKey, Rc<GitRepository>>,
}

impl RepositoryResolver {
    /// Opens a resolver over the cache in `base_dir` using the system `git`.
    pub fn open(base_dir: impl AsRef<Path>) -> Result<Self> {
        Self::with_operations(
            ResourceRegistry::open(base_dir)?,
            Box::new(DefaultGitOperations),
        )
    }

    /// Creates a resolver with a custom `GitOperations` implementation and
    /// reloads the clones recorded in `registry`.
    pub fn with_operations(
        registry: ResourceRegistry,
        git_ops: Box<dyn GitOperations>,
    ) -> Result<Self> {
        let mut resolver = Self {
            registry,
            git_ops,
            repos: HashMap::new(),
        };
        resolver.reload()?;
        Ok(resolver)
    }

    fn reload(&mut self) -> Result<()> {
        for (name, dir) in self.registry.entries(GIT_REALM) {
            match self.inspect(&dir) {
                Ok(repo) => {
                    let repo = Rc::new(repo);
                    let key = repo.key()?;
                    debug!("Reloaded {} from {}", key, dir.display());
                    self.repos.insert(key, repo);
                }
                Err(e) => {
                    warn!(
                        "Discarding unusable clone {} at {}: {}",
                        name,
                        dir.display(),
                        e
                    );
                    self.registry.discard(GIT_REALM, &name)?;
                }
            }
        }
        Ok(())
    }

    /// Reads the metadata of the working copy in `dir`.
    fn inspect(&self, dir: &Path) -> Result<GitRepository> {
        if !dir.join(".git").is_dir() {
            return Err(Error::UnexpectedKind {
                path: dir.join(".git"),
                expected: "a directory",
            });
        }
        let url = self.git_ops.remote_url(dir)?;
        let head = self.git_ops.head(dir)?;
        GitRepository::new(dir.to_path_buf(), &url, head)
    }

    pub fn registry(&self) -> &ResourceRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ResourceRegistry {
        &mut self.registry
    }

    /// Gets the repository for `url`, cloning it on first use.
    pub fn get_repository(&mut self, url: &str) -> Result<Rc<GitRepository>> {
        self.registry.check_open()?;
        let key = RepositoryKey::from_url(url)?;
        if let Some(repo) = self.repos.get(&key) {
            return Ok(Rc::clone(repo));
        }

        let name = key.registry_name();
        let dir = match self.registry.get_dir(GIT_REALM, &name)? {
            Claim::Created(dir) => dir,
            Claim::Existing(dir) => {
                return Err(Error::InconsistentState {
                    message: format!(
                        "{} is registered as {} but holds no known repository",
                        dir.display(),
                        name
                    ),
                })
            }
        };

        let repo = match self.download(url, &dir) {
            Ok(repo) => Rc::new(repo),
            Err(e) => {
                self.registry.discard(GIT_REALM, &name)?;
                return Err(e);
            }
        };

        let canonical = repo.key()?;
        info!(
            "Cloned {} at commit {} into {}",
            repo.url,
            repo.commit,
            dir.display()
        );
        if canonical != key {
            self.repos.insert(canonical, Rc::clone(&repo));
        }
        self.repos.insert(key, Rc::clone(&repo));
        Ok(repo)
    }

    fn download(&self, url: &str, dir: &Path) -> Result<GitRepository> {
        let url = url.trim();
        info!("Cloning {} into {}", url, dir.display());
        if let Err(first) = self.git_ops.clone_shallow(url, dir) {
            let Some(fallback) = github_ssh_fallback(url) else {
                return Err(Error::RepositoryUnavailable {
                    url: url.to_string(),
                    message: describe_clone_failure(&first),
                });
            };
            warn!("Cloning {} failed, retrying via {}: {}", url, fallback, first);
            reset_dir(dir)?;
            if let Err(second) = self.git_ops.clone_shallow(&fallback, dir) {
                return Err(Error::RepositoryUnavailable {
                    url: url.to_string(),
                    message: format!(
                        "{}\nRetry via {} failed as well: {}",
                        first,
                        fallback,
                        describe_clone_failure(&second)
                    ),
                });
            }
        }
        self.inspect(dir).map_err(|e| Error::RepositoryUnavailable {
            url: url.to_string(),
            message: format!("cannot read metadata of clone: {}", e),
        })
    }

    /// Gets a file inside the repository `url`.
    pub fn get_file(&mut self, url: &str, relative_path: &str) -> Result<GitPath> {
        self.get_path(url, relative_path, false)
    }

    /// Gets a directory inside the repository `url`.
    pub fn get_dir(&mut self, url: &str, relative_path: &str) -> Result<GitPath> {
        self.get_path(url, relative_path, true)
    }

    fn get_path(&mut self, url: &str, relative_path: &str, dir: bool) -> Result<GitPath> {
        let repo = self.get_repository(url)?;
        let path = resolve_inside(&repo.path, relative_path)?;
        let matches = if dir { path.is_dir() } else { path.is_file() };
        if !matches {
            return Err(Error::UnexpectedKind {
                path,
                expected: if dir { "a directory" } else { "a file" },
            });
        }
        let url = repo.permalink(&path)?;
        let basename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(GitPath {
            path,
            basename,
            repo,
            url,
        })
    }

    /// Registry paths plus the root of every known clone.
    pub fn sensitive_paths(&self) -> Vec<PathBuf> {
        let mut paths = self.registry.sensitive_paths();
        paths.extend(self.repos.values().map(|r| r.path.clone()));
        paths.sort();
        paths.dedup();
        paths
    }

    /// Closes the underlying registry.
    pub fn close(&mut self) -> Result<()> {
        self.repos.clear();
        self.registry.close()
    }
}
